//! Runtime description of the entity types an adapter operates on.
//!
//! Adapters never see concrete row types. They address an entity's attributes by the
//! names found in their translation table, and an [`Entity`] tells the store what each
//! name means: a plain column, a relation to another entity, or a derived (computed)
//! set of related names. Because the description is data, the same adapter code runs
//! over any schema, and renaming a column only means changing a translation.
//!
//! Entities are usually declared in configuration:
//!
//! ```yaml
//! user:
//!   table: tg_user
//!   key: user_id
//!   attributes:
//!     user_name: { column: user_name }
//!     groups:
//!       many_to_many: { join_table: tg_user_group, source_column: user_id, target_column: group_id }
//! ```
//!
//! or built in code with the `with_*` methods.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::errors::{Result, SourceError};

/// Computes the names related to a row from that row's name
pub type DeriveFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// How a derived attribute is computed
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// SQL returning one text column of related names; `$1` is bound to the row's name
    Query(String),
    /// In-process computation, available to every store
    #[serde(skip)]
    Function(DeriveFn),
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Derivation::Query(sql) => f.debug_tuple("Query").field(sql).finish(),
            Derivation::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A named attribute of an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// A scalar column
    Column(String),
    /// Rows related through a join table holding both keys
    ManyToMany {
        join_table: String,
        /// Join column referencing this entity's key
        source_column: String,
        /// Join column referencing the related entity's key
        target_column: String,
    },
    /// Rows of `remote_table` hold this row's key in `remote_column`
    OneToMany { remote_table: String, remote_column: String },
    /// This row holds the related row's key in `local_column`
    ManyToOne { local_column: String },
    /// Computed, read-only set of related names
    Derived(Derivation),
}

impl Attribute {
    fn kind(&self) -> &'static str {
        match self {
            Attribute::Column(_) => "column",
            Attribute::ManyToMany { .. } => "many-to-many relation",
            Attribute::OneToMany { .. } => "one-to-many relation",
            Attribute::ManyToOne { .. } => "many-to-one relation",
            Attribute::Derived(_) => "derived relation",
        }
    }
}

/// An entity type: a table, its key column and its named attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    table: String,
    key: String,
    #[serde(default)]
    attributes: BTreeMap<String, Attribute>,
}

impl Entity {
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn with_column(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.with_attribute(name, Attribute::Column(column.into()))
    }

    pub fn with_many_to_many(
        self,
        name: impl Into<String>,
        join_table: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.with_attribute(
            name,
            Attribute::ManyToMany {
                join_table: join_table.into(),
                source_column: source_column.into(),
                target_column: target_column.into(),
            },
        )
    }

    pub fn with_one_to_many(
        self,
        name: impl Into<String>,
        remote_table: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        self.with_attribute(
            name,
            Attribute::OneToMany {
                remote_table: remote_table.into(),
                remote_column: remote_column.into(),
            },
        )
    }

    pub fn with_many_to_one(self, name: impl Into<String>, local_column: impl Into<String>) -> Self {
        self.with_attribute(
            name,
            Attribute::ManyToOne {
                local_column: local_column.into(),
            },
        )
    }

    pub fn with_derived_query(self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.with_attribute(name, Attribute::Derived(Derivation::Query(sql.into())))
    }

    pub fn with_derived<F>(self, name: impl Into<String>, derive: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.with_attribute(name, Attribute::Derived(Derivation::Function(Arc::new(derive))))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(name, attribute)| (name.as_str(), attribute))
    }

    /// Look up an attribute by name
    pub fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.attributes.get(name).ok_or_else(|| SourceError::UnknownAttribute {
            entity: self.table.clone(),
            attribute: name.to_string(),
        })
    }

    /// The column behind a scalar attribute
    pub fn column_for(&self, name: &str) -> Result<&str> {
        match self.attribute(name)? {
            Attribute::Column(column) => Ok(column),
            _ => Err(self.kind_error(name, "column")),
        }
    }

    /// Any non-column attribute, derived ones included
    pub fn relation_for(&self, name: &str) -> Result<&Attribute> {
        match self.attribute(name)? {
            Attribute::Column(_) => Err(self.kind_error(name, "relation")),
            relation => Ok(relation),
        }
    }

    /// A relation that may be modified
    pub fn stored_relation_for(&self, name: &str) -> Result<&Attribute> {
        match self.relation_for(name)? {
            Attribute::Derived(_) => Err(SourceError::ReadOnlyAttribute {
                entity: self.table.clone(),
                attribute: name.to_string(),
            }),
            relation => Ok(relation),
        }
    }

    pub(crate) fn kind_error(&self, name: &str, expected: &'static str) -> SourceError {
        SourceError::AttributeKind {
            entity: self.table.clone(),
            attribute: name.to_string(),
            expected,
        }
    }

    /// Human-readable summary used in logs
    pub fn describe(&self) -> String {
        let attributes: Vec<String> = self
            .attributes
            .iter()
            .map(|(name, attribute)| format!("{name}: {}", attribute.kind()))
            .collect();
        format!("{}({}) [{}]", self.table, self.key, attributes.join(", "))
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
