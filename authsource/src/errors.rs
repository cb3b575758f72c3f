use thiserror::Error;

/// Error type for every source adapter and store operation
#[derive(Error, Debug)]
pub enum SourceError {
    /// No section is stored under the given name
    #[error("Section ({attribute}) \"{name}\" is not defined in the parent table")]
    SectionNotFound { attribute: String, name: String },

    /// No item is stored under the given name
    #[error("Item ({attribute}) \"{name}\" does not exist in the child table")]
    ItemNotFound { attribute: String, name: String },

    /// A section with this name already exists
    #[error("Section \"{0}\" already exists")]
    SectionExists(String),

    /// The item is not a member of the section it should be removed from
    #[error("Item \"{item}\" is not included in section \"{section}\"")]
    ItemNotIncluded { section: String, item: String },

    /// More than one row matched a name that should be unique
    #[error("More than one row in \"{table}\" has {attribute} = \"{name}\"")]
    AmbiguousName { table: String, attribute: String, name: String },

    /// A translated attribute name does not exist on the entity
    #[error("Entity \"{entity}\" has no attribute \"{attribute}\"")]
    UnknownAttribute { entity: String, attribute: String },

    /// The attribute exists but is of the wrong kind for the operation
    #[error("Attribute \"{attribute}\" of entity \"{entity}\" is not a {expected}")]
    AttributeKind {
        entity: String,
        attribute: String,
        expected: &'static str,
    },

    /// The attribute is computed and cannot be modified
    #[error("Attribute \"{attribute}\" of entity \"{entity}\" is derived and cannot be modified")]
    ReadOnlyAttribute { entity: String, attribute: String },

    /// A translation override named a key outside the translation table
    #[error("Unknown translation key \"{0}\"")]
    UnknownTranslation(String),

    /// An adapter was requested without the entity it is built over
    #[error("The {adapter} adapter requires a {entity} entity")]
    MissingEntity { adapter: &'static str, entity: &'static str },

    /// A mutation was attempted on a read-only adapter
    #[error("The {0} source is read-only")]
    NotWritable(&'static str),

    /// The store cannot serve this kind of attribute
    #[error("Unsupported by this store: {0}")]
    Unsupported(String),

    /// Unique constraint violation reported by the store
    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    /// Whether this is the "no such section/item" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::SectionNotFound { .. } | SourceError::ItemNotFound { .. })
    }
}

/// Convert from sqlx::Error, keeping uniqueness violations distinguishable
impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => SourceError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            // Everything else is non-recoverable at this layer
            _ => SourceError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for source operation results
pub type Result<T> = std::result::Result<T, SourceError>;
