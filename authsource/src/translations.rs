//! Translation tables: logical role names mapped onto schema attribute names.
//!
//! Every adapter reads and writes its entities through four roles:
//!
//! - `section_name`: the attribute holding a section's unique name
//! - `sections`: the attribute on an item listing the sections it belongs to
//! - `item_name`: the attribute holding an item's unique name
//! - `items`: the attribute on a section listing its member items
//!
//! The groups and permissions adapters ship different defaults. Deployments whose
//! schema uses other names override only the roles that differ:
//!
//! ```
//! use authsource::translations::{TranslationOverrides, Translations};
//!
//! let mut translations = Translations::groups();
//! translations.apply(&TranslationOverrides {
//!     items: Some("members".to_string()),
//!     ..Default::default()
//! });
//! assert_eq!(translations.items, "members");
//! assert_eq!(translations.section_name, "group_name");
//! ```

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

use crate::errors::{Result, SourceError};

/// The four roles of a translation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslationKey {
    SectionName,
    Sections,
    ItemName,
    Items,
}

impl TranslationKey {
    pub const ALL: [TranslationKey; 4] = [
        TranslationKey::SectionName,
        TranslationKey::Sections,
        TranslationKey::ItemName,
        TranslationKey::Items,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationKey::SectionName => "section_name",
            TranslationKey::Sections => "sections",
            TranslationKey::ItemName => "item_name",
            TranslationKey::Items => "items",
        }
    }
}

impl fmt::Display for TranslationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranslationKey {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self> {
        TranslationKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| SourceError::UnknownTranslation(s.to_string()))
    }
}

/// A complete translation table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translations {
    pub section_name: String,
    pub sections: String,
    pub item_name: String,
    pub items: String,
}

impl Translations {
    /// Defaults for a groups source: groups are sections, users are items
    pub fn groups() -> Self {
        Self {
            section_name: "group_name".to_string(),
            sections: "groups".to_string(),
            item_name: "user_name".to_string(),
            items: "users".to_string(),
        }
    }

    /// Defaults for a permissions source: permissions are sections, groups are items
    pub fn permissions() -> Self {
        Self {
            section_name: "permission_name".to_string(),
            sections: "permissions".to_string(),
            item_name: "group_name".to_string(),
            items: "groups".to_string(),
        }
    }

    pub fn get(&self, key: TranslationKey) -> &str {
        match key {
            TranslationKey::SectionName => &self.section_name,
            TranslationKey::Sections => &self.sections,
            TranslationKey::ItemName => &self.item_name,
            TranslationKey::Items => &self.items,
        }
    }

    pub fn set(&mut self, key: TranslationKey, attribute: impl Into<String>) {
        let attribute = attribute.into();
        match key {
            TranslationKey::SectionName => self.section_name = attribute,
            TranslationKey::Sections => self.sections = attribute,
            TranslationKey::ItemName => self.item_name = attribute,
            TranslationKey::Items => self.items = attribute,
        }
    }

    /// Replace the roles named by `overrides`, leaving the others untouched
    pub fn apply(&mut self, overrides: &TranslationOverrides) {
        for key in TranslationKey::ALL {
            if let Some(attribute) = overrides.get(key) {
                self.set(key, attribute);
            }
        }
    }

    /// Builder-style variant of [`Translations::apply`]
    pub fn with(mut self, overrides: &TranslationOverrides) -> Self {
        self.apply(overrides);
        self
    }
}

/// A partial translation table; `None` keeps the adapter default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
}

impl TranslationOverrides {
    pub fn get(&self, key: TranslationKey) -> Option<&str> {
        match key {
            TranslationKey::SectionName => self.section_name.as_deref(),
            TranslationKey::Sections => self.sections.as_deref(),
            TranslationKey::ItemName => self.item_name.as_deref(),
            TranslationKey::Items => self.items.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        TranslationKey::ALL.into_iter().all(|key| self.get(key).is_none())
    }

    /// Later values win
    fn merge(&mut self, other: &TranslationOverrides) {
        for key in TranslationKey::ALL {
            if let Some(attribute) = other.get(key) {
                let slot = match key {
                    TranslationKey::SectionName => &mut self.section_name,
                    TranslationKey::Sections => &mut self.sections,
                    TranslationKey::ItemName => &mut self.item_name,
                    TranslationKey::Items => &mut self.items,
                };
                *slot = Some(attribute.to_string());
            }
        }
    }
}

impl TryFrom<HashMap<String, String>> for TranslationOverrides {
    type Error = SourceError;

    fn try_from(map: HashMap<String, String>) -> Result<Self> {
        let mut overrides = TranslationOverrides::default();
        for (key, attribute) in map {
            match key.parse::<TranslationKey>()? {
                TranslationKey::SectionName => overrides.section_name = Some(attribute),
                TranslationKey::Sections => overrides.sections = Some(attribute),
                TranslationKey::ItemName => overrides.item_name = Some(attribute),
                TranslationKey::Items => overrides.items = Some(attribute),
            }
        }
        Ok(overrides)
    }
}

/// Model-wide translations, named after the default model attributes.
///
/// One flat table describes the whole user/group/permission model; [`split`] turns it
/// into the override sets of both adapters, since e.g. the group name attribute is the
/// section name of the groups adapter and the item name of the permissions adapter.
///
/// [`split`]: ModelTranslations::split
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelTranslations {
    pub user_name: Option<String>,
    pub users: Option<String>,
    pub group_name: Option<String>,
    pub groups: Option<String>,
    pub permission_name: Option<String>,
    pub permissions: Option<String>,
    /// Name of the user's password check; read by authenticators, ignored here
    pub validate_password: Option<String>,
}

/// Per-adapter overrides derived from [`ModelTranslations`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterTranslations {
    pub group: TranslationOverrides,
    pub permission: TranslationOverrides,
}

impl ModelTranslations {
    pub fn split(&self) -> AdapterTranslations {
        let mut group = TranslationOverrides::default();
        let mut permission = TranslationOverrides::default();

        if let Some(user_name) = &self.user_name {
            group.item_name = Some(user_name.clone());
        }
        if let Some(users) = &self.users {
            group.items = Some(users.clone());
        }
        if let Some(group_name) = &self.group_name {
            group.section_name = Some(group_name.clone());
            permission.item_name = Some(group_name.clone());
        }
        if let Some(groups) = &self.groups {
            group.sections = Some(groups.clone());
            permission.items = Some(groups.clone());
        }
        if let Some(permission_name) = &self.permission_name {
            permission.section_name = Some(permission_name.clone());
        }
        if let Some(permissions) = &self.permissions {
            permission.sections = Some(permissions.clone());
        }

        AdapterTranslations { group, permission }
    }
}

impl AdapterTranslations {
    /// Layer explicit per-adapter overrides on top
    pub fn merged_with(mut self, group: &TranslationOverrides, permission: &TranslationOverrides) -> Self {
        self.group.merge(group);
        self.permission.merge(permission);
        self
    }
}
