//! Building both adapters from one description of the user/group/permission model.

use tracing::info;

use super::{SqlGroupsAdapter, SqlPermissionsAdapter};
use crate::config::SourceConfig;
use crate::errors::{Result, SourceError};
use crate::schema::Entity;
use crate::translations::TranslationOverrides;

/// The configured adapters; either may be absent
#[derive(Debug, Clone, Default)]
pub struct SqlAdapters {
    pub group: Option<SqlGroupsAdapter>,
    pub permission: Option<SqlPermissionsAdapter>,
}

/// Build the groups and permissions adapters.
///
/// Without a group entity there is no groups adapter, without a permission entity no
/// permissions adapter. Permissions are granted to groups, so a permission entity
/// without a group entity is rejected.
pub fn configure_sql_adapters(
    user: Entity,
    group: Option<Entity>,
    permission: Option<Entity>,
    group_translations: &TranslationOverrides,
    permission_translations: &TranslationOverrides,
) -> Result<SqlAdapters> {
    let permission = match (permission, &group) {
        (Some(permission), Some(group)) => {
            Some(SqlPermissionsAdapter::new(permission, group.clone()).with_translations(permission_translations))
        }
        (Some(_), None) => {
            return Err(SourceError::MissingEntity {
                adapter: "permissions",
                entity: "group",
            });
        }
        (None, _) => None,
    };

    let group = group.map(|group| SqlGroupsAdapter::new(group, user).with_translations(group_translations));

    Ok(SqlAdapters { group, permission })
}

impl SqlAdapters {
    /// Build the adapters described by the `source` section of the configuration
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let user = config.user.clone().ok_or(SourceError::MissingEntity {
            adapter: "groups",
            entity: "user",
        })?;

        let translations = config
            .translations
            .split()
            .merged_with(&config.group_translations, &config.permission_translations);

        let mut adapters = configure_sql_adapters(
            user,
            config.group.clone(),
            config.permission.clone(),
            &translations.group,
            &translations.permission,
        )?;

        if config.read_only {
            adapters.group = adapters.group.map(|adapter| adapter.read_only());
            adapters.permission = adapters.permission.map(|adapter| adapter.read_only());
        }

        info!(
            groups = adapters.group.is_some(),
            permissions = adapters.permission.is_some(),
            read_only = config.read_only,
            "Configured source adapters"
        );
        Ok(adapters)
    }
}
