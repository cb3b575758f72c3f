//! Configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file
//! path defaults to `config.yaml` and can be set with the `-f` flag or the
//! `AUTHSOURCE_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Sources are merged in this order (later sources override earlier ones):
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - variables prefixed with `AUTHSOURCE_`
//! 3. **DATABASE_URL** - overrides `database_url` if set
//!
//! Nested values use double underscores: `AUTHSOURCE_SOURCE__READ_ONLY=true` sets
//! `source.read_only`.
//!
//! ## Example
//!
//! ```yaml
//! database_url: postgres://localhost/auth
//! source:
//!   user:
//!     table: tg_user
//!     key: user_id
//!     attributes:
//!       user_name: { column: user_name }
//!       groups: { many_to_many: { join_table: tg_user_group, source_column: user_id, target_column: group_id } }
//!   group:
//!     table: tg_group
//!     key: group_id
//!     attributes:
//!       group_name: { column: group_name }
//!       users: { many_to_many: { join_table: tg_user_group, source_column: group_id, target_column: user_id } }
//!   translations:
//!     user_name: login
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adapters::SqlAdapters;
use crate::cli::Command;
use crate::errors::SourceError;
use crate::schema::Entity;
use crate::translations::{ModelTranslations, TranslationOverrides};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Inspect and administer SQL-backed group and permission sources")]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "AUTHSOURCE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without touching the database
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// PostgreSQL connection string; also read from `DATABASE_URL`
    pub database_url: Option<String>,
    pub pool: PoolSettings,
    pub source: SourceConfig,
}

/// Connection pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 2,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// The authorization model: entities and how adapters address them
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub user: Option<Entity>,
    /// Without it no groups adapter is built
    pub group: Option<Entity>,
    /// Without it no permissions adapter is built
    pub permission: Option<Entity>,
    /// Model-wide attribute names, applied to both adapters
    pub translations: ModelTranslations,
    /// Applied after `translations`, to the groups adapter only
    pub group_translations: TranslationOverrides,
    /// Applied after `translations`, to the permissions adapter only
    pub permission_translations: TranslationOverrides,
    /// Reject every mutation
    pub read_only: bool,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        Self::figment(args).extract()
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // AUTHSOURCE_CONFIG names the file itself
            .merge(Env::prefixed("AUTHSOURCE_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// Check the configuration describes a usable pair of adapters
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.pool.max_connections == 0 {
            return Err(SourceError::Other(anyhow::anyhow!(
                "Config validation: pool.max_connections must be at least 1"
            )));
        }
        SqlAdapters::from_config(&self.source).map(|_| ())
    }
}
