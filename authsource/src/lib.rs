//! # authsource: SQL-backed group and permission sources
//!
//! `authsource` answers the two questions an authorization framework asks of its user
//! database: *which groups does this user belong to?* and *which permissions does
//! this group hold?* It also administers the same data: creating, renaming and
//! deleting groups or permissions, and adding or removing their members.
//!
//! ## Overview
//!
//! Both sources are views of one user/group/permission model stored in SQL tables:
//!
//! - The **groups source** ([`SqlGroupsAdapter`]) treats groups as *sections* and users
//!   as the *items* they contain.
//! - The **permissions source** ([`SqlPermissionsAdapter`]) treats permissions as
//!   sections and groups as their items.
//!
//! The schema is not fixed. Tables, key columns and relations are described at
//! runtime with [`schema::Entity`], and adapters address attributes only through a
//! [translation table](translations) mapping the four logical roles (`section_name`,
//! `sections`, `item_name`, `items`) onto attribute names. A deployment whose users
//! are "members" and whose groups are "teams" changes translations, not code.
//!
//! ## Architecture
//!
//! - [`store`]: the [`SourceStore`] trait adapters run against, implemented for
//!   PostgreSQL connections and transactions (sqlx) and for an in-memory store.
//! - [`adapters`]: the generic section/item adapter, its groups and permissions
//!   specializations, and [`configure_sql_adapters`] which builds both from one model.
//! - [`config`]: YAML + environment configuration for the `authsource` binary.
//! - [`cli`]: the binary's commands, runnable against any store.
//!
//! Adapters hold no connection. Callers pass a store handle to every call, which makes
//! adapters freely shareable and lets their writes join the caller's transaction.
//!
//! ## Example
//!
//! ```ignore
//! use authsource::{Credentials, SqlAdapters};
//!
//! let adapters = SqlAdapters::from_config(&config.source)?;
//! let groups = adapters.group.as_ref().unwrap();
//!
//! let mut conn = pool.acquire().await?;
//! let found = groups.find_sections(&mut *conn, &Credentials::new("rms")).await?;
//! println!("rms is in {:?}", found.sections);
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod errors;
pub mod schema;
pub mod store;
pub mod telemetry;
pub mod translations;

#[cfg(test)]
mod test_utils;

pub use adapters::{
    Credentials, FoundSections, SqlAdapter, SqlAdapters, SqlGroupsAdapter, SqlPermissionsAdapter, configure_sql_adapters,
};
pub use config::Config;
pub use errors::{Result, SourceError};
pub use store::{MemoryStore, Record, SourceStore, SourceTransaction};
pub use translations::{TranslationOverrides, Translations};
