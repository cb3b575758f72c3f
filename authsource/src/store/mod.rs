//! Backing stores for source adapters.
//!
//! A store is the caller-owned, transactional handle an adapter issues its reads and
//! writes against. Adapters never create or close it: every adapter operation borrows
//! one for the duration of the call.
//!
//! # Implementations
//!
//! - [`PgConnection`](sqlx::PgConnection) and [`Transaction<'_, Postgres>`](sqlx::Transaction):
//!   PostgreSQL through sqlx. Pass `&mut *tx` or `&mut *conn` directly.
//! - [`MemoryStore`]: in-process tables with snapshot transactions.
//!
//! # Transactions
//!
//! [`SourceStore::transaction`] opens a transaction scoped to the handle. Opened on a
//! handle that is itself a transaction it nests (a savepoint on PostgreSQL), so an
//! adapter's transaction composes with the caller's. Dropping a [`SourceTransaction`]
//! without committing rolls it back.
//!
//! ```ignore
//! use authsource::{adapters::SqlGroupsAdapter, store::SourceStore};
//!
//! async fn example(pool: &sqlx::PgPool, groups: &SqlGroupsAdapter) -> authsource::Result<()> {
//!     let mut tx = pool.begin().await?;
//!     groups.create_section(&mut *tx, "admins").await?;
//!     groups.include_items(&mut *tx, "admins", ["rms"]).await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::schema::Entity;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;

/// A located row: its key and its name, both in text form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub name: String,
}

/// Operations an adapter needs from its backing store.
///
/// Attribute arguments are attribute names of the given [`Entity`], never column
/// names; stores resolve them through the entity description.
#[async_trait]
pub trait SourceStore: Send {
    /// Open a transaction on this handle, nested if the handle already is one
    async fn transaction(&mut self) -> Result<Box<dyn SourceTransaction + '_>>;

    /// Every row of `entity` whose `name` attribute is set
    async fn list_records(&mut self, entity: &Entity, name: &str) -> Result<Vec<Record>>;

    /// Locate the single row whose `name` attribute equals `value`
    async fn find_by_name(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>>;

    /// The `target_name` attribute of every row reached from `record` through `relation`
    async fn related_names(
        &mut self,
        entity: &Entity,
        record: &Record,
        relation: &str,
        target: &Entity,
        target_name: &str,
    ) -> Result<Vec<String>>;

    /// Insert a row with only its `name` attribute set
    async fn insert(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Record>;

    /// Overwrite the `name` attribute of `record`
    async fn rename(&mut self, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()>;

    async fn delete(&mut self, entity: &Entity, record: &Record) -> Result<()>;

    /// Relate `record` to `target` through `relation`. Returns false if they already were.
    async fn link(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool>;

    /// Remove the relation between `record` and `target`. Returns false if there was none.
    async fn unlink(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool>;
}

/// A transaction opened with [`SourceStore::transaction`]
#[async_trait]
pub trait SourceTransaction: SourceStore {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
