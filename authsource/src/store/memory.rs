//! In-memory store.
//!
//! Tables are maps of rows, rows are maps of column -> value; a missing column is
//! NULL. Name columns are kept unique the way a unique constraint would, deleting a
//! row cascades through the deleted entity's relations, and transactions snapshot the
//! tables so they roll back by restoring the snapshot. Nested transactions stack.
//!
//! Derived attributes must be [`Derivation::Function`]; SQL derivations need a
//! database and are rejected with [`SourceError::Unsupported`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::errors::{Result, SourceError};
use crate::schema::{Attribute, Derivation, Entity};
use crate::store::{Record, SourceStore, SourceTransaction};

type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<u64, Row>,
}

impl Table {
    fn push(&mut self, row: Row) -> u64 {
        self.next_id += 1;
        self.rows.insert(self.next_id, row);
        self.next_id
    }
}

#[derive(Debug, Clone, Default)]
struct Tables(BTreeMap<String, Table>);

impl Tables {
    fn table(&self, name: &str) -> Option<&Table> {
        self.0.get(name)
    }

    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.0.entry(name.to_string()).or_default()
    }

    fn rows_where<'s, 'a>(&'s self, table: &str, column: &'a str, value: &'a str) -> impl Iterator<Item = (&'s u64, &'s Row)> + 'a
    where
        's: 'a,
    {
        self.table(table)
            .into_iter()
            .flat_map(|table| table.rows.iter())
            .filter(move |(_, row)| row.get(column).map(String::as_str) == Some(value))
    }

    fn row_by_key(&self, entity: &Entity, key: &str) -> Option<(u64, &Row)> {
        self.rows_where(entity.table(), entity.key(), key)
            .next()
            .map(|(id, row)| (*id, row))
    }

    fn name_of(&self, entity: &Entity, key: &str, column: &str) -> Option<String> {
        self.row_by_key(entity, key).and_then(|(_, row)| row.get(column).cloned())
    }

    fn ensure_unique(&self, entity: &Entity, column: &str, value: &str, except_key: Option<&str>) -> Result<()> {
        let taken = self
            .rows_where(entity.table(), column, value)
            .any(|(_, row)| row.get(entity.key()).map(String::as_str) != except_key);
        if taken {
            return Err(SourceError::UniqueViolation {
                constraint: Some(format!("{}_{}_key", entity.table(), column)),
                table: Some(entity.table().to_string()),
                message: format!("duplicate key value violates unique constraint: {column} = \"{value}\""),
            });
        }
        Ok(())
    }

    fn list_records(&self, entity: &Entity, name: &str) -> Result<Vec<Record>> {
        let column = entity.column_for(name)?;
        Ok(self
            .table(entity.table())
            .into_iter()
            .flat_map(|table| table.rows.values())
            .filter_map(|row| {
                Some(Record {
                    key: row.get(entity.key())?.clone(),
                    name: row.get(column)?.clone(),
                })
            })
            .collect())
    }

    fn find_by_name(&self, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>> {
        let column = entity.column_for(name)?;
        let mut matches = self.rows_where(entity.table(), column, value);

        let Some((_, row)) = matches.next() else {
            return Ok(None);
        };
        if matches.next().is_some() {
            return Err(SourceError::AmbiguousName {
                table: entity.table().to_string(),
                attribute: name.to_string(),
                name: value.to_string(),
            });
        }

        let key = row.get(entity.key()).cloned().unwrap_or_default();
        Ok(Some(Record {
            key,
            name: value.to_string(),
        }))
    }

    fn related_names(&self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_name: &str) -> Result<Vec<String>> {
        let target_keys: Vec<String> = match entity.relation_for(relation)? {
            Attribute::ManyToMany {
                join_table,
                source_column,
                target_column,
            } => self
                .rows_where(join_table, source_column, &record.key)
                .filter_map(|(_, row)| row.get(target_column).cloned())
                .collect(),
            Attribute::OneToMany {
                remote_table,
                remote_column,
            } => self
                .rows_where(remote_table, remote_column, &record.key)
                .filter_map(|(_, row)| row.get(target.key()).cloned())
                .collect(),
            Attribute::ManyToOne { local_column } => self
                .row_by_key(entity, &record.key)
                .and_then(|(_, row)| row.get(local_column).cloned())
                .into_iter()
                .collect(),
            Attribute::Derived(Derivation::Function(derive)) => return Ok(derive(&record.name)),
            Attribute::Derived(Derivation::Query(_)) => {
                return Err(SourceError::Unsupported(format!(
                    "SQL-derived attribute \"{relation}\" of \"{}\"",
                    entity.table()
                )));
            }
            Attribute::Column(_) => return Err(entity.kind_error(relation, "relation")),
        };

        let column = target.column_for(target_name)?;
        Ok(target_keys
            .iter()
            .filter_map(|key| self.name_of(target, key, column))
            .collect())
    }

    fn insert(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Record> {
        let column = entity.column_for(name)?;
        self.ensure_unique(entity, column, value, None)?;

        let table = self.table_mut(entity.table());
        let key = (table.next_id + 1).to_string();
        let row = Row::from([(entity.key().to_string(), key.clone()), (column.to_string(), value.to_string())]);
        table.push(row);

        Ok(Record {
            key,
            name: value.to_string(),
        })
    }

    fn rename(&mut self, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()> {
        let column = entity.column_for(name)?;
        self.ensure_unique(entity, column, value, Some(&record.key))?;

        let id = self.row_by_key(entity, &record.key).map(|(id, _)| id);
        if let Some(row) = id.and_then(|id| self.table_mut(entity.table()).rows.get_mut(&id)) {
            row.insert(column.to_string(), value.to_string());
        }
        Ok(())
    }

    fn delete(&mut self, entity: &Entity, record: &Record) -> Result<()> {
        let Some(id) = self.row_by_key(entity, &record.key).map(|(id, _)| id) else {
            return Ok(());
        };
        self.table_mut(entity.table()).rows.remove(&id);

        // ON DELETE CASCADE / SET NULL for the relations the entity knows about
        for (_, attribute) in entity.attributes() {
            match attribute {
                Attribute::ManyToMany {
                    join_table,
                    source_column,
                    ..
                } => {
                    let join = self.table_mut(join_table);
                    join.rows.retain(|_, row| row.get(source_column) != Some(&record.key));
                }
                Attribute::OneToMany {
                    remote_table,
                    remote_column,
                } => {
                    for row in self.table_mut(remote_table).rows.values_mut() {
                        if row.get(remote_column) == Some(&record.key) {
                            row.remove(remote_column);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn link(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        match entity.stored_relation_for(relation)? {
            Attribute::ManyToMany {
                join_table,
                source_column,
                target_column,
            } => {
                let present = self
                    .rows_where(join_table, source_column, &record.key)
                    .any(|(_, row)| row.get(target_column) == Some(&target_record.key));
                if present {
                    return Ok(false);
                }
                let row = Row::from([
                    (source_column.clone(), record.key.clone()),
                    (target_column.clone(), target_record.key.clone()),
                ]);
                self.table_mut(join_table).push(row);
                Ok(true)
            }
            Attribute::OneToMany { remote_column, .. } => {
                Ok(self.set_column(target, &target_record.key, remote_column, Some(&record.key)))
            }
            Attribute::ManyToOne { local_column } => {
                Ok(self.set_column(entity, &record.key, local_column, Some(&target_record.key)))
            }
            Attribute::Column(_) | Attribute::Derived(_) => Err(entity.kind_error(relation, "stored relation")),
        }
    }

    fn unlink(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        match entity.stored_relation_for(relation)? {
            Attribute::ManyToMany {
                join_table,
                source_column,
                target_column,
            } => {
                let join = self.table_mut(join_table);
                let before = join.rows.len();
                join.rows.retain(|_, row| {
                    !(row.get(source_column) == Some(&record.key) && row.get(target_column) == Some(&target_record.key))
                });
                Ok(join.rows.len() < before)
            }
            Attribute::OneToMany { remote_column, .. } => {
                let linked = self
                    .row_by_key(target, &target_record.key)
                    .is_some_and(|(_, row)| row.get(remote_column) == Some(&record.key));
                Ok(linked && self.set_column(target, &target_record.key, remote_column, None))
            }
            Attribute::ManyToOne { local_column } => {
                let linked = self
                    .row_by_key(entity, &record.key)
                    .is_some_and(|(_, row)| row.get(local_column) == Some(&target_record.key));
                Ok(linked && self.set_column(entity, &record.key, local_column, None))
            }
            Attribute::Column(_) | Attribute::Derived(_) => Err(entity.kind_error(relation, "stored relation")),
        }
    }

    /// Returns whether the stored value changed
    fn set_column(&mut self, entity: &Entity, key: &str, column: &str, value: Option<&String>) -> bool {
        let Some((id, row)) = self.row_by_key(entity, key) else {
            return false;
        };
        if row.get(column) == value {
            return false;
        }
        let Some(row) = self.table_mut(entity.table()).rows.get_mut(&id) else {
            return false;
        };
        match value {
            Some(value) => row.insert(column.to_string(), value.clone()),
            None => row.remove(column),
        };
        true
    }
}

/// A store keeping every table in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }

    /// Number of rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.table(table).map_or(0, |table| table.rows.len())
    }
}

/// A transaction over a [`MemoryStore`]; restores its snapshot unless committed
pub struct MemoryTransaction<'a> {
    tables: &'a mut Tables,
    snapshot: Option<Tables>,
}

impl<'a> MemoryTransaction<'a> {
    fn begin(tables: &'a mut Tables) -> Self {
        let snapshot = Some(tables.clone());
        Self { tables, snapshot }
    }

    fn tables_mut(&mut self) -> &mut Tables {
        &mut *self.tables
    }

    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            trace!("Restoring in-memory snapshot");
            *self.tables = snapshot;
        }
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

macro_rules! memory_store_impl {
    ([$($lt:lifetime),*] $ty:ty) => {
        #[async_trait]
        impl<$($lt),*> SourceStore for $ty {
            async fn transaction(&mut self) -> Result<Box<dyn SourceTransaction + '_>> {
                Ok(Box::new(MemoryTransaction::begin(self.tables_mut())))
            }

            async fn list_records(&mut self, entity: &Entity, name: &str) -> Result<Vec<Record>> {
                self.tables_mut().list_records(entity, name)
            }

            async fn find_by_name(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>> {
                self.tables_mut().find_by_name(entity, name, value)
            }

            async fn related_names(
                &mut self,
                entity: &Entity,
                record: &Record,
                relation: &str,
                target: &Entity,
                target_name: &str,
            ) -> Result<Vec<String>> {
                self.tables_mut().related_names(entity, record, relation, target, target_name)
            }

            async fn insert(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Record> {
                self.tables_mut().insert(entity, name, value)
            }

            async fn rename(&mut self, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()> {
                self.tables_mut().rename(entity, record, name, value)
            }

            async fn delete(&mut self, entity: &Entity, record: &Record) -> Result<()> {
                self.tables_mut().delete(entity, record)
            }

            async fn link(
                &mut self,
                entity: &Entity,
                record: &Record,
                relation: &str,
                target: &Entity,
                target_record: &Record,
            ) -> Result<bool> {
                self.tables_mut().link(entity, record, relation, target, target_record)
            }

            async fn unlink(
                &mut self,
                entity: &Entity,
                record: &Record,
                relation: &str,
                target: &Entity,
                target_record: &Record,
            ) -> Result<bool> {
                self.tables_mut().unlink(entity, record, relation, target, target_record)
            }
        }
    };
}

memory_store_impl!([] MemoryStore);
memory_store_impl!(['a] MemoryTransaction<'a>);

#[async_trait]
impl<'a> SourceTransaction for MemoryTransaction<'a> {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        debug!("Committing in-memory transaction");
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        debug!("Rolling back in-memory transaction");
        self.restore();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Entity {
        Entity::new("groups", "id")
            .with_column("group_name", "name")
            .with_many_to_many("users", "user_groups", "group_id", "user_id")
    }

    fn user() -> Entity {
        Entity::new("users", "id")
            .with_column("user_name", "name")
            .with_many_to_many("groups", "user_groups", "user_id", "group_id")
    }

    #[test_log::test(tokio::test)]
    async fn test_insert_find_and_relate() {
        let mut store = MemoryStore::new();
        let admins = store.insert(&group(), "group_name", "admins").await.unwrap();
        let rms = store.insert(&user(), "user_name", "rms").await.unwrap();

        assert!(store.link(&group(), &admins, "users", &user(), &rms).await.unwrap());
        // Second link is a no-op
        assert!(!store.link(&group(), &admins, "users", &user(), &rms).await.unwrap());

        let found = store.find_by_name(&user(), "user_name", "rms").await.unwrap().unwrap();
        assert_eq!(found, rms);

        let groups = store
            .related_names(&user(), &rms, "groups", &group(), "group_name")
            .await
            .unwrap();
        assert_eq!(groups, vec!["admins".to_string()]);
        assert_eq!(store.row_count("user_groups"), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_name_columns_are_unique() {
        let mut store = MemoryStore::new();
        store.insert(&group(), "group_name", "admins").await.unwrap();

        let err = store.insert(&group(), "group_name", "admins").await.unwrap_err();
        assert!(matches!(err, SourceError::UniqueViolation { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_transaction_rolls_back() {
        let mut store = MemoryStore::new();
        {
            let mut tx = store.transaction().await.unwrap();
            tx.insert(&group(), "group_name", "admins").await.unwrap();
        }
        assert_eq!(store.row_count("groups"), 0);

        let mut tx = store.transaction().await.unwrap();
        tx.insert(&group(), "group_name", "admins").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.row_count("groups"), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_nested_transaction_rolls_back_alone() {
        let mut store = MemoryStore::new();
        let mut outer = store.transaction().await.unwrap();
        outer.insert(&group(), "group_name", "admins").await.unwrap();
        {
            let mut inner = outer.transaction().await.unwrap();
            inner.insert(&group(), "group_name", "developers").await.unwrap();
            inner.rollback().await.unwrap();
        }
        outer.commit().await.unwrap();

        let records = store.list_records(&group(), "group_name").await.unwrap();
        let names: Vec<_> = records.into_iter().map(|record| record.name).collect();
        assert_eq!(names, vec!["admins".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_cascades_memberships() {
        let mut store = MemoryStore::new();
        let admins = store.insert(&group(), "group_name", "admins").await.unwrap();
        let rms = store.insert(&user(), "user_name", "rms").await.unwrap();
        store.link(&group(), &admins, "users", &user(), &rms).await.unwrap();

        store.delete(&group(), &admins).await.unwrap();

        assert_eq!(store.row_count("user_groups"), 0);
        let groups = store
            .related_names(&user(), &rms, "groups", &group(), "group_name")
            .await
            .unwrap();
        assert!(groups.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_one_to_many_relation() {
        let team = Entity::new("teams", "id")
            .with_column("team_name", "name")
            .with_one_to_many("members", "members", "team_id");
        let member = Entity::new("members", "id")
            .with_column("member_name", "name")
            .with_many_to_one("team", "team_id");

        let mut store = MemoryStore::new();
        let core = store.insert(&team, "team_name", "core").await.unwrap();
        let ada = store.insert(&member, "member_name", "ada").await.unwrap();

        assert!(store.link(&team, &core, "members", &member, &ada).await.unwrap());
        let teams = store.related_names(&member, &ada, "team", &team, "team_name").await.unwrap();
        assert_eq!(teams, vec!["core".to_string()]);

        assert!(store.unlink(&team, &core, "members", &member, &ada).await.unwrap());
        assert!(!store.unlink(&team, &core, "members", &member, &ada).await.unwrap());
        let members = store.related_names(&team, &core, "members", &member, "member_name").await.unwrap();
        assert!(members.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_only_clears_its_own_relation() {
        let team = Entity::new("teams", "id")
            .with_column("team_name", "name")
            .with_one_to_many("members", "members", "team_id");
        let member = Entity::new("members", "id")
            .with_column("member_name", "name")
            .with_many_to_one("team", "team_id");
        let league = Entity::new("leagues", "id").with_column("league_name", "name");
        // Clubs reuse the column name for an unrelated foreign key
        let club = Entity::new("clubs", "id")
            .with_column("club_name", "name")
            .with_many_to_one("league", "team_id");

        let mut store = MemoryStore::new();
        let core = store.insert(&team, "team_name", "core").await.unwrap();
        let ada = store.insert(&member, "member_name", "ada").await.unwrap();
        let premier = store.insert(&league, "league_name", "premier").await.unwrap();
        let city = store.insert(&club, "club_name", "city").await.unwrap();
        assert_eq!(core.key, premier.key);

        store.link(&team, &core, "members", &member, &ada).await.unwrap();
        store.link(&club, &city, "league", &league, &premier).await.unwrap();

        store.delete(&team, &core).await.unwrap();

        let teams = store.related_names(&member, &ada, "team", &team, "team_name").await.unwrap();
        assert!(teams.is_empty());
        let leagues = store.related_names(&club, &city, "league", &league, "league_name").await.unwrap();
        assert_eq!(leagues, vec!["premier".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_sql_derivations_are_unsupported() {
        let user = user().with_derived_query("all_groups", "SELECT 'admins'");
        let mut store = MemoryStore::new();
        let rms = store.insert(&user, "user_name", "rms").await.unwrap();

        let err = store
            .related_names(&user, &rms, "all_groups", &group(), "group_name")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unsupported(_)));
    }
}
