//! PostgreSQL store.
//!
//! Implemented directly on sqlx's [`PgConnection`] and [`Transaction`], so the handle
//! an adapter works on is whatever connection or transaction the caller already
//! holds. Statements are built at runtime from the entity description: identifiers
//! are quoted with [`quote_ident`], values are always bound. Row keys travel as text
//! (`key::text`), which keeps the store independent of the key column's type.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use tracing::{debug, instrument};

use crate::errors::{Result, SourceError};
use crate::schema::{Attribute, Derivation, Entity, quote_ident};
use crate::store::{Record, SourceStore, SourceTransaction};

#[instrument(skip_all, fields(table = %entity.table(), attribute = name), err)]
async fn list_records(conn: &mut PgConnection, entity: &Entity, name: &str) -> Result<Vec<Record>> {
    let column = quote_ident(entity.column_for(name)?);
    let sql = format!(
        "SELECT {key}::text, {column}::text FROM {table} WHERE {column} IS NOT NULL",
        key = quote_ident(entity.key()),
        table = quote_ident(entity.table()),
    );

    let rows = sqlx::query_as::<_, (String, String)>(&sql).fetch_all(&mut *conn).await?;

    Ok(rows.into_iter().map(|(key, name)| Record { key, name }).collect())
}

#[instrument(skip_all, fields(table = %entity.table(), attribute = name, value = value), err)]
async fn find_by_name(conn: &mut PgConnection, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>> {
    let column = quote_ident(entity.column_for(name)?);
    let sql = format!(
        "SELECT {key}::text, {column}::text FROM {table} WHERE {column} = $1 LIMIT 2",
        key = quote_ident(entity.key()),
        table = quote_ident(entity.table()),
    );

    let mut rows = sqlx::query_as::<_, (String, String)>(&sql)
        .bind(value)
        .fetch_all(&mut *conn)
        .await?;

    if rows.len() > 1 {
        return Err(SourceError::AmbiguousName {
            table: entity.table().to_string(),
            attribute: name.to_string(),
            name: value.to_string(),
        });
    }

    Ok(rows.pop().map(|(key, name)| Record { key, name }))
}

#[instrument(skip_all, fields(table = %entity.table(), relation = relation, target = %target.table()), err)]
async fn related_names(
    conn: &mut PgConnection,
    entity: &Entity,
    record: &Record,
    relation: &str,
    target: &Entity,
    target_name: &str,
) -> Result<Vec<String>> {
    let derivation = match entity.relation_for(relation)? {
        Attribute::Derived(derivation) => derivation,
        stored => {
            let name = quote_ident(target.column_for(target_name)?);
            let target_table = quote_ident(target.table());
            let target_key = quote_ident(target.key());

            let sql = match stored {
                Attribute::ManyToMany {
                    join_table,
                    source_column,
                    target_column,
                } => format!(
                    "SELECT t.{name}::text FROM {target_table} t \
                     JOIN {join} j ON j.{target_column} = t.{target_key} \
                     WHERE j.{source_column}::text = $1",
                    join = quote_ident(join_table),
                    target_column = quote_ident(target_column),
                    source_column = quote_ident(source_column),
                ),
                Attribute::OneToMany {
                    remote_table,
                    remote_column,
                } => format!(
                    "SELECT t.{name}::text FROM {remote_table} t WHERE t.{remote}::text = $1",
                    remote_table = quote_ident(remote_table),
                    remote = quote_ident(remote_column),
                ),
                Attribute::ManyToOne { local_column } => format!(
                    "SELECT t.{name}::text FROM {target_table} t \
                     JOIN {source_table} s ON s.{local} = t.{target_key} \
                     WHERE s.{source_key}::text = $1",
                    source_table = quote_ident(entity.table()),
                    source_key = quote_ident(entity.key()),
                    local = quote_ident(local_column),
                ),
                Attribute::Column(_) | Attribute::Derived(_) => return Err(entity.kind_error(relation, "stored relation")),
            };

            let names = sqlx::query_scalar::<_, Option<String>>(&sql)
                .bind(&record.key)
                .fetch_all(&mut *conn)
                .await?;
            return Ok(names.into_iter().flatten().collect());
        }
    };

    match derivation {
        Derivation::Query(sql) => {
            debug!(relation, "Resolving derived relation with SQL");
            let names = sqlx::query_scalar::<_, Option<String>>(sql)
                .bind(&record.name)
                .fetch_all(&mut *conn)
                .await?;
            Ok(names.into_iter().flatten().collect())
        }
        Derivation::Function(derive) => Ok(derive(&record.name)),
    }
}

#[instrument(skip_all, fields(table = %entity.table(), value = value), err)]
async fn insert(conn: &mut PgConnection, entity: &Entity, name: &str, value: &str) -> Result<Record> {
    let column = quote_ident(entity.column_for(name)?);
    let sql = format!(
        "INSERT INTO {table} ({column}) VALUES ($1) RETURNING {key}::text, {column}::text",
        table = quote_ident(entity.table()),
        key = quote_ident(entity.key()),
    );

    let (key, name) = sqlx::query_as::<_, (String, String)>(&sql)
        .bind(value)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Record { key, name })
}

#[instrument(skip_all, fields(table = %entity.table(), from = %record.name, to = value), err)]
async fn rename(conn: &mut PgConnection, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()> {
    let sql = format!(
        "UPDATE {table} SET {column} = $1 WHERE {key}::text = $2",
        table = quote_ident(entity.table()),
        column = quote_ident(entity.column_for(name)?),
        key = quote_ident(entity.key()),
    );

    sqlx::query(&sql).bind(value).bind(&record.key).execute(&mut *conn).await?;

    Ok(())
}

#[instrument(skip_all, fields(table = %entity.table(), name = %record.name), err)]
async fn delete(conn: &mut PgConnection, entity: &Entity, record: &Record) -> Result<()> {
    let sql = format!(
        "DELETE FROM {table} WHERE {key}::text = $1",
        table = quote_ident(entity.table()),
        key = quote_ident(entity.key()),
    );

    sqlx::query(&sql).bind(&record.key).execute(&mut *conn).await?;

    Ok(())
}

#[instrument(skip_all, fields(table = %entity.table(), relation = relation, from = %record.name, to = %target_record.name), err)]
async fn link(
    conn: &mut PgConnection,
    entity: &Entity,
    record: &Record,
    relation: &str,
    target: &Entity,
    target_record: &Record,
) -> Result<bool> {
    let source_table = quote_ident(entity.table());
    let source_key = quote_ident(entity.key());
    let target_table = quote_ident(target.table());
    let target_key = quote_ident(target.key());

    let sql = match entity.stored_relation_for(relation)? {
        Attribute::ManyToMany {
            join_table,
            source_column,
            target_column,
        } => {
            // Set semantics even when the join table has no unique constraint
            let join = quote_ident(join_table);
            let source_column = quote_ident(source_column);
            let target_column = quote_ident(target_column);
            format!(
                "INSERT INTO {join} ({source_column}, {target_column}) \
                 SELECT s.{source_key}, t.{target_key} FROM {source_table} s, {target_table} t \
                 WHERE s.{source_key}::text = $1 AND t.{target_key}::text = $2 \
                 AND NOT EXISTS (SELECT 1 FROM {join} x \
                                 WHERE x.{source_column} = s.{source_key} AND x.{target_column} = t.{target_key})"
            )
        }
        Attribute::OneToMany { remote_column, .. } => {
            let remote = quote_ident(remote_column);
            format!(
                "UPDATE {target_table} t SET {remote} = s.{source_key} FROM {source_table} s \
                 WHERE s.{source_key}::text = $1 AND t.{target_key}::text = $2 \
                 AND t.{remote} IS DISTINCT FROM s.{source_key}"
            )
        }
        Attribute::ManyToOne { local_column } => {
            let local = quote_ident(local_column);
            format!(
                "UPDATE {source_table} s SET {local} = t.{target_key} FROM {target_table} t \
                 WHERE s.{source_key}::text = $1 AND t.{target_key}::text = $2 \
                 AND s.{local} IS DISTINCT FROM t.{target_key}"
            )
        }
        Attribute::Column(_) | Attribute::Derived(_) => return Err(entity.kind_error(relation, "stored relation")),
    };

    let result = sqlx::query(&sql)
        .bind(&record.key)
        .bind(&target_record.key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[instrument(skip_all, fields(table = %entity.table(), relation = relation, from = %record.name, to = %target_record.name), err)]
async fn unlink(
    conn: &mut PgConnection,
    entity: &Entity,
    record: &Record,
    relation: &str,
    target: &Entity,
    target_record: &Record,
) -> Result<bool> {
    let sql = match entity.stored_relation_for(relation)? {
        Attribute::ManyToMany {
            join_table,
            source_column,
            target_column,
        } => format!(
            "DELETE FROM {join} WHERE {source_column}::text = $1 AND {target_column}::text = $2",
            join = quote_ident(join_table),
            source_column = quote_ident(source_column),
            target_column = quote_ident(target_column),
        ),
        Attribute::OneToMany { remote_column, .. } => format!(
            "UPDATE {target_table} SET {remote} = NULL WHERE {remote}::text = $1 AND {target_key}::text = $2",
            target_table = quote_ident(target.table()),
            target_key = quote_ident(target.key()),
            remote = quote_ident(remote_column),
        ),
        Attribute::ManyToOne { local_column } => format!(
            "UPDATE {source_table} SET {local} = NULL WHERE {source_key}::text = $1 AND {local}::text = $2",
            source_table = quote_ident(entity.table()),
            source_key = quote_ident(entity.key()),
            local = quote_ident(local_column),
        ),
        Attribute::Column(_) | Attribute::Derived(_) => return Err(entity.kind_error(relation, "stored relation")),
    };

    let result = sqlx::query(&sql)
        .bind(&record.key)
        .bind(&target_record.key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl SourceStore for PgConnection {
    async fn transaction(&mut self) -> Result<Box<dyn SourceTransaction + '_>> {
        // Nests as a savepoint when this connection is already inside a transaction
        let tx = Connection::begin(self).await?;
        Ok(Box::new(tx))
    }

    async fn list_records(&mut self, entity: &Entity, name: &str) -> Result<Vec<Record>> {
        list_records(self, entity, name).await
    }

    async fn find_by_name(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>> {
        find_by_name(self, entity, name, value).await
    }

    async fn related_names(
        &mut self,
        entity: &Entity,
        record: &Record,
        relation: &str,
        target: &Entity,
        target_name: &str,
    ) -> Result<Vec<String>> {
        related_names(self, entity, record, relation, target, target_name).await
    }

    async fn insert(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Record> {
        insert(self, entity, name, value).await
    }

    async fn rename(&mut self, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()> {
        rename(self, entity, record, name, value).await
    }

    async fn delete(&mut self, entity: &Entity, record: &Record) -> Result<()> {
        delete(self, entity, record).await
    }

    async fn link(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        link(self, entity, record, relation, target, target_record).await
    }

    async fn unlink(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        unlink(self, entity, record, relation, target, target_record).await
    }
}

#[async_trait]
impl<'c> SourceStore for Transaction<'c, Postgres> {
    async fn transaction(&mut self) -> Result<Box<dyn SourceTransaction + '_>> {
        let tx = Connection::begin(&mut **self).await?;
        Ok(Box::new(tx))
    }

    async fn list_records(&mut self, entity: &Entity, name: &str) -> Result<Vec<Record>> {
        list_records(self, entity, name).await
    }

    async fn find_by_name(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Option<Record>> {
        find_by_name(self, entity, name, value).await
    }

    async fn related_names(
        &mut self,
        entity: &Entity,
        record: &Record,
        relation: &str,
        target: &Entity,
        target_name: &str,
    ) -> Result<Vec<String>> {
        related_names(self, entity, record, relation, target, target_name).await
    }

    async fn insert(&mut self, entity: &Entity, name: &str, value: &str) -> Result<Record> {
        insert(self, entity, name, value).await
    }

    async fn rename(&mut self, entity: &Entity, record: &Record, name: &str, value: &str) -> Result<()> {
        rename(self, entity, record, name, value).await
    }

    async fn delete(&mut self, entity: &Entity, record: &Record) -> Result<()> {
        delete(self, entity, record).await
    }

    async fn link(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        link(self, entity, record, relation, target, target_record).await
    }

    async fn unlink(&mut self, entity: &Entity, record: &Record, relation: &str, target: &Entity, target_record: &Record) -> Result<bool> {
        unlink(self, entity, record, relation, target, target_record).await
    }
}

#[async_trait]
impl<'c> SourceTransaction for Transaction<'c, Postgres> {
    async fn commit(self: Box<Self>) -> Result<()> {
        Transaction::commit(*self).await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Transaction::rollback(*self).await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests;
