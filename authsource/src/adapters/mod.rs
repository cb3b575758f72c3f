//! Source adapters for groups and permissions.
//!
//! A source adapter exposes a set of named *sections*, each holding a set of named
//! *items*:
//!
//! - In a groups source ([`SqlGroupsAdapter`]) a section is a group and its items are
//!   the users that belong to it.
//! - In a permissions source ([`SqlPermissionsAdapter`]) a section is a permission and
//!   its items are the groups granted that permission.
//!
//! Both are the same generic [`SqlAdapter`], parameterized by an [`AdapterKind`] that
//! fixes the default [`Translations`] and the shape of `find_sections`. Everything else
//! (listing, membership checks, section administration, including and excluding
//! items) is shared and addresses the schema only through the translation table.
//!
//! Adapters hold no connection. Every operation borrows the caller's
//! [`SourceStore`] for its duration, and every mutation runs in a transaction opened
//! on that handle: committed on success, rolled back on any failure.
//!
//! ```ignore
//! use authsource::adapters::configure_sql_adapters;
//!
//! let adapters = configure_sql_adapters(user, Some(group), Some(permission), &Default::default(), &Default::default())?;
//! let groups = adapters.group.expect("group entity configured");
//!
//! let mut tx = pool.begin().await?;
//! groups.include_items(&mut *tx, "developers", ["linus"]).await?;
//! assert!(groups.item_is_included(&mut *tx, "developers", "linus").await?);
//! tx.commit().await?;
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
};
use tracing::{debug, instrument, warn};

use crate::errors::{Result, SourceError};
use crate::schema::Entity;
use crate::store::{Record, SourceStore, SourceTransaction};
use crate::translations::{TranslationOverrides, Translations};

pub mod factory;
pub mod groups;
pub mod permissions;

pub use factory::{SqlAdapters, configure_sql_adapters};
pub use groups::{Credentials, FoundSections, Groups, SqlGroupsAdapter};
pub use permissions::{Permissions, SqlPermissionsAdapter};

/// Fixes what distinguishes one kind of source from another
pub trait AdapterKind: Send + Sync + 'static {
    /// Used in logs and error messages
    const NAME: &'static str;

    fn default_translations() -> Translations;
}

/// Generic section/item adapter over a pair of related entities
#[derive(Debug, Clone)]
pub struct SqlAdapter<K> {
    section_entity: Entity,
    item_entity: Entity,
    translations: Translations,
    writable: bool,
    kind: PhantomData<fn() -> K>,
}

/// Commit on success, roll back on failure; the operation's own error wins
async fn finish<T>(tx: Box<dyn SourceTransaction + '_>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after: {}", err);
            }
            Err(err)
        }
    }
}

fn to_names<I, T>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    names.into_iter().map(|name| name.as_ref().to_string()).collect()
}

impl<K: AdapterKind> SqlAdapter<K> {
    /// Create an adapter with the kind's default translations
    pub fn new(section_entity: Entity, item_entity: Entity) -> Self {
        debug!(
            kind = K::NAME,
            sections = %section_entity.describe(),
            items = %item_entity.describe(),
            "Creating source adapter"
        );
        Self {
            section_entity,
            item_entity,
            translations: K::default_translations(),
            writable: true,
            kind: PhantomData,
        }
    }

    /// Replace the translations named by `overrides`
    pub fn with_translations(mut self, overrides: &TranslationOverrides) -> Self {
        self.translations.apply(overrides);
        self
    }

    /// Reject every mutation with [`SourceError::NotWritable`]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn translations(&self) -> &Translations {
        &self.translations
    }

    pub fn translations_mut(&mut self) -> &mut Translations {
        &mut self.translations
    }

    pub fn section_entity(&self) -> &Entity {
        &self.section_entity
    }

    pub fn item_entity(&self) -> &Entity {
        &self.item_entity
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(SourceError::NotWritable(K::NAME))
        }
    }

    async fn find_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<Option<Record>> {
        db.find_by_name(&self.section_entity, &self.translations.section_name, section)
            .await
    }

    pub(crate) async fn find_item<S: SourceStore + ?Sized>(&self, db: &mut S, item: &str) -> Result<Option<Record>> {
        db.find_by_name(&self.item_entity, &self.translations.item_name, item).await
    }

    async fn section_record<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<Record> {
        self.find_section(db, section)
            .await?
            .ok_or_else(|| SourceError::SectionNotFound {
                attribute: self.translations.section_name.clone(),
                name: section.to_string(),
            })
    }

    async fn item_record<S: SourceStore + ?Sized>(&self, db: &mut S, item: &str) -> Result<Record> {
        self.find_item(db, item).await?.ok_or_else(|| SourceError::ItemNotFound {
            attribute: self.translations.item_name.clone(),
            name: item.to_string(),
        })
    }

    async fn items_of<S: SourceStore + ?Sized>(&self, db: &mut S, section: &Record) -> Result<BTreeSet<String>> {
        let names = db
            .related_names(
                &self.section_entity,
                section,
                &self.translations.items,
                &self.item_entity,
                &self.translations.item_name,
            )
            .await?;
        Ok(names.into_iter().collect())
    }

    /// Names of the sections `item` belongs to, through the `sections` attribute
    pub(crate) async fn sections_of<S: SourceStore + ?Sized>(&self, db: &mut S, item: &Record) -> Result<BTreeSet<String>> {
        let names = db
            .related_names(
                &self.item_entity,
                item,
                &self.translations.sections,
                &self.section_entity,
                &self.translations.section_name,
            )
            .await?;
        Ok(names.into_iter().collect())
    }

    /// Every section with the names of its items
    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn get_all_sections<S: SourceStore + ?Sized>(&self, db: &mut S) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let records = db
            .list_records(&self.section_entity, &self.translations.section_name)
            .await?;

        // Listed rows are read by key, so a concurrent delete cannot fail the lookup
        let mut sections = BTreeMap::new();
        for record in records {
            let items = self.items_of(db, &record).await?;
            sections.insert(record.name, items);
        }

        debug!(count = sections.len(), "Loaded all sections");
        Ok(sections)
    }

    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn get_section_items<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<BTreeSet<String>> {
        let record = self.section_record(db, section).await?;
        self.items_of(db, &record).await
    }

    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn item_is_included<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, item: &str) -> Result<bool> {
        Ok(self.get_section_items(db, section).await?.contains(item))
    }

    /// Existence check: a missing section is `false`, any other failure propagates
    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn section_exists<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<bool> {
        match self.section_record(db, section).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn insert_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<()> {
        if self.find_section(db, section).await?.is_some() {
            return Err(SourceError::SectionExists(section.to_string()));
        }
        db.insert(&self.section_entity, &self.translations.section_name, section)
            .await?;
        Ok(())
    }

    async fn rename_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, new_name: &str) -> Result<()> {
        let record = self.section_record(db, section).await?;
        if new_name != section && self.find_section(db, new_name).await?.is_some() {
            return Err(SourceError::SectionExists(new_name.to_string()));
        }
        db.rename(&self.section_entity, &record, &self.translations.section_name, new_name)
            .await
    }

    async fn remove_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<()> {
        let record = self.section_record(db, section).await?;
        db.delete(&self.section_entity, &record).await
    }

    async fn link_items<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, items: &[String]) -> Result<()> {
        let record = self.section_record(db, section).await?;
        for item in items {
            let item_record = self.item_record(db, item).await?;
            let added = db
                .link(
                    &self.section_entity,
                    &record,
                    &self.translations.items,
                    &self.item_entity,
                    &item_record,
                )
                .await?;
            if !added {
                debug!(item = %item, "Item already included");
            }
        }
        Ok(())
    }

    async fn unlink_items<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, items: &[String]) -> Result<()> {
        let record = self.section_record(db, section).await?;
        for item in items {
            let item_record = self.item_record(db, item).await?;
            let removed = db
                .unlink(
                    &self.section_entity,
                    &record,
                    &self.translations.items,
                    &self.item_entity,
                    &item_record,
                )
                .await?;
            if !removed {
                return Err(SourceError::ItemNotIncluded {
                    section: section.to_string(),
                    item: item.clone(),
                });
            }
        }
        Ok(())
    }

    /// Create a section with no items
    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn create_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<()> {
        self.check_writable()?;

        let mut tx = db.transaction().await?;
        let outcome = self.insert_section(&mut *tx, section).await;
        finish(tx, outcome).await
    }

    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn edit_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, new_name: &str) -> Result<()> {
        self.check_writable()?;

        let mut tx = db.transaction().await?;
        let outcome = self.rename_section(&mut *tx, section, new_name).await;
        finish(tx, outcome).await
    }

    #[instrument(skip(self, db), fields(kind = K::NAME), err)]
    pub async fn delete_section<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str) -> Result<()> {
        self.check_writable()?;

        let mut tx = db.transaction().await?;
        let outcome = self.remove_section(&mut *tx, section).await;
        finish(tx, outcome).await
    }

    /// Add every item to the section, or none of them
    #[instrument(skip(self, db, items), fields(kind = K::NAME), err)]
    pub async fn include_items<S, I, T>(&self, db: &mut S, section: &str, items: I) -> Result<()>
    where
        S: SourceStore + ?Sized,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.check_writable()?;
        let items = to_names(items);

        let mut tx = db.transaction().await?;
        let outcome = self.link_items(&mut *tx, section, &items).await;
        finish(tx, outcome).await
    }

    /// Remove every item from the section, or none of them
    #[instrument(skip(self, db, items), fields(kind = K::NAME), err)]
    pub async fn exclude_items<S, I, T>(&self, db: &mut S, section: &str, items: I) -> Result<()>
    where
        S: SourceStore + ?Sized,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.check_writable()?;
        let items = to_names(items);

        let mut tx = db.transaction().await?;
        let outcome = self.unlink_items(&mut *tx, section, &items).await;
        finish(tx, outcome).await
    }

    pub async fn include_item<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, item: &str) -> Result<()> {
        self.include_items(db, section, [item]).await
    }

    pub async fn exclude_item<S: SourceStore + ?Sized>(&self, db: &mut S, section: &str, item: &str) -> Result<()> {
        self.exclude_items(db, section, [item]).await
    }
}
