//! Permissions source: permissions are sections, groups are items.

use std::collections::BTreeSet;
use tracing::{debug, instrument};

use super::{AdapterKind, SqlAdapter};
use crate::errors::Result;
use crate::store::SourceStore;
use crate::translations::Translations;

#[derive(Debug, Clone, Copy, Default)]
pub struct Permissions;

impl AdapterKind for Permissions {
    const NAME: &'static str = "permissions";

    fn default_translations() -> Translations {
        Translations::permissions()
    }
}

pub type SqlPermissionsAdapter = SqlAdapter<Permissions>;

impl SqlAdapter<Permissions> {
    /// The permissions granted to a group; an unknown group has none
    #[instrument(skip(self, db), err)]
    pub async fn find_sections<S: SourceStore + ?Sized>(&self, db: &mut S, group_name: &str) -> Result<BTreeSet<String>> {
        match self.find_item(db, group_name).await? {
            Some(group) => self.sections_of(db, &group).await,
            None => {
                debug!("Unknown group");
                Ok(BTreeSet::new())
            }
        }
    }
}
