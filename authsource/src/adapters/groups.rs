//! Groups source: groups are sections, users are items.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use super::{AdapterKind, SqlAdapter};
use crate::errors::Result;
use crate::store::{Record, SourceStore};
use crate::translations::Translations;

/// Identity key holding the user's login name
pub const USERID_KEY: &str = "authsource.userid";
/// Identity key holding the resolved user record
pub const USEROBJ_KEY: &str = "authsource.userobj";

#[derive(Debug, Clone, Copy, Default)]
pub struct Groups;

impl AdapterKind for Groups {
    const NAME: &'static str = "groups";

    fn default_translations() -> Translations {
        Translations::groups()
    }
}

pub type SqlGroupsAdapter = SqlAdapter<Groups>;

/// Who is asking: the login name, plus the user record when already resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Record>,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: Record) -> Self {
        self.user = Some(user);
        self
    }

    /// Read credentials from an identity object.
    ///
    /// Returns `None` without a string user id. A cached user record that does not
    /// deserialize is ignored and the user is looked up again.
    pub fn from_identity(identity: &Map<String, Value>) -> Option<Self> {
        let user_id = identity.get(USERID_KEY)?.as_str()?;
        let user = identity
            .get(USEROBJ_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        Some(Self {
            user_id: user_id.to_string(),
            user,
        })
    }
}

/// Result of a group lookup: the groups, and the user record they were read from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FoundSections {
    pub sections: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Record>,
}

impl FoundSections {
    /// Cache the resolved user record in `identity` for later lookups
    pub fn enrich(&self, identity: &mut Map<String, Value>) {
        if let Some(item) = &self.item {
            if let Ok(value) = serde_json::to_value(item) {
                identity.insert(USEROBJ_KEY.to_string(), value);
            }
        }
    }
}

impl SqlAdapter<Groups> {
    /// The groups the user belongs to; an unknown user belongs to none
    #[instrument(skip(self, db, credentials), fields(user_id = %credentials.user_id), err)]
    pub async fn find_sections<S: SourceStore + ?Sized>(&self, db: &mut S, credentials: &Credentials) -> Result<FoundSections> {
        let user = match &credentials.user {
            Some(user) => Some(user.clone()),
            None => self.find_item(db, &credentials.user_id).await?,
        };

        let Some(user) = user else {
            debug!("Unknown user");
            return Ok(FoundSections::default());
        };

        let sections = self.sections_of(db, &user).await?;
        Ok(FoundSections {
            sections,
            item: Some(user),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use crate::store::MemoryStore;
    use crate::test_utils::{Model, seeded_store, set};
    use crate::translations::TranslationOverrides;
    use serde_json::json;

    fn adapter(model: &Model) -> SqlGroupsAdapter {
        SqlGroupsAdapter::new(model.group.clone(), model.user.clone()).with_translations(&model.group_overrides())
    }

    async fn check_find_sections(model: Model) {
        let mut store = seeded_store(&model).await;
        let groups = adapter(&model);

        let found = groups.find_sections(&mut store, &Credentials::new("rms")).await.unwrap();
        assert_eq!(found.sections, set(["admins", "developers"]));
        assert_eq!(found.item.as_ref().map(|user| user.name.as_str()), Some("rms"));

        let found = groups.find_sections(&mut store, &Credentials::new("guido")).await.unwrap();
        assert!(found.sections.is_empty());
        assert!(found.item.is_some());

        let found = groups.find_sections(&mut store, &Credentials::new("nobody")).await.unwrap();
        assert_eq!(found, FoundSections::default());
    }

    #[test_log::test(tokio::test)]
    async fn test_find_sections() {
        check_find_sections(Model::default_names()).await;
    }

    #[test_log::test(tokio::test)]
    async fn test_find_sections_with_translated_schema() {
        check_find_sections(Model::translated()).await;
    }

    #[test_log::test(tokio::test)]
    async fn test_cached_user_is_used_as_is() {
        let model = Model::default_names();
        let mut store = seeded_store(&model).await;
        let groups = adapter(&model);

        let rms = groups.find_sections(&mut store, &Credentials::new("rms")).await.unwrap().item.unwrap();
        // The login name no longer matters once the record is known
        let credentials = Credentials::new("someone-else").with_user(rms.clone());
        let found = groups.find_sections(&mut store, &credentials).await.unwrap();
        assert_eq!(found.sections, set(["admins", "developers"]));
        assert_eq!(found.item, Some(rms));
    }

    #[test_log::test(tokio::test)]
    async fn test_derived_sections_attribute() {
        let model = Model::default_names();
        let mut store = seeded_store(&model).await;
        let groups = adapter(&model).with_translations(&TranslationOverrides {
            sections: Some("fake_groups".to_string()),
            ..Default::default()
        });

        let found = groups.find_sections(&mut store, &Credentials::new("rms")).await.unwrap();
        assert_eq!(found.sections, set(["nogroup"]));
    }

    #[test_log::test(tokio::test)]
    async fn test_find_sections_with_unknown_attribute_fails() {
        let model = Model::default_names();
        let mut store = seeded_store(&model).await;
        let groups = adapter(&model).with_translations(&TranslationOverrides {
            sections: Some("clubs".to_string()),
            ..Default::default()
        });

        let err = groups.find_sections(&mut store, &Credentials::new("rms")).await.unwrap_err();
        assert!(matches!(err, SourceError::UnknownAttribute { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_identity_round_trip() {
        let model = Model::default_names();
        let mut store = seeded_store(&model).await;
        let groups = adapter(&model);

        let mut identity = json!({ USERID_KEY: "linus" }).as_object().cloned().unwrap();
        let credentials = Credentials::from_identity(&identity).unwrap();
        assert!(credentials.user.is_none());

        let found = groups.find_sections(&mut store, &credentials).await.unwrap();
        found.enrich(&mut identity);
        assert_eq!(identity[USEROBJ_KEY]["name"], "linus");

        let cached = Credentials::from_identity(&identity).unwrap();
        assert_eq!(cached.user, found.item);
    }

    #[test]
    fn test_identity_without_user_id() {
        let identity = json!({ USEROBJ_KEY: { "key": "1", "name": "rms" } });
        assert!(Credentials::from_identity(identity.as_object().unwrap()).is_none());

        let identity = json!({ USERID_KEY: "rms", USEROBJ_KEY: "not a record" });
        let credentials = Credentials::from_identity(identity.as_object().unwrap()).unwrap();
        assert!(credentials.user.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_store_has_no_groups() {
        let model = Model::default_names();
        let mut store = MemoryStore::new();
        let groups = adapter(&model);

        assert!(groups.get_all_sections(&mut store).await.unwrap().is_empty());
        let found = groups.find_sections(&mut store, &Credentials::new("rms")).await.unwrap();
        assert!(found.sections.is_empty());
    }
}
