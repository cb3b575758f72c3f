//! Shared fixtures for unit tests: the user/group/permission model under two
//! different schemas, and an in-memory store seeded with the same data for both.

use std::collections::{BTreeSet, HashMap};

use crate::schema::Entity;
use crate::store::{MemoryStore, Record, SourceStore};
use crate::translations::{ModelTranslations, TranslationOverrides, Translations};

pub const USERS: [&str; 5] = ["rms", "linus", "sballmer", "guido", "rasmus"];
pub const GROUPS: [&str; 5] = ["admins", "developers", "trolls", "php", "python"];
pub const PERMISSIONS: [&str; 3] = ["see-site", "edit-site", "commit"];

pub const MEMBERSHIPS: [(&str, &[&str]); 5] = [
    ("admins", &["rms"]),
    ("developers", &["rms", "linus"]),
    ("trolls", &["sballmer"]),
    ("php", &[]),
    ("python", &[]),
];

pub const GRANTS: [(&str, &[&str]); 3] = [
    ("see-site", &["trolls"]),
    ("edit-site", &["admins", "developers"]),
    ("commit", &["developers"]),
];

pub fn set<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
    names.into_iter().map(str::to_string).collect()
}

/// The three entities of an authorization model and the translations they need
#[derive(Debug, Clone)]
pub struct Model {
    pub user: Entity,
    pub group: Entity,
    pub permission: Entity,
    pub translations: ModelTranslations,
}

impl Model {
    /// Attribute names matching the adapter defaults
    pub fn default_names() -> Self {
        let user = Entity::new("tg_user", "user_id")
            .with_column("user_name", "user_name")
            .with_many_to_many("groups", "tg_user_group", "user_id", "group_id")
            .with_derived("fake_groups", |_| vec!["nogroup".to_string()]);
        let group = Entity::new("tg_group", "group_id")
            .with_column("group_name", "group_name")
            .with_many_to_many("users", "tg_user_group", "group_id", "user_id")
            .with_many_to_many("permissions", "tg_group_permission", "group_id", "permission_id")
            .with_derived("fake_permissions", |_| vec!["nopermission".to_string()]);
        let permission = Entity::new("tg_permission", "permission_id")
            .with_column("permission_name", "permission_name")
            .with_many_to_many("groups", "tg_group_permission", "permission_id", "group_id");

        Self {
            user,
            group,
            permission,
            translations: ModelTranslations::default(),
        }
    }

    /// Members in teams holding rights
    pub fn translated() -> Self {
        let user = Entity::new("members", "id")
            .with_column("member_name", "login")
            .with_many_to_many("teams", "team_members", "member_id", "team_id");
        let group = Entity::new("teams", "id")
            .with_column("team_name", "title")
            .with_many_to_many("members", "team_members", "team_id", "member_id")
            .with_many_to_many("rights", "team_rights", "team_id", "right_id");
        let permission = Entity::new("rights", "id")
            .with_column("right_name", "code")
            .with_many_to_many("teams", "team_rights", "right_id", "team_id");

        let translations = ModelTranslations {
            user_name: Some("member_name".to_string()),
            users: Some("members".to_string()),
            group_name: Some("team_name".to_string()),
            groups: Some("teams".to_string()),
            permission_name: Some("right_name".to_string()),
            permissions: Some("rights".to_string()),
            ..Default::default()
        };

        Self {
            user,
            group,
            permission,
            translations,
        }
    }

    pub fn group_overrides(&self) -> TranslationOverrides {
        self.translations.split().group
    }

    pub fn permission_overrides(&self) -> TranslationOverrides {
        self.translations.split().permission
    }

    pub fn group_translations(&self) -> Translations {
        Translations::groups().with(&self.group_overrides())
    }

    pub fn permission_translations(&self) -> Translations {
        Translations::permissions().with(&self.permission_overrides())
    }
}

async fn insert_all(store: &mut MemoryStore, entity: &Entity, name: &str, values: &[&str]) -> HashMap<String, Record> {
    let mut records = HashMap::new();
    for value in values {
        let record = store.insert(entity, name, value).await.unwrap();
        records.insert(value.to_string(), record);
    }
    records
}

/// A memory store holding the fixture users, groups and permissions
pub async fn seeded_store(model: &Model) -> MemoryStore {
    let groups_t = model.group_translations();
    let permissions_t = model.permission_translations();
    let mut store = MemoryStore::new();

    let users = insert_all(&mut store, &model.user, &groups_t.item_name, &USERS).await;
    let groups = insert_all(&mut store, &model.group, &groups_t.section_name, &GROUPS).await;
    let permissions = insert_all(&mut store, &model.permission, &permissions_t.section_name, &PERMISSIONS).await;

    for (group, members) in MEMBERSHIPS {
        for member in members {
            store
                .link(&model.group, &groups[group], &groups_t.items, &model.user, &users[*member])
                .await
                .unwrap();
        }
    }
    for (permission, grantees) in GRANTS {
        for grantee in grantees {
            store
                .link(
                    &model.permission,
                    &permissions[permission],
                    &permissions_t.items,
                    &model.group,
                    &groups[*grantee],
                )
                .await
                .unwrap();
        }
    }

    store
}
