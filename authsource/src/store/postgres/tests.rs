use sqlx::PgPool;

use crate::adapters::{Credentials, SqlGroupsAdapter, SqlPermissionsAdapter};
use crate::errors::SourceError;
use crate::schema::Entity;
use crate::store::SourceStore;
use crate::test_utils::{Model, set};
use crate::translations::TranslationOverrides;

const GROUP_PERMISSIONS_SQL: &str = "SELECT p.permission_name FROM tg_permission p \
     JOIN tg_group_permission gp ON gp.permission_id = p.permission_id \
     JOIN tg_group g ON g.group_id = gp.group_id \
     WHERE g.group_name = $1";

fn groups(model: &Model) -> SqlGroupsAdapter {
    SqlGroupsAdapter::new(model.group.clone(), model.user.clone())
}

fn permissions(model: &Model) -> SqlPermissionsAdapter {
    SqlPermissionsAdapter::new(model.permission.clone(), model.group.clone())
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_reads(pool: PgPool) {
    let model = Model::default_names();
    let mut conn = pool.acquire().await.unwrap();

    let all = groups(&model).get_all_sections(&mut *conn).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all["developers"], set(["linus", "rms"]));
    assert!(all["python"].is_empty());

    let found = groups(&model)
        .find_sections(&mut *conn, &Credentials::new("rms"))
        .await
        .unwrap();
    assert_eq!(found.sections, set(["admins", "developers"]));
    assert_eq!(found.item.unwrap().name, "rms");

    let found = groups(&model)
        .find_sections(&mut *conn, &Credentials::new("nobody"))
        .await
        .unwrap();
    assert!(found.sections.is_empty());
    assert!(found.item.is_none());

    assert_eq!(
        permissions(&model).find_sections(&mut *conn, "developers").await.unwrap(),
        set(["commit", "edit-site"])
    );
    assert!(permissions(&model).item_is_included(&mut *conn, "see-site", "trolls").await.unwrap());
    assert!(!permissions(&model).section_exists(&mut *conn, "delete-site").await.unwrap());
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_section_lifecycle(pool: PgPool) {
    let model = Model::default_names();
    let groups = groups(&model);
    let mut conn = pool.acquire().await.unwrap();

    groups.create_section(&mut *conn, "rubyists").await.unwrap();
    groups.include_items(&mut *conn, "rubyists", ["guido", "rasmus"]).await.unwrap();
    groups.include_item(&mut *conn, "rubyists", "guido").await.unwrap();
    groups.edit_section(&mut *conn, "rubyists", "pythonistas").await.unwrap();
    assert_eq!(
        groups.get_section_items(&mut *conn, "pythonistas").await.unwrap(),
        set(["guido", "rasmus"])
    );

    groups.exclude_item(&mut *conn, "pythonistas", "rasmus").await.unwrap();
    let err = groups.exclude_item(&mut *conn, "pythonistas", "rasmus").await.unwrap_err();
    assert!(matches!(err, SourceError::ItemNotIncluded { .. }));

    groups.delete_section(&mut *conn, "pythonistas").await.unwrap();
    assert!(!groups.section_exists(&mut *conn, "pythonistas").await.unwrap());

    let memberships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tg_user_group WHERE user_id = (SELECT user_id FROM tg_user WHERE user_name = 'guido')")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(memberships, 0);
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_failed_include_is_rolled_back(pool: PgPool) {
    let model = Model::default_names();
    let groups = groups(&model);
    let mut conn = pool.acquire().await.unwrap();

    let err = groups
        .include_items(&mut *conn, "python", ["guido", "nobody"])
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::ItemNotFound { ref name, .. } if name == "nobody"));
    assert!(groups.get_section_items(&mut *conn, "python").await.unwrap().is_empty());
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_nested_in_callers_transaction(pool: PgPool) {
    let model = Model::default_names();
    let groups = groups(&model);

    let mut tx = pool.begin().await.unwrap();
    groups.create_section(&mut *tx, "rubyists").await.unwrap();
    assert!(groups.include_item(&mut *tx, "rubyists", "nobody").await.is_err());
    // The failed include only rolled back its own savepoint
    groups.include_item(&mut tx, "rubyists", "guido").await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(groups.get_section_items(&mut *conn, "rubyists").await.unwrap(), set(["guido"]));

    let mut tx = pool.begin().await.unwrap();
    groups.delete_section(&mut *tx, "rubyists").await.unwrap();
    tx.rollback().await.unwrap();
    assert!(groups.section_exists(&mut *conn, "rubyists").await.unwrap());
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_duplicate_names(pool: PgPool) {
    let model = Model::default_names();
    let mut conn = pool.acquire().await.unwrap();

    let err = groups(&model).create_section(&mut *conn, "admins").await.unwrap_err();
    assert!(matches!(err, SourceError::SectionExists(_)));

    let err = groups(&model).edit_section(&mut *conn, "php", "python").await.unwrap_err();
    assert!(matches!(err, SourceError::SectionExists(_)));

    // Unique constraints back the pre-checks up
    let err = conn.insert(&model.group, "group_name", "admins").await.unwrap_err();
    assert!(matches!(err, SourceError::UniqueViolation { ref table, .. } if table.as_deref() == Some("tg_group")));
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_derived_relations(pool: PgPool) {
    let model = Model::default_names();
    let group = model.group.clone().with_derived_query("all_permissions", GROUP_PERMISSIONS_SQL);
    let mut conn = pool.acquire().await.unwrap();

    let sql_derived = SqlPermissionsAdapter::new(model.permission.clone(), group).with_translations(&TranslationOverrides {
        sections: Some("all_permissions".to_string()),
        ..Default::default()
    });
    assert_eq!(
        sql_derived.find_sections(&mut *conn, "developers").await.unwrap(),
        set(["commit", "edit-site"])
    );

    let fn_derived = groups(&model).with_translations(&TranslationOverrides {
        sections: Some("fake_groups".to_string()),
        ..Default::default()
    });
    let found = fn_derived.find_sections(&mut *conn, &Credentials::new("rms")).await.unwrap();
    assert_eq!(found.sections, set(["nogroup"]));

    let mut writer = groups(&model);
    writer.translations_mut().items = "fake_permissions".to_string();
    let err = writer.include_item(&mut *conn, "php", "rasmus").await.unwrap_err();
    assert!(matches!(err, SourceError::ReadOnlyAttribute { .. }));
}

#[sqlx::test(migrations = false, fixtures(path = "fixtures", scripts("auth_model")))]
#[test_log::test]
async fn test_one_to_many_sections(pool: PgPool) {
    let department = Entity::new("tg_department", "department_id")
        .with_column("department_name", "department_name")
        .with_one_to_many("members", "tg_user", "department_id");
    let user = Entity::new("tg_user", "user_id")
        .with_column("user_name", "user_name")
        .with_many_to_one("department", "department_id");
    let departments = SqlGroupsAdapter::new(department, user).with_translations(&TranslationOverrides {
        section_name: Some("department_name".to_string()),
        sections: Some("department".to_string()),
        items: Some("members".to_string()),
        ..Default::default()
    });
    let mut conn = pool.acquire().await.unwrap();

    assert_eq!(
        departments.get_section_items(&mut *conn, "research").await.unwrap(),
        set(["linus", "rms"])
    );

    departments.include_item(&mut *conn, "sales", "linus").await.unwrap();
    let found = departments
        .find_sections(&mut *conn, &Credentials::new("linus"))
        .await
        .unwrap();
    assert_eq!(found.sections, set(["sales"]));

    let err = departments.exclude_item(&mut *conn, "research", "linus").await.unwrap_err();
    assert!(matches!(err, SourceError::ItemNotIncluded { .. }));

    departments.delete_section(&mut *conn, "research").await.unwrap();
    let found = departments
        .find_sections(&mut *conn, &Credentials::new("rms"))
        .await
        .unwrap();
    assert!(found.sections.is_empty());
}
