//! Command-line operations over the configured adapters.
//!
//! Every command maps onto one adapter operation and produces a JSON value for
//! printing. Running the commands against a store is separate from argument parsing
//! so the whole surface can be exercised without a database.

use clap::Subcommand;
use serde_json::{Value, json};
use tracing::info;

use crate::adapters::{AdapterKind, Credentials, SqlAdapter, SqlAdapters};
use crate::errors::{Result, SourceError};
use crate::store::SourceStore;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Operate on the groups source (groups of users)
    #[command(subcommand)]
    Groups(Action),
    /// Operate on the permissions source (permissions granted to groups)
    #[command(subcommand)]
    Permissions(Action),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// List every section with its items
    List,
    /// List the items of a section
    Items { section: String },
    /// Find the sections of a user (groups) or of a group (permissions)
    Find { hint: String },
    /// Check whether an item belongs to a section
    Check { section: String, item: String },
    /// Create an empty section
    Create { section: String },
    /// Rename a section, keeping its items
    Rename { section: String, new_name: String },
    /// Delete a section
    Delete { section: String },
    /// Add items to a section
    Include {
        section: String,
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Remove items from a section
    Exclude {
        section: String,
        #[arg(required = true)]
        items: Vec<String>,
    },
}

impl Action {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Action::Create { .. }
                | Action::Rename { .. }
                | Action::Delete { .. }
                | Action::Include { .. }
                | Action::Exclude { .. }
        )
    }
}

/// Run `command` against `db`
pub async fn run<S: SourceStore + ?Sized>(adapters: &SqlAdapters, db: &mut S, command: &Command) -> Result<Value> {
    match command {
        Command::Groups(action) => {
            let adapter = adapters.group.as_ref().ok_or(SourceError::MissingEntity {
                adapter: "groups",
                entity: "group",
            })?;
            if let Action::Find { hint } = action {
                let found = adapter.find_sections(db, &Credentials::new(hint.as_str())).await?;
                return Ok(json!({ "sections": found.sections, "user": found.item }));
            }
            run_action(adapter, db, action).await
        }
        Command::Permissions(action) => {
            let adapter = adapters.permission.as_ref().ok_or(SourceError::MissingEntity {
                adapter: "permissions",
                entity: "permission",
            })?;
            if let Action::Find { hint } = action {
                return Ok(json!(adapter.find_sections(db, hint).await?));
            }
            run_action(adapter, db, action).await
        }
    }
}

async fn run_action<K, S>(adapter: &SqlAdapter<K>, db: &mut S, action: &Action) -> Result<Value>
where
    K: AdapterKind,
    S: SourceStore + ?Sized,
{
    let output = match action {
        Action::List => json!(adapter.get_all_sections(db).await?),
        Action::Items { section } => json!(adapter.get_section_items(db, section).await?),
        Action::Check { section, item } => json!(adapter.item_is_included(db, section, item).await?),
        Action::Create { section } => {
            adapter.create_section(db, section).await?;
            json!({ "created": section })
        }
        Action::Rename { section, new_name } => {
            adapter.edit_section(db, section, new_name).await?;
            json!({ "renamed": section, "to": new_name })
        }
        Action::Delete { section } => {
            adapter.delete_section(db, section).await?;
            json!({ "deleted": section })
        }
        Action::Include { section, items } => {
            adapter.include_items(db, section, items).await?;
            json!({ "section": section, "included": items })
        }
        Action::Exclude { section, items } => {
            adapter.exclude_items(db, section, items).await?;
            json!({ "section": section, "excluded": items })
        }
        Action::Find { .. } => {
            return Err(SourceError::Unsupported(format!("find on the {} source", K::NAME)));
        }
    };

    if action.is_mutation() {
        info!(kind = K::NAME, ?action, "Applied change");
    }
    Ok(output)
}
