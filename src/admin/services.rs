use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::dto::DeleteOutcome;
use crate::{
    auth::{
        extractors::AdminUser,
        password::hash_password,
        services::{create_account, validate_password, validate_username},
    },
    config::BootstrapAdmin,
    error::AppError,
    users::{Role, UserRecord, UserStore},
};

// Every operation takes the `AdminUser` that passed the access gate, so none
// of them can be reached without an authorized caller.

pub async fn list_users(store: &UserStore, _admin: &AdminUser) -> Result<Vec<UserRecord>, AppError> {
    store.list_all().await
}

pub async fn get_user(store: &UserStore, _admin: &AdminUser, id: i64) -> Result<UserRecord, AppError> {
    store.find(id).await
}

pub async fn create_user(
    store: &UserStore,
    admin: &AdminUser,
    username: &str,
    password: &str,
    role: Option<&str>,
) -> Result<i64, AppError> {
    let role: Role = role
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Username, password and role are required".into()))?
        .parse()?;

    let id = create_account(store, username, password, role).await?;
    info!(admin = %admin.0.username, user_id = id, %username, %role, "user created");
    Ok(id)
}

pub async fn update_user(
    store: &UserStore,
    admin: &AdminUser,
    id: i64,
    payload: Map<String, Value>,
) -> Result<(), AppError> {
    let attributes = prepare_update(payload)?;
    store.update(id, &attributes).await?;
    info!(admin = %admin.0.username, user_id = id, fields = ?attributes.keys().collect::<Vec<_>>(), "user updated");
    Ok(())
}

pub async fn delete_user(store: &UserStore, admin: &AdminUser, id: i64) -> Result<(), AppError> {
    store.delete(id).await?;
    info!(admin = %admin.0.username, user_id = id, "user deleted");
    Ok(())
}

/// Deletes each identity independently. Failures are reported per id and
/// never undo the deletions that succeeded.
pub async fn delete_users(store: &UserStore, admin: &AdminUser, ids: &[i64]) -> Vec<DeleteOutcome> {
    join_all(ids.iter().map(|&id| async move {
        match delete_user(store, admin, id).await {
            Ok(()) => DeleteOutcome {
                id,
                deleted: true,
                error: None,
            },
            Err(e) => {
                warn!(user_id = id, error = %e, "bulk delete item failed");
                DeleteOutcome {
                    id,
                    deleted: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }))
    .await
}

pub async fn list_columns(store: &UserStore, _admin: &AdminUser) -> Result<Vec<String>, AppError> {
    store.list_columns().await
}

pub async fn add_column(store: &UserStore, admin: &AdminUser, name: &str) -> Result<(), AppError> {
    require_column_name(name)?;
    store.add_column(name).await?;
    info!(admin = %admin.0.username, column = %name, "schema extended");
    Ok(())
}

pub async fn drop_column(store: &UserStore, admin: &AdminUser, name: &str) -> Result<(), AppError> {
    require_column_name(name)?;
    store.drop_column(name).await?;
    info!(admin = %admin.0.username, column = %name, "schema reduced");
    Ok(())
}

/// Creates the configured admin unless that username already exists.
pub async fn ensure_bootstrap_admin(store: &UserStore, seed: &BootstrapAdmin) -> Result<(), AppError> {
    match store.find_by_username(&seed.username).await {
        Ok(_) => Ok(()),
        Err(AppError::NotFound(_)) => {
            let id = create_account(store, &seed.username, &seed.password, Role::Admin).await?;
            info!(user_id = id, username = %seed.username, "bootstrap admin created");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn require_column_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(AppError::InvalidInput("Column name is required".into()));
    }
    Ok(())
}

/// Turns a JSON update body into column assignments: drops `id`, checks
/// the fixed columns and hashes a new password.
pub(crate) fn prepare_update(
    mut payload: Map<String, Value>,
) -> Result<IndexMap<String, Option<String>>, AppError> {
    payload.retain(|key, _| !key.eq_ignore_ascii_case("id"));
    if payload.is_empty() {
        return Err(AppError::InvalidInput("No data to update".into()));
    }

    let mut attributes = IndexMap::with_capacity(payload.len());
    for (key, value) in payload {
        let text = match value {
            Value::String(s) => Some(s),
            Value::Null => None,
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(AppError::InvalidInput(format!(
                    "Value of \"{key}\" must be text"
                )))
            }
        };

        let text = match key.to_ascii_lowercase().as_str() {
            "username" => {
                let username = required(&key, text)?;
                validate_username(&username)?;
                Some(username)
            }
            "role" => {
                let role: Role = required(&key, text)?.parse()?;
                Some(role.as_str().to_string())
            }
            "password" => {
                let password = required(&key, text)?;
                validate_password(&password)?;
                Some(hash_password(&password)?)
            }
            _ => text,
        };
        attributes.insert(key, text);
    }
    Ok(attributes)
}

fn required(key: &str, value: Option<String>) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::InvalidInput(format!("\"{key}\" cannot be empty")))
}
