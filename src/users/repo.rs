use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use sqlx::{sqlite::SqliteRow, Column, Row, Sqlite, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    repo_types::{PublicUser, Role, UserRecord},
    schema::{is_fixed_column, is_valid_identifier, resolve_column},
};
use crate::error::AppError;

const USERNAME_TAKEN: &str = "A user with this username already exists";
const USER_NOT_FOUND: &str = "User not found";

/// The users table and its runtime-mutable schema.
///
/// Every operation goes through `gate`: reads share it, row writes and
/// schema changes hold it exclusively. Schema changes also run in a
/// transaction, so a reader sees either the old schema or the new one.
#[derive(Clone)]
pub struct UserStore {
    db: SqlitePool,
    gate: Arc<RwLock<()>>,
}

impl UserStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Creates the base table. Dynamic columns are not migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        // One connection that never recycles, otherwise the in-memory database vanishes.
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = Self::new(db);
        store.migrate().await.expect("migrations");
        store
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<i64, AppError> {
        let _guard = self.gate.write().await;
        let res = sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(role.as_str())
            .execute(&self.db)
            .await
            .map_err(|e| unique_as_conflict(e, USERNAME_TAKEN))?;
        let id = res.last_insert_rowid();
        debug!(user_id = id, %username, %role, "user row inserted");
        Ok(id)
    }

    pub async fn find(&self, id: i64) -> Result<UserRecord, AppError> {
        let _guard = self.gate.read().await;
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .persistent(false)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(AppError::NotFound(USER_NOT_FOUND.into())),
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<UserRecord, AppError> {
        let _guard = self.gate.read().await;
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .persistent(false)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(AppError::NotFound(USER_NOT_FOUND.into())),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<UserRecord>, AppError> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query("SELECT * FROM users ORDER BY id")
            .persistent(false)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn list_public(&self) -> Result<Vec<PublicUser>, AppError> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            r#"
            SELECT id, username, role
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|(id, username, role)| {
                Ok(PublicUser {
                    id,
                    username,
                    role: parse_stored_role(id, &role)?,
                })
            })
            .collect()
    }

    /// Assigns each `attributes` entry to the column of the same name.
    /// Keys must name existing columns; `id` is never assignable.
    pub async fn update(
        &self,
        id: i64,
        attributes: &IndexMap<String, Option<String>>,
    ) -> Result<(), AppError> {
        if attributes.is_empty() {
            return Err(AppError::InvalidInput("No data to update".into()));
        }

        let _guard = self.gate.write().await;
        let columns = fetch_columns(&self.db).await?;

        let mut assignments = Vec::with_capacity(attributes.len());
        for key in attributes.keys() {
            if key.eq_ignore_ascii_case("id") {
                return Err(AppError::InvalidInput("The id column cannot be modified".into()));
            }
            let column = resolve_column(&columns, key)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown column \"{key}\"")))?;
            assignments.push(format!("\"{column}\" = ?"));
        }

        let sql = format!("UPDATE users SET {} WHERE id = ?", assignments.join(", "));
        let mut query = sqlx::query(&sql).persistent(false);
        for value in attributes.values() {
            query = query.bind(value.as_deref());
        }
        let res = query
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| unique_as_conflict(e, USERNAME_TAKEN))?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(USER_NOT_FOUND.into()));
        }
        debug!(user_id = id, fields = attributes.len(), "user row updated");
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let _guard = self.gate.write().await;
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(USER_NOT_FOUND.into()));
        }
        debug!(user_id = id, "user row deleted");
        Ok(())
    }

    pub async fn list_columns(&self) -> Result<Vec<String>, AppError> {
        let _guard = self.gate.read().await;
        Ok(fetch_columns(&self.db).await?)
    }

    pub async fn add_column(&self, name: &str) -> Result<(), AppError> {
        if !is_valid_identifier(name) {
            return Err(AppError::InvalidInput(
                "Invalid column name. Only letters, digits and underscores are allowed, \
                 and the name must start with a letter or underscore"
                    .into(),
            ));
        }

        let _guard = self.gate.write().await;
        let mut tx = self.db.begin().await?;
        let columns = fetch_columns(&mut *tx).await?;
        if resolve_column(&columns, name).is_some() {
            return Err(AppError::Conflict(format!("Column \"{name}\" already exists")));
        }
        sqlx::query(&format!("ALTER TABLE users ADD COLUMN \"{name}\" TEXT"))
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(column = %name, "column added");
        Ok(())
    }

    pub async fn drop_column(&self, name: &str) -> Result<(), AppError> {
        if !is_valid_identifier(name) {
            return Err(AppError::InvalidInput("Invalid column name".into()));
        }
        if is_fixed_column(name) {
            return Err(AppError::InvalidInput(format!(
                "Column \"{name}\" is required and cannot be removed"
            )));
        }

        let _guard = self.gate.write().await;
        let mut tx = self.db.begin().await?;
        let columns = fetch_columns(&mut *tx).await?;
        let column = resolve_column(&columns, name)
            .ok_or_else(|| AppError::NotFound(format!("Column \"{name}\" does not exist")))?
            .to_string();
        sqlx::query(&format!("ALTER TABLE users DROP COLUMN \"{column}\""))
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(%column, "column dropped");
        Ok(())
    }
}

async fn fetch_columns<'e, E>(executor: E) -> Result<Vec<String>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM pragma_table_info('users') ORDER BY cid",
    )
    .persistent(false)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

fn record_from_row(row: &SqliteRow) -> Result<UserRecord, AppError> {
    let id: i64 = row.try_get("id")?;
    let role: String = row.try_get("role")?;

    let mut attributes = IndexMap::new();
    for column in row.columns() {
        if is_fixed_column(column.name()) {
            continue;
        }
        let value: Option<String> = row.try_get(column.ordinal())?;
        attributes.insert(column.name().to_string(), value);
    }

    Ok(UserRecord {
        id,
        username: row.try_get("username")?,
        password_hash: row.try_get("password")?,
        role: parse_stored_role(id, &role)?,
        attributes,
    })
}

fn parse_stored_role(id: i64, role: &str) -> Result<Role, AppError> {
    role.parse()
        .map_err(|_| AppError::Internal(anyhow::anyhow!("user {id} has unknown role {role:?}")))
}

fn unique_as_conflict(e: sqlx::Error, msg: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.message().contains("UNIQUE constraint failed") =>
        {
            AppError::Conflict(msg.into())
        }
        _ => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Option<&str>)]) -> IndexMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = UserStore::in_memory().await;
        let id = store.create("alice", "hash", Role::User).await.unwrap();

        let by_id = store.find(id).await.unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(by_id.role, Role::User);
        assert_eq!(by_id.password_hash, "hash");
        assert!(by_id.attributes.is_empty());

        let by_name = store.find_by_username("alice").await.unwrap();
        assert_eq!(by_name.id, id);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username() {
        let store = UserStore::in_memory().await;
        store.create("alice", "hash", Role::User).await.unwrap();
        let err = store.create("alice", "other", Role::Admin).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_unknown_is_not_found() {
        let store = UserStore::in_memory().await;
        assert!(matches!(store.find(42).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            store.find_by_username("ghost").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn identities_are_not_reused_after_delete() {
        let store = UserStore::in_memory().await;
        let first = store.create("alice", "h", Role::User).await.unwrap();
        store.delete(first).await.unwrap();
        let second = store.create("bob", "h", Role::User).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let store = UserStore::in_memory().await;
        assert!(matches!(store.delete(1).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_all_and_public_are_ordered_by_id() {
        let store = UserStore::in_memory().await;
        store.create("carol", "h", Role::User).await.unwrap();
        store.create("dave", "h", Role::Admin).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].username, "carol");
        assert_eq!(all[1].username, "dave");

        let public = store.list_public().await.unwrap();
        assert_eq!(public[1].role, Role::Admin);
        assert_eq!(public[0].id, all[0].id);
    }

    #[tokio::test]
    async fn fresh_schema_has_fixed_columns() {
        let store = UserStore::in_memory().await;
        assert_eq!(
            store.list_columns().await.unwrap(),
            vec!["id", "username", "password", "role"]
        );
    }

    #[tokio::test]
    async fn add_column_extends_existing_rows() {
        let store = UserStore::in_memory().await;
        let id = store.create("alice", "h", Role::User).await.unwrap();

        store.add_column("foo").await.unwrap();
        assert!(store.list_columns().await.unwrap().contains(&"foo".to_string()));

        let record = store.find(id).await.unwrap();
        assert_eq!(record.attributes.get("foo"), Some(&None));
    }

    #[tokio::test]
    async fn add_column_conflicts_ignore_case() {
        let store = UserStore::in_memory().await;
        store.add_column("foo").await.unwrap();
        assert!(matches!(store.add_column("foo").await, Err(AppError::Conflict(_))));
        assert!(matches!(store.add_column("Foo").await, Err(AppError::Conflict(_))));
        assert!(matches!(store.add_column("USERNAME").await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn add_column_rejects_bad_name_without_schema_change() {
        let store = UserStore::in_memory().await;
        let before = store.list_columns().await.unwrap();
        assert!(matches!(
            store.add_column("1bad").await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(store.list_columns().await.unwrap(), before);
    }

    #[tokio::test]
    async fn drop_column_removes_it_from_every_row() {
        let store = UserStore::in_memory().await;
        let a = store.create("alice", "h", Role::User).await.unwrap();
        let b = store.create("bob", "h", Role::User).await.unwrap();
        store.add_column("foo").await.unwrap();
        store.update(a, &attrs(&[("foo", Some("x"))])).await.unwrap();

        store.drop_column("FOO").await.unwrap();

        assert!(!store.list_columns().await.unwrap().contains(&"foo".to_string()));
        for id in [a, b] {
            assert!(store.find(id).await.unwrap().attributes.is_empty());
        }
    }

    #[tokio::test]
    async fn drop_column_guards() {
        let store = UserStore::in_memory().await;
        assert!(matches!(store.drop_column("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            store.drop_column("password").await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            store.drop_column("bad-name").await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(store.list_columns().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn update_assigns_columns() {
        let store = UserStore::in_memory().await;
        let id = store.create("alice", "h", Role::User).await.unwrap();
        store.add_column("department").await.unwrap();

        store
            .update(id, &attrs(&[("Department", Some("eng")), ("role", Some("admin"))]))
            .await
            .unwrap();

        let record = store.find(id).await.unwrap();
        assert_eq!(record.attributes["department"].as_deref(), Some("eng"));
        assert_eq!(record.role, Role::Admin);
    }

    #[tokio::test]
    async fn update_rejects_identity_and_unknown_columns() {
        let store = UserStore::in_memory().await;
        let id = store.create("alice", "h", Role::User).await.unwrap();

        let err = store.update(id, &attrs(&[("id", Some("999"))])).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let err = store
            .update(id, &attrs(&[("nickname", Some("al"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(matches!(
            store.update(id, &IndexMap::new()).await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(store.find(id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn update_reports_missing_row_and_username_conflict() {
        let store = UserStore::in_memory().await;
        store.create("alice", "h", Role::User).await.unwrap();
        let bob = store.create("bob", "h", Role::User).await.unwrap();

        let err = store
            .update(bob, &attrs(&[("username", Some("alice"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = store
            .update(999, &attrs(&[("role", Some("user"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_schema_change_and_reads_stay_consistent() {
        let store = UserStore::in_memory().await;
        for name in ["u1", "u2", "u3"] {
            store.create(name, "h", Role::User).await.unwrap();
        }

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    store.add_column(&format!("col_{i}")).await.unwrap();
                }
            })
        };
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let before = store.list_columns().await.unwrap();
                    let records = store.list_all().await.unwrap();
                    let after = store.list_columns().await.unwrap();
                    assert_eq!(records.len(), 3);
                    for record in &records {
                        // Columns only grow here, so a row is as wide as some snapshot in between.
                        let width = record.attributes.len() + 4;
                        assert!(
                            (before.len()..=after.len()).contains(&width),
                            "row width {width} outside {}..={}",
                            before.len(),
                            after.len()
                        );
                        assert!(record.attributes.keys().all(|k| after.contains(k)));
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        writer.await.unwrap();
        reader.await.unwrap();

        let columns = store.list_columns().await.unwrap();
        assert_eq!(columns.len(), 9);
        assert!((0..5).all(|i| columns.contains(&format!("col_{i}"))));
        let records = store.list_all().await.unwrap();
        for record in records {
            assert_eq!(record.attributes.len() + 4, columns.len());
            assert!(record.attributes.values().all(Option::is_none));
        }
    }
}
