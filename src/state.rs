use std::sync::Arc;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;

use crate::{auth::jwt::JwtKeys, config::AppConfig, users::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: UserStore,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let store = UserStore::new(db);
        store.migrate().await?;

        Ok(Self::from_parts(store, config))
    }

    pub fn from_parts(store: UserStore, config: Arc<AppConfig>) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        Self {
            store,
            config,
            keys,
        }
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::from_parts(UserStore::in_memory().await, Arc::new(AppConfig::for_tests()))
    }
}
