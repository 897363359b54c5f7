use std::{fs, path::PathBuf};

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::KeyValueStore;
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<PostgresStore, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;

        let store = PostgresStore { pool };
        store.init_migrations().await?;

        Ok(store)
    }

    async fn init_migrations(&self) -> Result<(), Error> {
        let files = vec!["kv_store.sql"];
        let dir = env!("CARGO_MANIFEST_DIR");

        for file in files {
            let data = fs::read_to_string(get_path(dir, file))?;
            sqlx::query(data.as_str()).execute(&self.pool).await?;
        }

        Ok(())
    }
}

pub fn get_path(dir: &str, file: &str) -> PathBuf {
    let mut buf = PathBuf::new();

    for chunk in [dir, "migrations", file] {
        buf.push(chunk);
    }

    buf
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<String>, Error> {
        let value: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM kv_store WHERE store = $1 AND key = $2
            "#,
        )
        .bind(store)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|(value,)| value))
    }

    async fn set(&self, store: &str, key: &str, value: String) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (store, key, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (store, key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(store)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, store: &str, key: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            DELETE FROM kv_store WHERE store = $1 AND key = $2
            "#,
        )
        .bind(store)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
