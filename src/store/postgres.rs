use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{info, instrument};

use super::RecordStore;
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::models::Record;

const RECORD_COLUMNS: &str = r#"id, time, title, source, content, tags, "type", url"#;

/// PostgreSQL-backed store.
///
/// Every call checks a connection out of the pool and returns it on drop, so
/// concurrent pipelines never share a session or a transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(level = "info", skip_all, fields(storage = %config))]
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        info!("Database connection initialized");
        Ok(store)
    }

    pub async fn setup_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS record (
                id BIGSERIAL PRIMARY KEY,
                time TIMESTAMP NOT NULL,
                title VARCHAR(255) NOT NULL,
                source VARCHAR(100) NOT NULL,
                content TEXT NOT NULL,
                tags VARCHAR(255) NOT NULL DEFAULT '',
                "type" VARCHAR(50) NOT NULL,
                url TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS record_url_key ON record (url)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS record_title_idx ON record (title)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS record_time_idx ON record (time)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<Record, sqlx::Error> {
    Ok(Record {
        id: Some(row.try_get("id")?),
        time: row.try_get("time")?,
        title: row.try_get("title")?,
        source: row.try_get("source")?,
        content: row.try_get("content")?,
        tags: row.try_get("tags")?,
        kind: row.try_get("type")?,
        url: row.try_get("url")?,
    })
}

#[async_trait(?Send)]
impl RecordStore for PgStore {
    async fn exists(&self, url: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM record WHERE url = $1) AS found")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    async fn exists_by_title(&self, title: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM record WHERE title = $1) AS found")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    async fn insert_batch(&self, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO record (time, title, source, content, tags, "type", url) "#,
        );
        qb.push_values(records, |mut b, r| {
            b.push_bind(r.time)
                .push_bind(r.title.clone())
                .push_bind(r.source.clone())
                .push_bind(r.content.clone())
                .push_bind(r.tags.clone())
                .push_bind(r.kind.clone())
                .push_bind(r.url.clone());
        });
        qb.push(" ON CONFLICT (url) DO NOTHING");
        let result = qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM record WHERE time > "));
        qb.push_bind(start);
        qb.push(" AND time <= ");
        qb.push_bind(end);
        if let Some(kinds) = kinds {
            qb.push(r#" AND "type" = ANY("#);
            qb.push_bind(kinds.to_vec());
            qb.push(")");
        }
        qb.push(" ORDER BY time");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
