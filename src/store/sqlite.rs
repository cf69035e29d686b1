//! Durable page backend on SQLite

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::OnceCell;

use super::backend::{PageBackend, StorageResult};
use super::schema::initialize_schema;
use super::types::{CachedPage, IndexQuery, PageKey};
use crate::error::StorageError;

#[derive(Debug, sqlx::FromRow)]
struct PageRow {
    document_id: String,
    page_number: i64,
    image_data: Vec<u8>,
    width: i64,
    height: i64,
    timestamp: i64,
}

impl TryFrom<PageRow> for CachedPage {
    type Error = StorageError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        Ok(CachedPage {
            page_number: to_u32(row.page_number, "page_number")?,
            width: to_u32(row.width, "width")?,
            height: to_u32(row.height, "height")?,
            document_id: row.document_id,
            image_data: row.image_data,
            timestamp: row.timestamp,
        })
    }
}

fn to_u32(value: i64, column: &str) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_key((document_id, page_number): (String, i64)) -> StorageResult<PageKey> {
    Ok(PageKey::new(document_id, to_u32(page_number, "page_number")?))
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// SQLite-backed page store
///
/// The pool is opened lazily by `init()`, so constructing a backend never
/// touches the filesystem.
pub struct SqliteBackend {
    database_url: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteBackend {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: OnceCell::new(),
        }
    }

    /// Wrap an already-open pool (schema is still created by `init()`)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            database_url: String::new(),
            pool: OnceCell::new_with(Some(pool)),
        }
    }

    fn pool(&self) -> StorageResult<&SqlitePool> {
        self.pool
            .get()
            .ok_or_else(|| StorageError::Backend("SQLite pool not initialized".into()))
    }

    async fn connect(database_url: &str) -> StorageResult<SqlitePool> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Each connection to an in-memory URL opens its own database, so
        // those pools hold one connection that is never recycled
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        Ok(pool)
    }
}

#[async_trait]
impl PageBackend for SqliteBackend {
    async fn init(&self) -> StorageResult<()> {
        let pool = self
            .pool
            .get_or_try_init(|| Self::connect(&self.database_url))
            .await?;
        initialize_schema(pool).await
    }

    async fn get(&self, key: &PageKey) -> StorageResult<Option<CachedPage>> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT document_id, page_number, image_data, width, height, timestamp
            FROM cached_pages
            WHERE document_id = ? AND page_number = ?
            "#,
        )
        .bind(&key.document_id)
        .bind(i64::from(key.page_number))
        .fetch_optional(self.pool()?)
        .await?;

        row.map(CachedPage::try_from).transpose()
    }

    async fn put(&self, page: CachedPage) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_pages (document_id, page_number, image_data, width, height, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, page_number) DO UPDATE SET
                image_data = excluded.image_data,
                width = excluded.width,
                height = excluded.height,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&page.document_id)
        .bind(i64::from(page.page_number))
        .bind(&page.image_data)
        .bind(i64::from(page.width))
        .bind(i64::from(page.height))
        .bind(page.timestamp)
        .execute(self.pool()?)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &PageKey) -> StorageResult<()> {
        sqlx::query("DELETE FROM cached_pages WHERE document_id = ? AND page_number = ?")
            .bind(&key.document_id)
            .bind(i64::from(key.page_number))
            .execute(self.pool()?)
            .await?;

        Ok(())
    }

    async fn list_by_index(&self, query: IndexQuery<'_>) -> StorageResult<Vec<PageKey>> {
        let pool = self.pool()?;
        let rows: Vec<(String, i64)> = match query {
            IndexQuery::Document(document_id) => {
                sqlx::query_as(
                    r#"
                    SELECT document_id, page_number
                    FROM cached_pages
                    WHERE document_id = ?
                    ORDER BY page_number ASC
                    "#,
                )
                .bind(document_id)
                .fetch_all(pool)
                .await?
            }
            IndexQuery::OldestFirst { limit } => {
                sqlx::query_as(
                    r#"
                    SELECT document_id, page_number
                    FROM cached_pages
                    ORDER BY timestamp ASC, document_id ASC, page_number ASC
                    LIMIT ?
                    "#,
                )
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(pool)
                .await?
            }
            IndexQuery::StampedBefore { cutoff_ms } => {
                sqlx::query_as(
                    r#"
                    SELECT document_id, page_number
                    FROM cached_pages
                    WHERE timestamp < ?
                    ORDER BY timestamp ASC
                    "#,
                )
                .bind(cutoff_ms)
                .fetch_all(pool)
                .await?
            }
        };

        rows.into_iter().map(to_key).collect()
    }

    async fn count(&self) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_pages")
            .fetch_one(self.pool()?)
            .await?;

        Ok(count.max(0) as usize)
    }

    async fn clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM cached_pages")
            .execute(self.pool()?)
            .await?;

        Ok(())
    }
}
