//! SQLite schema for the page cache

use sqlx::SqlitePool;

use super::backend::StorageResult;

/// Bumped whenever `SCHEMA_SQL` changes shape
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize or migrate the page cache schema
pub async fn initialize_schema(pool: &SqlitePool) -> StorageResult<()> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if version > SCHEMA_VERSION {
        tracing::warn!(
            found = version,
            expected = SCHEMA_VERSION,
            "Page cache schema is newer than this build"
        );
    }

    if version < SCHEMA_VERSION {
        // v0 -> v1: the only migration is the initial create
        sqlx::query(SCHEMA_SQL).execute(pool).await?;
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(pool)
            .await?;
        tracing::info!(version = SCHEMA_VERSION, "Page cache schema initialized");
    }

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Rendered pages, one row per (document, page)
CREATE TABLE IF NOT EXISTS cached_pages (
    document_id TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    image_data BLOB NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    -- Epoch milliseconds
    timestamp INTEGER NOT NULL,

    PRIMARY KEY (document_id, page_number)
);

CREATE INDEX IF NOT EXISTS idx_cached_pages_document_id ON cached_pages(document_id);
CREATE INDEX IF NOT EXISTS idx_cached_pages_timestamp ON cached_pages(timestamp);
"#;
