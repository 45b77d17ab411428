//! Log-source registry CRUD.
//!
//! A source's position fields (`last_position`, `last_inode`,
//! `last_line_content`) are owned exclusively by the reader/processor for
//! that source; nothing else writes them. Sources are created by discovery
//! or an administrator and are never deleted implicitly.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::model::LogSource;

/// All registered sources, in no particular order.
pub async fn list(pool: &SqlitePool) -> Result<Vec<LogSource>, sqlx::Error> {
    sqlx::query_as::<_, LogSource>("SELECT * FROM log_sources")
        .fetch_all(pool)
        .await
}

pub async fn find(pool: &SqlitePool, name: &str) -> Result<Option<LogSource>, sqlx::Error> {
    sqlx::query_as::<_, LogSource>("SELECT * FROM log_sources WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Register a new source. No-op (returns the existing row unmodified) if
/// `name` is already registered — discovery and the coordinator's periodic
/// sync both call this unconditionally.
pub async fn register(pool: &SqlitePool, source: &LogSource) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO log_sources (name, path, parser_type, last_position, last_inode, \
         last_line_content, last_read_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(&source.name)
    .bind(&source.path)
    .bind(&source.parser_type)
    .bind(source.last_position)
    .bind(source.last_inode)
    .bind(&source.last_line_content)
    .bind(source.last_read_at)
    .bind(source.created_at)
    .bind(source.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist the reader's advanced position after a successful batch commit.
pub async fn update_position(
    pool: &SqlitePool,
    name: &str,
    position: i64,
    inode: i64,
    last_line_content: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE log_sources SET last_position = ?, last_inode = ?, last_line_content = ?, \
         last_read_at = ?, updated_at = ? WHERE name = ?",
    )
    .bind(position)
    .bind(inode)
    .bind(last_line_content)
    .bind(now)
    .bind(now)
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Names of sources currently registered, used by the coordinator's
/// periodic `sync_with_database` to diff against its running processors.
pub async fn names(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM log_sources")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(n,)| n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn register_then_find() {
        let pool = test_pool().await;
        let source = LogSource::new("traefik-main", "/var/log/traefik/access.log", "traefik");
        register(&pool, &source).await.unwrap();

        let found = find(&pool, "traefik-main").await.unwrap().unwrap();
        assert_eq!(found.path, "/var/log/traefik/access.log");
        assert_eq!(found.last_position, 0);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let pool = test_pool().await;
        let source = LogSource::new("a", "/a.log", "traefik");
        register(&pool, &source).await.unwrap();
        register(&pool, &source).await.unwrap();
        assert_eq!(list(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_position_persists() {
        let pool = test_pool().await;
        let source = LogSource::new("a", "/a.log", "traefik");
        register(&pool, &source).await.unwrap();
        update_position(&pool, "a", 1024, 42, Some("last line")).await.unwrap();

        let found = find(&pool, "a").await.unwrap().unwrap();
        assert_eq!(found.last_position, 1024);
        assert_eq!(found.last_inode, 42);
        assert_eq!(found.last_line_content.as_deref(), Some("last line"));
    }
}
