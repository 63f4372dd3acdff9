use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::StorageError;

/// A piece of long-form content owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub body: String,
}

/// Content items table access.
#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        author_id: i64,
        title: &str,
        body: &str,
    ) -> Result<ContentItem, StorageError> {
        let item = sqlx::query_as::<_, ContentItem>(
            r#"
            INSERT INTO content_items (author_id, title, body)
            VALUES (?, ?, ?)
            RETURNING id, author_id, title, body
            "#,
        )
        .bind(author_id)
        .bind(title)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        info!(content_id = item.id, author_id, "created content item");
        Ok(item)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ContentItem>, StorageError> {
        let item = sqlx::query_as::<_, ContentItem>(
            "SELECT id, author_id, title, body FROM content_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Update title and/or body; `None` keeps the stored value.
    pub async fn update(
        &self,
        id: i64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE content_items SET title = COALESCE(?, title), body = COALESCE(?, body), updated_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(body)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<ContentItem>, StorageError> {
        let items = sqlx::query_as::<_, ContentItem>(
            "SELECT id, author_id, title, body FROM content_items ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn delete(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM content_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// One summary per content item. Writes overwrite; no history is kept.
#[derive(Clone)]
pub struct SummaryStore {
    pool: SqlitePool,
}

impl SummaryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, content_id: i64) -> Result<Option<String>, StorageError> {
        let text = sqlx::query_scalar::<_, String>(
            "SELECT summary_text FROM content_summaries WHERE content_id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(text)
    }

    pub async fn put(&self, content_id: i64, text: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO content_summaries (content_id, summary_text, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET summary_text = excluded.summary_text, updated_at = excluded.updated_at
            "#,
        )
        .bind(content_id)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(content_id, chars = text.chars().count(), "stored summary");
        Ok(())
    }

    pub async fn delete(&self, content_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM content_summaries WHERE content_id = ?")
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
