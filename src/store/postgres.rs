//! Postgres-backed message store
//!
//! Conversations are stored as one JSONB array of message records per row;
//! chunk summaries as one JSONB array per conversation, replaced wholesale.

use crate::error::DigestError;
use crate::models::{parse_message_records, ChunkSummary, Message};
use crate::store::MessageStore;
use crate::Result;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub struct PostgresMessageStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresMessageStore {
    /// Create a lazily-connecting pool; nothing is dialed until first use
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| store_error("Failed to create postgres pool", e))?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversations (
                      id TEXT PRIMARY KEY,
                      messages JSONB NOT NULL DEFAULT '[]'::jsonb,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_chunks (
                      conversation_id TEXT PRIMARY KEY,
                      chunks JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                info!("Message store schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| store_error("Failed to initialize message store schema", e))?;

        Ok(())
    }
}

fn store_error(context: &str, error: sqlx::Error) -> DigestError {
    DigestError::StoreUnavailable(format!("{}: {}", context, error))
}

#[async_trait::async_trait]
impl MessageStore for PostgresMessageStore {
    async fn get_conversation_ids(&self) -> Result<Vec<String>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT id FROM conversations ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to list conversations", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map_err(|e| store_error("Failed to read conversation id", e))
            })
            .collect()
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT messages FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load conversation", e))?
            .ok_or_else(|| DigestError::NotFound(conversation_id.to_string()))?;

        let Json(records): Json<Vec<Value>> = row.try_get("messages").map_err(|e| {
            DigestError::InvalidRecord(format!(
                "conversation {} messages column is not a JSON array: {}",
                conversation_id, e
            ))
        })?;

        debug!(conversation_id, records = records.len(), "Loaded conversation");
        Ok(parse_message_records(&records))
    }

    async fn get_chunk_summaries(&self, conversation_id: &str) -> Result<Vec<ChunkSummary>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT chunks FROM conversation_chunks WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load chunk summaries", e))?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let Json(summaries): Json<Vec<ChunkSummary>> = row.try_get("chunks").map_err(|e| {
            DigestError::InvalidRecord(format!(
                "conversation {} has malformed chunk summaries: {}",
                conversation_id, e
            ))
        })?;

        Ok(summaries)
    }

    async fn put_chunk_summaries(
        &self,
        conversation_id: &str,
        summaries: Vec<ChunkSummary>,
    ) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_chunks (conversation_id, chunks, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (conversation_id)
            DO UPDATE SET chunks = EXCLUDED.chunks, updated_at = NOW()
            "#,
        )
        .bind(conversation_id)
        .bind(Json(&summaries))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to persist chunk summaries", e))?;

        debug!(conversation_id, chunks = summaries.len(), "Persisted chunk summaries");
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Postgres pool closed");
    }
}
