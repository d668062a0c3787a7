use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::llm::{ChatMessage, MessageRole};
use crate::persistence::{ConversationStore, ConversationSummary, preview};

#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        // Run Migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ConversationStore for PostgresStore {
    async fn get_or_create(&self, owner: &str, session: &str) -> Result<i64> {
        // The no-op DO UPDATE makes the insert return the existing row's id
        // on conflict, keeping get-or-create a single statement.
        let row = sqlx::query(
            r#"
            INSERT INTO conversations (owner, session, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (owner, session) DO UPDATE SET owner = EXCLUDED.owner
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(session)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find(&self, owner: &str, session: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM conversations WHERE owner = $1 AND session = $2")
            .bind(owner)
            .bind(session)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get("id").map_err(Into::into)).transpose()
    }

    async fn append(&self, conversation_id: i64, role: MessageRole, content: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, role, content, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_all(&self, conversation_id: i64, messages: &[ChatMessage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, role, content, created_at)
                VALUES ($1, $2, $3, NOW())
                "#,
            )
            .bind(conversation_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT role, content FROM messages WHERE conversation_id = $1 ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            let role = MessageRole::parse(&role)
                .ok_or_else(|| anyhow::anyhow!("unknown message role: {role}"))?;
            messages.push(ChatMessage {
                role,
                content: row.try_get("content")?,
            });
        }
        Ok(messages)
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.updated_at, m.content
            FROM conversations c
            JOIN messages m ON m.conversation_id = c.id
            WHERE c.owner = $1
              AND m.id = (
                SELECT MIN(id) FROM messages
                WHERE conversation_id = c.id AND role = 'user'
              )
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
            let content: String = row.try_get("content")?;
            summaries.push(ConversationSummary {
                id: row.try_get("id")?,
                updated_at: updated_at.to_rfc3339(),
                preview: preview(&content),
            });
        }
        Ok(summaries)
    }

    async fn get_by_id(
        &self,
        owner: &str,
        conversation_id: i64,
    ) -> Result<Option<Vec<ChatMessage>>> {
        let row = sqlx::query("SELECT id FROM conversations WHERE id = $1 AND owner = $2")
            .bind(conversation_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_none() {
            return Ok(None);
        }

        Ok(Some(self.list_messages(conversation_id).await?))
    }
}
