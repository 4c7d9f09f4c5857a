// src/conversations/mod.rs

//! Conversation and message persistence.
//!
//! The message insert and the parent conversation's rollup update are
//! co-committed in one transaction, so the conversation totals equal the sum
//! over its messages at every quiescent point.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model_id: String,
    pub system_prompt: String,
    pub created_at: String,
    pub updated_at: String,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost_usd: f64,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub model_id: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub used_docs: bool,
    pub created_at: String,
}

/// Fields for a message append. Assistant rows carry the model id and billed
/// token counts; user rows leave them zeroed.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub role: &'static str,
    pub content: String,
    pub model_id: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub used_docs: bool,
}

impl NewMessage {
    pub fn user(content: String, used_docs: bool) -> Self {
        Self {
            role: "user",
            content,
            used_docs,
            ..Default::default()
        }
    }
}

const SELECT_CONVERSATION: &str = r#"
SELECT c.*,
       (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count
FROM conversations c
"#;

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(
        &self,
        model_id: &str,
        title: &str,
        system_prompt: &str,
    ) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO conversations (id, title, model_id, system_prompt) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(model_id)
        .bind(system_prompt)
        .execute(&self.pool)
        .await?;

        self.get_conversation(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Conversation vanished after insert"))
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, Conversation>(&format!(
            "{SELECT_CONVERSATION} ORDER BY c.updated_at DESC, c.rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(&format!(
            "{SELECT_CONVERSATION} WHERE c.id = ?"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Messages in insert order.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE conversation_id = ? \
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Append a message and fold its tokens/cost into the conversation
    /// rollups, in one transaction. Returns the new message id.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, role, content, model_id,
                 input_tokens, output_tokens, cost_usd, used_docs)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(&message.model_id)
        .bind(message.input_tokens)
        .bind(message.output_tokens)
        .bind(message.cost_usd)
        .bind(message.used_docs)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations SET
                updated_at = datetime('now'),
                total_input_tokens = total_input_tokens + ?,
                total_output_tokens = total_output_tokens + ?,
                total_cost_usd = total_cost_usd + ?
            WHERE id = ?
            "#,
        )
        .bind(message.input_tokens)
        .bind(message.output_tokens)
        .bind(message.cost_usd)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(title)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_system_prompt(
        &self,
        conversation_id: &str,
        system_prompt: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET system_prompt = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(system_prompt)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit delete cascades to messages and cost entries.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cost_log WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn message_count(&self, conversation_id: &str) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}
