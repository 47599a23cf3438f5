use crate::conversation::{migrate_message, Conversation, ConversationKind, RawMessage};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Error as SqlxError, Row, SqlitePool};
use std::str::FromStr;

/// Sqlite-backed conversation store, keyed by conversation id. Message
/// lists persist as JSON so legacy rows (scalar `content` messages) keep
/// loading; migration happens on the way out.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, SqlxError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Single writer; a second connection would also break in-memory
        // databases, where every connection gets its own store.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Store { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), SqlxError> {
        log::debug!("Running database migrations...");
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                model TEXT NOT NULL,
                favorite INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                messages TEXT NOT NULL
            );",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, SqlxError> {
        log::debug!("Loading conversation {}", id);
        let row = sqlx::query(
            "SELECT id, kind, title, model, favorite, created_at, messages
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(conversation_from_row).transpose()
    }

    pub async fn add_or_update_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), SqlxError> {
        log::debug!("Saving conversation {}", conversation.id);
        let messages_json =
            serde_json::to_string(&conversation.messages).map_err(decode_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO conversations
                 (id, kind, title, model, favorite, created_at, messages)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(conversation.kind.as_str())
        .bind(&conversation.title)
        .bind(&conversation.model)
        .bind(conversation.favorite as i64)
        .bind(conversation.created_at.to_rfc3339())
        .bind(messages_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, SqlxError> {
        let rows = sqlx::query(
            "SELECT id, kind, title, model, favorite, created_at, messages
             FROM conversations ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(conversation_from_row(row)?);
        }
        log::debug!("Loaded {} conversations", conversations.len());
        Ok(conversations)
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, SqlxError> {
    let raw_messages: Vec<RawMessage> =
        serde_json::from_str(row.try_get("messages")?).map_err(decode_err)?;
    let created_at = DateTime::parse_from_rfc3339(row.try_get("created_at")?)
        .map_err(decode_err)?
        .with_timezone(&Utc);
    Ok(Conversation {
        id: row.try_get("id")?,
        kind: ConversationKind::from_tag(row.try_get("kind")?),
        title: row.try_get("title")?,
        model: row.try_get("model")?,
        favorite: row.try_get::<i64, _>("favorite")? != 0,
        created_at,
        messages: raw_messages.into_iter().map(migrate_message).collect(),
    })
}

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> SqlxError {
    SqlxError::Decode(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{next_id, Author, Message, Part};

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_conversation() -> Conversation {
        let messages = vec![
            Message::text(Author::User, "draw me a map"),
            Message::new(
                Author::Model,
                vec![Part::ImageGenerationResult {
                    prompt: "a map".to_string(),
                    params: Default::default(),
                    images: vec!["data:image/png;base64,AAAA".to_string()],
                }],
            ),
        ];
        Conversation {
            id: next_id(),
            title: crate::conversation::title_for(&messages),
            messages,
            created_at: Utc::now(),
            model: "gemini-2.5-flash".to_string(),
            favorite: false,
            kind: ConversationKind::Chat,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips_all_part_kinds() {
        let store = memory_store().await;
        let conversation = sample_conversation();
        store.add_or_update_conversation(&conversation).await.unwrap();
        let loaded = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages, conversation.messages);
        assert_eq!(loaded.title, "draw me a map");
    }

    #[tokio::test]
    async fn missing_conversation_is_none() {
        let store = memory_store().await;
        assert!(store.get_conversation("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_replaces_existing_row() {
        let store = memory_store().await;
        let mut conversation = sample_conversation();
        store.add_or_update_conversation(&conversation).await.unwrap();
        conversation
            .messages
            .push(Message::text(Author::Model, "done"));
        conversation.favorite = true;
        store.add_or_update_conversation(&conversation).await.unwrap();
        let loaded = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert!(loaded.favorite);
    }

    #[tokio::test]
    async fn legacy_scalar_content_rows_migrate_on_load() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO conversations (id, kind, title, model, favorite, created_at, messages)
             VALUES ('old', 'chat', 'Old', 'gemini-2.5-flash', 0, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(r#"[{"id":"1","author":"user","content":"legacy hello"}]"#)
        .execute(&store.pool)
        .await
        .unwrap();
        let loaded = store.get_conversation("old").await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].parts, vec![Part::text("legacy hello")]);
    }
}
