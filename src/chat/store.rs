use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::clock;

use super::model::{Message, MessageKind, NewMessage};

type MessageRow = (String, String, String, String, String, bool, i64);

const MESSAGE_COLUMNS: &str = "id,sender_id,receiver_id,message,message_type,is_deleted,created_at";

fn message_from_row(
    (id, sender_id, receiver_id, message, message_type, is_deleted, created_at): MessageRow,
) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        sender_id,
        receiver_id,
        message,
        message_type: message_type
            .parse::<MessageKind>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        is_deleted,
        created_at: clock::from_millis(created_at),
    })
}

/// Durable message log. Rows are only ever appended or flagged deleted.
#[derive(Clone)]
pub struct MessageStore {
    db_pool: SqlitePool,
    last_created: Arc<Mutex<i64>>,
}

impl MessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool, last_created: Arc::new(Mutex::new(i64::MIN)) }
    }

    /// Strictly increasing millisecond stamps, never earlier than `now`.
    fn next_created_at(&self, now: OffsetDateTime) -> i64 {
        let floor = clock::to_millis(now);
        let at_least = if clock::from_millis(floor) < now { floor + 1 } else { floor };

        let mut last = self.last_created.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = at_least.max(last.saturating_add(1));
        *last
    }

    pub async fn append(&self, new_message: NewMessage, now: OffsetDateTime) -> Result<Message, sqlx::Error> {
        let id = Uuid::now_v7();
        let created_at = self.next_created_at(now);

        sqlx::query("INSERT INTO chat_messages (id,sender_id,receiver_id,message,message_type,is_deleted,created_at) VALUES (?,?,?,?,?,0,?)")
            .bind(id.to_string())
            .bind(&new_message.sender_id)
            .bind(&new_message.receiver_id)
            .bind(&new_message.message)
            .bind(new_message.message_type.as_str())
            .bind(created_at)
            .execute(&self.db_pool)
            .await?;

        Ok(Message {
            id,
            sender_id: new_message.sender_id,
            receiver_id: new_message.receiver_id,
            message: new_message.message,
            message_type: new_message.message_type,
            is_deleted: false,
            created_at: clock::from_millis(created_at),
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(message_from_row).transpose()
    }

    /// Non-deleted messages between `a` and `b`, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> Result<Vec<Message>, sqlx::Error> {
        self.between(a, b, false).await
    }

    /// Like [`Self::conversation`] but keeps deleted rows.
    pub async fn audit(&self, a: &str, b: &str) -> Result<Vec<Message>, sqlx::Error> {
        self.between(a, b, true).await
    }

    async fn between(&self, a: &str, b: &str, include_deleted: bool) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages
             WHERE ((sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?))
               AND (is_deleted=0 OR ?)
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .bind(include_deleted)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    /// Flips `is_deleted` once. Returns false if the row was missing or already deleted.
    pub async fn mark_deleted(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE chat_messages SET is_deleted=1 WHERE id=? AND is_deleted=0")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
