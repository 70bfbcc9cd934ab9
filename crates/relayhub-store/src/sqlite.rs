//! `rusqlite`-backed `MessageStore`, mirroring the reference session-store
//! crate's single-connection concurrency idiom: one `Connection` behind an
//! `Arc<Mutex<_>>`, every call bridged onto a blocking thread via
//! `tokio::task::spawn_blocking` so the async port never blocks the runtime.

use crate::{ConversationSummaryRecord, FileMetadata, MessageStore, ParticipantRecord, Result, StoreError, SummaryAge};
use async_trait::async_trait;
use relayhub_core::Role;
use relayhub_protocol::ChatMessage;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                pw_question TEXT,
                pw_answer TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                sender_role TEXT NOT NULL,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                mentions_json TEXT NOT NULL DEFAULT '[]',
                mentions_ai INTEGER NOT NULL DEFAULT 0,
                reply_to TEXT,
                payload_json TEXT,
                edited_at TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp);
            CREATE TABLE IF NOT EXISTS participants (
                id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (id, session_id)
            );
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                message_id TEXT,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                blob_url TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                uploaded_by TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS conversation_summaries (
                id TEXT PRIMARY KEY,
                session_id TEXT UNIQUE NOT NULL,
                summary TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                last_message_id TEXT,
                last_message_timestamp TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Runs `f` against the shared connection on a blocking thread.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task join error: {e}")))?
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let mentions_json: String = row.get("mentions_json")?;
    let mentions: std::collections::HashSet<String> =
        serde_json::from_str(&mentions_json).unwrap_or_default();
    let role_str: String = row.get("sender_role")?;
    let type_str: String = row.get("type")?;
    let payload_json: Option<String> = row.get("payload_json")?;
    let payload = payload_json.and_then(|s| serde_json::from_str(&s).ok());

    Ok(ChatMessage {
        id: row.get("id")?,
        room_id: row.get("session_id")?,
        sender_id: row.get("sender_id")?,
        sender_name: row.get("sender_name")?,
        sender_role: Role::from_str(&role_str).unwrap_or(Role::Member),
        kind: serde_json::from_value(serde_json::Value::String(type_str))
            .unwrap_or(relayhub_protocol::message::MessageType::Text),
        content: row.get("content")?,
        mentions,
        mentions_ai: row.get::<_, i64>("mentions_ai")? != 0,
        reply_to: row.get("reply_to")?,
        timestamp: row.get("timestamp")?,
        edited_at: row.get("edited_at")?,
        payload,
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileMetadata> {
    Ok(FileMetadata {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        message_id: row.get("message_id")?,
        file_name: row.get("file_name")?,
        file_size: row.get("file_size")?,
        mime_type: row.get("mime_type")?,
        blob_url: row.get("blob_url")?,
        blob_key: row.get("blob_key")?,
        uploaded_by: row.get("uploaded_by")?,
        uploaded_at: row.get("uploaded_at")?,
    })
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn ensure_room(
        &self,
        id: &str,
        name: &str,
        creator: &str,
        pw_question: Option<&str>,
        pw_answer: Option<&str>,
    ) -> Result<()> {
        let (id, name, creator) = (id.to_string(), name.to_string(), creator.to_string());
        let (pw_question, pw_answer) = (pw_question.map(str::to_string), pw_answer.map(str::to_string));
        self.with_conn(move |conn| {
            let now = now_iso();
            conn.execute(
                "INSERT INTO sessions (id, name, created_by, pw_question, pw_answer, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO NOTHING",
                params![id, name, creator, pw_question, pw_answer, now],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_room_password_question(&self, id: &str) -> Result<Option<String>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let question: Option<String> = conn
                .query_row("SELECT pw_question FROM sessions WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .flatten();
            Ok(question)
        })
        .await
    }

    async fn verify_room_password(&self, id: &str, answer: &str) -> Result<bool> {
        let (id, answer) = (id.to_string(), answer.to_string());
        self.with_conn(move |conn| {
            let stored: Option<String> = conn
                .query_row("SELECT pw_answer FROM sessions WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .flatten();
            Ok(match stored {
                None => true,
                Some(a) => a.to_lowercase() == answer.to_lowercase(),
            })
        })
        .await
    }

    async fn set_room_password(&self, id: &str, question: &str, answer: &str) -> Result<()> {
        let (id, question, answer) = (id.to_string(), question.to_string(), answer.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET pw_question = ?2, pw_answer = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, question, answer, now_iso()],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let mentions_json = serde_json::to_string(&message.mentions)?;
            let payload_json = message.payload.as_ref().map(serde_json::to_string).transpose()?;
            let type_str = serde_json::to_value(message.kind)?
                .as_str()
                .unwrap_or("text")
                .to_string();
            conn.execute(
                "INSERT INTO messages (id, session_id, sender_id, sender_name, sender_role, type, content,
                    mentions_json, mentions_ai, reply_to, payload_json, edited_at, timestamp)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    message.id,
                    message.room_id,
                    message.sender_id,
                    message.sender_name,
                    message.sender_role.to_string(),
                    type_str,
                    message.content,
                    mentions_json,
                    message.mentions_ai as i64,
                    message.reply_to,
                    payload_json,
                    message.edited_at,
                    message.timestamp,
                ],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_messages(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        let room_id = room_id.to_string();
        let before = before.map(str::to_string);
        self.with_conn(move |conn| {
            let limit = limit as i64;
            if let Some(before_id) = before {
                let cutoff: Option<String> = conn
                    .query_row("SELECT timestamp FROM messages WHERE id = ?1", params![before_id], |r| {
                        r.get(0)
                    })
                    .optional()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                if let Some(cutoff) = cutoff {
                    let mut stmt = conn
                        .prepare(
                            "SELECT * FROM messages WHERE session_id = ?1 AND timestamp < ?2
                             ORDER BY timestamp DESC LIMIT ?3",
                        )
                        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                    let mapped = stmt
                        .query_map(params![room_id, cutoff, limit], row_to_message)
                        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                    let mut rows = Vec::new();
                    for m in mapped {
                        rows.push(m.map_err(|e| StoreError::Unavailable(e.to_string()))?);
                    }
                    return Ok(rows);
                }
            }
            let mut stmt = conn
                .prepare("SELECT * FROM messages WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let mapped = stmt
                .query_map(params![room_id, limit], row_to_message)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let mut rows = Vec::new();
            for m in mapped {
                rows.push(m.map_err(|e| StoreError::Unavailable(e.to_string()))?);
            }
            Ok(rows)
        })
        .await
    }

    async fn update_message_content(&self, message_id: &str, content: &str, edited_at: &str) -> Result<()> {
        let (message_id, content, edited_at) = (message_id.to_string(), content.to_string(), edited_at.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                params![message_id, content, edited_at],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn clear_room_messages(&self, room_id: &str) -> Result<()> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![room_id])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn save_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        let participant = participant.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO participants (id, session_id, name, role, status, joined_at, last_seen)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(id, session_id) DO UPDATE SET
                    name = excluded.name, role = excluded.role, status = excluded.status,
                    last_seen = excluded.last_seen",
                params![
                    participant.id,
                    participant.session_id,
                    participant.name,
                    participant.role.to_string(),
                    participant.status,
                    participant.joined_at,
                    participant.last_seen,
                ],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn update_participant_status(&self, room_id: &str, user_id: &str, status: &str) -> Result<()> {
        let (room_id, user_id, status) = (room_id.to_string(), user_id.to_string(), status.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE participants SET status = ?3, last_seen = ?4 WHERE id = ?1 AND session_id = ?2",
                params![user_id, room_id, status, now_iso()],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn save_file_metadata(&self, file: &FileMetadata) -> Result<()> {
        let file = file.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO files (id, session_id, message_id, file_name, file_size, mime_type,
                    blob_url, blob_key, uploaded_by, uploaded_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    file.id,
                    file.session_id,
                    file.message_id,
                    file.file_name,
                    file.file_size,
                    file.mime_type,
                    file.blob_url,
                    file.blob_key,
                    file.uploaded_by,
                    file.uploaded_at,
                ],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_file_by_id(&self, file_id: &str) -> Result<Option<FileMetadata>> {
        let file_id = file_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM files WHERE id = ?1", params![file_id], row_to_file)
                .optional()
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
        .await
    }

    async fn get_file_by_message_id(&self, message_id: &str) -> Result<Option<FileMetadata>> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM files WHERE message_id = ?1",
                params![message_id],
                row_to_file,
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
        .await
    }

    async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<()> {
        let (file_id, new_name) = (file_id.to_string(), new_name.to_string());
        self.with_conn(move |conn| {
            conn.execute("UPDATE files SET file_name = ?2 WHERE id = ?1", params![file_id, new_name])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let file_id = file_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_room_files(&self, room_id: &str) -> Result<Vec<FileMetadata>> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM files WHERE session_id = ?1 ORDER BY uploaded_at DESC")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params![room_id], row_to_file)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r.map_err(|e| StoreError::Unavailable(e.to_string()))?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_summary(&self, summary: &ConversationSummaryRecord) -> Result<()> {
        let summary = summary.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation_summaries (id, session_id, summary, message_count,
                    last_message_id, last_message_timestamp, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?7)
                 ON CONFLICT(session_id) DO UPDATE SET
                    summary = excluded.summary, message_count = excluded.message_count,
                    last_message_id = excluded.last_message_id,
                    last_message_timestamp = excluded.last_message_timestamp,
                    updated_at = excluded.updated_at",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    summary.room_id,
                    summary.summary,
                    summary.message_count,
                    summary.last_message_id,
                    summary.last_message_timestamp,
                    now_iso(),
                ],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_summary(&self, room_id: &str) -> Result<Option<ConversationSummaryRecord>> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT session_id, summary, message_count, last_message_id, last_message_timestamp
                 FROM conversation_summaries WHERE session_id = ?1",
                params![room_id],
                |r| {
                    Ok(ConversationSummaryRecord {
                        room_id: r.get(0)?,
                        summary: r.get(1)?,
                        message_count: r.get(2)?,
                        last_message_id: r.get(3)?,
                        last_message_timestamp: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
        .await
    }

    async fn delete_summary(&self, room_id: &str) -> Result<()> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM conversation_summaries WHERE session_id = ?1", params![room_id])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_summaries_oldest_first(&self) -> Result<Vec<SummaryAge>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT session_id, updated_at FROM conversation_summaries ORDER BY updated_at ASC")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(SummaryAge {
                        room_id: r.get(0)?,
                        updated_at: r.get(1)?,
                    })
                })
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhub_protocol::message::MessageType;

    fn sample_message(id: &str, room: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            room_id: room.to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "Ada".to_string(),
            sender_role: Role::Member,
            kind: MessageType::Text,
            content: "hello".to_string(),
            mentions: Default::default(),
            mentions_ai: false,
            reply_to: None,
            timestamp: now_iso(),
            edited_at: None,
            payload: None,
        }
    }

    #[tokio::test]
    async fn round_trips_room_password() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .ensure_room("room-1", "General", "owner-1", Some("favorite color?"), Some("blue"))
            .await
            .unwrap();
        assert_eq!(
            store.get_room_password_question("room-1").await.unwrap(),
            Some("favorite color?".to_string())
        );
        assert!(store.verify_room_password("room-1", "Blue").await.unwrap());
        assert!(!store.verify_room_password("room-1", "red").await.unwrap());
    }

    #[tokio::test]
    async fn room_without_password_always_verifies() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_room("room-1", "General", "owner-1", None, None).await.unwrap();
        assert!(store.verify_room_password("room-1", "anything").await.unwrap());
    }

    #[tokio::test]
    async fn saves_and_lists_messages_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_room("room-1", "General", "owner-1", None, None).await.unwrap();
        let mut a = sample_message("msg-1", "room-1");
        a.timestamp = "2026-01-01T00:00:00Z".to_string();
        let mut b = sample_message("msg-2", "room-1");
        b.timestamp = "2026-01-01T00:00:01Z".to_string();
        store.save_message(&a).await.unwrap();
        store.save_message(&b).await.unwrap();

        let messages = store.get_messages("room-1", 10, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "msg-2");
        assert_eq!(messages[1].id, "msg-1");
    }

    #[tokio::test]
    async fn edit_and_delete_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_room("room-1", "General", "owner-1", None, None).await.unwrap();
        let msg = sample_message("msg-1", "room-1");
        store.save_message(&msg).await.unwrap();
        store
            .update_message_content("msg-1", "edited", "2026-01-01T00:00:02Z")
            .await
            .unwrap();
        let messages = store.get_messages("room-1", 10, None).await.unwrap();
        assert_eq!(messages[0].content, "edited");
        assert!(messages[0].edited_at.is_some());

        store.delete_message("msg-1").await.unwrap();
        assert!(store.get_messages("room-1", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_upsert_replaces_prior_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_room("room-1", "General", "owner-1", None, None).await.unwrap();
        store
            .upsert_summary(&ConversationSummaryRecord {
                room_id: "room-1".to_string(),
                summary: "first pass".to_string(),
                message_count: 40,
                last_message_id: Some("msg-40".to_string()),
                last_message_timestamp: Some(now_iso()),
            })
            .await
            .unwrap();
        store
            .upsert_summary(&ConversationSummaryRecord {
                room_id: "room-1".to_string(),
                summary: "second pass".to_string(),
                message_count: 80,
                last_message_id: Some("msg-80".to_string()),
                last_message_timestamp: Some(now_iso()),
            })
            .await
            .unwrap();

        let summary = store.get_summary("room-1").await.unwrap().unwrap();
        assert_eq!(summary.summary, "second pass");
        assert_eq!(summary.message_count, 80);
    }
}
