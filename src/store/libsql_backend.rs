//! libSQL backend: async `UnsubscribeStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{MessageStatus, NewMessage, StoredMessage, UnsubscribeStore};
use crate::unsubscribe::types::{AttemptRecord, AttemptStatus, UnsubscribeLinks, UnsubscribeMethod};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const MESSAGE_COLUMNS: &str = "id, user_id, sender, subject, user_email, list_unsubscribe, list_unsubscribe_post, body_text, body_html, unsubscribe_links, status, received_at, created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, message_id, method, status, detail, created_at";

/// Map a libsql Row to a StoredMessage (column order of MESSAGE_COLUMNS).
fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, libsql::Error> {
    let status_str: String = row.get(10)?;
    let received_str: String = row.get(11)?;
    let created_str: String = row.get(12)?;
    let updated_str: String = row.get(13)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        sender: row.get(2)?,
        subject: row.get(3).ok(),
        user_email: row.get(4).ok(),
        list_unsubscribe: row.get(5).ok(),
        list_unsubscribe_post: row.get(6).ok(),
        body_text: row.get(7).ok(),
        body_html: row.get(8).ok(),
        unsubscribe_links: row.get(9).ok(),
        status: MessageStatus::from_db(&status_str),
        received_at: parse_datetime(&received_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to an AttemptRecord (column order of ATTEMPT_COLUMNS).
fn row_to_attempt(row: &libsql::Row) -> Result<AttemptRecord, DatabaseError> {
    let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let message_id: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let method_str: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let status_str: String = row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let detail_str: String = row.get(4).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let created_str: String = row.get(5).map_err(|e| DatabaseError::Query(e.to_string()))?;

    Ok(AttemptRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("attempt id: {e}")))?,
        message_id,
        method: UnsubscribeMethod::parse(&method_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown attempt method '{method_str}'"))
        })?,
        status: AttemptStatus::parse(&status_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown attempt status '{status_str}'"))
        })?,
        detail: serde_json::from_str(&detail_str)
            .map_err(|e| DatabaseError::Serialization(format!("attempt detail: {e}")))?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl UnsubscribeStore for LibSqlBackend {
    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let received_at = message.received_at.unwrap_or_else(Utc::now).to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, user_id, sender, subject, user_email, list_unsubscribe,
                list_unsubscribe_post, body_text, body_html, status, received_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11, ?11)",
            params![
                id.clone(),
                message.user_id.clone(),
                message.sender.clone(),
                opt_text(message.subject.as_deref()),
                opt_text(message.user_email.as_deref()),
                opt_text(message.list_unsubscribe.as_deref()),
                opt_text(message.list_unsubscribe_post.as_deref()),
                opt_text(message.body_text.as_deref()),
                opt_text(message.body_html.as_deref()),
                received_at,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        debug!(id = %id, user_id = %message.user_id, "Message inserted into DB");
        Ok(id)
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn list_messages_for_user(&self, user_id: &str) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = ?1 ORDER BY received_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages_for_user: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!("Skipping message row: {e}");
                }
            }
        }
        Ok(messages)
    }

    async fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            });
        }
        debug!(id = id, status = %status, "Message status updated in DB");
        Ok(())
    }

    // ── Extraction cache ────────────────────────────────────────────

    async fn save_links(&self, id: &str, links: &UnsubscribeLinks) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(links)
            .map_err(|e| DatabaseError::Serialization(format!("save_links: {e}")))?;
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE messages SET unsubscribe_links = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_links: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Attempts ────────────────────────────────────────────────────

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), DatabaseError> {
        let detail = serde_json::to_string(&record.detail)
            .map_err(|e| DatabaseError::Serialization(format!("record_attempt: {e}")))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO unsubscribe_attempts (id, message_id, method, status, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.message_id.clone(),
                record.method.as_str(),
                record.status.as_str(),
                detail,
                record.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_attempt: {e}")))?;

        debug!(
            message_id = %record.message_id,
            method = %record.method,
            status = record.status.as_str(),
            "Attempt recorded"
        );
        Ok(())
    }

    async fn list_attempts(&self, message_id: &str) -> Result<Vec<AttemptRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM unsubscribe_attempts WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_attempts: {e}")))?;

        let mut attempts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_attempt(&row) {
                Ok(a) => attempts.push(a),
                Err(e) => tracing::warn!("Skipping attempt row: {e}"),
            }
        }
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn new_message(user: &str) -> NewMessage {
        NewMessage {
            user_id: user.into(),
            sender: "news@shop.example".into(),
            subject: Some("Weekly deals".into()),
            user_email: Some("me@example.com".into()),
            list_unsubscribe: Some("<https://shop.example/unsub?u=1>".into()),
            list_unsubscribe_post: Some("List-Unsubscribe=One-Click".into()),
            body_text: Some("hi".into()),
            body_html: None,
            received_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_message() {
        let db = test_db().await;
        let id = db.insert_message(&new_message("u1")).await.unwrap();

        let fetched = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.status, MessageStatus::Pending);
        assert_eq!(fetched.user_email.as_deref(), Some("me@example.com"));
        assert!(fetched.body_html.is_none());
        assert!(fetched.unsubscribe_links.is_none());

        assert!(db.get_message("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_messages_is_scoped_to_user() {
        let db = test_db().await;
        db.insert_message(&new_message("u1")).await.unwrap();
        db.insert_message(&new_message("u1")).await.unwrap();
        db.insert_message(&new_message("u2")).await.unwrap();

        assert_eq!(db.list_messages_for_user("u1").await.unwrap().len(), 2);
        assert_eq!(db.list_messages_for_user("u2").await.unwrap().len(), 1);
        assert!(db.list_messages_for_user("u3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn links_round_trip_and_malformed_reads_absent() {
        let db = test_db().await;
        let id = db.insert_message(&new_message("u1")).await.unwrap();
        assert!(db.get_stored_links(&id).await.unwrap().is_none());

        let links = UnsubscribeLinks {
            http_links: vec!["https://shop.example/unsub?u=1".into()],
            list_unsubscribe_post: Some("List-Unsubscribe=One-Click".into()),
            ..Default::default()
        };
        db.save_links(&id, &links).await.unwrap();
        let stored = db.get_stored_links(&id).await.unwrap().unwrap();
        assert_eq!(stored, links);

        db.conn()
            .execute(
                "UPDATE messages SET unsubscribe_links = 'not json' WHERE id = ?1",
                params![id.clone()],
            )
            .await
            .unwrap();
        assert!(db.get_stored_links(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_update_and_missing_message() {
        let db = test_db().await;
        let id = db.insert_message(&new_message("u1")).await.unwrap();
        db.update_message_status(&id, MessageStatus::Unsubscribed)
            .await
            .unwrap();
        assert_eq!(
            db.get_message(&id).await.unwrap().unwrap().status,
            MessageStatus::Unsubscribed
        );

        let err = db
            .update_message_status("missing", MessageStatus::Unsubscribed)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn attempts_append_in_order() {
        let db = test_db().await;
        let id = db.insert_message(&new_message("u1")).await.unwrap();

        let first = AttemptRecord::new(
            &id,
            UnsubscribeMethod::OneClickPost,
            AttemptStatus::Failed,
            serde_json::json!({"status": 500}),
        );
        let second = AttemptRecord::new(
            &id,
            UnsubscribeMethod::Agent,
            AttemptStatus::Succeeded,
            serde_json::json!({"steps": []}),
        );
        db.record_attempt(&first).await.unwrap();
        db.record_attempt(&second).await.unwrap();

        let attempts = db.list_attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].id, first.id);
        assert_eq!(attempts[0].method, UnsubscribeMethod::OneClickPost);
        assert_eq!(attempts[0].detail["status"], 500);
        assert!(attempts[1].succeeded());

        // Same id twice violates the primary key; records are never overwritten.
        assert!(db.record_attempt(&first).await.is_err());
    }

    #[tokio::test]
    async fn file_backed_db_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("unsub.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_message(&new_message("u1")).await.unwrap()
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_message(&id).await.unwrap().is_some());
    }
}
