//! Quarantined message persistence (quarantined_messages)

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::Serialize;
use serde_json::{Map, Value};

use super::super::Database;
use crate::error::TriageResult;
use crate::models::base64_bytes;

/// The durable, replayable record of a message withheld from processing.
///
/// Created when a worker stores a skipped message; deleted on successful
/// replay or explicit operator delete.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedMessage {
    pub id: String,
    pub message_hash: String,
    #[serde(with = "base64_bytes")]
    pub message_payload: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: Map<String, Value>,
    pub queue: String,
    pub routing_key: String,
    pub service: String,
    /// JSON snapshot of the ledger entries for this hash at skip time
    pub error_reports: String,
    pub skipped_at: DateTime<Utc>,
}

impl Database {
    pub fn save_quarantined_message(&self, message: &QuarantinedMessage) -> TriageResult<()> {
        let conn = self.conn()?;
        let headers = serde_json::to_string(&message.headers)?;
        conn.execute(
            "INSERT INTO quarantined_messages
                 (id, message_hash, message_payload, content_type, headers,
                  queue, routing_key, service, error_reports, skipped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                &message.id,
                &message.message_hash,
                &message.message_payload,
                &message.content_type,
                &headers,
                &message.queue,
                &message.routing_key,
                &message.service,
                &message.error_reports,
                message.skipped_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_quarantined_messages(&self) -> TriageResult<Vec<QuarantinedMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, message_hash, message_payload, content_type, headers,
                    queue, routing_key, service, error_reports, skipped_at
             FROM quarantined_messages ORDER BY skipped_at",
        )?;

        let messages = stmt
            .query_map([], |row| Self::row_to_quarantined_message(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    pub fn get_quarantined_message(&self, id: &str) -> TriageResult<Option<QuarantinedMessage>> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                "SELECT id, message_hash, message_payload, content_type, headers,
                        queue, routing_key, service, error_reports, skipped_at
                 FROM quarantined_messages WHERE id = ?1",
                [id],
                |row| Self::row_to_quarantined_message(row),
            )
            .ok();
        Ok(message)
    }

    /// Returns false when no quarantined message with that id existed.
    pub fn delete_quarantined_message(&self, id: &str) -> TriageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM quarantined_messages WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    fn row_to_quarantined_message(row: &Row) -> rusqlite::Result<QuarantinedMessage> {
        let headers: String = row.get(4)?;
        let skipped_at: String = row.get(9)?;
        Ok(QuarantinedMessage {
            id: row.get(0)?,
            message_hash: row.get(1)?,
            message_payload: row.get(2)?,
            content_type: row.get(3)?,
            headers: serde_json::from_str(&headers).unwrap_or_default(),
            queue: row.get(5)?,
            routing_key: row.get(6)?,
            service: row.get(7)?,
            error_reports: row.get(8)?,
            skipped_at: DateTime::parse_from_rfc3339(&skipped_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn message(id: &str, hash: &str) -> QuarantinedMessage {
        let mut headers = Map::new();
        headers.insert("channel".to_string(), Value::from("events"));
        QuarantinedMessage {
            id: id.to_string(),
            message_hash: hash.to_string(),
            message_payload: b"{\"case\":1}".to_vec(),
            content_type: Some("application/json".to_string()),
            headers,
            queue: "case.events".to_string(),
            routing_key: "case.event.created".to_string(),
            service: "case-processor".to_string(),
            error_reports: "[]".to_string(),
            skipped_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_get_round_trip() {
        let (_dir, db) = test_db();

        db.save_quarantined_message(&message("m1", "h1")).unwrap();

        let loaded = db.get_quarantined_message("m1").unwrap().unwrap();
        assert_eq!(loaded.message_hash, "h1");
        assert_eq!(loaded.message_payload, b"{\"case\":1}".to_vec());
        assert_eq!(loaded.content_type.as_deref(), Some("application/json"));
        assert_eq!(loaded.headers.get("channel"), Some(&Value::from("events")));
        assert_eq!(loaded.queue, "case.events");
    }

    #[test]
    fn list_returns_all_rows() {
        let (_dir, db) = test_db();

        db.save_quarantined_message(&message("m1", "h1")).unwrap();
        db.save_quarantined_message(&message("m2", "h2")).unwrap();

        let all = db.list_quarantined_messages().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn delete_removes_the_row() {
        let (_dir, db) = test_db();

        db.save_quarantined_message(&message("m1", "h1")).unwrap();
        assert!(db.delete_quarantined_message("m1").unwrap());
        assert!(db.get_quarantined_message("m1").unwrap().is_none());
        assert!(!db.delete_quarantined_message("m1").unwrap());
    }
}
