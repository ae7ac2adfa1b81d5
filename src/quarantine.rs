//! Quarantine store and replay dispatcher.
//!
//! Skipped messages are persisted with a snapshot of their ledger
//! diagnostics; an operator can later replay one back onto the bus or delete
//! it outright.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::db::tables::quarantined_messages::QuarantinedMessage;
use crate::error::{TriageError, TriageResult};
use crate::models::SkippedMessage;
use crate::publisher::MessagePublisher;
use crate::store::TriageStore;

/// Routing key marking a pub/sub-origin message, which has no queue to
/// replay into.
const PUBSUB_ROUTING_KEY: &str = "none";

pub struct QuarantineService {
    db: Arc<Database>,
    publisher: Arc<dyn MessagePublisher>,
}

impl QuarantineService {
    pub fn new(db: Arc<Database>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { db, publisher }
    }

    /// Record a skipped message: append to the in-memory audit trail,
    /// snapshot the ledger's diagnostics for the hash, persist the durable
    /// quarantine row.
    pub fn store_skipped(
        &self,
        store: &TriageStore,
        skipped: SkippedMessage,
    ) -> TriageResult<QuarantinedMessage> {
        store.store_skipped_message(skipped.clone());

        let error_reports =
            serde_json::to_string(&store.bad_message_reports(&skipped.message_hash))?;

        let quarantined = QuarantinedMessage {
            id: Uuid::new_v4().to_string(),
            message_hash: skipped.message_hash,
            message_payload: skipped.message_payload,
            content_type: skipped.content_type,
            headers: skipped.headers,
            queue: skipped.queue,
            routing_key: skipped.routing_key,
            service: skipped.service,
            error_reports,
            skipped_at: Utc::now(),
        };
        self.db.save_quarantined_message(&quarantined)?;

        log::info!(
            "Quarantined message {} (hash {}) from queue {}",
            quarantined.id,
            quarantined.message_hash,
            quarantined.queue
        );
        Ok(quarantined)
    }

    /// Republish a quarantined message to its original queue with persistent
    /// delivery, the original content type and all original headers, then
    /// delete the record.
    ///
    /// Publish happens before delete: a crash in between leaves the record
    /// for a retry, so replay is at-least-once rather than exactly-once.
    pub async fn replay(&self, id: &str) -> TriageResult<()> {
        let Some(quarantined) = self.db.get_quarantined_message(id)? else {
            return Err(TriageError::NotFound(format!("quarantined message {id}")));
        };

        if quarantined.routing_key == PUBSUB_ROUTING_KEY {
            return Err(TriageError::UnsupportedReplayTarget);
        }

        self.publisher
            .publish(
                &quarantined.queue,
                &quarantined.message_payload,
                quarantined.content_type.as_deref(),
                &quarantined.headers,
                true,
            )
            .await?;

        self.db.delete_quarantined_message(id)?;

        log::info!(
            "Replayed quarantined message {} (hash {}) to queue {}",
            id,
            quarantined.message_hash,
            quarantined.queue
        );
        Ok(())
    }

    /// Operator escape hatch for a quarantined message that must never be
    /// replayed.
    pub fn delete(&self, id: &str) -> TriageResult<()> {
        if !self.db.delete_quarantined_message(id)? {
            return Err(TriageError::NotFound(format!("quarantined message {id}")));
        }
        Ok(())
    }

    pub fn list(&self) -> TriageResult<Vec<QuarantinedMessage>> {
        self.db.list_quarantined_messages()
    }
}
