//! Wire DTOs shared between the reporting surface (workers) and the admin
//! surface (operators). Field names are camelCase on the wire to match the
//! worker protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialize binary payloads as base64 strings on the JSON wire.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A single failure report from a worker service.
///
/// Equality is by all fields; this is the ledger's dedup key, so two reports
/// for the same message hash with different exception details are tracked as
/// distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionReport {
    pub message_hash: String,
    pub service: String,
    pub queue: String,
    pub exception_class: String,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_root_cause: String,
}

/// Occurrence statistics for one distinct [`ExceptionReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionStats {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seen_count: u64,
    pub logged_at_least_once: bool,
}

impl ExceptionStats {
    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            seen_count: 1,
            logged_at_least_once: false,
        }
    }
}

/// The verdict returned to a reporting worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResponse {
    pub skip_it: bool,
    pub peek_it: bool,
    pub log_it: bool,
    /// Drop the message entirely; do not log, do not quarantine
    pub throw_away: bool,
}

/// A worker's asynchronous reply to a pending peek request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekReply {
    pub message_hash: String,
    #[serde(with = "base64_bytes")]
    pub message_payload: Vec<u8>,
}

/// The payload and routing metadata of a message a worker skipped.
///
/// Kept in-memory as an operator-visible audit trail; the durable copy is a
/// [`crate::db::tables::quarantined_messages::QuarantinedMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedMessage {
    pub message_hash: String,
    #[serde(with = "base64_bytes")]
    pub message_payload: Vec<u8>,
    pub service: String,
    pub queue: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// "none" marks a pub/sub-origin message, which cannot be replayed
    #[serde(default)]
    pub routing_key: String,
}

/// One (report, stats) pair for a message hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadMessageReport {
    pub exception_report: ExceptionReport,
    pub stats: ExceptionStats,
}

/// Aggregate view over every distinct report seen for one message hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadMessageSummary {
    pub message_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seen_count: u64,
    pub affected_services: Vec<String>,
    pub affected_queues: Vec<String>,
    pub quarantined: bool,
}

/// Request body for creating an auto-quarantine rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuarantineRuleRequest {
    pub expression: String,
    #[serde(default)]
    pub quarantine: bool,
    #[serde(default)]
    pub suppress_logging: bool,
    #[serde(default)]
    pub throw_away: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
