//! Serde glue between domain types and durable rows.
//!
//! Persisted shapes use RFC3339 timestamp strings and explicit row structs
//! so the storage format stays decoupled from in-memory types. Decode
//! failures carry the field they occurred on; a corrupt timestamp degrades
//! to "now" rather than poisoning an otherwise readable row.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointState};

/// Errors translating between domain types and persisted rows.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    /// A JSON payload failed to encode or decode.
    #[error("failed to {action} {what}: {source}")]
    #[diagnostic(
        code(chatloom::persistence::serde),
        help("The stored payload does not match the expected shape. Check for partial writes or schema drift.")
    )]
    Serde {
        action: &'static str,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Serializes a payload, labelling failures with the field name.
pub fn to_json<T: Serialize>(value: &T, what: &'static str) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Serde {
        action: "serialize",
        what,
        source,
    })
}

/// Deserializes a payload, labelling failures with the field name.
pub fn from_json<T: DeserializeOwned>(
    payload: &str,
    what: &'static str,
) -> Result<T, PersistenceError> {
    serde_json::from_str(payload).map_err(|source| PersistenceError::Serde {
        action: "deserialize",
        what,
        source,
    })
}

/// Encodes a timestamp for storage.
#[must_use]
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parses a stored timestamp, falling back to the current time when the
/// stored string is unreadable.
#[must_use]
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Row shape for one persisted checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub user_id: String,
    pub conversation_id: String,
    pub checkpoint_id: String,
    /// RFC3339 ordering timestamp.
    pub created_at: String,
    pub state: CheckpointState,
    pub metadata: CheckpointMetadata,
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            user_id: cp.user_id.clone(),
            conversation_id: cp.conversation_id.clone(),
            checkpoint_id: cp.checkpoint_id.clone(),
            created_at: encode_timestamp(cp.created_at),
            state: cp.state.clone(),
            metadata: cp.metadata.clone(),
        }
    }
}

impl From<PersistedCheckpoint> for Checkpoint {
    fn from(row: PersistedCheckpoint) -> Self {
        Self {
            user_id: row.user_id,
            conversation_id: row.conversation_id,
            checkpoint_id: row.checkpoint_id,
            created_at: parse_timestamp(&row.created_at),
            state: row.state,
            metadata: row.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRef;

    #[test]
    fn checkpoint_roundtrips_through_persisted_row() {
        let cp = Checkpoint {
            user_id: "u1".into(),
            conversation_id: "c1".into(),
            checkpoint_id: "latest".into(),
            created_at: Utc::now(),
            state: CheckpointState::new(vec![MessageRef::user("m1")]),
            metadata: CheckpointMetadata::turn(1, 1),
        };
        let row = PersistedCheckpoint::from(&cp);
        let back = Checkpoint::from(row);
        assert_eq!(back.checkpoint_id, cp.checkpoint_id);
        assert_eq!(back.state, cp.state);
        assert_eq!(back.metadata, cp.metadata);
        // RFC3339 keeps sub-second precision, so the timestamp survives too.
        assert_eq!(back.created_at, cp.created_at);
    }

    #[test]
    fn corrupt_timestamp_degrades_to_now() {
        let before = Utc::now();
        let parsed = parse_timestamp("not-a-timestamp");
        assert!(parsed >= before);
    }

    #[test]
    fn json_helpers_label_the_failing_field() {
        let err = from_json::<CheckpointState>("{not json", "state").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("deserialize"));
        assert!(msg.contains("state"));
    }
}
