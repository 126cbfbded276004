//! Checkpoint domain types.
//!
//! A checkpoint is the durable snapshot of a conversation's state: the
//! ordered ref array plus bookkeeping metadata. The engine only ever
//! overwrites the well-known `latest` sentinel row; historical checkpoint
//! ids may accumulate through other writers and surface via
//! [`crate::stores::CheckpointStore::list`].

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::MessageRef;

/// Well-known checkpoint id for the current head of a conversation.
pub const LATEST_CHECKPOINT_ID: &str = "latest";

/// Source tag stamped on checkpoints written by the turn loop.
pub const TURN_LOOP_SOURCE: &str = "loop";

/// The replayable part of a checkpoint: ordered message refs.
///
/// Under normal operation the array is append-only turn over turn. Ids are
/// unique within one snapshot; construction de-duplicates.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub message_refs: Vec<MessageRef>,
}

impl CheckpointState {
    /// Builds a state from refs, dropping duplicate ids while keeping
    /// first-seen order.
    #[must_use]
    pub fn new(message_refs: Vec<MessageRef>) -> Self {
        let mut state = Self::default();
        state.extend_deduped(message_refs);
        state
    }

    /// Appends refs whose ids are not already present. Returns how many
    /// were actually added.
    pub fn extend_deduped(&mut self, refs: impl IntoIterator<Item = MessageRef>) -> usize {
        let mut added = 0;
        for r in refs {
            if !self
                .message_refs
                .iter()
                .any(|existing| existing.message_id == r.message_id)
            {
                self.message_refs.push(r);
                added += 1;
            }
        }
        added
    }
}

/// Bookkeeping attached to every checkpoint write.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// What produced this checkpoint (`"loop"` for turn writes).
    pub source: String,
    /// Monotonic turn counter for the conversation.
    pub step: u64,
    /// Per-channel write summary for this step.
    #[serde(default)]
    pub writes: FxHashMap<String, Value>,
    /// Parent checkpoint ids, keyed by namespace. Empty for sentinel writes.
    #[serde(default)]
    pub parents: FxHashMap<String, String>,
}

impl CheckpointMetadata {
    /// Metadata for a turn-loop write at the given step, recording how many
    /// refs the turn added.
    #[must_use]
    pub fn turn(step: u64, refs_added: usize) -> Self {
        let mut writes = FxHashMap::default();
        writes.insert(
            "message_refs".to_string(),
            Value::from(refs_added as u64),
        );
        Self {
            source: TURN_LOOP_SOURCE.to_string(),
            step,
            writes,
            parents: FxHashMap::default(),
        }
    }
}

/// A full checkpoint row as surfaced by listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub user_id: String,
    pub conversation_id: String,
    pub checkpoint_id: String,
    /// Ordering timestamp, re-stamped on every overwrite.
    pub created_at: DateTime<Utc>,
    pub state: CheckpointState,
    pub metadata: CheckpointMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_construction_drops_duplicate_ids() {
        let state = CheckpointState::new(vec![
            MessageRef::user("a"),
            MessageRef::assistant("b"),
            MessageRef::assistant("b"),
        ]);
        assert_eq!(state.message_refs.len(), 2);
    }

    #[test]
    fn extend_deduped_reports_added_count() {
        let mut state = CheckpointState::new(vec![MessageRef::user("a")]);
        let added = state.extend_deduped(vec![
            MessageRef::user("a"),
            MessageRef::assistant("b"),
        ]);
        assert_eq!(added, 1);
        assert_eq!(state.message_refs.len(), 2);
    }

    #[test]
    fn turn_metadata_records_source_and_writes() {
        let meta = CheckpointMetadata::turn(3, 2);
        assert_eq!(meta.source, TURN_LOOP_SOURCE);
        assert_eq!(meta.step, 3);
        assert_eq!(meta.writes.get("message_refs"), Some(&Value::from(2_u64)));
        assert!(meta.parents.is_empty());
    }

    #[test]
    fn state_serde_tolerates_missing_refs() {
        let state: CheckpointState = serde_json::from_str("{}").unwrap();
        assert!(state.message_refs.is_empty());
    }
}
