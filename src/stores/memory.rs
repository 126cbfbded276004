//! In-memory store implementations for tests and local development.
//!
//! Both stores mirror the durable backends' observable behavior: keyset
//! pagination with opaque continuation tokens, fresh ordering timestamps on
//! every checkpoint overwrite, and `None` for unknown conversations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointState};
use crate::message::StoredMessage;
use crate::persistence::{encode_timestamp, parse_timestamp};
use crate::stores::{
    decode_key, encode_key, CheckpointListQuery, CheckpointPage, CheckpointStore,
    ConversationScope, MessagePage, MessageQuery, MessageStore, StoreError, DEFAULT_LIST_LIMIT,
    DEFAULT_QUERY_LIMIT,
};

#[derive(Default)]
struct MessageShard {
    records: FxHashMap<String, StoredMessage>,
    /// Insertion order doubles as created_at order; puts are stamped at
    /// construction time.
    order: Vec<String>,
}

/// Message store backed by per-conversation hash maps.
#[derive(Default)]
pub struct InMemoryMessageStore {
    shards: RwLock<FxHashMap<String, MessageShard>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn get(
        &self,
        scope: &ConversationScope,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let shards = self.shards.read().await;
        Ok(shards
            .get(&scope.partition_key())
            .and_then(|shard| shard.records.get(message_id))
            .cloned())
    }

    async fn put(&self, message: StoredMessage) -> Result<(), StoreError> {
        let scope = ConversationScope::new(&message.user_id, &message.conversation_id);
        let mut shards = self.shards.write().await;
        let shard = shards.entry(scope.partition_key()).or_default();
        if shard.records.insert(message.id.clone(), message.clone()).is_none() {
            shard.order.push(message.id);
        }
        Ok(())
    }

    async fn query_by_conversation(
        &self,
        scope: &ConversationScope,
        query: MessageQuery,
    ) -> Result<MessagePage, StoreError> {
        let shards = self.shards.read().await;
        let Some(shard) = shards.get(&scope.partition_key()) else {
            return Ok(MessagePage::default());
        };

        let mut rows: Vec<StoredMessage> = shard
            .order
            .iter()
            .filter_map(|id| shard.records.get(id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        if !query.ascending {
            rows.reverse();
        }

        if let Some(cursor) = query.cursor.as_deref().and_then(decode_key) {
            let (ts, id) = (parse_timestamp(cursor.0), cursor.1.to_string());
            rows.retain(|m| {
                let row_key = (m.created_at, m.id.as_str());
                let cursor_key = (ts, id.as_str());
                if query.ascending {
                    row_key > cursor_key
                } else {
                    row_key < cursor_key
                }
            });
        }

        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1) as usize;
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last()
                .map(|m| encode_key(&encode_timestamp(m.created_at), &m.id))
        } else {
            None
        };
        Ok(MessagePage {
            items: rows,
            next_cursor,
        })
    }

    async fn update_content(
        &self,
        scope: &ConversationScope,
        message_id: &str,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let mut shards = self.shards.write().await;
        let updated = shards
            .get_mut(&scope.partition_key())
            .and_then(|shard| shard.records.get_mut(message_id))
            .map(|record| {
                record.content = content.to_string();
                record.last_modified = Utc::now();
                record.clone()
            });
        Ok(updated)
    }

    async fn delete_conversation(&self, scope: &ConversationScope) -> Result<u64, StoreError> {
        let mut shards = self.shards.write().await;
        let removed = shards
            .remove(&scope.partition_key())
            .map_or(0, |shard| shard.records.len() as u64);
        Ok(removed)
    }
}

/// Checkpoint store backed by per-conversation hash maps.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    shards: RwLock<FxHashMap<String, FxHashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_latest(
        &self,
        scope: &ConversationScope,
    ) -> Result<Option<(CheckpointState, CheckpointMetadata)>, StoreError> {
        let shards = self.shards.read().await;
        Ok(shards
            .get(&scope.partition_key())
            .and_then(|shard| shard.get(crate::checkpoint::LATEST_CHECKPOINT_ID))
            .map(|cp| (cp.state.clone(), cp.metadata.clone())))
    }

    async fn put(
        &self,
        scope: &ConversationScope,
        checkpoint_id: &str,
        state: CheckpointState,
        metadata: CheckpointMetadata,
    ) -> Result<(), StoreError> {
        let checkpoint = Checkpoint {
            user_id: scope.user_id.clone(),
            conversation_id: scope.conversation_id.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            created_at: Utc::now(),
            state,
            metadata,
        };
        let mut shards = self.shards.write().await;
        shards
            .entry(scope.partition_key())
            .or_default()
            .insert(checkpoint_id.to_string(), checkpoint);
        Ok(())
    }

    async fn list(
        &self,
        scope: &ConversationScope,
        query: CheckpointListQuery,
    ) -> Result<CheckpointPage, StoreError> {
        let shards = self.shards.read().await;
        let mut rows: Vec<Checkpoint> = shards
            .get(&scope.partition_key())
            .map(|shard| shard.values().cloned().collect())
            .unwrap_or_default();
        // Most recent first, checkpoint id as a stable tie-break.
        rows.sort_by(|a, b| {
            (b.created_at, &b.checkpoint_id).cmp(&(a.created_at, &a.checkpoint_id))
        });

        if let Some(start) = query.start_key.as_deref().and_then(decode_key) {
            let (ts, id): (DateTime<Utc>, String) = (parse_timestamp(start.0), start.1.to_string());
            rows.retain(|cp| (cp.created_at, cp.checkpoint_id.as_str()) < (ts, id.as_str()));
        }

        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1) as usize;
        let last_key = if rows.len() > limit {
            rows.truncate(limit);
            rows.last()
                .map(|cp| encode_key(&encode_timestamp(cp.created_at), &cp.checkpoint_id))
        } else {
            None
        };
        Ok(CheckpointPage {
            checkpoints: rows,
            last_key,
        })
    }
}
