//! Storage traits and paging types.
//!
//! Two narrow async traits back the engine: [`MessageStore`] for durable
//! message records and [`CheckpointStore`] for conversation snapshots. Both
//! have an in-memory implementation for tests and development and a SQLite
//! implementation behind the `sqlite` feature. Neither layer retries; a
//! backend failure surfaces as [`StoreError`] and propagates unchanged.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointState};
use crate::message::StoredMessage;
use crate::persistence::PersistenceError;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryCheckpointStore, InMemoryMessageStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Default page size for checkpoint listing.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Default page size for conversation message queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Identity of one conversation: the partition every store call is keyed by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationScope {
    pub user_id: String,
    pub conversation_id: String,
}

impl ConversationScope {
    #[must_use]
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Composite partition key for in-memory indexes.
    #[must_use]
    pub fn partition_key(&self) -> String {
        format!("{}#{}", self.user_id, self.conversation_id)
    }
}

/// Options for [`MessageStore::query_by_conversation`].
#[derive(Clone, Debug, Default)]
pub struct MessageQuery {
    /// Max records per page; defaults to [`DEFAULT_QUERY_LIMIT`].
    pub limit: Option<u32>,
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
    /// Oldest-first when true, newest-first when false.
    pub ascending: bool,
}

/// One page of conversation messages.
#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    pub items: Vec<StoredMessage>,
    /// Present when more records remain; feed back as the next query's cursor.
    pub next_cursor: Option<String>,
}

/// Options for [`CheckpointStore::list`].
#[derive(Clone, Debug, Default)]
pub struct CheckpointListQuery {
    /// Max checkpoints per page; defaults to [`DEFAULT_LIST_LIMIT`].
    pub limit: Option<u32>,
    /// Opaque continuation token from a previous page's `last_key`.
    pub start_key: Option<String>,
}

/// One page of checkpoints, most recent first.
#[derive(Clone, Debug, Default)]
pub struct CheckpointPage {
    pub checkpoints: Vec<Checkpoint>,
    /// Present when more checkpoints remain.
    pub last_key: Option<String>,
}

/// Durable message storage.
///
/// Writes are single-item and unconditional; there are no multi-item
/// transactions at this seam.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch one message by id within a conversation scope.
    async fn get(
        &self,
        scope: &ConversationScope,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError>;

    /// Persist one message. Overwrites any record with the same id.
    async fn put(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Page through a conversation's messages ordered by write time.
    async fn query_by_conversation(
        &self,
        scope: &ConversationScope,
        query: MessageQuery,
    ) -> Result<MessagePage, StoreError>;

    /// Replace a message's content, stamping `last_modified`.
    ///
    /// Returns the updated record, or `None` if no such message exists in
    /// the scope.
    async fn update_content(
        &self,
        scope: &ConversationScope,
        message_id: &str,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError>;

    /// Remove every message in the conversation. Returns how many records
    /// were deleted.
    async fn delete_conversation(&self, scope: &ConversationScope) -> Result<u64, StoreError>;
}

/// Durable checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the `latest` sentinel for a conversation.
    ///
    /// `Ok(None)` is the expected fresh-conversation condition, not an
    /// error.
    async fn get_latest(
        &self,
        scope: &ConversationScope,
    ) -> Result<Option<(CheckpointState, CheckpointMetadata)>, StoreError>;

    /// Write or overwrite a checkpoint row, stamping a fresh ordering
    /// timestamp. Idempotent per `(scope, checkpoint_id)`.
    async fn put(
        &self,
        scope: &ConversationScope,
        checkpoint_id: &str,
        state: CheckpointState,
        metadata: CheckpointMetadata,
    ) -> Result<(), StoreError>;

    /// Page through a conversation's checkpoints, most recent first.
    async fn list(
        &self,
        scope: &ConversationScope,
        query: CheckpointListQuery,
    ) -> Result<CheckpointPage, StoreError>;
}

/// Storage-layer failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The backend could not serve the call.
    #[error("store unavailable: {message}")]
    #[diagnostic(
        code(chatloom::store::unavailable),
        help("Transient backend failure. The engine does not retry; the caller decides.")
    )]
    Unavailable { message: String },

    /// A persisted payload failed to encode or decode.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Encodes a keyset continuation token from a row's ordering columns.
///
/// The token is opaque to callers; both backends round-trip it through
/// [`decode_key`].
pub(crate) fn encode_key(timestamp_rfc3339: &str, id: &str) -> String {
    format!("{timestamp_rfc3339}|{id}")
}

/// Splits a continuation token back into `(timestamp, id)`. Returns `None`
/// for tokens this backend never produced.
pub(crate) fn decode_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('|')
}
