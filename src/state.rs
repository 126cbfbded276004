//! Transient per-turn state threaded through the turn graph.
//!
//! One [`TurnState`] exists per `ask`/`ask_stream` invocation. It is seeded
//! from the latest checkpoint (or empty for a fresh conversation), mutated
//! only by applying node updates, and discarded after the final checkpoint
//! write. It is never shared across concurrent requests.

use serde::{Deserialize, Serialize};

use crate::message::MessageRef;
use crate::node::{ResponseUpdate, TurnUpdate};

/// Working state for one conversational turn.
///
/// # Examples
///
/// ```
/// use chatloom::message::MessageRef;
/// use chatloom::state::TurnState;
///
/// let mut state = TurnState::builder()
///     .with_ref(MessageRef::user("m1"))
///     .build();
/// assert!(state.push_ref(MessageRef::assistant("m2")));
/// assert!(!state.push_ref(MessageRef::assistant("m2"))); // duplicate id
/// assert_eq!(state.message_refs.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnState {
    /// Ordered refs reconstructing the conversation; no duplicate ids.
    pub message_refs: Vec<MessageRef>,
    /// The assistant text produced by the current turn, if any.
    pub response_chunk: Option<String>,
    /// Whether this turn delivers its reply incrementally.
    pub is_streaming: bool,
}

impl TurnState {
    /// Creates a state from checkpoint refs, de-duplicating by message id
    /// while preserving first-seen order.
    #[must_use]
    pub fn new(message_refs: Vec<MessageRef>, is_streaming: bool) -> Self {
        let mut state = Self {
            message_refs: Vec::with_capacity(message_refs.len()),
            response_chunk: None,
            is_streaming,
        };
        for r in message_refs {
            state.push_ref(r);
        }
        state
    }

    #[must_use]
    pub fn builder() -> TurnStateBuilder {
        TurnStateBuilder::default()
    }

    /// Appends a ref unless its message id is already present.
    ///
    /// Returns `true` if the ref was appended.
    pub fn push_ref(&mut self, reference: MessageRef) -> bool {
        if self
            .message_refs
            .iter()
            .any(|r| r.message_id == reference.message_id)
        {
            return false;
        }
        self.message_refs.push(reference);
        true
    }

    /// The most recently appended ref, if any.
    #[must_use]
    pub fn last_ref(&self) -> Option<&MessageRef> {
        self.message_refs.last()
    }

    /// Applies a node's partial update to this state.
    ///
    /// Replacement refs are re-deduplicated so a misbehaving node cannot
    /// introduce duplicate ids into the snapshot.
    pub fn apply(&mut self, update: TurnUpdate) {
        if let Some(refs) = update.message_refs {
            let streaming = self.is_streaming;
            let response = self.response_chunk.take();
            *self = TurnState::new(refs, streaming);
            self.response_chunk = response;
        }
        match update.response {
            Some(ResponseUpdate::Set(text)) => self.response_chunk = Some(text),
            Some(ResponseUpdate::Clear) => self.response_chunk = None,
            None => {}
        }
    }
}

/// Fluent builder for [`TurnState`], mostly used by tests and feature nodes.
#[derive(Debug, Default)]
pub struct TurnStateBuilder {
    message_refs: Vec<MessageRef>,
    is_streaming: bool,
}

impl TurnStateBuilder {
    #[must_use]
    pub fn with_ref(mut self, reference: MessageRef) -> Self {
        self.message_refs.push(reference);
        self
    }

    #[must_use]
    pub fn with_refs(mut self, refs: impl IntoIterator<Item = MessageRef>) -> Self {
        self.message_refs.extend(refs);
        self
    }

    #[must_use]
    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = is_streaming;
        self
    }

    #[must_use]
    pub fn build(self) -> TurnState {
        TurnState::new(self.message_refs, self.is_streaming)
    }
}
