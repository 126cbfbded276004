//! Node execution primitives for the turn graph.
//!
//! This module provides the [`TurnNode`] trait, the per-node execution
//! context, the partial-update type nodes return, and node-level errors.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::message::MessageRef;
use crate::state::TurnState;
use crate::stores::{ConversationScope, StoreError};

/// A single unit of work within a turn.
///
/// Nodes receive the current turn state and execution context, perform their
/// work, and return a partial update that the executor applies before the
/// next node runs. The two built-ins ([`crate::nodes::PrepareTurn`] and
/// [`crate::nodes::InvokeModel`]) bracket any registered feature nodes.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use chatloom::node::{NodeContext, NodeError, TurnNode, TurnUpdate};
/// use chatloom::state::TurnState;
///
/// struct AuditNode;
///
/// #[async_trait]
/// impl TurnNode for AuditNode {
///     async fn run(&self, state: TurnState, ctx: NodeContext) -> Result<TurnUpdate, NodeError> {
///         tracing::debug!(node = %ctx.node_name, refs = state.message_refs.len(), "audit");
///         Ok(TurnUpdate::new())
///     }
/// }
/// ```
#[async_trait]
pub trait TurnNode: Send + Sync {
    /// Execute this node against the given turn state.
    async fn run(&self, state: TurnState, ctx: NodeContext) -> Result<TurnUpdate, NodeError>;
}

/// Execution context handed to each node for one run.
///
/// Carries the node's registered name, the conversation scope the turn is
/// executing under, and (for streaming turns) the bounded channel that
/// forwards model chunks to the consumer.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// The name this node was registered under.
    pub node_name: String,
    /// Identity of the conversation being advanced, when known.
    pub scope: Option<ConversationScope>,
    /// Chunk fan-out channel; present only on streaming turns.
    pub chunk_sender: Option<flume::Sender<String>>,
}

impl NodeContext {
    /// The conversation scope, or [`NodeError::MissingExecutionContext`] if
    /// the graph was executed without one.
    pub fn require_scope(&self) -> Result<&ConversationScope, NodeError> {
        self.scope
            .as_ref()
            .ok_or(NodeError::MissingExecutionContext {
                what: "conversation scope",
            })
    }

    /// Forwards one chunk toward the stream consumer, waiting if the bounded
    /// channel is full.
    ///
    /// Returns `false` when no consumer can receive the chunk anymore, either
    /// because this turn is not streaming or because the receiving side was
    /// dropped. Callers should stop producing chunks in that case.
    pub async fn forward_chunk(&self, chunk: String) -> bool {
        match &self.chunk_sender {
            Some(sender) => sender.send_async(chunk).await.is_ok(),
            None => false,
        }
    }
}

/// Partial state update returned by node execution.
///
/// Both fields are optional so nodes touch only what they care about:
/// `message_refs` replaces the snapshot's ref array wholesale (the executor
/// re-deduplicates), `response` sets or clears the turn's response text.
#[derive(Clone, Debug, Default)]
pub struct TurnUpdate {
    /// Replacement ref array, conversational order.
    pub message_refs: Option<Vec<MessageRef>>,
    /// Set or clear the turn's response text.
    pub response: Option<ResponseUpdate>,
}

/// How a node wants the `response_chunk` field changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseUpdate {
    Set(String),
    Clear,
}

impl TurnUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot's refs.
    #[must_use]
    pub fn with_message_refs(mut self, refs: Vec<MessageRef>) -> Self {
        self.message_refs = Some(refs);
        self
    }

    /// Set the turn's response text.
    #[must_use]
    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response = Some(ResponseUpdate::Set(text.into()));
        self
    }

    /// Clear any stale response text.
    #[must_use]
    pub fn clear_response(mut self) -> Self {
        self.response = Some(ResponseUpdate::Clear);
        self
    }
}

/// Fatal errors raised during node execution. These halt the turn.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// The model produced no usable text for a non-streaming turn.
    #[error("model returned empty response")]
    #[diagnostic(
        code(chatloom::node::empty_model_response),
        help("The gateway replied with whitespace-only text. The turn is aborted before any checkpoint write.")
    )]
    EmptyModelResponse,

    /// The graph was executed without the context this node requires.
    #[error("missing execution context: {what}")]
    #[diagnostic(
        code(chatloom::node::missing_execution_context),
        help("Built-in nodes need a conversation scope. Execute the graph through the engine.")
    )]
    MissingExecutionContext { what: &'static str },

    /// The stream consumer disconnected before the turn finished.
    #[error("stream consumer disconnected before the turn completed")]
    #[diagnostic(
        code(chatloom::node::stream_consumer_gone),
        help("The caller dropped the reply stream; the turn is abandoned without a checkpoint write.")
    )]
    StreamConsumerGone,

    /// A store call failed.
    #[error(transparent)]
    #[diagnostic(code(chatloom::node::store))]
    Store(#[from] StoreError),

    /// The model gateway failed.
    #[error(transparent)]
    #[diagnostic(code(chatloom::node::gateway))]
    Gateway(#[from] GatewayError),
}
