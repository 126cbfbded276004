//! Conversation engine: the public orchestration surface.
//!
//! [`ConversationEngine`] owns the turn graph and the injected stores and
//! gateway. Each `ask`/`ask_stream` call advances one conversational turn:
//! load the latest checkpoint, persist the new user message, run the graph,
//! persist the assistant reply, and overwrite the `latest` checkpoint.
//!
//! # Concurrency contract
//!
//! The engine takes no per-conversation lock. Two simultaneous turns for
//! the same `(user, conversation)` pair both read the same checkpoint and
//! the later `latest` overwrite wins, silently dropping the other turn's
//! refs. At most one turn in flight per conversation is the caller's
//! responsibility. The checkpoint write is always the last mutating
//! operation of a turn, so a crash mid-turn leaves at worst orphaned
//! message records, never a checkpoint pointing at missing history.

use std::sync::{Arc, Mutex, PoisonError};

use async_stream::stream;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::checkpoint::{CheckpointMetadata, CheckpointState, LATEST_CHECKPOINT_ID};
use crate::config::EngineConfig;
use crate::gateway::ModelGateway;
use crate::graph::{CompiledTurnGraph, GraphError, TurnGraph};
use crate::message::{ChatMessage, StoredMessage};
use crate::node::{NodeError, TurnNode};
use crate::nodes::{InvokeModel, PrepareTurn};
use crate::state::TurnState;
use crate::stores::{CheckpointStore, ConversationScope, MessageStore, StoreError};

/// Optional caller identity details, consumed read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// One turn's input.
#[derive(Clone, Debug)]
pub struct AskRequest {
    /// Client-supplied messages; the last one is the new user utterance.
    pub messages: Vec<ChatMessage>,
    pub user_id: String,
    pub conversation_id: String,
    pub user_profile: Option<UserProfile>,
}

impl AskRequest {
    #[must_use]
    pub fn new(
        messages: Vec<ChatMessage>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            user_profile: None,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.user_profile = Some(profile);
        self
    }

    fn scope(&self) -> ConversationScope {
        ConversationScope::new(&self.user_id, &self.conversation_id)
    }

    /// The new user utterance: the content of the last supplied message.
    fn latest_user_text(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }
}

/// A complete single-shot reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub role: String,
}

impl ChatReply {
    fn assistant(content: String) -> Self {
        Self {
            content,
            role: ChatMessage::ASSISTANT.to_string(),
        }
    }
}

/// One item of a streamed reply.
///
/// Chunks carry text with `done == false`; the terminal sentinel carries
/// empty content with `done == true` and is emitted exactly once per
/// stream, including after a failed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    pub content: String,
    pub done: bool,
}

impl StreamEvent {
    #[must_use]
    pub fn chunk(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    #[must_use]
    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }
}

/// Stream returned by [`ConversationEngine::ask_stream`].
pub type ReplyStream = BoxStream<'static, Result<StreamEvent, EngineError>>;

/// Failures surfaced by the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The turn completed but left no ref to fetch the reply by, or the ref
    /// resolved to no stored message.
    #[error("assistant reply was not found after the turn completed")]
    #[diagnostic(
        code(chatloom::engine::assistant_response_lost),
        help("A feature node may have removed the assistant ref, or the reply record was not persisted.")
    )]
    AssistantResponseLost,

    /// The persisted reply turned out to be whitespace-only.
    #[error("assistant reply was empty")]
    #[diagnostic(code(chatloom::engine::empty_assistant_response))]
    EmptyAssistantResponse,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// The spawned streaming turn task panicked or was cancelled.
    #[error("turn task failed: {0}")]
    #[diagnostic(code(chatloom::engine::join))]
    Join(#[from] tokio::task::JoinError),
}

/// The conversation engine. Construct one per deployment and share it
/// behind an `Arc`; all methods take `&self`.
pub struct ConversationEngine {
    message_store: Arc<dyn MessageStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    graph: Mutex<TurnGraph>,
    config: EngineConfig,
}

impl ConversationEngine {
    /// Wires the engine from its collaborators. No I/O happens here; the
    /// graph compiles lazily on the first turn.
    #[must_use]
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        gateway: Arc<dyn ModelGateway>,
        config: EngineConfig,
    ) -> Self {
        let invoke = InvokeModel::new(
            Arc::clone(&message_store),
            gateway,
            config.history_page_limit,
        );
        let graph = TurnGraph::new(Arc::new(PrepareTurn), Arc::new(invoke));
        Self {
            message_store,
            checkpoint_store,
            graph: Mutex::new(graph),
            config,
        }
    }

    /// Builds a wire-shape message without touching any store.
    #[must_use]
    pub fn create_message(content: &str, role: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    /// Registers a feature node to run between the built-ins. Fails with
    /// [`GraphError::AlreadyCompiled`] once the first turn has executed.
    pub fn add_feature_node(
        &self,
        name: impl Into<String>,
        node: impl TurnNode + 'static,
    ) -> Result<(), EngineError> {
        self.lock_graph().register(name, node)?;
        Ok(())
    }

    fn lock_graph(&self) -> std::sync::MutexGuard<'_, TurnGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn compiled_graph(&self) -> Arc<CompiledTurnGraph> {
        self.lock_graph().ensure_compiled()
    }

    /// Loads the latest checkpoint and persists the new user message
    /// concurrently, then seeds the turn state.
    ///
    /// Returns the seeded state, the previous turn counter, and the number
    /// of refs the checkpoint already held (so the finished turn can report
    /// how many refs it added, even when the user ref deduplicated).
    async fn begin_turn(
        &self,
        request: &AskRequest,
        scope: &ConversationScope,
        is_streaming: bool,
    ) -> Result<(TurnState, u64, usize), EngineError> {
        if let Some(profile) = &request.user_profile {
            tracing::debug!(name = ?profile.name, "turn carries a user profile");
        }
        let user_message = StoredMessage::from_user(scope, request.latest_user_text());
        let user_ref = user_message.reference();

        let (latest, put_result) = tokio::join!(
            self.checkpoint_store.get_latest(scope),
            self.message_store.put(user_message),
        );
        put_result?;
        let (refs, previous_step) = match latest? {
            Some((state, metadata)) => (state.message_refs, metadata.step),
            None => (Vec::new(), 0),
        };

        let mut state = TurnState::new(refs, is_streaming);
        let baseline = state.message_refs.len();
        state.push_ref(user_ref);
        Ok((state, previous_step, baseline))
    }

    /// Advances one turn and returns the complete assistant reply.
    ///
    /// The reply content is re-read from the message store through the
    /// final state's last ref, concurrently with the checkpoint overwrite.
    #[instrument(
        skip(self, request),
        fields(user = %request.user_id, conversation = %request.conversation_id),
        err
    )]
    pub async fn ask(&self, request: AskRequest) -> Result<ChatReply, EngineError> {
        let graph = self.compiled_graph();
        let scope = request.scope();
        let (state, previous_step, baseline) = self.begin_turn(&request, &scope, false).await?;

        let final_state = graph.execute(state, Some(scope.clone()), None).await?;

        let last_ref = final_state
            .last_ref()
            .cloned()
            .ok_or(EngineError::AssistantResponseLost)?;
        let checkpoint_state = CheckpointState::new(final_state.message_refs);
        let added = checkpoint_state.message_refs.len().saturating_sub(baseline);
        let metadata = CheckpointMetadata::turn(previous_step + 1, added);

        let (fetched, saved) = tokio::join!(
            self.message_store.get(&scope, &last_ref.message_id),
            self.checkpoint_store
                .put(&scope, LATEST_CHECKPOINT_ID, checkpoint_state, metadata),
        );
        saved?;
        let reply = fetched?.ok_or(EngineError::AssistantResponseLost)?;
        if reply.content.trim().is_empty() {
            return Err(EngineError::EmptyAssistantResponse);
        }
        Ok(ChatReply::assistant(reply.content))
    }

    /// Advances one turn, yielding reply chunks as the model produces them.
    ///
    /// Chunks flow through a bounded channel: a slow consumer suspends the
    /// model-reading side, and a dropped consumer abandons the turn entirely
    /// ([`NodeError::StreamConsumerGone`]) without synthesizing an assistant
    /// ref or touching the checkpoint. The checkpoint overwrite happens
    /// inside the turn task after the model stream completes, so it remains
    /// the last mutating operation. A turn failure is yielded as an `Err`
    /// item; the done sentinel follows either way, exactly once.
    ///
    /// Known gap, kept intentionally: the accumulated streamed text gets an
    /// assistant ref but is not persisted as a message record.
    #[instrument(
        skip(self, request),
        fields(user = %request.user_id, conversation = %request.conversation_id),
        err
    )]
    pub async fn ask_stream(&self, request: AskRequest) -> Result<ReplyStream, EngineError> {
        let graph = self.compiled_graph();
        let scope = request.scope();
        let (state, previous_step, baseline) = self.begin_turn(&request, &scope, true).await?;

        let (chunk_tx, chunk_rx) = flume::bounded(self.config.stream_buffer_capacity);
        let checkpoint_store = Arc::clone(&self.checkpoint_store);
        let turn = tokio::spawn(async move {
            // chunk_tx moves in here; when execution finishes the channel
            // closes and the consumer loop below drains and exits.
            let result = async {
                let final_state = graph
                    .execute(state, Some(scope.clone()), Some(chunk_tx))
                    .await?;
                let checkpoint_state = CheckpointState::new(final_state.message_refs);
                let added = checkpoint_state.message_refs.len().saturating_sub(baseline);
                let metadata = CheckpointMetadata::turn(previous_step + 1, added);
                checkpoint_store
                    .put(&scope, LATEST_CHECKPOINT_ID, checkpoint_state, metadata)
                    .await?;
                Ok::<(), EngineError>(())
            }
            .await;
            if let Err(err) = &result {
                // The consumer may already be gone; keep the failure visible.
                tracing::warn!(error = %err, "streaming turn did not complete");
            }
            result
        });

        let events: ReplyStream = Box::pin(stream! {
            while let Ok(chunk) = chunk_rx.recv_async().await {
                yield Ok(StreamEvent::chunk(chunk));
            }
            match turn.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => yield Err(err),
                Err(join_err) => yield Err(EngineError::Join(join_err)),
            }
            yield Ok(StreamEvent::done());
        });
        Ok(events)
    }
}
