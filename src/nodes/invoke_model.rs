use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::gateway::ModelGateway;
use crate::message::{ChatMessage, MessageRef, StoredMessage};
use crate::node::{NodeContext, NodeError, TurnNode, TurnUpdate};
use crate::state::TurnState;
use crate::stores::{ConversationScope, MessageQuery, MessageStore};

/// Model-invocation built-in.
///
/// Reconstructs the prompt history from the snapshot's refs with one bulk
/// conversation read (not N point lookups), then branches on the turn mode:
///
/// - non-streaming: one `invoke` call; whitespace-only replies abort the
///   turn with [`NodeError::EmptyModelResponse`]; the reply is persisted as
///   an assistant message and its ref appended;
/// - streaming: chunks are forwarded through the context's bounded channel
///   as they arrive and accumulated locally; a non-empty accumulation gets
///   an assistant ref, but the text itself is not persisted as a message
///   (known gap: later history reads will not resolve that ref). A dropped
///   consumer fails the turn with [`NodeError::StreamConsumerGone`], so an
///   abandoned stream never synthesizes a ref or reaches the checkpoint
///   write.
pub struct InvokeModel {
    message_store: Arc<dyn MessageStore>,
    gateway: Arc<dyn ModelGateway>,
    history_page_limit: u32,
}

impl InvokeModel {
    #[must_use]
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        gateway: Arc<dyn ModelGateway>,
        history_page_limit: u32,
    ) -> Self {
        Self {
            message_store,
            gateway,
            history_page_limit,
        }
    }

    /// Pages through the conversation, builds an id map, and projects the
    /// refs onto it in order. Refs that resolve to no stored message are
    /// dropped rather than failing the turn.
    async fn resolve_history(
        &self,
        scope: &ConversationScope,
        refs: &[MessageRef],
    ) -> Result<Vec<ChatMessage>, NodeError> {
        let mut by_id: FxHashMap<String, StoredMessage> = FxHashMap::default();
        let mut cursor = None;
        loop {
            let page = self
                .message_store
                .query_by_conversation(
                    scope,
                    MessageQuery {
                        limit: Some(self.history_page_limit),
                        cursor,
                        ascending: true,
                    },
                )
                .await?;
            for message in page.items {
                by_id.insert(message.id.clone(), message);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let resolved: Vec<ChatMessage> = refs
            .iter()
            .filter_map(|r| by_id.get(&r.message_id))
            .map(StoredMessage::to_chat_message)
            .collect();
        if resolved.len() < refs.len() {
            tracing::warn!(
                dropped = refs.len() - resolved.len(),
                "some message refs did not resolve to stored messages"
            );
        }
        Ok(resolved)
    }

    async fn run_single_shot(
        &self,
        state: &TurnState,
        scope: &ConversationScope,
        history: Vec<ChatMessage>,
    ) -> Result<TurnUpdate, NodeError> {
        let response = self.gateway.invoke(&history).await?;
        if response.content.trim().is_empty() {
            return Err(NodeError::EmptyModelResponse);
        }

        let message = StoredMessage::from_assistant(scope, &response.content);
        let reference = message.reference();
        self.message_store.put(message).await?;

        let mut refs = state.message_refs.clone();
        if !refs.iter().any(|r| r.message_id == reference.message_id) {
            refs.push(reference);
        }
        Ok(TurnUpdate::new()
            .with_message_refs(refs)
            .with_response(response.content))
    }

    async fn run_streaming(
        &self,
        state: &TurnState,
        ctx: &NodeContext,
        history: Vec<ChatMessage>,
    ) -> Result<TurnUpdate, NodeError> {
        let mut chunks = self.gateway.stream(&history).await?;
        let mut accumulated = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.content.is_empty() {
                continue;
            }
            accumulated.push_str(&chunk.content);
            if !ctx.forward_chunk(chunk.content).await {
                // Consumer dropped the stream; stop pulling from the model
                // and fail the turn so nothing downstream gets checkpointed.
                tracing::debug!(node = %ctx.node_name, "chunk consumer gone, abandoning turn");
                return Err(NodeError::StreamConsumerGone);
            }
        }

        let mut update = TurnUpdate::new().clear_response();
        if !accumulated.trim().is_empty() {
            let mut refs = state.message_refs.clone();
            refs.push(MessageRef::assistant(Uuid::new_v4().to_string()));
            update = update.with_message_refs(refs);
        }
        Ok(update)
    }
}

#[async_trait]
impl TurnNode for InvokeModel {
    async fn run(&self, state: TurnState, ctx: NodeContext) -> Result<TurnUpdate, NodeError> {
        let scope = ctx.require_scope()?.clone();
        let history = self.resolve_history(&scope, &state.message_refs).await?;
        if state.is_streaming {
            self.run_streaming(&state, &ctx, history).await
        } else {
            self.run_single_shot(&state, &scope, history).await
        }
    }
}
