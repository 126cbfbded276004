//! Turn graph: ordered node registry with compile-once freezing.
//!
//! The topology is a fixed linear chain: the prepare built-in, then any
//! registered feature nodes in registration order, then the model built-in.
//! Compilation is lazy (first execution) and one-way; once compiled, the
//! registry is immutable and late registration fails with
//! [`GraphError::AlreadyCompiled`].

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::node::{NodeContext, NodeError, TurnNode};
use crate::state::TurnState;
use crate::stores::ConversationScope;

/// Registered name of the turn-setup built-in.
pub const PREPARE_TURN: &str = "prepare_turn";
/// Registered name of the model-invocation built-in.
pub const INVOKE_MODEL: &str = "invoke_model";

/// Mutable pre-compilation view of the turn topology.
pub struct TurnGraph {
    prepare: Arc<dyn TurnNode>,
    invoke: Arc<dyn TurnNode>,
    feature_nodes: Vec<(String, Arc<dyn TurnNode>)>,
    compiled: Option<Arc<CompiledTurnGraph>>,
}

impl TurnGraph {
    /// Creates a graph around the two built-in endpoints.
    #[must_use]
    pub fn new(prepare: Arc<dyn TurnNode>, invoke: Arc<dyn TurnNode>) -> Self {
        Self {
            prepare,
            invoke,
            feature_nodes: Vec::new(),
            compiled: None,
        }
    }

    /// Registers a feature node to run between the built-ins, after any
    /// previously registered feature nodes.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        node: impl TurnNode + 'static,
    ) -> Result<(), GraphError> {
        let name = name.into();
        if self.compiled.is_some() {
            return Err(GraphError::AlreadyCompiled { node: name });
        }
        if name == PREPARE_TURN
            || name == INVOKE_MODEL
            || self.feature_nodes.iter().any(|(n, _)| *n == name)
        {
            return Err(GraphError::DuplicateNode { node: name });
        }
        self.feature_nodes.push((name, Arc::new(node)));
        Ok(())
    }

    /// Whether the topology has been frozen.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compiles on first call, returning the frozen executable chain. Later
    /// calls return the same compiled graph.
    pub fn ensure_compiled(&mut self) -> Arc<CompiledTurnGraph> {
        if let Some(compiled) = &self.compiled {
            return Arc::clone(compiled);
        }
        let mut sequence = Vec::with_capacity(self.feature_nodes.len() + 2);
        sequence.push((PREPARE_TURN.to_string(), Arc::clone(&self.prepare)));
        for (name, node) in &self.feature_nodes {
            sequence.push((name.clone(), Arc::clone(node)));
        }
        sequence.push((INVOKE_MODEL.to_string(), Arc::clone(&self.invoke)));
        tracing::debug!(nodes = sequence.len(), "turn graph compiled");
        let compiled = Arc::new(CompiledTurnGraph { sequence });
        self.compiled = Some(Arc::clone(&compiled));
        compiled
    }
}

/// Frozen, executable turn topology. Cheap to clone behind an `Arc` and
/// safe to execute from many turns concurrently.
pub struct CompiledTurnGraph {
    sequence: Vec<(String, Arc<dyn TurnNode>)>,
}

impl CompiledTurnGraph {
    /// Runs every node in order, threading the state through applied
    /// updates. The first node error aborts the turn.
    #[instrument(skip_all, fields(nodes = self.sequence.len()), err)]
    pub async fn execute(
        &self,
        mut state: TurnState,
        scope: Option<ConversationScope>,
        chunk_sender: Option<flume::Sender<String>>,
    ) -> Result<TurnState, NodeError> {
        for (name, node) in &self.sequence {
            let ctx = NodeContext {
                node_name: name.clone(),
                scope: scope.clone(),
                chunk_sender: chunk_sender.clone(),
            };
            tracing::debug!(node = %name, refs = state.message_refs.len(), "running node");
            let update = node.run(state.clone(), ctx).await?;
            state.apply(update);
        }
        Ok(state)
    }
}

/// Errors raised by graph construction.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// A node was registered after the first execution froze the topology.
    #[error("graph already compiled; cannot register node {node:?}")]
    #[diagnostic(
        code(chatloom::graph::already_compiled),
        help("Register feature nodes before the first ask/ask_stream call.")
    )]
    AlreadyCompiled { node: String },

    /// A node name collides with an existing registration or a built-in.
    #[error("node name {node:?} is already taken")]
    #[diagnostic(code(chatloom::graph::duplicate_node))]
    DuplicateNode { node: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TurnUpdate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNode(Arc<AtomicUsize>);

    #[async_trait]
    impl TurnNode for CountingNode {
        async fn run(
            &self,
            _state: TurnState,
            _ctx: NodeContext,
        ) -> Result<TurnUpdate, NodeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TurnUpdate::new())
        }
    }

    fn counting_graph() -> (TurnGraph, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = TurnGraph::new(
            Arc::new(CountingNode(Arc::clone(&counter))),
            Arc::new(CountingNode(Arc::clone(&counter))),
        );
        (graph, counter)
    }

    #[tokio::test]
    async fn executes_builtins_around_feature_nodes() {
        let (mut graph, counter) = counting_graph();
        graph
            .register("feature_a", CountingNode(Arc::clone(&counter)))
            .unwrap();
        let compiled = graph.ensure_compiled();
        compiled
            .execute(TurnState::default(), None, None)
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn registration_after_compile_fails() {
        let (mut graph, counter) = counting_graph();
        graph.ensure_compiled();
        let err = graph
            .register("late", CountingNode(counter))
            .unwrap_err();
        assert!(matches!(err, GraphError::AlreadyCompiled { .. }));
    }

    #[tokio::test]
    async fn ensure_compiled_is_idempotent() {
        let (mut graph, _) = counting_graph();
        let first = graph.ensure_compiled();
        let second = graph.ensure_compiled();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn builtin_names_are_reserved() {
        let (mut graph, counter) = counting_graph();
        let err = graph
            .register(PREPARE_TURN, CountingNode(counter))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }
}
