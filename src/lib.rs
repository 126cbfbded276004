//! # Chatloom: checkpointed conversation-state engine
//!
//! Chatloom advances conversations one turn at a time. Given a user and a
//! conversation id, a turn loads the latest checkpoint (an ordered array of
//! message refs), appends the new user message, drives a model invocation
//! over the reconstructed history, persists the assistant reply, and
//! overwrites the conversation's `latest` checkpoint. Both single-shot
//! ([`engine::ConversationEngine::ask`]) and incremental
//! ([`engine::ConversationEngine::ask_stream`]) turns are supported.
//!
//! ## Core Concepts
//!
//! - **Messages**: durable records plus a role-tagged wire shape
//! - **Checkpoints**: content-free snapshots of conversational order
//! - **Turn graph**: compile-once chain of nodes advancing per-turn state
//! - **Stores**: narrow async traits with in-memory and SQLite backends
//! - **Gateway**: opaque boundary to the language model provider
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chatloom::config::EngineConfig;
//! use chatloom::engine::{AskRequest, ConversationEngine};
//! use chatloom::message::ChatMessage;
//! use chatloom::stores::{InMemoryCheckpointStore, InMemoryMessageStore};
//!
//! # use async_trait::async_trait;
//! # use chatloom::gateway::{ChunkStream, GatewayError, ModelGateway, ModelResponse};
//! # struct MyGateway;
//! # #[async_trait]
//! # impl ModelGateway for MyGateway {
//! #     async fn invoke(&self, _: &[ChatMessage]) -> Result<ModelResponse, GatewayError> {
//! #         Ok(ModelResponse { content: "hi".into() })
//! #     }
//! #     async fn stream(&self, _: &[ChatMessage]) -> Result<ChunkStream, GatewayError> {
//! #         Err(GatewayError::provider("unsupported"))
//! #     }
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ConversationEngine::new(
//!     Arc::new(InMemoryMessageStore::new()),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     Arc::new(MyGateway),
//!     EngineConfig::default(),
//! );
//!
//! let request = AskRequest::new(vec![ChatMessage::user("Hello!")], "user-1", "conv-1");
//! let reply = engine.ask(request).await?;
//! assert_eq!(reply.role, "assistant");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`message`] - Message types: wire shape, refs, durable records
//! - [`content`] - Structured content parts and flattening
//! - [`state`] - Transient per-turn state
//! - [`node`] - Turn node trait and execution primitives
//! - [`nodes`] - The two built-in nodes
//! - [`graph`] - Compile-once turn topology
//! - [`checkpoint`] - Checkpoint domain types
//! - [`stores`] - Storage traits and backends
//! - [`gateway`] - Model provider boundary
//! - [`engine`] - The orchestration surface
//! - [`config`] - Engine tunables
//! - [`telemetry`] - Tracing subscriber setup

pub mod checkpoint;
pub mod config;
pub mod content;
pub mod engine;
pub mod gateway;
pub mod graph;
pub mod message;
pub mod node;
pub mod nodes;
pub mod persistence;
pub mod state;
pub mod stores;
pub mod telemetry;
