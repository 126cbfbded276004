//! Opaque boundary to the language model provider.
//!
//! The engine never talks to a provider SDK directly; it sees only this
//! trait. Implementations own prompt assembly details, retries, and
//! transport. Streams returned by [`ModelGateway::stream`] are finite and
//! not restartable: once a chunk is consumed it is gone.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use thiserror::Error;

use crate::message::ChatMessage;

/// A complete, single-shot model reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: String,
}

/// One incremental piece of a streamed reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelChunk {
    pub content: String,
}

/// Finite stream of reply chunks. Yields an error in place of a chunk when
/// the provider fails mid-stream.
pub type ChunkStream = BoxStream<'static, Result<ModelChunk, GatewayError>>;

/// Capability contract for invoking the language model.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Request one complete reply for the given ordered history.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ModelResponse, GatewayError>;

    /// Request an incremental reply for the given ordered history.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, GatewayError>;
}

/// Model-side failures. Propagated unchanged through the turn; the core
/// never retries.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error("model provider error: {message}")]
    #[diagnostic(code(chatloom::gateway::provider))]
    Provider { message: String },
}

impl GatewayError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }
}
