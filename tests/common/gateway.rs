use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use chatloom::gateway::{ChunkStream, GatewayError, ModelChunk, ModelGateway, ModelResponse};
use chatloom::message::ChatMessage;

/// One scripted model behavior, consumed in push order.
pub enum ScriptedReply {
    Text(String),
    Chunks(Vec<String>),
    Failure(String),
}

/// Gateway double that replays a script and records every call's history.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Text(text.to_string()));
    }

    pub fn push_chunks(&self, chunks: &[&str]) {
        self.script.lock().unwrap().push_back(ScriptedReply::Chunks(
            chunks.iter().map(|c| c.to_string()).collect(),
        ));
    }

    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Failure(message.to_string()));
    }

    /// Every history the engine sent, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self) -> ScriptedReply {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::Failure("script exhausted".into()))
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ModelResponse, GatewayError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.next() {
            ScriptedReply::Text(content) => Ok(ModelResponse { content }),
            ScriptedReply::Chunks(chunks) => Ok(ModelResponse {
                content: chunks.concat(),
            }),
            ScriptedReply::Failure(message) => Err(GatewayError::provider(message)),
        }
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, GatewayError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.next() {
            ScriptedReply::Chunks(chunks) => {
                let items: Vec<Result<ModelChunk, GatewayError>> = chunks
                    .into_iter()
                    .map(|content| Ok(ModelChunk { content }))
                    .collect();
                let s: ChunkStream = Box::pin(stream::iter(items));
                Ok(s)
            }
            ScriptedReply::Text(content) => {
                let s: ChunkStream = Box::pin(stream::iter(vec![Ok(ModelChunk { content })]));
                Ok(s)
            }
            ScriptedReply::Failure(message) => Err(GatewayError::provider(message)),
        }
    }
}
