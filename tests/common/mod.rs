#![allow(dead_code)]

pub mod gateway;

use std::sync::Arc;

use chatloom::config::EngineConfig;
use chatloom::engine::ConversationEngine;
use chatloom::gateway::ModelGateway;
use chatloom::stores::{
    CheckpointStore, InMemoryCheckpointStore, InMemoryMessageStore, MessageStore,
};

use self::gateway::ScriptedGateway;

/// Engine plus handles to its collaborators, so tests can inspect what the
/// turn left behind.
pub struct TestHarness {
    pub engine: ConversationEngine,
    pub messages: Arc<InMemoryMessageStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub gateway: Arc<ScriptedGateway>,
}

pub fn harness() -> TestHarness {
    let messages = Arc::new(InMemoryMessageStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = ConversationEngine::new(
        Arc::clone(&messages) as Arc<dyn MessageStore>,
        Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        Arc::clone(&gateway) as Arc<dyn ModelGateway>,
        EngineConfig::new().with_stream_buffer_capacity(4),
    );
    TestHarness {
        engine,
        messages,
        checkpoints,
        gateway,
    }
}
