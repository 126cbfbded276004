use async_trait::async_trait;

use crate::node::{NodeContext, NodeError, TurnNode, TurnUpdate};
use crate::state::TurnState;

/// Turn-setup built-in: clears any stale response text left on the state.
///
/// No store or gateway calls; refs pass through untouched.
pub struct PrepareTurn;

#[async_trait]
impl TurnNode for PrepareTurn {
    async fn run(&self, _state: TurnState, _ctx: NodeContext) -> Result<TurnUpdate, NodeError> {
        Ok(TurnUpdate::new().clear_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResponseUpdate;

    #[tokio::test]
    async fn clears_stale_response_without_touching_refs() {
        let mut state = TurnState::default();
        state.response_chunk = Some("leftover".into());
        let ctx = NodeContext {
            node_name: "prepare_turn".into(),
            scope: None,
            chunk_sender: None,
        };
        let update = PrepareTurn.run(state.clone(), ctx).await.unwrap();
        assert_eq!(update.response, Some(ResponseUpdate::Clear));
        assert!(update.message_refs.is_none());
        state.apply(update);
        assert_eq!(state.response_chunk, None);
    }
}
