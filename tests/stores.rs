mod common;

use chatloom::checkpoint::{CheckpointMetadata, CheckpointState, LATEST_CHECKPOINT_ID};
use chatloom::message::{MessageRef, StoredMessage};
use chatloom::stores::{
    CheckpointListQuery, CheckpointStore, ConversationScope, InMemoryCheckpointStore,
    InMemoryMessageStore, MessageQuery, MessageStore,
};

fn scope() -> ConversationScope {
    ConversationScope::new("user-1", "conv-1")
}

fn state_with(ids: &[&str]) -> CheckpointState {
    CheckpointState::new(ids.iter().map(|id| MessageRef::user(*id)).collect())
}

#[tokio::test]
async fn get_latest_is_none_for_fresh_conversations() {
    let store = InMemoryCheckpointStore::new();
    assert!(store.get_latest(&scope()).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_overwrite_is_idempotent() {
    let store = InMemoryCheckpointStore::new();
    let state = state_with(&["m1", "m2"]);

    store
        .put(
            &scope(),
            LATEST_CHECKPOINT_ID,
            state.clone(),
            CheckpointMetadata::turn(1, 2),
        )
        .await
        .unwrap();
    store
        .put(
            &scope(),
            LATEST_CHECKPOINT_ID,
            state.clone(),
            CheckpointMetadata::turn(1, 2),
        )
        .await
        .unwrap();

    let (loaded, metadata) = store.get_latest(&scope()).await.unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(metadata.step, 1);

    let page = store
        .list(&scope(), CheckpointListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.checkpoints.len(), 1);
    assert!(page.last_key.is_none());
}

#[tokio::test]
async fn list_is_most_recent_first_and_pages_with_last_key() {
    let store = InMemoryCheckpointStore::new();
    for i in 0..3 {
        store
            .put(
                &scope(),
                &format!("cp-{i}"),
                state_with(&["m1"]),
                CheckpointMetadata::turn(i + 1, 1),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let first = store
        .list(
            &scope(),
            CheckpointListQuery {
                limit: Some(2),
                start_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.checkpoints.len(), 2);
    assert_eq!(first.checkpoints[0].checkpoint_id, "cp-2");
    assert_eq!(first.checkpoints[1].checkpoint_id, "cp-1");
    let last_key = first.last_key.expect("more pages remain");

    let second = store
        .list(
            &scope(),
            CheckpointListQuery {
                limit: Some(2),
                start_key: Some(last_key),
            },
        )
        .await
        .unwrap();
    assert_eq!(second.checkpoints.len(), 1);
    assert_eq!(second.checkpoints[0].checkpoint_id, "cp-0");
    assert!(second.last_key.is_none());
}

#[tokio::test]
async fn overwrite_restamps_the_ordering_timestamp() {
    let store = InMemoryCheckpointStore::new();
    store
        .put(
            &scope(),
            "cp-a",
            state_with(&["m1"]),
            CheckpointMetadata::turn(1, 1),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store
        .put(
            &scope(),
            "cp-b",
            state_with(&["m1"]),
            CheckpointMetadata::turn(2, 1),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    // Re-saving cp-a moves it back to the front of the listing.
    store
        .put(
            &scope(),
            "cp-a",
            state_with(&["m1", "m2"]),
            CheckpointMetadata::turn(3, 1),
        )
        .await
        .unwrap();

    let page = store
        .list(&scope(), CheckpointListQuery::default())
        .await
        .unwrap();
    let ids: Vec<&str> = page
        .checkpoints
        .iter()
        .map(|cp| cp.checkpoint_id.as_str())
        .collect();
    assert_eq!(ids, vec!["cp-a", "cp-b"]);
}

#[tokio::test]
async fn message_query_pages_in_both_directions() {
    let store = InMemoryMessageStore::new();
    let scope = scope();
    let mut ids = Vec::new();
    for i in 0..5 {
        let message = StoredMessage::from_user(&scope, &format!("msg {i}"));
        ids.push(message.id.clone());
        store.put(message).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    // Ascending, paged by 2.
    let mut collected = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .query_by_conversation(
                &scope,
                MessageQuery {
                    limit: Some(2),
                    cursor,
                    ascending: true,
                },
            )
            .await
            .unwrap();
        collected.extend(page.items.into_iter().map(|m| m.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(collected, ids);

    // Descending, single page.
    let page = store
        .query_by_conversation(
            &scope,
            MessageQuery {
                limit: Some(10),
                cursor: None,
                ascending: false,
            },
        )
        .await
        .unwrap();
    let newest_first: Vec<String> = page.items.into_iter().map(|m| m.id).collect();
    let mut reversed = ids.clone();
    reversed.reverse();
    assert_eq!(newest_first, reversed);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn update_content_stamps_last_modified() {
    let store = InMemoryMessageStore::new();
    let scope = scope();
    let message = StoredMessage::from_user(&scope, "original");
    let id = message.id.clone();
    store.put(message).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let updated = store
        .update_content(&scope, &id, "edited")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.content, "edited");
    assert!(updated.last_modified > updated.created_at);

    assert!(store
        .update_content(&scope, "no-such-id", "x")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn delete_conversation_reports_removed_count() {
    let store = InMemoryMessageStore::new();
    let scope = scope();
    store
        .put(StoredMessage::from_user(&scope, "one"))
        .await
        .unwrap();
    store
        .put(StoredMessage::from_assistant(&scope, "two"))
        .await
        .unwrap();

    assert_eq!(store.delete_conversation(&scope).await.unwrap(), 2);
    assert_eq!(store.delete_conversation(&scope).await.unwrap(), 0);
    let page = store
        .query_by_conversation(&scope, MessageQuery::default())
        .await
        .unwrap();
    assert!(page.items.is_empty());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chatloom::stores::SqliteStore;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteStore {
        let path = dir.path().join("chatloom-test.db");
        SqliteStore::connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn message_roundtrip_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let scope = scope();

        let user = StoredMessage::from_user(&scope, "hello");
        let assistant = StoredMessage::from_assistant(&scope, "hi there");
        MessageStore::put(&store, user.clone()).await.unwrap();
        MessageStore::put(&store, assistant.clone()).await.unwrap();

        let fetched = store.get(&scope, &user.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
        assert!(fetched.is_from_user);

        let page = store
            .query_by_conversation(
                &scope,
                MessageQuery {
                    limit: Some(10),
                    cursor: None,
                    ascending: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, user.id);
        assert_eq!(page.items[1].id, assistant.id);
    }

    #[tokio::test]
    async fn message_query_cursor_pages_through_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let scope = scope();
        let mut ids = Vec::new();
        for i in 0..5 {
            let message = StoredMessage::from_user(&scope, &format!("msg {i}"));
            ids.push(message.id.clone());
            MessageStore::put(&store, message).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let mut collected = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .query_by_conversation(
                    &scope,
                    MessageQuery {
                        limit: Some(2),
                        cursor,
                        ascending: true,
                    },
                )
                .await
                .unwrap();
            collected.extend(page.items.into_iter().map(|m| m.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(collected, ids);
    }

    #[tokio::test]
    async fn latest_checkpoint_roundtrip_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let state = state_with(&["m1", "m2"]);

        for _ in 0..2 {
            CheckpointStore::put(
                &store,
                &scope(),
                LATEST_CHECKPOINT_ID,
                state.clone(),
                CheckpointMetadata::turn(1, 2),
            )
            .await
            .unwrap();
        }

        let (loaded, metadata) = store.get_latest(&scope()).await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(metadata.step, 1);
        assert_eq!(metadata.source, "loop");

        let page = store
            .list(&scope(), CheckpointListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.checkpoints.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_listing_pages_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        for i in 0..3 {
            CheckpointStore::put(
                &store,
                &scope(),
                &format!("cp-{i}"),
                state_with(&["m1"]),
                CheckpointMetadata::turn(i + 1, 1),
            )
            .await
            .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let first = store
            .list(
                &scope(),
                CheckpointListQuery {
                    limit: Some(2),
                    start_key: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.checkpoints.len(), 2);
        assert_eq!(first.checkpoints[0].checkpoint_id, "cp-2");
        let last_key = first.last_key.expect("more pages remain");

        let second = store
            .list(
                &scope(),
                CheckpointListQuery {
                    limit: Some(2),
                    start_key: Some(last_key),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.checkpoints.len(), 1);
        assert_eq!(second.checkpoints[0].checkpoint_id, "cp-0");
        assert!(second.last_key.is_none());
    }

    #[tokio::test]
    async fn update_content_and_missing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let scope = scope();
        let message = StoredMessage::from_user(&scope, "original");
        let id = message.id.clone();
        MessageStore::put(&store, message).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let updated = store
            .update_content(&scope, &id, "edited")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "edited");
        assert!(updated.last_modified > updated.created_at);
        assert!(store
            .update_content(&scope, "missing", "x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_conversation_removes_messages_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let scope = scope();
        MessageStore::put(&store, StoredMessage::from_user(&scope, "one"))
            .await
            .unwrap();
        CheckpointStore::put(
            &store,
            &scope,
            LATEST_CHECKPOINT_ID,
            state_with(&["m1"]),
            CheckpointMetadata::turn(1, 1),
        )
        .await
        .unwrap();

        let deleted = store.delete_conversation(&scope).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_latest(&scope).await.unwrap().is_none());
    }
}
