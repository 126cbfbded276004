//! SQLite-backed message and checkpoint storage.
//!
//! One [`SqliteStore`] owns a single connection pool and implements both
//! store traits, so messages and checkpoints for a conversation live in the
//! same database file. The schema is ensured on connect; checkpoint writes
//! use `INSERT OR REPLACE` so re-saving a `(scope, checkpoint_id)` row is
//! idempotent. Timestamps are stored as RFC3339 text, which sorts
//! chronologically and backs the keyset pagination of both tables.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointState, LATEST_CHECKPOINT_ID,
};
use crate::config::EngineConfig;
use crate::message::StoredMessage;
use crate::persistence::{encode_timestamp, from_json, parse_timestamp, to_json, PersistedCheckpoint};
use crate::stores::{
    decode_key, encode_key, CheckpointListQuery, CheckpointPage, CheckpointStore,
    ConversationScope, MessagePage, MessageQuery, MessageStore, StoreError, DEFAULT_LIST_LIMIT,
    DEFAULT_QUERY_LIMIT,
};

use async_trait::async_trait;
use chrono::Utc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    content TEXT NOT NULL,
    is_from_user INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (user_id, conversation_id, created_at, id);
CREATE TABLE IF NOT EXISTS checkpoints (
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL,
    state_json TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, conversation_id, checkpoint_id)
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_user
    ON checkpoints (user_id, created_at);
"#;

/// Durable store over a single SQLite pool, implementing both
/// [`MessageStore`] and [`CheckpointStore`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to the given database URL and ensures the schema exists.
    ///
    /// For `sqlite://` file URLs the database file (and its parent
    /// directories) are created first, since the driver will not create
    /// them on its own.
    #[instrument(skip_all, fields(url = %database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            bootstrap_db_file(path)?;
        }
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::unavailable(format!("connect: {e}")))?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("ensure schema: {e}")))?;
        Ok(Self { pool })
    }

    /// Connects using the database name resolved by [`EngineConfig`].
    pub async fn from_config(config: &EngineConfig) -> Result<Self, StoreError> {
        let url = format!("sqlite://{}", config.sqlite_db_name);
        Self::connect(&url).await
    }
}

fn bootstrap_db_file(path: &str) -> Result<(), StoreError> {
    let path = std::path::Path::new(path);
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::unavailable(format!("create db directory: {e}")))?;
    }
    std::fs::File::create(path)
        .map_err(|e| StoreError::unavailable(format!("create db file: {e}")))?;
    Ok(())
}

fn db_err(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::unavailable(format!("{context}: {e}"))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::unavailable(format!("column {name}: {e}")))
}

fn row_to_message(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
    Ok(StoredMessage {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        conversation_id: column(row, "conversation_id")?,
        content: column(row, "content")?,
        is_from_user: column::<i64>(row, "is_from_user")? != 0,
        created_at: parse_timestamp(&column::<String>(row, "created_at")?),
        last_modified: parse_timestamp(&column::<String>(row, "last_modified")?),
    })
}

fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint, StoreError> {
    let persisted = PersistedCheckpoint {
        user_id: column(row, "user_id")?,
        conversation_id: column(row, "conversation_id")?,
        checkpoint_id: column(row, "checkpoint_id")?,
        created_at: column(row, "created_at")?,
        state: from_json(&column::<String>(row, "state_json")?, "state_json")?,
        metadata: from_json(&column::<String>(row, "metadata_json")?, "metadata_json")?,
    };
    Ok(Checkpoint::from(persisted))
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn get(
        &self,
        scope: &ConversationScope,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, conversation_id, content, is_from_user, created_at, last_modified
             FROM messages WHERE user_id = ?1 AND conversation_id = ?2 AND id = ?3",
        )
        .bind(&scope.user_id)
        .bind(&scope.conversation_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get message", e))?;
        row.as_ref().map(row_to_message).transpose()
    }

    #[instrument(skip(self, message), fields(id = %message.id), err)]
    async fn put(&self, message: StoredMessage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO messages
             (id, user_id, conversation_id, content, is_from_user, created_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.conversation_id)
        .bind(&message.content)
        .bind(i64::from(message.is_from_user))
        .bind(encode_timestamp(message.created_at))
        .bind(encode_timestamp(message.last_modified))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("put message", e))?;
        Ok(())
    }

    async fn query_by_conversation(
        &self,
        scope: &ConversationScope,
        query: MessageQuery,
    ) -> Result<MessagePage, StoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1) as i64;
        let order = if query.ascending { "ASC" } else { "DESC" };
        let cursor = query.cursor.as_deref().and_then(decode_key);

        let mut sql = String::from(
            "SELECT id, user_id, conversation_id, content, is_from_user, created_at, last_modified
             FROM messages WHERE user_id = ?1 AND conversation_id = ?2",
        );
        if cursor.is_some() {
            let cmp = if query.ascending { ">" } else { "<" };
            sql.push_str(&format!(
                " AND (created_at {cmp} ?3 OR (created_at = ?3 AND id {cmp} ?4))"
            ));
            sql.push_str(&format!(
                " ORDER BY created_at {order}, id {order} LIMIT ?5"
            ));
        } else {
            sql.push_str(&format!(
                " ORDER BY created_at {order}, id {order} LIMIT ?3"
            ));
        }

        let mut q = sqlx::query(&sql)
            .bind(&scope.user_id)
            .bind(&scope.conversation_id);
        if let Some((ts, id)) = cursor {
            q = q.bind(ts.to_string()).bind(id.to_string());
        }
        // Fetch one extra row to learn whether another page exists.
        let rows = q
            .bind(limit + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("query messages", e))?;

        let mut items: Vec<StoredMessage> = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<_, _>>()?;
        let next_cursor = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items
                .last()
                .map(|m| encode_key(&encode_timestamp(m.created_at), &m.id))
        } else {
            None
        };
        Ok(MessagePage { items, next_cursor })
    }

    async fn update_content(
        &self,
        scope: &ConversationScope,
        message_id: &str,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET content = ?4, last_modified = ?5
             WHERE user_id = ?1 AND conversation_id = ?2 AND id = ?3",
        )
        .bind(&scope.user_id)
        .bind(&scope.conversation_id)
        .bind(message_id)
        .bind(content)
        .bind(encode_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("update message", e))?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(scope, message_id).await
    }

    #[instrument(skip(self), fields(user = %scope.user_id, conversation = %scope.conversation_id), err)]
    async fn delete_conversation(&self, scope: &ConversationScope) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("begin delete", e))?;
        let deleted = sqlx::query(
            "DELETE FROM messages WHERE user_id = ?1 AND conversation_id = ?2",
        )
        .bind(&scope.user_id)
        .bind(&scope.conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("delete messages", e))?
        .rows_affected();
        sqlx::query("DELETE FROM checkpoints WHERE user_id = ?1 AND conversation_id = ?2")
            .bind(&scope.user_id)
            .bind(&scope.conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("delete checkpoints", e))?;
        tx.commit().await.map_err(|e| db_err("commit delete", e))?;
        Ok(deleted)
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_latest(
        &self,
        scope: &ConversationScope,
    ) -> Result<Option<(CheckpointState, CheckpointMetadata)>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, conversation_id, checkpoint_id, state_json, metadata_json, created_at
             FROM checkpoints
             WHERE user_id = ?1 AND conversation_id = ?2 AND checkpoint_id = ?3",
        )
        .bind(&scope.user_id)
        .bind(&scope.conversation_id)
        .bind(LATEST_CHECKPOINT_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get latest checkpoint", e))?;
        match row {
            Some(row) => {
                let cp = row_to_checkpoint(&row)?;
                Ok(Some((cp.state, cp.metadata)))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, state, metadata),
        fields(
            user = %scope.user_id,
            conversation = %scope.conversation_id,
            checkpoint = %checkpoint_id,
            refs = state.message_refs.len(),
        ),
        err
    )]
    async fn put(
        &self,
        scope: &ConversationScope,
        checkpoint_id: &str,
        state: CheckpointState,
        metadata: CheckpointMetadata,
    ) -> Result<(), StoreError> {
        let state_json = to_json(&state, "state_json")?;
        let metadata_json = to_json(&metadata, "metadata_json")?;
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (user_id, conversation_id, checkpoint_id, state_json, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&scope.user_id)
        .bind(&scope.conversation_id)
        .bind(checkpoint_id)
        .bind(state_json)
        .bind(metadata_json)
        .bind(encode_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("put checkpoint", e))?;
        Ok(())
    }

    async fn list(
        &self,
        scope: &ConversationScope,
        query: CheckpointListQuery,
    ) -> Result<CheckpointPage, StoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1) as i64;
        let start = query.start_key.as_deref().and_then(decode_key);

        let mut sql = String::from(
            "SELECT user_id, conversation_id, checkpoint_id, state_json, metadata_json, created_at
             FROM checkpoints WHERE user_id = ?1 AND conversation_id = ?2",
        );
        if start.is_some() {
            sql.push_str(
                " AND (created_at < ?3 OR (created_at = ?3 AND checkpoint_id < ?4))
                 ORDER BY created_at DESC, checkpoint_id DESC LIMIT ?5",
            );
        } else {
            sql.push_str(" ORDER BY created_at DESC, checkpoint_id DESC LIMIT ?3");
        }

        let mut q = sqlx::query(&sql)
            .bind(&scope.user_id)
            .bind(&scope.conversation_id);
        if let Some((ts, id)) = start {
            q = q.bind(ts.to_string()).bind(id.to_string());
        }
        let rows = q
            .bind(limit + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("list checkpoints", e))?;

        let mut checkpoints: Vec<Checkpoint> = rows
            .iter()
            .map(row_to_checkpoint)
            .collect::<Result<_, _>>()?;
        let last_key = if checkpoints.len() > limit as usize {
            checkpoints.truncate(limit as usize);
            checkpoints
                .last()
                .map(|cp| encode_key(&encode_timestamp(cp.created_at), &cp.checkpoint_id))
        } else {
            None
        };
        Ok(CheckpointPage {
            checkpoints,
            last_key,
        })
    }
}
