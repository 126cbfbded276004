//! Engine configuration.
//!
//! Small value struct resolved once at construction. The SQLite database
//! name can come from the environment (a `.env` file is honored via
//! dotenvy) so deployments pick their file without code changes.

/// Environment variable naming the SQLite database file.
pub const SQLITE_DB_ENV: &str = "CHATLOOM_SQLITE_DB";

const DEFAULT_SQLITE_DB: &str = "chatloom.db";
const DEFAULT_STREAM_BUFFER: usize = 32;
const DEFAULT_HISTORY_PAGE_LIMIT: u32 = 500;

/// Tunables for [`crate::engine::ConversationEngine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Database file used by [`crate::stores::SqliteStore::from_config`].
    pub sqlite_db_name: String,
    /// Capacity of the bounded chunk channel behind `ask_stream`. A full
    /// channel suspends the model-reading side until the consumer catches
    /// up; a dropped consumer cancels further model reads.
    pub stream_buffer_capacity: usize,
    /// Page size for the bulk conversation read that reconstructs history.
    pub history_page_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sqlite_db_name: Self::resolve_sqlite_db_name(),
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER,
            history_page_limit: DEFAULT_HISTORY_PAGE_LIMIT,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the database file name from `CHATLOOM_SQLITE_DB`, loading a
    /// `.env` file first if one exists. Falls back to `chatloom.db`.
    #[must_use]
    pub fn resolve_sqlite_db_name() -> String {
        dotenvy::dotenv().ok();
        std::env::var(SQLITE_DB_ENV).unwrap_or_else(|_| DEFAULT_SQLITE_DB.to_string())
    }

    #[must_use]
    pub fn with_sqlite_db_name(mut self, name: impl Into<String>) -> Self {
        self.sqlite_db_name = name.into();
        self
    }

    #[must_use]
    pub fn with_stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_history_page_limit(mut self, limit: u32) -> Self {
        self.history_page_limit = limit.max(1);
        self
    }
}
