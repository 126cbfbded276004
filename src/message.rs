use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stores::ConversationScope;

/// A message in a conversation, containing a role and text content.
///
/// This is the wire shape handed to the model gateway and returned from
/// [`crate::engine::ConversationEngine::create_message`]. It carries no
/// identity or timestamps; the durable record is [`StoredMessage`].
///
/// # Examples
///
/// ```
/// use chatloom::message::ChatMessage;
///
/// let user_msg = ChatMessage::user("What's the weather like?");
/// let assistant_msg = ChatMessage::assistant("It's sunny today!");
/// let system_msg = ChatMessage::system("You are a helpful assistant.");
///
/// assert!(user_msg.has_role(ChatMessage::USER));
/// assert!(!user_msg.has_role(ChatMessage::ASSISTANT));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    ///
    /// Use the constants on [`ChatMessage`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Builds a message by flattening structured content parts into one
    /// string (see [`crate::content::flatten_parts`]).
    #[must_use]
    pub fn from_parts(role: &str, parts: &[crate::content::ContentPart]) -> Self {
        Self::new(role, &crate::content::flatten_parts(parts))
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// A lightweight pointer to a stored message, as carried inside checkpoints.
///
/// Checkpoints never embed message content; they hold an ordered array of
/// refs whose position is the conversational order. A snapshot never holds
/// two refs with the same `message_id` (enforced by
/// [`crate::state::TurnState::push_ref`] and
/// [`crate::checkpoint::CheckpointState::new`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    /// Id of the referenced [`StoredMessage`].
    pub message_id: String,
    /// Whether the referenced message came from the user (vs. the assistant).
    pub is_from_user: bool,
}

impl MessageRef {
    /// Creates a ref pointing at a user-authored message.
    #[must_use]
    pub fn user(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            is_from_user: true,
        }
    }

    /// Creates a ref pointing at an assistant-authored message.
    #[must_use]
    pub fn assistant(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            is_from_user: false,
        }
    }
}

/// The durable message record held by a [`crate::stores::MessageStore`].
///
/// `content` is immutable once written except through
/// [`crate::stores::MessageStore::update_content`], which stamps
/// `last_modified`. The `user_id`/`conversation_id` pair is the partition
/// the conversation index is keyed by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub content: String,
    pub is_from_user: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl StoredMessage {
    /// Creates a fresh user-authored record with a new v4 id and current
    /// timestamps.
    #[must_use]
    pub fn from_user(scope: &ConversationScope, content: &str) -> Self {
        Self::fresh(scope, content, true)
    }

    /// Creates a fresh assistant-authored record with a new v4 id and current
    /// timestamps.
    #[must_use]
    pub fn from_assistant(scope: &ConversationScope, content: &str) -> Self {
        Self::fresh(scope, content, false)
    }

    fn fresh(scope: &ConversationScope, content: &str, is_from_user: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: scope.user_id.clone(),
            conversation_id: scope.conversation_id.clone(),
            content: content.to_string(),
            is_from_user,
            created_at: now,
            last_modified: now,
        }
    }

    /// The ref that points at this record.
    #[must_use]
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            message_id: self.id.clone(),
            is_from_user: self.is_from_user,
        }
    }

    /// Projects the durable record down to the wire shape sent to the model.
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        let role = if self.is_from_user {
            ChatMessage::USER
        } else {
            ChatMessage::ASSISTANT
        };
        ChatMessage::new(role, &self.content)
    }
}
