//! Boundary between the relay core and the messaging platform.

use async_trait::async_trait;

/// Who sent an event, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
}

/// Inline button attached to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineAction {
    /// "Send message" button shown to users.
    SendMessage,
    /// "Reply" button shown to admins under a relayed message.
    Reply(i64),
}

impl InlineAction {
    const SEND: &'static str = "send";
    const REPLY_PREFIX: &'static str = "reply:";

    pub fn callback_data(&self) -> String {
        match self {
            Self::SendMessage => Self::SEND.to_string(),
            Self::Reply(user_id) => format!("{}{}", Self::REPLY_PREFIX, user_id),
        }
    }

    /// Parse button callback data. Unknown or malformed data yields `None`.
    pub fn parse(data: &str) -> Option<Self> {
        if data == Self::SEND {
            return Some(Self::SendMessage);
        }
        data.strip_prefix(Self::REPLY_PREFIX)
            .and_then(|id| id.parse::<i64>().ok())
            .map(Self::Reply)
    }
}

/// A send the platform refused or never confirmed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Recipient blocked the bot, deleted the account or never started a chat.
    #[error("recipient {0} is unreachable: {1}")]
    Unreachable(i64, String),
    #[error("no response within the send timeout")]
    Timeout,
    #[error("transport error: {0}")]
    Other(String),
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, to: i64, text: &str, action: Option<InlineAction>) -> Result<(), SendError>;

    /// Look up the current name and handle of a user.
    async fn resolve_identity(&self, user_id: i64) -> Result<Identity, SendError>;
}
