//! Telegram transport using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::{ApiError, RequestError};
use tracing::{info, warn};

use super::text;
use super::transport::{Identity, InlineAction, SendError, Transport};

/// Telegram API client.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(action: InlineAction) -> InlineKeyboardMarkup {
    let label = match action {
        InlineAction::SendMessage => text::SEND_BUTTON,
        InlineAction::Reply(_) => text::REPLY_BUTTON,
    };
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(label, action.callback_data())]])
}

fn classify(chat_id: i64, error: RequestError) -> SendError {
    match error {
        RequestError::Api(ApiError::BotBlocked | ApiError::ChatNotFound | ApiError::UserDeactivated) => {
            SendError::Unreachable(chat_id, error.to_string())
        }
        other => SendError::Other(other.to_string()),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, to: i64, text: &str, action: Option<InlineAction>) -> Result<(), SendError> {
        let mut request = self.bot.send_message(ChatId(to), text);
        if let Some(action) = action {
            request = request.reply_markup(keyboard(action));
        }

        request.await.map(|_| ()).map_err(|e| {
            let err = classify(to, e);
            warn!("Failed to send to {}: {err}", to);
            err
        })
    }

    async fn resolve_identity(&self, user_id: i64) -> Result<Identity, SendError> {
        info!("Resolving identity of {}", user_id);
        let chat = self
            .bot
            .get_chat(ChatId(user_id))
            .await
            .map_err(|e| classify(user_id, e))?;

        let display_name = match (chat.first_name(), chat.last_name()) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.to_string(),
            _ => chat.title().map(str::to_string).unwrap_or_else(|| user_id.to_string()),
        };

        Ok(Identity {
            user_id,
            display_name,
            handle: chat.username().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_data(markup: &InlineKeyboardMarkup) -> Vec<String> {
        use teloxide::types::InlineKeyboardButtonKind;
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_send_keyboard() {
        let markup = keyboard(InlineAction::SendMessage);
        assert_eq!(callback_data(&markup), vec!["send".to_string()]);
        assert_eq!(markup.inline_keyboard[0][0].text, text::SEND_BUTTON);
    }

    #[test]
    fn test_reply_keyboard() {
        let markup = keyboard(InlineAction::Reply(42));
        assert_eq!(callback_data(&markup), vec!["reply:42".to_string()]);
        assert_eq!(markup.inline_keyboard[0][0].text, text::REPLY_BUTTON);
    }

    #[test]
    fn test_classify_unreachable() {
        let err = classify(5, RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, SendError::Unreachable(5, _)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify(5, RequestError::Api(ApiError::MessageTextIsEmpty));
        assert!(matches!(err, SendError::Other(_)));
    }
}
