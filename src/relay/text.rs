//! User-facing prompts and message formatting.

use super::store::UserRecord;
use super::transport::Identity;

pub const DEFAULT_WELCOME: &str =
    "Hi there! 👋\nAnything you want to say, big or small, I'll pass it on to the admins 😉";
pub const SEND_BUTTON: &str = "✉️ Send a message";
pub const REPLY_BUTTON: &str = "✉️ Reply";

pub const PROMPT_TYPE_MESSAGE: &str = "Alright, I'm listening! Write whatever you want and I'll send it 🚀";
pub const PROMPT_TYPE_REPLY: &str = "📝 Write your message and it will be sent to the user:";
pub const USER_BLOCKED: &str = "🚫 Sorry! You are not allowed to send messages.";
pub const USER_CONFIRMATION: &str =
    "✅ Got it! Your message reached the admins.\nIf you have more to say, press the button below!";
pub const REPLY_SENT: &str = "✅ Your message was sent to the user.";
pub const REPLY_FAILED: &str = "❌ Delivery failed. The user may have blocked the bot or the chat is inactive.";
pub const NO_USERS: &str = "No users registered yet.";
pub const WELCOME_SAVED: &str = "✅ Welcome message saved.";
pub const INTERNAL_ERROR: &str = "⚠️ Something went wrong on our side. Please try again later.";

/// Stand-ins for absent values.
pub const NO_HANDLE: &str = "-";
pub const NO_TEXT: &str = "<no text>";

/// Telegram rejects messages longer than 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

pub const HELP: &str = "Admin commands:\n\
/stats - list registered users\n\
/forall - reply to a message with this to send it to every user\n\
/block <id> - stop relaying messages from a user\n\
/unblock <id> - allow a blocked user again\n\
/addadmin <id> - grant admin rights\n\
/removeadmin <id> - revoke admin rights\n\
/setwelcome <text> - change the /start greeting\n\
/help - show this list";

fn handle(handle: Option<&str>) -> String {
    match handle {
        Some(h) if !h.is_empty() => format!("@{h}"),
        _ => NO_HANDLE.to_string(),
    }
}

/// Message delivered to each admin when a user writes in.
pub fn relayed_message(sender: &Identity, text: &str) -> String {
    let body = if text.trim().is_empty() { NO_TEXT } else { text };
    format!(
        "📩 New message from {} ({} | {}):\n\n{}",
        sender.display_name,
        handle(sender.handle.as_deref()),
        sender.user_id,
        body
    )
}

/// One `/stats` line: `name | handle | id | first_seen`.
pub fn stats_line(user: &UserRecord) -> String {
    format!(
        "{} | {} | {} | {}",
        user.display_name,
        handle(user.handle.as_deref()),
        user.user_id,
        user.first_seen.format("%Y-%m-%d %H:%M")
    )
}

/// Full `/stats` report, or the empty-state message.
pub fn stats_report(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return NO_USERS.to_string();
    }
    let mut report = format!("📊 Users ({}):\n", users.len());
    for user in users {
        report.push_str(&stats_line(user));
        report.push('\n');
    }
    report
}

pub fn broadcast_done(delivered: usize) -> String {
    format!("📤 Message sent to {delivered} user(s).")
}

pub fn blocked(user_id: i64) -> String {
    format!("🚫 User {user_id} is blocked.")
}

pub fn unblocked(user_id: i64) -> String {
    format!("✅ User {user_id} is unblocked.")
}

pub fn admin_added(admin: &Identity) -> String {
    format!(
        "✅ {} ({} | {}) is now an admin.",
        admin.display_name,
        handle(admin.handle.as_deref()),
        admin.user_id
    )
}

pub fn admin_removed(user_id: i64) -> String {
    format!("✅ {user_id} was removed from the admins.")
}

pub fn usage(command: &str, argument: &str) -> String {
    format!("Usage: /{command} {argument}")
}

pub fn invalid_user_id(raw: &str) -> String {
    format!("❌ {raw:?} is not a valid user id.")
}

/// Split `text` on line boundaries into chunks of at most `max_chars`
/// characters. A single line longer than the limit is cut by characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();
        if current_len > 0 && current_len + 1 + line_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                if current_len > 0 {
                    chunks.push(std::mem::take(&mut current));
                }
                current = piece.iter().collect();
                current_len = piece.len();
            }
            continue;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
