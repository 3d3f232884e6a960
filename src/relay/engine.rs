//! Relay engine - routes user messages to admins and admin replies back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::fanout::{fan_out, FanOutLimits, FanOutReport};
use super::session::SessionTracker;
use super::store::{Database, StoreError, UserRecord};
use super::text;
use super::transport::{Identity, InlineAction, SendError, Transport};

/// What happened to a private text message from a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTextOutcome {
    /// Sender is blocked; they were told so and nothing was relayed.
    Refused,
    /// Sender had not pressed "send"; the message was dropped.
    Ignored,
    /// Relayed to the current admins.
    Relayed(FanOutReport),
}

/// What happened to a private text message from an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTextOutcome {
    /// No pending reply target.
    NotReplying,
    Delivered { to: i64 },
    Failed { to: i64 },
}

/// Result of routing one private text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    Reply(AdminTextOutcome),
    User(UserTextOutcome),
}

pub struct RelayEngine {
    pub(super) db: Database,
    pub(super) sessions: SessionTracker,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) limits: FanOutLimits,
    default_welcome: String,
}

impl RelayEngine {
    pub fn new(db: Database, sessions: SessionTracker, transport: Arc<dyn Transport>) -> Self {
        Self {
            db,
            sessions,
            transport,
            limits: FanOutLimits::default(),
            default_welcome: text::DEFAULT_WELCOME.to_string(),
        }
    }

    pub fn with_limits(mut self, limits: FanOutLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_default_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.default_welcome = welcome.into();
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Send a prompt or confirmation. These are fire-and-forget: a failure is
    /// logged and never changes the outcome of the operation.
    pub(super) async fn notify(&self, to: i64, text: &str, action: Option<InlineAction>) {
        if let Err(e) = self.transport.send_text(to, text, action).await {
            warn!("Failed to notify {}: {e}", to);
        }
    }

    // ==================== DATA ACCESS ====================

    /// Record `user` on first contact. Returns whether a new record was made;
    /// later calls for the same id leave the original record untouched.
    pub fn register_user(&self, user: &Identity) -> Result<bool, StoreError> {
        let inserted = self.db.insert_user_if_absent(&UserRecord {
            user_id: user.user_id,
            display_name: user.display_name.clone(),
            handle: user.handle.clone(),
            first_seen: Utc::now(),
        })?;
        if inserted {
            info!("👤 New user: {} ({})", user.display_name, user.user_id);
        }
        Ok(inserted)
    }

    /// Always read from the store, so a block takes effect immediately.
    pub fn is_blocked(&self, user_id: i64) -> Result<bool, StoreError> {
        self.db.is_blocked(user_id)
    }

    /// Always read from the store; admin rights are never cached.
    pub fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        self.db.is_admin(user_id)
    }

    pub fn welcome_text(&self) -> Result<String, StoreError> {
        Ok(self.db.welcome_text()?.unwrap_or_else(|| self.default_welcome.clone()))
    }

    /// Seed the configured admin ids. Existing admin records are kept.
    pub async fn seed_admins(&self, admin_ids: &[i64]) -> Result<usize, StoreError> {
        let mut added = 0;
        for &user_id in admin_ids {
            if self.db.is_admin(user_id)? {
                continue;
            }
            let identity = self.resolve_or_placeholder(user_id).await;
            if self.db.insert_admin_if_absent(&admin_record(&identity))? {
                info!("Seeded admin {} ({})", identity.display_name, user_id);
                added += 1;
            }
        }
        Ok(added)
    }

    pub(super) async fn resolve_or_placeholder(&self, user_id: i64) -> Identity {
        match self.transport.resolve_identity(user_id).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Could not resolve user {}: {e}", user_id);
                Identity {
                    user_id,
                    display_name: user_id.to_string(),
                    handle: None,
                }
            }
        }
    }

    // ==================== EVENTS ====================

    /// `/start`: register the user and greet them with the send button.
    pub async fn on_start(&self, user: &Identity) -> Result<(), StoreError> {
        self.register_user(user)?;
        let welcome = self.welcome_text()?;
        self.notify(user.user_id, &welcome, Some(InlineAction::SendMessage)).await;
        Ok(())
    }

    /// Route an inline button press. Unknown callback data is ignored.
    pub async fn on_button(&self, from: i64, data: &str) {
        match InlineAction::parse(data) {
            Some(InlineAction::SendMessage) => self.on_user_button_send(from).await,
            Some(InlineAction::Reply(target)) => self.on_admin_button_reply(from, target).await,
            None => debug!("Ignoring unknown callback data {:?} from {}", data, from),
        }
    }

    pub async fn on_user_button_send(&self, user_id: i64) {
        self.sessions.set_awaiting(user_id, true).await;
        self.notify(user_id, text::PROMPT_TYPE_MESSAGE, None).await;
    }

    /// Arm reply mode. The presser must still be an admin; stale buttons left
    /// in a removed admin's chat do nothing. The target is not checked here;
    /// an unreachable target surfaces when the reply is sent.
    pub async fn on_admin_button_reply(&self, admin_id: i64, target_user_id: i64) {
        match self.is_admin(admin_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Ignoring reply button from non-admin {}", admin_id);
                return;
            }
            Err(e) => {
                warn!("Could not check admin rights of {}: {e}", admin_id);
                return;
            }
        }

        self.sessions.set_reply_target(admin_id, target_user_id).await;
        info!("↩️ Admin {} is replying to {}", admin_id, target_user_id);
        self.notify(admin_id, text::PROMPT_TYPE_REPLY, None).await;
    }

    /// Route a private text message. A pending reply session takes the
    /// message first; otherwise it goes down the user path. Never both.
    pub async fn on_private_text(&self, sender: &Identity, text: &str) -> Result<TextOutcome, StoreError> {
        match self.on_admin_text(sender.user_id, text).await {
            AdminTextOutcome::NotReplying => Ok(TextOutcome::User(self.on_user_text(sender, text).await?)),
            outcome => Ok(TextOutcome::Reply(outcome)),
        }
    }

    pub async fn on_user_text(&self, sender: &Identity, text: &str) -> Result<UserTextOutcome, StoreError> {
        if self.is_blocked(sender.user_id)? {
            info!("🚫 Refused message from blocked user {}", sender.user_id);
            self.notify(sender.user_id, text::USER_BLOCKED, None).await;
            return Ok(UserTextOutcome::Refused);
        }

        if !self.sessions.take_awaiting(sender.user_id).await {
            return Ok(UserTextOutcome::Ignored);
        }

        let admins = match self.db.admin_ids() {
            Ok(admins) => admins,
            Err(e) => {
                // Re-arm so the user's next attempt is still relayed.
                self.sessions.set_awaiting(sender.user_id, true).await;
                return Err(e);
            }
        };

        let preview: String = text.chars().take(100).collect();
        info!("📨 Relaying from {} ({}) to {} admin(s): {:?}", sender.display_name, sender.user_id, admins.len(), preview);

        let relayed = text::relayed_message(sender, text);
        let button = Some(InlineAction::Reply(sender.user_id));
        let report = fan_out(admins, self.limits, |admin_id| {
            let relayed = relayed.as_str();
            async move { self.transport.send_text(admin_id, relayed, button).await }
        })
        .await;

        if report.delivered == 0 {
            warn!("Message from {} reached no admin ({} failed)", sender.user_id, report.failed);
        }

        self.notify(sender.user_id, text::USER_CONFIRMATION, Some(InlineAction::SendMessage)).await;
        Ok(UserTextOutcome::Relayed(report))
    }

    /// Deliver an admin's message to their pending reply target. The session
    /// is consumed before sending, so a failed reply needs a new button press.
    pub async fn on_admin_text(&self, admin_id: i64, text: &str) -> AdminTextOutcome {
        let Some(target) = self.sessions.take_reply_target(admin_id).await else {
            return AdminTextOutcome::NotReplying;
        };

        let sent = match tokio::time::timeout(self.limits.send_timeout, self.transport.send_text(target, text, None)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout),
        };

        match sent {
            Ok(()) => {
                info!("✉️ Admin {} replied to {}", admin_id, target);
                self.notify(admin_id, text::REPLY_SENT, None).await;
                AdminTextOutcome::Delivered { to: target }
            }
            Err(e) => {
                warn!("Reply from admin {} to {} failed: {e}", admin_id, target);
                self.notify(admin_id, text::REPLY_FAILED, None).await;
                AdminTextOutcome::Failed { to: target }
            }
        }
    }
}

pub(super) fn admin_record(identity: &Identity) -> super::store::AdminRecord {
    super::store::AdminRecord {
        user_id: identity.user_id,
        display_name: identity.display_name.clone(),
        handle: identity.handle.clone(),
    }
}
