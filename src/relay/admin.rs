//! Admin command layer.
//!
//! Every command re-checks the caller against the admins table before doing
//! anything. A caller who is not an admin gets no response at all, so
//! probing users can't tell these commands exist.

use tracing::{debug, error, info};

use super::engine::{admin_record, RelayEngine};
use super::fanout::{fan_out, FanOutReport};
use super::store::StoreError;
use super::text;

/// A parsed admin command. Id arguments stay raw until the caller has been
/// authorized, so non-admins never see parse errors either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Stats,
    /// Text of the message the command replied to, if any.
    Forall { replied_text: Option<String> },
    Block(String),
    Unblock(String),
    AddAdmin(String),
    RemoveAdmin(String),
    SetWelcome(String),
    Help,
}

impl AdminCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Forall { .. } => "forall",
            Self::Block(_) => "block",
            Self::Unblock(_) => "unblock",
            Self::AddAdmin(_) => "addadmin",
            Self::RemoveAdmin(_) => "removeadmin",
            Self::SetWelcome(_) => "setwelcome",
            Self::Help => "help",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    Missing,
    NotAnId(String),
}

/// Parse the first whitespace-separated token of `raw` as a user id.
pub fn parse_user_id(raw: &str) -> Result<i64, ArgError> {
    let token = raw.split_whitespace().next().ok_or(ArgError::Missing)?;
    token.parse::<i64>().map_err(|_| ArgError::NotAnId(token.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Caller is not an admin; nothing was sent.
    Unauthorized,
    /// Bad or missing argument; the admin was told.
    Rejected,
    /// `/forall` outside a reply; nothing was sent.
    Skipped,
    Completed,
    Broadcast(FanOutReport),
}

impl RelayEngine {
    pub async fn handle_admin_command(&self, caller: i64, command: AdminCommand) -> Result<CommandOutcome, StoreError> {
        // A failed lookup is refused as silently as a non-admin.
        match self.is_admin(caller) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Ignoring /{} from non-admin {}", command.name(), caller);
                return Ok(CommandOutcome::Unauthorized);
            }
            Err(e) => {
                error!("Could not check admin rights of {} for /{}: {e}", caller, command.name());
                return Ok(CommandOutcome::Unauthorized);
            }
        }

        match command {
            AdminCommand::Stats => self.stats(caller).await,
            AdminCommand::Forall { replied_text } => self.forall(caller, replied_text).await,
            AdminCommand::Block(ref raw) => match self.id_argument(caller, &command, raw).await {
                Some(user_id) => self.block(caller, user_id).await,
                None => Ok(CommandOutcome::Rejected),
            },
            AdminCommand::Unblock(ref raw) => match self.id_argument(caller, &command, raw).await {
                Some(user_id) => self.unblock(caller, user_id).await,
                None => Ok(CommandOutcome::Rejected),
            },
            AdminCommand::AddAdmin(ref raw) => match self.id_argument(caller, &command, raw).await {
                Some(user_id) => self.add_admin(caller, user_id).await,
                None => Ok(CommandOutcome::Rejected),
            },
            AdminCommand::RemoveAdmin(ref raw) => match self.id_argument(caller, &command, raw).await {
                Some(user_id) => self.remove_admin(caller, user_id).await,
                None => Ok(CommandOutcome::Rejected),
            },
            AdminCommand::SetWelcome(welcome) => self.set_welcome(caller, welcome.trim()).await,
            AdminCommand::Help => {
                self.notify(caller, text::HELP, None).await;
                Ok(CommandOutcome::Completed)
            }
        }
    }

    async fn id_argument(&self, caller: i64, command: &AdminCommand, raw: &str) -> Option<i64> {
        match parse_user_id(raw) {
            Ok(user_id) => Some(user_id),
            Err(ArgError::Missing) => {
                self.notify(caller, &text::usage(command.name(), "<user id>"), None).await;
                None
            }
            Err(ArgError::NotAnId(token)) => {
                self.notify(caller, &text::invalid_user_id(&token), None).await;
                None
            }
        }
    }

    async fn stats(&self, caller: i64) -> Result<CommandOutcome, StoreError> {
        let users = self.db.users()?;
        for chunk in text::split_message(&text::stats_report(&users), text::MAX_MESSAGE_CHARS) {
            self.notify(caller, &chunk, None).await;
        }
        Ok(CommandOutcome::Completed)
    }

    /// Send the replied-to text to every registered user. Admins are only
    /// included if they registered as users themselves.
    async fn forall(&self, caller: i64, replied_text: Option<String>) -> Result<CommandOutcome, StoreError> {
        let Some(message) = replied_text else {
            debug!("/forall from {} without a replied message", caller);
            return Ok(CommandOutcome::Skipped);
        };

        let recipients = self.db.user_ids()?;
        info!("📢 Admin {} broadcasting to {} user(s)", caller, recipients.len());

        let report = fan_out(recipients, self.limits, |user_id| {
            let message = message.as_str();
            async move { self.transport.send_text(user_id, message, None).await }
        })
        .await;

        info!("📢 Broadcast done: {} delivered, {} failed", report.delivered, report.failed);
        self.notify(caller, &text::broadcast_done(report.delivered), None).await;
        Ok(CommandOutcome::Broadcast(report))
    }

    async fn block(&self, caller: i64, user_id: i64) -> Result<CommandOutcome, StoreError> {
        self.db.block(user_id)?;
        info!("🚫 Admin {} blocked {}", caller, user_id);
        self.notify(caller, &text::blocked(user_id), None).await;
        Ok(CommandOutcome::Completed)
    }

    async fn unblock(&self, caller: i64, user_id: i64) -> Result<CommandOutcome, StoreError> {
        let was_blocked = self.db.unblock(user_id)?;
        info!("✅ Admin {} unblocked {} (was blocked: {})", caller, user_id, was_blocked);
        self.notify(caller, &text::unblocked(user_id), None).await;
        Ok(CommandOutcome::Completed)
    }

    /// Grant admin rights, refreshing name and handle if already an admin.
    async fn add_admin(&self, caller: i64, user_id: i64) -> Result<CommandOutcome, StoreError> {
        let identity = self.resolve_or_placeholder(user_id).await;
        self.db.upsert_admin(&admin_record(&identity))?;
        info!("👑 Admin {} added admin {} ({})", caller, identity.display_name, user_id);
        self.notify(caller, &text::admin_added(&identity), None).await;
        Ok(CommandOutcome::Completed)
    }

    async fn remove_admin(&self, caller: i64, user_id: i64) -> Result<CommandOutcome, StoreError> {
        let was_admin = self.db.remove_admin(user_id)?;
        info!("Admin {} removed admin {} (was admin: {})", caller, user_id, was_admin);
        self.notify(caller, &text::admin_removed(user_id), None).await;
        Ok(CommandOutcome::Completed)
    }

    async fn set_welcome(&self, caller: i64, welcome: &str) -> Result<CommandOutcome, StoreError> {
        self.db.set_welcome_text(welcome)?;
        info!("Admin {} updated the welcome text ({} chars)", caller, welcome.chars().count());
        self.notify(caller, text::WELCOME_SAVED, None).await;
        Ok(CommandOutcome::Completed)
    }
}
