//! In-memory conversation state: pending admin reply targets and users
//! waiting to type a message.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::debug;

/// Transient per-process session state.
///
/// Owned by the relay engine and shared through it; nothing here survives a
/// restart.
#[derive(Default)]
pub struct SessionTracker {
    /// admin id -> user id the admin's next message goes to
    reply_targets: Mutex<HashMap<i64, i64>>,
    /// users whose next text message is relayed to the admins
    awaiting: Mutex<HashSet<i64>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the admin's next message at `user_id`. Overwrites any earlier
    /// target.
    pub async fn set_reply_target(&self, admin_id: i64, user_id: i64) {
        let previous = self.reply_targets.lock().await.insert(admin_id, user_id);
        if let Some(previous) = previous.filter(|&p| p != user_id) {
            debug!("Admin {} replaced reply target {} with {}", admin_id, previous, user_id);
        }
    }

    /// Remove and return the admin's pending target.
    pub async fn take_reply_target(&self, admin_id: i64) -> Option<i64> {
        self.reply_targets.lock().await.remove(&admin_id)
    }

    pub async fn set_awaiting(&self, user_id: i64, awaiting: bool) {
        let mut set = self.awaiting.lock().await;
        if awaiting {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }

    pub async fn is_awaiting(&self, user_id: i64) -> bool {
        self.awaiting.lock().await.contains(&user_id)
    }

    /// Clear the flag and report whether it was set, in one step.
    pub async fn take_awaiting(&self, user_id: i64) -> bool {
        self.awaiting.lock().await.remove(&user_id)
    }
}
