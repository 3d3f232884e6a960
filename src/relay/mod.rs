//! Relay module - mediates between anonymous users and the admin team.

pub mod admin;
pub mod engine;
pub mod fanout;
pub mod session;
pub mod store;
pub mod telegram;
pub mod text;
pub mod transport;


pub use admin::{AdminCommand, CommandOutcome};
pub use engine::{AdminTextOutcome, RelayEngine, TextOutcome, UserTextOutcome};
pub use fanout::{FanOutLimits, FanOutReport};
pub use session::SessionTracker;
pub use store::{Database, StoreError};
pub use telegram::TelegramTransport;
pub use transport::{Identity, InlineAction, SendError, Transport};
