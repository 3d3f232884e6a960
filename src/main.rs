mod config;
mod relay;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use relay::{AdminCommand, Database, FanOutLimits, Identity, RelayEngine, SessionTracker, StoreError, TelegramTransport};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
enum Command {
    #[command(description = "start the bot.")]
    Start,
    #[command(description = "list admin commands.")]
    Help,
    #[command(description = "list registered users.")]
    Stats,
    #[command(description = "reply to a message to send it to every user.")]
    Forall,
    #[command(description = "block a user id.")]
    Block(String),
    #[command(description = "unblock a user id.")]
    Unblock(String),
    #[command(description = "grant admin rights to a user id.")]
    AddAdmin(String),
    #[command(description = "revoke admin rights from a user id.")]
    RemoveAdmin(String),
    #[command(description = "change the /start greeting.")]
    SetWelcome(String),
}

#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("relaybot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting relaybot...");
    info!("Configured admin IDs: {:?}", config.admin_ids);

    let bot = Bot::new(&config.telegram_bot_token);

    let db = match Database::open(&config.database_path()) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let mut engine = RelayEngine::new(db, SessionTracker::new(), transport).with_limits(FanOutLimits {
        concurrency: config.broadcast_concurrency,
        send_timeout: config.send_timeout,
    });
    if let Some(welcome) = config.default_welcome.clone() {
        engine = engine.with_default_welcome(welcome);
    }

    match engine.seed_admins(&config.admin_ids).await {
        Ok(0) => {}
        Ok(added) => info!("Seeded {} admin(s) from config", added),
        Err(e) => {
            error!("Failed to seed admins: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let engine = Arc::new(engine);

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn sender_identity(msg: &Message) -> Option<Identity> {
    let user = msg.from.as_ref()?;
    Some(Identity {
        user_id: user.id.0 as i64,
        display_name: user.full_name(),
        handle: user.username.clone(),
    })
}

async fn report_internal_error(bot: &Bot, chat_id: ChatId, e: StoreError) {
    error!("Store error while handling update from {}: {e}", chat_id);
    if let Err(e) = bot.send_message(chat_id, relay::text::INTERNAL_ERROR).await {
        warn!("Failed to report error to {}: {e}", chat_id);
    }
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }
    let Some(sender) = sender_identity(&msg) else {
        return Ok(());
    };

    let command = match cmd {
        Command::Start => {
            if let Err(e) = engine.on_start(&sender).await {
                report_internal_error(&bot, msg.chat.id, e).await;
            }
            return Ok(());
        }
        Command::Help => AdminCommand::Help,
        Command::Stats => AdminCommand::Stats,
        Command::Forall => AdminCommand::Forall {
            replied_text: msg
                .reply_to_message()
                .and_then(|reply| reply.text())
                .map(str::to_string),
        },
        Command::Block(arg) => AdminCommand::Block(arg),
        Command::Unblock(arg) => AdminCommand::Unblock(arg),
        Command::AddAdmin(arg) => AdminCommand::AddAdmin(arg),
        Command::RemoveAdmin(arg) => AdminCommand::RemoveAdmin(arg),
        Command::SetWelcome(text) => AdminCommand::SetWelcome(text),
    };

    if let Err(e) = engine.handle_admin_command(sender.user_id, command).await {
        report_internal_error(&bot, msg.chat.id, e).await;
    }
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }
    let (Some(sender), Some(text)) = (sender_identity(&msg), msg.text()) else {
        return Ok(());
    };

    if let Err(e) = engine.on_private_text(&sender, text).await {
        report_internal_error(&bot, msg.chat.id, e).await;
    }
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    if let Some(data) = query.data.as_deref() {
        engine.on_button(query.from.id.0 as i64, data).await;
    }
    Ok(())
}
