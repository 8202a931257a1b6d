//! Telegram notification implementation.
//!
//! Requires the `telegram` feature to be enabled.

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{Event, Notifier};

/// Configuration for Telegram notifier.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Chat ID to send notifications to.
    pub chat_id: i64,
    /// Whether to send alert events.
    pub notify_alerts: bool,
    /// Whether to send close and failure notices.
    pub notify_closes: bool,
}

impl TelegramConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .ok()
            .and_then(|s| s.parse().ok())?;

        Some(Self {
            bot_token,
            chat_id,
            notify_alerts: true,
            notify_closes: true,
        })
    }
}

/// Telegram notifier that sends messages to a chat.
pub struct TelegramNotifier {
    sender: mpsc::UnboundedSender<Event>,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier and spawn the background task.
    pub fn new(config: TelegramConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        // Spawn background task to handle messages
        tokio::spawn(telegram_worker(config, receiver));

        Self { sender }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, event: Event) {
        if self.sender.send(event).is_err() {
            warn!("Telegram notifier channel closed");
        }
    }
}

/// Background worker that sends Telegram messages.
async fn telegram_worker(config: TelegramConfig, mut receiver: mpsc::UnboundedReceiver<Event>) {
    let bot = Bot::new(&config.bot_token);
    let chat_id = ChatId(config.chat_id);

    info!(chat_id = config.chat_id, "Telegram notifier started");

    while let Some(event) = receiver.recv().await {
        let message = match &event {
            Event::Alert(e) if config.notify_alerts => {
                let edge = e
                    .last_edge
                    .map(|d| format!("{:.2}%", d * rust_decimal::Decimal::from(100)))
                    .unwrap_or_else(|| "n/a".to_string());
                Some(format!(
                    "⚠️ *Position Alert*\n\n\
                     Position: `{}`\n\
                     Strategy: {}\n\
                     Edge: {}\n\
                     Reason: {}",
                    e.position_id,
                    e.strategy,
                    escape_markdown(&edge),
                    escape_markdown(&e.reason)
                ))
            }
            Event::PositionClosed(e) if config.notify_closes => {
                let emoji = if e.realized_pnl >= rust_decimal::Decimal::ZERO {
                    "✅"
                } else {
                    "🔻"
                };
                Some(format!(
                    "{} *Position Closed*\n\n\
                     Position: `{}`\n\
                     Strategy: {}\n\
                     Reason: {}\n\
                     Fill: {}\n\
                     PnL: ${}",
                    emoji,
                    e.position_id,
                    e.strategy,
                    escape_markdown(&e.reason),
                    escape_markdown(&e.fill_price.to_string()),
                    escape_markdown(&e.realized_pnl.to_string())
                ))
            }
            Event::PositionFailed(e) if config.notify_closes => Some(format!(
                "🚨 *POSITION FAILED*\n\n\
                 Position: `{}`\n\
                 Strategy: {}\n\
                 Reason: {}\n\n\
                 Manual intervention required\\.",
                e.position_id,
                e.strategy,
                escape_markdown(&e.reason)
            )),
            Event::StreamDown { kind, reason } => Some(format!(
                "📡 *Stream Down*\n\n\
                 Stream: {}\n\
                 Reason: {}",
                escape_markdown(&kind.to_string()),
                escape_markdown(reason)
            )),
            _ => None,
        };

        if let Some(text) = message {
            if let Err(e) = bot
                .send_message(chat_id, &text)
                .parse_mode(ParseMode::MarkdownV2)
                .await
            {
                error!(error = %e, "Failed to send Telegram message");
            }
        }
    }

    warn!("Telegram worker shutting down");
}

/// Escape special characters for Telegram MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = ['_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!'];
    let mut result = String::with_capacity(text.len() * 2);

    for c in text.chars() {
        if special_chars.contains(&c) {
            result.push('\\');
        }
        result.push(c);
    }

    result
}
