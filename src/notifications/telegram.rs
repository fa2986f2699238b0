//! Telegram delivery via teloxide
//!
//! Signals, closures and alerts are pushed to one chat. Send failures are
//! logged and dropped; the engine never waits on Telegram.

use super::types::Notification;
use super::Notifier;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, String> {
        if bot_token.is_empty() {
            return Err("Bot token is empty".to_string());
        }
        let chat_id_parsed: i64 = chat_id
            .parse()
            .map_err(|e| format!("Invalid chat ID '{}': {}", chat_id, e))?;

        Ok(Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id_parsed),
        })
    }

    fn format(&self, notification: &Notification) -> String {
        match notification {
            Notification::NewSignal {
                trade_id,
                symbol,
                exchange,
                strength,
                reasons,
                entry_price,
                take_profit,
                stop_loss,
                is_real_trade,
            } => {
                let stars = "⭐".repeat((*strength).max(1));
                let title = if *is_real_trade {
                    "🚨 Real trade opened 🚨"
                } else {
                    "✅ New buy signal"
                };
                let tp_percent = (take_profit - entry_price) / entry_price * 100.0;
                let sl_percent = (entry_price - stop_loss) / entry_price * 100.0;
                format!(
                    "<b>{title} | {symbol}</b>\n\
                     🔹 Exchange: {exchange}\n\
                     {stars} Strategies: {reasons}\n\n\
                     📈 Entry: <code>{entry_price:.6}</code>\n\
                     🎯 Target: <code>{take_profit:.6}</code> (+{tp_percent:.2}%)\n\
                     🛑 Stop: <code>{stop_loss:.6}</code> (-{sl_percent:.2}%)\n\n\
                     Trade #{trade_id}"
                )
            }
            Notification::TrailingActivated { trade_id, symbol } => format!(
                "<b>🚀 Profit secured | #{trade_id} {symbol}</b>\n\n\
                 Stop-loss raised to the entry price.\n\
                 <b>This trade is now risk-free, let the profit run!</b>"
            ),
            Notification::TrailingManualAction {
                trade_id,
                symbol,
                current_price,
                new_stop,
            } => format!(
                "<b>🔔 Stop-loss update needed (real trade)</b>\n\n\
                 Trade: #{trade_id} {symbol}\n\
                 Price reached <code>{current_price:.6}</code>.\n\
                 Suggested action: move the stop order to <code>{new_stop:.6}</code>."
            ),
            _ => notification.summary(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: Notification) {
        let message = self.format(&notification);
        if let Err(e) = self
            .bot
            .send_message(self.chat_id, message)
            .parse_mode(ParseMode::Html)
            .send()
            .await
        {
            logger::warning(
                LogTag::Notify,
                &format!("Failed to send Telegram notification: {}", e),
            );
        }
    }
}
