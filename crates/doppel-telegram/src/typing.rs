//! Telegram typing indicator.
//!
//! Telegram's typing status expires after ~5 seconds, so for longer
//! windows the action is refreshed every 4 s until the duration elapses.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;

/// Refresh interval for the typing action.
const REFRESH: Duration = Duration::from_secs(4);

/// Show "typing…" in `chat_id` for roughly `duration_ms`. Fire-and-forget;
/// send errors are ignored (the indicator is cosmetic).
pub fn show_typing(bot: Bot, chat_id: ChatId, duration_ms: u64) {
    tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(duration_ms);
        loop {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
            if tokio::time::Instant::now() + REFRESH >= deadline {
                break;
            }
            tokio::time::sleep(REFRESH).await;
        }
    });
}
