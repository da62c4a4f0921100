use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use tracing::{info, warn};

use doppel_channels::{
    Channel, ChannelError, ChannelEvent, ChannelStatus, ContactInfo, OutboundContent, SendResult,
};
use doppel_core::config::TelegramConfig;
use doppel_core::types::ChannelId;

use crate::handler::handle_message;
use crate::send;
use crate::typing;

/// Telegram channel adapter.
///
/// `connect` validates the token, spawns the long-polling dispatcher in a
/// background task, and returns; the dispatcher runs until `disconnect`.
pub struct TelegramChannel {
    bot: Bot,
    config: TelegramConfig,
    events: tokio::sync::mpsc::Sender<ChannelEvent>,
    status: RwLock<ChannelStatus>,
    shutdown: Mutex<Option<ShutdownToken>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, events: tokio::sync::mpsc::Sender<ChannelEvent>) -> Self {
        Self {
            bot: Bot::new(&config.bot_token),
            config,
            events,
            status: RwLock::new(ChannelStatus::Disconnected),
            shutdown: Mutex::new(None),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().unwrap() = status.clone();
        // Status events are best-effort; a full pipeline queue only means
        // the observer misses one transition.
        let _ = self.events.try_send(ChannelEvent::Status {
            channel: ChannelId::Telegram,
            status,
        });
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Telegram
    }

    fn display_name(&self) -> &str {
        "Telegram"
    }

    fn icon(&self) -> &str {
        "telegram"
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().unwrap().clone()
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);

        // Validate the token before claiming to be connected.
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        info!(
            bot = %me.user.username.as_deref().unwrap_or("?"),
            "Telegram token validated, starting long-polling dispatcher"
        );

        let handler = Update::filter_message().endpoint(handle_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.events.clone(), self.config.clone()])
            .default_handler(|_upd| async {})
            .build();

        *self.shutdown.lock().unwrap() = Some(dispatcher.shutdown_token());
        tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        self.set_status(ChannelStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        let token = self.shutdown.lock().unwrap().take();
        if let Some(token) = token {
            match token.shutdown() {
                Ok(wait) => wait.await,
                Err(e) => warn!(error = %e, "Telegram dispatcher was not running"),
            }
        }
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_message(&self, to: &str, content: &OutboundContent) -> SendResult {
        let chat_id: i64 = match to.parse() {
            Ok(id) => id,
            Err(_) => return SendResult::failed(format!("invalid Telegram chat id: {to}")),
        };
        send::send_text(&self.bot, ChatId(chat_id), &content.text).await
    }

    async fn send_typing_indicator(&self, to: &str, duration_ms: u64) {
        let Ok(chat_id) = to.parse::<i64>() else {
            return;
        };
        typing::show_typing(self.bot.clone(), ChatId(chat_id), duration_ms);
    }

    async fn get_contacts(&self) -> Result<Vec<ContactInfo>, ChannelError> {
        // The Bot API exposes no contact directory; chats are discovered
        // as they message the bot.
        Ok(Vec::new())
    }

    async fn get_contact(&self, contact_id: &str) -> Result<ContactInfo, ChannelError> {
        // The Bot API offers no name lookup outside an active chat; the
        // chat id is the identity. Group chat ids are negative.
        let chat_id: i64 = contact_id
            .parse()
            .map_err(|_| ChannelError::UnknownContact(contact_id.to_string()))?;
        Ok(ContactInfo {
            contact_id: contact_id.to_string(),
            display_name: None,
            phone_number: None,
            is_group: chat_id < 0,
        })
    }

    fn normalize_contact_id(&self, raw: &str) -> String {
        raw.trim().trim_start_matches('@').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> TelegramChannel {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        TelegramChannel::new(
            TelegramConfig {
                bot_token: "123:abc".into(),
                operator_user_id: None,
                skip_groups: true,
            },
            tx,
        )
    }

    #[test]
    fn starts_disconnected() {
        let ch = channel();
        assert_eq!(ch.status(), ChannelStatus::Disconnected);
        assert!(!ch.is_connected());
    }

    #[test]
    fn normalize_strips_at_prefix() {
        let ch = channel();
        assert_eq!(ch.normalize_contact_id("@alice"), "alice");
        assert_eq!(ch.normalize_contact_id(" 12345 "), "12345");
    }

    #[tokio::test]
    async fn send_rejects_non_numeric_chat_id() {
        let ch = channel();
        let result = ch
            .send_message("not-a-chat", &OutboundContent::text("hi"))
            .await;
        assert!(!result.ok);
    }
}
