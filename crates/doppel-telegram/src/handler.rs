//! Telegram message handler registered in the teloxide Dispatcher.

use teloxide::prelude::*;
use tracing::{debug, warn};

use doppel_channels::ChannelEvent;
use doppel_core::config::TelegramConfig;
use doppel_core::types::{ChannelId, MediaType, NormalizedMessage, MESSAGE_SCHEMA_VERSION};

/// Runs for every incoming `Message`. Performs:
/// 1. Bot-message filter
/// 2. Group guard (when `skip_groups` is set)
/// 3. Operator detection → from-me event
/// 4. Normalization → inbound event
pub async fn handle_message(
    msg: Message,
    events: tokio::sync::mpsc::Sender<ChannelEvent>,
    config: TelegramConfig,
) -> ResponseResult<()> {
    // 1. Ignore messages from other bots.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let is_group = msg.chat.is_group() || msg.chat.is_supergroup();
    if is_group && config.skip_groups {
        debug!(chat = %msg.chat.id, "skipping group message");
        return Ok(());
    }

    let timestamp_ms = msg.date.timestamp_millis();

    // 2. The operator answering from their own account pauses the
    //    conversation; their text never enters the reply pipeline.
    if config.operator_user_id == Some(from.id.0) {
        let event = ChannelEvent::FromMe {
            channel: ChannelId::Telegram,
            contact_id: msg.chat.id.to_string(),
            content: msg.text().or(msg.caption()).map(String::from),
            timestamp_ms,
        };
        if events.send(event).await.is_err() {
            warn!("pipeline event channel closed, dropping from-me event");
        }
        return Ok(());
    }

    // 3. Extract text (or caption for media messages).
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let media_type = media_type_of(&msg);
    if text.is_empty() && media_type == MediaType::Text {
        return Ok(());
    }

    let metadata = serde_json::json!({
        "is_group": is_group,
        "display_name": from.full_name(),
        "username": from.username.clone(),
    });

    let normalized = NormalizedMessage {
        id: format!("tg-{}-{}", msg.chat.id, msg.id.0),
        version: MESSAGE_SCHEMA_VERSION,
        channel: Some(ChannelId::Telegram),
        contact_id: msg.chat.id.to_string(),
        normalized_contact_id: None,
        content: text,
        timestamp_ms,
        media_type: Some(media_type),
        media_url: None,
        reply_to: msg
            .reply_to_message()
            .map(|r| format!("tg-{}-{}", r.chat.id, r.id.0)),
        metadata: Some(metadata),
    };

    if events.send(ChannelEvent::Inbound(normalized)).await.is_err() {
        warn!("pipeline event channel closed, dropping inbound message");
    }
    Ok(())
}

fn media_type_of(msg: &Message) -> MediaType {
    if msg.photo().is_some() || msg.sticker().is_some() {
        MediaType::Image
    } else if msg.voice().is_some() || msg.audio().is_some() {
        MediaType::Audio
    } else if msg.video().is_some() || msg.video_note().is_some() {
        MediaType::Video
    } else if msg.document().is_some() {
        MediaType::Document
    } else {
        MediaType::Text
    }
}
