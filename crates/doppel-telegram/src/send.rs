//! Message sending helpers for the Telegram adapter.
//!
//! Telegram's message limit is 4096 characters; we split at 4090 for
//! safety. Failures come back as `SendResult` values — the pipeline
//! surfaces them in the activity feed and never retries automatically.

use teloxide::prelude::*;
use tracing::warn;

use doppel_channels::SendResult;

/// Maximum characters per Telegram message (limit is 4096; we use 4090 for safety).
const CHUNK_MAX: usize = 4090;

/// Send `text`, split into chunks when it exceeds the platform limit.
///
/// The returned `message_id` is the first chunk's id. A mid-sequence
/// failure reports failure even if earlier chunks went out — the operator
/// sees it and replays manually.
pub async fn send_text(bot: &Bot, chat_id: ChatId, text: &str) -> SendResult {
    let mut first_id: Option<String> = None;
    for chunk in split_chunks(text) {
        match bot.send_message(chat_id, chunk).await {
            Ok(sent) => {
                first_id.get_or_insert_with(|| sent.id.0.to_string());
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Telegram send failed");
                return SendResult::failed(e.to_string());
            }
        }
    }
    match first_id {
        Some(id) => SendResult::sent(id),
        None => SendResult::failed("empty message"),
    }
}

/// Split on line boundaries, hard-splitting any single oversized line.
fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        let cost = if current.is_empty() {
            line.len()
        } else {
            1 + line.len()
        };
        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
        }
        // A single line longer than the limit is split mid-line.
        if line.len() > CHUNK_MAX {
            let mut rest = line;
            while rest.len() > CHUNK_MAX {
                let split_at = floor_char_boundary(rest, CHUNK_MAX);
                chunks.push(rest[..split_at].to_string());
                rest = &rest[split_at..];
            }
            current = rest.to_string();
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Largest char boundary ≤ `index` (str::floor_char_boundary is unstable).
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_chunks("hello"), vec!["hello"]);
    }

    #[test]
    fn long_text_splits_on_line_boundaries() {
        let line = "x".repeat(3_000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= CHUNK_MAX);
        }
        assert_eq!(chunks.join("\n").replace('\n', ""), text.replace('\n', ""));
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "y".repeat(10_000);
        let chunks = split_chunks(&text);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_MAX));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_content_splits_on_char_boundaries() {
        let text = "é".repeat(5_000);
        for chunk in split_chunks(&text) {
            assert!(chunk.len() <= CHUNK_MAX);
            // Would panic on a broken boundary.
            let _ = chunk.chars().count();
        }
    }
}
