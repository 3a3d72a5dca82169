use std::time::Duration;

use teloxide::{
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{ChatId, MessageId},
    ApiError, Bot, RequestError,
};

/// Telegram refuses messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Cut `text` so it fits into `max_chars` characters.
#[must_use]
pub fn truncate_for_telegram(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// A single reply message that gets edited as some long operation progresses,
/// and ends up saying how it all went.
pub struct StatusMessage {
    bot: Bot,
    chat_id: ChatId,
    reply_to: MessageId,
    message_id: Option<MessageId>,
    last_text: String,
}

impl StatusMessage {
    /// Reply to `reply_to` with `text`.
    pub async fn send(
        bot: &Bot,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> Result<StatusMessage, RequestError> {
        let mut status = StatusMessage {
            bot: bot.clone(),
            chat_id,
            reply_to,
            message_id: None,
            last_text: String::new(),
        };
        status.show(text).await?;
        Ok(status)
    }

    /// Show a progress step. Failures are only logged, since losing a progress
    /// line doesn't matter much.
    pub async fn update(&mut self, text: &str) {
        if let Err(e) = self.show(text).await {
            log::warn!("Failed to update status message: {e}");
        }
    }

    /// Show the final status, retrying a few times and falling back to a fresh
    /// message if editing keeps failing.
    pub async fn finish(&mut self, text: &str) -> Result<(), RequestError> {
        let mut looped: u8 = 0;
        loop {
            looped += 1;
            let result = self.show(text).await;

            match result {
                Ok(()) => return Ok(()),
                Err(RequestError::RetryAfter(secs)) if looped < 3 => {
                    tokio::time::sleep(secs.duration()).await;
                }
                Err(_) if looped < 3 => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    log::warn!("Editing the status failed, sending it anew: {e}");
                    self.message_id = None;
                    return self.show(text).await;
                }
            }
        }
    }

    async fn show(&mut self, text: &str) -> Result<(), RequestError> {
        let text = truncate_for_telegram(text, MAX_MESSAGE_CHARS);
        if self.message_id.is_some() && self.last_text == text {
            return Ok(());
        }

        match self.message_id {
            Some(message_id) => {
                let result = self
                    .bot
                    .edit_message_text(self.chat_id, message_id, text)
                    .await;
                match result {
                    Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => (),
                    Err(e) => return Err(e),
                }
            }
            None => {
                let message = self
                    .bot
                    .send_message(self.chat_id, text)
                    .reply_to(self.reply_to)
                    .await?;
                self.message_id = Some(message.id);
            }
        }

        self.last_text = text.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_for_telegram;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_for_telegram("hello", 5), "hello");
        assert_eq!(truncate_for_telegram("hello", 100), "hello");
        assert_eq!(truncate_for_telegram("", 3), "");
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        assert_eq!(truncate_for_telegram("hello world", 5), "hello");
        assert_eq!(truncate_for_telegram("hello!", 5), "hello");
        // Multibyte characters must not be split.
        assert_eq!(truncate_for_telegram("привет мир", 4), "прив");
        assert_eq!(truncate_for_telegram("abc", 0), "");
    }
}
