//! Outbound side of the chat transport.
//!
//! Flows describe what to send with [`OutMessage`]; [`TelegramMessenger`]
//! turns that into Bot API requests. Text is always MarkdownV2.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton,
    KeyboardMarkup, KeyboardRemove, MessageId, ParseMode, ReplyMarkup,
};
use thiserror::Error;

use crate::bot::intent::CallbackAction;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("file download failed: {0}")]
    Download(#[from] teloxide::DownloadError),
    #[error("recipient {0} is unreachable")]
    Unreachable(i64),
}

pub type MessengerResult<T> = Result<T, MessengerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Keyboard {
    #[default]
    None,
    Inline(Vec<Vec<Button>>),
    /// One-time reply keyboard with a single "share contact" button.
    ShareContact(String),
    /// Hides a previously shown reply keyboard.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutMessage {
    /// MarkdownV2 text, already escaped.
    pub text: String,
    pub keyboard: Keyboard,
}

impl OutMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn buttons(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.keyboard = Keyboard::Inline(rows);
        self
    }

    pub fn keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }

    /// Every callback action attached to this message, row by row.
    pub fn actions(&self) -> Vec<&CallbackAction> {
        match &self.keyboard {
            Keyboard::Inline(rows) => rows.iter().flatten().map(|b| &b.action).collect(),
            _ => Vec::new(),
        }
    }
}

/// Address of a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: i64, message: OutMessage) -> MessengerResult<MessageRef>;

    /// Sends a photo already held by the transport, identified by `file_id`.
    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: OutMessage,
    ) -> MessengerResult<MessageRef>;

    /// Replaces the caption of a sent photo, dropping its buttons unless
    /// `caption` carries new ones.
    async fn edit_caption(&self, target: MessageRef, caption: OutMessage) -> MessengerResult<()>;

    /// Replaces the text of a sent message, with the same button rule.
    async fn edit_text(&self, target: MessageRef, message: OutMessage) -> MessengerResult<()>;

    /// Acknowledges a button press, optionally with a short ephemeral notice.
    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) -> MessengerResult<()>;

    async fn download(&self, file_id: &str) -> MessengerResult<Vec<u8>>;
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn reply_markup(keyboard: Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Inline(rows) => {
            let rows: Vec<Vec<InlineKeyboardButton>> = rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|b| InlineKeyboardButton::callback(b.label, b.action.to_string()))
                        .collect()
                })
                .collect();
            Some(ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows)))
        }
        Keyboard::ShareContact(label) => {
            let button = KeyboardButton::new(label).request(ButtonRequest::Contact);
            Some(ReplyMarkup::Keyboard(
                KeyboardMarkup::new(vec![vec![button]])
                    .resize_keyboard(true)
                    .one_time_keyboard(true),
            ))
        }
        Keyboard::Remove => Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
    }
}

fn inline_markup(keyboard: Keyboard) -> Option<InlineKeyboardMarkup> {
    match reply_markup(keyboard) {
        Some(ReplyMarkup::InlineKeyboard(markup)) => Some(markup),
        _ => None,
    }
}

fn message_ref(message: &Message) -> MessageRef {
    MessageRef {
        chat_id: message.chat.id.0,
        message_id: message.id.0,
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, chat_id: i64, message: OutMessage) -> MessengerResult<MessageRef> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), message.text)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(markup) = reply_markup(message.keyboard) {
            request = request.reply_markup(markup);
        }
        let sent = request.await?;
        Ok(message_ref(&sent))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: OutMessage,
    ) -> MessengerResult<MessageRef> {
        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::file_id(file_id))
            .caption(caption.text)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(markup) = reply_markup(caption.keyboard) {
            request = request.reply_markup(markup);
        }
        let sent = request.await?;
        Ok(message_ref(&sent))
    }

    async fn edit_caption(&self, target: MessageRef, caption: OutMessage) -> MessengerResult<()> {
        let mut request = self
            .bot
            .edit_message_caption(ChatId(target.chat_id), MessageId(target.message_id))
            .caption(caption.text)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(markup) = inline_markup(caption.keyboard) {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    async fn edit_text(&self, target: MessageRef, message: OutMessage) -> MessengerResult<()> {
        let mut request = self
            .bot
            .edit_message_text(
                ChatId(target.chat_id),
                MessageId(target.message_id),
                message.text,
            )
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(markup) = inline_markup(message.keyboard) {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) -> MessengerResult<()> {
        let mut request = self.bot.answer_callback_query(callback_id);
        if let Some(text) = notice {
            request = request.text(text).show_alert(alert);
        }
        request.await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> MessengerResult<Vec<u8>> {
        let file = self.bot.get_file(file_id).await?;
        let mut bytes = Vec::new();
        self.bot.download_file(&file.path, &mut bytes).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_keyboard_encodes_actions() {
        let markup = reply_markup(Keyboard::Inline(vec![vec![
            Button::new("Approve", CallbackAction::Approve(7)),
            Button::new("Reject", CallbackAction::Reject(7)),
        ]]));

        let payloads: Vec<String> = match markup {
            Some(ReplyMarkup::InlineKeyboard(markup)) => markup.inline_keyboard[0]
                .iter()
                .filter_map(|b| match &b.kind {
                    teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => {
                        Some(data.clone())
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        assert_eq!(payloads, vec!["approve_7", "reject_7"]);
    }

    #[test]
    fn test_plain_message_has_no_markup() {
        assert!(reply_markup(Keyboard::None).is_none());
        assert!(matches!(
            reply_markup(Keyboard::Remove),
            Some(ReplyMarkup::KeyboardRemove(_))
        ));
    }

    #[test]
    fn test_actions_lists_buttons_in_order() {
        let message = OutMessage::new("pick").buttons(vec![
            vec![Button::new("1", CallbackAction::Lesson(1))],
            vec![Button::new("menu", CallbackAction::LessonsMenu)],
        ]);
        assert_eq!(
            message.actions(),
            vec![&CallbackAction::Lesson(1), &CallbackAction::LessonsMenu]
        );
    }
}
