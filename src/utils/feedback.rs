use crate::bot::messenger::{MessageRef, Messenger, MessengerResult, OutMessage};
use crate::utils::markdown::escape_markdown;

/// Feedback types for different command outcomes
#[derive(Debug, Clone, Copy)]
pub enum FeedbackType {
    Success,
    Warning,
    Error,
    Info,
}

impl FeedbackType {
    fn emoji(&self) -> &'static str {
        match self {
            FeedbackType::Success => "✅",
            FeedbackType::Warning => "⚠️",
            FeedbackType::Error => "❌",
            FeedbackType::Info => "ℹ️",
        }
    }
}

/// Plain `message` prefixed with the emoji for `kind`, escaped for MarkdownV2.
pub fn format_feedback(kind: FeedbackType, message: &str) -> String {
    format!("{} {}", kind.emoji(), escape_markdown(message))
}

/// Short status replies to one chat.
pub struct CommandFeedback<'a> {
    messenger: &'a dyn Messenger,
    chat_id: i64,
}

impl<'a> CommandFeedback<'a> {
    pub fn new(messenger: &'a dyn Messenger, chat_id: i64) -> Self {
        Self { messenger, chat_id }
    }

    pub async fn send(&self, kind: FeedbackType, message: &str) -> MessengerResult<MessageRef> {
        self.messenger
            .send(self.chat_id, OutMessage::new(format_feedback(kind, message)))
            .await
    }

    pub async fn success(&self, message: &str) -> MessengerResult<MessageRef> {
        self.send(FeedbackType::Success, message).await
    }

    pub async fn error(&self, message: &str) -> MessengerResult<MessageRef> {
        self.send(FeedbackType::Error, message).await
    }

    pub async fn warning(&self, message: &str) -> MessengerResult<MessageRef> {
        self.send(FeedbackType::Warning, message).await
    }

    pub async fn info(&self, message: &str) -> MessengerResult<MessageRef> {
        self.send(FeedbackType::Info, message).await
    }

    /// Validation error with a hint on what to send instead
    pub async fn validation_error(&self, error: &str, suggestion: &str) -> MessengerResult<MessageRef> {
        let text = format!(
            "{}\n\n💡 {}",
            format_feedback(FeedbackType::Error, error),
            escape_markdown(suggestion)
        );
        self.messenger.send(self.chat_id, OutMessage::new(text)).await
    }
}
