//! Inbound chat events, stripped of transport details.

use crate::bot::commands::Command;
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::MessageRef;

/// Who sent an event and where replies go.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

impl Actor {
    /// Label used in log lines.
    pub fn label(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.display_name)
    }
}

/// The message that carried a pressed button.
#[derive(Debug, Clone)]
pub struct CallbackOrigin {
    pub message: MessageRef,
    /// Text or caption of that message, as plain text.
    pub text: Option<String>,
    /// Whether `text` is a media caption rather than a message body.
    pub is_caption: bool,
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Command(Command),
    Text(String),
    Contact { phone: String },
    /// Largest available size of an attached photo.
    Photo { file_id: String },
    /// A button press; `action` is `None` when the payload did not decode.
    Callback {
        id: String,
        action: Option<CallbackAction>,
        origin: Option<CallbackOrigin>,
    },
    /// Anything else: stickers, documents, voice notes.
    Unsupported,
}

impl Inbound {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Command(_) => "command",
            Inbound::Text(_) => "text",
            Inbound::Contact { .. } => "contact",
            Inbound::Photo { .. } => "photo",
            Inbound::Callback { .. } => "callback",
            Inbound::Unsupported => "unsupported",
        }
    }
}
