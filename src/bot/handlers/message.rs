use teloxide::prelude::*;

use crate::bot::commands::Command;
use crate::bot::events::{Actor, Inbound};
use crate::bot::handlers::HandlerResult;
use crate::services::router;
use crate::services::AppContext;

/// Sender of `msg`; `None` for channel posts and other anonymous messages.
pub fn actor_from_message(msg: &Message) -> Option<Actor> {
    let user = msg.from()?;
    Some(Actor {
        user_id: user.id.0 as i64,
        chat_id: msg.chat.id.0,
        username: user.username.clone(),
        display_name: user.full_name(),
    })
}

/// Classifies a non-command message. A shared contact wins over text, and a
/// photo is reduced to its largest size.
pub fn inbound_from_message(msg: &Message) -> Inbound {
    if let Some(contact) = msg.contact() {
        return Inbound::Contact {
            phone: contact.phone_number.clone(),
        };
    }
    if let Some(largest) = msg
        .photo()
        .and_then(|sizes| sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height)))
    {
        return Inbound::Photo {
            file_id: largest.file.id.clone(),
        };
    }
    match msg.text() {
        Some(text) => Inbound::Text(text.to_string()),
        None => Inbound::Unsupported,
    }
}

pub async fn command_handler(msg: Message, cmd: Command, ctx: AppContext) -> HandlerResult {
    if let Some(actor) = actor_from_message(&msg) {
        router::handle_event(&ctx, &actor, Inbound::Command(cmd)).await;
    }
    Ok(())
}

pub async fn message_handler(msg: Message, ctx: AppContext) -> HandlerResult {
    let Some(actor) = actor_from_message(&msg) else {
        return Ok(());
    };
    router::handle_event(&ctx, &actor, inbound_from_message(&msg)).await;
    Ok(())
}
