use teloxide::prelude::*;

use crate::bot::events::{Actor, CallbackOrigin, Inbound};
use crate::bot::handlers::HandlerResult;
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::MessageRef;
use crate::services::router;
use crate::services::AppContext;

pub async fn callback_handler(q: CallbackQuery, ctx: AppContext) -> HandlerResult {
    let user_id = q.from.id.0 as i64;
    let chat_id = q.message.as_ref().map_or(user_id, |m| m.chat.id.0);

    let action = match q.data.as_deref() {
        Some(data) => match data.parse::<CallbackAction>() {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!("Callback from user {}: {}", user_id, e);
                None
            }
        },
        None => None,
    };

    let origin = q.message.as_ref().map(|m| CallbackOrigin {
        message: MessageRef {
            chat_id: m.chat.id.0,
            message_id: m.id.0,
        },
        text: m.caption().or_else(|| m.text()).map(str::to_string),
        is_caption: m.photo().is_some(),
    });

    let actor = Actor {
        user_id,
        chat_id,
        username: q.from.username.clone(),
        display_name: q.from.full_name(),
    };

    router::handle_event(
        &ctx,
        &actor,
        Inbound::Callback {
            id: q.id,
            action,
            origin,
        },
    )
    .await;
    Ok(())
}
