//! Single entry point from the transport into the flows.
//!
//! Every event runs under one user's session lock: the actor's, or for an
//! approve/reject button the registrant's. Callback queries are answered
//! exactly once here, after the flow decides on the acknowledgement.

use anyhow::Result;

use crate::bot::commands::Command;
use crate::bot::events::{Actor, CallbackOrigin, Inbound};
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::{MessengerError, OutMessage};
use crate::database::models::Decision;
use crate::services::session::Session;
use crate::services::{admin, lessons, registration, Ack, AppContext};
use crate::utils::feedback::{format_feedback, FeedbackType};
use crate::utils::logging::log_command_start;
use crate::utils::markdown::escape_markdown;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Handles one inbound event end to end. Never fails: errors are logged,
/// and the user gets a generic message unless the transport itself failed.
pub async fn handle_event(ctx: &AppContext, actor: &Actor, event: Inbound) {
    tracing::debug!(
        "Event {} from {}({}) in chat {}",
        event.kind(),
        actor.label(),
        actor.user_id,
        actor.chat_id
    );

    let outcome = match event {
        Inbound::Callback { id, action, origin } => {
            handle_callback(ctx, actor, &id, action, origin).await
        }
        other => {
            let mut session = ctx.sessions.lock(actor.user_id).await;
            let outcome = handle_message(ctx, actor, &mut session, other).await;
            if outcome.is_err() {
                session.clear();
            }
            outcome
        }
    };

    if let Err(e) = outcome {
        report_failure(ctx, actor, e).await;
    }
}

async fn report_failure(ctx: &AppContext, actor: &Actor, error: anyhow::Error) {
    if let Some(transport) = error.downcast_ref::<MessengerError>() {
        tracing::warn!("Transport error for user {}: {}", actor.user_id, transport);
        return;
    }

    tracing::error!("Flow failed for user {}: {:#}", actor.user_id, error);
    let message = OutMessage::new(format_feedback(FeedbackType::Error, GENERIC_FAILURE));
    if let Err(e) = ctx.messenger.send(actor.chat_id, message).await {
        tracing::warn!("Could not report failure to {}: {}", actor.user_id, e);
    }
}

async fn handle_message(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    event: Inbound,
) -> Result<()> {
    match event {
        Inbound::Command(command) => handle_command(ctx, actor, session, command).await,
        Inbound::Text(text) if text.starts_with('/') => unknown_input(ctx, actor).await,
        Inbound::Text(text) => {
            if session.registration.is_some() {
                registration::receive_text(ctx, actor, session, &text).await
            } else if session.exam.is_some() {
                lessons::answer_text(ctx, actor, session, &text).await
            } else {
                unknown_input(ctx, actor).await
            }
        }
        Inbound::Contact { phone } if session.registration.is_some() => {
            registration::receive_contact(ctx, actor, session, &phone).await
        }
        Inbound::Photo { file_id } if session.registration.is_some() => {
            registration::receive_photo(ctx, actor, session, &file_id).await
        }
        Inbound::Contact { .. } | Inbound::Photo { .. } | Inbound::Unsupported => {
            if session.registration.is_some() {
                registration::receive_unsupported(ctx, actor, session).await
            } else {
                unknown_input(ctx, actor).await
            }
        }
        Inbound::Callback { .. } => Ok(()),
    }
}

async fn handle_command(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    command: Command,
) -> Result<()> {
    let name = format!("{command:?}").to_lowercase();
    log_command_start(&name, actor.label(), actor.user_id, actor.chat_id);

    match command {
        Command::Help => {
            ctx.messenger
                .send(actor.chat_id, OutMessage::new(help_text()))
                .await?;
            Ok(())
        }
        Command::Start => registration::start(ctx, actor, session).await,
        Command::Cancel => registration::cancel(ctx, actor, session).await,
        Command::Lessons => lessons::show_menu(ctx, actor.chat_id, actor.user_id).await,
        Command::Progress => lessons::show_progress(ctx, actor.chat_id, actor.user_id).await,
        Command::Pending => admin::list_pending(ctx, actor).await,
    }
}

fn help_text() -> String {
    use teloxide::utils::command::BotCommands;
    escape_markdown(&Command::descriptions().to_string())
}

async fn unknown_input(ctx: &AppContext, actor: &Actor) -> Result<()> {
    ctx.feedback(actor.chat_id)
        .info("I didn't understand that. Send /start to register, /lessons for the course, or /help for all commands.")
        .await?;
    Ok(())
}

async fn handle_callback(
    ctx: &AppContext,
    actor: &Actor,
    callback_id: &str,
    action: Option<CallbackAction>,
    origin: Option<CallbackOrigin>,
) -> Result<()> {
    let Some(action) = action else {
        tracing::debug!("Undecodable callback from {}", actor.user_id);
        answer(ctx, callback_id, Ack::notice("Unknown action.")).await;
        return Ok(());
    };

    let session_owner = match action {
        CallbackAction::Approve(target) | CallbackAction::Reject(target) => target,
        _ => actor.user_id,
    };
    let mut session = ctx.sessions.lock(session_owner).await;

    let outcome = dispatch_callback(ctx, actor, &mut session, action, origin.as_ref()).await;
    match outcome {
        Ok(ack) => {
            answer(ctx, callback_id, ack).await;
            Ok(())
        }
        Err(e) => {
            answer(ctx, callback_id, Ack::Silent).await;
            if session_owner == actor.user_id {
                session.clear();
            }
            Err(e)
        }
    }
}

async fn dispatch_callback(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    action: CallbackAction,
    origin: Option<&CallbackOrigin>,
) -> Result<Ack> {
    match action {
        CallbackAction::Plan(key) => registration::choose_plan(ctx, actor, session, &key).await,
        CallbackAction::Pay(method) => {
            registration::choose_payment(ctx, actor, session, method).await
        }
        CallbackAction::PythonInstalled(installed) => {
            registration::python_status(ctx, actor, session, installed).await
        }
        CallbackAction::Lesson(number) => {
            lessons::serve(ctx, actor.chat_id, actor.user_id, number).await?;
            Ok(Ack::Silent)
        }
        CallbackAction::StartExam(number) => {
            lessons::start_exam(ctx, actor, session, number).await
        }
        CallbackAction::ExamAnswer { question, option } => {
            lessons::answer_choice(ctx, actor, session, question, option).await
        }
        CallbackAction::ExamReveal { question } => {
            lessons::reveal(ctx, actor, session, question).await
        }
        CallbackAction::Approve(target) => {
            admin::decide(ctx, actor, target, Decision::Approve, origin).await
        }
        CallbackAction::Reject(target) => {
            admin::decide(ctx, actor, target, Decision::Reject, origin).await
        }
        CallbackAction::LessonsMenu => {
            lessons::show_menu(ctx, actor.chat_id, actor.user_id).await?;
            Ok(Ack::Silent)
        }
        CallbackAction::MainMenu => {
            lessons::show_main_menu(ctx, actor.chat_id).await?;
            Ok(Ack::Silent)
        }
        CallbackAction::MyProgress => {
            lessons::show_progress(ctx, actor.chat_id, actor.user_id).await?;
            Ok(Ack::Silent)
        }
    }
}

async fn answer(ctx: &AppContext, callback_id: &str, ack: Ack) {
    let result = match &ack {
        Ack::Silent => ctx.messenger.answer_callback(callback_id, None, false).await,
        Ack::Notice(text) => ctx.messenger.answer_callback(callback_id, Some(text), false).await,
        Ack::Alert(text) => ctx.messenger.answer_callback(callback_id, Some(text), true).await,
    };
    if let Err(e) = result {
        tracing::warn!("Could not answer callback {}: {}", callback_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_lists_commands_escaped() {
        let help = help_text();
        assert!(help.contains("/start"));
        assert!(help.contains("/pending"));
        assert!(!help.contains("(admins only)"));
        assert!(help.contains("\\(admins only\\)"));
    }
}
