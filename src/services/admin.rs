//! Admin review of offline payments.

use anyhow::Result;

use crate::bot::events::{Actor, CallbackOrigin};
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::{Button, MessengerError, OutMessage};
use crate::database::models::{Decision, Registration, User, UserStatus};
use crate::services::{lessons, Ack, AppContext};
use crate::utils::datetime::format_datetime;
use crate::utils::logging::{
    log_access_denied, log_delivery_failure, log_flow_step, log_system_event,
};
use crate::utils::markdown::{bold, escape_markdown};

const FLOW: &str = "admin_review";

/// Outcome of sending one notification to every admin.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<i64>,
    pub failed: Vec<(i64, MessengerError)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

fn decision_buttons(telegram_id: i64) -> Vec<Vec<Button>> {
    vec![vec![
        Button::new("✅ Approve", CallbackAction::Approve(telegram_id)),
        Button::new("❌ Reject", CallbackAction::Reject(telegram_id)),
    ]]
}

fn describe_user(user: &User) -> String {
    let username = user
        .username
        .as_deref()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| "no username".to_string());
    format!(
        "{}\n{}\n{}\n{}\n{}",
        escape_markdown(&format!("Name: {}", user.name)),
        escape_markdown(&format!("Phone: {}", user.phone)),
        escape_markdown(&format!("Telegram: {} ({})", username, user.telegram_id)),
        escape_markdown(&format!("Plan: {}", user.plan)),
        escape_markdown(&format!("Registered: {}", format_datetime(&user.created_at))),
    )
}

/// Sends a new offline registration to every configured admin.
///
/// Admins are tried one after another; a failure for one admin is recorded
/// and does not stop delivery to the rest.
pub async fn notify_admins(
    ctx: &AppContext,
    registration: &Registration,
    receipt_file_id: Option<&str>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    if ctx.config.admin_ids.is_empty() {
        tracing::warn!(
            "No admins configured; registration {} awaits review unseen",
            registration.user.telegram_id
        );
        return report;
    }

    let caption = format!(
        "🧾 {}\n\n{}",
        bold("New offline payment"),
        describe_user(&registration.user)
    );
    let buttons = decision_buttons(registration.user.telegram_id);

    for &admin_id in &ctx.config.admin_ids {
        let message = OutMessage::new(caption.clone()).buttons(buttons.clone());
        let sent = match receipt_file_id {
            Some(file_id) => ctx.messenger.send_photo(admin_id, file_id, message).await,
            None => ctx.messenger.send(admin_id, message).await,
        };
        match sent {
            Ok(_) => report.delivered.push(admin_id),
            Err(e) => {
                log_delivery_failure(admin_id, "receipt review", &e.to_string());
                report.failed.push((admin_id, e));
            }
        }
    }

    log_system_event(
        "ADMIN_NOTIFIED",
        Some(&format!(
            "registration {} delivered to {}/{} admins",
            registration.user.telegram_id,
            report.delivered.len(),
            report.attempted()
        )),
    );
    report
}

/// Approve or reject a pending registration.
///
/// Callers hold the registrant's session lock, so serving their first lesson
/// after approval cannot interleave with their own events.
pub async fn decide(
    ctx: &AppContext,
    actor: &Actor,
    target_id: i64,
    decision: Decision,
    origin: Option<&CallbackOrigin>,
) -> Result<Ack> {
    if !ctx.config.is_admin(actor.user_id) {
        log_access_denied(decision.label(), actor.user_id);
        return Ok(Ack::notice("You don't have access to this action."));
    }

    let Some(user) = ctx.store.find_user(target_id).await? else {
        return Ok(Ack::alert("Registration not found."));
    };
    if user.status != UserStatus::Pending {
        return Ok(Ack::alert(format!(
            "⚠️ This registration is already {}.",
            user.status
        )));
    }

    if !ctx
        .store
        .decide_registration(target_id, decision, actor.user_id)
        .await?
    {
        return Ok(Ack::alert("⚠️ This registration was already decided."));
    }

    log_flow_step(
        FLOW,
        decision.label(),
        target_id,
        Some(&format!("by admin {}", actor.user_id)),
    );

    if let Err(e) = notify_decision(ctx, target_id, decision).await {
        log_delivery_failure(target_id, "decision notice", &e.to_string());
    }

    if let Some(origin) = origin {
        mark_decided(ctx, actor, decision, origin).await;
    }

    Ok(Ack::notice(format!("Registration {}.", decision.label())))
}

/// Tells the registrant about the decision; approval also serves lesson 1.
async fn notify_decision(ctx: &AppContext, target_id: i64, decision: Decision) -> Result<()> {
    match decision {
        Decision::Approve => {
            ctx.messenger
                .send(
                    target_id,
                    OutMessage::new(format!(
                        "🎉 {}",
                        escape_markdown(
                            "Your payment has been confirmed! Welcome to the workshop. Here is your first lesson."
                        )
                    )),
                )
                .await?;
            lessons::serve(ctx, target_id, target_id, 1).await?;
        }
        Decision::Reject => {
            ctx.messenger
                .send(
                    target_id,
                    OutMessage::new(format!(
                        "❌ {}",
                        escape_markdown(
                            "Your payment could not be confirmed. Please contact support or send /start to register again."
                        )
                    )),
                )
                .await?;
        }
    }
    Ok(())
}

/// Rewrites the admin's copy of the notification so the decision is visible.
/// Failures are logged only; the decision is already stored.
async fn mark_decided(ctx: &AppContext, actor: &Actor, decision: Decision, origin: &CallbackOrigin) {
    let verdict = match decision {
        Decision::Approve => format!("✅ Approved by {}", actor_handle(actor)),
        Decision::Reject => format!("❌ Rejected by {}", actor_handle(actor)),
    };
    let original = origin.text.as_deref().unwrap_or_default();
    let text = if original.is_empty() {
        escape_markdown(&verdict)
    } else {
        format!("{}\n\n{}", escape_markdown(original), escape_markdown(&verdict))
    };

    let edited = if origin.is_caption {
        ctx.messenger
            .edit_caption(origin.message, OutMessage::new(text))
            .await
    } else {
        ctx.messenger.edit_text(origin.message, OutMessage::new(text)).await
    };
    if let Err(e) = edited {
        log_delivery_failure(origin.message.chat_id, "decision audit edit", &e.to_string());
    }
}

fn actor_handle(actor: &Actor) -> String {
    match &actor.username {
        Some(username) => format!("@{username}"),
        None => actor.display_name.clone(),
    }
}

/// `/pending`: every registration still waiting for review, one message each.
pub async fn list_pending(ctx: &AppContext, actor: &Actor) -> Result<()> {
    if !ctx.config.is_admin(actor.user_id) {
        log_access_denied("pending", actor.user_id);
        ctx.feedback(actor.chat_id)
            .error("You don't have access to this command.")
            .await?;
        return Ok(());
    }

    let pending = ctx.store.list_users_by_status(UserStatus::Pending).await?;
    if pending.is_empty() {
        ctx.feedback(actor.chat_id)
            .info("No registrations are waiting for review.")
            .await?;
        return Ok(());
    }

    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(bold(&format!("{} pending registrations", pending.len()))),
        )
        .await?;

    for user in pending {
        let receipt = ctx.store.latest_receipt(user.id).await?;
        let receipt_line = match receipt {
            Some(receipt) => escape_markdown(&format!("Receipt: {}", receipt.image_url)),
            None => escape_markdown("Receipt: none"),
        };
        let text = format!("{}\n{}", describe_user(&user), receipt_line);
        ctx.messenger
            .send(
                actor.chat_id,
                OutMessage::new(text).buttons(decision_buttons(user.telegram_id)),
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(username: Option<&str>) -> Actor {
        Actor {
            user_id: 1,
            chat_id: 1,
            username: username.map(str::to_string),
            display_name: "Sara Admin".into(),
        }
    }

    #[test]
    fn test_actor_handle_prefers_username() {
        assert_eq!(actor_handle(&actor(Some("sara"))), "@sara");
        assert_eq!(actor_handle(&actor(None)), "Sara Admin");
    }

    #[test]
    fn test_decision_buttons_target_registrant() {
        let rows = decision_buttons(42);
        let actions: Vec<_> = rows.iter().flatten().map(|b| b.action.clone()).collect();
        assert_eq!(
            actions,
            vec![CallbackAction::Approve(42), CallbackAction::Reject(42)]
        );
    }

    #[test]
    fn test_empty_report_counts_as_delivered() {
        let report = DeliveryReport::default();
        assert_eq!(report.attempted(), 0);
        assert!(report.all_delivered());
    }
}
