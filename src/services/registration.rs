//! Registration dialogue.
//!
//! Paid workshop: plan, payment method, then either a receipt photo (offline)
//! or the gateway link (online), then name and phone. Free course: name and
//! phone only. Nothing is written to the store until the phone step succeeds,
//! so a cancelled or abandoned dialogue leaves no rows behind.

use anyhow::Result;
use chrono::Utc;

use crate::bot::events::Actor;
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::{Button, Keyboard, OutMessage};
use crate::config::{find_plan, CourseMode, Plan, PLANS};
use crate::database::models::{NewUser, PaymentMethod, Registration, UserStatus};
use crate::database::objects::receipt_path;
use crate::services::session::Session;
use crate::services::{admin, lessons, Ack, AppContext};
use crate::utils::logging::{log_database_error, log_flow_step, log_validation_error};
use crate::utils::markdown::{bold, escape_markdown};
use crate::utils::validation::{validate_name, validate_phone};

const FLOW: &str = "registration";
const EXPIRED: &str = "This button has expired. Send /start to begin again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    SelectingPlan,
    SelectingPayment,
    WaitingReceipt,
    WaitingName,
    WaitingPhone,
    /// Free course only, after the user has been saved.
    WaitingPythonStatus,
}

/// A receipt photo already copied to the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedReceipt {
    pub url: String,
    /// Transport file id, reused when forwarding the photo to admins.
    pub file_id: String,
}

/// Answers collected so far; lives only in the session.
#[derive(Debug, Clone)]
pub struct RegistrationDraft {
    pub step: RegistrationStep,
    pub plan: Option<&'static Plan>,
    pub payment: Option<PaymentMethod>,
    pub receipt: Option<UploadedReceipt>,
    pub name: Option<String>,
}

impl RegistrationDraft {
    pub fn new(step: RegistrationStep) -> Self {
        Self {
            step,
            plan: None,
            payment: None,
            receipt: None,
            name: None,
        }
    }
}

fn share_contact_keyboard() -> Keyboard {
    Keyboard::ShareContact("📱 Share my phone number".to_string())
}

/// `/start`: opens the dialogue unless a pending or confirmed registration exists.
pub async fn start(ctx: &AppContext, actor: &Actor, session: &mut Session) -> Result<()> {
    if let Some(user) = ctx.store.find_user(actor.user_id).await? {
        if user.status.blocks_registration() {
            session.registration = None;
            log_flow_step(FLOW, "already_registered", actor.user_id, Some(user.status.as_str()));
            return match user.status {
                UserStatus::Confirmed => {
                    let text = format!(
                        "✅ {}",
                        escape_markdown(&format!(
                            "You're already registered, {}. Pick up where you left off:",
                            user.name
                        ))
                    );
                    ctx.messenger
                        .send(
                            actor.chat_id,
                            OutMessage::new(text).buttons(vec![vec![
                                Button::new("📚 Lessons", CallbackAction::LessonsMenu),
                                Button::new("📊 My progress", CallbackAction::MyProgress),
                            ]]),
                        )
                        .await?;
                    Ok(())
                }
                _ => {
                    ctx.feedback(actor.chat_id)
                        .info("Your registration is awaiting admin review. You'll get a message as soon as it's decided.")
                        .await?;
                    Ok(())
                }
            };
        }
    }

    session.clear();
    match ctx.config.course_mode {
        CourseMode::Paid => {
            session.registration = Some(RegistrationDraft::new(RegistrationStep::SelectingPlan));
            let rows = PLANS
                .iter()
                .map(|plan| {
                    vec![Button::new(
                        format!("{} ({})", plan.name, plan.price),
                        CallbackAction::Plan(plan.key.to_string()),
                    )]
                })
                .collect();
            let text = format!(
                "🎓 {}\n\n{}",
                bold("Welcome to the Python workshop!"),
                escape_markdown("Choose a plan to get started. Send /cancel at any time to stop.")
            );
            ctx.messenger
                .send(actor.chat_id, OutMessage::new(text).buttons(rows))
                .await?;
        }
        CourseMode::Free => {
            session.registration = Some(RegistrationDraft::new(RegistrationStep::WaitingName));
            let text = format!(
                "🎓 {}\n\n{}",
                bold("Welcome to the free Python course!"),
                escape_markdown("All lessons are free. To register, please send your full name.")
            );
            ctx.messenger.send(actor.chat_id, OutMessage::new(text)).await?;
        }
    }

    log_flow_step(FLOW, "started", actor.user_id, None);
    Ok(())
}

/// `/cancel`: drops the draft in whatever step it is.
pub async fn cancel(ctx: &AppContext, actor: &Actor, session: &mut Session) -> Result<()> {
    let message = if session.registration.take().is_some() {
        log_flow_step(FLOW, "cancelled", actor.user_id, None);
        "❌ Registration cancelled. Send /start whenever you want to begin again."
    } else {
        "ℹ️ There is nothing to cancel."
    };
    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(escape_markdown(message)).keyboard(Keyboard::Remove),
        )
        .await?;
    Ok(())
}

pub async fn choose_plan(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    key: &str,
) -> Result<Ack> {
    let Some(draft) = session
        .registration
        .as_mut()
        .filter(|d| d.step == RegistrationStep::SelectingPlan)
    else {
        return Ok(Ack::notice(EXPIRED));
    };
    let Some(plan) = find_plan(key) else {
        return Ok(Ack::notice("Unknown plan."));
    };

    let mut methods = Vec::new();
    if ctx.config.payment_url(plan.key).is_some() {
        methods.push(Button::new("💳 Pay online", CallbackAction::Pay(PaymentMethod::Online)));
    }
    if ctx.config.bank.is_some() {
        methods.push(Button::new("🏦 Bank transfer", CallbackAction::Pay(PaymentMethod::Offline)));
    }

    if methods.is_empty() {
        session.registration = None;
        ctx.feedback(actor.chat_id)
            .warning("No payment method is available for this plan right now. Please try again later.")
            .await?;
        return Ok(Ack::Silent);
    }

    draft.plan = Some(plan);
    draft.step = RegistrationStep::SelectingPayment;
    log_flow_step(FLOW, "plan_selected", actor.user_id, Some(plan.key));

    let text = format!(
        "{}\n\n{}",
        escape_markdown(&format!("You picked {} ({}).", plan.name, plan.price)),
        escape_markdown("How would you like to pay?")
    );
    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(text).buttons(methods.into_iter().map(|b| vec![b]).collect()),
        )
        .await?;
    Ok(Ack::Silent)
}

pub async fn choose_payment(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    method: PaymentMethod,
) -> Result<Ack> {
    let Some(draft) = session
        .registration
        .as_mut()
        .filter(|d| d.step == RegistrationStep::SelectingPayment)
    else {
        return Ok(Ack::notice(EXPIRED));
    };
    let Some(plan) = draft.plan else {
        return Ok(Ack::notice(EXPIRED));
    };

    match method {
        PaymentMethod::Online => {
            let Some(url) = ctx.config.payment_url(plan.key) else {
                return Ok(Ack::alert("Online payment is not available for this plan."));
            };
            draft.payment = Some(PaymentMethod::Online);
            draft.step = RegistrationStep::WaitingName;
            let text = format!(
                "💳 {}\n{}\n\n{}",
                escape_markdown("Complete your payment here:"),
                escape_markdown(url),
                escape_markdown("Once you've paid, send your full name to finish registering.")
            );
            ctx.messenger.send(actor.chat_id, OutMessage::new(text)).await?;
        }
        PaymentMethod::Offline => {
            let Some(bank) = ctx.config.bank.as_ref() else {
                return Ok(Ack::alert("Bank transfer is not available right now."));
            };
            draft.payment = Some(PaymentMethod::Offline);
            draft.step = RegistrationStep::WaitingReceipt;
            let text = format!(
                "🏦 {}\n\n{}\n{}\n{}\n{}\n\n{}",
                bold("Bank transfer details"),
                escape_markdown(&format!("Amount: {}", plan.price)),
                escape_markdown(&format!("Bank: {}", bank.bank_name)),
                escape_markdown(&format!("Account: {}", bank.account)),
                escape_markdown(&format!("Account holder: {}", bank.holder)),
                escape_markdown("After transferring, send a photo of the receipt here.")
            );
            ctx.messenger.send(actor.chat_id, OutMessage::new(text)).await?;
        }
        PaymentMethod::None => return Ok(Ack::notice("Unknown payment method.")),
    }

    log_flow_step(FLOW, "payment_selected", actor.user_id, Some(method.as_str()));
    Ok(Ack::Silent)
}

/// A photo while the dialogue waits for a receipt.
pub async fn receive_photo(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    file_id: &str,
) -> Result<()> {
    let Some(draft) = session.registration.as_mut() else {
        return Ok(());
    };
    if draft.step != RegistrationStep::WaitingReceipt {
        return reprompt(ctx, actor, draft.step).await;
    }

    let bytes = ctx.messenger.download(file_id).await?;
    let path = receipt_path(actor.user_id, Utc::now());
    let url = ctx.objects.put_image(&path, bytes, "image/jpeg").await?;

    draft.receipt = Some(UploadedReceipt {
        url,
        file_id: file_id.to_string(),
    });
    draft.step = RegistrationStep::WaitingName;
    log_flow_step(FLOW, "receipt_uploaded", actor.user_id, Some(&path));

    ctx.feedback(actor.chat_id)
        .success("Receipt received. Now please send your full name.")
        .await?;
    Ok(())
}

/// Free text while the dialogue is open.
pub async fn receive_text(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    text: &str,
) -> Result<()> {
    let Some(draft) = session.registration.as_mut() else {
        return Ok(());
    };

    match draft.step {
        RegistrationStep::WaitingName => match validate_name(text) {
            Ok(name) => {
                let prompt = format!(
                    "Thanks, {name}! Now send your mobile number, or tap the button below to share it."
                );
                draft.name = Some(name);
                draft.step = RegistrationStep::WaitingPhone;
                log_flow_step(FLOW, "name_received", actor.user_id, None);
                ctx.messenger
                    .send(
                        actor.chat_id,
                        OutMessage::new(escape_markdown(&prompt)).keyboard(share_contact_keyboard()),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                log_validation_error(FLOW, "name", &e.to_string(), actor.user_id);
                ctx.feedback(actor.chat_id)
                    .validation_error(&e.to_string(), "Please send your full name again.")
                    .await?;
                Ok(())
            }
        },
        RegistrationStep::WaitingPhone => receive_phone(ctx, actor, session, text).await,
        step => reprompt(ctx, actor, step).await,
    }
}

/// A shared contact card.
pub async fn receive_contact(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    phone: &str,
) -> Result<()> {
    match session.registration.as_ref().map(|d| d.step) {
        Some(RegistrationStep::WaitingPhone) => receive_phone(ctx, actor, session, phone).await,
        Some(step) => reprompt(ctx, actor, step).await,
        None => Ok(()),
    }
}

/// Anything the current step cannot use (stickers, documents, ...).
pub async fn receive_unsupported(ctx: &AppContext, actor: &Actor, session: &Session) -> Result<()> {
    match session.registration.as_ref() {
        Some(draft) => reprompt(ctx, actor, draft.step).await,
        None => Ok(()),
    }
}

async fn reprompt(ctx: &AppContext, actor: &Actor, step: RegistrationStep) -> Result<()> {
    let feedback = ctx.feedback(actor.chat_id);
    match step {
        RegistrationStep::SelectingPlan | RegistrationStep::SelectingPayment => {
            feedback.info("Please choose one of the buttons above, or send /cancel.").await?;
        }
        RegistrationStep::WaitingReceipt => {
            log_validation_error(FLOW, "receipt", "not a photo", actor.user_id);
            feedback
                .validation_error(
                    "The receipt has to be a photo.",
                    "Send a photo (not a file) of your transfer receipt.",
                )
                .await?;
        }
        RegistrationStep::WaitingName => {
            feedback.info("Please send your full name as text.").await?;
        }
        RegistrationStep::WaitingPhone => {
            feedback.info("Please send your mobile number or share your contact.").await?;
        }
        RegistrationStep::WaitingPythonStatus => {
            feedback.info("Please answer with one of the buttons above.").await?;
        }
    }
    Ok(())
}

async fn receive_phone(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    raw: &str,
) -> Result<()> {
    let phone = match validate_phone(raw) {
        Ok(phone) => phone,
        Err(e) => {
            log_validation_error(FLOW, "phone", &e.to_string(), actor.user_id);
            ctx.feedback(actor.chat_id)
                .validation_error(&e.to_string(), "Send a number like 09121234567.")
                .await?;
            return Ok(());
        }
    };

    let Some(draft) = session.registration.take() else {
        return Ok(());
    };
    commit(ctx, actor, session, draft, phone).await
}

/// Final step: one store write for the user (and receipt), then follow-ups.
async fn commit(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    draft: RegistrationDraft,
    phone: String,
) -> Result<()> {
    let name = draft.name.clone().unwrap_or_default();
    let (plan, payment_method, status) = match ctx.config.course_mode {
        CourseMode::Free => ("free".to_string(), PaymentMethod::None, UserStatus::Confirmed),
        CourseMode::Paid => {
            let plan = draft.plan.map(|p| p.key.to_string()).unwrap_or_default();
            match draft.payment {
                Some(PaymentMethod::Offline) => (plan, PaymentMethod::Offline, UserStatus::Pending),
                _ => (plan, PaymentMethod::Online, UserStatus::Confirmed),
            }
        }
    };

    let new_user = NewUser {
        telegram_id: actor.user_id,
        username: actor.username.clone(),
        name,
        phone,
        plan,
        payment_method,
        status,
    };
    let receipt_url = draft.receipt.as_ref().map(|r| r.url.as_str());

    let registration = match ctx.store.create_registration(&new_user, receipt_url).await {
        Ok(registration) => registration,
        Err(e) => {
            log_database_error("create_registration", &e.to_string(), actor.user_id);
            ctx.messenger
                .send(
                    actor.chat_id,
                    OutMessage::new(escape_markdown(
                        "❌ Something went wrong while saving your registration. Please send /start to try again.",
                    ))
                    .keyboard(Keyboard::Remove),
                )
                .await?;
            return Ok(());
        }
    };

    log_flow_step(
        FLOW,
        "committed",
        actor.user_id,
        Some(registration.user.status.as_str()),
    );

    match (ctx.config.course_mode, registration.user.payment_method) {
        (CourseMode::Free, _) => finish_free(ctx, actor, session, draft).await,
        (CourseMode::Paid, PaymentMethod::Offline) => {
            finish_offline(ctx, actor, &registration, &draft).await
        }
        (CourseMode::Paid, _) => {
            ctx.messenger
                .send(
                    actor.chat_id,
                    OutMessage::new(format!(
                        "🎉 {}",
                        escape_markdown("Registration confirmed! Your first lesson is on its way.")
                    ))
                    .keyboard(Keyboard::Remove),
                )
                .await?;
            lessons::serve(ctx, actor.chat_id, actor.user_id, 1).await?;
            Ok(())
        }
    }
}

async fn finish_offline(
    ctx: &AppContext,
    actor: &Actor,
    registration: &Registration,
    draft: &RegistrationDraft,
) -> Result<()> {
    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(format!(
                "✅ {}",
                escape_markdown(
                    "Thanks! Your receipt has been sent for review. You'll get a message once an admin confirms it."
                )
            ))
            .keyboard(Keyboard::Remove),
        )
        .await?;

    let file_id = draft.receipt.as_ref().map(|r| r.file_id.as_str());
    let report = admin::notify_admins(ctx, registration, file_id).await;
    if !report.all_delivered() {
        tracing::warn!(
            "Registration {} reached {} of {} admins",
            registration.user.telegram_id,
            report.delivered.len(),
            report.attempted()
        );
    }
    Ok(())
}

async fn finish_free(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    mut draft: RegistrationDraft,
) -> Result<()> {
    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(format!("🎉 {}", escape_markdown("You're registered!")))
                .keyboard(Keyboard::Remove),
        )
        .await?;

    draft.step = RegistrationStep::WaitingPythonStatus;
    session.registration = Some(draft);

    let text = format!(
        "🎯 {}\n\n{}",
        bold("One question:"),
        escape_markdown("Is Python installed on your computer?")
    );
    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(text).buttons(vec![vec![
                Button::new("✅ Yes", CallbackAction::PythonInstalled(true)),
                Button::new("❌ No", CallbackAction::PythonInstalled(false)),
            ]]),
        )
        .await?;
    Ok(())
}

/// Free course: answer to "is Python installed?".
pub async fn python_status(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    installed: bool,
) -> Result<Ack> {
    let waiting = matches!(
        session.registration.as_ref().map(|d| d.step),
        Some(RegistrationStep::WaitingPythonStatus)
    );
    if !waiting {
        return Ok(Ack::notice(EXPIRED));
    }
    session.registration = None;

    if installed {
        ctx.feedback(actor.chat_id)
            .success("Great, you're ready to start learning!")
            .await?;
        lessons::show_menu(ctx, actor.chat_id, actor.user_id).await?;
    } else {
        let text = format!(
            "📦 {}\n\n{}",
            bold("Installing Python"),
            escape_markdown(
                "1. Go to python.org\n\
                 2. Download the latest Python 3 release\n\
                 3. While installing, tick 'Add Python to PATH'\n\
                 4. When it's done, send /lessons"
            )
        );
        ctx.messenger.send(actor.chat_id, OutMessage::new(text)).await?;
    }
    Ok(Ack::Silent)
}
