//! Lesson delivery and exams.
//!
//! Lesson N (N > 1) is only served once lesson N-1 is completed, and a lesson
//! is completed only by passing its exam. Completion is never written on a
//! failed attempt, so retaking a passed exam cannot lock later lessons again.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;

use crate::bot::events::Actor;
use crate::bot::intent::CallbackAction;
use crate::bot::messenger::{Button, OutMessage};
use crate::database::models::{Lesson, Question, QuestionType, UserStatus};
use crate::services::exam::{score_percent, ExamError, ExamSession, PASS_THRESHOLD};
use crate::services::session::Session;
use crate::services::{Ack, AppContext};
use crate::utils::logging::log_flow_step;
use crate::utils::markdown::{bold, code_block, escape_code, escape_markdown};

const FLOW: &str = "lessons";
const EXAM_FLOW: &str = "exam";

/// Longest chunk, measured after escaping, leaving room for headers and fences.
const MAX_CHUNK_CHARS: usize = 3500;
/// Telegram's cap on one message's text.
const MESSAGE_LIMIT: usize = 4096;

const NO_EXAM: &str = "This exam is no longer active. Start it again from the lesson.";

/// Whether `user_id` may use the course. Sends the reason when not.
async fn require_member(ctx: &AppContext, chat_id: i64, user_id: i64) -> Result<bool> {
    let status = ctx.store.find_user(user_id).await?.map(|u| u.status);
    let reason = match status {
        Some(UserStatus::Confirmed) => return Ok(true),
        Some(UserStatus::Pending) => {
            "Your registration is still awaiting admin review. Lessons unlock once it's approved."
        }
        Some(UserStatus::Rejected) | None => {
            "You're not registered yet. Send /start to sign up."
        }
    };
    ctx.feedback(chat_id).info(reason).await?;
    Ok(false)
}

fn lesson_button(lesson: &Lesson, marker: &str) -> Button {
    Button::new(
        format!("{marker} {}. {}", lesson.lesson_number, lesson.title),
        CallbackAction::Lesson(lesson.lesson_number),
    )
}

/// Lessons menu with a completed / open / locked marker per lesson.
pub async fn show_menu(ctx: &AppContext, chat_id: i64, user_id: i64) -> Result<()> {
    if !require_member(ctx, chat_id, user_id).await? {
        return Ok(());
    }

    let lessons = ctx.store.list_lessons().await?;
    if lessons.is_empty() {
        ctx.feedback(chat_id)
            .info("No lessons are available yet. Check back soon!")
            .await?;
        return Ok(());
    }

    let completed: HashSet<i64> = ctx
        .store
        .completed_lesson_ids(user_id)
        .await?
        .into_iter()
        .collect();
    let completed_numbers: HashSet<i64> = lessons
        .iter()
        .filter(|l| completed.contains(&l.id))
        .map(|l| l.lesson_number)
        .collect();

    let mut rows: Vec<Vec<Button>> = lessons
        .iter()
        .map(|lesson| {
            let marker = if completed_numbers.contains(&lesson.lesson_number) {
                "✅"
            } else if lesson.lesson_number == 1
                || completed_numbers.contains(&(lesson.lesson_number - 1))
            {
                "📖"
            } else {
                "🔒"
            };
            vec![lesson_button(lesson, marker)]
        })
        .collect();
    rows.push(vec![Button::new("📊 My progress", CallbackAction::MyProgress)]);

    let text = format!(
        "📚 {}\n\n{}",
        bold("Lessons"),
        escape_markdown("Pass each lesson's exam to unlock the next one.")
    );
    ctx.messenger
        .send(chat_id, OutMessage::new(text).buttons(rows))
        .await?;
    Ok(())
}

/// Completed lessons out of all lessons.
pub async fn show_progress(ctx: &AppContext, chat_id: i64, user_id: i64) -> Result<()> {
    if !require_member(ctx, chat_id, user_id).await? {
        return Ok(());
    }

    let lessons = ctx.store.list_lessons().await?;
    let completed: HashSet<i64> = ctx
        .store
        .completed_lesson_ids(user_id)
        .await?
        .into_iter()
        .collect();
    let done = lessons.iter().filter(|l| completed.contains(&l.id)).count();

    let mut lines = vec![
        format!("📊 {}", bold("Your progress")),
        String::new(),
        escape_markdown(&format!(
            "Completed {} of {} lessons ({}%)",
            done,
            lessons.len(),
            score_percent(done, lessons.len())
        )),
    ];
    if !lessons.is_empty() {
        lines.push(String::new());
        lines.extend(lessons.iter().map(|l| {
            let mark = if completed.contains(&l.id) { "✅" } else { "▫️" };
            format!("{mark} {}", escape_markdown(&format!("{}. {}", l.lesson_number, l.title)))
        }));
    }

    ctx.messenger
        .send(
            chat_id,
            OutMessage::new(lines.join("\n")).buttons(vec![vec![Button::new(
                "📚 Lessons",
                CallbackAction::LessonsMenu,
            )]]),
        )
        .await?;
    Ok(())
}

pub async fn show_main_menu(ctx: &AppContext, chat_id: i64) -> Result<()> {
    let text = format!(
        "🏠 {}\n\n{}",
        bold("Main menu"),
        escape_markdown("What would you like to do?")
    );
    ctx.messenger
        .send(
            chat_id,
            OutMessage::new(text).buttons(vec![vec![
                Button::new("📚 Lessons", CallbackAction::LessonsMenu),
                Button::new("📊 My progress", CallbackAction::MyProgress),
            ]]),
        )
        .await?;
    Ok(())
}

/// Lesson `number` if its prerequisite is completed; `None` after telling the
/// user why not.
async fn unlocked_lesson(
    ctx: &AppContext,
    chat_id: i64,
    user_id: i64,
    number: i64,
) -> Result<Option<Lesson>> {
    let Some(lesson) = ctx.store.find_lesson(number).await? else {
        ctx.feedback(chat_id)
            .info(&format!("Lesson {number} is not available."))
            .await?;
        return Ok(None);
    };

    if number > 1 {
        let prerequisite_done = match ctx.store.find_lesson(number - 1).await? {
            Some(previous) => ctx
                .store
                .find_progress(user_id, previous.id)
                .await?
                .is_some_and(|p| p.is_completed),
            None => false,
        };
        if !prerequisite_done {
            log_flow_step(FLOW, "locked", user_id, Some(&format!("lesson {number}")));
            let text = format!(
                "🔒 {}",
                escape_markdown(&format!(
                    "Lesson {number} is locked. Pass the exam of lesson {} first.",
                    number - 1
                ))
            );
            ctx.messenger.send(chat_id, OutMessage::new(text)).await?;
            return Ok(None);
        }
    }

    Ok(Some(lesson))
}

/// Splits `text` into pieces whose `escape`d form is at most `max` characters,
/// preferring line breaks.
fn chunk_text(text: &str, max: usize, escape: fn(&str) -> String) -> Vec<String> {
    let width = |s: &str| escape(s).chars().count();
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = width(line);
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let mut buf = [0u8; 4];
            for ch in line.chars() {
                let ch_len = width(&*ch.encode_utf8(&mut buf));
                if current_len + ch_len > max && !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push(ch);
                current_len += ch_len;
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// `code` as one or more fenced blocks, each short enough to send.
fn code_blocks(code: &str) -> Vec<String> {
    chunk_text(code.trim_end(), MAX_CHUNK_CHARS, escape_code)
        .iter()
        .map(|chunk| code_block(chunk))
        .collect()
}

/// Lesson content as a sequence of MarkdownV2 messages.
pub fn render_lesson(lesson: &Lesson) -> Vec<String> {
    let mut header = format!(
        "📖 {}",
        bold(&format!("Lesson {}: {}", lesson.lesson_number, lesson.title))
    );
    if let Some(section) = lesson.section.as_deref().filter(|s| !s.trim().is_empty()) {
        header.push_str(&format!("\n{}", escape_markdown(section)));
    }

    let mut messages = vec![header];
    for segment in &lesson.content {
        messages.extend(
            chunk_text(segment, MAX_CHUNK_CHARS, escape_markdown)
                .iter()
                .map(|chunk| escape_markdown(chunk)),
        );
    }
    for (i, (code, output)) in lesson.examples().enumerate() {
        let mut blocks = code_blocks(code).into_iter();
        let Some(first) = blocks.next() else {
            continue;
        };
        messages.push(format!("💻 {}\n{}", bold(&format!("Example {}", i + 1)), first));
        messages.extend(blocks);

        let Some(output) = output.filter(|o| !o.trim().is_empty()) else {
            continue;
        };
        for (j, block) in code_blocks(output).into_iter().enumerate() {
            let block = if j == 0 {
                format!("{}\n{}", escape_markdown("Output:"), block)
            } else {
                block
            };
            match messages.last_mut() {
                Some(last) if j == 0 && last.chars().count() + block.chars().count() < MESSAGE_LIMIT => {
                    last.push('\n');
                    last.push_str(&block);
                }
                _ => messages.push(block),
            }
        }
    }
    messages
}

/// Delivers lesson `number` to `user_id` if it is unlocked.
pub async fn serve(ctx: &AppContext, chat_id: i64, user_id: i64, number: i64) -> Result<()> {
    if !require_member(ctx, chat_id, user_id).await? {
        return Ok(());
    }
    let Some(lesson) = unlocked_lesson(ctx, chat_id, user_id, number).await? else {
        return Ok(());
    };

    ctx.store.mark_lesson_started(user_id, lesson.id).await?;
    for text in render_lesson(&lesson) {
        ctx.messenger.send(chat_id, OutMessage::new(text)).await?;
    }

    let mut nav = Vec::new();
    if number > 1 {
        nav.push(Button::new("⬅️ Previous", CallbackAction::Lesson(number - 1)));
    }
    if ctx.store.find_lesson(number + 1).await?.is_some() {
        nav.push(Button::new("Next ➡️", CallbackAction::Lesson(number + 1)));
    }
    let mut rows = vec![vec![Button::new(
        "📝 Start the exam",
        CallbackAction::StartExam(number),
    )]];
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![Button::new("📚 Lessons", CallbackAction::LessonsMenu)]);

    let text = escape_markdown(&format!(
        "Ready? Pass the exam with {PASS_THRESHOLD}% or more to unlock the next lesson."
    ));
    ctx.messenger
        .send(chat_id, OutMessage::new(text).buttons(rows))
        .await?;

    log_flow_step(FLOW, "served", user_id, Some(&format!("lesson {number}")));
    Ok(())
}

/// Begins, or restarts from scratch, the exam of lesson `number`.
pub async fn start_exam(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    number: i64,
) -> Result<Ack> {
    if !require_member(ctx, actor.chat_id, actor.user_id).await? {
        return Ok(Ack::Silent);
    }
    let Some(lesson) = unlocked_lesson(ctx, actor.chat_id, actor.user_id, number).await? else {
        return Ok(Ack::Silent);
    };

    let questions = ctx.store.questions_for_lesson(lesson.id).await?;
    if questions.is_empty() {
        ctx.feedback(actor.chat_id)
            .info("There are no questions for this lesson yet.")
            .await?;
        return Ok(Ack::Silent);
    }

    let total = questions.len();
    // An unanswered onboarding question would otherwise swallow typed answers.
    session.registration = None;
    session.exam = Some(ExamSession::new(lesson.id, lesson.lesson_number, questions));
    log_flow_step(
        EXAM_FLOW,
        "started",
        actor.user_id,
        Some(&format!("lesson {number}, {total} questions")),
    );

    ctx.messenger
        .send(
            actor.chat_id,
            OutMessage::new(format!(
                "📝 {}",
                bold(&format!("Exam: lesson {number} ({total} questions)"))
            )),
        )
        .await?;
    send_current_question(ctx, actor.chat_id, session).await?;
    Ok(Ack::Silent)
}

fn question_message(index: usize, total: usize, question: &Question) -> OutMessage {
    let header = format!(
        "❓ {}\n\n{}",
        bold(&format!("Question {} of {}", index + 1, total)),
        escape_markdown(&question.question_text)
    );
    let reveal = vec![Button::new(
        "💡 Show answer",
        CallbackAction::ExamReveal { question: index },
    )];

    match question.question_type {
        QuestionType::MultipleChoice => {
            let mut rows: Vec<Vec<Button>> = question
                .options
                .iter()
                .enumerate()
                .map(|(option, label)| {
                    vec![Button::new(
                        label.clone(),
                        CallbackAction::ExamAnswer {
                            question: index,
                            option,
                        },
                    )]
                })
                .collect();
            rows.push(reveal);
            OutMessage::new(header).buttons(rows)
        }
        QuestionType::Text => OutMessage::new(format!(
            "{}\n\n✍️ {}",
            header,
            escape_markdown("Type your answer.")
        ))
        .buttons(vec![reveal]),
    }
}

async fn send_current_question(ctx: &AppContext, chat_id: i64, session: &Session) -> Result<()> {
    let Some(exam) = session.exam.as_ref() else {
        return Ok(());
    };
    if let Some((index, question)) = exam.current() {
        ctx.messenger
            .send(chat_id, question_message(index, exam.total(), question))
            .await?;
    }
    Ok(())
}

async fn advance(ctx: &AppContext, actor: &Actor, session: &mut Session) -> Result<()> {
    let Some(finished) = session.exam.as_ref().map(ExamSession::is_finished) else {
        return Ok(());
    };
    if finished {
        finish(ctx, actor, session).await
    } else {
        send_current_question(ctx, actor.chat_id, session).await
    }
}

async fn send_verdict(ctx: &AppContext, chat_id: i64, is_correct: bool, correct_answer: &str) -> Result<()> {
    let feedback = ctx.feedback(chat_id);
    if is_correct {
        feedback.success("Correct!").await?;
    } else {
        feedback
            .error(&format!("Not quite. The correct answer is: {correct_answer}"))
            .await?;
    }
    Ok(())
}

/// A tapped option of a multiple-choice question.
pub async fn answer_choice(
    ctx: &AppContext,
    actor: &Actor,
    session: &mut Session,
    question: usize,
    option: usize,
) -> Result<Ack> {
    let Some(exam) = session.exam.as_mut() else {
        return Ok(Ack::notice(NO_EXAM));
    };

    let recorded = match exam.choose(question, option) {
        Ok(recorded) => recorded,
        Err(ExamError::Stale { .. } | ExamError::Finished) => {
            return Ok(Ack::notice("You've already answered this question."));
        }
        Err(ExamError::ExpectsText) => return Ok(Ack::notice("Please type your answer.")),
        Err(e) => return Ok(Ack::notice(e.to_string())),
    };
    let correct_answer = exam
        .correct_answer(question)
        .map(str::to_string)
        .unwrap_or_default();

    send_verdict(ctx, actor.chat_id, recorded.is_correct, &correct_answer).await?;
    advance(ctx, actor, session).await?;
    Ok(Ack::Silent)
}

/// Free text while an exam is open.
pub async fn answer_text(ctx: &AppContext, actor: &Actor, session: &mut Session, text: &str) -> Result<()> {
    let Some(exam) = session.exam.as_mut() else {
        return Ok(());
    };

    let question = exam.cursor();
    let recorded = match exam.answer_text(text) {
        Ok(recorded) => recorded,
        Err(ExamError::ExpectsChoice) => {
            ctx.feedback(actor.chat_id)
                .info("Please pick one of the options above.")
                .await?;
            return Ok(());
        }
        Err(_) => return Ok(()),
    };
    let correct_answer = exam
        .correct_answer(question)
        .map(str::to_string)
        .unwrap_or_default();

    send_verdict(ctx, actor.chat_id, recorded.is_correct, &correct_answer).await?;
    advance(ctx, actor, session).await
}

/// "Show answer": the question is skipped and left out of the score.
pub async fn reveal(ctx: &AppContext, actor: &Actor, session: &mut Session, question: usize) -> Result<Ack> {
    let Some(exam) = session.exam.as_mut() else {
        return Ok(Ack::notice(NO_EXAM));
    };

    let revealed = match exam.reveal(question) {
        Ok(revealed) => revealed,
        Err(_) => return Ok(Ack::notice("You've already moved past this question.")),
    };

    let mut text = format!(
        "💡 {}\n{}",
        bold("Correct answer:"),
        escape_markdown(&revealed.correct_answer)
    );
    if let Some(explanation) = revealed.explanation.as_deref().filter(|e| !e.trim().is_empty()) {
        text.push_str(&format!("\n\n{}", escape_markdown(explanation)));
    }
    text.push_str(&format!(
        "\n\n{}",
        escape_markdown("This question won't count toward your score.")
    ));
    ctx.messenger.send(actor.chat_id, OutMessage::new(text)).await?;

    advance(ctx, actor, session).await?;
    Ok(Ack::Silent)
}

/// Scores the finished exam, stores answers and, on a pass, completion.
async fn finish(ctx: &AppContext, actor: &Actor, session: &mut Session) -> Result<()> {
    let Some(exam) = session.exam.take() else {
        return Ok(());
    };
    let number = exam.lesson_number;
    let score = exam.score();

    for row in exam.to_rows(actor.user_id) {
        ctx.store.upsert_answer(&row).await?;
    }
    if score.passed() {
        ctx.store
            .mark_lesson_completed(actor.user_id, exam.lesson_id, Utc::now())
            .await?;
    }

    log_flow_step(
        EXAM_FLOW,
        if score.passed() { "passed" } else { "failed" },
        actor.user_id,
        Some(&format!(
            "lesson {number}: {}/{} = {}%",
            score.correct, score.answered, score.percent
        )),
    );

    let next = if score.passed() {
        ctx.store.find_lesson(number + 1).await?
    } else {
        None
    };

    let summary = escape_markdown(&format!(
        "Correct: {} of {}\nScore: {}%",
        score.correct, score.answered, score.percent
    ));
    let mut rows = Vec::new();
    let text = if score.passed() {
        if let Some(next) = next.as_ref() {
            rows.push(vec![lesson_button(next, "➡️")]);
        }
        format!(
            "🎉 {}\n\n{}\n\n{}",
            bold(&format!("You passed lesson {number}!")),
            summary,
            escape_markdown(match next {
                Some(_) => "The next lesson is on its way.",
                None => "That was the last lesson. Congratulations on finishing the course!",
            })
        )
    } else {
        rows.push(vec![Button::new("🔄 Retake the exam", CallbackAction::StartExam(number))]);
        rows.push(vec![Button::new("📖 Review the lesson", CallbackAction::Lesson(number))]);
        format!(
            "📉 {}\n\n{}\n\n{}",
            bold(&format!("Lesson {number} exam not passed")),
            summary,
            escape_markdown(&format!(
                "You need at least {PASS_THRESHOLD}% to pass. Review the lesson and try again."
            ))
        )
    };
    rows.push(vec![Button::new("📚 Lessons", CallbackAction::LessonsMenu)]);

    ctx.messenger
        .send(actor.chat_id, OutMessage::new(text).buttons(rows))
        .await?;

    if next.is_some() {
        tokio::time::sleep(ctx.config.next_lesson_delay).await;
        serve(ctx, actor.chat_id, actor.user_id, number + 1).await?;
    }
    Ok(())
}
