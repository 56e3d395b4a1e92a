//! Inline button payloads.
//!
//! Every button the bot renders carries a [`CallbackAction`] encoded as a
//! `prefix_identifier` token. Payloads are decoded once when the update
//! arrives and matched exhaustively afterwards.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::database::models::PaymentMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// `plan_<key>`
    Plan(String),
    /// `pay_online` / `pay_offline`
    Pay(PaymentMethod),
    /// `python_yes` / `python_no`
    PythonInstalled(bool),
    /// `lesson_<N>`
    Lesson(i64),
    /// `start_exam_<N>`
    StartExam(i64),
    /// `exam_answer_<question>_<option>`
    ExamAnswer { question: usize, option: usize },
    /// `exam_show_answer_<question>`
    ExamReveal { question: usize },
    /// `approve_<telegram id>`
    Approve(i64),
    /// `reject_<telegram id>`
    Reject(i64),
    LessonsMenu,
    MainMenu,
    MyProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown callback payload '{0}'")]
pub struct UnknownAction(pub String);

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackAction::Plan(key) => write!(f, "plan_{key}"),
            CallbackAction::Pay(method) => write!(f, "pay_{}", method.as_str()),
            CallbackAction::PythonInstalled(true) => f.write_str("python_yes"),
            CallbackAction::PythonInstalled(false) => f.write_str("python_no"),
            CallbackAction::Lesson(n) => write!(f, "lesson_{n}"),
            CallbackAction::StartExam(n) => write!(f, "start_exam_{n}"),
            CallbackAction::ExamAnswer { question, option } => {
                write!(f, "exam_answer_{question}_{option}")
            }
            CallbackAction::ExamReveal { question } => write!(f, "exam_show_answer_{question}"),
            CallbackAction::Approve(id) => write!(f, "approve_{id}"),
            CallbackAction::Reject(id) => write!(f, "reject_{id}"),
            CallbackAction::LessonsMenu => f.write_str("lessons_menu"),
            CallbackAction::MainMenu => f.write_str("main_menu"),
            CallbackAction::MyProgress => f.write_str("my_progress"),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = UnknownAction;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownAction(data.to_string());

        let action = match data {
            "lessons_menu" => CallbackAction::LessonsMenu,
            "main_menu" => CallbackAction::MainMenu,
            "my_progress" => CallbackAction::MyProgress,
            "python_yes" => CallbackAction::PythonInstalled(true),
            "python_no" => CallbackAction::PythonInstalled(false),
            "pay_online" => CallbackAction::Pay(PaymentMethod::Online),
            "pay_offline" => CallbackAction::Pay(PaymentMethod::Offline),
            _ => {
                // Longer prefixes first: `exam_show_answer_` before `exam_answer_`.
                if let Some(rest) = data.strip_prefix("exam_show_answer_") {
                    CallbackAction::ExamReveal {
                        question: rest.parse().map_err(|_| unknown())?,
                    }
                } else if let Some(rest) = data.strip_prefix("exam_answer_") {
                    let (question, option) = rest.split_once('_').ok_or_else(unknown)?;
                    CallbackAction::ExamAnswer {
                        question: question.parse().map_err(|_| unknown())?,
                        option: option.parse().map_err(|_| unknown())?,
                    }
                } else if let Some(rest) = data.strip_prefix("start_exam_") {
                    CallbackAction::StartExam(positive(rest).ok_or_else(unknown)?)
                } else if let Some(rest) = data.strip_prefix("lesson_") {
                    CallbackAction::Lesson(positive(rest).ok_or_else(unknown)?)
                } else if let Some(rest) = data.strip_prefix("approve_") {
                    CallbackAction::Approve(positive(rest).ok_or_else(unknown)?)
                } else if let Some(rest) = data.strip_prefix("reject_") {
                    CallbackAction::Reject(positive(rest).ok_or_else(unknown)?)
                } else if let Some(rest) = data.strip_prefix("plan_") {
                    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
                        return Err(unknown());
                    }
                    CallbackAction::Plan(rest.to_string())
                } else {
                    return Err(unknown());
                }
            }
        };

        Ok(action)
    }
}

fn positive(text: &str) -> Option<i64> {
    text.parse().ok().filter(|n: &i64| *n > 0)
}
