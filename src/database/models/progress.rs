use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's standing on one lesson; at most one row per (user, lesson).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub telegram_id: i64,
    pub lesson_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
}

/// Latest submitted answer per (user, question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub telegram_id: i64,
    pub question_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAnswer {
    pub telegram_id: i64,
    pub question_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
}
