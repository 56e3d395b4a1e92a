//! Persistence port used by every conversation flow.
//!
//! Flows never talk to a backend directly; they go through [`Store`], which
//! has a hosted PostgREST implementation ([`crate::database::rest::RestStore`])
//! and a local SQLite one ([`crate::database::connection::DatabaseManager`]).
//! Entities are addressed by their natural keys (telegram id, lesson number,
//! question number) and every write touches a single logical entity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::models::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("could not decode {table} row: {reason}")]
    Decode { table: &'static str, reason: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("object store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> StoreResult<()>;

    async fn find_user(&self, telegram_id: i64) -> StoreResult<Option<User>>;

    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>>;

    /// Commits the registration dialogue: upserts the user on `telegram_id`
    /// and, when `receipt_image` is given, inserts a pending receipt for it.
    async fn create_registration(
        &self,
        user: &NewUser,
        receipt_image: Option<&str>,
    ) -> StoreResult<Registration>;

    /// Applies an admin decision if, and only if, the user is still pending.
    ///
    /// Returns `false` when the user was not pending (already decided or
    /// unknown), in which case nothing is written.
    async fn decide_registration(
        &self,
        telegram_id: i64,
        decision: Decision,
        admin_id: i64,
    ) -> StoreResult<bool>;

    async fn latest_receipt(&self, user_id: i64) -> StoreResult<Option<Receipt>>;

    /// All lessons ordered by number.
    async fn list_lessons(&self) -> StoreResult<Vec<Lesson>>;

    async fn find_lesson(&self, lesson_number: i64) -> StoreResult<Option<Lesson>>;

    /// Questions of a lesson ordered by their number.
    async fn questions_for_lesson(&self, lesson_id: i64) -> StoreResult<Vec<Question>>;

    async fn find_progress(
        &self,
        telegram_id: i64,
        lesson_id: i64,
    ) -> StoreResult<Option<UserProgress>>;

    async fn completed_lesson_ids(&self, telegram_id: i64) -> StoreResult<Vec<i64>>;

    /// Records `started_at` for a lesson unless a progress row already exists.
    async fn mark_lesson_started(&self, telegram_id: i64, lesson_id: i64) -> StoreResult<()>;

    /// Upserts the progress row with `is_completed = true`.
    async fn mark_lesson_completed(
        &self,
        telegram_id: i64,
        lesson_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Upserts on (telegram_id, question_id); the latest attempt wins.
    async fn upsert_answer(&self, answer: &NewAnswer) -> StoreResult<()>;

    async fn answers_for_user(&self, telegram_id: i64) -> StoreResult<Vec<QuestionAnswer>>;

    /// Upserts on `lesson_number`. Used by the seeding tool only.
    async fn upsert_lesson(&self, lesson: &NewLesson) -> StoreResult<Lesson>;

    /// Upserts on (lesson_id, question_number). Used by the seeding tool only.
    async fn upsert_question(&self, question: &NewQuestion) -> StoreResult<Question>;
}

/// Write side of the object store holding receipt images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` at `path` and returns a dereferenceable URL for it.
    async fn put_image(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<String>;
}
