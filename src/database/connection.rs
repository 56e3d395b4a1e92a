//! Local SQLite backend.
//!
//! Used for development and by the integration tests. Multi-row commits run in
//! a transaction here, which the hosted backend cannot offer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, FromRow, Sqlite, SqlitePool};
use tracing::info;

use crate::database::models::*;
use crate::database::store::{Store, StoreError, StoreResult};
use crate::utils::logging::log_database_operation;

#[derive(Clone)]
pub struct DatabaseManager {
    pub pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("Creating database {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const USER_COLUMNS: &str =
    "id, telegram_id, username, name, phone, plan, payment_method, status, created_at";
const RECEIPT_COLUMNS: &str = "id, user_id, image_url, status, approved_by, created_at";
const LESSON_COLUMNS: &str =
    "id, lesson_number, title, content, code_examples, expected_outputs, is_free, section";
const QUESTION_COLUMNS: &str = "id, lesson_id, question_number, question_text, question_type, \
     options, correct_answer, explanation";

#[derive(FromRow)]
struct UserRow {
    id: i64,
    telegram_id: i64,
    username: Option<String>,
    name: String,
    phone: String,
    plan: String,
    payment_method: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            telegram_id: row.telegram_id,
            username: row.username,
            name: row.name,
            phone: row.phone,
            plan: row.plan,
            payment_method: row.payment_method.parse().map_err(|reason| decode("users", reason))?,
            status: row.status.parse().map_err(|reason| decode("users", reason))?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ReceiptRow {
    id: i64,
    user_id: i64,
    image_url: String,
    status: String,
    approved_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = StoreError;

    fn try_from(row: ReceiptRow) -> Result<Self, Self::Error> {
        Ok(Receipt {
            id: row.id,
            user_id: row.user_id,
            image_url: row.image_url,
            status: row.status.parse().map_err(|reason| decode("receipts", reason))?,
            approved_by: row.approved_by,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct LessonRow {
    id: i64,
    lesson_number: i64,
    title: String,
    content: String,
    code_examples: String,
    expected_outputs: String,
    is_free: bool,
    section: Option<String>,
}

impl TryFrom<LessonRow> for Lesson {
    type Error = StoreError;

    fn try_from(row: LessonRow) -> Result<Self, Self::Error> {
        let list = |text: &str| parse_json_list(text).map_err(|reason| decode("lessons", reason));
        Ok(Lesson {
            id: row.id,
            lesson_number: row.lesson_number,
            title: row.title,
            content: list(&row.content)?,
            code_examples: list(&row.code_examples)?,
            expected_outputs: list(&row.expected_outputs)?,
            is_free: row.is_free,
            section: row.section,
        })
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    lesson_id: i64,
    question_number: i64,
    question_text: String,
    question_type: String,
    options: Option<String>,
    correct_answer: String,
    explanation: Option<String>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = StoreError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let options = match row.options.as_deref() {
            Some(text) => parse_json_list(text).map_err(|reason| decode("questions", reason))?,
            None => Vec::new(),
        };
        Ok(Question {
            id: row.id,
            lesson_id: row.lesson_id,
            question_number: row.question_number,
            question_text: row.question_text,
            question_type: row
                .question_type
                .parse()
                .map_err(|reason| decode("questions", reason))?,
            options,
            correct_answer: row.correct_answer,
            explanation: row.explanation,
        })
    }
}

#[derive(FromRow)]
struct ProgressRow {
    telegram_id: i64,
    lesson_id: i64,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    is_completed: bool,
}

impl From<ProgressRow> for UserProgress {
    fn from(row: ProgressRow) -> Self {
        UserProgress {
            telegram_id: row.telegram_id,
            lesson_id: row.lesson_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            is_completed: row.is_completed,
        }
    }
}

#[derive(FromRow)]
struct AnswerRow {
    telegram_id: i64,
    question_id: i64,
    user_answer: String,
    is_correct: bool,
    answered_at: DateTime<Utc>,
}

impl From<AnswerRow> for QuestionAnswer {
    fn from(row: AnswerRow) -> Self {
        QuestionAnswer {
            telegram_id: row.telegram_id,
            question_id: row.question_id,
            user_answer: row.user_answer,
            is_correct: row.is_correct,
            answered_at: row.answered_at,
        }
    }
}

fn decode(table: &'static str, reason: String) -> StoreError {
    StoreError::Decode { table, reason }
}

fn encode_list(table: &'static str, items: &[String]) -> StoreResult<String> {
    serde_json::to_string(items).map_err(|e| decode(table, e.to_string()))
}

#[async_trait]
impl Store for DatabaseManager {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn find_user(&self, telegram_id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?"
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE status = ? ORDER BY created_at, id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn create_registration(
        &self,
        user: &NewUser,
        receipt_image: Option<&str>,
    ) -> StoreResult<Registration> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, username, name, phone, plan, payment_method, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(telegram_id) DO UPDATE SET
                username = excluded.username,
                name = excluded.name,
                phone = excluded.phone,
                plan = excluded.plan,
                payment_method = excluded.payment_method,
                status = excluded.status
            "#,
        )
        .bind(user.telegram_id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.plan)
        .bind(user.payment_method.as_str())
        .bind(user.status.as_str())
        .bind(now)
        .execute(&mut tx)
        .await?;

        let stored: User = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?"
        ))
        .bind(user.telegram_id)
        .fetch_one(&mut tx)
        .await?
        .try_into()?;

        let receipt = match receipt_image {
            Some(image_url) => {
                let inserted = sqlx::query(
                    "INSERT INTO receipts (user_id, image_url, status, created_at) VALUES (?, ?, 'pending', ?)",
                )
                .bind(stored.id)
                .bind(image_url)
                .bind(now)
                .execute(&mut tx)
                .await?;

                let row = sqlx::query_as::<_, ReceiptRow>(&format!(
                    "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?"
                ))
                .bind(inserted.last_insert_rowid())
                .fetch_one(&mut tx)
                .await?;
                Some(Receipt::try_from(row)?)
            }
            None => None,
        };

        tx.commit().await?;
        log_database_operation(
            "create_registration",
            "users",
            Some(&format!("telegram_id={} status={}", stored.telegram_id, stored.status)),
        );

        Ok(Registration { user: stored, receipt })
    }

    async fn decide_registration(
        &self,
        telegram_id: i64,
        decision: Decision,
        admin_id: i64,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE users SET status = ? WHERE telegram_id = ? AND status = 'pending'",
        )
        .bind(decision.user_status().as_str())
        .bind(telegram_id)
        .execute(&mut tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE receipts SET status = ?, approved_by = ?, decided_at = ?
            WHERE id = (
                SELECT r.id FROM receipts r
                JOIN users u ON u.id = r.user_id
                WHERE u.telegram_id = ? AND r.status = 'pending'
                ORDER BY r.created_at DESC, r.id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(decision.receipt_status().as_str())
        .bind(admin_id)
        .bind(Utc::now())
        .bind(telegram_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        log_database_operation(
            "decide_registration",
            "users",
            Some(&format!("telegram_id={telegram_id} decision={}", decision.label())),
        );
        Ok(true)
    }

    async fn latest_receipt(&self, user_id: i64) -> StoreResult<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Receipt::try_from).transpose()
    }

    async fn list_lessons(&self) -> StoreResult<Vec<Lesson>> {
        let rows = sqlx::query_as::<_, LessonRow>(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons ORDER BY lesson_number"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Lesson::try_from).collect()
    }

    async fn find_lesson(&self, lesson_number: i64) -> StoreResult<Option<Lesson>> {
        let row = sqlx::query_as::<_, LessonRow>(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE lesson_number = ?"
        ))
        .bind(lesson_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Lesson::try_from).transpose()
    }

    async fn questions_for_lesson(&self, lesson_id: i64) -> StoreResult<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE lesson_id = ? ORDER BY question_number"
        ))
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Question::try_from).collect()
    }

    async fn find_progress(
        &self,
        telegram_id: i64,
        lesson_id: i64,
    ) -> StoreResult<Option<UserProgress>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT telegram_id, lesson_id, started_at, completed_at, is_completed \
             FROM user_progress WHERE telegram_id = ? AND lesson_id = ?",
        )
        .bind(telegram_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProgress::from))
    }

    async fn completed_lesson_ids(&self, telegram_id: i64) -> StoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT lesson_id FROM user_progress WHERE telegram_id = ? AND is_completed = TRUE",
        )
        .bind(telegram_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_lesson_started(&self, telegram_id: i64, lesson_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress (telegram_id, lesson_id, started_at, is_completed)
            VALUES (?, ?, ?, FALSE)
            ON CONFLICT(telegram_id, lesson_id) DO NOTHING
            "#,
        )
        .bind(telegram_id)
        .bind(lesson_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_lesson_completed(
        &self,
        telegram_id: i64,
        lesson_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress (telegram_id, lesson_id, started_at, completed_at, is_completed)
            VALUES (?, ?, ?, ?, TRUE)
            ON CONFLICT(telegram_id, lesson_id) DO UPDATE SET
                is_completed = TRUE,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(telegram_id)
        .bind(lesson_id)
        .bind(completed_at)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        log_database_operation(
            "mark_lesson_completed",
            "user_progress",
            Some(&format!("telegram_id={telegram_id} lesson_id={lesson_id}")),
        );
        Ok(())
    }

    async fn upsert_answer(&self, answer: &NewAnswer) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO question_answers (telegram_id, question_id, user_answer, is_correct, answered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(telegram_id, question_id) DO UPDATE SET
                user_answer = excluded.user_answer,
                is_correct = excluded.is_correct,
                answered_at = excluded.answered_at
            "#,
        )
        .bind(answer.telegram_id)
        .bind(answer.question_id)
        .bind(&answer.user_answer)
        .bind(answer.is_correct)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn answers_for_user(&self, telegram_id: i64) -> StoreResult<Vec<QuestionAnswer>> {
        let rows = sqlx::query_as::<_, AnswerRow>(
            "SELECT telegram_id, question_id, user_answer, is_correct, answered_at \
             FROM question_answers WHERE telegram_id = ? ORDER BY question_id",
        )
        .bind(telegram_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QuestionAnswer::from).collect())
    }

    async fn upsert_lesson(&self, lesson: &NewLesson) -> StoreResult<Lesson> {
        sqlx::query(
            r#"
            INSERT INTO lessons (lesson_number, title, content, code_examples, expected_outputs, is_free, section)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(lesson_number) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                code_examples = excluded.code_examples,
                expected_outputs = excluded.expected_outputs,
                is_free = excluded.is_free,
                section = excluded.section
            "#,
        )
        .bind(lesson.lesson_number)
        .bind(&lesson.title)
        .bind(encode_list("lessons", &lesson.content)?)
        .bind(encode_list("lessons", &lesson.code_examples)?)
        .bind(encode_list("lessons", &lesson.expected_outputs)?)
        .bind(lesson.is_free)
        .bind(&lesson.section)
        .execute(&self.pool)
        .await?;

        self.find_lesson(lesson.lesson_number)
            .await?
            .ok_or(StoreError::NotFound("lesson"))
    }

    async fn upsert_question(&self, question: &NewQuestion) -> StoreResult<Question> {
        let options = if question.options.is_empty() {
            None
        } else {
            Some(encode_list("questions", &question.options)?)
        };

        sqlx::query(
            r#"
            INSERT INTO questions (lesson_id, question_number, question_text, question_type, options, correct_answer, explanation)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(lesson_id, question_number) DO UPDATE SET
                question_text = excluded.question_text,
                question_type = excluded.question_type,
                options = excluded.options,
                correct_answer = excluded.correct_answer,
                explanation = excluded.explanation
            "#,
        )
        .bind(question.lesson_id)
        .bind(question.question_number)
        .bind(&question.question_text)
        .bind(question.question_type.as_str())
        .bind(options)
        .bind(&question.correct_answer)
        .bind(&question.explanation)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, QuestionRow>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE lesson_id = ? AND question_number = ?"
        ))
        .bind(question.lesson_id)
        .bind(question.question_number)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }
}
