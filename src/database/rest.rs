//! Hosted backend: a PostgREST endpoint in front of the relational store.
//!
//! PostgREST has no multi-statement transactions, so multi-row operations are
//! issued as sequential single-row writes in dependency order, and a failed
//! later write undoes the earlier ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::database::models::*;
use crate::database::store::{Store, StoreError, StoreResult};
use crate::utils::logging::{log_database_error, log_database_operation};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> StoreResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<Vec<T>> {
        let response = checked(builder.send().await?).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    async fn first<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<Option<T>> {
        Ok(self.rows(builder.query(&[("limit", "1")])).await?.into_iter().next())
    }

    /// Insert-or-update on `on_conflict`, returning the stored row.
    async fn upsert<B, T>(&self, table: &'static str, on_conflict: &str, body: &B) -> StoreResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::POST, table)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(body);
        self.rows(builder)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(table))
    }

    async fn insert_receipt(&self, user_id: i64, image_url: &str) -> StoreResult<Receipt> {
        let body = json!({
            "user_id": user_id,
            "image_url": image_url,
            "status": ReceiptStatus::Pending.as_str(),
        });
        let builder = self
            .request(Method::POST, "receipts")
            .header("Prefer", "return=representation")
            .json(&body);
        self.rows::<Receipt>(builder)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound("receipts"))
    }

    /// Deletes a freshly created user row, or puts back the row it replaced.
    async fn undo_user_write(&self, telegram_id: i64, previous: Option<&User>) -> StoreResult<()> {
        let builder = match previous {
            None => self
                .request(Method::DELETE, "users")
                .query(&[("telegram_id", eq(telegram_id))]),
            Some(user) => self
                .request(Method::PATCH, "users")
                .query(&[("telegram_id", eq(telegram_id))])
                .json(&json!({
                    "username": user.username,
                    "name": user.name,
                    "phone": user.phone,
                    "plan": user.plan,
                    "payment_method": user.payment_method.as_str(),
                    "status": user.status.as_str(),
                })),
        };
        checked(builder.send().await?).await?;
        debug!(telegram_id, restored = previous.is_some(), "user write undone");
        Ok(())
    }
}

async fn checked(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status { status, body })
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl Store for RestStore {
    async fn ping(&self) -> StoreResult<()> {
        let builder = self
            .request(Method::GET, "lessons")
            .query(&[("select", "id"), ("limit", "1")]);
        checked(builder.send().await?).await?;
        Ok(())
    }

    async fn find_user(&self, telegram_id: i64) -> StoreResult<Option<User>> {
        let builder = self
            .request(Method::GET, "users")
            .query(&[("select", "*".to_string()), ("telegram_id", eq(telegram_id))]);
        self.first(builder).await
    }

    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>> {
        let builder = self.request(Method::GET, "users").query(&[
            ("select", "*".to_string()),
            ("status", eq(status)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.rows(builder).await
    }

    async fn create_registration(
        &self,
        user: &NewUser,
        receipt_image: Option<&str>,
    ) -> StoreResult<Registration> {
        let previous = match receipt_image {
            Some(_) => self.find_user(user.telegram_id).await?,
            None => None,
        };
        let stored: User = self.upsert("users", "telegram_id", user).await?;

        let receipt = match receipt_image {
            Some(image_url) => match self.insert_receipt(stored.id, image_url).await {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    // The user row must not outlive a failed receipt write.
                    if let Err(undo) = self.undo_user_write(user.telegram_id, previous.as_ref()).await {
                        log_database_error("undo_user_write", &undo.to_string(), user.telegram_id);
                    }
                    return Err(e);
                }
            },
            None => None,
        };

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
        // Conditional update: only a row still pending matches the filter.
        let builder = self
            .request(Method::PATCH, "users")
            .query(&[
                ("telegram_id", eq(telegram_id)),
                ("status", eq(UserStatus::Pending)),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({ "status": decision.user_status().as_str() }));
        let updated: Vec<User> = self.rows(builder).await?;

        let Some(user) = updated.into_iter().next() else {
            debug!(telegram_id, "decision skipped, user no longer pending");
            return Ok(false);
        };

        let pending_receipt = self
            .first::<Receipt>(self.request(Method::GET, "receipts").query(&[
                ("select", "*".to_string()),
                ("user_id", eq(user.id)),
                ("status", eq(ReceiptStatus::Pending.as_str())),
                ("order", "created_at.desc".to_string()),
            ]))
            .await?;

        if let Some(receipt) = pending_receipt {
            let builder = self
                .request(Method::PATCH, "receipts")
                .query(&[("id", eq(receipt.id))])
                .json(&json!({
                    "status": decision.receipt_status().as_str(),
                    "approved_by": admin_id,
                    "decided_at": Utc::now(),
                }));
            checked(builder.send().await?).await?;
        }

        log_database_operation(
            "decide_registration",
            "users",
            Some(&format!("telegram_id={telegram_id} decision={}", decision.label())),
        );
        Ok(true)
    }

    async fn latest_receipt(&self, user_id: i64) -> StoreResult<Option<Receipt>> {
        let builder = self.request(Method::GET, "receipts").query(&[
            ("select", "*".to_string()),
            ("user_id", eq(user_id)),
            ("order", "created_at.desc".to_string()),
        ]);
        self.first(builder).await
    }

    async fn list_lessons(&self) -> StoreResult<Vec<Lesson>> {
        let builder = self
            .request(Method::GET, "lessons")
            .query(&[("select", "*"), ("order", "lesson_number.asc")]);
        self.rows(builder).await
    }

    async fn find_lesson(&self, lesson_number: i64) -> StoreResult<Option<Lesson>> {
        let builder = self
            .request(Method::GET, "lessons")
            .query(&[("select", "*".to_string()), ("lesson_number", eq(lesson_number))]);
        self.first(builder).await
    }

    async fn questions_for_lesson(&self, lesson_id: i64) -> StoreResult<Vec<Question>> {
        let builder = self.request(Method::GET, "questions").query(&[
            ("select", "*".to_string()),
            ("lesson_id", eq(lesson_id)),
            ("order", "question_number.asc".to_string()),
        ]);
        self.rows(builder).await
    }

    async fn find_progress(
        &self,
        telegram_id: i64,
        lesson_id: i64,
    ) -> StoreResult<Option<UserProgress>> {
        let builder = self.request(Method::GET, "user_progress").query(&[
            ("select", "*".to_string()),
            ("telegram_id", eq(telegram_id)),
            ("lesson_id", eq(lesson_id)),
        ]);
        self.first(builder).await
    }

    async fn completed_lesson_ids(&self, telegram_id: i64) -> StoreResult<Vec<i64>> {
        #[derive(serde::Deserialize)]
        struct Row {
            lesson_id: i64,
        }

        let builder = self.request(Method::GET, "user_progress").query(&[
            ("select", "lesson_id".to_string()),
            ("telegram_id", eq(telegram_id)),
            ("is_completed", eq(true)),
        ]);
        let rows: Vec<Row> = self.rows(builder).await?;
        Ok(rows.into_iter().map(|row| row.lesson_id).collect())
    }

    async fn mark_lesson_started(&self, telegram_id: i64, lesson_id: i64) -> StoreResult<()> {
        let builder = self
            .request(Method::POST, "user_progress")
            .query(&[("on_conflict", "telegram_id,lesson_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&json!({
                "telegram_id": telegram_id,
                "lesson_id": lesson_id,
                "started_at": Utc::now(),
                "is_completed": false,
            }));
        checked(builder.send().await?).await?;
        Ok(())
    }

    async fn mark_lesson_completed(
        &self,
        telegram_id: i64,
        lesson_id: i64,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        // started_at is left out so an existing row keeps its original value.
        let builder = self
            .request(Method::POST, "user_progress")
            .query(&[("on_conflict", "telegram_id,lesson_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({
                "telegram_id": telegram_id,
                "lesson_id": lesson_id,
                "is_completed": true,
                "completed_at": completed_at,
            }));
        checked(builder.send().await?).await?;
        log_database_operation(
            "mark_lesson_completed",
            "user_progress",
            Some(&format!("telegram_id={telegram_id} lesson_id={lesson_id}")),
        );
        Ok(())
    }

    async fn upsert_answer(&self, answer: &NewAnswer) -> StoreResult<()> {
        let builder = self
            .request(Method::POST, "question_answers")
            .query(&[("on_conflict", "telegram_id,question_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({
                "telegram_id": answer.telegram_id,
                "question_id": answer.question_id,
                "user_answer": answer.user_answer,
                "is_correct": answer.is_correct,
                "answered_at": Utc::now(),
            }));
        checked(builder.send().await?).await?;
        Ok(())
    }

    async fn answers_for_user(&self, telegram_id: i64) -> StoreResult<Vec<QuestionAnswer>> {
        let builder = self.request(Method::GET, "question_answers").query(&[
            ("select", "*".to_string()),
            ("telegram_id", eq(telegram_id)),
            ("order", "question_id.asc".to_string()),
        ]);
        self.rows(builder).await
    }

    async fn upsert_lesson(&self, lesson: &NewLesson) -> StoreResult<Lesson> {
        self.upsert("lessons", "lesson_number", lesson).await
    }

    async fn upsert_question(&self, question: &NewQuestion) -> StoreResult<Question> {
        let options = if question.options.is_empty() {
            serde_json::Value::Null
        } else {
            json!(question.options)
        };
        let body = json!({
            "lesson_id": question.lesson_id,
            "question_number": question.question_number,
            "question_text": question.question_text,
            "question_type": question.question_type.as_str(),
            "options": options,
            "correct_answer": question.correct_answer,
            "explanation": question.explanation,
        });
        self.upsert("questions", "lesson_id,question_number", &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let store = RestStore::new("https://example.supabase.co/", "key").unwrap();
        assert_eq!(store.base_url, "https://example.supabase.co");
    }

    #[test]
    fn test_eq_filter_format() {
        assert_eq!(eq(42), "eq.42");
        assert_eq!(eq(UserStatus::Pending), "eq.pending");
        assert_eq!(eq(true), "eq.true");
    }

    #[test]
    fn test_user_row_decodes_from_postgrest_json() {
        let user: User = serde_json::from_str(
            r#"{
                "id": 7,
                "telegram_id": 1001,
                "username": null,
                "name": "Ali Rezai",
                "phone": "09121234567",
                "plan": "standard",
                "payment_method": "offline",
                "status": "pending",
                "created_at": "2024-03-01T10:00:00+00:00"
            }"#,
        )
        .unwrap();
        assert_eq!(user.status, UserStatus::Pending);
        assert_eq!(user.payment_method, PaymentMethod::Offline);
    }

    use axum::http::Method as HttpMethod;
    use axum::http::StatusCode;
    use axum::routing::any;
    use axum::{extract::State, Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(String, String)>>>;

    #[derive(Clone)]
    struct FakeRest {
        calls: Calls,
        existing: Option<Value>,
    }

    fn user_row(status: &str) -> Value {
        json!({
            "id": 7,
            "telegram_id": 1001,
            "username": "ali",
            "name": "Ali Rezai",
            "phone": "09121234567",
            "plan": "standard",
            "payment_method": "offline",
            "status": status,
            "created_at": "2024-03-01T10:00:00+00:00"
        })
    }

    async fn users(
        State(fake): State<FakeRest>,
        method: HttpMethod,
        body: String,
    ) -> (StatusCode, Json<Value>) {
        fake.calls
            .lock()
            .unwrap()
            .push((format!("{method} users"), body));
        match method.as_str() {
            "GET" => (StatusCode::OK, Json(json!(fake.existing.iter().collect::<Vec<_>>()))),
            "POST" => (StatusCode::CREATED, Json(json!([user_row("pending")]))),
            _ => (StatusCode::OK, Json(json!([]))),
        }
    }

    async fn receipts(State(fake): State<FakeRest>, method: HttpMethod) -> (StatusCode, Json<Value>) {
        fake.calls
            .lock()
            .unwrap()
            .push((format!("{method} receipts"), String::new()));
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "disk full" })))
    }

    async fn fake_store(existing: Option<Value>) -> (RestStore, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/rest/v1/users", any(users))
            .route("/rest/v1/receipts", any(receipts))
            .with_state(FakeRest {
                calls: calls.clone(),
                existing,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (RestStore::new(&format!("http://{addr}"), "key").unwrap(), calls)
    }

    fn offline_user() -> NewUser {
        NewUser {
            telegram_id: 1001,
            username: Some("ali".to_string()),
            name: "Ali Rezai".to_string(),
            phone: "09121234567".to_string(),
            plan: "standard".to_string(),
            payment_method: PaymentMethod::Offline,
            status: UserStatus::Pending,
        }
    }

    fn call_names(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    #[tokio::test]
    async fn test_failed_receipt_removes_new_user() {
        let (store, calls) = fake_store(None).await;

        let result = store.create_registration(&offline_user(), Some("r.jpg")).await;

        assert!(matches!(result, Err(StoreError::Status { .. })));
        assert_eq!(
            call_names(&calls),
            vec!["GET users", "POST users", "POST receipts", "DELETE users"]
        );
    }

    #[tokio::test]
    async fn test_failed_receipt_restores_rejected_user() {
        let (store, calls) = fake_store(Some(user_row("rejected"))).await;

        let result = store.create_registration(&offline_user(), Some("r.jpg")).await;

        assert!(result.is_err());
        let calls = calls.lock().unwrap().clone();
        let (last, body) = calls.last().unwrap();
        assert_eq!(last, "PATCH users");
        let restored: Value = serde_json::from_str(body).unwrap();
        assert_eq!(restored["status"], "rejected");
        assert_eq!(restored["payment_method"], "offline");
    }
}
