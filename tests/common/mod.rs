#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use workshop_signup_bot::bot::commands::Command;
use workshop_signup_bot::bot::events::{Actor, CallbackOrigin, Inbound};
use workshop_signup_bot::bot::intent::CallbackAction;
use workshop_signup_bot::bot::messenger::{
    MessageRef, Messenger, MessengerError, MessengerResult, OutMessage,
};
use workshop_signup_bot::config::{Backend, BankDetails, Config, CourseMode};
use workshop_signup_bot::database::models::*;
use workshop_signup_bot::database::{DatabaseManager, ObjectStore, Store, StoreResult};
use workshop_signup_bot::services::router::handle_event;
use workshop_signup_bot::services::AppContext;

pub const ADMINS: [i64; 2] = [900, 901];

/// Everything the bot sent, in order.
#[derive(Debug, Clone)]
pub enum Sent {
    Text {
        chat_id: i64,
        message: OutMessage,
    },
    Photo {
        chat_id: i64,
        file_id: String,
        caption: OutMessage,
    },
    EditCaption {
        target: MessageRef,
        message: OutMessage,
    },
    EditText {
        target: MessageRef,
        message: OutMessage,
    },
    CallbackAnswer {
        id: String,
        notice: Option<String>,
        alert: bool,
    },
}

#[derive(Default)]
pub struct RecordingMessenger {
    log: Mutex<Vec<Sent>>,
    unreachable: Mutex<HashSet<i64>>,
    next_message_id: AtomicI32,
}

impl RecordingMessenger {
    /// Every later delivery to `chat_id` fails.
    pub fn fail_for(&self, chat_id: i64) {
        self.unreachable.lock().unwrap().insert(chat_id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Text messages and photo captions delivered to `chat_id`.
    pub fn messages_to(&self, chat_id: i64) -> Vec<OutMessage> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { chat_id: c, message } if c == chat_id => Some(message),
                Sent::Photo {
                    chat_id: c,
                    caption,
                    ..
                } if c == chat_id => Some(caption),
                _ => None,
            })
            .collect()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.messages_to(chat_id).into_iter().map(|m| m.text).collect()
    }

    /// Whether any message to `chat_id` contains `needle` (MarkdownV2 text).
    pub fn any_text_to(&self, chat_id: i64, needle: &str) -> bool {
        self.texts_to(chat_id).iter().any(|t| t.contains(needle))
    }

    pub fn photos_to(&self, chat_id: i64) -> Vec<(String, OutMessage)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Photo {
                    chat_id: c,
                    file_id,
                    caption,
                } if c == chat_id => Some((file_id, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, OutMessage, bool)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::EditCaption { target, message } => Some((target, message, true)),
                Sent::EditText { target, message } => Some((target, message, false)),
                _ => None,
            })
            .collect()
    }

    pub fn callback_answers(&self) -> Vec<(String, Option<String>, bool)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::CallbackAnswer { id, notice, alert } => Some((id, notice, alert)),
                _ => None,
            })
            .collect()
    }

    /// The most recent message to `chat_id` that carries inline buttons.
    pub fn last_buttons_to(&self, chat_id: i64) -> Vec<CallbackAction> {
        self.messages_to(chat_id)
            .iter()
            .rev()
            .map(|m| m.actions().into_iter().cloned().collect::<Vec<_>>())
            .find(|actions| !actions.is_empty())
            .unwrap_or_default()
    }

    fn check(&self, chat_id: i64) -> MessengerResult<()> {
        if self.unreachable.lock().unwrap().contains(&chat_id) {
            return Err(MessengerError::Unreachable(chat_id));
        }
        Ok(())
    }

    fn next_ref(&self, chat_id: i64) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn record(&self, sent: Sent) {
        self.log.lock().unwrap().push(sent);
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, chat_id: i64, message: OutMessage) -> MessengerResult<MessageRef> {
        self.check(chat_id)?;
        self.record(Sent::Text { chat_id, message });
        Ok(self.next_ref(chat_id))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: OutMessage,
    ) -> MessengerResult<MessageRef> {
        self.check(chat_id)?;
        self.record(Sent::Photo {
            chat_id,
            file_id: file_id.to_string(),
            caption,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn edit_caption(&self, target: MessageRef, caption: OutMessage) -> MessengerResult<()> {
        self.check(target.chat_id)?;
        self.record(Sent::EditCaption {
            target,
            message: caption,
        });
        Ok(())
    }

    async fn edit_text(&self, target: MessageRef, message: OutMessage) -> MessengerResult<()> {
        self.check(target.chat_id)?;
        self.record(Sent::EditText { target, message });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
        alert: bool,
    ) -> MessengerResult<()> {
        self.record(Sent::CallbackAnswer {
            id: callback_id.to_string(),
            notice: notice.map(str::to_string),
            alert,
        });
        Ok(())
    }

    async fn download(&self, file_id: &str) -> MessengerResult<Vec<u8>> {
        Ok(format!("image:{file_id}").into_bytes())
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjects {
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn put_image(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> StoreResult<String> {
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(format!("memory://{path}"))
    }
}

pub fn test_config(mode: CourseMode) -> Config {
    let mut payment_urls = BTreeMap::new();
    payment_urls.insert("standard".to_string(), "https://pay.example/standard".to_string());

    Config {
        bot_token: "test-token".to_string(),
        backend: Backend::Sqlite {
            database_url: "sqlite::memory:".to_string(),
            receipts_dir: PathBuf::from("unused"),
        },
        admin_ids: ADMINS.to_vec(),
        course_mode: mode,
        payment_urls,
        bank: Some(BankDetails {
            bank_name: "Test Bank".to_string(),
            account: "6037-0000-0000-0000".to_string(),
            holder: "Workshop Org".to_string(),
        }),
        http_port: 0,
        session_ttl: Duration::from_secs(3600),
        next_lesson_delay: Duration::ZERO,
    }
}

pub struct TestApp {
    pub ctx: AppContext,
    pub db: DatabaseManager,
    pub messenger: Arc<RecordingMessenger>,
    pub objects: Arc<MemoryObjects>,
    next_callback: AtomicI32,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(CourseMode::Paid)).await
    }

    pub async fn with_config(config: Config) -> Self {
        let dir = tempdir().unwrap();
        let database_url = format!("sqlite:{}", dir.path().join("test.db").display());
        let db = DatabaseManager::new(&database_url).await.unwrap();
        db.run_migrations().await.unwrap();

        let messenger = Arc::new(RecordingMessenger::default());
        let objects = Arc::new(MemoryObjects::default());
        let ctx = AppContext::new(
            config,
            Arc::new(db.clone()),
            objects.clone(),
            messenger.clone(),
        );

        Self {
            ctx,
            db,
            messenger,
            objects,
            next_callback: AtomicI32::new(0),
            _dir: dir,
        }
    }

    pub fn actor(user_id: i64) -> Actor {
        Actor {
            user_id,
            chat_id: user_id,
            username: Some(format!("user{user_id}")),
            display_name: format!("User {user_id}"),
        }
    }

    pub async fn command(&self, user_id: i64, command: Command) {
        handle_event(&self.ctx, &Self::actor(user_id), Inbound::Command(command)).await;
    }

    pub async fn text(&self, user_id: i64, text: &str) {
        handle_event(&self.ctx, &Self::actor(user_id), Inbound::Text(text.to_string())).await;
    }

    pub async fn contact(&self, user_id: i64, phone: &str) {
        let event = Inbound::Contact {
            phone: phone.to_string(),
        };
        handle_event(&self.ctx, &Self::actor(user_id), event).await;
    }

    pub async fn photo(&self, user_id: i64, file_id: &str) {
        let event = Inbound::Photo {
            file_id: file_id.to_string(),
        };
        handle_event(&self.ctx, &Self::actor(user_id), event).await;
    }

    /// Presses a button and returns the callback id used.
    pub async fn press(&self, user_id: i64, action: CallbackAction) -> String {
        self.press_on(user_id, action, None).await
    }

    pub async fn press_on(
        &self,
        user_id: i64,
        action: CallbackAction,
        origin: Option<CallbackOrigin>,
    ) -> String {
        let id = format!("cb-{}", self.next_callback.fetch_add(1, Ordering::SeqCst));
        let event = Inbound::Callback {
            id: id.clone(),
            action: Some(action),
            origin,
        };
        handle_event(&self.ctx, &Self::actor(user_id), event).await;
        id
    }

    /// The acknowledgement given for callback `id`.
    pub fn answer_for(&self, id: &str) -> Option<(Option<String>, bool)> {
        self.messenger
            .callback_answers()
            .into_iter()
            .find(|(cid, _, _)| cid == id)
            .map(|(_, notice, alert)| (notice, alert))
    }

    pub async fn add_user(&self, telegram_id: i64, status: UserStatus) -> User {
        let user = NewUser {
            telegram_id,
            username: Some(format!("user{telegram_id}")),
            name: format!("User {telegram_id}"),
            phone: "09120000000".to_string(),
            plan: "standard".to_string(),
            payment_method: PaymentMethod::Online,
            status,
        };
        self.db.create_registration(&user, None).await.unwrap().user
    }

    /// Adds lesson `number` with `questions`, returning the stored lesson.
    pub async fn add_lesson(&self, number: i64, questions: Vec<NewQuestion>) -> Lesson {
        let lesson = self
            .db
            .upsert_lesson(&NewLesson {
                lesson_number: number,
                title: format!("Lesson title {number}"),
                content: vec![format!("Body of lesson {number}.")],
                code_examples: vec![format!("print({number})")],
                expected_outputs: vec![number.to_string()],
                is_free: true,
                section: None,
            })
            .await
            .unwrap();
        for mut question in questions {
            question.lesson_id = lesson.id;
            self.db.upsert_question(&question).await.unwrap();
        }
        lesson
    }

    /// Lessons 1..=count, each with `per_lesson` choice questions.
    pub async fn add_course(&self, count: i64, per_lesson: i64) -> Vec<Lesson> {
        let mut lessons = Vec::new();
        for number in 1..=count {
            let questions = (1..=per_lesson).map(choice_question).collect();
            lessons.push(self.add_lesson(number, questions).await);
        }
        lessons
    }

    pub async fn complete_lesson(&self, telegram_id: i64, lesson: &Lesson) {
        self.db
            .mark_lesson_completed(telegram_id, lesson.id, chrono::Utc::now())
            .await
            .unwrap();
    }

    pub async fn is_completed(&self, telegram_id: i64, lesson: &Lesson) -> bool {
        self.db
            .find_progress(telegram_id, lesson.id)
            .await
            .unwrap()
            .is_some_and(|p| p.is_completed)
    }
}

/// Choice question whose first option ("right") is correct.
pub fn choice_question(number: i64) -> NewQuestion {
    NewQuestion {
        lesson_id: 0,
        question_number: number,
        question_text: format!("Question {number}?"),
        question_type: QuestionType::MultipleChoice,
        options: vec!["right".to_string(), "wrong".to_string()],
        correct_answer: "right".to_string(),
        explanation: Some(format!("Explanation {number}")),
    }
}

pub fn text_question(number: i64, answer: &str) -> NewQuestion {
    NewQuestion {
        lesson_id: 0,
        question_number: number,
        question_text: format!("Type answer {number}"),
        question_type: QuestionType::Text,
        options: Vec::new(),
        correct_answer: answer.to_string(),
        explanation: None,
    }
}

pub const RIGHT: usize = 0;
pub const WRONG: usize = 1;
