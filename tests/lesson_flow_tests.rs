mod common;

use common::{choice_question, text_question, TestApp, RIGHT, WRONG};
use workshop_signup_bot::bot::commands::Command;
use workshop_signup_bot::bot::intent::CallbackAction;
use workshop_signup_bot::bot::messenger::Keyboard;
use workshop_signup_bot::database::models::UserStatus;
use workshop_signup_bot::database::Store;

fn answer(question: usize, option: usize) -> CallbackAction {
    CallbackAction::ExamAnswer { question, option }
}

async fn cursor_of(app: &TestApp, user_id: i64) -> Option<usize> {
    app.ctx
        .sessions
        .lock(user_id)
        .await
        .exam
        .as_ref()
        .map(|e| e.cursor())
}

#[tokio::test]
async fn test_failing_exam_offers_retry() {
    let app = TestApp::new().await;
    let lessons = app.add_course(2, 3).await;
    app.add_user(400, UserStatus::Confirmed).await;

    app.press(400, CallbackAction::StartExam(1)).await;
    assert_eq!(
        app.messenger.last_buttons_to(400),
        vec![
            answer(0, 0),
            answer(0, 1),
            CallbackAction::ExamReveal { question: 0 },
        ]
    );

    app.press(400, answer(0, RIGHT)).await;
    app.press(400, answer(1, RIGHT)).await;
    app.press(400, answer(2, WRONG)).await;

    assert!(app.messenger.any_text_to(400, "Correct: 2 of 3\nScore: 67%"));
    assert!(app.messenger.any_text_to(400, "not passed"));
    assert!(!app.is_completed(400, &lessons[0]).await);
    assert!(!app.messenger.any_text_to(400, "Lesson 2: Lesson title 2"));

    let buttons = app.messenger.last_buttons_to(400);
    assert!(buttons.contains(&CallbackAction::StartExam(1)));
    assert!(buttons.contains(&CallbackAction::Lesson(1)));
    assert!(!buttons.contains(&CallbackAction::Lesson(2)));

    // Answers are kept even on a failed attempt.
    assert_eq!(app.db.answers_for_user(400).await.unwrap().len(), 3);
    assert!(cursor_of(&app, 400).await.is_none());
}

#[tokio::test]
async fn test_revealed_question_leaves_score_and_pass_serves_next() {
    let app = TestApp::new().await;
    let first = app
        .add_lesson(
            1,
            vec![
                choice_question(1),
                choice_question(2),
                choice_question(3),
                text_question(4, "print"),
            ],
        )
        .await;
    app.add_lesson(2, vec![choice_question(1)]).await;
    app.add_user(401, UserStatus::Confirmed).await;

    app.press(401, CallbackAction::StartExam(1)).await;
    app.press(401, answer(0, RIGHT)).await;
    app.press(401, CallbackAction::ExamReveal { question: 1 }).await;
    assert!(app.messenger.any_text_to(401, "Explanation 2"));
    app.press(401, answer(2, RIGHT)).await;
    assert!(app.messenger.any_text_to(401, "Type your answer"));
    app.text(401, "  PRINT ").await;

    assert!(app.messenger.any_text_to(401, "Correct: 3 of 3\nScore: 100%"));
    assert!(app.messenger.any_text_to(401, "You passed lesson 1"));
    assert!(app.is_completed(401, &first).await);
    assert!(app.messenger.any_text_to(401, "Lesson 2: Lesson title 2"));

    let answers = app.db.answers_for_user(401).await.unwrap();
    assert_eq!(answers.len(), 3);
    assert!(answers.iter().all(|a| a.is_correct));
}

#[tokio::test]
async fn test_all_revealed_exam_fails() {
    let app = TestApp::new().await;
    let lessons = app.add_course(1, 2).await;
    app.add_user(402, UserStatus::Confirmed).await;

    app.press(402, CallbackAction::StartExam(1)).await;
    app.press(402, CallbackAction::ExamReveal { question: 0 }).await;
    app.press(402, CallbackAction::ExamReveal { question: 1 }).await;

    assert!(app.messenger.any_text_to(402, "Correct: 0 of 0\nScore: 0%"));
    assert!(!app.is_completed(402, &lessons[0]).await);
}

#[tokio::test]
async fn test_locked_lesson_names_prerequisite() {
    let app = TestApp::new().await;
    let lessons = app.add_course(5, 1).await;
    app.add_user(403, UserStatus::Confirmed).await;
    app.complete_lesson(403, &lessons[0]).await;

    app.press(403, CallbackAction::Lesson(5)).await;
    assert!(app
        .messenger
        .any_text_to(403, "Lesson 5 is locked\\. Pass the exam of lesson 4 first\\."));
    assert!(!app.messenger.any_text_to(403, "Lesson 5: Lesson title 5"));
    assert!(app.db.find_progress(403, lessons[4].id).await.unwrap().is_none());

    app.press(403, CallbackAction::StartExam(5)).await;
    assert!(cursor_of(&app, 403).await.is_none());

    // Lesson 2 is open once lesson 1 is completed.
    app.press(403, CallbackAction::Lesson(2)).await;
    assert!(app.messenger.any_text_to(403, "Lesson 2: Lesson title 2"));
}

#[tokio::test]
async fn test_first_lesson_is_always_served() {
    let app = TestApp::new().await;
    let lessons = app.add_course(2, 1).await;
    app.add_user(404, UserStatus::Confirmed).await;

    app.press(404, CallbackAction::Lesson(1)).await;

    let texts = app.messenger.texts_to(404);
    assert!(texts[0].contains("Lesson 1: Lesson title 1"));
    assert!(texts.iter().any(|t| t.contains("Body of lesson 1")));
    assert!(texts.iter().any(|t| t.contains("```\nprint(1)\n```")));

    let progress = app.db.find_progress(404, lessons[0].id).await.unwrap().unwrap();
    assert!(!progress.is_completed);

    assert_eq!(
        app.messenger.last_buttons_to(404),
        vec![
            CallbackAction::StartExam(1),
            CallbackAction::Lesson(2),
            CallbackAction::LessonsMenu,
        ]
    );
}

#[tokio::test]
async fn test_duplicate_taps_do_not_double_advance() {
    let app = TestApp::new().await;
    app.add_course(1, 3).await;
    app.add_user(405, UserStatus::Confirmed).await;

    app.press(405, CallbackAction::StartExam(1)).await;
    app.press(405, answer(0, RIGHT)).await;
    let repeat = app.press(405, answer(0, WRONG)).await;

    let (notice, _) = app.answer_for(&repeat).unwrap();
    assert!(notice.unwrap().contains("already answered"));
    assert_eq!(cursor_of(&app, 405).await, Some(1));

    let (a, b) = tokio::join!(
        app.press(405, answer(1, RIGHT)),
        app.press(405, answer(1, RIGHT)),
    );
    assert_eq!(cursor_of(&app, 405).await, Some(2));
    let stale = [a, b]
        .iter()
        .filter(|id| app.answer_for(id).is_some_and(|(notice, _)| notice.is_some()))
        .count();
    assert_eq!(stale, 1);

    let reveal = app.press(405, CallbackAction::ExamReveal { question: 0 }).await;
    assert!(app.answer_for(&reveal).unwrap().0.is_some());
    assert_eq!(cursor_of(&app, 405).await, Some(2));
}

#[tokio::test]
async fn test_failed_retake_keeps_completion() {
    let app = TestApp::new().await;
    let lessons = app.add_course(2, 2).await;
    app.add_user(406, UserStatus::Confirmed).await;

    app.press(406, CallbackAction::StartExam(1)).await;
    app.press(406, answer(0, RIGHT)).await;
    app.press(406, answer(1, RIGHT)).await;
    assert!(app.is_completed(406, &lessons[0]).await);

    app.press(406, CallbackAction::StartExam(1)).await;
    app.press(406, answer(0, WRONG)).await;
    app.press(406, answer(1, WRONG)).await;

    assert!(app.is_completed(406, &lessons[0]).await);
    let answers = app.db.answers_for_user(406).await.unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers.iter().all(|a| !a.is_correct && a.user_answer == "wrong"));

    // Lesson 2 stays open.
    app.messenger.clear();
    app.press(406, CallbackAction::Lesson(2)).await;
    assert!(app.messenger.any_text_to(406, "Lesson 2: Lesson title 2"));
}

#[tokio::test]
async fn test_restarting_exam_resets_memory() {
    let app = TestApp::new().await;
    app.add_course(1, 3).await;
    app.add_user(407, UserStatus::Confirmed).await;

    app.press(407, CallbackAction::StartExam(1)).await;
    app.press(407, answer(0, RIGHT)).await;
    app.press(407, answer(1, RIGHT)).await;
    assert_eq!(cursor_of(&app, 407).await, Some(2));

    app.press(407, CallbackAction::StartExam(1)).await;
    assert_eq!(cursor_of(&app, 407).await, Some(0));
    assert!(app.db.answers_for_user(407).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_text_while_choice_is_open_reprompts() {
    let app = TestApp::new().await;
    app.add_course(1, 1).await;
    app.add_user(408, UserStatus::Confirmed).await;

    app.press(408, CallbackAction::StartExam(1)).await;
    app.text(408, "right").await;

    assert!(app.messenger.any_text_to(408, "pick one of the options"));
    assert_eq!(cursor_of(&app, 408).await, Some(0));
}

#[tokio::test]
async fn test_exam_buttons_without_exam_are_ignored() {
    let app = TestApp::new().await;
    app.add_course(1, 1).await;
    app.add_user(409, UserStatus::Confirmed).await;

    let id = app.press(409, answer(0, RIGHT)).await;
    assert!(app.answer_for(&id).unwrap().0.unwrap().contains("no longer active"));
    assert!(app.db.answers_for_user(409).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lesson_without_questions() {
    let app = TestApp::new().await;
    app.add_lesson(1, Vec::new()).await;
    app.add_user(410, UserStatus::Confirmed).await;

    app.press(410, CallbackAction::StartExam(1)).await;
    assert!(app.messenger.any_text_to(410, "no questions"));
    assert!(cursor_of(&app, 410).await.is_none());
}

#[tokio::test]
async fn test_course_requires_confirmed_registration() {
    let app = TestApp::new().await;
    app.add_course(1, 1).await;
    app.add_user(411, UserStatus::Pending).await;

    app.press(411, CallbackAction::Lesson(1)).await;
    assert!(app.messenger.any_text_to(411, "awaiting admin review"));

    app.command(412, Command::Lessons).await;
    assert!(app.messenger.any_text_to(412, "not registered"));
    assert!(!app.messenger.any_text_to(411, "Lesson 1: Lesson title 1"));
}

#[tokio::test]
async fn test_menu_and_progress_reflect_completion() {
    let app = TestApp::new().await;
    let lessons = app.add_course(3, 1).await;
    app.add_user(413, UserStatus::Confirmed).await;
    app.complete_lesson(413, &lessons[0]).await;

    app.command(413, Command::Lessons).await;
    let menu = app.messenger.messages_to(413).pop().unwrap();
    let labels: Vec<String> = match menu.keyboard {
        Keyboard::Inline(rows) => rows.into_iter().flatten().map(|b| b.label).collect(),
        _ => Vec::new(),
    };
    assert_eq!(
        labels,
        vec![
            "✅ 1. Lesson title 1",
            "📖 2. Lesson title 2",
            "🔒 3. Lesson title 3",
            "📊 My progress",
        ]
    );

    app.command(413, Command::Progress).await;
    assert!(app.messenger.any_text_to(413, "Completed 1 of 3 lessons \\(33%\\)"));

    app.press(413, CallbackAction::MainMenu).await;
    assert_eq!(
        app.messenger.last_buttons_to(413),
        vec![CallbackAction::LessonsMenu, CallbackAction::MyProgress]
    );
}

#[tokio::test]
async fn test_answer_upsert_keeps_latest() {
    let app = TestApp::new().await;
    let lessons = app.add_course(1, 1).await;
    let questions = app.db.questions_for_lesson(lessons[0].id).await.unwrap();

    for (text, correct) in [("first", false), ("second", true)] {
        app.db
            .upsert_answer(&workshop_signup_bot::database::models::NewAnswer {
                telegram_id: 414,
                question_id: questions[0].id,
                user_answer: text.to_string(),
                is_correct: correct,
            })
            .await
            .unwrap();
    }

    let answers = app.db.answers_for_user(414).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].user_answer, "second");
    assert!(answers[0].is_correct);
}
