use anyhow::{anyhow, Context, Result};
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use workshop_signup_bot::config::Backend;
use workshop_signup_bot::database::models::{NewLesson, NewQuestion};
use workshop_signup_bot::database::{DatabaseManager, RestStore, Store};

/// One lesson of a content pack, with its questions inline.
#[derive(Debug, Deserialize)]
struct LessonPackEntry {
    #[serde(flatten)]
    lesson: NewLesson,
    #[serde(default)]
    questions: Vec<NewQuestion>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "seed" => {
            let path = args
                .get(2)
                .map(String::as_str)
                .unwrap_or("data/lessons.sample.json");
            seed(Path::new(path)).await
        }
        "check" => check().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_help();
            std::process::exit(1);
        }
    }
}

/// Tries per write, the first one included.
const WRITE_ATTEMPTS: usize = 4;

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_factor(2.0)
        .with_max_times(WRITE_ATTEMPTS - 1)
}

async fn connect(backend: &Backend) -> Result<Arc<dyn Store>> {
    println!("📊 Store: {}", mask_backend(backend));
    let store: Arc<dyn Store> = match backend {
        Backend::Sqlite { database_url, .. } => {
            let db = DatabaseManager::new(database_url)
                .await
                .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
            db.run_migrations().await?;
            Arc::new(db)
        }
        Backend::Hosted { url, key, .. } => Arc::new(RestStore::new(url, key)?),
    };
    Ok(store)
}

async fn seed(path: &Path) -> Result<()> {
    println!("📚 Workshop Signup Bot - Lesson Seeding Tool");
    println!("=============================================");

    dotenvy::dotenv().ok();
    let backend = Backend::from_env()?;

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pack: Vec<LessonPackEntry> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid lesson pack {}", path.display()))?;
    println!("📖 Loaded {} lessons from {}", pack.len(), path.display());

    let store = connect(&backend).await?;
    let mut question_count = 0;

    let store = store.as_ref();
    for entry in pack {
        let new_lesson = &entry.lesson;
        let lesson = (|| async move { store.upsert_lesson(new_lesson).await })
            .retry(retry_policy())
            .notify(|e, delay| {
                tracing::warn!(
                    "Lesson {} write failed, retrying in {:?}: {}",
                    entry.lesson.lesson_number,
                    delay,
                    e
                );
            })
            .await
            .map_err(|e| anyhow!("Lesson {} failed: {}", entry.lesson.lesson_number, e))?;
        println!("  ✅ Lesson {}: {}", lesson.lesson_number, lesson.title);

        for mut question in entry.questions {
            question.lesson_id = lesson.id;
            let number = question.question_number;
            let question = &question;
            (|| async move { store.upsert_question(question).await })
                .retry(retry_policy())
                .notify(|e, delay| {
                    tracing::warn!(
                        "Question {}.{} write failed, retrying in {:?}: {}",
                        lesson.lesson_number,
                        number,
                        delay,
                        e
                    );
                })
                .await
                .map_err(|e| {
                    anyhow!("Question {}.{} failed: {}", lesson.lesson_number, number, e)
                })?;
            question_count += 1;
        }
    }

    println!("🎯 Seeded {question_count} questions. The course is ready!");
    Ok(())
}

async fn check() -> Result<()> {
    println!("🔍 Checking store connection and content...");

    dotenvy::dotenv().ok();
    let backend = Backend::from_env()?;
    let store = connect(&backend).await?;

    if let Err(e) = store.ping().await {
        println!("⚠️  Store check failed: {e}");
        return Ok(());
    }
    println!("✅ Store connection successful!");

    let lessons = store.list_lessons().await?;
    if lessons.is_empty() {
        println!("💡 No lessons yet. Run 'seed-lessons seed <file>' to load some.");
        return Ok(());
    }

    println!("📋 Lessons:");
    for lesson in lessons {
        let questions = store.questions_for_lesson(lesson.id).await?;
        println!(
            "  • {}. {} ({} questions)",
            lesson.lesson_number,
            lesson.title,
            questions.len()
        );
    }
    Ok(())
}

fn mask_backend(backend: &Backend) -> String {
    match backend {
        Backend::Sqlite { database_url, .. } => {
            let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
            match Path::new(path).file_name() {
                Some(filename) => format!("sqlite:.../{}", filename.to_string_lossy()),
                None => database_url.clone(),
            }
        }
        Backend::Hosted { .. } => backend.summary(),
    }
}

fn print_help() {
    println!("📚 Workshop Signup Bot - Lesson Seeding Tool");
    println!();
    println!("USAGE:");
    println!("    seed-lessons [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    seed [FILE]    Upsert lessons and questions from a JSON pack");
    println!("                   (default: data/lessons.sample.json)");
    println!("    check          Check the store and list lessons");
    println!("    help           Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    DATABASE_URL   sqlite: URL for the local store");
    println!("    SUPABASE_URL   Hosted store URL (when DATABASE_URL is not sqlite:)");
    println!("    SUPABASE_KEY   Hosted store key");
    println!();
    println!("EXAMPLES:");
    println!("    seed-lessons seed data/lessons.sample.json");
    println!("    seed-lessons check");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_retry_policy_makes_four_attempts() {
        let delays: Vec<Duration> = retry_policy().build().collect();
        assert_eq!(delays.len() + 1, WRITE_ATTEMPTS);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[2], Duration::from_secs(4));
    }

    #[test]
    fn test_pack_entry_reads_inline_questions() {
        let pack: Vec<LessonPackEntry> =
            serde_json::from_str(include_str!("../../data/lessons.sample.json")).unwrap();
        assert!(!pack.is_empty());
        assert!(pack.iter().all(|entry| !entry.questions.is_empty()));
    }
}
