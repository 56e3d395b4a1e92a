use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::validation::parse_user_ids;

/// A workshop plan offered during registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub key: &'static str,
    pub name: &'static str,
    pub price: &'static str,
}

/// The fixed plan catalog, in display order.
pub const PLANS: [Plan; 3] = [
    Plan {
        key: "economy",
        name: "Economy",
        price: "490,000 Toman",
    },
    Plan {
        key: "standard",
        name: "Standard",
        price: "790,000 Toman",
    },
    Plan {
        key: "professional",
        name: "Professional",
        price: "1,290,000 Toman",
    },
];

pub fn find_plan(key: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.key == key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseMode {
    /// Paid workshop: plan, payment, admin review.
    Paid,
    /// Free course: name and phone, confirmed immediately.
    Free,
}

impl FromStr for CourseMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "paid" => Ok(CourseMode::Paid),
            "free" => Ok(CourseMode::Free),
            other => Err(anyhow!("Invalid COURSE_MODE '{}': expected 'paid' or 'free'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankDetails {
    pub bank_name: String,
    pub account: String,
    pub holder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Supabase project: PostgREST tables plus a storage bucket.
    Hosted {
        url: String,
        key: String,
        bucket: String,
    },
    /// Local SQLite file with receipts written to a directory.
    Sqlite {
        database_url: String,
        receipts_dir: PathBuf,
    },
}

impl Backend {
    /// Store settings alone, for tools that never talk to Telegram.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|name: &str| env::var(name).ok())
    }

    /// A `sqlite:` `DATABASE_URL` selects the local backend; otherwise the
    /// Supabase credentials are required.
    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_blank(lookup, name);

        match var("DATABASE_URL") {
            Some(database_url) if database_url.starts_with("sqlite:") => Ok(Backend::Sqlite {
                database_url,
                receipts_dir: PathBuf::from(
                    var("RECEIPTS_DIR").unwrap_or_else(|| "./data/receipts".to_string()),
                ),
            }),
            _ => {
                let url = var("SUPABASE_URL").ok_or_else(|| anyhow!("SUPABASE_URL must be set"))?;
                let key = var("SUPABASE_KEY").ok_or_else(|| anyhow!("SUPABASE_KEY must be set"))?;
                Ok(Backend::Hosted {
                    url,
                    key,
                    bucket: var("STORAGE_BUCKET").unwrap_or_else(|| "receipts".to_string()),
                })
            }
        }
    }

    /// Short description for logs; never includes keys.
    pub fn summary(&self) -> String {
        match self {
            Backend::Hosted { url, bucket, .. } => format!("hosted ({url}, bucket {bucket})"),
            Backend::Sqlite { database_url, .. } => format!("sqlite ({database_url})"),
        }
    }
}

fn non_blank<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub backend: Backend,
    pub admin_ids: Vec<i64>,
    pub course_mode: CourseMode,
    /// Gateway URL per plan key; a missing entry disables online payment for that plan.
    pub payment_urls: BTreeMap<String, String>,
    /// `None` disables offline payment.
    pub bank: Option<BankDetails>,
    pub http_port: u16,
    pub session_ttl: Duration,
    pub next_lesson_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_blank(&lookup, name);

        let bot_token = var("BOT_TOKEN")
            .or_else(|| var("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| anyhow!("BOT_TOKEN must be set"))?;

        let backend = Backend::from_lookup(&lookup)?;

        let admin_ids = parse_user_ids(&var("ADMIN_IDS").unwrap_or_default())
            .map_err(|e| anyhow!("Invalid ADMIN_IDS: {}", e))?;

        let course_mode = match var("COURSE_MODE") {
            Some(mode) => mode.parse()?,
            None => CourseMode::Paid,
        };

        let payment_urls = PLANS
            .iter()
            .filter_map(|plan| {
                var(&format!("ZARINPAL_URL_{}", plan.key.to_uppercase()))
                    .map(|url| (plan.key.to_string(), url))
            })
            .collect();

        let bank = match (var("BANK_NAME"), var("BANK_ACCOUNT"), var("ACCOUNT_HOLDER")) {
            (Some(bank_name), Some(account), Some(holder)) => Some(BankDetails {
                bank_name,
                account,
                holder,
            }),
            _ => None,
        };

        let http_port = parse_or(var("HTTP_PORT"), 3000u16, "HTTP_PORT")?;
        let ttl_minutes = parse_or(var("SESSION_TTL_MINUTES"), 1440u64, "SESSION_TTL_MINUTES")?;
        let session_ttl = ttl_minutes
            .checked_mul(60)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow!("Invalid SESSION_TTL_MINUTES: expected a positive number of minutes"))?;
        let delay_secs = parse_or(var("NEXT_LESSON_DELAY_SECS"), 2u64, "NEXT_LESSON_DELAY_SECS")?;

        Ok(Config {
            bot_token,
            backend,
            admin_ids,
            course_mode,
            payment_urls,
            bank,
            http_port,
            session_ttl,
            next_lesson_delay: Duration::from_secs(delay_secs),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn payment_url(&self, plan_key: &str) -> Option<&str> {
        self.payment_urls.get(plan_key).map(String::as_str)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T, name: &str) -> Result<T> {
    match value {
        Some(raw) => raw.parse().map_err(|_| anyhow!("Invalid {}", name)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_catalog() {
        assert_eq!(PLANS.len(), 3);
        assert_eq!(find_plan("standard").map(|p| p.name), Some("Standard"));
        assert!(find_plan("premium").is_none());
    }

    #[test]
    fn test_course_mode_parsing() {
        assert_eq!("FREE".parse::<CourseMode>().unwrap(), CourseMode::Free);
        assert_eq!(" paid ".parse::<CourseMode>().unwrap(), CourseMode::Paid);
        assert!("trial".parse::<CourseMode>().is_err());
    }
}
