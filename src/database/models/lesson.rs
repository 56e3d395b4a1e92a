use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// A course lesson. Content is provisioned out-of-band and read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub lesson_number: i64,
    pub title: String,
    #[serde(default, deserialize_with = "json_list")]
    pub content: Vec<String>,
    #[serde(default, deserialize_with = "json_list")]
    pub code_examples: Vec<String>,
    #[serde(default, deserialize_with = "json_list")]
    pub expected_outputs: Vec<String>,
    #[serde(default = "default_true")]
    pub is_free: bool,
    #[serde(default)]
    pub section: Option<String>,
}

impl Lesson {
    /// Code examples paired with their expected output, when one exists.
    pub fn examples(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.code_examples
            .iter()
            .enumerate()
            .map(|(i, code)| (code.as_str(), self.expected_outputs.get(i).map(String::as_str)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    Text,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Text => "text",
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "text" => Ok(QuestionType::Text),
            other => Err(format!("unknown question type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub lesson_id: i64,
    pub question_number: i64,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(default, deserialize_with = "json_list")]
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Lesson content as written by the seeding tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLesson {
    pub lesson_number: i64,
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub code_examples: Vec<String>,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default = "default_true")]
    pub is_free: bool,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    #[serde(default)]
    pub lesson_id: i64,
    pub question_number: i64,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Accepts a JSON array, a string holding a JSON array, or null.
///
/// Hosted tables store these columns either as `jsonb` or as text, so both
/// shapes have to decode to the same list.
pub fn json_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Raw::List(items)) => Ok(items),
        Some(Raw::Encoded(text)) => parse_json_list(&text).map_err(serde::de::Error::custom),
    }
}

/// Decodes a text column holding a JSON array of strings.
///
/// Blank text is an empty list. Text that is not a JSON array is kept as a
/// single segment rather than dropped.
pub fn parse_json_list(text: &str) -> Result<Vec<String>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON list: {e}"));
    }
    Ok(vec![text.to_string()])
}
