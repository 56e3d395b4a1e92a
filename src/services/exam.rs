//! Per-user exam memory and scoring.
//!
//! An [`ExamSession`] walks a lesson's questions in order. Each question is
//! either answered (once) or revealed; revealed questions count neither for
//! nor against the score.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::database::models::{NewAnswer, Question, QuestionType};

/// Minimum score, in percent, that passes an exam.
pub const PASS_THRESHOLD: u32 = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAnswer {
    pub question_index: usize,
    pub question_id: i64,
    pub answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExamError {
    #[error("the exam has no open question")]
    Finished,
    #[error("question {got} is not the open question ({expected})")]
    Stale { expected: usize, got: usize },
    #[error("the open question expects a typed answer")]
    ExpectsText,
    #[error("the open question expects a choice")]
    ExpectsChoice,
    #[error("option {0} does not exist")]
    NoSuchOption(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamScore {
    pub correct: usize,
    pub answered: usize,
    pub percent: u32,
}

impl ExamScore {
    pub fn new(correct: usize, answered: usize) -> Self {
        Self {
            correct,
            answered,
            percent: score_percent(correct, answered),
        }
    }

    pub fn passed(&self) -> bool {
        self.percent >= PASS_THRESHOLD
    }
}

/// `round(100 * correct / answered)`, or 0 when nothing was answered.
pub fn score_percent(correct: usize, answered: usize) -> u32 {
    if answered == 0 {
        return 0;
    }
    ((correct as f64 * 100.0) / answered as f64).round() as u32
}

#[derive(Debug, Clone)]
pub struct ExamSession {
    pub lesson_id: i64,
    pub lesson_number: i64,
    questions: Vec<Question>,
    cursor: usize,
    answers: Vec<RecordedAnswer>,
    revealed: BTreeSet<usize>,
}

impl ExamSession {
    /// Starts at the first question; `questions` must be ordered by number.
    pub fn new(lesson_id: i64, lesson_number: i64, questions: Vec<Question>) -> Self {
        Self {
            lesson_id,
            lesson_number,
            questions,
            cursor: 0,
            answers: Vec::new(),
            revealed: BTreeSet::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.questions.len()
    }

    /// The open question and its index.
    pub fn current(&self) -> Option<(usize, &Question)> {
        self.questions.get(self.cursor).map(|q| (self.cursor, q))
    }

    /// Expected answer of question `index`, answered or not.
    pub fn correct_answer(&self, index: usize) -> Option<&str> {
        self.questions.get(index).map(|q| q.correct_answer.as_str())
    }

    pub fn answers(&self) -> &[RecordedAnswer] {
        &self.answers
    }

    pub fn revealed(&self) -> &BTreeSet<usize> {
        &self.revealed
    }

    fn open(&self, question_index: usize) -> Result<&Question, ExamError> {
        let (index, question) = self.current().ok_or(ExamError::Finished)?;
        if index != question_index {
            return Err(ExamError::Stale {
                expected: index,
                got: question_index,
            });
        }
        Ok(question)
    }

    fn record(&mut self, answer: String, is_correct: bool) -> RecordedAnswer {
        let recorded = RecordedAnswer {
            question_index: self.cursor,
            question_id: self.questions[self.cursor].id,
            answer,
            is_correct,
        };
        self.answers.push(recorded.clone());
        self.cursor += 1;
        recorded
    }

    /// Records a button choice for `question_index` and advances.
    pub fn choose(&mut self, question_index: usize, option: usize) -> Result<RecordedAnswer, ExamError> {
        let question = self.open(question_index)?;
        if question.question_type != QuestionType::MultipleChoice {
            return Err(ExamError::ExpectsText);
        }
        let chosen = question
            .options
            .get(option)
            .ok_or(ExamError::NoSuchOption(option))?
            .clone();
        let is_correct = chosen.trim() == question.correct_answer.trim();
        Ok(self.record(chosen, is_correct))
    }

    /// Records a typed answer for the open question and advances.
    ///
    /// Matching ignores case and surrounding whitespace.
    pub fn answer_text(&mut self, text: &str) -> Result<RecordedAnswer, ExamError> {
        let (_, question) = self.current().ok_or(ExamError::Finished)?;
        if question.question_type != QuestionType::Text {
            return Err(ExamError::ExpectsChoice);
        }
        let answer = text.trim().to_string();
        let is_correct = answer.to_lowercase() == question.correct_answer.trim().to_lowercase();
        Ok(self.record(answer, is_correct))
    }

    /// Marks `question_index` as revealed, advances and returns the question.
    pub fn reveal(&mut self, question_index: usize) -> Result<Question, ExamError> {
        let question = self.open(question_index)?.clone();
        self.revealed.insert(question_index);
        self.cursor += 1;
        Ok(question)
    }

    pub fn score(&self) -> ExamScore {
        let scored = self
            .answers
            .iter()
            .filter(|a| !self.revealed.contains(&a.question_index));
        let (answered, correct) = scored.fold((0, 0), |(answered, correct), a| {
            (answered + 1, correct + usize::from(a.is_correct))
        });
        ExamScore::new(correct, answered)
    }

    /// Answers as rows for the store.
    pub fn to_rows(&self, telegram_id: i64) -> Vec<NewAnswer> {
        self.answers
            .iter()
            .map(|a| NewAnswer {
                telegram_id,
                question_id: a.question_id,
                user_answer: a.answer.clone(),
                is_correct: a.is_correct,
            })
            .collect()
    }
}
