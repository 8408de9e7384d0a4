use serde::{Deserialize, Serialize};

/// Default number of points on a rating scale.
pub const DEFAULT_RATING_SCALE: u8 = 5;

/// The widget a question is answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Rating,
    Text,
    MultipleChoice,
    YesNo,
}

/// The aspect of the course a question evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Instructor,
    Content,
    Delivery,
    Assessment,
    Overall,
}

/// One item of a session's evaluation form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub category: QuestionCategory,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub priority: i32,
    /// Number of points, rating questions only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// Choices, multiple-choice questions only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Question {
    /// The effective scale of a rating question.
    pub fn scale(&self) -> u8 {
        self.scale.unwrap_or(DEFAULT_RATING_SCALE)
    }

    /// Checks the type-specific invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.question_type {
            QuestionType::Rating if self.scale() < 2 => Err(format!(
                "rating question {} has scale {}, expected at least 2",
                self.id,
                self.scale()
            )),
            QuestionType::MultipleChoice if self.options.is_empty() => Err(format!(
                "multiple choice question {} has no options",
                self.id
            )),
            _ => Ok(()),
        }
    }
}

/// Orders questions by ascending priority, keeping the authored order for ties.
pub fn sort_by_priority(questions: &mut [Question]) {
    // sort_by_key is stable
    questions.sort_by_key(|q| q.priority);
}
