use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{AppError, Result, SubmitError},
    models::{
        question::{Question, QuestionType},
        response::{Ack, Answer, InsertOutcome, NewResponse, ResponseData, ResponseMetadata},
    },
    repositories::store::{ResponseRepository, SessionRepository},
    services::{duplicate::has_responded, stats::StatsRefresher},
};

/// Answers as they arrive from the form, before type checking.
pub type RawAnswers = BTreeMap<String, Value>;

/// Longest accepted free-text answer, in characters.
pub const MAX_TEXT_ANSWER_CHARS: usize = 5000;

/// Minutes a form may stay open past the session's scheduled length.
pub const COMPLETION_SLACK_MINUTES: i64 = 30;

/// Caps a client-declared completion time at the session length plus slack.
/// `started_at` comes back from the browser, so a backdated value must not
/// drag the session average.
pub fn bound_completion_time(metadata: &mut ResponseMetadata, duration_minutes: i32) {
    let ceiling = (i64::from(duration_minutes.max(0)) + COMPLETION_SLACK_MINUTES) * 60;
    if let Some(seconds) = metadata.completion_time_seconds {
        if seconds > ceiling {
            tracing::debug!("Completion time {}s capped at {}s", seconds, ceiling);
            metadata.completion_time_seconds = Some(ceiling);
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

fn invalid(question_id: &str, reason: impl Into<String>) -> SubmitError {
    SubmitError::InvalidAnswer {
        question_id: question_id.to_string(),
        reason: reason.into(),
    }
}

fn typed_answer(question: &Question, value: &Value) -> std::result::Result<Answer, SubmitError> {
    match question.question_type {
        QuestionType::Rating => {
            let rating = value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| invalid(&question.id, "rating must be a whole number"))?;
            let scale = i64::from(question.scale());
            if !(1..=scale).contains(&rating) {
                return Err(invalid(&question.id, format!("rating must be between 1 and {scale}")));
            }
            Ok(Answer::Rating(rating))
        }
        QuestionType::Text => {
            let text = value
                .as_str()
                .ok_or_else(|| invalid(&question.id, "answer must be text"))?
                .trim();
            if text.chars().count() > MAX_TEXT_ANSWER_CHARS {
                return Err(invalid(
                    &question.id,
                    format!("answer is longer than {MAX_TEXT_ANSWER_CHARS} characters"),
                ));
            }
            Ok(Answer::Text(text.to_string()))
        }
        QuestionType::MultipleChoice => {
            let choice = value
                .as_str()
                .ok_or_else(|| invalid(&question.id, "choice must be text"))?;
            if !question.options.iter().any(|o| o == choice) {
                return Err(invalid(&question.id, "choice is not one of the options"));
            }
            Ok(Answer::Text(choice.to_string()))
        }
        QuestionType::YesNo => {
            let answer = match value {
                Value::Bool(true) => "yes".to_string(),
                Value::Bool(false) => "no".to_string(),
                Value::String(s) => s.trim().to_ascii_lowercase(),
                _ => String::new(),
            };
            if answer != "yes" && answer != "no" {
                return Err(invalid(&question.id, "answer must be yes or no"));
            }
            Ok(Answer::Text(answer))
        }
    }
}

/// Checks completeness, then answer shapes, and returns the typed answers.
///
/// Every required question needs a non-blank answer. Blank optional answers
/// are dropped. Answers to questions the session does not have are rejected.
pub fn validate_answers(
    questions: &[Question],
    raw: &RawAnswers,
) -> std::result::Result<ResponseData, SubmitError> {
    let missing: Vec<String> = questions
        .iter()
        .filter(|q| q.required && raw.get(&q.id).is_none_or(is_blank))
        .map(|q| q.id.clone())
        .collect();

    if !missing.is_empty() {
        return Err(SubmitError::IncompleteResponse { missing });
    }

    let mut answers = ResponseData::new();
    for (question_id, value) in raw {
        let question = questions
            .iter()
            .find(|q| &q.id == question_id)
            .ok_or_else(|| invalid(question_id, "not part of this session"))?;

        if is_blank(value) {
            continue;
        }
        answers.insert(question_id.clone(), typed_answer(question, value)?);
    }

    Ok(answers)
}

/// Accepts, validates and records responses.
///
/// The pre-write duplicate check gives a fast, friendly rejection; the
/// store's uniqueness guarantee on insert is what actually holds the
/// one-response-per-participant line under concurrency.
#[derive(Clone)]
pub struct SubmissionPipeline {
    sessions: Arc<dyn SessionRepository>,
    responses: Arc<dyn ResponseRepository>,
    stats: StatsRefresher,
}

impl SubmissionPipeline {
    pub fn new(sessions: Arc<dyn SessionRepository>, responses: Arc<dyn ResponseRepository>) -> Self {
        let stats = StatsRefresher::new(sessions.clone(), responses.clone());
        Self {
            sessions,
            responses,
            stats,
        }
    }

    pub fn stats(&self) -> &StatsRefresher {
        &self.stats
    }

    /// Records a participant's single response for a session.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session being answered.
    /// * `anonymous_id` - The participant's anonymous ID.
    /// * `response_data` - Answers keyed by question ID.
    /// * `metadata` - Collection metadata.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Ack`.
    pub async fn submit(
        &self,
        session_id: Uuid,
        anonymous_id: &str,
        response_data: &RawAnswers,
        mut metadata: ResponseMetadata,
    ) -> Result<Ack> {
        if anonymous_id.trim().is_empty() {
            return Err(AppError::Validation("Anonymous ID is required".to_string()));
        }

        let context = self
            .sessions
            .find_submission_context(session_id)
            .await?
            .ok_or(SubmitError::SessionNotFound)?;

        if has_responded(self.responses.as_ref(), session_id, anonymous_id).await? {
            tracing::info!("🔁 Duplicate submission for session {} rejected before write", session_id);
            return Err(SubmitError::AlreadySubmitted.into());
        }

        let response_data = validate_answers(&context.questions, response_data)?;
        bound_completion_time(&mut metadata, context.duration_minutes);

        let outcome = self
            .responses
            .insert(NewResponse {
                id: Uuid::new_v4(),
                session_id,
                org: context.org,
                student_anonymous_id: anonymous_id.to_string(),
                response_data,
                metadata,
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(response) => {
                tracing::info!("📝 Response {} recorded for session {}", response.id, session_id);
                self.stats.spawn_refresh(session_id);
                Ok(Ack {
                    response_id: response.id,
                    submitted_at: response.submitted_at,
                })
            }
            InsertOutcome::Duplicate => {
                tracing::info!("🔁 Concurrent duplicate for session {} rejected by the store", session_id);
                Err(SubmitError::AlreadySubmitted.into())
            }
        }
    }

    /// Overwrites the answers of an existing response. Never inserts.
    pub async fn update(
        &self,
        session_id: Uuid,
        anonymous_id: &str,
        response_data: &RawAnswers,
        mut metadata: ResponseMetadata,
    ) -> Result<Ack> {
        let context = self
            .sessions
            .find_submission_context(session_id)
            .await?
            .ok_or(SubmitError::SessionNotFound)?;

        let response_data = validate_answers(&context.questions, response_data)?;
        bound_completion_time(&mut metadata, context.duration_minutes);

        let updated = self
            .responses
            .update(session_id, anonymous_id, &response_data, &metadata)
            .await?
            .ok_or(SubmitError::ResponseNotFound)?;

        tracing::info!("✏️ Response {} updated for session {}", updated.id, session_id);
        self.stats.spawn_refresh(session_id);

        Ok(Ack {
            response_id: updated.id,
            submitted_at: updated.submitted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionCategory;
    use serde_json::json;

    fn question(id: &str, question_type: QuestionType, required: bool) -> Question {
        Question {
            id: id.to_string(),
            text: id.to_string(),
            question_type,
            category: QuestionCategory::Content,
            required,
            priority: 0,
            scale: None,
            options: if question_type == QuestionType::MultipleChoice {
                vec!["Lectures".to_string(), "Labs".to_string()]
            } else {
                Vec::new()
            },
        }
    }

    fn raw(value: Value) -> RawAnswers {
        serde_json::from_value(value).unwrap()
    }

    fn form() -> Vec<Question> {
        vec![
            question("q1", QuestionType::Rating, true),
            question("q2", QuestionType::Rating, true),
            question("q3", QuestionType::Text, false),
            question("q4", QuestionType::MultipleChoice, false),
            question("q5", QuestionType::YesNo, false),
        ]
    }

    #[test]
    fn required_only_is_enough() {
        let answers = validate_answers(&form(), &raw(json!({"q1": 5, "q2": 4}))).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers["q1"], Answer::Rating(5));
    }

    #[test]
    fn missing_required_is_reported_regardless_of_optional_answers() {
        let err = validate_answers(
            &form(),
            &raw(json!({"q1": 5, "q3": "great", "q4": "Labs", "q5": "yes"})),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SubmitError::IncompleteResponse {
                missing: vec!["q2".to_string()]
            }
        );
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = validate_answers(&form(), &raw(json!({"q1": null, "q2": "  "}))).unwrap_err();
        assert_eq!(
            err,
            SubmitError::IncompleteResponse {
                missing: vec!["q1".to_string(), "q2".to_string()]
            }
        );
    }

    #[test]
    fn blank_optional_answers_are_dropped() {
        let answers =
            validate_answers(&form(), &raw(json!({"q1": 1, "q2": 2, "q3": "", "q5": null}))).unwrap();
        assert!(!answers.contains_key("q3"));
        assert!(!answers.contains_key("q5"));
    }

    #[test]
    fn answers_must_fit_their_question() {
        let cases = [
            json!({"q1": 6, "q2": 1}),
            json!({"q1": 0, "q2": 1}),
            json!({"q1": "great", "q2": 1}),
            json!({"q1": 3, "q2": 1, "q4": "Seminars"}),
            json!({"q1": 3, "q2": 1, "q5": "maybe"}),
            json!({"q1": 3, "q2": 1, "q3": 42}),
            json!({"q1": 3, "q2": 1, "q9": "hello"}),
        ];
        for case in cases {
            let result = validate_answers(&form(), &raw(case.clone()));
            assert!(
                matches!(result, Err(SubmitError::InvalidAnswer { .. })),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn lenient_encodings_are_normalized() {
        let answers = validate_answers(
            &form(),
            &raw(json!({"q1": "4", "q2": 2, "q3": "  fine  ", "q5": true})),
        )
        .unwrap();
        assert_eq!(answers["q1"], Answer::Rating(4));
        assert_eq!(answers["q3"], Answer::Text("fine".to_string()));
        assert_eq!(answers["q5"], Answer::Text("yes".to_string()));
    }

    #[test]
    fn backdated_start_is_capped_at_session_length_plus_slack() {
        let mut metadata = ResponseMetadata {
            ip: "unknown".to_string(),
            user_agent: String::new(),
            fingerprint: String::new(),
            device_type: crate::models::response::DeviceType::Desktop,
            started_at: None,
            completion_time_seconds: Some(86_400),
        };
        bound_completion_time(&mut metadata, 60);
        assert_eq!(metadata.completion_time_seconds, Some(90 * 60));

        metadata.completion_time_seconds = Some(300);
        bound_completion_time(&mut metadata, 60);
        assert_eq!(metadata.completion_time_seconds, Some(300));

        metadata.completion_time_seconds = None;
        bound_completion_time(&mut metadata, 60);
        assert_eq!(metadata.completion_time_seconds, None);
    }
}
