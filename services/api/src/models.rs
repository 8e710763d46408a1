//! API Models
//!
//! Request payloads and response bodies, documented with `utoipa`. Payloads
//! reject unknown fields so client typos surface as 400s instead of being
//! silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turntalks_core::{
    controller::{AnswerOutcome, CreateSession},
    session::{Answer, Session, SessionStatus as CoreStatus},
    turn_engine::Transition,
};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Created,
    Active,
    InSession,
    Finished,
}

impl From<CoreStatus> for SessionStatus {
    fn from(status: CoreStatus) -> Self {
        match status {
            CoreStatus::Created => SessionStatus::Created,
            CoreStatus::Active => SessionStatus::Active,
            CoreStatus::InSession => SessionStatus::InSession,
            CoreStatus::Finished => SessionStatus::Finished,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct AnswerEntry {
    pub participant: String,
    pub answer: String,
}

impl From<Answer> for AnswerEntry {
    fn from(answer: Answer) -> Self {
        Self {
            participant: answer.participant,
            answer: answer.answer,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    /// The host who created the session.
    pub owner_id: String,
    /// The last user to act on the session.
    pub user_id: String,
    pub prompt: String,
    pub end_goal: Option<String>,
    pub participants: Vec<String>,
    pub num_questions: u32,
    /// Seconds each participant has to answer.
    pub time_limit: u32,
    pub current_question: Option<String>,
    pub current_turn: usize,
    /// The participant expected to answer next.
    pub participant_on_turn: Option<String>,
    pub questions_completed: usize,
    pub answers: Vec<AnswerEntry>,
    #[schema(example = "active")]
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub rating: Option<u8>,
    pub reference_document_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let participant_on_turn = session.participant_on_turn().map(str::to_string);
        let questions_completed = session.questions_completed();
        Self {
            id: session.id,
            owner_id: session.owner_id,
            user_id: session.user_id,
            prompt: session.prompt,
            end_goal: session.end_goal,
            participants: session.participants,
            num_questions: session.num_questions,
            time_limit: session.time_limit,
            current_question: session.current_question,
            current_turn: session.current_turn,
            participant_on_turn,
            questions_completed,
            answers: session.answers.into_iter().map(AnswerEntry::from).collect(),
            status: session.status.into(),
            summary: session.summary,
            rating: session.rating,
            reference_document_id: session.reference_document_id,
            version: session.version,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

fn default_num_questions() -> i64 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionPayload {
    #[schema(example = "How do we cut our release cycle in half?")]
    pub prompt: String,
    #[schema(example = "Three concrete actions with owners")]
    pub end_goal: Option<String>,
    /// Values below 1 are treated as 1.
    #[serde(default = "default_num_questions")]
    #[schema(example = 3)]
    pub num_questions: i64,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    #[schema(example = 60)]
    pub time_limit: i64,
    /// File id returned by `POST /documents`.
    pub reference_document_id: Option<String>,
}

impl From<CreateSessionPayload> for CreateSession {
    fn from(payload: CreateSessionPayload) -> Self {
        Self {
            prompt: payload.prompt,
            end_goal: payload.end_goal,
            num_questions: payload.num_questions,
            participants: payload.participants,
            time_limit: payload.time_limit,
            reference_document_id: payload.reference_document_id,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SetupSessionPayload {
    #[schema(example = json!(["Alice", "Bob"]))]
    pub participants: Vec<String>,
    #[schema(example = 60)]
    pub time_limit: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SubmitAnswerPayload {
    /// May be empty when a participant passes.
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerOutcomeKind {
    /// The next participant answers the same question.
    Advanced,
    /// The round completed and a new question was generated.
    Rotated,
    /// The question budget is spent; the summary is being generated.
    Finished,
}

impl From<Transition> for AnswerOutcomeKind {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Advance => AnswerOutcomeKind::Advanced,
            Transition::Rotate => AnswerOutcomeKind::Rotated,
            Transition::Finish => AnswerOutcomeKind::Finished,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitAnswerResponse {
    pub outcome: AnswerOutcomeKind,
    pub session: SessionResponse,
}

impl From<AnswerOutcome> for SubmitAnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        Self {
            outcome: outcome.transition.into(),
            session: outcome.session.into(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RatingPayload {
    #[schema(minimum = 1, maximum = 5, example = 5)]
    pub rating: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteSessionsPayload {
    #[schema(value_type = Vec<String>)]
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteSessionsResponse {
    pub deleted: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SpeechPayload {
    #[schema(example = "What is the biggest blocker this sprint?")]
    pub text: String,
    #[schema(example = "nova")]
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// Multipart form accepted by `POST /transcriptions`.
#[derive(ToSchema)]
pub struct TranscriptionUpload {
    #[schema(value_type = String, format = Binary)]
    pub audio: Vec<u8>,
}

/// Multipart form accepted by `POST /documents`.
#[derive(ToSchema)]
pub struct DocumentUpload {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    /// Defaults to `assistants`.
    pub purpose: Option<String>,
    /// Declared size in bytes, checked before the upload is relayed.
    pub file_size: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TranscriptionResponse {
    pub transcription: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentUploadResponse {
    #[schema(example = "file-abc123")]
    pub file_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use turntalks_core::session::NewSession;

    fn session() -> Session {
        let mut session = NewSession {
            user_id: "host-1".to_string(),
            prompt: "Retro".to_string(),
            end_goal: Some("Next steps".to_string()),
            num_questions: 2,
            participants: vec!["Alice".to_string(), "Bob".to_string()],
            time_limit: 60,
            reference_document_id: None,
        }
        .into_session(Uuid::new_v4(), Utc::now());
        session.status = CoreStatus::InSession;
        session.current_turn = 1;
        session.answers.push(Answer {
            participant: "Alice".to_string(),
            answer: "a1".to_string(),
        });
        session
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::InSession).unwrap(),
            "\"in-session\""
        );
        assert_eq!(
            serde_json::from_str::<SessionStatus>("\"finished\"").unwrap(),
            SessionStatus::Finished
        );
        assert!(serde_json::from_str::<SessionStatus>("\"Ended\"").is_err());
    }

    #[test]
    fn test_session_response_derives_turn_fields() {
        let response = SessionResponse::from(session());
        assert_eq!(response.participant_on_turn.as_deref(), Some("Bob"));
        assert_eq!(response.questions_completed, 0);
        assert_eq!(response.status, SessionStatus::InSession);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "in-session");
        assert_eq!(json["answers"][0]["participant"], "Alice");
        assert_eq!(json["end_goal"], "Next steps");
    }

    #[test]
    fn test_create_payload_defaults() {
        let payload: CreateSessionPayload =
            serde_json::from_str(r#"{"prompt": "Roadmap"}"#).unwrap();
        assert_eq!(payload.num_questions, 1);
        assert!(payload.participants.is_empty());
        assert_eq!(payload.time_limit, 0);
        assert!(payload.end_goal.is_none());

        let params = CreateSession::from(payload);
        assert_eq!(params.prompt, "Roadmap");
    }

    #[test]
    fn test_payloads_reject_unknown_fields() {
        assert!(
            serde_json::from_str::<CreateSessionPayload>(r#"{"prompt": "x", "topic": "y"}"#)
                .is_err()
        );
        assert!(
            serde_json::from_str::<SubmitAnswerPayload>(r#"{"answer": "x", "turn": 1}"#).is_err()
        );
        assert!(serde_json::from_str::<RatingPayload>(r#"{"stars": 5}"#).is_err());
    }

    #[test]
    fn test_outcome_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&AnswerOutcomeKind::from(Transition::Rotate)).unwrap(),
            "\"rotated\""
        );
    }

    #[test]
    fn test_delete_payload_parses_uuids() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let payload: DeleteSessionsPayload =
            serde_json::from_str(&format!(r#"{{"ids": ["{id}"]}}"#)).unwrap();
        assert_eq!(payload.ids, vec![id]);
        assert!(serde_json::from_str::<DeleteSessionsPayload>(r#"{"ids": ["nope"]}"#).is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            error: "Session not found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"error":"Session not found"}"#
        );
    }
}
