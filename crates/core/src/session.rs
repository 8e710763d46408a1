//! Session Domain Model
//!
//! A `Session` is one discussion run: a fixed roster of participants answering
//! a sequence of generated questions in rotation. This module holds the closed,
//! explicitly typed record shared by the turn engine, the controller and every
//! store implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a session. Progression is monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Created,
    Active,
    /// Used by the room-based, trigger-driven deployment.
    InSession,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::InSession => "in-session",
            SessionStatus::Finished => "finished",
        }
    }

    /// Whether answers can currently be submitted.
    pub fn accepts_answers(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::InSession)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "active" => Ok(SessionStatus::Active),
            "in-session" => Ok(SessionStatus::InSession),
            "finished" => Ok(SessionStatus::Finished),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One recorded answer. The log of answers is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub participant: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// The host who created the session. Never changes; scopes listing and deletion.
    pub owner_id: String,
    /// The last user to mutate the record.
    pub user_id: String,
    pub prompt: String,
    pub end_goal: Option<String>,
    pub participants: Vec<String>,
    pub num_questions: u32,
    /// Per-turn answer budget in seconds.
    pub time_limit: u32,
    pub current_question: Option<String>,
    pub current_turn: usize,
    pub answers: Vec<Answer>,
    /// Questions already put to the group, kept so generation can avoid repeats.
    pub asked_questions: Vec<String>,
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub rating: Option<u8>,
    pub reference_document_id: Option<String>,
    /// Optimistic concurrency token, bumped by the store on every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Number of fully answered question rounds.
    pub fn questions_completed(&self) -> usize {
        if self.participants.is_empty() {
            return 0;
        }
        self.answers.len() / self.participants.len()
    }

    /// The participant expected to answer next, if the roster is set.
    pub fn participant_on_turn(&self) -> Option<&str> {
        self.participants.get(self.current_turn).map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }
}

/// Fields supplied when a session is first inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    /// The creating user, who becomes the owner.
    pub user_id: String,
    pub prompt: String,
    pub end_goal: Option<String>,
    pub num_questions: u32,
    pub participants: Vec<String>,
    pub time_limit: u32,
    pub reference_document_id: Option<String>,
}

impl NewSession {
    /// Materialises the record a store persists, with `status = created`,
    /// no answers and no question yet.
    pub fn into_session(self, id: Uuid, now: DateTime<Utc>) -> Session {
        Session {
            id,
            owner_id: self.user_id.clone(),
            user_id: self.user_id,
            prompt: self.prompt,
            end_goal: self.end_goal,
            participants: self.participants,
            num_questions: self.num_questions,
            time_limit: self.time_limit,
            current_question: None,
            current_turn: 0,
            answers: Vec::new(),
            asked_questions: Vec::new(),
            status: SessionStatus::Created,
            summary: None,
            rating: None,
            reference_document_id: self.reference_document_id,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
