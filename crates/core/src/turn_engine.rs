//! Turn Engine
//!
//! Pure state transitions over a [`Session`]. Submitting an answer is split in
//! two phases so the engine never performs I/O:
//!
//! 1. [`record_answer`] appends the answer and decides the transition. When a
//!    round completes it also yields the [`QuestionRequest`] for the next
//!    question.
//! 2. [`PendingAnswer::resolve`] produces the next record once the caller has
//!    the new question (only rotations need one).
//!
//! Because nothing is produced until `resolve` succeeds, a failed question
//! fetch leaves the caller holding the untouched original record.

use crate::{
    error::{SessionError, SessionResult},
    prompts::QuestionRequest,
    session::{Answer, Session, SessionStatus},
};

/// What an accepted answer does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The next participant answers the same question.
    Advance,
    /// The round is complete; a new question is required and the turn resets to 0.
    Rotate,
    /// The question budget is spent.
    Finish,
}

/// An answer that has been applied in memory but not yet finalised.
#[derive(Debug, Clone)]
pub struct PendingAnswer {
    next: Session,
    transition: Transition,
    question_request: Option<QuestionRequest>,
}

/// Applies `answer_text` for the participant on turn and works out the transition.
///
/// Empty answers are accepted as-is.
pub fn record_answer(session: &Session, answer_text: &str) -> SessionResult<PendingAnswer> {
    match session.status {
        SessionStatus::Created => {
            return Err(SessionError::validation(
                "session has not been set up with participants yet",
            ));
        }
        SessionStatus::Finished => {
            return Err(SessionError::validation("session has already finished"));
        }
        SessionStatus::Active | SessionStatus::InSession => {}
    }

    let roster = session.participants.len();
    if roster == 0 {
        return Err(SessionError::validation("session has no participants"));
    }
    let current_question = session
        .current_question
        .clone()
        .ok_or_else(|| SessionError::validation("no question has been generated yet"))?;
    let current_turn = session.current_turn;
    let participant = session.participants.get(current_turn).ok_or_else(|| {
        SessionError::validation(format!(
            "turn {current_turn} is outside the roster of {roster} participants"
        ))
    })?;

    let mut next = session.clone();
    next.answers.push(Answer {
        participant: participant.clone(),
        answer: answer_text.to_string(),
    });

    let questions_completed = next.answers.len() / roster;
    if questions_completed >= next.num_questions as usize {
        next.status = SessionStatus::Finished;
        next.current_turn = next.answers.len() % roster;
        return Ok(PendingAnswer {
            next,
            transition: Transition::Finish,
            question_request: None,
        });
    }

    if current_turn == roster - 1 {
        next.current_turn = 0;
        let mut previous_questions = session.asked_questions.clone();
        previous_questions.push(current_question);
        let request = QuestionRequest::follow_up(&next, &next.answers, previous_questions);
        return Ok(PendingAnswer {
            next,
            transition: Transition::Rotate,
            question_request: Some(request),
        });
    }

    next.current_turn = current_turn + 1;
    Ok(PendingAnswer {
        next,
        transition: Transition::Advance,
        question_request: None,
    })
}

impl PendingAnswer {
    pub fn transition(&self) -> Transition {
        self.transition
    }

    /// The question to request before resolving, present only for rotations.
    pub fn question_request(&self) -> Option<&QuestionRequest> {
        self.question_request.as_ref()
    }

    /// Finalises the next record. Rotations require `new_question`; other
    /// transitions ignore it.
    pub fn resolve(self, new_question: Option<String>) -> SessionResult<Session> {
        let Self {
            mut next,
            transition,
            question_request,
        } = self;

        if transition == Transition::Rotate {
            let question = new_question.ok_or_else(|| {
                SessionError::validation("a completed round requires a new question")
            })?;
            if let Some(request) = question_request {
                next.asked_questions = request.previous_questions;
            }
            next.current_question = Some(question);
        }
        Ok(next)
    }
}
