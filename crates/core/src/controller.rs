//! Session Lifecycle Controller
//!
//! Orchestrates a session from creation to summary. This is the only component
//! that talks to both the record store and the completion service; every
//! mutation is a load, a pure transition and a single version-checked write, so
//! a failed step never leaves a partially updated record behind.

use crate::{
    error::{SessionError, SessionResult},
    llm_client::CompletionService,
    prompts::{QuestionRequest, SummaryRequest},
    session::{NewSession, Session, SessionStatus},
    store::SessionStore,
    turn_engine::{self, Transition},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// Host-supplied fields for a new session.
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub prompt: String,
    pub end_goal: Option<String>,
    /// Values below 1 are coerced up to 1.
    pub num_questions: i64,
    pub participants: Vec<String>,
    pub time_limit: i64,
    pub reference_document_id: Option<String>,
}

/// The result of an accepted answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub session: Session,
    pub transition: Transition,
}

impl AnswerOutcome {
    pub fn finished(&self) -> bool {
        self.transition == Transition::Finish
    }
}

/// Per-session async locks serialising question and summary generation, so
/// concurrent reloads trigger a single completion call. An entry lives only
/// while some caller holds or waits on it.
#[derive(Default)]
struct GenerationLocks {
    locks: SyncMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl GenerationLocks {
    async fn acquire(&self, id: Uuid) -> GenerationGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        GenerationGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drops the entry for `id` once nobody else references its lock.
    fn release(&self, id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct GenerationGuard<'a> {
    locks: &'a GenerationLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        // The owned guard holds a reference to the lock; release it first.
        self.guard.take();
        self.locks.release(self.id);
    }
}

#[derive(Clone)]
pub struct SessionController {
    store: Arc<dyn SessionStore>,
    completion: Arc<dyn CompletionService>,
    generation_locks: Arc<GenerationLocks>,
}

impl SessionController {
    pub fn new(store: Arc<dyn SessionStore>, completion: Arc<dyn CompletionService>) -> Self {
        Self {
            store,
            completion,
            generation_locks: Arc::new(GenerationLocks::default()),
        }
    }

    /// Inserts a new session with `status = created`, no answers and no question.
    pub async fn create_session(
        &self,
        user_id: &str,
        params: CreateSession,
    ) -> SessionResult<Session> {
        let user_id = require_user(user_id)?;
        let prompt = params.prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::validation("prompt is required"));
        }
        let time_limit = u32::try_from(params.time_limit).map_err(|_| {
            SessionError::validation("time limit must be a non-negative number of seconds")
        })?;

        let session = self
            .store
            .insert(NewSession {
                user_id: user_id.to_string(),
                prompt: prompt.to_string(),
                end_goal: non_blank(params.end_goal),
                num_questions: coerce_num_questions(params.num_questions),
                participants: normalize_participants(params.participants)?,
                time_limit,
                reference_document_id: non_blank(params.reference_document_id),
            })
            .await?;

        info!(session_id = %session.id, num_questions = session.num_questions, "Session created");
        Ok(session)
    }

    /// Fixes the participant roster and turn time budget, and activates the session.
    pub async fn setup_session(
        &self,
        user_id: &str,
        id: Uuid,
        participants: Vec<String>,
        time_limit: i64,
    ) -> SessionResult<Session> {
        let user_id = require_user(user_id)?;
        let participants = normalize_participants(participants)?;
        if participants.is_empty() {
            return Err(SessionError::validation("at least one participant is required"));
        }
        let time_limit = u32::try_from(time_limit).map_err(|_| {
            SessionError::validation("time limit must be a non-negative number of seconds")
        })?;

        let mut session = self.load(id).await?;
        if session.status != SessionStatus::Created {
            return Err(SessionError::validation(
                "participants are fixed once setup has completed",
            ));
        }
        session.participants = participants;
        session.time_limit = time_limit;
        session.current_turn = 0;
        session.status = SessionStatus::Active;
        session.user_id = user_id.to_string();

        let stored = self.store.update(&session).await?;
        info!(session_id = %id, participants = stored.participants.len(), "Session set up");
        Ok(stored)
    }

    /// Generates and stores the opening question unless one is already set.
    pub async fn ensure_initial_question(&self, user_id: &str, id: Uuid) -> SessionResult<Session> {
        let user_id = require_user(user_id)?;
        let _guard = self.generation_locks.acquire(id).await;

        let mut session = self.load(id).await?;
        if session.current_question.is_some() {
            return Ok(session);
        }

        let question = self
            .request_question(&QuestionRequest::opening(&session))
            .await?;
        session.current_question = Some(question);
        session.user_id = user_id.to_string();

        let stored = self.store.update(&session).await?;
        info!(session_id = %id, "Initial question generated");
        Ok(stored)
    }

    /// Records an answer for the participant on turn and persists the next state.
    ///
    /// When the answer completes a round, the next question is fetched before
    /// anything is written. Callers trigger [`Self::generate_summary`] when the
    /// outcome is finished.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        id: Uuid,
        answer: &str,
    ) -> SessionResult<AnswerOutcome> {
        let user_id = require_user(user_id)?;
        let session = self.load(id).await?;

        let pending = turn_engine::record_answer(&session, answer)?;
        let new_question = match pending.question_request() {
            Some(request) => Some(self.request_question(request).await?),
            None => None,
        };
        let transition = pending.transition();
        let mut next = pending.resolve(new_question)?;
        next.user_id = user_id.to_string();

        let stored = self.store.update(&next).await?;
        info!(
            session_id = %id,
            ?transition,
            answers = stored.answers.len(),
            turn = stored.current_turn,
            "Answer recorded"
        );
        Ok(AnswerOutcome {
            session: stored,
            transition,
        })
    }

    /// Generates the closing summary once; later calls return the stored one.
    pub async fn generate_summary(&self, user_id: &str, id: Uuid) -> SessionResult<Session> {
        let user_id = require_user(user_id)?;
        let _guard = self.generation_locks.acquire(id).await;

        let mut session = self.load(id).await?;
        if session.summary.is_some() {
            return Ok(session);
        }
        if !session.is_finished() {
            return Err(SessionError::validation(
                "a summary is only available once the session has finished",
            ));
        }

        let summary = self
            .completion
            .generate_summary(&SummaryRequest::for_session(&session))
            .await
            .map_err(|e| {
                warn!(session_id = %id, error = ?e, "Summary generation failed");
                SessionError::Upstream(e)
            })?;
        if summary.trim().is_empty() {
            return Err(SessionError::Upstream(anyhow::anyhow!(
                "completion service returned an empty summary"
            )));
        }

        session.summary = Some(summary);
        session.status = SessionStatus::Finished;
        session.user_id = user_id.to_string();

        let stored = self.store.update(&session).await?;
        info!(session_id = %id, "Summary generated");
        Ok(stored)
    }

    /// Stores a 1..=5 rating. Later ratings overwrite earlier ones.
    pub async fn rate(&self, user_id: &str, id: Uuid, rating: i64) -> SessionResult<Session> {
        let user_id = require_user(user_id)?;
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(SessionError::validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }

        let mut session = self.load(id).await?;
        session.rating = Some(rating as u8);
        session.user_id = user_id.to_string();
        self.store.update(&session).await
    }

    pub async fn get_session(&self, id: Uuid) -> SessionResult<Session> {
        self.load(id).await
    }

    /// Sessions the caller created, newest first.
    pub async fn list_sessions(&self, user_id: &str) -> SessionResult<Vec<Session>> {
        let user_id = require_user(user_id)?;
        self.store.list(user_id).await
    }

    /// Bulk delete from the dashboard. Only sessions the caller created are removed.
    pub async fn delete_sessions(&self, user_id: &str, ids: &[Uuid]) -> SessionResult<u64> {
        let user_id = require_user(user_id)?;
        if ids.is_empty() {
            return Err(SessionError::validation("no sessions selected for deletion"));
        }
        let removed = self.store.delete_many(user_id, ids).await?;
        info!(requested = ids.len(), removed, "Sessions deleted");
        Ok(removed)
    }

    async fn load(&self, id: Uuid) -> SessionResult<Session> {
        self.store
            .get(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    async fn request_question(&self, request: &QuestionRequest) -> SessionResult<String> {
        let question = self
            .completion
            .generate_question(request)
            .await
            .map_err(|e| {
                warn!(error = ?e, "Question generation failed");
                SessionError::Upstream(e)
            })?;
        if question.trim().is_empty() {
            return Err(SessionError::Upstream(anyhow::anyhow!(
                "completion service returned an empty question"
            )));
        }
        Ok(question)
    }
}

fn require_user(user_id: &str) -> SessionResult<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(SessionError::Unauthenticated);
    }
    Ok(user_id)
}

fn coerce_num_questions(requested: i64) -> u32 {
    requested.clamp(1, i64::from(u32::MAX)) as u32
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_participants(participants: Vec<String>) -> SessionResult<Vec<String>> {
    participants
        .into_iter()
        .map(|name| {
            let name = name.trim().to_string();
            if name.is_empty() {
                Err(SessionError::validation("participant names cannot be blank"))
            } else {
                Ok(name)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{llm_client::MockCompletionService, store::InMemorySessionStore};
    use anyhow::anyhow;

    const HOST: &str = "host-1";

    fn controller(mock: MockCompletionService) -> (SessionController, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let controller = SessionController::new(store.clone(), Arc::new(mock));
        (controller, store)
    }

    fn params(num_questions: i64) -> CreateSession {
        CreateSession {
            prompt: "How do we improve onboarding?".to_string(),
            end_goal: Some("Three concrete actions".to_string()),
            num_questions,
            ..Default::default()
        }
    }

    async fn started(controller: &SessionController, roster: &[&str], rounds: i64) -> Session {
        let session = controller.create_session(HOST, params(rounds)).await.unwrap();
        controller
            .setup_session(
                HOST,
                session.id,
                roster.iter().map(|p| p.to_string()).collect(),
                60,
            )
            .await
            .unwrap();
        controller
            .ensure_initial_question(HOST, session.id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_coerces_question_count_and_rejects_blank_prompt() {
        let (controller, _) = controller(MockCompletionService::new());
        let session = controller.create_session(HOST, params(0)).await.unwrap();
        assert_eq!(session.num_questions, 1);
        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.answers.is_empty());
        assert!(session.current_question.is_none());

        let mut blank = params(3);
        blank.prompt = "   ".to_string();
        assert!(matches!(
            controller.create_session(HOST, blank).await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let (controller, _) = controller(MockCompletionService::new());
        assert!(matches!(
            controller.create_session("", params(1)).await,
            Err(SessionError::Unauthenticated)
        ));
        assert!(matches!(
            controller.submit_answer(" ", Uuid::new_v4(), "x").await,
            Err(SessionError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn setup_activates_once_and_validates_roster() {
        let (controller, _) = controller(MockCompletionService::new());
        let session = controller.create_session(HOST, params(2)).await.unwrap();

        assert!(matches!(
            controller.setup_session(HOST, session.id, vec![], 30).await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            controller
                .setup_session(HOST, session.id, vec!["Alice".into(), " ".into()], 30)
                .await,
            Err(SessionError::Validation(_))
        ));

        let active = controller
            .setup_session(HOST, session.id, vec![" Alice ".into(), "Bob".into()], 45)
            .await
            .unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(active.participants, vec!["Alice", "Bob"]);
        assert_eq!(active.time_limit, 45);

        assert!(controller
            .setup_session(HOST, session.id, vec!["Cara".into()], 45)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn initial_question_is_generated_once() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .withf(|r: &QuestionRequest| r.context.is_empty() && r.previous_questions.is_empty())
            .times(1)
            .returning(|_| Ok("Opening question?".to_string()));
        let (controller, store) = controller(mock);
        let session = controller.create_session(HOST, params(1)).await.unwrap();

        let first = controller
            .ensure_initial_question(HOST, session.id)
            .await
            .unwrap();
        let second = controller
            .ensure_initial_question(HOST, session.id)
            .await
            .unwrap();

        assert_eq!(first.current_question.as_deref(), Some("Opening question?"));
        assert_eq!(second, first);
        assert_eq!(store.get(session.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn participants_answering_never_take_over_the_session() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("Q1".to_string()));
        mock.expect_generate_summary()
            .returning(|_| Ok("Wrapped up.".to_string()));
        let (controller, _) = controller(mock);
        let session = started(&controller, &["Alice", "Bob"], 1).await;

        controller
            .submit_answer("alice-user", session.id, "a1")
            .await
            .unwrap();
        let last = controller
            .submit_answer("bob-user", session.id, "b1")
            .await
            .unwrap();
        assert!(last.finished());
        assert_eq!(last.session.user_id, "bob-user");
        assert_eq!(last.session.owner_id, HOST);

        let summarized = controller
            .generate_summary("bob-user", session.id)
            .await
            .unwrap();
        controller.rate("alice-user", session.id, 5).await.unwrap();
        assert_eq!(summarized.owner_id, HOST);

        let listed = controller.list_sessions(HOST).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id, "alice-user");
        assert!(controller.list_sessions("bob-user").await.unwrap().is_empty());
        assert_eq!(
            controller
                .delete_sessions("alice-user", &[session.id])
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            controller.delete_sessions(HOST, &[session.id]).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn generation_locks_are_released_after_use() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("Q1".to_string()));
        mock.expect_generate_summary()
            .returning(|_| Ok("Done.".to_string()));
        let (controller, _) = controller(mock);
        let session = started(&controller, &["Solo"], 1).await;
        assert_eq!(controller.generation_locks.len(), 0);

        controller.submit_answer(HOST, session.id, "a1").await.unwrap();
        let (a, b) = tokio::join!(
            controller.generate_summary(HOST, session.id),
            controller.generate_summary(HOST, session.id)
        );
        assert_eq!(a.unwrap().summary, b.unwrap().summary);
        assert_eq!(controller.generation_locks.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_reloads_share_one_generation() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .times(1)
            .returning(|_| Ok("Only once?".to_string()));
        let (controller, _) = controller(mock);
        let session = controller.create_session(HOST, params(1)).await.unwrap();

        let (a, b) = tokio::join!(
            controller.ensure_initial_question(HOST, session.id),
            controller.ensure_initial_question(HOST, session.id)
        );
        assert_eq!(a.unwrap().current_question, b.unwrap().current_question);
    }

    #[tokio::test]
    async fn alice_and_bob_finish_after_two_rounds() {
        let mut mock = MockCompletionService::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_generate_question()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Q1".to_string()));
        mock.expect_generate_question()
            .withf(|r: &QuestionRequest| r.previous_questions == vec!["Q1".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Q2".to_string()));
        mock.expect_generate_summary()
            .withf(|r: &SummaryRequest| r.answers.contains("b2"))
            .times(1)
            .returning(|_| Ok("They agreed on three actions.".to_string()));
        let (controller, _) = controller(mock);
        let session = started(&controller, &["Alice", "Bob"], 2).await;

        let a1 = controller.submit_answer(HOST, session.id, "a1").await.unwrap();
        assert_eq!(a1.transition, Transition::Advance);
        assert_eq!(a1.session.current_turn, 1);

        let b1 = controller.submit_answer(HOST, session.id, "b1").await.unwrap();
        assert_eq!(b1.transition, Transition::Rotate);
        assert_eq!(b1.session.current_turn, 0);
        assert_eq!(b1.session.current_question.as_deref(), Some("Q2"));

        let a2 = controller.submit_answer(HOST, session.id, "a2").await.unwrap();
        assert_eq!(a2.session.current_turn, 1);
        assert_eq!(a2.session.answers.len(), 3);

        let b2 = controller.submit_answer(HOST, session.id, "b2").await.unwrap();
        assert!(b2.finished());
        assert_eq!(b2.session.status, SessionStatus::Finished);
        assert_eq!(b2.session.current_question.as_deref(), Some("Q2"));

        let summarized = controller.generate_summary(HOST, session.id).await.unwrap();
        assert_eq!(
            summarized.summary.as_deref(),
            Some("They agreed on three actions.")
        );
        let again = controller.generate_summary(HOST, session.id).await.unwrap();
        assert_eq!(again.summary, summarized.summary);

        assert!(matches!(
            controller.submit_answer(HOST, session.id, "late").await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn failed_rotation_leaves_the_record_untouched() {
        let mut mock = MockCompletionService::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_generate_question()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Q1".to_string()));
        mock.expect_generate_question()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow!("rate limited")));
        mock.expect_generate_question()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Q2".to_string()));
        let (controller, store) = controller(mock);
        let session = started(&controller, &["Alice"], 3).await;
        let before = store.get(session.id).await.unwrap().unwrap();

        let err = controller
            .submit_answer(HOST, session.id, "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Upstream(_)));
        assert_eq!(store.get(session.id).await.unwrap().unwrap(), before);

        let retried = controller.submit_answer(HOST, session.id, "a1").await.unwrap();
        assert_eq!(retried.session.answers.len(), 1);
        assert_eq!(retried.session.current_question.as_deref(), Some("Q2"));
    }

    #[tokio::test]
    async fn empty_generated_question_is_an_upstream_failure() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("   ".to_string()));
        let (controller, store) = controller(mock);
        let session = controller.create_session(HOST, params(1)).await.unwrap();

        assert!(matches!(
            controller.ensure_initial_question(HOST, session.id).await,
            Err(SessionError::Upstream(_))
        ));
        assert!(store
            .get(session.id)
            .await
            .unwrap()
            .unwrap()
            .current_question
            .is_none());
    }

    #[tokio::test]
    async fn summary_requires_a_finished_session() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("Q1".to_string()));
        let (controller, _) = controller(mock);
        let session = started(&controller, &["Alice", "Bob"], 1).await;

        assert!(matches!(
            controller.generate_summary(HOST, session.id).await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn rating_never_touches_the_discussion() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("Q1".to_string()));
        let (controller, _) = controller(mock);
        let session = started(&controller, &["Alice", "Bob"], 1).await;
        controller.submit_answer(HOST, session.id, "a1").await.unwrap();

        let before = controller.get_session(session.id).await.unwrap();
        let rated = controller.rate(HOST, session.id, 4).await.unwrap();
        assert_eq!(rated.rating, Some(4));
        assert_eq!(rated.answers, before.answers);
        assert_eq!(rated.current_question, before.current_question);
        assert_eq!(rated.status, before.status);
        assert_eq!(rated.current_turn, before.current_turn);

        let rerated = controller.rate(HOST, session.id, 2).await.unwrap();
        assert_eq!(rerated.rating, Some(2));

        for invalid in [0, 6, -1] {
            assert!(matches!(
                controller.rate(HOST, session.id, invalid).await,
                Err(SessionError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (controller, _) = controller(MockCompletionService::new());
        let id = Uuid::new_v4();
        assert!(matches!(
            controller.get_session(id).await,
            Err(SessionError::NotFound(missing)) if missing == id
        ));
        assert!(matches!(
            controller.submit_answer(HOST, id, "x").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_requires_a_selection() {
        let (controller, _) = controller(MockCompletionService::new());
        let session = controller.create_session(HOST, params(1)).await.unwrap();

        assert!(matches!(
            controller.delete_sessions(HOST, &[]).await,
            Err(SessionError::Validation(_))
        ));
        assert_eq!(
            controller.delete_sessions("someone-else", &[session.id]).await.unwrap(),
            0
        );
        assert_eq!(controller.delete_sessions(HOST, &[session.id]).await.unwrap(), 1);
        assert!(controller.list_sessions(HOST).await.unwrap().is_empty());
    }
}
