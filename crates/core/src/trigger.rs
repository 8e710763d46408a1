//! Trigger-driven side effects.
//!
//! When a session finishes, the request path only publishes a
//! [`SessionFinished`] event. A background consumer turns each event into a
//! summary generation so a slow completion call never holds up the answer
//! response.

use crate::controller::SessionController;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFinished {
    pub session_id: Uuid,
    /// The user whose answer finished the session.
    pub user_id: String,
}

pub fn event_channel() -> (
    mpsc::Sender<SessionFinished>,
    mpsc::Receiver<SessionFinished>,
) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Spawns the consumer. It exits once every sender has been dropped.
pub fn spawn_summary_trigger(
    controller: SessionController,
    mut events: mpsc::Receiver<SessionFinished>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let controller = controller.clone();
            tokio::spawn(async move {
                match controller
                    .generate_summary(&event.user_id, event.session_id)
                    .await
                {
                    Ok(_) => info!(session_id = %event.session_id, "Summary ready"),
                    Err(e) => {
                        error!(session_id = %event.session_id, error = %e, "Summary trigger failed")
                    }
                }
            });
        }
        info!("Summary trigger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::MockCompletionService,
        session::SessionStatus,
        store::{InMemorySessionStore, SessionStore},
    };
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn finished_event_produces_a_summary() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate_question()
            .returning(|_| Ok("Q1".to_string()));
        mock.expect_generate_summary()
            .times(1)
            .returning(|_| Ok("All done.".to_string()));
        let store = Arc::new(InMemorySessionStore::new());
        let controller = SessionController::new(store.clone(), Arc::new(mock));

        let session = controller
            .create_session(
                "host-1",
                crate::controller::CreateSession {
                    prompt: "Retro".to_string(),
                    num_questions: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        controller
            .setup_session("host-1", session.id, vec!["Solo".to_string()], 30)
            .await
            .unwrap();
        controller
            .ensure_initial_question("host-1", session.id)
            .await
            .unwrap();
        let outcome = controller
            .submit_answer("host-1", session.id, "went well")
            .await
            .unwrap();
        assert!(outcome.finished());

        let (tx, rx) = event_channel();
        let handle = spawn_summary_trigger(controller.clone(), rx);
        tx.send(SessionFinished {
            session_id: session.id,
            user_id: "host-1".to_string(),
        })
        .await
        .unwrap();

        let mut summary = None;
        for _ in 0..100 {
            let stored = store.get(session.id).await.unwrap().unwrap();
            if stored.summary.is_some() {
                assert_eq!(stored.status, SessionStatus::Finished);
                summary = stored.summary;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(summary.as_deref(), Some("All done."));

        drop(tx);
        handle.await.unwrap();
    }
}
