//! Shared Application State
//!
//! Holds the session controller and the optional speech and document
//! collaborators. Everything is constructed once at startup and injected.

use std::sync::Arc;
use tokio::sync::mpsc;
use turntalks_core::{
    controller::SessionController, documents::DocumentUploader, speech::SpeechService,
    trigger::SessionFinished,
};

#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    /// Absent when no OpenAI key is configured.
    pub speech: Option<Arc<dyn SpeechService>>,
    pub documents: Option<Arc<dyn DocumentUploader>>,
    /// Publishes finished sessions to the summary trigger.
    pub events: mpsc::Sender<SessionFinished>,
    pub max_document_bytes: usize,
}
