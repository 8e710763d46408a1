//! Axum Router Configuration
//!
//! HTTP routing for the session lifecycle, the speech relays and document
//! uploads, plus the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AnswerEntry, AnswerOutcomeKind, CreateSessionPayload, DeleteSessionsPayload,
        DeleteSessionsResponse, DocumentUpload, DocumentUploadResponse, ErrorResponse,
        RatingPayload, SessionResponse, SessionStatus, SetupSessionPayload, SpeechPayload,
        SubmitAnswerPayload, SubmitAnswerResponse, TranscriptionResponse, TranscriptionUpload,
    },
    state::AppState,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Headroom for multipart boundaries and the small text fields sent next to a file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::delete_sessions,
        handlers::get_session,
        handlers::setup_session,
        handlers::ensure_initial_question,
        handlers::submit_answer,
        handlers::generate_summary,
        handlers::rate_session,
        handlers::synthesize_speech,
        handlers::transcribe_audio,
        handlers::upload_document,
    ),
    components(
        schemas(
            SessionResponse, AnswerEntry, SessionStatus, CreateSessionPayload,
            SetupSessionPayload, SubmitAnswerPayload, SubmitAnswerResponse, AnswerOutcomeKind,
            RatingPayload, DeleteSessionsPayload, DeleteSessionsResponse, SpeechPayload,
            TranscriptionUpload, TranscriptionResponse, DocumentUpload, DocumentUploadResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "TurnTalks API", description = "Turn-based, AI-moderated group discussions")
    )
)]
pub struct ApiDoc;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let upload_limit = app_state
        .max_document_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions)
                .post(handlers::create_session)
                .delete(handlers::delete_sessions),
        )
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/setup", put(handlers::setup_session))
        .route(
            "/sessions/{id}/question",
            post(handlers::ensure_initial_question),
        )
        .route("/sessions/{id}/answers", post(handlers::submit_answer))
        .route("/sessions/{id}/summary", post(handlers::generate_summary))
        .route("/sessions/{id}/rating", put(handlers::rate_session))
        .route("/speech", post(handlers::synthesize_speech))
        .route(
            "/transcriptions",
            post(handlers::transcribe_audio).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/documents",
            post(handlers::upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
