//! Axum Handlers for the REST API
//!
//! Session lifecycle endpoints delegate to the [`SessionController`]; the
//! speech and document endpoints relay to their collaborators. Every failure
//! is rendered as `{"error": "..."}`.
//!
//! [`SessionController`]: turntalks_core::controller::SessionController

use axum::{
    extract::{
        Multipart, Path, State,
        multipart::MultipartError,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, warn};
use turntalks_core::{
    documents::{Document, DocumentUploader},
    error::SessionError,
    speech::{SpeechRequest, SpeechService},
    trigger::SessionFinished,
};
use uuid::Uuid;

use crate::{
    models::{
        CreateSessionPayload, DeleteSessionsPayload, DeleteSessionsResponse,
        DocumentUploadResponse, ErrorResponse, RatingPayload, SessionResponse,
        SetupSessionPayload, SpeechPayload, SubmitAnswerPayload, SubmitAnswerResponse,
        TranscriptionResponse,
    },
    state::AppState,
};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    BadGateway(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    fn from_session_error(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::Validation(message) => ApiError::BadRequest(message),
            SessionError::Unauthenticated => ApiError::Unauthorized(message),
            SessionError::NotFound(_) => ApiError::NotFound(message),
            SessionError::Conflict(_) => ApiError::Conflict(message),
            SessionError::Upstream(err) => ApiError::BadGateway(err),
            SessionError::Store(err) => ApiError::InternalServerError(err),
        }
    }

    fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

fn error_body(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => error_body(StatusCode::UNAUTHORIZED, message),
            ApiError::NotFound(message) => error_body(StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => error_body(StatusCode::CONFLICT, message),
            ApiError::PayloadTooLarge(message) => {
                error_body(StatusCode::PAYLOAD_TOO_LARGE, message)
            }
            ApiError::ServiceUnavailable(message) => {
                error_body(StatusCode::SERVICE_UNAVAILABLE, message)
            }
            ApiError::BadGateway(err) => {
                warn!("Upstream failure: {:?}", err);
                error_body(
                    StatusCode::BAD_GATEWAY,
                    format!("upstream service failed: {err}"),
                )
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err: anyhow::Error = err.into();
        match err.downcast::<SessionError>() {
            Ok(session_error) => Self::from_session_error(session_error),
            Err(other) => Self::InternalServerError(other),
        }
    }
}

fn require_user(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("{USER_HEADER} header is required")))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn session_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn speech_service(state: &AppState) -> Result<Arc<dyn SpeechService>, ApiError> {
    state.speech.clone().ok_or_else(|| {
        ApiError::ServiceUnavailable("speech services are not configured".to_string())
    })
}

fn document_uploader(state: &AppState) -> Result<Arc<dyn DocumentUploader>, ApiError> {
    state.documents.clone().ok_or_else(|| {
        ApiError::ServiceUnavailable("document uploads are not configured".to_string())
    })
}

/// Create a new discussion session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Missing user identity", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the host creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateSessionPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    let payload = json_body(payload)?;
    let session = state
        .controller
        .create_session(user_id, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// List the caller's sessions, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionResponse]),
        (status = 401, description = "Missing user identity", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let user_id = require_user(&headers)?;
    let sessions = state.controller.list_sessions(user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Delete several of the caller's sessions. Ids owned by others are skipped.
#[utoipa::path(
    delete,
    path = "/sessions",
    request_body = DeleteSessionsPayload,
    responses(
        (status = 200, description = "Number of sessions removed", body = DeleteSessionsResponse),
        (status = 400, description = "No sessions selected", body = ErrorResponse),
        (status = 401, description = "Missing user identity", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn delete_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DeleteSessionsPayload>, JsonRejection>,
) -> Result<Json<DeleteSessionsResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let payload = json_body(payload)?;
    let deleted = state
        .controller
        .delete_sessions(user_id, &payload.ids)
        .await?;
    Ok(Json(DeleteSessionsResponse { deleted }))
}

/// Get a session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    require_user(&headers)?;
    let id = session_id(path)?;
    let session = state.controller.get_session(id).await?;
    Ok(Json(session.into()))
}

/// Fix the participant roster and time limit, and activate the session.
#[utoipa::path(
    put,
    path = "/sessions/{id}/setup",
    request_body = SetupSessionPayload,
    responses(
        (status = 200, description = "Session activated", body = SessionResponse),
        (status = 400, description = "Invalid roster or session already set up", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session changed concurrently", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn setup_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SetupSessionPayload>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let id = session_id(path)?;
    let payload = json_body(payload)?;
    let session = state
        .controller
        .setup_session(user_id, id, payload.participants, payload.time_limit)
        .await?;
    Ok(Json(session.into()))
}

/// Generate the opening question if the session does not have one yet.
#[utoipa::path(
    post,
    path = "/sessions/{id}/question",
    responses(
        (status = 200, description = "Session with its current question", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Question generation failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn ensure_initial_question(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let id = session_id(path)?;
    let session = state
        .controller
        .ensure_initial_question(user_id, id)
        .await?;
    Ok(Json(session.into()))
}

/// Submit the answer of the participant currently on turn.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    request_body = SubmitAnswerPayload,
    responses(
        (status = 200, description = "Answer recorded", body = SubmitAnswerResponse),
        (status = 400, description = "Session cannot take answers", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session changed concurrently", body = ErrorResponse),
        (status = 502, description = "Next question could not be generated", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SubmitAnswerPayload>, JsonRejection>,
) -> Result<Json<SubmitAnswerResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let id = session_id(path)?;
    let payload = json_body(payload)?;
    let outcome = state
        .controller
        .submit_answer(user_id, id, &payload.answer)
        .await?;

    if outcome.finished() {
        let event = SessionFinished {
            session_id: id,
            user_id: user_id.to_string(),
        };
        if let Err(e) = state.events.send(event).await {
            warn!(session_id = %id, error = %e, "Summary trigger unavailable");
        }
    }
    Ok(Json(outcome.into()))
}

/// Generate the closing summary of a finished session. Idempotent.
#[utoipa::path(
    post,
    path = "/sessions/{id}/summary",
    responses(
        (status = 200, description = "Session with its summary", body = SessionResponse),
        (status = 400, description = "Session has not finished", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Summary generation failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn generate_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let id = session_id(path)?;
    let session = state.controller.generate_summary(user_id, id).await?;
    Ok(Json(session.into()))
}

/// Rate a session from 1 to 5. Later ratings replace earlier ones.
#[utoipa::path(
    put,
    path = "/sessions/{id}/rating",
    request_body = RatingPayload,
    responses(
        (status = 200, description = "Rating stored", body = SessionResponse),
        (status = 400, description = "Rating out of range", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn rate_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RatingPayload>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    let id = session_id(path)?;
    let payload = json_body(payload)?;
    let session = state.controller.rate(user_id, id, payload.rating).await?;
    Ok(Json(session.into()))
}

/// Read text aloud. Returns MP3 audio.
#[utoipa::path(
    post,
    path = "/speech",
    request_body = SpeechPayload,
    responses(
        (status = 200, description = "MP3 audio (`audio/mpeg`)"),
        (status = 400, description = "Missing text", body = ErrorResponse),
        (status = 502, description = "Speech synthesis failed", body = ErrorResponse),
        (status = 503, description = "Speech services not configured", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn synthesize_speech(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SpeechPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_user(&headers)?;
    let payload = json_body(payload)?;
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }
    let speech = speech_service(&state)?;

    let audio = speech
        .synthesize(&SpeechRequest {
            text: payload.text,
            voice: payload.voice,
            instructions: payload.instructions,
        })
        .await
        .map_err(ApiError::BadGateway)?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

/// Transcribe a recorded answer from the multipart `audio` field.
#[utoipa::path(
    post,
    path = "/transcriptions",
    request_body(content = crate::models::TranscriptionUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Transcribed text", body = TranscriptionResponse),
        (status = 400, description = "No audio file provided", body = ErrorResponse),
        (status = 502, description = "Transcription failed", body = ErrorResponse),
        (status = 503, description = "Speech services not configured", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn transcribe_audio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    require_user(&headers)?;
    let speech = speech_service(&state)?;

    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        if field.name() == Some("audio") {
            let filename = field.file_name().unwrap_or("answer.webm").to_string();
            let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
            audio = Some((bytes.to_vec(), filename));
        }
    }
    let (bytes, filename) =
        audio.ok_or_else(|| ApiError::BadRequest("No audio file provided".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Audio file is empty".to_string()));
    }

    let transcription = speech
        .transcribe(bytes, filename)
        .await
        .map_err(ApiError::BadGateway)?;
    Ok(Json(TranscriptionResponse { transcription }))
}

/// Upload a reference document. The returned id can be passed as a session's
/// `reference_document_id`.
#[utoipa::path(
    post,
    path = "/documents",
    request_body(content = crate::models::DocumentUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Uploaded file id", body = DocumentUploadResponse),
        (status = 400, description = "No file provided", body = ErrorResponse),
        (status = 413, description = "File above the size limit", body = ErrorResponse),
        (status = 502, description = "Upload failed", body = ErrorResponse),
        (status = 503, description = "Document uploads not configured", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<DocumentUploadResponse>, ApiError> {
    require_user(&headers)?;
    let uploader = document_uploader(&state)?;
    let max_bytes = state.max_document_bytes;
    let too_large = || {
        ApiError::PayloadTooLarge(format!(
            "File size exceeds the allowed limit of {} MB.",
            max_bytes / (1024 * 1024)
        ))
    };

    let mut file = None;
    let mut purpose = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
                file = Some((bytes.to_vec(), filename));
            }
            Some("purpose") => {
                purpose = Some(field.text().await.map_err(ApiError::from_multipart)?);
            }
            Some("file_size") => {
                let declared = field.text().await.map_err(ApiError::from_multipart)?;
                if declared.trim().parse::<usize>().is_ok_and(|size| size > max_bytes) {
                    return Err(too_large());
                }
            }
            _ => {}
        }
    }

    let (bytes, filename) = file
        .ok_or_else(|| ApiError::BadRequest("File is required.".to_string()))?;
    if bytes.len() > max_bytes {
        return Err(too_large());
    }

    let file_id = uploader
        .upload(Document::new(bytes, filename, purpose))
        .await
        .map_err(ApiError::BadGateway)?;
    Ok(Json(DocumentUploadResponse { file_id }))
}
