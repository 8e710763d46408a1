//! Main Entrypoint for the TurnTalks API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to PostgreSQL and running migrations.
//! 3. Building the completion, speech and document clients.
//! 4. Starting the summary trigger and the HTTP server with graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use turntalks_api::{
    config::{CompletionProvider, Config},
    db::PgSessionStore,
    router::create_router,
    state::AppState,
};
use turntalks_core::{
    controller::SessionController,
    documents::{DocumentUploader, OpenAIFileUploader},
    llm_client::OpenAICompletionClient,
    openai_http::{OPENAI_API_BASE, OpenAIHttp},
    prompts::PromptTemplates,
    speech::{OpenAISpeechClient, SpeechService},
    trigger::{event_channel, spawn_summary_trigger},
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {e}");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads every `*.md` file in `prompts_path`, keyed by file stem.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts from {}", prompts_path.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            prompts.insert(prompt_key, fs::read_to_string(&path)?);
        }
    }
    Ok(prompts)
}

fn completion_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    let (api_key, api_base) = match config.completion_provider {
        CompletionProvider::OpenAI => (
            config
                .openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")?,
            OPENAI_API_BASE,
        ),
        CompletionProvider::Gemini => (
            config
                .gemini_api_key
                .as_deref()
                .context("GEMINI_API_KEY is required")?,
            GEMINI_API_BASE,
        ),
    };
    Ok(OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgSessionStore::new(pool));
    store.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Collaborators ---
    let templates = PromptTemplates::from_map(&load_prompts(&config.prompts_path)?)?;
    let completion = Arc::new(OpenAICompletionClient::new(
        completion_config(&config)?,
        config.chat_model.clone(),
        templates,
    ));

    let (speech, documents): (
        Option<Arc<dyn SpeechService>>,
        Option<Arc<dyn DocumentUploader>>,
    ) = match config.openai_api_key.as_deref() {
        Some(api_key) => {
            let http = OpenAIHttp::new(api_key);
            (
                Some(Arc::new(OpenAISpeechClient::new(
                    http.clone(),
                    config.tts_model.clone(),
                    config.tts_voice.clone(),
                    config.transcription_model.clone(),
                )) as Arc<dyn SpeechService>),
                Some(Arc::new(OpenAIFileUploader::new(http)) as Arc<dyn DocumentUploader>),
            )
        }
        None => {
            warn!("OPENAI_API_KEY not set; speech and document endpoints are disabled.");
            (None, None)
        }
    };

    let controller = SessionController::new(store, completion);
    let (events, event_rx) = event_channel();
    let trigger = spawn_summary_trigger(controller.clone(), event_rx);

    let app_state = Arc::new(AppState {
        controller,
        speech,
        documents,
        events,
        max_document_bytes: config.max_document_bytes,
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.completion_provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router held the last event sender, so the trigger drains and exits.
    if let Err(e) = trigger.await {
        warn!("Summary trigger ended abnormally: {e}");
    }
    info!("Server has shut down.");
    Ok(())
}
