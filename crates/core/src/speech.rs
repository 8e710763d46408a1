//! Speech Services
//!
//! Text-to-speech for reading questions aloud and speech-to-text for spoken
//! answers. Both are stateless relays to the provider.

use crate::openai_http::OpenAIHttp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_VOICE: &str = "nova";

pub const DEFAULT_INSTRUCTIONS: &str = "Tone: The voice should be refined, formal, and \
delightfully theatrical, reminiscent of a charming radio announcer from the early 20th \
century. Pacing: The speech should flow smoothly at a steady cadence, neither rushed nor \
sluggish. Pronunciation: Words should be enunciated crisply and elegantly. Emotion: The \
delivery should feel warm, enthusiastic, and welcoming, as if addressing a distinguished \
audience with utmost politeness.";

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Falls back to the configured voice.
    pub voice: Option<String>,
    /// Falls back to [`DEFAULT_INSTRUCTIONS`].
    pub instructions: Option<String>,
}

#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Returns MP3 audio for the request text.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>>;

    /// Returns the text spoken in `audio`. The filename's extension tells the
    /// provider which container format to expect.
    async fn transcribe(&self, audio: Vec<u8>, filename: String) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct OpenAISpeechClient {
    http: OpenAIHttp,
    tts_model: String,
    default_voice: String,
    transcription_model: String,
}

impl OpenAISpeechClient {
    pub fn new(
        http: OpenAIHttp,
        tts_model: String,
        default_voice: String,
        transcription_model: String,
    ) -> Self {
        Self {
            http,
            tts_model,
            default_voice,
            transcription_model,
        }
    }
}

fn build_speech_body(model: &str, default_voice: &str, request: &SpeechRequest) -> Value {
    json!({
        "model": model,
        "voice": request.voice.as_deref().unwrap_or(default_voice),
        "input": request.text,
        "instructions": request.instructions.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS),
        "response_format": "mp3",
    })
}

#[async_trait]
impl SpeechService for OpenAISpeechClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>> {
        let body = build_speech_body(&self.tts_model, &self.default_voice, request);
        let response =
            OpenAIHttp::send(self.http.post("audio/speech").json(&body), "Speech").await?;
        let audio = response
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;
        Ok(audio.to_vec())
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: String) -> Result<String> {
        let form = Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "json")
            .part("file", Part::bytes(audio).file_name(filename));
        let response = OpenAIHttp::send(
            self.http.post("audio/transcriptions").multipart(form),
            "Transcription",
        )
        .await?;
        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(parsed.text)
    }
}
