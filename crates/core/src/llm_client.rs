//! Completion Service
//!
//! The language-model collaborator used to generate discussion questions and
//! the closing summary. The trait keeps the controller independent of any
//! provider; `OpenAICompletionClient` talks to any OpenAI-compatible chat API.

use crate::prompts::{PromptTemplates, QuestionRequest, SummaryRequest};
use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::{Value, json};

/// Generates text for a session. Errors carry a human-readable message and
/// are safe to retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produces the next question to put to the group.
    async fn generate_question(&self, request: &QuestionRequest) -> Result<String>;

    /// Produces the end-of-session summary addressing the end goal.
    async fn generate_summary(&self, request: &SummaryRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// An implementation of `CompletionService` for any OpenAI-compatible API.
///
/// Requests are sent as raw JSON so a reference document can be attached as a
/// `file` content part ahead of the text instruction.
pub struct OpenAICompletionClient {
    client: Client<OpenAIConfig>,
    model: String,
    templates: PromptTemplates,
}

impl OpenAICompletionClient {
    /// Creates a new completion client.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the provider.
    /// * `model` - Chat model identifier (e.g., "gpt-4o"). It must accept file inputs
    ///   when sessions carry reference documents.
    /// * `templates` - Question and summary prompt templates.
    pub fn new(config: OpenAIConfig, model: String, templates: PromptTemplates) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            templates,
        }
    }

    async fn complete(&self, text: String, document_id: Option<&str>) -> Result<String> {
        let request = build_chat_request(&self.model, &text, document_id);
        let response: ChatResponse = self
            .client
            .chat()
            .create_byot(request)
            .await
            .context("Chat completion request failed")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .context("No response choice from LLM")?
            .message
            .content
            .context("No content in LLM response")?;

        let content = content.trim();
        anyhow::ensure!(!content.is_empty(), "LLM returned an empty response");
        Ok(content.to_string())
    }
}

/// A single user message: an optional file part followed by the instruction text.
fn build_chat_request(model: &str, text: &str, document_id: Option<&str>) -> Value {
    let mut content = Vec::with_capacity(2);
    if let Some(file_id) = document_id {
        content.push(json!({ "type": "file", "file": { "file_id": file_id } }));
    }
    content.push(json!({ "type": "text", "text": text }));

    json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
    })
}

#[async_trait]
impl CompletionService for OpenAICompletionClient {
    async fn generate_question(&self, request: &QuestionRequest) -> Result<String> {
        let text = self.templates.render_question(request);
        self.complete(text, request.reference_document_id.as_deref())
            .await
    }

    async fn generate_summary(&self, request: &SummaryRequest) -> Result<String> {
        let text = self.templates.render_summary(request);
        self.complete(text, request.reference_document_id.as_deref())
            .await
    }
}

/// A deterministic `CompletionService` for development and integration tests.
///
/// Questions are numbered by how many have already been asked, so successive
/// rounds always produce distinct text without any network access.
pub struct StaticCompletionService;

#[async_trait]
impl CompletionService for StaticCompletionService {
    async fn generate_question(&self, request: &QuestionRequest) -> Result<String> {
        Ok(format!(
            "Question {}: what stands out to you about \"{}\"?",
            request.previous_questions.len() + 1,
            request.prompt
        ))
    }

    async fn generate_summary(&self, request: &SummaryRequest) -> Result<String> {
        Ok(format!(
            "Summary of \"{}\" toward \"{}\".",
            request.prompt,
            request.end_goal.as_deref().unwrap_or("no stated goal")
        ))
    }
}
