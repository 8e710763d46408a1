//! Question and Summary Prompts
//!
//! Builds the requests handed to the completion service and renders them
//! through Markdown templates loaded at startup.

use crate::session::{Answer, Session};
use anyhow::{Context, Result};
use std::collections::HashMap;

pub const QUESTION_TEMPLATE_KEY: &str = "generate_question";
pub const SUMMARY_TEMPLATE_KEY: &str = "generate_summary";

/// Everything needed to ask the model for the next discussion question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    pub prompt: String,
    /// Serialized answers so far followed by the previously asked questions.
    /// Empty for the opening question.
    pub context: String,
    pub reference_document_id: Option<String>,
    pub previous_questions: Vec<String>,
}

impl QuestionRequest {
    /// The request for a session's opening question.
    pub fn opening(session: &Session) -> Self {
        Self {
            prompt: session.prompt.clone(),
            context: String::new(),
            reference_document_id: session.reference_document_id.clone(),
            previous_questions: Vec::new(),
        }
    }

    /// The request issued when a round completes.
    pub fn follow_up(session: &Session, answers: &[Answer], previous_questions: Vec<String>) -> Self {
        Self {
            prompt: session.prompt.clone(),
            context: build_context(answers, &previous_questions),
            reference_document_id: session.reference_document_id.clone(),
            previous_questions,
        }
    }
}

/// Everything needed to summarise a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub prompt: String,
    pub end_goal: Option<String>,
    pub answers: String,
    pub reference_document_id: Option<String>,
}

impl SummaryRequest {
    pub fn for_session(session: &Session) -> Self {
        Self {
            prompt: session.prompt.clone(),
            end_goal: session.end_goal.clone(),
            answers: serialize_answers(&session.answers),
            reference_document_id: session.reference_document_id.clone(),
        }
    }
}

/// Renders the answer log as a JSON array of `{participant, answer}` objects.
pub fn serialize_answers(answers: &[Answer]) -> String {
    serde_json::to_string(answers).unwrap_or_else(|_| "[]".to_string())
}

/// Answers so far, plus a list of earlier questions the model should not repeat.
pub fn build_context(answers: &[Answer], previous_questions: &[String]) -> String {
    let mut context = serialize_answers(answers);
    if !previous_questions.is_empty() {
        context.push_str("\nPreviously asked questions:\n");
        context.push_str(&previous_questions.join("\n"));
    }
    context
}

/// Prompt templates keyed by file stem.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    question: String,
    summary: String,
}

impl PromptTemplates {
    pub fn new(question: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            summary: summary.into(),
        }
    }

    /// Picks the required templates out of a map loaded from the prompts directory.
    pub fn from_map(prompts: &HashMap<String, String>) -> Result<Self> {
        let question = prompts
            .get(QUESTION_TEMPLATE_KEY)
            .context("Missing prompt template: 'generate_question'")?;
        let summary = prompts
            .get(SUMMARY_TEMPLATE_KEY)
            .context("Missing prompt template: 'generate_summary'")?;
        Ok(Self::new(question.clone(), summary.clone()))
    }

    pub fn render_question(&self, request: &QuestionRequest) -> String {
        fill(
            &self.question,
            &[("prompt", &request.prompt), ("context", &request.context)],
        )
    }

    pub fn render_summary(&self, request: &SummaryRequest) -> String {
        fill(
            &self.summary,
            &[
                ("prompt", &request.prompt),
                ("end_goal", request.end_goal.as_deref().unwrap_or("")),
                ("answers", &request.answers),
            ],
        )
    }
}

/// Substitutes `{name}` placeholders in a single pass. Substituted values are
/// never rescanned, so braces in user text come through verbatim.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = values.iter().find(|(name, _)| {
            tail.strip_prefix(name)
                .is_some_and(|after| after.starts_with('}'))
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
