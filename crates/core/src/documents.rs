//! Reference documents are uploaded to the provider's file store; the returned
//! id becomes a session's `reference_document_id`.

use crate::openai_http::OpenAIHttp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

pub const DEFAULT_PURPOSE: &str = "assistants";
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub purpose: String,
}

impl Document {
    /// Fills in a generated PDF filename and the default purpose when absent.
    pub fn new(bytes: Vec<u8>, filename: Option<String>, purpose: Option<String>) -> Self {
        let filename = filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| format!("file_{}.pdf", Utc::now().timestamp_millis()));
        let purpose = purpose
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PURPOSE.to_string());
        Self {
            bytes,
            filename,
            purpose,
        }
    }
}

#[async_trait]
pub trait DocumentUploader: Send + Sync {
    /// Uploads the document and returns the provider's file id.
    async fn upload(&self, document: Document) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

pub struct OpenAIFileUploader {
    http: OpenAIHttp,
}

impl OpenAIFileUploader {
    pub fn new(http: OpenAIHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DocumentUploader for OpenAIFileUploader {
    async fn upload(&self, document: Document) -> Result<String> {
        let Document {
            bytes,
            filename,
            purpose,
        } = document;
        let mut part = Part::bytes(bytes).file_name(filename.clone());
        if filename.to_ascii_lowercase().ends_with(".pdf") {
            part = part
                .mime_str("application/pdf")
                .context("Invalid document MIME type")?;
        }
        let form = Form::new().text("purpose", purpose).part("file", part);

        let response = OpenAIHttp::send(self.http.post("files").multipart(form), "File upload").await?;
        let file: FileObject = response
            .json()
            .await
            .context("Failed to parse file upload response")?;
        Ok(file.id)
    }
}
