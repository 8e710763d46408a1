//! Thin REST plumbing for the OpenAI audio and files endpoints, which are
//! called with raw `reqwest` because they exchange binary and multipart bodies.

use anyhow::{Context, Result, bail};
use reqwest::{RequestBuilder, Response};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAIHttp {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAIHttp {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base(api_key, OPENAI_API_BASE)
    }

    pub fn with_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
    }

    /// Sends the request and turns non-2xx replies into errors carrying the body.
    pub async fn send(request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{what} request returned {status}: {body}");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let http = OpenAIHttp::with_base("key", "http://localhost:9000/v1/");
        assert_eq!(
            http.endpoint("/audio/speech"),
            "http://localhost:9000/v1/audio/speech"
        );
        assert_eq!(
            OpenAIHttp::new("key").endpoint("files"),
            "https://api.openai.com/v1/files"
        );
    }
}
