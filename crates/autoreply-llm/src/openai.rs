//! OpenAI Responses API backend.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Prompt, ReplyBackend};
use crate::error::{LlmError, LlmResult};
use crate::metrics::record_request;

const PROVIDER: &str = "openai";

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Responses API client for one model.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesResponse {
    /// Concatenated text of every `output_text` part.
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .map(|part| part.text.as_str())
            .collect()
    }
}

impl OpenAiBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ReplyBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> LlmResult<String> {
        let url = format!("{}/v1/responses", self.base_url.trim_end_matches('/'));
        let request = ResponsesRequest {
            model: &self.model,
            instructions: &prompt.instructions,
            input: &prompt.input,
        };

        let started = Instant::now();
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                record_request(PROVIDER, &self.model, 0, started.elapsed().as_secs_f64());
                return Err(LlmError::from_reqwest(e));
            }
        };

        let status = response.status();
        record_request(
            PROVIDER,
            &self.model,
            status.as_u16(),
            started.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status.as_u16(), body));
        }

        let body: ResponsesResponse = response.json().await.map_err(LlmError::from_reqwest)?;
        let text = body.output_text();

        debug!(model = %self.model, chars = text.chars().count(), "OpenAI response received");
        Ok(text)
    }
}
