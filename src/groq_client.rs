use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::cli::chat::conversation_state::{ModelId, Turn};
use crate::config::{ApiKey, ClientSettings};
use crate::error::ChatError;

/// Why a single generation request failed. The `Display` text is the detail
/// shown to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Transport(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Something that can produce the next assistant message.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate a reply to `new_text`, with `history` as the preceding
    /// conversation, oldest first.
    async fn generate(
        &self,
        model: ModelId,
        history: &[Turn],
        new_text: &str,
    ) -> Result<String, ClientError>;
}

/// Client for Groq's OpenAI-compatible chat completion endpoint.
pub struct GroqClient {
    endpoint: Url,
    authorization: HeaderValue,
    timeout: Duration,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

impl GroqClient {
    pub fn new(api_key: &ApiKey, settings: &ClientSettings) -> Result<Self, ChatError> {
        let endpoint = settings.completions_url()?;

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", api_key.expose()))
            .map_err(|_| {
                ChatError::ModelInitializationFailed(
                    "API key contains characters that are not allowed in an HTTP header".to_string(),
                )
            })?;
        authorization.set_sensitive(true);

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ChatError::ModelInitializationFailed(e.to_string()))?;

        debug!("Groq client ready for {}", endpoint);

        Ok(Self {
            endpoint,
            authorization,
            timeout: settings.timeout,
            temperature: settings.temperature,
            system_prompt: settings.system_prompt.clone(),
            client,
        })
    }

    fn build_request<'a>(
        &'a self,
        model: ModelId,
        history: &'a [Turn],
        new_text: &'a str,
    ) -> CompletionRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        if let Some(system_prompt) = &self.system_prompt {
            messages.push(WireMessage {
                role: "system",
                content: system_prompt,
            });
        }

        messages.extend(history.iter().map(|turn| WireMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        messages.push(WireMessage {
            role: "user",
            content: new_text,
        });

        CompletionRequest {
            model: model.api_name(),
            messages,
            temperature: self.temperature,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ModelClient for GroqClient {
    async fn generate(
        &self,
        model: ModelId,
        history: &[Turn],
        new_text: &str,
    ) -> Result<String, ClientError> {
        let request = self.build_request(model, history, new_text);

        debug!(
            "Sending request to Groq API with {} messages: {:?}",
            request.messages.len(),
            request
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            error!("API request failed with status {}: {}", status, body);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: api_error_message(status, &body),
            });
        }

        debug!("Received response from Groq API: {}", body);

        parse_reply(&body)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'static str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn parse_reply(body: &str) -> Result<String, ClientError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ClientError::Malformed(e.to_string()))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Malformed("response contained no choices".to_string()))?;

    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(ClientError::Malformed("response message was empty".to_string())),
    }
}

/// The API's own error message if the body carries one, else the raw body.
fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(response) = serde_json::from_str::<ErrorResponse>(body) {
        return response.error.message;
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    } else {
        body.to_string()
    }
}
