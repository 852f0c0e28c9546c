use std::time::Duration;

use log::{error, warn};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use shared::ChatResponse;

use crate::config::Settings;

pub const SYSTEM_PROMPT: &str = "You are NeuroScan AI Assistant, a helpful medical AI assistant specializing in brain tumor information and MRI imaging. You provide educational information about:

- Brain tumor types (Glioma, Meningioma, Pituitary tumors)
- MRI imaging and how it's used in diagnosis
- General information about symptoms, treatments, and prognosis
- Explaining medical terminology in simple terms

IMPORTANT GUIDELINES:
1. Always clarify that you provide educational information only, NOT medical diagnosis
2. Encourage users to consult qualified healthcare professionals for medical advice
3. Be compassionate and supportive when discussing sensitive health topics
4. If asked about unrelated topics, politely redirect to brain health and MRI topics
5. Keep responses concise but informative (2-3 paragraphs max)

You are integrated into the NeuroScan AI brain tumor classification application.";

const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.7;
const REFERER: &str = "https://neuroscan-ai.app";
const APP_TITLE: &str = "NeuroScan AI";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("No message provided")]
    EmptyMessage,
    #[error("Chatbot not configured. Please set OPENROUTER_API_KEY environment variable.")]
    NotConfigured,
    #[error("API error: {status}")]
    Upstream { status: u16, message: String },
    #[error("Request timeout")]
    Timeout,
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed chat completion: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    InvalidRequest(#[from] serde_json::Error),
}

impl ChatError {
    /// Text the chat widget shows in place of an answer.
    pub fn fallback_text(&self) -> String {
        match self {
            ChatError::NotConfigured => "I apologize, but the chatbot is not configured yet. Please add your OpenRouter API key to enable this feature.".to_string(),
            ChatError::Upstream { message, .. } => {
                format!("API Error: {}. Please try again later.", message)
            }
            ChatError::Timeout => "The request took too long. Please try again.".to_string(),
            ChatError::EmptyMessage
            | ChatError::Http(_)
            | ChatError::MalformedResponse(_)
            | ChatError::InvalidRequest(_) => {
                "An error occurred. Please try again.".to_string()
            }
        }
    }
}

/// Outcome of one proxied message. Failures are carried in-band so the
/// caller always has something to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    Answered(String),
    Degraded { reason: String, response: String },
}

impl From<Result<String, ChatError>> for ChatReply {
    fn from(result: Result<String, ChatError>) -> Self {
        match result {
            Ok(text) => ChatReply::Answered(text),
            Err(err) => ChatReply::Degraded {
                reason: err.to_string(),
                response: err.fallback_text(),
            },
        }
    }
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        match reply {
            ChatReply::Answered(response) => ChatResponse::Answered {
                success: true,
                response,
            },
            ChatReply::Degraded { reason, response } => ChatResponse::Degraded {
                error: reason,
                response,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
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
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamErrorBody {
    #[serde(default)]
    error: Option<UpstreamErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorDetail {
    message: Option<String>,
}

/// Stateless forwarder to an OpenRouter-compatible chat completion API.
#[derive(Clone)]
pub struct ChatProxy {
    http_client: HttpClient,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl ChatProxy {
    pub fn new(api_key: Option<String>, endpoint: String, model: String, timeout: Duration) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            endpoint,
            model,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.openrouter_api_key.clone(),
            settings.chat_api_url.clone(),
            settings.chat_model.clone(),
            settings.chat_timeout(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sends one message with the fixed system prompt. No retries.
    pub async fn ask(&self, message: &str) -> Result<String, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let api_key = self.api_key.as_deref().ok_or(ChatError::NotConfigured)?;

        let payload = CompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: message,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<UpstreamErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            error!("Chat API error: {} - {}", status.as_u16(), message);
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse =
            response.json().await.map_err(classify_transport_error)?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ChatError::MalformedResponse("no choices returned".to_string()))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        warn!("Chat API request timed out");
        ChatError::Timeout
    } else {
        error!("Chat API request failed: {}", err);
        ChatError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_reply_says_so() {
        let reply = ChatReply::from(Err::<String, _>(ChatError::NotConfigured));
        match reply {
            ChatReply::Degraded { reason, response } => {
                assert!(reason.contains("not configured"));
                assert!(response.contains("not configured"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn upstream_failure_embeds_the_upstream_message() {
        let err = ChatError::Upstream {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 429");
        assert_eq!(
            err.fallback_text(),
            "API Error: Rate limit exceeded. Please try again later."
        );
    }

    #[test]
    fn degraded_reply_serializes_error_and_response() {
        let reply = ChatReply::from(Err::<String, _>(ChatError::Timeout));
        let value = serde_json::to_value(ChatResponse::from(reply)).unwrap();
        assert_eq!(value["error"], "Request timeout");
        assert_eq!(value["response"], "The request took too long. Please try again.");
        assert!(value.get("success").is_none());
    }

    #[test]
    fn answered_reply_serializes_success_flag() {
        let value = serde_json::to_value(ChatResponse::from(ChatReply::Answered("hi".into()))).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["response"], "hi");
    }

    #[actix_web::test]
    async fn missing_key_short_circuits_without_network() {
        let proxy = ChatProxy::new(
            None,
            "http://127.0.0.1:9/unreachable".to_string(),
            "test-model".to_string(),
            Duration::from_secs(1),
        );
        assert!(!proxy.is_configured());
        assert!(matches!(proxy.ask("hello").await, Err(ChatError::NotConfigured)));
        assert!(matches!(proxy.ask("   ").await, Err(ChatError::EmptyMessage)));
    }
}
