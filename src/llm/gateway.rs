use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";
const BODY_PREVIEW_CHARS: usize = 512;

#[derive(Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("AI_GATEWAY_API_KEY")
            .or_else(|_| std::env::var("LOVABLE_API_KEY"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self {
            url: std::env::var("AI_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.into()),
            api_key,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("AI_GATEWAY_API_KEY is not configured")]
    MissingCredential,
    /// `detail` holds the truncated upstream body or transport error. It is
    /// not part of the display string.
    #[error("AI gateway unavailable{}", status_suffix(.status))]
    UpstreamUnavailable { status: Option<u16>, detail: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

impl GatewayError {
    /// Transport failures, timeouts, throttling and 5xx are worth another
    /// attempt. Everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamUnavailable { status: None, .. } => true,
            GatewayError::UpstreamUnavailable {
                status: Some(code), ..
            } => *code == 408 || *code == 429 || *code >= 500,
            GatewayError::MissingCredential | GatewayError::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Text,
}

/// Body of one chat-completions call; serialized as-is onto the wire.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GatewayRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub modalities: Option<Vec<Modality>>,
}

impl GatewayRequest {
    pub fn text(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            modalities: None,
        }
    }

    pub fn image(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            modalities: Some(vec![Modality::Image, Modality::Text]),
        }
    }

    pub fn wants_image(&self) -> bool {
        self.modalities
            .as_ref()
            .is_some_and(|list| list.contains(&Modality::Image))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayReply {
    pub text: Option<String>,
    pub image_uri: Option<String>,
}

impl GatewayReply {
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_uri: None,
        }
    }

    #[cfg(test)]
    pub fn image(uri: impl Into<String>) -> Self {
        Self {
            text: None,
            image_uri: Some(uri.into()),
        }
    }

    /// Trimmed text output, `None` when the model returned nothing usable.
    pub fn text_content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn image_content(&self) -> Option<&str> {
        self.image_uri
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn invoke(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError>;
}

pub struct HttpGateway {
    http: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn invoke(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(GatewayError::MissingCredential);
        };

        debug!(
            target = "stylist.gateway",
            model = %request.model,
            image = request.wants_image(),
            "gateway request"
        );

        let response = self
            .http
            .post(&self.config.url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable {
                status: err.status().map(|code| code.as_u16()),
                detail: err.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview = preview(&body);
            error!(
                target = "stylist.gateway",
                model = %request.model,
                status = status.as_u16(),
                body = %preview,
                "gateway returned error status"
            );
            return Err(GatewayError::UpstreamUnavailable {
                status: Some(status.as_u16()),
                detail: preview,
            });
        }

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(err.without_url().to_string()))?;

        reply_from_completion(payload)
    }
}

fn reply_from_completion(payload: CompletionResponse) -> Result<GatewayReply, GatewayError> {
    let message = payload
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| GatewayError::InvalidResponse("missing choices".into()))?;

    Ok(GatewayReply {
        text: message.content,
        image_uri: message
            .images
            .into_iter()
            .next()
            .map(|image| image.image_url.url),
    })
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    images: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    image_url: ImageUrl,
}
