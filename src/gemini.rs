use crate::config::AppSettings;
use crate::models::{GeminiContent, GeminiGenerateRequest, GeminiGenerateResponse, GeminiPart};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Response generation is not configured (GEMINI_API_KEY missing)")]
    NotConfigured,
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: StatusCode, body: String },
    #[error("Gemini rejected the API key ({status})")]
    Unauthorized { status: StatusCode },
    #[error("Model \"{model}\" not found or not available")]
    ModelNotFound { model: String },
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Failed to deserialize response: {0}")]
    Deserialization(reqwest::Error),
    #[error("Model returned no text")]
    EmptyResponse,
}

impl GenerationError {
    fn is_transient(&self) -> bool {
        match self {
            GenerationError::RateLimited => true,
            GenerationError::Request(_) => true,
            GenerationError::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Turns a prompt into reply text.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug)]
pub struct GeminiApiClient {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    retry_window: Duration,
}

impl GeminiApiClient {
    pub fn new(settings: &AppSettings) -> Result<Self, GenerationError> {
        let base = settings.gemini_api_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!(
            "{}/models/{}:generateContent",
            base, settings.gemini_model
        ))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model: settings.gemini_model.clone(),
            api_key: settings.gemini_api_key.clone(),
            retry_window: settings.gemini_retry_window(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request_payload), fields(model = %self.model))]
    pub async fn send_generate_content(
        &self,
        request_payload: &GeminiGenerateRequest,
    ) -> Result<GeminiGenerateResponse, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::NotConfigured)?;
        debug!("Sending generateContent request to: {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request_payload)
            .send()
            .await
            .map_err(GenerationError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            error!("Gemini API Error: {} - {}", status, body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    GenerationError::Unauthorized { status }
                }
                StatusCode::NOT_FOUND => GenerationError::ModelNotFound {
                    model: self.model.clone(),
                },
                StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited,
                _ => GenerationError::Api { status, body },
            });
        }

        response
            .json::<GeminiGenerateResponse>()
            .await
            .map_err(GenerationError::Deserialization)
    }
}

#[async_trait]
impl ResponseGenerator for GeminiApiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GeminiGenerateRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
        };

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(self.retry_window))
            .build();

        let request = &request;
        let response = backoff::future::retry(policy, || async move {
            self.send_generate_content(request).await.map_err(|e| {
                if e.is_transient() && !self.retry_window.is_zero() {
                    warn!(error = %e, "Transient Gemini failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        response.first_text().ok_or_else(|| {
            let finish_reason = response
                .candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .unwrap_or("none");
            warn!(finish_reason, "Gemini returned no text");
            GenerationError::EmptyResponse
        })
    }
}
