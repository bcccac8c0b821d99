use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::{CompletionBackend, CompletionSettings};
use crate::error::{CompletionError, Error, Result};
use crate::models::{
    ChatRequest, ChatResponse, Message, TextCompletionRequest, TextCompletionResponse,
};

/// A remote text-generation service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError>;

    fn name(&self) -> &str;
}

/// Build the client selected by `settings.backend`.
pub fn build_client(settings: &CompletionSettings) -> Result<Arc<dyn CompletionClient>> {
    let http = HttpBackend::new(settings)?;
    if settings.api_key.is_none() {
        tracing::warn!("No completion API key configured; requests will be sent unauthenticated");
    }
    let client: Arc<dyn CompletionClient> = match settings.backend {
        CompletionBackend::Chat => Arc::new(ChatCompletionsClient {
            http,
            system_prompt: settings.system_prompt.clone(),
        }),
        CompletionBackend::Text => Arc::new(TextCompletionsClient { http }),
    };
    tracing::info!(
        backend = client.name(),
        endpoint = %settings.endpoint,
        model = %settings.model,
        "Completion client ready"
    );
    Ok(client)
}

struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpBackend {
    fn new(settings: &CompletionSettings) -> Result<Self> {
        let timeout = settings.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let req = self.client.post(url);
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> std::result::Result<T, CompletionError> {
        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| CompletionError::Malformed(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            e.into()
        }
    }
}

async fn check_status(response: Response) -> std::result::Result<Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CompletionError::Status {
        status: status.as_u16(),
        body,
    })
}

/// OpenAI-compatible `/chat/completions` (Groq, LiteLLM, vLLM, ...).
pub struct ChatCompletionsClient {
    http: HttpBackend,
    system_prompt: String,
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
        let request = ChatRequest {
            model: self.http.model.clone(),
            messages: vec![Message::system(&self.system_prompt), Message::user(prompt)],
            temperature: Some(self.http.temperature),
            max_tokens: Some(self.http.max_tokens),
        };

        let response: ChatResponse = self.http.send(self.http.post("chat/completions").json(&request)).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Malformed("response has no choices".to_string()))
    }

    fn name(&self) -> &str {
        "chat"
    }
}

/// Plain `/completions` endpoint taking a single prompt string.
pub struct TextCompletionsClient {
    http: HttpBackend,
}

#[async_trait]
impl CompletionClient for TextCompletionsClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
        let request = TextCompletionRequest {
            model: self.http.model.clone(),
            prompt: prompt.to_string(),
            temperature: Some(self.http.temperature),
            max_tokens: Some(self.http.max_tokens),
        };

        let response: TextCompletionResponse = self.http.send(self.http.post("completions").json(&request)).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| CompletionError::Malformed("response has no choices".to_string()))
    }

    fn name(&self) -> &str {
        "text"
    }
}
