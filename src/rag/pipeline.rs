use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::corpus::{load_corpus, Corpus};
use super::embeddings::{Embedder, FastEmbedEmbedder};
use super::prompt::{ContextMeter, PromptBuilder, RankedPassage};
use super::vector_index::SearchHit;
use crate::completion::{build_client, CompletionClient};
use crate::config::Settings;
use crate::error::{CompletionError, Error, Result};

pub const INVALID_QUESTION_MESSAGE: &str = "Please provide a valid question.";
pub const UNAVAILABLE_MESSAGE: &str = "The service is temporarily unavailable. Please try again later.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Sorry, something went wrong while answering your question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Generated,
    InvalidInput,
    Unavailable,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    pub kind: AnswerKind,
}

impl Answer {
    fn generated(text: String) -> Self {
        Self { text, kind: AnswerKind::Generated }
    }

    fn invalid_input() -> Self {
        Self {
            text: INVALID_QUESTION_MESSAGE.to_string(),
            kind: AnswerKind::InvalidInput,
        }
    }

    fn unavailable() -> Self {
        Self {
            text: UNAVAILABLE_MESSAGE.to_string(),
            kind: AnswerKind::Unavailable,
        }
    }

    fn internal_error() -> Self {
        Self {
            text: INTERNAL_ERROR_MESSAGE.to_string(),
            kind: AnswerKind::InternalError,
        }
    }
}

/// What one `answer` call retrieved and sent, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct QueryTrace {
    pub hits: Vec<SearchHit>,
    pub prompt: Option<String>,
    pub included: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TracedAnswer {
    pub answer: Answer,
    pub trace: QueryTrace,
}

/// Fixed at startup; a restart is the only way to leave `Degraded`.
#[derive(Clone)]
pub enum PipelineState {
    Ready {
        corpus: Arc<Corpus>,
        embedder: Arc<dyn Embedder>,
    },
    Degraded {
        reason: String,
    },
}

impl PipelineState {
    /// `Ready` only if both components loaded and share a vector space.
    pub fn from_startup(corpus: Result<Corpus>, embedder: Result<Arc<dyn Embedder>>) -> Result<Self> {
        let corpus = corpus?;
        let embedder = embedder?;
        if embedder.dimension() != corpus.index().dimension() {
            return Err(Error::startup(format!(
                "embedder {} produces {}-d vectors but the index is {}-d",
                embedder.name(),
                embedder.dimension(),
                corpus.index().dimension()
            )));
        }
        Ok(Self::Ready {
            corpus: Arc::new(corpus),
            embedder,
        })
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded { reason: reason.into() }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready { corpus, embedder } => f
                .debug_struct("Ready")
                .field("model_version", &corpus.model_version())
                .field("passages", &corpus.len())
                .field("embedder", &embedder.name())
                .finish(),
            Self::Degraded { reason } => f.debug_struct("Degraded").field("reason", reason).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub top_k: usize,
    pub max_context_units: usize,
    pub completion_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.top_k,
            max_context_units: settings.max_context_units,
            completion_timeout: settings.completion.timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub ready: bool,
    pub model_version: Option<String>,
    pub passages: usize,
}

/// Question in, grounded answer out. Shared read-only across requests.
pub struct QueryPipeline {
    state: PipelineState,
    completion: Arc<dyn CompletionClient>,
    prompt_builder: PromptBuilder,
    options: PipelineOptions,
}

impl QueryPipeline {
    pub fn new(
        state: PipelineState,
        completion: Arc<dyn CompletionClient>,
        prompt_builder: PromptBuilder,
        options: PipelineOptions,
    ) -> Self {
        Self {
            state,
            completion,
            prompt_builder,
            options,
        }
    }

    /// Build every component from settings. Corpus or embedder failures put
    /// the pipeline in `Degraded` unless `require_corpus` is set.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let completion = build_client(&settings.completion)?;
        let prompt_builder = PromptBuilder::new(ContextMeter::new(settings.budget_unit)?);

        let corpus_dir = settings.corpus_dir();
        let model_version = settings.model_version.clone();
        let corpus = tokio::task::spawn_blocking(move || load_corpus(&corpus_dir, &model_version))
            .await
            .map_err(|e| Error::Task(e.to_string()))?;

        let model_dir = settings.embedding_model_dir.clone();
        let embedder = tokio::task::spawn_blocking(move || {
            FastEmbedEmbedder::from_dir(&model_dir).map(|e| Arc::new(e) as Arc<dyn Embedder>)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?;

        let state = match PipelineState::from_startup(corpus, embedder) {
            Ok(state) => state,
            Err(e) if settings.require_corpus => return Err(e),
            Err(e) => {
                tracing::warn!("Starting in degraded mode: {}", e);
                PipelineState::degraded(e.to_string())
            }
        };

        Ok(Self::new(
            state,
            completion,
            prompt_builder,
            PipelineOptions::from_settings(settings),
        ))
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn status(&self) -> PipelineStatus {
        match &self.state {
            PipelineState::Ready { corpus, .. } => PipelineStatus {
                ready: true,
                model_version: Some(corpus.model_version().to_string()),
                passages: corpus.len(),
            },
            PipelineState::Degraded { .. } => PipelineStatus {
                ready: false,
                model_version: None,
                passages: 0,
            },
        }
    }

    pub async fn answer(&self, question: &str) -> Answer {
        self.answer_traced(question).await.answer
    }

    /// Like [`answer`](Self::answer), also returning what was retrieved and
    /// the prompt that was sent. Never fails; every error maps to a fixed
    /// message.
    pub async fn answer_traced(&self, question: &str) -> TracedAnswer {
        let mut trace = QueryTrace::default();

        let question = question.trim();
        if question.is_empty() {
            return TracedAnswer {
                answer: Answer::invalid_input(),
                trace,
            };
        }

        let (corpus, embedder) = match &self.state {
            PipelineState::Ready { corpus, embedder } => (corpus, embedder),
            PipelineState::Degraded { reason } => {
                tracing::warn!(reason = %reason, "Query rejected: corpus unavailable");
                return TracedAnswer {
                    answer: Answer::unavailable(),
                    trace,
                };
            }
        };

        let request_id = Uuid::new_v4();
        let answer = match self.run(request_id, question, corpus, embedder.as_ref(), &mut trace).await {
            Ok(text) => {
                tracing::info!(%request_id, passages = trace.included.len(), "Answered query");
                Answer::generated(text)
            }
            Err(e) => {
                tracing::error!(%request_id, "Query failed: {}", e);
                Answer::internal_error()
            }
        };

        TracedAnswer { answer, trace }
    }

    async fn run(
        &self,
        request_id: Uuid,
        question: &str,
        corpus: &Arc<Corpus>,
        embedder: &dyn Embedder,
        trace: &mut QueryTrace,
    ) -> Result<String> {
        let query = embedder.embed(question).await?;

        let top_k = self.options.top_k;
        let search_corpus = corpus.clone();
        let hits = tokio::task::spawn_blocking(move || search_corpus.index().search(&query, top_k))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;
        tracing::debug!(%request_id, hits = hits.len(), "Retrieved passages");
        trace.hits = hits.clone();

        let mut ranked = Vec::with_capacity(hits.len());
        for (i, hit) in hits.iter().enumerate() {
            match corpus.passages().get(hit.id) {
                Ok(passage) => ranked.push(RankedPassage {
                    rank: i + 1,
                    score: hit.score,
                    passage,
                }),
                Err(e) => tracing::warn!(%request_id, "Skipping unresolved hit: {}", e),
            }
        }

        let prompt = self
            .prompt_builder
            .build(question, &ranked, self.options.max_context_units);
        tracing::debug!(
            %request_id,
            included = prompt.included.len(),
            context_units = prompt.context_units,
            "Prompt built"
        );
        trace.included = prompt.included;
        trace.prompt = Some(prompt.text.clone());

        let timeout = self.options.completion_timeout;
        let raw = match tokio::time::timeout(timeout, self.completion.complete(&prompt.text)).await {
            Ok(result) => result?,
            Err(_) => return Err(CompletionError::Timeout(timeout).into()),
        };

        let answer = raw.trim();
        if answer.is_empty() {
            return Err(CompletionError::Malformed("completion was empty".to_string()).into());
        }
        Ok(answer.to_string())
    }
}
