use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};

use crate::error::{Error, Result};

/// Maps text into the vector space the corpus index was built in.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single non-empty text. Whitespace-only input is rejected
    /// with [`Error::Embedding`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

pub(crate) fn ensure_embeddable(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::Embedding("cannot embed empty text".to_string()));
    }
    Ok(())
}

/// Local ONNX sentence-embedding model loaded from a directory of exported
/// model files. The model is read-only once loaded and shared across
/// concurrent requests.
pub struct FastEmbedEmbedder {
    model: Arc<TextEmbedding>,
    dimension: usize,
    name: String,
}

impl FastEmbedEmbedder {
    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            return Err(Error::startup(format!(
                "Model directory not found: {}",
                model_dir.display()
            )));
        }

        let read = |file: &str| {
            std::fs::read(model_dir.join(file))
                .map_err(|e| Error::startup(format!("Failed to read {}: {}", file, e)))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| Error::startup(format!("Failed to initialize embedding model: {}", e)))?;

        // The exported files carry no explicit dimension, so probe once.
        let dimension = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| Error::startup(format!("Failed to probe embedding dimension: {}", e)))?
            .first()
            .map(|v| v.len())
            .ok_or_else(|| Error::startup("Embedding model returned no probe vector"))?;

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "fastembed".to_string());

        tracing::info!(dimension, model = %name, "Embedding model initialized");
        Ok(Self {
            model: Arc::new(model),
            dimension,
            name,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_embeddable(text)?;
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            model
                .embed(vec![text], None)
                .map_err(|e| Error::Embedding(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedding("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FastEmbedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEmbedder")
            .field("dimension", &self.dimension)
            .field("name", &self.name)
            .finish()
    }
}
