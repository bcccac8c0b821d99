//! Versioned corpus snapshots.
//!
//! A snapshot directory holds three artifacts describing the same ordered
//! passage set:
//!
//! - `index.json`: manifest with version, dimension, count and checksums
//! - `chunks.json`: passage texts, optionally with metadata
//! - `embeddings.bin`: `count * dimension` little-endian `f32`, row-major
//!
//! Loading is all-or-nothing. A [`Corpus`] only exists once every artifact has
//! been read and cross-checked.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sha2::{Digest, Sha256};

use super::passage_store::PassageStore;
use super::vector_index::VectorIndex;
use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "index.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusManifest {
    pub model_version: String,
    pub dimension: usize,
    pub count: usize,
    pub metric: Metric,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub chunks_sha256: Option<String>,
    #[serde(default)]
    pub embeddings_sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkRecord {
    Text(String),
    Passage {
        text: String,
        #[serde(default)]
        metadata: Option<JsonMap<String, JsonValue>>,
    },
}

impl ChunkRecord {
    fn into_parts(self) -> (String, Option<JsonMap<String, JsonValue>>) {
        match self {
            Self::Text(text) => (text, None),
            Self::Passage { text, metadata } => (text, metadata),
        }
    }
}

/// An immutable passage store and the vector index over it, guaranteed to
/// agree on size.
#[derive(Debug)]
pub struct Corpus {
    model_version: String,
    index: VectorIndex,
    passages: PassageStore,
}

impl Corpus {
    pub fn new(model_version: impl Into<String>, index: VectorIndex, passages: PassageStore) -> Result<Self> {
        if index.len() != passages.len() {
            return Err(Error::startup(format!(
                "index holds {} vectors but store holds {} passages",
                index.len(),
                passages.len()
            )));
        }
        Ok(Self {
            model_version: model_version.into(),
            index,
            passages,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn passages(&self) -> &PassageStore {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Load the snapshot in `dir`, which must declare `model_version`.
pub fn load_corpus(dir: &Path, model_version: &str) -> Result<Corpus> {
    tracing::info!("Loading corpus {} from {}", model_version, dir.display());

    let manifest: CorpusManifest = serde_json::from_slice(&read_artifact(dir, MANIFEST_FILE)?)
        .map_err(|e| Error::startup(format!("Invalid {}: {}", MANIFEST_FILE, e)))?;

    if manifest.model_version != model_version {
        return Err(Error::startup(format!(
            "Manifest describes version {} but {} was requested",
            manifest.model_version, model_version
        )));
    }

    let chunk_bytes = read_artifact(dir, CHUNKS_FILE)?;
    verify_checksum(CHUNKS_FILE, &chunk_bytes, manifest.chunks_sha256.as_deref())?;
    let records: Vec<ChunkRecord> = serde_json::from_slice(&chunk_bytes)
        .map_err(|e| Error::startup(format!("Invalid {}: {}", CHUNKS_FILE, e)))?;

    let embedding_bytes = read_artifact(dir, EMBEDDINGS_FILE)?;
    verify_checksum(EMBEDDINGS_FILE, &embedding_bytes, manifest.embeddings_sha256.as_deref())?;
    let vectors = decode_embeddings(&embedding_bytes, &manifest)?;

    if records.len() != manifest.count {
        return Err(Error::startup(format!(
            "{} holds {} passages but manifest declares {}",
            CHUNKS_FILE,
            records.len(),
            manifest.count
        )));
    }

    let passages = PassageStore::new(records.into_iter().map(ChunkRecord::into_parts));
    let index = VectorIndex::from_flat(manifest.dimension, vectors)
        .map_err(|e| Error::startup(format!("Invalid {}: {}", EMBEDDINGS_FILE, e)))?;
    let corpus = Corpus::new(manifest.model_version, index, passages)?;

    tracing::info!(
        passages = corpus.len(),
        dimension = corpus.index().dimension(),
        "Corpus {} loaded",
        corpus.model_version()
    );
    Ok(corpus)
}

fn read_artifact(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|e| Error::startup(format!("Failed to read {}: {}", path.display(), e)))
}

fn verify_checksum(name: &str, bytes: &[u8], expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(Error::startup(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            name, expected, actual
        )));
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn decode_embeddings(bytes: &[u8], manifest: &CorpusManifest) -> Result<Vec<f32>> {
    let expected = manifest
        .count
        .checked_mul(manifest.dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::startup("Manifest count * dimension overflows"))?;
    if bytes.len() != expected {
        return Err(Error::startup(format!(
            "{} is {} bytes, expected {} for {} x {} f32",
            EMBEDDINGS_FILE,
            bytes.len(),
            expected,
            manifest.count,
            manifest.dimension
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Serialize vectors in the `embeddings.bin` layout.
pub fn encode_embeddings(vectors: &[Vec<f32>]) -> Vec<u8> {
    vectors
        .iter()
        .flat_map(|v| v.iter().flat_map(|x| x.to_le_bytes()))
        .collect()
}
