use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rag_query::completion::build_client;
use rag_query::config::{CompletionBackend, CompletionSettings};
use rag_query::rag::corpus::{encode_embeddings, sha256_hex, CHUNKS_FILE, EMBEDDINGS_FILE, MANIFEST_FILE};
use rag_query::rag::{
    load_corpus, AnswerKind, BudgetUnit, ContextMeter, Embedder, PipelineOptions, PipelineState,
    PromptBuilder, QueryPipeline,
};
use rag_query::{Error, Result};

/// Maps keywords onto axes so tests can steer retrieval.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("empty".to_string()));
        }
        let text = text.to_lowercase();
        Ok(vec![
            text.contains("method") as u8 as f32 + 0.01,
            text.contains("conclusion") as u8 as f32,
            text.contains("reference") as u8 as f32,
        ])
    }

    fn dimension(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

fn write_snapshot(dir: &Path, version: &str, chunks: serde_json::Value, vectors: &[Vec<f32>], checksums: bool) {
    std::fs::create_dir_all(dir).unwrap();
    let chunk_bytes = serde_json::to_vec(&chunks).unwrap();
    let embedding_bytes = encode_embeddings(vectors);

    let mut manifest = json!({
        "model_version": version,
        "dimension": vectors.first().map(|v| v.len()).unwrap_or(3),
        "count": vectors.len(),
        "metric": "cosine",
        "embedding_model": "keyword",
    });
    if checksums {
        manifest["chunks_sha256"] = json!(sha256_hex(&chunk_bytes));
        manifest["embeddings_sha256"] = json!(sha256_hex(&embedding_bytes));
    }

    std::fs::write(dir.join(CHUNKS_FILE), chunk_bytes).unwrap();
    std::fs::write(dir.join(EMBEDDINGS_FILE), embedding_bytes).unwrap();
    std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec(&manifest).unwrap()).unwrap();
}

fn sample_snapshot(checksums: bool) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_snapshot(
        &tmp.path().join("models/v1.0"),
        "v1.0",
        json!([
            "We surveyed forty farms using a mixed methods design.",
            {"text": "In conclusion, irrigation timing matters most.", "metadata": {"source": "chapter5.pdf"}},
            {"text": "References are listed alphabetically."}
        ]),
        &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        checksums,
    );
    tmp
}

#[test]
fn test_load_snapshot_with_checksums() {
    let tmp = sample_snapshot(true);
    let corpus = assert_ok!(load_corpus(&tmp.path().join("models/v1.0"), "v1.0"));

    assert_eq!(corpus.model_version(), "v1.0");
    assert_eq!(corpus.len(), 3);
    assert_eq!(corpus.index().len(), corpus.passages().len());
    assert_eq!(corpus.passages().get(1).unwrap().source(), Some("chapter5.pdf"));
}

#[test]
fn test_load_rejects_wrong_version() {
    let tmp = sample_snapshot(false);
    let err = assert_err!(load_corpus(&tmp.path().join("models/v1.0"), "v2.0"));
    assert!(matches!(err, Error::StartupLoad(_)));
}

#[test]
fn test_load_rejects_tampered_chunks() {
    let tmp = sample_snapshot(true);
    let dir = tmp.path().join("models/v1.0");
    std::fs::write(dir.join(CHUNKS_FILE), br#"["a", "b", "c"]"#).unwrap();
    assert!(matches!(load_corpus(&dir, "v1.0"), Err(Error::StartupLoad(_))));
}

#[test]
fn test_load_rejects_count_disagreement() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("v1.0");
    write_snapshot(&dir, "v1.0", json!(["one", "two"]), &[vec![1.0, 0.0]], false);
    assert!(matches!(load_corpus(&dir, "v1.0"), Err(Error::StartupLoad(_))));
}

#[test]
fn test_load_rejects_missing_artifact() {
    let tmp = sample_snapshot(false);
    let dir = tmp.path().join("models/v1.0");
    std::fs::remove_file(dir.join(EMBEDDINGS_FILE)).unwrap();
    assert!(matches!(load_corpus(&dir, "v1.0"), Err(Error::StartupLoad(_))));
}

#[test]
fn test_load_empty_snapshot() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("empty");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(CHUNKS_FILE), b"[]").unwrap();
    std::fs::write(dir.join(EMBEDDINGS_FILE), b"").unwrap();
    std::fs::write(
        dir.join(MANIFEST_FILE),
        br#"{"model_version": "v0", "dimension": 3, "count": 0, "metric": "cosine"}"#,
    )
    .unwrap();

    let corpus = assert_ok!(load_corpus(&dir, "v0"));
    assert!(corpus.is_empty());
    assert!(corpus.index().search(&[1.0, 0.0, 0.0], 4).unwrap().is_empty());
}

async fn pipeline_against(server: &MockServer, snapshot: &TempDir) -> QueryPipeline {
    let settings = CompletionSettings {
        backend: CompletionBackend::Chat,
        endpoint: format!("{}/v1", server.uri()),
        api_key: None,
        model: "test-model".to_string(),
        system_prompt: "You are an expert dissertation assistant.".to_string(),
        temperature: 0.7,
        max_tokens: 150,
        timeout_secs: 1,
    };
    let corpus = load_corpus(&snapshot.path().join("models/v1.0"), "v1.0");
    let state = PipelineState::from_startup(corpus, Ok(Arc::new(KeywordEmbedder) as Arc<dyn Embedder>)).unwrap();
    QueryPipeline::new(
        state,
        build_client(&settings).unwrap(),
        PromptBuilder::new(ContextMeter::new(BudgetUnit::Chars).unwrap()),
        PipelineOptions {
            top_k: 3,
            max_context_units: 2_000,
            completion_timeout: Duration::from_secs(1),
        },
    )
}

#[tokio::test]
async fn test_answer_through_http_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "\n Irrigation timing. \n"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = sample_snapshot(true);
    let pipeline = pipeline_against(&server, &snapshot).await;

    let traced = pipeline.answer_traced("What is the conclusion?").await;
    assert_eq!(traced.answer.kind, AnswerKind::Generated);
    assert_eq!(traced.answer.text, "Irrigation timing.");
    assert_eq!(traced.trace.hits[0].id, 1);

    let prompt = traced.trace.prompt.unwrap();
    assert!(prompt.contains("[1] (source: chapter5.pdf"));
    let conclusion = prompt.find("In conclusion").unwrap();
    let methods = prompt.find("mixed methods").unwrap();
    assert!(conclusion < methods);
}

#[tokio::test]
async fn test_upstream_error_becomes_internal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend overloaded"))
        .mount(&server)
        .await;

    let snapshot = sample_snapshot(false);
    let pipeline = pipeline_against(&server, &snapshot).await;

    let answer = pipeline.answer("Which method was used?").await;
    assert_eq!(answer.kind, AnswerKind::InternalError);
    assert!(!answer.text.contains("overloaded"));
}

#[tokio::test]
async fn test_slow_upstream_is_cut_off() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": [{"message": {"role": "assistant", "content": "late"}}]}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let snapshot = sample_snapshot(false);
    let pipeline = pipeline_against(&server, &snapshot).await;

    let started = std::time::Instant::now();
    let answer = pipeline.answer("What is the conclusion?").await;
    assert_eq!(answer.kind, AnswerKind::InternalError);
    assert!(started.elapsed() < Duration::from_secs(3));
}
