use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use rag_query::config::Settings;
use rag_query::logger;
use rag_query::models::{HealthResponse, QueryRequest, QueryResponse};
use rag_query::rag::QueryPipeline;

struct AppState {
    pipeline: QueryPipeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logger::init();

    let settings = Settings::load()?;
    tracing::info!("Initialising RAG pipeline (corpus {})", settings.model_version);
    tracing::info!("Completion endpoint: {}", settings.completion.endpoint);

    let pipeline = QueryPipeline::from_settings(&settings).await?;
    let status = pipeline.status();
    if status.ready {
        tracing::info!("Loaded {} passages, pipeline ready", status.passages);
    } else {
        tracing::warn!("Pipeline is degraded; queries will receive the unavailable message");
    }

    let state = Arc::new(AppState { pipeline });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let index_html = settings.static_dir.join("index.html");
    let app = Router::new()
        .route("/query", post(query_handler))
        .route("/api/health", get(health_check))
        .route_service("/", ServeFile::new(index_html))
        .nest_service("/static", ServeDir::new(&settings.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("Query server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let answer = state.pipeline.answer(request.question()).await;
    Json(QueryResponse { answer: answer.text })
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.pipeline.status();
    Json(HealthResponse {
        status: if status.ready { "ready" } else { "degraded" }.to_string(),
        model_version: status.model_version,
        passages: status.passages,
        timestamp: Utc::now().to_rfc3339(),
    })
}
