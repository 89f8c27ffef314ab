mod applications;
mod config;
mod db;
mod errors;
mod extract;
mod features;
mod inference;
mod media;
mod models;
mod personality;
mod pipeline;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::applications::service::ApplicationService;
use crate::applications::store::PgApplicationStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::inference::InferenceContext;
use crate::pipeline::AnswerScoringPipeline;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::VideoArchive;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (aborts on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Interview API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgApplicationStore::new(db));
    let applications = ApplicationService::new(store.clone(), store);

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let archive = VideoArchive::new(s3, config.s3_bucket.clone());
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Load models once; every request shares them
    let ctx = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || InferenceContext::load(&config))
            .await
            .context("Model loading task failed")??
    };
    let pipeline = AnswerScoringPipeline::new(Arc::new(ctx), config.max_concurrent_scoring);
    info!(
        "Scoring pipeline ready ({} frames per answer, {} concurrent answers)",
        config.frame_samples, config.max_concurrent_scoring
    );

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

    let state = AppState {
        config: config.clone(),
        pipeline,
        applications,
        archive,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "interview-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
