use super::handlers::{handle_dead_letters, handle_health, handle_status, handle_webhook};
use super::idempotency::IdempotencyStore;
use super::intake::IntakePipeline;
use super::signature::SigningSecret;
use super::{AppState, REQUEST_TIMEOUT_SECS};

use crate::collaborators::{ChatClient, CrmClient};
use crate::config::Config;
use crate::queue::{DeadLetterStore, Executor, JobStore};
use crate::security::SecurityMonitor;
use crate::sync::BridgeProcessor;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

/// Run the webhook gateway and its queue workers.
pub async fn run_server(config: Arc<Config>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    let host = config.gateway.host.clone();
    run_server_with_listener(&host, listener, config).await
}

struct ServerResources {
    state: AppState,
    executor: Arc<Executor>,
    workers: usize,
}

fn build_resources(config: &Config) -> Result<ServerResources> {
    // Fails closed: a missing secret is a fatal misconfiguration, surfaced
    // here rather than silently accepting unsigned deliveries per request.
    config.validate_for_serve()?;

    let secret = config
        .webhook
        .secret
        .as_deref()
        .map(SigningSecret::new)
        .context("webhook secret validated but absent")?;

    let crm_config = config.crm.as_ref().context("crm config validated but absent")?;
    let chat_config = config
        .chat
        .as_ref()
        .context("chat config validated but absent")?;
    let crm = Arc::new(CrmClient::new(
        &crm_config.base_url,
        crm_config.api_token.clone(),
    )?);
    let chat = Arc::new(ChatClient::new(
        &chat_config.base_url,
        chat_config.api_token.clone(),
    )?);
    let processor = Arc::new(BridgeProcessor::new(crm, chat));

    let idempotency = Arc::new(IdempotencyStore::new(config.webhook.idempotency_ttl_secs));
    let store = Arc::new(JobStore::new(config.queue.pending_cap));
    let monitor = Arc::new(SecurityMonitor::new(config.security.block_secs));
    let dead_letters = Arc::new(DeadLetterStore::new(&config.workspace_dir));

    let pipeline = Arc::new(IntakePipeline::new(
        secret,
        config.webhook.clone(),
        config.queue.max_attempts,
        Arc::clone(&idempotency),
        Arc::clone(&store),
        Arc::clone(&monitor),
    ));

    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::clone(&dead_letters),
        processor,
        config.queue.clone(),
    ));

    Ok(ServerResources {
        state: AppState {
            pipeline,
            idempotency,
            store,
            monitor,
            dead_letters,
        },
        executor,
        workers: config.queue.workers.max(1),
    })
}

/// Run the gateway from a pre-bound listener.
pub async fn run_server_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();
    let display_addr = format!("{host}:{actual_port}");

    let resources = build_resources(&config)?;

    for worker in 0..resources.workers {
        let executor = Arc::clone(&resources.executor);
        tokio::spawn(async move {
            tracing::debug!(worker, "queue worker started");
            executor.run().await;
        });
    }

    print_gateway_banner(&display_addr, resources.workers);

    let app = build_app(
        resources.state,
        &config.gateway.cors_origins,
        config.webhook.max_body_bytes,
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serve webhook gateway")?;

    Ok(())
}

fn print_gateway_banner(display_addr: &str, workers: usize) {
    println!("Gateway listening on {display_addr}");
    println!("  POST /webhooks/chat");
    println!("  GET  /webhooks/status");
    println!("  GET  /webhooks/dead-letters");
    println!("  GET  /health");
    println!("  {workers} queue worker(s)");
}

fn build_app(state: AppState, cors_origins: &[String], max_body_bytes: usize) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/webhooks/chat", post(handle_webhook))
        .route("/webhooks/status", get(handle_status))
        .route("/webhooks/dead-letters", get(handle_dead_letters))
        .with_state(state)
        // The transport cap sits above the configured gate so the pipeline
        // answers oversized bodies with a JSON 413 instead of a bare reject.
        .layer(DefaultBodyLimit::max(
            max_body_bytes.saturating_mul(2).saturating_add(1024),
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    if !cors_origins.is_empty() {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::HeaderName::from_static("x-signature"),
                    axum::http::HeaderName::from_static("x-timestamp"),
                ]),
        );
    }

    app
}
