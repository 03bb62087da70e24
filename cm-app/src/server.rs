//! Clipmark server: wires the upstream client, sinks, session manager and
//! poll scheduler together and mounts the control routes on top.

use crate::config::ClipmarkConfig;
use crate::dispatcher::{FanoutDispatcher, ReportClient};
use crate::routes;
use crate::routing::TableRoutingResolver;
use crate::storage::ClipStore;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use cm_chat::{LiveChatClient, YouTubeChatClient, parse_video_id};
use cm_core::{PollScheduler, RoutingResolver, SessionManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub scheduler: Arc<PollScheduler>,
    pub chat: Arc<dyn LiveChatClient>,
    pub routing: Arc<dyn RoutingResolver>,
    pub store: ClipStore,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ClipmarkConfig::load(config_path).await?;
    // Constructing the client validates the key shape without a network call.
    YouTubeChatClient::new(cfg.api_key())?;
    tracing::info!(
        poll_interval_seconds = cfg.general.poll_interval_seconds,
        lookback_seconds = cfg.general.lookback_seconds,
        ledger_capacity = cfg.general.ledger_capacity,
        clips_db = %cfg.clips_db_path().display(),
        report_configured = cfg.report.append_url.is_some(),
        channel_routes = cfg.channels.routes.len(),
        "config ok"
    );
    Ok(())
}

/// One-shot stream resolution for a live URL; exercises the upstream client
/// without starting the server.
pub async fn resolve_one_shot(config_path: Option<PathBuf>, url: &str) -> Result<()> {
    let cfg = ClipmarkConfig::load(config_path).await?;
    let chat = YouTubeChatClient::new(cfg.api_key())?;
    let video_id = parse_video_id(url)
        .ok_or_else(|| anyhow::anyhow!("unsupported url: {url}"))?;
    let info = chat
        .resolve_stream(video_id.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("resolve {video_id}: {e}"))?;
    println!("video id:      {}", info.video_id);
    println!("live chat id:  {}", info.live_chat_id);
    println!("title:         {}", info.title);
    println!("channel:       {} ({})", info.channel_title, info.channel_id);
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ClipmarkConfig::load(config_path).await?;
    let started_at = Instant::now();
    let addr: SocketAddr = format!("{}:{}", cfg.server.bind, cfg.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("bad server bind address: {e}"))?;
    tracing::info!(
        bind_addr = %addr,
        poll_interval_seconds = cfg.general.poll_interval_seconds,
        lookback_seconds = cfg.general.lookback_seconds,
        error_cap = cfg.general.error_cap,
        ledger_capacity = cfg.general.ledger_capacity,
        clips_db = %cfg.clips_db_path().display(),
        report_configured = cfg.report.append_url.is_some(),
        channel_routes = cfg.channels.routes.len(),
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let chat: Arc<dyn LiveChatClient> = Arc::new(YouTubeChatClient::new(cfg.api_key())?);
    let store = ClipStore::open(cfg.clips_db_path()).await?;
    let report = match cfg.report.append_url.as_deref() {
        Some(url) => Some(ReportClient::new(url, cfg.report.auth_token.clone())?),
        None => None,
    };
    let dispatcher = Arc::new(FanoutDispatcher::new(store.clone(), report));
    let manager = Arc::new(SessionManager::new(cfg.general.ledger_capacity));
    let scheduler = Arc::new(PollScheduler::new(
        manager.clone(),
        chat.clone(),
        dispatcher,
        cfg.scheduler_config(),
    ));
    let reconcile_handle = scheduler.start();
    tracing::info!("poll scheduler started");

    let routing: Arc<dyn RoutingResolver> =
        Arc::new(TableRoutingResolver::from_config(&cfg.channels));
    let state = Arc::new(AppState {
        manager,
        scheduler: scheduler.clone(),
        chat,
        routing,
        store,
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state.clone()))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let shutdown = CancellationToken::new();
    tracing::info!(%addr, "clipmark serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    scheduler.shutdown().await;
    match reconcile_handle.await {
        Ok(()) => tracing::info!("poll scheduler shutdown completed"),
        Err(e) => tracing::error!(error = %e, "scheduler task join failed during shutdown"),
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
