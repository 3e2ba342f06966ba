//! LLM Relay Server - Main entry point
//!
//! Reads its configuration from the environment, builds the router and
//! serves it until the process is stopped.

use anyhow::Result;
use chrono::Local;
use llm_relay::{
    api::{build_router, AppState, UpstreamClient},
    core::{init_metrics, AppConfig},
    services::{LoggingUsageSink, RedactionPipeline},
    transformer::Dialect,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .or_else(detect_cpu_limit)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Timestamps in the local timezone (respects TZ)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn init_tracing() {
    let no_color = std::env::var("NO_COLOR").is_ok();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Noise suppression for the HTTP stack is appended even when RUST_LOG is set,
    // otherwise RUST_LOG=trace floods the log with frame dumps.
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,llm_relay=debug".to_string());
    let filter = tracing_subscriber::EnvFilter::new(format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    ));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_timer(LocalTime))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .init();
    }
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::from_env()?;
    let pipeline = RedactionPipeline::new(config.thinking_filter_mode)
        .map_err(|e| anyhow::anyhow!("Failed to compile redaction rules: {}", e))?;

    let upstream = UpstreamClient::new(config.verify_ssl);
    let (dialect, model) = match &config.upstream {
        Some(target) => {
            upstream.configure(target.base_url.clone(), target.api_key.clone());
            tracing::info!(dialect = %target.dialect, model_override = ?target.model, "Upstream dialect");
            (target.dialect, target.model.clone())
        }
        None => {
            tracing::warn!("UPSTREAM_BASE_URL is not set; relay calls will fail until an upstream is configured");
            (Dialect::default(), None)
        }
    };

    let state = AppState::new(pipeline, upstream, dialect)
        .with_upstream_model(model)
        .with_usage_sink(Arc::new(LoggingUsageSink));

    let app = build_router(Arc::new(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HOST value {}: {}", config.server.host, e))?;
    let addr = SocketAddr::new(host, config.server.port);

    tracing::info!("Starting LLM Relay on {}", addr);
    tracing::info!(
        thinking_filter = config.thinking_filter_mode.as_str(),
        "Relay endpoints: /v1/chat/completions, /v1/messages"
    );
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Detect CPU limit from cgroup (for containerized environments)
fn detect_cpu_limit() -> Option<usize> {
    // cgroup v2
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let parts: Vec<&str> = max.split_whitespace().collect();
        if let [quota, period] = parts.as_slice() {
            if let (Ok(quota), Ok(period)) = (quota.parse::<i64>(), period.parse::<i64>()) {
                if quota > 0 && period > 0 {
                    return Some(((quota as f64 / period as f64).ceil() as usize).max(1));
                }
            }
        }
    }

    // cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    if quota > 0 && period > 0 {
        Some(((quota as f64 / period as f64).ceil() as usize).max(1))
    } else {
        None
    }
}
