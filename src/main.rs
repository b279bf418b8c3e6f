//! quotegate
//!
//! Resolves token quotes through the tiered cache and prints them as JSON
//! lines. In watch mode it repeats on an interval and serves health and
//! metrics endpoints until interrupted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           quotegate                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Prefetch    │───▶│ TieredCache  │───▶│ Dexscreener  │       │
//! │  │  Scheduler   │    │ (coalescing) │    │  Provider    │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │                                    │
//! │                      ┌──────▼───────┐                            │
//! │                      │    Redis     │   /healthz /readyz         │
//! │                      │  (optional)  │   /metrics /status         │
//! │                      └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use quotegate::adapters::{
    create_shared_store, DexscreenerProvider, ProviderConfig, RedisConfig, TokenQuote,
};
use quotegate::cache::{PrefetchConfig, TieredCacheConfig};
use quotegate::error::{Error, Result};
use quotegate::lock::GuardConfig;
use quotegate::service::{CoreConfig, QuoteCore};
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// quotegate - cached, coalesced token quote lookups
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Token mints to resolve
    #[arg(env = "QUOTEGATE_MINTS", value_delimiter = ',')]
    mints: Vec<String>,

    /// Repeat the lookup every N seconds until Ctrl-C
    #[arg(long, env = "WATCH_INTERVAL_SECS")]
    watch_interval_secs: Option<u64>,

    /// Provider endpoint the mint is appended to
    #[arg(
        long,
        env = "DEX_API_URL",
        default_value = "https://api.dexscreener.com/latest/dex/tokens"
    )]
    provider_url: String,

    /// Provider request timeout in seconds
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "10")]
    provider_timeout_secs: u64,

    /// Redis URL for the shared tier and locks (local-only when unset)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Redis connection pool size
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "10")]
    redis_pool_size: usize,

    /// Local tier TTL in seconds
    #[arg(long, env = "LOCAL_TTL_SECS", default_value = "30")]
    local_ttl_secs: u64,

    /// Local tier entry bound
    #[arg(long, env = "LOCAL_MAX_ENTRIES", default_value = "500")]
    local_max_entries: usize,

    /// Shared tier TTL in seconds
    #[arg(long, env = "SHARED_TTL_SECS", default_value = "60")]
    shared_ttl_secs: u64,

    /// Maximum simultaneous provider calls
    #[arg(long, env = "MAX_CONCURRENT_FETCHES", default_value = "6")]
    max_concurrent_fetches: usize,

    /// Keys per prefetch batch
    #[arg(long, env = "PREFETCH_BATCH_SIZE", default_value = "10")]
    prefetch_batch_size: usize,

    /// Delay before each prefetch drain in milliseconds
    #[arg(long, env = "PREFETCH_DELAY_MS", default_value = "100")]
    prefetch_delay_ms: u64,

    /// Edit lock TTL in seconds
    #[arg(long, env = "LOCK_TTL_SECS", default_value = "30")]
    lock_ttl_secs: u64,

    /// Metrics server bind address (watch mode)
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address (watch mode)
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn core_config(&self) -> CoreConfig {
        CoreConfig {
            cache: TieredCacheConfig {
                local_ttl: Duration::from_secs(self.local_ttl_secs),
                local_max_entries: self.local_max_entries,
                shared_ttl: Duration::from_secs(self.shared_ttl_secs),
                max_concurrent_fetches: self.max_concurrent_fetches,
                batch_size: self.prefetch_batch_size,
                ..Default::default()
            },
            prefetch: PrefetchConfig {
                batch_size: self.prefetch_batch_size,
                drain_delay: Duration::from_millis(self.prefetch_delay_ms),
            },
            guard: GuardConfig {
                lock_ttl: Duration::from_secs(self.lock_ttl_secs),
                ..Default::default()
            },
        }
    }

    fn redis_config(&self) -> RedisConfig {
        match &self.redis_url {
            Some(url) => RedisConfig {
                enabled: true,
                url: url.clone(),
                pool_size: self.redis_pool_size,
                ..Default::default()
            },
            None => RedisConfig::default(),
        }
    }

    fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.provider_url.clone(),
            timeout: Duration::from_secs(self.provider_timeout_secs),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if args.mints.is_empty() {
        return Err(Error::Config("at least one mint is required".to_string()));
    }

    info!("Starting quotegate");
    info!("  Provider URL: {}", args.provider_url);
    info!("  Max concurrent fetches: {}", args.max_concurrent_fetches);
    info!(
        "  Local TTL: {}s, shared TTL: {}s",
        args.local_ttl_secs, args.shared_ttl_secs
    );

    let provider = DexscreenerProvider::new(args.provider_config())?;
    let store = create_shared_store(&args.redis_config()).await;
    let store_expected = args.redis_url.is_some();

    let core = Arc::new(QuoteCore::new(
        args.core_config(),
        Arc::new(provider),
        store,
    ));

    let Some(interval_secs) = args.watch_interval_secs else {
        resolve(&core, &args.mints).await;
        return Ok(());
    };

    // Start health server
    let health_core = core.clone();
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_health_server(&health_addr, health_core, store_expected).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_core = core.clone();
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_metrics_server(&metrics_addr, metrics_core).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("Watching {} mints every {}s", args.mints.len(), interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => resolve(&core, &args.mints).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    core.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Warm, resolve and print every mint. Missing quotes are logged, not fatal.
async fn resolve(core: &QuoteCore, mints: &[String]) {
    let queued = core.prefetch().enqueue_all(mints);
    if queued > 0 {
        info!(queued, "Queued mints for prefetch");
    }

    let found = core.cache().get_many(mints).await;

    for mint in mints {
        let Some(payload) = found.get(mint) else {
            warn!(mint = %mint, "No quote available");
            continue;
        };

        match TokenQuote::from_payload(payload) {
            Ok(Some(quote)) => {
                let line = serde_json::json!({ "mint": mint, "quote": quote });
                println!("{}", line);
            }
            Ok(None) => warn!(mint = %mint, "Provider payload is not an object"),
            Err(e) => warn!(mint = %mint, error = %e, "Failed to decode provider payload"),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "reqwest=warn", "redis=info"]
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            |filter, directive| filter.add_directive(directive),
        );

    // Logs go to stderr so stdout stays JSON quote lines.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Health & Metrics Servers
// =============================================================================

mod server {
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::HeaderValue;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
    use tokio::net::TcpListener;
    use tracing::info;

    use quotegate::error::{Error, Result};
    use quotegate::service::QuoteCore;

    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn bind(addr: &str, what: &str) -> Result<TcpListener> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", what, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", what, e)))?;

        info!("{} server listening on {}", what, addr);
        Ok(listener)
    }

    pub async fn run_health_server(
        addr: &str,
        core: Arc<QuoteCore>,
        store_expected: bool,
    ) -> Result<()> {
        let listener = bind(addr, "Health").await?;

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

            let io = TokioIo::new(stream);
            let core = core.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let core = core.clone();
                    async move { Ok::<_, Infallible>(health_response(&req, &core, store_expected)) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!("Health server connection error: {}", e);
                }
            });
        }
    }

    fn health_response<B>(
        req: &Request<B>,
        core: &QuoteCore,
        store_expected: bool,
    ) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
            "/readyz" => {
                if store_expected && core.status().shared_store.is_none() {
                    text(StatusCode::OK, "degraded")
                } else {
                    text(StatusCode::OK, "ok")
                }
            }
            "/status" => match serde_json::to_vec(&core.status()) {
                Ok(body) => text(StatusCode::OK, body),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }

    /// Gauges mirrored from the core's counters at scrape time.
    struct CoreGauges {
        registry: Registry,
        cache_events: IntGaugeVec,
        guard_events: IntGaugeVec,
        local_entries: IntGauge,
        in_flight: IntGauge,
        gate_active: IntGauge,
        gate_waiting: IntGauge,
        prefetch_pending: IntGauge,
    }

    impl CoreGauges {
        fn new() -> Result<Self> {
            let registry = Registry::new();
            let metric_err =
                |e: prometheus::Error| Error::Internal(format!("Metric registration failed: {}", e));

            let cache_events = IntGaugeVec::new(
                Opts::new("quotegate_cache_events", "Cache event counts by kind"),
                &["event"],
            )
            .map_err(metric_err)?;
            let guard_events = IntGaugeVec::new(
                Opts::new("quotegate_guard_events", "Edit guard outcomes by kind"),
                &["outcome"],
            )
            .map_err(metric_err)?;
            let gauge = |name: &str, help: &str| IntGauge::new(name, help).map_err(metric_err);

            let gauges = Self {
                local_entries: gauge("quotegate_local_entries", "Entries in the local tier")?,
                in_flight: gauge("quotegate_in_flight_fetches", "Outbound fetches in flight")?,
                gate_active: gauge("quotegate_gate_active", "Concurrency gate permits held")?,
                gate_waiting: gauge("quotegate_gate_waiting", "Callers waiting at the gate")?,
                prefetch_pending: gauge("quotegate_prefetch_pending", "Keys queued for prefetch")?,
                cache_events,
                guard_events,
                registry,
            };

            for collector in [
                Box::new(gauges.cache_events.clone()) as Box<dyn prometheus::core::Collector>,
                Box::new(gauges.guard_events.clone()),
                Box::new(gauges.local_entries.clone()),
                Box::new(gauges.in_flight.clone()),
                Box::new(gauges.gate_active.clone()),
                Box::new(gauges.gate_waiting.clone()),
                Box::new(gauges.prefetch_pending.clone()),
            ] {
                gauges.registry.register(collector).map_err(metric_err)?;
            }

            Ok(gauges)
        }

        fn update(&self, core: &QuoteCore) {
            let status = core.status();
            let cache = &status.cache;

            for (event, value) in [
                ("local_hit", cache.local_hits),
                ("shared_hit", cache.shared_hits),
                ("miss", cache.misses),
                ("coalesced_wait", cache.coalesced_waits),
                ("provider_fetch", cache.provider_fetches),
                ("provider_failure", cache.provider_failures),
                ("store_error", cache.store_errors),
                ("prefetch_enqueued", cache.prefetch_enqueued),
                ("prefetch_skipped", cache.prefetch_skipped),
                ("prefetch_batch", cache.prefetch_batches),
            ] {
                self.cache_events.with_label_values(&[event]).set(value as i64);
            }

            for (outcome, value) in [
                ("granted", status.guard.granted),
                ("busy", status.guard.busy),
                ("fallback", status.guard.fallback),
            ] {
                self.guard_events.with_label_values(&[outcome]).set(value as i64);
            }

            self.local_entries.set(status.local_entries as i64);
            self.in_flight.set(status.in_flight as i64);
            self.gate_active.set(status.gate_active as i64);
            self.gate_waiting.set(status.gate_waiting as i64);
            self.prefetch_pending.set(status.prefetch_pending as i64);
        }

        fn render(&self, core: &QuoteCore) -> Response<Full<Bytes>> {
            self.update(core);

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&self.registry.gather(), &mut buffer) {
                Ok(()) => {
                    let mut response = text(StatusCode::OK, buffer);
                    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, content_type);
                    }
                    response
                }
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
    }

    pub async fn run_metrics_server(addr: &str, core: Arc<QuoteCore>) -> Result<()> {
        let gauges = Arc::new(CoreGauges::new()?);
        let listener = bind(addr, "Metrics").await?;

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

            let io = TokioIo::new(stream);
            let core = core.clone();
            let gauges = gauges.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let response = match req.uri().path() {
                        "/metrics" => gauges.render(&core),
                        _ => text(StatusCode::NOT_FOUND, "not found"),
                    };
                    async move { Ok::<_, Infallible>(response) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!("Metrics server connection error: {}", e);
                }
            });
        }
    }
}
