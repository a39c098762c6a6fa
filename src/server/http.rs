//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::cache::{
    spawn_cleanup_task, spawn_invalidation_listener, CacheConfig, MemoryCache, ReviewCache,
};
use crate::config::Args;
use crate::gateway::ReviewGateway;
use crate::nats::NatsClient;
use crate::queue::{JetStreamQueue, MemoryQueue};
use crate::read::{NatsReadClient, StoreReadService};
use crate::routes;
use crate::store::MemoryReviewStore;
use crate::types::GatewayError;
use crate::worker::{CommandProcessor, WorkerConfig};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Where writes go and reads come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingMode {
    /// JetStream queue, NATS read service, remote workers
    Distributed,
    /// In-process queue, store and processor (dev mode)
    Embedded,
}

impl fmt::Display for ServingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distributed => write!(f, "distributed"),
            Self::Embedded => write!(f, "embedded"),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub gateway: Arc<ReviewGateway>,
    /// Backend behind the gateway's cache, kept for stats and cleanup
    pub cache_store: Arc<MemoryCache>,
    pub nats: Option<NatsClient>,
    /// Processor applying commands in-process (embedded mode only)
    pub processor: Option<Arc<CommandProcessor>>,
    pub mode: ServingMode,
    pub started_at: Instant,
}

/// Memory backend plus the review cache over it. A fill may take up to one
/// read-service call and one cache write.
fn build_cache(args: &Args) -> (Arc<MemoryCache>, Arc<ReviewCache>) {
    let cache_store = Arc::new(MemoryCache::new(CacheConfig::from_env()));
    let config = cache_store.config();
    let fill_window = args.request_timeout() + config.op_timeout * 2;
    let cache = ReviewCache::new(cache_store.clone(), config).with_fill_window(fill_window);
    (cache_store, Arc::new(cache))
}

impl AppState {
    /// Self-contained state: memory queue and store with an embedded processor.
    /// The processor is not started; call [`CommandProcessor::run`].
    pub fn embedded(args: Args) -> Self {
        let (cache_store, cache) = build_cache(&args);

        let store = Arc::new(MemoryReviewStore::new());
        let queue = MemoryQueue::new();
        let reads = Arc::new(StoreReadService::new(store.clone(), args.request_timeout()));

        let gateway = Arc::new(ReviewGateway::new(
            cache.clone(),
            reads,
            Arc::new(queue.clone()),
            args.command_wire_format,
        ));

        let config = WorkerConfig {
            worker_id: format!("embedded-{}", args.node_id),
            apply_delay: args.embedded_apply_delay(),
            fetch_wait: Duration::from_secs(1),
            ..Default::default()
        };
        let processor = Arc::new(CommandProcessor::new(
            config,
            Arc::new(queue.clone()),
            store,
            cache,
            Arc::new(queue),
        ));

        Self {
            args,
            gateway,
            cache_store,
            nats: None,
            processor: Some(processor),
            mode: ServingMode::Embedded,
            started_at: Instant::now(),
        }
    }

    /// State backed by NATS: JetStream for writes, request/reply for reads and
    /// an invalidation listener for apply-time invalidations.
    pub async fn distributed(args: Args, nats: NatsClient) -> Result<Self, GatewayError> {
        let (cache_store, cache) = build_cache(&args);

        let queue = JetStreamQueue::new(&nats, args.publish_timeout()).await?;
        let reads = NatsReadClient::new(nats.clone().with_timeout(args.request_timeout()));

        spawn_invalidation_listener(&nats, cache.clone()).await?;

        let gateway = Arc::new(ReviewGateway::new(
            cache,
            Arc::new(reads),
            Arc::new(queue),
            args.command_wire_format,
        ));

        Ok(Self {
            args,
            gateway,
            cache_store,
            nats: Some(nats),
            processor: None,
            mode: ServingMode::Distributed,
            started_at: Instant::now(),
        })
    }

    /// Whether the state can serve traffic
    pub fn is_ready(&self) -> bool {
        match self.mode {
            ServingMode::Embedded => true,
            ServingMode::Distributed => self.nats.as_ref().is_some_and(NatsClient::is_connected),
        }
    }
}

/// Bind the configured address and serve forever
pub async fn run(state: Arc<AppState>) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), GatewayError> {
    let local_addr = listener.local_addr()?;
    info!(
        "Review gateway listening on {} as node {} ({} mode)",
        local_addr, state.args.node_id, state.mode
    );

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    spawn_cleanup_task(Arc::clone(&state.cache_store));
    info!(
        "Cache enabled (max {} entries, ttl {}s)",
        state.cache_store.config().max_entries,
        state.cache_store.config().ttl.as_secs()
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(to_boxed(preflight_response()));
    }

    let response = match (method.clone(), path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        (Method::GET, "/api/reviews") => routes::list_reviews(Arc::clone(&state)).await,
        (Method::POST, "/api/reviews") => routes::create_review(Arc::clone(&state), req).await,
        (_, "/api/reviews") => method_not_allowed_response("GET, POST, OPTIONS"),

        (method, p) => match review_id_from_path(p) {
            Some(id) => match method {
                Method::GET => routes::get_review(Arc::clone(&state), id, req.headers()).await,
                Method::PUT => routes::update_review(Arc::clone(&state), id.to_string(), req).await,
                Method::DELETE => routes::delete_review(Arc::clone(&state), id).await,
                _ => method_not_allowed_response("GET, PUT, DELETE, OPTIONS"),
            },
            None => not_found_response(p),
        },
    };

    Ok(to_boxed(response))
}

/// `/api/reviews/{id}` → `id`; nested paths and empty ids do not match
fn review_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/api/reviews/")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", routes::header_value("*"));
    headers.insert(
        "Access-Control-Allow-Headers",
        routes::header_value("Content-Type, Idempotency-Key, If-None-Match"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        routes::header_value("GET, POST, PUT, DELETE, OPTIONS"),
    );
    response
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "code": "NOT_FOUND",
        "path": path,
    });
    routes::json_response(StatusCode::NOT_FOUND, body.to_string())
}

fn method_not_allowed_response(allow: &'static str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Method Not Allowed",
        "code": "METHOD_NOT_ALLOWED",
    });
    let mut response = routes::json_response(StatusCode::METHOD_NOT_ALLOWED, body.to_string());
    response
        .headers_mut()
        .insert("Allow", routes::header_value(allow));
    response
}
