//! HTTP and WebSocket surface of the gateway
//!
//! [`Server`] wires the ledger, resolver, provider gateway and sync
//! broadcaster together once at startup and threads them through axum
//! state.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod auth;
mod cors;
mod error;
pub mod facade;
mod handlers;
mod health;
mod request_id;
mod sync;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tollgate_config::Config;
use tollgate_core::RequestId;
use tollgate_ledger::{AccountRepository, Clock, MemoryRepository, SystemClock, UsageLedger};
use tollgate_provider::{ModelCatalog, ModelResolver, OpenAiUpstream, ProviderGateway, Upstream};
use tollgate_sync::SyncBroadcaster;
use tollgate_telemetry::GatewayMetrics;
use tower_http::trace::TraceLayer;

pub use auth::{AuthError, Authenticator};
pub use facade::{GatewayFacade, Outcome, RequestState, StreamEvent, Success};

/// Shared state for route handlers
#[derive(Clone)]
pub struct AppState {
    facade: Arc<GatewayFacade>,
}

/// Collaborators the server runs against
///
/// [`Server::new`] uses in-memory accounts, the system clock and the
/// configured upstream; tests swap any of them.
pub struct Services {
    pub repository: Arc<dyn AccountRepository>,
    pub clock: Arc<dyn Clock>,
    /// `None` serves demo output
    pub upstream: Option<Arc<dyn Upstream>>,
}

impl Services {
    pub fn from_config(config: &Config) -> Self {
        let upstream = config.provider.api_key.as_ref().map(|key| {
            Arc::new(OpenAiUpstream::new(key.clone(), config.provider.base_url.clone())) as Arc<dyn Upstream>
        });

        Self {
            repository: Arc::new(MemoryRepository::new()),
            clock: Arc::new(SystemClock),
            upstream,
        }
    }
}

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    background: CancellationToken,
}

impl Server {
    /// Build the server from configuration
    ///
    /// Must be called from within a Tokio runtime; model discovery and the
    /// sync heartbeat are spawned here.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let services = Services::from_config(&config);
        Self::with_services(config, services)
    }

    /// Build the server around explicit collaborators
    pub fn with_services(config: Config, services: Services) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let background = CancellationToken::new();

        let ledger = Arc::new(UsageLedger::new(services.repository, services.clock, config.ledger.clone()));
        let resolver = ModelResolver::new(&config.provider.families)?;
        let catalog = Arc::new(ModelCatalog::new());

        if services.upstream.is_none() {
            tracing::warn!("no provider api_key configured, serving demo output");
        }

        if let Some(upstream) = &services.upstream {
            tollgate_provider::start_discovery(
                Arc::clone(upstream),
                Arc::clone(&catalog),
                config.provider.discovery_interval,
                background.child_token(),
            );
        }

        let gateway = ProviderGateway::new(services.upstream, &config.provider);

        let broadcaster = Arc::new(SyncBroadcaster::new(config.sync.channel_capacity));
        broadcaster.start_heartbeat(config.sync.heartbeat_interval, background.child_token());

        let facade = Arc::new(GatewayFacade::new(
            ledger,
            resolver,
            catalog,
            gateway,
            broadcaster,
            GatewayMetrics::new(),
        ));

        let authenticator = Arc::new(Authenticator::from_config(&config.auth)?);
        let state = AppState { facade };

        // Authenticated API
        let api = Router::new()
            .route("/v1/chat", post(handlers::chat_handler))
            .route("/v1/image", post(handlers::image_handler))
            .route("/v1/video", post(handlers::video_handler))
            .route("/v1/account", get(handlers::account_handler))
            .route(auth::SYNC_PATH, get(sync::sync_handler))
            .route_layer(axum::middleware::from_fn_with_state(authenticator, auth::auth_middleware))
            .with_state(state);

        let mut app = Router::new().merge(api);

        // Health check
        if config.server.health.enabled {
            app = app.route(&config.server.health.path, get(health::health_handler));
        }

        // Apply middleware layers (innermost first)

        // Tracing, one span per request carrying its id
        app = app.layer(TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri().path(),
                request_id = %request_id,
            )
        }));

        // CORS
        if let Some(ref cors_config) = config.server.cors {
            app = app.layer(cors::cors_layer(cors_config));
        }

        // Request id (outermost, so every response carries it)
        app = app.layer(axum::middleware::from_fn(request_id::request_id_middleware));

        Ok(Self {
            router: app,
            listen_address,
            background,
        })
    }

    /// Get the configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Background tasks keep running for the life of the runtime.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_address).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let background = self.background.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
                background.cancel();
            })
            .await?;

        self.background.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use jwt_compact::alg::{Hs256, Hs256Key};
    use jwt_compact::{AlgorithmExt, Claims as JwtClaims, Header};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use tollgate_core::{Claims, REQUEST_ID_HEADER};
    use tower::ServiceExt;

    use super::*;

    const SECRET: &str = "router-test-secret";
    const BODY_LIMIT: usize = 1_048_576;

    fn router() -> Router {
        let mut config = Config::default();
        config.auth.jwt_secret = SecretString::from(SECRET.to_owned());
        Server::new(config).unwrap().into_router()
    }

    fn bearer(account: &str) -> String {
        let key = Hs256Key::new(SECRET.as_bytes());
        let token = Hs256
            .token(&Header::empty(), &JwtClaims::new(Claims::for_subject(account)), &key)
            .unwrap();
        format!("Bearer {token}")
    }

    fn post(uri: &str, account: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(account))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public_and_correlated() {
        let request = Request::builder()
            .uri("/health")
            .header(REQUEST_ID_HEADER, "req-health-1")
            .body(Body::empty())
            .unwrap();

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-health-1");
    }

    #[tokio::test]
    async fn api_requires_a_credential() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "messages": [] }).to_string()))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_owned();

        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "AUTH");
        assert_eq!(body["error"]["requestId"], request_id.as_str());
    }

    #[tokio::test]
    async fn demo_image_is_served_and_free() {
        let app = router();

        let body = json!({ "prompt": "a paper boat" }).to_string();
        let response = app.clone().oneshot(post("/v1/image", "acct-r", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let success = json_body(response).await;
        assert_eq!(success["isDemo"], true);
        assert_eq!(success["output"]["type"], "image");

        let request = Request::builder()
            .uri("/v1/account")
            .header(header::AUTHORIZATION, bearer("acct-r"))
            .body(Body::empty())
            .unwrap();
        let account = json_body(app.oneshot(request).await.unwrap()).await;
        assert_eq!(account["credits"], 100);
        assert_eq!(account["dailyUsage"]["image"], 0);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let response = router()
            .oneshot(post("/v1/video", "acct-r", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["type"], "BAD_REQUEST");
    }
}
