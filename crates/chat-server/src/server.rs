//! `ChatServer`: axum HTTP + `WebSocket` front end for the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::CookieJar;
use chat_auth::IdentityResolver;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::HubError;
use crate::health::{self, HealthResponse};
use crate::hub::{HubHandle, Submission};
use crate::metrics::HTTP_MESSAGES_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::upload::upload_handler;
use crate::websocket::{run_connection, session_token};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub front door.
    pub hub: HubHandle,
    /// Resolves tokens for the HTTP message receiver.
    pub resolver: Arc<dyn IdentityResolver>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The chat relay's network front end.
pub struct ChatServer {
    config: Arc<ServerConfig>,
    hub: HubHandle,
    resolver: Arc<dyn IdentityResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ChatServer {
    /// Create a server in front of a running hub.
    pub fn new(
        config: ServerConfig,
        hub: HubHandle,
        resolver: Arc<dyn IdentityResolver>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            resolver,
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            resolver: Arc::clone(&self.resolver),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/m", post(message_receiver))
            .route(
                "/upload",
                post(upload_handler).layer(DefaultBodyLimit::max(self.config.max_upload_size)),
            )
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown is requested.
    /// The serving task is tracked by the shutdown coordinator as `http`.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "chat server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server terminated with error");
            }
            info!("chat server stopped");
        });
        self.shutdown.track("http", task);
        Ok(addr)
    }

    /// Hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    jar: CookieJar,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = session_token(&jar, &headers);
    let capacity = state.config.outbound_queue;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, token, state.hub, capacity))
}

/// POST /m: inject the request body as a chat message from the token's
/// owner.
async fn message_receiver(
    jar: CookieJar,
    headers: HeaderMap,
    State(state): State<AppState>,
    body: String,
) -> Response {
    let Some(token) = session_token(&jar, &headers) else {
        counter!(HTTP_MESSAGES_TOTAL, "status" => "unauthorized").increment(1);
        return (StatusCode::UNAUTHORIZED, "missing session token").into_response();
    };
    let identity = match state.resolver.resolve(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "message receiver rejected token");
            counter!(HTTP_MESSAGES_TOTAL, "status" => "unauthorized").increment(1);
            return (StatusCode::UNAUTHORIZED, "unknown session token").into_response();
        }
    };
    if body.trim().is_empty() {
        counter!(HTTP_MESSAGES_TOTAL, "status" => "empty").increment(1);
        return (StatusCode::BAD_REQUEST, "empty message").into_response();
    }

    let submission = Submission::plain(identity.token, identity.name, body);
    match state.hub.inject(submission).await {
        Ok(()) => {
            counter!(HTTP_MESSAGES_TOTAL, "status" => "accepted").increment(1);
            StatusCode::ACCEPTED.into_response()
        }
        Err(HubError::Closed | HubError::Rejected(_)) => {
            counter!(HTTP_MESSAGES_TOTAL, "status" => "unavailable").increment(1);
            (StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response()
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state
        .hub
        .snapshot()
        .await
        .ok()
        .map(|snap| (snap.attached(), snap.sessions.len()));
    Json(health::health_check(state.start_time, counts))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chat_auth::TokenTable;
    use chat_core::Envelope;
    use tower::ServiceExt;

    use crate::hub::{Hub, HubConfig};
    use crate::sink::LogSink;

    fn make_server() -> ChatServer {
        make_server_with(ServerConfig::default())
    }

    fn make_server_with(config: ServerConfig) -> ChatServer {
        let resolver: Arc<dyn IdentityResolver> = Arc::new(TokenTable::new([(
            "tok-A".to_string(),
            "alice".to_string(),
        )]));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, _task) = Hub::new(HubConfig::default(), Arc::clone(&resolver), Arc::new(LogSink))
            .spawn(shutdown.token());
        ChatServer::new(config, hub, resolver, shutdown)
    }

    const BOUNDARY: &str = "chatboundary";

    fn upload_request(token: Option<&str>, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        let mut req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"));
        if let Some(token) = token {
            req = req.header("cookie", format!("token={token}"));
        }
        req.body(Body::from(body)).unwrap()
    }

    fn upload_server(dir: &std::path::Path) -> ChatServer {
        make_server_with(ServerConfig {
            work_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        })
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["sessions"], 0);
    }

    #[tokio::test]
    async fn health_degraded_after_hub_stops() {
        let server = make_server();
        server.shutdown().shutdown();
        while !server.hub().is_closed() {
            tokio::task::yield_now().await;
        }
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "degraded");
    }

    #[tokio::test]
    async fn message_receiver_injects_chat() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/m")
            .header("cookie", "token=tok-A")
            .body(Body::from("deploy <done>"))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let history = server.hub().history().await.unwrap();
        assert_eq!(history.len(), 1);
        let Envelope::Chat(msg) = &history[0] else {
            panic!("expected chat, got {:?}", history[0]);
        };
        assert_eq!(msg.name, "alice");
        assert_eq!(msg.text, "deploy &lt;done&gt;");
        assert!(msg.notification.is_empty());
    }

    #[tokio::test]
    async fn message_receiver_accepts_token_header() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/m")
            .header("Token", "tok-A")
            .body(Body::from("hi"))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn message_receiver_rejects_unknown_token() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/m")
            .header("Token", "tok-Z")
            .body(Body::from("hi"))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(server.hub().history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_receiver_requires_token() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/m")
            .body(Body::from("hi"))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn message_receiver_rejects_empty_body() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/m")
            .header("Token", "tok-A")
            .body(Body::from("   \n"))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_stores_file_and_announces_it() {
        let dir = tempfile::tempdir().unwrap();
        let server = upload_server(dir.path());
        let req = upload_request(
            Some("tok-A"),
            &[("comment", None, "ignored"), ("file", Some("notes.txt"), "hello upload")],
        );
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "12 bytes sent\n");

        let stored: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].ends_with("-notes.txt"));
        let content = std::fs::read_to_string(dir.path().join(&stored[0])).unwrap();
        assert_eq!(content, "hello upload");

        let history = server.hub().history().await.unwrap();
        let Envelope::Chat(msg) = &history[0] else {
            panic!("expected chat, got {:?}", history[0]);
        };
        assert_eq!(msg.name, "alice");
        assert_eq!(
            msg.text,
            format!(r#"file: <a target="chaturls" href="{}">notes.txt</a>"#, stored[0])
        );
    }

    #[tokio::test]
    async fn upload_keeps_files_inside_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let server = upload_server(&work);
        let req = upload_request(Some("tok-A"), &[("file", Some("../escape.txt"), "x")]);
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored: Vec<_> = std::fs::read_dir(&work).unwrap().collect();
        assert_eq!(stored.len(), 1);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn upload_requires_known_token() {
        let dir = tempfile::tempdir().unwrap();
        let server = upload_server(dir.path());
        for token in [None, Some("tok-Z")] {
            let req = upload_request(token, &[("file", Some("a.txt"), "x")]);
            let resp = server.router().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(server.hub().history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_part_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let server = upload_server(dir.path());
        let req = upload_request(Some("tok-A"), &[("comment", None, "no file here")]);
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(server.hub().history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = make_server().with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.shutdown().tracked(), 1);
        assert!(server.shutdown().drain().await.is_empty());
    }
}
