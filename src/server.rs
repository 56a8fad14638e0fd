use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{Next, from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::security::CLIENT_INSTANCE_HEADER;
use crate::security::admission::admission_middleware;
use crate::{AppState, Collaborators, api};

/// Assemble the full HTTP stack around `state`.
///
/// Outermost first: CORS, admission, request timeout, tracing, then the
/// routes; `/api` routes additionally pass through authentication. 429 and
/// 408 responses carry CORS headers, and preflights never reach admission.
pub fn build_router(state: AppState) -> Router {
    let timeout = (!state.config.server.timeout_disabled)
        .then(|| state.config.server.request_timeout());

    Router::new()
        .route("/health", get(api::health))
        .nest("/api", api::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(move |req: Request, next: Next| {
            request_timeout(timeout, req, next)
        }))
        .layer(from_fn_with_state(state.clone(), admission_middleware))
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}

async fn request_timeout(
    limit: Option<Duration>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let Some(limit) = limit else {
        return next.run(req).await;
    };
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(res) => res,
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "Request timed out");
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({ "error": "Request timed out", "retryable": true })),
            )
                .into_response()
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CLIENT_INSTANCE_HEADER),
        ])
        .allow_credentials(true)
}

/// Start the server and run until Ctrl-C or SIGTERM.
pub async fn start_server(config: Arc<AppConfig>, collaborators: Collaborators) -> anyhow::Result<()> {
    let state = AppState::new(Arc::clone(&config), collaborators);

    info!(
        name: "runtime.config.loaded",
        admission_enabled = config.admission.enabled,
        max_in_flight_per_origin = config.admission.max_in_flight_per_origin,
        idle_timeout_secs = config.single_flight.idle_timeout_secs,
        cache_ttl_secs = config.cache.ttl_secs,
        "Runtime configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let sweepers = state.spawn_sweepers(shutdown.child_token());

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    sweepers.shutdown().await;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, SIGTERM or when `token` is cancelled.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = token.cancelled() => {},
    }
    info!(name: "server.shutdown", "Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::llm::{ChatTurn, CompletionClient};
    use crate::persistence::providers::MemoryStore;
    use crate::security::admission::UNKNOWN_ORIGIN;
    use crate::security::verifier::JwtVerifier;
    use axum::body::Body;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn slow_app(limit: Option<Duration>) -> Router {
        Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .layer(from_fn(move |req: Request, next: Next| {
                request_timeout(limit, req, next)
            }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_returns_408() {
        let res = slow_app(Some(Duration::from_secs(1)))
            .oneshot(request("/slow"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timeout_lets_request_finish() {
        let res = slow_app(None).oneshot(request("/slow")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[derive(Debug)]
    struct NoCompletion;

    #[async_trait::async_trait]
    impl CompletionClient for NoCompletion {
        async fn complete(
            &self,
            _turns: &[ChatTurn],
            _credential: &str,
        ) -> Result<String, CollaboratorError> {
            Ok(String::new())
        }
    }

    fn state_with_ceiling(ceiling: usize) -> AppState {
        let config: AppConfig = serde_json::from_value(json!({
            "server": {
                "port": 0,
                "host": "127.0.0.1",
                "trust_forwarded_for": false,
                "cors_origins": ["http://localhost:3000"],
                "request_timeout_secs": 60,
                "timeout_disabled": false
            },
            "security": { "jwt_secret": "s" },
            "admission": { "enabled": true, "max_in_flight_per_origin": ceiling },
            "single_flight": { "idle_timeout_secs": 1800, "sweep_interval_secs": 300 },
            "cache": { "ttl_secs": 300, "sweep_interval_secs": 60 },
            "store": { "provider": "memory", "timeout_secs": 5 },
            "generation": {
                "base_url": "http://127.0.0.1:1",
                "api_version": "v1beta",
                "model": "gemini-2.0-flash",
                "timeout_secs": 30,
                "temperature": 0.7,
                "top_p": 0.8,
                "top_k": 40,
                "max_output_tokens": 2048
            }
        }))
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        AppState::new(
            Arc::new(config),
            Collaborators {
                verifier: Arc::new(JwtVerifier::hs256("s")),
                conversations: store.clone(),
                accounts: store,
                completion: Arc::new(NoCompletion),
            },
        )
    }

    #[tokio::test]
    async fn test_admission_rejection_carries_cors_headers() {
        let state = state_with_ceiling(1);
        let _held = state.admission.admit(UNKNOWN_ORIGIN).unwrap();

        let req = axum::http::Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let res = build_router(state).oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_preflight_skips_admission() {
        let state = state_with_ceiling(1);
        let _held = state.admission.admit(UNKNOWN_ORIGIN).unwrap();
        let admission = state.admission.clone();

        let preflight = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/chats")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let res = build_router(state).oneshot(preflight).await.unwrap();

        assert!(res.status().is_success());
        assert_eq!(admission.rejected_total(), 0);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_client_instance_header() {
        let app = Router::new()
            .route("/x", get(|| async { "ok" }))
            .layer(cors_layer(&["http://localhost:3000".to_string()]));

        let preflight = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/x")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-client-instance")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(preflight).await.unwrap();

        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
