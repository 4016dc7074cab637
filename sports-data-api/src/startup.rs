use crate::config::AppConfig;
use crate::handlers;
use crate::services::firestore::{AppRegistry, ClientFactory, GoogleClientFactory};
use crate::services::ConnectionManager;
use axum::{http::HeaderValue, middleware, routing::get, Router};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, request_span, security_headers_middleware,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// JSON bodies larger than this are rejected with 413.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub connection: Arc<ConnectionManager>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/firebase/test", get(handlers::test_connection))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(cors)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Explicit `CORS_ORIGINS` wins. Without it, any origin is allowed outside
/// production and none in production.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
        }
        None if config.is_production() => CorsLayer::new(),
        None => CorsLayer::permissive(),
    }
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Builds the application with the Google-backed client factory.
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let factory = GoogleClientFactory::from_config(&config, AppRegistry::new())
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("HTTP client error: {}", e)))?;
        Self::build_with_factory(config, Arc::new(factory)).await
    }

    pub async fn build_with_factory(
        config: AppConfig,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, AppError> {
        let connection = Arc::new(ConnectionManager::new(&config, factory));
        let state = AppState {
            config: Arc::new(config),
            connection,
        };

        let addr = (state.config.host.as_str(), state.config.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(
                "Failed to bind TCP listener to {}:{}: {}",
                state.config.host,
                state.config.port,
                e
            );
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            environment = %state.config.environment,
            database_id = %state.config.database_id,
            "Listening on {}:{}",
            state.config.host,
            port
        );

        let router = build_router(state.clone());

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.state.connection
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    pub async fn run_with_graceful_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve;
    use crate::services::firestore::MockClientFactory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use service_core::middleware::REQUEST_ID_HEADER;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn state(pairs: &[(&str, &str)]) -> AppState {
        let raw: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = resolve(&raw).unwrap();
        let factory = Arc::new(MockClientFactory::new().with_collections(["sports"]));
        AppState {
            connection: Arc::new(ConnectionManager::new(&config, factory)),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = build_router(state(&[]));
        let response = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(state(&[]));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_configured_cors_origin() {
        let app = build_router(state(&[("CORS_ORIGINS", "https://app.example.com")]));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .header("origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );
    }

    #[tokio::test]
    async fn test_production_without_origins_sends_no_cors_headers() {
        let app = build_router(state(&[
            ("NODE_ENV", "production"),
            ("APP_PROJECT_ID", "my-project"),
        ]));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .header("origin", "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response
            .headers()
            .get("access-control-allow-origin")
            .is_none());
    }
}
