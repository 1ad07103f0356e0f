use crate::{
    attempts::{
        counter::PgCounterStore,
        outbox::PgMessageOutbox,
        resolver::{HttpIdentityResolver, ResolverConfig},
        AttemptConfig, AttemptTracker,
    },
    credentials::{CredentialVerifier, PgCredentialVerifier},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;


/// Server settings gathered from the command line.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: SecretString,
    pub db_max_connections: u32,
    pub attempts: AttemptConfig,
    pub resolver: ResolverConfig,
}

/// Build the router: login, message pickup, health and API docs.
///
/// The `PgPool` extension is optional; without it `/health` reports no database.
pub fn router(tracker: Arc<AttemptTracker>, verifier: Arc<dyn CredentialVerifier>) -> Router {
    Router::new()
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/login", post(handlers::login))
        .route("/messages/:recipient_id", get(handlers::messages::consume))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(tracker))
                .layer(Extension(verifier)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.db_max_connections.max(1))
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(config.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let resolver = HttpIdentityResolver::new(config.resolver)
        .context("Failed to build identity lookup client")?;

    let tracker = Arc::new(AttemptTracker::new(
        config.attempts,
        Arc::new(PgCounterStore::new(pool.clone())),
        Arc::new(PgMessageOutbox::new(pool.clone())),
        Arc::new(resolver),
    ));
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(PgCredentialVerifier::new(pool.clone()));

    let app = router(tracker, verifier).layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
