use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use mockup_store::{Database, Profile};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::gemini::TextGenerator;
use crate::ledger::{CreditLedger, SqliteBalances};
use crate::prompt::ReferenceDesign;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::{chat, projects, webhook};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub ledger: Arc<CreditLedger>,
    pub generator: Arc<dyn TextGenerator>,
    pub references: Arc<Vec<ReferenceDesign>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        db: Database,
        generator: Arc<dyn TextGenerator>,
        references: Vec<ReferenceDesign>,
        config: ServerConfig,
    ) -> Self {
        let db = Arc::new(Mutex::new(db));
        let ledger = CreditLedger::new(
            Arc::new(SqliteBalances::new(db.clone())),
            config.ledger_allow_fallback,
        );

        Self {
            db,
            ledger: Arc::new(ledger),
            generator,
            references: Arc::new(references),
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/profile", get(profile))
        .route("/chat", post(chat::chat))
        .route("/projects", get(projects::list).post(projects::create))
        .route(
            "/projects/{id}",
            get(projects::snapshot)
                .patch(projects::rename)
                .delete(projects::delete),
        )
        .route("/projects/{id}/frames", put(projects::replace_frames))
        .route("/webhook/billing", post(webhook::billing))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The caller's profile; clients poll it to reconcile their cached balance.
async fn profile(user: AuthUser) -> Json<Profile> {
    Json(user.0)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
