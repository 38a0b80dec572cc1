use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jongmok_core::ingest::dart::{DartClient, FilingProvider};
use jongmok_core::ingest::kis::KisClient;
use jongmok_core::report::{formatter, ReportService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = jongmok_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let service = build_report_service(&settings);

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match jongmok_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; cached-report route degraded");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; cached-report route degraded");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; cached-report route degraded");
            None
        }
    };

    let state = AppState { service, pool };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/stocks/report", post(post_report))
        .route("/api/stocks/report/cached/:ticker", get(get_cached_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // The chat channel calls from its own origin.
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    service: Option<Arc<ReportService>>,
    pool: Option<PgPool>,
}

#[derive(Debug, Deserialize)]
struct ReportRequest {
    ticker: String,
}

/// The channel expects a schema-valid card payload with HTTP 200 for every
/// request, including internal failures.
async fn post_report(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> Json<serde_json::Value> {
    let Some(service) = &state.service else {
        tracing::error!("quote provider not configured; serving error card");
        return Json(formatter::error_response().to_safe_json());
    };

    let response = service.generate_report(&req.ticker).await;
    Json(response.to_safe_json())
}

async fn get_cached_report(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let row = jongmok_core::storage::reports::fetch_latest_cached(pool, ticker.trim())
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let (as_of_date, report) = row;
    Ok(Json(serde_json::json!({
        "as_of_date": as_of_date,
        "report": report,
    })))
}

fn build_report_service(
    settings: &jongmok_core::config::Settings,
) -> Option<Arc<ReportService>> {
    let market = match KisClient::from_settings(settings) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "quote client init failed; starting API in degraded mode");
            return None;
        }
    };

    let filing: Option<Arc<dyn FilingProvider>> = if settings.dart_api_key.is_some() {
        match DartClient::from_settings(settings) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "filing client init failed; fallback metrics disabled");
                None
            }
        }
    } else {
        tracing::info!("DART_API_KEY not set; filing fallback disabled");
        None
    };

    Some(Arc::new(ReportService::new(market, filing)))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &jongmok_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
