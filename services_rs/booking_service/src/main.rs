mod config;
mod db;
mod error;
mod events;
mod handlers;
mod models;
mod state;
mod store;

use axum::extract::MatchedPath;
use axum::http::{header, header::HeaderName, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use config::Config;
use events::WebhookEventSink;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::PgStore;
use ticketing_core::{
    AvailabilityLedger, BookingLifecycle, BookingStore, Directory, EventSink, LifecycleOptions,
    OrgPolicy, PassSigner,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let pool = match db::connect(&cfg.db_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "db connect failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = db::ensure_schema(&pool, &cfg.db_schema).await {
        tracing::error!(error = %e, "db ensure_schema failed");
        std::process::exit(2);
    }

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "http client init failed");
            std::process::exit(2);
        }
    };

    let pg = Arc::new(PgStore::new(
        pool,
        cfg.db_schema.clone(),
        cfg.db_timeout_ms,
        cfg.idempotency_retention_hours,
        OrgPolicy {
            advance_booking_days: cfg.default_advance_days,
            cancellation_deadline_hours: cfg.default_cancel_deadline_hours,
        },
    ));
    let sink = Arc::new(WebhookEventSink::new(
        http,
        cfg.events_base_url.clone(),
        cfg.events_secret.clone(),
        cfg.internal_service_id.clone(),
    ));
    let signer = PassSigner::new(cfg.pass_secret.clone());

    let lifecycle = Arc::new(BookingLifecycle::new(
        Arc::clone(&pg) as Arc<dyn Directory>,
        Arc::clone(&pg) as Arc<dyn AvailabilityLedger>,
        Arc::clone(&pg) as Arc<dyn BookingStore>,
        sink as Arc<dyn EventSink>,
        signer.clone(),
        LifecycleOptions {
            max_seats_per_booking: cfg.max_seats_per_booking,
        },
    ));

    let state = AppState {
        lifecycle,
        signer,
        env_name: cfg.env_name.clone(),
    };

    let cors = if cfg.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            .allow_credentials(false)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            // Internal service behind the gateway; no cookie credentials.
            .allow_credentials(false)
            .allow_origin(AllowOrigin::list(origins))
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/:booking_id", get(handlers::get_booking))
        .route(
            "/bookings/:booking_id/cancel",
            post(handlers::cancel_booking),
        )
        .route(
            "/bookings/:booking_id/complete",
            post(handlers::complete_booking),
        )
        .route(
            "/bookings/:booking_id/no-show",
            post(handlers::mark_no_show),
        )
        .route(
            "/routes/:route_id/availability",
            get(handlers::availability),
        )
        .route("/passes/verify", post(handlers::verify_pass))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        // Log the matched route template when available, never the query
        // string.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path
                )
            }),
        )
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, "starting booking_service");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn booking_cors_allowed_headers() -> Vec<HeaderName> {
    vec![
        header::ACCEPT,
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("idempotency-key"),
        HeaderName::from_static("x-requester-id"),
        HeaderName::from_static("x-requester-role"),
        HeaderName::from_static("x-requester-college"),
    ]
}
