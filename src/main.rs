// Server entrypoint: config, tracing, CORS and the project API.
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use futures::FutureExt;
use sandcastle_server::config::Config;
use sandcastle_server::config_store::ConfigStore;
use sandcastle_server::shutdown::shutdown_signal;
use sandcastle_server::state::AppState;
use serde_json::json;
use std::any::Any as StdAny;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_store = ConfigStore::new();
    let config = config_store.get().await;
    init_tracing(&config);
    let state = Arc::new(AppState::new(config_store.clone(), config.clone())?);

    let cors = build_cors(&config);
    let app = sandcastle_server::build_router(state, &config.server.api_prefix)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(panic_guard));

    let addr = bind_address(&config);
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("sandcastle server listening on http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        warn!("server exited with error: {err}");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = config.observability.log_level.trim();
    let default_level = if default_level.is_empty() {
        "info".to_string()
    } else {
        default_level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    if config.observability.log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn bind_address(config: &Config) -> String {
    let host = std::env::var("SANDCASTLE_HOST").unwrap_or_else(|_| config.server.host.clone());
    let port = std::env::var("SANDCASTLE_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.server.port);
    format!("{host}:{port}")
}

fn build_cors(config: &Config) -> CorsLayer {
    let mut cors = CorsLayer::new();

    match config.cors.allow_origins.as_deref() {
        Some(origins) if origins.iter().any(|value| value == "*") => {
            cors = cors.allow_origin(Any);
        }
        Some(origins) => {
            let values = origins
                .iter()
                .filter_map(|value| value.parse().ok())
                .collect::<Vec<_>>();
            if !values.is_empty() {
                cors = cors.allow_origin(AllowOrigin::list(values));
            }
        }
        None => cors = cors.allow_origin(Any),
    }

    match config.cors.allow_methods.as_deref() {
        Some(methods) if methods.iter().any(|value| value == "*") => {
            cors = cors.allow_methods(Any);
        }
        Some(methods) => {
            let values = methods
                .iter()
                .filter_map(|value| value.parse().ok())
                .collect::<Vec<_>>();
            if !values.is_empty() {
                cors = cors.allow_methods(AllowMethods::list(values));
            }
        }
        None => cors = cors.allow_methods(Any),
    }

    match config.cors.allow_headers.as_deref() {
        Some(headers) if headers.iter().any(|value| value == "*") => {
            cors = cors.allow_headers(Any);
        }
        Some(headers) => {
            let values = headers
                .iter()
                .filter_map(|value| value.parse().ok())
                .collect::<Vec<_>>();
            if !values.is_empty() {
                cors = cors.allow_headers(AllowHeaders::list(values));
            }
        }
        None => cors = cors.allow_headers(Any),
    }

    // Credentials cannot be combined with wildcard rules.
    let wildcard = [
        &config.cors.allow_origins,
        &config.cors.allow_methods,
        &config.cors.allow_headers,
    ]
    .into_iter()
    .any(|list| is_wildcard(list.as_deref()));
    if config.cors.allow_credentials.unwrap_or(false) {
        if wildcard {
            warn!("cors.allow_credentials ignored with wildcard rules");
        } else {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}

fn is_wildcard(values: Option<&[String]>) -> bool {
    values.map_or(true, |values| values.iter().any(|value| value == "*"))
}

async fn panic_guard(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let result = AssertUnwindSafe(next.run(request)).catch_unwind().await;
    match result {
        Ok(response) => Ok(response),
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            error!("panic while handling {method} {path}: {detail}");
            let payload = json!({ "success": false, "error": "Internal Server Error" });
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap_or_else(|_| Response::new(Body::empty())))
        }
    }
}

fn panic_message(panic: &(dyn StdAny + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
