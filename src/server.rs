//! Servidor HTTP da clínica
//!
//! Monta a API REST sob `/api`, o health check e o agendador de automações.

use axum::{http::HeaderValue, response::Html, routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::automation::{self, AutomationScheduler};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::web_api::{create_api_router, AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .nest("/api", create_api_router(state))
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Origem CORS inválida ignorada: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(list))
}

/// Inicia o servidor e o agendador de automações
pub async fn start_server(config: AppConfig) -> AppResult<()> {
    let db = Database::open(&config.db_path)?;
    let port = config.port;
    let interval_secs = config.automation_interval_secs;
    let state = AppState::new(db, config)?;

    let scheduler = AutomationScheduler::new(state.db.clone(), state.whatsapp.clone());
    tokio::spawn(automation::run_scheduler(scheduler, interval_secs));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Servidor HTTP iniciado: http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Custom(format!("Server bind error: {}", e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Custom(format!("Server error: {}", e)))?;

    Ok(())
}

/// Health check (sem acesso ao banco)
async fn health_handler() -> &'static str {
    "OK"
}

async fn index_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <title>Clínica - API</title>
</head>
<body>
    <h1>Clínica</h1>
    <p>API disponível em <code>/api</code>.</p>
</body>
</html>"#,
    )
}
