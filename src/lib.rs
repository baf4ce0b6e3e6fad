//! Clínica: API REST, cliente e regras de negócio de uma clínica estética

pub mod ai;
pub mod auth;
pub mod automation;
pub mod booking;
pub mod caixa;
pub mod cart;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod finance;
pub mod models;
pub mod schedule;
pub mod server;
pub mod storage;
pub mod telemedicine;
pub mod web_api;
pub mod whatsapp;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Sobe o servidor com a configuração informada
pub async fn run(config: AppConfig) -> AppResult<()> {
    server::start_server(config).await
}
