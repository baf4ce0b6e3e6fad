//! Configuração da aplicação
//!
//! Lida a partir de variáveis de ambiente (com `.env` opcional). As integrações
//! externas (WhatsApp/Evolution e IA) só são ativadas quando suas chaves existem.

use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Configuração da integração com a Evolution API (WhatsApp)
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub api_key: String,
    pub instance_name: String,
}

/// Configuração do provedor de IA (compatível com OpenAI)
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_url: String,
    pub api_key: String,
}

/// Configuração do servidor
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub session_ttl_hours: i64,
    pub automation_interval_secs: u64,
    pub whatsapp: Option<WhatsAppConfig>,
    pub ai: Option<AiConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("clinica.db"),
            port: 8000,
            uploads_dir: PathBuf::from("uploads"),
            cors_origins: vec!["*".to_string()],
            session_ttl_hours: 24,
            automation_interval_secs: 60,
            whatsapp: None,
            ai: None,
        }
    }
}

impl AppConfig {
    /// Carrega a configuração a partir do ambiente
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Monta a configuração a partir de uma função de consulta (facilita testes)
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("CLINICA_PORT") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| AppError::Validation(format!("CLINICA_PORT inválida: {}", p)))?,
            None => defaults.port,
        };

        let session_ttl_hours = match non_empty("SESSION_TTL_HOURS") {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| AppError::Validation(format!("SESSION_TTL_HOURS inválido: {}", v)))?,
            None => defaults.session_ttl_hours,
        };

        let automation_interval_secs = match non_empty("AUTOMATION_INTERVAL_SECS") {
            Some(v) => v.parse::<u64>().map_err(|_| {
                AppError::Validation(format!("AUTOMATION_INTERVAL_SECS inválido: {}", v))
            })?,
            None => defaults.automation_interval_secs,
        };

        let cors_origins = non_empty("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let whatsapp = match (
            non_empty("EVOLUTION_API_URL"),
            non_empty("EVOLUTION_API_KEY"),
            non_empty("WHATSAPP_INSTANCE_NAME"),
        ) {
            (Some(api_url), Some(api_key), Some(instance_name)) => Some(WhatsAppConfig {
                api_url: api_url.trim_end_matches('/').to_string(),
                api_key,
                instance_name,
            }),
            _ => None,
        };

        let ai = non_empty("OPENAI_API_KEY").map(|api_key| AiConfig {
            api_url: non_empty("OPENAI_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        });

        Ok(Self {
            db_path: non_empty("CLINICA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port,
            uploads_dir: non_empty("CLINICA_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            cors_origins,
            session_ttl_hours,
            automation_interval_secs,
            whatsapp,
            ai,
        })
    }
}

/// Configuração do cliente (apps de paciente e painel)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let api_url = std::env::var("CLINICA_API_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://localhost:8000/api".to_string());
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Diretório local de dados da aplicação
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clinica")
}
