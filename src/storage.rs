//! Estado local persistido do cliente
//!
//! Pares chave-valor em um arquivo JSON: token de sessão, id do usuário,
//! flag de sessão demo e carrinho. Sem expiração e sem criptografia.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::cart::Cart;
use crate::error::{AppError, AppResult};

pub const ACCESS_TOKEN: &str = "access_token";
pub const USER_ID: &str = "user_id";
pub const DEMO_SESSION: &str = "sb-demo-session";
pub const CART: &str = "cart";

/// Rotas acessíveis sem sessão
const PUBLIC_PATHS: &[&str] = &["/login", "/cadastro"];

#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    data: Map<String, Value>,
}

fn default_store_path() -> AppResult<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| AppError::Custom("Cannot find data directory".to_string()))?;
    Ok(data_dir.join("clinica").join("local_store.json"))
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!("[Storage] arquivo inválido, começando vazio: {}", e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(Self { path, data })
    }

    pub fn open_default() -> AppResult<Self> {
        Self::open(default_store_path()?)
    }

    fn persist(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> AppResult<()> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist()
    }

    pub fn remove(&mut self, key: &str) -> AppResult<()> {
        if self.data.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    // ============ Sessão ============

    pub fn access_token(&self) -> Option<String> {
        self.get_string(ACCESS_TOKEN)
    }

    pub fn user_id(&self) -> Option<String> {
        self.get_string(USER_ID)
    }

    pub fn save_session(&mut self, token: &str, user_id: &str) -> AppResult<()> {
        self.data
            .insert(ACCESS_TOKEN.to_string(), Value::String(token.to_string()));
        self.data
            .insert(USER_ID.to_string(), Value::String(user_id.to_string()));
        self.persist()
    }

    pub fn clear_session(&mut self) -> AppResult<()> {
        self.data.remove(ACCESS_TOKEN);
        self.data.remove(USER_ID);
        self.data.remove(DEMO_SESSION);
        self.persist()
    }

    pub fn is_demo(&self) -> bool {
        self.contains(DEMO_SESSION)
    }

    // ============ Carrinho ============

    pub fn load_cart(&self) -> Cart {
        self.get::<Cart>(CART).unwrap_or_default()
    }

    pub fn save_cart(&mut self, cart: &Cart) -> AppResult<()> {
        self.set(CART, cart)
    }
}

/// Aplicação que está navegando
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppArea {
    /// Painel administrativo: aceita a sessão demo
    Admin,
    /// Aplicativo do paciente
    Patient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
}

pub fn route_guard(store: &LocalStore, area: AppArea, path: &str) -> RouteDecision {
    if PUBLIC_PATHS.contains(&path) {
        return RouteDecision::Allow;
    }
    let has_session = match area {
        AppArea::Admin => store.is_demo() || store.access_token().is_some(),
        AppArea::Patient => store.access_token().is_some(),
    };
    if has_session {
        RouteDecision::Allow
    } else {
        RouteDecision::RedirectToLogin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = LocalStore::open(&path).unwrap();
        store.save_session("tok123", "user-1").unwrap();
        store.set("tema", &"dark").unwrap();

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.access_token().as_deref(), Some("tok123"));
        assert_eq!(reopened.user_id().as_deref(), Some("user-1"));
        assert_eq!(reopened.get_string("tema").as_deref(), Some("dark"));
    }

    #[test]
    fn test_clear_session_keeps_cart() {
        let dir = tempdir().unwrap();
        let mut store = LocalStore::open(dir.path().join("s.json")).unwrap();
        store.save_session("tok", "u").unwrap();
        store.set(DEMO_SESSION, &"true").unwrap();
        store.save_cart(&Cart::default()).unwrap();

        store.clear_session().unwrap();
        assert!(store.access_token().is_none());
        assert!(!store.is_demo());
        assert!(store.contains(CART));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = LocalStore::open(&path).unwrap();
        assert!(store.access_token().is_none());
        assert!(store.load_cart().is_empty());
    }

    #[test]
    fn test_route_guard() {
        let dir = tempdir().unwrap();
        let mut store = LocalStore::open(dir.path().join("s.json")).unwrap();

        assert_eq!(route_guard(&store, AppArea::Patient, "/login"), RouteDecision::Allow);
        assert_eq!(
            route_guard(&store, AppArea::Patient, "/agendamentos"),
            RouteDecision::RedirectToLogin
        );

        store.set(DEMO_SESSION, &"true").unwrap();
        assert_eq!(route_guard(&store, AppArea::Admin, "/"), RouteDecision::Allow);
        assert_eq!(
            route_guard(&store, AppArea::Patient, "/agendamentos"),
            RouteDecision::RedirectToLogin
        );

        store.save_session("tok", "u").unwrap();
        assert_eq!(route_guard(&store, AppArea::Patient, "/agendamentos"), RouteDecision::Allow);

        store.remove(ACCESS_TOKEN).unwrap();
        assert_eq!(
            route_guard(&store, AppArea::Patient, "/pedidos"),
            RouteDecision::RedirectToLogin
        );
    }
}
