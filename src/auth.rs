//! Autenticação e sessões
//!
//! Contas ficam na tabela `accounts` com hash bcrypt. O login gera um token
//! aleatório de 64 caracteres guardado em memória até expirar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{Patient, UserAccount, UserProfile, UserRole};

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

/// Sessão ativa de um usuário
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// Sessões em memória (token -> sessão)
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    ttl_hours: i64,
}

impl SessionStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl_hours,
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.created_at).num_hours() >= self.ttl_hours
    }

    /// Valida o token; sessões expiradas são descartadas
    pub fn verify(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().ok()?;
        let session = sessions.get(token)?.clone();

        if self.is_expired(&session, Utc::now()) {
            sessions.remove(token);
            return None;
        }

        Some(session)
    }

    pub fn create(&self, account: &UserAccount) -> String {
        let token = generate_token();
        let session = Session {
            token: token.clone(),
            user_id: account.id.clone(),
            email: account.email.clone(),
            role: account.role,
            created_at: Utc::now(),
        };

        if let Ok(mut sessions) = self.sessions.lock() {
            // tokens que nunca voltam a ser verificados também expiram
            let now = session.created_at;
            sessions.retain(|_, s| !self.is_expired(s, now));
            sessions.insert(token.clone(), session);
        }

        token
    }

    pub fn remove(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn backdate(&self, token: &str, hours: i64) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(s) = sessions.get_mut(token) {
                s.created_at = s.created_at - chrono::Duration::hours(hours);
            }
        }
    }
}

fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AppError::Custom(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

/// Resposta de login/cadastro
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("E-mail inválido".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < 6 {
        return Err(AppError::Validation(
            "A senha deve ter pelo menos 6 caracteres".to_string(),
        ));
    }
    Ok(())
}

fn new_account(
    email: String,
    password: &str,
    full_name: String,
    phone: Option<String>,
    role: UserRole,
) -> AppResult<UserAccount> {
    Ok(UserAccount {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        full_name,
        phone,
        role,
        password_hash: hash_password(password)?,
        active: true,
        last_login_at: None,
        created_at: Utc::now(),
    })
}

/// Cadastro pelo app do paciente
///
/// Cria a conta (papel cliente) e um paciente com o mesmo id.
pub fn signup(db: &Database, sessions: &SessionStore, req: SignupRequest) -> AppResult<AuthResponse> {
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    if req.full_name.trim().is_empty() {
        return Err(AppError::Validation("Nome é obrigatório".to_string()));
    }
    if db.get_account_by_email(&email)?.is_some() {
        return Err(AppError::Conflict("E-mail já cadastrado".to_string()));
    }

    let account = new_account(
        email.clone(),
        &req.password,
        req.full_name.trim().to_string(),
        req.phone.clone(),
        UserRole::Client,
    )?;
    let mut patient = Patient::new(account.full_name.clone());
    patient.id = account.id.clone();
    patient.email = Some(email);
    patient.phone = req.phone.clone();
    patient.whatsapp_number = req.phone;
    db.create_account_with_patient(&account, &patient)?;

    let token = sessions.create(&account);
    Ok(AuthResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        user: UserProfile::from(&account),
    })
}

pub fn login(db: &Database, sessions: &SessionStore, req: LoginRequest) -> AppResult<AuthResponse> {
    let email = req.email.trim().to_lowercase();
    let account = match db.get_account_by_email(&email)? {
        Some(acc) if acc.active && verify_password(&req.password, &acc.password_hash) => acc,
        _ => {
            log::warn!("Falha de login: {}", email);
            return Err(AppError::InvalidCredentials);
        }
    };

    let _ = db.update_last_login(&account.id);
    let token = sessions.create(&account);
    log::info!("Login: {} ({})", account.email, account.role.as_str());

    Ok(AuthResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        user: UserProfile::from(&account),
    })
}

/// Perfil do usuário dono da sessão
pub fn me(db: &Database, session: &Session) -> AppResult<UserProfile> {
    db.get_account(&session.user_id)?
        .map(|acc| UserProfile::from(&acc))
        .ok_or(AppError::NotAuthenticated)
}

pub fn logout(sessions: &SessionStore, token: &str) {
    sessions.remove(token);
}

/// Cria conta da equipe (admin ou profissional)
pub fn create_staff_account(
    db: &Database,
    email: &str,
    password: &str,
    full_name: &str,
    role: UserRole,
) -> AppResult<UserProfile> {
    if !role.is_staff() {
        return Err(AppError::Validation("Papel inválido para equipe".to_string()));
    }
    let email = normalize_email(email)?;
    validate_password(password)?;
    let account = new_account(email, password, full_name.trim().to_string(), None, role)?;
    db.create_account(&account)?;
    Ok(UserProfile::from(&account))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup_req(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "segredo123".to_string(),
            full_name: "Joana Prado".to_string(),
            phone: Some("5511988887777".to_string()),
        }
    }

    #[test]
    fn test_signup_creates_patient_with_same_id() {
        let db = Database::open_in_memory().unwrap();
        let sessions = SessionStore::new(24);

        let resp = signup(&db, &sessions, signup_req("Joana@Exemplo.com")).unwrap();
        assert_eq!(resp.access_token.len(), 64);
        assert_eq!(resp.user.role, UserRole::Client);
        assert_eq!(resp.user.email, "joana@exemplo.com");

        let patient = db.get_patient(&resp.user.id).unwrap().unwrap();
        assert_eq!(patient.full_name, "Joana Prado");
        assert_eq!(patient.whatsapp_number.as_deref(), Some("5511988887777"));
    }

    #[test]
    fn test_duplicate_signup_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let sessions = SessionStore::new(24);
        signup(&db, &sessions, signup_req("a@b.com")).unwrap();
        let err = signup(&db, &sessions, signup_req("A@B.com")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_login_and_logout() {
        let db = Database::open_in_memory().unwrap();
        let sessions = SessionStore::new(24);
        signup(&db, &sessions, signup_req("a@b.com")).unwrap();

        let bad = login(
            &db,
            &sessions,
            LoginRequest {
                email: "a@b.com".into(),
                password: "errada".into(),
            },
        );
        assert!(matches!(bad, Err(AppError::InvalidCredentials)));

        let ok = login(
            &db,
            &sessions,
            LoginRequest {
                email: " A@B.com ".into(),
                password: "segredo123".into(),
            },
        )
        .unwrap();
        let session = sessions.verify(&ok.access_token).unwrap();
        assert_eq!(me(&db, &session).unwrap().email, "a@b.com");

        logout(&sessions, &ok.access_token);
        assert!(sessions.verify(&ok.access_token).is_none());
    }

    #[test]
    fn test_session_expires() {
        let db = Database::open_in_memory().unwrap();
        let sessions = SessionStore::new(24);
        let resp = signup(&db, &sessions, signup_req("a@b.com")).unwrap();
        sessions.backdate(&resp.access_token, 25);
        assert!(sessions.verify(&resp.access_token).is_none());
    }

    #[test]
    fn test_create_prunes_expired_sessions() {
        let db = Database::open_in_memory().unwrap();
        let sessions = SessionStore::new(24);
        let resp = signup(&db, &sessions, signup_req("a@b.com")).unwrap();
        let account = db.get_account(&resp.user.id).unwrap().unwrap();

        let stale: Vec<String> = (0..5).map(|_| sessions.create(&account)).collect();
        for token in &stale {
            sessions.backdate(token, 25);
        }
        assert_eq!(sessions.len(), 6);

        let fresh = sessions.create(&account);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.verify(&fresh).is_some());
        assert!(sessions.verify(&resp.access_token).is_some());
        assert!(stale.iter().all(|t| sessions.verify(t).is_none()));
    }

    #[test]
    fn test_staff_account_requires_staff_role() {
        let db = Database::open_in_memory().unwrap();
        let err = create_staff_account(&db, "x@y.com", "segredo123", "X", UserRole::Client);
        assert!(matches!(err, Err(AppError::Validation(_))));

        let admin =
            create_staff_account(&db, "admin@clinica.com", "segredo123", "Admin", UserRole::Admin)
                .unwrap();
        assert!(admin.role.is_staff());
        // equipe não ganha ficha de paciente
        assert!(db.get_patient(&admin.id).unwrap().is_none());
    }
}
