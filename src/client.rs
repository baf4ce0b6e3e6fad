//! Cliente HTTP da API da clínica
//!
//! Usado pelos aplicativos (painel e paciente). O token salvo no
//! [`LocalStore`] vai como `Authorization: Bearer` em todas as chamadas.

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::{AuthResponse, LoginRequest, SignupRequest};
use crate::booking::BookingWizard;
use crate::cart::Cart;
use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    Appointment, NewAppointment, NewTelemedicineSession, Order, Procedure, Product,
    TelemedicineSession, UserProfile,
};
use crate::schedule::TimeSlot;
use crate::storage::LocalStore;
use crate::telemedicine::SessionWithLinks;

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn http_client() -> AppResult<&'static Client> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(AppError::from)
    })
}

/// Envelope `{ success, data, error }` devolvido pela API
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

fn status_error(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED => AppError::NotAuthenticated,
        StatusCode::FORBIDDEN => AppError::Forbidden,
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::CONFLICT => AppError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::Validation(message),
        _ => AppError::External(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

pub struct ClinicClient {
    config: ClientConfig,
    store: LocalStore,
}

impl ClinicClient {
    pub fn new(config: ClientConfig, store: LocalStore) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.access_token().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.store.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> AppResult<T> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let envelope: Option<Envelope<T>> = serde_json::from_str(&body).ok();
        if !status.is_success() {
            let message = envelope
                .and_then(|e| e.error)
                .unwrap_or_else(|| body.clone());
            log::error!("[Client] {} {}", status.as_u16(), message);
            return Err(status_error(status, message));
        }

        match envelope {
            Some(Envelope {
                success: true,
                data: Some(data),
                ..
            }) => Ok(data),
            Some(Envelope { error: Some(e), .. }) => Err(AppError::External(e)),
            _ => Err(AppError::External("Resposta inesperada da API".to_string())),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let builder = http_client()?.get(self.url(path));
        self.send(builder).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> AppResult<T> {
        let builder = http_client()?.post(self.url(path)).json(body);
        self.send(builder).await
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> AppResult<T> {
        let builder = http_client()?.patch(self.url(path)).json(body);
        self.send(builder).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let builder = http_client()?.delete(self.url(path));
        self.send(builder).await
    }

    // ============ Autenticação ============

    pub async fn login(&mut self, email: &str, password: &str) -> AppResult<UserProfile> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post("/auth/login", &req).await?;
        self.store.save_session(&auth.access_token, &auth.user.id)?;
        log::info!("[Client] login: {}", auth.user.email);
        Ok(auth.user)
    }

    pub async fn signup(&mut self, req: &SignupRequest) -> AppResult<UserProfile> {
        let auth: AuthResponse = self.post("/auth/signup", req).await?;
        self.store.save_session(&auth.access_token, &auth.user.id)?;
        Ok(auth.user)
    }

    pub async fn me(&self) -> AppResult<UserProfile> {
        self.get("/auth/me").await
    }

    /// Encerra a sessão no servidor e limpa o armazenamento local mesmo se a chamada falhar
    pub async fn logout(&mut self) -> AppResult<()> {
        if self.is_authenticated() {
            let result: AppResult<serde_json::Value> =
                self.post("/auth/logout", &serde_json::json!({})).await;
            if let Err(e) = result {
                log::warn!("[Client] logout remoto falhou: {}", e);
            }
        }
        self.store.clear_session()
    }

    // ============ Agendamentos ============

    pub async fn list_appointments(&self, patient_id: Option<&str>) -> AppResult<Vec<Appointment>> {
        let mut builder = http_client()?.get(self.url("/appointments"));
        if let Some(id) = patient_id {
            builder = builder.query(&[("patient_id", id)]);
        }
        self.send(builder).await
    }

    pub async fn create_appointment(&self, req: &NewAppointment) -> AppResult<Appointment> {
        self.post("/appointments", req).await
    }

    pub async fn get_appointment(&self, id: &str) -> AppResult<Appointment> {
        self.get(&format!("/appointments/{}", id)).await
    }

    /// Finaliza o assistente de agendamento em nome do usuário logado
    pub async fn book(&self, wizard: &BookingWizard, notes: Option<String>) -> AppResult<Appointment> {
        let patient_id = self.store.user_id().ok_or(AppError::NotAuthenticated)?;
        let req = wizard.confirm(&patient_id, notes)?;
        self.create_appointment(&req).await
    }

    /// Cancela o agendamento (o servidor avisa o paciente pelo WhatsApp)
    pub async fn cancel_appointment(&self, id: &str) -> AppResult<Appointment> {
        self.delete(&format!("/appointments/{}", id)).await
    }

    pub async fn available_slots(
        &self,
        professional_id: &str,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> AppResult<Vec<TimeSlot>> {
        let builder = http_client()?
            .get(self.url(&format!("/appointments/available-slots/{}", professional_id)))
            .query(&[
                ("date", date.format("%Y-%m-%d").to_string()),
                ("duration", duration_minutes.to_string()),
            ]);
        self.send(builder).await
    }

    // ============ Catálogo ============

    pub async fn list_procedures(&self) -> AppResult<Vec<Procedure>> {
        self.get("/procedures").await
    }

    pub async fn get_procedure(&self, id: &str) -> AppResult<Procedure> {
        self.get(&format!("/procedures/{}", id)).await
    }

    pub async fn list_products_for_sale(&self) -> AppResult<Vec<Product>> {
        self.get("/inventory?for_sale=true").await
    }

    pub async fn get_product(&self, id: &str) -> AppResult<Product> {
        self.get(&format!("/inventory/{}", id)).await
    }

    // ============ Pedidos ============

    pub async fn create_order(&self, req: &crate::models::NewOrder) -> AppResult<Order> {
        self.post("/orders", req).await
    }

    pub async fn list_orders(&self, patient_id: &str) -> AppResult<Vec<Order>> {
        self.get(&format!("/orders/patient/{}", patient_id)).await
    }

    pub async fn get_order(&self, id: &str) -> AppResult<Order> {
        self.get(&format!("/orders/{}", id)).await
    }

    /// Cria o pedido com o carrinho salvo e o esvazia
    pub async fn checkout(&mut self, shipping_address: Option<String>) -> AppResult<Order> {
        let user_id = self.store.user_id().ok_or(AppError::NotAuthenticated)?;
        let mut cart: Cart = self.store.load_cart();
        let req = cart.to_order_request(&user_id, shipping_address)?;

        let order = self.create_order(&req).await?;
        cart.clear();
        self.store.save_cart(&cart)?;
        log::info!("[Client] pedido {} criado", order.id);
        Ok(order)
    }

    // ============ Teleconsulta ============

    pub async fn create_telemedicine_session(
        &self,
        req: &NewTelemedicineSession,
    ) -> AppResult<SessionWithLinks> {
        self.post("/telemedicine/sessions", req).await
    }

    pub async fn get_telemedicine_session(&self, id: &str) -> AppResult<TelemedicineSession> {
        self.get(&format!("/telemedicine/sessions/{}", id)).await
    }

    pub async fn start_telemedicine_session(&self, id: &str) -> AppResult<TelemedicineSession> {
        self.patch(
            &format!("/telemedicine/sessions/{}/start", id),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn end_telemedicine_session(
        &self,
        id: &str,
        notes: Option<&str>,
    ) -> AppResult<TelemedicineSession> {
        self.patch(
            &format!("/telemedicine/sessions/{}/end", id),
            &serde_json::json!({ "notes": notes }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, UserRole};
    use chrono::Utc;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(data: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"success": true, "data": data, "error": null}))
    }

    fn client(server: &MockServer) -> (ClinicClient, TempDir) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("store.json")).unwrap();
        let config = ClientConfig {
            api_url: format!("{}/api", server.uri()),
        };
        (ClinicClient::new(config, store), dir)
    }

    fn profile() -> serde_json::Value {
        serde_json::to_value(UserProfile {
            id: "u1".into(),
            email: "ana@example.com".into(),
            full_name: "Ana".into(),
            phone: None,
            role: UserRole::Client,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_token_and_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_partial_json(serde_json::json!({"email": "ana@example.com"})))
            .respond_with(ok(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "bearer",
                "user": profile()
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ok(profile()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ok(serde_json::json!({})))
            .mount(&server)
            .await;

        let (mut c, _dir) = client(&server);
        let user = c.login("ana@example.com", "segredo").await.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(c.store().user_id().as_deref(), Some("u1"));
        assert_eq!(c.me().await.unwrap().email, "ana@example.com");

        c.logout().await.unwrap();
        assert!(!c.is_authenticated());
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/appointments/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "success": false, "data": null, "error": "Agendamento não encontrado"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let (c, _dir) = client(&server);
        match c.get_appointment("nope").await {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Agendamento não encontrado"),
            other => panic!("unexpected: {:?}", other.map(|a| a.id)),
        }
        assert!(matches!(c.me().await, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_available_slots_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/appointments/available-slots/pr1"))
            .and(query_param("date", "2026-03-10"))
            .and(query_param("duration", "60"))
            .respond_with(ok(serde_json::json!([
                {"start_time": "2026-03-10T09:00:00", "end_time": "2026-03-10T10:00:00", "display": "09:00"}
            ])))
            .mount(&server)
            .await;

        let (c, _dir) = client(&server);
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let slots = c.available_slots("pr1", date, 60).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].display, "09:00");
    }

    #[tokio::test]
    async fn test_checkout_empties_cart() {
        let server = MockServer::start().await;
        let now = Utc::now();
        Mock::given(method("POST"))
            .and(path("/api/orders"))
            .and(body_partial_json(serde_json::json!({"patient_id": "u1"})))
            .respond_with(ok(serde_json::json!({
                "id": "o1",
                "patient_id": "u1",
                "total_amount": 90.0,
                "shipping_address": null,
                "source": "pwa",
                "status": "pending",
                "items": [],
                "created_at": now
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut c, _dir) = client(&server);
        assert!(matches!(c.checkout(None).await, Err(AppError::NotAuthenticated)));

        c.store.save_session("tok", "u1").unwrap();
        let product = Product {
            id: "prod1".into(),
            name: "Sérum".into(),
            description: None,
            category: None,
            quantity: 10,
            min_quantity: 1,
            sale_price: Some(45.0),
            is_for_sale: true,
            active: true,
            image_url: None,
            created_at: now,
        };
        let mut cart = Cart::new();
        cart.add(&product, 2).unwrap();
        c.store.save_cart(&cart).unwrap();

        let order = c.checkout(None).await.unwrap();
        assert_eq!(order.id, "o1");
        assert!(c.store().load_cart().is_empty());
    }

    #[tokio::test]
    async fn test_book_and_cancel() {
        let server = MockServer::start().await;
        let start = NaiveDate::from_ymd_opt(2026, 4, 10)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let procedure = crate::models::NewProcedure {
            name: "Limpeza de pele".into(),
            description: None,
            category: None,
            duration_minutes: 60,
            price: 180.0,
            available_for_online_booking: true,
        }
        .into_procedure();
        let mut wizard = BookingWizard::new();
        wizard.choose_procedure(procedure.clone()).unwrap();
        wizard.choose_date(start.date(), start.date()).unwrap();
        wizard
            .choose_slot(
                TimeSlot {
                    start_time: start,
                    end_time: start + chrono::Duration::minutes(60),
                    display: "14:00".into(),
                },
                None,
            )
            .unwrap();

        let appointment = wizard.confirm("u1", None).unwrap().into_appointment();
        Mock::given(method("POST"))
            .and(path("/api/appointments"))
            .and(body_partial_json(serde_json::json!({
                "patient_id": "u1",
                "procedure_id": procedure.id,
                "source": "pwa"
            })))
            .respond_with(ok(serde_json::to_value(&appointment).unwrap()))
            .mount(&server)
            .await;
        let mut cancelled = appointment.clone();
        cancelled.status = crate::models::AppointmentStatus::Cancelled;
        Mock::given(method("DELETE"))
            .and(path(format!("/api/appointments/{}", appointment.id)))
            .respond_with(ok(serde_json::to_value(&cancelled).unwrap()))
            .mount(&server)
            .await;

        let (mut c, _dir) = client(&server);
        assert!(matches!(c.book(&wizard, None).await, Err(AppError::NotAuthenticated)));

        c.store.save_session("tok", "u1").unwrap();
        let booked = c.book(&wizard, None).await.unwrap();
        assert_eq!(booked.start_time, start);
        let result = c.cancel_appointment(&booked.id).await.unwrap();
        assert_eq!(result.status, crate::models::AppointmentStatus::Cancelled);
    }
}
