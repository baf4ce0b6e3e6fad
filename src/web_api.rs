//! REST API da clínica
//!
//! Rotas montadas sob `/api`. O token de sessão vem do cabeçalho
//! `Authorization: Bearer` ou, como alternativa, do parâmetro `?token=`
//! (usado pelo WebSocket de sinalização).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ai::{self, AiClient, AudioUpload};
use crate::auth::{self, LoginRequest, Session, SessionStore, SignupRequest};
use crate::automation::{self, TestRuleRequest};
use crate::caixa::{self, ExpenseRequest, ReminderPeriod, SaleDraft};
use crate::config::AppConfig;
use crate::dashboard;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::finance;
use crate::models::*;
use crate::schedule;
use crate::telemedicine::{self, SignalingHub};
use crate::whatsapp::{self, AppointmentDetails, WebhookPayload, WhatsAppClient};

/// Estado compartilhado pelos handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: SessionStore,
    pub config: Arc<AppConfig>,
    pub whatsapp: Option<WhatsAppClient>,
    pub ai: Option<AiClient>,
    pub hub: SignalingHub,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig) -> AppResult<Self> {
        let whatsapp = match config.whatsapp.clone() {
            Some(c) => Some(WhatsAppClient::new(c, db.clone())?),
            None => {
                log::warn!("WhatsApp não configurado; mensagens não serão enviadas");
                None
            }
        };
        let ai = match config.ai.clone() {
            Some(c) => Some(AiClient::new(c)?),
            None => {
                log::warn!("IA não configurada; transcrição e resumo indisponíveis");
                None
            }
        };
        Ok(Self {
            db,
            sessions: SessionStore::new(config.session_ttl_hours),
            config: Arc::new(config),
            whatsapp,
            ai,
            hub: SignalingHub::new(),
        })
    }
}

/// Envelope de resposta
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

fn reply<T: Serialize>(result: AppResult<T>) -> Response {
    match result {
        Ok(data) => Json(ApiResponse::ok(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

fn created<T: Serialize>(result: AppResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::CREATED, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct AuthQuery {
    pub token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

fn request_token(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    bearer_token(headers).or_else(|| query.token.clone())
}

/// Sessão válida ou 401
macro_rules! require_auth {
    ($state:expr, $headers:expr, $query:expr) => {
        match request_token(&$headers, &$query).and_then(|t| $state.sessions.verify(&t)) {
            Some(session) => session,
            None => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiResponse::<()>::err("Autenticação necessária")),
                )
                    .into_response()
            }
        }
    };
}

/// Sessão da equipe (admin/profissional) ou 403
macro_rules! require_staff {
    ($state:expr, $headers:expr, $query:expr) => {{
        let session = require_auth!($state, $headers, $query);
        if !session.role.is_staff() {
            return (
                StatusCode::FORBIDDEN,
                Json(ApiResponse::<()>::err("Acesso restrito à equipe")),
            )
                .into_response();
        }
        session
    }};
}

/// Clientes só acessam os próprios dados
fn ensure_owner(session: &Session, patient_id: &str) -> AppResult<()> {
    if session.role.is_staff() || session.user_id == patient_id {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Rotas da API (montadas sob `/api`)
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        // autenticação
        .route("/auth/login", post(login_api))
        .route("/auth/signup", post(signup_api))
        .route("/auth/logout", post(logout_api))
        .route("/auth/me", get(me_api))
        // pacientes
        .route("/patients", get(list_patients_api).post(create_patient_api))
        .route(
            "/patients/{id}",
            get(get_patient_api)
                .patch(update_patient_api)
                .delete(delete_patient_api),
        )
        // profissionais
        .route(
            "/professionals",
            get(list_professionals_api).post(create_professional_api),
        )
        .route(
            "/professionals/{id}",
            get(get_professional_api)
                .put(update_professional_api)
                .delete(delete_professional_api),
        )
        .route(
            "/professionals/{id}/availability",
            get(get_availability_api).put(set_availability_api),
        )
        // procedimentos
        .route("/procedures", get(list_procedures_api).post(create_procedure_api))
        .route("/procedures/categories", get(procedure_categories_api))
        .route(
            "/procedures/{id}",
            get(get_procedure_api).put(update_procedure_api),
        )
        // estoque
        .route("/inventory", get(list_products_api).post(create_product_api))
        .route("/inventory/low-stock", get(low_stock_api))
        .route("/inventory/{id}", get(get_product_api).put(update_product_api))
        // agendamentos
        .route(
            "/appointments",
            get(list_appointments_api).post(create_appointment_api),
        )
        .route("/appointments/week", get(week_appointments_api))
        .route(
            "/appointments/available-slots/{professional_id}",
            get(available_slots_api),
        )
        .route(
            "/appointments/{id}",
            get(get_appointment_api)
                .patch(update_appointment_api)
                .delete(cancel_appointment_api),
        )
        // pedidos
        .route("/orders", post(create_order_api))
        .route("/orders/patient/{patient_id}", get(list_orders_api))
        .route("/orders/{id}", get(get_order_api))
        // financeiro
        .route("/financial", get(list_financial_api).post(create_financial_api))
        .route("/financial/summary", get(financial_summary_api))
        .route("/financial/report", get(financial_report_api))
        // caixa
        .route("/caixa/sales", post(create_sale_api))
        .route("/caixa/registers/open", get(current_register_api).post(open_register_api))
        .route("/caixa/registers/close", post(close_register_api))
        .route("/caixa/expenses", post(create_expense_api))
        .route("/caixa/reminders", get(payment_reminders_api))
        .route("/caixa/received-today", get(received_today_api))
        // anamnese
        .route("/anamnesis", get(list_anamnesis_api).post(create_anamnesis_api))
        .route(
            "/anamnesis/{id}",
            get(get_anamnesis_api)
                .put(update_anamnesis_api)
                .delete(delete_anamnesis_api),
        )
        // automação
        .route(
            "/automation/rules",
            get(list_rules_api).post(create_rule_api),
        )
        .route(
            "/automation/rules/{id}",
            get(get_rule_api).patch(update_rule_api).delete(delete_rule_api),
        )
        .route("/automation/logs", get(automation_logs_api))
        .route("/automation/test/{id}", post(test_rule_api))
        .route("/automation/templates", get(automation_templates_api))
        // whatsapp
        .route("/whatsapp/webhook", post(whatsapp_webhook_api))
        .route("/whatsapp/send/message", post(whatsapp_send_api))
        .route(
            "/whatsapp/send/appointment-reminder/{id}",
            post(whatsapp_reminder_api),
        )
        // IA
        .route(
            "/ai/transcribe",
            post(transcribe_api).layer(DefaultBodyLimit::max(MAX_AUDIO_UPLOAD_BYTES)),
        )
        .route("/ai/summarize/{id}", post(summarize_api))
        .route("/ai/extract-info/{id}", post(extract_info_api))
        .route("/ai/records/{id}", get(audio_record_api))
        .route("/ai/records/patient/{patient_id}", get(audio_records_api))
        // teleconsulta
        .route("/telemedicine/sessions", post(create_tele_session_api))
        .route("/telemedicine/sessions/{id}", get(get_tele_session_api))
        .route("/telemedicine/sessions/{id}/start", patch(start_tele_session_api))
        .route("/telemedicine/sessions/{id}/end", patch(end_tele_session_api))
        .route("/telemedicine/ws/{room_id}", get(signaling_ws))
        // painel
        .route("/dashboard/stats", get(dashboard_stats_api))
        .route("/dashboard/revenue-chart", get(revenue_chart_api))
        .route("/dashboard/top-procedures", get(top_procedures_api))
        .with_state(state)
}

// ============ Autenticação ============

async fn login_api(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> Response {
    reply(auth::login(&state.db, &state.sessions, payload))
}

async fn signup_api(State(state): State<AppState>, Json(payload): Json<SignupRequest>) -> Response {
    created(auth::signup(&state.db, &state.sessions, payload))
}

async fn logout_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    if let Some(token) = request_token(&headers, &query) {
        auth::logout(&state.sessions, &token);
    }
    Json(ApiResponse::ok(serde_json::json!({}))).into_response()
}

async fn me_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    let session = require_auth!(state, headers, query);
    reply(auth::me(&state.db, &session))
}

// ============ Pacientes ============

#[derive(Deserialize)]
struct SearchQuery {
    search: Option<String>,
}

async fn list_patients_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<SearchQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.list_patients(params.search.as_deref()))
}

async fn create_patient_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewPatient>,
) -> Response {
    require_staff!(state, headers, query);
    if payload.full_name.trim().is_empty() {
        return AppError::Validation("Nome é obrigatório".to_string()).into_response();
    }
    let patient = payload.into_patient();
    created(state.db.create_patient(&patient).map(|_| patient))
}

async fn get_patient_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    reply(ensure_owner(&session, &id).and_then(|_| {
        state
            .db
            .get_patient(&id)?
            .ok_or_else(|| AppError::NotFound("Paciente não encontrado".to_string()))
    }))
}

async fn update_patient_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<PatientUpdate>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = ensure_owner(&session, &id).and_then(|_| {
        let mut patient = state
            .db
            .get_patient(&id)?
            .ok_or_else(|| AppError::NotFound("Paciente não encontrado".to_string()))?;
        payload.apply(&mut patient);
        patient.updated_at = chrono::Utc::now();
        state.db.update_patient(&patient)?;
        Ok(patient)
    });
    reply(result)
}

async fn delete_patient_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.delete_patient(&id))
}

// ============ Profissionais ============

#[derive(Deserialize)]
struct ActiveQuery {
    active_only: Option<bool>,
}

async fn list_professionals_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<ActiveQuery>,
) -> Response {
    require_auth!(state, headers, query);
    reply(state.db.list_professionals(params.active_only.unwrap_or(true)))
}

async fn create_professional_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewProfessional>,
) -> Response {
    require_staff!(state, headers, query);
    let professional = payload.into_professional();
    created(state.db.create_professional(&professional).map(|_| professional))
}

async fn get_professional_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_auth!(state, headers, query);
    reply(
        state
            .db
            .get_professional(&id)
            .and_then(|p| p.ok_or_else(|| AppError::NotFound("Profissional não encontrado".to_string()))),
    )
}

async fn update_professional_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<ProfessionalUpdate>,
) -> Response {
    require_staff!(state, headers, query);
    let result = state.db.get_professional(&id).and_then(|p| {
        let mut professional =
            p.ok_or_else(|| AppError::NotFound("Profissional não encontrado".to_string()))?;
        payload.apply(&mut professional);
        state.db.update_professional(&professional)?;
        Ok(professional)
    });
    reply(result)
}

async fn delete_professional_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.delete_professional(&id))
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    day_of_week: Option<u32>,
}

async fn get_availability_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<AvailabilityQuery>,
    Path(id): Path<String>,
) -> Response {
    require_auth!(state, headers, query);
    reply(state.db.list_availability(&id, params.day_of_week))
}

async fn set_availability_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(windows): Json<Vec<AvailabilityWindow>>,
) -> Response {
    require_staff!(state, headers, query);
    let result = (|| -> AppResult<_> {
        for w in &windows {
            if w.day_of_week > 6 {
                return Err(AppError::Validation("Dia da semana inválido".to_string()));
            }
            if schedule::parse_hhmm(&w.end_time)? <= schedule::parse_hhmm(&w.start_time)? {
                return Err(AppError::Validation("Janela de horário inválida".to_string()));
            }
        }
        state.db.set_availability(&id, &windows)?;
        state.db.list_availability(&id, None)
    })();
    reply(result)
}

// ============ Procedimentos ============

async fn list_procedures_api(
    State(state): State<AppState>,
    Query(params): Query<ActiveQuery>,
) -> Response {
    reply(state.db.list_procedures(params.active_only.unwrap_or(true)))
}

async fn procedure_categories_api(State(state): State<AppState>) -> Response {
    reply(state.db.procedure_categories())
}

async fn get_procedure_api(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    reply(
        state
            .db
            .get_procedure(&id)
            .and_then(|p| p.ok_or_else(|| AppError::NotFound("Procedimento não encontrado".to_string()))),
    )
}

async fn create_procedure_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewProcedure>,
) -> Response {
    require_staff!(state, headers, query);
    if payload.duration_minutes <= 0 || payload.price < 0.0 {
        return AppError::Validation("Duração ou preço inválido".to_string()).into_response();
    }
    let procedure = payload.into_procedure();
    created(state.db.create_procedure(&procedure).map(|_| procedure))
}

async fn update_procedure_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<ProcedureUpdate>,
) -> Response {
    require_staff!(state, headers, query);
    let result = state.db.get_procedure(&id).and_then(|p| {
        let mut procedure =
            p.ok_or_else(|| AppError::NotFound("Procedimento não encontrado".to_string()))?;
        payload.apply(&mut procedure);
        state.db.update_procedure(&procedure)?;
        Ok(procedure)
    });
    reply(result)
}

// ============ Estoque ============

#[derive(Deserialize)]
struct ProductQuery {
    for_sale: Option<bool>,
}

async fn list_products_api(
    State(state): State<AppState>,
    Query(params): Query<ProductQuery>,
) -> Response {
    reply(state.db.list_products(params.for_sale.unwrap_or(false)))
}

async fn get_product_api(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    reply(
        state
            .db
            .get_product(&id)
            .and_then(|p| p.ok_or_else(|| AppError::NotFound("Produto não encontrado".to_string()))),
    )
}

async fn create_product_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewProduct>,
) -> Response {
    require_staff!(state, headers, query);
    if payload.quantity < 0 {
        return AppError::Validation("Quantidade inválida".to_string()).into_response();
    }
    let product = payload.into_product();
    created(state.db.create_product(&product).map(|_| product))
}

async fn update_product_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<ProductUpdate>,
) -> Response {
    require_staff!(state, headers, query);
    let result = state.db.get_product(&id).and_then(|p| {
        let mut product = p.ok_or_else(|| AppError::NotFound("Produto não encontrado".to_string()))?;
        payload.apply(&mut product);
        state.db.update_product(&product)?;
        Ok(product)
    });
    reply(result)
}

async fn low_stock_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.list_low_stock())
}

// ============ Agendamentos ============

#[derive(Deserialize)]
struct TabQuery {
    filter: Option<AppointmentFilter>,
}

async fn list_appointments_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(mut filters): Query<AppointmentQuery>,
    Query(params): Query<TabQuery>,
) -> Response {
    let session = require_auth!(state, headers, query);
    if !session.role.is_staff() {
        filters.patient_id = Some(session.user_id.clone());
    }
    let result = state.db.list_appointments(&filters).map(|list| match params.filter {
        Some(tab) => filter_appointments(&list, tab, Local::now().naive_local()),
        None => list,
    });
    reply(result)
}

/// Confirmação/cancelamento enviados em segundo plano
fn notify_patient(state: &AppState, appointment: Appointment, cancelled: bool) {
    let Some(wa) = state.whatsapp.clone() else {
        return;
    };
    let db = state.db.clone();
    tokio::spawn(async move {
        let (patient, details) = match AppointmentDetails::load(&db, &appointment) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[WhatsApp] dados do agendamento indisponíveis: {}", e);
                return;
            }
        };
        let Some(phone) = patient.whatsapp_number else {
            return;
        };
        let result = if cancelled {
            wa.send_cancellation(&phone, &details).await
        } else {
            wa.send_appointment_confirmation(&phone, &details).await
        };
        if result.is_ok() && !cancelled {
            if let Err(e) = db.mark_confirmation_sent(&appointment.id) {
                log::error!("[WhatsApp] falha ao marcar confirmação: {}", e);
            }
        }
    });
}

async fn create_appointment_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewAppointment>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = ensure_owner(&session, &payload.patient_id)
        .and_then(|_| schedule::book_appointment(&state.db, payload));
    if let Ok(ref appointment) = result {
        notify_patient(&state, appointment.clone(), false);
    }
    created(result)
}

async fn get_appointment_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = state.db.get_appointment(&id).and_then(|a| {
        let appointment =
            a.ok_or_else(|| AppError::NotFound("Agendamento não encontrado".to_string()))?;
        ensure_owner(&session, &appointment.patient_id)?;
        Ok(appointment)
    });
    reply(result)
}

async fn update_appointment_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<AppointmentUpdate>,
) -> Response {
    require_staff!(state, headers, query);
    reply(schedule::update_appointment(&state.db, &id, payload))
}

async fn cancel_appointment_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = state.db.get_appointment(&id).and_then(|a| {
        let appointment =
            a.ok_or_else(|| AppError::NotFound("Agendamento não encontrado".to_string()))?;
        ensure_owner(&session, &appointment.patient_id)?;
        state.db.set_appointment_status(&id, AppointmentStatus::Cancelled)
    });
    if let Ok(ref appointment) = result {
        notify_patient(&state, appointment.clone(), true);
    }
    reply(result)
}

#[derive(Deserialize)]
struct WeekQuery {
    date: Option<NaiveDate>,
    professional_id: Option<String>,
}

#[derive(Serialize)]
struct WeekView {
    days: Vec<NaiveDate>,
    time_slots: Vec<String>,
    appointments: Vec<Appointment>,
}

async fn week_appointments_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<WeekQuery>,
) -> Response {
    require_staff!(state, headers, query);
    let date = params.date.unwrap_or_else(today);
    let (start, end) = schedule::week_range(date);
    let result = state
        .db
        .list_appointments(&AppointmentQuery {
            professional_id: params.professional_id,
            start_date: Some(start),
            end_date: Some(end),
            ..Default::default()
        })
        .map(|appointments| WeekView {
            days: schedule::week_days(date),
            time_slots: schedule::time_slot_labels(),
            appointments,
        });
    reply(result)
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: NaiveDate,
    procedure_id: Option<String>,
    duration: Option<i64>,
}

async fn available_slots_api(
    State(state): State<AppState>,
    Path(professional_id): Path<String>,
    Query(params): Query<SlotsQuery>,
) -> Response {
    let result = (|| -> AppResult<_> {
        let duration = match (params.duration, params.procedure_id.as_deref()) {
            (Some(d), _) => d,
            (None, Some(pid)) => state
                .db
                .get_procedure(pid)?
                .map(|p| p.duration_minutes)
                .unwrap_or(60),
            (None, None) => 60,
        };
        let windows = state.db.list_availability(&professional_id, None)?;
        let existing = state
            .db
            .professional_appointments_on(&professional_id, params.date)?;
        schedule::available_slots(&windows, duration, &existing, params.date)
    })();
    reply(result)
}

// ============ Pedidos ============

async fn create_order_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewOrder>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = (|| -> AppResult<_> {
        ensure_owner(&session, &payload.patient_id)?;
        if payload.items.is_empty() {
            return Err(AppError::Validation("Pedido sem itens".to_string()));
        }
        if payload.items.iter().any(|i| i.quantity <= 0 || i.unit_price < 0.0) {
            return Err(AppError::Validation("Item de pedido inválido".to_string()));
        }
        let order = payload.into_order();
        state.db.create_order(&order)?;
        state
            .db
            .get_order(&order.id)?
            .ok_or_else(|| AppError::NotFound("Pedido não encontrado".to_string()))
    })();
    created(result)
}

async fn get_order_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = state.db.get_order(&id).and_then(|o| {
        let order = o.ok_or_else(|| AppError::NotFound("Pedido não encontrado".to_string()))?;
        ensure_owner(&session, &order.patient_id)?;
        Ok(order)
    });
    reply(result)
}

async fn list_orders_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(patient_id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    reply(
        ensure_owner(&session, &patient_id)
            .and_then(|_| state.db.list_orders_by_patient(&patient_id)),
    )
}

// ============ Financeiro ============

async fn list_financial_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<FinancialQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(finance::list_records(&state.db, &params))
}

async fn create_financial_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewFinancialRecord>,
) -> Response {
    require_staff!(state, headers, query);
    created(finance::create_record(&state.db, payload, today()))
}

#[derive(Deserialize)]
struct MonthQuery {
    month: Option<String>,
}

async fn financial_summary_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<MonthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(finance::summary(&state.db, params.month.as_deref()))
}

async fn financial_report_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<MonthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    let result = match params.month.as_deref() {
        Some(m) => finance::parse_month(m),
        None => {
            let t = today();
            Ok((chrono::Datelike::year(&t), chrono::Datelike::month(&t)))
        }
    }
    .and_then(|(year, month)| finance::monthly_report(&state.db, year, month));
    reply(result)
}

// ============ Caixa ============

async fn create_sale_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(draft): Json<SaleDraft>,
) -> Response {
    require_staff!(state, headers, query);
    created(caixa::finalize_sale(&state.db, &draft, today()))
}

#[derive(Deserialize)]
struct OpenRegisterRequest {
    #[serde(default)]
    opening_balance: f64,
}

async fn open_register_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<OpenRegisterRequest>,
) -> Response {
    require_staff!(state, headers, query);
    created(caixa::open_register(&state.db, payload.opening_balance))
}

async fn current_register_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.get_open_cash_register())
}

async fn close_register_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(caixa::close_register(&state.db))
}

async fn create_expense_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<ExpenseRequest>,
) -> Response {
    require_staff!(state, headers, query);
    created(caixa::record_expense(&state.db, payload))
}

#[derive(Deserialize)]
struct ReminderQuery {
    period: Option<ReminderPeriod>,
}

async fn payment_reminders_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<ReminderQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(caixa::pending_reminders(&state.db, params.period, today()))
}

async fn received_today_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(caixa::received_today(&state.db, today()))
}

// ============ Anamnese ============

#[derive(Deserialize)]
struct PatientFilter {
    patient_id: Option<String>,
}

#[derive(Deserialize)]
struct NewAnamnesis {
    patient_id: String,
    #[serde(flatten)]
    fields: AnamnesisFields,
}

async fn list_anamnesis_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<PatientFilter>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.list_anamnesis(params.patient_id.as_deref()))
}

async fn create_anamnesis_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewAnamnesis>,
) -> Response {
    require_staff!(state, headers, query);
    let result = (|| -> AppResult<_> {
        if state.db.get_patient(&payload.patient_id)?.is_none() {
            return Err(AppError::NotFound("Paciente não encontrado".to_string()));
        }
        let anamnesis = Anamnesis::new(payload.patient_id, payload.fields);
        state.db.create_anamnesis(&anamnesis)?;
        Ok(anamnesis)
    })();
    created(result)
}

async fn get_anamnesis_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(
        state
            .db
            .get_anamnesis(&id)
            .and_then(|a| a.ok_or_else(|| AppError::NotFound("Anamnese não encontrada".to_string()))),
    )
}

async fn update_anamnesis_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(fields): Json<AnamnesisFields>,
) -> Response {
    require_staff!(state, headers, query);
    let result = state.db.update_anamnesis(&id, &fields).and_then(|_| {
        state
            .db
            .get_anamnesis(&id)?
            .ok_or_else(|| AppError::NotFound("Anamnese não encontrada".to_string()))
    });
    reply(result)
}

async fn delete_anamnesis_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.delete_anamnesis(&id))
}

// ============ Automação ============

async fn list_rules_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<ActiveQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.list_automation_rules(params.active_only.unwrap_or(true)))
}

async fn create_rule_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewAutomationRule>,
) -> Response {
    require_staff!(state, headers, query);
    created(automation::create_rule(&state.db, payload))
}

async fn get_rule_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(
        state
            .db
            .get_automation_rule(&id)
            .and_then(|r| r.ok_or_else(|| AppError::NotFound("Regra não encontrada".to_string()))),
    )
}

async fn update_rule_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<AutomationRuleUpdate>,
) -> Response {
    require_staff!(state, headers, query);
    reply(automation::update_rule(&state.db, &id, payload))
}

async fn delete_rule_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.delete_automation_rule(&id))
}

#[derive(Deserialize)]
struct LogsQuery {
    rule_id: Option<String>,
    limit: Option<i64>,
}

async fn automation_logs_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<LogsQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(
        state
            .db
            .list_automation_logs(params.rule_id.as_deref(), params.limit.unwrap_or(100)),
    )
}

async fn test_rule_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    Json(payload): Json<TestRuleRequest>,
) -> Response {
    require_staff!(state, headers, query);
    reply(automation::test_rule(&state.db, state.whatsapp.as_ref(), &id, payload).await)
}

#[derive(Serialize)]
struct TemplateView {
    trigger_type: TriggerType,
    body: &'static str,
    offsets: Vec<(i64, String)>,
}

async fn automation_templates_api() -> Response {
    let offsets: Vec<(i64, String)> = [0, 60, 180, 360, 720, 1440, 2880]
        .into_iter()
        .map(|m| (m, automation::describe_offset(m)))
        .collect();
    let templates: Vec<TemplateView> = automation::template_library()
        .into_iter()
        .map(|t| TemplateView {
            trigger_type: t.trigger_type,
            body: t.body,
            offsets: offsets.clone(),
        })
        .collect();
    Json(ApiResponse::ok(templates)).into_response()
}

// ============ WhatsApp ============

/// Webhook da Evolution API; processamento em segundo plano
async fn whatsapp_webhook_api(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    if let Some(msg) = payload.incoming_message() {
        let db = state.db.clone();
        let wa = state.whatsapp.clone();
        let ai = state.ai.clone();
        tokio::spawn(async move {
            let now = Local::now().naive_local();
            if let Err(e) = whatsapp::handle_incoming(&db, wa.as_ref(), ai.as_ref(), &msg, now).await {
                log::error!("[WhatsApp] erro ao processar mensagem de {}: {}", msg.from_number, e);
            }
        });
    }
    Json(serde_json::json!({ "status": "received" })).into_response()
}

#[derive(Deserialize)]
struct SendMessageRequest {
    phone: String,
    message: String,
}

fn require_whatsapp(state: &AppState) -> AppResult<&WhatsAppClient> {
    state
        .whatsapp
        .as_ref()
        .ok_or_else(|| AppError::External("WhatsApp não configurado".to_string()))
}

async fn whatsapp_send_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<SendMessageRequest>,
) -> Response {
    require_staff!(state, headers, query);
    let wa = match require_whatsapp(&state) {
        Ok(wa) => wa,
        Err(e) => return e.into_response(),
    };
    reply(wa.send_text(&payload.phone, &payload.message).await)
}

async fn whatsapp_reminder_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    let wa = match require_whatsapp(&state) {
        Ok(wa) => wa,
        Err(e) => return e.into_response(),
    };
    reply(whatsapp::send_reminder_for(&state.db, wa, &id).await)
}

// ============ IA ============

/// Tamanho máximo do áudio enviado para transcrição (25 MB, limite do Whisper)
pub const MAX_AUDIO_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("Upload inválido: {}", e))
}

async fn read_audio_upload(mut multipart: Multipart) -> AppResult<AudioUpload> {
    let mut patient_id = None;
    let mut professional_id = None;
    let mut appointment_id = None;
    let mut filename = String::from("audio.webm");
    let mut bytes = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "audio" => {
                if let Some(f) = field.file_name() {
                    filename = f.to_string();
                }
                bytes = field.bytes().await.map_err(multipart_error)?.to_vec();
            }
            "patient_id" => patient_id = Some(field.text().await.map_err(multipart_error)?),
            "professional_id" => {
                professional_id = Some(field.text().await.map_err(multipart_error)?)
            }
            "appointment_id" => {
                appointment_id = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    Ok(AudioUpload {
        patient_id: patient_id
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Validation("patient_id é obrigatório".to_string()))?,
        professional_id: professional_id.filter(|p| !p.is_empty()),
        appointment_id: appointment_id.filter(|p| !p.is_empty()),
        filename,
        bytes,
        source: "upload".to_string(),
    })
}

async fn transcribe_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    multipart: Multipart,
) -> Response {
    require_staff!(state, headers, query);
    let upload = match read_audio_upload(multipart).await {
        Ok(u) => u,
        Err(e) => return e.into_response(),
    };
    created(
        ai::transcribe_and_record(
            &state.db,
            state.ai.as_ref(),
            &state.config.uploads_dir,
            upload,
        )
        .await,
    )
}

async fn summarize_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(ai::summarize_record(&state.db, state.ai.as_ref(), &id).await)
}

async fn extract_info_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(ai::extract_record_info(&state.db, state.ai.as_ref(), &id).await)
}

async fn audio_record_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.get_audio_record(&id).and_then(|r| {
        r.ok_or_else(|| AppError::NotFound("Prontuário não encontrado".to_string()))
    }))
}

async fn audio_records_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(patient_id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(state.db.list_audio_records_by_patient(&patient_id))
}

// ============ Teleconsulta ============

async fn create_tele_session_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Json(payload): Json<NewTelemedicineSession>,
) -> Response {
    require_staff!(state, headers, query);
    created(telemedicine::create_session(&state.db, payload))
}

async fn get_tele_session_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    let session = require_auth!(state, headers, query);
    let result = telemedicine::get_session(&state.db, &id).and_then(|s| {
        if s.professional_id != session.user_id {
            ensure_owner(&session, &s.patient_id)?;
        }
        Ok(s)
    });
    reply(result)
}

async fn start_tele_session_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
) -> Response {
    require_staff!(state, headers, query);
    reply(telemedicine::start_session(&state.db, &id))
}

#[derive(Deserialize, Default)]
struct EndSessionRequest {
    notes: Option<String>,
}

async fn end_tele_session_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(id): Path<String>,
    payload: Option<Json<EndSessionRequest>>,
) -> Response {
    require_staff!(state, headers, query);
    let notes = payload.and_then(|Json(p)| p.notes);
    reply(telemedicine::end_session(&state.db, &id, notes))
}

async fn signaling_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    require_auth!(state, headers, query);
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| relay_signals(socket, hub, room_id))
}

/// Repassa mensagens JSON entre os participantes da sala
async fn relay_signals(mut socket: WebSocket, hub: SignalingHub, room_id: String) {
    let mut participant = match hub.join(&room_id) {
        Ok(p) => p,
        Err(e) => {
            log::error!("[Teleconsulta] falha ao entrar na sala {}: {}", room_id, e);
            return;
        }
    };
    log::info!("[Teleconsulta] participante {} entrou na sala {}", participant.id, room_id);

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if serde_json::from_str::<serde_json::Value>(text.as_str()).is_ok() {
                        participant.send(text.as_str().to_string());
                    } else {
                        log::debug!("[Teleconsulta] mensagem não-JSON ignorada");
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            outgoing = participant.recv() => match outgoing {
                Some(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    log::info!("[Teleconsulta] participante {} saiu da sala {}", participant.id, room_id);
    hub.leave(participant);
}

// ============ Painel ============

async fn dashboard_stats_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(dashboard::stats(&state.db, Local::now().naive_local()))
}

#[derive(Deserialize)]
struct ChartQuery {
    months: Option<u32>,
}

async fn revenue_chart_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<ChartQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(dashboard::revenue_chart(&state.db, params.months.unwrap_or(6), today()))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn top_procedures_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    Query(params): Query<LimitQuery>,
) -> Response {
    require_staff!(state, headers, query);
    reply(dashboard::top_procedures(&state.db, params.limit.unwrap_or(5)))
}
