//! WhatsApp via Evolution API
//!
//! Envio de mensagens (texto e botões), mensagens prontas de agendamento e o
//! bot que responde aos eventos `messages.upsert` do webhook.

use chrono::{Duration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ai::AiClient;
use crate::config::WhatsAppConfig;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    Appointment, AppointmentStatus, Patient, Procedure, Professional, WhatsAppMessage,
};
use crate::schedule::{self, TimeSlot};

const BOT_CONTEXT: &str =
    "Você ajuda pacientes a agendar consultas, confirmar agendamentos e tirar dúvidas.";
const DEFAULT_SLOT_MINUTES: i64 = 60;
const SLOT_SEARCH_DAYS: i64 = 7;
const MAX_SUGGESTED_SLOTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Button {
    #[serde(rename = "buttonId")]
    pub id: String,
    #[serde(rename = "buttonText")]
    pub text: ButtonText,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ButtonText {
    #[serde(rename = "displayText")]
    pub display_text: String,
}

impl Button {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            text: ButtonText {
                display_text: label.to_string(),
            },
        }
    }
}

/// Dados exibidos nas mensagens de agendamento
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentDetails {
    pub patient_name: String,
    pub procedure: String,
    pub date: String,
    pub time: String,
    pub professional: String,
    pub address: Option<String>,
}

impl AppointmentDetails {
    /// Monta os dados a partir do agendamento e dos cadastros ligados a ele
    pub fn load(db: &Database, appointment: &Appointment) -> AppResult<(Patient, Self)> {
        let patient = db
            .get_patient(&appointment.patient_id)?
            .ok_or_else(|| AppError::NotFound("Paciente não encontrado".to_string()))?;
        let procedure = db
            .get_procedure(&appointment.procedure_id)?
            .map(|p| p.name)
            .unwrap_or_default();
        let professional = match appointment.professional_id.as_deref() {
            Some(id) => db.get_professional(id)?.map(|p| p.name).unwrap_or_default(),
            None => String::new(),
        };
        let details = Self {
            patient_name: patient.full_name.clone(),
            procedure,
            date: appointment.start_time.format("%d/%m/%Y").to_string(),
            time: appointment.start_time.format("%H:%M").to_string(),
            professional,
            address: None,
        };
        Ok((patient, details))
    }
}

// ============ Mensagens prontas ============

pub fn confirmation_message(d: &AppointmentDetails) -> String {
    format!(
        "🗓️ *Agendamento Confirmado!*\n\n\
         Olá {},\n\n\
         Seu agendamento foi confirmado com sucesso!\n\n\
         📋 *Detalhes:*\n\
         • Procedimento: {}\n\
         • Data: {}\n\
         • Horário: {}\n\
         • Profissional: {}\n\n\
         📍 Local: {}\n\n\
         💡 *Importante:*\n\
         • Chegue 10 minutos antes\n\
         • Traga documento com foto\n\n\
         Para reagendar ou cancelar, responda esta mensagem.\n\n\
         Até breve! ✨",
        d.patient_name,
        d.procedure,
        d.date,
        d.time,
        d.professional,
        d.address.as_deref().unwrap_or("Endereço da clínica")
    )
}

pub fn reminder_message(d: &AppointmentDetails) -> String {
    format!(
        "⏰ *Lembrete de Consulta*\n\n\
         Olá {},\n\n\
         Lembramos que você tem consulta agendada:\n\n\
         📋 {}\n\
         📅 {} às {}\n\
         👩‍⚕️ Com {}\n\n\
         Confirme sua presença respondendo SIM.\n\n\
         Para reagendar, entre em contato conosco.\n\n\
         Te esperamos! 💙",
        d.patient_name, d.procedure, d.date, d.time, d.professional
    )
}

pub fn reminder_buttons() -> Vec<Button> {
    vec![
        Button::new("confirm", "✅ Confirmar"),
        Button::new("reschedule", "📅 Reagendar"),
        Button::new("cancel", "❌ Cancelar"),
    ]
}

pub fn cancellation_message(d: &AppointmentDetails) -> String {
    format!(
        "❌ *Agendamento Cancelado*\n\n\
         Olá {},\n\n\
         Seu agendamento de {} em {} às {} foi cancelado.\n\n\
         Para remarcar, responda \"agendar\".",
        d.patient_name, d.procedure, d.date, d.time
    )
}

pub fn feedback_message(patient_name: &str) -> String {
    format!(
        "💬 *Como foi sua experiência?*\n\n\
         Olá {}!\n\n\
         Esperamos que tenha gostado do atendimento!\n\n\
         Sua opinião é muito importante para nós.\n\
         Avalie sua experiência de 1 a 5 estrelas:\n\n\
         ⭐ ⭐ ⭐ ⭐ ⭐\n\n\
         Responda com um número de 1 a 5.\n\n\
         Obrigada! 💙",
        patient_name
    )
}

pub fn welcome_message() -> String {
    "👋 *Bem-vindo à Clínica Estética!*\n\n\
     Olá! Obrigada por entrar em contato.\n\n\
     Como posso te ajudar hoje?\n\n\
     1️⃣ Agendar consulta\n\
     2️⃣ Ver procedimentos\n\
     3️⃣ Falar com atendente\n\n\
     Digite o número da opção desejada."
        .to_string()
}

pub fn audio_prompt_message() -> String {
    "🎤 *Áudio de Prontuário Recebido*\n\n\
     Para qual paciente é este prontuário?\n\
     Digite o nome ou CPF do paciente:"
        .to_string()
}

pub fn procedure_menu(procedures: &[Procedure]) -> String {
    let mut msg = String::from("🗓️ *Agendar Consulta*\n\nEscolha o procedimento:\n\n");
    for (idx, p) in procedures.iter().enumerate() {
        msg.push_str(&format!("{}. {} - R$ {:.2}\n", idx + 1, p.name, p.price));
    }
    msg
}

pub fn slots_message(slots: &[(String, TimeSlot)]) -> String {
    if slots.is_empty() {
        return "📅 Não há horários disponíveis nos próximos dias. Nossa equipe entrará em contato."
            .to_string();
    }
    let mut msg = String::from("📅 *Horários Disponíveis*\n\nEscolha um horário:\n\n");
    for (idx, (professional, slot)) in slots.iter().enumerate() {
        msg.push_str(&format!(
            "{}. {} {} com {}\n",
            idx + 1,
            slot.start_time.format("%d/%m"),
            slot.display,
            professional
        ));
    }
    msg.push_str("\nDigite o número do horário desejado.");
    msg
}

fn confirmed_message(procedure: &str, start: NaiveDateTime) -> String {
    format!(
        "✅ *Agendamento Confirmado!*\n\n\
         Seu agendamento foi confirmado com sucesso!\n\n\
         📋 {}\n\
         📅 {}\n\n\
         Até breve! ✨",
        procedure,
        start.format("%d/%m/%Y %H:%M")
    )
}

// ============ Cliente Evolution API ============

#[derive(Clone)]
pub struct WhatsAppClient {
    http: Client,
    config: WhatsAppConfig,
    db: Database,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig, db: Database) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config, db })
    }

    async fn post(&self, endpoint: &str, payload: serde_json::Value) -> AppResult<serde_json::Value> {
        let url = format!(
            "{}/{}/{}",
            self.config.api_url, endpoint, self.config.instance_name
        );
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::External(format!(
                "Evolution API {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null))
    }

    fn log_outbound(&self, to: &str, content: &str, message_type: &str, ok: bool) {
        let entry = WhatsAppMessage {
            id: uuid::Uuid::new_v4().to_string(),
            to_number: to.to_string(),
            content: content.to_string(),
            message_type: message_type.to_string(),
            direction: "outbound".to_string(),
            status: if ok { "sent" } else { "failed" }.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.log_whatsapp_message(&entry) {
            log::error!("[WhatsApp] falha ao registrar mensagem: {}", e);
        }
    }

    pub async fn send_text(&self, to: &str, message: &str) -> AppResult<serde_json::Value> {
        let result = self
            .post(
                "message/sendText",
                serde_json::json!({ "number": to, "text": message }),
            )
            .await;
        self.log_outbound(to, message, "text", result.is_ok());
        match &result {
            Ok(_) => log::info!("[WhatsApp] mensagem enviada para {}", to),
            Err(e) => log::warn!("[WhatsApp] envio para {} falhou: {}", to, e),
        }
        result
    }

    pub async fn send_buttons(
        &self,
        to: &str,
        text: &str,
        buttons: &[Button],
    ) -> AppResult<serde_json::Value> {
        let result = self
            .post(
                "message/sendButtons",
                serde_json::json!({ "number": to, "title": text, "buttons": buttons }),
            )
            .await;
        self.log_outbound(to, text, "buttons", result.is_ok());
        if let Err(e) = &result {
            log::warn!("[WhatsApp] envio de botões para {} falhou: {}", to, e);
        }
        result
    }

    pub async fn send_appointment_confirmation(
        &self,
        to: &str,
        details: &AppointmentDetails,
    ) -> AppResult<serde_json::Value> {
        self.send_text(to, &confirmation_message(details)).await
    }

    pub async fn send_appointment_reminder(
        &self,
        to: &str,
        details: &AppointmentDetails,
    ) -> AppResult<serde_json::Value> {
        self.send_buttons(to, &reminder_message(details), &reminder_buttons())
            .await
    }

    pub async fn send_cancellation(
        &self,
        to: &str,
        details: &AppointmentDetails,
    ) -> AppResult<serde_json::Value> {
        self.send_text(to, &cancellation_message(details)).await
    }

    pub async fn send_feedback_request(
        &self,
        to: &str,
        patient_name: &str,
    ) -> AppResult<serde_json::Value> {
        self.send_text(to, &feedback_message(patient_name)).await
    }

    /// Registra a URL do webhook na instância
    pub async fn setup_webhook(&self, webhook_url: &str) -> AppResult<serde_json::Value> {
        self.post(
            "webhook/set",
            serde_json::json!({
                "webhook": {
                    "url": webhook_url,
                    "webhook_by_events": true,
                    "events": ["MESSAGES_UPSERT", "MESSAGES_UPDATE", "CONNECTION_UPDATE"]
                }
            }),
        )
        .await
    }
}

/// Envia o lembrete de um agendamento ao WhatsApp do paciente
pub async fn send_reminder_for(
    db: &Database,
    wa: &WhatsAppClient,
    appointment_id: &str,
) -> AppResult<serde_json::Value> {
    let appointment = db
        .get_appointment(appointment_id)?
        .ok_or_else(|| AppError::NotFound("Agendamento não encontrado".to_string()))?;
    let (patient, details) = AppointmentDetails::load(db, &appointment)?;
    let phone = patient
        .whatsapp_number
        .or(patient.phone)
        .ok_or_else(|| AppError::Validation("Paciente sem WhatsApp cadastrado".to_string()))?;
    wa.send_appointment_reminder(&phone, &details).await
}

// ============ Webhook / bot ============

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Mensagem recebida já normalizada
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub from_number: String,
    pub message_type: Option<String>,
    pub text: String,
    pub audio_url: Option<String>,
}

impl WebhookPayload {
    /// Extrai a mensagem de eventos `messages.upsert`
    pub fn incoming_message(&self) -> Option<IncomingMessage> {
        if self.event.as_deref() != Some("messages.upsert") {
            return None;
        }
        let message = self.data.get("message")?;
        let from_number = message
            .pointer("/key/remoteJid")
            .and_then(|v| v.as_str())?
            .replace("@s.whatsapp.net", "");
        if from_number.is_empty() {
            return None;
        }
        let body = message.get("message");
        let text = body
            .and_then(|b| b.get("conversation"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let audio_url = body
            .and_then(|b| b.pointer("/audioMessage/url"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Some(IncomingMessage {
            from_number,
            message_type: message
                .get("messageType")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            text,
            audio_url,
        })
    }
}

/// Quem enviou a mensagem
#[derive(Debug, Clone)]
pub enum Sender {
    Patient(Patient),
    Professional(Professional),
    Unknown,
}

pub fn classify_sender(db: &Database, number: &str) -> AppResult<Sender> {
    if let Some(p) = db.find_patient_by_whatsapp(number)? {
        return Ok(Sender::Patient(p));
    }
    if let Some(p) = db.find_professional_by_whatsapp(number)? {
        return Ok(Sender::Professional(p));
    }
    Ok(Sender::Unknown)
}

/// Intenção do paciente reconhecida pelo bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientIntent {
    Schedule,
    Slots,
    Confirm,
    Other,
}

pub fn patient_intent(text: &str) -> PatientIntent {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    if lower.contains("agendar") {
        PatientIntent::Schedule
    } else if lower.contains("horários")
        || lower.contains("horarios")
        || (!trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()))
    {
        PatientIntent::Slots
    } else if lower.contains("confirmar") || trimmed.to_uppercase() == "SIM" {
        PatientIntent::Confirm
    } else {
        PatientIntent::Other
    }
}

/// Próximos horários livres entre os profissionais que atendem online
pub fn next_open_slots(
    db: &Database,
    now: NaiveDateTime,
    limit: usize,
) -> AppResult<Vec<(String, TimeSlot)>> {
    let mut found = Vec::new();
    let professionals: Vec<Professional> = db
        .list_professionals(true)?
        .into_iter()
        .filter(|p| p.receives_bookings)
        .collect();

    for offset in 0..SLOT_SEARCH_DAYS {
        let date = now.date() + Duration::days(offset);
        for professional in &professionals {
            let windows = db.list_availability(&professional.id, None)?;
            let existing = db.professional_appointments_on(&professional.id, date)?;
            for slot in schedule::available_slots(&windows, DEFAULT_SLOT_MINUTES, &existing, date)? {
                if slot.start_time > now {
                    found.push((professional.name.clone(), slot));
                }
            }
        }
    }
    found.sort_by(|a, b| a.1.start_time.cmp(&b.1.start_time));
    found.truncate(limit);
    Ok(found)
}

/// Resposta gerada pelo bot
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub to: String,
    pub text: String,
}

async fn patient_reply(
    db: &Database,
    ai: Option<&AiClient>,
    patient: &Patient,
    from: &str,
    text: &str,
    now: NaiveDateTime,
) -> AppResult<String> {
    let reply = match patient_intent(text) {
        PatientIntent::Schedule => {
            let procedures: Vec<Procedure> = db
                .list_procedures(true)?
                .into_iter()
                .filter(|p| p.available_for_online_booking)
                .collect();
            procedure_menu(&procedures)
        }
        PatientIntent::Slots => slots_message(&next_open_slots(db, now, MAX_SUGGESTED_SLOTS)?),
        PatientIntent::Confirm => match db.latest_pending_appointment(&patient.id)? {
            Some(appointment) => {
                db.set_appointment_status(&appointment.id, AppointmentStatus::Confirmed)?;
                db.mark_confirmation_sent(&appointment.id)?;
                let procedure = db
                    .get_procedure(&appointment.procedure_id)?
                    .map(|p| p.name)
                    .unwrap_or_default();
                log::info!("[WhatsApp] {} confirmou o agendamento {}", from, appointment.id);
                confirmed_message(&procedure, appointment.start_time)
            }
            None => "Não encontramos agendamentos pendentes de confirmação.".to_string(),
        },
        PatientIntent::Other => match ai {
            Some(ai) => ai.generate_whatsapp_response(BOT_CONTEXT, text).await,
            None => welcome_message(),
        },
    };
    Ok(reply)
}

/// Processa uma mensagem recebida e devolve a resposta (se houver)
///
/// A resposta é enviada quando o WhatsApp está configurado; o resultado
/// também é devolvido para quem chamou.
pub async fn handle_incoming(
    db: &Database,
    wa: Option<&WhatsAppClient>,
    ai: Option<&AiClient>,
    msg: &IncomingMessage,
    now: NaiveDateTime,
) -> AppResult<Option<BotReply>> {
    let inbound = WhatsAppMessage {
        id: uuid::Uuid::new_v4().to_string(),
        to_number: msg.from_number.clone(),
        content: msg.text.clone(),
        message_type: msg.message_type.clone().unwrap_or_else(|| "text".to_string()),
        direction: "inbound".to_string(),
        status: "received".to_string(),
        created_at: Utc::now(),
    };
    db.log_whatsapp_message(&inbound)?;

    let text = match classify_sender(db, &msg.from_number)? {
        Sender::Patient(patient) => {
            Some(patient_reply(db, ai, &patient, &msg.from_number, &msg.text, now).await?)
        }
        Sender::Professional(_) => {
            if msg.message_type.as_deref() == Some("audioMessage") && msg.audio_url.is_some() {
                Some(audio_prompt_message())
            } else {
                None
            }
        }
        Sender::Unknown => {
            let mut lead = Patient::new(format!("Lead WhatsApp {}", msg.from_number));
            lead.whatsapp_number = Some(msg.from_number.clone());
            let first = if msg.text.is_empty() {
                "Novo contato via WhatsApp"
            } else {
                msg.text.as_str()
            };
            lead.observations = Some(format!("Lead criado via WhatsApp: {}", first));
            lead.tags = vec!["lead".to_string(), "whatsapp".to_string()];
            db.create_patient(&lead)?;
            Some(welcome_message())
        }
    };

    let reply = text.map(|text| BotReply {
        to: msg.from_number.clone(),
        text,
    });
    if let (Some(wa), Some(r)) = (wa, reply.as_ref()) {
        // falha de envio já fica registrada no histórico
        let _ = wa.send_text(&r.to, &r.text).await;
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AvailabilityWindow, NewAppointment, NewProcedure, NewProfessional};
    use chrono::{Datelike, NaiveDate};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upsert(number: &str, text: &str) -> WebhookPayload {
        serde_json::from_value(serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "message": {
                    "key": {"remoteJid": format!("{}@s.whatsapp.net", number)},
                    "messageType": "conversation",
                    "message": {"conversation": text}
                }
            }
        }))
        .unwrap()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 9)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_webhook() {
        let msg = upsert("5511999990000", "Quero agendar").incoming_message().unwrap();
        assert_eq!(msg.from_number, "5511999990000");
        assert_eq!(msg.text, "Quero agendar");

        let other: WebhookPayload =
            serde_json::from_value(serde_json::json!({"event": "connection.update", "data": {}}))
                .unwrap();
        assert!(other.incoming_message().is_none());
    }

    #[test]
    fn test_patient_intents() {
        assert_eq!(patient_intent("quero AGENDAR"), PatientIntent::Schedule);
        assert_eq!(patient_intent("horários?"), PatientIntent::Slots);
        assert_eq!(patient_intent("2"), PatientIntent::Slots);
        assert_eq!(patient_intent("sim"), PatientIntent::Confirm);
        assert_eq!(patient_intent("Confirmar"), PatientIntent::Confirm);
        assert_eq!(patient_intent("qual o endereço?"), PatientIntent::Other);
    }

    #[tokio::test]
    async fn test_unknown_number_becomes_lead() {
        let db = Database::open_in_memory().unwrap();
        let msg = upsert("5511911112222", "Oi, vi o anúncio").incoming_message().unwrap();
        let reply = handle_incoming(&db, None, None, &msg, now()).await.unwrap().unwrap();
        assert!(reply.text.contains("Bem-vindo"));

        let lead = db.find_patient_by_whatsapp("5511911112222").unwrap().unwrap();
        assert_eq!(lead.tags, vec!["lead".to_string(), "whatsapp".to_string()]);
        assert!(lead.observations.unwrap().contains("vi o anúncio"));
        assert_eq!(db.list_whatsapp_messages(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patient_confirms_pending_appointment() {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Rita".into());
        patient.whatsapp_number = Some("5511933334444".into());
        db.create_patient(&patient).unwrap();
        let start = now() + Duration::days(1);
        let appointment = NewAppointment {
            patient_id: patient.id.clone(),
            professional_id: None,
            procedure_id: "x".into(),
            start_time: start,
            end_time: start + Duration::minutes(60),
            notes: None,
            source: "whatsapp".into(),
        }
        .into_appointment();
        db.create_appointment(&appointment).unwrap();

        let msg = upsert("5511933334444", "SIM").incoming_message().unwrap();
        let reply = handle_incoming(&db, None, None, &msg, now()).await.unwrap().unwrap();
        assert!(reply.text.contains("Confirmado"));

        let stored = db.get_appointment(&appointment.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Confirmed);
        assert!(stored.confirmation_sent);
    }

    #[tokio::test]
    async fn test_slots_reply_lists_open_times() {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Rita".into());
        patient.whatsapp_number = Some("5511933334444".into());
        db.create_patient(&patient).unwrap();

        let professional = NewProfessional {
            name: "Dra. Paula".into(),
            email: None,
            phone: None,
            whatsapp_number: None,
            schedule_color: "#3b82f6".into(),
            schedule_order: 0,
            receives_bookings: true,
            sees_all_appointments: false,
            email_notifications: false,
            active: true,
        }
        .into_professional();
        db.create_professional(&professional).unwrap();
        let weekday = now().date().weekday().num_days_from_monday();
        db.set_availability(
            &professional.id,
            &[AvailabilityWindow {
                professional_id: professional.id.clone(),
                day_of_week: weekday,
                start_time: "09:00".into(),
                end_time: "11:00".into(),
                is_available: true,
            }],
        )
        .unwrap();

        let slots = next_open_slots(&db, now(), 5).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].1.display, "09:00");

        let msg = upsert("5511933334444", "horários").incoming_message().unwrap();
        let reply = handle_incoming(&db, None, None, &msg, now()).await.unwrap().unwrap();
        assert!(reply.text.contains("Dra. Paula"));
    }

    #[tokio::test]
    async fn test_procedure_menu_reply() {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Rita".into());
        patient.whatsapp_number = Some("55119".into());
        db.create_patient(&patient).unwrap();
        let proc = NewProcedure {
            name: "Drenagem".into(),
            description: None,
            category: None,
            duration_minutes: 60,
            price: 120.0,
            available_for_online_booking: true,
        }
        .into_procedure();
        db.create_procedure(&proc).unwrap();

        let msg = upsert("55119", "agendar").incoming_message().unwrap();
        let reply = handle_incoming(&db, None, None, &msg, now()).await.unwrap().unwrap();
        assert!(reply.text.contains("1. Drenagem - R$ 120.00"));
    }

    #[tokio::test]
    async fn test_send_text_logs_outbound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/clinica"))
            .and(header("apikey", "evo-key"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"key": {"id": "1"}})))
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let wa = WhatsAppClient::new(
            WhatsAppConfig {
                api_url: server.uri(),
                api_key: "evo-key".into(),
                instance_name: "clinica".into(),
            },
            db.clone(),
        )
        .unwrap();

        wa.send_text("5511900000000", "Olá").await.unwrap();
        let failed = wa.send_buttons("5511900000000", "Olá", &reminder_buttons()).await;
        assert!(failed.is_err());

        let log = db.list_whatsapp_messages(10).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().any(|m| m.status == "sent" && m.message_type == "text"));
        assert!(log.iter().any(|m| m.status == "failed" && m.message_type == "buttons"));
    }

    #[test]
    fn test_canned_messages() {
        let details = AppointmentDetails {
            patient_name: "Ana".into(),
            procedure: "Botox".into(),
            date: "10/03/2026".into(),
            time: "14:00".into(),
            professional: "Dra. Paula".into(),
            address: None,
        };
        assert!(confirmation_message(&details).contains("Endereço da clínica"));
        assert!(reminder_message(&details).contains("10/03/2026 às 14:00"));
        assert_eq!(reminder_buttons().len(), 3);
        let json = serde_json::to_value(&reminder_buttons()[0]).unwrap();
        assert_eq!(json["buttonText"]["displayText"], "✅ Confirmar");
    }
}
