//! Automação de mensagens
//!
//! Regras com gatilho por agendamento ou data do paciente. O agendador roda em
//! segundo plano e envia cada mensagem uma única vez por alvo.

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    Appointment, AppointmentQuery, AppointmentStatus, AutomationLog, AutomationRule,
    AutomationRuleUpdate, NewAutomationRule, Patient, TriggerType,
};
use crate::whatsapp::WhatsAppClient;

/// Janela para trás na busca de atendimentos concluídos
const FOLLOW_UP_LOOKBACK_DAYS: i64 = 7;

// ============ Modelos de mensagem ============

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageTemplate {
    pub trigger_type: TriggerType,
    pub body: &'static str,
}

const CONFIRMATION_TEMPLATE: &str = "Olá {{nome}}! 👋

Seu agendamento está confirmado:
📅 Data: {{data}}
🕐 Horário: {{horario}}
💅 Procedimento: {{procedimento}}

Estamos te esperando! ✨";

const REMINDER_TEMPLATE: &str = "Oi {{nome}}! 👋

Lembrete: Você tem um procedimento amanhã!
📅 {{data}} às {{horario}}
💅 {{procedimento}}

Nos vemos lá! 💖";

const FOLLOW_UP_TEMPLATE: &str = "Oi {{nome}}! 💕

Como você está se sentindo após o procedimento de {{procedimento}}?

Qualquer dúvida, estou aqui! 😊";

const BIRTHDAY_TEMPLATE: &str = "Parabéns, {{nome}}! 🎉🎂

Hoje é seu dia especial!
Temos um presente para você: 20% OFF em qualquer procedimento este mês!

Agende já! 💖";

const PROMOTION_TEMPLATE: &str = "Oi {{nome}}! ✨

Promoção especial para você:
{{promocao}}

Válido até {{data_validade}}

Agende já! 💅";

pub fn template_library() -> Vec<MessageTemplate> {
    TriggerType::all()
        .into_iter()
        .map(|trigger_type| MessageTemplate {
            trigger_type,
            body: template_for(trigger_type),
        })
        .collect()
}

pub fn template_for(trigger: TriggerType) -> &'static str {
    match trigger {
        TriggerType::AppointmentConfirmation => CONFIRMATION_TEMPLATE,
        TriggerType::AppointmentReminder => REMINDER_TEMPLATE,
        TriggerType::FollowUp => FOLLOW_UP_TEMPLATE,
        TriggerType::Birthday => BIRTHDAY_TEMPLATE,
        TriggerType::Promotion => PROMOTION_TEMPLATE,
    }
}

/// Substitui `{{chave}}` e `{chave}` pelos valores informados
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut message = template.to_string();
    for (key, value) in vars {
        message = message.replace(&format!("{{{{{}}}}}", key), value);
        message = message.replace(&format!("{{{}}}", key), value);
    }
    message
}

/// Texto da antecedência: "1 dia(s) antes", "3 hora(s) antes"...
pub fn describe_offset(minutes: i64) -> String {
    fn amount(minutes: i64, unit: i64) -> String {
        if minutes % unit == 0 {
            (minutes / unit).to_string()
        } else {
            format!("{:.1}", minutes as f64 / unit as f64)
        }
    }
    if minutes <= 0 {
        "Imediatamente".to_string()
    } else if minutes >= 1440 {
        format!("{} dia(s) antes", amount(minutes, 1440))
    } else if minutes >= 60 {
        format!("{} hora(s) antes", amount(minutes, 60))
    } else {
        format!("{} minuto(s) antes", minutes)
    }
}

// ============ Regras ============

fn validate_rule(rule: &AutomationRule) -> AppResult<()> {
    if rule.name.trim().is_empty() {
        return Err(AppError::Validation("Nome da regra é obrigatório".to_string()));
    }
    if rule.message_template.trim().is_empty() {
        return Err(AppError::Validation("Mensagem é obrigatória".to_string()));
    }
    if rule.trigger_offset_minutes < 0 {
        return Err(AppError::Validation("Antecedência inválida".to_string()));
    }
    Ok(())
}

pub fn create_rule(db: &Database, req: NewAutomationRule) -> AppResult<AutomationRule> {
    let rule = req.into_rule();
    validate_rule(&rule)?;
    db.create_automation_rule(&rule)?;
    log::info!("[Automação] regra criada: {}", rule.name);
    Ok(rule)
}

pub fn update_rule(
    db: &Database,
    id: &str,
    update: AutomationRuleUpdate,
) -> AppResult<AutomationRule> {
    let mut rule = db
        .get_automation_rule(id)?
        .ok_or_else(|| AppError::NotFound("Regra não encontrada".to_string()))?;
    update.apply(&mut rule);
    validate_rule(&rule)?;
    db.update_automation_rule(&rule)?;
    Ok(rule)
}

/// Dados de teste: `phone` opcional e variáveis do modelo
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestRuleRequest {
    pub phone: Option<String>,
    #[serde(flatten)]
    pub vars: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TestRuleResult {
    pub message: String,
    pub sent: bool,
}

/// Renderiza a regra; envia para o telefone de teste quando informado
pub async fn test_rule(
    db: &Database,
    wa: Option<&WhatsAppClient>,
    rule_id: &str,
    req: TestRuleRequest,
) -> AppResult<TestRuleResult> {
    let rule = db
        .get_automation_rule(rule_id)?
        .ok_or_else(|| AppError::NotFound("Regra não encontrada".to_string()))?;

    let vars: HashMap<String, String> = req
        .vars
        .into_iter()
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, text)
        })
        .collect();
    let message = render_template(&rule.message_template, &vars);

    match req.phone {
        Some(phone) => {
            let wa = wa.ok_or_else(|| AppError::External("WhatsApp não configurado".to_string()))?;
            wa.send_text(&phone, &message).await?;
            Ok(TestRuleResult { message, sent: true })
        }
        None => Ok(TestRuleResult {
            message,
            sent: false,
        }),
    }
}

// ============ Seleção de destinatários ============

/// Mensagem pronta para envio
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub target_id: String,
    pub phone: String,
    pub message: String,
}

fn contact_phone(patient: &Patient) -> Option<String> {
    patient
        .whatsapp_number
        .clone()
        .or_else(|| patient.phone.clone())
        .filter(|p| !p.trim().is_empty())
}

fn appointment_message(
    db: &Database,
    rule: &AutomationRule,
    appointment: &Appointment,
) -> AppResult<Option<PendingMessage>> {
    let patient = match db.get_patient(&appointment.patient_id)? {
        Some(p) => p,
        None => return Ok(None),
    };
    let phone = match contact_phone(&patient) {
        Some(p) => p,
        None => {
            log::debug!("[Automação] paciente {} sem telefone", patient.id);
            return Ok(None);
        }
    };
    let procedure = db
        .get_procedure(&appointment.procedure_id)?
        .map(|p| p.name)
        .unwrap_or_default();

    let vars = HashMap::from([
        ("nome".to_string(), patient.full_name),
        (
            "data".to_string(),
            appointment.start_time.format("%d/%m/%Y").to_string(),
        ),
        (
            "horario".to_string(),
            appointment.start_time.format("%H:%M").to_string(),
        ),
        ("procedimento".to_string(), procedure),
    ]);
    Ok(Some(PendingMessage {
        target_id: appointment.id.clone(),
        phone,
        message: render_template(&rule.message_template, &vars),
    }))
}

/// Mensagens devidas por uma regra no instante `now`, já sem os alvos atendidos
pub fn due_messages(
    db: &Database,
    rule: &AutomationRule,
    now: NaiveDateTime,
) -> AppResult<Vec<PendingMessage>> {
    let offset = ChronoDuration::minutes(rule.trigger_offset_minutes);
    let mut candidates: Vec<Appointment> = Vec::new();
    let mut out = Vec::new();

    match rule.trigger_type {
        TriggerType::AppointmentConfirmation => {
            candidates = db
                .list_appointments(&AppointmentQuery {
                    start_date: Some(now),
                    ..Default::default()
                })?
                .into_iter()
                .filter(|a| {
                    !a.confirmation_sent
                        && matches!(
                            a.status,
                            AppointmentStatus::Pending | AppointmentStatus::Confirmed
                        )
                })
                .collect();
        }
        TriggerType::AppointmentReminder => {
            candidates = db
                .list_appointments(&AppointmentQuery {
                    start_date: Some(now),
                    end_date: Some(now + offset),
                    ..Default::default()
                })?
                .into_iter()
                .filter(|a| {
                    a.status != AppointmentStatus::Cancelled
                        && a.start_time - offset <= now
                        && now < a.start_time
                })
                .collect();
        }
        TriggerType::FollowUp => {
            candidates = db
                .list_appointments(&AppointmentQuery {
                    status: Some(AppointmentStatus::Completed),
                    start_date: Some(now - offset - ChronoDuration::days(FOLLOW_UP_LOOKBACK_DAYS)),
                    end_date: Some(now),
                    ..Default::default()
                })?
                .into_iter()
                .filter(|a| a.end_time + offset <= now)
                .collect();
        }
        TriggerType::Birthday => {
            let today = now.date();
            for patient in db.list_birthday_patients(today)? {
                // um envio por ano
                let target_id = format!("{}:{}", patient.id, today.year());
                if db.has_automation_log(&rule.id, &target_id)? {
                    continue;
                }
                if let Some(phone) = contact_phone(&patient) {
                    let vars = HashMap::from([("nome".to_string(), patient.full_name.clone())]);
                    out.push(PendingMessage {
                        target_id,
                        phone,
                        message: render_template(&rule.message_template, &vars),
                    });
                }
            }
        }
        // promoções são disparadas manualmente
        TriggerType::Promotion => {}
    }

    for appointment in &candidates {
        if db.has_automation_log(&rule.id, &appointment.id)? {
            continue;
        }
        if let Some(msg) = appointment_message(db, rule, appointment)? {
            out.push(msg);
        }
    }
    Ok(out)
}

// ============ Agendador ============

#[derive(Clone)]
pub struct AutomationScheduler {
    db: Database,
    whatsapp: Option<WhatsAppClient>,
    is_running: Arc<RwLock<bool>>,
}

impl AutomationScheduler {
    pub fn new(db: Database, whatsapp: Option<WhatsAppClient>) -> Self {
        Self {
            db,
            whatsapp,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn start(&self) {
        let mut running = self.is_running.write().await;
        *running = true;
        log::info!("[Automação] agendador iniciado");
    }

    pub async fn stop(&self) {
        let mut running = self.is_running.write().await;
        *running = false;
        log::info!("[Automação] agendador parado");
    }

    /// Processa todas as regras ativas; devolve quantas mensagens foram enviadas
    pub async fn run_once(&self, now: NaiveDateTime) -> AppResult<usize> {
        let wa = match self.whatsapp.as_ref() {
            Some(wa) => wa,
            None => {
                log::debug!("[Automação] WhatsApp não configurado, nada a enviar");
                return Ok(0);
            }
        };

        let mut sent = 0;
        for rule in self.db.list_automation_rules(true)? {
            let pending = match due_messages(&self.db, &rule, now) {
                Ok(p) => p,
                Err(e) => {
                    log::error!("[Automação] regra {} falhou: {}", rule.name, e);
                    continue;
                }
            };

            for msg in pending {
                let ok = wa.send_text(&msg.phone, &msg.message).await.is_ok();
                if ok {
                    sent += 1;
                    if rule.trigger_type == TriggerType::AppointmentConfirmation {
                        self.db.mark_confirmation_sent(&msg.target_id)?;
                    }
                }
                self.db.create_automation_log(&AutomationLog {
                    id: uuid::Uuid::new_v4().to_string(),
                    rule_id: rule.id.clone(),
                    rule_name: None,
                    target_id: msg.target_id,
                    phone: Some(msg.phone),
                    message: msg.message,
                    status: if ok { "sent" } else { "failed" }.to_string(),
                    created_at: Utc::now(),
                })?;
            }
        }
        if sent > 0 {
            log::info!("[Automação] {} mensagem(ns) enviada(s)", sent);
        }
        Ok(sent)
    }
}

/// Laço em segundo plano iniciado junto com o servidor
pub async fn run_scheduler(scheduler: AutomationScheduler, interval_secs: u64) {
    scheduler.start().await;
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        ticker.tick().await;

        if !scheduler.is_running().await {
            log::info!("[Automação] sinal de parada recebido, encerrando");
            break;
        }

        if let Err(e) = scheduler.run_once(Local::now().naive_local()).await {
            log::error!("[Automação] erro na execução: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhatsAppConfig;
    use crate::models::{NewAppointment, NewProcedure};
    use chrono::NaiveDate;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn rule(db: &Database, trigger: TriggerType, offset: i64) -> AutomationRule {
        create_rule(
            db,
            NewAutomationRule {
                name: format!("regra {}", trigger.as_str()),
                trigger_type: trigger,
                trigger_offset_minutes: offset,
                channel: "whatsapp".into(),
                message_template: template_for(trigger).into(),
                webhook_url: None,
                is_active: true,
            },
        )
        .unwrap()
    }

    fn patient(db: &Database, name: &str, phone: &str) -> Patient {
        let mut p = Patient::new(name.into());
        p.whatsapp_number = Some(phone.into());
        db.create_patient(&p).unwrap();
        p
    }

    fn appointment(
        db: &Database,
        patient_id: &str,
        procedure_id: &str,
        start: NaiveDateTime,
        status: AppointmentStatus,
    ) -> Appointment {
        let mut a = NewAppointment {
            patient_id: patient_id.into(),
            professional_id: None,
            procedure_id: procedure_id.into(),
            start_time: start,
            end_time: start + ChronoDuration::minutes(60),
            notes: None,
            source: "manual".into(),
        }
        .into_appointment();
        a.status = status;
        db.create_appointment(&a).unwrap();
        a
    }

    #[test]
    fn test_render_template_both_styles() {
        let vars = HashMap::from([
            ("nome".to_string(), "Ana".to_string()),
            ("data".to_string(), "10/05".to_string()),
        ]);
        assert_eq!(
            render_template("Oi {{nome}}, dia {data} {x}", &vars),
            "Oi Ana, dia 10/05 {x}"
        );
    }

    #[test]
    fn test_describe_offset() {
        assert_eq!(describe_offset(0), "Imediatamente");
        assert_eq!(describe_offset(30), "30 minuto(s) antes");
        assert_eq!(describe_offset(180), "3 hora(s) antes");
        assert_eq!(describe_offset(2880), "2 dia(s) antes");
        assert_eq!(describe_offset(2160), "1.5 dia(s) antes");
    }

    #[test]
    fn test_library_has_every_trigger() {
        let lib = template_library();
        assert_eq!(lib.len(), 5);
        assert!(template_for(TriggerType::Promotion).contains("{{data_validade}}"));
    }

    #[test]
    fn test_rule_validation() {
        let db = Database::open_in_memory().unwrap();
        let err = create_rule(
            &db,
            NewAutomationRule {
                name: " ".into(),
                trigger_type: TriggerType::Birthday,
                trigger_offset_minutes: 0,
                channel: "whatsapp".into(),
                message_template: "x".into(),
                webhook_url: None,
                is_active: true,
            },
        );
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_reminder_window() {
        let db = Database::open_in_memory().unwrap();
        let r = rule(&db, TriggerType::AppointmentReminder, 1440);
        let p = patient(&db, "Ana", "5511900000001");
        let proc = NewProcedure {
            name: "Limpeza de pele".into(),
            description: None,
            category: None,
            duration_minutes: 60,
            price: 150.0,
            available_for_online_booking: true,
        }
        .into_procedure();
        db.create_procedure(&proc).unwrap();

        let due = appointment(&db, &p.id, &proc.id, now() + ChronoDuration::hours(20), AppointmentStatus::Pending);
        appointment(&db, &p.id, &proc.id, now() + ChronoDuration::hours(30), AppointmentStatus::Pending);
        appointment(&db, &p.id, &proc.id, now() + ChronoDuration::hours(2), AppointmentStatus::Cancelled);

        let msgs = due_messages(&db, &r, now()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].target_id, due.id);
        assert!(msgs[0].message.contains("Oi Ana!"));
        assert!(msgs[0].message.contains("Limpeza de pele"));
        assert!(msgs[0].message.contains("11/05/2026 às 05:00"));
    }

    #[test]
    fn test_follow_up_after_offset() {
        let db = Database::open_in_memory().unwrap();
        let r = rule(&db, TriggerType::FollowUp, 120);
        let p = patient(&db, "Bia", "5511900000002");
        // terminou há 3h
        let done = appointment(&db, &p.id, "x", now() - ChronoDuration::hours(4), AppointmentStatus::Completed);
        // terminou há 30min
        appointment(&db, &p.id, "x", now() - ChronoDuration::minutes(90), AppointmentStatus::Completed);
        appointment(&db, &p.id, "x", now() - ChronoDuration::hours(5), AppointmentStatus::Confirmed);

        let msgs = due_messages(&db, &r, now()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].target_id, done.id);
    }

    #[test]
    fn test_birthday_targets() {
        let db = Database::open_in_memory().unwrap();
        let r = rule(&db, TriggerType::Birthday, 0);
        let mut p = Patient::new("Carla".into());
        p.whatsapp_number = Some("5511900000003".into());
        p.birth_date = Some("1990-05-10".into());
        db.create_patient(&p).unwrap();

        let msgs = due_messages(&db, &r, now()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].target_id, format!("{}:2026", p.id));
        assert!(msgs[0].message.starts_with("Parabéns, Carla!"));
    }

    #[tokio::test]
    async fn test_run_once_sends_each_target_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/clinica"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let r = rule(&db, TriggerType::AppointmentConfirmation, 0);
        let p = patient(&db, "Duda", "5511900000004");
        let a = appointment(&db, &p.id, "x", now() + ChronoDuration::days(3), AppointmentStatus::Pending);

        let wa = WhatsAppClient::new(
            WhatsAppConfig {
                api_url: server.uri(),
                api_key: "k".into(),
                instance_name: "clinica".into(),
            },
            db.clone(),
        )
        .unwrap();
        let scheduler = AutomationScheduler::new(db.clone(), Some(wa));

        assert_eq!(scheduler.run_once(now()).await.unwrap(), 1);
        assert_eq!(scheduler.run_once(now()).await.unwrap(), 0);

        let logs = db.list_automation_logs(Some(&r.id), 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "sent");
        assert!(db.get_appointment(&a.id).unwrap().unwrap().confirmation_sent);
    }

    #[tokio::test]
    async fn test_scheduler_start_stop() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = AutomationScheduler::new(db, None);
        assert!(!scheduler.is_running().await);
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        assert_eq!(scheduler.run_once(now()).await.unwrap(), 0);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_rule_renders_without_phone() {
        let db = Database::open_in_memory().unwrap();
        let r = rule(&db, TriggerType::Promotion, 0);
        let req: TestRuleRequest = serde_json::from_value(serde_json::json!({
            "nome": "Eva",
            "promocao": "Peeling 30% OFF",
            "data_validade": "31/05"
        }))
        .unwrap();
        let result = test_rule(&db, None, &r.id, req).await.unwrap();
        assert!(!result.sent);
        assert!(result.message.contains("Peeling 30% OFF"));
        assert!(result.message.contains("Válido até 31/05"));

        let with_phone = TestRuleRequest {
            phone: Some("5511".into()),
            vars: HashMap::new(),
        };
        assert!(matches!(
            test_rule(&db, None, &r.id, with_phone).await,
            Err(AppError::External(_))
        ));
    }
}
