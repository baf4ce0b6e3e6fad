//! IA: transcrição de áudio (Whisper) e resumo de prontuários
//!
//! Fala com qualquer API compatível com OpenAI configurada em `AiConfig`.

use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use crate::config::AiConfig;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{MedicalAudioRecord, ProcessingStatus};

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const CHAT_MODEL: &str = "gpt-4-turbo-preview";

pub const FALLBACK_REPLY: &str =
    "Desculpe, não consegui processar sua mensagem. Por favor, entre em contato com nossa equipe.";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Dados do paciente usados como contexto do resumo
#[derive(Debug, Clone, Default)]
pub struct PatientContext {
    pub name: String,
    pub age: Option<u32>,
    pub history: Option<String>,
}

#[derive(Clone)]
pub struct AiClient {
    http: Client,
    config: AiConfig,
}

impl AiClient {
    pub fn new(config: AiConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self { http, config })
    }

    /// Transcreve áudio em português
    pub async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> AppResult<String> {
        let url = format!("{}/audio/transcriptions", self.config.api_url);
        let part = reqwest::multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .text("language", "pt")
            .part("file", part);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("[IA] transcrição falhou: {}", error_text);
            return Err(AppError::External(format!("Transcrição falhou: {}", error_text)));
        }

        let body: TranscriptionResponse = response.json().await?;
        Ok(body.text)
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.config.api_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": CHAT_MODEL,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user}
                ],
                "temperature": temperature,
                "max_tokens": max_tokens
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("[IA] chat falhou: {}", error_text);
            return Err(AppError::External(format!("IA indisponível: {}", error_text)));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::External("Resposta vazia da IA".to_string()))
    }

    /// Resumo estruturado do atendimento a partir da transcrição
    pub async fn summarize_medical_record(
        &self,
        transcription: &str,
        context: Option<&PatientContext>,
    ) -> AppResult<String> {
        let patient = match context {
            Some(c) => format!(
                "Dados do paciente:\nNome: {}\nIdade: {}\nHistórico: {}\n",
                c.name,
                c.age.map(|a| a.to_string()).unwrap_or_else(|| "N/A".to_string()),
                c.history.as_deref().unwrap_or("N/A")
            ),
            None => String::new(),
        };
        let prompt = format!(
            "Analise a transcrição do atendimento abaixo e crie um resumo estruturado do prontuário.\n\n\
             {}\n\
             TRANSCRIÇÃO DO ATENDIMENTO:\n{}\n\n\
             Crie um resumo estruturado contendo:\n\
             1. QUEIXA PRINCIPAL\n2. HISTÓRICO\n3. AVALIAÇÃO FÍSICA\n\
             4. PROCEDIMENTO REALIZADO/RECOMENDADO\n5. ORIENTAÇÕES PÓS-TRATAMENTO\n6. PRÓXIMOS PASSOS\n\n\
             Mantenha o formato profissional e objetivo.",
            patient, transcription
        );
        self.chat(
            "Você é um assistente médico especializado em estética.",
            &prompt,
            0.3,
            1000,
        )
        .await
    }

    /// Extrai procedimentos, medicamentos, alergias, retorno e recomendações em JSON
    pub async fn extract_key_info(&self, transcription: &str) -> AppResult<serde_json::Value> {
        let prompt = format!(
            "Extraia as seguintes informações da transcrição médica abaixo em formato JSON:\n\
             - procedimentos_mencionados: lista de procedimentos\n\
             - medicamentos: lista de medicamentos\n\
             - alergias: lista de alergias mencionadas\n\
             - proxima_consulta: data mencionada para retorno (se houver)\n\
             - recomendacoes: lista de recomendações\n\n\
             TRANSCRIÇÃO:\n{}\n\n\
             Retorne apenas o JSON, sem texto adicional.",
            transcription
        );
        let content = self
            .chat(
                "Você extrai informações estruturadas de transcrições médicas.",
                &prompt,
                0.1,
                500,
            )
            .await?;
        parse_json_reply(&content)
    }

    /// Resposta automática do bot; em caso de falha devolve mensagem padrão
    pub async fn generate_whatsapp_response(&self, context: &str, message: &str) -> String {
        let system = format!(
            "Você é a assistente virtual de uma clínica estética. {}",
            context
        );
        match self.chat(&system, message, 0.7, 300).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[IA] resposta automática falhou: {}", e);
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

/// Aceita o JSON puro ou dentro de um bloco ```json
fn parse_json_reply(content: &str) -> AppResult<serde_json::Value> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AppError::External(format!("Resposta da IA não é JSON: {}", e)))?;
    if !value.is_object() {
        return Err(AppError::External("Resposta da IA não é um objeto JSON".to_string()));
    }
    Ok(value)
}

/// Idade completa em anos na data
pub fn age_on(birth_date: &str, today: NaiveDate) -> Option<u32> {
    let birth = NaiveDate::parse_from_str(birth_date, "%Y-%m-%d").ok()?;
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

/// Áudio enviado para transcrição
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub patient_id: String,
    pub professional_id: Option<String>,
    pub appointment_id: Option<String>,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub source: String,
}

fn require_client(ai: Option<&AiClient>) -> AppResult<&AiClient> {
    ai.ok_or_else(|| AppError::External("Integração de IA não configurada".to_string()))
}

/// Salva o áudio, registra o prontuário e transcreve
///
/// O registro é criado em `processing` e termina em `completed` ou `failed`.
pub async fn transcribe_and_record(
    db: &Database,
    ai: Option<&AiClient>,
    uploads_dir: &Path,
    upload: AudioUpload,
) -> AppResult<MedicalAudioRecord> {
    let ai = require_client(ai)?;
    if upload.bytes.is_empty() {
        return Err(AppError::Validation("Arquivo de áudio vazio".to_string()));
    }

    let ext = Path::new(&upload.filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    tokio::fs::create_dir_all(uploads_dir).await?;
    let path = uploads_dir.join(format!("audio_{}{}", uuid::Uuid::new_v4(), ext));
    tokio::fs::write(&path, &upload.bytes).await?;

    let mut record = MedicalAudioRecord {
        id: uuid::Uuid::new_v4().to_string(),
        patient_id: upload.patient_id,
        professional_id: upload.professional_id,
        appointment_id: upload.appointment_id,
        audio_path: path.to_string_lossy().to_string(),
        file_size_bytes: upload.bytes.len() as i64,
        transcription: None,
        transcription_status: ProcessingStatus::Processing,
        ai_summary: None,
        summary_status: ProcessingStatus::Pending,
        extracted_info: None,
        error: None,
        source: upload.source,
        created_at: Utc::now(),
    };
    db.create_audio_record(&record)?;
    log::info!("[IA] transcrevendo áudio {} ({} bytes)", record.id, record.file_size_bytes);

    match ai.transcribe(upload.bytes, &upload.filename).await {
        Ok(text) => {
            record.transcription = Some(text);
            record.transcription_status = ProcessingStatus::Completed;
            db.update_audio_record(&record)?;
            Ok(record)
        }
        Err(e) => {
            record.transcription_status = ProcessingStatus::Failed;
            record.error = Some(e.to_string());
            db.update_audio_record(&record)?;
            Err(e)
        }
    }
}

/// Gera o resumo de um prontuário já transcrito
pub async fn summarize_record(
    db: &Database,
    ai: Option<&AiClient>,
    record_id: &str,
) -> AppResult<MedicalAudioRecord> {
    let ai = require_client(ai)?;
    let mut record = db
        .get_audio_record(record_id)?
        .ok_or_else(|| AppError::NotFound("Prontuário não encontrado".to_string()))?;
    let transcription = record
        .transcription
        .clone()
        .ok_or_else(|| AppError::Validation("Transcrição indisponível".to_string()))?;

    let context = db.get_patient(&record.patient_id)?.map(|p| PatientContext {
        age: p
            .birth_date
            .as_deref()
            .and_then(|b| age_on(b, Utc::now().date_naive())),
        name: p.full_name,
        history: p.observations,
    });

    record.summary_status = ProcessingStatus::Processing;
    db.update_audio_record(&record)?;

    match ai.summarize_medical_record(&transcription, context.as_ref()).await {
        Ok(summary) => {
            record.ai_summary = Some(summary);
            record.summary_status = ProcessingStatus::Completed;
            db.update_audio_record(&record)?;
            Ok(record)
        }
        Err(e) => {
            record.summary_status = ProcessingStatus::Failed;
            record.error = Some(e.to_string());
            db.update_audio_record(&record)?;
            Err(e)
        }
    }
}

/// Extrai as informações chave de um prontuário transcrito e as grava no registro
pub async fn extract_record_info(
    db: &Database,
    ai: Option<&AiClient>,
    record_id: &str,
) -> AppResult<MedicalAudioRecord> {
    let ai = require_client(ai)?;
    let mut record = db
        .get_audio_record(record_id)?
        .ok_or_else(|| AppError::NotFound("Prontuário não encontrado".to_string()))?;
    let transcription = record
        .transcription
        .clone()
        .ok_or_else(|| AppError::Validation("Transcrição indisponível".to_string()))?;

    let info = ai.extract_key_info(&transcription).await?;
    record.extracted_info = Some(info);
    db.update_audio_record(&record)?;
    log::info!("[IA] informações extraídas do prontuário {}", record.id);
    Ok(record)
}
