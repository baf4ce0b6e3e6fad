//! Teleconsulta: sessões e sinalização WebRTC

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{NewTelemedicineSession, SessionStatus, TelemedicineSession};

const ROOM_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionWithLinks {
    pub session: TelemedicineSession,
    pub join_url_patient: String,
    pub join_url_professional: String,
}

pub fn join_url(room_id: &str, role: &str) -> String {
    format!("/telemedicine/join/{}?role={}", room_id, role)
}

pub fn create_session(db: &Database, req: NewTelemedicineSession) -> AppResult<SessionWithLinks> {
    if req.appointment_id.is_empty() || req.patient_id.is_empty() || req.professional_id.is_empty() {
        return Err(AppError::Validation(
            "Agendamento, paciente e profissional são obrigatórios".to_string(),
        ));
    }
    let room_id = uuid::Uuid::new_v4().to_string();
    let session = TelemedicineSession {
        id: uuid::Uuid::new_v4().to_string(),
        appointment_id: req.appointment_id,
        patient_id: req.patient_id,
        professional_id: req.professional_id,
        room_id: room_id.clone(),
        status: SessionStatus::Scheduled,
        started_at: None,
        ended_at: None,
        duration_minutes: None,
        notes: None,
        created_at: Utc::now(),
    };
    db.create_telemedicine_session(&session)?;
    log::info!("[Teleconsulta] sala criada: {}", room_id);

    Ok(SessionWithLinks {
        session,
        join_url_patient: join_url(&room_id, "patient"),
        join_url_professional: join_url(&room_id, "professional"),
    })
}

pub fn get_session(db: &Database, id: &str) -> AppResult<TelemedicineSession> {
    db.get_telemedicine_session(id)?
        .ok_or_else(|| AppError::NotFound("Sessão não encontrada".to_string()))
}

pub fn start_session(db: &Database, id: &str) -> AppResult<TelemedicineSession> {
    let mut session = get_session(db, id)?;
    if session.status == SessionStatus::Completed {
        return Err(AppError::Conflict("Sessão já encerrada".to_string()));
    }
    session.status = SessionStatus::InProgress;
    session.started_at = Some(Utc::now());
    db.update_telemedicine_session(&session)?;
    Ok(session)
}

/// Encerra a sessão; duração em minutos inteiros a partir do início (0 se não iniciada)
pub fn end_session(db: &Database, id: &str, notes: Option<String>) -> AppResult<TelemedicineSession> {
    let mut session = get_session(db, id)?;
    let ended = Utc::now();
    let duration = session
        .started_at
        .map(|started| (ended - started).num_minutes().max(0))
        .unwrap_or(0);

    session.status = SessionStatus::Completed;
    session.ended_at = Some(ended);
    session.duration_minutes = Some(duration);
    session.notes = notes;
    db.update_telemedicine_session(&session)?;
    log::info!("[Teleconsulta] sessão {} encerrada ({} min)", id, duration);
    Ok(session)
}

// ============ Sinalização ============

#[derive(Debug, Clone)]
struct Signal {
    from: String,
    payload: String,
}

/// Salas de sinalização em memória; cada mensagem vai para os demais participantes
#[derive(Clone, Default)]
pub struct SignalingHub {
    rooms: Arc<Mutex<HashMap<String, broadcast::Sender<Signal>>>>,
}

pub struct Participant {
    pub id: String,
    pub room_id: String,
    tx: broadcast::Sender<Signal>,
    rx: broadcast::Receiver<Signal>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room_id: &str) -> AppResult<Participant> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|e| AppError::Custom(format!("Lock error: {}", e)))?;
        let tx = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        Ok(Participant {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            tx,
            rx,
        })
    }

    pub fn leave(&self, participant: Participant) {
        let room_id = participant.room_id.clone();
        drop(participant);
        if let Ok(mut rooms) = self.rooms.lock() {
            if rooms
                .get(&room_id)
                .map(|tx| tx.receiver_count() == 0)
                .unwrap_or(false)
            {
                rooms.remove(&room_id);
                log::debug!("[Teleconsulta] sala {} vazia, removida", room_id);
            }
        }
    }

    pub fn participants(&self, room_id: &str) -> usize {
        self.rooms
            .lock()
            .ok()
            .and_then(|rooms| rooms.get(room_id).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

impl Participant {
    /// Repassa a mensagem aos outros participantes da sala
    pub fn send(&self, payload: String) {
        // sem outros participantes a mensagem é descartada
        let _ = self.tx.send(Signal {
            from: self.id.clone(),
            payload,
        });
    }

    /// Próxima mensagem de outro participante; `None` quando a sala fecha
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(signal) if signal.from == self.id => continue,
                Ok(signal) => return Some(signal.payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[Teleconsulta] {} mensagens perdidas na sala {}", skipped, self.room_id);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(db: &Database) -> SessionWithLinks {
        create_session(
            db,
            NewTelemedicineSession {
                appointment_id: "a1".into(),
                patient_id: "p1".into(),
                professional_id: "pr1".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_session_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let created = new_session(&db);
        assert_eq!(created.session.status, SessionStatus::Scheduled);
        assert_eq!(
            created.join_url_patient,
            format!("/telemedicine/join/{}?role=patient", created.session.room_id)
        );

        let started = start_session(&db, &created.session.id).unwrap();
        assert_eq!(started.status, SessionStatus::InProgress);
        assert!(started.started_at.is_some());

        let ended = end_session(&db, &created.session.id, Some("Retorno em 30 dias".into())).unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.duration_minutes, Some(0));
        assert_eq!(get_session(&db, &created.session.id).unwrap().notes.as_deref(), Some("Retorno em 30 dias"));

        assert!(matches!(start_session(&db, &created.session.id), Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_end_without_start() {
        let db = Database::open_in_memory().unwrap();
        let created = new_session(&db);
        let ended = end_session(&db, &created.session.id, None).unwrap();
        assert_eq!(ended.duration_minutes, Some(0));
        assert!(matches!(get_session(&db, "nope"), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let hub = SignalingHub::new();
        let mut patient = hub.join("sala-1").unwrap();
        let mut doctor = hub.join("sala-1").unwrap();
        let other_room = hub.join("sala-2").unwrap();
        assert_eq!(hub.participants("sala-1"), 2);

        patient.send(r#"{"type":"offer"}"#.into());
        doctor.send(r#"{"type":"answer"}"#.into());

        assert_eq!(doctor.recv().await.as_deref(), Some(r#"{"type":"offer"}"#));
        assert_eq!(patient.recv().await.as_deref(), Some(r#"{"type":"answer"}"#));

        other_room.send("ping".into());
        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), doctor.recv()).await;
        assert!(nothing.is_err());

        hub.leave(patient);
        assert_eq!(hub.participants("sala-1"), 1);
        hub.leave(doctor);
        assert_eq!(hub.participants("sala-1"), 0);
    }
}
