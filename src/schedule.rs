//! Agenda semanal e cálculo de horários livres

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    Appointment, AppointmentStatus, AppointmentUpdate, AvailabilityWindow, NewAppointment,
};

/// Intervalo entre inícios de horários consecutivos
pub const SLOT_STEP_MINUTES: i64 = 30;

/// Duração máxima aceita para um atendimento (um dia)
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

const GRID_START_HOUR: u32 = 8;
const GRID_END_HOUR: u32 = 20;

/// Horário livre para agendamento
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub display: String,
}

/// Rótulos de meia em meia hora da grade (08:00 até 20:00)
pub fn time_slot_labels() -> Vec<String> {
    let mut labels = Vec::new();
    for hour in GRID_START_HOUR..=GRID_END_HOUR {
        labels.push(format!("{:02}:00", hour));
        if hour < GRID_END_HOUR {
            labels.push(format!("{:02}:30", hour));
        }
    }
    labels
}

/// Domingo da semana que contém `date`
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

pub fn week_days(date: NaiveDate) -> Vec<NaiveDate> {
    let start = start_of_week(date);
    (0..7).map(|i| start + Duration::days(i)).collect()
}

/// Intervalo [domingo 00:00, sábado 23:59:59] da semana
pub fn week_range(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = start_of_week(date);
    let end = start + Duration::days(6);
    (
        start.and_time(NaiveTime::default()),
        end.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()),
    )
}

/// Agendamentos exibidos numa célula da grade (dia + rótulo "HH:MM")
pub fn appointments_for_slot<'a>(
    appointments: &'a [Appointment],
    date: NaiveDate,
    label: &str,
) -> Vec<&'a Appointment> {
    appointments
        .iter()
        .filter(|a| a.start_time.date() == date && a.start_time.format("%H:%M").to_string() == label)
        .collect()
}

pub fn parse_hhmm(value: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| AppError::Validation(format!("Horário inválido: {}", value)))
}

/// Verifica sobreposição com agendamentos não cancelados
pub fn has_conflict(
    existing: &[Appointment],
    start: NaiveDateTime,
    end: NaiveDateTime,
    ignore_id: Option<&str>,
) -> bool {
    existing.iter().any(|a| {
        a.status != AppointmentStatus::Cancelled
            && Some(a.id.as_str()) != ignore_id
            && start < a.end_time
            && a.start_time < end
    })
}

/// Horários livres de um profissional no dia
///
/// Percorre cada janela de disponibilidade do dia da semana em passos de 30
/// minutos; um horário entra se cabe inteiro na janela e não colide com
/// agendamentos existentes.
pub fn available_slots(
    windows: &[AvailabilityWindow],
    duration_minutes: i64,
    existing: &[Appointment],
    date: NaiveDate,
) -> AppResult<Vec<TimeSlot>> {
    if duration_minutes <= 0 || duration_minutes > MAX_DURATION_MINUTES {
        return Err(AppError::Validation("Duração inválida".to_string()));
    }
    let weekday = date.weekday().num_days_from_monday();
    let duration = Duration::minutes(duration_minutes);

    let mut day_windows: Vec<&AvailabilityWindow> = windows
        .iter()
        .filter(|w| w.is_available && w.day_of_week == weekday)
        .collect();
    day_windows.sort_by(|a, b| a.start_time.cmp(&b.start_time));

    let mut slots = Vec::new();
    for window in day_windows {
        let mut current = date.and_time(parse_hhmm(&window.start_time)?);
        let end = date.and_time(parse_hhmm(&window.end_time)?);

        while let Some(slot_end) = current.checked_add_signed(duration) {
            if slot_end > end {
                break;
            }
            if !has_conflict(existing, current, slot_end, None) {
                slots.push(TimeSlot {
                    start_time: current,
                    end_time: slot_end,
                    display: current.format("%H:%M").to_string(),
                });
            }
            match current.checked_add_signed(Duration::minutes(SLOT_STEP_MINUTES)) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    Ok(slots)
}

fn ensure_free(
    db: &Database,
    professional_id: Option<&str>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    ignore_id: Option<&str>,
) -> AppResult<()> {
    if end <= start {
        return Err(AppError::Validation(
            "Horário final deve ser após o inicial".to_string(),
        ));
    }
    if let Some(pid) = professional_id {
        let existing = db.professional_appointments_on(pid, start.date())?;
        if has_conflict(&existing, start, end, ignore_id) {
            return Err(AppError::Conflict("Horário indisponível".to_string()));
        }
    }
    Ok(())
}

/// Cria o agendamento se o profissional estiver livre no intervalo
pub fn book_appointment(db: &Database, req: NewAppointment) -> AppResult<Appointment> {
    ensure_free(
        db,
        req.professional_id.as_deref(),
        req.start_time,
        req.end_time,
        None,
    )?;
    let appointment = req.into_appointment();
    db.create_appointment(&appointment)?;
    log::info!(
        "Agendamento criado: {} ({})",
        appointment.id,
        appointment.start_time
    );
    Ok(appointment)
}

/// Atualização parcial; remarcação passa pela mesma checagem de conflito
pub fn update_appointment(
    db: &Database,
    id: &str,
    update: AppointmentUpdate,
) -> AppResult<Appointment> {
    let mut appointment = db
        .get_appointment(id)?
        .ok_or_else(|| AppError::NotFound("Agendamento não encontrado".to_string()))?;

    let rescheduled = update.start_time.is_some() || update.end_time.is_some();
    if let Some(start) = update.start_time {
        appointment.start_time = start;
    }
    if let Some(end) = update.end_time {
        appointment.end_time = end;
    }
    if let Some(status) = update.status {
        appointment.status = status;
    }
    if update.notes.is_some() {
        appointment.notes = update.notes;
    }

    if rescheduled {
        ensure_free(
            db,
            appointment.professional_id.as_deref(),
            appointment.start_time,
            appointment.end_time,
            Some(&appointment.id),
        )?;
    }
    db.update_appointment(&appointment)?;
    Ok(appointment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn window(day: u32, start: &str, end: &str) -> AvailabilityWindow {
        AvailabilityWindow {
            professional_id: "pro1".into(),
            day_of_week: day,
            start_time: start.into(),
            end_time: end.into(),
            is_available: true,
        }
    }

    fn booked(start: NaiveDateTime, minutes: i64, status: AppointmentStatus) -> Appointment {
        let mut a = NewAppointment {
            patient_id: "p".into(),
            professional_id: Some("pro1".into()),
            procedure_id: "proc".into(),
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            notes: None,
            source: "manual".into(),
        }
        .into_appointment();
        a.status = status;
        a
    }

    #[test]
    fn test_slot_labels() {
        let labels = time_slot_labels();
        assert_eq!(labels.len(), 25);
        assert_eq!(labels.first().unwrap(), "08:00");
        assert_eq!(labels[1], "08:30");
        assert_eq!(labels.last().unwrap(), "20:00");
    }

    #[test]
    fn test_week_starts_on_sunday() {
        // 2026-03-11 é quarta-feira
        let wed = date(2026, 3, 11);
        assert_eq!(start_of_week(wed), date(2026, 3, 8));
        let sunday = date(2026, 3, 8);
        assert_eq!(start_of_week(sunday), sunday);

        let days = week_days(wed);
        assert_eq!(days.len(), 7);
        assert_eq!(days[6], date(2026, 3, 14));

        let (start, end) = week_range(wed);
        assert_eq!(start.to_string(), "2026-03-08 00:00:00");
        assert_eq!(end.to_string(), "2026-03-14 23:59:59");
    }

    #[test]
    fn test_appointments_for_slot() {
        let d = date(2026, 3, 9);
        let list = vec![
            booked(d.and_hms_opt(9, 0, 0).unwrap(), 60, AppointmentStatus::Pending),
            booked(d.and_hms_opt(9, 30, 0).unwrap(), 30, AppointmentStatus::Pending),
            booked(date(2026, 3, 10).and_hms_opt(9, 0, 0).unwrap(), 30, AppointmentStatus::Pending),
        ];
        assert_eq!(appointments_for_slot(&list, d, "09:00").len(), 1);
        assert_eq!(appointments_for_slot(&list, d, "09:30").len(), 1);
        assert!(appointments_for_slot(&list, d, "10:00").is_empty());
    }

    #[test]
    fn test_available_slots_skip_booked_time() {
        // segunda-feira
        let d = date(2026, 3, 9);
        let windows = vec![window(0, "09:00", "11:00"), window(1, "09:00", "18:00")];
        let existing = vec![
            booked(d.and_hms_opt(9, 30, 0).unwrap(), 30, AppointmentStatus::Confirmed),
            booked(d.and_hms_opt(10, 0, 0).unwrap(), 60, AppointmentStatus::Cancelled),
        ];

        let slots = available_slots(&windows, 60, &existing, d).unwrap();
        let labels: Vec<&str> = slots.iter().map(|s| s.display.as_str()).collect();
        assert_eq!(labels, vec!["10:00"]);
        assert_eq!(slots[0].end_time, d.and_hms_opt(11, 0, 0).unwrap());
    }

    #[test]
    fn test_no_window_means_no_slots() {
        let sunday = date(2026, 3, 8);
        let windows = vec![window(0, "09:00", "12:00")];
        assert!(available_slots(&windows, 30, &[], sunday).unwrap().is_empty());
    }

    #[test]
    fn test_conflict_detection() {
        let d = date(2026, 3, 9);
        let existing = vec![booked(d.and_hms_opt(14, 0, 0).unwrap(), 60, AppointmentStatus::Pending)];
        let at = |h, m| d.and_hms_opt(h, m, 0).unwrap();

        assert!(has_conflict(&existing, at(14, 30), at(15, 30), None));
        assert!(!has_conflict(&existing, at(15, 0), at(16, 0), None));
        assert!(!has_conflict(&existing, at(13, 0), at(14, 0), None));
        assert!(!has_conflict(&existing, at(14, 0), at(15, 0), Some(&existing[0].id)));
    }

    #[test]
    fn test_invalid_duration() {
        let d = date(2026, 3, 9);
        assert!(available_slots(&[], 0, &[], d).is_err());

        let windows = vec![window(0, "09:00", "18:00")];
        for huge in [MAX_DURATION_MINUTES + 1, 1_000_000_000_000, i64::MAX] {
            assert!(matches!(
                available_slots(&windows, huge, &[], d),
                Err(AppError::Validation(_))
            ));
        }
        // um dia inteiro não cabe em nenhuma janela, mas é aceito
        assert!(available_slots(&windows, MAX_DURATION_MINUTES, &[], d)
            .unwrap()
            .is_empty());
    }

    fn request(professional: &str, start: NaiveDateTime) -> NewAppointment {
        NewAppointment {
            patient_id: "p".into(),
            professional_id: Some(professional.into()),
            procedure_id: "proc".into(),
            start_time: start,
            end_time: start + Duration::minutes(60),
            notes: None,
            source: "pwa".into(),
        }
    }

    #[test]
    fn test_book_rejects_overlap() {
        let db = Database::open_in_memory().unwrap();
        let start = date(2026, 3, 10).and_hms_opt(10, 0, 0).unwrap();
        book_appointment(&db, request("pro1", start)).unwrap();

        let clash = book_appointment(&db, request("pro1", start + Duration::minutes(30)));
        assert!(matches!(clash, Err(AppError::Conflict(_))));

        book_appointment(&db, request("pro2", start)).unwrap();
        book_appointment(&db, request("pro1", start + Duration::minutes(60))).unwrap();

        let mut inverted = request("pro1", start);
        inverted.end_time = start - Duration::minutes(1);
        assert!(matches!(book_appointment(&db, inverted), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_cancelled_slot_can_be_rebooked() {
        let db = Database::open_in_memory().unwrap();
        let start = date(2026, 3, 10).and_hms_opt(14, 0, 0).unwrap();
        let first = book_appointment(&db, request("pro1", start)).unwrap();
        update_appointment(
            &db,
            &first.id,
            AppointmentUpdate {
                status: Some(AppointmentStatus::Cancelled),
                ..Default::default()
            },
        )
        .unwrap();
        book_appointment(&db, request("pro1", start)).unwrap();
    }

    #[test]
    fn test_reschedule_checks_conflicts_but_ignores_itself() {
        let db = Database::open_in_memory().unwrap();
        let nine = date(2026, 3, 11).and_hms_opt(9, 0, 0).unwrap();
        let a = book_appointment(&db, request("pro1", nine)).unwrap();
        book_appointment(&db, request("pro1", nine + Duration::hours(2))).unwrap();

        let moved = update_appointment(
            &db,
            &a.id,
            AppointmentUpdate {
                start_time: Some(nine + Duration::minutes(30)),
                end_time: Some(nine + Duration::minutes(90)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(moved.start_time, nine + Duration::minutes(30));

        let clash = update_appointment(
            &db,
            &a.id,
            AppointmentUpdate {
                start_time: Some(nine + Duration::minutes(110)),
                end_time: Some(nine + Duration::minutes(170)),
                ..Default::default()
            },
        );
        assert!(matches!(clash, Err(AppError::Conflict(_))));
        assert!(matches!(
            update_appointment(&db, "missing", AppointmentUpdate::default()),
            Err(AppError::NotFound(_))
        ));
    }
}
