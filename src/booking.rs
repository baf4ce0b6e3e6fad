//! Assistente de agendamento do app do paciente
//!
//! Quatro passos em ordem: procedimento, data, horário e confirmação. O estado
//! vive só em memória; voltar um passo descarta as escolhas seguintes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{NewAppointment, Procedure};
use crate::schedule::TimeSlot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    Procedure,
    Date,
    Slot,
    Confirm,
}

#[derive(Debug, Clone)]
pub struct BookingWizard {
    step: BookingStep,
    procedure: Option<Procedure>,
    date: Option<NaiveDate>,
    slot: Option<TimeSlot>,
    professional_id: Option<String>,
}

impl Default for BookingWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingWizard {
    pub fn new() -> Self {
        Self {
            step: BookingStep::Procedure,
            procedure: None,
            date: None,
            slot: None,
            professional_id: None,
        }
    }

    pub fn step(&self) -> BookingStep {
        self.step
    }

    pub fn procedure(&self) -> Option<&Procedure> {
        self.procedure.as_ref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn slot(&self) -> Option<&TimeSlot> {
        self.slot.as_ref()
    }

    fn expect_step(&self, step: BookingStep) -> AppResult<()> {
        if self.step != step {
            return Err(AppError::Validation(format!(
                "Passo fora de ordem: esperado {:?}, atual {:?}",
                step, self.step
            )));
        }
        Ok(())
    }

    pub fn choose_procedure(&mut self, procedure: Procedure) -> AppResult<()> {
        self.expect_step(BookingStep::Procedure)?;
        if !procedure.active || !procedure.available_for_online_booking {
            return Err(AppError::Validation(
                "Procedimento indisponível para agendamento online".to_string(),
            ));
        }
        self.procedure = Some(procedure);
        self.step = BookingStep::Date;
        Ok(())
    }

    /// Escolhe a data; datas passadas são recusadas
    pub fn choose_date(&mut self, date: NaiveDate, today: NaiveDate) -> AppResult<()> {
        self.expect_step(BookingStep::Date)?;
        if date < today {
            return Err(AppError::Validation("Data no passado".to_string()));
        }
        self.date = Some(date);
        self.step = BookingStep::Slot;
        Ok(())
    }

    /// Escolhe um horário da lista devolvida pela API
    pub fn choose_slot(&mut self, slot: TimeSlot, professional_id: Option<String>) -> AppResult<()> {
        self.expect_step(BookingStep::Slot)?;
        if Some(slot.start_time.date()) != self.date {
            return Err(AppError::Validation(
                "Horário não pertence à data escolhida".to_string(),
            ));
        }
        self.slot = Some(slot);
        self.professional_id = professional_id;
        self.step = BookingStep::Confirm;
        Ok(())
    }

    /// Volta um passo, limpando o que foi escolhido a partir dele
    pub fn back(&mut self) {
        self.step = match self.step {
            BookingStep::Procedure | BookingStep::Date => BookingStep::Procedure,
            BookingStep::Slot => BookingStep::Date,
            BookingStep::Confirm => BookingStep::Slot,
        };
        if self.step <= BookingStep::Slot {
            self.slot = None;
            self.professional_id = None;
        }
        if self.step <= BookingStep::Date {
            self.date = None;
        }
        if self.step == BookingStep::Procedure {
            self.procedure = None;
        }
    }

    /// Gera o pedido de agendamento para envio à API
    pub fn confirm(&self, patient_id: &str, notes: Option<String>) -> AppResult<NewAppointment> {
        self.expect_step(BookingStep::Confirm)?;
        let (procedure, slot) = match (&self.procedure, &self.slot) {
            (Some(p), Some(s)) => (p, s),
            _ => return Err(AppError::Validation("Agendamento incompleto".to_string())),
        };
        Ok(NewAppointment {
            patient_id: patient_id.to_string(),
            professional_id: self.professional_id.clone(),
            procedure_id: procedure.id.clone(),
            start_time: slot.start_time,
            end_time: slot.end_time,
            notes,
            source: "pwa".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProcedure;

    fn procedure() -> Procedure {
        NewProcedure {
            name: "Limpeza de pele".into(),
            description: None,
            category: Some("Facial".into()),
            duration_minutes: 60,
            price: 180.0,
            available_for_online_booking: true,
        }
        .into_procedure()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn slot(d: u32, hour: u32) -> TimeSlot {
        let start = day(d).and_hms_opt(hour, 0, 0).unwrap();
        TimeSlot {
            start_time: start,
            end_time: start + chrono::Duration::minutes(60),
            display: format!("{:02}:00", hour),
        }
    }

    #[test]
    fn test_full_flow() {
        let mut wizard = BookingWizard::new();
        let proc = procedure();
        wizard.choose_procedure(proc.clone()).unwrap();
        wizard.choose_date(day(10), day(1)).unwrap();
        wizard.choose_slot(slot(10, 14), Some("pro1".into())).unwrap();
        assert_eq!(wizard.step(), BookingStep::Confirm);

        let req = wizard.confirm("pat1", None).unwrap();
        assert_eq!(req.procedure_id, proc.id);
        assert_eq!(req.professional_id.as_deref(), Some("pro1"));
        assert_eq!(req.source, "pwa");
        assert_eq!(req.start_time, day(10).and_hms_opt(14, 0, 0).unwrap());
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut wizard = BookingWizard::new();
        assert!(wizard.choose_date(day(10), day(1)).is_err());
        assert!(wizard.confirm("pat1", None).is_err());
    }

    #[test]
    fn test_back_clears_later_choices() {
        let mut wizard = BookingWizard::new();
        wizard.choose_procedure(procedure()).unwrap();
        wizard.choose_date(day(10), day(1)).unwrap();
        wizard.choose_slot(slot(10, 9), None).unwrap();

        wizard.back();
        assert_eq!(wizard.step(), BookingStep::Slot);
        assert!(wizard.slot().is_none());
        assert_eq!(wizard.date(), Some(day(10)));

        wizard.back();
        assert_eq!(wizard.step(), BookingStep::Date);
        assert!(wizard.date().is_none());
        assert!(wizard.procedure().is_some());
    }

    #[test]
    fn test_past_date_and_foreign_slot() {
        let mut wizard = BookingWizard::new();
        wizard.choose_procedure(procedure()).unwrap();
        assert!(wizard.choose_date(day(1), day(5)).is_err());
        wizard.choose_date(day(10), day(5)).unwrap();
        assert!(wizard.choose_slot(slot(11, 9), None).is_err());
        assert_eq!(wizard.step(), BookingStep::Slot);
    }
}
