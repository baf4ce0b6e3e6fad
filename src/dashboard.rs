//! Indicadores do painel

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::db::Database;
use crate::error::AppResult;
use crate::models::{
    round_currency, Appointment, AppointmentQuery, AppointmentStatus, FinancialQuery,
    RecordStatus, RecordType,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub appointments_today: usize,
    pub revenue_month: f64,
    pub new_patients_month: i64,
    pub upcoming_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenuePoint {
    pub month: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureCount {
    pub name: String,
    pub count: usize,
}

pub fn stats(db: &Database, now: NaiveDateTime) -> AppResult<DashboardStats> {
    let today = now.date();
    let month_start = today.with_day(1).unwrap_or(today);

    let day_start = today.and_hms_opt(0, 0, 0).unwrap_or(now);
    let day_end = today.and_hms_opt(23, 59, 59).unwrap_or(now);
    let appointments_today = db
        .list_appointments(&AppointmentQuery {
            start_date: Some(day_start),
            end_date: Some(day_end),
            ..Default::default()
        })?
        .into_iter()
        .filter(|a| a.status != AppointmentStatus::Cancelled)
        .count();

    let revenue_month = db
        .list_financial_records(&FinancialQuery {
            record_type: Some(RecordType::Income),
            status: Some(RecordStatus::Paid),
            start_date: Some(month_start),
            ..Default::default()
        })?
        .iter()
        .map(|r| r.amount)
        .sum::<f64>();

    let month_start_utc = Utc.from_utc_datetime(&month_start.and_hms_opt(0, 0, 0).unwrap_or(now));
    let new_patients_month = db.count_patients_created_since(month_start_utc)?;

    let upcoming_appointments = db
        .list_appointments(&AppointmentQuery {
            start_date: Some(now),
            ..Default::default()
        })?
        .into_iter()
        .filter(|a| a.status != AppointmentStatus::Cancelled)
        .take(5)
        .collect();

    Ok(DashboardStats {
        appointments_today,
        revenue_month: round_currency(revenue_month),
        new_patients_month,
        upcoming_appointments,
    })
}

/// Limite de meses do gráfico de receita
pub const MAX_CHART_MONTHS: u32 = 120;

/// Receita paga agrupada por mês (YYYY-MM) nos últimos `months` meses (até 120)
pub fn revenue_chart(db: &Database, months: u32, today: NaiveDate) -> AppResult<Vec<RevenuePoint>> {
    let months = months.min(MAX_CHART_MONTHS);
    let start = today
        .checked_sub_signed(Duration::days(months as i64 * 30))
        .unwrap_or(NaiveDate::MIN);
    let records = db.list_financial_records(&FinancialQuery {
        record_type: Some(RecordType::Income),
        status: Some(RecordStatus::Paid),
        start_date: Some(start),
        ..Default::default()
    })?;

    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();
    for r in records {
        *by_month.entry(r.date.format("%Y-%m").to_string()).or_insert(0.0) += r.amount;
    }
    Ok(by_month
        .into_iter()
        .map(|(month, value)| RevenuePoint {
            month,
            value: round_currency(value),
        })
        .collect())
}

/// Procedimentos com mais agendamentos não cancelados
pub fn top_procedures(db: &Database, limit: usize) -> AppResult<Vec<ProcedureCount>> {
    let names: HashMap<String, String> = db
        .list_procedures(false)?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for a in db.list_appointments(&AppointmentQuery::default())? {
        if a.status == AppointmentStatus::Cancelled {
            continue;
        }
        if let Some(name) = names.get(&a.procedure_id) {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<ProcedureCount> = counts
        .into_iter()
        .map(|(name, count)| ProcedureCount { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(limit);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAppointment, NewFinancialRecord, NewProcedure, Patient, Procedure};

    fn add_procedure(db: &Database, name: &str) -> Procedure {
        let p = NewProcedure {
            name: name.into(),
            description: None,
            category: None,
            duration_minutes: 30,
            price: 100.0,
            available_for_online_booking: true,
        }
        .into_procedure();
        db.create_procedure(&p).unwrap();
        p
    }

    fn add_appointment(db: &Database, procedure_id: &str, start: NaiveDateTime, status: AppointmentStatus) {
        let mut a = NewAppointment {
            patient_id: "p1".into(),
            professional_id: None,
            procedure_id: procedure_id.into(),
            start_time: start,
            end_time: start + Duration::minutes(30),
            notes: None,
            source: "manual".into(),
        }
        .into_appointment();
        a.status = status;
        db.create_appointment(&a).unwrap();
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now().naive_utc();
        let today = now.date();
        let proc = add_procedure(&db, "Botox");

        let later_today = today.and_hms_opt(23, 59, 0).unwrap();
        add_appointment(&db, &proc.id, later_today, AppointmentStatus::Confirmed);
        add_appointment(&db, &proc.id, later_today, AppointmentStatus::Cancelled);
        add_appointment(&db, &proc.id, now + Duration::days(2), AppointmentStatus::Pending);

        db.create_patient(&Patient::new("Nova".into())).unwrap();
        db.create_financial_record(
            &NewFinancialRecord {
                record_type: RecordType::Income,
                category: None,
                amount: 250.0,
                date: Some(today),
                description: None,
                status: RecordStatus::Paid,
            }
            .into_record(today),
        )
        .unwrap();

        let s = stats(&db, now).unwrap();
        assert_eq!(s.appointments_today, 1);
        assert_eq!(s.revenue_month, 250.0);
        assert_eq!(s.new_patients_month, 1);
        assert!(s
            .upcoming_appointments
            .iter()
            .all(|a| a.status != AppointmentStatus::Cancelled));
    }

    #[test]
    fn test_revenue_chart_groups_by_month() {
        let db = Database::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        for (date, amount) in [("2026-02-03", 100.0), ("2026-02-20", 50.0), ("2026-03-01", 70.0)] {
            let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
            db.create_financial_record(
                &NewFinancialRecord {
                    record_type: RecordType::Income,
                    category: None,
                    amount,
                    date: Some(d),
                    description: None,
                    status: RecordStatus::Paid,
                }
                .into_record(today),
            )
            .unwrap();
        }
        let chart = revenue_chart(&db, 6, today).unwrap();
        assert_eq!(
            chart,
            vec![
                RevenuePoint { month: "2026-02".into(), value: 150.0 },
                RevenuePoint { month: "2026-03".into(), value: 70.0 },
            ]
        );

        // períodos enormes são limitados em vez de estourar a data
        let all = revenue_chart(&db, 100_000_000, today).unwrap();
        assert_eq!(all, chart);
        assert_eq!(revenue_chart(&db, u32::MAX, today).unwrap(), chart);
    }

    #[test]
    fn test_top_procedures() {
        let db = Database::open_in_memory().unwrap();
        let a = add_procedure(&db, "Botox");
        let b = add_procedure(&db, "Peeling");
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        add_appointment(&db, &a.id, start, AppointmentStatus::Completed);
        add_appointment(&db, &b.id, start, AppointmentStatus::Completed);
        add_appointment(&db, &b.id, start, AppointmentStatus::Confirmed);
        add_appointment(&db, &a.id, start, AppointmentStatus::Cancelled);

        let top = top_procedures(&db, 1).unwrap();
        assert_eq!(top, vec![ProcedureCount { name: "Peeling".into(), count: 2 }]);
    }
}
