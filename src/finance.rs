//! Lançamentos financeiros e relatório mensal

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    round_currency, FinancialQuery, FinancialRecord, MovementType, NewFinancialRecord,
    RecordStatus, RecordType,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialSummary {
    pub income: f64,
    pub expense: f64,
    pub balance: f64,
    pub pending: f64,
}

pub fn create_record(
    db: &Database,
    req: NewFinancialRecord,
    today: NaiveDate,
) -> AppResult<FinancialRecord> {
    if req.amount <= 0.0 {
        return Err(AppError::Validation("Valor deve ser positivo".to_string()));
    }
    let record = req.into_record(today);
    db.create_financial_record(&record)?;
    Ok(record)
}

pub fn list_records(db: &Database, query: &FinancialQuery) -> AppResult<Vec<FinancialRecord>> {
    db.list_financial_records(query)
}

/// Primeiro e último dia do mês
pub fn month_range(year: i32, month: u32) -> AppResult<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Validation(format!("Mês inválido: {}-{}", year, month)))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| AppError::Validation(format!("Mês inválido: {}-{}", year, month)))?;
    Ok((start, next.pred_opt().unwrap_or(start)))
}

/// Interpreta "YYYY-MM"
pub fn parse_month(value: &str) -> AppResult<(i32, u32)> {
    let invalid = || AppError::Validation(format!("Mês inválido: {}", value));
    let (y, m) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year = y.parse::<i32>().map_err(|_| invalid())?;
    let month = m.parse::<u32>().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok((year, month))
}

/// Totais pagos e pendentes; `month` no formato "YYYY-MM" restringe o período
pub fn summary(db: &Database, month: Option<&str>) -> AppResult<FinancialSummary> {
    let mut query = FinancialQuery::default();
    if let Some(m) = month {
        let (year, month) = parse_month(m)?;
        let (start, end) = month_range(year, month)?;
        query.start_date = Some(start);
        query.end_date = Some(end);
    }
    let records = db.list_financial_records(&query)?;
    Ok(summarize(&records))
}

pub fn summarize(records: &[FinancialRecord]) -> FinancialSummary {
    let mut income = 0.0;
    let mut expense = 0.0;
    let mut pending = 0.0;
    for r in records {
        match (r.record_type, r.status) {
            (RecordType::Income, RecordStatus::Paid) => income += r.amount,
            (RecordType::Expense, RecordStatus::Paid) => expense += r.amount,
            (_, RecordStatus::Pending) => pending += r.amount,
        }
    }
    FinancialSummary {
        income: round_currency(income),
        expense: round_currency(expense),
        balance: round_currency(income - expense),
        pending: round_currency(pending),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashFlowEntry {
    pub moved_at: DateTime<Utc>,
    pub movement_type: MovementType,
    pub description: String,
    pub category: Option<String>,
    pub amount: f64,
}

/// Relatório do mês a partir das vendas e do caixa
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyReport {
    pub month: String,
    pub sales_count: usize,
    pub sales_revenue: f64,
    pub received: f64,
    pub expenses: f64,
    pub net: f64,
    pub cash_flow: Vec<CashFlowEntry>,
}

pub fn monthly_report(db: &Database, year: i32, month: u32) -> AppResult<MonthlyReport> {
    let (start, end) = month_range(year, month)?;
    let sales = db.list_sales_between(start, end)?;

    let since = start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let until = (end + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();
    let movements = db.list_cash_movements(since, Some(until))?;

    let (received, expenses) = crate::caixa::movement_totals(&movements);
    let cash_flow = movements
        .into_iter()
        .map(|m| CashFlowEntry {
            moved_at: m.moved_at,
            movement_type: m.movement_type,
            description: m.description,
            category: m.category,
            amount: m.amount,
        })
        .collect();

    Ok(MonthlyReport {
        month: format!("{:04}-{:02}", start.year(), start.month()),
        sales_count: sales.len(),
        sales_revenue: round_currency(sales.iter().map(|s| s.total_amount).sum()),
        received,
        expenses,
        net: round_currency(received - expenses),
        cash_flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CashMovement, Sale, PaymentStatus};

    fn record(kind: RecordType, amount: f64, date: &str, status: RecordStatus) -> NewFinancialRecord {
        NewFinancialRecord {
            record_type: kind,
            category: None,
            amount,
            date: Some(NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()),
            description: None,
            status,
        }
    }

    #[test]
    fn test_month_helpers() {
        assert_eq!(parse_month("2026-02").unwrap(), (2026, 2));
        assert!(parse_month("2026-13").is_err());
        assert!(parse_month("fev").is_err());
        let (start, end) = month_range(2024, 2).unwrap();
        assert_eq!(start.to_string(), "2024-02-01");
        assert_eq!(end.to_string(), "2024-02-29");
        assert_eq!(month_range(2026, 12).unwrap().1.to_string(), "2026-12-31");
    }

    #[test]
    fn test_summary_by_month() {
        let db = Database::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        create_record(&db, record(RecordType::Income, 500.0, "2026-03-02", RecordStatus::Paid), today).unwrap();
        create_record(&db, record(RecordType::Expense, 120.5, "2026-03-10", RecordStatus::Paid), today).unwrap();
        create_record(&db, record(RecordType::Income, 80.0, "2026-03-11", RecordStatus::Pending), today).unwrap();
        create_record(&db, record(RecordType::Income, 999.0, "2026-02-28", RecordStatus::Paid), today).unwrap();

        let march = summary(&db, Some("2026-03")).unwrap();
        assert_eq!(march.income, 500.0);
        assert_eq!(march.expense, 120.5);
        assert_eq!(march.balance, 379.5);
        assert_eq!(march.pending, 80.0);

        let all = summary(&db, None).unwrap();
        assert_eq!(all.income, 1499.0);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let db = Database::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let err = create_record(&db, record(RecordType::Income, 0.0, "2026-03-02", RecordStatus::Paid), today);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_monthly_report() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let today = now.date_naive();

        let sale = Sale {
            id: "s1".into(),
            client_id: "c1".into(),
            sale_date: today,
            total_amount: 300.0,
            amount_paid: 200.0,
            payment_method: Some("pix".into()),
            status: PaymentStatus::Partial,
            created_at: now,
        };
        let mut entry = CashMovement::new(MovementType::In, 200.0, "Venda #s1".into());
        entry.sale_id = Some("s1".into());
        db.record_sale(&sale, &[], &entry).unwrap();
        db.create_cash_movement(&CashMovement::new(MovementType::Out, 50.0, "Luvas".into()))
            .unwrap();

        let report = monthly_report(&db, today.year(), today.month()).unwrap();
        assert_eq!(report.sales_count, 1);
        assert_eq!(report.sales_revenue, 300.0);
        assert_eq!(report.received, 200.0);
        assert_eq!(report.expenses, 50.0);
        assert_eq!(report.net, 150.0);
        assert_eq!(report.cash_flow.len(), 2);
        assert!(report.cash_flow[0].moved_at <= report.cash_flow[1].moved_at);
    }
}
