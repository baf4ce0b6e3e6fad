//! Caixa: vendas de procedimentos, abertura/fechamento e lembretes de cobrança

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    round_currency, CashMovement, CashRegister, MovementType, PaymentStatus, Procedure,
    RegisterStatus, Sale, SaleItem,
};

/// Item em edição na tela do caixa
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftItem {
    pub procedure_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub subtotal: f64,
}

/// Venda em montagem (estado local até finalizar)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SaleDraft {
    pub client_id: Option<String>,
    pub items: Vec<DraftItem>,
    pub amount_paid: f64,
    pub payment_method: Option<String>,
}

impl SaleDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, procedure: &Procedure, quantity: i64) -> AppResult<()> {
        if quantity <= 0 {
            return Err(AppError::Validation("Quantidade inválida".to_string()));
        }
        self.items.push(DraftItem {
            procedure_id: procedure.id.clone(),
            name: procedure.name.clone(),
            unit_price: procedure.price,
            quantity,
            subtotal: round_currency(procedure.price * quantity as f64),
        });
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> Option<DraftItem> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn total(&self) -> f64 {
        round_currency(self.items.iter().map(|i| i.subtotal).sum())
    }

    pub fn payment_status(&self) -> PaymentStatus {
        if self.amount_paid >= self.total() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        }
    }
}

/// Grava a venda, os itens e a entrada no caixa
pub fn finalize_sale(db: &Database, draft: &SaleDraft, today: NaiveDate) -> AppResult<Sale> {
    let client_id = match draft.client_id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(AppError::Validation("Selecione um cliente".to_string())),
    };
    if draft.items.is_empty() {
        return Err(AppError::Validation("Adicione pelo menos um item".to_string()));
    }
    if draft.amount_paid < 0.0 {
        return Err(AppError::Validation("Valor pago inválido".to_string()));
    }

    let sale = Sale {
        id: uuid::Uuid::new_v4().to_string(),
        client_id,
        sale_date: today,
        total_amount: draft.total(),
        amount_paid: round_currency(draft.amount_paid),
        payment_method: draft.payment_method.clone(),
        status: draft.payment_status(),
        created_at: Utc::now(),
    };

    let items: Vec<SaleItem> = draft
        .items
        .iter()
        .map(|i| SaleItem {
            id: uuid::Uuid::new_v4().to_string(),
            sale_id: sale.id.clone(),
            procedure_id: i.procedure_id.clone(),
            quantity: i.quantity,
            unit_price: i.unit_price,
            discount: 0.0,
            subtotal: i.subtotal,
        })
        .collect();

    let short_id: String = sale.id.chars().take(8).collect();
    let mut movement = CashMovement::new(
        MovementType::In,
        sale.amount_paid,
        format!("Venda #{}", short_id),
    );
    movement.category = Some("venda".to_string());
    movement.sale_id = Some(sale.id.clone());

    db.record_sale(&sale, &items, &movement)?;
    Ok(sale)
}

pub fn open_register(db: &Database, opening_balance: f64) -> AppResult<CashRegister> {
    if db.get_open_cash_register()?.is_some() {
        return Err(AppError::Conflict("Já existe um caixa aberto".to_string()));
    }
    let register = CashRegister {
        id: uuid::Uuid::new_v4().to_string(),
        opened_at: Utc::now(),
        opening_balance: round_currency(opening_balance),
        closed_at: None,
        closing_balance: None,
        status: RegisterStatus::Open,
    };
    db.create_cash_register(&register)?;
    Ok(register)
}

/// Soma de entradas e saídas
pub fn movement_totals(movements: &[CashMovement]) -> (f64, f64) {
    let mut ins = 0.0;
    let mut outs = 0.0;
    for m in movements {
        match m.movement_type {
            MovementType::In => ins += m.amount,
            MovementType::Out => outs += m.amount,
        }
    }
    (round_currency(ins), round_currency(outs))
}

/// Fecha o caixa aberto: saldo = abertura + entradas - saídas desde a abertura
pub fn close_register(db: &Database) -> AppResult<CashRegister> {
    let mut register = db
        .get_open_cash_register()?
        .ok_or_else(|| AppError::NotFound("Nenhum caixa aberto".to_string()))?;

    let movements = db.list_cash_movements(register.opened_at, None)?;
    let (ins, outs) = movement_totals(&movements);
    let closing = round_currency(register.opening_balance + ins - outs);
    let closed_at = Utc::now();

    db.close_cash_register(&register.id, closed_at, closing)?;
    register.closed_at = Some(closed_at);
    register.closing_balance = Some(closing);
    register.status = RegisterStatus::Closed;
    Ok(register)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseRequest {
    pub amount: f64,
    pub description: String,
    pub category: Option<String>,
}

/// Registra uma saída de caixa
pub fn record_expense(db: &Database, req: ExpenseRequest) -> AppResult<CashMovement> {
    if req.amount <= 0.0 {
        return Err(AppError::Validation("Valor deve ser positivo".to_string()));
    }
    if req.description.trim().is_empty() {
        return Err(AppError::Validation("Descrição é obrigatória".to_string()));
    }
    let mut movement = CashMovement::new(
        MovementType::Out,
        round_currency(req.amount),
        req.description.trim().to_string(),
    );
    movement.category = req.category.or_else(|| Some("despesa".to_string()));
    db.create_cash_movement(&movement)?;
    Ok(movement)
}

/// Abas do quadro de lembretes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPeriod {
    Today,
    Yesterday,
    Week,
    Month,
}

impl ReminderPeriod {
    /// Intervalo de datas de venda coberto pela aba
    pub fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            ReminderPeriod::Today => (today, today),
            ReminderPeriod::Yesterday => {
                let y = today - Duration::days(1);
                (y, y)
            }
            ReminderPeriod::Week => (today - Duration::days(6), today),
            ReminderPeriod::Month => (today.with_day(1).unwrap_or(today), today),
        }
    }
}

/// Cobrança pendente
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentReminder {
    pub sale_id: String,
    pub client_id: String,
    pub client_name: Option<String>,
    pub sale_date: NaiveDate,
    pub total_amount: f64,
    pub outstanding: f64,
}

/// Vendas pendentes/parciais com valor em aberto
pub fn pending_reminders(
    db: &Database,
    period: Option<ReminderPeriod>,
    today: NaiveDate,
) -> AppResult<Vec<PaymentReminder>> {
    let sales = db.list_sales_by_status(&[PaymentStatus::Pending, PaymentStatus::Partial])?;
    let mut reminders = Vec::new();
    for sale in sales {
        if let Some(p) = period {
            let (start, end) = p.range(today);
            if sale.sale_date < start || sale.sale_date > end {
                continue;
            }
        }
        let outstanding = sale.outstanding();
        if outstanding <= 0.0 {
            continue;
        }
        let client_name = db.get_patient(&sale.client_id)?.map(|p| p.full_name);
        reminders.push(PaymentReminder {
            sale_id: sale.id,
            client_id: sale.client_id,
            client_name,
            sale_date: sale.sale_date,
            total_amount: sale.total_amount,
            outstanding,
        });
    }
    Ok(reminders)
}

/// Vendas quitadas no dia
pub fn received_today(db: &Database, today: NaiveDate) -> AppResult<Vec<Sale>> {
    Ok(db
        .list_sales_between(today, today)?
        .into_iter()
        .filter(|s| s.status == PaymentStatus::Paid)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProcedure, Patient};

    fn procedure(price: f64) -> Procedure {
        NewProcedure {
            name: "Peeling".into(),
            description: None,
            category: None,
            duration_minutes: 45,
            price,
            available_for_online_booking: true,
        }
        .into_procedure()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn setup() -> (Database, Patient) {
        let db = Database::open_in_memory().unwrap();
        let patient = Patient::new("Cliente Caixa".into());
        db.create_patient(&patient).unwrap();
        (db, patient)
    }

    #[test]
    fn test_draft_totals_and_status() {
        let mut draft = SaleDraft::new();
        draft.add_item(&procedure(150.0), 2).unwrap();
        draft.add_item(&procedure(49.99), 1).unwrap();
        assert_eq!(draft.total(), 349.99);

        draft.amount_paid = 100.0;
        assert_eq!(draft.payment_status(), PaymentStatus::Partial);
        draft.amount_paid = 349.99;
        assert_eq!(draft.payment_status(), PaymentStatus::Paid);

        let removed = draft.remove_item(0).unwrap();
        assert_eq!(removed.subtotal, 300.0);
        assert_eq!(draft.total(), 49.99);
        assert!(draft.remove_item(5).is_none());
    }

    #[test]
    fn test_finalize_requires_client_and_items() {
        let (db, patient) = setup();
        let mut draft = SaleDraft::new();
        assert!(finalize_sale(&db, &draft, today()).is_err());
        draft.client_id = Some(patient.id.clone());
        assert!(finalize_sale(&db, &draft, today()).is_err());
    }

    #[test]
    fn test_finalize_writes_sale_items_and_movement() {
        let (db, patient) = setup();
        let mut draft = SaleDraft::new();
        draft.client_id = Some(patient.id.clone());
        draft.add_item(&procedure(200.0), 1).unwrap();
        draft.amount_paid = 80.0;

        let sale = finalize_sale(&db, &draft, today()).unwrap();
        assert_eq!(sale.status, PaymentStatus::Partial);
        assert_eq!(db.list_sale_items(&sale.id).unwrap().len(), 1);

        let movements = db
            .list_cash_movements(Utc::now() - Duration::hours(1), None)
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].amount, 80.0);
        assert_eq!(movements[0].category.as_deref(), Some("venda"));
        assert!(movements[0].description.starts_with("Venda #"));
        assert_eq!(movements[0].description.len(), "Venda #".len() + 8);

        let reminders = pending_reminders(&db, Some(ReminderPeriod::Today), today()).unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].outstanding, 120.0);
        assert_eq!(reminders[0].client_name.as_deref(), Some("Cliente Caixa"));
        assert!(received_today(&db, today()).unwrap().is_empty());
    }

    #[test]
    fn test_register_open_close_balance() {
        let (db, patient) = setup();
        let register = open_register(&db, 100.0).unwrap();
        assert!(matches!(open_register(&db, 50.0), Err(AppError::Conflict(_))));

        let mut draft = SaleDraft::new();
        draft.client_id = Some(patient.id.clone());
        draft.add_item(&procedure(250.0), 1).unwrap();
        draft.amount_paid = 250.0;
        finalize_sale(&db, &draft, today()).unwrap();

        record_expense(
            &db,
            ExpenseRequest {
                amount: 30.0,
                description: "Material".into(),
                category: None,
            },
        )
        .unwrap();

        let closed = close_register(&db).unwrap();
        assert_eq!(closed.id, register.id);
        assert_eq!(closed.closing_balance, Some(320.0));
        assert!(db.get_open_cash_register().unwrap().is_none());
        assert_eq!(received_today(&db, today()).unwrap().len(), 1);
    }

    #[test]
    fn test_close_without_open_register() {
        let (db, _) = setup();
        assert!(matches!(close_register(&db), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_reminder_period_ranges() {
        let d = NaiveDate::from_ymd_opt(2026, 5, 20).unwrap();
        assert_eq!(
            ReminderPeriod::Month.range(d).0,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
        );
        assert_eq!(
            ReminderPeriod::Yesterday.range(d),
            (NaiveDate::from_ymd_opt(2026, 5, 19).unwrap(), NaiveDate::from_ymd_opt(2026, 5, 19).unwrap())
        );
    }
}
