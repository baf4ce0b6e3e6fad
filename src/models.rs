use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

/// Arredonda valores monetários para duas casas decimais
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============ Pacientes ============

/// Paciente (cliente da clínica)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<String>, // YYYY-MM-DD
    pub gender: Option<String>,
    pub address: Option<String>,
    pub observations: Option<String>, // observações clínicas
    pub tags: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(full_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            full_name,
            email: None,
            phone: None,
            whatsapp_number: None,
            cpf: None,
            rg: None,
            birth_date: None,
            gender: None,
            address: None,
            observations: None,
            tags: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Verifica se o paciente faz aniversário na data informada
    pub fn has_birthday_on(&self, date: NaiveDate) -> bool {
        self.birth_date
            .as_deref()
            .and_then(|b| NaiveDate::parse_from_str(b, "%Y-%m-%d").ok())
            .map(|b| b.format("%m-%d").to_string() == date.format("%m-%d").to_string())
            .unwrap_or(false)
    }
}

/// Dados para cadastro de paciente
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPatient {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub observations: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewPatient {
    pub fn into_patient(self) -> Patient {
        let mut patient = Patient::new(self.full_name);
        patient.email = self.email;
        patient.phone = self.phone;
        patient.whatsapp_number = self.whatsapp_number;
        patient.cpf = self.cpf;
        patient.rg = self.rg;
        patient.birth_date = self.birth_date;
        patient.gender = self.gender;
        patient.address = self.address;
        patient.observations = self.observations;
        patient.tags = self.tags;
        patient
    }
}

/// Atualização parcial de paciente
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub observations: Option<String>,
    pub tags: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl PatientUpdate {
    pub fn apply(self, patient: &mut Patient) {
        if let Some(v) = self.full_name {
            patient.full_name = v;
        }
        if self.email.is_some() {
            patient.email = self.email;
        }
        if self.phone.is_some() {
            patient.phone = self.phone;
        }
        if self.whatsapp_number.is_some() {
            patient.whatsapp_number = self.whatsapp_number;
        }
        if self.cpf.is_some() {
            patient.cpf = self.cpf;
        }
        if self.rg.is_some() {
            patient.rg = self.rg;
        }
        if self.birth_date.is_some() {
            patient.birth_date = self.birth_date;
        }
        if self.gender.is_some() {
            patient.gender = self.gender;
        }
        if self.address.is_some() {
            patient.address = self.address;
        }
        if self.observations.is_some() {
            patient.observations = self.observations;
        }
        if let Some(tags) = self.tags {
            patient.tags = tags;
        }
        if let Some(active) = self.active {
            patient.active = active;
        }
    }
}

// ============ Profissionais ============

/// Profissional da agenda
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Professional {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub schedule_color: String,
    pub schedule_order: i32,
    pub receives_bookings: bool,
    pub sees_all_appointments: bool,
    pub email_notifications: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProfessional {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    #[serde(default = "default_schedule_color")]
    pub schedule_color: String,
    #[serde(default)]
    pub schedule_order: i32,
    #[serde(default = "default_true")]
    pub receives_bookings: bool,
    #[serde(default)]
    pub sees_all_appointments: bool,
    #[serde(default)]
    pub email_notifications: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_schedule_color() -> String {
    "#4f46e5".to_string()
}

impl NewProfessional {
    pub fn into_professional(self) -> Professional {
        Professional {
            id: new_id(),
            name: self.name,
            email: self.email,
            phone: self.phone,
            whatsapp_number: self.whatsapp_number,
            schedule_color: self.schedule_color,
            schedule_order: self.schedule_order,
            receives_bookings: self.receives_bookings,
            sees_all_appointments: self.sees_all_appointments,
            email_notifications: self.email_notifications,
            active: self.active,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfessionalUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    pub schedule_color: Option<String>,
    pub schedule_order: Option<i32>,
    pub receives_bookings: Option<bool>,
    pub sees_all_appointments: Option<bool>,
    pub email_notifications: Option<bool>,
    pub active: Option<bool>,
}

impl ProfessionalUpdate {
    pub fn apply(self, p: &mut Professional) {
        if let Some(v) = self.name {
            p.name = v;
        }
        if self.email.is_some() {
            p.email = self.email;
        }
        if self.phone.is_some() {
            p.phone = self.phone;
        }
        if self.whatsapp_number.is_some() {
            p.whatsapp_number = self.whatsapp_number;
        }
        if let Some(v) = self.schedule_color {
            p.schedule_color = v;
        }
        if let Some(v) = self.schedule_order {
            p.schedule_order = v;
        }
        if let Some(v) = self.receives_bookings {
            p.receives_bookings = v;
        }
        if let Some(v) = self.sees_all_appointments {
            p.sees_all_appointments = v;
        }
        if let Some(v) = self.email_notifications {
            p.email_notifications = v;
        }
        if let Some(v) = self.active {
            p.active = v;
        }
    }
}

/// Janela de disponibilidade semanal de um profissional
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub professional_id: String,
    pub day_of_week: u32, // 0 = segunda-feira
    pub start_time: String, // HH:MM
    pub end_time: String,   // HH:MM
    #[serde(default = "default_true")]
    pub is_available: bool,
}

// ============ Procedimentos / Serviços ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Procedure {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub duration_minutes: i64,
    pub price: f64,
    pub available_for_online_booking: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProcedure {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_true")]
    pub available_for_online_booking: bool,
}

fn default_duration() -> i64 {
    60
}

impl NewProcedure {
    pub fn into_procedure(self) -> Procedure {
        Procedure {
            id: new_id(),
            name: self.name,
            description: self.description,
            category: self.category,
            duration_minutes: self.duration_minutes,
            price: self.price,
            available_for_online_booking: self.available_for_online_booking,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcedureUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub duration_minutes: Option<i64>,
    pub price: Option<f64>,
    pub available_for_online_booking: Option<bool>,
    pub active: Option<bool>,
}

impl ProcedureUpdate {
    pub fn apply(self, p: &mut Procedure) {
        if let Some(v) = self.name {
            p.name = v;
        }
        if self.description.is_some() {
            p.description = self.description;
        }
        if self.category.is_some() {
            p.category = self.category;
        }
        if let Some(v) = self.duration_minutes {
            p.duration_minutes = v;
        }
        if let Some(v) = self.price {
            p.price = v;
        }
        if let Some(v) = self.available_for_online_booking {
            p.available_for_online_booking = v;
        }
        if let Some(v) = self.active {
            p.active = v;
        }
    }
}

// ============ Estoque / Produtos ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub quantity: i64,
    pub min_quantity: i64,
    pub sale_price: Option<f64>,
    pub is_for_sale: bool,
    pub active: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub min_quantity: i64,
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub is_for_sale: bool,
    pub image_url: Option<String>,
}

impl NewProduct {
    pub fn into_product(self) -> Product {
        Product {
            id: new_id(),
            name: self.name,
            description: self.description,
            category: self.category,
            quantity: self.quantity,
            min_quantity: self.min_quantity,
            sale_price: self.sale_price,
            is_for_sale: self.is_for_sale,
            active: true,
            image_url: self.image_url,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<i64>,
    pub min_quantity: Option<i64>,
    pub sale_price: Option<f64>,
    pub is_for_sale: Option<bool>,
    pub active: Option<bool>,
    pub image_url: Option<String>,
}

impl ProductUpdate {
    pub fn apply(self, p: &mut Product) {
        if let Some(v) = self.name {
            p.name = v;
        }
        if self.description.is_some() {
            p.description = self.description;
        }
        if self.category.is_some() {
            p.category = self.category;
        }
        if let Some(v) = self.quantity {
            p.quantity = v;
        }
        if let Some(v) = self.min_quantity {
            p.min_quantity = v;
        }
        if self.sale_price.is_some() {
            p.sale_price = self.sale_price;
        }
        if let Some(v) = self.is_for_sale {
            p.is_for_sale = v;
        }
        if let Some(v) = self.active {
            p.active = v;
        }
        if self.image_url.is_some() {
            p.image_url = self.image_url;
        }
    }
}

// ============ Agendamentos ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "in_progress" => AppointmentStatus::InProgress,
            "completed" => AppointmentStatus::Completed,
            "cancelled" => AppointmentStatus::Cancelled,
            "no_show" => AppointmentStatus::NoShow,
            _ => AppointmentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub professional_id: Option<String>,
    pub procedure_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub source: String, // manual, pwa, whatsapp
    pub confirmation_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Dados para criação de agendamento
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub patient_id: String,
    pub professional_id: Option<String>,
    pub procedure_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub notes: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "manual".to_string()
}

impl NewAppointment {
    pub fn into_appointment(self) -> Appointment {
        Appointment {
            id: new_id(),
            patient_id: self.patient_id,
            professional_id: self.professional_id,
            procedure_id: self.procedure_id,
            start_time: self.start_time,
            end_time: self.end_time,
            status: AppointmentStatus::Pending,
            notes: self.notes,
            source: self.source,
            confirmation_sent: false,
            created_at: Utc::now(),
        }
    }
}

/// Atualização parcial de agendamento
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentUpdate {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

/// Filtros de listagem de agendamentos
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentQuery {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

/// Abas da tela "Meus agendamentos"
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentFilter {
    Upcoming,
    Past,
    Cancelled,
}

impl AppointmentFilter {
    /// Classifica um agendamento em exatamente uma aba
    pub fn classify(appointment: &Appointment, now: NaiveDateTime) -> Self {
        if appointment.status == AppointmentStatus::Cancelled {
            AppointmentFilter::Cancelled
        } else if appointment.start_time < now
            || appointment.status == AppointmentStatus::Completed
        {
            AppointmentFilter::Past
        } else {
            AppointmentFilter::Upcoming
        }
    }
}

/// Filtra agendamentos pela aba selecionada, relativo a `now`
pub fn filter_appointments(
    appointments: &[Appointment],
    filter: AppointmentFilter,
    now: NaiveDateTime,
) -> Vec<Appointment> {
    appointments
        .iter()
        .filter(|a| AppointmentFilter::classify(a, now) == filter)
        .cloned()
        .collect()
}

// ============ Caixa / Vendas ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "partial" => PaymentStatus::Partial,
            "paid" => PaymentStatus::Paid,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sale {
    pub id: String,
    pub client_id: String,
    pub sale_date: NaiveDate,
    pub total_amount: f64,
    pub amount_paid: f64,
    pub payment_method: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    pub fn outstanding(&self) -> f64 {
        round_currency((self.total_amount - self.amount_paid).max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub procedure_id: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub discount: f64,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "out" => MovementType::Out,
            _ => MovementType::In,
        }
    }
}

/// Movimentação de caixa
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashMovement {
    pub id: String,
    pub movement_type: MovementType,
    pub amount: f64,
    pub description: String,
    pub category: Option<String>,
    pub sale_id: Option<String>,
    pub moved_at: DateTime<Utc>,
}

impl CashMovement {
    pub fn new(movement_type: MovementType, amount: f64, description: String) -> Self {
        Self {
            id: new_id(),
            movement_type,
            amount,
            description,
            category: None,
            sale_id: None,
            moved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    Open,
    Closed,
}

/// Sessão de caixa (abertura/fechamento)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashRegister {
    pub id: String,
    pub opened_at: DateTime<Utc>,
    pub opening_balance: f64,
    pub closed_at: Option<DateTime<Utc>>,
    pub closing_balance: Option<f64>,
    pub status: RegisterStatus,
}

// ============ Pedidos (loja do app) ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOrder {
    pub patient_id: String,
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: Option<String>,
    #[serde(default = "default_order_source")]
    pub source: String,
}

fn default_order_source() -> String {
    "pwa".to_string()
}

impl NewOrder {
    /// Total = soma dos subtotais (quantidade × preço unitário)
    pub fn into_order(self) -> Order {
        let order_id = new_id();
        let items: Vec<OrderItem> = self
            .items
            .into_iter()
            .map(|i| OrderItem {
                id: new_id(),
                order_id: order_id.clone(),
                product_id: i.product_id,
                product_name: None,
                quantity: i.quantity,
                unit_price: i.unit_price,
                subtotal: round_currency(i.quantity as f64 * i.unit_price),
            })
            .collect();
        Order {
            id: order_id,
            patient_id: self.patient_id,
            total_amount: round_currency(items.iter().map(|i| i.subtotal).sum()),
            shipping_address: self.shipping_address,
            source: self.source,
            status: "pending".to_string(),
            items,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub patient_id: String,
    pub total_amount: f64,
    pub shipping_address: Option<String>,
    pub source: String,
    pub status: String,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub subtotal: f64,
}

// ============ Financeiro ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Income,
    Expense,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Income => "income",
            RecordType::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "expense" => RecordType::Expense,
            _ => RecordType::Income,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Paid,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "paid" => RecordStatus::Paid,
            _ => RecordStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialRecord {
    pub id: String,
    pub record_type: RecordType,
    pub category: Option<String>,
    pub amount: f64,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFinancialRecord {
    pub record_type: RecordType,
    pub category: Option<String>,
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    #[serde(default = "default_record_status")]
    pub status: RecordStatus,
}

fn default_record_status() -> RecordStatus {
    RecordStatus::Pending
}

impl NewFinancialRecord {
    pub fn into_record(self, today: NaiveDate) -> FinancialRecord {
        FinancialRecord {
            id: new_id(),
            record_type: self.record_type,
            category: self.category,
            amount: self.amount,
            date: self.date.unwrap_or(today),
            description: self.description,
            status: self.status,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinancialQuery {
    pub record_type: Option<RecordType>,
    pub status: Option<RecordStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ============ Automação ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    AppointmentConfirmation,
    AppointmentReminder,
    FollowUp,
    Birthday,
    Promotion,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::AppointmentConfirmation => "appointment_confirmation",
            TriggerType::AppointmentReminder => "appointment_reminder",
            TriggerType::FollowUp => "follow_up",
            TriggerType::Birthday => "birthday",
            TriggerType::Promotion => "promotion",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "appointment_reminder" => TriggerType::AppointmentReminder,
            "follow_up" => TriggerType::FollowUp,
            "birthday" => TriggerType::Birthday,
            "promotion" => TriggerType::Promotion,
            _ => TriggerType::AppointmentConfirmation,
        }
    }

    pub fn all() -> [TriggerType; 5] {
        [
            TriggerType::AppointmentConfirmation,
            TriggerType::AppointmentReminder,
            TriggerType::FollowUp,
            TriggerType::Birthday,
            TriggerType::Promotion,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationRule {
    pub id: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub trigger_offset_minutes: i64,
    pub channel: String,
    pub message_template: String,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAutomationRule {
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default = "default_offset")]
    pub trigger_offset_minutes: i64,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub message_template: String,
    pub webhook_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_offset() -> i64 {
    1440
}

fn default_channel() -> String {
    "whatsapp".to_string()
}

impl NewAutomationRule {
    pub fn into_rule(self) -> AutomationRule {
        AutomationRule {
            id: new_id(),
            name: self.name,
            trigger_type: self.trigger_type,
            trigger_offset_minutes: self.trigger_offset_minutes,
            channel: self.channel,
            message_template: self.message_template,
            webhook_url: self.webhook_url,
            is_active: self.is_active,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutomationRuleUpdate {
    pub name: Option<String>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_offset_minutes: Option<i64>,
    pub message_template: Option<String>,
    pub webhook_url: Option<String>,
    pub is_active: Option<bool>,
}

impl AutomationRuleUpdate {
    pub fn apply(self, rule: &mut AutomationRule) {
        if let Some(v) = self.name {
            rule.name = v;
        }
        if let Some(v) = self.trigger_type {
            rule.trigger_type = v;
        }
        if let Some(v) = self.trigger_offset_minutes {
            rule.trigger_offset_minutes = v;
        }
        if let Some(v) = self.message_template {
            rule.message_template = v;
        }
        if self.webhook_url.is_some() {
            rule.webhook_url = self.webhook_url;
        }
        if let Some(v) = self.is_active {
            rule.is_active = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationLog {
    pub id: String,
    pub rule_id: String,
    pub rule_name: Option<String>,
    pub target_id: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: String, // sent, failed
    pub created_at: DateTime<Utc>,
}

// ============ Anamnese ============

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnamnesisFields {
    pub main_complaint: Option<String>,
    pub current_illness_history: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    #[serde(default)]
    pub smoking: bool,
    #[serde(default)]
    pub alcohol: bool,
    pub physical_activity: Option<String>,
    pub previous_surgeries: Option<String>,
    pub family_history: Option<String>,
    pub skin_type: Option<String>,
    pub previous_aesthetic_procedures: Option<String>,
    pub cosmetics_used: Option<String>,
    pub sun_exposure: Option<String>,
    pub expectations: Option<String>,
    pub contraindications: Option<String>,
}

/// Ficha de anamnese
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anamnesis {
    pub id: String,
    pub patient_id: String,
    pub patient_name: Option<String>,
    #[serde(flatten)]
    pub fields: AnamnesisFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Anamnesis {
    pub fn new(patient_id: String, fields: AnamnesisFields) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            patient_id,
            patient_name: None,
            fields,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============ Prontuário por áudio (IA) ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => ProcessingStatus::Processing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalAudioRecord {
    pub id: String,
    pub patient_id: String,
    pub professional_id: Option<String>,
    pub appointment_id: Option<String>,
    pub audio_path: String,
    pub file_size_bytes: i64,
    pub transcription: Option<String>,
    pub transcription_status: ProcessingStatus,
    pub ai_summary: Option<String>,
    pub summary_status: ProcessingStatus,
    /// Dados estruturados extraídos da transcrição
    #[serde(default)]
    pub extracted_info: Option<serde_json::Value>,
    pub error: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

// ============ Telemedicina ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => SessionStatus::InProgress,
            "completed" => SessionStatus::Completed,
            _ => SessionStatus::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemedicineSession {
    pub id: String,
    pub appointment_id: String,
    pub patient_id: String,
    pub professional_id: String,
    pub room_id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTelemedicineSession {
    pub appointment_id: String,
    pub patient_id: String,
    pub professional_id: String,
}

// ============ WhatsApp ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhatsAppMessage {
    pub id: String,
    pub to_number: String,
    pub content: String,
    pub message_type: String,
    pub direction: String, // outbound, inbound
    pub status: String,    // sent, failed
    pub created_at: DateTime<Utc>,
}

// ============ Contas de usuário ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Professional,
    Client,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Professional => "professional",
            UserRole::Client => "client",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            "professional" => UserRole::Professional,
            _ => UserRole::Client,
        }
    }

    /// Equipe da clínica (acesso ao painel administrativo)
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Professional)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Perfil público do usuário (sem hash de senha)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
}

impl From<&UserAccount> for UserProfile {
    fn from(account: &UserAccount) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            full_name: account.full_name.clone(),
            phone: account.phone.clone(),
            role: account.role,
        }
    }
}
