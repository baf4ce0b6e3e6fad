//! Camada de dados (SQLite)
//!
//! Cada entidade da clínica é uma tabela com CRUD simples por linha. A aplicação
//! não mantém cópia autoritativa: as telas recarregam após cada mutação.

use crate::error::{AppError, AppResult};
use crate::models::*;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Formato de data/hora local usado nos agendamentos
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Conexão compartilhada com o banco
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Abre (ou cria) o banco no caminho indicado
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        log::info!("[DB] abrindo banco em {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Banco em memória (testes e modo demonstração)
    pub fn open_in_memory() -> AppResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        create_tables(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Custom("Database lock error".to_string()))
    }
}

fn create_tables(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        -- Contas de acesso (equipe e pacientes do app)
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_login_at TEXT,
            created_at TEXT NOT NULL
        );

        -- Pacientes
        CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            whatsapp_number TEXT,
            cpf TEXT,
            rg TEXT,
            birth_date TEXT,
            gender TEXT,
            address TEXT,
            observations TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_patients_whatsapp ON patients(whatsapp_number);

        -- Profissionais
        CREATE TABLE IF NOT EXISTS professionals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            whatsapp_number TEXT,
            schedule_color TEXT NOT NULL,
            schedule_order INTEGER NOT NULL DEFAULT 0,
            receives_bookings INTEGER NOT NULL DEFAULT 1,
            sees_all_appointments INTEGER NOT NULL DEFAULT 0,
            email_notifications INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        -- Disponibilidade semanal
        CREATE TABLE IF NOT EXISTS availability (
            professional_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (professional_id) REFERENCES professionals(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_availability_professional ON availability(professional_id, day_of_week);

        -- Procedimentos (serviços)
        CREATE TABLE IF NOT EXISTS procedures (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            duration_minutes INTEGER NOT NULL DEFAULT 60,
            price REAL NOT NULL DEFAULT 0,
            available_for_online_booking INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        -- Estoque
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            quantity INTEGER NOT NULL DEFAULT 0,
            min_quantity INTEGER NOT NULL DEFAULT 0,
            sale_price REAL,
            is_for_sale INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            image_url TEXT,
            created_at TEXT NOT NULL
        );

        -- Agendamentos
        CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            professional_id TEXT,
            procedure_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            source TEXT NOT NULL,
            confirmation_sent INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_appointments_start ON appointments(start_time);
        CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);

        -- Vendas (caixa)
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            total_amount REAL NOT NULL,
            amount_paid REAL NOT NULL,
            payment_method TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sale_items (
            id TEXT PRIMARY KEY,
            sale_id TEXT NOT NULL,
            procedure_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            discount REAL NOT NULL DEFAULT 0,
            subtotal REAL NOT NULL,
            FOREIGN KEY (sale_id) REFERENCES sales(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS cash_movements (
            id TEXT PRIMARY KEY,
            movement_type TEXT NOT NULL,
            amount REAL NOT NULL,
            description TEXT NOT NULL,
            category TEXT,
            sale_id TEXT,
            moved_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cash_movements_date ON cash_movements(moved_at);

        CREATE TABLE IF NOT EXISTS cash_registers (
            id TEXT PRIMARY KEY,
            opened_at TEXT NOT NULL,
            opening_balance REAL NOT NULL,
            closed_at TEXT,
            closing_balance REAL,
            status TEXT NOT NULL
        );

        -- Pedidos da loja
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            total_amount REAL NOT NULL,
            shipping_address TEXT,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            subtotal REAL NOT NULL,
            FOREIGN KEY (order_id) REFERENCES orders(id) ON DELETE CASCADE
        );

        -- Lançamentos financeiros
        CREATE TABLE IF NOT EXISTS financial_records (
            id TEXT PRIMARY KEY,
            record_type TEXT NOT NULL,
            category TEXT,
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Automação de mensagens
        CREATE TABLE IF NOT EXISTS automation_rules (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            trigger_offset_minutes INTEGER NOT NULL,
            channel TEXT NOT NULL,
            message_template TEXT NOT NULL,
            webhook_url TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS automation_logs (
            id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            phone TEXT,
            message TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_automation_logs_target ON automation_logs(rule_id, target_id);

        -- Anamnese
        CREATE TABLE IF NOT EXISTS anamnesis (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_anamnesis_patient ON anamnesis(patient_id);

        -- Prontuários por áudio
        CREATE TABLE IF NOT EXISTS medical_audio_records (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            professional_id TEXT,
            appointment_id TEXT,
            audio_path TEXT NOT NULL,
            file_size_bytes INTEGER NOT NULL DEFAULT 0,
            transcription TEXT,
            transcription_status TEXT NOT NULL,
            ai_summary TEXT,
            summary_status TEXT NOT NULL,
            error TEXT,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Telemedicina
        CREATE TABLE IF NOT EXISTS telemedicine_sessions (
            id TEXT PRIMARY KEY,
            appointment_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            professional_id TEXT NOT NULL,
            room_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT,
            duration_minutes INTEGER,
            notes TEXT,
            created_at TEXT NOT NULL
        );

        -- Histórico de mensagens WhatsApp
        CREATE TABLE IF NOT EXISTS whatsapp_messages (
            id TEXT PRIMARY KEY,
            to_number TEXT NOT NULL,
            content TEXT NOT NULL,
            message_type TEXT NOT NULL,
            direction TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> AppResult<()> {
    // colunas adicionadas depois da primeira versão do esquema
    let _ = conn.execute("ALTER TABLE patients ADD COLUMN rg TEXT", []);
    let _ = conn.execute("ALTER TABLE products ADD COLUMN image_url TEXT", []);
    let _ = conn.execute(
        "ALTER TABLE medical_audio_records ADD COLUMN extracted_info TEXT",
        [],
    );
    Ok(())
}

// ============ Conversões de linha ============

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn get_naive_dt(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn get_opt_json<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> AppResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// ============ Contas ============

const ACCOUNT_COLUMNS: &str =
    "id, email, full_name, phone, role, password_hash, active, last_login_at, created_at";

fn map_account_row(row: &Row) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        phone: row.get(3)?,
        role: UserRole::from_str(&row.get::<_, String>(4)?),
        password_hash: row.get(5)?,
        active: row.get(6)?,
        last_login_at: get_opt_ts(row, 7)?,
        created_at: get_ts(row, 8)?,
    })
}

fn insert_account(conn: &Connection, account: &UserAccount) -> AppResult<()> {
    conn.execute(
        r#"INSERT INTO accounts (id, email, full_name, phone, role, password_hash, active, last_login_at, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            account.id,
            account.email,
            account.full_name,
            account.phone,
            account.role.as_str(),
            account.password_hash,
            account.active,
            account.last_login_at.map(|d| d.to_rfc3339()),
            account.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            AppError::Conflict("E-mail já cadastrado".to_string())
        } else {
            e.into()
        }
    })?;
    Ok(())
}

impl Database {
    pub fn create_account(&self, account: &UserAccount) -> AppResult<()> {
        let conn = self.get_conn()?;
        insert_account(&conn, account)?;
        log::info!("Conta criada: {} ({})", account.email, account.role.as_str());
        Ok(())
    }

    /// Conta de cliente e ficha de paciente gravadas juntas ou nenhuma delas
    pub fn create_account_with_patient(
        &self,
        account: &UserAccount,
        patient: &Patient,
    ) -> AppResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        insert_account(&tx, account)?;
        insert_patient(&tx, patient)?;
        tx.commit()?;
        log::info!("Conta criada com ficha de paciente: {}", account.email);
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> AppResult<Option<UserAccount>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_account_row).optional()?)
    }

    pub fn get_account_by_email(&self, email: &str) -> AppResult<Option<UserAccount>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE lower(email) = lower(?1)",
            ACCOUNT_COLUMNS
        );
        Ok(conn.query_row(&sql, [email], map_account_row).optional()?)
    }

    pub fn update_last_login(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE accounts SET last_login_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

// ============ Pacientes ============

const PATIENT_COLUMNS: &str = "id, full_name, email, phone, whatsapp_number, cpf, rg, birth_date, gender, address, observations, tags, active, created_at, updated_at";

fn map_patient_row(row: &Row) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        whatsapp_number: row.get(4)?,
        cpf: row.get(5)?,
        rg: row.get(6)?,
        birth_date: row.get(7)?,
        gender: row.get(8)?,
        address: row.get(9)?,
        observations: row.get(10)?,
        tags: get_json(row, 11)?,
        active: row.get(12)?,
        created_at: get_ts(row, 13)?,
        updated_at: get_ts(row, 14)?,
    })
}

fn insert_patient(conn: &Connection, patient: &Patient) -> AppResult<()> {
    conn.execute(
        r#"INSERT INTO patients (id, full_name, email, phone, whatsapp_number, cpf, rg, birth_date, gender, address, observations, tags, active, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
        params![
            patient.id,
            patient.full_name,
            patient.email,
            patient.phone,
            patient.whatsapp_number,
            patient.cpf,
            patient.rg,
            patient.birth_date,
            patient.gender,
            patient.address,
            patient.observations,
            serde_json::to_string(&patient.tags)?,
            patient.active,
            patient.created_at.to_rfc3339(),
            patient.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl Database {
    pub fn create_patient(&self, patient: &Patient) -> AppResult<()> {
        let conn = self.get_conn()?;
        insert_patient(&conn, patient)?;
        log::info!("Paciente cadastrado: {}", patient.id);
        Ok(())
    }

    pub fn get_patient(&self, id: &str) -> AppResult<Option<Patient>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM patients WHERE id = ?1", PATIENT_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_patient_row).optional()?)
    }

    /// Lista pacientes, com busca por nome, CPF ou telefone
    pub fn list_patients(&self, search: Option<&str>) -> AppResult<Vec<Patient>> {
        let conn = self.get_conn()?;
        let patients = match search.filter(|s| !s.trim().is_empty()) {
            Some(s) => {
                let sql = format!(
                    "SELECT {} FROM patients WHERE full_name LIKE ?1 OR cpf LIKE ?1 OR phone LIKE ?1 ORDER BY full_name",
                    PATIENT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([format!("%{}%", s.trim())], map_patient_row)?;
                collect(rows)?
            }
            None => {
                let sql = format!("SELECT {} FROM patients ORDER BY full_name", PATIENT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], map_patient_row)?;
                collect(rows)?
            }
        };
        log::debug!("[DB] list_patients: {} resultados", patients.len());
        Ok(patients)
    }

    pub fn update_patient(&self, patient: &Patient) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE patients SET full_name = ?2, email = ?3, phone = ?4, whatsapp_number = ?5, cpf = ?6, rg = ?7,
               birth_date = ?8, gender = ?9, address = ?10, observations = ?11, tags = ?12, active = ?13, updated_at = ?14
               WHERE id = ?1"#,
            params![
                patient.id,
                patient.full_name,
                patient.email,
                patient.phone,
                patient.whatsapp_number,
                patient.cpf,
                patient.rg,
                patient.birth_date,
                patient.gender,
                patient.address,
                patient.observations,
                serde_json::to_string(&patient.tags)?,
                patient.active,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Paciente não encontrado".to_string()));
        }
        Ok(())
    }

    pub fn delete_patient(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM patients WHERE id = ?1", [id])?;
        log::info!("Paciente removido: {}", id);
        Ok(())
    }

    pub fn find_patient_by_whatsapp(&self, number: &str) -> AppResult<Option<Patient>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM patients WHERE whatsapp_number = ?1 LIMIT 1",
            PATIENT_COLUMNS
        );
        Ok(conn.query_row(&sql, [number], map_patient_row).optional()?)
    }

    /// Pacientes ativos que fazem aniversário na data
    pub fn list_birthday_patients(&self, date: NaiveDate) -> AppResult<Vec<Patient>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM patients WHERE active = 1 AND birth_date LIKE ?1 ORDER BY full_name",
            PATIENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([format!("%-{}", date.format("%m-%d"))], map_patient_row)?;
        collect(rows)
    }

    pub fn count_patients_created_since(&self, since: DateTime<Utc>) -> AppResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM patients WHERE created_at >= ?1",
            [since.to_rfc3339()],
            |row| row.get(0),
        )?)
    }
}

// ============ Profissionais ============

const PROFESSIONAL_COLUMNS: &str = "id, name, email, phone, whatsapp_number, schedule_color, schedule_order, receives_bookings, sees_all_appointments, email_notifications, active, created_at";

fn map_professional_row(row: &Row) -> rusqlite::Result<Professional> {
    Ok(Professional {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        whatsapp_number: row.get(4)?,
        schedule_color: row.get(5)?,
        schedule_order: row.get(6)?,
        receives_bookings: row.get(7)?,
        sees_all_appointments: row.get(8)?,
        email_notifications: row.get(9)?,
        active: row.get(10)?,
        created_at: get_ts(row, 11)?,
    })
}

impl Database {
    pub fn create_professional(&self, p: &Professional) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO professionals (id, name, email, phone, whatsapp_number, schedule_color, schedule_order, receives_bookings, sees_all_appointments, email_notifications, active, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                p.id,
                p.name,
                p.email,
                p.phone,
                p.whatsapp_number,
                p.schedule_color,
                p.schedule_order,
                p.receives_bookings,
                p.sees_all_appointments,
                p.email_notifications,
                p.active,
                p.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Profissional cadastrado: {}", p.name);
        Ok(())
    }

    pub fn get_professional(&self, id: &str) -> AppResult<Option<Professional>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM professionals WHERE id = ?1", PROFESSIONAL_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_professional_row).optional()?)
    }

    /// Lista profissionais na ordem da agenda
    pub fn list_professionals(&self, active_only: bool) -> AppResult<Vec<Professional>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM professionals {} ORDER BY schedule_order, name",
            PROFESSIONAL_COLUMNS,
            if active_only { "WHERE active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_professional_row)?;
        collect(rows)
    }

    pub fn update_professional(&self, p: &Professional) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE professionals SET name = ?2, email = ?3, phone = ?4, whatsapp_number = ?5, schedule_color = ?6,
               schedule_order = ?7, receives_bookings = ?8, sees_all_appointments = ?9, email_notifications = ?10, active = ?11
               WHERE id = ?1"#,
            params![
                p.id,
                p.name,
                p.email,
                p.phone,
                p.whatsapp_number,
                p.schedule_color,
                p.schedule_order,
                p.receives_bookings,
                p.sees_all_appointments,
                p.email_notifications,
                p.active,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Profissional não encontrado".to_string()));
        }
        Ok(())
    }

    pub fn delete_professional(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM professionals WHERE id = ?1", [id])?;
        log::info!("Profissional removido: {}", id);
        Ok(())
    }

    pub fn find_professional_by_whatsapp(&self, number: &str) -> AppResult<Option<Professional>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM professionals WHERE whatsapp_number = ?1 LIMIT 1",
            PROFESSIONAL_COLUMNS
        );
        Ok(conn.query_row(&sql, [number], map_professional_row).optional()?)
    }

    /// Substitui a grade semanal do profissional
    pub fn set_availability(
        &self,
        professional_id: &str,
        windows: &[AvailabilityWindow],
    ) -> AppResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM availability WHERE professional_id = ?1",
            [professional_id],
        )?;
        for w in windows {
            tx.execute(
                "INSERT INTO availability (professional_id, day_of_week, start_time, end_time, is_available) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![professional_id, w.day_of_week, w.start_time, w.end_time, w.is_available],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_availability(
        &self,
        professional_id: &str,
        day_of_week: Option<u32>,
    ) -> AppResult<Vec<AvailabilityWindow>> {
        let conn = self.get_conn()?;
        let map = |row: &Row| -> rusqlite::Result<AvailabilityWindow> {
            Ok(AvailabilityWindow {
                professional_id: row.get(0)?,
                day_of_week: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                is_available: row.get(4)?,
            })
        };
        match day_of_week {
            Some(day) => {
                let mut stmt = conn.prepare(
                    "SELECT professional_id, day_of_week, start_time, end_time, is_available FROM availability
                     WHERE professional_id = ?1 AND day_of_week = ?2 ORDER BY start_time",
                )?;
                let rows = stmt.query_map(params![professional_id, day], map)?;
                collect(rows)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT professional_id, day_of_week, start_time, end_time, is_available FROM availability
                     WHERE professional_id = ?1 ORDER BY day_of_week, start_time",
                )?;
                let rows = stmt.query_map([professional_id], map)?;
                collect(rows)
            }
        }
    }
}

// ============ Procedimentos ============

const PROCEDURE_COLUMNS: &str =
    "id, name, description, category, duration_minutes, price, available_for_online_booking, active, created_at";

fn map_procedure_row(row: &Row) -> rusqlite::Result<Procedure> {
    Ok(Procedure {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        duration_minutes: row.get(4)?,
        price: row.get(5)?,
        available_for_online_booking: row.get(6)?,
        active: row.get(7)?,
        created_at: get_ts(row, 8)?,
    })
}

impl Database {
    pub fn create_procedure(&self, p: &Procedure) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO procedures (id, name, description, category, duration_minutes, price, available_for_online_booking, active, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                p.id,
                p.name,
                p.description,
                p.category,
                p.duration_minutes,
                p.price,
                p.available_for_online_booking,
                p.active,
                p.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Procedimento cadastrado: {}", p.name);
        Ok(())
    }

    pub fn get_procedure(&self, id: &str) -> AppResult<Option<Procedure>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM procedures WHERE id = ?1", PROCEDURE_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_procedure_row).optional()?)
    }

    pub fn list_procedures(&self, active_only: bool) -> AppResult<Vec<Procedure>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM procedures {} ORDER BY name",
            PROCEDURE_COLUMNS,
            if active_only { "WHERE active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_procedure_row)?;
        collect(rows)
    }

    pub fn update_procedure(&self, p: &Procedure) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE procedures SET name = ?2, description = ?3, category = ?4, duration_minutes = ?5, price = ?6,
               available_for_online_booking = ?7, active = ?8 WHERE id = ?1"#,
            params![
                p.id,
                p.name,
                p.description,
                p.category,
                p.duration_minutes,
                p.price,
                p.available_for_online_booking,
                p.active,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Procedimento não encontrado".to_string()));
        }
        Ok(())
    }

    /// Categorias distintas de procedimentos, em ordem alfabética
    pub fn procedure_categories(&self) -> AppResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM procedures WHERE category IS NOT NULL AND category <> '' ORDER BY category",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        collect(rows)
    }
}

// ============ Estoque ============

const PRODUCT_COLUMNS: &str = "id, name, description, category, quantity, min_quantity, sale_price, is_for_sale, active, image_url, created_at";

fn map_product_row(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        quantity: row.get(4)?,
        min_quantity: row.get(5)?,
        sale_price: row.get(6)?,
        is_for_sale: row.get(7)?,
        active: row.get(8)?,
        image_url: row.get(9)?,
        created_at: get_ts(row, 10)?,
    })
}

impl Database {
    pub fn create_product(&self, p: &Product) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO products (id, name, description, category, quantity, min_quantity, sale_price, is_for_sale, active, image_url, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                p.id,
                p.name,
                p.description,
                p.category,
                p.quantity,
                p.min_quantity,
                p.sale_price,
                p.is_for_sale,
                p.active,
                p.image_url,
                p.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Produto cadastrado: {}", p.name);
        Ok(())
    }

    pub fn get_product(&self, id: &str) -> AppResult<Option<Product>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_product_row).optional()?)
    }

    pub fn list_products(&self, for_sale_only: bool) -> AppResult<Vec<Product>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM products {} ORDER BY name",
            PRODUCT_COLUMNS,
            if for_sale_only {
                "WHERE is_for_sale = 1 AND active = 1"
            } else {
                ""
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_product_row)?;
        collect(rows)
    }

    pub fn update_product(&self, p: &Product) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE products SET name = ?2, description = ?3, category = ?4, quantity = ?5, min_quantity = ?6,
               sale_price = ?7, is_for_sale = ?8, active = ?9, image_url = ?10 WHERE id = ?1"#,
            params![
                p.id,
                p.name,
                p.description,
                p.category,
                p.quantity,
                p.min_quantity,
                p.sale_price,
                p.is_for_sale,
                p.active,
                p.image_url,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Produto não encontrado".to_string()));
        }
        Ok(())
    }

    /// Produtos com quantidade no mínimo ou abaixo dele
    pub fn list_low_stock(&self) -> AppResult<Vec<Product>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM products WHERE active = 1 AND quantity <= min_quantity ORDER BY quantity, name",
            PRODUCT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_product_row)?;
        collect(rows)
    }
}

// ============ Agendamentos ============

const APPOINTMENT_COLUMNS: &str = "id, patient_id, professional_id, procedure_id, start_time, end_time, status, notes, source, confirmation_sent, created_at";

fn map_appointment_row(row: &Row) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        professional_id: row.get(2)?,
        procedure_id: row.get(3)?,
        start_time: get_naive_dt(row, 4)?,
        end_time: get_naive_dt(row, 5)?,
        status: AppointmentStatus::from_str(&row.get::<_, String>(6)?),
        notes: row.get(7)?,
        source: row.get(8)?,
        confirmation_sent: row.get(9)?,
        created_at: get_ts(row, 10)?,
    })
}

impl Database {
    pub fn create_appointment(&self, a: &Appointment) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO appointments (id, patient_id, professional_id, procedure_id, start_time, end_time, status, notes, source, confirmation_sent, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                a.id,
                a.patient_id,
                a.professional_id,
                a.procedure_id,
                fmt_dt(&a.start_time),
                fmt_dt(&a.end_time),
                a.status.as_str(),
                a.notes,
                a.source,
                a.confirmation_sent,
                a.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Agendamento criado: {} em {}", a.id, fmt_dt(&a.start_time));
        Ok(())
    }

    pub fn get_appointment(&self, id: &str) -> AppResult<Option<Appointment>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM appointments WHERE id = ?1", APPOINTMENT_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_appointment_row).optional()?)
    }

    /// Lista agendamentos com filtros simples de igualdade/intervalo
    pub fn list_appointments(&self, query: &AppointmentQuery) -> AppResult<Vec<Appointment>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(ref id) = query.professional_id {
            clauses.push("professional_id = ?");
            values.push(id.clone());
        }
        if let Some(ref id) = query.patient_id {
            clauses.push("patient_id = ?");
            values.push(id.clone());
        }
        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(ref start) = query.start_date {
            clauses.push("start_time >= ?");
            values.push(fmt_dt(start));
        }
        if let Some(ref end) = query.end_date {
            clauses.push("start_time <= ?");
            values.push(fmt_dt(end));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM appointments {} ORDER BY start_time",
            APPOINTMENT_COLUMNS, where_sql
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_appointment_row)?;
        collect(rows)
    }

    pub fn update_appointment(&self, a: &Appointment) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE appointments SET professional_id = ?2, procedure_id = ?3, start_time = ?4, end_time = ?5,
               status = ?6, notes = ?7, confirmation_sent = ?8 WHERE id = ?1"#,
            params![
                a.id,
                a.professional_id,
                a.procedure_id,
                fmt_dt(&a.start_time),
                fmt_dt(&a.end_time),
                a.status.as_str(),
                a.notes,
                a.confirmation_sent,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Agendamento não encontrado".to_string()));
        }
        Ok(())
    }

    /// Altera somente o status e devolve o registro atualizado
    pub fn set_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> AppResult<Appointment> {
        {
            let conn = self.get_conn()?;
            let changed = conn.execute(
                "UPDATE appointments SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound("Agendamento não encontrado".to_string()));
            }
        }
        log::info!("Agendamento {} -> {}", id, status.as_str());
        self.get_appointment(id)?
            .ok_or_else(|| AppError::NotFound("Agendamento não encontrado".to_string()))
    }

    pub fn mark_confirmation_sent(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE appointments SET confirmation_sent = 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Agendamento pendente mais recente do paciente
    pub fn latest_pending_appointment(&self, patient_id: &str) -> AppResult<Option<Appointment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM appointments WHERE patient_id = ?1 AND status = 'pending' ORDER BY created_at DESC LIMIT 1",
            APPOINTMENT_COLUMNS
        );
        Ok(conn.query_row(&sql, [patient_id], map_appointment_row).optional()?)
    }

    /// Agendamentos não cancelados de um profissional no dia
    pub fn professional_appointments_on(
        &self,
        professional_id: &str,
        date: NaiveDate,
    ) -> AppResult<Vec<Appointment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM appointments WHERE professional_id = ?1 AND start_time >= ?2 AND start_time <= ?3
             AND status <> 'cancelled' ORDER BY start_time",
            APPOINTMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                professional_id,
                format!("{}T00:00:00", fmt_date(&date)),
                format!("{}T23:59:59", fmt_date(&date))
            ],
            map_appointment_row,
        )?;
        collect(rows)
    }
}

// ============ Caixa ============

const SALE_COLUMNS: &str =
    "id, client_id, sale_date, total_amount, amount_paid, payment_method, status, created_at";

fn map_sale_row(row: &Row) -> rusqlite::Result<Sale> {
    Ok(Sale {
        id: row.get(0)?,
        client_id: row.get(1)?,
        sale_date: get_date(row, 2)?,
        total_amount: row.get(3)?,
        amount_paid: row.get(4)?,
        payment_method: row.get(5)?,
        status: PaymentStatus::from_str(&row.get::<_, String>(6)?),
        created_at: get_ts(row, 7)?,
    })
}

fn map_movement_row(row: &Row) -> rusqlite::Result<CashMovement> {
    Ok(CashMovement {
        id: row.get(0)?,
        movement_type: MovementType::from_str(&row.get::<_, String>(1)?),
        amount: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        sale_id: row.get(5)?,
        moved_at: get_ts(row, 6)?,
    })
}

fn map_register_row(row: &Row) -> rusqlite::Result<CashRegister> {
    let status: String = row.get(5)?;
    Ok(CashRegister {
        id: row.get(0)?,
        opened_at: get_ts(row, 1)?,
        opening_balance: row.get(2)?,
        closed_at: get_opt_ts(row, 3)?,
        closing_balance: row.get(4)?,
        status: if status == "closed" {
            RegisterStatus::Closed
        } else {
            RegisterStatus::Open
        },
    })
}

fn insert_movement(conn: &Connection, m: &CashMovement) -> rusqlite::Result<usize> {
    conn.execute(
        r#"INSERT INTO cash_movements (id, movement_type, amount, description, category, sale_id, moved_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            m.id,
            m.movement_type.as_str(),
            m.amount,
            m.description,
            m.category,
            m.sale_id,
            m.moved_at.to_rfc3339(),
        ],
    )
}

impl Database {
    /// Grava venda, itens e entrada de caixa numa única transação
    pub fn record_sale(
        &self,
        sale: &Sale,
        items: &[SaleItem],
        movement: &CashMovement,
    ) -> AppResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO sales (id, client_id, sale_date, total_amount, amount_paid, payment_method, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                sale.id,
                sale.client_id,
                fmt_date(&sale.sale_date),
                sale.total_amount,
                sale.amount_paid,
                sale.payment_method,
                sale.status.as_str(),
                sale.created_at.to_rfc3339(),
            ],
        )?;
        for item in items {
            tx.execute(
                r#"INSERT INTO sale_items (id, sale_id, procedure_id, quantity, unit_price, discount, subtotal)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    item.id,
                    item.sale_id,
                    item.procedure_id,
                    item.quantity,
                    item.unit_price,
                    item.discount,
                    item.subtotal,
                ],
            )?;
        }
        insert_movement(&tx, movement)?;
        tx.commit()?;
        log::info!("Venda registrada: {} ({:.2})", sale.id, sale.total_amount);
        Ok(())
    }

    pub fn get_sale(&self, id: &str) -> AppResult<Option<Sale>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_sale_row).optional()?)
    }

    pub fn list_sale_items(&self, sale_id: &str) -> AppResult<Vec<SaleItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sale_id, procedure_id, quantity, unit_price, discount, subtotal FROM sale_items WHERE sale_id = ?1",
        )?;
        let rows = stmt.query_map([sale_id], |row| {
            Ok(SaleItem {
                id: row.get(0)?,
                sale_id: row.get(1)?,
                procedure_id: row.get(2)?,
                quantity: row.get(3)?,
                unit_price: row.get(4)?,
                discount: row.get(5)?,
                subtotal: row.get(6)?,
            })
        })?;
        collect(rows)
    }

    /// Vendas em algum dos status informados, mais recentes primeiro
    pub fn list_sales_by_status(&self, statuses: &[PaymentStatus]) -> AppResult<Vec<Sale>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM sales WHERE status IN ({}) ORDER BY sale_date DESC, created_at DESC",
            SALE_COLUMNS, placeholders
        );
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            map_sale_row,
        )?;
        collect(rows)
    }

    /// Vendas com data entre `start` e `end` (inclusive)
    pub fn list_sales_between(&self, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<Sale>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM sales WHERE sale_date >= ?1 AND sale_date <= ?2 ORDER BY sale_date DESC",
            SALE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fmt_date(&start), fmt_date(&end)], map_sale_row)?;
        collect(rows)
    }

    pub fn create_cash_movement(&self, movement: &CashMovement) -> AppResult<()> {
        let conn = self.get_conn()?;
        insert_movement(&conn, movement)?;
        log::info!(
            "Movimento de caixa: {} {:.2}",
            movement.movement_type.as_str(),
            movement.amount
        );
        Ok(())
    }

    /// Movimentos no intervalo [since, until), em ordem cronológica
    pub fn list_cash_movements(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<CashMovement>> {
        let conn = self.get_conn()?;
        let until = until.unwrap_or_else(|| Utc::now() + chrono::Duration::days(36500));
        let mut stmt = conn.prepare(
            "SELECT id, movement_type, amount, description, category, sale_id, moved_at FROM cash_movements
             WHERE moved_at >= ?1 AND moved_at < ?2 ORDER BY moved_at",
        )?;
        let rows = stmt.query_map(
            params![since.to_rfc3339(), until.to_rfc3339()],
            map_movement_row,
        )?;
        collect(rows)
    }

    pub fn create_cash_register(&self, register: &CashRegister) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO cash_registers (id, opened_at, opening_balance, closed_at, closing_balance, status) VALUES (?1, ?2, ?3, NULL, NULL, 'open')",
            params![
                register.id,
                register.opened_at.to_rfc3339(),
                register.opening_balance
            ],
        )?;
        log::info!("Caixa aberto: {}", register.id);
        Ok(())
    }

    pub fn get_open_cash_register(&self) -> AppResult<Option<CashRegister>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, opened_at, opening_balance, closed_at, closing_balance, status FROM cash_registers
                 WHERE status = 'open' ORDER BY opened_at DESC LIMIT 1",
                [],
                map_register_row,
            )
            .optional()?)
    }

    pub fn close_cash_register(
        &self,
        id: &str,
        closed_at: DateTime<Utc>,
        closing_balance: f64,
    ) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE cash_registers SET status = 'closed', closed_at = ?2, closing_balance = ?3 WHERE id = ?1",
            params![id, closed_at.to_rfc3339(), closing_balance],
        )?;
        log::info!("Caixa fechado: {} (saldo {:.2})", id, closing_balance);
        Ok(())
    }
}

// ============ Pedidos ============

impl Database {
    /// Cria pedido, itens e baixa de estoque numa única transação
    pub fn create_order(&self, order: &Order) -> AppResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO orders (id, patient_id, total_amount, shipping_address, source, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                order.id,
                order.patient_id,
                order.total_amount,
                order.shipping_address,
                order.source,
                order.status,
                order.created_at.to_rfc3339(),
            ],
        )?;

        for item in &order.items {
            let stock: Option<i64> = tx
                .query_row(
                    "SELECT quantity FROM products WHERE id = ?1",
                    [&item.product_id],
                    |row| row.get(0),
                )
                .optional()?;
            let stock = stock.ok_or_else(|| {
                AppError::NotFound(format!("Produto não encontrado: {}", item.product_id))
            })?;
            if stock < item.quantity {
                return Err(AppError::Validation(format!(
                    "Estoque insuficiente para o produto {}",
                    item.product_id
                )));
            }

            tx.execute(
                r#"INSERT INTO order_items (id, order_id, product_id, quantity, unit_price, subtotal)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![
                    item.id,
                    order.id,
                    item.product_id,
                    item.quantity,
                    item.unit_price,
                    item.subtotal,
                ],
            )?;
            tx.execute(
                "UPDATE products SET quantity = quantity - ?2 WHERE id = ?1",
                params![item.product_id, item.quantity],
            )?;
        }

        tx.commit()?;
        log::info!("Pedido criado: {} ({:.2})", order.id, order.total_amount);
        Ok(())
    }

    fn order_items(conn: &Connection, order_id: &str) -> AppResult<Vec<OrderItem>> {
        let mut stmt = conn.prepare(
            "SELECT oi.id, oi.order_id, oi.product_id, p.name, oi.quantity, oi.unit_price, oi.subtotal
             FROM order_items oi LEFT JOIN products p ON p.id = oi.product_id WHERE oi.order_id = ?1",
        )?;
        let rows = stmt.query_map([order_id], |row| {
            Ok(OrderItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                product_id: row.get(2)?,
                product_name: row.get(3)?,
                quantity: row.get(4)?,
                unit_price: row.get(5)?,
                subtotal: row.get(6)?,
            })
        })?;
        collect(rows)
    }

    fn map_order_row(row: &Row) -> rusqlite::Result<Order> {
        Ok(Order {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            total_amount: row.get(2)?,
            shipping_address: row.get(3)?,
            source: row.get(4)?,
            status: row.get(5)?,
            items: Vec::new(),
            created_at: get_ts(row, 6)?,
        })
    }

    pub fn get_order(&self, id: &str) -> AppResult<Option<Order>> {
        let conn = self.get_conn()?;
        let order = conn
            .query_row(
                "SELECT id, patient_id, total_amount, shipping_address, source, status, created_at FROM orders WHERE id = ?1",
                [id],
                Self::map_order_row,
            )
            .optional()?;
        match order {
            Some(mut order) => {
                order.items = Self::order_items(&conn, &order.id)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    pub fn list_orders_by_patient(&self, patient_id: &str) -> AppResult<Vec<Order>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, patient_id, total_amount, shipping_address, source, status, created_at FROM orders
             WHERE patient_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([patient_id], Self::map_order_row)?;
        let mut orders = collect(rows)?;
        for order in orders.iter_mut() {
            order.items = Self::order_items(&conn, &order.id)?;
        }
        Ok(orders)
    }
}

// ============ Financeiro ============

fn map_financial_row(row: &Row) -> rusqlite::Result<FinancialRecord> {
    Ok(FinancialRecord {
        id: row.get(0)?,
        record_type: RecordType::from_str(&row.get::<_, String>(1)?),
        category: row.get(2)?,
        amount: row.get(3)?,
        date: get_date(row, 4)?,
        description: row.get(5)?,
        status: RecordStatus::from_str(&row.get::<_, String>(6)?),
        created_at: get_ts(row, 7)?,
    })
}

impl Database {
    pub fn create_financial_record(&self, r: &FinancialRecord) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO financial_records (id, record_type, category, amount, date, description, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                r.id,
                r.record_type.as_str(),
                r.category,
                r.amount,
                fmt_date(&r.date),
                r.description,
                r.status.as_str(),
                r.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Lançamento financeiro: {} {:.2}", r.record_type.as_str(), r.amount);
        Ok(())
    }

    pub fn list_financial_records(&self, query: &FinancialQuery) -> AppResult<Vec<FinancialRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(t) = query.record_type {
            clauses.push("record_type = ?");
            values.push(t.as_str().to_string());
        }
        if let Some(s) = query.status {
            clauses.push("status = ?");
            values.push(s.as_str().to_string());
        }
        if let Some(ref d) = query.start_date {
            clauses.push("date >= ?");
            values.push(fmt_date(d));
        }
        if let Some(ref d) = query.end_date {
            clauses.push("date <= ?");
            values.push(fmt_date(d));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, record_type, category, amount, date, description, status, created_at FROM financial_records {} ORDER BY date DESC",
            where_sql
        );
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_financial_row)?;
        collect(rows)
    }
}

// ============ Automação ============

const RULE_COLUMNS: &str = "id, name, trigger_type, trigger_offset_minutes, channel, message_template, webhook_url, is_active, created_at";

fn map_rule_row(row: &Row) -> rusqlite::Result<AutomationRule> {
    Ok(AutomationRule {
        id: row.get(0)?,
        name: row.get(1)?,
        trigger_type: TriggerType::from_str(&row.get::<_, String>(2)?),
        trigger_offset_minutes: row.get(3)?,
        channel: row.get(4)?,
        message_template: row.get(5)?,
        webhook_url: row.get(6)?,
        is_active: row.get(7)?,
        created_at: get_ts(row, 8)?,
    })
}

impl Database {
    pub fn create_automation_rule(&self, rule: &AutomationRule) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO automation_rules (id, name, trigger_type, trigger_offset_minutes, channel, message_template, webhook_url, is_active, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                rule.id,
                rule.name,
                rule.trigger_type.as_str(),
                rule.trigger_offset_minutes,
                rule.channel,
                rule.message_template,
                rule.webhook_url,
                rule.is_active,
                rule.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Regra de automação criada: {}", rule.name);
        Ok(())
    }

    pub fn get_automation_rule(&self, id: &str) -> AppResult<Option<AutomationRule>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM automation_rules WHERE id = ?1", RULE_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_rule_row).optional()?)
    }

    pub fn list_automation_rules(&self, active_only: bool) -> AppResult<Vec<AutomationRule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM automation_rules {} ORDER BY name",
            RULE_COLUMNS,
            if active_only { "WHERE is_active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_rule_row)?;
        collect(rows)
    }

    pub fn update_automation_rule(&self, rule: &AutomationRule) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE automation_rules SET name = ?2, trigger_type = ?3, trigger_offset_minutes = ?4, channel = ?5,
               message_template = ?6, webhook_url = ?7, is_active = ?8 WHERE id = ?1"#,
            params![
                rule.id,
                rule.name,
                rule.trigger_type.as_str(),
                rule.trigger_offset_minutes,
                rule.channel,
                rule.message_template,
                rule.webhook_url,
                rule.is_active,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Regra não encontrada".to_string()));
        }
        Ok(())
    }

    pub fn delete_automation_rule(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM automation_rules WHERE id = ?1", [id])?;
        log::info!("Regra de automação removida: {}", id);
        Ok(())
    }

    pub fn create_automation_log(&self, log_entry: &AutomationLog) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO automation_logs (id, rule_id, target_id, phone, message, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                log_entry.id,
                log_entry.rule_id,
                log_entry.target_id,
                log_entry.phone,
                log_entry.message,
                log_entry.status,
                log_entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_automation_logs(
        &self,
        rule_id: Option<&str>,
        limit: i64,
    ) -> AppResult<Vec<AutomationLog>> {
        let conn = self.get_conn()?;
        let map = |row: &Row| -> rusqlite::Result<AutomationLog> {
            Ok(AutomationLog {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                rule_name: row.get(2)?,
                target_id: row.get(3)?,
                phone: row.get(4)?,
                message: row.get(5)?,
                status: row.get(6)?,
                created_at: get_ts(row, 7)?,
            })
        };
        let base = "SELECT l.id, l.rule_id, r.name, l.target_id, l.phone, l.message, l.status, l.created_at
                    FROM automation_logs l LEFT JOIN automation_rules r ON r.id = l.rule_id";
        match rule_id {
            Some(id) => {
                let sql = format!("{} WHERE l.rule_id = ?1 ORDER BY l.created_at DESC LIMIT ?2", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![id, limit], map)?;
                collect(rows)
            }
            None => {
                let sql = format!("{} ORDER BY l.created_at DESC LIMIT ?1", base);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([limit], map)?;
                collect(rows)
            }
        }
    }

    /// Verifica se a regra já disparou para o alvo
    pub fn has_automation_log(&self, rule_id: &str, target_id: &str) -> AppResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM automation_logs WHERE rule_id = ?1 AND target_id = ?2",
            params![rule_id, target_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

// ============ Anamnese ============

fn map_anamnesis_row(row: &Row) -> rusqlite::Result<Anamnesis> {
    Ok(Anamnesis {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        fields: get_json(row, 3)?,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
    })
}

const ANAMNESIS_SELECT: &str = "SELECT a.id, a.patient_id, p.full_name, a.fields, a.created_at, a.updated_at
     FROM anamnesis a LEFT JOIN patients p ON p.id = a.patient_id";

impl Database {
    pub fn create_anamnesis(&self, a: &Anamnesis) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO anamnesis (id, patient_id, fields, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                a.id,
                a.patient_id,
                serde_json::to_string(&a.fields)?,
                a.created_at.to_rfc3339(),
                a.updated_at.to_rfc3339(),
            ],
        )?;
        log::info!("Anamnese registrada para paciente {}", a.patient_id);
        Ok(())
    }

    pub fn get_anamnesis(&self, id: &str) -> AppResult<Option<Anamnesis>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE a.id = ?1", ANAMNESIS_SELECT);
        Ok(conn.query_row(&sql, [id], map_anamnesis_row).optional()?)
    }

    pub fn list_anamnesis(&self, patient_id: Option<&str>) -> AppResult<Vec<Anamnesis>> {
        let conn = self.get_conn()?;
        match patient_id {
            Some(pid) => {
                let sql = format!(
                    "{} WHERE a.patient_id = ?1 ORDER BY a.created_at DESC",
                    ANAMNESIS_SELECT
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([pid], map_anamnesis_row)?;
                collect(rows)
            }
            None => {
                let sql = format!("{} ORDER BY a.created_at DESC", ANAMNESIS_SELECT);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], map_anamnesis_row)?;
                collect(rows)
            }
        }
    }

    pub fn update_anamnesis(&self, id: &str, fields: &AnamnesisFields) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE anamnesis SET fields = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(fields)?, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Anamnese não encontrada".to_string()));
        }
        Ok(())
    }

    pub fn delete_anamnesis(&self, id: &str) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM anamnesis WHERE id = ?1", [id])?;
        Ok(())
    }
}

// ============ Prontuários por áudio ============

const AUDIO_COLUMNS: &str = "id, patient_id, professional_id, appointment_id, audio_path, file_size_bytes, transcription, transcription_status, ai_summary, summary_status, error, source, created_at, extracted_info";

fn map_audio_row(row: &Row) -> rusqlite::Result<MedicalAudioRecord> {
    Ok(MedicalAudioRecord {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        professional_id: row.get(2)?,
        appointment_id: row.get(3)?,
        audio_path: row.get(4)?,
        file_size_bytes: row.get(5)?,
        transcription: row.get(6)?,
        transcription_status: ProcessingStatus::from_str(&row.get::<_, String>(7)?),
        ai_summary: row.get(8)?,
        summary_status: ProcessingStatus::from_str(&row.get::<_, String>(9)?),
        error: row.get(10)?,
        source: row.get(11)?,
        created_at: get_ts(row, 12)?,
        extracted_info: get_opt_json(row, 13)?,
    })
}

impl Database {
    pub fn create_audio_record(&self, r: &MedicalAudioRecord) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO medical_audio_records (id, patient_id, professional_id, appointment_id, audio_path, file_size_bytes,
               transcription, transcription_status, ai_summary, summary_status, error, source, created_at, extracted_info)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
            params![
                r.id,
                r.patient_id,
                r.professional_id,
                r.appointment_id,
                r.audio_path,
                r.file_size_bytes,
                r.transcription,
                r.transcription_status.as_str(),
                r.ai_summary,
                r.summary_status.as_str(),
                r.error,
                r.source,
                r.created_at.to_rfc3339(),
                r.extracted_info.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn update_audio_record(&self, r: &MedicalAudioRecord) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"UPDATE medical_audio_records SET transcription = ?2, transcription_status = ?3, ai_summary = ?4,
               summary_status = ?5, error = ?6, extracted_info = ?7 WHERE id = ?1"#,
            params![
                r.id,
                r.transcription,
                r.transcription_status.as_str(),
                r.ai_summary,
                r.summary_status.as_str(),
                r.error,
                r.extracted_info.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_audio_record(&self, id: &str) -> AppResult<Option<MedicalAudioRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM medical_audio_records WHERE id = ?1", AUDIO_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_audio_row).optional()?)
    }

    pub fn list_audio_records_by_patient(
        &self,
        patient_id: &str,
    ) -> AppResult<Vec<MedicalAudioRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM medical_audio_records WHERE patient_id = ?1 ORDER BY created_at DESC",
            AUDIO_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], map_audio_row)?;
        collect(rows)
    }
}

// ============ Telemedicina ============

const SESSION_COLUMNS: &str = "id, appointment_id, patient_id, professional_id, room_id, status, started_at, ended_at, duration_minutes, notes, created_at";

fn map_session_row(row: &Row) -> rusqlite::Result<TelemedicineSession> {
    Ok(TelemedicineSession {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        patient_id: row.get(2)?,
        professional_id: row.get(3)?,
        room_id: row.get(4)?,
        status: SessionStatus::from_str(&row.get::<_, String>(5)?),
        started_at: get_opt_ts(row, 6)?,
        ended_at: get_opt_ts(row, 7)?,
        duration_minutes: row.get(8)?,
        notes: row.get(9)?,
        created_at: get_ts(row, 10)?,
    })
}

impl Database {
    pub fn create_telemedicine_session(&self, s: &TelemedicineSession) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO telemedicine_sessions (id, appointment_id, patient_id, professional_id, room_id, status, started_at, ended_at, duration_minutes, notes, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                s.id,
                s.appointment_id,
                s.patient_id,
                s.professional_id,
                s.room_id,
                s.status.as_str(),
                s.started_at.map(|d| d.to_rfc3339()),
                s.ended_at.map(|d| d.to_rfc3339()),
                s.duration_minutes,
                s.notes,
                s.created_at.to_rfc3339(),
            ],
        )?;
        log::info!("Sessão de telemedicina criada: {}", s.room_id);
        Ok(())
    }

    pub fn get_telemedicine_session(&self, id: &str) -> AppResult<Option<TelemedicineSession>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM telemedicine_sessions WHERE id = ?1", SESSION_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_session_row).optional()?)
    }

    pub fn update_telemedicine_session(&self, s: &TelemedicineSession) -> AppResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE telemedicine_sessions SET status = ?2, started_at = ?3, ended_at = ?4, duration_minutes = ?5, notes = ?6
               WHERE id = ?1"#,
            params![
                s.id,
                s.status.as_str(),
                s.started_at.map(|d| d.to_rfc3339()),
                s.ended_at.map(|d| d.to_rfc3339()),
                s.duration_minutes,
                s.notes,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("Sessão não encontrada".to_string()));
        }
        Ok(())
    }
}

// ============ WhatsApp ============

impl Database {
    pub fn log_whatsapp_message(&self, m: &WhatsAppMessage) -> AppResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO whatsapp_messages (id, to_number, content, message_type, direction, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                m.id,
                m.to_number,
                m.content,
                m.message_type,
                m.direction,
                m.status,
                m.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_whatsapp_messages(&self, limit: i64) -> AppResult<Vec<WhatsAppMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, to_number, content, message_type, direction, status, created_at FROM whatsapp_messages
             ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(WhatsAppMessage {
                id: row.get(0)?,
                to_number: row.get(1)?,
                content: row.get(2)?,
                message_type: row.get(3)?,
                direction: row.get(4)?,
                status: row.get(5)?,
                created_at: get_ts(row, 6)?,
            })
        })?;
        collect(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(day: u32, hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    fn sample_appointment(db: &Database, start: NaiveDateTime) -> Appointment {
        let a = NewAppointment {
            patient_id: "p1".into(),
            professional_id: Some("pro1".into()),
            procedure_id: "proc1".into(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(60),
            notes: None,
            source: "manual".into(),
        }
        .into_appointment();
        db.create_appointment(&a).unwrap();
        a
    }

    #[test]
    fn test_patient_crud_and_search() {
        let db = Database::open_in_memory().unwrap();
        let mut maria = Patient::new("Maria Souza".into());
        maria.cpf = Some("123.456.789-00".into());
        maria.tags = vec!["vip".into()];
        db.create_patient(&maria).unwrap();
        db.create_patient(&Patient::new("Ana Lima".into())).unwrap();

        let all = db.list_patients(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].full_name, "Ana Lima");

        let found = db.list_patients(Some("456")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, vec!["vip".to_string()]);

        let found = db.list_patients(Some("souza")).unwrap();
        assert_eq!(found.len(), 1);

        maria.phone = Some("11999990000".into());
        db.update_patient(&maria).unwrap();
        let loaded = db.get_patient(&maria.id).unwrap().unwrap();
        assert_eq!(loaded.phone.as_deref(), Some("11999990000"));

        db.delete_patient(&maria.id).unwrap();
        assert!(db.get_patient(&maria.id).unwrap().is_none());
    }

    #[test]
    fn test_update_missing_patient_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let ghost = Patient::new("Ninguém".into());
        assert!(matches!(db.update_patient(&ghost), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_appointment_filters() {
        let db = Database::open_in_memory().unwrap();
        let a1 = sample_appointment(&db, dt(10, 9, 0));
        let _a2 = sample_appointment(&db, dt(11, 9, 0));
        db.set_appointment_status(&a1.id, AppointmentStatus::Cancelled)
            .unwrap();

        let cancelled = db
            .list_appointments(&AppointmentQuery {
                status: Some(AppointmentStatus::Cancelled),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cancelled.len(), 1);

        let range = db
            .list_appointments(&AppointmentQuery {
                start_date: Some(dt(11, 0, 0)),
                end_date: Some(dt(11, 23, 59)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(range.len(), 1);

        let day = db
            .professional_appointments_on("pro1", NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
            .unwrap();
        assert!(day.is_empty(), "cancelled appointments are ignored");
    }

    #[test]
    fn test_set_status_on_missing_appointment() {
        let db = Database::open_in_memory().unwrap();
        let result = db.set_appointment_status("nope", AppointmentStatus::Confirmed);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_account_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let account = UserAccount {
            id: "u1".into(),
            email: "a@b.com".into(),
            full_name: "A".into(),
            phone: None,
            role: UserRole::Client,
            password_hash: "x".into(),
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        db.create_account(&account).unwrap();
        assert!(db.get_account_by_email("A@B.COM").unwrap().is_some());

        let mut dup = account.clone();
        dup.id = "u2".into();
        assert!(matches!(db.create_account(&dup), Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_account_with_patient_rolls_back_together() {
        let db = Database::open_in_memory().unwrap();
        let mut taken = Patient::new("Já existe".into());
        taken.id = "u1".into();
        db.create_patient(&taken).unwrap();

        let account = UserAccount {
            id: "u1".into(),
            email: "nova@b.com".into(),
            full_name: "Nova".into(),
            phone: None,
            role: UserRole::Client,
            password_hash: "x".into(),
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        let mut patient = Patient::new("Nova".into());
        patient.id = account.id.clone();
        assert!(db.create_account_with_patient(&account, &patient).is_err());
        // a conta não fica órfã quando a ficha falha
        assert!(db.get_account_by_email("nova@b.com").unwrap().is_none());

        let mut ok = account.clone();
        ok.id = "u2".into();
        patient.id = "u2".into();
        db.create_account_with_patient(&ok, &patient).unwrap();
        assert!(db.get_account("u2").unwrap().is_some());
        assert_eq!(db.get_patient("u2").unwrap().unwrap().full_name, "Nova");
    }

    #[test]
    fn test_order_decrements_stock_and_rejects_overdraw() {
        let db = Database::open_in_memory().unwrap();
        let mut product = NewProduct {
            name: "Sérum".into(),
            description: None,
            category: None,
            quantity: 3,
            min_quantity: 1,
            sale_price: Some(50.0),
            is_for_sale: true,
            image_url: None,
        }
        .into_product();
        db.create_product(&product).unwrap();

        let order = Order {
            id: "o1".into(),
            patient_id: "p1".into(),
            total_amount: 100.0,
            shipping_address: None,
            source: "pwa".into(),
            status: "pending".into(),
            items: vec![OrderItem {
                id: "i1".into(),
                order_id: "o1".into(),
                product_id: product.id.clone(),
                product_name: None,
                quantity: 2,
                unit_price: 50.0,
                subtotal: 100.0,
            }],
            created_at: Utc::now(),
        };
        db.create_order(&order).unwrap();
        product = db.get_product(&product.id).unwrap().unwrap();
        assert_eq!(product.quantity, 1);
        assert_eq!(db.list_low_stock().unwrap().len(), 1);

        let loaded = db.get_order("o1").unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].product_name.as_deref(), Some("Sérum"));

        let mut second = order.clone();
        second.id = "o2".into();
        second.items[0].id = "i2".into();
        second.items[0].order_id = "o2".into();
        assert!(matches!(db.create_order(&second), Err(AppError::Validation(_))));
        // a transação foi desfeita: nenhum pedido o2
        assert!(db.get_order("o2").unwrap().is_none());
        assert_eq!(db.get_product(&product.id).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn test_birthday_lookup() {
        let db = Database::open_in_memory().unwrap();
        let mut p = Patient::new("Carla".into());
        p.birth_date = Some("1985-07-04".into());
        db.create_patient(&p).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        assert_eq!(db.list_birthday_patients(today).unwrap().len(), 1);
        let other = NaiveDate::from_ymd_opt(2026, 7, 5).unwrap();
        assert!(db.list_birthday_patients(other).unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clinica.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_patient(&Patient::new("Persistida".into())).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_patients(None).unwrap().len(), 1);
    }
}
