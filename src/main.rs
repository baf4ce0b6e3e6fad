use clap::{Parser, Subcommand};
use std::path::PathBuf;

use clinica::auth;
use clinica::db::Database;
use clinica::models::UserRole;
use clinica::{AppConfig, AppResult};

#[derive(Parser)]
#[command(name = "clinica")]
#[command(about = "Servidor da clínica: agenda, caixa, automações e teleconsulta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Caminho do banco SQLite
    #[arg(long, global = true, env = "CLINICA_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inicia o servidor HTTP (padrão)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Cria a conta de administrador
    InitAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Administrador")]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let mut config = AppConfig::from_env()?;
    if let Some(path) = cli.db_path {
        config.db_path = path;
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            clinica::run(config).await
        }
        Commands::InitAdmin {
            email,
            password,
            name,
        } => {
            let db = Database::open(&config.db_path)?;
            let profile = auth::create_staff_account(&db, &email, &password, &name, UserRole::Admin)?;
            log::info!("Administrador criado: {} ({})", profile.email, profile.id);
            Ok(())
        }
    }
}
