use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tradetrack_api::auth::TokenVerifier;
use tradetrack_api::config::ServerSettings;
use tradetrack_api::state::AppState;
use tradetrack_core::{Store, Terminal};
use tradetrack_data::{MemoryStore, PasswordVault, PgStore};
use tradetrack_engine::SessionManager;
use tradetrack_terminals_common::SimulatedTerminal;
use tradetrack_terminals_metatrader::{MetaTraderConfig, MetaTraderTerminal};

#[derive(Parser)]
#[command(name = "tradetrack")]
#[command(about = "TradeTrack MT5 integration: connect accounts and sync closed trades")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Server(ServerArgs),

    /// Print a fresh password encryption key
    GenerateKey,
}

#[derive(clap::Args)]
struct ServerArgs {
    /// TOML settings file; flags and environment variables override it
    #[arg(short, long, env = "TRADETRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (default 0.0.0.0:8000)
    #[arg(short, long)]
    bind: Option<String>,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Keep everything in memory instead of Postgres (development only)
    #[arg(long, conflicts_with = "database_url")]
    memory_store: bool,

    /// Key for encrypting stored investor passwords
    #[arg(long, env = "ENCRYPTION_KEY_FERNET", hide_env_values = true)]
    encryption_key: Option<String>,

    /// Secret for verifying bearer tokens
    #[arg(long, env = "JWT_SECRET_KEY", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Token signing algorithm (HS256, HS384, HS512)
    #[arg(long, env = "JWT_ALGORITHM")]
    jwt_algorithm: Option<String>,

    /// Terminal call timeout in milliseconds
    #[arg(long, env = "MT5_TIMEOUT")]
    mt5_timeout: Option<u64>,

    /// Path to terminal64.exe, passed to terminal initialisation
    #[arg(long, env = "MT5_PATH")]
    mt5_path: Option<String>,

    /// Host of the MT5-side terminal script
    #[arg(long, env = "MT5_TERMINAL_HOST")]
    terminal_host: Option<String>,

    /// Port of the MT5-side terminal script
    #[arg(long, env = "MT5_TERMINAL_PORT")]
    terminal_port: Option<u16>,

    /// Use the in-memory simulated terminal (development only)
    #[arg(long)]
    simulated_terminal: bool,
}

impl ServerArgs {
    /// File settings with flag and environment overrides applied.
    fn settings(&self) -> Result<ServerSettings> {
        let mut settings = ServerSettings::load(self.config.as_deref())?;
        if let Some(v) = &self.database_url {
            settings.database_url = Some(v.clone());
        }
        if let Some(v) = &self.encryption_key {
            settings.encryption_key_fernet = Some(v.clone());
        }
        if let Some(v) = &self.jwt_secret {
            settings.jwt_secret_key = Some(v.clone());
        }
        if let Some(v) = &self.jwt_algorithm {
            settings.jwt_algorithm = v.clone();
        }
        if let Some(v) = self.mt5_timeout {
            settings.mt5_timeout = v;
        }
        if let Some(v) = &self.mt5_path {
            settings.mt5_path = Some(v.clone());
        }
        if let Some(v) = &self.terminal_host {
            settings.mt5_terminal_host = v.clone();
        }
        if let Some(v) = self.terminal_port {
            settings.mt5_terminal_port = v;
        }
        if let Some(bind) = &self.bind {
            let (host, port) = bind
                .rsplit_once(':')
                .context("Bind address must look like host:port")?;
            settings.api_host = host.to_string();
            settings.api_port = port.parse().context("Invalid bind port")?;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::GenerateKey => {
            println!("{}", PasswordVault::generate_key());
            Ok(())
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let settings = args.settings()?;

    let store: Arc<dyn Store> = if args.memory_store {
        tracing::warn!("Using the in-memory store; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect(settings.database_url()?).await?)
    };

    let terminal: Box<dyn Terminal> = if args.simulated_terminal {
        tracing::warn!("Using the simulated MT5 terminal");
        Box::new(SimulatedTerminal::new())
    } else {
        Box::new(MetaTraderTerminal::new(MetaTraderConfig {
            host: settings.mt5_terminal_host.clone(),
            port: settings.mt5_terminal_port,
            mt5_path: settings.mt5_path.clone(),
            timeout_ms: settings.mt5_timeout,
        }))
    };
    let sessions = Arc::new(SessionManager::new(terminal, settings.terminal_timeout()));

    let vault = PasswordVault::new(settings.encryption_key()?)
        .context("ENCRYPTION_KEY_FERNET is not a valid key")?;
    let auth = TokenVerifier::new(settings.jwt_secret()?, &settings.jwt_algorithm)?;

    let state = Arc::new(AppState::new(store, sessions, vault, auth));
    tradetrack_api::start_server(state, &settings.bind_addr()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "tradetrack",
            "server",
            "--memory-store",
            "--bind",
            "127.0.0.1:9000",
            "--jwt-secret",
            "s3cret",
            "--mt5-timeout",
            "5000",
        ]);
        let Commands::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let settings = args.settings().unwrap();
        assert_eq!(settings.bind_addr(), "127.0.0.1:9000");
        assert_eq!(settings.jwt_secret().unwrap(), "s3cret");
        assert_eq!(settings.mt5_timeout, 5000);
        assert_eq!(settings.jwt_algorithm, "HS256");
    }

    #[test]
    fn test_memory_store_conflicts_with_database_url() {
        let parsed = Cli::try_parse_from([
            "tradetrack",
            "server",
            "--memory-store",
            "--database-url",
            "postgres://localhost/tradetrack",
        ]);
        assert!(parsed.is_err());
    }
}
