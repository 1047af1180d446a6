use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use tradetrack_bridge::server::{self, BridgeState};
use tradetrack_bridge::{
    run_cycle, terminal_failure, BridgeConfig, BridgeFiles, ConfigError, Connector, Language,
    LiveConnector, Text, DEFAULT_BIND,
};

#[derive(Parser)]
#[command(name = "tradetrack-bridge")]
#[command(about = "TradeTrack Sync: connects your MT5 terminal to the TradeTrack journal")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory holding config.json and state.json (default: next to the executable)
    #[arg(long, env = "TRADETRACK_BRIDGE_DIR")]
    data_dir: Option<PathBuf>,

    /// Interface language; saved for later runs
    #[arg(long, value_enum)]
    language: Option<Language>,

    /// Host of the MT5-side terminal script
    #[arg(long, env = "MT5_TERMINAL_HOST", default_value = "127.0.0.1")]
    terminal_host: String,

    /// Port of the MT5-side terminal script
    #[arg(long, env = "MT5_TERMINAL_PORT", default_value_t = 5556)]
    terminal_port: u16,

    /// Terminal call timeout in milliseconds
    #[arg(long, env = "MT5_TIMEOUT", default_value_t = 30_000)]
    mt5_timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local server for the web app (default)
    Serve {
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },

    /// Wait for the first config from the web app, then exit
    Setup {
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },

    /// Connect to MT5 once, notify the backend, then exit
    Once {
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },

    /// Run one sync cycle and exit
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let files = cli
        .data_dir
        .clone()
        .map(BridgeFiles::new)
        .unwrap_or_else(BridgeFiles::beside_executable);
    if let Some(language) = cli.language {
        files.save_language(language)?;
    }

    let connector: Arc<dyn Connector> = Arc::new(LiveConnector {
        terminal_host: cli.terminal_host.clone(),
        terminal_port: cli.terminal_port,
        timeout: Duration::from_millis(cli.mt5_timeout),
    });
    let state = Arc::new(BridgeState::new(files, connector));

    match cli.command.unwrap_or(Commands::Serve {
        bind: DEFAULT_BIND.to_string(),
    }) {
        Commands::Serve { bind } => run_serve(state, &bind).await,
        Commands::Setup { bind } => {
            wait_for_config(state, &bind).await?;
            println!("Config received from browser.");
            Ok(())
        }
        Commands::Once { bind } => run_once(state, &bind).await,
        Commands::Sync => run_sync(state).await,
    }
}

async fn run_serve(state: Arc<BridgeState>, bind: &str) -> Result<()> {
    let lang = state.files.language();
    info!("{}", Text::LogStarted.get(lang));
    if state.files.has_config() {
        info!("{}", Text::StatusConnected.get(lang));
    } else {
        info!("{}", Text::LogEnterCredentials.get(lang));
    }
    server::serve(state, bind, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serve until the web app posts a config.
async fn wait_for_config(state: Arc<BridgeState>, bind: &str) -> Result<()> {
    println!("Bridge: waiting for connection from browser.");
    println!("  Open your web app, go to the bridge section and click Connect.");
    println!("  (The web app posts the config to http://{}/config)", bind);

    let waiter = state.clone();
    server::serve(state, bind, async move { waiter.config_received().await }).await
}

async fn load_or_setup(state: &Arc<BridgeState>, bind: &str) -> Result<BridgeConfig> {
    match state.files.load_config() {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            wait_for_config(state.clone(), bind).await?;
            Ok(state.files.load_config()?)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_once(state: Arc<BridgeState>, bind: &str) -> Result<()> {
    let config = load_or_setup(&state, bind).await?;
    let lang = state.files.language();

    let sessions = state.connector.sessions(&config);
    if let Err(e) = sessions.probe(config.terminal_credentials()).await {
        bail!(terminal_failure(&e, lang));
    }

    match state.connector.backend(&config)?.bridge_connected().await {
        Ok(cursor) => {
            info!(last_sync_at = ?cursor.last_sync_at, "{}", Text::LogServerNotified.get(lang))
        }
        Err(e) => warn!(error = %e, "{}", Text::LogServerNotifyFailed.get(lang)),
    }
    println!("Connected. Exiting.");
    Ok(())
}

async fn run_sync(state: Arc<BridgeState>) -> Result<()> {
    let config = match state.files.load_config() {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => bail!(
            "No config at {}. Run the bridge and connect from the browser first.",
            path.display()
        ),
        Err(e) => return Err(e.into()),
    };
    let lang = state.files.language();
    let backend = state.connector.backend(&config)?;
    let sessions = state.connector.sessions(&config);

    match run_cycle(&sessions, backend.as_ref(), &state.files, &config, Utc::now()).await {
        Ok(outcome) => {
            println!("{}", outcome.message);
            Ok(())
        }
        Err(e) => bail!(e.user_message(lang)),
    }
}
