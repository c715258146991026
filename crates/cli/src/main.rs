use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    medlink_config::MedlinkConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "medlink", about = "Medlink: real-time coordination hub for hospitals")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "MEDLINK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub server.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port` and `PORT`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write a default config file (fails if one exists).
    Init {
        /// Destination; defaults to the user config directory.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MedlinkConfig> {
    match &cli.config {
        Some(path) => medlink_config::load_config(path),
        None => Ok(medlink_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        Commands::Serve { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "medlink starting");
            let mut config = load_config(&cli)?;
            if let Some(bind) = bind {
                config.server.bind = bind.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            medlink_gateway::start_gateway(config).await
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(&cli)?;
                print!("{}", medlink_config::render_toml(&config)?);
                Ok(())
            },
            ConfigAction::Init { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(medlink_config::find_or_default_config_path);
                medlink_config::write_config(&MedlinkConfig::default(), &path)?;
                println!("wrote {}", path.display());
                Ok(())
            },
        },
    }
}
