use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "coldwire", about = "Coldwire — remote operator gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Bind address (overrides config).
        #[arg(long)]
        bind: Option<String>,
        /// Listening port (overrides config).
        #[arg(long)]
        port: Option<u16>,
        /// Fixed working directory for spawned commands (overrides config).
        #[arg(long)]
        project_root: Option<PathBuf>,
    },
    /// Classify a command string without executing it.
    Classify {
        /// Raw command text, exactly as a client would send it.
        command: String,
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        Commands::Gateway {
            bind,
            port,
            project_root,
        } => {
            let mut config = coldwire_config::discover_and_load();
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(root) = project_root {
                config.exec.project_root = Some(root);
            }

            info!(version = env!("CARGO_PKG_VERSION"), "coldwire starting");
            coldwire_gateway::server::start_gateway(&config).await
        },
        Commands::Classify { command } => {
            let result = coldwire_exec::classify(&command);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        },
    }
}
