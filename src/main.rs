use clap::{Parser, Subcommand};
use logrelay::cli::emit::{emit, EmitOptions};
use logrelay::cli::run::Role;
use logrelay::config::resolve_config_path;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logrelay")]
#[command(about = "Log forwarding agent and label-indexed log store", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every role configured in the config file
    Run,
    /// Tail files and receive syslog, forward to a store
    Agent,
    /// Accept pushes, serve queries and evaluate alert rules
    Store,
    /// Emit synthetic log lines
    Emit {
        /// Append lines to this file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Send RFC 5424 datagrams to this address
        #[arg(long)]
        syslog: Option<String>,
        /// Lines per second
        #[arg(long, default_value_t = 1)]
        rate: u32,
        /// Stop after this many lines
        #[arg(long)]
        count: Option<u64>,
        #[arg(long, default_value = "logrelay-emit")]
        app_name: String,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logrelay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => logrelay::cli::run::run(config_path, Role::All).await?,
        Some(Commands::Agent) => logrelay::cli::run::run(config_path, Role::Agent).await?,
        Some(Commands::Store) => logrelay::cli::run::run(config_path, Role::Store).await?,
        Some(Commands::Emit {
            file,
            syslog,
            rate,
            count,
            app_name,
        }) => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_cancel.cancel();
                }
            });

            let options = EmitOptions {
                file,
                syslog,
                rate,
                count,
                app_name,
            };
            emit(options, cancel).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logrelay::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
