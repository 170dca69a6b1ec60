use crate::agent::{AgentError, AgentRunner};
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::store::{StoreError, StoreRunner};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("config has no '{0}' section")]
    MissingSection(&'static str),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Store,
    /// Every role whose section is present
    All,
}

pub async fn run(config_path: Option<PathBuf>, role: Role) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logrelay/config.yml");
            eprintln!("  /etc/logrelay/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logrelay config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_roles(&config_path, role).await.map_err(|e| e.into())
}

async fn run_roles(config_path: &Path, role: Role) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let (agent, store) = select_roles(config, role)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
        signal_cancel.cancel();
    });

    // Bind everything before starting any task so a taken port fails fast
    let agent = match agent {
        Some(runner) => {
            let sockets = runner.bind().await?;
            Some((runner, sockets))
        }
        None => None,
    };
    let store_listener = match &store {
        Some((_, listen)) => Some(tokio::net::TcpListener::bind(listen).await.map_err(|source| {
            StoreError::Bind {
                addr: listen.clone(),
                source,
            }
        })?),
        None => None,
    };

    // A failing role takes the other one down with it
    let agent_task = async {
        let result = match agent {
            Some((runner, sockets)) => runner.run_with_sockets(sockets, cancel.clone()).await.map_err(RunError::from),
            None => Ok(()),
        };
        if result.is_err() {
            cancel.cancel();
        }
        result
    };
    let store_task = async {
        let result = match (store, store_listener) {
            (Some((runner, _)), Some(listener)) => runner
                .run_with_listener(listener, cancel.clone())
                .await
                .map_err(RunError::from),
            _ => Ok(()),
        };
        if result.is_err() {
            cancel.cancel();
        }
        result
    };

    info!("Started, press Ctrl+C to shut down");
    let (agent_result, store_result) = tokio::join!(agent_task, store_task);
    agent_result?;
    store_result?;

    info!("Shutdown complete");
    Ok(())
}

type Roles = (Option<AgentRunner>, Option<(StoreRunner, String)>);

fn select_roles(config: Config, role: Role) -> Result<Roles, RunError> {
    let want_agent = matches!(role, Role::Agent | Role::All);
    let want_store = matches!(role, Role::Store | Role::All);

    if role == Role::Agent && config.agent.is_none() {
        return Err(RunError::MissingSection("agent"));
    }
    if role == Role::Store && config.store.is_none() {
        return Err(RunError::MissingSection("store"));
    }

    let agent = config.agent.filter(|_| want_agent).map(AgentRunner::new);
    let store = config
        .store
        .filter(|_| want_store)
        .map(|store| {
            let listen = store.listen.clone();
            (StoreRunner::new(store), listen)
        });

    Ok((agent, store))
}
