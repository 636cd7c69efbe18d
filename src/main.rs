//! Noble CCTP relayer
//!
//! Watches MessageSent on an EVM source chain, waits for Circle's attestation
//! and delivers each eligible message to Noble with `MsgReceiveMessage`.

use std::sync::Arc;
use std::time::Instant;

use noble_cctp_relayer::api::{self, AppState};
use noble_cctp_relayer::attestation::IrisClient;
use noble_cctp_relayer::config::Config;
use noble_cctp_relayer::db::PgStore;
use noble_cctp_relayer::pipeline::Pipeline;
use noble_cctp_relayer::store::{CheckpointStore, MemoryStore, StateStore};
use noble_cctp_relayer::watchers::EvmLogSource;
use noble_cctp_relayer::writers::{NobleClient, Submitter};
use tokio::sync::watch;
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Noble CCTP relayer");

    let config = Config::load()?;
    info!(
        source = %config.source.name,
        destination_chain = %config.destination.chain_id,
        destination_domain = config.destination.domain,
        "Configuration loaded"
    );

    let (states, checkpoints): (Arc<dyn StateStore>, Arc<dyn CheckpointStore>) =
        match &config.database {
            Some(database) => {
                let store = Arc::new(PgStore::connect(database).await?);
                info!("Database connected, migrations complete");
                (store.clone(), store)
            }
            None => {
                warn!("No database configured, state will not survive a restart");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    let logs = Arc::new(EvmLogSource::new(&config.source)?);
    let attestations = Arc::new(IrisClient::new(&config.attestation)?);
    let submitter: Arc<dyn Submitter> = Arc::new(NobleClient::new(&config.destination)?);
    info!(signer = %submitter.address(), "Relaying as signer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_state = AppState {
        states: states.clone(),
        checkpoints: checkpoints.clone(),
        source_chain: config.source.name.clone(),
        started: Instant::now(),
    };
    let api_config = config.api.clone();
    let api_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(
            &api_config.bind_address,
            api_config.port,
            api_state,
            api_shutdown,
        )
        .await
        {
            error!(error = %e, "API server error");
        }
    });

    let pipeline = Pipeline::new(
        &config,
        logs,
        attestations,
        submitter,
        states,
        checkpoints,
    );
    pipeline.run(shutdown_rx).await?;

    info!("Noble CCTP relayer stopped");
    Ok(())
}

/// Human-readable by default; `LOG_FORMAT=json` for structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,noble_cctp_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
