//! Ridgeline - a Kafka-wire-compatible log broker.
//!
//! Single binary: reads a YAML config (overridable by `RIDGELINE_*`
//! environment variables), opens partition storage and the group
//! coordinator, then runs the wire listener until a shutdown signal arrives.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ridgeline_common::config::Config;
use ridgeline_group::GroupCoordinator;
use ridgeline_log::PartitionRouter;
use ridgeline_security::{Authenticator, InMemoryAuthenticator};
use ridgeline_server::{Broker, ConnServer};
use ridgeline_throttle::Throttle;

mod metrics_server;

#[derive(Parser)]
#[command(name = "ridgeline")]
#[command(author, version, about = "Ridgeline - a Kafka-wire-compatible log broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker
    Server {
        /// Path to a YAML config file; if omitted, defaults plus
        /// environment overrides are used.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Node id advertised in Metadata/FindCoordinator responses.
        #[arg(long, default_value_t = 0)]
        node_id: i32,

        /// Host advertised to clients as the single broker/coordinator.
        #[arg(long, default_value = "localhost")]
        advertised_host: String,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("ridgeline=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            config,
            node_id,
            advertised_host,
        } => run_server(config, node_id, advertised_host).await,
        Commands::Version => {
            println!("ridgeline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_server(config_path: Option<PathBuf>, node_id: i32, advertised_host: String) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load(&path).await.context("failed to load config file")?,
        None => Config::from_env(),
    };

    ridgeline_common::metrics::install_recorder().context("failed to install metrics recorder")?;

    let data_dir = PathBuf::from(&config.server.data_dir);
    let now_ms = chrono::Utc::now().timestamp_millis();

    let log_config = ridgeline_log::LogConfig {
        max_segment_bytes: config.log.max_segment_bytes,
        max_segment_age_ms: config.log.max_segment_age_ms as i64,
        index_interval_bytes: config.log.index_interval_bytes,
    };
    let router = Arc::new(
        PartitionRouter::open(&data_dir, log_config, now_ms).context("failed to open partition storage")?,
    );

    let groups = Arc::new(
        GroupCoordinator::open(&data_dir, config.group.clone()).context("failed to open group coordinator")?,
    );

    let throttle = Arc::new(Throttle::new(config.throttle.clone()));

    let authenticator: Option<Arc<dyn Authenticator>> = if config.security.sasl_enabled {
        let auth = InMemoryAuthenticator::new();
        // No users are provisioned from the config file itself (spec §6:
        // credential provisioning is an external collaborator); an operator
        // wires up a real identity store in a production deployment.
        Some(Arc::new(auth))
    } else {
        None
    };

    let tls_acceptor = if config.security.tls_enabled {
        let cert = config
            .security
            .tls_cert_path
            .as_ref()
            .context("tls_enabled requires tls_cert_path")?;
        let key = config
            .security
            .tls_key_path
            .as_ref()
            .context("tls_enabled requires tls_key_path")?;
        Some(ridgeline_security::load_acceptor(cert.as_ref(), key.as_ref())?)
    } else {
        None
    };

    let broker = Arc::new(Broker::new(
        router.clone(),
        groups.clone(),
        throttle.clone(),
        authenticator,
        config.security.sasl_enabled,
        node_id,
        advertised_host,
        config.server.port as i32,
        config.server.shutdown_grace_secs,
    ));

    let cancel = CancellationToken::new();

    let mut background = tokio::task::JoinSet::new();

    background.spawn({
        let groups = groups.clone();
        let cancel = cancel.clone();
        async move { groups.run(cancel).await }
    });

    if config.throttle.feedback_enabled {
        background.spawn({
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            async move { throttle.run_feedback_loop(cancel).await }
        });
    }

    background.spawn(retention_sweep_loop(router.clone(), config.log.clone(), cancel.clone()));

    if config.metrics.enabled {
        background.spawn(metrics_server::run(config.server.metrics_port, cancel.clone()));
    }

    let server = ConnServer::new(broker.clone(), tls_acceptor);
    let bind_addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move { server.run(&bind_addr, server_cancel).await });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    cancel.cancel();

    server_task.await.context("listener task panicked")??;
    background.shutdown().await;
    Ok(())
}

/// Periodically apply `enforce_retention` to every open partition. Separate
/// from the per-connection request path entirely; a slow sweep never
/// blocks a Produce/Fetch in flight (spec §4.1).
async fn retention_sweep_loop(router: Arc<PartitionRouter>, config: ridgeline_common::config::LogConfig, cancel: CancellationToken) {
    let interval = std::time::Duration::from_secs(60);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return,
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        for topic in router.list() {
            for partition in 0..topic.partition_count {
                if let Ok(log) = router.get(&topic.name, partition) {
                    log.enforce_retention(config.retention_ms, config.retention_bytes, now_ms);
                }
            }
        }
    }
}
