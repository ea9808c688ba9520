//! ferry - ephemeral CI runner controller
//!
//! 起動の流れ:
//! 1. logging を初期化
//! 2. runner image を pull（失敗したら終了）
//! 3. 既存の runner を label から Registry に復元
//! 4. RetentionLoop を起動
//! 5. webhook を受け付ける。signal を受けたら grace 期間内で drain して終了

mod shutdown;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use ferry_core::app::bootstrap::{ensure_image, recover_registry};
use ferry_core::app::config::DEFAULT_IMAGE;
use ferry_core::app::{ControllerConfig, EventValidator, IdentityRegistry, RetentionLoop, RunnerController};
use ferry_core::http::{AppState, InFlight, router};
use ferry_core::impls::DockerCliProvisioner;
use ferry_core::observability::{LogFormat, init_logging};
use ferry_core::ports::Provisioner;

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "Spawns one ephemeral runner per queued CI job")]
struct Cli {
    /// Runner image reference.
    #[arg(long, env = "FERRY_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Shared secret used to verify webhook signatures.
    #[arg(long, env = "FERRY_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: String,

    /// Bind the host docker socket into runners (privileged).
    #[arg(long, env = "FERRY_ALLOW_DIND")]
    allow_dind: bool,

    #[arg(long, env = "FERRY_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    #[arg(long, env = "FERRY_PROVISION_TIMEOUT_SECS", default_value_t = 60)]
    provision_timeout_secs: u64,

    /// How long completed job records are kept.
    #[arg(long, env = "FERRY_RETENTION_SECS", default_value_t = 3600)]
    retention_secs: u64,

    #[arg(long, env = "FERRY_MAX_COMPLETED_RECORDS", default_value_t = 10_000)]
    max_completed_records: usize,

    #[arg(long, env = "FERRY_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    shutdown_grace_secs: u64,

    /// `json` or `pretty`.
    #[arg(long, env = "FERRY_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[arg(long, env = "FERRY_DOCKER_BIN", default_value = "docker")]
    docker_bin: PathBuf,

    /// Assume the image is already present.
    #[arg(long, env = "FERRY_SKIP_PULL")]
    skip_pull: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if cli.webhook_secret.is_empty() {
        bail!("--webhook-secret must not be empty");
    }

    let config = ControllerConfig::default()
        .with_image(cli.image.clone())
        .with_runtime_socket(cli.allow_dind)
        .with_provision_timeout(Duration::from_secs(cli.provision_timeout_secs))
        .with_retention(
            Duration::from_secs(cli.retention_secs),
            cli.max_completed_records,
        );
    if config.allow_runtime_socket {
        warn!(socket = %config.runtime_socket_path.display(), "runners get the host runtime socket");
    }

    let provisioner: Arc<dyn Provisioner> = Arc::new(DockerCliProvisioner::new(&cli.docker_bin));
    if cli.skip_pull {
        info!(image = %config.image, "skipping image pull");
    } else {
        ensure_image(provisioner.as_ref(), &config.image)
            .await
            .context("runner image is unavailable")?;
    }

    let registry = Arc::new(IdentityRegistry::new());
    let recovered = recover_registry(provisioner.as_ref(), &registry).await;
    info!(recovered, "registry ready");

    let controller = Arc::new(RunnerController::new(config, provisioner, registry));

    let stop_retention = Arc::new(Notify::new());
    let retention = tokio::spawn(RetentionLoop::new(Arc::clone(&controller), Arc::clone(&stop_retention)).run());

    let state = AppState::new(EventValidator::new(cli.webhook_secret.into_bytes()), controller);
    let in_flight = state.in_flight.clone();

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, "listening for webhooks");

    let grace = Duration::from_secs(cli.shutdown_grace_secs);
    let (deadline_tx, deadline_rx) = oneshot::channel::<Instant>();
    let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        if let Err(e) = shutdown::wait_for_shutdown_signal().await {
            error!(error = %e, "could not install signal handlers");
            std::future::pending::<()>().await;
        }
        info!(grace_secs = grace.as_secs(), "shutdown signal received, draining");
        let _ = deadline_tx.send(Instant::now() + grace);
    });
    let server = tokio::spawn(async move { serve.await });

    drain(server, deadline_rx, &in_flight).await?;

    stop_retention.notify_one();
    if let Err(e) = retention.await {
        error!(error = %e, "retention loop panicked");
    }
    info!("shutdown complete");
    Ok(())
}

/// Waits for the server to stop, then for transitions whose connection
/// already went away. Both waits share the one deadline fixed when the
/// shutdown signal arrived.
async fn drain(
    mut server: JoinHandle<std::io::Result<()>>,
    mut deadline_rx: oneshot::Receiver<Instant>,
    in_flight: &InFlight,
) -> Result<()> {
    let deadline = tokio::select! {
        res = &mut server => {
            res.context("server task panicked")?.context("server failed")?;
            // graceful shutdown は signal の後にしか終わらない
            deadline_rx.try_recv().unwrap_or_else(|_| Instant::now())
        }
        Ok(deadline) = &mut deadline_rx => {
            match tokio::time::timeout_at(deadline, &mut server).await {
                Ok(res) => res.context("server task panicked")?.context("server failed")?,
                Err(_) => {
                    warn!("grace period elapsed, dropping open connections");
                    server.abort();
                }
            }
            deadline
        }
    };

    if tokio::time::timeout_at(deadline, in_flight.drained()).await.is_err() {
        warn!(active = in_flight.active(), "abandoning unfinished transitions");
    }
    Ok(())
}
