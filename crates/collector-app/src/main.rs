use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use collector_app::{router, wait_for_exit, AppState, CliArgs, CollectorConfig, Exit};
use poller_actor::{describe_metrics, EnergyRegisters, HistoryPoller, TelemetryPoller};
use types::DipSwitches;
use wallbox_client::WallboxClient;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse(env::args().skip(1)).context("invalid arguments")?;
    let mut config =
        CollectorConfig::load_with_path(args.config.clone()).context("load config failed")?;
    args.apply(&mut config);
    config.validate().context("config validation failed")?;

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus recorder install failed")?;
    describe_metrics();

    // an unresolvable wallbox is the only fatal error after startup checks
    let client = WallboxClient::connect(config.wallbox.clone())
        .await
        .with_context(|| format!("resolve wallbox {}", config.wallbox.host))?;
    info!(destination = %client.transport().destination(), "wallbox resolved");
    let client = Arc::new(client);

    match client.fetch_system_info().await {
        Ok(system) => {
            info!(
                product = %system.product,
                serial = %system.serial,
                firmware = %system.firmware,
                dip_switches = %system.dip_switches,
                "wallbox identified"
            );
            if !system.dip_switches.has(DipSwitches::UDP) {
                warn!(dip_switches = %system.dip_switches, "UDP interface switch appears off");
            }
        }
        Err(err) => warn!(error = %err, "system report failed, continuing"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let energy = EnergyRegisters::default();
    let history = Arc::new(RwLock::new(Vec::new()));

    let telemetry_handle = tokio::spawn(
        TelemetryPoller::new(
            client.clone(),
            energy.clone(),
            shutdown_rx.clone(),
            config.poller.poll_interval,
        )
        .run(),
    );
    let history_handle = tokio::spawn(
        HistoryPoller::new(
            client.clone(),
            history.clone(),
            shutdown_rx.clone(),
            config.poller.history_interval,
        )
        .run(),
    );

    let listener = TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("bind http listener {}", config.http_listen))?;
    info!(addr = %config.http_listen, "http: listening");
    notify_ready();

    let app = router(AppState {
        prometheus,
        energy,
        history,
    });
    let mut server_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let exit = wait_for_exit(&mut server, tokio::signal::ctrl_c()).await;
    let _ = shutdown_tx.send(true);

    if let Err(err) = telemetry_handle.await {
        warn!(error = %err, "telemetry poller join failed");
    }
    if let Err(err) = history_handle.await {
        warn!(error = %err, "history poller join failed");
    }
    match exit? {
        Exit::Signal => {
            info!("shutdown signal received");
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "http server failed"),
                Err(err) => warn!(error = %err, "http server join failed"),
            }
            Ok(())
        }
        Exit::ServerStopped => anyhow::bail!("http server stopped unexpectedly"),
    }
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}
