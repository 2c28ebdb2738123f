use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use types::SessionLogEntry;
use udp_transport::Exchange;
use wallbox_client::WallboxClient;

mod scalar;

pub use scalar::{EnergyRegisters, SharedScalar};

pub const METRIC_VOLTAGE: &str = "keba_voltage";
pub const METRIC_CURRENT: &str = "keba_current";
pub const METRIC_CURRENT_LIMIT: &str = "keba_current_limit";
pub const METRIC_POWER: &str = "keba_power";
pub const METRIC_ENERGY_TOTAL: &str = "keba_energy_total_wh";
pub const METRIC_ENERGY_SESSION: &str = "keba_energy_session_wh";
pub const METRIC_ENERGY_SESSION_LIMIT: &str = "keba_energy_session_limit";
pub const METRIC_STATUS: &str = "keba_status";
pub const METRIC_PLUG_STATUS: &str = "keba_plug_status";
pub const METRIC_SCRAPE_TOTAL: &str = "keba_scrape_total";
pub const METRIC_SCRAPE_ERRORS: &str = "keba_scrape_errors";

const PHASES: [&str; 3] = ["1", "2", "3"];

/// History list served to readers; replaced wholesale after every successful fetch.
pub type HistorySnapshot = Arc<RwLock<Vec<SessionLogEntry>>>;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub history_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            history_interval: Duration::from_secs(10),
        }
    }
}

/// Registers help text and units with the installed recorder.
pub fn describe_metrics() {
    describe_gauge!(METRIC_VOLTAGE, "Voltage of the 3 phases in volts");
    describe_gauge!(METRIC_CURRENT, "Current of the 3 phases in ampere");
    describe_gauge!(METRIC_CURRENT_LIMIT, "Maximum amperes permitted");
    describe_gauge!(METRIC_POWER, "Power draw in watts");
    describe_gauge!(
        METRIC_ENERGY_TOTAL,
        "Total energy supplied by the wallbox in Wh"
    );
    describe_gauge!(
        METRIC_ENERGY_SESSION,
        "Energy supplied by the wallbox during this charging session in Wh"
    );
    describe_gauge!(
        METRIC_ENERGY_SESSION_LIMIT,
        "Maximum energy to be supplied in this charging session"
    );
    describe_gauge!(
        METRIC_STATUS,
        "State of the charging station (Starting, NotReady, Ready, Charging, Error, AuthRejected)"
    );
    describe_gauge!(METRIC_PLUG_STATUS, "Status of the plug (cable)");
    describe_counter!(METRIC_SCRAPE_TOTAL, "UDP reports requested from the wallbox");
    describe_counter!(METRIC_SCRAPE_ERRORS, "UDP reports that failed");
}

/// Copies the energy registers into the exported values; call right before rendering.
///
/// Both are set to the latest reading, fraction included, so the session value
/// falls back when the wallbox starts a new session.
pub fn publish_energy(energy: &EnergyRegisters) {
    gauge!(METRIC_ENERGY_TOTAL).set(energy.total_wh.get());
    gauge!(METRIC_ENERGY_SESSION).set(energy.session_wh.get());
}

/// Outcome of one telemetry tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requests: u64,
    pub errors: u64,
}

/// Polls `report 2` and `report 3` and mirrors them into gauges.
pub struct TelemetryPoller<E> {
    client: Arc<WallboxClient<E>>,
    energy: EnergyRegisters,
    shutdown: watch::Receiver<bool>,
    interval: Duration,
}

impl<E: Exchange> TelemetryPoller<E> {
    pub fn new(
        client: Arc<WallboxClient<E>>,
        energy: EnergyRegisters,
        shutdown: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            energy,
            shutdown,
            interval,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let report = self.poll_once().await;
                    info!(
                        requests = report.requests,
                        errors = report.errors,
                        elapsed_ms = started.elapsed().as_millis(),
                        "telemetry poll complete"
                    );
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("telemetry poller shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    /// One tick. A failed config fetch does not skip the session fetch.
    pub async fn poll_once(&self) -> TickReport {
        let mut report = TickReport::default();

        report.requests += 1;
        counter!(METRIC_SCRAPE_TOTAL).increment(1);
        match self.client.fetch_config().await {
            Ok(config) => {
                gauge!(METRIC_CURRENT_LIMIT, "kind" => "hw")
                    .set(f64::from(config.max_current) / 1000.0);
                gauge!(METRIC_CURRENT_LIMIT, "kind" => "user")
                    .set(f64::from(config.current_limit) / 1000.0);
                gauge!(METRIC_STATUS).set(config.state.code() as f64);
                gauge!(METRIC_ENERGY_SESSION_LIMIT).set(config.energy_limit as f64 / 10.0);
                gauge!(METRIC_PLUG_STATUS, "kind" => "station")
                    .set(flag(config.plug.station_engaged()));
                gauge!(METRIC_PLUG_STATUS, "kind" => "locked").set(flag(config.plug.locked()));
                gauge!(METRIC_PLUG_STATUS, "kind" => "ev")
                    .set(flag(config.plug.vehicle_engaged()));
            }
            Err(err) => {
                report.errors += 1;
                counter!(METRIC_SCRAPE_ERRORS).increment(1);
                warn!(error = %err, "config report failed");
            }
        }

        report.requests += 1;
        counter!(METRIC_SCRAPE_TOTAL).increment(1);
        let session = match self.client.fetch_session().await {
            Ok(session) => session,
            Err(err) => {
                report.errors += 1;
                counter!(METRIC_SCRAPE_ERRORS).increment(1);
                warn!(error = %err, "session report failed");
                return report;
            }
        };

        for (index, phase) in PHASES.iter().enumerate() {
            gauge!(METRIC_VOLTAGE, "phase" => *phase).set(f64::from(session.voltage[index]));
            gauge!(METRIC_CURRENT, "phase" => *phase)
                .set(f64::from(session.current[index]) / 1000.0);
        }
        gauge!(METRIC_POWER).set(session.power_w());

        self.energy.total_wh.set(session.total_wh());
        self.energy.session_wh.set(session.energy_wh());

        report
    }
}

/// Re-reads the session history and swaps it into the shared snapshot.
pub struct HistoryPoller<E> {
    client: Arc<WallboxClient<E>>,
    snapshot: HistorySnapshot,
    shutdown: watch::Receiver<bool>,
    interval: Duration,
}

impl<E: Exchange> HistoryPoller<E> {
    pub fn new(
        client: Arc<WallboxClient<E>>,
        snapshot: HistorySnapshot,
        shutdown: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            snapshot,
            shutdown,
            interval,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("history poller shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    /// Returns whether the snapshot was replaced. On failure the previous list stays.
    pub async fn poll_once(&self) -> bool {
        let started = Instant::now();
        match self.client.fetch_history().await {
            Ok(history) => {
                let sessions = history.len();
                *self.snapshot.write().await = history;
                info!(
                    sessions,
                    elapsed_ms = started.elapsed().as_millis(),
                    "history snapshot updated"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, "history fetch failed");
                false
            }
        }
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
