use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use poller_actor::{
    EnergyRegisters, HistoryPoller, HistorySnapshot, SharedScalar, TelemetryPoller, TickReport,
};
use tokio::sync::{watch, RwLock};
use types::SessionLogEntry;
use udp_transport::{Exchange, TransportError};
use wallbox_client::WallboxClient;

/// Replies from a mutable table so a test can change the device between ticks.
#[derive(Default)]
struct FakeWallbox {
    replies: Mutex<HashMap<String, String>>,
}

impl FakeWallbox {
    fn set(&self, command: &str, json: &str) {
        self.replies
            .lock()
            .expect("replies lock")
            .insert(command.to_string(), json.to_string());
    }

    fn clear(&self) {
        self.replies.lock().expect("replies lock").clear();
    }
}

#[async_trait]
impl Exchange for FakeWallbox {
    async fn exchange(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.replies
            .lock()
            .expect("replies lock")
            .get(command)
            .map(|json| json.clone().into_bytes())
            .ok_or(TransportError::Timeout { timeout_ms: 2_000 })
    }
}

#[test]
fn shared_scalar_never_tears() {
    let scalar = SharedScalar::new(0.0);
    let written: Vec<f64> = (0..8).map(|n| f64::from(n) * 1_234.567_89 + 0.1).collect();

    let writers: Vec<_> = written
        .iter()
        .map(|value| {
            let scalar = scalar.clone();
            let value = *value;
            thread::spawn(move || {
                for _ in 0..10_000 {
                    scalar.set(value);
                }
            })
        })
        .collect();

    let reader = {
        let scalar = scalar.clone();
        let allowed = written.clone();
        thread::spawn(move || {
            for _ in 0..50_000 {
                let seen = scalar.get();
                assert!(seen == 0.0 || allowed.contains(&seen), "torn read {seen}");
            }
        })
    };

    for writer in writers {
        writer.join().expect("writer");
    }
    reader.join().expect("reader");
    assert!(written.contains(&scalar.get()));
}

#[test]
fn shared_scalar_clones_share_the_cell() {
    let a = SharedScalar::default();
    let b = a.clone();
    b.set(42.5);
    assert_eq!(a.get(), 42.5);
}

#[tokio::test]
async fn telemetry_tick_updates_energy_registers() {
    let client = Arc::new(WallboxClient::new(FakeWallbox::default()));
    client.transport().set(
        "report 2",
        r#"{"State": 3, "Plug": 7, "Curr HW": 16000, "Curr user": 8000}"#,
    );
    client.transport().set(
        "report 3",
        r#"{"U1": 230, "I1": 8000, "P": 1840000, "E pres": 12345, "E total": 9876543}"#,
    );

    let energy = EnergyRegisters::default();
    let (_tx, rx) = watch::channel(false);
    let poller =
        TelemetryPoller::new(client.clone(), energy.clone(), rx, Duration::from_secs(10));

    let report = poller.poll_once().await;
    assert_eq!(report, TickReport { requests: 2, errors: 0 });
    assert_eq!(energy.session_wh.get(), 1_234.5);
    assert_eq!(energy.total_wh.get(), 987_654.3);
}

#[tokio::test]
async fn telemetry_tick_survives_partial_failure() {
    let client = Arc::new(WallboxClient::new(FakeWallbox::default()));
    client.transport().set("report 3", r#"{"E pres": 10, "E total": 20}"#);

    let energy = EnergyRegisters::default();
    let (_tx, rx) = watch::channel(false);
    let poller =
        TelemetryPoller::new(client.clone(), energy.clone(), rx, Duration::from_secs(10));

    // config times out, session still read
    let report = poller.poll_once().await;
    assert_eq!(report, TickReport { requests: 2, errors: 1 });
    assert_eq!(energy.total_wh.get(), 2.0);

    // both fail, registers keep the last reading
    client.transport().clear();
    let report = poller.poll_once().await;
    assert_eq!(report, TickReport { requests: 2, errors: 2 });
    assert_eq!(energy.total_wh.get(), 2.0);
}

#[tokio::test]
async fn history_snapshot_replaced_only_on_success() {
    let client = Arc::new(WallboxClient::new(FakeWallbox::default()));
    client.transport().set("report 100", r#"{"Session ID": 12, "E pres": 50}"#);
    client.transport().set("report 101", r#"{"Session ID": 11, "E pres": 70}"#);
    client.transport().set("report 102", r#"{"Session ID": -1}"#);

    let snapshot: HistorySnapshot = Arc::new(RwLock::new(Vec::new()));
    let (_tx, rx) = watch::channel(false);
    let poller =
        HistoryPoller::new(client.clone(), snapshot.clone(), rx, Duration::from_secs(10));

    assert!(poller.poll_once().await);
    let sessions: Vec<i64> = snapshot
        .read()
        .await
        .iter()
        .map(|entry| entry.session)
        .collect();
    assert_eq!(sessions, [12, 11]);

    client.transport().clear();
    assert!(!poller.poll_once().await);
    let kept: Vec<SessionLogEntry> = snapshot.read().await.clone();
    assert_eq!(kept.len(), 2);
}

#[tokio::test]
async fn pollers_stop_on_shutdown() {
    let client = Arc::new(WallboxClient::new(FakeWallbox::default()));
    let snapshot: HistorySnapshot = Arc::new(RwLock::new(Vec::new()));
    let (tx, rx) = watch::channel(false);

    let telemetry = tokio::spawn(
        TelemetryPoller::new(
            client.clone(),
            EnergyRegisters::default(),
            rx.clone(),
            Duration::from_millis(20),
        )
        .run(),
    );
    let history = tokio::spawn(
        HistoryPoller::new(client.clone(), snapshot, rx, Duration::from_millis(20)).run(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).expect("send shutdown");

    tokio::time::timeout(Duration::from_secs(1), telemetry)
        .await
        .expect("telemetry stopped")
        .expect("telemetry join");
    tokio::time::timeout(Duration::from_secs(1), history)
        .await
        .expect("history stopped")
        .expect("history join");
}
