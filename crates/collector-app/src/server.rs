use std::future::Future;
use std::io;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;

use poller_actor::{publish_energy, EnergyRegisters, HistorySnapshot};

#[derive(Clone)]
pub struct AppState {
    pub prometheus: PrometheusHandle,
    pub energy: EnergyRegisters,
    pub history: HistorySnapshot,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/history", get(history_handler))
        .with_state(state)
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    publish_energy(&state.energy);
    state.prometheus.render()
}

/// Why the collector stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Signal,
    ServerStopped,
}

/// Waits for either the stop signal or the http server task, whichever ends first.
///
/// A server that fails or panics surfaces as an error; one that returns cleanly
/// before any signal is reported as `Exit::ServerStopped`.
pub async fn wait_for_exit<F>(
    server: &mut JoinHandle<io::Result<()>>,
    stop: F,
) -> anyhow::Result<Exit>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        signal = stop => {
            signal.context("listen for ctrl-c")?;
            Ok(Exit::Signal)
        }
        joined = server => {
            joined
                .context("http server task failed")?
                .context("http server failed")?;
            Ok(Exit::ServerStopped)
        }
    }
}

pub async fn history_handler(State(state): State<AppState>) -> Response {
    let history = state.history.read().await;
    match serde_json::to_vec(&*history) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
