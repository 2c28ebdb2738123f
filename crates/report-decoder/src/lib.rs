use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use types::{
    ChargerState, DipSwitches, DipSwitchesError, EndReason, LiveConfig, LiveSession, PlugStatus,
    SessionLogEntry, SystemInfo,
};

pub use types::{format_dip_switches, parse_dip_switches};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid DIP-Sw field: {0}")]
    DipSwitches(#[from] DipSwitchesError),
}

/// A reply schema the wallbox can send.
pub trait Report: Sized {
    fn decode(raw: &[u8]) -> Result<Self, DecodeError>;
}

pub fn decode<T: Report>(raw: &[u8]) -> Result<T, DecodeError> {
    T::decode(raw)
}

// Wire key tables. Keys the device leaves out decode to zero.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSystem {
    #[serde(rename = "Product")]
    product: String,
    #[serde(rename = "Serial")]
    serial: String,
    #[serde(rename = "Firmware")]
    firmware: String,
    #[serde(rename = "COM-module")]
    com_module: i64,
    #[serde(rename = "Backend")]
    backend: i64,
    #[serde(rename = "DIP-Sw")]
    dip_switches: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireConfig {
    #[serde(rename = "State")]
    state: i64,
    #[serde(rename = "Plug")]
    plug: u8,
    #[serde(rename = "Curr HW")]
    max_current: u32,
    #[serde(rename = "Curr user")]
    current_limit: u32,
    #[serde(rename = "Setenergy")]
    energy_limit: u64,
    #[serde(rename = "Sec")]
    uptime_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSession {
    #[serde(rename = "E pres")]
    energy: u64,
    #[serde(rename = "E total")]
    total: u64,
    #[serde(rename = "U1")]
    u1: u32,
    #[serde(rename = "U2")]
    u2: u32,
    #[serde(rename = "U3")]
    u3: u32,
    #[serde(rename = "I1")]
    i1: u32,
    #[serde(rename = "I2")]
    i2: u32,
    #[serde(rename = "I3")]
    i3: u32,
    #[serde(rename = "P")]
    power: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireHistorySlot {
    #[serde(rename = "Session ID")]
    session: i64,
    #[serde(rename = "Curr HW")]
    max_current: u32,
    #[serde(rename = "E start", alias = "E Start")]
    start_total: u64,
    #[serde(rename = "E pres", alias = "E Pres")]
    energy: u64,
    #[serde(rename = "started[s]", deserialize_with = "lenient_seconds")]
    started_secs: i64,
    #[serde(rename = "ended[s]", deserialize_with = "lenient_seconds")]
    ended_secs: i64,
    #[serde(rename = "reason")]
    reason: i64,
    #[serde(rename = "RFID tag")]
    rfid_tag: Option<String>,
    #[serde(rename = "RFID class")]
    rfid_class: Option<String>,
}

impl Report for SystemInfo {
    fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireSystem = from_datagram(raw)?;
        let dip_switches = match wire.dip_switches {
            Some(text) => parse_dip_switches(&text)?,
            None => DipSwitches::default(),
        };
        Ok(SystemInfo {
            product: wire.product,
            serial: wire.serial,
            firmware: wire.firmware,
            com_module: wire.com_module,
            backend: wire.backend,
            dip_switches,
        })
    }
}

impl Report for LiveConfig {
    fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireConfig = from_datagram(raw)?;
        Ok(LiveConfig {
            state: ChargerState::from(wire.state),
            plug: PlugStatus(wire.plug),
            max_current: wire.max_current,
            current_limit: wire.current_limit,
            energy_limit: wire.energy_limit,
            uptime_secs: wire.uptime_secs,
        })
    }
}

impl Report for LiveSession {
    fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireSession = from_datagram(raw)?;
        Ok(LiveSession {
            energy: wire.energy,
            total: wire.total,
            voltage: [wire.u1, wire.u2, wire.u3],
            current: [wire.i1, wire.i2, wire.i3],
            power: wire.power,
        })
    }
}

impl Report for SessionLogEntry {
    fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireHistorySlot = from_datagram(raw)?;
        Ok(SessionLogEntry {
            session: wire.session,
            max_current: wire.max_current,
            start_total: wire.start_total,
            end_total: wire.start_total.saturating_add(wire.energy),
            energy: wire.energy,
            started_secs: wire.started_secs,
            ended_secs: wire.ended_secs,
            end_reason: EndReason::from(wire.reason),
            rfid_tag: non_empty(wire.rfid_tag),
            rfid_class: non_empty(wire.rfid_class),
        })
    }
}

pub fn decode_system_info(raw: &[u8]) -> Result<SystemInfo, DecodeError> {
    decode(raw)
}

pub fn decode_config(raw: &[u8]) -> Result<LiveConfig, DecodeError> {
    decode(raw)
}

pub fn decode_session(raw: &[u8]) -> Result<LiveSession, DecodeError> {
    decode(raw)
}

pub fn decode_history_slot(raw: &[u8]) -> Result<SessionLogEntry, DecodeError> {
    decode(raw)
}

/// Some firmware pads the datagram with NUL bytes after the closing brace.
fn from_datagram<'a, T: Deserialize<'a>>(raw: &'a [u8]) -> Result<T, DecodeError> {
    let end = raw
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    Ok(serde_json::from_slice(&raw[..end])?)
}

/// Accepts an integer, a float or a numeric string; anything else reads as 0.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let secs = match &value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };
    if secs.is_none() {
        debug!(value = %value, "non-numeric history timestamp, using 0");
    }
    Ok(secs.unwrap_or_default())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
