use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identity block returned by `report 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub product: String,
    pub serial: String,
    pub firmware: String,
    pub com_module: i64,
    pub backend: i64,
    pub dip_switches: DipSwitches,
}

/// Operating status returned by `report 2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub state: ChargerState,
    pub plug: PlugStatus,
    /// Hardware ceiling in mA (DIP setting, vehicle, cable and temperature derating).
    pub max_current: u32,
    /// User current limit in mA.
    pub current_limit: u32,
    /// User energy limit in 0.1 Wh, 0 when unset.
    pub energy_limit: u64,
    pub uptime_secs: u64,
}

/// Electrical telemetry returned by `report 3`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSession {
    /// Energy of the present session in 0.1 Wh.
    pub energy: u64,
    /// Lifetime energy in 0.1 Wh.
    pub total: u64,
    /// Phase voltages in V.
    pub voltage: [u32; 3],
    /// Phase currents in mA.
    pub current: [u32; 3],
    /// Active power in mW.
    pub power: u64,
}

impl LiveSession {
    pub fn energy_wh(&self) -> f64 {
        self.energy as f64 / 10.0
    }

    pub fn total_wh(&self) -> f64 {
        self.total as f64 / 10.0
    }

    pub fn power_w(&self) -> f64 {
        self.power as f64 / 1000.0
    }

    /// Current of phase 1..=3 in amperes; other phase numbers yield `None`.
    pub fn current_amps(&self, phase: usize) -> Option<f64> {
        let index = phase.checked_sub(1)?;
        self.current.get(index).map(|ma| f64::from(*ma) / 1000.0)
    }
}

/// One past charging session read from a history slot (`report 100`..`report 130`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Device-assigned sequence number. Zero marks an empty slot, negative the end of history.
    pub session: i64,
    /// Hardware current ceiling in mA while the session ran.
    pub max_current: u32,
    /// Lifetime energy reading when the session started, 0.1 Wh.
    pub start_total: u64,
    /// Lifetime energy reading when the session ended, 0.1 Wh.
    pub end_total: u64,
    /// Energy delivered during the session, 0.1 Wh.
    pub energy: u64,
    /// Device clock (seconds since boot) at plug-in.
    pub started_secs: i64,
    /// Device clock at plug-out, 0 while the session is still running.
    pub ended_secs: i64,
    pub end_reason: EndReason,
    pub rfid_tag: Option<String>,
    pub rfid_class: Option<String>,
}

/// Charging station state code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ChargerState {
    #[default]
    Starting,
    NotReady,
    Ready,
    Charging,
    Error,
    AuthRejected,
    /// A code this client does not know about, kept verbatim.
    Unknown(i64),
}

impl ChargerState {
    pub fn code(self) -> i64 {
        match self {
            Self::Starting => 0,
            Self::NotReady => 1,
            Self::Ready => 2,
            Self::Charging => 3,
            Self::Error => 4,
            Self::AuthRejected => 5,
            Self::Unknown(code) => code,
        }
    }
}

impl From<i64> for ChargerState {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Starting,
            1 => Self::NotReady,
            2 => Self::Ready,
            3 => Self::Charging,
            4 => Self::Error,
            5 => Self::AuthRejected,
            other => Self::Unknown(other),
        }
    }
}

impl From<ChargerState> for i64 {
    fn from(state: ChargerState) -> Self {
        state.code()
    }
}

/// Plug and cable flags of `report 2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlugStatus(pub u8);

impl PlugStatus {
    pub const STATION: u8 = 0b001;
    pub const LOCKED: u8 = 0b010;
    pub const VEHICLE: u8 = 0b100;

    pub fn station_engaged(self) -> bool {
        self.0 & Self::STATION != 0
    }

    pub fn locked(self) -> bool {
        self.0 & Self::LOCKED != 0
    }

    pub fn vehicle_engaged(self) -> bool {
        self.0 & Self::VEHICLE != 0
    }
}

/// Why a logged session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum EndReason {
    /// Session still running, or the slot carries no reason.
    #[default]
    None,
    Unplugged,
    Rfid,
    Other(i64),
}

impl From<i64> for EndReason {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Unplugged,
            10 => Self::Rfid,
            other => Self::Other(other),
        }
    }
}

impl From<EndReason> for i64 {
    fn from(reason: EndReason) -> Self {
        match reason {
            EndReason::None => 0,
            EndReason::Unplugged => 1,
            EndReason::Rfid => 10,
            EndReason::Other(code) => code,
        }
    }
}

/// The 16-bit DIP switch register, carried on the wire as `0x<hex>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DipSwitches(pub u16);

impl DipSwitches {
    /// Switch selecting the Modbus TCP interface.
    pub const MODBUS: u16 = 1 << 14;
    /// Switch enabling the UDP report interface.
    pub const UDP: u16 = 1 << 13;

    pub fn has(self, mask: u16) -> bool {
        self.0 & mask != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DipSwitchesError {
    #[error("dip switch value {0:?} lacks the 0x prefix")]
    MissingPrefix(String),
    #[error("dip switch value {0:?} is not a hex number")]
    InvalidDigits(String),
    #[error("dip switch value {0:?} does not fit in 16 bits")]
    Overflow(String),
}

/// Parses the `0x<hex>` wire form. Hex digits may be of either case and carry leading zeros.
pub fn parse_dip_switches(value: &str) -> Result<DipSwitches, DipSwitchesError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| DipSwitchesError::MissingPrefix(value.to_string()))?;
    // from_str_radix would also accept a leading sign
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DipSwitchesError::InvalidDigits(value.to_string()));
    }
    u16::from_str_radix(digits, 16)
        .map(DipSwitches)
        .map_err(|_| DipSwitchesError::Overflow(value.to_string()))
}

/// Formats the register as lowercase `0x<hex>` without padding.
pub fn format_dip_switches(value: DipSwitches) -> String {
    format!("{:#x}", value.0)
}

impl FromStr for DipSwitches {
    type Err = DipSwitchesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_dip_switches(value)
    }
}

impl fmt::Display for DipSwitches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_dip_switches(*self))
    }
}

impl fmt::Binary for DipSwitches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016b}", self.0)
    }
}

impl Serialize for DipSwitches {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_dip_switches(*self))
    }
}

impl<'de> Deserialize<'de> for DipSwitches {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_dip_switches(&value).map_err(serde::de::Error::custom)
    }
}
