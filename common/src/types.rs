use serde::{Deserialize, Serialize};

pub const INITIAL_SENSOR_VALUE: f32 = -1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Temperature => 0,
            Self::Humidity => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Orientation {
    Above,
    Below,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Above => "ABOVE",
            Self::Below => "BELOW",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ABOVE" => Some(Self::Above),
            "BELOW" => Some(Self::Below),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayStatus {
    On,
    Off,
}

impl RelayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayMode {
    Auto,
    Manual,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

/// Relay 1 drives the heater and follows temperature, relay 2 drives the fan
/// and follows humidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayKind {
    Heater,
    Fan,
}

impl RelayKind {
    pub const ALL: [RelayKind; 2] = [RelayKind::Heater, RelayKind::Fan];

    pub fn index(self) -> usize {
        match self {
            Self::Heater => 0,
            Self::Fan => 1,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Heater => 1,
            Self::Fan => 2,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Heater),
            2 => Some(Self::Fan),
            _ => None,
        }
    }

    /// Element name used for this relay inside event payloads.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Heater => "Relay_1",
            Self::Fan => "Relay_2",
        }
    }

    pub fn sensor(self) -> SensorKind {
        match self {
            Self::Heater => SensorKind::Temperature,
            Self::Fan => SensorKind::Humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRole {
    Sensor,
    Actuator,
}

impl DeviceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "Sensor",
            Self::Actuator => "Actuator",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Sensor" => Some(Self::Sensor),
            "Actuator" => Some(Self::Actuator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Liveness {
    Alive,
    Dead,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "ALIVE",
            Self::Dead => "DEAD",
        }
    }

    pub fn is_alive(self) -> bool {
        self == Self::Alive
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    pub kind: SensorKind,
    pub orientation: Orientation,
    pub threshold: f32,
    pub value: f32,
    pub read_interval_ms: u32,
    pub read_delta: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relay {
    pub kind: RelayKind,
    pub status: RelayStatus,
    pub mode: RelayMode,
}

impl Relay {
    pub fn new(kind: RelayKind) -> Self {
        Self {
            kind,
            status: RelayStatus::Off,
            mode: RelayMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    pub kind: SensorKind,
    pub value: f32,
    pub threshold: f32,
    pub orientation: Orientation,
    #[serde(rename = "readIntervalMs")]
    pub read_interval_ms: u32,
    #[serde(rename = "readDelta")]
    pub read_delta: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayView {
    pub relay: &'static str,
    pub status: RelayStatus,
    pub mode: RelayMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub role: DeviceRole,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    pub liveness: Liveness,
    #[serde(rename = "heartbeatMs")]
    pub heartbeat_ms: u32,
}

/// Read-only view of the controller published after every handled event.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "heartbeatMs")]
    pub heartbeat_ms: u32,
    #[serde(rename = "syncPhase")]
    pub sync_phase: &'static str,
    pub sensors: Vec<SensorView>,
    pub relays: Vec<RelayView>,
    pub devices: Vec<DeviceView>,
}
