use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    types::{DeviceRole, Liveness, Relay, RelayKind, RelayStatus},
    xml::{XmlError, XmlNode},
};

pub const CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("field {field} is not a finite number")]
    NonFinite { field: &'static str },
    #[error(transparent)]
    Xml(#[from] XmlError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    Event(EventMessage),
    Command(CommandMessage),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReport {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorReport {
    pub relays: [RelayStatus; 2],
}

impl ActuatorReport {
    pub fn status(&self, relay: RelayKind) -> RelayStatus {
        self.relays[relay.index()]
    }
}

/// Inbound `event` document, sent by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    root: XmlNode,
}

impl EventMessage {
    pub fn role(&self) -> Option<DeviceRole> {
        self.root.value("event/type").and_then(DeviceRole::parse)
    }

    pub fn value(&self, path: &str) -> Option<&str> {
        self.root.value(path)
    }

    /// Both readings must be present and finite for the report to count.
    pub fn sensor_report(&self) -> Option<SensorReport> {
        if self.role()? != DeviceRole::Sensor {
            return None;
        }
        Some(SensorReport {
            temperature: parse_finite(self.value("event/info/Temperature")?)?,
            humidity: parse_finite(self.value("event/info/Humidity")?)?,
        })
    }

    pub fn actuator_report(&self) -> Option<ActuatorReport> {
        if self.role()? != DeviceRole::Actuator {
            return None;
        }
        let relay = |kind: RelayKind| {
            self.value(&format!("event/info/{}", kind.tag()))
                .and_then(RelayStatus::parse)
        };
        Some(ActuatorReport {
            relays: [relay(RelayKind::Heater)?, relay(RelayKind::Fan)?],
        })
    }
}

/// Inbound `command` document, sent by the user or by the controller to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    root: XmlNode,
}

impl CommandMessage {
    pub fn info(&self) -> Option<&str> {
        self.root.value("command/info")
    }

    pub fn value(&self, path: &str) -> Option<&str> {
        self.root.value(path)
    }

    pub fn user_command(&self) -> UserCommand {
        let info = self.info().unwrap_or_default();
        match info {
            "RETRIEVE_SETTINGS" => UserCommand::RetrieveSettings,
            "PING" => UserCommand::Ping {
                app_time: self.value("command/app_time").map(str::to_string),
            },
            other => parse_relay_command(other)
                .map(|(relay, action)| UserCommand::Relay { relay, action })
                .unwrap_or_else(|| UserCommand::Unknown(other.to_string())),
        }
    }

    /// Commands the controller sends to its devices.
    pub fn device_command(&self) -> Option<DeviceCommand> {
        let info = self.info()?;
        if info == "UPDATE_SETTINGS" {
            let number = |field: &str| {
                self.value(&format!("command/settings/{field}"))
                    .and_then(|raw| raw.parse::<u32>().ok())
            };
            let decimal = |field: &str| {
                self.value(&format!("command/settings/{field}"))
                    .and_then(parse_finite)
            };
            return Some(DeviceCommand::UpdateSettings(DeviceSettings {
                heartbeat_ms: number("HeartBeat"),
                temperature_read_interval_ms: number("TemperatureReadInterval"),
                humidity_read_interval_ms: number("HumidityReadInterval"),
                temperature_read_delta: decimal("TemperatureReadDelta"),
                humidity_read_delta: decimal("HumidityReadDelta"),
            }));
        }
        match parse_relay_command(info)? {
            (relay, RelayAction::On) => Some(DeviceCommand::SetRelay {
                relay,
                status: RelayStatus::On,
            }),
            (relay, RelayAction::Off) => Some(DeviceCommand::SetRelay {
                relay,
                status: RelayStatus::Off,
            }),
            (_, RelayAction::Auto) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    On,
    Off,
    Auto,
}

impl RelayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    RetrieveSettings,
    Relay { relay: RelayKind, action: RelayAction },
    Ping { app_time: Option<String> },
    Unknown(String),
}

impl UserCommand {
    /// Acknowledgment text echoed back to the user.
    pub fn ack(&self) -> String {
        match self {
            Self::RetrieveSettings => "RETRIEVE_SETTINGS".to_string(),
            Self::Relay { relay, action } => relay_command_name(*relay, action.as_str()),
            Self::Ping { .. } => "PING".to_string(),
            Self::Unknown(_) => "UNKNOWN_COMMAND".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceSettings {
    pub heartbeat_ms: Option<u32>,
    pub temperature_read_interval_ms: Option<u32>,
    pub humidity_read_interval_ms: Option<u32>,
    pub temperature_read_delta: Option<f32>,
    pub humidity_read_delta: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    SetRelay { relay: RelayKind, status: RelayStatus },
    UpdateSettings(DeviceSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Controller to actuator.
    RelayCommand {
        relay: RelayKind,
        status: RelayStatus,
    },
    Response {
        info: String,
    },
    PingResponse {
        app_time: String,
    },
    HeartBeat {
        temperature: f32,
        humidity: f32,
        relays: [Relay; 2],
        sensor: Liveness,
        actuator: Liveness,
    },
    DeviceStatus {
        sensor: Liveness,
        actuator: Liveness,
    },
    Measurement {
        temperature: f32,
        humidity: f32,
    },
    RelayStatus {
        relays: [Relay; 2],
    },
    SensorSettings {
        heartbeat_ms: u32,
        temperature_read_interval_ms: u32,
        humidity_read_interval_ms: u32,
        temperature_read_delta: f32,
        humidity_read_delta: f32,
    },
    ActuatorSettings {
        heartbeat_ms: u32,
    },
    /// Sensor node to controller.
    SensorReading {
        temperature: f32,
        humidity: f32,
    },
    /// Actuator node to controller.
    ActuatorState {
        relays: [RelayStatus; 2],
    },
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RelayCommand { .. } => "RelayCommand",
            Self::Response { .. } => "Response",
            Self::PingResponse { .. } => "PingResponse",
            Self::HeartBeat { .. } => "HeartBeat",
            Self::DeviceStatus { .. } => "DeviceStatus",
            Self::Measurement { .. } => "Measurement",
            Self::RelayStatus { .. } => "RelayStatus",
            Self::SensorSettings { .. } => "SensorSettings",
            Self::ActuatorSettings { .. } => "ActuatorSettings",
            Self::SensorReading { .. } => "SensorReading",
            Self::ActuatorState { .. } => "ActuatorState",
        }
    }
}

pub fn decode(raw: &[u8]) -> Option<ParsedMessage> {
    let root = XmlNode::parse(raw).ok()?;
    match root.name() {
        "event" => Some(ParsedMessage::Event(EventMessage { root })),
        "command" => Some(ParsedMessage::Command(CommandMessage { root })),
        _ => None,
    }
}

pub fn encode(message: &OutboundMessage, now: DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
    let time = time_node(now);
    let root = match message {
        OutboundMessage::RelayCommand { relay, status } => XmlNode::new("command")
            .child(time)
            .leaf("info", relay_command_name(*relay, status.as_str())),
        OutboundMessage::Response { info } => {
            XmlNode::new("response").child(time).leaf("info", info.as_str())
        }
        OutboundMessage::PingResponse { app_time } => XmlNode::new("response")
            .child(time)
            .leaf("info", "PING")
            .leaf("app_time", app_time.as_str()),
        OutboundMessage::HeartBeat {
            temperature,
            humidity,
            relays,
            sensor,
            actuator,
        } => {
            let info = measurement_info(*temperature, *humidity)?;
            let info = relays.iter().fold(info, |info, relay| info.child(relay_node(relay)));
            user_event(time, "HeartBeat", liveness_info(info, *sensor, *actuator))
        }
        OutboundMessage::DeviceStatus { sensor, actuator } => user_event(
            time,
            "DeviceStatus",
            liveness_info(XmlNode::new("info"), *sensor, *actuator),
        ),
        OutboundMessage::Measurement {
            temperature,
            humidity,
        } => user_event(time, "Measurement", measurement_info(*temperature, *humidity)?),
        OutboundMessage::RelayStatus { relays } => {
            let info = relays
                .iter()
                .fold(XmlNode::new("info"), |info, relay| info.child(relay_node(relay)));
            user_event(time, "RelayStatus", info)
        }
        OutboundMessage::SensorSettings {
            heartbeat_ms,
            temperature_read_interval_ms,
            humidity_read_interval_ms,
            temperature_read_delta,
            humidity_read_delta,
        } => settings_command(
            time,
            XmlNode::new("settings")
                .leaf("HeartBeat", heartbeat_ms.to_string())
                .leaf(
                    "TemperatureReadInterval",
                    temperature_read_interval_ms.to_string(),
                )
                .leaf("HumidityReadInterval", humidity_read_interval_ms.to_string())
                .leaf(
                    "TemperatureReadDelta",
                    format_decimal("TemperatureReadDelta", *temperature_read_delta)?,
                )
                .leaf(
                    "HumidityReadDelta",
                    format_decimal("HumidityReadDelta", *humidity_read_delta)?,
                ),
        ),
        OutboundMessage::ActuatorSettings { heartbeat_ms } => settings_command(
            time,
            XmlNode::new("settings").leaf("HeartBeat", heartbeat_ms.to_string()),
        ),
        OutboundMessage::SensorReading {
            temperature,
            humidity,
        } => XmlNode::new("event")
            .child(time)
            .leaf("type", DeviceRole::Sensor.as_str())
            .child(measurement_info(*temperature, *humidity)?),
        OutboundMessage::ActuatorState { relays } => XmlNode::new("event")
            .child(time)
            .leaf("type", DeviceRole::Actuator.as_str())
            .child(
                XmlNode::new("info")
                    .leaf(RelayKind::Heater.tag(), relays[0].as_str())
                    .leaf(RelayKind::Fan.tag(), relays[1].as_str()),
            ),
    };
    Ok(root.to_document().into_bytes())
}

/// Two decimals when that representation is exact, otherwise the shortest
/// lossless form.
pub fn format_decimal(field: &'static str, value: f32) -> Result<String, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NonFinite { field });
    }
    let fixed = format!("{value:.2}");
    if fixed.parse::<f32>().ok() == Some(value) {
        Ok(fixed)
    } else {
        Ok(value.to_string())
    }
}

pub fn parse_finite(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().filter(|value| value.is_finite())
}

fn parse_relay_command(info: &str) -> Option<(RelayKind, RelayAction)> {
    let rest = info.strip_prefix("RELAY_")?;
    let (number, action) = rest.split_once('_')?;
    let relay = RelayKind::from_number(number.parse().ok()?)?;
    let action = match action {
        "ON" => RelayAction::On,
        "OFF" => RelayAction::Off,
        "AUTO" => RelayAction::Auto,
        _ => return None,
    };
    Some((relay, action))
}

fn relay_command_name(relay: RelayKind, action: &str) -> String {
    format!("RELAY_{}_{}", relay.number(), action)
}

fn time_node(now: DateTime<Utc>) -> XmlNode {
    XmlNode::new("time")
        .attr("type", "datetime")
        .text(now.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn user_event(time: XmlNode, kind: &str, info: XmlNode) -> XmlNode {
    XmlNode::new("event").child(time).leaf("type", kind).child(info)
}

fn settings_command(time: XmlNode, settings: XmlNode) -> XmlNode {
    XmlNode::new("command")
        .child(time)
        .leaf("info", "UPDATE_SETTINGS")
        .child(settings)
}

fn measurement_info(temperature: f32, humidity: f32) -> Result<XmlNode, CodecError> {
    Ok(XmlNode::new("info")
        .leaf("Temperature", format_decimal("Temperature", temperature)?)
        .leaf("Humidity", format_decimal("Humidity", humidity)?))
}

fn relay_node(relay: &Relay) -> XmlNode {
    XmlNode::new(relay.kind.tag())
        .leaf("mode", relay.mode.as_str())
        .leaf("status", relay.status.as_str())
}

fn liveness_info(info: XmlNode, sensor: Liveness, actuator: Liveness) -> XmlNode {
    info.leaf("Sensor", sensor.as_str())
        .leaf("Actuator", actuator.as_str())
}
