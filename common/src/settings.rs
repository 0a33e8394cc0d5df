use thiserror::Error;

use crate::{
    codec::{format_decimal, parse_finite, CodecError, OutboundMessage},
    types::{Orientation, SensorKind},
    xml::{XmlError, XmlNode},
};

pub const SETTINGS_VERSION: &str = "1.0";

const ROOT: &str = "ControllerConfig";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("settings document is malformed: {0}")]
    Malformed(#[from] XmlError),
    #[error("settings document root is <{0}>, expected <ControllerConfig>")]
    WrongRoot(String),
    #[error("settings field {0} is missing")]
    Missing(&'static str),
    #[error("settings field {field} has invalid value {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error(transparent)]
    Encode(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub threshold: f32,
    pub orientation: Orientation,
    pub read_interval_ms: u32,
    pub read_delta: f32,
}

/// Full persisted configuration covering the controller and both devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    pub controller_heartbeat_ms: u32,
    pub sensor_heartbeat_ms: u32,
    pub actuator_heartbeat_ms: u32,
    pub temperature: ChannelSettings,
    pub humidity: ChannelSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            controller_heartbeat_ms: 15_000,
            sensor_heartbeat_ms: 15_000,
            actuator_heartbeat_ms: 15_000,
            temperature: ChannelSettings {
                threshold: 25.0,
                orientation: Orientation::Below,
                read_interval_ms: 1_000,
                read_delta: 0.5,
            },
            humidity: ChannelSettings {
                threshold: 30.0,
                orientation: Orientation::Above,
                read_interval_ms: 2_500,
                read_delta: 2.0,
            },
        }
    }
}

impl ControllerSettings {
    pub fn channel(&self, kind: SensorKind) -> &ChannelSettings {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
        }
    }

    pub fn channel_mut(&mut self, kind: SensorKind) -> &mut ChannelSettings {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
        }
    }

    pub fn sensor_push(&self) -> OutboundMessage {
        OutboundMessage::SensorSettings {
            heartbeat_ms: self.sensor_heartbeat_ms,
            temperature_read_interval_ms: self.temperature.read_interval_ms,
            humidity_read_interval_ms: self.humidity.read_interval_ms,
            temperature_read_delta: self.temperature.read_delta,
            humidity_read_delta: self.humidity.read_delta,
        }
    }

    pub fn actuator_push(&self) -> OutboundMessage {
        OutboundMessage::ActuatorSettings {
            heartbeat_ms: self.actuator_heartbeat_ms,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SettingsError> {
        let sensor = XmlNode::new("SensorConfig")
            .leaf("HeartBeat", self.sensor_heartbeat_ms.to_string())
            .leaf(
                "TemperatureReadInterval",
                self.temperature.read_interval_ms.to_string(),
            )
            .leaf(
                "HumidityReadInterval",
                self.humidity.read_interval_ms.to_string(),
            )
            .leaf(
                "TemperatureReadDelta",
                format_decimal("TemperatureReadDelta", self.temperature.read_delta)?,
            )
            .leaf(
                "HumidityReadDelta",
                format_decimal("HumidityReadDelta", self.humidity.read_delta)?,
            );

        let root = XmlNode::new(ROOT)
            .leaf("version", SETTINGS_VERSION)
            .leaf(
                "TemperatureThreshold",
                format_decimal("TemperatureThreshold", self.temperature.threshold)?,
            )
            .leaf(
                "HumidityThreshold",
                format_decimal("HumidityThreshold", self.humidity.threshold)?,
            )
            .leaf(
                "TemperatureOrientation",
                self.temperature.orientation.as_str(),
            )
            .leaf("HumidityOrientation", self.humidity.orientation.as_str())
            .leaf("HeartBeat", self.controller_heartbeat_ms.to_string())
            .child(sensor)
            .child(
                XmlNode::new("ActuatorConfig")
                    .leaf("HeartBeat", self.actuator_heartbeat_ms.to_string()),
            );

        Ok(root.to_document().into_bytes())
    }

    /// All-or-nothing: any missing or invalid field rejects the whole document.
    pub fn decode(raw: &[u8]) -> Result<Self, SettingsError> {
        let root = XmlNode::parse(raw)?;
        if root.name() != ROOT {
            return Err(SettingsError::WrongRoot(root.name().to_string()));
        }
        let doc = SettingsDoc { root: &root };

        Ok(Self {
            controller_heartbeat_ms: doc.period("ControllerConfig/HeartBeat", "HeartBeat")?,
            sensor_heartbeat_ms: doc.period(
                "ControllerConfig/SensorConfig/HeartBeat",
                "SensorConfig/HeartBeat",
            )?,
            actuator_heartbeat_ms: doc.period(
                "ControllerConfig/ActuatorConfig/HeartBeat",
                "ActuatorConfig/HeartBeat",
            )?,
            temperature: ChannelSettings {
                threshold: doc.decimal("TemperatureThreshold")?,
                orientation: doc.orientation("TemperatureOrientation")?,
                read_interval_ms: doc.period(
                    "ControllerConfig/SensorConfig/TemperatureReadInterval",
                    "TemperatureReadInterval",
                )?,
                read_delta: doc.delta("TemperatureReadDelta")?,
            },
            humidity: ChannelSettings {
                threshold: doc.decimal("HumidityThreshold")?,
                orientation: doc.orientation("HumidityOrientation")?,
                read_interval_ms: doc.period(
                    "ControllerConfig/SensorConfig/HumidityReadInterval",
                    "HumidityReadInterval",
                )?,
                read_delta: doc.delta("HumidityReadDelta")?,
            },
        })
    }
}

struct SettingsDoc<'a> {
    root: &'a XmlNode,
}

impl SettingsDoc<'_> {
    fn raw(&self, path: &str, field: &'static str) -> Result<&str, SettingsError> {
        self.root.value(path).ok_or(SettingsError::Missing(field))
    }

    fn period(&self, path: &str, field: &'static str) -> Result<u32, SettingsError> {
        let raw = self.raw(path, field)?;
        raw.parse::<u32>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| invalid(field, raw))
    }

    fn decimal(&self, field: &'static str) -> Result<f32, SettingsError> {
        let raw = self.raw(&format!("{ROOT}/{field}"), field)?;
        parse_finite(raw).ok_or_else(|| invalid(field, raw))
    }

    fn delta(&self, field: &'static str) -> Result<f32, SettingsError> {
        let raw = self.raw(&format!("{ROOT}/SensorConfig/{field}"), field)?;
        parse_finite(raw)
            .filter(|value| *value >= 0.0)
            .ok_or_else(|| invalid(field, raw))
    }

    fn orientation(&self, field: &'static str) -> Result<Orientation, SettingsError> {
        let raw = self.raw(&format!("{ROOT}/{field}"), field)?;
        Orientation::parse(raw).ok_or_else(|| invalid(field, raw))
    }
}

fn invalid(field: &'static str, raw: &str) -> SettingsError {
    SettingsError::Invalid {
        field,
        value: raw.to_string(),
    }
}
