pub mod codec;
pub mod config;
pub mod liveness;
pub mod relay;
pub mod settings;
pub mod topics;
pub mod types;
pub mod xml;

pub use codec::{
    decode, encode, CodecError, DeviceCommand, OutboundMessage, ParsedMessage, UserCommand,
};
pub use config::{IdentityConfig, NetworkConfig, RuntimeConfig};
pub use liveness::DeviceLiveness;
pub use settings::{ChannelSettings, ControllerSettings, SettingsError};
pub use topics::*;
pub use types::{
    ControllerSnapshot, DeviceRole, Liveness, Orientation, Relay, RelayKind, RelayMode,
    RelayStatus, Sensor, SensorKind,
};
pub use xml::{XmlError, XmlNode};
