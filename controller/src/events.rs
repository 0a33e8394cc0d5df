use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use climate_common::DeviceRole;

/// Work for the controller loop. Every variant owns its payload so nothing is
/// shared with the producer after enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    HeartBeat,
    SettingSuccess(Vec<u8>),
    SettingFailure,
    ReceivedMessage { payload: Vec<u8>, sender: String },
    DeviceExpired(DeviceRole),
}

impl ControllerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeartBeat => "HeartBeat",
            Self::SettingSuccess(_) => "SettingSuccess",
            Self::SettingFailure => "SettingFailure",
            Self::ReceivedMessage { .. } => "ReceivedMessage",
            Self::DeviceExpired(_) => "DeviceExpired",
        }
    }
}

/// Work for the transport side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    SendToUser {
        recipient: String,
        payload: Vec<u8>,
    },
    /// The same response sent `copies` times. Coalesced requests take one
    /// queue slot between them.
    AnswerUser {
        recipient: String,
        payload: Vec<u8>,
        copies: usize,
    },
    SendToDevice {
        role: DeviceRole,
        device_id: Option<String>,
        payload: Vec<u8>,
    },
    GetSetting {
        name: String,
    },
    SetSetting {
        name: String,
        payload: Vec<u8>,
    },
}

impl OutboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendToUser { .. } => "SendToUser",
            Self::AnswerUser { .. } => "AnswerUser",
            Self::SendToDevice { .. } => "SendToDevice",
            Self::GetSetting { .. } => "GetSetting",
            Self::SetSetting { .. } => "SetSetting",
        }
    }
}

pub fn event_queue(capacity: usize) -> (EventSender, mpsc::Receiver<ControllerEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, rx)
}

pub fn outbound_queue(
    capacity: usize,
) -> (OutboundSender, mpsc::Receiver<OutboundCommand>) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundSender { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ControllerEvent>,
}

impl EventSender {
    /// Non-blocking enqueue for timer context. A full queue drops the event.
    pub fn post(&self, event: ControllerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("event queue full, dropping {}", event.name());
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!("event queue closed, dropping {}", event.name());
                false
            }
        }
    }

    /// Enqueue that waits for room; used by the transport side.
    pub async fn deliver(&self, event: ControllerEvent) -> bool {
        let name = event.name();
        if self.tx.send(event).await.is_err() {
            warn!("event queue closed, dropping {name}");
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundCommand>,
}

impl OutboundSender {
    /// Returns false when the command could not be queued; the caller treats
    /// that as a failed send.
    pub fn submit(&self, command: OutboundCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                warn!("outbound queue full, dropping {}", command.name());
                false
            }
            Err(TrySendError::Closed(command)) => {
                warn!("outbound queue closed, dropping {}", command.name());
                false
            }
        }
    }
}
