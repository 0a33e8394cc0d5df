use std::time::Duration;

use anyhow::Context;
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::info;

use climate_common::{DeviceCommand, OutboundMessage, RelayKind, RelayStatus};

pub const DEFAULT_HEARTBEAT_MS: u32 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorNode {
    relays: [RelayStatus; 2],
    heartbeat_ms: u32,
}

impl Default for ActuatorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorNode {
    /// Both relays start off.
    pub fn new() -> Self {
        Self {
            relays: [RelayStatus::Off; 2],
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
        }
    }

    pub fn heartbeat_ms(&self) -> u32 {
        self.heartbeat_ms
    }

    pub fn relay(&self, relay: RelayKind) -> RelayStatus {
        self.relays[relay.index()]
    }

    /// Returns true when the heartbeat period changed.
    pub fn apply(&mut self, command: DeviceCommand) -> bool {
        match command {
            DeviceCommand::SetRelay { relay, status } => {
                info!("setting {} {}", relay.tag(), status.as_str());
                self.relays[relay.index()] = status;
                false
            }
            DeviceCommand::UpdateSettings(settings) => match settings.heartbeat_ms {
                Some(ms) if ms > 0 && ms != self.heartbeat_ms => {
                    info!("heartbeat period {} ms -> {ms} ms", self.heartbeat_ms);
                    self.heartbeat_ms = ms;
                    true
                }
                _ => false,
            },
        }
    }

    pub fn report(&self) -> OutboundMessage {
        OutboundMessage::ActuatorState {
            relays: self.relays,
        }
    }
}

fn heartbeat_timer(ms: u32) -> Interval {
    let period = Duration::from_millis(u64::from(ms.max(1)));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Reports once at start, then on every heartbeat.
pub async fn run(
    mut node: ActuatorNode,
    mut commands: mpsc::Receiver<DeviceCommand>,
    reports: mpsc::Sender<OutboundMessage>,
) -> anyhow::Result<()> {
    reports
        .send(node.report())
        .await
        .context("report channel closed")?;
    let mut heartbeat = heartbeat_timer(node.heartbeat_ms());

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                info!(
                    "Relay_1 = {}, Relay_2 = {}",
                    node.relay(RelayKind::Heater).as_str(),
                    node.relay(RelayKind::Fan).as_str()
                );
                reports
                    .send(node.report())
                    .await
                    .context("report channel closed")?;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                if node.apply(command) {
                    heartbeat = heartbeat_timer(node.heartbeat_ms());
                }
            }
        }
    }
}
