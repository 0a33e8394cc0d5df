use std::time::Duration;

use anyhow::Context;
use tokio::{
    sync::mpsc,
    time::{interval, interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info};

use climate_common::{
    codec::DeviceSettings, relay::exceeds_delta, types::INITIAL_SENSOR_VALUE, DeviceCommand,
    OutboundMessage, SensorKind,
};

pub const MIN_TEMPERATURE_READ_INTERVAL_MS: u32 = 1_000;
pub const MIN_HUMIDITY_READ_INTERVAL_MS: u32 = 2_500;
pub const DEFAULT_HEARTBEAT_MS: u32 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Channel {
    interval_ms: u32,
    minimum_ms: u32,
    delta: f32,
    reported: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorNode {
    heartbeat_ms: u32,
    channels: [Channel; 2],
}

impl Default for SensorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorNode {
    pub fn new() -> Self {
        Self {
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            channels: [
                Channel {
                    interval_ms: MIN_TEMPERATURE_READ_INTERVAL_MS,
                    minimum_ms: MIN_TEMPERATURE_READ_INTERVAL_MS,
                    delta: 0.5,
                    reported: INITIAL_SENSOR_VALUE,
                },
                Channel {
                    interval_ms: MIN_HUMIDITY_READ_INTERVAL_MS,
                    minimum_ms: MIN_HUMIDITY_READ_INTERVAL_MS,
                    delta: 2.0,
                    reported: INITIAL_SENSOR_VALUE,
                },
            ],
        }
    }

    pub fn heartbeat_ms(&self) -> u32 {
        self.heartbeat_ms
    }

    pub fn read_interval_ms(&self, kind: SensorKind) -> u32 {
        self.channels[kind.index()].interval_ms
    }

    pub fn read_delta(&self, kind: SensorKind) -> f32 {
        self.channels[kind.index()].delta
    }

    pub fn apply(&mut self, settings: &DeviceSettings) {
        if let Some(heartbeat_ms) = settings.heartbeat_ms.filter(|ms| *ms > 0) {
            if heartbeat_ms != self.heartbeat_ms {
                info!(
                    "heartbeat period {} ms -> {} ms",
                    self.heartbeat_ms, heartbeat_ms
                );
                self.heartbeat_ms = heartbeat_ms;
            }
        }
        let updates = [
            (
                SensorKind::Temperature,
                settings.temperature_read_interval_ms,
                settings.temperature_read_delta,
            ),
            (
                SensorKind::Humidity,
                settings.humidity_read_interval_ms,
                settings.humidity_read_delta,
            ),
        ];
        for (kind, interval_ms, delta) in updates {
            let channel = &mut self.channels[kind.index()];
            match interval_ms {
                Some(ms) if ms < channel.minimum_ms => debug!(
                    "ignoring {} read interval {ms} ms below minimum {} ms",
                    kind.as_str(),
                    channel.minimum_ms
                ),
                Some(ms) if ms != channel.interval_ms => {
                    info!(
                        "{} read interval {} ms -> {ms} ms",
                        kind.as_str(),
                        channel.interval_ms
                    );
                    channel.interval_ms = ms;
                }
                _ => {}
            }
            if let Some(delta) = delta.filter(|delta| *delta >= 0.0) {
                channel.delta = delta;
            }
        }
    }

    /// Records `value` when it moved past the channel's delta since the last
    /// recorded sample. Returns whether a report is due.
    pub fn sample(&mut self, kind: SensorKind, value: f32) -> bool {
        let channel = &mut self.channels[kind.index()];
        if !value.is_finite() || !exceeds_delta(channel.reported, value, channel.delta) {
            return false;
        }
        channel.reported = value;
        true
    }

    pub fn report(&self) -> OutboundMessage {
        OutboundMessage::SensorReading {
            temperature: self.channels[SensorKind::Temperature.index()].reported,
            humidity: self.channels[SensorKind::Humidity.index()].reported,
        }
    }
}

/// Slowly cycling readings standing in for real probes.
#[derive(Debug, Default)]
pub struct Simulated {
    ticks: [u64; 2],
}

impl Simulated {
    pub fn read(&mut self, kind: SensorKind) -> f32 {
        let tick = &mut self.ticks[kind.index()];
        *tick = tick.wrapping_add(1);
        match kind {
            SensorKind::Temperature => 21.0 + ((*tick % 12) as f32 * 0.3),
            SensorKind::Humidity => 35.0 + ((*tick % 10) as f32 * 0.9),
        }
    }
}

fn periodic(ms: u32, immediate: bool) -> Interval {
    let period = Duration::from_millis(u64::from(ms.max(1)));
    let mut timer = if immediate {
        interval(period)
    } else {
        interval_at(Instant::now() + period, period)
    };
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

pub async fn run(
    mut node: SensorNode,
    mut source: impl FnMut(SensorKind) -> f32,
    mut commands: mpsc::Receiver<DeviceCommand>,
    reports: mpsc::Sender<OutboundMessage>,
) -> anyhow::Result<()> {
    let mut temperature = periodic(node.read_interval_ms(SensorKind::Temperature), true);
    let mut humidity = periodic(node.read_interval_ms(SensorKind::Humidity), true);
    let mut heartbeat = periodic(node.heartbeat_ms(), false);

    loop {
        let due = tokio::select! {
            _ = temperature.tick() => node.sample(SensorKind::Temperature, source(SensorKind::Temperature)),
            _ = humidity.tick() => node.sample(SensorKind::Humidity, source(SensorKind::Humidity)),
            _ = heartbeat.tick() => true,
            command = commands.recv() => {
                match command {
                    Some(DeviceCommand::UpdateSettings(settings)) => {
                        let before = node.clone();
                        node.apply(&settings);
                        if node.heartbeat_ms() != before.heartbeat_ms() {
                            heartbeat = periodic(node.heartbeat_ms(), false);
                        }
                        if node.read_interval_ms(SensorKind::Temperature)
                            != before.read_interval_ms(SensorKind::Temperature)
                        {
                            temperature = periodic(node.read_interval_ms(SensorKind::Temperature), false);
                        }
                        if node.read_interval_ms(SensorKind::Humidity)
                            != before.read_interval_ms(SensorKind::Humidity)
                        {
                            humidity = periodic(node.read_interval_ms(SensorKind::Humidity), false);
                        }
                    }
                    Some(other) => debug!("sensor ignores {other:?}"),
                    None => return Ok(()),
                }
                false
            }
        };
        if due {
            reports
                .send(node.report())
                .await
                .context("report channel closed")?;
        }
    }
}
