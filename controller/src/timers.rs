use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use climate_common::DeviceRole;

use crate::events::{ControllerEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    ControllerHeartBeat,
    SensorExpiry,
    ActuatorExpiry,
}

impl TimerId {
    pub fn expiry(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Sensor => Self::SensorExpiry,
            DeviceRole::Actuator => Self::ActuatorExpiry,
        }
    }

    pub fn event(self) -> ControllerEvent {
        match self {
            Self::ControllerHeartBeat => ControllerEvent::HeartBeat,
            Self::SensorExpiry => ControllerEvent::DeviceExpired(DeviceRole::Sensor),
            Self::ActuatorExpiry => ControllerEvent::DeviceExpired(DeviceRole::Actuator),
        }
    }
}

/// Periodic timers owned by the controller loop. Firing only ever enqueues
/// `TimerId::event`.
pub trait TimerControl {
    fn start(&mut self, id: TimerId, period_ms: u64);
    /// Restart the running period from zero.
    fn reset(&mut self, id: TimerId);
    fn stop(&mut self, id: TimerId);

    fn restart(&mut self, id: TimerId, period_ms: u64) {
        self.stop(id);
        self.start(id, period_ms);
    }
}

struct TimerTask {
    reset: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

pub struct TokioTimers {
    events: EventSender,
    running: HashMap<TimerId, TimerTask>,
}

impl TokioTimers {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            running: HashMap::new(),
        }
    }
}

impl TimerControl for TokioTimers {
    fn start(&mut self, id: TimerId, period_ms: u64) {
        self.stop(id);
        let (reset, resets) = mpsc::unbounded_channel();
        let period = Duration::from_millis(period_ms.max(1));
        let task = tokio::spawn(run_timer(id, period, self.events.clone(), resets));
        self.running.insert(id, TimerTask { reset, task });
        debug!("timer {id:?} started with period {period_ms}ms");
    }

    fn reset(&mut self, id: TimerId) {
        if let Some(timer) = self.running.get(&id) {
            let _ = timer.reset.send(());
        }
    }

    fn stop(&mut self, id: TimerId) {
        if let Some(timer) = self.running.remove(&id) {
            timer.task.abort();
            debug!("timer {id:?} stopped");
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, timer) in self.running.drain() {
            timer.task.abort();
        }
    }
}

async fn run_timer(
    id: TimerId,
    period: Duration,
    events: EventSender,
    mut resets: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                events.post(id.event());
            }
            reset = resets.recv() => {
                if reset.is_none() {
                    break;
                }
            }
        }
    }
}
