use crate::types::Liveness;

/// Alive/Dead tracking for one device. Both methods return the new state only
/// when a transition happened, so callers notify exactly once per change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLiveness {
    state: Liveness,
}

impl Default for DeviceLiveness {
    fn default() -> Self {
        Self {
            state: Liveness::Dead,
        }
    }
}

impl DeviceLiveness {
    pub fn state(&self) -> Liveness {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    pub fn record_heartbeat(&mut self) -> Option<Liveness> {
        self.transition(Liveness::Alive)
    }

    pub fn expire(&mut self) -> Option<Liveness> {
        self.transition(Liveness::Dead)
    }

    fn transition(&mut self, target: Liveness) -> Option<Liveness> {
        if self.state == target {
            None
        } else {
            self.state = target;
            Some(target)
        }
    }
}

/// Silence window after which a device is declared dead.
pub fn expiry_window_ms(heartbeat_ms: u32) -> u64 {
    u64::from(heartbeat_ms) * 2
}
