use tracing::{debug, error, info, warn};

use climate_common::ControllerSettings;

use crate::{
    controller::Controller,
    events::OutboundCommand,
    timers::TimerControl,
};

pub const RETRIEVE_SETTINGS_SUCCESS: &str = "RETRIEVE_SETTINGS_SUCCESS";
pub const RETRIEVE_SETTINGS_FAILURE: &str = "RETRIEVE_SETTINGS_FAILURE";

/// Where the settings synchronizer stands. At most one fetch is in flight in
/// either awaiting phase; user requests arriving meanwhile are counted and
/// each gets exactly one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    AwaitingInitialFetch { user_requests: usize },
    TimersRunning,
    AwaitingUserFetch { requests: usize },
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingInitialFetch { .. } => "AWAITING_INITIAL_FETCH",
            Self::TimersRunning => "TIMERS_RUNNING",
            Self::AwaitingUserFetch { .. } => "AWAITING_USER_FETCH",
        }
    }
}

impl<T: TimerControl> Controller<T> {
    /// Boot: ask the store for the persisted settings document.
    pub fn start(&mut self) {
        info!("requesting settings {}", self.settings_name);
        self.phase = SyncPhase::AwaitingInitialFetch { user_requests: 0 };
        if !self.request_fetch() {
            error!("could not request stored settings, booting with defaults");
            self.finish_boot();
        }
    }

    pub(crate) fn on_setting_success(&mut self, payload: &[u8]) {
        match self.phase {
            SyncPhase::AwaitingInitialFetch { .. } => {
                match ControllerSettings::decode(payload) {
                    Ok(settings) => {
                        info!("stored settings applied");
                        self.apply_settings(&settings, false);
                    }
                    Err(err) => {
                        error!("stored settings rejected, keeping defaults: {err}");
                    }
                }
                self.finish_boot();
            }
            SyncPhase::AwaitingUserFetch { requests } => {
                self.phase = SyncPhase::TimersRunning;
                match ControllerSettings::decode(payload) {
                    Ok(settings) => {
                        info!("settings reloaded on user request");
                        self.apply_settings(&settings, true);
                        self.answer_user(requests, RETRIEVE_SETTINGS_SUCCESS);
                        self.push_settings_to_devices();
                    }
                    Err(err) => {
                        warn!("stored settings rejected: {err}");
                        self.answer_user(requests, RETRIEVE_SETTINGS_FAILURE);
                    }
                }
            }
            SyncPhase::TimersRunning => debug!("ignoring unsolicited settings payload"),
        }
    }

    pub(crate) fn on_setting_failure(&mut self) {
        match self.phase {
            SyncPhase::AwaitingInitialFetch { .. } => {
                info!("no stored settings, persisting defaults");
                match self.settings().encode() {
                    Ok(payload) => {
                        let name = self.settings_name.clone();
                        if !self.submit(OutboundCommand::SetSetting { name, payload }) {
                            warn!("could not queue default settings for persistence");
                        }
                    }
                    Err(err) => warn!("failed to encode default settings: {err}"),
                }
                self.finish_boot();
            }
            SyncPhase::AwaitingUserFetch { requests } => {
                self.phase = SyncPhase::TimersRunning;
                warn!("settings fetch for user failed");
                self.answer_user(requests, RETRIEVE_SETTINGS_FAILURE);
            }
            SyncPhase::TimersRunning => debug!("ignoring unsolicited settings failure"),
        }
    }

    /// A user RETRIEVE_SETTINGS only triggers a fetch; the resulting
    /// SettingSuccess or SettingFailure does the work.
    pub(crate) fn request_user_fetch(&mut self) {
        match self.phase {
            SyncPhase::AwaitingInitialFetch { user_requests } => {
                self.phase = SyncPhase::AwaitingInitialFetch {
                    user_requests: user_requests + 1,
                };
            }
            SyncPhase::AwaitingUserFetch { requests } => {
                self.phase = SyncPhase::AwaitingUserFetch {
                    requests: requests + 1,
                };
            }
            SyncPhase::TimersRunning => {
                if self.request_fetch() {
                    self.phase = SyncPhase::AwaitingUserFetch { requests: 1 };
                } else {
                    self.answer_user(1, RETRIEVE_SETTINGS_FAILURE);
                }
            }
        }
    }

    fn finish_boot(&mut self) {
        let deferred = match self.phase {
            SyncPhase::AwaitingInitialFetch { user_requests } => user_requests,
            _ => 0,
        };
        self.phase = SyncPhase::TimersRunning;
        self.start_timers();
        self.push_settings_to_devices();

        if deferred > 0 {
            if self.request_fetch() {
                self.phase = SyncPhase::AwaitingUserFetch { requests: deferred };
            } else {
                self.answer_user(deferred, RETRIEVE_SETTINGS_FAILURE);
            }
        }
    }

    fn request_fetch(&self) -> bool {
        self.submit(OutboundCommand::GetSetting {
            name: self.settings_name.clone(),
        })
    }

    fn answer_user(&self, requests: usize, info: &str) {
        if !self.respond_times(info, requests) {
            warn!("could not queue {info} for {requests} request(s)");
        }
    }
}
