use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use climate_common::{
    codec::{ActuatorReport, EventMessage, RelayAction, SensorReport},
    decode, encode,
    liveness::expiry_window_ms,
    relay, ControllerSettings, ControllerSnapshot, DeviceLiveness, DeviceRole, IdentityConfig,
    OutboundMessage, ParsedMessage, Relay, RelayKind, RelayMode, RelayStatus, Sensor, SensorKind,
    UserCommand,
};
use climate_common::types::{DeviceView, RelayView, SensorView, INITIAL_SENSOR_VALUE};

use crate::{
    events::{ControllerEvent, OutboundCommand, OutboundSender},
    sync::SyncPhase,
    timers::{TimerControl, TimerId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: Option<String>,
    pub liveness: DeviceLiveness,
    pub heartbeat_ms: u32,
}

impl DeviceConfig {
    fn new(device_id: Option<String>, heartbeat_ms: u32) -> Self {
        Self {
            device_id,
            liveness: DeviceLiveness::default(),
            heartbeat_ms,
        }
    }
}

/// The controller aggregate. Owned by the event loop task and mutated only
/// through `handle_event`.
pub struct Controller<T: TimerControl> {
    pub(crate) user_id: String,
    pub(crate) heartbeat_ms: u32,
    pub(crate) sensor: DeviceConfig,
    pub(crate) actuator: DeviceConfig,
    pub(crate) sensors: [Sensor; 2],
    pub(crate) relays: [Relay; 2],
    pub(crate) phase: SyncPhase,
    pub(crate) settings_name: String,
    pub(crate) timers: T,
    outbound: OutboundSender,
    snapshots: Option<watch::Sender<ControllerSnapshot>>,
}

impl<T: TimerControl> Controller<T> {
    pub fn new(
        identity: &IdentityConfig,
        settings_name: impl Into<String>,
        timers: T,
        outbound: OutboundSender,
    ) -> Self {
        let defaults = ControllerSettings::default();
        let sensor = |kind: SensorKind| {
            let channel = defaults.channel(kind);
            Sensor {
                kind,
                orientation: channel.orientation,
                threshold: channel.threshold,
                value: INITIAL_SENSOR_VALUE,
                read_interval_ms: channel.read_interval_ms,
                read_delta: channel.read_delta,
            }
        };

        Self {
            user_id: identity.user_id.clone(),
            heartbeat_ms: defaults.controller_heartbeat_ms,
            sensor: DeviceConfig::new(identity.sensor_id.clone(), defaults.sensor_heartbeat_ms),
            actuator: DeviceConfig::new(
                identity.actuator_id.clone(),
                defaults.actuator_heartbeat_ms,
            ),
            sensors: [sensor(SensorKind::Temperature), sensor(SensorKind::Humidity)],
            relays: [Relay::new(RelayKind::Heater), Relay::new(RelayKind::Fan)],
            phase: SyncPhase::AwaitingInitialFetch { user_requests: 0 },
            settings_name: settings_name.into(),
            timers,
            outbound,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: watch::Sender<ControllerSnapshot>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Event loop. An idle wait longer than `wait` is a no-op poll; the loop
    /// ends when every event producer is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>, wait: Duration) {
        self.start();
        loop {
            match tokio::time::timeout(wait, events.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => {
                    info!("event queue closed, controller loop exiting");
                    break;
                }
                Err(_) => debug!("controller idle"),
            }
        }
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        debug!("handling {}", event.name());
        match event {
            ControllerEvent::HeartBeat => {
                let heartbeat = self.heartbeat_message();
                self.send_to_user(&heartbeat);
            }
            ControllerEvent::SettingSuccess(payload) => self.on_setting_success(&payload),
            ControllerEvent::SettingFailure => self.on_setting_failure(),
            ControllerEvent::ReceivedMessage { payload, sender } => {
                self.on_message(&payload, &sender)
            }
            ControllerEvent::DeviceExpired(role) => self.on_device_expired(role),
        }
        self.publish_snapshot();
    }

    pub fn settings(&self) -> ControllerSettings {
        let mut settings = ControllerSettings {
            controller_heartbeat_ms: self.heartbeat_ms,
            sensor_heartbeat_ms: self.sensor.heartbeat_ms,
            actuator_heartbeat_ms: self.actuator.heartbeat_ms,
            ..ControllerSettings::default()
        };
        for sensor in &self.sensors {
            let channel = settings.channel_mut(sensor.kind);
            channel.threshold = sensor.threshold;
            channel.orientation = sensor.orientation;
            channel.read_interval_ms = sensor.read_interval_ms;
            channel.read_delta = sensor.read_delta;
        }
        settings
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            user_id: self.user_id.clone(),
            heartbeat_ms: self.heartbeat_ms,
            sync_phase: self.phase.as_str(),
            sensors: self
                .sensors
                .iter()
                .map(|sensor| SensorView {
                    kind: sensor.kind,
                    value: sensor.value,
                    threshold: sensor.threshold,
                    orientation: sensor.orientation,
                    read_interval_ms: sensor.read_interval_ms,
                    read_delta: sensor.read_delta,
                })
                .collect(),
            relays: self
                .relays
                .iter()
                .map(|relay| RelayView {
                    relay: relay.kind.tag(),
                    status: relay.status,
                    mode: relay.mode,
                })
                .collect(),
            devices: [DeviceRole::Sensor, DeviceRole::Actuator]
                .into_iter()
                .map(|role| {
                    let device = self.device(role);
                    DeviceView {
                        role,
                        device_id: device.device_id.clone(),
                        liveness: device.liveness.state(),
                        heartbeat_ms: device.heartbeat_ms,
                    }
                })
                .collect(),
        }
    }

    pub(crate) fn device(&self, role: DeviceRole) -> &DeviceConfig {
        match role {
            DeviceRole::Sensor => &self.sensor,
            DeviceRole::Actuator => &self.actuator,
        }
    }

    pub(crate) fn device_mut(&mut self, role: DeviceRole) -> &mut DeviceConfig {
        match role {
            DeviceRole::Sensor => &mut self.sensor,
            DeviceRole::Actuator => &mut self.actuator,
        }
    }

    /// Writes settings into the aggregate, restarting any timer whose period
    /// changed when `timers_running` is set.
    pub(crate) fn apply_settings(&mut self, settings: &ControllerSettings, timers_running: bool) {
        if self.heartbeat_ms != settings.controller_heartbeat_ms {
            self.heartbeat_ms = settings.controller_heartbeat_ms;
            if timers_running {
                self.timers
                    .restart(TimerId::ControllerHeartBeat, u64::from(self.heartbeat_ms));
            }
        }
        for (role, heartbeat_ms) in [
            (DeviceRole::Sensor, settings.sensor_heartbeat_ms),
            (DeviceRole::Actuator, settings.actuator_heartbeat_ms),
        ] {
            if self.device(role).heartbeat_ms != heartbeat_ms {
                self.device_mut(role).heartbeat_ms = heartbeat_ms;
                if timers_running {
                    self.timers
                        .restart(TimerId::expiry(role), expiry_window_ms(heartbeat_ms));
                }
            }
        }
        for sensor in &mut self.sensors {
            let channel = settings.channel(sensor.kind);
            sensor.threshold = channel.threshold;
            sensor.orientation = channel.orientation;
            sensor.read_interval_ms = channel.read_interval_ms;
            sensor.read_delta = channel.read_delta;
        }
    }

    pub(crate) fn start_timers(&mut self) {
        self.timers
            .start(TimerId::ControllerHeartBeat, u64::from(self.heartbeat_ms));
        for role in [DeviceRole::Sensor, DeviceRole::Actuator] {
            let window = expiry_window_ms(self.device(role).heartbeat_ms);
            self.timers.start(TimerId::expiry(role), window);
        }
    }

    pub(crate) fn push_settings_to_devices(&self) {
        let settings = self.settings();
        if self.sensor.device_id.is_some() {
            debug!("pushing settings to sensor");
            self.send_to_device(DeviceRole::Sensor, &settings.sensor_push());
        }
        if self.actuator.device_id.is_some() {
            debug!("pushing settings to actuator");
            self.send_to_device(DeviceRole::Actuator, &settings.actuator_push());
        }
    }

    pub(crate) fn submit(&self, command: OutboundCommand) -> bool {
        self.outbound.submit(command)
    }

    fn encode_message(&self, message: &OutboundMessage) -> Option<Vec<u8>> {
        match encode(message, Utc::now()) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!("failed to encode {}: {err}", message.name());
                None
            }
        }
    }

    pub(crate) fn send_to_user(&self, message: &OutboundMessage) -> bool {
        let Some(payload) = self.encode_message(message) else {
            return false;
        };
        self.submit(OutboundCommand::SendToUser {
            recipient: self.user_id.clone(),
            payload,
        })
    }

    /// One response per request, queued as a single command.
    pub(crate) fn respond_times(&self, info: &str, copies: usize) -> bool {
        if copies == 0 {
            return true;
        }
        let Some(payload) = self.encode_message(&OutboundMessage::Response {
            info: info.to_string(),
        }) else {
            return false;
        };
        self.submit(OutboundCommand::AnswerUser {
            recipient: self.user_id.clone(),
            payload,
            copies,
        })
    }

    pub(crate) fn respond(&self, info: &str) -> bool {
        self.send_to_user(&OutboundMessage::Response {
            info: info.to_string(),
        })
    }

    fn send_to_device(&self, role: DeviceRole, message: &OutboundMessage) -> bool {
        let Some(payload) = self.encode_message(message) else {
            return false;
        };
        self.submit(OutboundCommand::SendToDevice {
            role,
            device_id: self.device(role).device_id.clone(),
            payload,
        })
    }

    fn heartbeat_message(&self) -> OutboundMessage {
        OutboundMessage::HeartBeat {
            temperature: self.sensors[0].value,
            humidity: self.sensors[1].value,
            relays: self.relays,
            sensor: self.sensor.liveness.state(),
            actuator: self.actuator.liveness.state(),
        }
    }

    fn device_status_message(&self) -> OutboundMessage {
        OutboundMessage::DeviceStatus {
            sensor: self.sensor.liveness.state(),
            actuator: self.actuator.liveness.state(),
        }
    }

    fn relay_status_message(&self) -> OutboundMessage {
        OutboundMessage::RelayStatus {
            relays: self.relays,
        }
    }

    fn on_device_expired(&mut self, role: DeviceRole) {
        if self.device_mut(role).liveness.expire().is_some() {
            info!("{} heartbeat expired", role.as_str());
            let status = self.device_status_message();
            self.send_to_user(&status);
        }
    }

    fn on_message(&mut self, payload: &[u8], sender: &str) {
        let Some(message) = decode(payload) else {
            debug!("dropping undecodable message from {sender}");
            return;
        };
        match message {
            ParsedMessage::Event(event) => self.on_device_event(&event, sender),
            ParsedMessage::Command(command) => {
                if sender != self.user_id {
                    debug!("dropping command from non-owner {sender}");
                    return;
                }
                self.on_user_command(command.user_command());
            }
        }
    }

    fn on_device_event(&mut self, event: &EventMessage, sender: &str) {
        if sender == self.user_id {
            debug!("dropping device event sent by the user");
            return;
        }
        let Some(role) = event.role() else {
            debug!("dropping event without a device type from {sender}");
            return;
        };
        match role {
            DeviceRole::Sensor => {
                let Some(report) = event.sensor_report() else {
                    debug!("dropping incomplete sensor report from {sender}");
                    return;
                };
                if self.claim(role, sender) {
                    self.on_sensor_report(report);
                }
            }
            DeviceRole::Actuator => {
                let Some(report) = event.actuator_report() else {
                    debug!("dropping incomplete actuator report from {sender}");
                    return;
                };
                if self.claim(role, sender) {
                    self.on_actuator_report(report);
                }
            }
        }
    }

    /// First-claim binding: the first accepted sender for a role owns it.
    fn claim(&mut self, role: DeviceRole, sender: &str) -> bool {
        let other = match role {
            DeviceRole::Sensor => DeviceRole::Actuator,
            DeviceRole::Actuator => DeviceRole::Sensor,
        };
        if self.device(other).device_id.as_deref() == Some(sender) {
            debug!("{sender} is already bound as {}", other.as_str());
            return false;
        }
        if let Some(bound) = self.device(role).device_id.as_deref() {
            if bound == sender {
                return true;
            }
            debug!(
                "dropping {} message from {sender}, bound to {bound}",
                role.as_str()
            );
            return false;
        }
        self.device_mut(role).device_id = Some(sender.to_string());
        info!("{} bound to {sender}", role.as_str());
        true
    }

    fn record_heartbeat(&mut self, role: DeviceRole) {
        self.timers.reset(TimerId::expiry(role));
        if self.device_mut(role).liveness.record_heartbeat().is_some() {
            info!("{} is alive", role.as_str());
            let status = self.device_status_message();
            self.send_to_user(&status);
        }
    }

    fn on_sensor_report(&mut self, report: SensorReport) {
        self.record_heartbeat(DeviceRole::Sensor);

        let readings = [report.temperature, report.humidity];
        let changed = self
            .sensors
            .iter()
            .zip(readings)
            .any(|(sensor, reading)| !relay::same_reading(sensor.value, reading));
        if changed {
            for (sensor, reading) in self.sensors.iter_mut().zip(readings) {
                sensor.value = reading;
            }
            self.send_to_user(&OutboundMessage::Measurement {
                temperature: report.temperature,
                humidity: report.humidity,
            });
        }

        if self.run_auto_control() {
            let status = self.relay_status_message();
            self.send_to_user(&status);
        }
    }

    /// The controller is authoritative: any relay the actuator reports
    /// differently is commanded back to the controller's status.
    fn on_actuator_report(&mut self, report: ActuatorReport) {
        self.record_heartbeat(DeviceRole::Actuator);

        for relay in self.relays {
            if report.status(relay.kind) != relay.status {
                debug!(
                    "actuator reports {} {}, forcing {}",
                    relay.kind.tag(),
                    report.status(relay.kind).as_str(),
                    relay.status.as_str()
                );
                self.send_relay_command(relay.kind, relay.status);
            }
        }
    }

    fn send_relay_command(&self, relay: RelayKind, status: RelayStatus) -> bool {
        self.send_to_device(
            DeviceRole::Actuator,
            &OutboundMessage::RelayCommand { relay, status },
        )
    }

    /// Applies the decision function to every relay in Auto mode. Local status
    /// only changes when the command was handed to the transport side.
    fn run_auto_control(&mut self) -> bool {
        let mut changed = false;
        for index in 0..self.relays.len() {
            let relay = self.relays[index];
            if relay.mode != RelayMode::Auto {
                continue;
            }
            let sensor = self.sensors[relay.kind.sensor().index()];
            let target = relay::decide(sensor.value, sensor.threshold, sensor.orientation);
            if target != relay.status && self.send_relay_command(relay.kind, target) {
                self.relays[index].status = target;
                changed = true;
            }
        }
        changed
    }

    fn on_user_command(&mut self, command: UserCommand) {
        let ack = command.ack();
        match command {
            UserCommand::RetrieveSettings => self.request_user_fetch(),
            UserCommand::Relay { relay, action } => {
                self.respond(&ack);
                let changed = match action {
                    RelayAction::On => self.force_relay(relay, RelayStatus::On),
                    RelayAction::Off => self.force_relay(relay, RelayStatus::Off),
                    RelayAction::Auto => self.set_auto(relay),
                };
                if changed {
                    let status = self.relay_status_message();
                    self.send_to_user(&status);
                }
            }
            UserCommand::Ping {
                app_time: Some(app_time),
            } => {
                self.send_to_user(&OutboundMessage::PingResponse { app_time });
            }
            UserCommand::Ping { app_time: None } => {
                debug!("dropping ping without app_time");
            }
            UserCommand::Unknown(info) => {
                debug!("unknown user command {info:?}");
                self.respond(&ack);
            }
        }
    }

    fn force_relay(&mut self, kind: RelayKind, status: RelayStatus) -> bool {
        let mut changed = false;
        let index = kind.index();
        if self.relays[index].mode == RelayMode::Auto {
            self.relays[index].mode = RelayMode::Manual;
            debug!("{} is now manually controlled", kind.tag());
            changed = true;
        }
        if self.relays[index].status != status && self.send_relay_command(kind, status) {
            self.relays[index].status = status;
            changed = true;
        }
        changed
    }

    fn set_auto(&mut self, kind: RelayKind) -> bool {
        let index = kind.index();
        if self.relays[index].mode != RelayMode::Manual {
            return false;
        }
        self.relays[index].mode = RelayMode::Auto;
        debug!("{} is now automatically controlled", kind.tag());
        self.run_auto_control();
        true
    }

    fn publish_snapshot(&self) {
        if let Some(snapshots) = &self.snapshots {
            snapshots.send_replace(self.snapshot());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use climate_common::{codec::DeviceCommand, Liveness, Orientation, XmlNode};

    use super::*;
    use crate::events::outbound_queue;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum TimerCall {
        Start(TimerId, u64),
        Reset(TimerId),
        Stop(TimerId),
    }

    #[derive(Default)]
    pub(crate) struct RecordingTimers {
        pub(crate) calls: Vec<TimerCall>,
    }

    impl TimerControl for RecordingTimers {
        fn start(&mut self, id: TimerId, period_ms: u64) {
            self.calls.push(TimerCall::Start(id, period_ms));
        }

        fn reset(&mut self, id: TimerId) {
            self.calls.push(TimerCall::Reset(id));
        }

        fn stop(&mut self, id: TimerId) {
            self.calls.push(TimerCall::Stop(id));
        }
    }

    pub(crate) struct Harness {
        pub(crate) controller: Controller<RecordingTimers>,
        outbound: mpsc::Receiver<OutboundCommand>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_identity(IdentityConfig {
                controller_id: "controller".to_string(),
                user_id: "user".to_string(),
                sensor_id: None,
                actuator_id: None,
            })
        }

        pub(crate) fn with_identity(identity: IdentityConfig) -> Self {
            Self::with_capacity(identity, 64)
        }

        pub(crate) fn with_capacity(identity: IdentityConfig, capacity: usize) -> Self {
            let (outbound, rx) = outbound_queue(capacity);
            let controller = Controller::new(
                &identity,
                "ControllerConfig",
                RecordingTimers::default(),
                outbound,
            );
            Self {
                controller,
                outbound: rx,
            }
        }

        /// Boots with an empty store and clears the resulting traffic.
        pub(crate) fn booted() -> Self {
            let mut harness = Self::new();
            harness.controller.start();
            harness.controller.handle_event(ControllerEvent::SettingFailure);
            harness.drain();
            harness.controller.timers.calls.clear();
            harness
        }

        pub(crate) fn drain(&mut self) -> VecDeque<OutboundCommand> {
            let mut commands = VecDeque::new();
            while let Ok(command) = self.outbound.try_recv() {
                commands.push_back(command);
            }
            commands
        }

        pub(crate) fn receive(&mut self, sender: &str, payload: &str) {
            self.controller
                .handle_event(ControllerEvent::ReceivedMessage {
                    payload: payload.as_bytes().to_vec(),
                    sender: sender.to_string(),
                });
        }

        pub(crate) fn sensor_report(&mut self, sender: &str, temperature: f32, humidity: f32) {
            let payload = encode(
                &OutboundMessage::SensorReading {
                    temperature,
                    humidity,
                },
                Utc::now(),
            )
            .unwrap();
            self.receive(sender, std::str::from_utf8(&payload).unwrap());
        }

        pub(crate) fn actuator_report(&mut self, sender: &str, relays: [RelayStatus; 2]) {
            let payload =
                encode(&OutboundMessage::ActuatorState { relays }, Utc::now()).unwrap();
            self.receive(sender, std::str::from_utf8(&payload).unwrap());
        }

        pub(crate) fn user_command(&mut self, info: &str) {
            self.receive(
                "user",
                &format!("<command><time>now</time><info>{info}</info></command>"),
            );
        }
    }

    /// Outbound traffic decoded for assertions.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        User(XmlNode),
        Device(DeviceRole, Option<String>, XmlNode),
        Get,
        Set(Vec<u8>),
    }

    /// Decodes outbound traffic, expanding repeated answers into one entry
    /// per copy.
    pub(crate) fn sent(commands: VecDeque<OutboundCommand>) -> Vec<Sent> {
        commands
            .into_iter()
            .flat_map(|command| match command {
                OutboundCommand::SendToUser { recipient, payload } => {
                    assert_eq!(recipient, "user");
                    vec![Sent::User(XmlNode::parse(&payload).unwrap())]
                }
                OutboundCommand::AnswerUser {
                    recipient,
                    payload,
                    copies,
                } => {
                    assert_eq!(recipient, "user");
                    vec![Sent::User(XmlNode::parse(&payload).unwrap()); copies]
                }
                OutboundCommand::SendToDevice {
                    role,
                    device_id,
                    payload,
                } => vec![Sent::Device(
                    role,
                    device_id,
                    XmlNode::parse(&payload).unwrap(),
                )],
                OutboundCommand::GetSetting { name } => {
                    assert_eq!(name, "ControllerConfig");
                    vec![Sent::Get]
                }
                OutboundCommand::SetSetting { name, payload } => {
                    assert_eq!(name, "ControllerConfig");
                    vec![Sent::Set(payload)]
                }
            })
            .collect()
    }

    pub(crate) fn user_events(sent: &[Sent]) -> Vec<String> {
        sent.iter()
            .filter_map(|item| match item {
                Sent::User(node) if node.name() == "event" => {
                    node.value("event/type").map(str::to_string)
                }
                Sent::User(node) => node.value("response/info").map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn relay_commands(sent: &[Sent]) -> Vec<String> {
        sent.iter()
            .filter_map(|item| match item {
                Sent::Device(DeviceRole::Actuator, _, node) => {
                    node.value("command/info").map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_dispatches_idles_and_exits() {
        let (outbound, mut outbound_rx) = outbound_queue(16);
        let (events, event_rx) = crate::events::event_queue(16);
        let controller = Controller::new(
            &IdentityConfig::default(),
            "ControllerConfig",
            RecordingTimers::default(),
            outbound,
        );
        let wait = Duration::from_millis(100);
        let task = tokio::spawn(controller.run(event_rx, wait));

        assert!(matches!(
            outbound_rx.recv().await,
            Some(OutboundCommand::GetSetting { .. })
        ));
        assert!(events.post(ControllerEvent::SettingFailure));
        assert!(matches!(
            outbound_rx.recv().await,
            Some(OutboundCommand::SetSetting { .. })
        ));

        tokio::time::sleep(wait * 5).await;
        assert!(outbound_rx.try_recv().is_err());
        assert!(!task.is_finished());

        let payload = encode(
            &OutboundMessage::SensorReading {
                temperature: 30.0,
                humidity: 40.0,
            },
            Utc::now(),
        )
        .unwrap();
        assert!(
            events
                .deliver(ControllerEvent::ReceivedMessage {
                    payload,
                    sender: "sensorA".to_string(),
                })
                .await
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut dispatched = VecDeque::new();
        while let Ok(command) = outbound_rx.try_recv() {
            dispatched.push_back(command);
        }
        let dispatched = sent(dispatched);
        assert_eq!(
            user_events(&dispatched),
            vec!["DeviceStatus", "Measurement", "RelayStatus"]
        );
        assert_eq!(relay_commands(&dispatched), vec!["RELAY_2_ON"]);

        drop(events);
        tokio::time::timeout(wait * 2, task)
            .await
            .expect("loop exits once producers are gone")
            .unwrap();
    }

    #[test]
    fn heartbeat_reports_full_state() {
        let mut harness = Harness::booted();
        harness.controller.handle_event(ControllerEvent::HeartBeat);

        let sent = sent(harness.drain());
        assert_eq!(sent.len(), 1);
        let Sent::User(node) = &sent[0] else {
            panic!("expected user message");
        };
        assert_eq!(node.value("event/type"), Some("HeartBeat"));
        assert_eq!(node.value("event/info/Temperature"), Some("-1000.00"));
        assert_eq!(node.value("event/info/Relay_1/status"), Some("OFF"));
        assert_eq!(node.value("event/info/Sensor"), Some("DEAD"));
    }

    #[test]
    fn first_sensor_report_binds_and_drives_relay() {
        let mut harness = Harness::booted();
        harness.controller.sensors[0].orientation = Orientation::Above;

        harness.sensor_report("sensorA", 30.0, 40.0);

        let controller = &harness.controller;
        assert_eq!(controller.sensor.device_id.as_deref(), Some("sensorA"));
        assert_eq!(controller.sensor.liveness.state(), Liveness::Alive);
        assert_eq!(controller.relays[0].status, RelayStatus::On);
        assert_eq!(controller.sensors[0].value, 30.0);
        assert!(controller
            .timers
            .calls
            .contains(&TimerCall::Reset(TimerId::SensorExpiry)));

        let sent = sent(harness.drain());
        assert_eq!(
            user_events(&sent),
            vec!["DeviceStatus", "Measurement", "RelayStatus"]
        );
        // Humidity 40 > 30 with ABOVE switches the fan as well.
        assert_eq!(relay_commands(&sent), vec!["RELAY_1_ON", "RELAY_2_ON"]);
    }

    #[test]
    fn second_sensor_identity_is_rejected() {
        let mut harness = Harness::booted();
        harness.sensor_report("sensorA", 20.0, 20.0);
        harness.drain();
        let before = (harness.controller.sensors, harness.controller.relays);

        harness.sensor_report("sensorB", 30.0, 90.0);

        assert_eq!(harness.controller.sensor.device_id.as_deref(), Some("sensorA"));
        assert_eq!(
            (harness.controller.sensors, harness.controller.relays),
            before
        );
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn malformed_report_does_not_claim_the_role() {
        let mut harness = Harness::booted();
        harness.receive(
            "sensorX",
            "<event><type>Sensor</type><info><Temperature>abc</Temperature></info></event>",
        );
        assert_eq!(harness.controller.sensor.device_id, None);
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn unchanged_reading_is_idempotent() {
        let mut harness = Harness::booted();
        harness.sensor_report("sensorA", 20.0, 50.0);
        harness.drain();

        harness.sensor_report("sensorA", 20.004, 50.001);

        assert!(harness.drain().is_empty());
        assert_eq!(harness.controller.sensors[0].value, 20.0);
    }

    #[test]
    fn liveness_flips_once_per_transition() {
        let mut harness = Harness::booted();
        harness.sensor_report("sensorA", 20.0, 50.0);
        harness.drain();

        harness
            .controller
            .handle_event(ControllerEvent::DeviceExpired(DeviceRole::Sensor));
        harness
            .controller
            .handle_event(ControllerEvent::DeviceExpired(DeviceRole::Sensor));
        let expired = sent(harness.drain());
        assert_eq!(user_events(&expired), vec!["DeviceStatus"]);
        assert_eq!(harness.controller.sensor.liveness.state(), Liveness::Dead);

        harness.sensor_report("sensorA", 20.0, 50.0);
        harness.sensor_report("sensorA", 20.0, 50.0);
        let revived = sent(harness.drain());
        assert_eq!(user_events(&revived), vec!["DeviceStatus"]);
    }

    #[test]
    fn expiry_of_never_seen_device_is_silent() {
        let mut harness = Harness::booted();
        harness
            .controller
            .handle_event(ControllerEvent::DeviceExpired(DeviceRole::Actuator));
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn relay_on_command_switches_to_manual() {
        let mut harness = Harness::booted();
        harness.actuator_report("act-1", [RelayStatus::Off, RelayStatus::Off]);
        harness.drain();

        harness.user_command("RELAY_1_ON");

        let relay = harness.controller.relays[0];
        assert_eq!(relay.mode, RelayMode::Manual);
        assert_eq!(relay.status, RelayStatus::On);
        let sent = sent(harness.drain());
        assert_eq!(user_events(&sent), vec!["RELAY_1_ON", "RelayStatus"]);
        assert_eq!(relay_commands(&sent), vec!["RELAY_1_ON"]);
        assert!(matches!(
            &sent[1],
            Sent::Device(DeviceRole::Actuator, Some(id), _) if id == "act-1"
        ));
    }

    #[test]
    fn repeated_manual_command_reports_nothing_new() {
        let mut harness = Harness::booted();
        harness.user_command("RELAY_2_OFF");
        let sent_first = sent(harness.drain());
        assert_eq!(user_events(&sent_first), vec!["RELAY_2_OFF", "RelayStatus"]);
        assert!(relay_commands(&sent_first).is_empty());

        harness.user_command("RELAY_2_OFF");
        let sent_second = sent(harness.drain());
        assert_eq!(user_events(&sent_second), vec!["RELAY_2_OFF"]);
    }

    #[test]
    fn auto_command_reapplies_the_decision() {
        let mut harness = Harness::booted();
        harness.sensor_report("sensorA", 10.0, 10.0);
        // Temperature 10 <= 25 BELOW turns the heater on.
        assert_eq!(harness.controller.relays[0].status, RelayStatus::On);
        harness.user_command("RELAY_1_OFF");
        harness.drain();
        assert_eq!(harness.controller.relays[0].status, RelayStatus::Off);

        harness.user_command("RELAY_1_AUTO");

        assert_eq!(harness.controller.relays[0].mode, RelayMode::Auto);
        assert_eq!(harness.controller.relays[0].status, RelayStatus::On);
        let first = sent(harness.drain());
        assert_eq!(user_events(&first), vec!["RELAY_1_AUTO", "RelayStatus"]);
        assert_eq!(relay_commands(&first), vec!["RELAY_1_ON"]);

        harness.user_command("RELAY_1_AUTO");
        assert_eq!(user_events(&sent(harness.drain())), vec!["RELAY_1_AUTO"]);
    }

    #[test]
    fn manual_relay_ignores_sensor_updates() {
        let mut harness = Harness::booted();
        harness.user_command("RELAY_1_OFF");
        harness.drain();

        harness.sensor_report("sensorA", 0.0, 0.0);

        assert_eq!(harness.controller.relays[0].status, RelayStatus::Off);
        assert!(relay_commands(&sent(harness.drain())).is_empty());
    }

    #[test]
    fn actuator_is_forced_back_to_controller_state() {
        let mut harness = Harness::booted();
        harness.user_command("RELAY_2_ON");
        harness.drain();

        harness.actuator_report("act-1", [RelayStatus::On, RelayStatus::Off]);

        let sent = sent(harness.drain());
        assert_eq!(user_events(&sent), vec!["DeviceStatus"]);
        assert_eq!(relay_commands(&sent), vec!["RELAY_1_OFF", "RELAY_2_ON"]);
        assert_eq!(harness.controller.relays[0].status, RelayStatus::Off);
        assert_eq!(harness.controller.relays[1].status, RelayStatus::On);
    }

    #[test]
    fn relay_command_node_decodes_on_actuator() {
        let mut harness = Harness::booted();
        harness.actuator_report("act-1", [RelayStatus::Off, RelayStatus::Off]);
        harness.drain();
        harness.user_command("RELAY_2_ON");

        let command = harness
            .drain()
            .into_iter()
            .find_map(|command| match command {
                OutboundCommand::SendToDevice { payload, .. } => Some(payload),
                _ => None,
            })
            .unwrap();
        let Some(ParsedMessage::Command(command)) = decode(&command) else {
            panic!("expected command");
        };
        assert_eq!(
            command.device_command(),
            Some(DeviceCommand::SetRelay {
                relay: RelayKind::Fan,
                status: RelayStatus::On
            })
        );
    }

    #[test]
    fn ping_echoes_app_time_and_needs_it() {
        let mut harness = Harness::booted();
        harness.receive(
            "user",
            "<command><info>PING</info><app_time>2024-01-01T10:00:00Z</app_time></command>",
        );
        harness.user_command("PING");

        let sent = sent(harness.drain());
        assert_eq!(sent.len(), 1);
        let Sent::User(node) = &sent[0] else {
            panic!("expected user message");
        };
        assert_eq!(node.value("response/info"), Some("PING"));
        assert_eq!(node.value("response/app_time"), Some("2024-01-01T10:00:00Z"));
    }

    #[test]
    fn unknown_command_is_acknowledged() {
        let mut harness = Harness::booted();
        harness.user_command("SELF_DESTRUCT");
        assert_eq!(
            user_events(&sent(harness.drain())),
            vec!["UNKNOWN_COMMAND"]
        );
    }

    #[test]
    fn commands_from_strangers_and_garbage_are_dropped() {
        let mut harness = Harness::booted();
        harness.receive("mallory", "<command><info>RELAY_1_ON</info></command>");
        harness.receive("user", "<command><info>");
        harness.receive("user", "<response><info>x</info></response>");
        harness.receive("user", "<event><type>Sensor</type><info><Temperature>1</Temperature><Humidity>1</Humidity></info></event>");

        assert!(harness.drain().is_empty());
        assert_eq!(harness.controller.relays[0].mode, RelayMode::Auto);
        assert_eq!(harness.controller.sensor.device_id, None);
    }

    #[test]
    fn device_cannot_hold_both_roles() {
        let mut harness = Harness::booted();
        harness.sensor_report("node-1", 20.0, 20.0);
        harness.actuator_report("node-1", [RelayStatus::Off, RelayStatus::Off]);
        assert_eq!(harness.controller.actuator.device_id, None);
    }

    #[test]
    fn failed_enqueue_leaves_relay_unchanged() {
        let (outbound, rx) = outbound_queue(1);
        let mut controller = Controller::new(
            &IdentityConfig::default(),
            "ControllerConfig",
            RecordingTimers::default(),
            outbound,
        );
        controller.relays[0].mode = RelayMode::Manual;
        // Fill the single slot so the relay command cannot be queued.
        assert!(controller.respond("filler"));

        controller.set_auto(RelayKind::Heater);

        assert_eq!(controller.relays[0].mode, RelayMode::Auto);
        assert_eq!(controller.relays[0].status, RelayStatus::Off);
        drop(rx);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut harness = Harness::booted();
        harness.sensor_report("sensorA", 21.0, 45.0);
        let snapshot = harness.controller.snapshot();

        assert_eq!(snapshot.sync_phase, "TIMERS_RUNNING");
        assert_eq!(snapshot.sensors[0].value, 21.0);
        assert_eq!(snapshot.devices[0].device_id.as_deref(), Some("sensorA"));
        assert_eq!(snapshot.devices[1].liveness, Liveness::Dead);
        assert_ne!(snapshot.sensors[1].value, INITIAL_SENSOR_VALUE);
    }
}
