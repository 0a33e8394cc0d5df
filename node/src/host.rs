use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use climate_common::{
    decode, encode, extract_sender, inbox_filter, is_valid_id, message_topic, DeviceCommand,
    DeviceRole, NetworkConfig, ParsedMessage, SensorKind,
};

use crate::{
    actuator::{self, ActuatorNode},
    sensor::{self, SensorNode, Simulated},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: DeviceRole,
    pub node_id: String,
    pub controller_id: String,
    pub network: NetworkConfig,
}

impl NodeConfig {
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let role = match var("NODE_ROLE").as_deref().map(str::trim) {
            Some(raw) if raw.eq_ignore_ascii_case("sensor") => DeviceRole::Sensor,
            Some(raw) if raw.eq_ignore_ascii_case("actuator") => DeviceRole::Actuator,
            other => bail!("NODE_ROLE must be sensor or actuator, got {other:?}"),
        };
        let node_id = var("NODE_ID").unwrap_or_else(|| role.as_str().to_lowercase());
        let controller_id = var("CONTROLLER_ID").unwrap_or_else(|| "controller".to_string());
        for id in [&node_id, &controller_id] {
            if !is_valid_id(id) {
                bail!("invalid identifier {id:?}");
            }
        }
        if node_id == controller_id {
            bail!("node and controller identifiers must differ");
        }

        let mut network = NetworkConfig::default();
        if let Some(host) = var("MQTT_HOST") {
            network.mqtt_host = host;
        }
        if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            network.mqtt_port = port;
        }
        if let Some(user) = var("MQTT_USER") {
            network.mqtt_user = user;
            network.mqtt_pass = var("MQTT_PASS").unwrap_or_default();
        }

        Ok(Self {
            role,
            node_id,
            controller_id,
            network,
        })
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = NodeConfig::from_vars(|key| std::env::var(key).ok())?;

    let mut mqtt_options = MqttOptions::new(
        config.node_id.clone(),
        config.network.mqtt_host.clone(),
        config.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !config.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            config.network.mqtt_user.clone(),
            config.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);

    let (command_tx, command_rx) = mpsc::channel(8);
    let (report_tx, mut report_rx) = mpsc::channel(8);

    tokio::spawn(poll_commands(
        mqtt.clone(),
        eventloop,
        config.clone(),
        command_tx,
    ));

    info!(
        "{} node {} reporting to {}",
        config.role.as_str(),
        config.node_id,
        config.controller_id
    );

    let node_task = match config.role {
        DeviceRole::Sensor => {
            let mut simulated = Simulated::default();
            tokio::spawn(sensor::run(
                SensorNode::new(),
                move |kind: SensorKind| simulated.read(kind),
                command_rx,
                report_tx,
            ))
        }
        DeviceRole::Actuator => {
            tokio::spawn(actuator::run(ActuatorNode::new(), command_rx, report_tx))
        }
    };

    let topic = message_topic(&config.controller_id, &config.node_id);
    loop {
        tokio::select! {
            report = report_rx.recv() => {
                let Some(report) = report else {
                    break;
                };
                let payload = encode(&report, Utc::now())
                    .with_context(|| format!("failed to encode {}", report.name()))?;
                mqtt.publish(topic.clone(), QoS::AtLeastOnce, false, payload)
                    .await
                    .context("failed to publish node report")?;
                debug!("published {}", report.name());
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutting down on ctrl-c");
                node_task.abort();
                return Ok(());
            }
        }
    }

    node_task.await.context("node task panicked")?
}

async fn poll_commands(
    client: AsyncClient,
    mut eventloop: EventLoop,
    config: NodeConfig,
    commands: mpsc::Sender<DeviceCommand>,
) {
    let filter = inbox_filter(&config.node_id);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let Some(command) = command_from(
                    &message.topic,
                    &message.payload,
                    &config.node_id,
                    &config.controller_id,
                ) else {
                    continue;
                };
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected, subscribing to {filter}");
                if let Err(err) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                    warn!("mqtt subscribe failed: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("node mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Commands are only taken from the configured controller.
fn command_from(
    topic: &str,
    payload: &[u8],
    node_id: &str,
    controller_id: &str,
) -> Option<DeviceCommand> {
    let sender = extract_sender(topic, node_id)?;
    if sender != controller_id {
        debug!("ignoring message from {sender}");
        return None;
    }
    match decode(payload) {
        Some(ParsedMessage::Command(command)) => {
            let parsed = command.device_command();
            if parsed.is_none() {
                warn!("unknown command {:?}", command.info());
            }
            parsed
        }
        _ => {
            debug!("ignoring non-command payload from {sender}");
            None
        }
    }
}
