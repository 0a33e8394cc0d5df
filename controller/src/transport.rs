use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, QoS};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use climate_common::{codec::CONTENT_TYPE, extract_sender, inbox_filter, message_topic};

use crate::{
    events::{ControllerEvent, EventSender, OutboundCommand},
    store::SettingsStore,
};

pub const MAX_INBOUND_PAYLOAD_BYTES: usize = 4096;

/// Addressed delivery of opaque payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        content_type: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    own_id: String,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, own_id: impl Into<String>) -> Self {
        Self {
            client,
            own_id: own_id.into(),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn send(
        &self,
        recipient: &str,
        content_type: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let topic = message_topic(recipient, &self.own_id);
        debug!(
            "publishing {} bytes of {content_type} on {topic}",
            payload.len()
        );
        tokio::time::timeout(
            timeout,
            self.client
                .publish(topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .with_context(|| format!("send to {recipient} timed out"))?
        .with_context(|| format!("failed to publish to {recipient}"))?;
        Ok(())
    }
}

/// Polls the MQTT event loop and turns every publish addressed to `own_id`
/// into a `ReceivedMessage` event. The inbox subscription is renewed on each
/// connection acknowledgment.
pub fn spawn_inbound_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    own_id: String,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let filter = inbox_filter(&own_id);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized payload on {} ({} bytes)",
                            message.topic,
                            message.payload.len()
                        );
                        continue;
                    }
                    let Some(sender) = extract_sender(&message.topic, &own_id) else {
                        debug!("ignoring publish on foreign topic {}", message.topic);
                        continue;
                    };
                    let event = ControllerEvent::ReceivedMessage {
                        payload: message.payload.to_vec(),
                        sender: sender.to_string(),
                    };
                    if !events.deliver(event).await {
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
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Transport-side half of the controller: drains outbound commands, talks to
/// the transport and the settings store, and reports fetch results back as
/// events. Runs until the outbound queue closes.
pub async fn run_worker<T, S>(
    mut outbound: mpsc::Receiver<OutboundCommand>,
    transport: T,
    store: S,
    events: EventSender,
    send_timeout: Duration,
) where
    T: Transport,
    S: SettingsStore,
{
    while let Some(command) = outbound.recv().await {
        match command {
            OutboundCommand::SendToUser { recipient, payload } => {
                send_logged(&transport, &recipient, payload, send_timeout).await;
            }
            OutboundCommand::AnswerUser {
                recipient,
                payload,
                copies,
            } => {
                for _ in 0..copies {
                    send_logged(&transport, &recipient, payload.clone(), send_timeout).await;
                }
            }
            OutboundCommand::SendToDevice {
                role,
                device_id: None,
                ..
            } => {
                debug!("no {} bound yet, dropping device send", role.as_str());
            }
            OutboundCommand::SendToDevice {
                device_id: Some(device_id),
                payload,
                ..
            } => {
                send_logged(&transport, &device_id, payload, send_timeout).await;
            }
            OutboundCommand::GetSetting { name } => {
                let event = match store.get(&name).await {
                    Ok(Some(payload)) => ControllerEvent::SettingSuccess(payload),
                    Ok(None) => {
                        info!("no stored settings under {name}");
                        ControllerEvent::SettingFailure
                    }
                    Err(err) => {
                        warn!("settings fetch failed: {err:#}");
                        ControllerEvent::SettingFailure
                    }
                };
                if !events.deliver(event).await {
                    break;
                }
            }
            OutboundCommand::SetSetting { name, payload } => {
                if let Err(err) = store.set(&name, &payload).await {
                    warn!("settings persist failed: {err:#}");
                }
            }
        }
    }
    debug!("outbound queue closed, transport worker exiting");
}

async fn send_logged<T: Transport>(
    transport: &T,
    recipient: &str,
    payload: Vec<u8>,
    timeout: Duration,
) {
    if let Err(err) = transport
        .send(recipient, CONTENT_TYPE, payload, timeout)
        .await
    {
        warn!("send to {recipient} failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use climate_common::DeviceRole;

    use super::*;
    use crate::events::{event_queue, outbound_queue};

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            recipient: &str,
            content_type: &str,
            payload: Vec<u8>,
            _timeout: Duration,
        ) -> anyhow::Result<()> {
            assert_eq!(content_type, "text/plain");
            if self.fail {
                anyhow::bail!("link down");
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), payload));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore {
        blobs: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        broken: bool,
    }

    #[async_trait]
    impl SettingsStore for MemoryStore {
        async fn get(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
            if self.broken {
                anyhow::bail!("store offline");
            }
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone()))
        }

        async fn set(&self, name: &str, payload: &[u8]) -> anyhow::Result<()> {
            if self.broken {
                anyhow::bail!("store offline");
            }
            let mut blobs = self.blobs.lock().unwrap();
            blobs.retain(|(key, _)| key != name);
            blobs.push((name.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    async fn drain(
        commands: Vec<OutboundCommand>,
        transport: RecordingTransport,
        store: MemoryStore,
    ) -> Vec<ControllerEvent> {
        let (events, mut event_rx) = event_queue(16);
        let (outbound, outbound_rx) = outbound_queue(16);
        for command in commands {
            assert!(outbound.submit(command));
        }
        drop(outbound);

        run_worker(outbound_rx, transport, store, events, Duration::from_secs(1)).await;

        let mut received = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            received.push(event);
        }
        received
    }

    #[tokio::test]
    async fn routes_sends_and_drops_unbound_devices() {
        let transport = RecordingTransport::default();
        drain(
            vec![
                OutboundCommand::SendToUser {
                    recipient: "user-1".to_string(),
                    payload: b"a".to_vec(),
                },
                OutboundCommand::SendToDevice {
                    role: DeviceRole::Actuator,
                    device_id: None,
                    payload: b"b".to_vec(),
                },
                OutboundCommand::SendToDevice {
                    role: DeviceRole::Sensor,
                    device_id: Some("sensorA".to_string()),
                    payload: b"c".to_vec(),
                },
            ],
            transport.clone(),
            MemoryStore::default(),
        )
        .await;

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                ("user-1".to_string(), b"a".to_vec()),
                ("sensorA".to_string(), b"c".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn answer_is_sent_once_per_copy() {
        let transport = RecordingTransport::default();
        drain(
            vec![OutboundCommand::AnswerUser {
                recipient: "user-1".to_string(),
                payload: b"ok".to_vec(),
                copies: 3,
            }],
            transport.clone(),
            MemoryStore::default(),
        )
        .await;

        assert_eq!(
            transport.sent.lock().unwrap().clone(),
            vec![("user-1".to_string(), b"ok".to_vec()); 3]
        );
    }

    #[tokio::test]
    async fn setting_round_trip_through_store() {
        let store = MemoryStore::default();
        let events = drain(
            vec![
                OutboundCommand::GetSetting {
                    name: "ControllerConfig".to_string(),
                },
                OutboundCommand::SetSetting {
                    name: "ControllerConfig".to_string(),
                    payload: b"<ControllerConfig/>".to_vec(),
                },
                OutboundCommand::GetSetting {
                    name: "ControllerConfig".to_string(),
                },
            ],
            RecordingTransport::default(),
            store,
        )
        .await;

        assert_eq!(
            events,
            vec![
                ControllerEvent::SettingFailure,
                ControllerEvent::SettingSuccess(b"<ControllerConfig/>".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_logged_not_fatal() {
        let events = drain(
            vec![
                OutboundCommand::SendToUser {
                    recipient: "user-1".to_string(),
                    payload: b"a".to_vec(),
                },
                OutboundCommand::SetSetting {
                    name: "ControllerConfig".to_string(),
                    payload: Vec::new(),
                },
                OutboundCommand::GetSetting {
                    name: "ControllerConfig".to_string(),
                },
            ],
            RecordingTransport {
                fail: true,
                ..RecordingTransport::default()
            },
            MemoryStore {
                broken: true,
                ..MemoryStore::default()
            },
        )
        .await;

        assert_eq!(events, vec![ControllerEvent::SettingFailure]);
    }
}
