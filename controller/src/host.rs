use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use rumqttc::{AsyncClient, MqttOptions};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use climate_common::{is_valid_id, ControllerSnapshot, RuntimeConfig};

use crate::{
    console,
    controller::Controller,
    events::{event_queue, outbound_queue},
    status,
    store::FileSettingsStore,
    timers::TokioTimers,
    transport::{run_worker, spawn_inbound_loop, MqttTransport},
};

pub async fn run() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("CLIMATE_LOG").unwrap_or_else(|_| "info".to_string()))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = std::env::var("CLIMATE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.climate"));

    let mut runtime = load_runtime_config(&data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    apply_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();
    validate_identity(&runtime)?;

    let identity = runtime.identity.clone();
    info!(
        "controller {} serving user {}",
        identity.controller_id, identity.user_id
    );

    let mut mqtt_options = MqttOptions::new(
        identity.controller_id.clone(),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let (events, event_rx) = event_queue(runtime.queue_capacity);
    let (outbound, outbound_rx) = outbound_queue(runtime.queue_capacity);

    spawn_inbound_loop(
        mqtt.clone(),
        eventloop,
        identity.controller_id.clone(),
        events.clone(),
    );
    tokio::spawn(run_worker(
        outbound_rx,
        MqttTransport::new(mqtt, identity.controller_id.clone()),
        FileSettingsStore::new(&data_dir),
        events.clone(),
        Duration::from_secs(runtime.send_timeout_secs),
    ));

    let controller = Controller::new(
        &identity,
        runtime.settings_name.clone(),
        TokioTimers::new(events),
        outbound,
    );
    let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());
    let controller = controller.with_snapshots(snapshot_tx);
    let controller_task = tokio::spawn(
        controller.run(event_rx, Duration::from_millis(runtime.queue_wait_ms)),
    );

    spawn_status(runtime.http_port, snapshot_rx.clone());

    wait_for_shutdown(
        tokio::signal::ctrl_c(),
        console::run(snapshot_rx),
        controller_task,
    )
    .await
}

/// The status endpoint is optional: if it cannot serve, the controller keeps
/// running without it.
fn spawn_status(port: u16, snapshots: watch::Receiver<ControllerSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = status::serve(port, snapshots).await {
            error!("status endpoint stopped: {err:#}");
        }
    })
}

/// Only ctrl-c, console `exit` or the end of the controller loop stop the
/// process.
async fn wait_for_shutdown(
    ctrl_c: impl Future<Output = std::io::Result<()>>,
    console: impl Future<Output = ()>,
    controller: JoinHandle<()>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = ctrl_c => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutting down on ctrl-c");
        }
        () = console => info!("shutting down on console exit"),
        result = controller => match result {
            Ok(()) => info!("controller loop ended"),
            Err(err) => error!("controller loop panicked: {err}"),
        },
    }
    Ok(())
}

async fn load_runtime_config(data_dir: &Path) -> anyhow::Result<RuntimeConfig> {
    let path = data_dir.join("runtime.json");
    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.network.mqtt_port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(id) = var("CLIMATE_CONTROLLER_ID") {
        runtime.identity.controller_id = id;
    }
    if let Some(id) = var("CLIMATE_USER_ID") {
        runtime.identity.user_id = id;
    }
    if let Some(id) = var("CLIMATE_SENSOR_ID") {
        runtime.identity.sensor_id = Some(id);
    }
    if let Some(id) = var("CLIMATE_ACTUATOR_ID") {
        runtime.identity.actuator_id = Some(id);
    }
    if let Some(port) = var("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.http_port = port;
    }
}

fn validate_identity(runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let identity = &runtime.identity;
    let ids = [
        Some(identity.controller_id.as_str()),
        Some(identity.user_id.as_str()),
        identity.sensor_id.as_deref(),
        identity.actuator_id.as_deref(),
    ];
    for id in ids.into_iter().flatten() {
        if !is_valid_id(id) {
            bail!("invalid identifier {id:?} in runtime config");
        }
    }
    if identity.controller_id == identity.user_id {
        bail!("controller and user identifiers must differ");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "not-a-port"),
            ("CLIMATE_SENSOR_ID", "sensorA"),
            ("CONTROLLER_HTTP_PORT", "9090"),
        ]
        .into_iter()
        .collect();
        let mut runtime = RuntimeConfig::default();

        apply_overrides(&mut runtime, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(runtime.network.mqtt_host, "broker.local");
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.identity.sensor_id.as_deref(), Some("sensorA"));
        assert_eq!(runtime.http_port, 9090);
    }

    #[test]
    fn identity_must_be_usable_as_topic_levels() {
        let mut runtime = RuntimeConfig::default();
        assert!(validate_identity(&runtime).is_ok());

        runtime.identity.actuator_id = Some("act/1".to_string());
        assert!(validate_identity(&runtime).is_err());

        runtime.identity.actuator_id = None;
        runtime.identity.user_id = runtime.identity.controller_id.clone();
        assert!(validate_identity(&runtime).is_err());
    }

    fn empty_snapshot() -> ControllerSnapshot {
        ControllerSnapshot {
            user_id: "user".to_string(),
            heartbeat_ms: 15_000,
            sync_phase: "TIMERS_RUNNING",
            sensors: Vec::new(),
            relays: Vec::new(),
            devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn busy_status_port_does_not_stop_the_controller() {
        let occupied = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();
        let (_snapshot_tx, snapshot_rx) = watch::channel(empty_snapshot());

        spawn_status(port, snapshot_rx).await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let controller = tokio::spawn(async move {
            let _ = stop_rx.await;
        });
        let mut shutdown = Box::pin(wait_for_shutdown(
            std::future::pending::<std::io::Result<()>>(),
            std::future::pending::<()>(),
            controller,
        ));

        assert!(tokio::time::timeout(Duration::from_millis(50), &mut shutdown)
            .await
            .is_err());

        stop_tx.send(()).unwrap();
        assert!(shutdown.await.is_ok());
    }

    #[tokio::test]
    async fn console_exit_ends_the_process() {
        let controller = tokio::spawn(std::future::pending::<()>());
        let result = wait_for_shutdown(
            std::future::pending::<std::io::Result<()>>(),
            async {},
            controller,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_runtime_file_yields_defaults() {
        let dir = std::env::temp_dir().join(format!("climate-host-{}", std::process::id()));
        let runtime = load_runtime_config(&dir).await.unwrap();
        assert_eq!(runtime, RuntimeConfig::default());
    }
}
