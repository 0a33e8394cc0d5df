use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

/// Who the controller is and whom it serves. Device ids left unset are bound
/// by first claim at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    pub controller_id: String,
    pub user_id: String,
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub actuator_id: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            controller_id: "controller".to_string(),
            user_id: "user".to_string(),
            sensor_id: None,
            actuator_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub identity: IdentityConfig,
    pub queue_capacity: usize,
    pub queue_wait_ms: u64,
    pub send_timeout_secs: u64,
    pub http_port: u16,
    pub settings_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            identity: IdentityConfig::default(),
            queue_capacity: 20,
            queue_wait_ms: 10_000,
            send_timeout_secs: 20,
            http_port: 8080,
            settings_name: "ControllerConfig".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.queue_capacity = self.queue_capacity.clamp(1, 1024);
        self.queue_wait_ms = self.queue_wait_ms.clamp(100, 60_000);
        self.send_timeout_secs = self.send_timeout_secs.clamp(1, 120);
        if self.settings_name.trim().is_empty() {
            self.settings_name = "ControllerConfig".to_string();
        }

        for id in [&mut self.identity.sensor_id, &mut self.identity.actuator_id] {
            if id.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *id = None;
            }
        }
    }
}
