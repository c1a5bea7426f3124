//! Configuration module

use std::time::Duration;

use serde::Deserialize;

use crate::codec;

/// Refresh intervals at or below this many seconds disable the periodic refresh
const MIN_REFRESH_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub nello: NelloConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NelloConfig {
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// XOR key the access token was encoded with, if any
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for NelloConfig {
    fn default() -> Self {
        Self {
            token_type: String::new(),
            access_token: String::new(),
            api_url: default_api_url(),
            auth_url: default_auth_url(),
            secret: None,
        }
    }
}

impl NelloConfig {
    pub fn has_token(&self) -> bool {
        !self.token_type.is_empty() && !self.access_token.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Time-window refresh interval in seconds
    #[serde(default)]
    pub refresh: Option<u64>,
    #[serde(default = "default_events_max_count")]
    pub events_max_count: usize,
    /// State that receives webhook payloads relayed by the cloud service
    #[serde(default = "default_iot_state")]
    pub iot: String,
    /// Cloud webhook URL
    #[serde(default)]
    pub iobroker: Option<String>,
    /// DynDNS webhook URL served by the built-in listener
    #[serde(default)]
    pub uri: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            refresh: None,
            events_max_count: default_events_max_count(),
            iot: default_iot_state(),
            iobroker: None,
            uri: None,
        }
    }
}

/// How webhook events reach the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookMode {
    /// Delivered by the cloud service into the iot state
    Cloud(String),
    /// Delivered straight to our own listener
    DynDns(String),
    Disabled,
}

impl AdapterConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh
            .filter(|secs| *secs > MIN_REFRESH_SECS)
            .map(Duration::from_secs)
    }

    pub fn webhook_mode(&self) -> WebhookMode {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(String::from);

        if let Some(url) = non_empty(&self.iobroker) {
            WebhookMode::Cloud(url)
        } else if let Some(url) = non_empty(&self.uri) {
            WebhookMode::DynDns(url)
        } else {
            WebhookMode::Disabled
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_api_url() -> String {
    "https://public-api.nello.io/v1".to_string()
}

fn default_auth_url() -> String {
    "https://auth.nello.io/oauth/token/".to_string()
}

fn default_events_max_count() -> usize {
    30
}

fn default_iot_state() -> String {
    "iot.0.services.custom_nello".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("NELLO").separator("__"))
            .build()?;

        let mut config: Config = settings.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration, falling back to defaults: {}", e);
            Config::default()
        });
        config.normalize();

        Ok(config)
    }

    fn normalize(&mut self) {
        if self.adapter.events_max_count == 0 {
            self.adapter.events_max_count = default_events_max_count();
        }
        if self.adapter.iot.is_empty() {
            self.adapter.iot = default_iot_state();
        }
        if let Some(key) = self.nello.secret.as_deref().filter(|k| !k.is_empty()) {
            self.nello.access_token = codec::decode(key, &self.nello.access_token);
        }
    }
}
