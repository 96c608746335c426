use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::caddy::RoutingStyle;
use crate::driver::{DriverSettings, Mode};
use crate::reconcile::UnknownDestroy;
use crate::retry::RetryPolicy;
use crate::runtime::{BufferPolicy, LabelKeys};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub admin_url: String,
    pub admin_timeout_secs: u64,
    pub mode: Mode,
    pub poll_interval_secs: u64,
    pub routing: RoutingStyle,
    /// Listen addresses of the server installed when the proxy is empty.
    pub listen: Vec<String>,
    pub event_buffer: BufferPolicy,
    pub retry: RetryPolicy,
    pub unknown_destroy: UnknownDestroy,
    pub labels: LabelKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:2019".into(),
            admin_timeout_secs: 10,
            mode: Mode::Events,
            poll_interval_secs: 5,
            routing: RoutingStyle::Port,
            listen: vec![":443".into(), ":80".into()],
            event_buffer: BufferPolicy::default(),
            retry: RetryPolicy::default(),
            unknown_destroy: UnknownDestroy::Error,
            labels: LabelKeys::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("caddy-discovery.toml"))
            .merge(Json::file("caddy-discovery.json"))
            .merge(Env::prefixed("CADDY_DISCOVERY_").split("__"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        reqwest::Url::parse(&self.admin_url)
            .map_err(|e| anyhow::anyhow!("Invalid admin_url {:?}: {}", self.admin_url, e))?;
        if self.mode == Mode::Poll && self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.event_buffer.capacity == 0 {
            anyhow::bail!("event_buffer.capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            mode: self.mode,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            style: self.routing,
            buffer: self.event_buffer,
            retry: self.retry,
            unknown_destroy: self.unknown_destroy,
        }
    }
}
