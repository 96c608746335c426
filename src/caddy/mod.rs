//! Caddy JSON configuration model.
//!
//! Only the slice of Caddy's config tree the daemon reads or writes is
//! modelled: `apps.http.servers.<name>` with its listeners and routes.
//! Unknown fields in fetched configs are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod admin;
pub mod builder;

pub use admin::{CaddyAdmin, ProxyAdmin};
pub use builder::{build, Fragment, RoutingPayload, RoutingStyle};

/// Name of the shared server installed by bootstrap and used by host routing.
pub const DEFAULT_SERVER: &str = "srv0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaddyConfig {
    #[serde(default)]
    pub apps: Apps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Apps {
    #[serde(default)]
    pub http: HttpApp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpApp {
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<Match>,
    #[serde(default)]
    pub handle: Vec<Handler>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Match {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub handler: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,
    /// Nested routes of a `subroute` handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub dial: String,
}

impl CaddyConfig {
    /// Minimal config Caddy needs before route pushes are accepted: one
    /// server with the given listeners and no routes.
    pub fn bootstrap(listen: &[String]) -> Self {
        let mut config = CaddyConfig::default();
        config.apps.http.servers.insert(
            DEFAULT_SERVER.to_string(),
            Server {
                listen: listen.to_vec(),
                routes: Vec::new(),
            },
        );
        config
    }
}

impl Handler {
    pub fn reverse_proxy(dial: impl Into<String>) -> Self {
        Self {
            handler: "reverse_proxy".into(),
            upstreams: vec![Upstream { dial: dial.into() }],
            ..Default::default()
        }
    }

    pub fn subroute(routes: Vec<Route>) -> Self {
        Self {
            handler: "subroute".into(),
            routes,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_admin_config_dump() {
        let raw = r#"{"apps":{"http":{"servers":{"exampleServer":{"listen":[":443"],"routes":[{"handle":[{"handler":"reverse_proxy","upstreams":[{"dial":":8080"}]}]}]}}}}}"#;
        let config: CaddyConfig = serde_json::from_str(raw).unwrap();

        let server = &config.apps.http.servers["exampleServer"];
        assert_eq!(server.listen, vec![":443"]);
        assert_eq!(server.routes.len(), 1);
        assert_eq!(server.routes[0].handle[0].handler, "reverse_proxy");
        assert_eq!(server.routes[0].handle[0].upstreams[0].dial, ":8080");
    }

    #[test]
    fn ignores_fields_outside_the_model() {
        let raw = r#"{"admin":{"listen":"localhost:2019"},"apps":{"tls":{},"http":{"servers":{}}}}"#;
        let config: CaddyConfig = serde_json::from_str(raw).unwrap();
        assert!(config.apps.http.servers.is_empty());
    }

    #[test]
    fn handler_options_outside_the_model_are_dropped() {
        let raw = r#"{"handler":"static_response","body":"hello","status_code":200}"#;
        let handler: Handler = serde_json::from_str(raw).unwrap();
        assert_eq!(handler.handler, "static_response");
        assert_eq!(
            serde_json::to_string(&handler).unwrap(),
            r#"{"handler":"static_response"}"#
        );
    }

    #[test]
    fn bootstrap_installs_empty_default_server() {
        let config = CaddyConfig::bootstrap(&[":443".into(), ":80".into()]);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "apps": {"http": {"servers": {"srv0": {"listen": [":443", ":80"], "routes": []}}}}
            })
        );
    }
}
