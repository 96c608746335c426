//! Maps instances to Caddy routing fragments.
//!
//! Two shapes exist.  `Port` routing gives every instance its own server
//! listening on the instance's port and proxying to its upstream.  `Host`
//! routing shares the bootstrap server and tells instances apart by the
//! request host, with a nested subroute proxying to the instance port.
//! A process uses one style for every fragment it builds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Handler, Match, Route, Server};
use crate::types::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStyle {
    Port,
    Host,
}

/// Routing rule generated from one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fragment {
    Server(Server),
    Route(Route),
}

/// The complete set of fragments in the form the admin API replaces at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RoutingPayload {
    /// Servers keyed by instance identity.
    Servers(BTreeMap<String, Server>),
    /// Routes of the shared server, ordered by instance identity.
    Routes(Vec<Route>),
}

impl RoutingPayload {
    pub fn empty(style: RoutingStyle) -> Self {
        match style {
            RoutingStyle::Port => RoutingPayload::Servers(BTreeMap::new()),
            RoutingStyle::Host => RoutingPayload::Routes(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RoutingPayload::Servers(servers) => servers.len(),
            RoutingPayload::Routes(routes) => routes.len(),
        }
    }

    /// Assemble a payload from `(identity, fragment)` pairs.  Fragments of
    /// the other shape are skipped.
    pub fn collect<'a>(
        style: RoutingStyle,
        fragments: impl IntoIterator<Item = (&'a String, &'a Fragment)>,
    ) -> Self {
        let mut payload = Self::empty(style);
        for (identity, fragment) in fragments {
            match (&mut payload, fragment) {
                (RoutingPayload::Servers(servers), Fragment::Server(server)) => {
                    servers.insert(identity.clone(), server.clone());
                }
                (RoutingPayload::Routes(routes), Fragment::Route(route)) => {
                    routes.push(route.clone());
                }
                _ => {}
            }
        }
        payload
    }
}

pub fn build(instance: &Instance, style: RoutingStyle) -> Fragment {
    match style {
        RoutingStyle::Port => Fragment::Server(port_server(instance.port, &instance.upstream)),
        RoutingStyle::Host => Fragment::Route(host_route(&instance.upstream, instance.port)),
    }
}

fn port_server(port: u16, upstream: &str) -> Server {
    Server {
        listen: vec![format!(":{port}")],
        routes: vec![Route {
            matchers: Vec::new(),
            handle: vec![Handler::reverse_proxy(upstream)],
        }],
    }
}

fn host_route(domain: &str, port: u16) -> Route {
    Route {
        matchers: vec![Match {
            host: vec![domain.to_string()],
        }],
        handle: vec![Handler::subroute(vec![Route {
            matchers: Vec::new(),
            handle: vec![Handler::reverse_proxy(format!(":{port}"))],
        }])],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_style_listens_on_instance_port() {
        let fragment = build(&Instance::new("a", 8080, "app:3000"), RoutingStyle::Port);
        assert_eq!(
            serde_json::to_value(&fragment).unwrap(),
            json!({
                "listen": [":8080"],
                "routes": [{"handle": [{"handler": "reverse_proxy", "upstreams": [{"dial": "app:3000"}]}]}]
            })
        );
    }

    #[test]
    fn host_style_wraps_subroute_in_host_match() {
        let fragment = build(
            &Instance::new("a", 8080, "subdomain.example.com"),
            RoutingStyle::Host,
        );
        let Fragment::Route(route) = fragment else {
            panic!("host style must produce a route");
        };

        assert_eq!(route.matchers.len(), 1);
        assert_eq!(route.matchers[0].host, vec!["subdomain.example.com"]);
        assert_eq!(route.handle.len(), 1);
        assert_eq!(route.handle[0].handler, "subroute");
        let inner = &route.handle[0].routes;
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].handle[0].handler, "reverse_proxy");
        assert_eq!(inner[0].handle[0].upstreams[0].dial, ":8080");
    }

    #[test]
    fn build_is_byte_deterministic() {
        let instance = Instance::new("svc", 9000, "svc.internal:80");
        for style in [RoutingStyle::Port, RoutingStyle::Host] {
            let first = serde_json::to_vec(&build(&instance, style)).unwrap();
            let second = serde_json::to_vec(&build(&instance.clone(), style)).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn payload_keys_servers_by_identity() {
        let a = "a".to_string();
        let b = "b".to_string();
        let fa = build(&Instance::new("a", 8080, "app:3000"), RoutingStyle::Port);
        let fb = build(&Instance::new("b", 8081, "api:3000"), RoutingStyle::Port);

        let payload = RoutingPayload::collect(RoutingStyle::Port, [(&b, &fb), (&a, &fa)]);
        let json = serde_json::to_value(&payload).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn empty_payload_serializes_per_style() {
        assert_eq!(
            serde_json::to_string(&RoutingPayload::empty(RoutingStyle::Port)).unwrap(),
            "{}"
        );
        assert_eq!(
            serde_json::to_string(&RoutingPayload::empty(RoutingStyle::Host)).unwrap(),
            "[]"
        );
    }
}
