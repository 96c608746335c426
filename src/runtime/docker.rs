use super::channel::{self, BufferPolicy, EventSink, Observation};
use super::{ContainerRuntime, Subscription};
use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::types::{Instance, InstanceEvent};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DOCKER: &str = "docker";

/// Container labels that mark an instance for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelKeys {
    pub active: String,
    pub port: String,
    pub upstream: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            active: "caddy.service.discovery.active".into(),
            port: "caddy.service.discovery.port".into(),
            upstream: "caddy.service.discovery.upstream".into(),
        }
    }
}

impl LabelKeys {
    /// Turn a container listing entry into an instance.  Containers without
    /// the active flag are ignored; ones with a missing or malformed port or
    /// upstream are skipped with a warning.
    pub fn instance_from_container(&self, container: &ContainerSummary) -> Option<Instance> {
        let name = container
            .names
            .as_ref()
            .and_then(|n| n.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .filter(|n| !n.is_empty());
        let identity = match (name, container.id.as_ref()) {
            (Some(n), _) => n,
            (_, Some(id)) if !id.is_empty() => id.clone(),
            _ => {
                warn!("Skipping labeled container without name or id");
                return None;
            }
        };
        let labels = container.labels.as_ref()?;
        self.instance_from_labels(identity, labels)
    }

    /// Turn a runtime event into a create/destroy notification.  Anything
    /// that is not a container start or die, or lacks usable labels, yields
    /// `None`.
    pub fn translate_event(&self, event: &EventMessage) -> Option<InstanceEvent> {
        if event.typ != Some(EventMessageTypeEnum::CONTAINER) {
            return None;
        }
        let action = event.action.as_deref().unwrap_or_default();
        let build: fn(Instance) -> InstanceEvent = match action {
            "start" => InstanceEvent::created,
            "die" => InstanceEvent::destroyed,
            other => {
                debug!("Ignoring container event {:?}", other);
                return None;
            }
        };

        let actor = event.actor.as_ref()?;
        let attributes = actor.attributes.as_ref()?;
        let identity = attributes
            .get("name")
            .filter(|n| !n.is_empty())
            .or(actor.id.as_ref())
            .map(|n| n.trim_start_matches('/').to_string())
            .filter(|n| !n.is_empty());
        let Some(identity) = identity else {
            warn!("Skipping {} event without container name or id", action);
            return None;
        };

        self.instance_from_labels(identity, attributes).map(build)
    }

    fn instance_from_labels(
        &self,
        identity: String,
        labels: &HashMap<String, String>,
    ) -> Option<Instance> {
        if labels.get(&self.active).map(String::as_str) != Some("true") {
            return None;
        }

        let port = match labels.get(&self.port) {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) => port,
                Err(e) => {
                    warn!(
                        "Skipping {}: cannot parse port label {:?}: {}",
                        identity, raw, e
                    );
                    return None;
                }
            },
            None => {
                warn!("Skipping {}: missing label {}", identity, self.port);
                return None;
            }
        };

        let upstream = match labels.get(&self.upstream) {
            Some(u) if !u.trim().is_empty() => u.trim().to_string(),
            _ => {
                warn!("Skipping {}: missing label {}", identity, self.upstream);
                return None;
            }
        };

        Some(Instance::new(identity, port, upstream))
    }
}

pub struct DockerRuntime {
    docker: Docker,
    labels: LabelKeys,
    retry: RetryPolicy,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon using default settings.
    /// This handles the unix socket on Linux and `DOCKER_HOST` overrides.
    pub fn connect(labels: LabelKeys, retry: RetryPolicy) -> Result<Self, SyncError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| SyncError::transport(DOCKER, e))?;
        Ok(Self {
            docker,
            labels,
            retry,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn snapshot(&self) -> Result<Vec<Instance>, SyncError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            filters: HashMap::from([("label".to_string(), vec![self.labels.active.clone()])]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| SyncError::transport(DOCKER, e))?;

        let instances: Vec<Instance> = containers
            .iter()
            .filter_map(|c| self.labels.instance_from_container(c))
            .collect();
        debug!(
            "Inventory found {} labeled instances in {} containers",
            instances.len(),
            containers.len()
        );
        Ok(instances)
    }

    fn subscribe(&self, buffer: BufferPolicy, cancel: CancellationToken) -> Subscription {
        let (sink, events) = channel::bounded(buffer);
        let docker = self.docker.clone();
        let options = event_options(&self.labels);
        let task = tokio::spawn(watch_events(
            move || docker.events(Some(options.clone())),
            self.labels.clone(),
            self.retry,
            sink,
            cancel,
        ));
        Subscription { events, task }
    }
}

fn event_options(labels: &LabelKeys) -> EventsOptions<String> {
    EventsOptions::<String> {
        filters: [
            ("type", vec!["container".to_string()]),
            ("event", vec!["start".to_string(), "die".to_string()]),
            ("label", vec![labels.active.clone()]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
        ..Default::default()
    }
}

/// Producer loop: forwards translated events into `sink` until the stream
/// closes, the consumer goes away, or `cancel` fires.  Stream errors
/// reconnect through `connect` with backoff and emit a resync marker; once
/// `retry` is spent the last error ends the task.
async fn watch_events<F, S>(
    mut connect: F,
    labels: LabelKeys,
    retry: RetryPolicy,
    sink: EventSink,
    cancel: CancellationToken,
) -> Result<(), SyncError>
where
    F: FnMut() -> S,
    S: Stream<Item = Result<EventMessage, bollard::errors::Error>>,
{
    let mut failures = 0;
    loop {
        let mut stream = Box::pin(connect());
        if failures > 0 && sink.send(Observation::Resync).await.is_err() {
            return Ok(());
        }
        info!("Listening for Docker events...");

        let last_error = loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Event subscription cancelled");
                    return Ok(());
                }
                msg = stream.next() => msg,
            };
            match msg {
                Some(Ok(event)) => {
                    failures = 0;
                    let Some(observed) = labels.translate_event(&event) else {
                        continue;
                    };
                    debug!(
                        "Container event {:?} for {}",
                        observed.kind, observed.instance.identity
                    );
                    if sink.send(Observation::Event(observed)).await.is_err() {
                        info!("Event consumer gone, stopping Docker monitor");
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    error!("Error in Docker event stream: {}", e);
                    break e;
                }
                None => {
                    info!("Docker event stream closed");
                    return Ok(());
                }
            }
        };

        if failures >= retry.attempts {
            return Err(SyncError::transport(DOCKER, last_error));
        }
        let delay = retry.backoff(failures);
        failures += 1;
        warn!(
            "Reconnecting to Docker events in {:?} ({}/{})",
            delay, failures, retry.attempts
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(delay) => {}
        }
    }
}
