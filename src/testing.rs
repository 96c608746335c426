//! In-memory stand-ins for the proxy admin API and the container runtime.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::caddy::{CaddyConfig, ProxyAdmin, RoutingPayload};
use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::runtime::channel::{self, BufferPolicy, Observation};
use crate::runtime::{ContainerRuntime, Subscription};
use crate::types::Instance;

pub fn no_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 0,
        ..RetryPolicy::default()
    }
}

#[derive(Default)]
struct AdminState {
    config: Option<CaddyConfig>,
    unreachable: bool,
    bootstraps: usize,
    replace_failures: usize,
    replaced: Vec<RoutingPayload>,
}

/// Records every call; clones share state so a test can keep a handle
/// after moving one into the driver.
#[derive(Clone, Default)]
pub struct FakeAdmin {
    state: Arc<Mutex<AdminState>>,
}

impl FakeAdmin {
    pub fn configured() -> Self {
        let admin = Self::default();
        admin.state.lock().unwrap().config = Some(CaddyConfig::bootstrap(&[":80".into()]));
        admin
    }

    pub fn unreachable() -> Self {
        let admin = Self::default();
        admin.state.lock().unwrap().unreachable = true;
        admin
    }

    pub fn fail_next_replaces(&self, count: usize) {
        self.state.lock().unwrap().replace_failures = count;
    }

    pub fn bootstraps(&self) -> usize {
        self.state.lock().unwrap().bootstraps
    }

    pub fn replaced(&self) -> Vec<RoutingPayload> {
        self.state.lock().unwrap().replaced.clone()
    }
}

#[async_trait]
impl ProxyAdmin for FakeAdmin {
    async fn fetch_config(&self) -> Result<Option<CaddyConfig>, SyncError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(SyncError::transport("fake-admin", "connection refused"));
        }
        Ok(state.config.clone())
    }

    async fn bootstrap(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.bootstraps += 1;
        state.config = Some(CaddyConfig::bootstrap(&[":80".into()]));
        Ok(())
    }

    async fn replace(&self, payload: &RoutingPayload) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        if state.replace_failures > 0 {
            state.replace_failures -= 1;
            return Err(SyncError::transport("fake-admin", "connection reset"));
        }
        state.replaced.push(payload.clone());
        Ok(())
    }
}

/// Serves scripted inventories and a scripted event sequence.
pub struct FakeRuntime {
    snapshots: Mutex<VecDeque<Vec<Instance>>>,
    last: Mutex<Vec<Instance>>,
    events: Mutex<Vec<Observation>>,
    producer_error: Mutex<Option<SyncError>>,
    exhausted: Option<CancellationToken>,
    snapshot_calls: Arc<Mutex<usize>>,
}

impl FakeRuntime {
    pub fn new(snapshots: Vec<Vec<Instance>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            last: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            producer_error: Mutex::new(None),
            exhausted: None,
            snapshot_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_events(self, events: Vec<Observation>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    /// Make the event producer end with `err` after delivering its events.
    pub fn with_producer_error(self, err: SyncError) -> Self {
        *self.producer_error.lock().unwrap() = Some(err);
        self
    }

    /// Cancel `token` once every scripted snapshot has been served; later
    /// calls repeat the last inventory.
    pub fn cancel_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.exhausted = Some(token);
        self
    }

    pub fn snapshot_calls(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.snapshot_calls)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn snapshot(&self) -> Result<Vec<Instance>, SyncError> {
        *self.snapshot_calls.lock().unwrap() += 1;
        let next = self.snapshots.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(instances) => *last = instances,
            None => {
                if let Some(token) = &self.exhausted {
                    token.cancel();
                }
            }
        }
        Ok(last.clone())
    }

    fn subscribe(&self, buffer: BufferPolicy, cancel: CancellationToken) -> Subscription {
        let (sink, events) = channel::bounded(buffer);
        let scripted = std::mem::take(&mut *self.events.lock().unwrap());
        let producer_error = self.producer_error.lock().unwrap().take();
        let task = tokio::spawn(async move {
            for observation in scripted {
                if cancel.is_cancelled() || sink.send(observation).await.is_err() {
                    return Ok(());
                }
            }
            match producer_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });
        Subscription { events, task }
    }
}
