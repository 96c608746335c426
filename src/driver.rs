//! Reconciliation driver.
//!
//! Runs `Bootstrapping -> InitialSync -> Steady -> Terminated` against an
//! injected proxy admin and container runtime.  In event mode the steady
//! loop applies each notification as it arrives; in poll mode it takes a
//! fresh inventory every `poll_interval` and pushes only on change.

use std::fmt;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::caddy::{ProxyAdmin, RoutingStyle};
use crate::error::SyncError;
use crate::reconcile::{Converger, UnknownDestroy};
use crate::retry::{with_backoff, RetryPolicy};
use crate::runtime::{BufferPolicy, ContainerRuntime, Observation};
use crate::types::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Incremental convergence on runtime events.
    Events,
    /// Full-diff convergence on a fixed interval.
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    InitialSync,
    Steady,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Bootstrapping => "bootstrapping",
            Phase::InitialSync => "initial sync",
            Phase::Steady => "steady state",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub mode: Mode,
    pub poll_interval: Duration,
    pub style: RoutingStyle,
    pub buffer: BufferPolicy,
    pub retry: RetryPolicy,
    pub unknown_destroy: UnknownDestroy,
}

pub struct Driver<A, R> {
    admin: A,
    runtime: R,
    settings: DriverSettings,
}

impl<A, R> Driver<A, R>
where
    A: ProxyAdmin,
    R: ContainerRuntime,
{
    pub fn new(admin: A, runtime: R, settings: DriverSettings) -> Self {
        Self {
            admin,
            runtime,
            settings,
        }
    }

    /// Run until the event stream ends, `cancel` fires, or an error
    /// terminates reconciliation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut phase = Phase::Bootstrapping;
        let result = match self.settings.mode {
            Mode::Events => self.run_events(&mut phase, &cancel).await,
            Mode::Poll => self.run_poll(&mut phase, &cancel).await,
        };
        match &result {
            Ok(()) => info!("Reconciliation finished during {}", phase),
            Err(e) => error!("Reconciliation terminated during {}: {}", phase, e),
        }
        phase = Phase::Terminated;
        info!("Driver {}", phase);
        result
    }

    async fn bootstrap(&self) -> Result<(), SyncError> {
        let admin = &self.admin;
        let existing = with_backoff(&self.settings.retry, "Fetching proxy config", move || {
            admin.fetch_config()
        })
        .await?;
        if existing.is_some() {
            info!("Proxy already configured");
            return Ok(());
        }
        info!("No proxy config found, creating one");
        with_backoff(&self.settings.retry, "Bootstrapping proxy", move || {
            admin.bootstrap()
        })
        .await
    }

    async fn snapshot(&self) -> Result<Vec<Instance>, SyncError> {
        let runtime = &self.runtime;
        with_backoff(&self.settings.retry, "Listing containers", move || {
            runtime.snapshot()
        })
        .await
    }

    fn converger(&self) -> Converger {
        Converger::new(
            self.settings.style,
            self.settings.retry,
            self.settings.unknown_destroy,
        )
    }

    async fn run_events(
        &self,
        phase: &mut Phase,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.bootstrap().await?;

        *phase = Phase::InitialSync;
        // Subscribe before the inventory so nothing started in between is lost.
        let producer = cancel.child_token();
        let _stop_producer = producer.clone().drop_guard();
        let mut subscription = self.runtime.subscribe(self.settings.buffer, producer.clone());

        let mut converger = self.converger();
        let instances = self.snapshot().await?;
        info!("Initial inventory found {} instances", instances.len());
        converger.resync(&self.admin, &instances).await?;

        *phase = Phase::Steady;
        loop {
            let observation = tokio::select! {
                _ = cancel.cancelled() => None,
                observation = subscription.events.next() => observation,
            };
            match observation {
                Some(Observation::Event(event)) => {
                    converger.apply_event(&self.admin, &event).await?;
                }
                Some(Observation::Resync) => {
                    warn!("Event gap detected, resynchronizing from inventory");
                    let instances = self.snapshot().await?;
                    converger.resync(&self.admin, &instances).await?;
                }
                None => break,
            }
        }

        producer.cancel();
        let dropped = subscription.events.dropped();
        drop(subscription.events);
        subscription.task.await??;
        if !cancel.is_cancelled() {
            info!(
                "Event stream ended with {} instances routed ({} events dropped)",
                converger.table().len(),
                dropped
            );
        }
        Ok(())
    }

    async fn run_poll(
        &self,
        phase: &mut Phase,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.bootstrap().await?;

        *phase = Phase::InitialSync;
        let mut converger = self.converger();
        let instances = self.snapshot().await?;
        converger.poll_tick(&self.admin, &instances).await?;

        *phase = Phase::Steady;
        info!(
            "Polling container inventory every {:?}",
            self.settings.poll_interval
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(self.settings.poll_interval) => {}
            }
            let instances = self.snapshot().await?;
            converger.poll_tick(&self.admin, &instances).await?;
        }
    }
}
