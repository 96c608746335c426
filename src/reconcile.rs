//! Desired routing state and convergence against the proxy.
//!
//! [`DesiredState`] is the single source of truth for what the proxy should
//! be serving.  [`Converger`] owns it and decides when to push: after every
//! event in incremental mode, only on a serialized difference in poll mode.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::caddy::{build, Fragment, ProxyAdmin, RoutingPayload, RoutingStyle};
use crate::error::SyncError;
use crate::retry::{with_backoff, RetryPolicy};
use crate::types::{EventKind, Instance, InstanceEvent};

/// What to do with a destroy notification for an identity that was never
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDestroy {
    /// Fail with [`SyncError::Consistency`].
    Error,
    /// Log a warning and leave the table untouched.
    Ignore,
}

/// Identity -> fragment map, ordered so serialization is deterministic.
#[derive(Debug, Clone)]
pub struct DesiredState {
    style: RoutingStyle,
    entries: BTreeMap<String, Fragment>,
}

impl DesiredState {
    pub fn new(style: RoutingStyle) -> Self {
        Self {
            style,
            entries: BTreeMap::new(),
        }
    }

    /// Insert or overwrite the fragment for `instance`.  Inactive instances
    /// are not routed and drop any previous entry.
    pub fn upsert(&mut self, instance: &Instance) {
        if instance.active {
            self.entries
                .insert(instance.identity.clone(), build(instance, self.style));
        } else {
            self.entries.remove(&instance.identity);
        }
    }

    pub fn remove(&mut self, identity: &str) -> Option<Fragment> {
        self.entries.remove(identity)
    }

    /// Replace the whole table with fragments for `instances`.
    pub fn rebuild(&mut self, instances: &[Instance]) {
        self.entries.clear();
        for instance in instances {
            self.upsert(instance);
        }
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn payload(&self) -> RoutingPayload {
        RoutingPayload::collect(self.style, &self.entries)
    }
}

pub struct Converger {
    table: DesiredState,
    /// Bytes of the payload last pushed successfully.  Only poll ticks
    /// compare against it.
    last_applied: Option<Vec<u8>>,
    /// Identities created since the last resync, or `None` before the first
    /// one.  A destroy for anything else that is missing from the table was
    /// observed before the inventory the table came from.
    created_since_resync: Option<BTreeSet<String>>,
    retry: RetryPolicy,
    unknown_destroy: UnknownDestroy,
}

impl Converger {
    pub fn new(
        style: RoutingStyle,
        retry: RetryPolicy,
        unknown_destroy: UnknownDestroy,
    ) -> Self {
        Self {
            table: DesiredState::new(style),
            last_applied: None,
            created_since_resync: None,
            retry,
            unknown_destroy,
        }
    }

    pub fn table(&self) -> &DesiredState {
        &self.table
    }

    /// Apply one event and push the result.  Returns whether a push happened.
    pub async fn apply_event<A>(
        &mut self,
        admin: &A,
        event: &InstanceEvent,
    ) -> Result<bool, SyncError>
    where
        A: ProxyAdmin + ?Sized,
    {
        let identity = &event.instance.identity;
        match event.kind {
            EventKind::Created => {
                self.table.upsert(&event.instance);
                if let Some(created) = &mut self.created_since_resync {
                    created.insert(identity.clone());
                }
                info!(
                    "Instance {} created ({} -> {})",
                    identity, event.instance.port, event.instance.upstream
                );
            }
            EventKind::Destroyed => {
                if self.table.remove(identity).is_none() {
                    if self.is_stale_destroy(identity) {
                        debug!("Skipping destroy for {} predating the last inventory", identity);
                        return Ok(false);
                    }
                    match self.unknown_destroy {
                        UnknownDestroy::Error => {
                            return Err(SyncError::Consistency {
                                identity: identity.clone(),
                            })
                        }
                        UnknownDestroy::Ignore => {
                            warn!("Ignoring destroy for untracked instance {}", identity);
                            return Ok(false);
                        }
                    }
                }
                info!("Instance {} destroyed", identity);
            }
        }
        let (payload, encoded) = self.encode()?;
        self.push(admin, payload, encoded).await?;
        Ok(true)
    }

    fn is_stale_destroy(&self, identity: &str) -> bool {
        self.created_since_resync
            .as_ref()
            .is_some_and(|created| !created.contains(identity))
    }

    /// Rebuild from a full inventory and push unconditionally.
    pub async fn resync<A>(&mut self, admin: &A, instances: &[Instance]) -> Result<(), SyncError>
    where
        A: ProxyAdmin + ?Sized,
    {
        self.table.rebuild(instances);
        self.created_since_resync = Some(BTreeSet::new());
        let (payload, encoded) = self.encode()?;
        self.push(admin, payload, encoded).await
    }

    /// Rebuild from a full inventory and push only when the serialized
    /// payload differs from the last one applied.  Returns whether a push
    /// happened.
    pub async fn poll_tick<A>(
        &mut self,
        admin: &A,
        instances: &[Instance],
    ) -> Result<bool, SyncError>
    where
        A: ProxyAdmin + ?Sized,
    {
        self.table.rebuild(instances);
        let (payload, encoded) = self.encode()?;
        if self.last_applied.as_ref() == Some(&encoded) {
            debug!("No changes detected, skip updating");
            return Ok(false);
        }
        info!("Routing changes detected, updating proxy configuration");
        self.push(admin, payload, encoded).await?;
        Ok(true)
    }

    fn encode(&self) -> Result<(RoutingPayload, Vec<u8>), SyncError> {
        let payload = self.table.payload();
        let bytes = serde_json::to_vec(&payload)?;
        Ok((payload, bytes))
    }

    /// Push `payload` and, once the proxy accepted it, remember `encoded` as
    /// the last applied state.
    async fn push<A>(
        &mut self,
        admin: &A,
        payload: RoutingPayload,
        encoded: Vec<u8>,
    ) -> Result<(), SyncError>
    where
        A: ProxyAdmin + ?Sized,
    {
        let payload_ref = &payload;
        with_backoff(&self.retry, "Replacing proxy routes", move || {
            admin.replace(payload_ref)
        })
        .await?;
        info!("Pushed {} routing definitions to proxy", payload.len());
        debug!(
            "Routed instances: {:?}",
            self.table.identities().collect::<Vec<_>>()
        );
        self.last_applied = Some(encoded);
        Ok(())
    }
}
