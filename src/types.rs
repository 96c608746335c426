//! Data structures used throughout the discovery daemon.
//!
//! An [`Instance`] is what the container runtime tells us about a labeled
//! container.  [`InstanceEvent`] wraps one with the lifecycle transition
//! that produced it; anything the runtime reports that is not a start or a
//! death never gets this far.

use serde::{Deserialize, Serialize};

/// A running service instance discovered through container labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Container name (without the leading `/`), or the container id when
    /// no name is known.  Stable for the lifetime of the container.
    pub identity: String,
    /// Value of the port label.
    pub port: u16,
    /// Value of the upstream label: `host:port` or a domain name depending
    /// on the routing style.
    pub upstream: String,
    /// Whether the active label was set to `"true"`.
    pub active: bool,
}

impl Instance {
    pub fn new(identity: impl Into<String>, port: u16, upstream: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            port,
            upstream: upstream.into(),
            active: true,
        }
    }
}

/// Lifecycle transition carried by an [`InstanceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Destroyed,
}

/// A single create/destroy notification for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub instance: Instance,
    pub kind: EventKind,
}

impl InstanceEvent {
    pub fn created(instance: Instance) -> Self {
        Self {
            instance,
            kind: EventKind::Created,
        }
    }

    pub fn destroyed(instance: Instance) -> Self {
        Self {
            instance,
            kind: EventKind::Destroyed,
        }
    }
}
