//! Bounded hand-off between the event producer task and the driver.
//!
//! With [`Overflow::DropOldest`] the producer never waits: once `capacity`
//! observations are queued the oldest are discarded, counted, and replaced
//! by a single [`Observation::Resync`] on the consumer side.
//! [`Overflow::Block`] makes the producer wait for room instead.

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::types::InstanceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    DropOldest,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPolicy {
    pub capacity: usize,
    pub overflow: Overflow,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            capacity: 128,
            overflow: Overflow::DropOldest,
        }
    }
}

/// What the consumer receives from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Event(InstanceEvent),
    /// Events may have been missed; rebuild from a full snapshot.
    Resync,
}

/// The consumer has gone away.
#[derive(Debug)]
pub struct Closed;

pub enum EventSink {
    Block(mpsc::Sender<Observation>),
    DropOldest(broadcast::Sender<Observation>),
}

pub struct EventStream {
    inner: StreamInner,
    dropped: u64,
}

enum StreamInner {
    Block(mpsc::Receiver<Observation>),
    DropOldest(broadcast::Receiver<Observation>),
}

/// Create a connected sink/stream pair.  `capacity` must be non-zero.
pub fn bounded(policy: BufferPolicy) -> (EventSink, EventStream) {
    let (sink, inner) = match policy.overflow {
        Overflow::Block => {
            let (tx, rx) = mpsc::channel(policy.capacity);
            (EventSink::Block(tx), StreamInner::Block(rx))
        }
        Overflow::DropOldest => {
            let (tx, rx) = broadcast::channel(policy.capacity);
            (EventSink::DropOldest(tx), StreamInner::DropOldest(rx))
        }
    };
    (sink, EventStream { inner, dropped: 0 })
}

impl EventSink {
    pub async fn send(&self, observation: Observation) -> Result<(), Closed> {
        match self {
            EventSink::Block(tx) => tx.send(observation).await.map_err(|_| Closed),
            EventSink::DropOldest(tx) => tx.send(observation).map(|_| ()).map_err(|_| Closed),
        }
    }
}

impl EventStream {
    /// Next observation, or `None` once the producer has finished and the
    /// buffer is drained.
    pub async fn next(&mut self) -> Option<Observation> {
        match &mut self.inner {
            StreamInner::Block(rx) => rx.recv().await,
            StreamInner::DropOldest(rx) => match rx.recv().await {
                Ok(observation) => Some(observation),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!(
                        "Event buffer overflowed, dropped {} oldest events ({} total)",
                        skipped, self.dropped
                    );
                    Some(Observation::Resync)
                }
                Err(broadcast::error::RecvError::Closed) => None,
            },
        }
    }

    /// Events discarded by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
