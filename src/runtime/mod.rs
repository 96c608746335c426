use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::types::Instance;

pub mod channel;
pub mod docker;
pub use channel::{BufferPolicy, EventStream, Observation, Overflow};
pub use docker::{DockerRuntime, LabelKeys};

/// A live event subscription: the stream the driver consumes and the task
/// feeding it.  The task resolves once the stream is closed, with the error
/// that ended it, if any.
pub struct Subscription {
    pub events: EventStream,
    pub task: JoinHandle<Result<(), SyncError>>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Every running container carrying the active label, with malformed
    /// entries already skipped.
    async fn snapshot(&self) -> Result<Vec<Instance>, SyncError>;

    /// Start watching create/destroy transitions.  The producer stops and
    /// closes the stream when `cancel` fires.
    fn subscribe(&self, buffer: BufferPolicy, cancel: CancellationToken) -> Subscription;
}
