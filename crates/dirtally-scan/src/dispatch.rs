//! Marshalling callbacks onto the coordinator.

use tokio::sync::mpsc;
use tracing::trace;

/// A unit of work for the coordinator.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on whatever context owns the tree readers.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Queues tasks for a coordinator loop that drains the paired receiver.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver the coordinator drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            trace!("coordinator gone, dropping task");
        }
    }
}
