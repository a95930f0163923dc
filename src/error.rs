use thiserror::Error;

/// Errors reported by the collection-style operations of [`Queue`](crate::structures::Queue).
///
/// An empty queue is not an error for `dequeue` or `peek`, which return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The operation needs a traversal or an arbitrary-removal protocol the queue does not have.
    #[error("unsupported queue operation: {0}")]
    Unsupported(&'static str),

    #[error("queue is empty")]
    Empty,
}
