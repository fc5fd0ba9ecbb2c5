//! Queue engine: enqueue and inspection API, the claim protocol, and
//! applying execution outcomes through the retry policy.

mod claim;
mod error;
mod outcome;
mod queue;

pub use error::{QueueError, Result};
pub use queue::{EnqueueRequest, Queue, QueueStatus};
