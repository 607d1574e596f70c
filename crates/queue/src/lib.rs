//! Per-run event bus with cooperative cancellation.
//!
//! A worker publishes typed [`QueueEvent`]s through [`AppQueueManager`];
//! the response pipeline drains them through [`QueueListener`]. Exactly
//! one terminal event reaches the consumer per task, including when the
//! worker crashes or the run is stopped out of band.

pub mod cancel;
pub mod events;
pub mod manager;

pub use cancel::CancelToken;
pub use events::{QueueEvent, QueueMessage, StopReason};
pub use manager::{channel, AppQueueManager, QueueListener, StopFlagStore};
