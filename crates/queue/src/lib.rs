//! `queue` crate — the FIFO task queue an external scheduler stages runs in
//! before an `Agent` picks them up, plus the coordinator's worker/task/
//! selector types (spec.md §4.6, §2).

pub mod error;
pub mod store;
pub mod types;

pub use error::QueueError;
pub use store::QueueStore;
pub use types::{selector_matches, Task, Worker};
