//! Background work scheduling.
//!
//! [`TaskManager`] serializes all asynchronous work into named, mutually
//! exclusive tasks. [`AttemptManager`] keeps a persisted exponential-backoff
//! timer per attempt series and survives process restarts.

pub mod attempts;
pub mod tasks;

pub use attempts::{AttemptManager, AttemptState, BackoffPolicy, DueSink};
pub use tasks::{Admission, ConflictPolicy, TaskContext, TaskManager, are_tasks_conflicting};
