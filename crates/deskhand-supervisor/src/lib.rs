//! Supervised background process tasks.
//!
//! Some plugins own a long-running external process -- typically a
//! locally spawned web server. [`SupervisedTask`] wraps one such child
//! with the full lifecycle discipline:
//!
//! - `Stopped -> Starting -> Running -> Stopping -> Stopped`, with
//!   `Errored` on detected failure; no skipped states
//! - startup gated on a liveness probe polled every second for up to
//!   30 attempts, with child exit during startup detected and reported
//! - a reduced-cadence (30s) recheck after `Running`, purely to notice
//!   unexpected exits -- there is no automatic restart
//! - graceful-then-forced shutdown bounded by 10s + 5s; `stop()` never
//!   blocks indefinitely
//! - at most one deferred "open this resource once running" action
//!
//! All state lives on the task's own control loop; callers hold a
//! cloneable [`SupervisedTask`] handle and observe progress through
//! [`TaskEvent`](deskhand_types::TaskEvent)s and a state watch channel.

pub mod command;
pub mod error;
pub mod probe;
pub mod state;
pub mod task;

pub use command::ChildSpec;
pub use error::TaskError;
pub use probe::{HealthProbe, HttpProbe};
pub use state::TaskState;
pub use task::{SupervisedTask, TaskTimings};
