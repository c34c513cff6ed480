//! Delayed one-shot jobs whose callbacks run on a bound execution context.
//!
//! The timer lives on its own OS thread. When a job comes due the timer never
//! runs the callback itself: it submits it to the [`ExecutionContext`] the
//! scheduler was started with, and the context's loop runs it on the
//! application runtime.

pub mod clock;
pub mod context;
pub mod job;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ContextId, ContextLoop, ExecutionContext};
pub use job::{JobOptions, DEFAULT_MISFIRE_GRACE};
pub use scheduler::Scheduler;
