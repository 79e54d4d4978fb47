//! Background synchronization: jobs, their queue, the drain loop and timers.

mod engine;
mod handler;
mod job;
mod queue;
mod scheduler;
mod status;

pub use engine::{SyncEngine, SyncSettings};
pub use handler::{ApiJobHandler, JobHandler};
pub use job::{Backoff, JobKind, Priority, SyncJob};
pub use queue::SyncQueue;
pub use scheduler::{PeriodicTask, Scheduler, SchedulerSettings};
pub use status::{Subscription, SyncStatus};
