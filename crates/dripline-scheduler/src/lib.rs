//! # Dripline Scheduler
//!
//! Rate-limited outreach scheduling engine: turns an ordered recipient list,
//! an account's remaining quota, and a desired throughput into concretely
//! timestamped tasks, persisted as jobs that can be extended in-flight or
//! cancelled outright.
//!
//! ## Architecture
//! ```text
//! create_or_extend (request handler)
//!   ├── RecipientDirectory: re-fetch authoritative identity handles
//!   ├── merge? → dedup by phone → plan_slots(start = existing estimate)
//!   ├── create → plan_slots(start = max(now, hour window))
//!   │             └── AccountQuota: roll hour/day windows, skip to the
//!   │                 next legal slot, ±15% jitter per task
//!   ├── SchedulerDb: version-guarded quota write-back + job rows
//!   └── InvalidationBus: running-schedules / combined-customer-data
//!
//! Executing a task at its timestamp is the external executor's job; it
//! reports back through SchedulerDb::record_task_result.
//! ```

pub mod accounts;
pub mod directory;
pub mod invalidate;
pub mod jobs;
pub mod lifecycle;
pub mod persistence;
pub mod query;
pub mod quota;
pub mod slots;

pub use accounts::{Actor, ActorRole, SenderAccount};
pub use directory::{RecipientDirectory, StaticDirectory};
pub use invalidate::{CacheTag, InvalidationBus, run_invalidation_logger};
pub use jobs::{ActionType, Job, JobConfig, JobStats, Recipient, Task};
pub use lifecycle::{CreateJobParams, CreateOutcome, JobManager};
pub use persistence::{JobView, SchedulerDb};
pub use query::{RUNNING_JOBS_LIMIT, list_running_jobs};
pub use quota::{AccountQuota, QuotaState};
pub use slots::{MAX_ACTIONS_PER_HOUR, MIN_ACTIONS_PER_HOUR, SlotPlan, plan_slots};
