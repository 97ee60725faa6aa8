//! Job query service — the read side of the dashboard's "running
//! schedules" view, with role-based visibility.

use dripline_core::Result;

use crate::accounts::{Actor, ActorRole};
use crate::persistence::{JobView, SchedulerDb};

/// Most-recent jobs returned per listing.
pub const RUNNING_JOBS_LIMIT: usize = 50;

/// Up to 50 most-recent jobs (creation time desc, id as tiebreak) with
/// account display fields, creator name, and task history resolved.
///
/// Operators are pre-filtered to accounts that delegate to them; an
/// operator with zero permitted accounts gets an empty list, not an error.
pub fn list_running_jobs(db: &SchedulerDb, actor: &Actor) -> Result<Vec<JobView>> {
    match actor.role {
        ActorRole::Admin => db.list_recent_jobs(RUNNING_JOBS_LIMIT, None),
        ActorRole::Operator => {
            let permitted = db.permitted_account_ids(&actor.id)?;
            if permitted.is_empty() {
                return Ok(Vec::new());
            }
            db.list_recent_jobs(RUNNING_JOBS_LIMIT, Some(&permitted))
        }
    }
}
