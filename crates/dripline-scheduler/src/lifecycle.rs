//! Job lifecycle — create a job, extend an in-flight one, or cancel it.
//!
//! Every operation is a stateless request handler: load state, plan slots,
//! write back, signal cache invalidation. Task execution is someone else's
//! loop (the external executor); nothing here waits for a task to fire.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{FixedOffset, Utc};

use dripline_core::{DriplineError, Result};

use crate::accounts::SenderAccount;
use crate::directory::RecipientDirectory;
use crate::invalidate::InvalidationBus;
use crate::jobs::{ActionType, Job, JobConfig, JobStats, Recipient};
use crate::persistence::SchedulerDb;
use crate::quota::AccountQuota;
use crate::slots::{MAX_ACTIONS_PER_HOUR, MIN_ACTIONS_PER_HOUR, plan_slots};

/// How often a request recomputes its schedule after losing the quota
/// version race before giving up.
const QUOTA_WRITE_RETRIES: u32 = 3;

/// Inputs for [`JobManager::create_or_extend`].
#[derive(Debug, Clone)]
pub struct CreateJobParams {
    pub actor_id: String,
    pub account_id: String,
    pub action: ActionType,
    pub recipients: Vec<Recipient>,
    pub actions_per_hour: u32,
    pub job_name: Option<String>,
    pub message_template: Option<String>,
    pub manual: bool,
}

/// What a create/extend request did, for the caller's response message.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub job_id: Option<String>,
    pub added: usize,
    pub duplicates: usize,
    pub message: String,
}

/// Creates, extends, and cancels scheduled jobs.
pub struct JobManager {
    db: Arc<SchedulerDb>,
    directory: Arc<dyn RecipientDirectory>,
    invalidations: InvalidationBus,
    day_offset: FixedOffset,
}

impl JobManager {
    pub fn new(
        db: Arc<SchedulerDb>,
        directory: Arc<dyn RecipientDirectory>,
        invalidations: InvalidationBus,
        day_offset: FixedOffset,
    ) -> Self {
        Self {
            db,
            directory,
            invalidations,
            day_offset,
        }
    }

    /// Schedule a recipient batch: merge into a compatible in-flight job
    /// when the action supports it, otherwise create a new one.
    pub fn create_or_extend(&self, params: CreateJobParams) -> Result<CreateOutcome> {
        if params.recipients.is_empty() {
            return Err(DriplineError::Validation("Recipient list is empty".into()));
        }
        let rate = params
            .actions_per_hour
            .clamp(MIN_ACTIONS_PER_HOUR, MAX_ACTIONS_PER_HOUR);

        // Re-fetch authoritative identity handles: client payloads may be
        // stale. Unresolvable recipients stay in the batch — the executor
        // reports a per-task "missing identity" failure at run time, which
        // beats silently excluding the record.
        let ids: Vec<String> = params.recipients.iter().map(|r| r.id.clone()).collect();
        let handles = self.directory.resolve_external_ids(&ids)?;
        let mut recipients = params.recipients.clone();
        for r in &mut recipients {
            r.external_id = handles.get(&r.id).cloned();
        }

        let mut attempt = 0;
        loop {
            let account = self
                .db
                .get_account(&params.account_id)?
                .ok_or_else(|| DriplineError::AccountNotFound(params.account_id.clone()))?;
            if params.action.is_quota_gated() {
                validate_gated_quota(&account)?;
            }

            if params.action.is_mergeable()
                && let Some(job) = self.db.find_incomplete_job(&account.id, params.action)?
            {
                let known: HashSet<&str> =
                    job.tasks.iter().map(|t| t.recipient.phone.as_str()).collect();
                let fresh: Vec<Recipient> = recipients
                    .iter()
                    .filter(|r| !known.contains(r.phone.as_str()))
                    .cloned()
                    .collect();
                let duplicates = recipients.len() - fresh.len();
                if fresh.is_empty() {
                    return Ok(CreateOutcome {
                        job_id: Some(job.id),
                        added: 0,
                        duplicates,
                        message: format!(
                            "Nothing to add: {duplicates} duplicate{} skipped",
                            plural(duplicates)
                        ),
                    });
                }

                // Appends continue where the existing schedule ends.
                let plan = plan_slots(
                    &fresh,
                    account.quota.clone(),
                    rate,
                    params.action,
                    Some(job.estimated_completion),
                    self.day_offset,
                );
                if !self.write_quota(&account, &plan.quota, params.action, &mut attempt)? {
                    continue;
                }
                self.db
                    .append_tasks(&job.id, &plan.tasks, plan.estimated_completion)?;
                self.invalidations.publish_job_mutation();
                tracing::info!(
                    "➕ Job extended: '{}' +{} tasks ({} duplicates skipped)",
                    job.name,
                    fresh.len(),
                    duplicates
                );
                return Ok(CreateOutcome {
                    job_id: Some(job.id),
                    added: fresh.len(),
                    duplicates,
                    message: format!(
                        "{} added, {duplicates} duplicate{} skipped",
                        fresh.len(),
                        plural(duplicates)
                    ),
                });
            }

            let plan = plan_slots(
                &recipients,
                account.quota.clone(),
                rate,
                params.action,
                None,
                self.day_offset,
            );
            if !self.write_quota(&account, &plan.quota, params.action, &mut attempt)? {
                continue;
            }
            let created_at = Utc::now();
            let job = Job {
                id: uuid::Uuid::new_v4().to_string(),
                name: params
                    .job_name
                    .clone()
                    .unwrap_or_else(|| Job::default_name(params.action, created_at)),
                action: params.action,
                account_id: account.id.clone(),
                stats: JobStats {
                    total: plan.tasks.len() as u32,
                    completed: 0,
                    failed: 0,
                },
                tasks: plan.tasks,
                config: JobConfig {
                    actions_per_hour: rate,
                    message_template: params.message_template.clone(),
                },
                created_by: params.actor_id.clone(),
                created_at,
                estimated_completion: plan.estimated_completion,
                manual: params.manual,
            };
            self.db.insert_job(&job)?;
            self.invalidations.publish_job_mutation();
            tracing::info!(
                "📦 Job created: '{}' ({} tasks, est. completion {})",
                job.name,
                job.stats.total,
                job.estimated_completion.format("%Y-%m-%d %H:%M")
            );
            return Ok(CreateOutcome {
                added: job.stats.total as usize,
                duplicates: 0,
                message: format!(
                    "Scheduled {} action{} for '{}'",
                    job.stats.total,
                    plural(job.stats.total as usize),
                    account.display_name
                ),
                job_id: Some(job.id),
            });
        }
    }

    /// Cancel a job outright. Delete is terminal: the executor treats a
    /// vanished job as a no-op, so mid-flight cancellation is safe.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        if !self.db.delete_job(job_id)? {
            return Err(DriplineError::JobNotFound(job_id.to_string()));
        }
        tracing::info!("🗑️ Job cancelled: {job_id}");
        self.invalidations.publish_job_mutation();
        Ok(())
    }

    /// Persist the counters the planner consumed — legacy accounts only,
    /// and only for gated actions (the planner never touches quota
    /// otherwise). Returns false when a concurrent writer won the version
    /// race and the caller must recompute from fresh state.
    fn write_quota(
        &self,
        account: &SenderAccount,
        planned: &AccountQuota,
        action: ActionType,
        attempt: &mut u32,
    ) -> Result<bool> {
        if !action.is_quota_gated() {
            return Ok(true);
        }
        let AccountQuota::Legacy(state) = planned else {
            return Ok(true); // newer model: nothing persisted
        };
        if self.db.update_quota(&account.id, state)? {
            return Ok(true);
        }
        *attempt += 1;
        if *attempt >= QUOTA_WRITE_RETRIES {
            return Err(DriplineError::Persistence(format!(
                "Quota contention on account {}: gave up after {} attempts",
                account.id, QUOTA_WRITE_RETRIES
            )));
        }
        tracing::debug!(
            "quota version conflict on account {}, recomputing (attempt {})",
            account.id,
            attempt
        );
        Ok(false)
    }
}

/// A gated slot can never be assigned under a zero limit — reject the
/// request instead of spinning past every window.
fn validate_gated_quota(account: &SenderAccount) -> Result<()> {
    if let AccountQuota::Legacy(q) = &account.quota
        && (q.hourly_limit == 0 || q.daily_limit == 0)
    {
        return Err(DriplineError::Validation(format!(
            "Account {} has a zero action quota",
            account.id
        )));
    }
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
