//! SQLite-backed persistence for accounts, jobs, tasks, and the customer
//! system of record. Survives restarts, supports concurrent handlers.
//!
//! Quota write-back is conditional on a version column — two racing
//! schedulers cannot silently clobber each other's counter increments.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use dripline_core::{DriplineError, Result};

use crate::accounts::{Actor, ActorRole, SenderAccount};
use crate::directory::RecipientDirectory;
use crate::jobs::{ActionType, Job, JobConfig, JobStats, Recipient, Task};
use crate::quota::{AccountQuota, QuotaState};

/// Scheduler database — all persistent state behind one connection.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

/// A job joined with the display fields the job list needs.
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: Job,
    pub account_name: String,
    pub account_phone: String,
    pub account_operators: Vec<String>,
    pub created_by_name: String,
}

impl SchedulerDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DriplineError::Persistence(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            -- Sending accounts with quota state (legacy model) or none (unlimited)
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                phone TEXT NOT NULL DEFAULT '',
                quota_kind TEXT NOT NULL DEFAULT 'legacy',   -- 'legacy' | 'unlimited'
                hourly_limit INTEGER NOT NULL DEFAULT 0,
                daily_limit INTEGER NOT NULL DEFAULT 0,
                used_this_hour INTEGER NOT NULL DEFAULT 0,
                used_this_day INTEGER NOT NULL DEFAULT 0,
                hour_started_at TEXT NOT NULL,
                day_started_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                operators TEXT NOT NULL DEFAULT '[]',        -- JSON array of actor ids
                job_ids TEXT NOT NULL DEFAULT '[]',          -- JSON array of job ids
                created_at TEXT NOT NULL
            );

            -- Scheduled jobs (one per account + action batch)
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                action_type TEXT NOT NULL,
                account_id TEXT NOT NULL,
                actions_per_hour INTEGER NOT NULL,
                message_template TEXT,
                total INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                estimated_completion TEXT NOT NULL,
                is_manual INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_account_action
                ON jobs(account_id, action_type);

            -- One row per scheduled task, ordered by seq within its job
            CREATE TABLE IF NOT EXISTS tasks (
                job_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                recipient_id TEXT NOT NULL,
                recipient_name TEXT NOT NULL,
                recipient_phone TEXT NOT NULL,
                recipient_external_id TEXT,
                recipient_kind TEXT NOT NULL DEFAULT 'customer',
                scheduled_for TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                result_ref TEXT,
                PRIMARY KEY (job_id, seq)
            );

            -- Customer system of record (authoritative external identities)
            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT NOT NULL,
                external_id TEXT,
                kind TEXT NOT NULL DEFAULT 'customer',
                created_at TEXT NOT NULL
            );

            -- Known actors, for creator display names and role filtering
            CREATE TABLE IF NOT EXISTS actors (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'operator'
            );
            ",
        )
        .map_err(|e| DriplineError::Persistence(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Accounts ─────────────────────────────────────────────

    /// Insert or replace a sending account.
    pub fn upsert_account(&self, account: &SenderAccount) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let (kind, q) = match &account.quota {
            AccountQuota::Legacy(q) => ("legacy", Some(q)),
            AccountQuota::Unlimited => ("unlimited", None),
        };
        let anchor = account.created_at.to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO accounts
             (id, display_name, phone, quota_kind, hourly_limit, daily_limit,
              used_this_hour, used_this_day, hour_started_at, day_started_at,
              version, operators, job_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                account.id,
                account.display_name,
                account.phone,
                kind,
                q.map(|q| q.hourly_limit).unwrap_or(0),
                q.map(|q| q.daily_limit).unwrap_or(0),
                q.map(|q| q.used_this_hour).unwrap_or(0),
                q.map(|q| q.used_this_day).unwrap_or(0),
                q.map(|q| q.hour_started_at.to_rfc3339()).unwrap_or_else(|| anchor.clone()),
                q.map(|q| q.day_started_at.to_rfc3339()).unwrap_or_else(|| anchor.clone()),
                q.map(|q| q.version).unwrap_or(0),
                serde_json::to_string(&account.operators).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&account.job_ids).unwrap_or_else(|_| "[]".into()),
                anchor,
            ],
        )
        .map_err(|e| DriplineError::Persistence(format!("Save account: {e}")))?;
        Ok(())
    }

    /// Load one account by id.
    pub fn get_account(&self, id: &str) -> Result<Option<SenderAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, display_name, phone, quota_kind, hourly_limit, daily_limit,
                    used_this_hour, used_this_day, hour_started_at, day_started_at,
                    version, operators, job_ids, created_at
             FROM accounts WHERE id = ?1",
            params![id],
            row_to_account,
        )
        .optional()
        .map_err(|e| DriplineError::Persistence(format!("Load account: {e}")))
    }

    /// List every account, oldest first.
    pub fn list_accounts(&self) -> Result<Vec<SenderAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, display_name, phone, quota_kind, hourly_limit, daily_limit,
                        used_this_hour, used_this_day, hour_started_at, day_started_at,
                        version, operators, job_ids, created_at
                 FROM accounts ORDER BY created_at",
            )
            .map_err(|e| DriplineError::Persistence(format!("List accounts: {e}")))?;
        let rows = stmt
            .query_map([], row_to_account)
            .map_err(|e| DriplineError::Persistence(format!("List accounts: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DriplineError::Persistence(format!("List accounts: {e}")))
    }

    /// Ids of accounts that list `actor_id` as an operator.
    pub fn permitted_account_ids(&self, actor_id: &str) -> Result<Vec<String>> {
        Ok(self
            .list_accounts()?
            .into_iter()
            .filter(|a| a.operators.iter().any(|o| o == actor_id))
            .map(|a| a.id)
            .collect())
    }

    /// Conditionally write back quota counters for a legacy account.
    ///
    /// Succeeds only if the stored version still matches the one this state
    /// was read at; returns false when another writer got there first.
    pub fn update_quota(&self, account_id: &str, quota: &QuotaState) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE accounts
                 SET used_this_hour = ?1, used_this_day = ?2,
                     hour_started_at = ?3, day_started_at = ?4,
                     version = version + 1
                 WHERE id = ?5 AND version = ?6 AND quota_kind = 'legacy'",
                params![
                    quota.used_this_hour,
                    quota.used_this_day,
                    quota.hour_started_at.to_rfc3339(),
                    quota.day_started_at.to_rfc3339(),
                    account_id,
                    quota.version,
                ],
            )
            .map_err(|e| DriplineError::Persistence(format!("Update quota: {e}")))?;
        Ok(changed == 1)
    }

    // ─── Actors ───────────────────────────────────────────────

    pub fn upsert_actor(&self, actor: &Actor) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO actors (id, display_name, role) VALUES (?1, ?2, ?3)",
            params![actor.id, actor.display_name, actor.role.as_str()],
        )
        .map_err(|e| DriplineError::Persistence(format!("Save actor: {e}")))?;
        Ok(())
    }

    pub fn get_actor(&self, id: &str) -> Result<Option<Actor>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, display_name, role FROM actors WHERE id = ?1",
            params![id],
            |row| {
                let role: String = row.get(2)?;
                Ok(Actor {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    role: ActorRole::parse(&role).unwrap_or(ActorRole::Operator),
                })
            },
        )
        .optional()
        .map_err(|e| DriplineError::Persistence(format!("Load actor: {e}")))
    }

    // ─── Customers ────────────────────────────────────────────

    /// Insert or replace a customer record.
    pub fn upsert_customer(&self, recipient: &Recipient) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO customers (id, name, phone, external_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recipient.id,
                recipient.name,
                recipient.phone,
                recipient.external_id,
                recipient.kind,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| DriplineError::Persistence(format!("Save customer: {e}")))?;
        Ok(())
    }

    // ─── Jobs ─────────────────────────────────────────────────

    /// Insert a new job with its tasks and register the back-reference on
    /// the owning account. One transaction.
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DriplineError::Persistence(format!("Save job: {e}")))?;
        tx.execute(
            "INSERT INTO jobs
             (id, name, action_type, account_id, actions_per_hour, message_template,
              total, completed, failed, created_by, created_at, estimated_completion, is_manual)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.name,
                job.action.as_str(),
                job.account_id,
                job.config.actions_per_hour,
                job.config.message_template,
                job.stats.total,
                job.stats.completed,
                job.stats.failed,
                job.created_by,
                job.created_at.to_rfc3339(),
                job.estimated_completion.to_rfc3339(),
                job.manual as i32,
            ],
        )
        .map_err(|e| DriplineError::Persistence(format!("Save job: {e}")))?;
        insert_task_rows(&tx, &job.id, 0, &job.tasks)
            .map_err(|e| DriplineError::Persistence(format!("Save tasks: {e}")))?;
        edit_job_refs(&tx, &job.account_id, &job.id, true)
            .map_err(|e| DriplineError::Persistence(format!("Link job: {e}")))?;
        tx.commit()
            .map_err(|e| DriplineError::Persistence(format!("Save job: {e}")))?;
        Ok(())
    }

    /// Load one job (with tasks) by id.
    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()
            .map_err(|e| DriplineError::Persistence(format!("Load job: {e}")))?;
        match job {
            Some(mut job) => {
                job.tasks = load_tasks(&conn, &job.id)
                    .map_err(|e| DriplineError::Persistence(format!("Load tasks: {e}")))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Find the most recent in-flight job for an account + action, if any.
    pub fn find_incomplete_job(
        &self,
        account_id: &str,
        action: ActionType,
    ) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE account_id = ?1 AND action_type = ?2
                       AND completed + failed < total
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![account_id, action.as_str()],
                row_to_job,
            )
            .optional()
            .map_err(|e| DriplineError::Persistence(format!("Find job: {e}")))?;
        match job {
            Some(mut job) => {
                job.tasks = load_tasks(&conn, &job.id)
                    .map_err(|e| DriplineError::Persistence(format!("Load tasks: {e}")))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Append tasks to an existing job, bumping `total` and the estimate.
    /// Task sequence numbers continue where the job left off.
    pub fn append_tasks(
        &self,
        job_id: &str,
        tasks: &[Task],
        new_estimate: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DriplineError::Persistence(format!("Append tasks: {e}")))?;
        let total: u32 = tx
            .query_row(
                "SELECT total FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(|e| DriplineError::Persistence(format!("Append tasks: {e}")))?;
        insert_task_rows(&tx, job_id, total, tasks)
            .map_err(|e| DriplineError::Persistence(format!("Append tasks: {e}")))?;
        tx.execute(
            "UPDATE jobs SET total = total + ?2, estimated_completion = ?3 WHERE id = ?1",
            params![job_id, tasks.len() as u32, new_estimate.to_rfc3339()],
        )
        .map_err(|e| DriplineError::Persistence(format!("Append tasks: {e}")))?;
        tx.commit()
            .map_err(|e| DriplineError::Persistence(format!("Append tasks: {e}")))?;
        Ok(())
    }

    /// Delete a job, its tasks, and the account back-reference.
    /// Returns false when the job was already gone.
    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DriplineError::Persistence(format!("Delete job: {e}")))?;
        let account_id: Option<String> = tx
            .query_row(
                "SELECT account_id FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DriplineError::Persistence(format!("Delete job: {e}")))?;
        let Some(account_id) = account_id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM tasks WHERE job_id = ?1", params![job_id])
            .map_err(|e| DriplineError::Persistence(format!("Delete tasks: {e}")))?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
            .map_err(|e| DriplineError::Persistence(format!("Delete job: {e}")))?;
        edit_job_refs(&tx, &account_id, job_id, false)
            .map_err(|e| DriplineError::Persistence(format!("Unlink job: {e}")))?;
        tx.commit()
            .map_err(|e| DriplineError::Persistence(format!("Delete job: {e}")))?;
        Ok(true)
    }

    /// The `limit` most recent jobs (creation time desc, id desc tiebreak),
    /// optionally restricted to a set of account ids, joined with account
    /// and creator display fields.
    pub fn list_recent_jobs(
        &self,
        limit: usize,
        accounts: Option<&[String]>,
    ) -> Result<Vec<JobView>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!(
            "SELECT {JOB_COLUMNS_J}, a.display_name, a.phone, a.operators,
                    COALESCE(ac.display_name, j.created_by)
             FROM jobs j
             JOIN accounts a ON a.id = j.account_id
             LEFT JOIN actors ac ON ac.id = j.created_by"
        );
        let ids: Vec<String> = accounts.map(<[String]>::to_vec).unwrap_or_default();
        if accounts.is_some() && ids.is_empty() {
            return Ok(Vec::new());
        }
        if accounts.is_some() {
            let placeholders = (1..=ids.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" WHERE j.account_id IN ({placeholders})"));
        }
        sql.push_str(&format!(" ORDER BY j.created_at DESC, j.id DESC LIMIT {limit}"));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DriplineError::Persistence(format!("List jobs: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                let job = row_to_job(row)?;
                let operators: String = row.get(15)?;
                Ok(JobView {
                    job,
                    account_name: row.get(13)?,
                    account_phone: row.get(14)?,
                    account_operators: serde_json::from_str(&operators).unwrap_or_default(),
                    created_by_name: row.get(16)?,
                })
            })
            .map_err(|e| DriplineError::Persistence(format!("List jobs: {e}")))?;
        let mut views = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DriplineError::Persistence(format!("List jobs: {e}")))?;
        for view in &mut views {
            view.job.tasks = load_tasks(&conn, &view.job.id)
                .map_err(|e| DriplineError::Persistence(format!("Load tasks: {e}")))?;
        }
        Ok(views)
    }

    /// Executor write-back: mark one task done and bump the job counters.
    ///
    /// A job that vanished (cancelled mid-flight) or a task already recorded
    /// is a no-op, never an error — delete is terminal and the executor
    /// must not fail on it.
    pub fn record_task_result(
        &self,
        job_id: &str,
        seq: u32,
        success: bool,
        result_ref: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE tasks SET completed = 1, result_ref = ?3
                 WHERE job_id = ?1 AND seq = ?2 AND completed = 0",
                params![job_id, seq, result_ref],
            )
            .map_err(|e| DriplineError::Persistence(format!("Record result: {e}")))?;
        if changed == 0 {
            tracing::debug!("task result for missing job/task ignored: {job_id}#{seq}");
            return Ok(());
        }
        let counter = if success { "completed" } else { "failed" };
        conn.execute(
            &format!("UPDATE jobs SET {counter} = {counter} + 1 WHERE id = ?1"),
            params![job_id],
        )
        .map_err(|e| DriplineError::Persistence(format!("Record result: {e}")))?;
        Ok(())
    }
}

impl RecipientDirectory for SchedulerDb {
    fn resolve_external_ids(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT external_id FROM customers WHERE id = ?1")
            .map_err(|e| DriplineError::Persistence(format!("Directory: {e}")))?;
        let mut found = HashMap::new();
        for id in ids {
            let ext: Option<Option<String>> = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()
                .map_err(|e| DriplineError::Persistence(format!("Directory: {e}")))?;
            if let Some(Some(ext)) = ext {
                found.insert(id.clone(), ext);
            }
        }
        Ok(found)
    }
}

const JOB_COLUMNS: &str = "id, name, action_type, account_id, actions_per_hour, message_template, \
                           total, completed, failed, created_by, created_at, estimated_completion, is_manual";
const JOB_COLUMNS_J: &str = "j.id, j.name, j.action_type, j.account_id, j.actions_per_hour, j.message_template, \
                             j.total, j.completed, j.failed, j.created_by, j.created_at, j.estimated_completion, j.is_manual";

/// Map a `JOB_COLUMNS` row into a Job with empty tasks.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let action: String = row.get(2)?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        action: ActionType::parse(&action).unwrap_or(ActionType::LookupIdentity),
        account_id: row.get(3)?,
        config: JobConfig {
            actions_per_hour: row.get(4)?,
            message_template: row.get(5)?,
        },
        stats: JobStats {
            total: row.get(6)?,
            completed: row.get(7)?,
            failed: row.get(8)?,
        },
        created_by: row.get(9)?,
        created_at: parse_ts(row, 10)?,
        estimated_completion: parse_ts(row, 11)?,
        manual: row.get::<_, i32>(12)? != 0,
        tasks: Vec::new(),
    })
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<SenderAccount> {
    let kind: String = row.get(3)?;
    let quota = if kind == "unlimited" {
        AccountQuota::Unlimited
    } else {
        AccountQuota::Legacy(QuotaState {
            hourly_limit: row.get(4)?,
            daily_limit: row.get(5)?,
            used_this_hour: row.get(6)?,
            used_this_day: row.get(7)?,
            hour_started_at: parse_ts(row, 8)?,
            day_started_at: parse_ts(row, 9)?,
            version: row.get(10)?,
        })
    };
    let operators: String = row.get(11)?;
    let job_ids: String = row.get(12)?;
    Ok(SenderAccount {
        id: row.get(0)?,
        display_name: row.get(1)?,
        phone: row.get(2)?,
        quota,
        operators: serde_json::from_str(&operators).unwrap_or_default(),
        job_ids: serde_json::from_str(&job_ids).unwrap_or_default(),
        created_at: parse_ts(row, 13)?,
    })
}

/// Parse an RFC 3339 column into a UTC timestamp.
fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn insert_task_rows(
    conn: &Connection,
    job_id: &str,
    start_seq: u32,
    tasks: &[Task],
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO tasks
         (job_id, seq, recipient_id, recipient_name, recipient_phone,
          recipient_external_id, recipient_kind, scheduled_for, completed, result_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for (i, task) in tasks.iter().enumerate() {
        stmt.execute(params![
            job_id,
            start_seq + i as u32,
            task.recipient.id,
            task.recipient.name,
            task.recipient.phone,
            task.recipient.external_id,
            task.recipient.kind,
            task.scheduled_for.to_rfc3339(),
            task.completed as i32,
            task.result_ref,
        ])?;
    }
    Ok(())
}

fn load_tasks(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT recipient_id, recipient_name, recipient_phone, recipient_external_id,
                recipient_kind, scheduled_for, completed, result_ref
         FROM tasks WHERE job_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok(Task {
            recipient: Recipient {
                id: row.get(0)?,
                name: row.get(1)?,
                phone: row.get(2)?,
                external_id: row.get(3)?,
                kind: row.get(4)?,
            },
            scheduled_for: parse_ts(row, 5)?,
            completed: row.get::<_, i32>(6)? != 0,
            result_ref: row.get(7)?,
        })
    })?;
    rows.collect()
}

/// Add or remove `job_id` in the owning account's back-reference list.
fn edit_job_refs(
    conn: &Connection,
    account_id: &str,
    job_id: &str,
    add: bool,
) -> rusqlite::Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT job_ids FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(stored) = stored else {
        return Ok(()); // account vanished — nothing to maintain
    };
    let mut ids: Vec<String> = serde_json::from_str(&stored).unwrap_or_default();
    if add {
        if !ids.iter().any(|id| id == job_id) {
            ids.push(job_id.to_string());
        }
    } else {
        ids.retain(|id| id != job_id);
    }
    conn.execute(
        "UPDATE accounts SET job_ids = ?2 WHERE id = ?1",
        params![
            account_id,
            serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into())
        ],
    )?;
    Ok(())
}
