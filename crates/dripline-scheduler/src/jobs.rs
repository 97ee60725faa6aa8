//! Job and task definitions — the core data model for scheduled outreach.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The category of outbound operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Resolve a phone number to the platform identity behind it.
    LookupIdentity,
    /// Send a message to an already-known identity.
    SendMessage,
    /// Send a friend request.
    AddFriend,
    /// Check whether a friend relationship already exists.
    CheckFriend,
}

impl ActionType {
    /// Whether slots for this action count against the account quota.
    /// Messaging quota is not tracked locally — an explicit product
    /// decision, so `SendMessage` bypasses gating entirely.
    pub fn is_quota_gated(self) -> bool {
        !matches!(self, ActionType::SendMessage)
    }

    /// Whether new recipients merge into an existing in-flight job for the
    /// same account instead of opening a second one.
    pub fn is_mergeable(self) -> bool {
        matches!(self, ActionType::LookupIdentity)
    }

    /// Stable identifier used in storage and on the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::LookupIdentity => "lookup_identity",
            ActionType::SendMessage => "send_message",
            ActionType::AddFriend => "add_friend",
            ActionType::CheckFriend => "check_friend",
        }
    }

    /// Parse the storage/CLI identifier back into an action.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lookup_identity" => Some(ActionType::LookupIdentity),
            "send_message" => Some(ActionType::SendMessage),
            "add_friend" => Some(ActionType::AddFriend),
            "check_friend" => Some(ActionType::CheckFriend),
            _ => None,
        }
    }

    /// Human-readable label, used for default job names.
    pub fn label(self) -> &'static str {
        match self {
            ActionType::LookupIdentity => "Identity lookup",
            ActionType::SendMessage => "Send message",
            ActionType::AddFriend => "Add friend",
            ActionType::CheckFriend => "Check friend",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a target person at scheduling time.
///
/// Immutable once placed into a task — later edits to the customer record
/// do not retroactively change what was scheduled. `id` keys the customer
/// system of record and is what the external-identity re-fetch uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub phone: String,
    /// Platform identity handle, if already resolved. A missing handle does
    /// NOT exclude the recipient — the executor reports the failure per
    /// task at run time instead.
    pub external_id: Option<String>,
    /// Source classification of the record ("customer", "lead", ...).
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "customer".into()
}

/// One scheduled action against one recipient.
///
/// Created once by the slot scheduler. `completed` and `result_ref` are
/// written exclusively by the external executor after the action runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub recipient: Recipient,
    /// Target execution timestamp (jitter already applied).
    pub scheduled_for: DateTime<Utc>,
    pub completed: bool,
    /// Reference to the execution-result record, once the executor ran.
    pub result_ref: Option<String>,
}

/// Aggregated task counters for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

/// Per-job scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub actions_per_hour: u32,
    /// Raw message template for `SendMessage` jobs. Variable substitution
    /// happens in the executor, not here.
    pub message_template: Option<String>,
}

/// A persisted batch of scheduled tasks sharing one account and action type.
///
/// Invariants: `stats.total == tasks.len()` after creation and after every
/// append; `stats.completed + stats.failed <= stats.total` always.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub action: ActionType,
    pub account_id: String,
    pub tasks: Vec<Task>,
    pub config: JobConfig,
    pub stats: JobStats,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Final unjittered cursor of the schedule — where an append continues.
    pub estimated_completion: DateTime<Utc>,
    /// Set when an operator triggered this batch by hand rather than
    /// through a campaign.
    pub manual: bool,
}

impl Job {
    /// A job is in-flight while the executor still owes it task results.
    pub fn is_in_flight(&self) -> bool {
        self.stats.completed + self.stats.failed < self.stats.total
    }

    /// Default display name when the caller does not provide one.
    pub fn default_name(action: ActionType, created_at: DateTime<Utc>) -> String {
        format!("{} {}", action.label(), created_at.format("%Y-%m-%d %H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_send_message_bypasses_quota() {
        assert!(!ActionType::SendMessage.is_quota_gated());
        assert!(ActionType::LookupIdentity.is_quota_gated());
        assert!(ActionType::AddFriend.is_quota_gated());
        assert!(ActionType::CheckFriend.is_quota_gated());
    }

    #[test]
    fn test_only_lookup_merges() {
        assert!(ActionType::LookupIdentity.is_mergeable());
        assert!(!ActionType::SendMessage.is_mergeable());
        assert!(!ActionType::AddFriend.is_mergeable());
    }

    #[test]
    fn test_action_roundtrip() {
        for action in [
            ActionType::LookupIdentity,
            ActionType::SendMessage,
            ActionType::AddFriend,
            ActionType::CheckFriend,
        ] {
            assert_eq!(ActionType::parse(action.as_str()), Some(action));
        }
        assert_eq!(ActionType::parse("frobnicate"), None);
    }

    #[test]
    fn test_in_flight() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let mut job = Job {
            id: "j1".into(),
            name: Job::default_name(ActionType::LookupIdentity, created),
            action: ActionType::LookupIdentity,
            account_id: "a1".into(),
            tasks: Vec::new(),
            config: JobConfig {
                actions_per_hour: 12,
                message_template: None,
            },
            stats: JobStats {
                total: 3,
                completed: 1,
                failed: 1,
            },
            created_by: "admin".into(),
            created_at: created,
            estimated_completion: created,
            manual: false,
        };
        assert!(job.is_in_flight());
        job.stats.failed = 2;
        assert!(!job.is_in_flight());
    }
}
