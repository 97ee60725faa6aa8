//! Sending accounts and the actors allowed to operate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::AccountQuota;

/// One third-party messaging account Dripline sends through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderAccount {
    pub id: String,
    pub display_name: String,
    pub phone: String,
    pub quota: AccountQuota,
    /// Actor ids delegated to operate this account. Admins bypass the list.
    pub operators: Vec<String>,
    /// Back-references to jobs created for this account.
    pub job_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Visibility role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Sees every account's jobs.
    Admin,
    /// Sees only jobs of accounts that list them as an operator.
    Operator,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Operator => "operator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(ActorRole::Admin),
            "operator" => Some(ActorRole::Operator),
            _ => None,
        }
    }
}

/// An authenticated caller of the scheduling operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
    pub role: ActorRole,
}
