use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::group::DuplicateGroup;
use crate::core::record::{Record, RecordStatus};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("record '{id}' is not a member of group {group_id}")]
    InvalidSelection { id: String, group_id: String },
}

/// Deterministic rule for choosing which member of a duplicate group to
/// retain. Applying a strategy never mutates anything; issuing the actual
/// deletions is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// Retain the first member in input order.
    KeepFirst,
    /// Retain the most recently created member.
    KeepNewest,
    /// Retain the member whose status ranks best under a priority table,
    /// ties broken by oldest creation time.
    KeepHighestPriorityStatus,
    /// Dismiss the group as a false positive; nothing is deleted.
    KeepAll,
    /// Retain exactly the named member.
    Manual { keep_id: String },
}

/// Ranking used by `KeepHighestPriorityStatus`; lower rank wins. The
/// default order is a business policy, so callers can override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPriority(HashMap<RecordStatus, u8>);

impl Default for StatusPriority {
    fn default() -> Self {
        Self::with_order(&[
            RecordStatus::Sold,
            RecordStatus::Returned,
            RecordStatus::Withdrawn,
            RecordStatus::Passed,
            RecordStatus::Active,
            RecordStatus::Draft,
        ])
    }
}

impl StatusPriority {
    /// Build a table from best to worst. Statuses left out rank below
    /// everything listed.
    pub fn with_order(order: &[RecordStatus]) -> Self {
        Self(
            order
                .iter()
                .enumerate()
                .map(|(rank, &status)| (status, rank as u8))
                .collect(),
        )
    }

    pub fn rank(&self, status: RecordStatus) -> u8 {
        self.0.get(&status).copied().unwrap_or(u8::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub keep: Vec<Record>,
    pub delete: Vec<Record>,
}

/// Split a duplicate group into records to retain and records to delete.
///
/// For every strategy except `KeepAll` exactly one member is kept and
/// `keep.len() + delete.len() == members.len()`.
pub fn resolve(
    group: &DuplicateGroup,
    strategy: &ResolveStrategy,
    priority: &StatusPriority,
) -> Result<Resolution, ResolveError> {
    let members = &group.members;

    let keeper_index = match strategy {
        ResolveStrategy::KeepAll => {
            return Ok(Resolution {
                keep: members.clone(),
                delete: Vec::new(),
            });
        }
        ResolveStrategy::KeepFirst => 0,
        ResolveStrategy::KeepNewest => {
            let mut best = 0;
            for (index, member) in members.iter().enumerate().skip(1) {
                if member.created_at > members[best].created_at {
                    best = index;
                }
            }
            best
        }
        ResolveStrategy::KeepHighestPriorityStatus => {
            let mut best = 0;
            for (index, member) in members.iter().enumerate().skip(1) {
                let candidate = (priority.rank(member.status), member.created_at);
                let current = (priority.rank(members[best].status), members[best].created_at);
                if candidate < current {
                    best = index;
                }
            }
            best
        }
        ResolveStrategy::Manual { keep_id } => members
            .iter()
            .position(|member| member.id == *keep_id)
            .ok_or_else(|| ResolveError::InvalidSelection {
                id: keep_id.clone(),
                group_id: group.id.clone(),
            })?,
    };

    let mut keep = Vec::with_capacity(1);
    let mut delete = Vec::with_capacity(members.len().saturating_sub(1));
    for (index, member) in members.iter().enumerate() {
        if index == keeper_index {
            keep.push(member.clone());
        } else {
            delete.push(member.clone());
        }
    }

    Ok(Resolution { keep, delete })
}
