// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interface and backend implementations.
//!
//! The engine only needs the five operations of [`StateStore`]; any key-value
//! store, relational table or in-process map that honours them is a valid
//! backend. State and properties travel as JSON so backends never see the
//! concrete state type, only its name.

pub mod memory;
pub mod sqlite;
pub mod tracking;

pub use self::memory::InMemoryStateStore;
pub use self::sqlite::SqliteStateStore;
pub use self::tracking::TrackingStateStore;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{FormFlowError, Result};
use crate::instance_id::InstanceId;

/// Metadata attached to an instance at creation and never changed afterwards.
pub type Properties = BTreeMap<String, Value>;

/// Lifecycle status of an instance.
///
/// ```text
///            ┌────────┐
///            │ ACTIVE │
///            └───┬────┘
///       complete │ delete
///        ┌───────┴───────┐
///        ▼               ▼
///  ┌───────────┐   ┌─────────┐
///  │ COMPLETED │   │ DELETED │
///  └───────────┘   └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// In progress; state may be updated.
    Active,
    /// Business outcome achieved; state is read-only.
    Completed,
    /// Abandoned or cancelled; treated as absent by resolution.
    Deleted,
}

impl InstanceStatus {
    /// Derive the status from the two terminal flags.
    pub fn from_flags(completed: bool, deleted: bool) -> Self {
        if deleted {
            Self::Deleted
        } else if completed {
            Self::Completed
        } else {
            Self::Active
        }
    }

    /// Lowercase label used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance record from the persistence layer.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// Identity of the instance.
    pub instance_id: InstanceId,
    /// Journey the instance belongs to.
    pub journey_name: String,
    /// Type name of the persisted state.
    pub state_type: String,
    /// Persisted state.
    pub state: Value,
    /// Creation-time metadata.
    pub properties: Properties,
    /// Whether the instance reached its business outcome.
    pub completed: bool,
    /// Whether the instance was abandoned. Deleted records may still be present.
    pub deleted: bool,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the state or flags last changed.
    pub updated_at: DateTime<Utc>,
    /// When the instance first became completed or deleted.
    pub finished_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// Current lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::from_flags(self.completed, self.deleted)
    }
}

/// Persistence interface consumed by the resolver and instance handles.
///
/// Every operation takes the requested state type name and must fail with
/// `StateTypeMismatch` when it differs from the persisted one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a new active instance.
    ///
    /// Fails with `InstanceAlreadyExists` if an active or completed record
    /// exists for the id. A soft-deleted record is replaced.
    async fn create_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
        properties: &Properties,
    ) -> Result<InstanceRecord>;

    /// Fetch an instance. Soft-deleted records are returned with `deleted` set.
    async fn get_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
    ) -> Result<Option<InstanceRecord>>;

    /// Replace the state of an active instance.
    async fn update_instance_state(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
    ) -> Result<()>;

    /// Mark an instance completed. Fails if it is deleted.
    async fn complete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()>;

    /// Mark an instance deleted.
    async fn delete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()>;

    // ========================================================================
    // Data Retention / Cleanup (optional - default implementations no-op)
    // ========================================================================

    /// Get ids of completed or deleted instances that finished before `older_than`.
    ///
    /// Returns ids ordered by finished_at (oldest first) for batch processing.
    async fn get_terminal_instances_older_than(
        &self,
        _older_than: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<InstanceId>> {
        // Default: empty list (no cleanup supported)
        Ok(vec![])
    }

    /// Physically remove instances. Returns the count of removed records.
    async fn delete_instances_batch(&self, _instance_ids: &[InstanceId]) -> Result<u64> {
        // Default: no-op (no deletion supported)
        Ok(0)
    }
}

/// Fail unless the persisted state type is the requested one.
pub(crate) fn ensure_state_type(record: &InstanceRecord, requested: &str) -> Result<()> {
    if record.state_type != requested {
        return Err(FormFlowError::StateTypeMismatch {
            journey_name: record.journey_name.clone(),
            expected: record.state_type.clone(),
            actual: requested.to_string(),
        });
    }
    Ok(())
}

/// Fail unless the record is in the `expected` status.
pub(crate) fn ensure_status(record: &InstanceRecord, expected: InstanceStatus) -> Result<()> {
    let actual = record.status();
    if actual != expected {
        return Err(FormFlowError::InvalidInstanceState {
            instance_id: record.instance_id.to_string(),
            expected: expected.as_str().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(())
}

pub(crate) fn not_found(instance_id: &InstanceId) -> FormFlowError {
    FormFlowError::InstanceNotFound {
        instance_id: instance_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_flags() {
        assert_eq!(InstanceStatus::from_flags(false, false), InstanceStatus::Active);
        assert_eq!(InstanceStatus::from_flags(true, false), InstanceStatus::Completed);
        assert_eq!(InstanceStatus::from_flags(false, true), InstanceStatus::Deleted);
        assert_eq!(InstanceStatus::from_flags(true, true), InstanceStatus::Deleted);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(InstanceStatus::Active.to_string(), "active");
        assert_eq!(InstanceStatus::Completed.to_string(), "completed");
        assert_eq!(InstanceStatus::Deleted.to_string(), "deleted");
    }
}
