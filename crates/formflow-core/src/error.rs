// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for formflow-core.
//!
//! Two classes of failure flow through [`FormFlowError`]:
//!
//! - programmer errors (unbound route, unknown journey, state type mismatch,
//!   writes to a terminal instance, duplicate registration) that should surface
//!   loudly during development;
//! - infrastructure errors from the state store (database, serialization).
//!
//! An instance that simply cannot be found for the current request is not an
//! error: resolution returns `Ok(None)` so callers can map it to a 404.

use thiserror::Error;

/// Result type using FormFlowError
pub type Result<T> = std::result::Result<T, FormFlowError>;

/// Errors raised by the journey registry, resolver, instances and stores.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormFlowError {
    /// No descriptor is registered under the journey name.
    #[error("Journey '{journey_name}' is not registered")]
    JourneyNotRegistered {
        /// The journey name that was looked up.
        journey_name: String,
    },

    /// A descriptor with the same name was registered twice.
    #[error("Journey '{journey_name}' is already registered")]
    DuplicateJourney {
        /// The duplicated journey name.
        journey_name: String,
    },

    /// The descriptor cannot be registered as declared.
    #[error("Invalid descriptor for journey '{journey_name}': {reason}")]
    InvalidDescriptor {
        /// The journey name of the rejected descriptor.
        journey_name: String,
        /// Why the descriptor was rejected.
        reason: String,
    },

    /// The current request is not bound to any journey.
    #[error("No journey is bound to the current request")]
    NoJourneyBound,

    /// A mandatory key was absent while creating a new instance id.
    #[error("Journey '{journey_name}' requires key '{key}' but it was not found in the request")]
    MissingKey {
        /// The journey being created.
        journey_name: String,
        /// The missing key name.
        key: String,
    },

    /// The requested state type does not match the registered or stored one.
    #[error("Journey '{journey_name}' has state type '{expected}' but '{actual}' was requested")]
    StateTypeMismatch {
        /// The journey name.
        journey_name: String,
        /// The registered (or persisted) state type.
        expected: String,
        /// The state type requested by the caller.
        actual: String,
    },

    /// An instance already exists for the id.
    #[error("Instance '{instance_id}' already exists")]
    InstanceAlreadyExists {
        /// The serialized instance id.
        instance_id: String,
    },

    /// No instance exists for the id.
    #[error("Instance '{instance_id}' not found")]
    InstanceNotFound {
        /// The serialized instance id.
        instance_id: String,
    },

    /// The instance is in the wrong lifecycle state for the operation.
    #[error("Instance '{instance_id}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidInstanceState {
        /// The serialized instance id.
        instance_id: String,
        /// The status the operation requires.
        expected: String,
        /// The status the instance is in.
        actual: String,
    },

    /// A serialized instance id could not be parsed.
    #[error("Invalid instance id '{value}': {reason}")]
    InvalidInstanceId {
        /// The raw input.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// State or properties could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl FormFlowError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::JourneyNotRegistered { .. } => "JOURNEY_NOT_REGISTERED",
            Self::DuplicateJourney { .. } => "DUPLICATE_JOURNEY",
            Self::InvalidDescriptor { .. } => "INVALID_DESCRIPTOR",
            Self::NoJourneyBound => "NO_JOURNEY_BOUND",
            Self::MissingKey { .. } => "MISSING_KEY",
            Self::StateTypeMismatch { .. } => "STATE_TYPE_MISMATCH",
            Self::InstanceAlreadyExists { .. } => "INSTANCE_ALREADY_EXISTS",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::InvalidInstanceState { .. } => "INVALID_INSTANCE_STATE",
            Self::InvalidInstanceId { .. } => "INVALID_INSTANCE_ID",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// True for the store-level "no such instance" error.
    ///
    /// Only raised by direct store writes; resolution reports a missing
    /// instance as `Ok(None)` instead.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InstanceNotFound { .. })
    }
}

impl From<sqlx::Error> for FormFlowError {
    fn from(err: sqlx::Error) -> Self {
        FormFlowError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
