//! Error taxonomy returned by every public operation.
//!
//! Each variant carries the identifiers a caller needs to act on the
//! failure (method, parameter, GUIDs, type names). Storage-engine failures
//! are converted into these kinds by `logic::RepositoryErrorHandler` and
//! never surface in their native form.

use crate::model::{Guid, InstanceStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type OmrsResult<T> = std::result::Result<T, OmrsError>;

/// Stable, serializable discriminant of an [`OmrsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidParameter,
    InstanceNotKnown,
    EntityProxyOnly,
    InstanceNotDeleted,
    TypeNotKnown,
    TypeAlreadyKnown,
    TypeConflict,
    InvalidType,
    IncompatiblePatch,
    TypeInUse,
    PropertyError,
    ClassificationError,
    StatusNotSupported,
    AmbiguousRelationships,
    AmbiguousEntityName,
    HomeConflict,
    NotAuthorized,
    FunctionNotSupported,
    RepositoryUnavailable,
}

impl ErrorKind {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RepositoryUnavailable)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OmrsError {
    #[error("invalid value for parameter '{parameter}' on {method}: {reason}")]
    InvalidParameter {
        parameter: String,
        method: String,
        reason: String,
    },

    #[error("{type_name} instance {guid} is not known to {method}")]
    InstanceNotKnown {
        guid: Guid,
        type_name: String,
        method: String,
    },

    #[error("only a proxy is stored for entity {guid}; {method} requires its properties")]
    EntityProxyOnly { guid: Guid, method: String },

    #[error("instance {guid} must be deleted before {method}")]
    InstanceNotDeleted { guid: Guid, method: String },

    #[error("type '{identifier}' is not known to {method}")]
    TypeNotKnown { identifier: String, method: String },

    #[error("type {name} ({guid}) is already known")]
    TypeAlreadyKnown {
        guid: Guid,
        name: String,
        method: String,
    },

    #[error("type {name} ({guid}) conflicts with a registered type: {reason}")]
    TypeConflict {
        guid: Guid,
        name: String,
        method: String,
        reason: String,
    },

    #[error("type definition '{name}' passed to {method} is invalid: {reason}")]
    InvalidType {
        name: String,
        method: String,
        reason: String,
    },

    #[error("patch for type {name} ({guid}) is incompatible: {reason}")]
    IncompatiblePatch {
        guid: Guid,
        name: String,
        method: String,
        reason: String,
    },

    #[error("type {name} ({guid}) is still used by stored instances")]
    TypeInUse {
        guid: Guid,
        name: String,
        method: String,
    },

    #[error("property '{property}' is not valid for type {type_name}: {reason}")]
    PropertyError {
        property: String,
        type_name: String,
        method: String,
        reason: String,
    },

    #[error("classification '{classification}' is not valid for type {type_name}: {reason}")]
    ClassificationError {
        classification: String,
        type_name: String,
        method: String,
        reason: String,
    },

    #[error("status {status:?} is not supported by type {type_name}")]
    StatusNotSupported {
        status: InstanceStatus,
        type_name: String,
        method: String,
    },

    #[error("entity {anchor_guid} has {} {relationship_type} relationships where at most one is expected: {}", relationship_guids.len(), relationship_guids.join(", "))]
    AmbiguousRelationships {
        anchor_guid: Guid,
        relationship_type: String,
        relationship_guids: Vec<Guid>,
        method: String,
    },

    #[error("name '{name}' matches {} {type_name} entities: {}", entity_guids.len(), entity_guids.join(", "))]
    AmbiguousEntityName {
        name: String,
        parameter: String,
        type_name: String,
        entity_guids: Vec<Guid>,
        method: String,
    },

    #[error("instance {guid} is homed in metadata collection {metadata_collection_id}, which conflicts with {method}")]
    HomeConflict {
        guid: Guid,
        metadata_collection_id: Guid,
        method: String,
    },

    #[error("user '{user_id}' is not authorized to issue {method}")]
    NotAuthorized { user_id: String, method: String },

    #[error("{function} is not supported by this repository")]
    FunctionNotSupported { function: String, method: String },

    #[error("repository unavailable during {method}: {reason}")]
    RepositoryUnavailable { method: String, reason: String },
}

impl OmrsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OmrsError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            OmrsError::InstanceNotKnown { .. } => ErrorKind::InstanceNotKnown,
            OmrsError::EntityProxyOnly { .. } => ErrorKind::EntityProxyOnly,
            OmrsError::InstanceNotDeleted { .. } => ErrorKind::InstanceNotDeleted,
            OmrsError::TypeNotKnown { .. } => ErrorKind::TypeNotKnown,
            OmrsError::TypeAlreadyKnown { .. } => ErrorKind::TypeAlreadyKnown,
            OmrsError::TypeConflict { .. } => ErrorKind::TypeConflict,
            OmrsError::InvalidType { .. } => ErrorKind::InvalidType,
            OmrsError::IncompatiblePatch { .. } => ErrorKind::IncompatiblePatch,
            OmrsError::TypeInUse { .. } => ErrorKind::TypeInUse,
            OmrsError::PropertyError { .. } => ErrorKind::PropertyError,
            OmrsError::ClassificationError { .. } => ErrorKind::ClassificationError,
            OmrsError::StatusNotSupported { .. } => ErrorKind::StatusNotSupported,
            OmrsError::AmbiguousRelationships { .. } => ErrorKind::AmbiguousRelationships,
            OmrsError::AmbiguousEntityName { .. } => ErrorKind::AmbiguousEntityName,
            OmrsError::HomeConflict { .. } => ErrorKind::HomeConflict,
            OmrsError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            OmrsError::FunctionNotSupported { .. } => ErrorKind::FunctionNotSupported,
            OmrsError::RepositoryUnavailable { .. } => ErrorKind::RepositoryUnavailable,
        }
    }

    /// The method that raised the error
    pub fn method(&self) -> &str {
        match self {
            OmrsError::InvalidParameter { method, .. }
            | OmrsError::InstanceNotKnown { method, .. }
            | OmrsError::EntityProxyOnly { method, .. }
            | OmrsError::InstanceNotDeleted { method, .. }
            | OmrsError::TypeNotKnown { method, .. }
            | OmrsError::TypeAlreadyKnown { method, .. }
            | OmrsError::TypeConflict { method, .. }
            | OmrsError::InvalidType { method, .. }
            | OmrsError::IncompatiblePatch { method, .. }
            | OmrsError::TypeInUse { method, .. }
            | OmrsError::PropertyError { method, .. }
            | OmrsError::ClassificationError { method, .. }
            | OmrsError::StatusNotSupported { method, .. }
            | OmrsError::AmbiguousRelationships { method, .. }
            | OmrsError::AmbiguousEntityName { method, .. }
            | OmrsError::HomeConflict { method, .. }
            | OmrsError::NotAuthorized { method, .. }
            | OmrsError::FunctionNotSupported { method, .. }
            | OmrsError::RepositoryUnavailable { method, .. } => method,
        }
    }

    /// Name of the offending parameter, where one applies
    pub fn parameter(&self) -> Option<&str> {
        match self {
            OmrsError::InvalidParameter { parameter, .. } => Some(parameter),
            OmrsError::PropertyError { property, .. } => Some(property),
            OmrsError::AmbiguousEntityName { parameter, .. } => Some(parameter),
            _ => None,
        }
    }

    pub fn invalid_parameter(parameter: &str, method: &str, reason: impl Into<String>) -> Self {
        OmrsError::InvalidParameter {
            parameter: parameter.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn instance_not_known(guid: &str, type_name: &str, method: &str) -> Self {
        OmrsError::InstanceNotKnown {
            guid: guid.to_string(),
            type_name: type_name.to_string(),
            method: method.to_string(),
        }
    }

    pub fn type_not_known(identifier: &str, method: &str) -> Self {
        OmrsError::TypeNotKnown {
            identifier: identifier.to_string(),
            method: method.to_string(),
        }
    }

    pub fn property_error(
        property: &str,
        type_name: &str,
        method: &str,
        reason: impl Into<String>,
    ) -> Self {
        OmrsError::PropertyError {
            property: property.to_string(),
            type_name: type_name.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
