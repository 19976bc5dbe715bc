//! Error types for the persistence engine.

use crate::entity::EntityReference;
use thiserror::Error;

/// Result type for engine and store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by sessions, entity states and entity stores.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The storage device failed.
    #[error("storage error: {0}")]
    Storage(#[from] unitas_storage::StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// What failed.
        message: String,
    },

    /// A journal failed its integrity checks.
    #[error("journal corruption at offset {offset}: {reason}")]
    Corruption {
        /// Byte offset of the bad frame.
        offset: u64,
        /// What was wrong.
        reason: String,
    },

    /// A backend failed for a reason other than device I/O.
    #[error("entity store error: {message}")]
    EntityStore {
        /// What failed.
        message: String,
    },

    /// The entity does not exist, or it was removed in this session.
    #[error("no such entity: {reference}")]
    NoSuchEntity {
        /// Reference that could not be resolved.
        reference: EntityReference,
    },

    /// No descriptor is registered for the entity type.
    #[error("no such entity type: {type_name}")]
    NoSuchEntityType {
        /// The unknown type name.
        type_name: String,
    },

    /// The session already holds a live entity with this identity.
    #[error("identity already in use in this unit of work: {reference}")]
    IdentityAlreadyExists {
        /// The clashing reference.
        reference: EntityReference,
    },

    /// The backend already stores an entity with this identity.
    #[error("entity already exists: {reference}")]
    EntityAlreadyExists {
        /// The clashing reference.
        reference: EntityReference,
    },

    /// Stored versions changed since these entities were loaded.
    #[error("concurrent modification of {} entities: {references:?}", references.len())]
    ConcurrentEntityModification {
        /// Every entity whose stored version no longer matches.
        references: Vec<EntityReference>,
    },

    /// The unit of work was used outside its open phase.
    #[error("unit of work error: {message}")]
    UnitOfWork {
        /// Why the operation was rejected.
        message: String,
    },

    /// Completing the unit of work failed.
    #[error("unit of work completion failed: {message}")]
    UnitOfWorkCompletion {
        /// Summary of the failure.
        message: String,
        /// Underlying cause.
        #[source]
        source: Box<CoreError>,
    },

    /// The descriptor has no property or association with this name.
    #[error("entity type {entity_type} has no state named {name}")]
    NoSuchState {
        /// Entity type searched.
        entity_type: String,
        /// Requested name.
        name: String,
    },

    /// A value did not have the expected shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected kind.
        expected: &'static str,
        /// Actual kind.
        found: &'static str,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why it is not permitted.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an entity store error.
    pub fn entity_store(message: impl Into<String>) -> Self {
        Self::EntityStore {
            message: message.into(),
        }
    }

    /// Creates a unit of work misuse error.
    pub fn unit_of_work(message: impl Into<String>) -> Self {
        Self::UnitOfWork {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a no-such-entity error.
    pub fn no_such_entity(reference: &EntityReference) -> Self {
        Self::NoSuchEntity {
            reference: reference.clone(),
        }
    }

    /// Creates a no-such-entity-type error.
    pub fn no_such_entity_type(type_name: impl Into<String>) -> Self {
        Self::NoSuchEntityType {
            type_name: type_name.into(),
        }
    }

    /// Wraps a failure raised while completing a unit of work.
    ///
    /// Conflicts and completion errors pass through unchanged so callers can
    /// match on them directly.
    pub fn completion(cause: CoreError) -> Self {
        match cause {
            Self::ConcurrentEntityModification { .. } | Self::UnitOfWorkCompletion { .. } => cause,
            other => Self::UnitOfWorkCompletion {
                message: other.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns true for optimistic-concurrency conflicts, including wrapped ones.
    #[must_use]
    pub fn is_concurrent_modification(&self) -> bool {
        match self {
            Self::ConcurrentEntityModification { .. } => true,
            Self::UnitOfWorkCompletion { source, .. } => source.is_concurrent_modification(),
            _ => false,
        }
    }

    /// Returns true when the entity could not be found.
    #[must_use]
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self, Self::NoSuchEntity { .. })
    }

    /// Returns true for backend failures (device, codec or store).
    #[must_use]
    pub fn is_entity_store_failure(&self) -> bool {
        match self {
            Self::Storage(_)
            | Self::Codec { .. }
            | Self::Corruption { .. }
            | Self::EntityStore { .. } => true,
            Self::UnitOfWorkCompletion { source, .. } => source.is_entity_store_failure(),
            _ => false,
        }
    }
}

impl From<ciborium::de::Error<std::io::Error>> for CoreError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_wraps_store_failures() {
        let err = CoreError::completion(CoreError::entity_store("disk full"));
        assert!(matches!(err, CoreError::UnitOfWorkCompletion { .. }));
        assert!(err.is_entity_store_failure());
        assert!(!err.is_concurrent_modification());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn completion_keeps_conflicts_visible() {
        let conflict = CoreError::ConcurrentEntityModification {
            references: vec![EntityReference::parse("a")],
        };
        let err = CoreError::completion(conflict);
        assert!(matches!(err, CoreError::ConcurrentEntityModification { .. }));
        assert!(err.is_concurrent_modification());
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = unitas_storage::StorageError::Injected("append".into()).into();
        assert!(err.is_entity_store_failure());
    }
}
