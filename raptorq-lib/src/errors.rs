//! Error types for the premium engine.
//!
//! Every failure the engine reports falls into one of a handful of kinds
//! (see [`ErrorKind`]). Callers match on the kind to decide how to surface
//! the error; the numeric [`EngineErrorCode`] is stable for FFI and HTTP
//! mapping.

/// Error codes for FFI and HTTP integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EngineErrorCode {
    /// Unknown service, purchase, slot or entitlement
    NotFound = 4000,
    /// Resource state forbids the operation
    Conflict = 4090,
    /// Advertising slot already booked
    SlotOccupied = 4091,
    /// Invalid request/data
    Invalid = 5000,
    /// Banner image rejected
    InvalidBanner = 5001,
    /// Price feed or payment oracle unreachable
    UpstreamUnavailable = 6000,
    /// Envelope could not be opened
    DecryptionFailed = 7000,
    /// Persistence layer failure
    Storage = 8000,
}

/// Coarse classification of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    UpstreamUnavailable,
    DecryptionFailed,
    Storage,
}

/// Comprehensive error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Resource not found (service, purchase, slot, entitlement).
    #[error("{resource_type} not found: {identifier}")]
    NotFound {
        /// Type of resource (e.g., "service", "purchase")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// Operation conflicts with the current state of a resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Advertising slot holds a booking that has not expired yet.
    #[error("slot {slot} is occupied until timestamp {until}")]
    SlotOccupied {
        /// Slot identifier
        slot: String,
        /// Expiration of the current booking (unix epoch)
        until: i64,
    },

    /// Invalid data provided.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Banner image failed validation.
    #[error("invalid banner: {0}")]
    InvalidBanner(String),

    /// External collaborator unreachable, failing, or timed out.
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable {
        /// Collaborator name (e.g., "price feed")
        service: String,
        /// Failure reason
        reason: String,
    },

    /// Envelope could not be opened: wrong password, tampering, or a
    /// malformed envelope. Deliberately carries no detail.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Get the error code for FFI/HTTP integration.
    pub fn code(&self) -> EngineErrorCode {
        match self {
            Self::NotFound { .. } => EngineErrorCode::NotFound,
            Self::Conflict(_) => EngineErrorCode::Conflict,
            Self::SlotOccupied { .. } => EngineErrorCode::SlotOccupied,
            Self::Invalid { .. } => EngineErrorCode::Invalid,
            Self::InvalidBanner(_) => EngineErrorCode::InvalidBanner,
            Self::UpstreamUnavailable { .. } => EngineErrorCode::UpstreamUnavailable,
            Self::DecryptionFailed => EngineErrorCode::DecryptionFailed,
            Self::Storage(_) => EngineErrorCode::Storage,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::SlotOccupied { .. } => ErrorKind::Conflict,
            Self::Invalid { .. } | Self::InvalidBanner(_) => ErrorKind::Invalid,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::DecryptionFailed => ErrorKind::DecryptionFailed,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. } | Self::Storage(_))
    }

    /// Create a not found error.
    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {}", err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
