//! Error taxonomy for the binding runtime
//!
//! Every error is a programmer-visible condition raised synchronously at the
//! point of violation. None of them is recovered inside the runtime.

use crate::handle::NativeHandle;
use crate::ownership::Ownership;

pub type Result<T> = std::result::Result<T, BindingError>;

/// Why a cast could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastFailure {
    /// Target is not in the object's ancestor set
    Unreachable,
    /// Target is reachable through more than one non-shared base path
    Ambiguous,
}

impl core::fmt::Display for CastFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "target type is not an ancestor or the declared type"),
            Self::Ambiguous => write!(f, "target type is reachable through several base paths"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("native handle {handle} is already bound to a live {existing_type} wrapper (while registering {requested_type})")]
    DuplicateRegistration {
        handle: NativeHandle,
        existing_type: String,
        requested_type: String,
    },

    #[error("Internal native object ({declared_type}) already deleted (last known native type: {last_known_type})")]
    InvalidatedObject {
        declared_type: String,
        last_known_type: String,
        handle: Option<NativeHandle>,
    },

    #[error("ownership conflict on {declared_type} ({ownership}): {reason}")]
    OwnershipConflict {
        declared_type: String,
        ownership: Ownership,
        reason: String,
    },

    #[error("cannot cast {declared_type} to {target_type}: {reason}")]
    CastResolution {
        declared_type: String,
        target_type: String,
        reason: CastFailure,
    },

    #[error("{type_name} cannot be {action}: {reason}")]
    ConstructionForbidden {
        type_name: String,
        action: &'static str,
        reason: String,
    },

    #[error("unknown type: {name}")]
    UnknownType { name: String },

    #[error("wrapper #{id} is not known to this runtime")]
    UnknownWrapper { id: u64 },

    #[error("override of {declared_type}.{method} raised: {message}")]
    OverrideFailed {
        declared_type: String,
        method: String,
        message: String,
    },

    #[error("native call {declared_type}.{method} failed: {message}")]
    Native {
        declared_type: String,
        method: String,
        message: String,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

impl BindingError {
    pub fn invalidated(declared_type: &str, last_known_type: &str, handle: Option<NativeHandle>) -> Self {
        Self::InvalidatedObject {
            declared_type: declared_type.to_string(),
            last_known_type: last_known_type.to_string(),
            handle,
        }
    }

    pub fn forbidden(type_name: &str, action: &'static str, reason: impl Into<String>) -> Self {
        Self::ConstructionForbidden {
            type_name: type_name.to_string(),
            action,
            reason: reason.into(),
        }
    }

    pub fn native(declared_type: &str, method: &str, message: impl Into<String>) -> Self {
        Self::Native {
            declared_type: declared_type.to_string(),
            method: method.to_string(),
            message: message.into(),
        }
    }

    /// Raised by a language override to signal an exception
    pub fn raised(declared_type: &str, method: &str, message: impl Into<String>) -> Self {
        Self::OverrideFailed {
            declared_type: declared_type.to_string(),
            method: method.to_string(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Use-after-free class errors
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::InvalidatedObject { .. })
    }
}
