//! Error types for host-facing physics operations.

use thiserror::Error;

use super::rigid_body::BodyHandle;

/// Errors returned by [`PhysicsWorld`](super::PhysicsWorld) operations.
///
/// The simulation step itself never fails; these only come from host calls
/// that create, address or configure bodies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    /// The body descriptor failed validation. Nothing was created.
    #[error("invalid body descriptor: {reason}")]
    InvalidDescriptor {
        /// What was wrong with the descriptor.
        reason: String,
    },

    /// The handle does not name a live body.
    #[error("invalid body handle: {0}")]
    InvalidHandle(BodyHandle),

    /// The body store is full.
    #[error("body capacity exceeded: {capacity} bodies")]
    CapacityExceeded {
        /// Configured maximum body count.
        capacity: usize,
    },

    /// The compute device could not be created or used.
    #[error("compute device error: {0}")]
    Device(String),
}

impl PhysicsError {
    /// Creates an invalid descriptor error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    /// Creates a capacity error.
    #[must_use]
    pub const fn capacity(capacity: usize) -> Self {
        Self::CapacityExceeded { capacity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PhysicsError::invalid("radius must be positive");
        assert_eq!(
            err.to_string(),
            "invalid body descriptor: radius must be positive"
        );

        let err = PhysicsError::InvalidHandle(BodyHandle(7));
        assert_eq!(err.to_string(), "invalid body handle: #7");

        let err = PhysicsError::capacity(16);
        assert!(err.to_string().contains("16"));

        let err = PhysicsError::Device("no adapter".into());
        assert_eq!(err.to_string(), "compute device error: no adapter");
    }
}
