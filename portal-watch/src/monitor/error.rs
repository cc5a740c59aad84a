//! Error taxonomy for the monitor.
//!
//! Every per-cycle error is recoverable: the loop logs it and waits for the
//! next tick. Only `ConfigError` is fatal, and only at startup.

use std::time::Duration;
use thiserror::Error;

/// Login rejected or the login page could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("login rejected: {reason}")]
    Rejected { reason: String },

    #[error("login page unreachable at {url}: {cause}")]
    Unreachable { url: String, cause: String },

    #[error("login timed out after {0:?}")]
    Timeout(Duration),
}

/// Listing retrieval failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("listing fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("navigation failed: {0}")]
    Navigation(String),
}

impl FetchError {
    /// Whether the failure means the session itself is unusable and a
    /// re-login is needed, rather than a plain retry on the next tick.
    ///
    /// A timed-out fetch leaves the client in an unknown state, so it is
    /// treated like an expired session; `Navigation` and `NotFound` keep the
    /// session and simply wait for the next tick.
    pub fn is_session_loss(&self) -> bool {
        matches!(self, FetchError::SessionExpired(_) | FetchError::Timeout(_))
    }
}

/// Notification delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("invalid mail address '{address}': {cause}")]
    Address { address: String, cause: String },

    #[error("failed to build alert message: {0}")]
    Compose(String),

    #[error("mail relay rejected delivery: {0}")]
    Transport(String),

    #[error("failed to write terminal alert: {0}")]
    Terminal(String),
}

/// Startup configuration problem. The loop must not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required setting {var} is not set")]
    Missing { var: &'static str },

    #[error("setting {var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_loss_classification() {
        assert!(FetchError::SessionExpired("redirected".into()).is_session_loss());
        assert!(FetchError::Timeout(Duration::from_secs(10)).is_session_loss());
        assert!(!FetchError::NotFound("no rows".into()).is_session_loss());
        assert!(!FetchError::Navigation("502".into()).is_session_loss());
    }

    #[test]
    fn config_error_names_the_variable() {
        let err = ConfigError::Missing { var: "EMAIL_FROM" };
        assert_eq!(err.to_string(), "required setting EMAIL_FROM is not set");
    }
}
