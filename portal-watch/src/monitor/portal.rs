//! Portal access contracts consumed by the session supervisor.
//!
//! The monitor never depends on how the portal is driven; anything that can
//! log in and return a listing snapshot plugs in here.

use async_trait::async_trait;
use std::fmt;

use crate::monitor::error::{AuthError, FetchError};
use crate::monitor::snapshot::Snapshot;

/// Portal login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// An open portal session resource (a browser page, an HTTP cookie jar, ...).
#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AuthError>;

    async fn fetch_listing(&mut self) -> Result<Snapshot, FetchError>;

    /// Release the underlying resource. Called before a client is dropped
    /// during recovery or shutdown.
    async fn close(&mut self) {}
}

/// Creates fresh portal clients. Recovery tears the old client down and asks
/// the connector for a new one.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    type Client: PortalClient;

    async fn connect(&self) -> Result<Self::Client, AuthError>;
}
