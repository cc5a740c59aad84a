//! Session supervisor: owns the single portal client and its login state.
//!
//! State machine:
//!
//! ```text
//! Unauthenticated --login ok--> Authenticated --session loss--> Expired
//! Expired --recover ok--> Authenticated
//! Expired --recover failed--> Expired (retried next cycle)
//! ```
//!
//! Every login and fetch is bounded by the configured operation timeout; a
//! timeout is a recoverable failure like any other.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::monitor::error::{AuthError, FetchError};
use crate::monitor::portal::{Credentials, PortalClient, PortalConnector};
use crate::monitor::snapshot::Snapshot;

/// Login state of the portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    Authenticated,
    Expired,
}

/// Tunables for login and fetch.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bound for each login or fetch call
    pub op_timeout: Duration,
    /// Login attempts made by `ensure_authenticated` before giving up
    pub login_attempts: u32,
    /// Pause between failed login attempts
    pub retry_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(10),
            login_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct SessionSupervisor<C: PortalConnector> {
    connector: C,
    credentials: Credentials,
    settings: SessionSettings,
    client: Option<C::Client>,
    status: SessionStatus,
}

impl<C: PortalConnector> SessionSupervisor<C> {
    pub fn new(connector: C, credentials: Credentials, settings: SessionSettings) -> Self {
        Self {
            connector,
            credentials,
            settings,
            client: None,
            status: SessionStatus::Unauthenticated,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// No-op when already authenticated. An expired session goes through
    /// `recover`; a fresh one logs in, retrying up to `login_attempts` times.
    pub async fn ensure_authenticated(&mut self) -> Result<(), AuthError> {
        match self.status {
            SessionStatus::Authenticated if self.client.is_some() => Ok(()),
            SessionStatus::Expired => self.recover().await,
            _ => self.establish().await,
        }
    }

    /// Record that the session, not just one request, is unusable.
    pub fn mark_expired(&mut self) {
        if self.status != SessionStatus::Expired {
            warn!(previous = ?self.status, "Portal session marked expired");
        }
        self.status = SessionStatus::Expired;
    }

    /// Tear down the current client, connect a new one and log in once.
    ///
    /// On failure the status stays `Expired` and the next cycle tries again.
    pub async fn recover(&mut self) -> Result<(), AuthError> {
        info!("Recovering portal session");
        self.teardown().await;
        self.status = SessionStatus::Expired;

        let mut client = self.connect().await?;
        self.login_once(&mut client).await?;

        self.client = Some(client);
        self.status = SessionStatus::Authenticated;
        info!("Portal session recovered");
        Ok(())
    }

    /// Fetch the listing through the owned client.
    pub async fn fetch_listing(&mut self) -> Result<Snapshot, FetchError> {
        let timeout = self.settings.op_timeout;
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| FetchError::SessionExpired("no open portal session".to_string()))?;

        match tokio::time::timeout(timeout, client.fetch_listing()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    /// Release the client on process shutdown.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    async fn establish(&mut self) -> Result<(), AuthError> {
        let attempts = self.settings.login_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.client.is_none() {
                match self.connect().await {
                    Ok(client) => self.client = Some(client),
                    Err(e) => {
                        warn!(attempt, error = %e, "Failed to open portal client");
                        last_error = Some(e);
                        self.pause_before_retry(attempt, attempts).await;
                        continue;
                    }
                }
            }

            let Some(mut client) = self.client.take() else {
                continue;
            };
            let result = self.login_once(&mut client).await;
            self.client = Some(client);

            match result {
                Ok(()) => {
                    self.status = SessionStatus::Authenticated;
                    info!(attempt, "Logged in to portal");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Portal login attempt failed");
                    last_error = Some(e);
                    self.pause_before_retry(attempt, attempts).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AuthError::Rejected {
            reason: "no login attempt was made".to_string(),
        }))
    }

    async fn connect(&self) -> Result<C::Client, AuthError> {
        let timeout = self.settings.op_timeout;
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(timeout)),
        }
    }

    async fn login_once(&self, client: &mut C::Client) -> Result<(), AuthError> {
        let timeout = self.settings.op_timeout;
        debug!(username = %self.credentials.username, "Logging in to portal");
        match tokio::time::timeout(timeout, client.login(&self.credentials)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(timeout)),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close().await;
        }
    }

    async fn pause_before_retry(&self, attempt: u32, attempts: u32) {
        if attempt < attempts && !self.settings.retry_delay.is_zero() {
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        logins: VecDeque<Result<(), AuthError>>,
        connects: usize,
        closes: usize,
        login_delay: Option<Duration>,
    }

    struct FakeClient {
        script: Arc<Mutex<Script>>,
    }

    #[async_trait]
    impl PortalClient for FakeClient {
        async fn login(&mut self, _credentials: &Credentials) -> Result<(), AuthError> {
            let (delay, result) = {
                let mut script = self.script.lock().unwrap();
                (script.login_delay, script.logins.pop_front().unwrap_or(Ok(())))
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }

        async fn fetch_listing(&mut self) -> Result<Snapshot, FetchError> {
            Ok(Snapshot::from_iter(["Acme"]))
        }

        async fn close(&mut self) {
            self.script.lock().unwrap().closes += 1;
        }
    }

    struct FakeConnector {
        script: Arc<Mutex<Script>>,
    }

    #[async_trait]
    impl PortalConnector for FakeConnector {
        type Client = FakeClient;

        async fn connect(&self) -> Result<FakeClient, AuthError> {
            self.script.lock().unwrap().connects += 1;
            Ok(FakeClient {
                script: Arc::clone(&self.script),
            })
        }
    }

    fn supervisor(script: Script) -> (SessionSupervisor<FakeConnector>, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(script));
        let settings = SessionSettings {
            op_timeout: Duration::from_secs(10),
            login_attempts: 3,
            retry_delay: Duration::ZERO,
        };
        let sup = SessionSupervisor::new(
            FakeConnector {
                script: Arc::clone(&script),
            },
            Credentials::new("user", "pass"),
            settings,
        );
        (sup, script)
    }

    fn rejected() -> AuthError {
        AuthError::Rejected {
            reason: "bad password".to_string(),
        }
    }

    #[tokio::test]
    async fn starts_unauthenticated_and_logs_in() {
        let (mut sup, script) = supervisor(Script::default());
        assert_eq!(sup.status(), SessionStatus::Unauthenticated);

        sup.ensure_authenticated().await.unwrap();
        assert_eq!(sup.status(), SessionStatus::Authenticated);
        assert_eq!(script.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn ensure_is_noop_when_authenticated() {
        let (mut sup, script) = supervisor(Script::default());
        sup.ensure_authenticated().await.unwrap();
        sup.ensure_authenticated().await.unwrap();
        assert_eq!(script.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn login_retries_until_success() {
        let (mut sup, _script) = supervisor(Script {
            logins: VecDeque::from(vec![Err(rejected()), Err(rejected()), Ok(())]),
            ..Script::default()
        });
        sup.ensure_authenticated().await.unwrap();
        assert_eq!(sup.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn repeated_login_failure_surfaces_error() {
        let (mut sup, _script) = supervisor(Script {
            logins: VecDeque::from(vec![Err(rejected()), Err(rejected()), Err(rejected())]),
            ..Script::default()
        });
        let err = sup.ensure_authenticated().await.unwrap_err();
        assert_eq!(err, rejected());
        assert_eq!(sup.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn recover_replaces_client() {
        let (mut sup, script) = supervisor(Script::default());
        sup.ensure_authenticated().await.unwrap();
        sup.mark_expired();
        assert_eq!(sup.status(), SessionStatus::Expired);

        sup.recover().await.unwrap();
        assert_eq!(sup.status(), SessionStatus::Authenticated);
        let script = script.lock().unwrap();
        assert_eq!(script.connects, 2);
        assert_eq!(script.closes, 1);
    }

    #[tokio::test]
    async fn failed_recover_stays_expired() {
        let (mut sup, _script) = supervisor(Script {
            logins: VecDeque::from(vec![Ok(()), Err(rejected())]),
            ..Script::default()
        });
        sup.ensure_authenticated().await.unwrap();
        sup.mark_expired();

        assert!(sup.recover().await.is_err());
        assert_eq!(sup.status(), SessionStatus::Expired);

        // Next cycle retries through ensure_authenticated
        sup.ensure_authenticated().await.unwrap();
        assert_eq!(sup.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn fetch_without_client_is_session_loss() {
        let (mut sup, _script) = supervisor(Script::default());
        let err = sup.fetch_listing().await.unwrap_err();
        assert!(matches!(err, FetchError::SessionExpired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_login_times_out() {
        let (mut sup, _script) = supervisor(Script {
            login_delay: Some(Duration::from_secs(60)),
            ..Script::default()
        });
        let err = sup.ensure_authenticated().await.unwrap_err();
        assert_eq!(err, AuthError::Timeout(Duration::from_secs(10)));
    }
}
