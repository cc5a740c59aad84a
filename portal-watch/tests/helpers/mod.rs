// Scripted portal and notifier fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use portal_watch_lib::monitor::{
    AuthError, Credentials, DeliveryError, FetchError, ListingItem, LoopSettings, MonitorLoop,
    Notifier, PortalClient, PortalConnector, SessionSettings, SessionSupervisor, Snapshot,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How long a slowed fetch takes; longer than any test's op timeout.
pub const SLOW_FETCH: Duration = Duration::from_secs(30);

/// Queued results plus call counters, shared by every client a connector opens.
#[derive(Default)]
pub struct PortalScript {
    /// Login results in order; an empty queue means logins succeed.
    pub logins: VecDeque<Result<(), AuthError>>,
    /// Fetch results in order; an empty queue fails with a navigation error.
    pub fetches: VecDeque<Result<Snapshot, FetchError>>,
    /// Number of upcoming fetches that stall for `SLOW_FETCH` first.
    pub slow_fetches: usize,
    /// Clock reading at the start of every fetch.
    pub fetch_started: Vec<Instant>,
    pub connects: usize,
    pub login_calls: usize,
    pub fetch_calls: usize,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<PortalScript>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_fetch(&self, result: Result<Snapshot, FetchError>) -> &Self {
        self.script.lock().unwrap().fetches.push_back(result);
        self
    }

    pub fn queue_listing(&self, names: &[&str]) -> &Self {
        self.queue_fetch(Ok(snapshot(names)))
    }

    pub fn queue_login(&self, result: Result<(), AuthError>) -> &Self {
        self.script.lock().unwrap().logins.push_back(result);
        self
    }

    pub fn slow_down_next_fetch(&self) -> &Self {
        self.script.lock().unwrap().slow_fetches += 1;
        self
    }

    pub fn fetch_started(&self) -> Vec<Instant> {
        self.script.lock().unwrap().fetch_started.clone()
    }

    pub fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    pub fn login_calls(&self) -> usize {
        self.script.lock().unwrap().login_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.script.lock().unwrap().fetch_calls
    }

    pub fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }
}

pub struct ScriptedClient {
    script: Arc<Mutex<PortalScript>>,
}

#[async_trait]
impl PortalClient for ScriptedClient {
    async fn login(&mut self, _credentials: &Credentials) -> Result<(), AuthError> {
        let mut script = self.script.lock().unwrap();
        script.login_calls += 1;
        script.logins.pop_front().unwrap_or(Ok(()))
    }

    async fn fetch_listing(&mut self) -> Result<Snapshot, FetchError> {
        let (slow, result) = {
            let mut script = self.script.lock().unwrap();
            script.fetch_calls += 1;
            script.fetch_started.push(Instant::now());
            let slow = script.slow_fetches > 0;
            if slow {
                script.slow_fetches -= 1;
            }
            let result = script
                .fetches
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Navigation("script exhausted".to_string())));
            (slow, result)
        };
        if slow {
            tokio::time::sleep(SLOW_FETCH).await;
        }
        result
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closes += 1;
    }
}

#[async_trait]
impl PortalConnector for ScriptedConnector {
    type Client = ScriptedClient;

    async fn connect(&self) -> Result<ScriptedClient, AuthError> {
        self.script.lock().unwrap().connects += 1;
        Ok(ScriptedClient {
            script: Arc::clone(&self.script),
        })
    }
}

/// Records every batch it is asked to deliver; queued errors fail the next deliveries.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    attempts: Arc<Mutex<Vec<Vec<String>>>>,
    delivered: Arc<Mutex<Vec<Vec<String>>>>,
    failures: Arc<Mutex<VecDeque<DeliveryError>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: DeliveryError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Make every delivery take `delay`.
    pub fn take_time(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<Vec<String>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, items: &[ListingItem]) -> Result<(), DeliveryError> {
        let batch: Vec<String> = items.iter().map(|i| i.as_str().to_string()).collect();
        self.attempts.lock().unwrap().push(batch.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.delivered.lock().unwrap().push(batch);
        Ok(())
    }
}

pub fn snapshot(names: &[&str]) -> Snapshot {
    names.iter().copied().collect()
}

pub fn names(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.iter().map(ListingItem::as_str).collect()
}

pub fn fast_session() -> SessionSettings {
    SessionSettings {
        op_timeout: Duration::from_secs(1),
        login_attempts: 2,
        retry_delay: Duration::ZERO,
    }
}

/// Loop over the given fakes with test-friendly session settings.
pub fn monitor(
    connector: &ScriptedConnector,
    notifier: &RecordingNotifier,
    settings: LoopSettings,
) -> MonitorLoop<ScriptedConnector, RecordingNotifier> {
    let supervisor = SessionSupervisor::new(
        connector.clone(),
        Credentials::new("student", "secret"),
        fast_session(),
    );
    MonitorLoop::new(supervisor, notifier.clone(), settings)
}
