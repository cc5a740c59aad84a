//! The monitor loop: fixed-interval polling, change detection, alerting and
//! session recovery.
//!
//! Exactly one cycle runs at a time. Every per-cycle failure is logged and
//! turned into "wait for the next tick"; only the stop signal ends the loop,
//! and it is only observed between cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::monitor::detector;
use crate::monitor::error::FetchError;
use crate::monitor::notify::Notifier;
use crate::monitor::persistence::{MonitorStatus, StatusFile};
use crate::monitor::portal::PortalConnector;
use crate::monitor::session::SessionSupervisor;
use crate::monitor::snapshot::{MonitorState, SnapshotStore};

/// When the baseline advances after a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit every fetched snapshot, even if the alert could not be sent.
    /// A failed alert is never retried, and never duplicated.
    #[default]
    AlwaysAdvance,
    /// Keep the old baseline until the alert is delivered, so the same items
    /// are detected and sent again on the next cycle.
    HoldUntilDelivered,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Time between cycle starts
    pub interval: Duration,
    pub commit_policy: CommitPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            commit_policy: CommitPolicy::AlwaysAdvance,
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    AuthFailed {
        error: String,
    },
    /// `recovered` is `None` when the failure did not call for a re-login.
    FetchFailed {
        error: String,
        recovered: Option<bool>,
    },
    BaselineEstablished {
        items: usize,
    },
    NoChange,
    Notified {
        count: usize,
    },
    DeliveryFailed {
        count: usize,
        committed: bool,
        error: String,
    },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::AuthFailed { .. }
                | CycleOutcome::FetchFailed { .. }
                | CycleOutcome::DeliveryFailed { .. }
        )
    }
}

pub struct MonitorLoop<C: PortalConnector, N: Notifier> {
    supervisor: SessionSupervisor<C>,
    notifier: N,
    store: SnapshotStore,
    settings: LoopSettings,
    status_file: Option<StatusFile>,
    started_at: DateTime<Utc>,
    cycles: u64,
    consecutive_failures: u32,
    last_outcome: Option<CycleOutcome>,
}

impl<C: PortalConnector, N: Notifier> MonitorLoop<C, N> {
    pub fn new(supervisor: SessionSupervisor<C>, notifier: N, settings: LoopSettings) -> Self {
        Self {
            supervisor,
            notifier,
            store: SnapshotStore::new(),
            settings,
            status_file: None,
            started_at: Utc::now(),
            cycles: 0,
            consecutive_failures: 0,
            last_outcome: None,
        }
    }

    /// Rewrite `status_file` after every cycle.
    pub fn with_status_file(mut self, status_file: StatusFile) -> Self {
        self.status_file = Some(status_file);
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn supervisor(&self) -> &SessionSupervisor<C> {
        &self.supervisor
    }

    pub fn state(&self) -> MonitorState {
        MonitorState {
            has_baseline: self.store.has_baseline(),
            last_snapshot: self.store.current().clone(),
            session_status: self.supervisor.status(),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            started_at: self.started_at,
            updated_at: Utc::now(),
            pid: std::process::id(),
            cycles: self.cycles,
            consecutive_failures: self.consecutive_failures,
            session: self.supervisor.status(),
            has_baseline: self.store.has_baseline(),
            baseline_len: self.store.current().len(),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Poll until `stop` flips to true (or its sender is dropped).
    ///
    /// The first cycle runs immediately. A cycle that overruns the interval
    /// is followed straight away by the next one; missed ticks never stack.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            policy = ?self.settings.commit_policy,
            "Monitor loop started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if *stop.borrow() {
                break;
            }

            let outcome = self.run_cycle().await;
            self.record(outcome);
        }

        self.supervisor.shutdown().await;
        info!(cycles = self.cycles, "Monitor loop stopped");
    }

    /// One poll: authenticate, fetch, diff, alert, commit.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        debug!(cycle = self.cycles + 1, "Starting poll cycle");

        if let Err(e) = self.supervisor.ensure_authenticated().await {
            error!(phase = "auth", error = %e, "Portal login failed, retrying next cycle");
            return CycleOutcome::AuthFailed {
                error: e.to_string(),
            };
        }

        let snapshot = match self.supervisor.fetch_listing().await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.handle_fetch_failure(e).await,
        };

        if !self.store.has_baseline() {
            let items = snapshot.len();
            self.store.commit(snapshot);
            info!(items, "Baseline established");
            return CycleOutcome::BaselineEstablished { items };
        }

        let new_items = detector::diff(&snapshot, self.store.current());
        if new_items.is_empty() {
            debug!(items = snapshot.len(), "No new listings");
            self.store.commit(snapshot);
            return CycleOutcome::NoChange;
        }

        let count = new_items.len();
        info!(count, "New listings detected");

        match self.notifier.notify(&new_items).await {
            Ok(()) => {
                self.store.commit(snapshot);
                info!(count, "Alert delivered");
                CycleOutcome::Notified { count }
            }
            Err(e) => {
                let committed = self.settings.commit_policy == CommitPolicy::AlwaysAdvance;
                if committed {
                    self.store.commit(snapshot);
                }
                error!(phase = "notify", error = %e, count, committed, "Alert delivery failed");
                CycleOutcome::DeliveryFailed {
                    count,
                    committed,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn handle_fetch_failure(&mut self, e: FetchError) -> CycleOutcome {
        if !e.is_session_loss() {
            warn!(phase = "fetch", error = %e, "Listing fetch failed, retrying next cycle");
            return CycleOutcome::FetchFailed {
                error: e.to_string(),
                recovered: None,
            };
        }

        error!(phase = "fetch", error = %e, "Listing fetch lost the portal session");
        self.supervisor.mark_expired();

        let recovered = match self.supervisor.recover().await {
            Ok(()) => true,
            Err(re) => {
                error!(phase = "recover", error = %re, "Session recovery failed, retrying next cycle");
                false
            }
        };

        CycleOutcome::FetchFailed {
            error: e.to_string(),
            recovered: Some(recovered),
        }
    }

    fn record(&mut self, outcome: CycleOutcome) {
        self.cycles += 1;
        if outcome.is_failure() {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.last_outcome = Some(outcome);

        if let Some(status_file) = &self.status_file {
            if let Err(e) = status_file.write(&self.status()) {
                warn!(path = %status_file.path().display(), error = %e, "Failed to write status file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classification() {
        assert!(CycleOutcome::AuthFailed {
            error: "x".into()
        }
        .is_failure());
        assert!(!CycleOutcome::NoChange.is_failure());
        assert!(!CycleOutcome::BaselineEstablished { items: 0 }.is_failure());
        assert!(CycleOutcome::DeliveryFailed {
            count: 1,
            committed: true,
            error: "relay".into()
        }
        .is_failure());
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_string(&CycleOutcome::Notified { count: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"notified","count":2}"#);
    }

    #[test]
    fn default_policy_always_advances() {
        assert_eq!(LoopSettings::default().commit_policy, CommitPolicy::AlwaysAdvance);
    }
}
