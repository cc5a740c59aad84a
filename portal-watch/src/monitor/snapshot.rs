// Listing snapshots and the in-memory baseline store
// Nothing here is persisted: a restart always re-establishes the baseline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::monitor::session::SessionStatus;

/// One portal entry, e.g. a company name. Compared by exact string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingItem(String);

impl ListingItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingItem {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ListingItem {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Ordered capture of the listing at one poll.
///
/// Order is whatever the portal returned. Duplicates are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    items: Vec<ListingItem>,
}

impl Snapshot {
    pub fn new(items: Vec<ListingItem>) -> Self {
        Self { items }
    }

    /// Keep only the first `max` items.
    pub fn truncated(mut self, max: usize) -> Self {
        self.items.truncate(max);
        self
    }

    pub fn items(&self) -> &[ListingItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListingItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Into<ListingItem>> FromIterator<T> for Snapshot {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Holds the last committed snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Snapshot,
    has_baseline: bool,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed snapshot; empty until the baseline is established.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn has_baseline(&self) -> bool {
        self.has_baseline
    }

    /// Replace the stored snapshot. Once set, the baseline flag never clears.
    pub fn commit(&mut self, snapshot: Snapshot) {
        self.current = snapshot;
        self.has_baseline = true;
    }
}

/// Point-in-time view of the monitor for logs and the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub has_baseline: bool,
    pub last_snapshot: Snapshot,
    pub session_status: SessionStatus,
}
