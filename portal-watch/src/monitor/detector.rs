//! Change detection between two listing snapshots.
//!
//! The detector knows nothing about first-run semantics; suppressing the
//! alert for the baseline poll is the loop's job.

use std::collections::HashSet;

use crate::monitor::snapshot::{ListingItem, Snapshot};

/// Items of `new_snapshot` whose value appears nowhere in `baseline`,
/// in `new_snapshot` order.
///
/// Membership is by value, not position, so a reordered listing yields nothing.
pub fn diff(new_snapshot: &Snapshot, baseline: &Snapshot) -> Vec<ListingItem> {
    let seen: HashSet<&str> = baseline.iter().map(ListingItem::as_str).collect();

    new_snapshot
        .iter()
        .filter(|item| !seen.contains(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(items: &[&str]) -> Snapshot {
        items.iter().copied().collect()
    }

    fn names(items: &[ListingItem]) -> Vec<&str> {
        items.iter().map(ListingItem::as_str).collect()
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let a = snap(&["Acme", "Globex", "Initech"]);
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn reports_only_new_items_in_order() {
        let baseline = snap(&["Acme", "Globex"]);
        let new = snap(&["Umbrella", "Acme", "Initech", "Globex"]);
        assert_eq!(names(&diff(&new, &baseline)), vec!["Umbrella", "Initech"]);
    }

    #[test]
    fn reordering_is_not_a_change() {
        let baseline = snap(&["Acme", "Globex"]);
        let new = snap(&["Globex", "Acme"]);
        assert!(diff(&new, &baseline).is_empty());
    }

    #[test]
    fn empty_baseline_yields_everything() {
        let new = snap(&["Acme", "Globex"]);
        assert_eq!(names(&diff(&new, &Snapshot::default())), vec!["Acme", "Globex"]);
    }

    #[test]
    fn removed_items_are_ignored() {
        let baseline = snap(&["Acme", "Globex", "Initech"]);
        let new = snap(&["Acme"]);
        assert!(diff(&new, &baseline).is_empty());
    }

    #[test]
    fn duplicates_come_from_the_new_snapshot_only() {
        let baseline = snap(&["Acme"]);
        let new = snap(&["Hooli", "Hooli", "Acme"]);
        assert_eq!(names(&diff(&new, &baseline)), vec!["Hooli", "Hooli"]);
    }

    #[test]
    fn comparison_is_exact() {
        let baseline = snap(&["Acme"]);
        let new = snap(&["acme", "Acme "]);
        assert_eq!(diff(&new, &baseline).len(), 2);
    }
}
