//! Transaction identifiers and the snapshot visibility window.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A transaction identifier from the source database.
///
/// Transaction ids are assigned monotonically from a 32-bit counter that wraps
/// around, so plain integer comparison is wrong once a window spans the
/// wraparound boundary. All ordering goes through [`TxId::precedes`], the one
/// place where the modular arithmetic lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub u32);

impl TxId {
    /// Returns `true` if `self` was assigned before `other` in the source's
    /// transaction-id space.
    ///
    /// This is the standard wraparound-aware comparison: the signed difference
    /// of the raw counters. It is only meaningful for ids less than half the id
    /// space apart, which holds for any live visibility window.
    pub fn precedes(self, other: TxId) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    /// Returns `true` if `self` was assigned at or after `other`.
    pub fn follows_or_matches(self, other: TxId) -> bool {
        !self.precedes(other)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transaction-visibility window published with a completed snapshot.
///
/// Semantics follow the source database's snapshot rule:
/// - ids before `xmin` are committed and reflected in the snapshot;
/// - ids at or after `xmax` are not reflected;
/// - ids in `[xmin, xmax)` are reflected unless they appear in `xip_list`,
///   the transactions still in progress when the snapshot was taken.
///
/// The window is pre-resolved by the snapshot producer: `xmin`, `xmax` and the
/// `xip_list` entries are guaranteed to lie within half the id space of each
/// other, so [`TxId::precedes`] orders them consistently across wraparound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWindow {
    xmin: TxId,
    xmax: TxId,
    xip_list: Vec<TxId>,
}

impl TransactionWindow {
    /// Creates a new [`TransactionWindow`].
    pub fn new(xmin: TxId, xmax: TxId, xip_list: Vec<TxId>) -> Self {
        Self {
            xmin,
            xmax,
            xip_list,
        }
    }

    /// The oldest transaction id that could still have been in progress at
    /// snapshot time.
    pub fn xmin(&self) -> TxId {
        self.xmin
    }

    /// The first transaction id not yet assigned at snapshot time.
    pub fn xmax(&self) -> TxId {
        self.xmax
    }

    /// Transactions that were in progress when the snapshot was taken.
    pub fn xip_list(&self) -> &[TxId] {
        &self.xip_list
    }

    /// Returns `true` if the transaction's effects are already reflected in the
    /// bulk-loaded snapshot.
    pub fn reflects(&self, xid: TxId) -> bool {
        if xid.precedes(self.xmin) {
            return true;
        }

        if xid.follows_or_matches(self.xmax) {
            return false;
        }

        !self.xip_list.contains(&xid)
    }

    /// Returns `true` if a streamed record for this transaction must be applied
    /// during catch-up, `false` if it would duplicate snapshot data.
    pub fn should_apply(&self, xid: TxId) -> bool {
        !self.reflects(xid)
    }
}

impl fmt::Display for TransactionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "xmin={} xmax={} xip={}",
            self.xmin,
            self.xmax,
            self.xip_list.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(xmin: u32, xmax: u32, xips: &[u32]) -> TransactionWindow {
        TransactionWindow::new(
            TxId(xmin),
            TxId(xmax),
            xips.iter().copied().map(TxId).collect(),
        )
    }

    #[test]
    fn ids_before_xmin_are_never_applied() {
        let window = window(100, 110, &[105]);

        for xid in [0, 50, 99] {
            assert!(!window.should_apply(TxId(xid)));
        }
    }

    #[test]
    fn ids_at_or_after_xmax_are_always_applied() {
        let window = window(100, 110, &[105]);

        for xid in [110, 111, 5000] {
            assert!(window.should_apply(TxId(xid)));
        }
    }

    #[test]
    fn in_range_ids_are_applied_only_when_in_progress_at_snapshot_time() {
        let window = window(100, 110, &[103, 105]);

        for xid in 100..110u32 {
            let expected = xid == 103 || xid == 105;
            assert_eq!(window.should_apply(TxId(xid)), expected, "xid {xid}");
        }
    }

    #[test]
    fn comparison_is_consistent_across_wraparound() {
        let high = TxId(u32::MAX - 2);
        let low = TxId(3);

        assert!(high.precedes(low));
        assert!(!low.precedes(high));
    }

    #[test]
    fn window_spanning_wraparound_classifies_both_sides() {
        // xmin just below the wraparound boundary, xmax just above it.
        let window = window(u32::MAX - 1, 4, &[u32::MAX, 1]);

        // Assigned and committed before the window opened.
        assert!(!window.should_apply(TxId(u32::MAX - 10)));
        // In range, not in progress at snapshot time.
        assert!(!window.should_apply(TxId(2)));
        // In range, in progress at snapshot time.
        assert!(window.should_apply(TxId(u32::MAX)));
        assert!(window.should_apply(TxId(1)));
        // Assigned after the snapshot.
        assert!(window.should_apply(TxId(4)));
        assert!(window.should_apply(TxId(9)));
    }
}
