//! Catch-up completion tracking.

use std::collections::HashSet;

use tracing::debug;

use crate::snapshot::window::{TransactionWindow, TxId};

/// Tracks how far the live stream has progressed relative to a snapshot's
/// visibility window.
///
/// Created when a snapshot finishes loading, consulted for every record read
/// during catch-up, and discarded as soon as [`CatchupProgress::is_caught_up`]
/// turns true. Catch-up filtering is a one-time transient ritual, not a
/// persistent mode.
#[derive(Debug, Clone)]
pub struct CatchupProgress {
    window: TransactionWindow,
    /// In-progress-at-snapshot-time transactions whose commit has not yet been
    /// observed on the stream.
    unresolved: HashSet<TxId>,
    /// Whether the window had any in-progress transactions to resolve at all.
    watching_xips: bool,
    /// Whether a commit at or past `xmax` was observed, proving the stream has
    /// advanced beyond the snapshot point.
    crossed_xmax: bool,
}

impl CatchupProgress {
    /// Creates progress tracking for a freshly loaded snapshot.
    pub fn new(window: TransactionWindow) -> Self {
        let unresolved: HashSet<TxId> = window.xip_list().iter().copied().collect();
        let watching_xips = !unresolved.is_empty();

        Self {
            window,
            unresolved,
            watching_xips,
            crossed_xmax: false,
        }
    }

    /// The visibility window this progress is tracking.
    pub fn window(&self) -> &TransactionWindow {
        &self.window
    }

    /// Returns `true` if a streamed record for this transaction must be applied.
    pub fn should_apply(&self, xid: TxId) -> bool {
        self.window.should_apply(xid)
    }

    /// Records a commit marker observed on the stream.
    pub fn observe_commit(&mut self, xid: TxId) {
        if self.unresolved.remove(&xid) {
            debug!(
                "resolved in-progress transaction {}, {} remaining",
                xid,
                self.unresolved.len()
            );
        }

        if xid.follows_or_matches(self.window.xmax()) {
            self.crossed_xmax = true;
        }
    }

    /// Returns `true` once the stream has provably advanced past the snapshot
    /// point and the visibility window can be discarded.
    ///
    /// Every in-progress-at-snapshot-time transaction committed after the
    /// snapshot was taken, so observing all of them proves the stream is past
    /// the snapshot point. A window with an empty `xip_list` offers no such
    /// witnesses; there the first commit at or past `xmax` is the proof.
    pub fn is_caught_up(&self) -> bool {
        self.unresolved.is_empty() && (self.watching_xips || self.crossed_xmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(xmin: u32, xmax: u32, xips: &[u32]) -> CatchupProgress {
        CatchupProgress::new(TransactionWindow::new(
            TxId(xmin),
            TxId(xmax),
            xips.iter().copied().map(TxId).collect(),
        ))
    }

    #[test]
    fn catches_up_once_all_in_progress_transactions_commit() {
        let mut progress = progress(100, 110, &[103, 105]);
        assert!(!progress.is_caught_up());

        progress.observe_commit(TxId(103));
        assert!(!progress.is_caught_up());

        progress.observe_commit(TxId(105));
        assert!(progress.is_caught_up());
    }

    #[test]
    fn single_in_progress_commit_is_enough() {
        let mut progress = progress(100, 110, &[105]);

        progress.observe_commit(TxId(105));

        assert!(progress.is_caught_up());
    }

    #[test]
    fn commits_of_other_transactions_do_not_resolve_the_window() {
        let mut progress = progress(100, 110, &[105]);

        progress.observe_commit(TxId(101));
        progress.observe_commit(TxId(104));

        assert!(!progress.is_caught_up());
    }

    #[test]
    fn empty_xip_list_waits_for_a_commit_past_xmax() {
        let mut progress = progress(100, 110, &[]);

        // No in-progress witnesses: records between the paused position and the
        // snapshot point may still be ahead, so the window must stay active.
        assert!(!progress.is_caught_up());

        progress.observe_commit(TxId(104));
        assert!(!progress.is_caught_up());

        progress.observe_commit(TxId(110));
        assert!(progress.is_caught_up());
    }

    #[test]
    fn filtering_still_follows_the_window_while_catching_up() {
        let progress = progress(100, 110, &[105]);

        assert!(!progress.should_apply(TxId(90)));
        assert!(!progress.should_apply(TxId(104)));
        assert!(progress.should_apply(TxId(105)));
        assert!(progress.should_apply(TxId(120)));
    }
}
