//! The consumer phase state machine.
//!
//! The machine is the single source of truth for whether the driver should be
//! reading the data channel and whether records must pass through the catch-up
//! filter. It is pure and synchronous: the driver feeds it events from its one
//! serialized loop and executes the commands it emits. The only state is the
//! current phase and the currently tracked snapshot, both held explicitly, so
//! transition sequences can be replayed deterministically in tests.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use crate::bail;
use crate::control::message::{ControlMessage, DatasetMetadata, SnapshotId};
use crate::error::{ErrorKind, IngestResult};
use crate::snapshot::catchup::CatchupProgress;
use crate::snapshot::window::TxId;

/// The phase the consumer is currently in. Exactly one value is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Scanning the control channel for a pending snapshot before any data is read.
    Bootstrap,
    /// Steady-state streaming; every record is forwarded unfiltered.
    Consuming,
    /// A snapshot transfer is in flight; data-channel reads are paused.
    SnapshotPaused,
    /// The snapshot is loaded; records are filtered through the visibility window.
    CatchingUp,
    /// Terminal; the driver shuts down.
    Finished,
}

impl ConsumerPhase {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Consuming => "consuming",
            Self::SnapshotPaused => "snapshot_paused",
            Self::CatchingUp => "catching_up",
            Self::Finished => "finished",
        }
    }

    /// Returns `true` if no further transitions can leave this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for ConsumerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// An input to the state machine.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// The bootstrap scan drained the control channel without finding a pending snapshot.
    NoSnapshot,
    /// A decoded control-channel message.
    Control(ControlMessage),
    /// The spawned snapshot load task reported failure or was cancelled.
    SnapshotLoadFailed { id: SnapshotId },
    /// The driver observed that the catch-up boundary condition is met.
    CatchupCompleted,
    /// Graceful shutdown was requested.
    Shutdown,
}

impl ConsumerEvent {
    /// Short name used in logs and protocol-violation reports.
    pub fn as_static_str(&self) -> &'static str {
        match self {
            Self::NoSnapshot => "no-snapshot",
            Self::Control(message) => message.event_name(),
            Self::SnapshotLoadFailed { .. } => "snapshot-load-failed",
            Self::CatchupCompleted => "catchup-completed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A side effect the driver must execute after a transition.
///
/// Commands are instructions to the transport and loader collaborators; the
/// machine itself never blocks or performs IO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start reading the data channel from the committed offset, or from the
    /// beginning when nothing was ever committed.
    StartDataChannel,
    /// Stop reading the data channel and remember the position for resumption.
    PauseDataChannel,
    /// Resume reading the data channel from the position recorded when pausing.
    ResumeDataChannel,
    /// Run the bulk-load-apply for the staged datasets as a cancellable task.
    InvokeSnapshotLoad {
        id: SnapshotId,
        datasets: BTreeMap<String, DatasetMetadata>,
    },
    /// Abort the in-flight bulk-load task, discarding its eventual result.
    CancelSnapshotLoad { id: SnapshotId },
    /// Return to scanning the control channel for a pending snapshot.
    RescanControlChannel,
}

/// The snapshot currently tracked by the machine.
#[derive(Debug, Clone)]
struct TrackedSnapshot {
    id: SnapshotId,
    /// Catch-up progress, present from the moment the snapshot is loaded.
    progress: Option<CatchupProgress>,
}

/// The consumer control state machine.
///
/// Owns the `(phase, tracked snapshot, visibility window)` tuple. Callers must
/// serialize all calls: interleaving two transitions is the primary correctness
/// hazard of the cutover, since an abort racing a catch-up decision could apply
/// or skip a record incorrectly.
#[derive(Debug)]
pub struct ConsumerStateMachine {
    /// Product this consumer serves; snapshots for other products are ignored.
    product: String,
    phase: ConsumerPhase,
    tracked: Option<TrackedSnapshot>,
}

impl ConsumerStateMachine {
    /// Creates a machine in [`ConsumerPhase::Bootstrap`] for the given product.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            phase: ConsumerPhase::Bootstrap,
            tracked: None,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> ConsumerPhase {
        self.phase
    }

    /// The id of the snapshot currently being tracked, if any.
    pub fn tracked_snapshot(&self) -> Option<&SnapshotId> {
        self.tracked.as_ref().map(|tracked| &tracked.id)
    }

    /// Applies one event and returns the commands the driver must execute.
    ///
    /// Stale or mismatched snapshot references are expected in a multi-instance
    /// deployment and resolve to no commands with a warning. An input that is
    /// invalid for the current phase is a broken control-channel invariant and
    /// fails with [`ErrorKind::ProtocolViolation`]: continuing would risk
    /// silent duplication or loss, so the driver must terminate.
    pub fn transition(&mut self, event: ConsumerEvent) -> IngestResult<Vec<Command>> {
        let commands = match (self.phase, event) {
            // Terminal phase: the driver is already tearing down, late events
            // are irrelevant.
            (ConsumerPhase::Finished, event) => {
                debug!("ignoring {} event in terminal phase", event.as_static_str());

                vec![]
            }

            (_, ConsumerEvent::Shutdown) => {
                let mut commands = Vec::new();
                if self.phase == ConsumerPhase::CatchingUp
                    && let Some(tracked) = &self.tracked
                {
                    commands.push(Command::CancelSnapshotLoad {
                        id: tracked.id.clone(),
                    });
                }

                self.tracked = None;
                self.set_phase(ConsumerPhase::Finished);

                commands
            }

            (ConsumerPhase::Bootstrap, ConsumerEvent::NoSnapshot) => {
                self.set_phase(ConsumerPhase::Consuming);

                vec![Command::StartDataChannel]
            }

            (
                ConsumerPhase::Bootstrap | ConsumerPhase::Consuming,
                ConsumerEvent::Control(ControlMessage::SnapshotInit { id, product }),
            ) => {
                if product != self.product {
                    warn!(
                        "ignoring snapshot-init for snapshot '{}': product '{}' is not '{}'",
                        id, product, self.product
                    );

                    vec![]
                } else {
                    info!("snapshot '{}' announced, pausing main channel", id);

                    self.tracked = Some(TrackedSnapshot { id, progress: None });
                    self.set_phase(ConsumerPhase::SnapshotPaused);

                    vec![Command::PauseDataChannel]
                }
            }

            // A snapshot is already tracked: a second announcement is a retry
            // or a competing transfer, never a reason to drop what we have.
            (
                ConsumerPhase::SnapshotPaused | ConsumerPhase::CatchingUp,
                ConsumerEvent::Control(ControlMessage::SnapshotInit { id, .. }),
            ) => {
                self.warn_stale("snapshot-init", &id);

                vec![]
            }

            (
                ConsumerPhase::SnapshotPaused,
                ConsumerEvent::Control(ControlMessage::SnapshotAbort { id }),
            ) => {
                if !self.tracks(&id) {
                    self.warn_stale("snapshot-abort", &id);

                    vec![]
                } else {
                    info!("snapshot '{}' aborted before loading, re-scanning control channel", id);

                    self.tracked = None;
                    self.set_phase(ConsumerPhase::Bootstrap);

                    vec![Command::RescanControlChannel]
                }
            }

            (
                ConsumerPhase::CatchingUp,
                ConsumerEvent::Control(ControlMessage::SnapshotAbort { id }),
            ) => {
                if !self.tracks(&id) {
                    self.warn_stale("snapshot-abort", &id);

                    vec![]
                } else {
                    info!(
                        "snapshot '{}' aborted during catch-up, discarding visibility window",
                        id
                    );

                    self.tracked = None;
                    self.set_phase(ConsumerPhase::Bootstrap);

                    vec![
                        Command::CancelSnapshotLoad { id },
                        Command::PauseDataChannel,
                        Command::RescanControlChannel,
                    ]
                }
            }

            // An abort for a snapshot nobody tracks is a no-op: another
            // instance may already have cleaned it up.
            (
                ConsumerPhase::Bootstrap | ConsumerPhase::Consuming,
                ConsumerEvent::Control(ControlMessage::SnapshotAbort { id }),
            ) => {
                self.warn_stale("snapshot-abort", &id);

                vec![]
            }

            (
                ConsumerPhase::SnapshotPaused,
                ConsumerEvent::Control(ControlMessage::SnapshotLoaded {
                    id,
                    datasets,
                    transaction_info,
                }),
            ) => {
                if !self.tracks(&id) {
                    self.warn_stale("snapshot-loaded", &id);

                    vec![]
                } else {
                    info!(
                        "snapshot '{}' loaded with window [{}], catching up",
                        id, transaction_info
                    );

                    if let Some(tracked) = &mut self.tracked {
                        tracked.progress = Some(CatchupProgress::new(transaction_info));
                    }
                    self.set_phase(ConsumerPhase::CatchingUp);

                    vec![
                        Command::InvokeSnapshotLoad { id, datasets },
                        Command::ResumeDataChannel,
                    ]
                }
            }

            // Duplicate delivery after the first snapshot-loaded was applied:
            // the loader must not run twice and the window must not be reset.
            (
                ConsumerPhase::CatchingUp,
                ConsumerEvent::Control(ControlMessage::SnapshotLoaded { id, .. }),
            ) => {
                self.warn_stale("snapshot-loaded", &id);

                vec![]
            }

            (ConsumerPhase::CatchingUp, ConsumerEvent::CatchupCompleted) => {
                if let Some(tracked) = &self.tracked {
                    info!("catch-up for snapshot '{}' completed, back to streaming", tracked.id);
                }

                self.tracked = None;
                self.set_phase(ConsumerPhase::Consuming);

                vec![]
            }

            (ConsumerPhase::CatchingUp, ConsumerEvent::SnapshotLoadFailed { id }) => {
                if !self.tracks(&id) {
                    self.warn_stale("snapshot-load-failed", &id);

                    vec![]
                } else {
                    warn!(
                        "bulk load for snapshot '{}' failed, treating as abort",
                        id
                    );

                    self.tracked = None;
                    self.set_phase(ConsumerPhase::Bootstrap);

                    vec![Command::PauseDataChannel, Command::RescanControlChannel]
                }
            }

            // A late completion signal from a load that was already cancelled or
            // superseded must not move the phase.
            (_, ConsumerEvent::SnapshotLoadFailed { id }) => {
                self.warn_stale("snapshot-load-failed", &id);

                vec![]
            }

            (phase, event) => {
                bail!(
                    ErrorKind::ProtocolViolation,
                    "Control protocol violation",
                    format!(
                        "event `{}` is not valid in phase `{}`",
                        event.as_static_str(),
                        phase
                    )
                );
            }
        };

        Ok(commands)
    }

    /// Returns `true` if a record for this transaction must be forwarded to the
    /// destination during catch-up.
    ///
    /// Only valid while [`ConsumerPhase::CatchingUp`].
    pub fn should_apply(&self, xid: TxId) -> IngestResult<bool> {
        Ok(self.progress()?.should_apply(xid))
    }

    /// Records a commit marker observed on the data stream during catch-up.
    ///
    /// Only valid while [`ConsumerPhase::CatchingUp`].
    pub fn observe_commit(&mut self, xid: TxId) -> IngestResult<()> {
        let Some(progress) = self
            .tracked
            .as_mut()
            .and_then(|tracked| tracked.progress.as_mut())
        else {
            bail!(
                ErrorKind::InvalidState,
                "No catch-up in progress",
                "a commit marker was observed while no visibility window is active"
            );
        };

        progress.observe_commit(xid);

        Ok(())
    }

    /// Returns `true` once the catch-up boundary condition is met and the
    /// driver should raise [`ConsumerEvent::CatchupCompleted`].
    ///
    /// Returns `false` outside of catch-up.
    pub fn is_caught_up(&self) -> bool {
        self.tracked
            .as_ref()
            .and_then(|tracked| tracked.progress.as_ref())
            .is_some_and(CatchupProgress::is_caught_up)
    }

    fn progress(&self) -> IngestResult<&CatchupProgress> {
        match self
            .tracked
            .as_ref()
            .and_then(|tracked| tracked.progress.as_ref())
        {
            Some(progress) => Ok(progress),
            None => {
                bail!(
                    ErrorKind::InvalidState,
                    "No catch-up in progress",
                    "the catch-up filter was consulted while no visibility window is active"
                );
            }
        }
    }

    fn tracks(&self, id: &SnapshotId) -> bool {
        self.tracked
            .as_ref()
            .is_some_and(|tracked| &tracked.id == id)
    }

    fn set_phase(&mut self, next: ConsumerPhase) {
        debug!("phase transition {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn warn_stale(&self, event: &'static str, id: &SnapshotId) {
        match self.tracked_snapshot() {
            Some(tracked) => warn!(
                "ignoring stale {} for snapshot '{}' while tracking '{}'",
                event, id, tracked
            ),
            None => warn!("ignoring {} for untracked snapshot '{}'", event, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::window::TransactionWindow;

    fn machine() -> ConsumerStateMachine {
        ConsumerStateMachine::new("events")
    }

    fn init(id: &str) -> ConsumerEvent {
        ConsumerEvent::Control(ControlMessage::SnapshotInit {
            id: id.into(),
            product: "events".to_owned(),
        })
    }

    fn abort(id: &str) -> ConsumerEvent {
        ConsumerEvent::Control(ControlMessage::SnapshotAbort { id: id.into() })
    }

    fn loaded(id: &str, xmin: u32, xmax: u32, xips: &[u32]) -> ConsumerEvent {
        ConsumerEvent::Control(ControlMessage::SnapshotLoaded {
            id: id.into(),
            datasets: BTreeMap::from([(
                "events".to_owned(),
                DatasetMetadata {
                    temp_table: format!("events_tmp_{id}"),
                },
            )]),
            transaction_info: TransactionWindow::new(
                TxId(xmin),
                TxId(xmax),
                xips.iter().copied().map(TxId).collect(),
            ),
        })
    }

    #[test]
    fn bootstrap_without_snapshot_starts_consuming() {
        let mut machine = machine();

        let commands = machine.transition(ConsumerEvent::NoSnapshot).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Consuming);
        assert_eq!(commands, vec![Command::StartDataChannel]);
    }

    #[test]
    fn snapshot_init_pauses_and_tracks() {
        let mut machine = machine();

        let commands = machine.transition(init("a")).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::SnapshotPaused);
        assert_eq!(machine.tracked_snapshot(), Some(&"a".into()));
        assert_eq!(commands, vec![Command::PauseDataChannel]);
    }

    #[test]
    fn snapshot_init_for_other_product_is_ignored() {
        let mut machine = machine();

        let commands = machine
            .transition(ConsumerEvent::Control(ControlMessage::SnapshotInit {
                id: "a".into(),
                product: "transactions".to_owned(),
            }))
            .unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert_eq!(machine.tracked_snapshot(), None);
        assert!(commands.is_empty());
    }

    #[test]
    fn matching_loaded_message_starts_catchup() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();

        let commands = machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::CatchingUp);
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            Command::InvokeSnapshotLoad { id, datasets }
                if id == &SnapshotId::from("a") && datasets.contains_key("events")
        ));
        assert_eq!(commands[1], Command::ResumeDataChannel);
    }

    #[test]
    fn mismatched_loaded_message_is_stale() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();

        let commands = machine.transition(loaded("b", 100, 110, &[])).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::SnapshotPaused);
        assert!(commands.is_empty());
    }

    #[test]
    fn duplicate_loaded_message_does_not_reinvoke_the_loader() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();
        machine.observe_commit(TxId(101)).unwrap();

        let commands = machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::CatchingUp);
        assert!(commands.is_empty());
    }

    #[test]
    fn abort_before_loading_returns_to_bootstrap() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();

        let commands = machine.transition(abort("a")).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert_eq!(machine.tracked_snapshot(), None);
        assert_eq!(commands, vec![Command::RescanControlChannel]);
    }

    #[test]
    fn abort_during_catchup_discards_the_window() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        let commands = machine.transition(abort("a")).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert_eq!(machine.tracked_snapshot(), None);
        assert_eq!(
            commands,
            vec![
                Command::CancelSnapshotLoad { id: "a".into() },
                Command::PauseDataChannel,
                Command::RescanControlChannel,
            ]
        );
        assert!(machine.should_apply(TxId(104)).is_err());
    }

    #[test]
    fn abort_for_untracked_snapshot_is_a_noop() {
        let mut machine = machine();

        let commands = machine.transition(abort("ghost")).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert!(commands.is_empty());
    }

    #[test]
    fn catchup_filter_follows_the_visibility_window() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        // Reflected transactions (committed before the snapshot) are skipped;
        // the in-flight one and everything past xmax must be applied.
        let decisions: Vec<bool> = [90, 104, 105, 106, 120]
            .into_iter()
            .map(|xid| machine.should_apply(TxId(xid)).unwrap())
            .collect();

        assert_eq!(decisions, vec![false, false, true, false, true]);
    }

    #[test]
    fn catchup_sequence_applies_exactly_the_missing_transactions() {
        // Stream in commit order around a snapshot with window [100, 110),
        // xip [105]: transactions 90 and 104 are already in the snapshot,
        // 105 was in flight during the dump, 106 and 120 commit after it.
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        let mut applied = Vec::new();
        for xid in [90u32, 104, 105] {
            if machine.should_apply(TxId(xid)).unwrap() {
                applied.push(xid);
            }
            machine.observe_commit(TxId(xid)).unwrap();
        }

        // The commit of the last in-flight transaction ends catch-up.
        assert!(machine.is_caught_up());
        machine.transition(ConsumerEvent::CatchupCompleted).unwrap();
        assert_eq!(machine.phase(), ConsumerPhase::Consuming);

        // Unfiltered from here on.
        applied.extend([106, 120]);

        assert_eq!(applied, vec![105, 106, 120]);
    }

    #[test]
    fn observed_commit_of_last_in_progress_transaction_completes_catchup() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();
        assert!(!machine.is_caught_up());

        machine.observe_commit(TxId(105)).unwrap();
        assert!(machine.is_caught_up());

        let commands = machine.transition(ConsumerEvent::CatchupCompleted).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Consuming);
        assert!(commands.is_empty());
        // The window is gone; filtering no longer has anything to consult.
        assert!(machine.should_apply(TxId(104)).is_err());
    }

    #[test]
    fn load_failure_during_catchup_is_treated_as_abort() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        let commands = machine
            .transition(ConsumerEvent::SnapshotLoadFailed { id: "a".into() })
            .unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert_eq!(
            commands,
            vec![Command::PauseDataChannel, Command::RescanControlChannel]
        );
    }

    #[test]
    fn late_load_failure_after_abort_does_not_move_the_phase() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();
        machine.transition(abort("a")).unwrap();
        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);

        let commands = machine
            .transition(ConsumerEvent::SnapshotLoadFailed { id: "a".into() })
            .unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Bootstrap);
        assert!(commands.is_empty());
    }

    #[test]
    fn loaded_without_init_is_a_protocol_violation() {
        let mut machine = machine();

        let err = machine
            .transition(loaded("a", 100, 110, &[]))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn unlisted_pairs_are_protocol_violations() {
        // NoSnapshot outside of bootstrap.
        let mut consuming = machine();
        consuming.transition(ConsumerEvent::NoSnapshot).unwrap();
        assert_eq!(
            consuming
                .transition(ConsumerEvent::NoSnapshot)
                .unwrap_err()
                .kind(),
            ErrorKind::ProtocolViolation
        );

        // CatchupCompleted while nothing is catching up.
        let mut bootstrapping = machine();
        assert_eq!(
            bootstrapping
                .transition(ConsumerEvent::CatchupCompleted)
                .unwrap_err()
                .kind(),
            ErrorKind::ProtocolViolation
        );

        // SnapshotLoaded while consuming.
        let mut streaming = machine();
        streaming.transition(ConsumerEvent::NoSnapshot).unwrap();
        assert_eq!(
            streaming
                .transition(loaded("a", 1, 2, &[]))
                .unwrap_err()
                .kind(),
            ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn new_snapshot_while_consuming_pauses_again() {
        let mut machine = machine();
        machine.transition(ConsumerEvent::NoSnapshot).unwrap();

        let commands = machine.transition(init("b")).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::SnapshotPaused);
        assert_eq!(machine.tracked_snapshot(), Some(&"b".into()));
        assert_eq!(commands, vec![Command::PauseDataChannel]);
    }

    #[test]
    fn shutdown_is_terminal_from_any_phase() {
        let mut machine = machine();
        machine.transition(init("a")).unwrap();
        machine.transition(loaded("a", 100, 110, &[105])).unwrap();

        let commands = machine.transition(ConsumerEvent::Shutdown).unwrap();

        assert_eq!(machine.phase(), ConsumerPhase::Finished);
        assert_eq!(
            commands,
            vec![Command::CancelSnapshotLoad { id: "a".into() }]
        );
        assert!(machine.phase().is_terminal());

        // Events after the end are ignored.
        let commands = machine.transition(init("b")).unwrap();
        assert!(commands.is_empty());
        assert_eq!(machine.phase(), ConsumerPhase::Finished);
    }
}
