//! The serialized driver loop.
//!
//! The loop owns both channel subscriptions and is the only place where state
//! machine transitions happen. Control records, data records, snapshot load
//! completions and the shutdown signal all funnel into one `select!` so their
//! effects on the phase are applied in a single serialized sequence; applying
//! two transitions concurrently is the primary correctness hazard of the
//! cutover.
//!
//! The bulk load runs as a cancellable spawned task. Its completion is sent
//! back into the loop through a queue instead of being awaited inside a
//! transition, so the control channel stays responsive (heartbeats, aborts)
//! for the whole duration of the transfer.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use config::shared::StatefulConsumerConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::control::message::{DatasetMetadata, SnapshotId, parse_control_message};
use crate::conversions::record::{StreamEvent, parse_stream_event};
use crate::destination::base::Destination;
use crate::error::{ErrorKind, IngestResult};
use crate::loader::base::SnapshotLoader;
use crate::state::machine::{Command, ConsumerEvent, ConsumerPhase, ConsumerStateMachine};
use crate::transport::base::Transport;
use crate::types::Position;

/// Outcome of a spawned snapshot load task.
#[derive(Debug)]
struct SnapshotLoadOutcome {
    id: SnapshotId,
    result: IngestResult<()>,
}

/// The in-flight snapshot load task, kept for cancellation.
#[derive(Debug)]
struct LoadTask {
    id: SnapshotId,
    handle: JoinHandle<()>,
}

/// The consumer driver loop.
pub struct ConsumerLoop<T, L, D> {
    machine: ConsumerStateMachine,
    control: T,
    data: T,
    loader: L,
    destination: D,
    shutdown_rx: ShutdownRx,
    load_results_tx: mpsc::Sender<SnapshotLoadOutcome>,
    load_results_rx: mpsc::Receiver<SnapshotLoadOutcome>,
    load_task: Option<LoadTask>,
    /// Whether the loop currently polls the data channel. Mirrors what the
    /// phase implies, kept separately so the select guard stays cheap.
    reading_data: bool,
    /// Data-channel position recorded when pausing, used as the resume point.
    paused_position: Option<Position>,
}

impl<T, L, D> ConsumerLoop<T, L, D>
where
    T: Transport + Send + 'static,
    L: SnapshotLoader + Clone + Send + Sync + 'static,
    D: Destination + Send + 'static,
{
    /// Creates a new driver loop in the bootstrap phase.
    pub fn new(
        config: Arc<StatefulConsumerConfig>,
        control: T,
        data: T,
        loader: L,
        destination: D,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let (load_results_tx, load_results_rx) =
            mpsc::channel(config.load_result_queue_depth.max(1));

        Self {
            machine: ConsumerStateMachine::new(config.product.clone()),
            control,
            data,
            loader,
            destination,
            shutdown_rx,
            load_results_tx,
            load_results_rx,
            load_task: None,
            reading_data: false,
            paused_position: None,
        }
    }

    /// Runs the loop until shutdown or a fatal error.
    pub async fn run(mut self) -> IngestResult<()> {
        info!("consumer loop started, scanning control channel for pending snapshots");

        let result = self.run_inner().await;

        if let Some(task) = self.load_task.take() {
            debug!("aborting in-flight snapshot load on loop exit");
            task.handle.abort();
        }

        match &result {
            Ok(()) => info!("consumer loop finished"),
            Err(err) => warn!("consumer loop failed: {}", err),
        }

        result
    }

    async fn run_inner(&mut self) -> IngestResult<()> {
        loop {
            if self.machine.phase().is_terminal() {
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    info!("shutdown signal received");

                    let commands = self.machine.transition(ConsumerEvent::Shutdown)?;
                    self.execute(commands).await?;
                }

                Some(outcome) = self.load_results_rx.recv() => {
                    self.handle_load_outcome(outcome).await?;
                }

                record = self.control.next_record() => {
                    self.handle_control_record(record?).await?;
                }

                record = self.data.next_record(), if self.reading_data => {
                    self.handle_data_record(record?).await?;
                }
            }
        }
    }

    /// Handles one control-channel read.
    async fn handle_control_record(
        &mut self,
        record: Option<(Position, Bytes)>,
    ) -> IngestResult<()> {
        let Some((position, payload)) = record else {
            // End of the control stream only means something during the
            // bootstrap scan: no pending snapshot was found.
            if self.machine.phase() == ConsumerPhase::Bootstrap {
                info!("control channel drained with no pending snapshot");

                let commands = self.machine.transition(ConsumerEvent::NoSnapshot)?;
                self.execute(commands).await?;
            } else {
                debug!("control channel idle");
            }

            return Ok(());
        };

        match parse_control_message(&payload) {
            Ok(message) => {
                debug!(
                    "control message '{}' for snapshot '{}' at position {}",
                    message.event_name(),
                    message.snapshot_id(),
                    position
                );

                let commands = self.machine.transition(ConsumerEvent::Control(message))?;
                self.execute(commands).await?;
            }
            Err(err) => {
                // Malformed control traffic is dropped, never fatal. The raw
                // content is kept in the log line for diagnosis.
                warn!(
                    "dropping malformed control message at position {}: {}",
                    position, err
                );
            }
        }

        self.control.commit_position(position.next()).await?;

        Ok(())
    }

    /// Handles one data-channel read.
    async fn handle_data_record(&mut self, record: Option<(Position, Bytes)>) -> IngestResult<()> {
        let Some((position, payload)) = record else {
            debug!("data channel idle");

            return Ok(());
        };

        match parse_stream_event(&payload) {
            Ok(event) => self.process_stream_event(event).await?,
            Err(err) => {
                // A poison record must not wedge the consumer: skip it and keep
                // the position moving.
                warn!(
                    "skipping malformed data record at position {}: {}",
                    position, err
                );
            }
        }

        // Progress is committed only after the record went through the state
        // machine, so a crash-restart resumes at a consistent phase.
        self.data.commit_position(position.next()).await?;

        Ok(())
    }

    /// Routes one decoded stream event according to the current phase.
    async fn process_stream_event(&mut self, event: StreamEvent) -> IngestResult<()> {
        match self.machine.phase() {
            ConsumerPhase::Consuming => {
                if let StreamEvent::Change(record) = event {
                    self.destination.write_changes(vec![record]).await?;
                }

                Ok(())
            }

            ConsumerPhase::CatchingUp => match event {
                StreamEvent::Begin { .. } => Ok(()),
                StreamEvent::Commit { xid } => {
                    self.machine.observe_commit(xid)?;

                    if self.machine.is_caught_up() {
                        let commands = self.machine.transition(ConsumerEvent::CatchupCompleted)?;
                        self.execute(commands).await?;
                    }

                    Ok(())
                }
                StreamEvent::Change(record) => {
                    if self.machine.should_apply(record.xid)? {
                        self.destination.write_changes(vec![record]).await?;
                    } else {
                        debug!(
                            "skipping change of transaction {} already reflected in the snapshot",
                            record.xid
                        );
                    }

                    Ok(())
                }
            },

            phase => {
                bail!(
                    ErrorKind::InvalidState,
                    "Data record read in unexpected phase",
                    format!("the data channel delivered a record while the phase is `{phase}`")
                );
            }
        }
    }

    /// Handles the completion of a spawned snapshot load task.
    async fn handle_load_outcome(&mut self, outcome: SnapshotLoadOutcome) -> IngestResult<()> {
        if self
            .load_task
            .as_ref()
            .is_some_and(|task| task.id == outcome.id)
        {
            self.load_task = None;
        }

        match outcome.result {
            Ok(()) => {
                info!("bulk load for snapshot '{}' completed", outcome.id);

                Ok(())
            }
            Err(err) => {
                warn!("bulk load for snapshot '{}' failed: {}", outcome.id, err);

                // A failed load is equivalent to receiving an abort; the
                // machine decides whether the id is still relevant.
                let commands = self
                    .machine
                    .transition(ConsumerEvent::SnapshotLoadFailed { id: outcome.id })?;
                self.execute(commands).await?;

                Ok(())
            }
        }
    }

    /// Executes the commands emitted by a transition, in order.
    async fn execute(&mut self, commands: Vec<Command>) -> IngestResult<()> {
        for command in commands {
            match command {
                Command::StartDataChannel => {
                    let from = self
                        .data
                        .committed_position()
                        .await?
                        .unwrap_or(Position::BEGINNING);

                    info!("starting data channel from position {}", from);

                    self.data.resume(from).await?;
                    self.reading_data = true;
                }

                Command::PauseDataChannel => {
                    if self.reading_data {
                        let position = self.data.current_position().await?;
                        self.data.pause().await?;
                        self.reading_data = false;
                        self.paused_position = Some(position);

                        info!("paused data channel at position {}", position);
                    } else {
                        // Never started reading: the resume point is wherever
                        // reading would have begun.
                        let position = self
                            .data
                            .committed_position()
                            .await?
                            .unwrap_or(Position::BEGINNING);
                        self.paused_position = Some(position);

                        debug!("data channel not being read, resume point is {}", position);
                    }
                }

                Command::ResumeDataChannel => {
                    let from = match self.paused_position.take() {
                        Some(position) => position,
                        None => self
                            .data
                            .committed_position()
                            .await?
                            .unwrap_or(Position::BEGINNING),
                    };

                    info!("resuming data channel from position {}", from);

                    self.data.resume(from).await?;
                    self.reading_data = true;
                }

                Command::InvokeSnapshotLoad { id, datasets } => {
                    self.spawn_snapshot_load(id, datasets);
                }

                Command::CancelSnapshotLoad { id } => {
                    if let Some(task) = self.load_task.take() {
                        if task.id == id {
                            info!("cancelling bulk load for snapshot '{}'", id);
                            task.handle.abort();
                        } else {
                            self.load_task = Some(task);
                        }
                    }
                }

                Command::RescanControlChannel => {
                    // The control channel is ordered, so scanning forward from
                    // the current position is enough: everything before the
                    // abort has already been processed.
                    let position = self.control.current_position().await?;

                    info!("re-scanning control channel from position {}", position);

                    self.control.resume(position).await?;
                }
            }
        }

        Ok(())
    }

    /// Spawns the bulk load as a cancellable background task.
    ///
    /// The result is delivered back into the loop through the load-results
    /// queue; a send failure means the loop is already gone, which is fine.
    fn spawn_snapshot_load(&mut self, id: SnapshotId, datasets: BTreeMap<String, DatasetMetadata>) {
        info!(
            "invoking bulk load for snapshot '{}' with {} datasets",
            id,
            datasets.len()
        );

        let loader = self.loader.clone();
        let results_tx = self.load_results_tx.clone();
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            let result = loader.load(&task_id, &datasets).await;
            let _ = results_tx
                .send(SnapshotLoadOutcome {
                    id: task_id,
                    result,
                })
                .await;
        });

        self.load_task = Some(LoadTask { id, handle });
    }
}
