//! The stateful consumer: wiring, lifecycle and the driver loop.

pub mod driver;

use std::sync::Arc;

use config::shared::StatefulConsumerConfig;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::consumer::driver::ConsumerLoop;
use crate::destination::base::Destination;
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::loader::base::SnapshotLoader;
use crate::transport::base::Transport;
use crate::types::ConsumerId;

/// A snapshot-aware CDC consumer.
///
/// Owns one transport subscription per channel, the snapshot loader and the
/// destination, and runs the serialized driver loop on a spawned task. The
/// returned [`ConsumerHandle`] is used to wait for completion or to request a
/// graceful shutdown.
#[derive(Debug)]
pub struct StatefulConsumer<T, L, D> {
    id: ConsumerId,
    config: Arc<StatefulConsumerConfig>,
    control: T,
    data: T,
    loader: L,
    destination: D,
    shutdown_tx: ShutdownTx,
}

impl<T, L, D> StatefulConsumer<T, L, D>
where
    T: Transport + Send + 'static,
    L: SnapshotLoader + Clone + Send + Sync + 'static,
    D: Destination + Send + 'static,
{
    /// Creates a new consumer after validating the configuration.
    pub fn new(
        id: ConsumerId,
        config: StatefulConsumerConfig,
        control: T,
        data: T,
        loader: L,
        destination: D,
    ) -> IngestResult<Self> {
        if let Err(err) = config.validate() {
            return Err(ingest_error!(
                ErrorKind::ConfigError,
                "Invalid consumer configuration",
                err.to_string(),
                source: err
            ));
        }

        // We create a watch channel of unit type, used only to notify the driver
        // loop that shutdown is needed. The receiver is obtained via `subscribe`
        // when the loop is spawned.
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            id,
            config: Arc::new(config),
            control,
            data,
            loader,
            destination,
            shutdown_tx,
        })
    }

    /// The shutdown transmitter, usable from outside the consumer (signal
    /// handlers, orchestration).
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Spawns the driver loop and returns a handle for monitoring it.
    pub fn start(self) -> ConsumerHandle {
        info!(
            "starting stateful consumer {} for product '{}'",
            self.id, self.config.product
        );

        let span = tracing::info_span!(
            "stateful_consumer",
            consumer_id = self.id,
            product = self.config.product
        );

        let driver = ConsumerLoop::new(
            self.config.clone(),
            self.control,
            self.data,
            self.loader,
            self.destination,
            self.shutdown_tx.subscribe(),
        );
        let handle = tokio::spawn(driver.run().instrument(span.or_current()));

        ConsumerHandle {
            handle: Some(handle),
            shutdown_tx: self.shutdown_tx,
        }
    }
}

/// Handle for monitoring and controlling a started consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    handle: Option<JoinHandle<IngestResult<()>>>,
    shutdown_tx: ShutdownTx,
}

impl ConsumerHandle {
    /// Requests a graceful shutdown of the driver loop.
    pub fn shutdown(&self) {
        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the consumer: {}", err);
            return;
        }

        info!("shutdown signal sent to the consumer");
    }

    /// Waits for the driver loop to complete.
    ///
    /// Completion happens on graceful shutdown or on a fatal error such as a
    /// control protocol violation; the error is returned in the latter case.
    /// Panics inside the driver task are surfaced as errors.
    pub async fn wait(mut self) -> IngestResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            ingest_error!(
                ErrorKind::ConsumerWorkerPanic,
                "Consumer driver task ended abnormally",
                err.to_string(),
                source: err
            )
        })??;

        Ok(())
    }

    /// Requests shutdown and waits for the driver loop to complete.
    pub async fn shutdown_and_wait(self) -> IngestResult<()> {
        self.shutdown();
        self.wait().await
    }
}
