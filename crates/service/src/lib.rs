//! Runs a world behind a lock.
//!
//! Clients submit [`Operation`]s through a bounded queue; a processor thread
//! applies them one write lock at a time while a [`TickLoop`] advances the
//! game clock. Readers take the read lock and query the index directly.

mod config;
mod error;
mod queue;
mod ticker;
mod timer;

pub use config::{GameConfig, ServiceConfig};
pub use error::ServiceError;
pub use queue::{Operation, OperationProcessor, OperationSender, ProcessStats, operation_queue};
pub use ticker::{TickLoop, wait_for_tick};
pub use timer::ExecTimer;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;

use railworld_kernel::{World, WorldEvent};

/// World shared between the processor, the tick loop and readers.
pub type SharedWorld = Arc<RwLock<World>>;

pub fn shared_world(world: World) -> SharedWorld {
    Arc::new(RwLock::new(world))
}

/// What a service did before shutdown.
#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub tick: u64,
    pub operations: ProcessStats,
    pub op_timer: ExecTimer,
    pub tick_timer: ExecTimer,
    /// Events still retained at shutdown, oldest first. Drained from the world.
    pub events: Vec<WorldEvent>,
}

/// A running world: processor thread plus tick loop.
pub struct Service {
    world: SharedWorld,
    sender: OperationSender,
    stop_processor: Sender<()>,
    processor: JoinHandle<OperationProcessor>,
    ticker: TickLoop,
}

impl Service {
    pub fn start(config: &GameConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let world = shared_world(World::new(config.index)?);
        let (sender, processor) = operation_queue(world.clone(), &config.service);
        let (stop_processor, stop_rx) = crossbeam_channel::bounded(1);

        let processor = std::thread::Builder::new()
            .name("railworld-ops".into())
            .spawn(move || processor.run(stop_rx))?;
        let ticker = TickLoop::start(world.clone(), &config.service)?;

        tracing::info!(
            max_scale = config.index.max_scale,
            min_scale = config.index.min_scale,
            queue = config.service.queue_capacity,
            "service started"
        );
        Ok(Self {
            world,
            sender,
            stop_processor,
            processor,
            ticker,
        })
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn sender(&self) -> OperationSender {
        self.sender.clone()
    }

    pub fn submit(&self, op: Operation) -> bool {
        self.sender.submit(op)
    }

    /// Stop the tick loop, apply whatever is still queued, and join both
    /// threads.
    pub fn shutdown(self) -> Result<ServiceReport, ServiceError> {
        let tick_timer = self.ticker.stop()?;
        let _ = self.stop_processor.send(());
        let processor = self
            .processor
            .join()
            .map_err(|_| ServiceError::ThreadPanicked("operation"))?;

        let (tick, events) = {
            let mut world = self.world.write();
            (world.tick(), world.drain_events())
        };
        let report = ServiceReport {
            tick,
            events,
            operations: processor.totals(),
            op_timer: processor.timer().clone(),
            tick_timer,
        };
        tracing::info!(
            tick = report.tick,
            applied = report.operations.applied,
            failed = report.operations.failed,
            "service stopped"
        );
        Ok(report)
    }
}
