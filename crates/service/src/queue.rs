use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::time::{Duration, Instant};

use railworld_common::{EntityId, EntityKind, OwnerId, Point};
use railworld_kernel::{Shape, World, WorldError};

use crate::{ExecTimer, ServiceConfig, SharedWorld};

/// A world mutation requested by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Spawn {
        kind: EntityKind,
        owner: OwnerId,
        shape: Shape,
    },
    Move {
        id: EntityId,
        to: Point,
    },
    Despawn {
        id: EntityId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Spawn { .. } => "spawn",
            Operation::Move { .. } => "move",
            Operation::Despawn { .. } => "despawn",
        }
    }

    /// Apply to the world, returning the entity affected.
    pub fn apply(&self, world: &mut World) -> Result<EntityId, WorldError> {
        match *self {
            Operation::Spawn { kind, owner, shape } => world.spawn(kind, owner, shape),
            Operation::Move { id, to } => world.move_to(id, to).map(|()| id),
            Operation::Despawn { id } => world.despawn(id).map(|_| id),
        }
    }
}

/// Counts of processed operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub applied: usize,
    pub failed: usize,
}

impl ProcessStats {
    pub fn total(&self) -> usize {
        self.applied + self.failed
    }
}

impl std::ops::AddAssign for ProcessStats {
    fn add_assign(&mut self, rhs: Self) {
        self.applied += rhs.applied;
        self.failed += rhs.failed;
    }
}

/// Client handle for submitting operations. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OperationSender {
    tx: Sender<Operation>,
}

impl OperationSender {
    /// Queue an operation. Returns false, and drops it, when the queue is
    /// full or the processor is gone.
    pub fn submit(&self, op: Operation) -> bool {
        match self.tx.try_send(op) {
            Ok(()) => true,
            Err(TrySendError::Full(op)) => {
                tracing::warn!(op = op.name(), "operation queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(op)) => {
                tracing::warn!(op = op.name(), "operation processor stopped, dropping");
                false
            }
        }
    }

    /// Operations waiting to be applied.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Applies queued operations to the shared world, one write lock per
/// operation.
pub struct OperationProcessor {
    rx: Receiver<Operation>,
    world: SharedWorld,
    slow_op: Duration,
    timer: ExecTimer,
    totals: ProcessStats,
}

/// Create a bounded queue feeding `world`.
pub fn operation_queue(
    world: SharedWorld,
    config: &ServiceConfig,
) -> (OperationSender, OperationProcessor) {
    let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
    let processor = OperationProcessor {
        rx,
        world,
        slow_op: config.slow_op_threshold(),
        timer: ExecTimer::default(),
        totals: ProcessStats::default(),
    };
    (OperationSender { tx }, processor)
}

impl OperationProcessor {
    /// Apply everything currently queued without blocking.
    pub fn drain(&mut self) -> ProcessStats {
        let mut stats = ProcessStats::default();
        while let Ok(op) = self.rx.try_recv() {
            stats += self.apply(op);
        }
        stats
    }

    /// Apply operations as they arrive until `stop` fires or every sender is
    /// dropped. Whatever is still queued at stop is applied first.
    pub fn run(mut self, stop: Receiver<()>) -> Self {
        tracing::debug!("operation processor started");
        loop {
            crossbeam_channel::select! {
                recv(self.rx) -> op => match op {
                    Ok(op) => {
                        self.apply(op);
                    }
                    Err(_) => break,
                },
                recv(stop) -> _ => {
                    self.drain();
                    break;
                }
            }
        }
        tracing::debug!(
            applied = self.totals.applied,
            failed = self.totals.failed,
            "operation processor stopped"
        );
        self
    }

    pub fn timer(&self) -> &ExecTimer {
        &self.timer
    }

    pub fn totals(&self) -> ProcessStats {
        self.totals
    }

    fn apply(&mut self, op: Operation) -> ProcessStats {
        let start = Instant::now();
        let result = {
            let mut world = self.world.write();
            let locked = start.elapsed();
            let result = op.apply(&mut world);
            let elapsed = start.elapsed();
            if elapsed > self.slow_op {
                tracing::warn!(
                    op = op.name(),
                    wait_ms = locked.as_millis() as u64,
                    exec_ms = (elapsed - locked).as_millis() as u64,
                    "slow operation"
                );
            }
            result
        };
        self.timer.record(start.elapsed());

        let stats = match result {
            Ok(id) => {
                tracing::trace!(op = op.name(), entity = %id, "applied");
                ProcessStats { applied: 1, failed: 0 }
            }
            Err(err) => {
                tracing::warn!(op = op.name(), %err, "operation rejected");
                ProcessStats { applied: 0, failed: 1 }
            }
        };
        self.totals += stats;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_world;
    use railworld_index::IndexConfig;

    fn setup(capacity: usize) -> (OperationSender, OperationProcessor) {
        let world = World::new(IndexConfig {
            max_scale: 8,
            min_scale: 2,
        })
        .unwrap();
        let config = ServiceConfig {
            queue_capacity: capacity,
            ..ServiceConfig::default()
        };
        operation_queue(shared_world(world), &config)
    }

    fn spawn_node(x: f64, y: f64) -> Operation {
        Operation::Spawn {
            kind: EntityKind::RailNode,
            owner: OwnerId(1),
            shape: Shape::Point(Point::new(x, y)),
        }
    }

    #[test]
    fn drain_applies_in_order() {
        let (tx, mut processor) = setup(8);
        assert!(tx.submit(spawn_node(10.0, 10.0)));
        assert!(tx.submit(spawn_node(-10.0, 10.0)));
        assert_eq!(tx.pending(), 2);

        let stats = processor.drain();
        assert_eq!(stats, ProcessStats { applied: 2, failed: 0 });
        assert_eq!(tx.pending(), 0);
        assert_eq!(processor.world.read().entity_count(), 2);
        assert_eq!(processor.timer().count(), 2);
    }

    #[test]
    fn full_queue_drops_submissions() {
        let (tx, mut processor) = setup(2);
        assert!(tx.submit(spawn_node(1.0, 1.0)));
        assert!(tx.submit(spawn_node(2.0, 2.0)));
        assert!(!tx.submit(spawn_node(3.0, 3.0)));

        assert_eq!(processor.drain().applied, 2);
        assert!(tx.submit(spawn_node(3.0, 3.0)));
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let (tx, mut processor) = setup(8);
        tx.submit(Operation::Despawn { id: EntityId::new() });
        tx.submit(spawn_node(1000.0, 0.0));
        tx.submit(spawn_node(5.0, 5.0));

        let stats = processor.drain();
        assert_eq!(stats, ProcessStats { applied: 1, failed: 2 });
        assert_eq!(processor.totals().total(), 3);
    }

    #[test]
    fn move_and_despawn_update_index() {
        let (tx, mut processor) = setup(8);
        tx.submit(spawn_node(10.0, 10.0));
        processor.drain();
        let id = *processor.world.read().entities().keys().next().unwrap();

        tx.submit(Operation::Move {
            id,
            to: Point::new(-50.0, -50.0),
        });
        processor.drain();
        {
            let world = processor.world.read();
            let chunk = world.find_chunk(id, 7).unwrap();
            assert_eq!(chunk.member(id).unwrap().point, Point::new(-50.0, -50.0));
        }

        tx.submit(Operation::Despawn { id });
        processor.drain();
        let world = processor.world.read();
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.index().cluster_count(), 1);
    }

    #[test]
    fn submit_after_processor_dropped_fails() {
        let (tx, processor) = setup(4);
        drop(processor);
        assert!(!tx.submit(spawn_node(1.0, 1.0)));
    }

    #[test]
    fn run_stops_and_drains() {
        let (tx, processor) = setup(16);
        for i in 0..5 {
            tx.submit(spawn_node(i as f64, 0.0));
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::spawn(move || processor.run(stop_rx));
        stop_tx.send(()).unwrap();
        let processor = handle.join().unwrap();

        assert_eq!(processor.totals().applied, 5);
        assert_eq!(processor.world.read().entity_count(), 5);
    }
}
