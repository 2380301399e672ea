use crossbeam_channel::Sender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{ExecTimer, ServiceConfig, ServiceError, SharedWorld};

/// Advances the shared world at a fixed interval on its own thread.
pub struct TickLoop {
    stop: Sender<()>,
    handle: JoinHandle<ExecTimer>,
}

impl TickLoop {
    pub fn start(world: SharedWorld, config: &ServiceConfig) -> Result<Self, ServiceError> {
        let interval = config.tick_interval();
        let slow = config.slow_op_threshold();
        let retention = config.event_retention;
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("railworld-tick".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                let mut timer = ExecTimer::default();
                tracing::debug!(interval_ms = interval.as_millis() as u64, "tick loop started");
                loop {
                    crossbeam_channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let start = Instant::now();
                            let (tick, dropped) = {
                                let mut world = world.write();
                                world.step();
                                (world.tick(), world.trim_events(retention))
                            };
                            if dropped > 0 {
                                tracing::trace!(tick, dropped, "trimmed event log");
                            }
                            let dt = start.elapsed();
                            timer.record(dt);
                            if dt > slow {
                                tracing::warn!(tick, ms = dt.as_millis() as u64, "slow tick");
                            }
                        }
                    }
                }
                tracing::debug!(ticks = timer.count(), "tick loop stopped");
                timer
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop the loop and return its timings.
    pub fn stop(self) -> Result<ExecTimer, ServiceError> {
        let _ = self.stop.send(());
        self.handle
            .join()
            .map_err(|_| ServiceError::ThreadPanicked("tick"))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Block until `world` reaches `tick`, polling every millisecond. False if
/// `timeout` passes first.
pub fn wait_for_tick(world: &SharedWorld, tick: u64, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if world.read().tick() >= tick {
            return true;
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_world;
    use railworld_index::IndexConfig;
    use railworld_kernel::{World, WorldEvent};

    #[test]
    fn ticks_advance_world() {
        let world = shared_world(World::with_seed(IndexConfig::default(), 9).unwrap());
        let config = ServiceConfig {
            tick_interval_ms: 1,
            ..ServiceConfig::default()
        };

        let ticker = TickLoop::start(world.clone(), &config).unwrap();
        assert!(wait_for_tick(&world, 3, Duration::from_secs(5)));
        let timer = ticker.stop().unwrap();

        let w = world.read();
        assert!(w.tick() >= 3);
        assert_ne!(w.seed(), 9);
        assert_eq!(timer.count() as u64, w.tick().min(64));
    }

    #[test]
    fn stop_before_first_tick() {
        let world = shared_world(World::new(IndexConfig::default()).unwrap());
        let config = ServiceConfig {
            tick_interval_ms: 60_000,
            ..ServiceConfig::default()
        };

        let ticker = TickLoop::start(world.clone(), &config).unwrap();
        let timer = ticker.stop().unwrap();
        assert_eq!(timer.count(), 0);
        assert_eq!(world.read().tick(), 0);
    }

    #[test]
    fn event_log_stays_within_retention() {
        let world = shared_world(World::new(IndexConfig::default()).unwrap());
        let config = ServiceConfig {
            tick_interval_ms: 1,
            event_retention: 4,
            ..ServiceConfig::default()
        };

        let ticker = TickLoop::start(world.clone(), &config).unwrap();
        assert!(wait_for_tick(&world, 12, Duration::from_secs(5)));
        ticker.stop().unwrap();

        let w = world.read();
        assert!(w.tick() >= 12);
        assert_eq!(w.events().len(), 4);
        match w.events().last() {
            Some(WorldEvent::Stepped { tick, .. }) => assert_eq!(*tick, w.tick()),
            other => panic!("unexpected last event {other:?}"),
        }
    }

    #[test]
    fn wait_gives_up_after_timeout() {
        let world = shared_world(World::new(IndexConfig::default()).unwrap());
        let start = Instant::now();
        assert!(!wait_for_tick(&world, 1, Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(wait_for_tick(&world, 0, Duration::ZERO));
    }
}
