//! The N-way rendezvous that coordinates every engine attached to one
//! transport: all engines queue their action for the tick, wait at the write
//! barrier while the last arrival flushes the batch, then wait at the read
//! barrier while the last arrival refreshes and publishes one shared sensor
//! snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::BarrierConfig;
use crate::error::EngineError;
use crate::transport::{CommandKind, Snapshot, Transport};

struct Phase {
    mutex: Mutex<PhaseState>,
    condvar: Condvar,
}

struct PhaseState {
    arrived: usize,
    generation: u64,
}

impl Phase {
    fn new() -> Phase {
        Phase {
            mutex: Mutex::new(PhaseState {
                arrived: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until every one of `n` participants has called `wait` for the
    /// current generation, running `action` exactly once, on whichever
    /// thread happens to be the last to arrive.
    fn wait(&self, n: usize, timeout: Duration, action: impl FnOnce()) -> bool {
        let mut state = self.mutex.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == n {
            action();
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.condvar.notify_all();
            return true;
        }
        let result = self
            .condvar
            .wait_while_for(&mut state, |s| s.generation == generation, timeout);
        !result.timed_out()
    }
}

/// A pending command: one engine's enqueued variable change for this tick.
#[derive(Clone, Debug)]
struct QueuedCommand {
    device: String,
    kind: CommandKind,
    values: Vec<(String, f64)>,
}

struct ActionQueue {
    commands: Mutex<Vec<QueuedCommand>>,
}

pub struct SyncBarrier {
    n: usize,
    config: BarrierConfig,
    transport: Arc<dyn Transport>,
    write_phase: Phase,
    read_phase: Phase,
    queue: ActionQueue,
    devices: Vec<String>,
    last_snapshot: Mutex<HashMap<String, (Snapshot, bool)>>,
    stop: AtomicBool,
}

impl SyncBarrier {
    #[must_use]
    pub fn new(n: usize, devices: Vec<String>, transport: Arc<dyn Transport>, config: BarrierConfig) -> SyncBarrier {
        SyncBarrier {
            n,
            config,
            transport,
            write_phase: Phase::new(),
            read_phase: Phase::new(),
            queue: ActionQueue {
                commands: Mutex::new(Vec::new()),
            },
            devices,
            last_snapshot: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Enqueue an action for this tick; non-blocking, FIFO per device.
    pub fn enqueue(&self, device: &str, kind: CommandKind, values: Vec<(String, f64)>) {
        self.queue.commands.lock().push(QueuedCommand {
            device: device.to_string(),
            kind,
            values,
        });
    }

    /// Wait for every engine to have enqueued its action, then flush the
    /// batch (grouped by device, one message per device) exactly once.
    /// Returns `false` on timeout, meaning a sibling engine likely stopped
    /// mid-tick; callers should check `stop_requested` and exit.
    pub fn write_barrier(&self) -> bool {
        let timeout = Duration::from_millis(self.config.barrier_timeout_ms);
        self.write_phase.wait(self.n, timeout, || self.flush_writes())
    }

    fn flush_writes(&self) {
        let mut commands = self.queue.commands.lock();
        let mut by_device: HashMap<String, Vec<(CommandKind, Vec<(String, f64)>)>> = HashMap::new();
        for command in commands.drain(..) {
            by_device
                .entry(command.device)
                .or_default()
                .push((command.kind, command.values));
        }
        for (device, batch) in by_device {
            for (kind, values) in batch {
                self.transport.enter_command(&device, kind, &values);
            }
        }
        if let Err(err) = self.transport.send_commands() {
            log::warn!("transport send_commands failed: {err}");
        }
    }

    /// Wait for every engine to reach the read point, then refresh and
    /// publish one shared snapshot. Returns the snapshot for `devices` along
    /// with freshness flags once all engines have crossed.
    pub fn read_barrier(&self, devices: &[String]) -> bool {
        let timeout = Duration::from_millis(
            (self.config.sample_interval_ms).max(100),
        );
        let devices_owned = devices.to_vec();
        let transport = Arc::clone(&self.transport);
        let slot = &self.last_snapshot;
        self.read_phase.wait(self.n, timeout, || {
            if let Err(err) = transport.update_input_states(&devices_owned) {
                log::warn!("transport update_input_states failed: {err}");
            }
            match transport.get_input_states(&devices_owned, timeout) {
                Ok(states) => *slot.lock() = states,
                Err(err) => log::warn!("transport get_input_states failed: {err}"),
            }
        })
    }

    #[must_use]
    pub fn last_snapshot(&self) -> HashMap<String, (Snapshot, bool)> {
        self.last_snapshot.lock().clone()
    }

    #[must_use]
    pub fn devices(&self) -> &[String] {
        &self.devices
    }
}

/// Surfaces a stale read as a typed error for callers that want to treat it
/// as a recoverable condition rather than inspecting the freshness flag
/// themselves.
pub fn require_fresh(device: &str, fresh: bool) -> Result<(), EngineError> {
    if fresh {
        Ok(())
    } else {
        Err(EngineError::StaleSample {
            device: device.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{Phase, SyncBarrier};
    use crate::config::BarrierConfig;
    use crate::error::EngineError;
    use crate::transport::{CommandKind, Snapshot, Transport};

    struct CountingTransport {
        sends: AtomicUsize,
        refreshes: AtomicUsize,
    }

    impl Transport for CountingTransport {
        fn enter_command(&self, _device: &str, _kind: CommandKind, _values: &[(String, f64)]) {}

        fn send_commands(&self) -> Result<(), EngineError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn update_input_states(&self, _devices: &[String]) -> Result<(), EngineError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_input_states(
            &self,
            devices: &[String],
            _timeout: Duration,
        ) -> Result<HashMap<String, (Snapshot, bool)>, EngineError> {
            Ok(devices
                .iter()
                .map(|d| (d.clone(), (Snapshot::default(), true)))
                .collect())
        }

        fn device_names(&self) -> Vec<String> {
            vec!["dev".to_string()]
        }
    }

    #[test]
    fn phase_action_runs_exactly_once_across_n_threads() {
        let phase = Arc::new(Phase::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let n = 4;
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let phase = Arc::clone(&phase);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    phase.wait(n, Duration::from_secs(2), || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_barrier_flushes_exactly_once_per_cycle() {
        let transport = Arc::new(CountingTransport {
            sends: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        });
        let barrier = Arc::new(SyncBarrier::new(
            3,
            vec!["dev".to_string()],
            transport.clone(),
            BarrierConfig::default(),
        ));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.write_barrier();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }
}
