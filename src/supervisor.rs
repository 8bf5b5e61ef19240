//! Starts and stops a collection of engines sharing one transport, wires the
//! shared variable bus, and owns the snapshot sink's lifetime.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::engine::RunnableEngine;
use crate::logging::{Logger, PrintLogger};
use crate::transport::bus::VariableBus;

/// A single dead-or-alive record for one engine thread.
struct Worker {
    id: String,
    handle: JoinHandle<()>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

/// Owns the engine threads for one deployment. Each engine polls its own
/// stop flag plus the shared barrier's; a fatal error in one engine is
/// logged and that engine's thread exits, but siblings keep running.
pub struct Supervisor {
    workers: Vec<Worker>,
    bus: Arc<VariableBus>,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Supervisor {
        Supervisor {
            workers: Vec::new(),
            bus: Arc::new(VariableBus::new()),
        }
    }

    /// The variable bus every engine started by this supervisor shares.
    /// Hand this to each engine's constructor (`CblaEngine::with_bus`)
    /// before calling [`Supervisor::start`] so inter-node links are live
    /// from the first tick.
    #[must_use]
    pub fn variable_bus(&self) -> Arc<VariableBus> {
        Arc::clone(&self.bus)
    }

    /// Spawn one thread per engine. Each engine is moved into its thread; the
    /// supervisor retains only a join handle and a stop flag.
    pub fn start(&mut self, engines: Vec<Box<dyn RunnableEngine>>) {
        for mut engine in engines {
            let id = engine.id().to_string();
            let stop = engine.stop_handle();
            log::info!("starting engine {id}");
            let thread_id = id.clone();
            let handle = thread::spawn(move || {
                let mut logger = PrintLogger::new(thread_id.clone());
                match engine.run(&mut logger) {
                    Ok(()) => log::info!("engine {thread_id} stopped cleanly"),
                    Err(err) => log::error!("engine {thread_id} died: {err}"),
                }
            });
            self.workers.push(Worker { id, handle, stop });
        }
    }

    /// Signal every engine to stop and join all worker threads. Individual
    /// engines poll their stop flag at the top of each tick, so this returns
    /// once the slowest engine finishes its current tick.
    pub fn shutdown(self) {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
        for worker in self.workers {
            log::info!("joining engine {}", worker.id);
            let _ = worker.handle.join();
        }
    }

    #[must_use]
    pub fn engine_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::Supervisor;
    use crate::engine::RunnableEngine;
    use crate::error::EngineError;
    use crate::logging::Logger;

    struct ShortLivedEngine {
        id: String,
        stop: Arc<AtomicBool>,
    }

    impl RunnableEngine for ShortLivedEngine {
        fn run(&mut self, _logger: &mut dyn Logger) -> Result<(), EngineError> {
            while !self.stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }

        fn stop_handle(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.stop)
        }

        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn variable_bus_is_shared_across_calls() {
        let supervisor = Supervisor::new();
        let a = supervisor.variable_bus();
        let b = supervisor.variable_bus();
        a.set("x", 7.0);
        assert_eq!(b.get("x"), Some(7.0));
    }

    #[test]
    fn shutdown_joins_all_engines() {
        let mut supervisor = Supervisor::new();
        let engines: Vec<Box<dyn RunnableEngine>> = (0..4)
            .map(|i| {
                Box::new(ShortLivedEngine {
                    id: format!("engine-{i}"),
                    stop: Arc::new(AtomicBool::new(false)),
                }) as Box<dyn RunnableEngine>
            })
            .collect();
        supervisor.start(engines);
        assert_eq!(supervisor.engine_ids().len(), 4);
        supervisor.shutdown();
    }
}
