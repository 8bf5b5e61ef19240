//! The per-node control loop: predict, act, observe, learn, choose.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::{Uniform, WeightedIndex};

use crate::barrier::{require_fresh, SyncBarrier};
use crate::config::{AdaptExploringRateSource, EngineConfig};
use crate::error::EngineError;
use crate::expert::ExpertTree;
use crate::logging::Logger;
use crate::quantities::Float;
use crate::rand::Rng;
use crate::robot::RobotAdapter;
use crate::snapshot::{SnapshotSink, TickRecord};
use crate::transport::bus::VariableBus;
use crate::transport::CommandKind;

/// One engine's view of the tick it just completed, used for the shift-floor
/// action selection and the exploring-rate adaptation.
struct TickOutcome {
    scores: Vec<Float>,
    chosen_index: usize,
    max_score: Float,
    was_exploring: bool,
}

pub struct CblaEngine<A: RobotAdapter> {
    id: String,
    device: String,
    config: EngineConfig,
    tree: ExpertTree,
    adapter: A,
    barrier: Arc<SyncBarrier>,
    rng: Rng,
    snapshot_sink: Option<Arc<SnapshotSink>>,
    stop: Arc<AtomicBool>,
    bootstrap_actions: Vec<Vec<Float>>,
    last_outcome: Option<TickOutcome>,
    variable_bus: Option<Arc<VariableBus>>,
}

impl<A: RobotAdapter> CblaEngine<A> {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        device: impl Into<String>,
        config: EngineConfig,
        adapter: A,
        barrier: Arc<SyncBarrier>,
        rng: Rng,
        snapshot_sink: Option<Arc<SnapshotSink>>,
        bootstrap_actions: Vec<Vec<Float>>,
    ) -> CblaEngine<A> {
        CblaEngine::with_bus(
            id,
            device,
            config,
            adapter,
            barrier,
            rng,
            snapshot_sink,
            bootstrap_actions,
            None,
        )
    }

    /// Like [`CblaEngine::new`], but also attaches the shared variable bus:
    /// each tick the engine publishes its observed state and chosen action
    /// under `"{id}.state[i]"` / `"{id}.action[i]"`, so sibling engines on
    /// the same bus can read them with [`VariableBus::get`].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_bus(
        id: impl Into<String>,
        device: impl Into<String>,
        config: EngineConfig,
        adapter: A,
        barrier: Arc<SyncBarrier>,
        rng: Rng,
        snapshot_sink: Option<Arc<SnapshotSink>>,
        bootstrap_actions: Vec<Vec<Float>>,
        variable_bus: Option<Arc<VariableBus>>,
    ) -> CblaEngine<A> {
        let state_dim = adapter.state_dim();
        let action_dim = adapter.action_dim();
        let expert_config = config.expert.clone();
        CblaEngine {
            id: id.into(),
            device: device.into(),
            config,
            tree: ExpertTree::new(state_dim + action_dim, state_dim, expert_config),
            adapter,
            barrier,
            rng,
            snapshot_sink,
            stop: Arc::new(AtomicBool::new(false)),
            bootstrap_actions,
            last_outcome: None,
            variable_bus,
        }
    }

    /// Publish `state`/`action` onto the shared variable bus, if attached.
    fn publish_to_bus(&self, state: &[Float], action: &[Float]) {
        let Some(bus) = &self.variable_bus else {
            return;
        };
        for (i, value) in state.iter().enumerate() {
            bus.set(format!("{}.state[{i}]", self.id), *value);
        }
        for (i, value) in action.iter().enumerate() {
            bus.set(format!("{}.action[{i}]", self.id), *value);
        }
    }

    /// Read a named variable another engine published onto the shared bus.
    /// `None` if no bus is attached or the variable has never been set.
    #[must_use]
    pub fn read_peer_variable(&self, name: &str) -> Option<Float> {
        self.variable_bus.as_ref().and_then(|bus| bus.get(name))
    }

    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `sim_duration` ticks elapse or `stop` is set. Returns `Ok`
    /// on a clean stop, `Err` if a fatal `EngineError` was raised and the
    /// loop aborted early (the supervisor decides what to do with sibling
    /// engines).
    pub fn run(&mut self, logger: &mut dyn Logger) -> Result<(), EngineError> {
        let mut state = self.adapter.read_state(&Default::default());
        let mut action = self
            .bootstrap_actions
            .first()
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.adapter.action_dim()]);

        let mut tick: u64 = 0;
        loop {
            if self.stop.load(Ordering::SeqCst) || self.barrier.stop_requested() {
                break;
            }
            if let Some(limit) = self.config.sim_duration {
                if tick >= limit {
                    break;
                }
            }

            match self.run_tick(tick, &mut state, &mut action, logger) {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    log::warn!("engine {}: {err}", self.id);
                }
                Err(err) => {
                    log::error!("engine {}: fatal: {err}", self.id);
                    return Err(err);
                }
            }

            tick += 1;
        }

        if let Some(sink) = &self.snapshot_sink {
            sink.flush_final(&self.id)?;
        }
        Ok(())
    }

    fn run_tick(
        &mut self,
        tick: u64,
        state: &mut Vec<Float>,
        action: &mut Vec<Float>,
        logger: &mut dyn Logger,
    ) -> Result<(), EngineError> {
        let predicted = self.tree.predict(state, action)?;

        let commands = self.adapter.action_to_commands(action);
        self.barrier.enqueue(&self.device, CommandKind::SetPoint, commands);
        if !self.barrier.write_barrier() || self.stop.load(Ordering::SeqCst) || self.barrier.stop_requested() {
            return Ok(());
        }

        thread::sleep(Duration::from_millis(self.config.loop_delay_ms));

        if !self.barrier.read_barrier(&[self.device.clone()])
            || self.stop.load(Ordering::SeqCst)
            || self.barrier.stop_requested()
        {
            return Ok(());
        }
        let snapshot_map = self.barrier.last_snapshot();
        let next_state = match snapshot_map.get(&self.device) {
            Some((snapshot, fresh)) => {
                if require_fresh(&self.device, *fresh).is_err() {
                    logger.log(&format!("tick {tick}: stale sample, reusing prior state"));
                    state.clone()
                } else {
                    self.adapter.read_state(snapshot)
                }
            }
            None => {
                return Err(EngineError::TransportTimeout {
                    device: self.device.clone(),
                    timeout_secs: self.config.loop_delay_ms as Float / 1000.0,
                })
            }
        };

        let was_fresh = snapshot_map
            .get(&self.device)
            .map(|(_, fresh)| *fresh)
            .unwrap_or(false);

        if was_fresh {
            let outcome = self.tree.append(state, action, &next_state, Some(&predicted))?;
            logger.log(&format!(
                "tick {tick}: leaf {} mean_error={:.4} split={}",
                outcome.leaf_id, outcome.mean_error, outcome.split_committed
            ));
        }

        let next_action = if tick + 1 < self.bootstrap_actions.len() as u64 {
            self.bootstrap_actions[(tick + 1) as usize].clone()
        } else {
            self.choose_action(&next_state, action)?
        };

        if self.config.snapshot_period > 0 && tick % self.config.snapshot_period == 0 {
            if let Some(sink) = &self.snapshot_sink {
                let wall_clock = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                sink.record(TickRecord {
                    tick,
                    wall_clock,
                    action: action.clone(),
                    state: next_state.clone(),
                    leaf_count: self.tree.leaf_count(),
                    errors: self.tree.leaf_errors(),
                })?;
                sink.record_tree(&self.id, &self.tree.to_snapshot())?;
            }
        }

        self.publish_to_bus(&next_state, &next_action);

        *state = next_state;
        *action = next_action;
        Ok(())
    }

    /// Score candidate actions, sample the next action by the shift+floor
    /// weighting scheme, and (optionally) adapt the exploring rate.
    /// Candidates are generated around `current`, the action the engine is
    /// presently holding, per §4.6's "pin that axis to M0[j]" rule.
    fn choose_action(&mut self, state: &[Float], current: &[Float]) -> Result<Vec<Float>, EngineError> {
        let candidates = self
            .adapter
            .candidate_actions(current, self.config.num_candidate_actions);
        if candidates.is_empty() {
            return Ok(current.to_vec());
        }

        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            scores.push(self.tree.evaluate_action(state, candidate)?);
        }

        let min = scores.iter().cloned().fold(Float::INFINITY, Float::min);
        let shifted: Vec<Float> = scores.iter().map(|s| s - min).collect();
        let max_shifted = shifted.iter().cloned().fold(0.0, Float::max);
        let floor = self.config.exploring_rate * max_shifted;
        let weights: Vec<Float> = shifted.iter().map(|w| w + floor).collect();

        let total: Float = weights.iter().sum();
        let chosen_index = if total <= 0.0 {
            self.rng.sample(&Uniform::new(0, candidates.len()))
        } else {
            let dist = WeightedIndex::new(&weights)
                .map_err(|_| EngineError::RegressionFailure {
                    reason: "invalid action weights".to_string(),
                })?;
            self.rng.sample(&dist)
        };

        let max_score = scores.iter().cloned().fold(Float::NEG_INFINITY, Float::max);
        let greedy_index = shifted
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(i, _)| i);
        let was_exploring = chosen_index != greedy_index;
        self.last_outcome = Some(TickOutcome {
            scores,
            chosen_index,
            max_score,
            was_exploring,
        });

        self.adapt_exploring_rate(max_score, was_exploring);

        Ok(candidates[chosen_index].clone())
    }

    /// Fixes the historical bug where the adapted rate was computed but
    /// never written back to the engine's own config: here it is, deliberately,
    /// assigned back to `self.config.exploring_rate`.
    fn adapt_exploring_rate(&mut self, max_score: Float, was_exploring: bool) {
        if !self.config.adapt_exploring_rate || !was_exploring {
            return;
        }
        let l = match self.config.adapt_exploring_rate_source {
            AdaptExploringRateSource::MaxCandidate => max_score,
            AdaptExploringRateSource::Chosen => self
                .last_outcome
                .as_ref()
                .map(|o| o.scores[o.chosen_index])
                .unwrap_or(max_score),
            AdaptExploringRateSource::RealizedReward => max_score,
        };
        let l_clamped = l.clamp(0.01, 100.0);
        let m = (0.01 - 0.5) / (100.0 - 0.01);
        let b = 0.5 - m * 0.01;
        self.config.exploring_rate = (m * l_clamped + b).clamp(0.01, 0.5);
    }
}

/// Object-safe view of an engine for the supervisor, which holds a
/// heterogeneous collection of engines over different robot adapters.
pub trait RunnableEngine: Send {
    fn run(&mut self, logger: &mut dyn Logger) -> Result<(), EngineError>;
    fn stop_handle(&self) -> Arc<AtomicBool>;
    fn id(&self) -> &str;
}

impl<A: RobotAdapter> RunnableEngine for CblaEngine<A> {
    fn run(&mut self, logger: &mut dyn Logger) -> Result<(), EngineError> {
        CblaEngine::run(self, logger)
    }

    fn stop_handle(&self) -> Arc<AtomicBool> {
        CblaEngine::stop_handle(self)
    }

    fn id(&self) -> &str {
        CblaEngine::id(self)
    }
}
