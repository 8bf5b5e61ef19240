use serde::{Deserialize, Serialize};

use crate::quantities::Float;

/// Which signal drives `exploring_rate` adaptation when
/// [`EngineConfig::adapt_exploring_rate`] is set. Resolves the open question
/// of what `L` means in the interpolation: the maximum scored candidate
/// (matching what gets logged each tick), the action actually chosen, or the
/// realized reward observed on the following tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdaptExploringRateSource {
    MaxCandidate,
    Chosen,
    RealizedReward,
}

impl Default for AdaptExploringRateSource {
    fn default() -> Self {
        AdaptExploringRateSource::MaxCandidate
    }
}

/// Tunables for a single leaf of the expert tree. `split_quality_thres` is
/// not configurable here: the root starts at `-inf` (its first split always
/// clears) and every other leaf inherits `split_quality * split_quality_decay`
/// from the split that created it.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExpertConfig {
    pub split_thres: usize,
    pub split_thres_growth_rate: Float,
    pub split_quality_decay: Float,
    pub split_lock_count_thres: u32,
    pub mean_error_thres: Float,
    pub reward_smoothing: usize,
    pub kga_delta: usize,
    pub kga_tau: usize,
    pub max_training_data_num: usize,
}

impl Default for ExpertConfig {
    fn default() -> Self {
        ExpertConfig {
            split_thres: 50,
            split_thres_growth_rate: 1.5,
            split_quality_decay: 0.9,
            split_lock_count_thres: 20,
            mean_error_thres: 0.05,
            reward_smoothing: 20,
            kga_delta: 10,
            kga_tau: 10,
            max_training_data_num: 2000,
        }
    }
}

/// Tunables for a single [`crate::engine::CblaEngine`].
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub sim_duration: Option<u64>,
    pub loop_delay_ms: u64,
    pub exploring_rate: Float,
    pub adapt_exploring_rate: bool,
    pub adapt_exploring_rate_source: AdaptExploringRateSource,
    pub num_candidate_actions: usize,
    pub snapshot_period: u64,
    pub expert: ExpertConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sim_duration: None,
            loop_delay_ms: 50,
            exploring_rate: 0.25,
            adapt_exploring_rate: true,
            adapt_exploring_rate_source: AdaptExploringRateSource::default(),
            num_candidate_actions: 10,
            snapshot_period: 200,
            expert: ExpertConfig::default(),
        }
    }
}

/// Tunables for the barrier shared by all engines attached to one transport.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BarrierConfig {
    pub sample_interval_ms: u64,
    pub sample_period_ms: u64,
    pub barrier_timeout_ms: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        BarrierConfig {
            sample_interval_ms: 100,
            sample_period_ms: 100,
            barrier_timeout_ms: 1000,
        }
    }
}
