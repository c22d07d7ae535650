//! Engine configuration
//!
//! Chooses the detector, selection and placement strategies and carries the
//! tunables they need. Every field has a serde default so partial files and
//! environment overrides deserialize cleanly.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between control ticks and utilization samples
    #[serde(default = "default_scheduling_interval")]
    pub scheduling_interval: f64,

    /// Offset of sampling ticks from interval boundaries
    #[serde(default = "default_sample_offset")]
    pub sample_offset: f64,

    #[serde(default)]
    pub migration_level: MigrationLevel,

    #[serde(default)]
    pub overload: OverloadPolicy,

    #[serde(default)]
    pub underload: UnderloadConfig,

    #[serde(default)]
    pub selection: SelectionPolicyKind,

    #[serde(default)]
    pub placement: PlacementPolicyKind,

    #[serde(default)]
    pub reinforcement: ReinforcementConfig,

    /// Seed for every random choice the engine makes
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Drain underloaded hosts after handling overloaded ones
    #[serde(default = "default_true")]
    pub consolidate_underloaded: bool,

    /// Roll back pending migrations whose target is overloaded at a later tick
    #[serde(default)]
    pub cancel_overloaded_targets: bool,
}

fn default_scheduling_interval() -> f64 {
    300.0
}

fn default_sample_offset() -> f64 {
    crate::cluster::DEFAULT_SAMPLE_OFFSET
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling_interval: default_scheduling_interval(),
            sample_offset: default_sample_offset(),
            migration_level: MigrationLevel::default(),
            overload: OverloadPolicy::default(),
            underload: UnderloadConfig::default(),
            selection: SelectionPolicyKind::default(),
            placement: PlacementPolicyKind::default(),
            reinforcement: ReinforcementConfig::default(),
            seed: default_seed(),
            consolidate_underloaded: true,
            cancel_overloaded_targets: false,
        }
    }
}

impl EngineConfig {
    pub fn with_overload(mut self, overload: OverloadPolicy) -> Self {
        self.overload = overload;
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicyKind) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_placement(mut self, placement: PlacementPolicyKind) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sample_offset(mut self, offset: f64) -> Self {
        self.sample_offset = offset;
        self
    }

    pub fn with_migration_level(mut self, level: MigrationLevel) -> Self {
        self.migration_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scheduling_interval > 0.0) {
            return Err(EngineError::Config(format!(
                "scheduling_interval must be positive, got {}",
                self.scheduling_interval
            )));
        }
        self.overload.validate()?;
        self.underload.validate()?;
        self.selection.validate()?;
        self.reinforcement.validate()
    }
}

/// Which layer migrates: whole VMs between hosts, or containers between VMs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationLevel {
    #[default]
    Vm,
    Container,
}

/// Overload detection strategy. Statistical strategies name the detector
/// they delegate to when the history is too short or degenerate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverloadPolicy {
    Never,
    StaticThreshold {
        threshold: f64,
    },
    MedianAbsoluteDeviation {
        safety: f64,
        fallback: Box<OverloadPolicy>,
    },
    InterQuartileRange {
        safety: f64,
        fallback: Box<OverloadPolicy>,
    },
    LocalRegression {
        safety: f64,
        fallback: Box<OverloadPolicy>,
    },
    LocalRegressionRobust {
        safety: f64,
        fallback: Box<OverloadPolicy>,
    },
}

impl Default for OverloadPolicy {
    fn default() -> Self {
        OverloadPolicy::StaticThreshold { threshold: 0.8 }
    }
}

impl OverloadPolicy {
    fn validate(&self) -> Result<()> {
        match self {
            OverloadPolicy::Never => Ok(()),
            OverloadPolicy::StaticThreshold { threshold } => {
                if *threshold > 0.0 && *threshold <= 1.0 {
                    Ok(())
                } else {
                    Err(EngineError::Config(format!(
                        "overload threshold must be in (0, 1], got {}",
                        threshold
                    )))
                }
            }
            OverloadPolicy::MedianAbsoluteDeviation { safety, fallback }
            | OverloadPolicy::InterQuartileRange { safety, fallback }
            | OverloadPolicy::LocalRegression { safety, fallback }
            | OverloadPolicy::LocalRegressionRobust { safety, fallback } => {
                if *safety < 0.0 || safety.is_nan() {
                    return Err(EngineError::Config(format!(
                        "safety parameter cannot be negative, got {}",
                        safety
                    )));
                }
                fallback.validate()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderloadStrategy {
    /// Least utilized qualifying host
    #[default]
    MinimumUtilization,
    /// Qualifying host with the highest power draw per resident guest
    MaxPowerPerGuest,
    /// First qualifying host in id order
    FirstFound,
}

/// Utilization below which an active host counts as underloaded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LowerThreshold {
    Static { value: f64 },
    /// `base − safety × IQR(host history)`, clamped at zero; `base` while
    /// the history is too short
    Iqr { base: f64, safety: f64 },
}

impl Default for LowerThreshold {
    fn default() -> Self {
        LowerThreshold::Static { value: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnderloadConfig {
    #[serde(default)]
    pub strategy: UnderloadStrategy,
    #[serde(default)]
    pub lower_threshold: LowerThreshold,
}

impl UnderloadConfig {
    fn validate(&self) -> Result<()> {
        match self.lower_threshold {
            LowerThreshold::Static { value } if !(0.0..=1.0).contains(&value) => Err(
                EngineError::Config(format!("lower threshold must be in [0, 1], got {}", value)),
            ),
            LowerThreshold::Iqr { base, safety } if !(0.0..=1.0).contains(&base) || safety < 0.0 => {
                Err(EngineError::Config(format!(
                    "invalid IQR lower threshold: base {}, safety {}",
                    base, safety
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Guest selection strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionPolicyKind {
    #[default]
    MinimumMigrationTime,
    Random,
    MaximumCorrelation {
        fallback: Box<SelectionPolicyKind>,
    },
    MaximumCorrelationWithHost {
        fallback: Box<SelectionPolicyKind>,
    },
    GrowthPotentialAware,
    GrowthPotentialAwareMmt,
    ReinforcementLearning,
}

impl SelectionPolicyKind {
    fn validate(&self) -> Result<()> {
        match self {
            SelectionPolicyKind::MaximumCorrelation { fallback }
            | SelectionPolicyKind::MaximumCorrelationWithHost { fallback } => {
                if matches!(**fallback, SelectionPolicyKind::ReinforcementLearning) {
                    return Err(EngineError::Config(
                        "reinforcement learning cannot serve as a fallback selection".to_string(),
                    ));
                }
                fallback.validate()
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicyKind {
    #[default]
    MinimumPowerIncrease,
    MinimumBusyPes,
    LowestPredictedUtilization,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningAlgorithm {
    #[default]
    QLearning,
    Sarsa,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationPolicy {
    #[default]
    EpsilonGreedy,
    Softmax,
}

/// Tunables of the Q-table driven selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementConfig {
    #[serde(default)]
    pub algorithm: LearningAlgorithm,

    #[serde(default)]
    pub exploration: ExplorationPolicy,

    /// Chance of an exploratory pick, on a 0-100 scale
    #[serde(default = "default_random_action_value")]
    pub random_action_value: f64,

    #[serde(default = "default_alpha")]
    pub alpha: f64,

    #[serde(default = "default_gamma")]
    pub gamma: f64,

    #[serde(default = "default_state_count")]
    pub state_count: usize,

    #[serde(default = "default_action_count")]
    pub action_count: usize,

    #[serde(default = "default_reward_offset")]
    pub reward_offset: f64,

    #[serde(default = "default_reward_scale")]
    pub reward_scale: f64,
}

fn default_random_action_value() -> f64 {
    10.0
}

fn default_alpha() -> f64 {
    0.1
}

fn default_gamma() -> f64 {
    0.9
}

fn default_state_count() -> usize {
    200
}

fn default_action_count() -> usize {
    101
}

fn default_reward_offset() -> f64 {
    10.0
}

fn default_reward_scale() -> f64 {
    2.0
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            algorithm: LearningAlgorithm::default(),
            exploration: ExplorationPolicy::default(),
            random_action_value: default_random_action_value(),
            alpha: default_alpha(),
            gamma: default_gamma(),
            state_count: default_state_count(),
            action_count: default_action_count(),
            reward_offset: default_reward_offset(),
            reward_scale: default_reward_scale(),
        }
    }
}

impl ReinforcementConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.random_action_value) {
            return Err(EngineError::Config(format!(
                "random_action_value must be in [0, 100], got {}",
                self.random_action_value
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) || !(0.0..=1.0).contains(&self.gamma) {
            return Err(EngineError::Config(format!(
                "alpha and gamma must be in [0, 1], got {} and {}",
                self.alpha, self.gamma
            )));
        }
        if self.state_count == 0 || self.action_count == 0 {
            return Err(EngineError::Config(
                "q-table dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
