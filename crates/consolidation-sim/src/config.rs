//! Run configuration
//!
//! Loaded from an optional JSON/TOML/YAML file, then overridden by
//! `CONSOLIDATION_*` environment variables (`__` separates nested keys, e.g.
//! `CONSOLIDATION_ENGINE__SEED=7`).

use anyhow::{bail, Context, Result};
use consolidation_lib::power::{LinearPowerModel, PowerModel, SpecPowerModel, SqrtPowerModel};
use consolidation_lib::{EngineConfig, GuestSpec, HostSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Power curve of a host type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerProfile {
    Linear { max_power: f64, static_share: f64 },
    Sqrt { max_power: f64, static_share: f64 },
    HpProliantMl110G4,
    HpProliantMl110G5,
}

impl PowerProfile {
    pub fn build(&self) -> Arc<dyn PowerModel> {
        match self {
            PowerProfile::Linear { max_power, static_share } => {
                Arc::new(LinearPowerModel::new(*max_power, *static_share))
            }
            PowerProfile::Sqrt { max_power, static_share } => Arc::new(SqrtPowerModel::new(*max_power, *static_share)),
            PowerProfile::HpProliantMl110G4 => Arc::new(SpecPowerModel::hp_proliant_g4()),
            PowerProfile::HpProliantMl110G5 => Arc::new(SpecPowerModel::hp_proliant_g5()),
        }
    }
}

/// `count` identical hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGroup {
    pub count: usize,
    pub spec: HostSpec,
    pub power: PowerProfile,
}

/// `count` identical VMs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmGroup {
    pub count: usize,
    pub spec: GuestSpec,
}

/// Synthetic demand traces: each VM gets a base level drawn uniformly from
/// `[min_base, max_base)` plus Gaussian noise per sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default = "default_min_base")]
    pub min_base: f64,

    #[serde(default = "default_max_base")]
    pub max_base: f64,

    #[serde(default = "default_noise")]
    pub noise_std_dev: f64,

    /// Seconds between trace samples
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,
}

fn default_min_base() -> f64 {
    0.1
}

fn default_max_base() -> f64 {
    0.7
}

fn default_noise() -> f64 {
    0.1
}

fn default_sample_interval() -> f64 {
    300.0
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            min_base: default_min_base(),
            max_base: default_max_base(),
            noise_std_dev: default_noise(),
            sample_interval: default_sample_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Simulated seconds to run
    #[serde(default = "default_duration")]
    pub duration: f64,

    #[serde(default = "default_hosts")]
    pub hosts: Vec<HostGroup>,

    #[serde(default = "default_vms")]
    pub vms: Vec<VmGroup>,

    #[serde(default)]
    pub trace: TraceConfig,
}

fn default_duration() -> f64 {
    86_400.0
}

fn host_spec(mips_per_pe: f64) -> HostSpec {
    HostSpec {
        pe_count: 2,
        mips_per_pe,
        ram: 4096.0,
        bw: 1_000_000.0,
        storage: 1_000_000.0,
    }
}

fn default_hosts() -> Vec<HostGroup> {
    vec![
        HostGroup {
            count: 25,
            spec: host_spec(1860.0),
            power: PowerProfile::HpProliantMl110G4,
        },
        HostGroup {
            count: 25,
            spec: host_spec(2660.0),
            power: PowerProfile::HpProliantMl110G5,
        },
    ]
}

fn vm_spec(mips: f64, ram: f64) -> GuestSpec {
    GuestSpec {
        mips_per_core: mips,
        cores: 1,
        ram,
        bw: 100_000.0,
        size: 2500.0,
    }
}

fn default_vms() -> Vec<VmGroup> {
    [(2500.0, 870.0), (2000.0, 1740.0), (1000.0, 1740.0), (500.0, 613.0)]
        .into_iter()
        .map(|(mips, ram)| VmGroup {
            count: 20,
            spec: vm_spec(mips, ram),
        })
        .collect()
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            duration: default_duration(),
            hosts: default_hosts(),
            vms: default_vms(),
            trace: TraceConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("CONSOLIDATION").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        let config: SimConfig = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine configuration")?;
        if !(self.duration > 0.0) {
            bail!("duration must be positive, got {}", self.duration);
        }
        if self.hosts.iter().all(|g| g.count == 0) {
            bail!("at least one host is required");
        }
        if !(0.0..=1.0).contains(&self.trace.min_base) || self.trace.max_base < self.trace.min_base {
            bail!(
                "trace base range [{}, {}) is not within [0, 1]",
                self.trace.min_base,
                self.trace.max_base
            );
        }
        if self.trace.noise_std_dev < 0.0 || !(self.trace.sample_interval > 0.0) {
            bail!("trace noise must be non-negative and sample interval positive");
        }
        Ok(())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.iter().map(|g| g.count).sum()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.iter().map(|g| g.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consolidation_lib::config::SelectionPolicyKind;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimConfig::default();
        config.validate().unwrap();
        assert_eq!(config.host_count(), 50);
        assert_eq!(config.vm_count(), 80);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "duration": 3600,
                "engine": {{ "seed": 9, "selection": {{ "kind": "random" }} }},
                "hosts": [{{
                    "count": 3,
                    "spec": {{ "pe_count": 4, "mips_per_pe": 1000, "ram": 8192, "bw": 10000, "storage": 100000 }},
                    "power": {{ "kind": "linear", "max_power": 250, "static_share": 0.7 }}
                }}]
            }}"#
        )
        .unwrap();

        let config = SimConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.duration, 3600.0);
        assert_eq!(config.engine.seed, 9);
        assert_eq!(config.engine.selection, SelectionPolicyKind::Random);
        assert_eq!(config.host_count(), 3);
        assert_eq!(config.hosts[0].spec.pe_count, 4);
        // untouched sections keep their defaults
        assert_eq!(config.vm_count(), 80);
        assert_eq!(config.trace, TraceConfig::default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SimConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SimConfig::default();
        config.duration = 0.0;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.trace.max_base = 0.05;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.engine.scheduling_interval = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_power_profiles_build() {
        let linear = PowerProfile::Linear {
            max_power: 250.0,
            static_share: 0.7,
        };
        assert_eq!(linear.build().max_power(), 250.0);
        assert_eq!(PowerProfile::HpProliantMl110G5.build().max_power(), 135.0);
    }
}
