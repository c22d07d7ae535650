//! Host power models
//!
//! A power model maps CPU utilization in [0, 1] to watts. Hosts carry one as
//! an optional capability; placement policies that rank by power skip hosts
//! without it.

use crate::error::{EngineError, Result};
use std::fmt::Debug;

/// Measured power draw of an HP ProLiant ML110 G4 (Xeon 3040) at 0%, 10%, .. 100% load
pub const HP_PROLIANT_ML110_G4: [f64; 11] = [
    86.0, 89.4, 92.6, 96.0, 99.5, 102.0, 106.0, 108.0, 112.0, 114.0, 117.0,
];

/// Measured power draw of an HP ProLiant ML110 G5 (Xeon 3075) at 0%, 10%, .. 100% load
pub const HP_PROLIANT_ML110_G5: [f64; 11] = [
    93.7, 97.0, 101.0, 105.0, 110.0, 116.0, 121.0, 125.0, 129.0, 133.0, 135.0,
];

pub trait PowerModel: Debug + Send + Sync {
    /// Watts drawn at `utilization`; errors outside [0, 1]
    fn power(&self, utilization: f64) -> Result<f64>;

    fn max_power(&self) -> f64;
}

fn check_range(utilization: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&utilization) {
        return Err(EngineError::UtilizationOutOfRange(utilization));
    }
    Ok(())
}

/// Linear between a static share of `max_power` and `max_power`. An idle
/// host (utilization 0) is treated as switched off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPowerModel {
    max_power: f64,
    static_power: f64,
}

impl LinearPowerModel {
    pub fn new(max_power: f64, static_power_share: f64) -> Self {
        Self {
            max_power,
            static_power: static_power_share * max_power,
        }
    }
}

impl PowerModel for LinearPowerModel {
    fn power(&self, utilization: f64) -> Result<f64> {
        check_range(utilization)?;
        if utilization == 0.0 {
            return Ok(0.0);
        }
        Ok(self.static_power + (self.max_power - self.static_power) * utilization)
    }

    fn max_power(&self) -> f64 {
        self.max_power
    }
}

/// Square-root curve over utilization expressed in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqrtPowerModel {
    max_power: f64,
    static_power: f64,
    constant: f64,
}

impl SqrtPowerModel {
    pub fn new(max_power: f64, static_power_share: f64) -> Self {
        let static_power = static_power_share * max_power;
        Self {
            max_power,
            static_power,
            constant: (max_power - static_power) / 100f64.sqrt(),
        }
    }
}

impl PowerModel for SqrtPowerModel {
    fn power(&self, utilization: f64) -> Result<f64> {
        check_range(utilization)?;
        if utilization == 0.0 {
            return Ok(0.0);
        }
        Ok(self.static_power + self.constant * (utilization * 100.0).sqrt())
    }

    fn max_power(&self) -> f64 {
        self.max_power
    }
}

/// Table of measured draws at 10% steps, linearly interpolated in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecPowerModel {
    table: [f64; 11],
}

impl SpecPowerModel {
    pub fn new(table: [f64; 11]) -> Self {
        Self { table }
    }

    pub fn hp_proliant_g4() -> Self {
        Self::new(HP_PROLIANT_ML110_G4)
    }

    pub fn hp_proliant_g5() -> Self {
        Self::new(HP_PROLIANT_ML110_G5)
    }
}

impl PowerModel for SpecPowerModel {
    fn power(&self, utilization: f64) -> Result<f64> {
        check_range(utilization)?;
        let scaled = utilization * 10.0;
        let lower = scaled.floor() as usize;
        let upper = scaled.ceil() as usize;
        if lower == upper {
            return Ok(self.table[lower]);
        }
        let fraction = scaled - lower as f64;
        Ok(self.table[lower] + (self.table[upper] - self.table[lower]) * fraction)
    }

    fn max_power(&self) -> f64 {
        self.table[10]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_model() {
        let model = LinearPowerModel::new(250.0, 0.7);
        assert_eq!(model.power(0.0).unwrap(), 0.0);
        assert!((model.power(1.0).unwrap() - 250.0).abs() < 1e-9);
        assert!((model.power(0.5).unwrap() - 212.5).abs() < 1e-9);
    }

    #[test]
    fn test_sqrt_model() {
        let model = SqrtPowerModel::new(200.0, 0.5);
        assert!((model.power(1.0).unwrap() - 200.0).abs() < 1e-9);
        assert!((model.power(0.25).unwrap() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_spec_power_interpolates() {
        let model = SpecPowerModel::hp_proliant_g4();
        assert_eq!(model.power(0.0).unwrap(), 86.0);
        assert_eq!(model.power(1.0).unwrap(), 117.0);
        assert!((model.power(0.45).unwrap() - 100.75).abs() < 1e-9);
        assert_eq!(model.max_power(), 117.0);
    }

    #[test]
    fn test_out_of_range_is_error() {
        let model = SpecPowerModel::hp_proliant_g5();
        assert!(matches!(
            model.power(1.2),
            Err(EngineError::UtilizationOutOfRange(_))
        ));
        assert!(LinearPowerModel::new(100.0, 0.5).power(-0.1).is_err());
    }
}
