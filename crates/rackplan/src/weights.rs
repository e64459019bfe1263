//! Optimization objectives and their relative weights.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::parse_options;
use crate::error::WeightsError;

/// Upper bound of a single objective weight.
pub const MAX_WEIGHT: f64 = 100.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Even distribution of heat along the rack.
    #[serde(alias = "thermal")]
    ThermalBalance,
    /// Headroom below the rack power budget.
    #[serde(alias = "power")]
    PowerBalance,
    /// Heavier devices closer to the bottom of the rack.
    #[serde(alias = "weight")]
    WeightBalance,
}

impl Objective {
    pub const ALL: [Objective; 3] = [
        Objective::ThermalBalance,
        Objective::PowerBalance,
        Objective::WeightBalance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Objective::ThermalBalance => "thermal",
            Objective::PowerBalance => "power",
            Objective::WeightBalance => "weight",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Objective {
    type Err = WeightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "thermal" | "thermal_balance" => Ok(Objective::ThermalBalance),
            "power" | "power_balance" => Ok(Objective::PowerBalance),
            "weight" | "weight_balance" => Ok(Objective::WeightBalance),
            other => Err(WeightsError::UnknownObjective(other.to_string())),
        }
    }
}

/// Relative importance of each objective as set by the user, each within [0, 100].
/// Objectives missing from the map have zero weight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizationWeights {
    weights: IndexMap<Objective, f64>,
}

impl OptimizationWeights {
    pub fn new(thermal: f64, power: f64, weight: f64) -> Self {
        Self::default()
            .with(Objective::ThermalBalance, thermal)
            .with(Objective::PowerBalance, power)
            .with(Objective::WeightBalance, weight)
    }

    /// Weights that optimize a single objective.
    pub fn only(objective: Objective) -> Self {
        Self::default().with(objective, MAX_WEIGHT)
    }

    pub fn with(mut self, objective: Objective, weight: f64) -> Self {
        self.weights.insert(objective, weight);
        self
    }

    pub fn get(&self, objective: Objective) -> f64 {
        self.weights.get(&objective).copied().unwrap_or(0.)
    }

    /// Checks the weights and scales them to sum to one.
    pub fn normalized(&self) -> Result<NormalizedWeights, WeightsError> {
        for (objective, value) in self.weights.iter() {
            if !(value.is_finite() && (0. ..=MAX_WEIGHT).contains(value)) {
                return Err(WeightsError::OutOfRange {
                    objective: *objective,
                    value: *value,
                });
            }
        }
        let sum: f64 = Objective::ALL.iter().map(|o| self.get(*o)).sum();
        if sum <= 0. {
            return Err(WeightsError::AllZero);
        }
        Ok(NormalizedWeights {
            thermal: self.get(Objective::ThermalBalance) / sum,
            power: self.get(Objective::PowerBalance) / sum,
            weight: self.get(Objective::WeightBalance) / sum,
        })
    }
}

impl FromStr for OptimizationWeights {
    type Err = WeightsError;

    /// Parses weights from an options string such as `thermal=50,power=20,weight=30`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        let unnamed = tokens
            .iter()
            .find(|t| t.split_once('=').map_or(true, |(name, _)| name.trim().is_empty()));
        if let Some(token) = unnamed {
            return Err(WeightsError::Malformed(format!("expected objective=weight, got {}", token)));
        }
        let options = parse_options(s);
        if options.len() != tokens.len() {
            return Err(WeightsError::Malformed(format!("repeated weight in {}", s.trim())));
        }
        let mut result = Self::default();
        let mut seen = Vec::new();
        let mut names: Vec<_> = options.into_iter().collect();
        names.sort();
        for (name, value) in names {
            let objective = name.parse::<Objective>()?;
            if seen.contains(&objective) {
                return Err(WeightsError::Malformed(format!("repeated weight of {}", objective)));
            }
            seen.push(objective);
            let value = value
                .trim()
                .parse::<f64>()
                .map_err(|_| WeightsError::Malformed(format!("{}={}", name, value)))?;
            result = result.with(objective, value);
        }
        Ok(result)
    }
}

/// Objective weights scaled to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedWeights {
    pub thermal: f64,
    pub power: f64,
    pub weight: f64,
}

impl NormalizedWeights {
    pub fn get(&self, objective: Objective) -> f64 {
        match objective {
            Objective::ThermalBalance => self.thermal,
            Objective::PowerBalance => self.power,
            Objective::WeightBalance => self.weight,
        }
    }
}
