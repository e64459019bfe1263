//! Error types.

use std::fmt;

use serde::Serialize;

use crate::model::{DeviceId, RackId, UnitRange};
use crate::weights::Objective;

/// Rack resource with an aggregate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Power,
    Weight,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::Power => f.write_str("power"),
            Resource::Weight => f.write_str("weight"),
        }
    }
}

/// Aggregate power or weight beyond the rack maximum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityViolation {
    pub resource: Resource,
    pub total: f64,
    pub limit: f64,
}

impl fmt::Display for CapacityViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "total {} {} exceeds rack limit {}", self.resource, self.total, self.limit)
    }
}

/// Rejection of a placement or of a placement set.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementError {
    #[error("device {device_id} at {range} is outside of rack units 1-{total_units}")]
    OutOfBounds {
        device_id: DeviceId,
        range: UnitRange,
        total_units: u32,
    },

    #[error("device {device_id} overlaps device {conflicting_device_id} occupying {conflicting_range}")]
    Overlap {
        device_id: DeviceId,
        conflicting_device_id: DeviceId,
        conflicting_range: UnitRange,
    },

    #[error("device {device_id} is placed more than once")]
    DuplicateDevice { device_id: DeviceId },

    #[error("no profile for device {device_id}")]
    UnknownDevice { device_id: DeviceId },

    #[error("device {device_id} is not placed in this rack")]
    NotPlaced { device_id: DeviceId },

    #[error("device {device_id} is already placed in rack {rack_id}")]
    DeviceInOtherRack { device_id: DeviceId, rack_id: RackId },

    #[error("unknown rack {rack_id}")]
    UnknownRack { rack_id: RackId },

    #[error("rack {rack_id} already exists")]
    DuplicateRack { rack_id: RackId },

    #[error("device {device_id} was expected at U{expected_unit} but is at U{actual_unit}")]
    PositionChanged {
        device_id: DeviceId,
        expected_unit: u32,
        actual_unit: u32,
    },

    #[error("placed device {device_id} is missing from the proposal")]
    MissingFromProposal { device_id: DeviceId },

    #[error("{0}")]
    CapacityExceeded(CapacityViolation),

    #[error("proposal no longer matches the rack state ({} problem(s))", problems.len())]
    StaleProposal { problems: Vec<PlacementError> },
}

/// Invalid rack capacity, device profile or hotspot policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid rack capacity: {0}")]
    InvalidCapacity(String),

    #[error("invalid profile of device {device_id}: {reason}")]
    InvalidProfile { device_id: DeviceId, reason: String },

    #[error("invalid hotspot policy: {0}")]
    InvalidHotspotPolicy(String),
}

/// Invalid optimization weight vector.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeightsError {
    #[error("all objective weights are zero, nothing to optimize")]
    AllZero,

    #[error("weight of {objective} must be within [0, 100], got {value}")]
    OutOfRange { objective: Objective, value: f64 },

    #[error("unknown objective {0}")]
    UnknownObjective(String),

    #[error("malformed weights: {0}")]
    Malformed(String),
}

/// Failure of a whole optimization request. Infeasible neighbours met during the search are never
/// reported, only problems of the request itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizeError {
    #[error(transparent)]
    InvalidWeights(#[from] WeightsError),

    #[error("no feasible layout exists, cannot accommodate {unaccommodated_device_ids:?}")]
    Infeasible {
        unaccommodated_device_ids: Vec<DeviceId>,
        violations: Vec<PlacementError>,
    },

    #[error("no profile for placed device {device_id}")]
    UnknownDevice { device_id: DeviceId },

    #[error(transparent)]
    InvalidModel(#[from] ModelError),
}

/// Failure to load a configuration or snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("can't parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Weights(#[from] WeightsError),

    #[error("snapshot placements are rejected: {0}")]
    Placement(#[from] PlacementError),

    #[error("invalid config: {0}")]
    Invalid(String),
}
