//! Call-style operations offered to the catalog and UI layers.
//!
//! All inputs are immutable snapshots owned by the caller and all outputs are plain values: nothing
//! here keeps state between calls or touches storage.

use crate::config::OptimizerConfig;
use crate::error::{ModelError, OptimizeError, PlacementError};
use crate::metrics::{HotspotPolicy, MetricsAggregator, RackMetrics};
use crate::model::{DeviceMap, Placement, RackCapacity};
use crate::optimizer::{LayoutOptimizer, LayoutProposal};
use crate::validator::validate;
use crate::weights::OptimizationWeights;

/// Checks a single candidate placement against the existing ones.
pub fn validate_placement(
    rack: &RackCapacity,
    existing: &[Placement],
    candidate: &Placement,
) -> Result<(), PlacementError> {
    validate(rack, existing, candidate)
}

/// Computes rack metrics with the given hotspot policy. Fails only if the policy is not valid.
pub fn compute_metrics(
    rack: &RackCapacity,
    devices: &DeviceMap,
    placements: &[Placement],
    policy: &HotspotPolicy,
) -> Result<RackMetrics, ModelError> {
    Ok(MetricsAggregator::new(*policy)?.aggregate(rack, devices, placements))
}

/// Proposes an improved arrangement of the placed devices using the default optimizer settings.
pub fn optimize_layout(
    rack: &RackCapacity,
    devices: &DeviceMap,
    placements: &[Placement],
    weights: &OptimizationWeights,
    iteration_budget: u64,
) -> Result<LayoutProposal, OptimizeError> {
    LayoutOptimizer::new(OptimizerConfig::default()).optimize(rack, devices, placements, weights, iteration_budget)
}
