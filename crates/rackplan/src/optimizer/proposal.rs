use serde::Serialize;

use crate::error::PlacementError;
use crate::metrics::RackMetrics;
use crate::model::{DeviceId, Placement};
use crate::optimizer::common::ScoreBreakdown;

/// Device whose start unit differs between the current layout and a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMove {
    pub device_id: DeviceId,
    pub from_unit: u32,
    pub to_unit: u32,
}

/// Result of an optimization run. Nothing is applied until the caller does so.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutProposal {
    /// Proposed placements ordered by start unit.
    pub placements: Vec<Placement>,
    pub breakdown: ScoreBreakdown,
    /// Score of the current layout, `None` if it was infeasible.
    pub baseline_score: Option<f64>,
    pub moves: Vec<DeviceMove>,
    /// The current layout did not pass validation on entry.
    pub input_infeasible: bool,
    pub input_violations: Vec<PlacementError>,
    /// The run was cancelled and this is the best layout found until then.
    pub partial: bool,
    pub budget_exhausted: bool,
    pub evaluations: u64,
    pub restarts: usize,
    /// Devices with unknown power or weight, scored as if the value were zero.
    pub incomplete_data: Vec<DeviceId>,
    /// Fraction of devices with complete data.
    pub confidence: f64,
    pub metrics: RackMetrics,
}

impl LayoutProposal {
    pub fn score(&self) -> f64 {
        self.breakdown.total
    }

    /// Returns true if the proposal moves at least one device.
    pub fn is_improvement(&self) -> bool {
        !self.moves.is_empty()
    }

    pub fn moved_devices(&self) -> Vec<&DeviceId> {
        self.moves.iter().map(|m| &m.device_id).collect()
    }

    pub fn placement_of(&self, device_id: &DeviceId) -> Option<&Placement> {
        self.placements.iter().find(|p| &p.device_id == device_id)
    }
}
