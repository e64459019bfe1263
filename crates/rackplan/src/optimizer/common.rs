//! Common base for the layout search: problem snapshot, candidate layouts and search control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{DeviceProfile, Placement, RackCapacity};
use crate::weights::NormalizedWeights;

/// Tolerance of score comparisons.
pub const EPS: f64 = 1e-9;

/// Immutable snapshot of one optimization request, shared by all search components and threads.
///
/// Devices are kept in the order of their ids so that candidate generation does not depend on
/// where the devices currently are.
#[derive(Debug, Clone)]
pub struct Problem {
    pub capacity: RackCapacity,
    pub devices: Vec<DeviceProfile>,
    /// Current placement of each device with the height taken from its profile.
    pub current: Vec<Placement>,
    pub weights: NormalizedWeights,
    pub smoothing_radius: u32,
}

impl Problem {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn height(&self, device: usize) -> u32 {
        self.devices[device].height_units
    }

    pub fn current_starts(&self) -> Vec<u32> {
        self.current.iter().map(|p| p.start_unit).collect()
    }

    /// Materializes a layout as placements.
    pub fn placements(&self, starts: &[u32]) -> Vec<Placement> {
        self.current
            .iter()
            .zip(starts.iter())
            .map(|(p, start)| p.moved_to(*start))
            .collect()
    }

    /// Number of devices whose position differs from the current layout.
    pub fn disruption(&self, starts: &[u32]) -> usize {
        self.current
            .iter()
            .zip(starts.iter())
            .filter(|(p, start)| p.start_unit != **start)
            .count()
    }
}

/// Normalized objective values of a layout and their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub thermal_balance: f64,
    pub power_balance: f64,
    pub weight_balance: f64,
    pub total: f64,
}

/// Feasible candidate layout: the start unit of every problem device.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub starts: Vec<u32>,
    pub score: ScoreBreakdown,
    pub moves: usize,
}

impl Layout {
    /// Returns true if this layout is strictly preferable to `other`: a higher score, or the same
    /// score reached with fewer moved devices.
    pub fn beats(&self, other: &Layout) -> bool {
        let diff = self.score.total - other.score.total;
        diff > EPS || (diff.abs() <= EPS && self.moves < other.moves)
    }
}

/// Handle for cooperative cancellation of an optimization run. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Number of neighbour evaluations left to a run.
#[derive(Debug, Clone)]
pub struct SearchBudget {
    limit: u64,
    used: u64,
}

impl SearchBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Takes up to `n` evaluations from the budget, returns the number granted.
    pub fn take(&mut self, n: u64) -> u64 {
        let granted = n.min(self.remaining());
        self.used += granted;
        granted
    }
}

/// Why a hill-climbing run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No neighbour improves the layout.
    Converged,
    BudgetExhausted,
    Cancelled,
}
