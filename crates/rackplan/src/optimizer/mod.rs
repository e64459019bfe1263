//! Layout optimizer: bounded hill climbing with restarts over swap and slide moves.

pub mod common;
pub mod initial;
pub mod local_search;
pub mod neighborhood;
pub mod objective;
pub mod proposal;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::config::OptimizerConfig;
use crate::error::OptimizeError;
use crate::metrics::MetricsAggregator;
use crate::model::{sort_by_position, DeviceId, DeviceMap, Placement, RackCapacity};
use crate::validator::{check_capacity, find_unaccommodated, validate_set};
use crate::weights::OptimizationWeights;

pub use common::{CancellationToken, Layout, Problem, ScoreBreakdown, SearchBudget, StopReason, EPS};
pub use proposal::{DeviceMove, LayoutProposal};

use initial::{restart_generators, InitialLayoutGenerator, PackingGenerator};
use local_search::{evaluate_candidate, Evaluator, HillClimbing};

/// Proposes a better arrangement of the devices currently placed in a rack.
///
/// The optimizer only rearranges the devices present in the current placement set, never adds or
/// removes devices, and never mutates anything: the caller decides whether to apply the proposal.
pub struct LayoutOptimizer {
    config: OptimizerConfig,
    climber: HillClimbing,
}

impl LayoutOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            climber: HillClimbing::standard(),
        }
    }

    /// Replaces the standard swap and slide search.
    pub fn with_hill_climbing(mut self, climber: HillClimbing) -> Self {
        self.climber = climber;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        rack: &RackCapacity,
        devices: &DeviceMap,
        current: &[Placement],
        weights: &OptimizationWeights,
        iteration_budget: u64,
    ) -> Result<LayoutProposal, OptimizeError> {
        self.optimize_with_cancel(
            rack,
            devices,
            current,
            weights,
            iteration_budget,
            &CancellationToken::new(),
        )
    }

    /// Same as [`optimize`](Self::optimize), but stops early once `cancel` is triggered and returns
    /// the best layout found so far marked as partial.
    pub fn optimize_with_cancel(
        &self,
        rack: &RackCapacity,
        devices: &DeviceMap,
        current: &[Placement],
        weights: &OptimizationWeights,
        iteration_budget: u64,
        cancel: &CancellationToken,
    ) -> Result<LayoutProposal, OptimizeError> {
        let weights = weights.normalized()?;
        let aggregator = MetricsAggregator::new(self.config.hotspot)?;

        // one placement per device, the lowest one wins if the input lists a device twice
        let mut ordered = current.to_vec();
        sort_by_position(&mut ordered);
        let mut by_device: BTreeMap<DeviceId, Placement> = BTreeMap::new();
        for p in ordered {
            let device = devices.get(&p.device_id).ok_or_else(|| OptimizeError::UnknownDevice {
                device_id: p.device_id.clone(),
            })?;
            device.validate()?;
            by_device
                .entry(p.device_id.clone())
                .or_insert_with(|| Placement::new(p.rack_id.clone(), device, p.start_unit));
        }

        let mut input_violations = match validate_set(rack, current) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        let templates: Vec<Placement> = by_device.values().cloned().collect();
        if input_violations.is_empty() {
            if let Err(errors) = validate_set(rack, &templates) {
                input_violations = errors;
            }
        }
        let capacity_errors = check_capacity(rack, devices, &templates).err().unwrap_or_default();

        let mut in_position_order = templates.clone();
        sort_by_position(&mut in_position_order);
        let profiles: Vec<_> = in_position_order
            .iter()
            .filter_map(|p| devices.get(&p.device_id))
            .collect();
        let unaccommodated = find_unaccommodated(rack, &profiles);
        if !unaccommodated.is_empty() {
            log::debug!("cannot accommodate {:?} in the rack", unaccommodated);
            let mut violations = capacity_errors;
            violations.extend(input_violations);
            return Err(OptimizeError::Infeasible {
                unaccommodated_device_ids: unaccommodated,
                violations,
            });
        }
        input_violations.extend(capacity_errors);
        let input_infeasible = !input_violations.is_empty();

        let problem = Arc::new(Problem {
            capacity: *rack,
            devices: by_device
                .keys()
                .filter_map(|id| devices.get(id))
                .cloned()
                .collect(),
            current: templates,
            weights,
            smoothing_radius: self.config.thermal_smoothing_radius,
        });
        let mut rng = Pcg64::seed_from_u64(self.config.seed);

        let baseline = if input_infeasible {
            None
        } else {
            evaluate_candidate(&problem, &problem.current_starts())
        };
        let seed = match &baseline {
            Some(layout) => layout.clone(),
            None => {
                log::warn!(
                    "current layout is infeasible ({} violations), repacking it in current order",
                    input_violations.len()
                );
                PackingGenerator::repack_current()
                    .generate(&problem, &mut rng)
                    .and_then(|starts| evaluate_candidate(&problem, &starts))
                    .ok_or_else(|| OptimizeError::Infeasible {
                        unaccommodated_device_ids: Vec::new(),
                        violations: input_violations.clone(),
                    })?
            }
        };

        let evaluator = Evaluator::new(self.config.threads);
        let climber = &self.climber;
        let mut budget = SearchBudget::new(iteration_budget);
        let (mut best, mut stop) = climber.run(&problem, seed, &evaluator, &mut budget, cancel);
        log::debug!(
            "climb from current layout stopped ({:?}) at score {:.6}",
            stop,
            best.score.total
        );

        // a current layout that no single move improves is returned as is, restarts are only spent
        // once the climb has shown that the current layout is not a local optimum
        let improved = baseline.as_ref().map_or(true, |b| best.beats(b));
        let mut restarts = 0;
        if stop == StopReason::Converged && improved {
            for mut generator in restart_generators(self.config.restarts) {
                if cancel.is_cancelled() {
                    stop = StopReason::Cancelled;
                    break;
                }
                if budget.take(1) == 0 {
                    stop = StopReason::BudgetExhausted;
                    break;
                }
                restarts += 1;
                let init = match generator
                    .generate(&problem, &mut rng)
                    .and_then(|starts| evaluate_candidate(&problem, &starts))
                {
                    Some(init) => init,
                    None => continue,
                };
                // ties are broken on moves from the current layout, not from the seed
                let (layout, reason) = climber.run(&problem, init, &evaluator, &mut budget, cancel);
                log::debug!(
                    "restart {} from {} seed stopped ({:?}) at score {:.6}",
                    restarts,
                    generator.name(),
                    reason,
                    layout.score.total
                );
                if layout.beats(&best) {
                    best = layout;
                }
                if reason != StopReason::Converged {
                    stop = reason;
                    break;
                }
            }
        }

        let baseline_score = baseline.as_ref().map(|l| l.score.total);
        let chosen = match baseline {
            Some(baseline) if !best.beats(&baseline) => baseline,
            _ => best,
        };

        let mut placements = problem.placements(&chosen.starts);
        sort_by_position(&mut placements);
        if let Err(violations) = validate_set(rack, &placements) {
            return Err(OptimizeError::Infeasible {
                unaccommodated_device_ids: Vec::new(),
                violations,
            });
        }

        let moves: Vec<DeviceMove> = problem
            .current
            .iter()
            .zip(chosen.starts.iter())
            .filter(|(p, start)| p.start_unit != **start)
            .map(|(p, start)| DeviceMove {
                device_id: p.device_id.clone(),
                from_unit: p.start_unit,
                to_unit: *start,
            })
            .collect();

        let incomplete_data: Vec<DeviceId> = problem
            .devices
            .iter()
            .filter(|d| !d.has_complete_data())
            .map(|d| d.id.clone())
            .collect();
        if !incomplete_data.is_empty() {
            log::warn!("devices with unknown power or weight: {:?}", incomplete_data);
        }
        let confidence = if problem.is_empty() {
            1.
        } else {
            (problem.len() - incomplete_data.len()) as f64 / problem.len() as f64
        };

        let partial = stop == StopReason::Cancelled;
        if partial {
            log::warn!("optimization cancelled, returning the best layout found so far");
        }
        let metrics = aggregator.aggregate(rack, devices, &placements);
        log::info!(
            "optimized {} devices: score {:?} -> {:.6}, {} moves, {} evaluations, {} restarts",
            problem.len(),
            baseline_score,
            chosen.score.total,
            moves.len(),
            budget.used(),
            restarts
        );

        Ok(LayoutProposal {
            placements,
            breakdown: chosen.score,
            baseline_score,
            moves,
            input_infeasible,
            input_violations,
            partial,
            budget_exhausted: stop == StopReason::BudgetExhausted,
            evaluations: budget.used(),
            restarts,
            incomplete_data,
            confidence,
            metrics,
        })
    }
}
