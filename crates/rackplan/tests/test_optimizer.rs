use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::rstest;

use rackplan::api::optimize_layout;
use rackplan::config::OptimizerConfig;
use rackplan::error::{ModelError, OptimizeError, PlacementError, WeightsError};
use rackplan::metrics::HotspotPolicy;
use rackplan::model::{device_map, DeviceId, DeviceMap, DeviceProfile, Placement, RackCapacity};
use rackplan::optimizer::local_search::HillClimbing;
use rackplan::optimizer::neighborhood::{Neighborhood, SlideNeighborhood, SwapNeighborhood};
use rackplan::optimizer::{CancellationToken, LayoutOptimizer, LayoutProposal, Problem};
use rackplan::snapshot::{RackSnapshot, ResolvedSnapshot};
use rackplan::validator::validate_set;
use rackplan::weights::{Objective, OptimizationWeights};

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn load(file_name: &str) -> ResolvedSnapshot {
    RackSnapshot::from_file(&name_wrapper(file_name)).unwrap().resolve().unwrap()
}

fn start_of(proposal: &LayoutProposal, device: &str) -> u32 {
    proposal.placement_of(&DeviceId::from(device)).unwrap().start_unit
}

fn placed(devices: &DeviceMap, layout: &[(&str, u32)]) -> Vec<Placement> {
    layout
        .iter()
        .map(|(id, start)| Placement::new("r", &devices[&DeviceId::from(*id)], *start))
        .collect()
}

#[test]
// Heavier device above the lighter one: weight balance alone must swap them.
fn test_heavier_device_goes_down() {
    let s = load("inverted.yaml");
    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::only(Objective::WeightBalance),
        10000,
    )
    .unwrap();

    assert_eq!(start_of(&proposal, "heavy"), 1);
    assert_eq!(start_of(&proposal, "light"), 3);
    assert!(start_of(&proposal, "heavy") < start_of(&proposal, "light"));
    let mut moved: Vec<_> = proposal.moved_devices().into_iter().map(|d| d.as_str()).collect();
    moved.sort();
    assert_eq!(moved, vec!["heavy", "light"]);
    assert!(!proposal.input_infeasible);
    assert!(!proposal.partial);
    assert!(proposal.score() > proposal.baseline_score.unwrap());
}

#[test]
fn test_exact_swap_in_full_rack() {
    let rack = RackCapacity::new(4, 1000., 100.).unwrap();
    let devices = device_map(vec![
        DeviceProfile::new("heavy", 2).with_power(100.).with_weight(40.),
        DeviceProfile::new("light", 2).with_power(100.).with_weight(10.),
    ]);
    let current = placed(&devices, &[("heavy", 3), ("light", 1)]);
    let proposal = optimize_layout(
        &rack,
        &devices,
        &current,
        &OptimizationWeights::new(0., 0., 100.),
        100,
    )
    .unwrap();
    assert_eq!(start_of(&proposal, "heavy"), 1);
    assert_eq!(start_of(&proposal, "light"), 3);
    assert_eq!(proposal.moves.len(), 2);
}

#[test]
fn test_optimal_layout_is_unchanged() {
    let s = load("inverted.yaml");
    let current = vec![
        Placement::new("r3", &s.devices[&DeviceId::from("heavy")], 1),
        Placement::new("r3", &s.devices[&DeviceId::from("light")], 3),
    ];
    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &current,
        &OptimizationWeights::only(Objective::WeightBalance),
        10000,
    )
    .unwrap();
    assert!(proposal.moves.is_empty());
    assert!(!proposal.is_improvement());
    assert_eq!(proposal.placements, current);
    assert_eq!(proposal.restarts, 0);
    assert_eq!(proposal.baseline_score, Some(proposal.score()));
}

#[rstest]
#[case(OptimizationWeights::new(1., 1., 1.))]
#[case(OptimizationWeights::only(Objective::ThermalBalance))]
#[case(OptimizationWeights::new(50., 20., 30.))]
fn test_proposal_is_valid_and_idempotent(#[case] weights: OptimizationWeights) {
    let s = load("rack-42u.yaml");
    let first = optimize_layout(&s.capacity, &s.devices, &s.placements, &weights, 200_000).unwrap();
    assert!(!first.budget_exhausted);
    assert_eq!(validate_set(&s.capacity, &first.placements), Ok(()));
    assert_eq!(first.placements.len(), s.placements.len());

    let second = optimize_layout(&s.capacity, &s.devices, &first.placements, &weights, 200_000).unwrap();
    assert!(second.moves.is_empty());
    assert_eq!(second.placements, first.placements);
}

#[test]
fn test_hot_devices_are_spread() {
    let rack = RackCapacity::new(10, 1000., 100.).unwrap();
    let devices = device_map(vec![
        DeviceProfile::new("a", 1).with_heat_output(1000.),
        DeviceProfile::new("b", 1).with_heat_output(1000.),
    ]);
    let current = placed(&devices, &[("a", 1), ("b", 2)]);
    let proposal = optimize_layout(
        &rack,
        &devices,
        &current,
        &OptimizationWeights::only(Objective::ThermalBalance),
        10000,
    )
    .unwrap();

    let a = start_of(&proposal, "a");
    let b = start_of(&proposal, "b");
    assert!(a.abs_diff(b) >= 3, "devices at {} and {} heat each other", a, b);
    assert!(proposal.breakdown.thermal_balance > proposal.baseline_score.unwrap());
    // equally good layouts exist, the one with fewer moves wins
    assert_eq!(proposal.moves.len(), 1);
}

#[test]
fn test_power_over_budget_is_infeasible() {
    let s = load("overloaded.yaml");
    let err = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::new(1., 1., 1.),
        1000,
    )
    .unwrap_err();
    match err {
        OptimizeError::Infeasible {
            unaccommodated_device_ids,
            violations,
        } => {
            assert_eq!(unaccommodated_device_ids, vec![DeviceId::from("srv-b")]);
            assert!(violations
                .iter()
                .any(|v| matches!(v, PlacementError::CapacityExceeded(_))));
        }
        e => panic!("unexpected error {:?}", e),
    }
}

#[test]
fn test_too_many_units_is_infeasible() {
    let rack = RackCapacity::new(4, 1000., 100.).unwrap();
    let devices = device_map(vec![
        DeviceProfile::new("a", 2),
        DeviceProfile::new("b", 2),
        DeviceProfile::new("c", 1),
    ]);
    let current = placed(&devices, &[("a", 1), ("b", 3), ("c", 4)]);
    let err = optimize_layout(&rack, &devices, &current, &OptimizationWeights::new(1., 1., 1.), 100).unwrap_err();
    assert!(matches!(
        err,
        OptimizeError::Infeasible { unaccommodated_device_ids, .. } if unaccommodated_device_ids == vec![DeviceId::from("c")]
    ));
}

#[test]
// Rack shrunk below the topmost device: the layout is repaired and the input is flagged.
fn test_infeasible_input_is_repacked() {
    let rack = RackCapacity::new(8, 1000., 100.).unwrap();
    let devices = device_map(vec![
        DeviceProfile::new("a", 4).with_power(100.).with_weight(10.),
        DeviceProfile::new("b", 2).with_power(100.).with_weight(10.),
        DeviceProfile::new("c", 1).with_power(100.).with_weight(10.),
    ]);
    let current = placed(&devices, &[("a", 1), ("b", 3), ("c", 10)]);
    let proposal = optimize_layout(&rack, &devices, &current, &OptimizationWeights::new(1., 1., 1.), 1000).unwrap();

    assert!(proposal.input_infeasible);
    assert_eq!(proposal.baseline_score, None);
    assert!(proposal
        .input_violations
        .iter()
        .any(|v| matches!(v, PlacementError::Overlap { .. })));
    assert!(proposal
        .input_violations
        .iter()
        .any(|v| matches!(v, PlacementError::OutOfBounds { .. })));
    assert_eq!(validate_set(&rack, &proposal.placements), Ok(()));
    assert_eq!(proposal.placements.len(), 3);
}

#[rstest]
#[case(OptimizationWeights::new(0., 0., 0.), WeightsError::AllZero)]
#[case(OptimizationWeights::default(), WeightsError::AllZero)]
#[case(
    OptimizationWeights::new(-1., 50., 50.),
    WeightsError::OutOfRange { objective: Objective::ThermalBalance, value: -1. }
)]
#[case(
    OptimizationWeights::new(10., 150., 0.),
    WeightsError::OutOfRange { objective: Objective::PowerBalance, value: 150. }
)]
fn test_invalid_weights(#[case] weights: OptimizationWeights, #[case] expected: WeightsError) {
    let s = load("inverted.yaml");
    let err = optimize_layout(&s.capacity, &s.devices, &s.placements, &weights, 100).unwrap_err();
    assert_eq!(err, OptimizeError::InvalidWeights(expected));
}

#[test]
fn test_unknown_device() {
    let s = load("inverted.yaml");
    let mut current = s.placements.clone();
    current.push(Placement::with_height("r3", "ghost", 20, 1));
    let err = optimize_layout(&s.capacity, &s.devices, &current, &OptimizationWeights::new(1., 1., 1.), 100).unwrap_err();
    assert_eq!(
        err,
        OptimizeError::UnknownDevice {
            device_id: DeviceId::from("ghost")
        }
    );
}

#[test]
fn test_cancelled_run_is_partial() {
    let s = load("rack-42u.yaml");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let proposal = LayoutOptimizer::new(OptimizerConfig::default())
        .optimize_with_cancel(
            &s.capacity,
            &s.devices,
            &s.placements,
            &OptimizationWeights::new(1., 1., 1.),
            10000,
            &cancel,
        )
        .unwrap();
    assert!(proposal.partial);
    assert!(proposal.moves.is_empty());
    assert_eq!(proposal.evaluations, 0);
}

/// Adds no candidates, cancels the run while the second step is generated.
struct CancelOnSecondStep {
    cancel: CancellationToken,
    calls: AtomicUsize,
}

impl Neighborhood for CancelOnSecondStep {
    fn name(&self) -> &'static str {
        "cancel-on-second-step"
    }

    fn neighbors(&self, _problem: &Problem, _starts: &[u32], _out: &mut Vec<Vec<u32>>) {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.cancel.cancel();
        }
    }
}

#[test]
// Three devices parked at the top of the rack need three moves; the run is stopped after two steps.
fn test_cancel_during_run_returns_best_so_far() {
    let rack = RackCapacity::new(10, 1000., 100.).unwrap();
    let devices = device_map(vec![
        DeviceProfile::new("a", 1).with_power(100.).with_weight(30.),
        DeviceProfile::new("b", 1).with_power(100.).with_weight(20.),
        DeviceProfile::new("c", 1).with_power(100.).with_weight(10.),
    ]);
    let current = placed(&devices, &[("a", 8), ("b", 9), ("c", 10)]);
    let cancel = CancellationToken::new();
    let climber = HillClimbing::new(vec![
        Box::new(SwapNeighborhood),
        Box::new(SlideNeighborhood),
        Box::new(CancelOnSecondStep {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        }),
    ]);

    let proposal = LayoutOptimizer::new(OptimizerConfig::default())
        .with_hill_climbing(climber)
        .optimize_with_cancel(
            &rack,
            &devices,
            &current,
            &OptimizationWeights::only(Objective::WeightBalance),
            10000,
            &cancel,
        )
        .unwrap();

    assert!(cancel.is_cancelled());
    assert!(proposal.partial);
    assert!(!proposal.budget_exhausted);
    assert_eq!(proposal.restarts, 0);
    assert!(!proposal.moves.is_empty());
    assert!(proposal.score() > proposal.baseline_score.unwrap());
    assert_eq!(start_of(&proposal, "a"), 1);
    assert!(start_of(&proposal, "c") >= 8);
    assert_eq!(validate_set(&rack, &proposal.placements), Ok(()));
}

#[test]
fn test_invalid_hotspot_policy_is_rejected() {
    let s = load("inverted.yaml");
    let config = OptimizerConfig::default().with_hotspot_policy(HotspotPolicy::percentile(150.));
    let err = LayoutOptimizer::new(config)
        .optimize(&s.capacity, &s.devices, &s.placements, &OptimizationWeights::new(1., 1., 1.), 100)
        .unwrap_err();
    assert!(matches!(
        err,
        OptimizeError::InvalidModel(ModelError::InvalidHotspotPolicy(_))
    ));
}

#[test]
fn test_budget_is_counted_in_evaluations() {
    let s = load("inverted.yaml");
    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::only(Objective::WeightBalance),
        1,
    )
    .unwrap();
    assert!(proposal.budget_exhausted);
    assert_eq!(proposal.evaluations, 1);
    // the swap is the first candidate generated
    assert_eq!(start_of(&proposal, "heavy"), 1);

    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::only(Objective::WeightBalance),
        0,
    )
    .unwrap();
    assert!(proposal.budget_exhausted);
    assert!(proposal.moves.is_empty());
}

#[test]
fn test_deterministic_across_runs_and_threads() {
    let s = load("rack-42u.yaml");
    let config = OptimizerConfig::from_file(&name_wrapper("optimizer.yaml")).unwrap();
    assert_eq!(config.threads, 2);
    let weights = OptimizationWeights::new(40., 20., 40.);

    let run = |config: OptimizerConfig| {
        LayoutOptimizer::new(config)
            .optimize(&s.capacity, &s.devices, &s.placements, &weights, 5000)
            .unwrap()
    };
    let parallel = run(config.clone());
    assert_eq!(parallel, run(config.clone()));
    assert_eq!(parallel, run(config.clone().with_threads(1)));
    assert_eq!(parallel, run(config.with_threads(4)));
}

#[test]
fn test_incomplete_data_lowers_confidence() {
    let s = load("rack-42u.yaml");
    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::new(1., 1., 1.),
        10000,
    )
    .unwrap();
    assert_eq!(proposal.incomplete_data, vec![DeviceId::from("pdu-1")]);
    assert_eq!(proposal.confidence, 0.8);
    assert_eq!(proposal.metrics.incomplete_devices, vec![DeviceId::from("pdu-1")]);
}

#[test]
fn test_extra_profiles_are_ignored() {
    let s = load("inverted.yaml");
    let mut devices = s.devices.clone();
    devices.insert(DeviceId::from("spare"), DeviceProfile::new("spare", 2).with_weight(100.));
    let proposal = optimize_layout(
        &s.capacity,
        &devices,
        &s.placements,
        &OptimizationWeights::only(Objective::WeightBalance),
        1000,
    )
    .unwrap();
    assert_eq!(proposal.placements.len(), 2);
    assert!(proposal.placement_of(&DeviceId::from("spare")).is_none());
}

#[test]
fn test_proposal_serializes() {
    let s = load("inverted.yaml");
    let proposal = optimize_layout(
        &s.capacity,
        &s.devices,
        &s.placements,
        &OptimizationWeights::only(Objective::WeightBalance),
        1000,
    )
    .unwrap();
    let value = serde_json::to_value(&proposal).unwrap();
    assert_eq!(value["moves"].as_array().unwrap().len(), 2);
    assert_eq!(value["input_infeasible"], false);
    assert!(value["breakdown"]["weight_balance"].as_f64().unwrap() > 0.9);
}
