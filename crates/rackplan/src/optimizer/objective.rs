//! Objective functions. Each objective is scaled to [0, 1], higher is better, so that the weight
//! vector is meaningful regardless of units. The formulas are a tunable policy.

use crate::metrics::unit_thermal_load;
use crate::model::{DeviceProfile, RackCapacity};
use crate::optimizer::common::{Problem, ScoreBreakdown};

/// Scores a layout of the problem devices.
pub fn score(problem: &Problem, starts: &[u32]) -> ScoreBreakdown {
    let thermal = thermal_balance(&problem.capacity, &problem.devices, starts, problem.smoothing_radius);
    let power = power_balance(&problem.capacity, &problem.devices);
    let weight = weight_balance(&problem.capacity, &problem.devices, starts);
    let w = &problem.weights;
    let total = if power == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        w.thermal * thermal + w.power * power + w.weight * weight
    };
    ScoreBreakdown {
        thermal_balance: thermal,
        power_balance: power,
        weight_balance: weight,
        total,
    }
}

/// Evenness of the heat distribution along the rack.
///
/// The per-unit load profile is smoothed with a moving sum of the given radius, so that hot devices
/// placed next to each other reinforce each other, and the result is `1 - CV / sqrt(n - 1)` where
/// `CV` is the coefficient of variation of the smoothed profile over all `n` units and
/// `sqrt(n - 1)` is its largest possible value.
pub fn thermal_balance(capacity: &RackCapacity, devices: &[DeviceProfile], starts: &[u32], radius: u32) -> f64 {
    let n = capacity.total_units() as usize;
    if n <= 1 {
        return 1.;
    }
    let loads = unit_thermal_load(capacity.total_units(), devices.iter().zip(starts.iter().copied()));

    let mut prefix = vec![0.; n + 1];
    for (i, load) in loads.iter().enumerate() {
        prefix[i + 1] = prefix[i] + load;
    }
    let r = radius as usize;
    let smoothed: Vec<f64> = (0..n)
        .map(|i| prefix[(i + r + 1).min(n)] - prefix[i.saturating_sub(r)])
        .collect();

    let mean = smoothed.iter().sum::<f64>() / n as f64;
    if mean <= 0. {
        return 1.;
    }
    let variance = smoothed.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let cv = variance.sqrt() / mean;
    (1. - cv / ((n - 1) as f64).sqrt()).clamp(0., 1.)
}

/// Headroom below the power budget, or minus infinity when the budget is exceeded.
pub fn power_balance(capacity: &RackCapacity, devices: &[DeviceProfile]) -> f64 {
    let total: f64 = devices.iter().map(|d| d.power()).sum();
    if total > capacity.max_power_watts() {
        f64::NEG_INFINITY
    } else if capacity.max_power_watts() <= 0. {
        1.
    } else {
        1. - total / capacity.max_power_watts()
    }
}

/// Weight-averaged height reward: a device at unit 1 earns 1, a device at the top unit earns 0.
pub fn weight_balance(capacity: &RackCapacity, devices: &[DeviceProfile], starts: &[u32]) -> f64 {
    let total_units = capacity.total_units();
    let total_weight: f64 = devices.iter().map(|d| d.weight()).sum();
    if total_units <= 1 || total_weight <= 0. {
        return 1.;
    }
    let span = (total_units - 1) as f64;
    let reward: f64 = devices
        .iter()
        .zip(starts.iter())
        .map(|(d, start)| d.weight() * (total_units.saturating_sub(*start)) as f64 / span)
        .sum();
    (reward / total_weight).clamp(0., 1.)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rack(units: u32) -> RackCapacity {
        RackCapacity::new(units, 1000., 1000.).unwrap()
    }

    #[test]
    fn test_thermal_prefers_spread() {
        let devices = vec![
            DeviceProfile::new("a", 1).with_heat_output(100.),
            DeviceProfile::new("b", 1).with_heat_output(100.),
        ];
        let adjacent = thermal_balance(&rack(10), &devices, &[4, 5], 1);
        let apart = thermal_balance(&rack(10), &devices, &[3, 7], 1);
        assert!(apart > adjacent);
        assert!((0. ..=1.).contains(&adjacent));
        assert_eq!(thermal_balance(&rack(10), &[DeviceProfile::new("c", 1)], &[1], 1), 1.);
    }

    #[test]
    fn test_power_headroom() {
        let devices = vec![DeviceProfile::new("a", 1).with_power(250.)];
        assert_eq!(power_balance(&rack(10), &devices), 0.75);
        let devices = vec![DeviceProfile::new("a", 1).with_power(1250.)];
        assert_eq!(power_balance(&rack(10), &devices), f64::NEG_INFINITY);
        let zero = RackCapacity::new(10, 0., 0.).unwrap();
        assert_eq!(power_balance(&zero, &[DeviceProfile::new("a", 1)]), 1.);
    }

    #[test]
    fn test_weight_prefers_heavy_low() {
        let devices = vec![
            DeviceProfile::new("heavy", 2).with_weight(50.),
            DeviceProfile::new("light", 2).with_weight(10.),
        ];
        let heavy_low = weight_balance(&rack(42), &devices, &[1, 3]);
        let heavy_high = weight_balance(&rack(42), &devices, &[3, 1]);
        assert!(heavy_low > heavy_high);
        assert_eq!(weight_balance(&rack(42), &[DeviceProfile::new("x", 1)], &[5]), 1.);
    }
}
