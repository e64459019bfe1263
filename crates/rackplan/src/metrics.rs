//! Rack-level metrics derived from a placement set.
//!
//! Thermal figures are a load-distribution heuristic: each device's heat output is spread evenly
//! over the units it occupies. There is no airflow simulation and no heat transfer between devices,
//! so the per-unit values are not temperature predictions.

use serde::{Deserialize, Serialize};

use crate::error::{CapacityViolation, ModelError};
use crate::model::{
    sort_by_position, AirflowPattern, DeviceId, DeviceMap, DeviceProfile, Placement, RackCapacity, UnitRange,
};
use crate::validator::capacity_violations;

/// How the hotspot threshold is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotspotThreshold {
    /// Fixed load in BTU/hr per unit.
    Absolute(f64),
    /// Percentile (0-100) of the loads of occupied units, linearly interpolated.
    Percentile(f64),
}

/// Threshold multiples at which a hotspot reaches each severity.
///
/// The defaults (1.0, 1.5, 2.0, 3.0) are a tunable policy rather than physical limits: a hotspot
/// whose peak load is at least `low` times the threshold is [`Severity::Low`], at least `medium`
/// times is [`Severity::Medium`] and so on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityMultiples {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityMultiples {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 1.5,
            high: 2.0,
            critical: 3.0,
        }
    }
}

impl SeverityMultiples {
    /// Classifies the ratio of a peak load to the threshold, `None` below `low`.
    pub fn classify(&self, ratio: f64) -> Option<Severity> {
        if ratio >= self.critical {
            Some(Severity::Critical)
        } else if ratio >= self.high {
            Some(Severity::High)
        } else if ratio >= self.medium {
            Some(Severity::Medium)
        } else if ratio >= self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Hotspot detection policy supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HotspotPolicy {
    pub threshold: HotspotThreshold,
    #[serde(default)]
    pub multiples: SeverityMultiples,
}

impl Default for HotspotPolicy {
    fn default() -> Self {
        Self {
            threshold: HotspotThreshold::Percentile(90.),
            multiples: SeverityMultiples::default(),
        }
    }
}

impl HotspotPolicy {
    pub fn absolute(threshold: f64) -> Self {
        Self {
            threshold: HotspotThreshold::Absolute(threshold),
            ..Default::default()
        }
    }

    pub fn percentile(percentile: f64) -> Self {
        Self {
            threshold: HotspotThreshold::Percentile(percentile),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match self.threshold {
            HotspotThreshold::Absolute(t) if !t.is_finite() => {
                return Err(ModelError::InvalidHotspotPolicy(format!(
                    "absolute threshold must be finite, got {}",
                    t
                )));
            }
            HotspotThreshold::Percentile(p) if !(0. ..=100.).contains(&p) => {
                return Err(ModelError::InvalidHotspotPolicy(format!(
                    "percentile must be within [0, 100], got {}",
                    p
                )));
            }
            _ => {}
        }
        let m = &self.multiples;
        let finite = [m.low, m.medium, m.high, m.critical].iter().all(|v| v.is_finite());
        if !(finite && m.low > 0. && m.low <= m.medium && m.medium <= m.high && m.high <= m.critical) {
            return Err(ModelError::InvalidHotspotPolicy(format!(
                "severity multiples must be positive and non-decreasing, got {:?}",
                m
            )));
        }
        Ok(())
    }

    /// Resolves the threshold for the given per-unit loads.
    pub fn resolve_threshold(&self, loads: &[f64], occupied: &[bool]) -> f64 {
        match self.threshold {
            HotspotThreshold::Absolute(t) => t,
            HotspotThreshold::Percentile(p) => {
                let mut values: Vec<f64> = loads
                    .iter()
                    .zip(occupied.iter())
                    .filter(|(_, occ)| **occ)
                    .map(|(load, _)| *load)
                    .collect();
                percentile(&mut values, p)
            }
        }
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = p.clamp(0., 100.) / 100. * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Contiguous run of units whose thermal load exceeds the threshold and reaches at least the `low`
/// severity multiple of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub range: UnitRange,
    pub peak_load: f64,
    pub total_load: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirflowConflictKind {
    /// Front-to-back next to back-to-front: exhaust of one device feeds the intake of the other.
    Opposing,
    /// Side-to-side next to a front/back device.
    Crossflow,
}

/// Advisory about two adjacent devices moving air against each other. Never blocks a placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirflowConflict {
    pub lower_device_id: DeviceId,
    pub upper_device_id: DeviceId,
    pub kind: AirflowConflictKind,
}

pub fn airflow_conflict(a: AirflowPattern, b: AirflowPattern) -> Option<AirflowConflictKind> {
    use AirflowPattern::*;
    match (a, b) {
        (FrontToBack, BackToFront) | (BackToFront, FrontToBack) => Some(AirflowConflictKind::Opposing),
        (SideToSide, FrontToBack | BackToFront) | (FrontToBack | BackToFront, SideToSide) => {
            Some(AirflowConflictKind::Crossflow)
        }
        _ => None,
    }
}

/// Summary of a rack's placement set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RackMetrics {
    pub total_power_watts: f64,
    pub total_weight_kg: f64,
    pub total_heat_btu_per_hr: f64,
    /// Ratio of total power to the rack budget, `None` when the budget is zero.
    pub power_utilization: Option<f64>,
    /// Ratio of total weight to the rack limit, `None` when the limit is zero.
    pub weight_utilization: Option<f64>,
    /// Heat attributed to each unit, index 0 is unit 1.
    pub unit_thermal_load: Vec<f64>,
    pub occupied_units: u32,
    pub hotspot_threshold: f64,
    pub hotspots: Vec<Hotspot>,
    pub airflow_conflicts: Vec<AirflowConflict>,
    /// Power and weight limits exceeded by the placement set (advisory).
    pub capacity_violations: Vec<CapacityViolation>,
    /// Placed devices with unknown power or weight.
    pub incomplete_devices: Vec<DeviceId>,
    /// Placements whose device has no profile; they are left out of every figure.
    pub missing_profiles: Vec<DeviceId>,
}

impl RackMetrics {
    /// Thermal load of the unit, `None` if the unit is outside of the rack.
    pub fn thermal_load_at(&self, unit: u32) -> Option<f64> {
        if unit == 0 {
            return None;
        }
        self.unit_thermal_load.get(unit as usize - 1).copied()
    }

    pub fn free_units(&self) -> u32 {
        self.unit_thermal_load.len() as u32 - self.occupied_units
    }
}

/// Distributes the heat output of each device evenly across the units it occupies.
/// Units outside of the rack are ignored.
pub fn unit_thermal_load<'a, I>(total_units: u32, items: I) -> Vec<f64>
where
    I: IntoIterator<Item = (&'a DeviceProfile, u32)>,
{
    let mut loads = vec![0.; total_units as usize];
    for (device, start) in items {
        if device.height_units == 0 {
            continue;
        }
        let per_unit = device.heat_output() / device.height_units as f64;
        for unit in UnitRange::from_height(start, device.height_units).units() {
            if unit >= 1 && unit <= total_units {
                loads[unit as usize - 1] += per_unit;
            }
        }
    }
    loads
}

/// Computes [`RackMetrics`] with a fixed hotspot policy.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    policy: HotspotPolicy,
}

impl MetricsAggregator {
    /// Fails if the policy is not valid.
    pub fn new(policy: HotspotPolicy) -> Result<Self, ModelError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &HotspotPolicy {
        &self.policy
    }

    pub fn aggregate(&self, rack: &RackCapacity, devices: &DeviceMap, placements: &[Placement]) -> RackMetrics {
        let mut sorted = placements.to_vec();
        sort_by_position(&mut sorted);

        let mut placed: Vec<(&DeviceProfile, &Placement)> = Vec::new();
        let mut missing_profiles = Vec::new();
        for p in sorted.iter() {
            match devices.get(&p.device_id) {
                Some(device) => placed.push((device, p)),
                None => missing_profiles.push(p.device_id.clone()),
            }
        }

        let mut total_power_watts = 0.;
        let mut total_weight_kg = 0.;
        let mut total_heat_btu_per_hr = 0.;
        let mut incomplete_devices = Vec::new();
        for (device, _) in placed.iter() {
            total_power_watts += device.power();
            total_weight_kg += device.weight();
            total_heat_btu_per_hr += device.heat_output();
            if !device.has_complete_data() {
                incomplete_devices.push(device.id.clone());
            }
        }

        let total_units = rack.total_units();
        let unit_thermal_load = unit_thermal_load(total_units, placed.iter().map(|(d, p)| (*d, p.start_unit)));

        let mut occupied = vec![false; total_units as usize];
        for (device, p) in placed.iter() {
            for unit in UnitRange::from_height(p.start_unit, device.height_units).units() {
                if unit >= 1 && unit <= total_units {
                    occupied[unit as usize - 1] = true;
                }
            }
        }
        let occupied_units = occupied.iter().filter(|o| **o).count() as u32;

        let hotspot_threshold = self.policy.resolve_threshold(&unit_thermal_load, &occupied);
        let hotspots = find_hotspots(&unit_thermal_load, hotspot_threshold, &self.policy.multiples);

        let mut airflow_conflicts = Vec::new();
        for pair in placed.windows(2) {
            let (lower, lp) = pair[0];
            let (upper, up) = pair[1];
            if lp.start_unit + lower.height_units != up.start_unit {
                continue;
            }
            if let Some(kind) = airflow_conflict(lower.airflow_pattern, upper.airflow_pattern) {
                airflow_conflicts.push(AirflowConflict {
                    lower_device_id: lower.id.clone(),
                    upper_device_id: upper.id.clone(),
                    kind,
                });
            }
        }

        let capacity_violations = capacity_violations(rack, total_power_watts, total_weight_kg);
        if !capacity_violations.is_empty() {
            log::debug!("rack capacity exceeded: {:?}", capacity_violations);
        }

        RackMetrics {
            total_power_watts,
            total_weight_kg,
            total_heat_btu_per_hr,
            power_utilization: utilization(total_power_watts, rack.max_power_watts()),
            weight_utilization: utilization(total_weight_kg, rack.max_weight_kg()),
            unit_thermal_load,
            occupied_units,
            hotspot_threshold,
            hotspots,
            airflow_conflicts,
            capacity_violations,
            incomplete_devices,
            missing_profiles,
        }
    }
}

fn utilization(total: f64, limit: f64) -> Option<f64> {
    if limit > 0. {
        Some(total / limit)
    } else {
        None
    }
}

fn find_hotspots(loads: &[f64], threshold: f64, multiples: &SeverityMultiples) -> Vec<Hotspot> {
    let mut hotspots = Vec::new();
    if threshold <= 0. {
        return hotspots;
    }
    let mut run: Option<(usize, f64, f64)> = None;
    for (i, load) in loads.iter().copied().chain(std::iter::once(f64::NEG_INFINITY)).enumerate() {
        if load > threshold && multiples.classify(load / threshold).is_some() {
            run = Some(match run {
                Some((start, peak, total)) => (start, peak.max(load), total + load),
                None => (i, load, load),
            });
        } else if let Some((start, peak, total)) = run.take() {
            if let Some(severity) = multiples.classify(peak / threshold) {
                hotspots.push(Hotspot {
                    range: UnitRange::new(start as u32 + 1, i as u32),
                    peak_load: peak,
                    total_load: total,
                    severity,
                });
            }
        }
    }
    hotspots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let mut v = vec![4., 1., 3., 2.];
        assert_eq!(percentile(&mut v, 0.), 1.);
        assert_eq!(percentile(&mut v, 100.), 4.);
        assert_eq!(percentile(&mut v, 50.), 2.5);
        assert_eq!(percentile(&mut [], 90.), 0.);
    }

    #[test]
    fn test_find_hotspots() {
        let loads = [0., 150., 250., 0., 100., 400., 400.];
        let hotspots = find_hotspots(&loads, 100., &SeverityMultiples::default());
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].range, UnitRange::new(2, 3));
        assert_eq!(hotspots[0].peak_load, 250.);
        assert_eq!(hotspots[0].total_load, 400.);
        assert_eq!(hotspots[0].severity, Severity::High);
        assert_eq!(hotspots[1].range, UnitRange::new(6, 7));
        assert_eq!(hotspots[1].severity, Severity::Critical);
        assert!(find_hotspots(&loads, 0., &SeverityMultiples::default()).is_empty());
    }

    #[test]
    fn test_severity() {
        let m = SeverityMultiples::default();
        assert_eq!(m.classify(1.2), Some(Severity::Low));
        assert_eq!(m.classify(1.5), Some(Severity::Medium));
        assert_eq!(m.classify(2.9), Some(Severity::High));
        assert_eq!(m.classify(3.0), Some(Severity::Critical));
        assert_eq!(m.classify(0.9), None);
    }

    #[test]
    fn test_hotspot_below_low_multiple() {
        let multiples = SeverityMultiples {
            low: 1.2,
            ..Default::default()
        };
        let loads = [0., 110., 130., 110., 0., 115.];
        let hotspots = find_hotspots(&loads, 100., &multiples);
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].range, UnitRange::new(3, 3));
        assert_eq!(hotspots[0].severity, Severity::Low);
    }

    #[test]
    fn test_invalid_policy() {
        assert!(MetricsAggregator::new(HotspotPolicy::percentile(150.)).is_err());
        assert!(MetricsAggregator::new(HotspotPolicy::absolute(f64::NAN)).is_err());
        let unordered = HotspotPolicy {
            multiples: SeverityMultiples {
                low: 2.,
                medium: 1.5,
                high: 2.,
                critical: 3.,
            },
            ..HotspotPolicy::absolute(100.)
        };
        assert!(matches!(
            MetricsAggregator::new(unordered),
            Err(ModelError::InvalidHotspotPolicy(_))
        ));
        assert!(MetricsAggregator::new(HotspotPolicy::default()).is_ok());
    }

    #[test]
    fn test_airflow_conflict() {
        use AirflowPattern::*;
        assert_eq!(airflow_conflict(FrontToBack, BackToFront), Some(AirflowConflictKind::Opposing));
        assert_eq!(airflow_conflict(SideToSide, BackToFront), Some(AirflowConflictKind::Crossflow));
        assert_eq!(airflow_conflict(FrontToBack, FrontToBack), None);
        assert_eq!(airflow_conflict(SideToSide, SideToSide), None);
        assert_eq!(airflow_conflict(Passive, BackToFront), None);
        assert_eq!(airflow_conflict(Unknown, FrontToBack), None);
    }
}
