//! Placement validation.
//!
//! Every check here is a pure function of its arguments: nothing is cached or mutated, so the
//! validator can be shared between threads and called from the optimizer's inner loop.

use std::collections::BTreeSet;

use crate::error::{CapacityViolation, PlacementError, Resource};
use crate::model::{DeviceId, DeviceMap, DeviceProfile, Placement, RackCapacity};

/// Checks that the placement lies within the rack.
pub fn check_bounds(rack: &RackCapacity, placement: &Placement) -> Result<(), PlacementError> {
    let range = placement.range();
    if placement.height_units == 0 || !rack.contains(&range) {
        return Err(PlacementError::OutOfBounds {
            device_id: placement.device_id.clone(),
            range,
            total_units: rack.total_units(),
        });
    }
    Ok(())
}

/// Validates a single candidate placement against the placements already in the rack.
///
/// If `existing` contains a placement of the same device, it is treated as the prior position of
/// the device being moved and is excluded from the collision set. Conflicts are searched in
/// ascending order of start unit, so the reported conflict is the lowest one.
pub fn validate(rack: &RackCapacity, existing: &[Placement], candidate: &Placement) -> Result<(), PlacementError> {
    check_bounds(rack, candidate)?;

    let range = candidate.range();
    let mut others: Vec<&Placement> = existing
        .iter()
        .filter(|p| p.device_id != candidate.device_id)
        .collect();
    others.sort_by(|a, b| a.start_unit.cmp(&b.start_unit).then_with(|| a.device_id.cmp(&b.device_id)));

    match others.into_iter().find(|p| p.range().intersects(&range)) {
        Some(conflict) => Err(PlacementError::Overlap {
            device_id: candidate.device_id.clone(),
            conflicting_device_id: conflict.device_id.clone(),
            conflicting_range: conflict.range(),
        }),
        None => Ok(()),
    }
}

/// Validates moving an already placed device to `new_start`.
pub fn validate_move(
    rack: &RackCapacity,
    existing: &[Placement],
    device_id: &DeviceId,
    new_start: u32,
) -> Result<Placement, PlacementError> {
    let current = existing
        .iter()
        .find(|p| &p.device_id == device_id)
        .ok_or_else(|| PlacementError::NotPlaced {
            device_id: device_id.clone(),
        })?;
    let moved = current.moved_to(new_start);
    validate(rack, existing, &moved)?;
    Ok(moved)
}

/// Validates a whole placement set at once and returns every violation found.
///
/// Placements are sorted by start unit and swept once, keeping the set of placements whose range
/// is still open at the current start. Bounds, duplicates and overlaps are all detected in the same
/// pass. Each overlapping pair is reported once, against the later-starting placement.
pub fn validate_set(rack: &RackCapacity, placements: &[Placement]) -> Result<(), Vec<PlacementError>> {
    let mut errors = Vec::new();

    let mut sorted: Vec<&Placement> = placements.iter().collect();
    sorted.sort_by(|a, b| a.start_unit.cmp(&b.start_unit).then_with(|| a.device_id.cmp(&b.device_id)));

    let mut seen = BTreeSet::new();
    let mut active: Vec<&Placement> = Vec::new();
    for p in sorted {
        if !seen.insert(&p.device_id) {
            errors.push(PlacementError::DuplicateDevice {
                device_id: p.device_id.clone(),
            });
        }
        if let Err(e) = check_bounds(rack, p) {
            errors.push(e);
        }

        active.retain(|a| a.end_unit() >= p.start_unit);
        for a in active.iter() {
            errors.push(PlacementError::Overlap {
                device_id: p.device_id.clone(),
                conflicting_device_id: a.device_id.clone(),
                conflicting_range: a.range(),
            });
        }
        if p.height_units > 0 {
            active.push(p);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks aggregate power and weight of the placed devices against the rack limits.
pub fn check_capacity(
    rack: &RackCapacity,
    devices: &DeviceMap,
    placements: &[Placement],
) -> Result<(), Vec<PlacementError>> {
    let mut errors = Vec::new();
    let mut power = 0.;
    let mut weight = 0.;
    for p in placements {
        match devices.get(&p.device_id) {
            Some(device) => {
                power += device.power();
                weight += device.weight();
            }
            None => errors.push(PlacementError::UnknownDevice {
                device_id: p.device_id.clone(),
            }),
        }
    }
    errors.extend(
        capacity_violations(rack, power, weight)
            .into_iter()
            .map(PlacementError::CapacityExceeded),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Returns the power and weight limits exceeded by the given totals.
pub fn capacity_violations(rack: &RackCapacity, power: f64, weight: f64) -> Vec<CapacityViolation> {
    let mut violations = Vec::new();
    if power > rack.max_power_watts() {
        violations.push(CapacityViolation {
            resource: Resource::Power,
            total: power,
            limit: rack.max_power_watts(),
        });
    }
    if weight > rack.max_weight_kg() {
        violations.push(CapacityViolation {
            resource: Resource::Weight,
            total: weight,
            limit: rack.max_weight_kg(),
        });
    }
    violations
}

/// Returns the devices that cannot be accommodated in the rack under any arrangement.
///
/// Devices are admitted in the given order while their cumulative height, power and weight stay
/// within the rack limits; every device that would push a total over its limit is returned.
pub fn find_unaccommodated(rack: &RackCapacity, devices: &[&DeviceProfile]) -> Vec<DeviceId> {
    let mut result = Vec::new();
    let mut height = 0u64;
    let mut power = 0.;
    let mut weight = 0.;
    for device in devices {
        let next_height = height + device.height_units as u64;
        let next_power = power + device.power();
        let next_weight = weight + device.weight();
        if next_height <= rack.total_units() as u64
            && next_power <= rack.max_power_watts()
            && next_weight <= rack.max_weight_kg()
        {
            height = next_height;
            power = next_power;
            weight = next_weight;
        } else {
            result.push(device.id.clone());
        }
    }
    result
}
