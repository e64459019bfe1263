//! Live placement state of racks.
//!
//! Every mutation is checked by the validator before it is applied and either applies completely or
//! not at all. Metrics are recomputed after each accepted mutation.

use std::collections::BTreeMap;

use crate::error::{ModelError, OptimizeError, PlacementError};
use crate::metrics::{HotspotPolicy, MetricsAggregator, RackMetrics};
use crate::model::{sort_by_position, DeviceId, DeviceMap, DeviceProfile, Placement, RackCapacity, RackId};
use crate::optimizer::{LayoutOptimizer, LayoutProposal};
use crate::validator::{validate, validate_move, validate_set};
use crate::weights::OptimizationWeights;

////////////////////////////////////////////////////////////////////////////////////////////////////

/// One rack with its device profiles and placements.
#[derive(Debug, Clone)]
pub struct RackState {
    id: RackId,
    capacity: RackCapacity,
    devices: DeviceMap,
    placements: BTreeMap<DeviceId, Placement>,
    aggregator: MetricsAggregator,
    metrics: RackMetrics,
}

impl RackState {
    pub fn new(id: impl Into<RackId>, capacity: RackCapacity, devices: DeviceMap) -> Self {
        Self::with_aggregator(id.into(), capacity, devices, MetricsAggregator::default())
    }

    /// Creates an empty rack whose metrics use the given hotspot policy.
    pub fn with_policy(
        id: impl Into<RackId>,
        capacity: RackCapacity,
        devices: DeviceMap,
        policy: HotspotPolicy,
    ) -> Result<Self, ModelError> {
        let aggregator = MetricsAggregator::new(policy)?;
        Ok(Self::with_aggregator(id.into(), capacity, devices, aggregator))
    }

    fn with_aggregator(id: RackId, capacity: RackCapacity, devices: DeviceMap, aggregator: MetricsAggregator) -> Self {
        let metrics = aggregator.aggregate(&capacity, &devices, &[]);
        Self {
            id,
            capacity,
            devices,
            placements: BTreeMap::new(),
            aggregator,
            metrics,
        }
    }

    pub fn id(&self) -> &RackId {
        &self.id
    }

    pub fn capacity(&self) -> &RackCapacity {
        &self.capacity
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    /// Current placements ordered by start unit.
    pub fn placements(&self) -> Vec<Placement> {
        let mut placements: Vec<Placement> = self.placements.values().cloned().collect();
        sort_by_position(&mut placements);
        placements
    }

    pub fn placement(&self, device_id: &DeviceId) -> Option<&Placement> {
        self.placements.get(device_id)
    }

    pub fn is_placed(&self, device_id: &DeviceId) -> bool {
        self.placements.contains_key(device_id)
    }

    pub fn metrics(&self) -> &RackMetrics {
        &self.metrics
    }

    /// Registers or updates a device profile. The height of a placed device can't be changed.
    pub fn add_device(&mut self, profile: DeviceProfile) -> Result<(), ModelError> {
        profile.validate()?;
        if let Some(p) = self.placements.get(&profile.id) {
            if p.height_units != profile.height_units {
                return Err(ModelError::InvalidProfile {
                    device_id: profile.id.clone(),
                    reason: format!("device is placed at {} and can't change its height", p.range()),
                });
            }
        }
        self.devices.insert(profile.id.clone(), profile);
        self.refresh();
        Ok(())
    }

    /// Checks whether the device can be placed at `start_unit` and returns the placement.
    pub fn can_place(&self, device_id: &DeviceId, start_unit: u32) -> Result<Placement, PlacementError> {
        let device = self.devices.get(device_id).ok_or_else(|| PlacementError::UnknownDevice {
            device_id: device_id.clone(),
        })?;
        if self.is_placed(device_id) {
            return Err(PlacementError::DuplicateDevice {
                device_id: device_id.clone(),
            });
        }
        let candidate = Placement::new(self.id.clone(), device, start_unit);
        validate(&self.capacity, &self.placements(), &candidate)?;
        Ok(candidate)
    }

    pub fn assign(&mut self, device_id: &DeviceId, start_unit: u32) -> Result<(), PlacementError> {
        let placement = self.can_place(device_id, start_unit)?;
        log::debug!("rack {}: placed {} at {}", self.id, device_id, placement.range());
        self.placements.insert(device_id.clone(), placement);
        self.refresh();
        Ok(())
    }

    pub fn move_device(&mut self, device_id: &DeviceId, new_start: u32) -> Result<(), PlacementError> {
        let moved = match validate_move(&self.capacity, &self.placements(), device_id, new_start) {
            Ok(moved) => moved,
            Err(e) => {
                log::debug!("rack {}: rejected move of {}: {}", self.id, device_id, e);
                return Err(e);
            }
        };
        log::debug!("rack {}: moved {} to {}", self.id, device_id, moved.range());
        self.placements.insert(device_id.clone(), moved);
        self.refresh();
        Ok(())
    }

    pub fn unassign(&mut self, device_id: &DeviceId) -> Result<Placement, PlacementError> {
        let removed = self.placements.remove(device_id).ok_or_else(|| PlacementError::NotPlaced {
            device_id: device_id.clone(),
        })?;
        log::debug!("rack {}: removed {} from {}", self.id, device_id, removed.range());
        self.refresh();
        Ok(removed)
    }

    /// Changes the rack capacity, provided that every current placement still fits.
    pub fn resize(&mut self, capacity: RackCapacity) -> Result<(), Vec<PlacementError>> {
        validate_set(&capacity, &self.placements())?;
        log::debug!(
            "rack {}: resized to {}U, {} W, {} kg",
            self.id,
            capacity.total_units(),
            capacity.max_power_watts(),
            capacity.max_weight_kg()
        );
        self.capacity = capacity;
        self.refresh();
        Ok(())
    }

    /// Applies a proposal computed for this rack as a single operation.
    ///
    /// The proposal is checked against the live state first: it must cover exactly the placed
    /// devices, every device must still be where the proposal expects it to be, and the resulting
    /// placement set must validate against the current capacity. Otherwise nothing is changed and
    /// [`PlacementError::StaleProposal`] lists what doesn't match.
    pub fn apply_proposal(&mut self, proposal: &LayoutProposal) -> Result<(), PlacementError> {
        let mut problems = Vec::new();

        let moved_from: BTreeMap<&DeviceId, u32> = proposal.moves.iter().map(|m| (&m.device_id, m.from_unit)).collect();
        for p in proposal.placements.iter() {
            if p.rack_id != self.id {
                problems.push(PlacementError::DeviceInOtherRack {
                    device_id: p.device_id.clone(),
                    rack_id: p.rack_id.clone(),
                });
                continue;
            }
            let live = match self.placements.get(&p.device_id) {
                Some(live) => live,
                None => {
                    problems.push(PlacementError::NotPlaced {
                        device_id: p.device_id.clone(),
                    });
                    continue;
                }
            };
            let expected_unit = moved_from.get(&p.device_id).copied().unwrap_or(p.start_unit);
            if live.start_unit != expected_unit {
                problems.push(PlacementError::PositionChanged {
                    device_id: p.device_id.clone(),
                    expected_unit,
                    actual_unit: live.start_unit,
                });
            }
        }
        for device_id in self.placements.keys() {
            if proposal.placement_of(device_id).is_none() {
                problems.push(PlacementError::MissingFromProposal {
                    device_id: device_id.clone(),
                });
            }
        }
        if let Err(errors) = validate_set(&self.capacity, &proposal.placements) {
            problems.extend(errors);
        }

        if !problems.is_empty() {
            log::debug!("rack {}: rejected stale proposal: {:?}", self.id, problems);
            return Err(PlacementError::StaleProposal { problems });
        }

        self.placements = proposal
            .placements
            .iter()
            .map(|p| (p.device_id.clone(), p.clone()))
            .collect();
        log::debug!("rack {}: applied proposal with {} moves", self.id, proposal.moves.len());
        self.refresh();
        Ok(())
    }

    /// Runs the optimizer on a snapshot of this rack.
    pub fn optimize(
        &self,
        optimizer: &LayoutOptimizer,
        weights: &OptimizationWeights,
        iteration_budget: u64,
    ) -> Result<LayoutProposal, OptimizeError> {
        optimizer.optimize(&self.capacity, &self.devices, &self.placements(), weights, iteration_budget)
    }

    fn refresh(&mut self) {
        self.metrics = self.aggregator.aggregate(&self.capacity, &self.devices, &self.placements());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Set of racks in which each device is placed in at most one rack.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    racks: BTreeMap<RackId, RackState>,
    locations: BTreeMap<DeviceId, RackId>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rack(&mut self, rack: RackState) -> Result<(), PlacementError> {
        if self.racks.contains_key(rack.id()) {
            return Err(PlacementError::DuplicateRack {
                rack_id: rack.id().clone(),
            });
        }
        for device_id in rack.placements.keys() {
            if let Some(other) = self.locations.get(device_id) {
                return Err(PlacementError::DeviceInOtherRack {
                    device_id: device_id.clone(),
                    rack_id: other.clone(),
                });
            }
        }
        for device_id in rack.placements.keys() {
            self.locations.insert(device_id.clone(), rack.id().clone());
        }
        self.racks.insert(rack.id().clone(), rack);
        Ok(())
    }

    pub fn rack(&self, rack_id: &RackId) -> Option<&RackState> {
        self.racks.get(rack_id)
    }

    pub fn racks(&self) -> impl Iterator<Item = &RackState> {
        self.racks.values()
    }

    /// Returns the rack the device is placed in.
    pub fn locate(&self, device_id: &DeviceId) -> Option<&RackId> {
        self.locations.get(device_id)
    }

    pub fn assign(&mut self, rack_id: &RackId, device_id: &DeviceId, start_unit: u32) -> Result<(), PlacementError> {
        if let Some(other) = self.locations.get(device_id) {
            if other != rack_id {
                return Err(PlacementError::DeviceInOtherRack {
                    device_id: device_id.clone(),
                    rack_id: other.clone(),
                });
            }
        }
        self.rack_mut(rack_id)?.assign(device_id, start_unit)?;
        self.locations.insert(device_id.clone(), rack_id.clone());
        Ok(())
    }

    pub fn move_device(&mut self, device_id: &DeviceId, new_start: u32) -> Result<(), PlacementError> {
        let rack_id = self.located(device_id)?;
        self.rack_mut(&rack_id)?.move_device(device_id, new_start)
    }

    pub fn unassign(&mut self, device_id: &DeviceId) -> Result<Placement, PlacementError> {
        let rack_id = self.located(device_id)?;
        let removed = self.rack_mut(&rack_id)?.unassign(device_id)?;
        self.locations.remove(device_id);
        Ok(removed)
    }

    /// Moves a device to another rack. The device stays where it is if it doesn't fit the target.
    pub fn relocate(&mut self, device_id: &DeviceId, to_rack: &RackId, start_unit: u32) -> Result<(), PlacementError> {
        let from_rack = self.located(device_id)?;
        if &from_rack == to_rack {
            return self.move_device(device_id, start_unit);
        }
        let profile = self
            .racks
            .get(&from_rack)
            .and_then(|rack| rack.devices.get(device_id))
            .cloned()
            .ok_or_else(|| PlacementError::UnknownDevice {
                device_id: device_id.clone(),
            })?;

        let target = self.rack_mut(to_rack)?;
        let mut staged = target.clone();
        staged.devices.insert(device_id.clone(), profile);
        staged.assign(device_id, start_unit)?;
        *target = staged;

        self.rack_mut(&from_rack)?.unassign(device_id)?;
        self.locations.insert(device_id.clone(), to_rack.clone());
        log::debug!("relocated {} from rack {} to rack {}", device_id, from_rack, to_rack);
        Ok(())
    }

    pub fn resize(&mut self, rack_id: &RackId, capacity: RackCapacity) -> Result<(), Vec<PlacementError>> {
        self.rack_mut(rack_id).map_err(|e| vec![e])?.resize(capacity)
    }

    pub fn apply_proposal(&mut self, rack_id: &RackId, proposal: &LayoutProposal) -> Result<(), PlacementError> {
        self.rack_mut(rack_id)?.apply_proposal(proposal)
    }

    fn located(&self, device_id: &DeviceId) -> Result<RackId, PlacementError> {
        self.locations.get(device_id).cloned().ok_or_else(|| PlacementError::NotPlaced {
            device_id: device_id.clone(),
        })
    }

    fn rack_mut(&mut self, rack_id: &RackId) -> Result<&mut RackState, PlacementError> {
        self.racks.get_mut(rack_id).ok_or_else(|| PlacementError::UnknownRack {
            rack_id: rack_id.clone(),
        })
    }
}
