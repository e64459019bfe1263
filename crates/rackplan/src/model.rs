//! Physical data model shared by the validator, the metrics aggregator and the optimizer.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Heat output in BTU/hr produced by one watt of electrical draw.
pub const BTU_PER_HR_PER_WATT: f64 = 3.412;

/// Opaque device identifier supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque rack identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RackId(String);

impl RackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed range of rack units `[start, end]`. Units are numbered from 1 at the bottom of the rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRange {
    pub start: u32,
    pub end: u32,
}

impl UnitRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Range occupied by a device of `height` units whose bottom edge sits at `start`.
    pub fn from_height(start: u32, height: u32) -> Self {
        Self {
            start,
            end: start.saturating_add(height).saturating_sub(1),
        }
    }

    pub fn len(&self) -> u32 {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn intersects(&self, other: &UnitRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, unit: u32) -> bool {
        self.start <= unit && unit <= self.end
    }

    pub fn units(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for UnitRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "U{}-U{}", self.start, self.end)
    }
}

#[derive(Deserialize)]
struct RawRackCapacity {
    total_units: u32,
    max_power_watts: f64,
    max_weight_kg: f64,
}

/// Physical limits of a rack. Once constructed the limits never change; a rack is resized by
/// replacing its capacity as a whole (see [`RackState::resize`](crate::rack_state::RackState::resize)).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRackCapacity")]
pub struct RackCapacity {
    total_units: u32,
    max_power_watts: f64,
    max_weight_kg: f64,
}

impl RackCapacity {
    pub fn new(total_units: u32, max_power_watts: f64, max_weight_kg: f64) -> Result<Self, ModelError> {
        if total_units == 0 {
            return Err(ModelError::InvalidCapacity("rack must have at least one unit".to_string()));
        }
        if !(max_power_watts.is_finite() && max_power_watts >= 0.) {
            return Err(ModelError::InvalidCapacity(format!(
                "max power must be a non-negative number, got {}",
                max_power_watts
            )));
        }
        if !(max_weight_kg.is_finite() && max_weight_kg >= 0.) {
            return Err(ModelError::InvalidCapacity(format!(
                "max weight must be a non-negative number, got {}",
                max_weight_kg
            )));
        }
        Ok(Self {
            total_units,
            max_power_watts,
            max_weight_kg,
        })
    }

    pub fn total_units(&self) -> u32 {
        self.total_units
    }

    pub fn max_power_watts(&self) -> f64 {
        self.max_power_watts
    }

    pub fn max_weight_kg(&self) -> f64 {
        self.max_weight_kg
    }

    /// Returns true if the range lies entirely inside the rack.
    pub fn contains(&self, range: &UnitRange) -> bool {
        range.start >= 1 && range.end <= self.total_units
    }
}

impl TryFrom<RawRackCapacity> for RackCapacity {
    type Error = ModelError;

    fn try_from(raw: RawRackCapacity) -> Result<Self, Self::Error> {
        Self::new(raw.total_units, raw.max_power_watts, raw.max_weight_kg)
    }
}

/// Direction in which a device moves cooling air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirflowPattern {
    FrontToBack,
    BackToFront,
    SideToSide,
    Passive,
    #[default]
    Unknown,
}

/// Physical and electrical attributes of a device as supplied by the catalog.
///
/// Power and weight may be unknown; they count as zero in aggregates and mark the device as having
/// incomplete data, which lowers optimizer confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: DeviceId,
    pub height_units: u32,
    #[serde(default)]
    pub power_watts: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    /// Explicit heat output. When absent it is derived from power draw.
    #[serde(default)]
    pub heat_output_btu_per_hr: Option<f64>,
    #[serde(default, alias = "airflow")]
    pub airflow_pattern: AirflowPattern,
}

impl DeviceProfile {
    pub fn new(id: impl Into<DeviceId>, height_units: u32) -> Self {
        Self {
            id: id.into(),
            height_units,
            power_watts: None,
            weight_kg: None,
            heat_output_btu_per_hr: None,
            airflow_pattern: AirflowPattern::Unknown,
        }
    }

    pub fn with_power(mut self, watts: f64) -> Self {
        self.power_watts = Some(watts);
        self
    }

    pub fn with_weight(mut self, kg: f64) -> Self {
        self.weight_kg = Some(kg);
        self
    }

    pub fn with_heat_output(mut self, btu_per_hr: f64) -> Self {
        self.heat_output_btu_per_hr = Some(btu_per_hr);
        self
    }

    pub fn with_airflow(mut self, airflow: AirflowPattern) -> Self {
        self.airflow_pattern = airflow;
        self
    }

    /// Power draw in watts, unknown values count as zero.
    pub fn power(&self) -> f64 {
        self.power_watts.unwrap_or(0.)
    }

    /// Weight in kilograms, unknown values count as zero.
    pub fn weight(&self) -> f64 {
        self.weight_kg.unwrap_or(0.)
    }

    /// Heat output in BTU/hr, derived from power draw when not specified explicitly.
    pub fn heat_output(&self) -> f64 {
        self.heat_output_btu_per_hr
            .unwrap_or_else(|| self.power() * BTU_PER_HR_PER_WATT)
    }

    pub fn has_complete_data(&self) -> bool {
        self.power_watts.is_some() && self.weight_kg.is_some()
    }

    /// Checks that the profile describes a physically possible device.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.height_units == 0 {
            return Err(ModelError::InvalidProfile {
                device_id: self.id.clone(),
                reason: "height must be at least 1U".to_string(),
            });
        }
        let values = [
            ("power", self.power_watts),
            ("weight", self.weight_kg),
            ("heat output", self.heat_output_btu_per_hr),
        ];
        for (name, value) in values {
            if let Some(v) = value {
                if !(v.is_finite() && v >= 0.) {
                    return Err(ModelError::InvalidProfile {
                        device_id: self.id.clone(),
                        reason: format!("{} must be a non-negative number, got {}", name, v),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Device profiles indexed by id. Ordered so that every aggregate is computed in the same order.
pub type DeviceMap = BTreeMap<DeviceId, DeviceProfile>;

/// Builds a [`DeviceMap`] from a list of profiles.
pub fn device_map<I: IntoIterator<Item = DeviceProfile>>(profiles: I) -> DeviceMap {
    profiles.into_iter().map(|p| (p.id.clone(), p)).collect()
}

/// Assignment of one device to a contiguous range of units in one rack.
///
/// The device height is copied from its profile when the placement is created, so that placements
/// can be validated without consulting the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub rack_id: RackId,
    pub device_id: DeviceId,
    pub start_unit: u32,
    pub height_units: u32,
}

impl Placement {
    pub fn new(rack_id: impl Into<RackId>, device: &DeviceProfile, start_unit: u32) -> Self {
        Self {
            rack_id: rack_id.into(),
            device_id: device.id.clone(),
            start_unit,
            height_units: device.height_units,
        }
    }

    pub fn with_height(
        rack_id: impl Into<RackId>,
        device_id: impl Into<DeviceId>,
        start_unit: u32,
        height_units: u32,
    ) -> Self {
        Self {
            rack_id: rack_id.into(),
            device_id: device_id.into(),
            start_unit,
            height_units,
        }
    }

    pub fn end_unit(&self) -> u32 {
        self.range().end
    }

    pub fn range(&self) -> UnitRange {
        UnitRange::from_height(self.start_unit, self.height_units)
    }

    /// Returns a copy of this placement moved to another start unit.
    pub fn moved_to(&self, start_unit: u32) -> Self {
        Self {
            start_unit,
            ..self.clone()
        }
    }
}

/// Sorts placements by start unit, then by device id.
pub fn sort_by_position(placements: &mut [Placement]) {
    placements.sort_by(|a, b| a.start_unit.cmp(&b.start_unit).then_with(|| a.device_id.cmp(&b.device_id)));
}
