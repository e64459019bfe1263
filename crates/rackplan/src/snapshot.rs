//! Rack snapshot files.
//!
//! A snapshot describes one rack, the profiles of its devices and their current placements:
//!
//! ```yaml
//! rack:
//!   id: r1
//!   total_units: 42
//!   max_power_watts: 5000
//!   max_weight_kg: 800
//! devices:
//!   - id: srv-1
//!     height_units: 2
//!     power_watts: 450
//!     weight_kg: 25
//!     airflow_pattern: front_to_back
//! placements:
//!   - device: srv-1
//!     start_unit: 1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::HotspotPolicy;
use crate::model::{DeviceId, DeviceMap, DeviceProfile, Placement, RackCapacity, RackId};
use crate::rack_state::RackState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackSpec {
    pub id: RackId,
    pub total_units: u32,
    /// Both limits are required. Zero is a real budget, not "unlimited".
    pub max_power_watts: f64,
    pub max_weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementSpec {
    #[serde(alias = "device_id")]
    pub device: DeviceId,
    pub start_unit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackSnapshot {
    pub rack: RackSpec,
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
    #[serde(default)]
    pub placements: Vec<PlacementSpec>,
}

/// Snapshot converted to the model types.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSnapshot {
    pub rack_id: RackId,
    pub capacity: RackCapacity,
    pub devices: DeviceMap,
    pub placements: Vec<Placement>,
}

impl RackSnapshot {
    /// Reads a snapshot from a JSON file (`.json` extension) or a YAML file (anything else).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        match Path::new(file_name).extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&data),
            _ => Self::from_yaml_str(&data),
        }
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Checks the snapshot and converts it to the model types. Placement heights are taken from the
    /// device profiles.
    pub fn resolve(&self) -> Result<ResolvedSnapshot, ConfigError> {
        let capacity = RackCapacity::new(self.rack.total_units, self.rack.max_power_watts, self.rack.max_weight_kg)?;

        let mut devices = DeviceMap::new();
        for profile in self.devices.iter() {
            profile.validate()?;
            if devices.insert(profile.id.clone(), profile.clone()).is_some() {
                return Err(ConfigError::Invalid(format!("device {} is listed twice", profile.id)));
            }
        }

        let mut placements = Vec::with_capacity(self.placements.len());
        for spec in self.placements.iter() {
            let profile = devices.get(&spec.device).ok_or_else(|| {
                ConfigError::Invalid(format!("placement of device {} without a profile", spec.device))
            })?;
            placements.push(Placement::new(self.rack.id.clone(), profile, spec.start_unit));
        }

        Ok(ResolvedSnapshot {
            rack_id: self.rack.id.clone(),
            capacity,
            devices,
            placements,
        })
    }
}

impl ResolvedSnapshot {
    /// Builds a live rack state by placing the devices one by one.
    pub fn to_rack_state(&self, policy: HotspotPolicy) -> Result<RackState, ConfigError> {
        let mut rack = RackState::with_policy(self.rack_id.clone(), self.capacity, self.devices.clone(), policy)?;
        for p in self.placements.iter() {
            rack.assign(&p.device_id, p.start_unit)?;
        }
        Ok(rack)
    }
}
