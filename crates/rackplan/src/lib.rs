#![doc = include_str!("../README.md")]

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod rack_state;
pub mod snapshot;
pub mod validator;
pub mod weights;

pub use api::{compute_metrics, optimize_layout, validate_placement};
pub use error::{ConfigError, ModelError, OptimizeError, PlacementError, WeightsError};
pub use model::{AirflowPattern, DeviceId, DeviceProfile, Placement, RackCapacity, RackId};
