//! Typed representation of a robot's map, and the normalization/validation
//! logic that sits between the decoder and the state tracker.

mod flat_pairs;
mod normalize;
mod types;
mod validate;

pub use normalize::normalize;
pub use types::{Entity, EntityType, Layer, LayerType, Map, MapMetadata};
pub use validate::{is_map_complete, validate_for_calibration};
