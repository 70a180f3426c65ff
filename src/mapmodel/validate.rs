//! Validation for calibration eligibility and map completeness.

use crate::errors::MapValidationError;

use super::types::{EntityType, Map};

/// A map is valid for calibration iff it has drawable content and both
/// robot and charger positions with at least two points each.
pub fn validate_for_calibration(
    map: Option<&Map>,
    min_entity_points: usize,
) -> Result<(), MapValidationError> {
    let map = map.ok_or(MapValidationError::NilMap)?;

    let any_pixels = map.layers.iter().any(|l| l.has_drawable_pixels());
    let any_area = map.layers.iter().any(|l| l.area > 0.0);
    let path_points: usize = map
        .entities_of_type(&EntityType::Path)
        .map(|e| e.points.len())
        .sum();
    if !(any_pixels || any_area || path_points >= min_entity_points) {
        return Err(MapValidationError::NoDrawablePixels);
    }

    if map.first_entity_with_min_points(&EntityType::RobotPosition, 2).is_none() {
        return Err(MapValidationError::NoRobotPosition);
    }
    if map.first_entity_with_min_points(&EntityType::ChargerLocation, 2).is_none() {
        return Err(MapValidationError::NoChargerLocation);
    }

    Ok(())
}

/// Rejects partial maps received during active cleaning: the new map must
/// validate, and if the last known good map had area, the new map must
/// retain at least 80% of it.
pub fn is_map_complete(new: &Map, last_known_good: Option<&Map>, min_entity_points: usize) -> bool {
    if validate_for_calibration(Some(new), min_entity_points).is_err() {
        return false;
    }
    match last_known_good {
        Some(last) if last.metadata.total_layer_area > 0.0 => {
            new.metadata.total_layer_area / last.metadata.total_layer_area >= 0.8
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::types::{Entity, Layer, LayerType, MapMetadata};

    fn entity(t: EntityType, n_points: usize) -> Entity {
        Entity { entity_type: t, points: vec![(0.0, 0.0); n_points], metadata: Default::default() }
    }

    fn valid_map() -> Map {
        Map {
            pixel_size: 10,
            size: (5, 5),
            metadata: MapMetadata { total_layer_area: 100.0, ..Default::default() },
            layers: vec![Layer {
                layer_type: LayerType::Wall,
                pixels: vec![(0.0, 0.0)],
                compressed_pixels: None,
                segment_id: None,
                name: None,
                area: 0.0,
                active: None,
            }],
            entities: vec![entity(EntityType::RobotPosition, 2), entity(EntityType::ChargerLocation, 2)],
            normalized: true,
        }
    }

    #[test]
    fn nil_map_fails() {
        assert_eq!(validate_for_calibration(None, 10), Err(MapValidationError::NilMap));
    }

    #[test]
    fn valid_map_passes() {
        assert!(validate_for_calibration(Some(&valid_map()), 10).is_ok());
    }

    #[test]
    fn missing_charger_fails() {
        let mut m = valid_map();
        m.entities.retain(|e| e.entity_type != EntityType::ChargerLocation);
        assert_eq!(
            validate_for_calibration(Some(&m), 10),
            Err(MapValidationError::NoChargerLocation)
        );
    }

    #[test]
    fn no_drawable_content_fails() {
        let mut m = valid_map();
        m.layers[0].pixels = vec![];
        assert_eq!(
            validate_for_calibration(Some(&m), 10),
            Err(MapValidationError::NoDrawablePixels)
        );
    }

    #[test]
    fn path_points_can_satisfy_drawable_requirement() {
        let mut m = valid_map();
        m.layers[0].pixels = vec![];
        m.entities.push(entity(EntityType::Path, 12));
        assert!(validate_for_calibration(Some(&m), 10).is_ok());
    }

    #[test]
    fn completeness_rejects_partial_map() {
        let last = valid_map();
        let mut partial = valid_map();
        partial.metadata.total_layer_area = 50.0; // 50% of last
        assert!(!is_map_complete(&partial, Some(&last), 10));
    }

    #[test]
    fn completeness_accepts_above_threshold() {
        let last = valid_map();
        let mut ok = valid_map();
        ok.metadata.total_layer_area = 85.0;
        assert!(is_map_complete(&ok, Some(&last), 10));
    }
}
