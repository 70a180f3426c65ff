//! Normalization: pixel grid coordinates to millimeters.

use super::types::Map;

/// Normalizes pixel coordinates into millimeters. Entity points are already
/// in millimeters and are left untouched; area fields are never scaled.
/// Idempotent: normalizing an already-normalized map is a no-op.
pub fn normalize(map: &Map) -> Map {
    if map.normalized {
        return map.clone();
    }

    let mut out = map.clone();
    let pixel_size = out.pixel_size as f64;

    for layer in &mut out.layers {
        if layer.pixels.is_empty() {
            if let Some(compressed) = layer.compressed_pixels.clone() {
                layer.pixels = compressed;
            }
        }
        layer.pixels = layer.pixels.iter().map(|&(x, y)| (x * pixel_size, y * pixel_size)).collect();
    }

    out.normalized = true;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::types::{Layer, LayerType, MapMetadata};

    fn sample_map() -> Map {
        Map {
            pixel_size: 50,
            size: (10, 10),
            metadata: MapMetadata { total_layer_area: 123.0, ..Default::default() },
            layers: vec![Layer {
                layer_type: LayerType::Wall,
                pixels: vec![(1.0, 1.0), (2.0, 2.0)],
                compressed_pixels: None,
                segment_id: None,
                name: None,
                area: 42.0,
                active: None,
            }],
            entities: vec![],
            normalized: false,
        }
    }

    #[test]
    fn scales_pixel_coordinates_by_pixel_size() {
        let normalized = normalize(&sample_map());
        assert_eq!(normalized.layers[0].pixels, vec![(50.0, 50.0), (100.0, 100.0)]);
        assert!(normalized.normalized);
    }

    #[test]
    fn area_fields_never_scaled() {
        let normalized = normalize(&sample_map());
        assert_eq!(normalized.layers[0].area, 42.0);
        assert_eq!(normalized.metadata.total_layer_area, 123.0);
    }

    #[test]
    fn is_idempotent() {
        let once = normalize(&sample_map());
        let twice = normalize(&once);
        assert_eq!(once.layers[0].pixels, twice.layers[0].pixels);
        assert_eq!(once.normalized, twice.normalized);
    }

    #[test]
    fn copies_compressed_pixels_when_pixels_empty() {
        let mut m = sample_map();
        m.layers[0].pixels = vec![];
        m.layers[0].compressed_pixels = Some(vec![(3.0, 3.0)]);
        let normalized = normalize(&m);
        assert_eq!(normalized.layers[0].pixels, vec![(150.0, 150.0)]);
    }
}
