//! Converts a robot's normalized pixel layers into GeoJSON-style features:
//! one polygon per floor/segment layer, one multi-line-string per wall
//! layer tracing its pixel runs. Coordinates are transformed into the
//! shared world frame after vectorization.

use geo::ConvexHull;
use geo_types::{Coord, Geometry, LineString, MultiLineString, Point, Polygon};

use crate::geometry::{cluster_by_proximity, euclidean_distance, transform_geometry, AffineMatrix};
use crate::mapmodel::{Layer, LayerType, Map};
use crate::models::{property_keys, Feature, Properties};

/// A per-robot set of vectorized features, ready for the unifier.
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

/// Wall runs whose member points sit farther apart than this are treated as
/// separate connected components (grid adjacency with slack for diagonals).
const WALL_RUN_GAP_MULTIPLIER: f64 = 1.5;

/// Vectorizes one robot's normalized map into world-frame features.
///
/// Per layer: floor/segment layers become one polygon feature each (the
/// convex hull of their pixel set); wall layers become one
/// `MultiLineString` feature tracing connected pixel runs. The transform is
/// applied to every coordinate after the local-frame geometry is built, so
/// vectorization topology never depends on the robot's placement in the
/// world frame.
pub fn vectorize(map: &Map, transform: &AffineMatrix, vacuum_id: &str) -> FeatureCollection {
    let pixel_gap = (map.pixel_size as f64).max(1.0) * WALL_RUN_GAP_MULTIPLIER;
    let mut features = Vec::new();

    for layer in &map.layers {
        if !layer.has_drawable_pixels() {
            continue;
        }
        let points = resolved_pixels(layer);
        if points.is_empty() {
            continue;
        }

        match layer.layer_type {
            LayerType::Floor | LayerType::Segment => {
                if let Some(feature) = vectorize_area_layer(layer, &points, transform, vacuum_id) {
                    features.push(feature);
                }
            }
            LayerType::Wall => {
                features.push(vectorize_wall_layer(&points, pixel_gap, transform, vacuum_id));
            }
        }
    }

    FeatureCollection { features }
}

fn resolved_pixels(layer: &Layer) -> Vec<Coord<f64>> {
    if !layer.pixels.is_empty() {
        layer.pixels.iter().map(|&(x, y)| Coord { x, y }).collect()
    } else {
        layer
            .compressed_pixels
            .as_ref()
            .map(|pts| pts.iter().map(|&(x, y)| Coord { x, y }).collect())
            .unwrap_or_default()
    }
}

fn vectorize_area_layer(
    layer: &Layer,
    points: &[Coord<f64>],
    transform: &AffineMatrix,
    vacuum_id: &str,
) -> Option<Feature> {
    let hull_geometry = if points.len() < 3 {
        // Degenerate input: not enough points for a hull; fall back to a
        // zero-area ring through the available points so the layer still
        // surfaces as a feature rather than being silently dropped.
        let mut ring: Vec<Coord<f64>> = points.to_vec();
        ring.push(points[0]);
        Polygon::new(LineString::new(ring), vec![])
    } else {
        let multipoint: geo_types::MultiPoint<f64> =
            points.iter().map(|&c| Point(c)).collect::<Vec<_>>().into();
        multipoint.convex_hull()
    };

    let geometry = transform_geometry(&Geometry::Polygon(hull_geometry), transform);

    let mut properties = Properties::new();
    properties.insert(
        property_keys::LAYER_TYPE.to_string(),
        serde_json::Value::String(layer_type_str(layer.layer_type).to_string()),
    );
    properties.insert(property_keys::VACUUM_ID.to_string(), serde_json::Value::String(vacuum_id.to_string()));
    properties.insert(property_keys::AREA.to_string(), serde_json::json!(layer.area));
    if let Some(segment_id) = &layer.segment_id {
        properties.insert(property_keys::SEGMENT_ID.to_string(), serde_json::Value::String(segment_id.clone()));
    }
    if let Some(name) = &layer.name {
        properties.insert(property_keys::SEGMENT_NAME.to_string(), serde_json::Value::String(name.clone()));
    }
    if let Some(active) = layer.active {
        properties.insert(property_keys::ACTIVE.to_string(), serde_json::Value::Bool(active));
    }

    Some(Feature { geometry, properties })
}

fn layer_type_str(t: LayerType) -> &'static str {
    match t {
        LayerType::Floor => "floor",
        LayerType::Wall => "wall",
        LayerType::Segment => "segment",
    }
}

fn vectorize_wall_layer(
    points: &[Coord<f64>],
    pixel_gap: f64,
    transform: &AffineMatrix,
    vacuum_id: &str,
) -> Feature {
    let runs = cluster_by_proximity(points, pixel_gap);
    let lines: Vec<LineString<f64>> = runs
        .into_iter()
        .map(|indices| {
            let run_points: Vec<Coord<f64>> = indices.into_iter().map(|i| points[i]).collect();
            order_by_nearest_neighbor_chain(run_points)
        })
        .collect();

    let geometry = transform_geometry(&Geometry::MultiLineString(MultiLineString::new(lines)), transform);

    let mut properties = Properties::new();
    properties.insert(
        property_keys::LAYER_TYPE.to_string(),
        serde_json::Value::String("wall".to_string()),
    );
    properties.insert(property_keys::VACUUM_ID.to_string(), serde_json::Value::String(vacuum_id.to_string()));

    Feature { geometry, properties }
}

/// Orders an unordered run of points into a path by repeatedly walking to
/// the nearest unvisited point, starting from the lexicographically
/// smallest point. Deterministic for a given input multiset.
fn order_by_nearest_neighbor_chain(mut points: Vec<Coord<f64>>) -> LineString<f64> {
    if points.len() <= 2 {
        return LineString::new(points);
    }

    let start_idx = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.x, a.y).partial_cmp(&(b.x, b.y)).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut ordered = Vec::with_capacity(points.len());
    ordered.push(points.swap_remove(start_idx));

    while !points.is_empty() {
        let current = *ordered.last().unwrap();
        let nearest_idx = points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                euclidean_distance(current, **a)
                    .partial_cmp(&euclidean_distance(current, **b))
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap();
        ordered.push(points.swap_remove(nearest_idx));
    }

    LineString::new(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::{Entity, EntityType, MapMetadata};

    fn layer(layer_type: LayerType, pixels: Vec<(f64, f64)>) -> Layer {
        Layer {
            layer_type,
            pixels,
            compressed_pixels: None,
            segment_id: None,
            name: None,
            area: 1000.0,
            active: Some(true),
        }
    }

    fn map_with_layers(layers: Vec<Layer>) -> Map {
        Map {
            pixel_size: 50,
            size: (10, 10),
            metadata: MapMetadata::default(),
            layers,
            entities: vec![Entity { entity_type: EntityType::RobotPosition, points: vec![], metadata: Default::default() }],
            normalized: true,
        }
    }

    #[test]
    fn floor_layer_becomes_one_polygon_feature() {
        let m = map_with_layers(vec![layer(
            LayerType::Floor,
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
        )]);
        let fc = vectorize(&m, &AffineMatrix::identity(), "robot-a");
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.features[0].layer_type(), Some("floor"));
        assert!(matches!(fc.features[0].geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn wall_layer_becomes_one_multilinestring_feature() {
        let m = map_with_layers(vec![layer(
            LayerType::Wall,
            vec![(0.0, 0.0), (50.0, 0.0), (100.0, 0.0), (150.0, 0.0)],
        )]);
        let fc = vectorize(&m, &AffineMatrix::identity(), "robot-a");
        assert_eq!(fc.len(), 1);
        assert!(matches!(fc.features[0].geometry, Geometry::MultiLineString(_)));
    }

    #[test]
    fn transform_is_applied_after_vectorization() {
        let m = map_with_layers(vec![layer(LayerType::Wall, vec![(0.0, 0.0), (10.0, 0.0)])]);
        let t = AffineMatrix::translation(1000.0, 0.0);
        let fc = vectorize(&m, &t, "robot-a");
        if let Geometry::MultiLineString(mls) = &fc.features[0].geometry {
            assert!(mls.0[0].0[0].x >= 1000.0);
        } else {
            panic!("expected multilinestring");
        }
    }

    #[test]
    fn empty_layer_produces_no_feature() {
        let m = map_with_layers(vec![layer(LayerType::Floor, vec![])]);
        let fc = vectorize(&m, &AffineMatrix::identity(), "robot-a");
        assert!(fc.is_empty());
    }

    #[test]
    fn disjoint_wall_runs_become_separate_lines() {
        let m = map_with_layers(vec![layer(
            LayerType::Wall,
            vec![(0.0, 0.0), (50.0, 0.0), (5000.0, 5000.0), (5050.0, 5000.0)],
        )]);
        let fc = vectorize(&m, &AffineMatrix::identity(), "robot-a");
        if let Geometry::MultiLineString(mls) = &fc.features[0].geometry {
            assert_eq!(mls.0.len(), 2);
        } else {
            panic!("expected multilinestring");
        }
    }
}
