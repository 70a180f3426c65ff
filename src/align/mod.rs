//! Aligns one robot's map onto a reference robot's coordinate frame.
//!
//! `align_to_reference` runs iterative closest point (ICP) on wall-pixel
//! point clouds: a spatial index (`rstar`) finds nearest-neighbor pairs each
//! iteration, and a closed-form SVD fit (`nalgebra`) finds the rigid
//! transform minimizing squared residuals over those pairs. `quick_align`
//! is the cheap fallback used when ICP doesn't converge to something
//! trustworthy.

use geo_types::Coord;
use nalgebra::{Matrix2, Vector2};
use rstar::RTree;

use crate::geometry::AffineMatrix;
use crate::mapmodel::{EntityType, LayerType, Map};

const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_EPSILON_MM: f64 = 1.0;

/// Extracts every wall layer's pixel points (or `compressedPixels` when
/// `pixels` is empty), already in millimeters after normalization.
fn wall_points(map: &Map) -> Vec<Coord<f64>> {
    map.layers
        .iter()
        .filter(|l| l.layer_type == LayerType::Wall)
        .flat_map(|l| {
            let pts = if !l.pixels.is_empty() { &l.pixels } else { l.compressed_pixels.as_deref().unwrap_or(&[]) };
            pts.iter().map(|&(x, y)| Coord { x, y })
        })
        .collect()
}

fn charger_position(map: &Map) -> Option<Coord<f64>> {
    map.first_entity_with_min_points(&EntityType::ChargerLocation, 1)
        .and_then(|e| e.points.first())
        .map(|&(x, y)| Coord { x, y })
}

/// Translation-only alignment: candidate's charger maps exactly onto the
/// reference's charger. Identity rotation. Falls back to the identity
/// transform if either map lacks a charger entity.
pub fn quick_align(candidate: &Map, reference: &Map) -> AffineMatrix {
    match (charger_position(candidate), charger_position(reference)) {
        (Some(c), Some(r)) => AffineMatrix::translation(r.x - c.x, r.y - c.y),
        _ => AffineMatrix::identity(),
    }
}

/// Runs ICP aligning `candidate`'s wall points onto `reference`'s, starting
/// from a charger-based translation. Returns the cumulative transform and
/// the final mean nearest-neighbor residual (in millimeters); the residual
/// is `f64::INFINITY` when alignment cannot be attempted (no wall points on
/// either side).
pub fn align_to_reference(candidate: &Map, reference: &Map) -> (AffineMatrix, f64) {
    let candidate_points = wall_points(candidate);
    let reference_points = wall_points(reference);
    if candidate_points.is_empty() || reference_points.is_empty() {
        return (quick_align(candidate, reference), f64::INFINITY);
    }

    let index = RTree::bulk_load(reference_points.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>());

    let mut transform = match (charger_position(candidate), charger_position(reference)) {
        (Some(c), Some(r)) => AffineMatrix::translation(r.x - c.x, r.y - c.y),
        _ => AffineMatrix::identity(),
    };
    let mut prev_mean_residual = f64::INFINITY;
    let mut mean_residual = f64::INFINITY;

    for _ in 0..MAX_ITERATIONS {
        let transformed: Vec<Coord<f64>> = candidate_points.iter().map(|&p| transform.transform_point(p)).collect();
        let matches: Vec<Coord<f64>> = transformed
            .iter()
            .map(|p| {
                let nearest = index.nearest_neighbor(&[p.x, p.y]).expect("non-empty index");
                Coord { x: nearest[0], y: nearest[1] }
            })
            .collect();

        let delta = fit_rigid(&transformed, &matches);
        transform = delta.compose(&transform);

        mean_residual = transformed
            .iter()
            .zip(matches.iter())
            .map(|(&p, &m)| crate::geometry::euclidean_distance(delta.transform_point(p), m))
            .sum::<f64>()
            / transformed.len() as f64;

        if (prev_mean_residual - mean_residual).abs() < CONVERGENCE_EPSILON_MM {
            break;
        }
        prev_mean_residual = mean_residual;
    }

    (transform, mean_residual)
}

/// Closed-form rigid (rotation + translation) fit minimizing squared
/// residuals between paired points, via SVD on the centered cross-covariance
/// (Kabsch algorithm).
fn fit_rigid(src: &[Coord<f64>], dst: &[Coord<f64>]) -> AffineMatrix {
    let n = src.len() as f64;
    let src_centroid = Coord {
        x: src.iter().map(|p| p.x).sum::<f64>() / n,
        y: src.iter().map(|p| p.y).sum::<f64>() / n,
    };
    let dst_centroid =
        Coord { x: dst.iter().map(|p| p.x).sum::<f64>() / n, y: dst.iter().map(|p| p.y).sum::<f64>() / n };

    let mut h = Matrix2::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = Vector2::new(s.x - src_centroid.x, s.y - src_centroid.y);
        let dc = Vector2::new(d.x - dst_centroid.x, d.y - dst_centroid.y);
        h += sc * dc.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.expect("svd requested u");
    let v_t = svd.v_t.expect("svd requested v_t");
    let mut r = v_t.transpose() * u.transpose();

    if r.determinant() < 0.0 {
        let mut v = v_t.transpose();
        let mut col = v.column_mut(1);
        col *= -1.0;
        r = v * u.transpose();
    }

    let t = Vector2::new(dst_centroid.x, dst_centroid.y)
        - r * Vector2::new(src_centroid.x, src_centroid.y);

    AffineMatrix { a: r[(0, 0)], b: r[(0, 1)], tx: t.x, c: r[(1, 0)], d: r[(1, 1)], ty: t.y }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::{Entity, Layer, MapMetadata};

    fn map_with_wall_and_charger(wall_points: Vec<(f64, f64)>, charger: (f64, f64)) -> Map {
        Map {
            pixel_size: 1,
            size: (10, 10),
            metadata: MapMetadata::default(),
            layers: vec![Layer {
                layer_type: LayerType::Wall,
                pixels: wall_points,
                compressed_pixels: None,
                segment_id: None,
                name: None,
                area: 0.0,
                active: None,
            }],
            entities: vec![
                Entity { entity_type: EntityType::ChargerLocation, points: vec![charger, charger], metadata: Default::default() },
                Entity { entity_type: EntityType::RobotPosition, points: vec![(0.0, 0.0), (0.0, 0.0)], metadata: Default::default() },
            ],
            normalized: true,
        }
    }

    #[test]
    fn quick_align_translates_charger_onto_reference() {
        let candidate = map_with_wall_and_charger(vec![(0.0, 0.0)], (5.0, 5.0));
        let reference = map_with_wall_and_charger(vec![(0.0, 0.0)], (15.0, 10.0));
        let t = quick_align(&candidate, &reference);
        let moved = t.transform_point(Coord { x: 5.0, y: 5.0 });
        assert!((moved.x - 15.0).abs() < 1e-9);
        assert!((moved.y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn align_to_reference_recovers_pure_translation() {
        let shared_wall = vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0), (50.0, 50.0)];
        let reference = map_with_wall_and_charger(shared_wall.clone(), (0.0, 0.0));
        let shifted_wall: Vec<(f64, f64)> = shared_wall.iter().map(|&(x, y)| (x + 20.0, y + 10.0)).collect();
        let candidate = map_with_wall_and_charger(shifted_wall, (-20.0, -10.0));

        let (transform, residual) = align_to_reference(&candidate, &reference);
        assert!(residual < 5.0);
        let moved = transform.transform_point(Coord { x: 20.0, y: 10.0 });
        assert!((moved.x - 0.0).abs() < 5.0);
        assert!((moved.y - 0.0).abs() < 5.0);
    }

    #[test]
    fn empty_wall_points_yields_infinite_residual() {
        let candidate = map_with_wall_and_charger(vec![], (0.0, 0.0));
        let reference = map_with_wall_and_charger(vec![], (0.0, 0.0));
        let (_, residual) = align_to_reference(&candidate, &reference);
        assert!(residual.is_infinite());
    }
}
