//! The consensus engine: clusters per-robot features into agreed-upon
//! walls and floors, scores confidence, flags outliers, and blends new
//! observations with the previous unified map.

use std::collections::HashMap;

use geo::Area;
use geo_types::{Geometry, LineString, Polygon};

use crate::geometry::{
    cluster_by_proximity, euclidean_distance, geometry_centroid, grid_snap, line_length, median,
    resample_line, simplify_geometry, union_polygons,
};
use crate::models::{property_keys, Feature, FeatureSource, Properties, UnifiedFeature};

/// Expands each wall layer's `MultiLineString` feature into one `LineString`
/// feature per constituent run, replicating properties and the owning
/// source so the clustering stage below can operate on plain line strings.
pub fn flatten_wall_features(features: &[Feature], sources: &[FeatureSource]) -> (Vec<Feature>, Vec<FeatureSource>) {
    let mut out_features = Vec::new();
    let mut out_sources = Vec::new();
    for (feature, source) in features.iter().zip(sources.iter()) {
        if feature.layer_type() != Some("wall") {
            continue;
        }
        if let Geometry::MultiLineString(mls) = &feature.geometry {
            for line in &mls.0 {
                out_features.push(Feature { geometry: Geometry::LineString(line.clone()), properties: feature.properties.clone() });
                out_sources.push(FeatureSource {
                    vacuum_id: source.vacuum_id.clone(),
                    original_geometry: Geometry::LineString(line.clone()),
                    timestamp: source.timestamp,
                    icp_score: source.icp_score,
                });
            }
        }
    }
    (out_features, out_sources)
}

/// Clusters wall line-strings by centroid proximity and reduces each
/// cluster surviving the confidence threshold to a median consensus line.
pub fn unify_walls(
    features: &[Feature],
    sources: &[FeatureSource],
    total_vacuums: usize,
    cluster_dist: f64,
    confidence_threshold: f64,
) -> Vec<UnifiedFeature> {
    if total_vacuums == 0 {
        return Vec::new();
    }

    let wall_indices: Vec<usize> = features
        .iter()
        .enumerate()
        .filter(|(_, f)| matches!(f.geometry, Geometry::LineString(_)))
        .map(|(i, _)| i)
        .collect();

    let centroids: Vec<_> = wall_indices.iter().map(|&i| geometry_centroid(&features[i].geometry)).collect();
    let clusters = cluster_by_proximity(&centroids, cluster_dist);

    let mut results: Vec<UnifiedFeature> = clusters
        .into_iter()
        .filter_map(|cluster| {
            let member_indices: Vec<usize> = cluster.into_iter().map(|c| wall_indices[c]).collect();
            build_unified_wall(&member_indices, features, sources, total_vacuums, confidence_threshold)
        })
        .collect();

    results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    results
}

fn build_unified_wall(
    member_indices: &[usize],
    features: &[Feature],
    sources: &[FeatureSource],
    total_vacuums: usize,
    confidence_threshold: f64,
) -> Option<UnifiedFeature> {
    let distinct: Vec<&str> = {
        let mut ids: Vec<&str> = member_indices.iter().map(|&i| sources[i].vacuum_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let observation_count = distinct.len();
    let confidence = observation_count as f64 / total_vacuums as f64;
    if confidence < confidence_threshold {
        return None;
    }

    let mut lines: Vec<LineString<f64>> = member_indices
        .iter()
        .map(|&i| match &features[i].geometry {
            Geometry::LineString(ls) => ls.clone(),
            _ => unreachable!("filtered to linestrings"),
        })
        .collect();
    align_line_directions(&mut lines);

    let max_length_mm = lines.iter().map(line_length).fold(0.0_f64, f64::max);
    let n = (max_length_mm.round() as usize).clamp(2, 100);
    let resampled: Vec<LineString<f64>> = lines.iter().map(|l| resample_line(l, n)).collect();
    let median_line = median_line(&resampled, n);

    let properties = merge_properties_highest_icp(member_indices, features, sources);
    let sources: Vec<FeatureSource> = member_indices.iter().map(|&i| sources[i].clone()).collect();

    Some(UnifiedFeature { geometry: Geometry::LineString(median_line), properties, sources, confidence, observation_count })
}

/// Reverses any line whose start-to-end vector points opposite the first
/// line's, so the per-station median isn't distorted by mismatched
/// endpoint order.
fn align_line_directions(lines: &mut [LineString<f64>]) {
    if lines.is_empty() {
        return;
    }
    let reference_vec = line_direction(&lines[0]);
    for line in lines.iter_mut().skip(1) {
        let v = line_direction(line);
        if v.x * reference_vec.x + v.y * reference_vec.y < 0.0 {
            line.0.reverse();
        }
    }
}

fn line_direction(ls: &LineString<f64>) -> geo_types::Coord<f64> {
    let start = *ls.0.first().expect("non-empty line");
    let end = *ls.0.last().expect("non-empty line");
    geo_types::Coord { x: end.x - start.x, y: end.y - start.y }
}

fn median_line(resampled: &[LineString<f64>], n: usize) -> LineString<f64> {
    let mut points = Vec::with_capacity(n);
    for station in 0..n {
        let mut xs: Vec<f64> = resampled.iter().map(|l| l.0[station].x).collect();
        let mut ys: Vec<f64> = resampled.iter().map(|l| l.0[station].y).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        ys.sort_by(|a, b| a.partial_cmp(b).unwrap());
        points.push(geo_types::Coord { x: median(&xs), y: median(&ys) });
    }
    LineString::new(points)
}

fn merge_properties_highest_icp(member_indices: &[usize], features: &[Feature], sources: &[FeatureSource]) -> Properties {
    let winner = member_indices
        .iter()
        .max_by(|&&a, &&b| sources[a].icp_score.partial_cmp(&sources[b].icp_score).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
        .unwrap_or(member_indices[0]);
    features[winner].properties.clone()
}

/// Unifies floor/segment polygons: named features cluster by exact name
/// match, unnamed ones cluster by centroid proximity; each group's polygons
/// are unioned into one consensus feature.
pub fn unify_floors(
    features: &[Feature],
    sources: &[FeatureSource],
    total_vacuums: usize,
    cluster_dist: f64,
) -> Vec<UnifiedFeature> {
    if total_vacuums == 0 {
        return Vec::new();
    }

    let polygon_indices: Vec<usize> = features
        .iter()
        .enumerate()
        .filter(|(_, f)| matches!(f.geometry, Geometry::Polygon(_)))
        .map(|(i, _)| i)
        .collect();

    let mut named: HashMap<String, Vec<usize>> = HashMap::new();
    let mut unnamed: Vec<usize> = Vec::new();
    for &i in &polygon_indices {
        match features[i].segment_name() {
            Some(name) => named.entry(name.to_string()).or_default().push(i),
            None => unnamed.push(i),
        }
    }

    let mut groups: Vec<Vec<usize>> = named.into_values().collect();
    groups.sort_by(|a, b| a[0].cmp(&b[0]));

    if !unnamed.is_empty() {
        let centroids: Vec<_> = unnamed.iter().map(|&i| geometry_centroid(&features[i].geometry)).collect();
        let clusters = cluster_by_proximity(&centroids, cluster_dist);
        for cluster in clusters {
            groups.push(cluster.into_iter().map(|c| unnamed[c]).collect());
        }
    }

    let results: Vec<UnifiedFeature> = groups
        .into_iter()
        .filter_map(|group| build_unified_floor(&group, features, sources))
        .collect();
    let mut results = finalize_floor_confidence(results, total_vacuums);

    results.sort_by(|a, b| {
        feature_area(b).partial_cmp(&feature_area(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

fn feature_area(uf: &UnifiedFeature) -> f64 {
    match &uf.geometry {
        Geometry::Polygon(p) => p.unsigned_area(),
        Geometry::MultiPolygon(mp) => mp.unsigned_area(),
        _ => 0.0,
    }
}

fn build_unified_floor(member_indices: &[usize], features: &[Feature], sources: &[FeatureSource]) -> Option<UnifiedFeature> {
    let polygons: Vec<Polygon<f64>> = member_indices
        .iter()
        .map(|&i| match &features[i].geometry {
            Geometry::Polygon(p) => p.clone(),
            _ => unreachable!("filtered to polygons"),
        })
        .collect();

    let unioned = union_polygons(&polygons)?;
    let unioned_geometry = if unioned.0.len() == 1 {
        Geometry::Polygon(unioned.0.into_iter().next().unwrap())
    } else {
        Geometry::MultiPolygon(unioned)
    };

    let distinct: Vec<&str> = {
        let mut ids: Vec<&str> = member_indices.iter().map(|&i| sources[i].vacuum_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let observation_count = distinct.len();

    let mut properties = merge_properties_largest_area(member_indices, features, sources);
    if let Some(name) = resolve_name(member_indices, features) {
        properties.insert(property_keys::SEGMENT_NAME.to_string(), serde_json::Value::String(name));
    }

    let sources: Vec<FeatureSource> = member_indices.iter().map(|&i| sources[i].clone()).collect();

    Some(UnifiedFeature {
        geometry: unioned_geometry,
        properties,
        sources,
        confidence: 0.0, // recomputed by `finalize_floor_confidence` once totalVacuums is known
        observation_count,
    })
}

fn resolve_name(member_indices: &[usize], features: &[Feature]) -> Option<String> {
    member_indices
        .iter()
        .filter_map(|&i| features[i].segment_name().map(|n| (i, n.to_string(), features[i].area_property().unwrap_or(0.0))))
        .max_by(|(_, _, a), (_, _, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, name, _)| name)
}

fn merge_properties_largest_area(member_indices: &[usize], features: &[Feature], sources: &[FeatureSource]) -> Properties {
    let winner = member_indices
        .iter()
        .max_by(|&&a, &&b| {
            let area_a = features[a].area_property();
            let area_b = features[b].area_property();
            match (area_a, area_b) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => sources[a].icp_score.partial_cmp(&sources[b].icp_score).unwrap_or(std::cmp::Ordering::Equal),
            }
        })
        .copied()
        .unwrap_or(member_indices[0]);
    features[winner].properties.clone()
}

/// Recomputes `confidence = observationCount / totalVacuums` in place;
/// `unify_floors` doesn't know `totalVacuums` at union time without
/// threading it through every helper, so the caller finalizes it here.
pub fn finalize_floor_confidence(mut floors: Vec<UnifiedFeature>, total_vacuums: usize) -> Vec<UnifiedFeature> {
    for f in &mut floors {
        f.confidence = if total_vacuums == 0 { 0.0 } else { f.observation_count as f64 / total_vacuums as f64 };
    }
    floors
}

#[derive(Debug, Clone, Copy)]
pub struct OutlierConfig {
    pub confidence_threshold: f64,
    pub isolation_multiplier: f64,
    pub min_icp_score: f64,
    pub total_vacuums: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self { confidence_threshold: 0.3, isolation_multiplier: 3.0, min_icp_score: 0.5, total_vacuums: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierReason {
    GhostRoom,
    LowConfidence,
    Isolated,
}

#[derive(Debug, Clone)]
pub struct Outlier {
    pub feature: UnifiedFeature,
    pub reasons: Vec<OutlierReason>,
    pub weighted_confidence: f64,
}

fn weighted_confidence(uf: &UnifiedFeature, config: &OutlierConfig) -> f64 {
    if config.total_vacuums == 0 {
        return 0.0;
    }
    let weight_sum: f64 = uf
        .distinct_vacuum_ids()
        .iter()
        .map(|id| {
            let score = uf.best_icp_score_for(id).unwrap_or(0.0);
            if score >= config.min_icp_score { 1.0 } else { 0.5 }
        })
        .sum();
    weight_sum / config.total_vacuums as f64
}

/// Flags ghost rooms, low-confidence, and spatially-isolated features.
/// Returns `(retained, outliers)` partitioning the input exactly.
pub fn detect_outliers(features: Vec<UnifiedFeature>, config: &OutlierConfig) -> (Vec<UnifiedFeature>, Vec<Outlier>) {
    if features.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let centroids: Vec<_> = features.iter().map(|f| geometry_centroid(&f.geometry)).collect();
    let map_centroid = geo_types::Coord {
        x: centroids.iter().map(|c| c.x).sum::<f64>() / centroids.len() as f64,
        y: centroids.iter().map(|c| c.y).sum::<f64>() / centroids.len() as f64,
    };
    let distances: Vec<f64> = centroids.iter().map(|&c| euclidean_distance(c, map_centroid)).collect();
    let mean_dist = distances.iter().sum::<f64>() / distances.len() as f64;

    let mut retained = Vec::new();
    let mut outliers = Vec::new();

    for (i, feature) in features.into_iter().enumerate() {
        let wc = weighted_confidence(&feature, config);
        let mut reasons = Vec::new();
        if config.total_vacuums > 1 && feature.observation_count <= 1 {
            reasons.push(OutlierReason::GhostRoom);
        }
        if wc < config.confidence_threshold {
            reasons.push(OutlierReason::LowConfidence);
        }
        if mean_dist > 0.0 && distances[i] > config.isolation_multiplier * mean_dist {
            reasons.push(OutlierReason::Isolated);
        }

        if reasons.is_empty() {
            retained.push(feature);
        } else {
            outliers.push(Outlier { feature, reasons, weighted_confidence: wc });
        }
    }

    (retained, outliers)
}

const DEFAULT_MATCH_THRESHOLD_MM: f64 = 200.0;
const DEFAULT_BLEND_WEIGHT: f64 = 0.3;

/// Pairs each current feature with its closest previous feature (by
/// centroid, within `match_threshold`) and blends their geometry;
/// unmatched current features pass through unchanged.
pub fn refine(previous: &[UnifiedFeature], current: Vec<UnifiedFeature>) -> Vec<UnifiedFeature> {
    refine_with(previous, current, DEFAULT_MATCH_THRESHOLD_MM, DEFAULT_BLEND_WEIGHT)
}

fn refine_with(previous: &[UnifiedFeature], current: Vec<UnifiedFeature>, match_threshold: f64, weight: f64) -> Vec<UnifiedFeature> {
    let prev_centroids: Vec<_> = previous.iter().map(|f| geometry_centroid(&f.geometry)).collect();

    current
        .into_iter()
        .map(|curr| {
            let curr_centroid = geometry_centroid(&curr.geometry);
            let closest = prev_centroids
                .iter()
                .enumerate()
                .map(|(i, &c)| (i, euclidean_distance(c, curr_centroid)))
                .filter(|&(_, d)| d <= match_threshold)
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

            match closest {
                Some((i, _)) => blend(&previous[i], curr, weight),
                None => curr,
            }
        })
        .collect()
}

fn blend(previous: &UnifiedFeature, mut current: UnifiedFeature, weight: f64) -> UnifiedFeature {
    current.geometry = match (&previous.geometry, &current.geometry) {
        (Geometry::LineString(old), Geometry::LineString(new)) => Geometry::LineString(blend_linestring(old, new, weight)),
        (Geometry::Polygon(old), Geometry::Polygon(new)) => Geometry::Polygon(blend_polygon(old, new, weight)),
        _ => current.geometry,
    };
    current.observation_count = previous.observation_count.max(current.observation_count);
    current
}

fn blend_linestring(old: &LineString<f64>, new: &LineString<f64>, weight: f64) -> LineString<f64> {
    let n = (line_length(old).max(line_length(new)).round() as usize).clamp(2, 100);
    let old_r = resample_line(old, n);
    let new_r = resample_line(new, n);
    let points = old_r
        .0
        .iter()
        .zip(new_r.0.iter())
        .map(|(o, nw)| geo_types::Coord { x: (1.0 - weight) * o.x + weight * nw.x, y: (1.0 - weight) * o.y + weight * nw.y })
        .collect();
    LineString::new(points)
}

fn blend_polygon(old: &Polygon<f64>, new: &Polygon<f64>, weight: f64) -> Polygon<f64> {
    let blended_exterior = blend_linestring(old.exterior(), new.exterior(), weight);
    Polygon::new(blended_exterior, new.interiors().to_vec())
}

/// Douglas-Peucker simplification followed by a 10 mm grid snap, applied to
/// every unified feature's geometry after (re)unification.
pub fn finalize_geometry(mut features: Vec<UnifiedFeature>, simplify_tolerance_mm: f64) -> Vec<UnifiedFeature> {
    const GRID_SNAP_MM: f64 = 10.0;
    for f in &mut features {
        let simplified = simplify_geometry(&f.geometry, simplify_tolerance_mm);
        f.geometry = grid_snap(&simplified, GRID_SNAP_MM);
    }
    features
}
