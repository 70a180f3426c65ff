//! Holds the latest per-robot maps and the current unified map, and drives
//! re-unification under a single read-write lock — mirroring how the
//! fusion pipeline here guards its shared state behind `tokio::sync::RwLock`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::calibration;
use crate::errors::{PersistenceError, UnificationError};
use crate::mapmodel::Map;
use crate::models::{CalibrationData, UnifiedMap, UnifiedMapMetadata};
use crate::unify;
use crate::vectorizer::vectorize;

const DEFAULT_WALL_CLUSTER_DIST_MM: f64 = 50.0;
const DEFAULT_WALL_CONFIDENCE_THRESHOLD: f64 = 0.5;
const DEFAULT_FLOOR_CLUSTER_DIST_MM: f64 = 100.0;
const WALL_SIMPLIFY_TOLERANCE_MM: f64 = 10.0;
const FLOOR_SIMPLIFY_TOLERANCE_MM: f64 = 20.0;

struct TrackerState {
    per_robot_maps: HashMap<String, Map>,
    unified_map: Option<UnifiedMap>,
}

/// Shared state the transport layer and calibration controller both read
/// from and write to. Readers take the shared side of the lock; mutators
/// take the exclusive side.
pub struct StateTracker {
    state: RwLock<TrackerState>,
    cache_path: Option<PathBuf>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self { state: RwLock::new(TrackerState { per_robot_maps: HashMap::new(), unified_map: None }), cache_path: None }
    }

    /// Loads a cached unified map from `path` on construction if present.
    pub fn new_with_cache(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let cached = match std::fs::read(&path) {
            Ok(bytes) => Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| PersistenceError::CorruptJson { path: path.display().to_string(), source: e })?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(PersistenceError::Io { path: path.display().to_string(), source: e }),
        };
        Ok(Self {
            state: RwLock::new(TrackerState { per_robot_maps: HashMap::new(), unified_map: cached }),
            cache_path: Some(path),
        })
    }

    /// Atomically replaces one robot's stored map.
    pub async fn update_map(&self, robot_id: impl Into<String>, map: Map) {
        let mut state = self.state.write().await;
        state.per_robot_maps.insert(robot_id.into(), map);
    }

    /// Returns a stable snapshot of the current unified map, readable
    /// concurrently with in-progress updates.
    pub async fn get_unified_map(&self) -> Option<UnifiedMap> {
        self.state.read().await.unified_map.clone()
    }

    /// Re-vectorizes every robot's map under `cal`'s transforms, re-unifies,
    /// blends with the previous unified map if one exists, and atomically
    /// swaps it in. Persists to `cachePath` when set.
    pub async fn update_unified_map(&self, cal: &CalibrationData, now: i64) -> Result<(), UnificationError> {
        let mut state = self.state.write().await;
        if state.per_robot_maps.is_empty() {
            return Err(UnificationError::NoMaps);
        }

        let mut all_features = Vec::new();
        let mut all_sources = Vec::new();
        for (robot_id, map) in &state.per_robot_maps {
            let transform = cal.get_transform(robot_id);
            // VacuumCalibration's persisted shape has no icpScore field (see
            // the calibration cache's documented wire format), so the score
            // computed during calibrateAll doesn't survive into this later
            // re-unification pass; every source defaults to 1.0 here.
            let icp_score = 1.0;
            let collection = vectorize(map, &transform, robot_id);
            for feature in collection.features {
                let source = crate::models::FeatureSource {
                    vacuum_id: robot_id.clone(),
                    original_geometry: feature.geometry.clone(),
                    timestamp: now,
                    icp_score,
                };
                all_features.push(feature);
                all_sources.push(source);
            }
        }

        let total_vacuums = state.per_robot_maps.len();
        let (wall_features, wall_sources) = unify::flatten_wall_features(&all_features, &all_sources);
        let walls = unify::unify_walls(
            &wall_features,
            &wall_sources,
            total_vacuums,
            DEFAULT_WALL_CLUSTER_DIST_MM,
            DEFAULT_WALL_CONFIDENCE_THRESHOLD,
        );

        let (floor_features, floor_sources): (Vec<_>, Vec<_>) = all_features
            .iter()
            .zip(all_sources.iter())
            .filter(|(f, _)| matches!(f.layer_type(), Some("floor") | Some("segment")))
            .map(|(f, s)| (f.clone(), s.clone()))
            .unzip();
        let floors_and_segments =
            unify::unify_floors(&floor_features, &floor_sources, total_vacuums, DEFAULT_FLOOR_CLUSTER_DIST_MM);
        let (segments, floors): (Vec<_>, Vec<_>) = floors_and_segments
            .into_iter()
            .partition(|f| f.properties.get(crate::models::property_keys::SEGMENT_ID).is_some());

        let wall_config = unify::OutlierConfig { total_vacuums, ..Default::default() };
        let (walls, _wall_outliers) = unify::detect_outliers(walls, &wall_config);
        let (floors, _floor_outliers) = unify::detect_outliers(floors, &wall_config);
        let (segments, _segment_outliers) = unify::detect_outliers(segments, &wall_config);

        let (walls, floors, segments) = match &state.unified_map {
            Some(previous) => (
                unify::refine(&previous.walls, walls),
                unify::refine(&previous.floors, floors),
                unify::refine(&previous.segments, segments),
            ),
            None => (walls, floors, segments),
        };

        let walls = unify::finalize_geometry(walls, WALL_SIMPLIFY_TOLERANCE_MM);
        let floors = unify::finalize_geometry(floors, FLOOR_SIMPLIFY_TOLERANCE_MM);
        let segments = unify::finalize_geometry(segments, FLOOR_SIMPLIFY_TOLERANCE_MM);

        let total_area: f64 = floors
            .iter()
            .chain(segments.iter())
            .map(|f| f.properties.get(crate::models::property_keys::AREA).and_then(|v| v.as_f64()).unwrap_or(0.0))
            .sum();

        let unified = UnifiedMap {
            walls,
            floors,
            segments,
            metadata: UnifiedMapMetadata {
                vacuum_count: total_vacuums,
                reference_vacuum: cal.reference_vacuum.clone(),
                last_updated: now,
                total_area,
                // Named by the wire format but its computation is unspecified; left
                // unpopulated rather than inventing a definition.
                coverage_overlap: 0.0,
            },
        };

        state.unified_map = Some(unified.clone());

        if let Some(path) = &self.cache_path {
            let json = serde_json::to_vec_pretty(&unified)
                .map_err(|e| PersistenceError::CorruptJson { path: path.display().to_string(), source: e })?;
            if let Err(e) = calibration::atomic_write(path, &json) {
                warn!(error = %e, "failed to persist unified map cache");
                return Err(UnificationError::Persistence(e));
            }
        }

        info!(robots = total_vacuums, "unified map refreshed");
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::{Entity, EntityType, Layer, LayerType, MapMetadata};

    fn sample_map(wall_y: f64) -> Map {
        Map {
            pixel_size: 1,
            size: (10, 10),
            metadata: MapMetadata { total_layer_area: 1000.0, ..Default::default() },
            layers: vec![Layer {
                layer_type: LayerType::Wall,
                pixels: vec![(0.0, wall_y), (100.0, wall_y)],
                compressed_pixels: None,
                segment_id: None,
                name: None,
                area: 0.0,
                active: None,
            }],
            entities: vec![
                Entity { entity_type: EntityType::RobotPosition, points: vec![(0.0, 0.0), (0.0, 0.0)], metadata: Default::default() },
                Entity { entity_type: EntityType::ChargerLocation, points: vec![(0.0, 0.0), (0.0, 0.0)], metadata: Default::default() },
            ],
            normalized: true,
        }
    }

    #[tokio::test]
    async fn update_unified_map_fails_without_maps() {
        let tracker = StateTracker::new();
        let cal = CalibrationData::new("r1", 0);
        let err = tracker.update_unified_map(&cal, 100).await;
        assert!(matches!(err, Err(UnificationError::NoMaps)));
    }

    #[tokio::test]
    async fn update_unified_map_populates_metadata() {
        let tracker = StateTracker::new();
        tracker.update_map("r1", sample_map(0.0)).await;
        tracker.update_map("r2", sample_map(10.0)).await;

        let mut cal = CalibrationData::new("r1", 0);
        cal.update_vacuum_calibration("r1", crate::models::VacuumCalibration { transform: crate::geometry::AffineMatrix::identity(), last_updated: 100, map_area_at_calibration: 1000 });
        cal.update_vacuum_calibration("r2", crate::models::VacuumCalibration { transform: crate::geometry::AffineMatrix::identity(), last_updated: 100, map_area_at_calibration: 1000 });

        tracker.update_unified_map(&cal, 100).await.unwrap();
        let unified = tracker.get_unified_map().await.unwrap();
        assert_eq!(unified.metadata.vacuum_count, 2);
        assert_eq!(unified.metadata.reference_vacuum, "r1");
    }
}
