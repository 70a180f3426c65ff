//! Calibration records, vectorized features, and the unified-map output
//! type shared across the calibration store, unifier, and state tracker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{serde_geo, AffineMatrix, Geometry};

/// Well-known [`Feature`]/[`UnifiedFeature`] property keys, pre-declared to
/// avoid stringly-typed bugs when reading/writing properties maps.
pub mod property_keys {
    pub const LAYER_TYPE: &str = "layerType";
    pub const VACUUM_ID: &str = "vacuumId";
    pub const AREA: &str = "area";
    pub const SEGMENT_ID: &str = "segmentId";
    pub const SEGMENT_NAME: &str = "segmentName";
    pub const ACTIVE: &str = "active";
    pub const OBSERVATION_COUNT: &str = "observationCount";
    pub const CONFIDENCE: &str = "confidence";
}

pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A vectorized geometric feature tagged with its layer type and owning
/// robot, prior to unification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(with = "serde_geo")]
    pub geometry: Geometry<f64>,
    pub properties: Properties,
}

impl Feature {
    pub fn layer_type(&self) -> Option<&str> {
        self.properties.get(property_keys::LAYER_TYPE).and_then(|v| v.as_str())
    }

    pub fn vacuum_id(&self) -> Option<&str> {
        self.properties.get(property_keys::VACUUM_ID).and_then(|v| v.as_str())
    }

    pub fn segment_name(&self) -> Option<&str> {
        self.properties.get(property_keys::SEGMENT_NAME).and_then(|v| v.as_str())
    }

    pub fn area_property(&self) -> Option<f64> {
        self.properties.get(property_keys::AREA).and_then(|v| v.as_f64())
    }
}

/// Provenance of one contribution to a unified feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSource {
    pub vacuum_id: String,
    #[serde(with = "serde_geo")]
    pub original_geometry: Geometry<f64>,
    pub timestamp: i64,
    pub icp_score: f64,
}

/// A consensus feature produced by the unifier, carrying full provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFeature {
    #[serde(with = "serde_geo")]
    pub geometry: Geometry<f64>,
    pub properties: Properties,
    pub sources: Vec<FeatureSource>,
    pub confidence: f64,
    pub observation_count: usize,
}

impl UnifiedFeature {
    pub fn distinct_vacuum_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.iter().map(|s| s.vacuum_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn best_icp_score_for(&self, vacuum_id: &str) -> Option<f64> {
        self.sources
            .iter()
            .filter(|s| s.vacuum_id == vacuum_id)
            .map(|s| s.icp_score)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedMapMetadata {
    pub vacuum_count: usize,
    pub reference_vacuum: String,
    pub last_updated: i64,
    pub total_area: f64,
    pub coverage_overlap: f64,
}

/// The current consensus map: the replace-atomically output of the unifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedMap {
    pub walls: Vec<UnifiedFeature>,
    pub floors: Vec<UnifiedFeature>,
    pub segments: Vec<UnifiedFeature>,
    pub metadata: UnifiedMapMetadata,
}

impl UnifiedMap {
    /// Exports the unified map as a GeoJSON `FeatureCollection`: each
    /// feature carries `layerType`, `confidence`, `observationCount`, and
    /// the sorted, deduplicated `sourceVacuums`.
    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        let mut features =
            Vec::with_capacity(self.walls.len() + self.floors.len() + self.segments.len());
        for (group, layer_type) in
            [(&self.walls, "wall"), (&self.floors, "floor"), (&self.segments, "segment")]
        {
            for uf in group {
                features.push(unified_feature_to_geojson(uf, layer_type));
            }
        }
        geojson::FeatureCollection { bbox: None, features, foreign_members: None }
    }
}

fn unified_feature_to_geojson(uf: &UnifiedFeature, layer_type: &str) -> geojson::Feature {
    let mut properties = uf.properties.clone();
    properties.insert(
        property_keys::LAYER_TYPE.to_string(),
        serde_json::Value::String(layer_type.to_string()),
    );
    properties.insert(property_keys::CONFIDENCE.to_string(), serde_json::json!(uf.confidence));
    properties.insert(
        property_keys::OBSERVATION_COUNT.to_string(),
        serde_json::json!(uf.observation_count),
    );
    properties.insert("sourceVacuums".to_string(), serde_json::json!(uf.distinct_vacuum_ids()));

    let gj_geometry = geojson::Geometry::try_from(&uf.geometry).ok();
    geojson::Feature {
        bbox: None,
        geometry: gj_geometry,
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Per-robot transform record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacuumCalibration {
    pub transform: AffineMatrix,
    pub last_updated: i64,
    pub map_area_at_calibration: i64,
}

/// All robots' calibration state, persisted as the calibration cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationData {
    pub reference_vacuum: String,
    pub vacuums: HashMap<String, VacuumCalibration>,
    pub last_updated: i64,
}

impl CalibrationData {
    pub fn new(reference_vacuum: impl Into<String>, now: i64) -> Self {
        Self { reference_vacuum: reference_vacuum.into(), vacuums: HashMap::new(), last_updated: now }
    }

    /// Identity transform for a robot with no calibration on record.
    pub fn get_transform(&self, vacuum_id: &str) -> AffineMatrix {
        self.vacuums.get(vacuum_id).map(|vc| vc.transform).unwrap_or_else(AffineMatrix::identity)
    }

    pub fn get_vacuum_calibration(&self, vacuum_id: &str) -> Option<&VacuumCalibration> {
        self.vacuums.get(vacuum_id)
    }

    /// Inserts/replaces a robot's calibration; the global `last_updated`
    /// only ever advances.
    pub fn update_vacuum_calibration(&mut self, vacuum_id: impl Into<String>, vc: VacuumCalibration) {
        self.last_updated = self.last_updated.max(vc.last_updated);
        self.vacuums.insert(vacuum_id.into(), vc);
    }

    pub fn needs_recalibration(&self, max_age_secs: i64, now: i64) -> bool {
        self.last_updated == 0 || now - self.last_updated > max_age_secs
    }

    pub fn should_recalibrate(
        &self,
        vacuum_id: &str,
        new_map_area: i64,
        min_interval_secs: i64,
        now: i64,
    ) -> bool {
        match self.vacuums.get(vacuum_id) {
            None => true,
            Some(vc) => {
                vc.map_area_at_calibration != new_map_area || now - vc.last_updated > min_interval_secs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_calibration_needs_recalibration() {
        let data = CalibrationData::new("robot-1", 0);
        assert!(data.needs_recalibration(3600, 100));
    }

    #[test]
    fn unknown_vacuum_has_identity_transform() {
        let data = CalibrationData::new("robot-1", 100);
        assert_eq!(data.get_transform("robot-2"), AffineMatrix::identity());
    }

    #[test]
    fn should_recalibrate_when_area_changes() {
        let mut data = CalibrationData::new("robot-1", 100);
        data.update_vacuum_calibration(
            "robot-1",
            VacuumCalibration { transform: AffineMatrix::identity(), last_updated: 100, map_area_at_calibration: 500 },
        );
        assert!(data.should_recalibrate("robot-1", 900, 3600, 200));
        assert!(!data.should_recalibrate("robot-1", 500, 3600, 200));
    }

    #[test]
    fn distinct_vacuum_ids_are_sorted_and_deduped() {
        let uf = UnifiedFeature {
            geometry: Geometry::Point(geo_types::Point::new(0.0, 0.0)),
            properties: Properties::new(),
            sources: vec![
                FeatureSource {
                    vacuum_id: "b".into(),
                    original_geometry: Geometry::Point(geo_types::Point::new(0.0, 0.0)),
                    timestamp: 1,
                    icp_score: 0.9,
                },
                FeatureSource {
                    vacuum_id: "a".into(),
                    original_geometry: Geometry::Point(geo_types::Point::new(0.0, 0.0)),
                    timestamp: 2,
                    icp_score: 0.5,
                },
                FeatureSource {
                    vacuum_id: "a".into(),
                    original_geometry: Geometry::Point(geo_types::Point::new(0.0, 0.0)),
                    timestamp: 3,
                    icp_score: 0.8,
                },
            ],
            confidence: 0.7,
            observation_count: 3,
        };
        assert_eq!(uf.distinct_vacuum_ids(), vec!["a", "b"]);
        assert_eq!(uf.best_icp_score_for("a"), Some(0.8));
    }
}
