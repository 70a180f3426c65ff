//! Loads, persists, and updates per-robot calibration transforms.
//!
//! Persistence is atomic (write to a sibling temp file, then rename) so a
//! crash mid-write never leaves a reader looking at a half-written cache.
//! `load` also accepts the legacy on-disk shape where `vacuums` maps a
//! robot id straight to a bare [`AffineMatrix`], lifting it into a full
//! [`VacuumCalibration`] record.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Deserialize;

use crate::align::{align_to_reference, quick_align};
use crate::errors::{CalibrationError, PersistenceError};
use crate::geometry::AffineMatrix;
use crate::mapmodel::Map;
use crate::models::{CalibrationData, VacuumCalibration};

/// ICP mean-residual ceiling above which `calibrateAll` falls back to
/// `quickAlign` for that robot.
pub const ICP_ERROR_THRESHOLD_MM: f64 = 100.0;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVacuumEntry {
    Versioned(VacuumCalibration),
    Legacy(AffineMatrix),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCalibrationData {
    reference_vacuum: String,
    #[serde(default)]
    vacuums: HashMap<String, RawVacuumEntry>,
    #[serde(default)]
    last_updated: i64,
}

/// Loads calibration data from `path`. Returns `Ok(None)` when the file
/// doesn't exist (not an error); errors on corrupt JSON.
pub fn load(path: &Path) -> Result<Option<CalibrationData>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::Io { path: path.display().to_string(), source: e }),
    };

    let raw: RawCalibrationData = serde_json::from_slice(&bytes)
        .map_err(|e| PersistenceError::CorruptJson { path: path.display().to_string(), source: e })?;

    let vacuums = raw
        .vacuums
        .into_iter()
        .map(|(id, entry)| {
            let vc = match entry {
                RawVacuumEntry::Versioned(vc) => vc,
                RawVacuumEntry::Legacy(transform) => {
                    VacuumCalibration { transform, last_updated: raw.last_updated, map_area_at_calibration: 0 }
                }
            };
            (id, vc)
        })
        .collect();

    Ok(Some(CalibrationData { reference_vacuum: raw.reference_vacuum, vacuums, last_updated: raw.last_updated }))
}

/// Persists calibration data to `path` atomically, stamping
/// `data.last_updated = now` first. Creates parent directories as needed.
pub fn save(path: &Path, data: &mut CalibrationData, now: i64) -> Result<(), PersistenceError> {
    data.last_updated = now;
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| PersistenceError::CorruptJson { path: path.display().to_string(), source: e })?;
    atomic_write(path, &json)
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let to_io_err = |e: std::io::Error| PersistenceError::Io { path: path.display().to_string(), source: e };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_io_err)?;
        }
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(to_io_err)?;
    tmp.write_all(bytes).map_err(to_io_err)?;
    tmp.flush().map_err(to_io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644)).map_err(to_io_err)?;
    }

    tmp.persist(path).map_err(|e| PersistenceError::Io { path: path.display().to_string(), source: e.error })?;
    Ok(())
}

/// Runs `alignToReference` for every non-reference robot, falling back to
/// `quickAlign` when ICP error is non-finite or at/above
/// [`ICP_ERROR_THRESHOLD_MM`]. The reference robot always receives the
/// identity transform. Returns each robot's transform paired with the
/// alignment score used downstream as its `icpScore` (1.0 for the
/// reference, and for quick-align fallbacks since no ICP score exists).
pub fn calibrate_all(
    maps: &HashMap<String, Map>,
    reference_id: &str,
    now: i64,
) -> Result<CalibrationData, CalibrationError> {
    let reference_map = maps.get(reference_id).ok_or_else(|| CalibrationError::ReferenceNotFound(reference_id.to_string()))?;

    let mut data = CalibrationData::new(reference_id, now);
    data.update_vacuum_calibration(
        reference_id,
        VacuumCalibration {
            transform: AffineMatrix::identity(),
            last_updated: now,
            map_area_at_calibration: reference_map.metadata.total_layer_area as i64,
        },
    );

    for (robot_id, map) in maps {
        if robot_id == reference_id {
            continue;
        }
        let (icp_transform, icp_error) = align_to_reference(map, reference_map);
        let transform = if icp_error.is_finite() && icp_error < ICP_ERROR_THRESHOLD_MM {
            icp_transform
        } else {
            quick_align(map, reference_map)
        };
        data.update_vacuum_calibration(
            robot_id.clone(),
            VacuumCalibration {
                transform,
                last_updated: now,
                map_area_at_calibration: map.metadata.total_layer_area as i64,
            },
        );
    }

    Ok(data)
}

/// Overrides each listed robot's rotation with a fixed degree value while
/// keeping its calibrated translation, per the `--force-rotation` CLI flag.
/// Robots not present in `overrides` are left untouched.
pub fn apply_forced_rotations(data: &mut CalibrationData, overrides: &HashMap<String, f64>) {
    for (robot_id, degrees) in overrides {
        if let Some(vc) = data.vacuums.get_mut(robot_id) {
            let t = vc.transform;
            vc.transform = AffineMatrix::rotation_translation(*degrees, t.tx, t.ty);
        }
    }
}

/// Picks the robot with the largest `totalLayerArea`, breaking ties
/// lexicographically by id.
pub fn select_reference(maps: &HashMap<String, Map>) -> Option<String> {
    maps.iter()
        .max_by(|(id_a, a), (id_b, b)| {
            a.metadata
                .total_layer_area
                .partial_cmp(&b.metadata.total_layer_area)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        })
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmodel::MapMetadata;

    fn empty_map(area: f64) -> Map {
        Map {
            pixel_size: 1,
            size: (1, 1),
            metadata: MapMetadata { total_layer_area: area, ..Default::default() },
            layers: vec![],
            entities: vec![],
            normalized: true,
        }
    }

    #[test]
    fn load_missing_file_returns_none() {
        let result = load(Path::new("/nonexistent/path/cal.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        let mut data = CalibrationData::new("robot-a", 0);
        data.update_vacuum_calibration(
            "robot-a",
            VacuumCalibration { transform: AffineMatrix::identity(), last_updated: 100, map_area_at_calibration: 5000 },
        );
        save(&path, &mut data, 200).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.reference_vacuum, "robot-a");
        assert_eq!(loaded.last_updated, 200);
        assert_eq!(loaded.get_vacuum_calibration("robot-a").unwrap().map_area_at_calibration, 5000);
    }

    #[test]
    fn legacy_bare_matrix_shape_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let legacy = serde_json::json!({
            "referenceVacuum": "robot-a",
            "vacuums": {
                "robot-a": {"a": 1.0, "b": 0.0, "tx": 0.0, "c": 0.0, "d": 1.0, "ty": 0.0}
            },
            "lastUpdated": 500
        });
        fs::write(&path, legacy.to_string()).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        let vc = loaded.get_vacuum_calibration("robot-a").unwrap();
        assert_eq!(vc.transform, AffineMatrix::identity());
        assert_eq!(vc.last_updated, 500);
        assert_eq!(vc.map_area_at_calibration, 0);
    }

    #[test]
    fn select_reference_picks_largest_area_with_lexicographic_tiebreak() {
        let mut maps = HashMap::new();
        maps.insert("b".to_string(), empty_map(100.0));
        maps.insert("a".to_string(), empty_map(100.0));
        maps.insert("c".to_string(), empty_map(50.0));
        assert_eq!(select_reference(&maps), Some("a".to_string()));
    }

    #[test]
    fn calibrate_all_gives_reference_identity_transform() {
        let mut maps = HashMap::new();
        maps.insert("ref".to_string(), empty_map(1000.0));
        maps.insert("other".to_string(), empty_map(500.0));
        let data = calibrate_all(&maps, "ref", 42).unwrap();
        assert_eq!(data.get_transform("ref"), AffineMatrix::identity());
        assert_eq!(data.last_updated, 42);
    }

    #[test]
    fn forced_rotation_overrides_rotation_but_keeps_translation() {
        let mut data = CalibrationData::new("ref", 0);
        data.update_vacuum_calibration(
            "robot-a",
            VacuumCalibration { transform: AffineMatrix::translation(10.0, 20.0), last_updated: 0, map_area_at_calibration: 0 },
        );
        let mut overrides = HashMap::new();
        overrides.insert("robot-a".to_string(), 90.0);
        apply_forced_rotations(&mut data, &overrides);

        let transform = data.get_transform("robot-a");
        assert!((transform.tx - 10.0).abs() < 1e-9);
        assert!((transform.ty - 20.0).abs() < 1e-9);
        assert!((transform.a - 0.0).abs() < 1e-9);
    }

    #[test]
    fn calibrate_all_errors_on_missing_reference() {
        let maps = HashMap::new();
        let err = calibrate_all(&maps, "missing", 0);
        assert!(matches!(err, Err(CalibrationError::ReferenceNotFound(_))));
    }
}
