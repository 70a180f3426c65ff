//! Reacts to robot-docked events: debounces, fetches a fresh map if needed,
//! re-calibrates the docked robot against the reference, persists, and
//! triggers re-unification.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::calibration;
use crate::errors::{CalibrationError, FetchError};
use crate::mapmodel::Map;
use crate::models::CalibrationData;
use crate::tracker::StateTracker;

/// External collaborator: fetches a robot's current map over the network.
/// Implemented by the transport layer; the controller only depends on this
/// trait so it can be exercised with a fake in tests.
#[async_trait::async_trait]
pub trait MapFetcher: Send + Sync {
    async fn fetch(&self, robot_id: &str) -> Result<Map, FetchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_backoff: Duration::from_millis(500), per_attempt_timeout: Duration::from_secs(5) }
    }
}

const MIN_RECALIBRATION_INTERVAL_SECS: i64 = 30 * 60;

/// Drives the docking-triggered calibration flow. Holds a per-robot keyed
/// lock so overlapping dock events for the same robot can't race each
/// other's calibration.
pub struct CalibrationController<F: MapFetcher> {
    tracker: Arc<StateTracker>,
    calibration_path: PathBuf,
    fetcher: F,
    retry_policy: RetryPolicy,
    robot_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<F: MapFetcher> CalibrationController<F> {
    pub fn new(tracker: Arc<StateTracker>, calibration_path: PathBuf, fetcher: F, retry_policy: RetryPolicy) -> Self {
        Self { tracker, calibration_path, fetcher, retry_policy, robot_locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, robot_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.robot_locks.lock().await;
        locks.entry(robot_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Handles a `robotDocked` transition. All other state values are
    /// filtered out by the caller before this is invoked.
    pub async fn on_robot_docked(
        &self,
        robot_id: &str,
        fresh_map: Option<Map>,
        known_maps: &mut HashMap<String, Map>,
        now: i64,
    ) -> Result<(), ControllerError> {
        let robot_lock = self.lock_for(robot_id).await;
        let _guard = robot_lock.lock().await;

        let map = match fresh_map {
            Some(m) => m,
            None => self.fetch_with_retry(robot_id).await?,
        };
        let new_area = map.metadata.total_layer_area as i64;

        let mut cal = calibration::load(&self.calibration_path)?.unwrap_or_else(|| {
            let reference = calibration::select_reference(known_maps).unwrap_or_else(|| robot_id.to_string());
            CalibrationData::new(reference, now)
        });

        if !cal.should_recalibrate(robot_id, new_area, MIN_RECALIBRATION_INTERVAL_SECS, now) {
            info!(robot_id, "skipping recalibration, within debounce window");
            known_maps.insert(robot_id.to_string(), map);
            return Ok(());
        }

        known_maps.insert(robot_id.to_string(), map);

        let reference_id = cal.reference_vacuum.clone();
        let mut subset: HashMap<String, Map> = HashMap::new();
        if let Some(reference_map) = known_maps.get(&reference_id) {
            subset.insert(reference_id.clone(), reference_map.clone());
        }
        if let Some(docked_map) = known_maps.get(robot_id) {
            subset.insert(robot_id.to_string(), docked_map.clone());
        }
        if !subset.contains_key(&reference_id) {
            // First-ever calibration: this robot becomes the reference.
            subset.insert(robot_id.to_string(), known_maps[robot_id].clone());
            let recalibrated = calibration::calibrate_all(&subset, robot_id, now)?;
            cal.reference_vacuum = robot_id.to_string();
            if let Some(vc) = recalibrated.get_vacuum_calibration(robot_id) {
                cal.update_vacuum_calibration(robot_id, *vc);
            }
        } else {
            let recalibrated = calibration::calibrate_all(&subset, &reference_id, now)?;
            if let Some(vc) = recalibrated.get_vacuum_calibration(robot_id) {
                cal.update_vacuum_calibration(robot_id, *vc);
            }
        }

        calibration::save(&self.calibration_path, &mut cal, now)?;

        self.tracker.update_unified_map(&cal, now).await?;
        Ok(())
    }

    async fn fetch_with_retry(&self, robot_id: &str) -> Result<Map, FetchError> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.retry_policy.per_attempt_timeout, self.fetcher.fetch(robot_id)).await;
            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout),
            };

            match result {
                Ok(map) => return Ok(map),
                Err(e) if e.is_retryable() && attempt < self.retry_policy.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_policy.base_backoff * 2u32.pow(attempt - 1);
                    warn!(robot_id, attempt, ?backoff, "retrying map fetch");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] crate::errors::PersistenceError),
    #[error("unification failed: {0}")]
    Unification(#[from] crate::errors::UnificationError),
}

/// The three wire shapes a docking-state payload may arrive in: a JSON
/// object `{"value": "..."}`, a bare JSON string, or a plain-text string.
pub fn parse_state_payload(payload: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(payload) {
        if let Some(serde_json::Value::String(value)) = map.get("value") {
            return value.clone();
        }
    }
    if let Ok(serde_json::Value::String(value)) = serde_json::from_str::<serde_json::Value>(payload) {
        return value;
    }
    payload.trim().to_string()
}

/// Only a transition into `"docked"` triggers the calibration flow.
pub fn is_docked_state(value: &str) -> bool {
    value == "docked"
}

/// Parses `--force-rotation "id=deg,id2=deg2"`; malformed entries (no `=`
/// or an unparseable number) are silently skipped.
pub fn parse_force_rotation(spec: &str) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let Some((id, deg)) = item.split_once('=') else { continue };
        let Ok(deg) = deg.trim().parse::<f64>() else { continue };
        out.insert(id.trim().to_string(), deg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_payload_handles_all_three_shapes() {
        assert_eq!(parse_state_payload(r#"{"value": "docked"}"#), "docked");
        assert_eq!(parse_state_payload(r#""docked""#), "docked");
        assert_eq!(parse_state_payload("  docked  "), "docked");
    }

    #[test]
    fn only_docked_triggers_flow() {
        assert!(is_docked_state("docked"));
        assert!(!is_docked_state("cleaning"));
        assert!(!is_docked_state("idle"));
    }

    #[test]
    fn force_rotation_parses_valid_entries_and_skips_malformed() {
        let parsed = parse_force_rotation("robot1=90,robot2=nope,bad,robot3=-45.5");
        assert_eq!(parsed.get("robot1"), Some(&90.0));
        assert_eq!(parsed.get("robot3"), Some(&-45.5));
        assert_eq!(parsed.len(), 2);
    }
}
