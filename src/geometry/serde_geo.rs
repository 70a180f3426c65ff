//! Serde bridge between `geo_types::Geometry` (used internally for all
//! computation) and GeoJSON's `{"type": ..., "coordinates": [...]}` wire
//! format (used for persistence and the exported feature collection).

use geo_types::Geometry;
use serde::{de::Error as DeError, ser::Error as SerError, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(geom: &Geometry<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let gj_geometry: geojson::Geometry =
        geojson::Geometry::try_from(geom).map_err(|e| SerError::custom(e.to_string()))?;
    gj_geometry.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Geometry<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let gj_geometry = geojson::Geometry::deserialize(deserializer)?;
    Geometry::<f64>::try_from(gj_geometry.value).map_err(|e| DeError::custom(e.to_string()))
}
