//! Typed representation of one robot's raw map observation.

use serde::{Deserialize, Serialize};

use super::flat_pairs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    Floor,
    Wall,
    Segment,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    RobotPosition,
    ChargerLocation,
    Path,
    Other(String),
}

impl EntityType {
    fn as_wire_str(&self) -> &str {
        match self {
            EntityType::RobotPosition => "robot_position",
            EntityType::ChargerLocation => "charger_location",
            EntityType::Path => "path",
            EntityType::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        match s {
            "robot_position" => EntityType::RobotPosition,
            "charger_location" => EntityType::ChargerLocation,
            "path" => EntityType::Path,
            other => EntityType::Other(other.to_string()),
        }
    }
}

impl Serialize for EntityType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EntityType::from(s.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(rename = "type")]
    pub layer_type: LayerType,

    #[serde(with = "flat_pairs", default)]
    pub pixels: Vec<(f64, f64)>,

    #[serde(with = "flat_pairs::optional", default, skip_serializing_if = "Option::is_none")]
    pub compressed_pixels: Option<Vec<(f64, f64)>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub area: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Layer {
    pub fn has_drawable_pixels(&self) -> bool {
        !self.pixels.is_empty() || self.compressed_pixels.as_ref().is_some_and(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(with = "flat_pairs", default)]
    pub points: Vec<(f64, f64)>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub total_layer_area: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Map {
    pub pixel_size: u32,
    pub size: (u32, u32),
    #[serde(default)]
    pub metadata: MapMetadata,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub normalized: bool,
}

impl Map {
    pub fn entities_of_type<'a>(&'a self, t: &'a EntityType) -> impl Iterator<Item = &'a Entity> {
        self.entities.iter().filter(move |e| &e.entity_type == t)
    }

    pub fn first_entity_with_min_points<'a>(&'a self, t: &'a EntityType, min_points: usize) -> Option<&'a Entity> {
        self.entities_of_type(t).find(|e| e.points.len() >= min_points)
    }
}
