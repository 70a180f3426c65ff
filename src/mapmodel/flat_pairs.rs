//! Serde helpers for the wire format's flat `[x1, y1, x2, y2, ...]` integer
//! pair encoding used for layer pixels and entity points.

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(pairs: &[(f64, f64)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let flat: Vec<f64> = pairs.iter().flat_map(|&(x, y)| [x, y]).collect();
    flat.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(f64, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    let flat = Vec::<f64>::deserialize(deserializer)?;
    if flat.len() % 2 != 0 {
        return Err(DeError::custom("flat coordinate array has odd length"));
    }
    Ok(flat.chunks(2).map(|c| (c[0], c[1])).collect())
}

pub mod optional {
    use super::*;

    pub fn serialize<S>(pairs: &Option<Vec<(f64, f64)>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match pairs {
            Some(pairs) => super::serialize(pairs, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<(f64, f64)>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flat: Option<Vec<f64>> = Option::deserialize(deserializer)?;
        match flat {
            None => Ok(None),
            Some(flat) => {
                if flat.len() % 2 != 0 {
                    return Err(DeError::custom("flat coordinate array has odd length"));
                }
                Ok(Some(flat.chunks(2).map(|c| (c[0], c[1])).collect()))
            }
        }
    }
}
