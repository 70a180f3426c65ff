//! Polygon union via `geo`'s boolean-operations backend.

use geo::BooleanOps;
use geo_types::{MultiPolygon, Polygon};

/// Unions a non-empty list of polygons, preserving holes, into a single
/// multi-polygon. Returns `None` for empty input.
pub fn union_polygons(polygons: &[Polygon<f64>]) -> Option<MultiPolygon<f64>> {
    let mut iter = polygons.iter();
    let first = iter.next()?;
    let mut acc = MultiPolygon::new(vec![first.clone()]);
    for poly in iter {
        acc = acc.union(&MultiPolygon::new(vec![poly.clone()]));
    }
    Some(acc)
}
