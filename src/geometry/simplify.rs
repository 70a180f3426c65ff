//! Douglas-Peucker simplification, preserving endpoints and ring closure.

use geo::Simplify;
use geo_types::{Geometry, LineString, MultiLineString, Polygon};

/// Simplifies a geometry with the given tolerance in millimeters. Line
/// string and polygon endpoints/ring closure are preserved by `geo`'s RDP
/// implementation; unsupported geometry variants pass through unchanged.
pub fn simplify_geometry(g: &Geometry<f64>, tolerance_mm: f64) -> Geometry<f64> {
    match g {
        Geometry::LineString(ls) => Geometry::LineString(simplify_linestring(ls, tolerance_mm)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.0.iter().map(|ls| simplify_linestring(ls, tolerance_mm)).collect(),
        )),
        Geometry::Polygon(poly) => Geometry::Polygon(simplify_polygon(poly, tolerance_mm)),
        Geometry::MultiPolygon(mp) => geo_types::Geometry::MultiPolygon(geo_types::MultiPolygon::new(
            mp.0.iter().map(|p| simplify_polygon(p, tolerance_mm)).collect(),
        )),
        other => other.clone(),
    }
}

fn simplify_linestring(ls: &LineString<f64>, tolerance_mm: f64) -> LineString<f64> {
    if ls.0.len() <= 2 {
        return ls.clone();
    }
    ls.simplify(&tolerance_mm)
}

fn simplify_polygon(poly: &Polygon<f64>, tolerance_mm: f64) -> Polygon<f64> {
    let ext = close_ring(simplify_linestring(poly.exterior(), tolerance_mm));
    let interiors: Vec<LineString<f64>> =
        poly.interiors().iter().map(|r| close_ring(simplify_linestring(r, tolerance_mm))).collect();
    Polygon::new(ext, interiors)
}

/// `geo::Simplify` can in rare cases drop the closing vertex; re-close the
/// ring so it always starts and ends at the same coordinate.
fn close_ring(mut ls: LineString<f64>) -> LineString<f64> {
    if ls.0.len() >= 2 && ls.0.first() != ls.0.last() {
        let first = ls.0[0];
        ls.0.push(first);
    }
    ls
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Coord;

    #[test]
    fn collinear_points_are_dropped() {
        let ls = LineString::new(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 50.0, y: 0.0 },
            Coord { x: 100.0, y: 0.0 },
        ]);
        let out = simplify_linestring(&ls, 1.0);
        assert_eq!(out.0.len(), 2);
        assert_eq!(out.0[0], Coord { x: 0.0, y: 0.0 });
        assert_eq!(*out.0.last().unwrap(), Coord { x: 100.0, y: 0.0 });
    }

    #[test]
    fn polygon_ring_stays_closed() {
        let poly = Polygon::new(
            LineString::new(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 10.0, y: 0.0 },
                Coord { x: 10.0, y: 10.0 },
                Coord { x: 0.0, y: 10.0 },
                Coord { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let out = simplify_polygon(&poly, 0.5);
        assert_eq!(out.exterior().0.first(), out.exterior().0.last());
    }
}
