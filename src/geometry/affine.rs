//! Affine transform: `[x' y' 1]ᵀ = [[a b tx],[c d ty],[0 0 1]] · [x y 1]ᵀ`.

use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

/// A 2D affine transform mapping a robot's local frame into the shared world
/// frame, or any composition thereof.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineMatrix {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub c: f64,
    pub d: f64,
    pub ty: f64,
}

impl AffineMatrix {
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, tx: 0.0, c: 0.0, d: 1.0, ty: 0.0 }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self { a: 1.0, b: 0.0, tx, c: 0.0, d: 1.0, ty }
    }

    pub fn rotation_deg(theta_deg: f64) -> Self {
        let theta = theta_deg.to_radians();
        let (sin, cos) = theta.sin_cos();
        Self { a: cos, b: -sin, tx: 0.0, c: sin, d: cos, ty: 0.0 }
    }

    /// Rotation followed by translation: `translate ∘ rotate`.
    pub fn rotation_translation(theta_deg: f64, tx: f64, ty: f64) -> Self {
        let rotation = Self::rotation_deg(theta_deg);
        Self { a: rotation.a, b: rotation.b, tx, c: rotation.c, d: rotation.d, ty }
    }

    pub fn transform_point(&self, p: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.a * p.x + self.b * p.y + self.tx,
            y: self.c * p.x + self.d * p.y + self.ty,
        }
    }

    /// Applies the transform's rotational component to an angle given in
    /// degrees, normalized to `[-180, 180)`.
    pub fn transform_angle(&self, phi_deg: f64) -> f64 {
        let rotated = phi_deg + self.c.atan2(self.a).to_degrees();
        normalize_deg(rotated)
    }

    /// Composes `self ∘ other`: applying the result to a point is the same
    /// as applying `other` first, then `self`.
    pub fn compose(&self, other: &AffineMatrix) -> AffineMatrix {
        AffineMatrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            tx: self.a * other.tx + self.b * other.ty + self.tx,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            ty: self.c * other.tx + self.d * other.ty + self.ty,
        }
    }

    /// Inverse transform, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<AffineMatrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_a = self.d / det;
        let inv_b = -self.b / det;
        let inv_c = -self.c / det;
        let inv_d = self.a / det;
        let inv_tx = -(inv_a * self.tx + inv_b * self.ty);
        let inv_ty = -(inv_c * self.tx + inv_d * self.ty);
        Some(AffineMatrix { a: inv_a, b: inv_b, tx: inv_tx, c: inv_c, d: inv_d, ty: inv_ty })
    }

    /// Converts to the `geo` crate's transform so geometries can be
    /// transformed via `geo::AffineOps`.
    pub fn to_geo(self) -> geo::AffineTransform<f64> {
        geo::AffineTransform::new(self.a, self.b, self.tx, self.c, self.d, self.ty)
    }
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Applies an affine transform to every coordinate of a geometry,
/// recursing into rings and holes.
pub fn transform_geometry(g: &Geometry<f64>, m: &AffineMatrix) -> Geometry<f64> {
    match g {
        Geometry::Point(p) => Geometry::Point(Point(m.transform_point(p.0))),
        Geometry::LineString(ls) => Geometry::LineString(transform_linestring(ls, m)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.0.iter().map(|ls| transform_linestring(ls, m)).collect(),
        )),
        Geometry::Polygon(poly) => Geometry::Polygon(transform_polygon(poly, m)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon::new(
            mp.0.iter().map(|poly| transform_polygon(poly, m)).collect(),
        )),
        other => other.clone(),
    }
}

fn transform_linestring(ls: &LineString<f64>, m: &AffineMatrix) -> LineString<f64> {
    LineString::new(ls.0.iter().map(|&c| m.transform_point(c)).collect())
}

fn transform_polygon(poly: &Polygon<f64>, m: &AffineMatrix) -> Polygon<f64> {
    Polygon::new(
        transform_linestring(poly.exterior(), m),
        poly.interiors().iter().map(|ring| transform_linestring(ring, m)).collect(),
    )
}

fn normalize_deg(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    } else if a < -180.0 {
        a += 360.0;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_is_noop() {
        let id = AffineMatrix::identity();
        let p = Coord { x: 3.5, y: -2.0 };
        let out = id.transform_point(p);
        assert_relative_eq!(out.x, p.x);
        assert_relative_eq!(out.y, p.y);
    }

    #[test]
    fn translation_shifts_point() {
        let t = AffineMatrix::translation(10.0, -5.0);
        let out = t.transform_point(Coord { x: 1.0, y: 1.0 });
        assert_relative_eq!(out.x, 11.0);
        assert_relative_eq!(out.y, -4.0);
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let m = AffineMatrix::rotation_translation(37.0, 12.0, -8.0);
        let inv = m.inverse().expect("invertible");
        let composed = m.compose(&inv);
        let id = AffineMatrix::identity();
        assert_relative_eq!(composed.a, id.a, epsilon = 1e-9);
        assert_relative_eq!(composed.b, id.b, epsilon = 1e-9);
        assert_relative_eq!(composed.tx, id.tx, epsilon = 1e-9);
        assert_relative_eq!(composed.c, id.c, epsilon = 1e-9);
        assert_relative_eq!(composed.d, id.d, epsilon = 1e-9);
        assert_relative_eq!(composed.ty, id.ty, epsilon = 1e-9);
    }

    #[test]
    fn rotation_angle_wraps_to_range() {
        let m = AffineMatrix::rotation_deg(190.0);
        let out = m.transform_angle(0.0);
        assert!((-180.0..180.0).contains(&out));
    }

    #[test]
    fn transform_geometry_moves_linestring_points() {
        let ls = LineString::new(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 }]);
        let g = Geometry::LineString(ls);
        let t = AffineMatrix::translation(10.0, 0.0);
        let out = transform_geometry(&g, &t);
        match out {
            Geometry::LineString(ls) => {
                assert_relative_eq!(ls.0[0].x, 10.0);
                assert_relative_eq!(ls.0[1].x, 11.0);
            }
            _ => panic!("expected linestring"),
        }
    }
}
