//! 2D geometry primitives: affine transforms, clustering, simplification,
//! polygon union, and the resampling/median helpers the unifier builds on.

mod affine;
mod cluster;
mod resample;
mod simplify;
mod union;

pub mod serde_geo;

pub use affine::{transform_geometry, AffineMatrix};
pub use cluster::cluster_by_proximity;
pub use resample::{geometry_centroid, grid_snap, line_length, median, resample_line};
pub use simplify::simplify_geometry;
pub use union::union_polygons;

pub use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};

/// Euclidean distance between two coordinates, in whatever unit they're
/// expressed (millimeters throughout this crate).
pub fn euclidean_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}
