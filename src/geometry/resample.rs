//! Median, line resampling, centroid, and grid-snap helpers shared by the
//! unifier's median-line consensus and incremental blending.

use geo_types::{Coord, Geometry, LineString, Polygon};

/// Median of an already-sorted slice. Odd length returns the middle element;
/// even length returns the arithmetic mean of the two middle elements.
pub fn median(sorted: &[f64]) -> f64 {
    assert!(!sorted.is_empty(), "median of empty slice");
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Resamples a line string to `n` equidistant stations along its arc length.
/// `ls[0]` and `ls[last]` are preserved exactly when `n >= 2`. A zero-length
/// line produces `n` copies of its single point.
pub fn resample_line(ls: &LineString<f64>, n: usize) -> LineString<f64> {
    let coords: Vec<Coord<f64>> = ls.0.clone();
    assert!(!coords.is_empty(), "resample of empty line");
    assert!(n >= 1, "resample target must have at least one station");

    if coords.len() == 1 || n == 1 {
        return LineString::new(vec![coords[0]; n.max(1)]);
    }

    let mut cumulative = vec![0.0f64; coords.len()];
    for i in 1..coords.len() {
        let seg = segment_length(coords[i - 1], coords[i]);
        cumulative[i] = cumulative[i - 1] + seg;
    }
    let total = *cumulative.last().unwrap();

    if total <= 0.0 {
        return LineString::new(vec![coords[0]; n]);
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            out.push(coords[0]);
            continue;
        }
        if i == n - 1 {
            out.push(*coords.last().unwrap());
            continue;
        }
        let station = total * (i as f64) / ((n - 1) as f64);
        out.push(point_at_station(&coords, &cumulative, station));
    }
    LineString::new(out)
}

fn segment_length(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Total arc length of a line string's segments, in the same units as its
/// coordinates (millimeters throughout this crate).
pub fn line_length(ls: &LineString<f64>) -> f64 {
    ls.0.windows(2).map(|w| segment_length(w[0], w[1])).sum()
}

fn point_at_station(coords: &[Coord<f64>], cumulative: &[f64], station: f64) -> Coord<f64> {
    let idx = match cumulative.binary_search_by(|probe| probe.partial_cmp(&station).unwrap()) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) if i >= coords.len() => coords.len() - 1,
        Err(i) => i - 1,
    };
    let next = (idx + 1).min(coords.len() - 1);
    if next == idx {
        return coords[idx];
    }
    let seg_start = cumulative[idx];
    let seg_len = cumulative[next] - seg_start;
    let t = if seg_len > 0.0 { (station - seg_start) / seg_len } else { 0.0 };
    Coord {
        x: coords[idx].x + t * (coords[next].x - coords[idx].x),
        y: coords[idx].y + t * (coords[next].y - coords[idx].y),
    }
}

/// Centroid of a geometry per spec §4.6.6: mean of vertices for line
/// strings, area-weighted centroid of the outer ring for polygons (holes are
/// ignored for this purpose), and the point itself for points.
pub fn geometry_centroid(g: &Geometry<f64>) -> Coord<f64> {
    match g {
        Geometry::Point(p) => p.0,
        Geometry::LineString(ls) => mean_of_vertices(&ls.0),
        Geometry::MultiLineString(mls) => {
            let all: Vec<Coord<f64>> = mls.0.iter().flat_map(|ls| ls.0.iter().copied()).collect();
            mean_of_vertices(&all)
        }
        Geometry::Polygon(poly) => polygon_outer_ring_centroid(poly),
        Geometry::MultiPolygon(mp) => {
            // Area-weighted across constituent polygons.
            let mut sx = 0.0;
            let mut sy = 0.0;
            let mut total_area = 0.0;
            for poly in &mp.0 {
                let area = ring_area(&poly.exterior().0).abs();
                let c = polygon_outer_ring_centroid(poly);
                sx += c.x * area;
                sy += c.y * area;
                total_area += area;
            }
            if total_area > 0.0 {
                Coord { x: sx / total_area, y: sy / total_area }
            } else {
                Coord { x: 0.0, y: 0.0 }
            }
        }
        _ => Coord { x: 0.0, y: 0.0 },
    }
}

fn mean_of_vertices(coords: &[Coord<f64>]) -> Coord<f64> {
    if coords.is_empty() {
        return Coord { x: 0.0, y: 0.0 };
    }
    let n = coords.len() as f64;
    let (sx, sy) = coords.iter().fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Coord { x: sx / n, y: sy / n }
}

fn ring_area(coords: &[Coord<f64>]) -> f64 {
    if coords.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..coords.len() - 1 {
        acc += coords[i].x * coords[i + 1].y - coords[i + 1].x * coords[i].y;
    }
    acc / 2.0
}

fn polygon_outer_ring_centroid(poly: &Polygon<f64>) -> Coord<f64> {
    let coords = &poly.exterior().0;
    let area = ring_area(coords);
    if area.abs() < 1e-9 {
        return mean_of_vertices(coords);
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..coords.len() - 1 {
        let cross = coords[i].x * coords[i + 1].y - coords[i + 1].x * coords[i].y;
        cx += (coords[i].x + coords[i + 1].x) * cross;
        cy += (coords[i].y + coords[i + 1].y) * cross;
    }
    let factor = 1.0 / (6.0 * area);
    Coord { x: cx * factor, y: cy * factor }
}

/// Snaps every coordinate in a geometry to the nearest multiple of `grid_mm`,
/// damping floating-point drift across refinement cycles.
pub fn grid_snap(g: &Geometry<f64>, grid_mm: f64) -> Geometry<f64> {
    if grid_mm <= 0.0 {
        return g.clone();
    }
    let snap = |c: Coord<f64>| Coord {
        x: (c.x / grid_mm).round() * grid_mm,
        y: (c.y / grid_mm).round() * grid_mm,
    };
    match g {
        Geometry::Point(p) => Geometry::Point(geo_types::Point(snap(p.0))),
        Geometry::LineString(ls) => {
            Geometry::LineString(LineString::new(ls.0.iter().map(|&c| snap(c)).collect()))
        }
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(geo_types::MultiLineString::new(
            mls.0.iter().map(|ls| LineString::new(ls.0.iter().map(|&c| snap(c)).collect())).collect(),
        )),
        Geometry::Polygon(poly) => Geometry::Polygon(snap_polygon(poly, &snap)),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(geo_types::MultiPolygon::new(mp.0.iter().map(|p| snap_polygon(p, &snap)).collect()))
        }
        other => other.clone(),
    }
}

fn snap_polygon(poly: &Polygon<f64>, snap: &impl Fn(Coord<f64>) -> Coord<f64>) -> Polygon<f64> {
    let exterior = LineString::new(poly.exterior().0.iter().map(|&c| snap(c)).collect());
    let interiors: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .map(|r| LineString::new(r.0.iter().map(|&c| snap(c)).collect()))
        .collect();
    Polygon::new(exterior, interiors)
}
