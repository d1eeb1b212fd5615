//! Point-in-polygon test for the spatial pre-filter (§4.4).

use super::projection::Projection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Ray-casting point-in-polygon test over already-projected vertices.
/// `polygon` is the projected ring; `point` is the projected test point.
/// Standard even-odd crossing-number algorithm.
pub fn inpoly(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = point;
    let mut inside = false;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        let intersects = ((yi > py) != (yj > py))
            && (px < (xj - xi) * (py - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Project every vertex of `polygon` with `proj` and test `(lat, lon)`.
pub fn contains(proj: Projection, polygon: &[LatLon], lat: f64, lon: f64) -> bool {
    let projected: Vec<(f64, f64)> = polygon.iter().map(|v| proj.project(v.lat, v.lon)).collect();
    inpoly(proj.project(lat, lon), &projected)
}
