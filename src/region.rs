//! Spatial pre-filter: turns a polygon or raster region into a
//! `(first_segment, num_segments, first_photon, num_photons)` read window
//! before any photon-level array is touched (§4.1 "Spatial pre-filter",
//! §4.4 "Region & Polygon Utilities").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::geometry::{LatLon, Projection, RegionFilter};

/// In-process registry resolving a `RegionFilter::Raster(name)` to the
/// predicate it names (§6 "Raster predicate" is an external collaborator;
/// `RequestParams` only carries the name so it stays serializable).
#[derive(Default)]
pub struct RasterRegistry {
    predicates: Mutex<HashMap<String, Arc<dyn Fn(f64, f64) -> bool + Send + Sync>>>,
}

impl RasterRegistry {
    pub fn new() -> Self {
        RasterRegistry::default()
    }

    pub fn register(&self, name: impl Into<String>, predicate: impl Fn(f64, f64) -> bool + Send + Sync + 'static) {
        self.predicates.lock().unwrap().insert(name.into(), Arc::new(predicate));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Fn(f64, f64) -> bool + Send + Sync>> {
        self.predicates.lock().unwrap().get(name).cloned()
    }
}

/// A resolved read window over a beam's per-segment arrays (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct RegionWindow {
    pub first_segment: usize,
    pub num_segments: usize,
    pub first_photon: usize,
    pub num_photons: usize,
    /// `Some` only in raster mode: per-segment inclusion bits spanning
    /// `[first_segment, first_segment + num_segments)`, used by the
    /// per-photon filter to reject photons whose host segment is excluded.
    pub segment_included: Option<Vec<bool>>,
    /// Set when a polygon region crossed the granule more than once and
    /// the window was conservatively truncated to the first crossing.
    pub truncated_multi_cross: bool,
}

impl RegionWindow {
    fn full(seg_ph_cnt: &[u32]) -> Self {
        let num_photons = seg_ph_cnt.iter().map(|&c| c as usize).sum();
        RegionWindow {
            first_segment: 0,
            num_segments: seg_ph_cnt.len(),
            first_photon: 0,
            num_photons,
            segment_included: None,
            truncated_multi_cross: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_photons == 0
    }
}

fn photon_offsets(seg_ph_cnt: &[u32]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(seg_ph_cnt.len() + 1);
    let mut running = 0usize;
    for &count in seg_ph_cnt {
        offsets.push(running);
        running += count as usize;
    }
    offsets.push(running);
    offsets
}

/// Polygon-mode window: scan segments in order, find the first segment
/// whose projected reference point is inside the polygon, continue while
/// inside, stop at the first subsequent outside segment (§4.1).
pub fn polygon_window(
    polygon: &[LatLon],
    ref_lat: &[f64],
    ref_lon: &[f64],
    seg_ph_cnt: &[u32],
) -> RegionWindow {
    let n = seg_ph_cnt.len();
    if n == 0 || polygon.len() < 3 {
        return RegionWindow { num_photons: 0, ..RegionWindow::full(seg_ph_cnt) };
    }

    let proj = Projection::for_latitude(ref_lat[0]);
    let projected_polygon: Vec<(f64, f64)> =
        polygon.iter().map(|v| proj.project(v.lat, v.lon)).collect();
    let inside = |i: usize| crate::geometry::polygon::inpoly(proj.project(ref_lat[i], ref_lon[i]), &projected_polygon);

    let Some(first_segment) = (0..n).find(|&i| inside(i)) else {
        return RegionWindow { num_photons: 0, ..RegionWindow::full(seg_ph_cnt) };
    };

    let mut last_segment = first_segment;
    while last_segment + 1 < n && inside(last_segment + 1) {
        last_segment += 1;
    }

    let truncated = ((last_segment + 1)..n).any(inside);

    let offsets = photon_offsets(seg_ph_cnt);
    let first_photon = offsets[first_segment];
    let num_photons = offsets[last_segment + 1] - first_photon;

    RegionWindow {
        first_segment,
        num_segments: last_segment - first_segment + 1,
        first_photon,
        num_photons,
        segment_included: None,
        truncated_multi_cross: truncated,
    }
}

/// Raster-mode window: test every segment's reference point, retain the
/// contiguous `[first_included, last_included]` span as the read window,
/// and keep a bitmask so per-photon filtering can still reject photons
/// whose host segment failed the predicate (§4.1).
pub fn raster_window(
    predicate: &(dyn Fn(f64, f64) -> bool + Send + Sync),
    ref_lat: &[f64],
    ref_lon: &[f64],
    seg_ph_cnt: &[u32],
) -> RegionWindow {
    let n = seg_ph_cnt.len();
    let included: Vec<bool> = (0..n).map(|i| predicate(ref_lon[i], ref_lat[i])).collect();

    let Some(first_segment) = included.iter().position(|&b| b) else {
        return RegionWindow { num_photons: 0, ..RegionWindow::full(seg_ph_cnt) };
    };
    let last_segment = included.iter().rposition(|&b| b).unwrap();

    let offsets = photon_offsets(seg_ph_cnt);
    let first_photon = offsets[first_segment];
    let num_photons = offsets[last_segment + 1] - first_photon;

    RegionWindow {
        first_segment,
        num_segments: last_segment - first_segment + 1,
        first_photon,
        num_photons,
        segment_included: Some(included[first_segment..=last_segment].to_vec()),
        truncated_multi_cross: false,
    }
}

/// Resolve a `RegionFilter` (or none) into a [`RegionWindow`].
///
/// Returns `Ok(None)` for an unresolvable raster name rather than an
/// error: callers treat a missing predicate the same as an empty subset
/// (§4.1 "empty subset → emit terminator only").
pub fn resolve_window(
    region: Option<&RegionFilter>,
    registry: &RasterRegistry,
    ref_lat: &[f64],
    ref_lon: &[f64],
    seg_ph_cnt: &[u32],
) -> Option<RegionWindow> {
    match region {
        None => Some(RegionWindow::full(seg_ph_cnt)),
        Some(RegionFilter::Polygon(polygon)) => Some(polygon_window(polygon, ref_lat, ref_lon, seg_ph_cnt)),
        Some(RegionFilter::Raster(name)) => {
            registry.get(name).map(|predicate| raster_window(predicate.as_ref(), ref_lat, ref_lon, seg_ph_cnt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<LatLon> {
        vec![
            LatLon { lat: -1.0, lon: -1.0 },
            LatLon { lat: -1.0, lon: 1.0 },
            LatLon { lat: 1.0, lon: 1.0 },
            LatLon { lat: 1.0, lon: -1.0 },
        ]
    }

    #[test]
    fn no_region_spans_the_whole_granule() {
        let seg_ph_cnt = [3u32, 4, 5];
        let window = resolve_window(None, &RasterRegistry::new(), &[], &[], &seg_ph_cnt).unwrap();
        assert_eq!(window.first_segment, 0);
        assert_eq!(window.num_segments, 3);
        assert_eq!(window.num_photons, 12);
    }

    #[test]
    fn polygon_window_bounds_the_single_crossing() {
        let ref_lat = [-5.0, -0.5, 0.0, 0.5, 5.0];
        let ref_lon = [0.0, 0.0, 0.0, 0.0, 0.0];
        let seg_ph_cnt = [10u32, 10, 10, 10, 10];
        let window = polygon_window(&square(), &ref_lat, &ref_lon, &seg_ph_cnt);
        assert_eq!(window.first_segment, 1);
        assert_eq!(window.num_segments, 3);
        assert_eq!(window.first_photon, 10);
        assert_eq!(window.num_photons, 30);
        assert!(!window.truncated_multi_cross);
    }

    #[test]
    fn polygon_window_outside_everywhere_is_empty() {
        let ref_lat = [-5.0, -4.0, -3.0];
        let ref_lon = [0.0, 0.0, 0.0];
        let seg_ph_cnt = [10u32, 10, 10];
        let window = polygon_window(&square(), &ref_lat, &ref_lon, &seg_ph_cnt);
        assert!(window.is_empty());
    }

    #[test]
    fn polygon_window_flags_a_second_crossing_as_truncated() {
        let ref_lat = [-5.0, 0.0, 5.0, 0.0, -5.0];
        let ref_lon = [0.0, 0.0, 0.0, 0.0, 0.0];
        let seg_ph_cnt = [10u32, 10, 10, 10, 10];
        let window = polygon_window(&square(), &ref_lat, &ref_lon, &seg_ph_cnt);
        assert_eq!(window.first_segment, 1);
        assert!(window.truncated_multi_cross);
    }

    #[test]
    fn raster_window_retains_a_bitmask_for_excluded_interior_segments() {
        let registry = RasterRegistry::new();
        registry.register("land", |lon: f64, _lat: f64| lon > 0.0);
        let ref_lat = [0.0, 0.0, 0.0, 0.0];
        let ref_lon = [-1.0, 1.0, -1.0, 1.0];
        let seg_ph_cnt = [5u32, 5, 5, 5];
        let filter = RegionFilter::Raster("land".to_string());
        let window = resolve_window(Some(&filter), &registry, &ref_lat, &ref_lon, &seg_ph_cnt).unwrap();
        assert_eq!(window.first_segment, 1);
        assert_eq!(window.num_segments, 3);
        assert_eq!(window.segment_included, Some(vec![true, false, true]));
    }

    #[test]
    fn unregistered_raster_name_resolves_to_none() {
        let registry = RasterRegistry::new();
        let filter = RegionFilter::Raster("missing".to_string());
        let window = resolve_window(Some(&filter), &registry, &[0.0], &[0.0], &[1]);
        assert!(window.is_none());
    }
}
