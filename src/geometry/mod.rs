pub mod polygon;
pub mod projection;

pub use polygon::LatLon;
pub use projection::Projection;

use serde::{Deserialize, Serialize};

/// Spatial pre-filter selection (§6 `polygon` / `raster`, §4.4).
///
/// `Raster` carries a name rather than the predicate itself: the
/// predicate is an external collaborator (§1, §6 "Raster predicate")
/// resolved at dispatch time through a small in-process registry
/// (see [`crate::region::RasterRegistry`]) so `RequestParams` stays
/// plain-data and serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegionFilter {
    Polygon(Vec<LatLon>),
    Raster(String),
}

/// An external raster inclusion predicate (§6 "Raster predicate").
pub trait RasterPredicate: Send + Sync {
    fn includes(&self, lon: f64, lat: f64) -> bool;
}

impl<F> RasterPredicate for F
where
    F: Fn(f64, f64) -> bool + Send + Sync,
{
    fn includes(&self, lon: f64, lat: f64) -> bool {
        self(lon, lat)
    }
}
