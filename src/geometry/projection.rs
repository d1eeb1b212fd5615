//! Projection selection for the region pre-filter (§4.4).
//!
//! Plate-carrée is used near the equator; above/below ±70° latitude the
//! subsetter switches to a polar stereographic projection so that
//! near-pole polygons don't suffer plate-carrée's longitude-convergence
//! distortion. The projection is chosen once per beam from the first
//! reference point and held fixed for the rest of the beam (§4.4).

const POLAR_LATITUDE_THRESHOLD: f64 = 70.0;
const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    PlateCarree,
    PolarStereoNorth,
    PolarStereoSouth,
}

impl Projection {
    /// Pick a projection from a single reference latitude, per §4.4.
    pub fn for_latitude(lat: f64) -> Self {
        if lat > POLAR_LATITUDE_THRESHOLD {
            Projection::PolarStereoNorth
        } else if lat < -POLAR_LATITUDE_THRESHOLD {
            Projection::PolarStereoSouth
        } else {
            Projection::PlateCarree
        }
    }

    /// Project (lat, lon) in degrees to a planar (x, y) the ray-casting
    /// `inpoly` test can work in directly.
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        match self {
            Projection::PlateCarree => (lon, lat),
            Projection::PolarStereoNorth => polar_stereo(lat, lon, true),
            Projection::PolarStereoSouth => polar_stereo(lat, lon, false),
        }
    }
}

/// Standard polar stereographic projection (spherical approximation),
/// tangent at the pole, used only for point-in-polygon testing so the
/// spherical simplification is acceptable.
fn polar_stereo(lat: f64, lon: f64, north: bool) -> (f64, f64) {
    let lat = if north { lat } else { -lat };
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    let r = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 - lat_rad / 2.0).tan();
    let x = r * lon_rad.sin();
    let y = if north { -r * lon_rad.cos() } else { r * lon_rad.cos() };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_latitudes_use_plate_carree() {
        assert_eq!(Projection::for_latitude(0.0), Projection::PlateCarree);
        assert_eq!(Projection::for_latitude(69.9), Projection::PlateCarree);
        assert_eq!(Projection::for_latitude(-69.9), Projection::PlateCarree);
    }

    #[test]
    fn high_latitudes_use_polar_stereo() {
        assert_eq!(Projection::for_latitude(80.0), Projection::PolarStereoNorth);
        assert_eq!(Projection::for_latitude(-80.0), Projection::PolarStereoSouth);
    }

    #[test]
    fn plate_carree_is_identity_swap() {
        let (x, y) = Projection::PlateCarree.project(12.0, 34.0);
        assert_eq!((x, y), (34.0, 12.0));
    }

    #[test]
    fn polar_stereo_north_pole_projects_near_origin() {
        let (x, y) = Projection::PolarStereoNorth.project(89.999, 45.0);
        assert!(x.abs() < 50.0 && y.abs() < 50.0);
    }
}
