//! Closed-form 2×2 least-squares line fit used by both the height-fit and
//! geolocation passes of the dispatcher (§4.2 "Least-squares fit",
//! "Geolocation pass"). Grounded on `Atl06Dispatch::lsf` in
//! `Atl06Dispatch.cpp`: the generalized-inverse of the `[1, xᵢ]` design
//! matrix is computed once per call and reused as a per-photon weight.

/// `(G^T G)^-1` for the design matrix `[1, xᵢ]` over a photon set.
struct NormalEquations {
    igtg_11: f64,
    igtg_12_21: f64,
    igtg_22: f64,
}

impl NormalEquations {
    fn solve(x: &[f64]) -> Self {
        let n = x.len() as f64;
        let mut gtg_12_21 = 0.0;
        let mut gtg_22 = 0.0;
        for &xi in x {
            gtg_12_21 += xi;
            gtg_22 += xi * xi;
        }
        let det = 1.0 / ((n * gtg_22) - (gtg_12_21 * gtg_12_21));
        NormalEquations {
            igtg_11: gtg_22 * det,
            igtg_12_21: -gtg_12_21 * det,
            igtg_22: n * det,
        }
    }

    /// Row-1 (constant-term) generalized-inverse coefficient for photon `x`.
    fn gig1(&self, x: f64) -> f64 {
        self.igtg_11 + self.igtg_12_21 * x
    }

    /// Row-2 (slope-term) generalized-inverse coefficient for photon `x`.
    fn gig2(&self, x: f64) -> f64 {
        self.igtg_12_21 + self.igtg_22 * x
    }
}

/// Result of the height/slope fit (§4.2 step 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightFit {
    pub h_mean: f64,
    pub dh_fit_dx: f64,
    /// `sqrt(Σ gig1²)`: standard error of the mean-height estimate, scaled
    /// by `rms_misfit` by the caller once the iteration loop converges.
    pub y_sigma: f64,
}

/// Fit `height ~ h_mean + dh_fit_dx * x_atc` over the currently retained
/// photons, along with the fit's standard error (§4.2 step 1).
pub fn fit_height(x: &[f64], height: &[f64]) -> HeightFit {
    debug_assert_eq!(x.len(), height.len());
    let eq = NormalEquations::solve(x);

    let mut h_mean = 0.0;
    let mut dh_fit_dx = 0.0;
    let mut y_sigma_sq = 0.0;
    for (&xi, &yi) in x.iter().zip(height) {
        let gig_1 = eq.gig1(xi);
        let gig_2 = eq.gig2(xi);
        h_mean += gig_1 * yi;
        dh_fit_dx += gig_2 * yi;
        y_sigma_sq += gig_1 * gig_1;
    }

    HeightFit { h_mean, dh_fit_dx, y_sigma: y_sigma_sq.sqrt() }
}

/// Result of the geolocation fit (§4.2 "Geolocation pass").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    pub time_ns: i64,
    pub y_atc: f32,
}

/// Fit `(latitude, longitude, time_ns, y_atc)` against the same design
/// matrix, reusing only the row-1 (`gig1`) coefficient.
///
/// Longitude handling preserves the original's verbatim heuristic: if the
/// *first* retained photon's raw longitude has magnitude > 150°, every
/// photon's longitude is folded into `[0, 360)` before being weighted, and
/// the final weighted sum is folded back into `[-180, 180)` (§4.2, §9).
/// This only produces a correct circular mean for extents spanning < 30°
/// of longitude — preserved as-is rather than generalized (§9 open
/// question, resolved).
pub fn geolocate(x: &[f64], lat: &[f64], lon: &[f64], time_ns: &[f64], y_atc: &[f64]) -> Geolocation {
    debug_assert!(!x.is_empty());
    debug_assert_eq!(x.len(), lat.len());
    debug_assert_eq!(x.len(), lon.len());
    debug_assert_eq!(x.len(), time_ns.len());
    debug_assert_eq!(x.len(), y_atc.len());

    let eq = NormalEquations::solve(x);

    let first_lon = lon[0];
    let shift_lon = first_lon < -150.0 || first_lon > 150.0;

    let mut latitude = 0.0;
    let mut longitude = 0.0;
    let mut time_ns_acc = 0.0;
    let mut y_atc_acc = 0.0;

    for i in 0..x.len() {
        let gig_1 = eq.gig1(x[i]);
        let ph_longitude = if shift_lon { (lon[i] + 360.0).rem_euclid(360.0) } else { lon[i] };

        latitude += gig_1 * lat[i];
        longitude += gig_1 * ph_longitude;
        time_ns_acc += gig_1 * time_ns[i];
        y_atc_acc += gig_1 * y_atc[i];
    }

    if shift_lon {
        longitude = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    }

    Geolocation { latitude, longitude, time_ns: time_ns_acc as i64, y_atc: y_atc_acc as f32 }
}

/// Interpolate a per-photon ancillary column with the same row-1
/// coefficients used for geolocation (§4.2 "Geolocation pass: Ancillary
/// per-photon arrays carried by the extent are interpolated with the same
/// row-1 coefficient").
pub fn geolocate_ancillary(x: &[f64], values: &[f64]) -> f64 {
    let eq = NormalEquations::solve(x);
    x.iter().zip(values).map(|(&xi, &vi)| eq.gig1(xi) * vi).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_height_recovers_an_exact_line() {
        let x = [0.0, 10.0, 20.0, 30.0];
        let y = [100.0, 101.0, 102.0, 103.0];
        let fit = fit_height(&x, &y);
        assert!((fit.h_mean - 100.0).abs() < 1e-9);
        assert!((fit.dh_fit_dx - 0.1).abs() < 1e-9);
        assert!(fit.y_sigma > 0.0);
    }

    #[test]
    fn fit_height_is_unaffected_by_a_shift_in_x_origin() {
        let x1 = [-15.0, -5.0, 5.0, 15.0];
        let x2 = [0.0, 10.0, 20.0, 30.0];
        let y = [100.0, 101.0, 102.0, 103.0];
        let fit1 = fit_height(&x1, &y);
        let fit2 = fit_height(&x2, &y);
        assert!((fit1.dh_fit_dx - fit2.dh_fit_dx).abs() < 1e-9);
    }

    #[test]
    fn geolocate_without_shift_averages_directly() {
        let x = [0.0, 10.0];
        let lat = [10.0, 10.0];
        let lon = [20.0, 20.0];
        let t = [1000.0, 1000.0];
        let y_atc = [0.0, 0.0];
        let g = geolocate(&x, &lat, &lon, &t, &y_atc);
        assert!((g.longitude - 20.0).abs() < 1e-9);
        assert!((g.latitude - 10.0).abs() < 1e-9);
    }

    #[test]
    fn lsf_longitude_quirk_matches_reference() {
        // First retained photon's longitude exceeds the 150 deg threshold,
        // so every longitude is folded into [0, 360) before weighting and
        // the weighted sum is folded back at the end.
        let x = [0.0, 10.0];
        let lat = [0.0, 0.0];
        let lon = [179.0, -179.0];
        let t = [0.0, 0.0];
        let y_atc = [0.0, 0.0];

        let eq = NormalEquations::solve(&x);
        let gig1_0 = eq.gig1(x[0]);
        let gig1_1 = eq.gig1(x[1]);
        let folded0 = (lon[0] + 360.0).rem_euclid(360.0);
        let folded1 = (lon[1] + 360.0).rem_euclid(360.0);
        let expected_sum = gig1_0 * folded0 + gig1_1 * folded1;
        let expected_longitude = (expected_sum + 180.0).rem_euclid(360.0) - 180.0;

        let g = geolocate(&x, &lat, &lon, &t, &y_atc);
        assert!((g.longitude - expected_longitude).abs() < 1e-9);
        // The antimeridian-crossing pair averages to ~180, not ~0.
        assert!(g.longitude.abs() > 170.0);
    }

    #[test]
    fn geolocate_ancillary_uses_row_one_coefficients_only() {
        let x = [0.0, 10.0, 20.0];
        let values = [1.0, 2.0, 3.0];
        let eq = NormalEquations::solve(&x);
        let expected: f64 = x.iter().zip(&values).map(|(&xi, &vi)| eq.gig1(xi) * vi).sum();
        assert!((geolocate_ancillary(&x, &values) - expected).abs() < 1e-12);
    }
}
