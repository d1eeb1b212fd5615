//! Iterative robust least-squares surface-fit dispatcher (§4.2).
//!
//! Grounded on `Atl06Dispatch::iterativeFitStage`/`postResult` in
//! `Atl06Dispatch.cpp`: per-extent iteration to a converged window, then a
//! second geolocation pass, batched into fixed-size output records.

use bytes::Bytes;
use std::time::Duration;

use crate::atl06::lsf::{fit_height, geolocate, geolocate_ancillary};
use crate::config::RequestParams;
use crate::queue::PublishQueue;
use crate::records::{AncField, AncRecord, ElevationBatch, ElevationRecord, ExtentId, PFlags};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
pub const PULSE_REPETITION_FREQUENCY: f64 = 10_000.0;
pub const RDE_SCALE_FACTOR: f64 = 1.3490;
pub const SIGMA_BEAM: f64 = 4.25;
pub const SIGMA_XMIT: f64 = 0.00000000068;
pub const ATL03_SEGMENT_LENGTH_M: f64 = 20.0;

/// Fixed-size output batch capacity (§4.2 "Batching & output"). Not
/// present in the retrieved reference sources; chosen as a reasonable
/// constant for this implementation (see DESIGN.md).
pub const BATCH_SIZE: usize = 256;

/// One photon's inputs to the surface fit, already filtered and windowed
/// by the photon-to-extent stream builder (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPhoton {
    pub x_atc: f64,
    pub height: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub time_ns: f64,
    pub y_atc: f64,
}

/// One extent's worth of inputs to the dispatcher: the photon set plus
/// the geometric/telemetry context the fit needs but doesn't itself
/// compute (§4.2 "Per-extent setup", "Segment-ID rounding").
#[derive(Debug, Clone)]
pub struct ExtentForFit {
    pub extent_id: ExtentId,
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub spot: u8,
    pub gt: u8,
    pub first_extent_segment_id: u32,
    pub start_seg_portion: f64,
    /// Physical extent length in meters. Always meters regardless of
    /// `dist_in_seg` — the §4.2 "Per-extent setup" formula
    /// (`pulses_in_extent = extent_length * PRF / velocity`) is only
    /// dimensionally correct in meters, so segment-mode callers convert
    /// their segment-count `L` to meters (`L * 20`) before populating
    /// this field (see [`Self::extent_length_segments`] for the
    /// segment-mode rounding input).
    pub extent_length: f64,
    /// `L` in integer segment-count units, used only by the §4.2
    /// "Segment-ID rounding" formula when `dist_in_seg` is set. Ignored
    /// in meters mode.
    pub extent_length_segments: f64,
    pub spacecraft_velocity: f64,
    pub background_rate: f64,
    pub dist_in_seg: bool,
    pub photons: Vec<FitPhoton>,
    /// Per-photon ancillary columns carried by the extent, keyed by field
    /// index; each value vector is parallel to `photons` (§4.1 "Ancillary
    /// joining").
    pub anc_photon_values: Vec<(u8, Vec<f64>)>,
}

fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// `round(first_extent_segment_id + start_seg_portion + (L/20m)/2)` in
/// meters mode, `first_extent_segment_id + L/2` in segment mode (§4.2
/// "Segment-ID rounding").
fn round_segment_id(extent: &ExtentForFit) -> u32 {
    if extent.dist_in_seg {
        extent.first_extent_segment_id + (extent.extent_length_segments / 2.0) as u32
    } else {
        let value = extent.first_extent_segment_id as f64
            + extent.start_seg_portion
            + (extent.extent_length / ATL03_SEGMENT_LENGTH_M) / 2.0;
        round_half_up(value) as u32
    }
}

struct IterativeFit {
    h_mean: f64,
    dh_fit_dx: f64,
    h_sigma: f64,
    rms_misfit: f64,
    window_height: f64,
    /// The photon set used by the iteration that terminated the loop
    /// (residual-sorted). This is what the original reports and
    /// geolocates with, *not* the narrower set the stop condition just
    /// computed — that narrower set only ever feeds a next iteration
    /// that, by construction, didn't happen.
    final_indices: Vec<usize>,
    pflags: PFlags,
    invalid: bool,
    iterations: u16,
}

/// The height/slope/window iteration loop (§4.2 steps 1-9, "Final
/// statistics").
fn iterative_fit(photons: &[FitPhoton], params: &RequestParams, extent_length: f64, spacecraft_velocity: f64, background_rate: f64) -> IterativeFit {
    let pulses_in_extent = extent_length * PULSE_REPETITION_FREQUENCY / spacecraft_velocity;
    let background_density = pulses_in_extent * background_rate / (SPEED_OF_LIGHT / 2.0);

    let mut current: Vec<usize> = (0..photons.len()).collect();
    let mut pflags = PFlags::empty();
    let mut invalid = false;
    let mut iteration: u16 = 0;
    let mut window_height = 0.0_f64;
    let mut h_mean = 0.0;
    let mut dh_fit_dx = 0.0;
    let mut h_sigma = 0.0;
    let mut final_indices: Vec<usize> = Vec::new();
    let mut final_residuals: Vec<f64> = Vec::new();

    loop {
        let num_photons = current.len();
        let x: Vec<f64> = current.iter().map(|&i| photons[i].x_atc).collect();
        let y: Vec<f64> = current.iter().map(|&i| photons[i].height).collect();
        let fit = fit_height(&x, &y);
        h_mean = fit.h_mean;
        dh_fit_dx = fit.dh_fit_dx;
        h_sigma = fit.y_sigma;

        let residuals: Vec<f64> = current
            .iter()
            .map(|&i| photons[i].height - (h_mean + photons[i].x_atc * dh_fit_dx))
            .collect();

        let mut order: Vec<usize> = (0..num_photons).collect();
        order.sort_by(|&a, &b| residuals[a].partial_cmp(&residuals[b]).unwrap());
        let sorted_residuals: Vec<f64> = order.iter().map(|&i| residuals[i]).collect();
        let sorted_original: Vec<usize> = order.iter().map(|&i| current[i]).collect();

        // The original only rewrites its photon array when continuing to
        // another iteration; every stopping branch below reports and
        // geolocates using this iteration's full (sorted) set.
        final_indices = sorted_original.clone();
        final_residuals = sorted_residuals.clone();

        let (window_lower_bound, window_upper_bound, background_count) = if iteration == 0 {
            let lo = sorted_residuals[0];
            let hi = sorted_residuals[num_photons - 1];
            (lo, hi, background_density * (hi - lo))
        } else {
            (-(window_height / 2.0), window_height / 2.0, background_density * window_height)
        };

        let bg_rate = background_count / (window_upper_bound - window_lower_bound);
        let signal_count = num_photons as f64 - background_count;

        let mut sigma_r;
        if signal_count <= 1.0 {
            sigma_r = (window_upper_bound - window_lower_bound) / num_photons as f64;
        } else {
            let n = num_photons as i64;
            let mut i0 = 0i64;
            while i0 < n {
                let spp = 0.25 * signal_count + (sorted_residuals[i0 as usize] - window_lower_bound) * bg_rate;
                if (i0 as f64) + 1.0 - 0.5 + 1.0 < spp {
                    i0 += 1;
                } else {
                    break;
                }
            }
            let mut i1 = n - 1;
            while i1 >= 0 {
                let spp = 0.75 * signal_count + (sorted_residuals[i1 as usize] - window_lower_bound) * bg_rate;
                if (i1 as f64) + 1.0 - 0.5 - 1.0 > spp {
                    i1 -= 1;
                } else {
                    break;
                }
            }

            if i1 < i0 {
                let spp0 = (n as f64 / 2.0) - (signal_count / 4.0);
                i0 = round_half_up(spp0) - 1;
                let spp1 = (n as f64 / 2.0) + (signal_count / 4.0);
                i1 = round_half_up(spp1);
            }

            if i0 >= 0 && i1 < n {
                sigma_r = (sorted_residuals[i1 as usize] - sorted_residuals[i0 as usize]) / RDE_SCALE_FACTOR;
            } else {
                pflags.insert(PFlags::OUT_OF_BOUNDS);
                invalid = true;
                sigma_r = 0.0;
            }
        }

        let se1 = (SPEED_OF_LIGHT / 2.0 * SIGMA_XMIT).powi(2);
        let se2 = SIGMA_BEAM.powi(2) * dh_fit_dx.powi(2);
        let sigma_expected = (se1 + se2).sqrt();

        if sigma_r > params.max_robust_dispersion {
            sigma_r = params.max_robust_dispersion;
        }
        let new_window_height = params.min_window.max(6.0 * sigma_expected).max(6.0 * sigma_r);
        window_height = new_window_height.max(0.75 * window_height);
        let window_spread = window_height / 2.0;

        let mut next_indices = Vec::with_capacity(num_photons);
        let mut x_min = f64::MAX;
        let mut x_max = f64::MIN;
        for (rank, &orig) in sorted_original.iter().enumerate() {
            if sorted_residuals[rank].abs() < window_spread {
                next_indices.push(orig);
                let x = photons[orig].x_atc;
                if x < x_min {
                    x_min = x;
                }
                if x > x_max {
                    x_max = x;
                }
            }
        }

        let next_count = next_indices.len();
        if next_count < params.min_photon_count as usize {
            pflags.insert(PFlags::TOO_FEW_PHOTONS);
            invalid = true;
            current = next_indices;
            break;
        } else if (x_max - x_min) < params.min_along_track_spread {
            pflags.insert(PFlags::SPREAD_TOO_SHORT);
            invalid = true;
            current = next_indices;
            break;
        } else if next_count == num_photons {
            current = next_indices;
            break;
        } else {
            iteration += 1;
            current = next_indices;
            if iteration as u32 >= params.max_iterations {
                pflags.insert(PFlags::MAX_ITERATIONS_REACHED);
                break;
            }
        }
    }

    let (rms_misfit, h_sigma_final) = if !invalid && !final_indices.is_empty() {
        let delta_sum: f64 = final_residuals.iter().map(|r| r * r).sum();
        let rms = (delta_sum / final_indices.len() as f64).sqrt();
        (rms, h_sigma * rms)
    } else {
        (0.0, 0.0)
    };

    IterativeFit {
        h_mean,
        dh_fit_dx,
        h_sigma: h_sigma_final,
        rms_misfit,
        window_height,
        final_indices,
        pflags,
        invalid,
        iterations: iteration,
    }
}

/// Run the full per-extent fit: iterate to convergence, then run the
/// geolocation pass over the final retained photon set (§4.2).
pub fn fit_extent(extent: &ExtentForFit, params: &RequestParams) -> (ElevationRecord, Vec<AncField>) {
    let fit = iterative_fit(&extent.photons, params, extent.extent_length, extent.spacecraft_velocity, extent.background_rate);

    let mut anc_fields = Vec::new();
    let (latitude, longitude, time_ns, y_atc, n_fit_photons) = if !fit.final_indices.is_empty() {
        let x: Vec<f64> = fit.final_indices.iter().map(|&i| extent.photons[i].x_atc).collect();
        let lat: Vec<f64> = fit.final_indices.iter().map(|&i| extent.photons[i].latitude).collect();
        let lon: Vec<f64> = fit.final_indices.iter().map(|&i| extent.photons[i].longitude).collect();
        let t: Vec<f64> = fit.final_indices.iter().map(|&i| extent.photons[i].time_ns).collect();
        let y: Vec<f64> = fit.final_indices.iter().map(|&i| extent.photons[i].y_atc).collect();
        let geo = geolocate(&x, &lat, &lon, &t, &y);

        for (field_index, values) in &extent.anc_photon_values {
            let retained_values: Vec<f64> = fit.final_indices.iter().map(|&i| values[i]).collect();
            let value = geolocate_ancillary(&x, &retained_values);
            anc_fields.push(AncField { anc_type: 0, field_index: *field_index, data_type: 9, value });
        }

        (geo.latitude, geo.longitude, geo.time_ns, geo.y_atc, fit.final_indices.len() as i32)
    } else {
        (0.0, 0.0, 0, 0.0, 0)
    };

    let record = ElevationRecord {
        extent_id: extent.extent_id.as_elevation(),
        segment_id: round_segment_id(extent),
        rgt: extent.rgt,
        cycle: extent.cycle,
        region: extent.region,
        spot: extent.spot,
        gt: extent.gt,
        time_ns,
        latitude,
        longitude,
        h_mean: fit.h_mean,
        dh_fit_dx: fit.dh_fit_dx as f32,
        h_sigma: fit.h_sigma,
        window_height: fit.window_height as f32,
        rms_misfit: fit.rms_misfit as f32,
        x_atc: extent.photons.first().map(|p| p.x_atc).unwrap_or(0.0),
        y_atc,
        n_fit_photons,
        pflags: fit.pflags,
        iterations: fit.iterations,
    };

    (record, anc_fields)
}

/// Accumulates fitted elevations into fixed-size batches and publishes
/// them, wrapping in an ancillary container when any ancillary fields were
/// produced for the batch (§4.2 "Batching & output").
pub struct BatchAccumulator {
    batch: ElevationBatch,
    anc_records: Vec<AncRecord>,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        BatchAccumulator { batch: ElevationBatch::default(), anc_records: Vec::new() }
    }
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fitted elevation; flushes to `queue` if the batch is now
    /// full. Returns `true` if a flush occurred.
    pub fn push(
        &mut self,
        record: ElevationRecord,
        anc_fields: Vec<AncField>,
        queue: &PublishQueue,
        post_timeout: Duration,
    ) -> bool {
        if !anc_fields.is_empty() {
            self.anc_records.push(AncRecord { extent_id: record.extent_id, fields: anc_fields });
        }
        self.batch.elevations.push(record);

        if self.batch.elevations.len() >= BATCH_SIZE {
            self.flush(queue, post_timeout);
            true
        } else {
            false
        }
    }

    /// Flush whatever is buffered, regardless of fill level (termination
    /// path, §4.2 "A batch is flushed when full, or on termination").
    pub fn flush(&mut self, queue: &PublishQueue, post_timeout: Duration) {
        if self.batch.elevations.is_empty() {
            return;
        }

        let mut payload = self.batch.to_bytes();
        if !self.anc_records.is_empty() {
            for anc in &self.anc_records {
                payload.extend_from_slice(&anc.to_bytes());
            }
        }

        let active = std::sync::atomic::AtomicBool::new(true);
        queue.post_until_delivered_or_cancelled(Bytes::from(payload), post_timeout, &active);

        self.batch.elevations.clear();
        self.anc_records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestParams;

    fn flat_extent(n: usize) -> ExtentForFit {
        let photons = (0..n)
            .map(|i| FitPhoton {
                x_atc: i as f64,
                height: 5.0,
                latitude: 10.0 + i as f64 * 0.0001,
                longitude: 20.0,
                time_ns: 1_000_000.0 + i as f64,
                y_atc: 0.0,
            })
            .collect();
        ExtentForFit {
            extent_id: ExtentId::new(1, 1, 1, 1, 0, 0, crate::records::RecordKind::Photons),
            rgt: 1,
            cycle: 1,
            region: 1,
            spot: 1,
            gt: 1,
            first_extent_segment_id: 100,
            start_seg_portion: 0.0,
            extent_length: 40.0,
            extent_length_segments: 2.0,
            spacecraft_velocity: 6900.0,
            background_rate: 1.0,
            dist_in_seg: false,
            photons,
            anc_photon_values: Vec::new(),
        }
    }

    #[test]
    fn a_flat_noiseless_extent_converges_valid() {
        let extent = flat_extent(20);
        let params = RequestParams::default();
        let (record, _anc) = fit_extent(&extent, &params);
        assert!((record.h_mean - 5.0).abs() < 1e-6);
        assert!(record.pflags.is_empty());
        assert!(record.n_fit_photons > 0);
    }

    #[test]
    fn segment_id_rounds_per_meters_mode_formula() {
        let extent = flat_extent(10);
        let id = round_segment_id(&extent);
        // 100 + 0.0 + (40/20)/2 = 101
        assert_eq!(id, 101);
    }

    #[test]
    fn segment_id_uses_segment_count_halving_in_segment_mode() {
        let mut extent = flat_extent(10);
        extent.dist_in_seg = true;
        extent.extent_length_segments = 4.0;
        assert_eq!(round_segment_id(&extent), 102);
    }

    #[test]
    fn batch_flushes_once_capacity_is_reached() {
        let (queue, rx) = PublishQueue::new("elevation", 8);
        let mut acc = BatchAccumulator::new();
        let extent = flat_extent(10);
        let params = RequestParams::default();

        for _ in 0..BATCH_SIZE {
            let (record, anc) = fit_extent(&extent, &params);
            acc.push(record, anc, &queue, Duration::from_millis(50));
        }

        let posted = rx.recv_timeout(Duration::from_millis(50));
        assert!(posted.is_ok());
    }
}
