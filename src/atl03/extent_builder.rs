//! Photon-to-extent stream builder (§4.1 "Extent windowing").
//!
//! Consumes one beam's already region-filtered, already ATL08/YAPC-joined
//! photon and segment columns and slices them into the fixed-length (or
//! fixed-segment-count) extents the ATL06 dispatcher fits one at a time.
//! Extents come out in along-track order with a strictly increasing
//! per-beam counter (§5 "Ordering guarantees"), matching how
//! `Atl03Reader::generateExtentRecord` walks forward through a beam in the
//! reference implementation.

use crate::atl06::dispatcher::{ExtentForFit, FitPhoton, ATL03_SEGMENT_LENGTH_M};
use crate::config::Atl08Class;
use crate::records::{AncField, ExtentId, ExtentRecord, PFlags, PhotonRecord, RecordKind};

/// One beam's photon-level columns for a region-filtered window. `along_track`
/// is already the absolute along-track distance (`segment_dist_x +
/// dist_ph_along`, §9 "Absolute along-track distance"), and `segment` is the
/// 0-based index of the owning entry in the paired [`SegmentArrays`] — both
/// joins happen in `worker.rs` before this module ever sees the data, so
/// everything here is a plain parallel-array slice operation.
#[derive(Debug, Clone)]
pub struct PhotonArrays {
    pub along_track: Vec<f64>,
    pub across_track: Vec<f64>,
    pub height: Vec<f64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub delta_time: Vec<f64>,
    pub atl03_cnf: Vec<i8>,
    pub quality_ph: Vec<i8>,
    pub atl08_class: Vec<Atl08Class>,
    pub yapc_score: Vec<u8>,
    pub segment: Vec<usize>,
}

impl PhotonArrays {
    pub fn len(&self) -> usize {
        self.along_track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One beam's segment-level columns for the same window.
#[derive(Debug, Clone)]
pub struct SegmentArrays {
    pub segment_id: Vec<u32>,
    pub segment_dist_x: Vec<f64>,
    pub delta_time: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl SegmentArrays {
    pub fn len(&self) -> usize {
        self.segment_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-segment `bckgrd_rate` onto the segment's own `delta_time`, by linear
/// interpolation over the `bckgrd_atlas` time series (§4.1 "Background rate
/// interpolation"). Both the series and every query time are non-decreasing,
/// matching on-disk order, so the cursor only ever walks forward.
pub struct BackgroundCursor<'a> {
    times: &'a [f64],
    rates: &'a [f64],
    cursor: usize,
}

impl<'a> BackgroundCursor<'a> {
    pub fn new(times: &'a [f64], rates: &'a [f64]) -> Self {
        BackgroundCursor { times, rates, cursor: 0 }
    }

    /// Interpolate (or flat-extrapolate past either end) the rate at `t`.
    /// `t` must be non-decreasing across calls.
    pub fn rate_at(&mut self, t: f64) -> f64 {
        if self.times.is_empty() {
            return 0.0;
        }
        while self.cursor + 1 < self.times.len() && self.times[self.cursor + 1] <= t {
            self.cursor += 1;
        }
        if self.cursor + 1 >= self.times.len() || t <= self.times[self.cursor] {
            return self.rates[self.cursor];
        }
        let (t0, t1) = (self.times[self.cursor], self.times[self.cursor + 1]);
        let (r0, r1) = (self.rates[self.cursor], self.rates[self.cursor + 1]);
        let frac = (t - t0) / (t1 - t0);
        r0 + frac * (r1 - r0)
    }
}

/// Per-beam inputs the builder needs that don't live on a lazy column,
/// derived once from [`crate::config::RequestParams`] plus the beam's orbit
/// identity (§4.1, §4.2 "Per-extent setup").
#[derive(Debug, Clone)]
pub struct ExtentBuilderConfig {
    pub extent_length: f64,
    pub extent_step: f64,
    pub dist_in_seg: bool,
    pub min_photon_count: u32,
    pub min_along_track_spread: f64,
    pub pass_invalid: bool,
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub track: u8,
    pub pair: u8,
    pub gt: u8,
    pub spot: u8,
    pub sc_orient: u8,
}

/// One built extent: the record to publish, the dispatcher's fit input, and
/// whatever per-segment ancillary fields were resolved for it (§4.1
/// "Ancillary joining" — per-segment fields are a direct lookup, not
/// LSF-interpolated, unlike per-photon ancillary fields which ride along in
/// [`ExtentForFit::anc_photon_values`] and are interpolated by the fit).
#[derive(Debug, Clone)]
pub struct BuiltExtent {
    pub record: ExtentRecord,
    pub fit_input: ExtentForFit,
    pub anc_segment_fields: Vec<AncField>,
}

/// Boundaries of one candidate extent, expressed as a `[start, end)` photon
/// index range plus the segment range it spans.
struct ExtentBounds {
    first_photon: usize,
    last_photon: usize,
    first_segment: usize,
    last_segment: usize,
    start_seg_portion: f64,
}

/// Segment index owning each photon, precomputed from `photons.segment`
/// (monotonic non-decreasing, since photons are read in along-track order)
/// into a `[first_photon_of_segment; n_segments + 1]` offset table, the same
/// shape `region::photon_offsets` produces from `segment_ph_cnt`.
fn segment_offsets(photon_segment: &[usize], n_segments: usize) -> Vec<usize> {
    let mut offsets = vec![photon_segment.len(); n_segments + 1];
    for seg in 0..n_segments {
        offsets[seg] = photon_segment.partition_point(|&s| s < seg);
    }
    offsets[n_segments] = photon_segment.len();
    offsets
}

fn lower_bound(values: &[f64], target: f64) -> usize {
    values.partition_point(|&v| v < target)
}

/// Generate meters-mode window boundaries: a `extent_length`-meter span
/// every `extent_step` meters of along-track distance, starting at the
/// first photon's position (§4.1 "Extent windowing, meters mode").
fn meters_mode_windows(
    along_track: &[f64],
    seg_offsets: &[usize],
    extent_length: f64,
    extent_step: f64,
) -> Vec<ExtentBounds> {
    let mut windows = Vec::new();
    if along_track.is_empty() {
        return windows;
    }

    let base = along_track[0];
    let max = *along_track.last().unwrap();
    let mut start = base;

    while start <= max {
        let end = start + extent_length;
        let first_photon = lower_bound(along_track, start);
        let last_photon = lower_bound(along_track, end);
        if first_photon < last_photon {
            let first_segment = seg_offsets.partition_point(|&o| o <= first_photon).saturating_sub(1);
            let last_segment = seg_offsets.partition_point(|&o| o <= last_photon - 1).saturating_sub(1);
            let seg_start_distance = if first_segment + 1 < seg_offsets.len() {
                along_track[seg_offsets[first_segment]]
            } else {
                start
            };
            let start_seg_portion = (start - seg_start_distance) / ATL03_SEGMENT_LENGTH_M;
            windows.push(ExtentBounds {
                first_photon,
                last_photon,
                first_segment,
                last_segment,
                start_seg_portion: start_seg_portion.max(0.0),
            });
        }
        start += extent_step;
    }

    windows
}

/// Generate segment-mode window boundaries: a fixed segment-count span,
/// stepped by a fixed segment count (§4.1 "Extent windowing, segment mode").
fn segment_mode_windows(
    seg_offsets: &[usize],
    n_segments: usize,
    extent_length_segments: usize,
    extent_step_segments: usize,
) -> Vec<ExtentBounds> {
    let mut windows = Vec::new();
    if n_segments == 0 || extent_length_segments == 0 || extent_step_segments == 0 {
        return windows;
    }

    let mut first_segment = 0usize;
    while first_segment < n_segments {
        let last_segment = (first_segment + extent_length_segments - 1).min(n_segments - 1);
        let first_photon = seg_offsets[first_segment];
        let last_photon = seg_offsets[last_segment + 1];
        if first_photon < last_photon {
            windows.push(ExtentBounds {
                first_photon,
                last_photon,
                first_segment,
                last_segment,
                start_seg_portion: 0.0,
            });
        }
        if first_segment + extent_length_segments >= n_segments {
            break;
        }
        first_segment += extent_step_segments;
    }

    windows
}

/// Slice one candidate window into a [`BuiltExtent`], applying the §4.1
/// per-extent validity check (`min_photon_count`, `min_along_track_spread`):
/// an extent that fails it is either dropped entirely or forwarded with
/// [`PFlags::INVALID_EXTENT`] set, depending on `pass_invalid`.
#[allow(clippy::too_many_arguments)]
fn build_one_extent(
    bounds: &ExtentBounds,
    segments: &SegmentArrays,
    photons: &PhotonArrays,
    anc_segment_values: &[(u8, Vec<f64>)],
    anc_photon_values: &[(u8, Vec<f64>)],
    background: &mut BackgroundCursor,
    config: &ExtentBuilderConfig,
    counter: &mut u32,
) -> Option<BuiltExtent> {
    let range = bounds.first_photon..bounds.last_photon;
    let photon_count = range.len();

    let x_min = photons.along_track[range.start];
    let x_max = photons.along_track[range.end - 1];
    let spread = x_max - x_min;

    let mut pflags = PFlags::empty();
    let invalid = photon_count < config.min_photon_count as usize || spread < config.min_along_track_spread;
    if invalid {
        if !config.pass_invalid {
            return None;
        }
        pflags.insert(PFlags::INVALID_EXTENT);
    }

    let extent_id = ExtentId::new(
        config.rgt,
        config.cycle,
        config.region,
        config.track,
        config.pair,
        *counter,
        RecordKind::Photons,
    );
    *counter += 1;

    let velocity: f64 = {
        let seg_range = &segments.velocity[bounds.first_segment..=bounds.last_segment];
        seg_range.iter().sum::<f64>() / seg_range.len() as f64
    };

    let mid_time = photons.delta_time[range.start + photon_count / 2];
    let background_rate = background.rate_at(mid_time);

    let extent_length_meters = if config.dist_in_seg {
        config.extent_length * ATL03_SEGMENT_LENGTH_M
    } else {
        config.extent_length
    };

    let photon_records: Vec<PhotonRecord> = range
        .clone()
        .map(|i| PhotonRecord {
            delta_time: photons.delta_time[i],
            latitude: photons.latitude[i],
            longitude: photons.longitude[i],
            x_atc: photons.along_track[i],
            y_atc: photons.across_track[i],
            height: photons.height[i],
            atl08_class: atl08_class_code(photons.atl08_class[i]),
            atl03_cnf: photons.atl03_cnf[i],
            quality_ph: photons.quality_ph[i],
            yapc_score: photons.yapc_score[i],
        })
        .collect();

    let fit_photons: Vec<FitPhoton> = range
        .clone()
        .map(|i| FitPhoton {
            x_atc: photons.along_track[i],
            height: photons.height[i],
            latitude: photons.latitude[i],
            longitude: photons.longitude[i],
            time_ns: photons.delta_time[i],
            y_atc: photons.across_track[i],
        })
        .collect();

    let fit_anc_photon_values: Vec<(u8, Vec<f64>)> = anc_photon_values
        .iter()
        .map(|(idx, values)| (*idx, values[range.clone()].to_vec()))
        .collect();

    let anc_segment_fields: Vec<AncField> = anc_segment_values
        .iter()
        .map(|(idx, values)| AncField {
            anc_type: 1,
            field_index: *idx,
            data_type: 9,
            value: values[bounds.first_segment],
        })
        .collect();

    let record = ExtentRecord {
        extent_id,
        track: config.track,
        pair: config.pair,
        sc_orient: config.sc_orient,
        rgt: config.rgt,
        cycle: config.cycle,
        region: config.region,
        segment_id: segments.segment_id[bounds.first_segment],
        segment_distance: segments.segment_dist_x[bounds.first_segment],
        extent_length: extent_length_meters,
        spacecraft_velocity: velocity as f32,
        background_rate,
        photon_count: photon_count as u32,
        pflags,
        photons: photon_records,
    };

    let fit_input = ExtentForFit {
        extent_id,
        rgt: config.rgt,
        cycle: config.cycle,
        region: config.region,
        spot: config.spot,
        gt: config.gt,
        first_extent_segment_id: segments.segment_id[bounds.first_segment],
        start_seg_portion: bounds.start_seg_portion,
        extent_length: extent_length_meters,
        extent_length_segments: config.extent_length,
        spacecraft_velocity: velocity,
        background_rate,
        dist_in_seg: config.dist_in_seg,
        photons: fit_photons,
        anc_photon_values: fit_anc_photon_values,
    };

    Some(BuiltExtent { record, fit_input, anc_segment_fields })
}

fn atl08_class_code(class: Atl08Class) -> u8 {
    match class {
        Atl08Class::Noise => 0,
        Atl08Class::Ground => 1,
        Atl08Class::Canopy => 2,
        Atl08Class::TopOfCanopy => 4,
        Atl08Class::Unclassified => 0,
    }
}

/// Build every extent for one beam's window, in along-track order
/// (§4.1 "Extent windowing", §5 "Ordering guarantees").
#[allow(clippy::too_many_arguments)]
pub fn build_extents(
    segments: &SegmentArrays,
    photons: &PhotonArrays,
    anc_segment_values: &[(u8, Vec<f64>)],
    anc_photon_values: &[(u8, Vec<f64>)],
    background: &mut BackgroundCursor,
    config: &ExtentBuilderConfig,
    counter: &mut u32,
) -> Vec<BuiltExtent> {
    if photons.is_empty() || segments.is_empty() {
        return Vec::new();
    }

    let offsets = segment_offsets(&photons.segment, segments.len());

    let windows = if config.dist_in_seg {
        segment_mode_windows(
            &offsets,
            segments.len(),
            config.extent_length.round() as usize,
            config.extent_step.round().max(1.0) as usize,
        )
    } else {
        meters_mode_windows(&photons.along_track, &offsets, config.extent_length, config.extent_step)
    };

    windows
        .iter()
        .filter_map(|w| {
            build_one_extent(w, segments, photons, anc_segment_values, anc_photon_values, background, config, counter)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_config(extent_length: f64, extent_step: f64, dist_in_seg: bool) -> ExtentBuilderConfig {
        ExtentBuilderConfig {
            extent_length,
            extent_step,
            dist_in_seg,
            min_photon_count: 2,
            min_along_track_spread: 1.0,
            pass_invalid: false,
            rgt: 1,
            cycle: 1,
            region: 1,
            track: 1,
            pair: 0,
            gt: 1,
            spot: 1,
            sc_orient: 0,
        }
    }

    fn flat_photons(n: usize, spacing: f64) -> PhotonArrays {
        PhotonArrays {
            along_track: (0..n).map(|i| i as f64 * spacing).collect(),
            across_track: vec![0.0; n],
            height: vec![5.0; n],
            latitude: (0..n).map(|i| 10.0 + i as f64 * 0.0001).collect(),
            longitude: vec![20.0; n],
            delta_time: (0..n).map(|i| i as f64).collect(),
            atl03_cnf: vec![4; n],
            quality_ph: vec![0; n],
            atl08_class: vec![Atl08Class::Ground; n],
            yapc_score: vec![200; n],
            segment: (0..n).map(|i| i / 10).collect(),
        }
    }

    fn flat_segments(n_segments: usize) -> SegmentArrays {
        SegmentArrays {
            segment_id: (0..n_segments).map(|i| 100 + i as u32).collect(),
            segment_dist_x: (0..n_segments).map(|i| i as f64 * 20.0).collect(),
            delta_time: (0..n_segments).map(|i| i as f64 * 10.0).collect(),
            velocity: vec![6900.0; n_segments],
        }
    }

    #[test]
    fn meters_mode_produces_overlapping_sliding_windows() {
        let photons = flat_photons(100, 1.0);
        let segments = flat_segments(10);
        let times = [0.0, 1000.0];
        let rates = [2.0, 2.0];
        let mut cursor = BackgroundCursor::new(&times, &rates);
        let mut counter = 0u32;
        let config = flat_config(40.0, 20.0, false);

        let extents = build_extents(&segments, &photons, &[], &[], &mut cursor, &config, &mut counter);
        assert!(!extents.is_empty());
        for pair in extents.windows(2) {
            assert!(pair[1].fit_input.extent_id.counter() > pair[0].fit_input.extent_id.counter());
        }
        for e in &extents {
            assert!((e.record.extent_length - 40.0).abs() < 1e-9);
            assert!(e.record.photon_count > 0);
        }
    }

    #[test]
    fn segment_mode_spans_a_fixed_segment_count() {
        let photons = flat_photons(100, 1.0);
        let segments = flat_segments(10);
        let times = [0.0, 1000.0];
        let rates = [1.0, 1.0];
        let mut cursor = BackgroundCursor::new(&times, &rates);
        let mut counter = 0u32;
        let config = flat_config(2.0, 1.0, true);

        let extents = build_extents(&segments, &photons, &[], &[], &mut cursor, &config, &mut counter);
        assert!(!extents.is_empty());
        assert!(extents[0].fit_input.dist_in_seg);
        assert_eq!(extents[0].record.segment_id, 100);
    }

    #[test]
    fn extents_failing_validity_are_dropped_unless_pass_invalid() {
        let photons = flat_photons(3, 1.0);
        let segments = flat_segments(1);
        let times = [0.0];
        let rates = [0.0];
        let mut cursor = BackgroundCursor::new(&times, &rates);
        let mut counter = 0u32;
        let mut config = flat_config(40.0, 20.0, false);
        config.min_photon_count = 100;
        config.pass_invalid = false;

        let extents = build_extents(&segments, &photons, &[], &[], &mut cursor, &config, &mut counter);
        assert!(extents.is_empty());

        config.pass_invalid = true;
        let mut counter2 = 0u32;
        let extents = build_extents(&segments, &photons, &[], &[], &mut cursor, &config, &mut counter2);
        assert!(!extents.is_empty());
        assert!(extents[0].record.pflags.contains(PFlags::INVALID_EXTENT));
    }

    #[test]
    fn background_cursor_interpolates_linearly_between_samples() {
        let times = [0.0, 10.0, 20.0];
        let rates = [0.0, 10.0, 10.0];
        let mut cursor = BackgroundCursor::new(&times, &rates);
        assert_eq!(cursor.rate_at(0.0), 0.0);
        assert!((cursor.rate_at(5.0) - 5.0).abs() < 1e-9);
        assert_eq!(cursor.rate_at(15.0), 10.0);
        assert_eq!(cursor.rate_at(100.0), 10.0);
    }
}
