//! Per-beam ATL03 worker (§4.1 "State machine (per beam)", §5).
//!
//! Runs one beam of one granule end to end: spatial pre-filter, windowed
//! photon/segment reads, ATL08 join, YAPC recompute, per-photon filtering,
//! and extent windowing — handing back the ordered extent stream the
//! caller publishes and forwards to the ATL06 dispatcher. A granule read
//! failure or an empty spatial subset both end the beam early (`OPEN` →
//! ... → `DONE` in the state diagram); the two are told apart by whether
//! [`BeamResult::exception`] is set.

use std::time::Duration;

use crate::atl03::atl08::{classify, Atl08Entry, PhotonKey};
use crate::atl03::datasets;
use crate::atl03::extent_builder::{
    build_extents, BackgroundCursor, BuiltExtent, ExtentBuilderConfig, PhotonArrays, SegmentArrays,
};
use crate::atl03::yapc::{recompute_v2, recompute_v3, YapcPhoton};
use crate::config::{Atl03Confidence, Atl08Class, Beam, Pair, QualityPh, RequestParams, SurfaceType, YapcVersion};
use crate::error::{CoreError, Result};
use crate::granule::{beam_ground_track, beam_spot, ScOrient};
use crate::lazy::{read_many, Asset, LazyArray, LazyColumnReader};
use crate::region::{resolve_window, RasterRegistry};
use crate::records::{ExceptionRecord, PFlags};

/// Orbit identity shared by every beam of one granule, resolved once per
/// granule rather than re-read per beam.
#[derive(Debug, Clone, Copy)]
pub struct OrbitContext {
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub sc_orient: ScOrient,
}

/// Outcome of running one beam to completion.
pub struct BeamResult {
    pub extents: Vec<BuiltExtent>,
    pub exception: Option<ExceptionRecord>,
}

fn as_u32(array: LazyArray) -> Vec<u32> {
    match array {
        LazyArray::U32(v) => v,
        other => other.as_doubles().iter().map(|&v| v as u32).collect(),
    }
}

fn as_i8(array: LazyArray) -> Vec<i8> {
    match array {
        LazyArray::I8(v) => v,
        other => other.as_doubles().iter().map(|&v| v as i8).collect(),
    }
}

fn as_u8(array: LazyArray) -> Vec<u8> {
    match array {
        LazyArray::U8(v) => v,
        other => other.as_doubles().iter().map(|&v| v as u8).collect(),
    }
}

/// Run the full §4.1 pipeline for one beam, never panicking on a read
/// failure: errors and an empty spatial subset are both folded into
/// [`BeamResult`] rather than propagated, since the caller's job is to
/// move on to the next beam either way.
#[allow(clippy::too_many_arguments)]
pub fn build_beam_extents(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granule: &str,
    beam: Beam,
    orbit: OrbitContext,
    params: &RequestParams,
    registry: &RasterRegistry,
    read_timeout: Duration,
) -> BeamResult {
    match build_beam_extents_inner(asset, reader, granule, beam, orbit, params, registry, read_timeout) {
        Ok(extents) => BeamResult { extents, exception: None },
        Err(CoreError::EmptySubset) => BeamResult { extents: Vec::new(), exception: None },
        Err(e) => BeamResult {
            extents: Vec::new(),
            exception: Some(ExceptionRecord::from_error(&datasets::beam_label(beam), &e)),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn build_beam_extents_inner(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granule: &str,
    beam: Beam,
    orbit: OrbitContext,
    params: &RequestParams,
    registry: &RasterRegistry,
    read_timeout: Duration,
) -> Result<Vec<BuiltExtent>> {
    // --- spatial pre-filter --------------------------------------------
    let ref_lat_path = datasets::reference_photon_lat(beam);
    let ref_lon_path = datasets::reference_photon_lon(beam);
    let seg_ph_cnt_path = datasets::segment_ph_cnt(beam);
    let prefilter = read_many(
        reader,
        asset,
        granule,
        &[(&ref_lat_path, 0, usize::MAX), (&ref_lon_path, 0, usize::MAX), (&seg_ph_cnt_path, 0, usize::MAX)],
        read_timeout,
    );
    let mut it = prefilter.into_iter();
    let ref_lat = it.next().unwrap()?.as_doubles();
    let ref_lon = it.next().unwrap()?.as_doubles();
    let seg_ph_cnt = as_u32(it.next().unwrap()?);

    let window = resolve_window(params.region.as_ref(), registry, &ref_lat, &ref_lon, &seg_ph_cnt)
        .ok_or(CoreError::EmptySubset)?;
    if window.is_empty() {
        return Err(CoreError::EmptySubset);
    }

    // --- segment-level reads ---------------------------------------------
    let segment_id_path = datasets::segment_id(beam);
    let segment_dist_x_path = datasets::segment_dist_x(beam);
    let segment_delta_time_path = datasets::segment_delta_time(beam);
    let segment_velocity_path = datasets::segment_velocity(beam);
    let seg_reads = read_many(
        reader,
        asset,
        granule,
        &[
            (&segment_id_path, window.first_segment, window.num_segments),
            (&segment_dist_x_path, window.first_segment, window.num_segments),
            (&segment_delta_time_path, window.first_segment, window.num_segments),
            (&segment_velocity_path, window.first_segment, window.num_segments),
        ],
        read_timeout,
    );
    let mut it = seg_reads.into_iter();
    let segment_id = as_u32(it.next().unwrap()?);
    let segment_dist_x = it.next().unwrap()?.as_doubles();
    let segment_delta_time = it.next().unwrap()?.as_doubles();
    let segment_velocity = it.next().unwrap()?.as_doubles();

    // --- photon-level reads -----------------------------------------------
    let signal_conf_paths: Vec<String> = if params.surface_type == SurfaceType::Dynamic {
        datasets::all_signal_conf_ph(beam).to_vec()
    } else {
        vec![datasets::signal_conf_ph(beam, params.surface_type).expect("fixed surface type always has a path")]
    };

    let mut paths: Vec<String> = vec![
        datasets::h_ph(beam),
        datasets::dist_ph_along(beam),
        datasets::dist_ph_across(beam),
        datasets::lat_ph(beam),
        datasets::lon_ph(beam),
        datasets::photon_delta_time(beam),
        datasets::quality_ph(beam),
        datasets::weight_ph(beam),
    ];
    paths.extend(signal_conf_paths.iter().cloned());

    let requests: Vec<(&str, usize, usize)> =
        paths.iter().map(|p| (p.as_str(), window.first_photon, window.num_photons)).collect();
    let photon_reads = read_many(reader, asset, granule, &requests, read_timeout);
    let mut it = photon_reads.into_iter();
    let h_ph = it.next().unwrap()?.as_doubles();
    let dist_ph_along = it.next().unwrap()?.as_doubles();
    let dist_ph_across = it.next().unwrap()?.as_doubles();
    let lat_ph = it.next().unwrap()?.as_doubles();
    let lon_ph = it.next().unwrap()?.as_doubles();
    let photon_delta_time = it.next().unwrap()?.as_doubles();
    let quality_ph_raw = as_i8(it.next().unwrap()?);
    let mut weight_ph = as_u8(it.next().unwrap()?);

    let n = h_ph.len();
    let signal_conf: Vec<i8> = if signal_conf_paths.len() == 1 {
        as_i8(it.next().unwrap()?)
    } else {
        let mut max_conf = vec![i8::MIN; n];
        for _ in 0..signal_conf_paths.len() {
            let col = as_i8(it.next().unwrap()?);
            for i in 0..n {
                if col[i] > max_conf[i] {
                    max_conf[i] = col[i];
                }
            }
        }
        max_conf
    };

    // --- per-photon segment assignment (local index within the window) ---
    let window_seg_counts = &seg_ph_cnt[window.first_segment..window.first_segment + window.num_segments];
    let mut photon_segment = vec![0usize; n];
    let mut photon_in_segment = vec![0u32; n];
    {
        let mut idx = 0usize;
        for (seg_idx, &count) in window_seg_counts.iter().enumerate() {
            for local in 0..count as usize {
                if idx >= n {
                    break;
                }
                photon_segment[idx] = seg_idx;
                photon_in_segment[idx] = local as u32;
                idx += 1;
            }
        }
    }

    let along_track: Vec<f64> = (0..n).map(|i| segment_dist_x[photon_segment[i]] + dist_ph_along[i]).collect();

    // --- ATL08 lockstep join ------------------------------------------------
    let atl08_class: Vec<Atl08Class> = if params.stages.atl08 {
        let companion = granule.replacen("ATL03", "ATL08", 1);
        let classed_path = crate::atl03::datasets::atl08::classed_pc_flag(beam);
        let seg_id_path = crate::atl03::datasets::atl08::segment_id(beam);
        let ph_in_seg_path = crate::atl03::datasets::atl08::ph_in_seg(beam);
        let atl08_reqs = [
            (classed_path.as_str(), 0, usize::MAX),
            (seg_id_path.as_str(), 0, usize::MAX),
            (ph_in_seg_path.as_str(), 0, usize::MAX),
        ];
        let atl08_reads = read_many(reader, asset, &companion, &atl08_reqs, read_timeout);
        let mut it = atl08_reads.into_iter();
        match (it.next().unwrap(), it.next().unwrap(), it.next().unwrap()) {
            (Ok(class_arr), Ok(seg_arr), Ok(ph_arr)) => {
                let classes_raw = as_u8(class_arr);
                let seg_ids = as_u32(seg_arr);
                let ph_idx = as_u32(ph_arr);
                let mut entries: Vec<Atl08Entry> = seg_ids
                    .iter()
                    .zip(ph_idx.iter())
                    .zip(classes_raw.iter())
                    .map(|((&s, &p), &c)| Atl08Entry { key: PhotonKey { segment_id: s, photon_in_segment: p }, class_code: c })
                    .collect();
                entries.sort_by_key(|e| e.key);
                let atl03_keys: Vec<PhotonKey> = (0..n)
                    .map(|i| PhotonKey { segment_id: segment_id[photon_segment[i]], photon_in_segment: photon_in_segment[i] })
                    .collect();
                classify(&atl03_keys, &entries)
            }
            _ => vec![Atl08Class::Unclassified; n],
        }
    } else {
        vec![Atl08Class::Unclassified; n]
    };

    // --- YAPC recompute ------------------------------------------------------
    if params.stages.yapc {
        let yapc_input: Vec<YapcPhoton> =
            (0..n).map(|i| YapcPhoton { x: along_track[i], height: h_ph[i], segment: photon_segment[i] }).collect();
        weight_ph = match params.yapc.version {
            YapcVersion::V3 => recompute_v3(&yapc_input, &params.yapc),
            YapcVersion::V2 => recompute_v2(&yapc_input, &params.yapc),
        };
    }

    // --- per-photon filtering, §4.1 "Filtering rules" in order ---------------
    let mut retained: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        if Atl03Confidence::from_code(signal_conf[i]).is_none_or(|c| !params.atl03_cnf.contains(&c)) {
            continue;
        }
        if QualityPh::from_code(quality_ph_raw[i]).is_none_or(|q| !params.quality_ph.contains(&q)) {
            continue;
        }
        if weight_ph[i] < params.yapc.score {
            continue;
        }
        if params.stages.atl08 && !params.atl08_class.is_empty() && !params.atl08_class.contains(&atl08_class[i]) {
            continue;
        }
        if let Some(included) = &window.segment_included {
            if !included[photon_segment[i]] {
                continue;
            }
        }
        retained.push(i);
    }

    let photons = PhotonArrays {
        along_track: retained.iter().map(|&i| along_track[i]).collect(),
        across_track: retained.iter().map(|&i| dist_ph_across[i]).collect(),
        height: retained.iter().map(|&i| h_ph[i]).collect(),
        latitude: retained.iter().map(|&i| lat_ph[i]).collect(),
        longitude: retained.iter().map(|&i| lon_ph[i]).collect(),
        delta_time: retained.iter().map(|&i| photon_delta_time[i]).collect(),
        atl03_cnf: retained.iter().map(|&i| signal_conf[i]).collect(),
        quality_ph: retained.iter().map(|&i| quality_ph_raw[i]).collect(),
        atl08_class: retained.iter().map(|&i| atl08_class[i]).collect(),
        yapc_score: retained.iter().map(|&i| weight_ph[i]).collect(),
        segment: retained.iter().map(|&i| photon_segment[i]).collect(),
    };

    let segments =
        SegmentArrays { segment_id, segment_dist_x, delta_time: segment_delta_time, velocity: segment_velocity };

    // --- ancillary fields (direct lookup, §4.1 "Ancillary joining") --------
    let mut anc_segment_values: Vec<(u8, Vec<f64>)> = Vec::new();
    for (idx, path) in params.anc_segment_fields.iter().enumerate() {
        if let Ok(arr) = reader.read(asset, granule, path, window.first_segment, window.num_segments, read_timeout) {
            anc_segment_values.push((idx as u8, arr.as_doubles()));
        }
    }
    let mut anc_photon_values: Vec<(u8, Vec<f64>)> = Vec::new();
    for (idx, path) in params.anc_photon_fields.iter().enumerate() {
        if let Ok(arr) = reader.read(asset, granule, path, window.first_photon, window.num_photons, read_timeout) {
            let values = arr.as_doubles();
            anc_photon_values.push((idx as u8, retained.iter().map(|&i| values[i]).collect()));
        }
    }

    // --- background rate series (coarse, whole-granule) ----------------------
    let bg_delta_path = datasets::bckgrd_delta_time(beam);
    let bg_rate_path = datasets::bckgrd_rate(beam);
    let bg_reads = read_many(
        reader,
        asset,
        granule,
        &[(&bg_delta_path, 0, usize::MAX), (&bg_rate_path, 0, usize::MAX)],
        read_timeout,
    );
    let mut it = bg_reads.into_iter();
    let bg_times = it.next().unwrap()?.as_doubles();
    let bg_rates = it.next().unwrap()?.as_doubles();
    let mut background = BackgroundCursor::new(&bg_times, &bg_rates);

    let pair_code = match beam.pair {
        Pair::L => 0,
        Pair::R => 1,
    };
    let sc_orient_code = match orbit.sc_orient {
        ScOrient::Backward => 0,
        ScOrient::Forward => 1,
        ScOrient::Transition => 2,
    };

    let builder_config = ExtentBuilderConfig {
        extent_length: params.extent_length,
        extent_step: params.extent_step,
        dist_in_seg: params.dist_in_seg,
        min_photon_count: params.min_photon_count,
        min_along_track_spread: params.min_along_track_spread,
        pass_invalid: params.pass_invalid,
        rgt: orbit.rgt,
        cycle: orbit.cycle,
        region: orbit.region,
        track: beam.track,
        pair: pair_code,
        gt: beam_ground_track(beam) as u8,
        spot: beam_spot(orbit.sc_orient, beam),
        sc_orient: sc_orient_code,
    };

    let mut counter = 0u32;
    let mut extents =
        build_extents(&segments, &photons, &anc_segment_values, &anc_photon_values, &mut background, &builder_config, &mut counter);

    // A polygon that crosses the granule more than once only ever gets the
    // first crossing windowed in (§4.4); flag the first extent so a
    // consumer can tell this beam's coverage was truncated.
    if window.truncated_multi_cross {
        if let Some(first) = extents.first_mut() {
            first.record.pflags.insert(PFlags::TRUNCATED_MULTI_CROSS);
        }
    }

    Ok(extents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::MemAsset;

    fn granule_with_flat_beam(n_segments: usize, photons_per_segment: usize) -> crate::lazy::MemGranule {
        let beam = Beam { track: 1, pair: Pair::L };
        let n = n_segments * photons_per_segment;
        let mut g = crate::lazy::MemGranule::new();

        g = g.with_dataset("g.h5", &datasets::reference_photon_lat(beam), LazyArray::F64(vec![10.0; n_segments]));
        g = g.with_dataset("g.h5", &datasets::reference_photon_lon(beam), LazyArray::F64(vec![20.0; n_segments]));
        g = g.with_dataset(
            "g.h5",
            &datasets::segment_ph_cnt(beam),
            LazyArray::U32(vec![photons_per_segment as u32; n_segments]),
        );
        g = g.with_dataset(
            "g.h5",
            &datasets::segment_id(beam),
            LazyArray::U32((0..n_segments).map(|i| 100 + i as u32).collect()),
        );
        g = g.with_dataset(
            "g.h5",
            &datasets::segment_dist_x(beam),
            LazyArray::F64((0..n_segments).map(|i| i as f64 * 20.0).collect()),
        );
        g = g.with_dataset(
            "g.h5",
            &datasets::segment_delta_time(beam),
            LazyArray::F64((0..n_segments).map(|i| i as f64 * 2.0).collect()),
        );
        g = g.with_dataset("g.h5", &datasets::segment_velocity(beam), LazyArray::F64(vec![6900.0; n_segments]));

        g = g.with_dataset("g.h5", &datasets::h_ph(beam), LazyArray::F64(vec![5.0; n]));
        g = g.with_dataset(
            "g.h5",
            &datasets::dist_ph_along(beam),
            LazyArray::F64((0..n).map(|i| (i % photons_per_segment) as f64).collect()),
        );
        g = g.with_dataset("g.h5", &datasets::dist_ph_across(beam), LazyArray::F64(vec![0.0; n]));
        g = g.with_dataset("g.h5", &datasets::lat_ph(beam), LazyArray::F64(vec![10.0; n]));
        g = g.with_dataset("g.h5", &datasets::lon_ph(beam), LazyArray::F64(vec![20.0; n]));
        g = g.with_dataset("g.h5", &datasets::photon_delta_time(beam), LazyArray::F64((0..n).map(|i| i as f64).collect()));
        g = g.with_dataset("g.h5", &datasets::quality_ph(beam), LazyArray::I8(vec![0; n]));
        g = g.with_dataset("g.h5", &datasets::weight_ph(beam), LazyArray::U8(vec![200; n]));
        g = g.with_dataset(
            "g.h5",
            &datasets::signal_conf_ph(beam, SurfaceType::Land).unwrap(),
            LazyArray::I8(vec![4; n]),
        );
        g = g.with_dataset("g.h5", &datasets::bckgrd_delta_time(beam), LazyArray::F64(vec![0.0, 1000.0]));
        g = g.with_dataset("g.h5", &datasets::bckgrd_rate(beam), LazyArray::F64(vec![1.0, 1.0]));
        g
    }

    #[test]
    fn builds_extents_for_a_flat_beam_with_no_region_filter() {
        let granule = granule_with_flat_beam(10, 10);
        let asset = MemAsset::new();
        let params = RequestParams::default();
        let registry = RasterRegistry::new();
        let orbit = OrbitContext { rgt: 1, cycle: 1, region: 1, sc_orient: ScOrient::Forward };

        let result = build_beam_extents(
            &asset,
            &granule,
            "g.h5",
            Beam { track: 1, pair: Pair::L },
            orbit,
            &params,
            &registry,
            Duration::from_millis(100),
        );

        assert!(result.exception.is_none());
        assert!(!result.extents.is_empty());
        for e in &result.extents {
            assert!((e.record.photons[0].height - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_granule_surfaces_an_exception_record() {
        let granule = crate::lazy::MemGranule::new();
        let asset = MemAsset::new();
        let params = RequestParams::default();
        let registry = RasterRegistry::new();
        let orbit = OrbitContext { rgt: 1, cycle: 1, region: 1, sc_orient: ScOrient::Forward };

        let result = build_beam_extents(
            &asset,
            &granule,
            "missing.h5",
            Beam { track: 1, pair: Pair::L },
            orbit,
            &params,
            &registry,
            Duration::from_millis(100),
        );

        assert!(result.extents.is_empty());
        assert!(result.exception.is_some());
        assert_eq!(result.exception.unwrap().code, "DOES_NOT_EXIST");
    }

    #[test]
    fn yapc_filter_drops_photons_below_minimum_score() {
        let granule = granule_with_flat_beam(5, 10);
        let asset = MemAsset::new();
        let mut params = RequestParams::default();
        params.yapc.score = 255;
        let registry = RasterRegistry::new();
        let orbit = OrbitContext { rgt: 1, cycle: 1, region: 1, sc_orient: ScOrient::Forward };

        let result = build_beam_extents(
            &asset,
            &granule,
            "g.h5",
            Beam { track: 1, pair: Pair::L },
            orbit,
            &params,
            &registry,
            Duration::from_millis(100),
        );

        assert!(result.extents.is_empty());
    }
}
