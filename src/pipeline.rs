//! Top-level per-granule orchestrator (§5 "Concurrency & resource model").
//!
//! Spawns one worker thread per enabled beam — a scoped `rayon` fan-out,
//! the same parallel-execution pattern already used inside each worker for
//! its own I/O fan-out (§5 "Scheduling model"). Every beam's extents are
//! fit and appended into one shared, mutex-protected elevation batch: the
//! single `postingMutex` the reference dispatcher uses to serialize
//! concurrent appends across beams, rather than a dedicated consumer
//! thread pulling round-robin off a channel. Both give every extent
//! exactly one fit, in strictly increasing extent-counter order within a
//! beam, with no ordering guarantee across beams (§5 "Ordering
//! guarantees").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::atl03::worker::{build_beam_extents, OrbitContext};
use crate::atl06::dispatcher::{fit_extent, BatchAccumulator};
use crate::config::{Beam, RequestParams};
use crate::lazy::{Asset, LazyColumnReader};
use crate::queue::PublishQueue;
use crate::records::ExceptionRecord;
use crate::region::RasterRegistry;

/// Read-only snapshot of [`PipelineStats`] (§5 "Statistics counters":
/// "updated under a dedicated mutex; published read-only via a getter").
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub beams_completed: u64,
    pub extents_emitted: u64,
    pub elevations_emitted: u64,
    pub exceptions: u64,
}

/// Run counters shared across every beam worker. Each field is its own
/// atomic rather than one value behind a single lock — contention-free
/// increments, same net effect as the spec's "dedicated mutex" for this
/// crate's read-mostly-at-the-end access pattern.
#[derive(Default)]
pub struct PipelineStats {
    beams_completed: AtomicU64,
    extents_emitted: AtomicU64,
    elevations_emitted: AtomicU64,
    exceptions: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            beams_completed: self.beams_completed.load(Ordering::Relaxed),
            extents_emitted: self.extents_emitted.load(Ordering::Relaxed),
            elevations_emitted: self.elevations_emitted.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
        }
    }
}

/// Everything one granule-processing run needs beyond `RequestParams`: the
/// two output queues and the cancellation flag every worker polls (§5
/// "Cancellation").
pub struct PipelineHandles<'a> {
    pub atl03_queue: &'a PublishQueue,
    pub atl06_queue: &'a PublishQueue,
    pub active: Arc<AtomicBool>,
    pub post_timeout: Duration,
    pub read_timeout: Duration,
}

/// Process every beam in `params.beams` concurrently and return the run's
/// final stats. A per-beam exception is posted to `atl03_queue` and
/// counted; it never aborts sibling beams (§5 "Failure surfacing").
pub fn run_granule(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granule: &str,
    orbit: OrbitContext,
    params: &RequestParams,
    registry: &RasterRegistry,
    handles: &PipelineHandles,
) -> StatsSnapshot {
    let stats = PipelineStats::default();
    let accumulator: Mutex<BatchAccumulator> = Mutex::new(BatchAccumulator::new());

    rayon::scope(|scope| {
        for &beam in &params.beams {
            let stats = &stats;
            let accumulator = &accumulator;
            scope.spawn(move |_| {
                run_one_beam(asset, reader, granule, beam, orbit, params, registry, handles, stats, accumulator);
            });
        }
    });

    accumulator.lock().unwrap().flush(handles.atl06_queue, handles.post_timeout);
    stats.snapshot()
}

#[allow(clippy::too_many_arguments)]
fn run_one_beam(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granule: &str,
    beam: Beam,
    orbit: OrbitContext,
    params: &RequestParams,
    registry: &RasterRegistry,
    handles: &PipelineHandles,
    stats: &PipelineStats,
    accumulator: &Mutex<BatchAccumulator>,
) {
    if !handles.active.load(Ordering::Relaxed) {
        return;
    }

    let result = build_beam_extents(asset, reader, granule, beam, orbit, params, registry, handles.read_timeout);

    if let Some(exception) = &result.exception {
        post_exception(handles, exception);
        stats.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    for extent in result.extents {
        if !handles.active.load(Ordering::Relaxed) {
            break;
        }

        handles.atl03_queue.post_until_delivered_or_cancelled(
            bytes::Bytes::from(extent.record.to_bytes()),
            handles.post_timeout,
            &handles.active,
        );
        stats.extents_emitted.fetch_add(1, Ordering::Relaxed);

        let (elevation, anc_fields) = fit_extent(&extent.fit_input, params);
        accumulator.lock().unwrap().push(elevation, anc_fields, handles.atl06_queue, handles.post_timeout);
        stats.elevations_emitted.fetch_add(1, Ordering::Relaxed);
    }

    stats.beams_completed.fetch_add(1, Ordering::Relaxed);
}

fn post_exception(handles: &PipelineHandles, exception: &ExceptionRecord) {
    let payload = format!("{}|{}|{}|{:?}", exception.resource, exception.code, exception.message, exception.level);
    handles.atl03_queue.post_until_delivered_or_cancelled(
        bytes::Bytes::from(payload),
        handles.post_timeout,
        &handles.active,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atl03::datasets;
    use crate::config::{Pair, SurfaceType};
    use crate::granule::ScOrient;
    use crate::lazy::{LazyArray, MemAsset, MemGranule};

    fn single_beam_granule() -> MemGranule {
        let beam = Beam { track: 1, pair: Pair::L };
        let n_segments = 6;
        let per_segment = 10;
        let n = n_segments * per_segment;

        MemGranule::new()
            .with_dataset("g.h5", &datasets::reference_photon_lat(beam), LazyArray::F64(vec![10.0; n_segments]))
            .with_dataset("g.h5", &datasets::reference_photon_lon(beam), LazyArray::F64(vec![20.0; n_segments]))
            .with_dataset("g.h5", &datasets::segment_ph_cnt(beam), LazyArray::U32(vec![per_segment as u32; n_segments]))
            .with_dataset(
                "g.h5",
                &datasets::segment_id(beam),
                LazyArray::U32((0..n_segments).map(|i| 100 + i as u32).collect()),
            )
            .with_dataset(
                "g.h5",
                &datasets::segment_dist_x(beam),
                LazyArray::F64((0..n_segments).map(|i| i as f64 * 20.0).collect()),
            )
            .with_dataset(
                "g.h5",
                &datasets::segment_delta_time(beam),
                LazyArray::F64((0..n_segments).map(|i| i as f64 * 2.0).collect()),
            )
            .with_dataset("g.h5", &datasets::segment_velocity(beam), LazyArray::F64(vec![6900.0; n_segments]))
            .with_dataset("g.h5", &datasets::h_ph(beam), LazyArray::F64(vec![5.0; n]))
            .with_dataset(
                "g.h5",
                &datasets::dist_ph_along(beam),
                LazyArray::F64((0..n).map(|i| (i % per_segment) as f64).collect()),
            )
            .with_dataset("g.h5", &datasets::dist_ph_across(beam), LazyArray::F64(vec![0.0; n]))
            .with_dataset("g.h5", &datasets::lat_ph(beam), LazyArray::F64(vec![10.0; n]))
            .with_dataset("g.h5", &datasets::lon_ph(beam), LazyArray::F64(vec![20.0; n]))
            .with_dataset("g.h5", &datasets::photon_delta_time(beam), LazyArray::F64((0..n).map(|i| i as f64).collect()))
            .with_dataset("g.h5", &datasets::quality_ph(beam), LazyArray::I8(vec![0; n]))
            .with_dataset("g.h5", &datasets::weight_ph(beam), LazyArray::U8(vec![200; n]))
            .with_dataset("g.h5", &datasets::signal_conf_ph(beam, SurfaceType::Land).unwrap(), LazyArray::I8(vec![4; n]))
            .with_dataset("g.h5", &datasets::bckgrd_delta_time(beam), LazyArray::F64(vec![0.0, 1000.0]))
            .with_dataset("g.h5", &datasets::bckgrd_rate(beam), LazyArray::F64(vec![1.0, 1.0]))
    }

    #[test]
    fn runs_a_single_beam_to_completion_and_publishes_both_queues() {
        let granule = single_beam_granule();
        let asset = MemAsset::new();
        let mut params = RequestParams::default();
        params.beams = vec![Beam { track: 1, pair: Pair::L }];
        let registry = RasterRegistry::new();
        let orbit = OrbitContext { rgt: 1, cycle: 1, region: 1, sc_orient: ScOrient::Forward };

        let (atl03_queue, atl03_rx) = PublishQueue::new("atl03", 16);
        let (atl06_queue, atl06_rx) = PublishQueue::new("atl06", 16);
        let handles = PipelineHandles {
            atl03_queue: &atl03_queue,
            atl06_queue: &atl06_queue,
            active: Arc::new(AtomicBool::new(true)),
            post_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
        };

        let stats = run_granule(&asset, &granule, "g.h5", orbit, &params, &registry, &handles);

        assert_eq!(stats.beams_completed, 1);
        assert_eq!(stats.exceptions, 0);
        assert!(stats.extents_emitted > 0);
        assert_eq!(stats.extents_emitted, stats.elevations_emitted);

        for _ in 0..stats.extents_emitted {
            assert!(atl03_rx.recv_timeout(Duration::from_millis(50)).is_ok());
        }
        assert!(atl06_rx.recv_timeout(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn a_missing_beam_dataset_counts_as_an_exception_not_a_panic() {
        let granule = MemGranule::new();
        let asset = MemAsset::new();
        let mut params = RequestParams::default();
        params.beams = vec![Beam { track: 1, pair: Pair::L }];
        let registry = RasterRegistry::new();
        let orbit = OrbitContext { rgt: 1, cycle: 1, region: 1, sc_orient: ScOrient::Forward };

        let (atl03_queue, _atl03_rx) = PublishQueue::new("atl03", 16);
        let (atl06_queue, _atl06_rx) = PublishQueue::new("atl06", 16);
        let handles = PipelineHandles {
            atl03_queue: &atl03_queue,
            atl06_queue: &atl06_queue,
            active: Arc::new(AtomicBool::new(true)),
            post_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
        };

        let stats = run_granule(&asset, &granule, "missing.h5", orbit, &params, &registry, &handles);
        assert_eq!(stats.exceptions, 1);
        assert_eq!(stats.extents_emitted, 0);
    }
}
