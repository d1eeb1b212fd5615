//! Granule index builder (§4.5).
//!
//! Separate concurrency shape from [`crate::pipeline`]: rather than one
//! thread per beam of a single granule, this is a user-sized worker pool
//! pulling granule names off one shared input list (§5 "Scheduling model").
//! Existed because a planner needs an overview of available granules
//! (their time span and footprint) before issuing the per-granule subsetting
//! requests the rest of this crate serves.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::atl03::datasets;
use crate::config::{Beam, Pair};
use crate::error::CoreError;
use crate::lazy::{read_many, Asset, LazyColumnReader};
use crate::queue::PublishQueue;
use crate::records::{ExceptionRecord, IndexRecord};

/// Beam whose reference-point track bounds the granule footprint (§4.5:
/// "gt3r/gt1l reference lat/lon"). This crate reads gt3r unconditionally;
/// `sc_orient` swaps which physical beam is strong, but gt3r's reference
/// track spans the full granule either way, so the label alone is enough
/// for an overview record (see DESIGN.md).
const FOOTPRINT_BEAM: Beam = Beam { track: 3, pair: Pair::R };

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexerStats {
    pub granules_indexed: u64,
    pub exceptions: u64,
}

#[derive(Default)]
struct Counters {
    granules_indexed: AtomicU64,
    exceptions: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> IndexerStats {
        IndexerStats {
            granules_indexed: self.granules_indexed.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
        }
    }
}

/// Read one granule's overview datasets and build its [`IndexRecord`].
fn index_one_granule(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granule: &str,
    read_timeout: Duration,
) -> Result<IndexRecord, CoreError> {
    let ref_lat_path = datasets::reference_photon_lat(FOOTPRINT_BEAM);
    let ref_lon_path = datasets::reference_photon_lon(FOOTPRINT_BEAM);

    let reads = read_many(
        reader,
        asset,
        granule,
        &[
            (datasets::START_DELTA_TIME, 0, usize::MAX),
            (datasets::END_DELTA_TIME, 0, usize::MAX),
            (datasets::CYCLE_NUMBER, 0, usize::MAX),
            (datasets::RGT, 0, usize::MAX),
            (&ref_lat_path, 0, usize::MAX),
            (&ref_lon_path, 0, usize::MAX),
        ],
        read_timeout,
    );
    let mut it = reads.into_iter();
    let start_delta_time = it.next().unwrap()?.as_doubles();
    let end_delta_time = it.next().unwrap()?.as_doubles();
    let cycle_number = it.next().unwrap()?.as_doubles();
    let rgt = it.next().unwrap()?.as_doubles();
    let ref_lat = it.next().unwrap()?.as_doubles();
    let ref_lon = it.next().unwrap()?.as_doubles();

    let first = |v: &[f64]| v.first().copied().unwrap_or(0.0);
    let last = |v: &[f64]| v.last().copied().unwrap_or(0.0);

    Ok(IndexRecord {
        name: granule.to_string(),
        t0: first(&start_delta_time),
        t1: first(&end_delta_time),
        lat0: first(&ref_lat),
        lon0: first(&ref_lon),
        lat1: last(&ref_lat),
        lon1: last(&ref_lon),
        cycle: first(&cycle_number) as u32,
        rgt: first(&rgt) as u32,
    })
}

/// Drain `granules` across `worker_count` OS threads, publishing one
/// [`IndexRecord`] (or [`ExceptionRecord`]) per granule to `queue`.
pub fn index_granules(
    asset: &dyn Asset,
    reader: &dyn LazyColumnReader,
    granules: &[String],
    worker_count: usize,
    queue: &PublishQueue,
    active: &AtomicBool,
    post_timeout: Duration,
    read_timeout: Duration,
) -> IndexerStats {
    let work: Mutex<VecDeque<String>> = Mutex::new(granules.iter().cloned().collect());
    let counters = Counters::default();
    let worker_count = worker_count.max(1);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let work = &work;
            let counters = &counters;
            scope.spawn(move || loop {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                let granule = match work.lock().unwrap().pop_front() {
                    Some(g) => g,
                    None => return,
                };

                match index_one_granule(asset, reader, &granule, read_timeout) {
                    Ok(record) => {
                        queue.post_until_delivered_or_cancelled(
                            bytes::Bytes::from(record.to_bytes()),
                            post_timeout,
                            active,
                        );
                        counters.granules_indexed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let exception = ExceptionRecord::from_error(&granule, &e);
                        let payload =
                            format!("{}|{}|{}|{:?}", exception.resource, exception.code, exception.message, exception.level);
                        queue.post_until_delivered_or_cancelled(bytes::Bytes::from(payload), post_timeout, active);
                        counters.exceptions.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    counters.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::{LazyArray, MemAsset, MemGranule};

    fn granule_with_overview(name: &str, rgt: f64, cycle: f64) -> MemGranule {
        MemGranule::new()
            .with_dataset(name, datasets::START_DELTA_TIME, LazyArray::F64(vec![100.0]))
            .with_dataset(name, datasets::END_DELTA_TIME, LazyArray::F64(vec![200.0]))
            .with_dataset(name, datasets::CYCLE_NUMBER, LazyArray::F64(vec![cycle]))
            .with_dataset(name, datasets::RGT, LazyArray::F64(vec![rgt]))
            .with_dataset(
                name,
                &datasets::reference_photon_lat(FOOTPRINT_BEAM),
                LazyArray::F64(vec![10.0, 11.0, 12.0]),
            )
            .with_dataset(
                name,
                &datasets::reference_photon_lon(FOOTPRINT_BEAM),
                LazyArray::F64(vec![20.0, 21.0, 22.0]),
            )
    }

    struct MultiGranuleReader {
        granules: Vec<MemGranule>,
    }

    impl LazyColumnReader for MultiGranuleReader {
        fn read(
            &self,
            asset: &dyn Asset,
            granule: &str,
            dataset_path: &str,
            first_row: usize,
            row_count: usize,
            read_timeout: Duration,
        ) -> crate::error::Result<LazyArray> {
            for g in &self.granules {
                if let Ok(arr) = g.read(asset, granule, dataset_path, first_row, row_count, read_timeout) {
                    return Ok(arr);
                }
            }
            Err(CoreError::DoesNotExist(format!("{granule}{dataset_path}")))
        }
    }

    #[test]
    fn indexes_every_granule_in_the_input_list() {
        let reader = MultiGranuleReader {
            granules: vec![
                granule_with_overview("a.h5", 1.0, 1.0),
                granule_with_overview("b.h5", 2.0, 1.0),
            ],
        };
        let asset = MemAsset::new();
        let granules = vec!["a.h5".to_string(), "b.h5".to_string()];
        let (queue, rx) = PublishQueue::new("index", 8);
        let active = AtomicBool::new(true);

        let stats = index_granules(&asset, &reader, &granules, 2, &queue, &active, Duration::from_millis(100), Duration::from_millis(100));

        assert_eq!(stats.granules_indexed, 2);
        assert_eq!(stats.exceptions, 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn a_missing_granule_is_counted_as_an_exception() {
        let reader = MultiGranuleReader { granules: vec![granule_with_overview("a.h5", 1.0, 1.0)] };
        let asset = MemAsset::new();
        let granules = vec!["a.h5".to_string(), "missing.h5".to_string()];
        let (queue, _rx) = PublishQueue::new("index", 8);
        let active = AtomicBool::new(true);

        let stats = index_granules(&asset, &reader, &granules, 1, &queue, &active, Duration::from_millis(100), Duration::from_millis(100));

        assert_eq!(stats.granules_indexed, 1);
        assert_eq!(stats.exceptions, 1);
    }
}
