//! Asset and lazy-column-reader contracts (§1, §6, §10).
//!
//! §1 treats the asset layer (S3/file/HTTP) and the lazy columnar reader for
//! hierarchical scientific data files as external collaborators. This module
//! defines the trait boundary plus the two implementations a compiling,
//! testable crate needs: a local-file [`FileAsset`] (`memmap2`-backed, same
//! zero-copy pattern this codebase already uses for file access) and an
//! in-memory [`MemAsset`]/[`MemGranule`] test double. A production S3/CMR/
//! real-HDF5 driver stays out of scope per §1.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::{CoreError, Result};

/// `Asset`: `open(path) → bytes-handle` (§6).
pub trait Asset: Send + Sync {
    fn open(&self, path: &str) -> Result<Arc<dyn AssetHandle>>;
}

/// A handle returned by [`Asset::open`]: `read(handle, offset, length) → bytes`.
pub trait AssetHandle: Send + Sync {
    fn read(&self, offset: u64, length: usize) -> Result<Bytes>;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local-filesystem asset backed by a memory-mapped file.
#[derive(Default)]
pub struct FileAsset {
    base_dir: Option<std::path::PathBuf>,
}

impl FileAsset {
    pub fn new() -> Self {
        FileAsset { base_dir: None }
    }

    pub fn rooted_at(base_dir: impl Into<std::path::PathBuf>) -> Self {
        FileAsset { base_dir: Some(base_dir.into()) }
    }

    fn resolve(&self, path: &str) -> std::path::PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => Path::new(path).to_path_buf(),
        }
    }
}

impl Asset for FileAsset {
    fn open(&self, path: &str) -> Result<Arc<dyn AssetHandle>> {
        let full_path = self.resolve(path);
        let file = File::open(&full_path)
            .map_err(|_| CoreError::DoesNotExist(full_path.display().to_string()))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(CoreError::Read)?;
        Ok(Arc::new(MappedFileHandle { mmap }))
    }
}

struct MappedFileHandle {
    mmap: Mmap,
}

impl AssetHandle for MappedFileHandle {
    fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start
            .checked_add(length)
            .filter(|&e| e <= self.mmap.len())
            .ok_or_else(|| CoreError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of mapped file",
            )))?;
        Ok(Bytes::copy_from_slice(&self.mmap[start..end]))
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

/// In-memory asset test double: a registry of named byte blobs.
#[derive(Default)]
pub struct MemAsset {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemAsset {
    pub fn new() -> Self {
        MemAsset::default()
    }

    pub fn put(&self, path: impl Into<String>, bytes: impl Into<Bytes>) {
        self.files.lock().unwrap().insert(path.into(), bytes.into());
    }
}

impl Asset for MemAsset {
    fn open(&self, path: &str) -> Result<Arc<dyn AssetHandle>> {
        let files = self.files.lock().unwrap();
        let bytes = files
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::DoesNotExist(path.to_string()))?;
        Ok(Arc::new(MemHandle { bytes }))
    }
}

struct MemHandle {
    bytes: Bytes,
}

impl AssetHandle for MemHandle {
    fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start
            .checked_add(length)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| CoreError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of in-memory asset",
            )))?;
        Ok(self.bytes.slice(start..end))
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A tagged variant over the numeric column types a granule dataset can
/// hold (§9 "Polymorphism over lazy arrays"). `as_doubles` is the only
/// operation the LSF needs on ancillary columns, so it is the one
/// conversion this type exposes — callers that need the native
/// representation match on the variant directly.
#[derive(Debug, Clone, PartialEq)]
pub enum LazyArray {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl LazyArray {
    pub fn len(&self) -> usize {
        match self {
            LazyArray::I8(v) => v.len(),
            LazyArray::U8(v) => v.len(),
            LazyArray::I16(v) => v.len(),
            LazyArray::U16(v) => v.len(),
            LazyArray::I32(v) => v.len(),
            LazyArray::U32(v) => v.len(),
            LazyArray::I64(v) => v.len(),
            LazyArray::U64(v) => v.len(),
            LazyArray::F32(v) => v.len(),
            LazyArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lossy coercion to `f64` regardless of source type (§9 open question,
    /// resolved: preserved for bit-compat with downstream consumers).
    pub fn as_doubles(&self) -> Vec<f64> {
        use num_traits::ToPrimitive;
        match self {
            LazyArray::I8(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::U8(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::I16(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::U16(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::I32(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::U32(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::I64(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::U64(v) => v.iter().map(|x| x.to_f64().unwrap_or(0.0)).collect(),
            LazyArray::F32(v) => v.iter().map(|x| *x as f64).collect(),
            LazyArray::F64(v) => v.clone(),
        }
    }
}

/// `read(asset, granule, dataset_path, column_selector, first_row, row_count,
/// ctx) → typed-array`, via a `join` call that either yields the populated
/// array or raises `TIMEOUT` / `DOES_NOT_EXIST` / `READ_ERROR` (§6).
pub trait LazyColumnReader: Send + Sync {
    fn read(
        &self,
        asset: &dyn Asset,
        granule: &str,
        dataset_path: &str,
        first_row: usize,
        row_count: usize,
        read_timeout: Duration,
    ) -> Result<LazyArray>;
}

/// In-memory reader fake used by tests: datasets are pre-loaded columns
/// keyed by `(granule, dataset_path)`. Supports injecting an artificial
/// read latency to exercise the `read_timeout_ms` path (§5 "Cancellation").
#[derive(Default)]
pub struct MemGranule {
    datasets: HashMap<(String, String), LazyArray>,
    artificial_latency: Option<Duration>,
}

impl MemGranule {
    pub fn new() -> Self {
        MemGranule::default()
    }

    pub fn with_dataset(mut self, granule: &str, path: &str, array: LazyArray) -> Self {
        self.datasets.insert((granule.to_string(), path.to_string()), array);
        self
    }

    pub fn with_artificial_latency(mut self, latency: Duration) -> Self {
        self.artificial_latency = Some(latency);
        self
    }

    fn slice(array: &LazyArray, first_row: usize, row_count: usize) -> LazyArray {
        macro_rules! slice_variant {
            ($v:expr) => {{
                let end = (first_row + row_count).min($v.len());
                let start = first_row.min(end);
                $v[start..end].to_vec()
            }};
        }
        match array {
            LazyArray::I8(v) => LazyArray::I8(slice_variant!(v)),
            LazyArray::U8(v) => LazyArray::U8(slice_variant!(v)),
            LazyArray::I16(v) => LazyArray::I16(slice_variant!(v)),
            LazyArray::U16(v) => LazyArray::U16(slice_variant!(v)),
            LazyArray::I32(v) => LazyArray::I32(slice_variant!(v)),
            LazyArray::U32(v) => LazyArray::U32(slice_variant!(v)),
            LazyArray::I64(v) => LazyArray::I64(slice_variant!(v)),
            LazyArray::U64(v) => LazyArray::U64(slice_variant!(v)),
            LazyArray::F32(v) => LazyArray::F32(slice_variant!(v)),
            LazyArray::F64(v) => LazyArray::F64(slice_variant!(v)),
        }
    }
}

impl LazyColumnReader for MemGranule {
    fn read(
        &self,
        _asset: &dyn Asset,
        granule: &str,
        dataset_path: &str,
        first_row: usize,
        row_count: usize,
        read_timeout: Duration,
    ) -> Result<LazyArray> {
        if let Some(latency) = self.artificial_latency {
            let started = Instant::now();
            std::thread::sleep(latency.min(read_timeout + Duration::from_millis(1)));
            if started.elapsed() >= read_timeout {
                return Err(CoreError::Timeout(read_timeout.as_millis() as u64));
            }
        }
        let array = self
            .datasets
            .get(&(granule.to_string(), dataset_path.to_string()))
            .ok_or_else(|| CoreError::DoesNotExist(format!("{granule}{dataset_path}")))?;
        Ok(Self::slice(array, first_row, row_count))
    }
}

/// Local-file lazy column reader: each dataset is a flat little-endian
/// `f64` array stored at `<granule><dataset_path>.bin` under the asset's
/// base directory. Stands in for the real HDF5 driver, out of scope per
/// §1, so the CLI entrypoint has one concrete, working local-file reader
/// to run the rest of the pipeline against (§10).
#[derive(Default)]
pub struct DirectoryColumnReader;

impl DirectoryColumnReader {
    pub fn new() -> Self {
        DirectoryColumnReader
    }

    fn dataset_file(granule: &str, dataset_path: &str) -> String {
        format!("{granule}{dataset_path}.bin")
    }
}

impl LazyColumnReader for DirectoryColumnReader {
    fn read(
        &self,
        asset: &dyn Asset,
        granule: &str,
        dataset_path: &str,
        first_row: usize,
        row_count: usize,
        read_timeout: Duration,
    ) -> Result<LazyArray> {
        let started = Instant::now();
        let handle = asset.open(&Self::dataset_file(granule, dataset_path))?;
        if started.elapsed() >= read_timeout {
            return Err(CoreError::Timeout(read_timeout.as_millis() as u64));
        }

        let total_len = (handle.len() / 8) as usize;
        let end = (first_row + row_count).min(total_len);
        let start = first_row.min(end);
        let bytes = handle.read((start * 8) as u64, (end - start) * 8)?;

        let mut cursor = &bytes[..];
        let mut values = Vec::with_capacity(end - start);
        for _ in 0..(end - start) {
            values.push(
                byteorder::ReadBytesExt::read_f64::<byteorder::LittleEndian>(&mut cursor)
                    .map_err(CoreError::Read)?,
            );
        }
        Ok(LazyArray::F64(values))
    }
}

/// Issue a batch of column reads concurrently and join them, mirroring
/// §5's "issued concurrently to the external lazy reader and then joined":
/// realized with a scoped `rayon::scope` fan-out, one closure per dataset
/// path, joined implicitly when the scope exits.
pub fn read_many<'a>(
    reader: &(dyn LazyColumnReader + 'a),
    asset: &(dyn Asset + 'a),
    granule: &str,
    requests: &[(&str, usize, usize)],
    read_timeout: Duration,
) -> Vec<Result<LazyArray>> {
    let mut results: Vec<Option<Result<LazyArray>>> = (0..requests.len()).map(|_| None).collect();
    let slots: Vec<Mutex<Option<Result<LazyArray>>>> =
        results.drain(..).map(Mutex::new).collect();

    rayon::scope(|scope| {
        for (i, (path, first_row, row_count)) in requests.iter().enumerate() {
            let slot = &slots[i];
            scope.spawn(move |_| {
                let outcome = reader.read(asset, granule, path, *first_row, *row_count, read_timeout);
                *slot.lock().unwrap() = Some(outcome);
            });
        }
    });

    slots
        .into_iter()
        .map(|m| m.into_inner().unwrap().expect("every slot is populated by its spawned closure"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_array_as_doubles_coerces_integral_types() {
        let arr = LazyArray::I32(vec![1, -2, 3]);
        assert_eq!(arr.as_doubles(), vec![1.0, -2.0, 3.0]);
    }

    #[test]
    fn mem_asset_open_missing_path_is_does_not_exist() {
        let asset = MemAsset::new();
        let err = asset.open("missing.h5").unwrap_err();
        assert_eq!(err.code(), "DOES_NOT_EXIST");
    }

    #[test]
    fn mem_asset_round_trips_bytes() {
        let asset = MemAsset::new();
        asset.put("g.h5", Bytes::from_static(b"hello world"));
        let handle = asset.open("g.h5").unwrap();
        assert_eq!(handle.read(6, 5).unwrap(), Bytes::from_static(b"world"));
    }

    #[test]
    fn mem_granule_slices_to_requested_row_range() {
        let granule = MemGranule::new().with_dataset(
            "g.h5",
            "/gt1l/heights/h_ph",
            LazyArray::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0]),
        );
        let asset = MemAsset::new();
        let out = granule
            .read(&asset, "g.h5", "/gt1l/heights/h_ph", 1, 2, Duration::from_millis(100))
            .unwrap();
        assert_eq!(out, LazyArray::F64(vec![2.0, 3.0]));
    }

    #[test]
    fn mem_granule_raises_timeout_when_latency_exceeds_budget() {
        let granule = MemGranule::new()
            .with_dataset("g.h5", "/x", LazyArray::F64(vec![1.0]))
            .with_artificial_latency(Duration::from_millis(50));
        let asset = MemAsset::new();
        let err = granule
            .read(&asset, "g.h5", "/x", 0, 1, Duration::from_millis(5))
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[test]
    fn directory_column_reader_reads_a_row_slice_of_a_flat_f64_file() {
        let dir = tempfile::tempdir().unwrap();
        let asset = FileAsset::rooted_at(dir.path());
        let file_path = dir.path().join("g.h5/heights/h_ph.bin");
        std::fs::create_dir_all(file_path.parent().unwrap()).unwrap();
        let mut buf = Vec::new();
        for v in [1.0_f64, 2.0, 3.0, 4.0] {
            byteorder::WriteBytesExt::write_f64::<byteorder::LittleEndian>(&mut buf, v).unwrap();
        }
        std::fs::write(&file_path, &buf).unwrap();

        let reader = DirectoryColumnReader::new();
        let out = reader.read(&asset, "g.h5", "/heights/h_ph", 1, 2, Duration::from_secs(1)).unwrap();
        assert_eq!(out, LazyArray::F64(vec![2.0, 3.0]));
    }

    #[test]
    fn directory_column_reader_surfaces_does_not_exist_for_a_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let asset = FileAsset::rooted_at(dir.path());
        let reader = DirectoryColumnReader::new();
        let err = reader.read(&asset, "g.h5", "/missing", 0, 1, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code(), "DOES_NOT_EXIST");
    }

    #[test]
    fn read_many_issues_every_request_and_preserves_order() {
        let granule = MemGranule::new()
            .with_dataset("g.h5", "/a", LazyArray::F64(vec![1.0]))
            .with_dataset("g.h5", "/b", LazyArray::F64(vec![2.0]));
        let asset = MemAsset::new();
        let reqs = [("/a", 0, 1), ("/b", 0, 1)];
        let out = read_many(&granule, &asset, "g.h5", &reqs, Duration::from_millis(100));
        assert_eq!(out[0].as_ref().unwrap(), &LazyArray::F64(vec![1.0]));
        assert_eq!(out[1].as_ref().unwrap(), &LazyArray::F64(vec![2.0]));
    }
}
