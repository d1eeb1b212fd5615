//! Core ATL03→ATL06 photon-to-surface-fit pipeline.
//!
//! This crate is the processing core: given a lazily-read ICESat-2 ATL03
//! granule and a [`config::RequestParams`], it subsets photons into
//! along-track extents (§4.1), runs the iterative robust least-squares
//! surface fit (§4.2), and emits [`records::ElevationRecord`]s through a
//! [`queue::PublishQueue`]. The CLI entrypoint (`src/main.rs`) and the
//! auxiliary granule indexer (`indexer`) are thin wrappers around this
//! library.

pub mod config;
pub mod error;
pub mod geometry;
pub mod granule;
pub mod lazy;
pub mod queue;
pub mod records;
pub mod region;

pub mod atl03;
pub mod atl06;

pub mod indexer;
pub mod log_format;
pub mod pipeline;
