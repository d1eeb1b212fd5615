//! Typed error taxonomy for the core pipeline (§7).
//!
//! Leaf operations (lazy reads, queue posts, iterative fits) return
//! [`CoreError`] so callers can match on `kind()` and decide whether a
//! failure is beam-local or extent-local. Orchestration code that only
//! needs to bubble a single top-level failure (the CLI entrypoint, the
//! indexer worker pool) uses `anyhow::Result` instead.

use thiserror::Error;

/// Disposition described in §7: does a failure abort a whole beam, or
/// does it just flag the one extent/elevation that triggered it?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Aborts the beam worker; an exception record precedes the terminator.
    AbortsBeam,
    /// Sets a pflag bit on the one extent/elevation record; streaming continues.
    FlagsExtent,
    /// Not an error at all from the caller's perspective (empty subset).
    Terminal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lazy read timed out after {0}ms")]
    Timeout(u64),

    #[error("granule or dataset does not exist: {0}")]
    DoesNotExist(String),

    #[error("region subset is empty")]
    EmptySubset,

    #[error("percentile index scan out of bounds: i0={i0} i1={i1} n={n}")]
    OutOfBounds { i0: i64, i1: i64, n: i64 },

    #[error("retained photon count below minimum after iteration")]
    TooFewPhotons,

    #[error("along-track spread below minimum after iteration")]
    SpreadTooShort,

    #[error("surface fit reached max_iterations without converging")]
    MaxIterationsReached,

    #[error("record dropped by publish queue: {0}")]
    PostDropped(String),

    #[error("granule name does not match the expected ATL03 naming scheme: {0}")]
    GranuleName(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("underlying read error: {0}")]
    Read(#[from] std::io::Error),
}

impl CoreError {
    pub fn disposition(&self) -> Disposition {
        match self {
            CoreError::Timeout(_) | CoreError::DoesNotExist(_) | CoreError::Read(_) => {
                Disposition::AbortsBeam
            }
            CoreError::EmptySubset => Disposition::Terminal,
            CoreError::OutOfBounds { .. }
            | CoreError::TooFewPhotons
            | CoreError::SpreadTooShort
            | CoreError::MaxIterationsReached => Disposition::FlagsExtent,
            CoreError::PostDropped(_) | CoreError::GranuleName(_) | CoreError::Config(_) => {
                Disposition::AbortsBeam
            }
        }
    }

    /// The taxonomy code carried on `ExceptionRecord` (§7, §11).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Timeout(_) => "TIMEOUT",
            CoreError::DoesNotExist(_) => "DOES_NOT_EXIST",
            CoreError::EmptySubset => "EMPTY_SUBSET",
            CoreError::OutOfBounds { .. } => "OUT_OF_BOUNDS",
            CoreError::TooFewPhotons => "TOO_FEW_PHOTONS",
            CoreError::SpreadTooShort => "SPREAD_TOO_SHORT",
            CoreError::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            CoreError::PostDropped(_) => "POST_DROPPED",
            CoreError::GranuleName(_) => "GRANULE_NAME",
            CoreError::Config(_) => "CONFIG",
            CoreError::Read(_) => "READ_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_local_errors_abort_the_beam() {
        assert_eq!(CoreError::Timeout(5000).disposition(), Disposition::AbortsBeam);
        assert_eq!(
            CoreError::DoesNotExist("x".into()).disposition(),
            Disposition::AbortsBeam
        );
    }

    #[test]
    fn extent_local_errors_only_flag_the_extent() {
        assert_eq!(CoreError::TooFewPhotons.disposition(), Disposition::FlagsExtent);
        assert_eq!(CoreError::SpreadTooShort.disposition(), Disposition::FlagsExtent);
        assert_eq!(
            CoreError::OutOfBounds { i0: -1, i1: 2, n: 10 }.disposition(),
            Disposition::FlagsExtent
        );
    }

    #[test]
    fn empty_subset_is_not_an_abort() {
        assert_eq!(CoreError::EmptySubset.disposition(), Disposition::Terminal);
    }
}
