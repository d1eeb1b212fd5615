//! ATL03 stage: photon-to-extent stream builder (§4.1), YAPC photon
//! weighting (§4.3), and the ATL08 classification lockstep join (§4.1
//! filtering rule 4, §9).

pub mod atl08;
pub mod datasets;
pub mod extent_builder;
pub mod worker;
pub mod yapc;

pub use extent_builder::{BuiltExtent, ExtentBuilderConfig};
