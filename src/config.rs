//! Request parameter surface (§6 "Configuration surface (enumerated)").
//!
//! Mirrors how this codebase's ingest commands build up a typed config
//! struct from CLI flags / environment and pass it down by reference
//! rather than threading individual primitives through every call site.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::geometry::RegionFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceType {
    Dynamic,
    Land,
    Ocean,
    SeaIce,
    LandIce,
    InlandWater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Atl03Confidence {
    Tep,
    NotConsidered,
    Background,
    Within10m,
    Low,
    Medium,
    High,
}

impl Atl03Confidence {
    /// Wire code as carried in `signal_conf_ph` (§6 "Configuration surface").
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(Atl03Confidence::Tep),
            0 => Some(Atl03Confidence::NotConsidered),
            1 => Some(Atl03Confidence::Background),
            2 => Some(Atl03Confidence::Within10m),
            3 => Some(Atl03Confidence::Low),
            4 => Some(Atl03Confidence::Medium),
            5 => Some(Atl03Confidence::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityPh {
    Nominal,
    Afterpulse,
    ImpulseResponse,
    Tep,
}

impl QualityPh {
    /// Wire code as carried in `quality_ph`.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(QualityPh::Nominal),
            1 => Some(QualityPh::Afterpulse),
            2 => Some(QualityPh::ImpulseResponse),
            3 => Some(QualityPh::Tep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Atl08Class {
    Noise,
    Ground,
    Canopy,
    TopOfCanopy,
    Unclassified,
}

impl Atl08Class {
    /// Wire code as carried in the ATL08 companion granule's classification
    /// column. A photon with no ATL08 match at all (rather than a `Noise`
    /// match) is `Unclassified`, assigned by the lockstep join itself, never
    /// by this mapping.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Atl08Class::Ground,
            2 | 3 => Atl08Class::Canopy,
            4 => Atl08Class::TopOfCanopy,
            _ => Atl08Class::Noise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Track {
    One,
    Two,
    Three,
    All,
}

/// One of the six ICESat-2 ground tracks: (track ∈ {1,2,3}, pair ∈ {L,R}).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Beam {
    pub track: u8,
    pub pair: Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pair {
    L,
    R,
}

impl Beam {
    pub const ALL: [Beam; 6] = [
        Beam { track: 1, pair: Pair::L },
        Beam { track: 1, pair: Pair::R },
        Beam { track: 2, pair: Pair::L },
        Beam { track: 2, pair: Pair::R },
        Beam { track: 3, pair: Pair::L },
        Beam { track: 3, pair: Pair::R },
    ];

    pub fn label(&self) -> String {
        format!("gt{}{}", self.track, if self.pair == Pair::L { 'l' } else { 'r' })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YapcVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YapcParms {
    pub score: u8,
    pub version: YapcVersion,
    pub knn: u32,
    pub min_knn: u32,
    pub win_h: f64,
    pub win_x: f64,
}

impl Default for YapcParms {
    fn default() -> Self {
        Self {
            score: 0,
            version: YapcVersion::V3,
            knn: 0,
            min_knn: 5,
            win_h: 6.0,
            win_x: 15.0,
        }
    }
}

/// Processing stages that may be enabled independently (§6 `stages`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stages {
    pub lsf: bool,
    pub atl08: bool,
    pub yapc: bool,
    pub phoreal: bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self { lsf: true, atl08: false, yapc: false, phoreal: false }
    }
}

/// The full request parameter surface accepted by the photon-stream builder
/// and ATL06 dispatcher. Constructed either from a JSON/TOML request body or
/// from CLI flags (see `src/main.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestParams {
    pub surface_type: SurfaceType,
    pub atl03_cnf: HashSet<Atl03Confidence>,
    pub quality_ph: HashSet<QualityPh>,
    pub atl08_class: HashSet<Atl08Class>,
    pub beams: Vec<Beam>,
    pub track: Track,
    pub stages: Stages,
    pub yapc: YapcParms,

    /// Minimum along-track spread of retained photons (`ats`), meters.
    pub min_along_track_spread: f64,
    /// Minimum photon count (`cnt`).
    pub min_photon_count: u32,
    /// Extent length (`len`), meters, or segment count if `dist_in_seg`.
    pub extent_length: f64,
    /// Extent step (`res`), meters, or segment count if `dist_in_seg`.
    pub extent_step: f64,
    /// Max fit iterations (`maxi`).
    pub max_iterations: u32,
    /// Minimum window height (`H_min_win`), meters.
    pub min_window: f64,
    /// Maximum robust-dispersion clamp (`sigma_r_max`), meters.
    pub max_robust_dispersion: f64,
    pub pass_invalid: bool,
    pub dist_in_seg: bool,

    #[serde(default)]
    pub region: Option<RegionFilter>,

    #[serde(default)]
    pub anc_segment_fields: Vec<String>,
    #[serde(default)]
    pub anc_photon_fields: Vec<String>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            surface_type: SurfaceType::Land,
            atl03_cnf: [
                Atl03Confidence::Medium,
                Atl03Confidence::High,
            ]
            .into_iter()
            .collect(),
            quality_ph: [QualityPh::Nominal].into_iter().collect(),
            atl08_class: HashSet::new(),
            beams: Beam::ALL.to_vec(),
            track: Track::All,
            stages: Stages::default(),
            yapc: YapcParms::default(),
            min_along_track_spread: 20.0,
            min_photon_count: 10,
            extent_length: 40.0,
            extent_step: 20.0,
            max_iterations: 5,
            min_window: 3.0,
            max_robust_dispersion: 5.0,
            pass_invalid: false,
            dist_in_seg: false,
            region: None,
            anc_segment_fields: Vec::new(),
            anc_photon_fields: Vec::new(),
        }
    }
}

impl RequestParams {
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn from_toml(body: &str) -> Result<Self> {
        toml::from_str(body).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.extent_length <= 0.0 || self.extent_step <= 0.0 {
            return Err(CoreError::Config(
                "extent length and step must be positive".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CoreError::Config("max_iterations must be >= 1".into()));
        }
        if self.beams.is_empty() {
            return Err(CoreError::Config("at least one beam must be enabled".into()));
        }
        Ok(())
    }
}
