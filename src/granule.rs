//! Granule naming, identity parsing, and beam→spot/ground-track mapping
//! (§4.5, §9, §11 "Granule name parsing", "Spot number / ground-track mapping").
//!
//! Grounded on `Icesat2Parms::getSpotNumber` / `getGroundTrack` in
//! `datasets/icesat2/plugin/Icesat2Parms.cpp`: a fixed lookup table keyed by
//! (spacecraft orientation, track, pair), not a formula.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::{Beam, Pair};
use crate::error::{CoreError, Result};

/// Spacecraft orientation: determines whether the strong/weak beam
/// assignment within each pair is swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScOrient {
    Backward,
    Forward,
    Transition,
}

impl ScOrient {
    pub fn from_raw(v: i8) -> Self {
        match v {
            0 => ScOrient::Backward,
            1 => ScOrient::Forward,
            _ => ScOrient::Transition,
        }
    }
}

/// Ground-track label, matching the wire encoding used by downstream
/// formatters (1..=6 for gt1l..gt3r).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundTrack {
    Gt1L = 1,
    Gt1R = 2,
    Gt2L = 3,
    Gt2R = 4,
    Gt3L = 5,
    Gt3R = 6,
}

/// `(spacecraft_orientation, track, pair) → spot (1..=6)`.
///
/// Forward orientation reverses the track order relative to backward;
/// within a track, pair order is unchanged. This mirrors the original's
/// `#if 0`-preserved-for-reference lookup exactly (it was inlined in the
/// header for the hot path but the logic is unchanged).
pub fn spot_number(sc_orient: ScOrient, track: u8, pair: Pair) -> u8 {
    let pair_offset = match pair {
        Pair::L => 0,
        Pair::R => 1,
    };
    match sc_orient {
        ScOrient::Backward | ScOrient::Transition => match track {
            1 => 1 + pair_offset,
            2 => 3 + pair_offset,
            3 => 5 + pair_offset,
            _ => 0,
        },
        ScOrient::Forward => match track {
            1 => 6 - pair_offset,
            2 => 4 - pair_offset,
            3 => 2 - pair_offset,
            _ => 0,
        },
    }
}

/// `(track, pair) → ground_track label`. Unlike spot number, the ground
/// track label is orientation-independent (gt1l is always gt1l).
pub fn ground_track(track: u8, pair: Pair) -> GroundTrack {
    match (track, pair) {
        (1, Pair::L) => GroundTrack::Gt1L,
        (1, Pair::R) => GroundTrack::Gt1R,
        (2, Pair::L) => GroundTrack::Gt2L,
        (2, Pair::R) => GroundTrack::Gt2R,
        (3, Pair::L) => GroundTrack::Gt3L,
        (3, Pair::R) => GroundTrack::Gt3R,
        _ => unreachable!("track must be 1..=3"),
    }
}

pub fn beam_spot(sc_orient: ScOrient, beam: Beam) -> u8 {
    spot_number(sc_orient, beam.track, beam.pair)
}

pub fn beam_ground_track(beam: Beam) -> GroundTrack {
    ground_track(beam.track, beam.pair)
}

/// Orbit identity decoded from an ATL03 granule filename (§11):
/// `ATL03_{yyyymmdd}{hhmmss}_{rgt:4}{cycle:2}{region:2}_{version:3}{revision:2}.h5`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GranuleId {
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub version: u16,
    pub revision: u8,
}

fn granule_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^ATL03_(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})_(\d{4})(\d{2})(\d{2})_(\d{3})(\d{2})\.h5$",
        )
        .expect("granule regex is a compile-time constant")
    })
}

/// Parse an ATL03 granule filename into its orbit identity and acquisition
/// timestamp. Round-trips with [`GranuleId::filename`] (§8 round-trip law).
pub fn parse_granule_name(name: &str) -> Result<GranuleId> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let caps = granule_regex()
        .captures(file_name)
        .ok_or_else(|| CoreError::GranuleName(name.to_string()))?;

    let field = |i: usize| -> u32 { caps[i].parse().expect("regex guarantees digits") };

    Ok(GranuleId {
        year: field(1) as u16,
        month: field(2) as u8,
        day: field(3) as u8,
        hour: field(4) as u8,
        minute: field(5) as u8,
        second: field(6) as u8,
        rgt: field(7) as u16,
        cycle: field(8) as u16,
        region: field(9) as u8,
        version: field(10) as u16,
        revision: field(11) as u8,
    })
}

impl GranuleId {
    /// Re-render the filename this identity was parsed from (sans path).
    pub fn filename(&self) -> String {
        format!(
            "ATL03_{:04}{:02}{:02}{:02}{:02}{:02}_{:04}{:02}{:02}_{:03}{:02}.h5",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.rgt,
            self.cycle,
            self.region,
            self.version,
            self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_granule_name() {
        let id = parse_granule_name("ATL03_20200101001232_00010101_005_01.h5").unwrap();
        assert_eq!(id.rgt, 1);
        assert_eq!(id.cycle, 1);
        assert_eq!(id.region, 1);
        assert_eq!(id.year, 2020);
    }

    #[test]
    fn rejects_a_malformed_name() {
        assert!(parse_granule_name("not_a_granule.h5").is_err());
    }

    #[test]
    fn round_trips_name_to_id_and_back() {
        let name = "ATL03_20230615123045_12340599_006_01.h5";
        let id = parse_granule_name(name).unwrap();
        assert_eq!(id.filename(), name);
    }

    #[test]
    fn accepts_a_full_path_and_ignores_the_directory() {
        let id = parse_granule_name("/data/icesat2/ATL03_20200101001232_00010101_005_01.h5").unwrap();
        assert_eq!(id.rgt, 1);
    }

    #[test]
    fn spot_number_swaps_on_forward_orientation() {
        assert_eq!(spot_number(ScOrient::Backward, 1, Pair::L), 1);
        assert_eq!(spot_number(ScOrient::Backward, 1, Pair::R), 2);
        assert_eq!(spot_number(ScOrient::Forward, 1, Pair::L), 6);
        assert_eq!(spot_number(ScOrient::Forward, 1, Pair::R), 5);
        assert_eq!(spot_number(ScOrient::Forward, 3, Pair::R), 1);
    }

    #[test]
    fn ground_track_is_orientation_independent() {
        assert_eq!(ground_track(2, Pair::L) as u8, GroundTrack::Gt2L as u8);
    }
}
