//! ATL03 (and ATL08/ATL09 companion) dataset path layout.
//!
//! The lazy reader addresses columns by path string (§3 "Granule"); this
//! module centralizes the paths this crate reads so a beam worker never
//! hand-builds a format string inline. `signal_conf_ph` is modeled as one
//! dataset per surface type rather than a single 2-D column (§9
//! "Polymorphism over lazy arrays" only requires 1-D/2-D typed arrays with
//! an `as_doubles` adapter; splitting the surface-type axis into separate
//! paths keeps every dataset here 1-D, which is all the builder needs).

use crate::config::{Beam, SurfaceType};

pub fn beam_label(beam: Beam) -> String {
    beam.label()
}

pub fn reference_photon_lat(beam: Beam) -> String {
    format!("/{}/geolocation/reference_photon_lat", beam_label(beam))
}

pub fn reference_photon_lon(beam: Beam) -> String {
    format!("/{}/geolocation/reference_photon_lon", beam_label(beam))
}

pub fn segment_ph_cnt(beam: Beam) -> String {
    format!("/{}/geolocation/segment_ph_cnt", beam_label(beam))
}

pub fn segment_dist_x(beam: Beam) -> String {
    format!("/{}/geolocation/segment_dist_x", beam_label(beam))
}

pub fn segment_id(beam: Beam) -> String {
    format!("/{}/geolocation/segment_id", beam_label(beam))
}

pub fn segment_delta_time(beam: Beam) -> String {
    format!("/{}/geolocation/delta_time", beam_label(beam))
}

/// Per-segment spacecraft velocity magnitude (m/s). The real ATL03
/// product carries a 3-component velocity vector; this crate's lazy
/// reader only models 1-D columns (§9), so the magnitude is treated as a
/// precomputed per-segment scalar column (documented simplification, see
/// DESIGN.md).
pub fn segment_velocity(beam: Beam) -> String {
    format!("/{}/geolocation/velocity_sc", beam_label(beam))
}

pub fn segment_solar_elevation(beam: Beam) -> String {
    format!("/{}/geolocation/solar_elevation", beam_label(beam))
}

pub fn h_ph(beam: Beam) -> String {
    format!("/{}/heights/h_ph", beam_label(beam))
}

pub fn dist_ph_along(beam: Beam) -> String {
    format!("/{}/heights/dist_ph_along", beam_label(beam))
}

pub fn dist_ph_across(beam: Beam) -> String {
    format!("/{}/heights/dist_ph_across", beam_label(beam))
}

pub fn lat_ph(beam: Beam) -> String {
    format!("/{}/heights/lat_ph", beam_label(beam))
}

pub fn lon_ph(beam: Beam) -> String {
    format!("/{}/heights/lon_ph", beam_label(beam))
}

pub fn photon_delta_time(beam: Beam) -> String {
    format!("/{}/heights/delta_time", beam_label(beam))
}

pub fn quality_ph(beam: Beam) -> String {
    format!("/{}/heights/quality_ph", beam_label(beam))
}

pub fn weight_ph(beam: Beam) -> String {
    format!("/{}/heights/weight_ph", beam_label(beam))
}

/// One dataset per surface type, selected per §6 `surface_type` (§4.1
/// "Photon-level reads: signal_conf_ph (selected by surface_type)").
/// `Dynamic` has no column of its own in the real product; it is
/// resolved by the caller as the per-photon maximum confidence across
/// every fixed surface type (documented in DESIGN.md), so it has no
/// dataset path here.
pub fn signal_conf_ph(beam: Beam, surface_type: SurfaceType) -> Option<String> {
    let suffix = match surface_type {
        SurfaceType::Dynamic => return None,
        SurfaceType::Land => "land",
        SurfaceType::Ocean => "ocean",
        SurfaceType::SeaIce => "sea_ice",
        SurfaceType::LandIce => "land_ice",
        SurfaceType::InlandWater => "inland_water",
    };
    Some(format!("/{}/heights/signal_conf_ph_{}", beam_label(beam), suffix))
}

/// All five fixed surface-type confidence columns, used to resolve
/// `SurfaceType::Dynamic` (§9 open question, resolved: per-photon max).
pub fn all_signal_conf_ph(beam: Beam) -> [String; 5] {
    [
        format!("/{}/heights/signal_conf_ph_land", beam_label(beam)),
        format!("/{}/heights/signal_conf_ph_ocean", beam_label(beam)),
        format!("/{}/heights/signal_conf_ph_sea_ice", beam_label(beam)),
        format!("/{}/heights/signal_conf_ph_land_ice", beam_label(beam)),
        format!("/{}/heights/signal_conf_ph_inland_water", beam_label(beam)),
    ]
}

pub fn bckgrd_delta_time(beam: Beam) -> String {
    format!("/{}/bckgrd_atlas/delta_time", beam_label(beam))
}

pub fn bckgrd_rate(beam: Beam) -> String {
    format!("/{}/bckgrd_atlas/bckgrd_rate", beam_label(beam))
}

pub const SC_ORIENT: &str = "/orbit_info/sc_orient";
pub const ATLAS_SDP_GPS_EPOCH: &str = "/ancillary_data/atlas_sdp_gps_epoch";
pub const START_DELTA_TIME: &str = "/ancillary_data/start_delta_time";
pub const END_DELTA_TIME: &str = "/ancillary_data/end_delta_time";
pub const CYCLE_NUMBER: &str = "/orbit_info/cycle_number";
pub const RGT: &str = "/orbit_info/rgt";

/// ATL08 companion granule paths (§4.1 filtering rule 4, §9 lockstep walk).
pub mod atl08 {
    use crate::config::Beam;

    pub fn classed_pc_flag(beam: Beam) -> String {
        format!("/{}/signal_photons/classed_pc_flag", super::beam_label(beam))
    }
    pub fn segment_id(beam: Beam) -> String {
        format!("/{}/signal_photons/segment_id", super::beam_label(beam))
    }
    pub fn ph_in_seg(beam: Beam) -> String {
        format!("/{}/signal_photons/ph_in_seg", super::beam_label(beam))
    }
    pub fn ph_h(beam: Beam) -> String {
        format!("/{}/signal_photons/ph_h", super::beam_label(beam))
    }
}
