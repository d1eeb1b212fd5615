//! Outbound record model (§6) and the 64-bit extent ID codec (§3).
//!
//! All numeric fields are native little-endian; field order below is the
//! wire order. Serialization is hand-rolled with `byteorder` rather than a
//! derive macro because the layout is a published contract (§6) that must
//! stay bit-stable independent of struct field order in this crate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Two-bit tag distinguishing an extent-record ID from its derived
/// elevation-record ID for the same extent (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Photons = 0b00,
    Elevation = 0b01,
    Index = 0b10,
    Exception = 0b11,
}

impl RecordKind {
    fn from_bits(bits: u64) -> Self {
        match bits {
            0b00 => RecordKind::Photons,
            0b01 => RecordKind::Elevation,
            0b10 => RecordKind::Index,
            _ => RecordKind::Exception,
        }
    }
}

/// 64-bit extent identifier, bit-exact per §3:
/// `rgt(12) | cycle(16) | region(4) | track(2) | pair(2) | counter(26) | kind(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtentId(pub u64);

const RGT_SHIFT: u32 = 52;
const CYCLE_SHIFT: u32 = 36;
const REGION_SHIFT: u32 = 32;
const TRACK_SHIFT: u32 = 30;
const PAIR_SHIFT: u32 = 28;
const COUNTER_SHIFT: u32 = 2;

const RGT_MASK: u64 = 0xFFF;
const CYCLE_MASK: u64 = 0xFFFF;
const REGION_MASK: u64 = 0xF;
const TRACK_MASK: u64 = 0x3;
const PAIR_MASK: u64 = 0x3;
const COUNTER_MASK: u64 = 0x3FF_FFFF;
const KIND_MASK: u64 = 0x3;

impl ExtentId {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rgt: u16,
        cycle: u16,
        region: u8,
        track: u8,
        pair: u8,
        counter: u32,
        kind: RecordKind,
    ) -> Self {
        let bits = ((rgt as u64 & RGT_MASK) << RGT_SHIFT)
            | ((cycle as u64 & CYCLE_MASK) << CYCLE_SHIFT)
            | ((region as u64 & REGION_MASK) << REGION_SHIFT)
            | ((track as u64 & TRACK_MASK) << TRACK_SHIFT)
            | ((pair as u64 & PAIR_MASK) << PAIR_SHIFT)
            | ((counter as u64 & COUNTER_MASK) << COUNTER_SHIFT)
            | (kind as u64 & KIND_MASK);
        ExtentId(bits)
    }

    /// Derive the elevation-record ID for the same extent (swaps the kind
    /// tag, leaves every other field untouched).
    pub fn as_elevation(&self) -> ExtentId {
        ExtentId((self.0 & !KIND_MASK) | RecordKind::Elevation as u64)
    }

    pub fn rgt(&self) -> u16 {
        ((self.0 >> RGT_SHIFT) & RGT_MASK) as u16
    }
    pub fn cycle(&self) -> u16 {
        ((self.0 >> CYCLE_SHIFT) & CYCLE_MASK) as u16
    }
    pub fn region(&self) -> u8 {
        ((self.0 >> REGION_SHIFT) & REGION_MASK) as u8
    }
    pub fn track(&self) -> u8 {
        ((self.0 >> TRACK_SHIFT) & TRACK_MASK) as u8
    }
    pub fn pair(&self) -> u8 {
        ((self.0 >> PAIR_SHIFT) & PAIR_MASK) as u8
    }
    pub fn counter(&self) -> u32 {
        ((self.0 >> COUNTER_SHIFT) & COUNTER_MASK) as u32
    }
    pub fn kind(&self) -> RecordKind {
        RecordKind::from_bits(self.0 & KIND_MASK)
    }
}

/// A single ATL03 photon as carried in `atl03rec.photons` (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonRecord {
    pub delta_time: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub x_atc: f64,
    pub y_atc: f64,
    pub height: f64,
    pub atl08_class: u8,
    pub atl03_cnf: i8,
    pub quality_ph: i8,
    pub yapc_score: u8,
}

impl PhotonRecord {
    pub const WIRE_LEN: usize = 8 * 6 + 1 + 1 + 1 + 1;

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_f64::<LittleEndian>(self.delta_time)?;
        w.write_f64::<LittleEndian>(self.latitude)?;
        w.write_f64::<LittleEndian>(self.longitude)?;
        w.write_f64::<LittleEndian>(self.x_atc)?;
        w.write_f64::<LittleEndian>(self.y_atc)?;
        w.write_f64::<LittleEndian>(self.height)?;
        w.write_u8(self.atl08_class)?;
        w.write_i8(self.atl03_cnf)?;
        w.write_i8(self.quality_ph)?;
        w.write_u8(self.yapc_score)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(PhotonRecord {
            delta_time: r.read_f64::<LittleEndian>()?,
            latitude: r.read_f64::<LittleEndian>()?,
            longitude: r.read_f64::<LittleEndian>()?,
            x_atc: r.read_f64::<LittleEndian>()?,
            y_atc: r.read_f64::<LittleEndian>()?,
            height: r.read_f64::<LittleEndian>()?,
            atl08_class: r.read_u8()?,
            atl03_cnf: r.read_i8()?,
            quality_ph: r.read_i8()?,
            yapc_score: r.read_u8()?,
        })
    }
}

/// `pflags` bits shared by extent and elevation records (§7 taxonomy).
///
/// A small hand-rolled bitset rather than a `bitflags!` macro: the flag set
/// is fixed and tiny, and this keeps the dependency footprint aligned with
/// the teacher crate's stack instead of pulling in a dedicated bitflag crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PFlags(u16);

impl PFlags {
    pub const OUT_OF_BOUNDS: PFlags = PFlags(0b0000_0001);
    pub const TOO_FEW_PHOTONS: PFlags = PFlags(0b0000_0010);
    pub const SPREAD_TOO_SHORT: PFlags = PFlags(0b0000_0100);
    pub const MAX_ITERATIONS_REACHED: PFlags = PFlags(0b0000_1000);
    /// Extent failed §4.1 validity but was forwarded anyway (`pass_invalid`).
    pub const INVALID_EXTENT: PFlags = PFlags(0b0001_0000);
    pub const TRUNCATED_MULTI_CROSS: PFlags = PFlags(0b0010_0000);

    pub const fn empty() -> Self {
        PFlags(0)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u16) -> Self {
        PFlags(bits)
    }

    pub fn contains(&self, other: PFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: PFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PFlags {
    type Output = PFlags;
    fn bitor(self, rhs: PFlags) -> PFlags {
        PFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PFlags {
    fn bitor_assign(&mut self, rhs: PFlags) {
        self.0 |= rhs.0;
    }
}

/// `atl03rec`: one extent's worth of filtered photons for one beam (§6).
#[derive(Debug, Clone)]
pub struct ExtentRecord {
    pub extent_id: ExtentId,
    pub track: u8,
    pub pair: u8,
    pub sc_orient: u8,
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub segment_id: u32,
    pub segment_distance: f64,
    pub extent_length: f64,
    pub spacecraft_velocity: f32,
    pub background_rate: f64,
    pub photon_count: u32,
    pub pflags: PFlags,
    pub photons: Vec<PhotonRecord>,
}

impl ExtentRecord {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.extent_id.0)?;
        w.write_u8(self.track)?;
        w.write_u8(self.pair)?;
        w.write_u8(self.sc_orient)?;
        w.write_u16::<LittleEndian>(self.rgt)?;
        w.write_u16::<LittleEndian>(self.cycle)?;
        w.write_u8(self.region)?;
        w.write_u32::<LittleEndian>(self.segment_id)?;
        w.write_f64::<LittleEndian>(self.segment_distance)?;
        w.write_f64::<LittleEndian>(self.extent_length)?;
        w.write_f32::<LittleEndian>(self.spacecraft_velocity)?;
        w.write_f64::<LittleEndian>(self.background_rate)?;
        w.write_u32::<LittleEndian>(self.photon_count)?;
        w.write_u16::<LittleEndian>(self.pflags.bits())?;
        for p in &self.photons {
            p.write(w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.photons.len() * PhotonRecord::WIRE_LEN);
        self.write(&mut buf).expect("writing to a Vec never fails");
        buf
    }

    pub fn read(bytes: &[u8]) -> io::Result<Self> {
        let mut r = Cursor::new(bytes);
        let extent_id = ExtentId(r.read_u64::<LittleEndian>()?);
        let track = r.read_u8()?;
        let pair = r.read_u8()?;
        let sc_orient = r.read_u8()?;
        let rgt = r.read_u16::<LittleEndian>()?;
        let cycle = r.read_u16::<LittleEndian>()?;
        let region = r.read_u8()?;
        let segment_id = r.read_u32::<LittleEndian>()?;
        let segment_distance = r.read_f64::<LittleEndian>()?;
        let extent_length = r.read_f64::<LittleEndian>()?;
        let spacecraft_velocity = r.read_f32::<LittleEndian>()?;
        let background_rate = r.read_f64::<LittleEndian>()?;
        let photon_count = r.read_u32::<LittleEndian>()?;
        let pflags = PFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?);
        let mut photons = Vec::with_capacity(photon_count as usize);
        for _ in 0..photon_count {
            photons.push(PhotonRecord::read(&mut r)?);
        }
        Ok(ExtentRecord {
            extent_id,
            track,
            pair,
            sc_orient,
            rgt,
            cycle,
            region,
            segment_id,
            segment_distance,
            extent_length,
            spacecraft_velocity,
            background_rate,
            photon_count,
            pflags,
            photons,
        })
    }
}

/// `atl06rec.elevation` (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationRecord {
    pub extent_id: ExtentId,
    pub segment_id: u32,
    pub rgt: u16,
    pub cycle: u16,
    pub region: u8,
    pub spot: u8,
    pub gt: u8,
    pub time_ns: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub h_mean: f64,
    pub dh_fit_dx: f32,
    pub h_sigma: f64,
    pub window_height: f32,
    pub rms_misfit: f32,
    pub x_atc: f64,
    pub y_atc: f32,
    pub n_fit_photons: i32,
    pub pflags: PFlags,
    pub iterations: u16,
}

impl ElevationRecord {
    pub const WIRE_LEN: usize = 8 + 4 + 2 + 2 + 1 + 1 + 1 + 8 + 8 + 8 + 8 + 4 + 8 + 4 + 4 + 8 + 4 + 4 + 2 + 2;

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.extent_id.0)?;
        w.write_u32::<LittleEndian>(self.segment_id)?;
        w.write_u16::<LittleEndian>(self.rgt)?;
        w.write_u16::<LittleEndian>(self.cycle)?;
        w.write_u8(self.region)?;
        w.write_u8(self.spot)?;
        w.write_u8(self.gt)?;
        w.write_i64::<LittleEndian>(self.time_ns)?;
        w.write_f64::<LittleEndian>(self.latitude)?;
        w.write_f64::<LittleEndian>(self.longitude)?;
        w.write_f64::<LittleEndian>(self.h_mean)?;
        w.write_f32::<LittleEndian>(self.dh_fit_dx)?;
        w.write_f64::<LittleEndian>(self.h_sigma)?;
        w.write_f32::<LittleEndian>(self.window_height)?;
        w.write_f32::<LittleEndian>(self.rms_misfit)?;
        w.write_f64::<LittleEndian>(self.x_atc)?;
        w.write_f32::<LittleEndian>(self.y_atc)?;
        w.write_i32::<LittleEndian>(self.n_fit_photons)?;
        w.write_u16::<LittleEndian>(self.pflags.bits())?;
        w.write_u16::<LittleEndian>(self.iterations)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(ElevationRecord {
            extent_id: ExtentId(r.read_u64::<LittleEndian>()?),
            segment_id: r.read_u32::<LittleEndian>()?,
            rgt: r.read_u16::<LittleEndian>()?,
            cycle: r.read_u16::<LittleEndian>()?,
            region: r.read_u8()?,
            spot: r.read_u8()?,
            gt: r.read_u8()?,
            time_ns: r.read_i64::<LittleEndian>()?,
            latitude: r.read_f64::<LittleEndian>()?,
            longitude: r.read_f64::<LittleEndian>()?,
            h_mean: r.read_f64::<LittleEndian>()?,
            dh_fit_dx: r.read_f32::<LittleEndian>()?,
            h_sigma: r.read_f64::<LittleEndian>()?,
            window_height: r.read_f32::<LittleEndian>()?,
            rms_misfit: r.read_f32::<LittleEndian>()?,
            x_atc: r.read_f64::<LittleEndian>()?,
            y_atc: r.read_f32::<LittleEndian>()?,
            n_fit_photons: r.read_i32::<LittleEndian>()?,
            pflags: PFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            iterations: r.read_u16::<LittleEndian>()?,
        })
    }
}

/// `atl06rec`: a fixed-capacity batch of elevation records (§4.2 "Batching
/// & output"). Capacity is `BATCH_SIZE`; the backing `Vec` is resized
/// in-place and handed to the publish queue by reference (§9 "Batch
/// ownership") rather than copied.
#[derive(Debug, Clone, Default)]
pub struct ElevationBatch {
    pub elevations: Vec<ElevationRecord>,
}

impl ElevationBatch {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.elevations.len() * ElevationRecord::WIRE_LEN);
        for e in &self.elevations {
            e.write(&mut buf).expect("writing to a Vec never fails");
        }
        buf
    }
}

/// `ancfrec.field` (§6): one interpolated ancillary value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AncField {
    pub anc_type: u8,
    pub field_index: u8,
    pub data_type: u8,
    pub value: f64,
}

/// `ancfrec` (§6): per-extent batch of interpolated ancillary fields.
#[derive(Debug, Clone)]
pub struct AncRecord {
    pub extent_id: ExtentId,
    pub fields: Vec<AncField>,
}

impl AncRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.fields.len() * 11);
        buf.write_u64::<LittleEndian>(self.extent_id.0).unwrap();
        buf.write_u32::<LittleEndian>(self.fields.len() as u32).unwrap();
        for f in &self.fields {
            buf.write_u8(f.anc_type).unwrap();
            buf.write_u8(f.field_index).unwrap();
            buf.write_u8(f.data_type).unwrap();
            buf.write_f64::<LittleEndian>(f.value).unwrap();
        }
        buf
    }
}

/// `ancerec` (§6): variable-length per-photon ancillary field payload for
/// one extent. Values are stored as `f64` even for integral source types
/// (§9 open question, resolved).
#[derive(Debug, Clone)]
pub struct AncPhotonRecord {
    pub extent_id: ExtentId,
    pub field_index: u8,
    pub values: Vec<f64>,
}

impl AncPhotonRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13 + self.values.len() * 8);
        buf.write_u64::<LittleEndian>(self.extent_id.0).unwrap();
        buf.write_u8(self.field_index).unwrap();
        buf.write_u32::<LittleEndian>(self.values.len() as u32).unwrap();
        for v in &self.values {
            buf.write_f64::<LittleEndian>(*v).unwrap();
        }
        buf
    }
}

/// `atl03rec.index` (§4.5, §6): per-granule coverage summary from the
/// indexer.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub name: String,
    pub t0: f64,
    pub t1: f64,
    pub lat0: f64,
    pub lon0: f64,
    pub lat1: f64,
    pub lon1: f64,
    pub cycle: u32,
    pub rgt: u32,
}

impl IndexRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut buf = Vec::with_capacity(4 + name_bytes.len() + 8 * 6 + 8);
        buf.write_u32::<LittleEndian>(name_bytes.len() as u32).unwrap();
        buf.extend_from_slice(name_bytes);
        buf.write_f64::<LittleEndian>(self.t0).unwrap();
        buf.write_f64::<LittleEndian>(self.t1).unwrap();
        buf.write_f64::<LittleEndian>(self.lat0).unwrap();
        buf.write_f64::<LittleEndian>(self.lon0).unwrap();
        buf.write_f64::<LittleEndian>(self.lat1).unwrap();
        buf.write_f64::<LittleEndian>(self.lon1).unwrap();
        buf.write_u32::<LittleEndian>(self.cycle).unwrap();
        buf.write_u32::<LittleEndian>(self.rgt).unwrap();
        buf
    }
}

/// `{level, code, message, resource}` (§7, §11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub level: ExceptionLevel,
    pub code: String,
    pub message: String,
    pub resource: String,
}

impl ExceptionRecord {
    pub fn from_error(resource: &str, err: &crate::error::CoreError) -> Self {
        ExceptionRecord {
            level: ExceptionLevel::Critical,
            code: err.code().to_string(),
            message: err.to_string(),
            resource: resource.to_string(),
        }
    }
}
