//! Typed views of the leaf boxes this crate edits.
//!
//! Each record parses from its payload (the bytes after the box header) and
//! writes itself back with [`bytes::BufMut`]. Optional fields are controlled
//! by the `flags` word in both directions: clearing a flag drops the field
//! on the next serialize.

use bytes::{Buf, BufMut, BytesMut};
use mss_core::{Error, Result};

use super::kind::BoxKind;

// ---------------------------------------------------------------------------
// Payload reading helpers
// ---------------------------------------------------------------------------

/// Bounds-checked big-endian reader over a box payload.
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    kind: BoxKind,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8], kind: BoxKind) -> Self {
        Self { buf, kind }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::malformed(format!(
                "{} payload truncated: need {n} bytes, have {}",
                self.kind,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn u24(&mut self) -> Result<u32> {
        self.need(3)?;
        Ok(self.buf.get_uint(3) as u32)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Version byte and 24-bit flags.
    pub(crate) fn fullbox(&mut self) -> Result<(u8, u32)> {
        let val = self.u32()?;
        Ok(((val >> 24) as u8, val & 0x00FF_FFFF))
    }
}

/// Write a full box header (version + flags).
pub(crate) fn put_fullbox(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

// ---------------------------------------------------------------------------
// tfhd
// ---------------------------------------------------------------------------

/// Track fragment header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tfhd {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: u64,
    pub sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Tfhd {
    pub const BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
    pub const DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
    pub const DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;
    pub const DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let track_id = r.u32()?;
        let mut tfhd = Tfhd {
            version,
            flags,
            track_id,
            ..Default::default()
        };
        if flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            tfhd.base_data_offset = r.u64()?;
        }
        if flags & Self::SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            tfhd.sample_description_index = r.u32()?;
        }
        if flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            tfhd.default_sample_duration = r.u32()?;
        }
        if flags & Self::DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            tfhd.default_sample_size = r.u32()?;
        }
        if flags & Self::DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            tfhd.default_sample_flags = r.u32()?;
        }
        Ok(tfhd)
    }

    /// The default sample duration, when the header carries one.
    pub fn default_duration(&self) -> Option<u32> {
        (self.flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0)
            .then_some(self.default_sample_duration)
    }

    fn encoded_len(&self) -> u64 {
        let mut len = 8;
        if self.flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            len += 8;
        }
        for flag in [
            Self::SAMPLE_DESCRIPTION_INDEX_PRESENT,
            Self::DEFAULT_SAMPLE_DURATION_PRESENT,
            Self::DEFAULT_SAMPLE_SIZE_PRESENT,
            Self::DEFAULT_SAMPLE_FLAGS_PRESENT,
        ] {
            if self.flags & flag != 0 {
                len += 4;
            }
        }
        len
    }

    fn write(&self, buf: &mut BytesMut) {
        put_fullbox(buf, self.version, self.flags);
        buf.put_u32(self.track_id);
        if self.flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            buf.put_u64(self.base_data_offset);
        }
        if self.flags & Self::SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            buf.put_u32(self.sample_description_index);
        }
        if self.flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            buf.put_u32(self.default_sample_duration);
        }
        if self.flags & Self::DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            buf.put_u32(self.default_sample_size);
        }
        if self.flags & Self::DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            buf.put_u32(self.default_sample_flags);
        }
    }
}

// ---------------------------------------------------------------------------
// tfdt
// ---------------------------------------------------------------------------

/// Track fragment base media decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tfdt {
    pub version: u8,
    pub flags: u32,
    pub base_media_decode_time: u64,
}

impl Tfdt {
    /// A version-1 (64-bit) decode time box.
    pub fn new(base_media_decode_time: u64) -> Self {
        Self {
            version: 1,
            flags: 0,
            base_media_decode_time,
        }
    }

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let base_media_decode_time = if version == 1 {
            r.u64()?
        } else {
            r.u32()? as u64
        };
        Ok(Self {
            version,
            flags,
            base_media_decode_time,
        })
    }

    /// Version actually written: a 32-bit box is widened when the time no
    /// longer fits.
    fn effective_version(&self) -> u8 {
        if self.version == 1 || self.base_media_decode_time > u32::MAX as u64 {
            1
        } else {
            0
        }
    }

    fn encoded_len(&self) -> u64 {
        if self.effective_version() == 1 {
            12
        } else {
            8
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        let version = self.effective_version();
        put_fullbox(buf, version, self.flags);
        if version == 1 {
            buf.put_u64(self.base_media_decode_time);
        } else {
            buf.put_u32(self.base_media_decode_time as u32);
        }
    }
}

// ---------------------------------------------------------------------------
// trun
// ---------------------------------------------------------------------------

/// One `trun` table row. Fields absent from the box read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrunSample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    /// Stored signed; version-0 boxes hold the same bits unsigned.
    pub composition_time_offset: i32,
}

/// Track run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trun {
    pub version: u8,
    pub flags: u32,
    pub data_offset: i32,
    pub first_sample_flags: u32,
    pub samples: Vec<TrunSample>,
}

impl Trun {
    pub const DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
    pub const SAMPLE_DURATION_PRESENT: u32 = 0x000100;
    pub const SAMPLE_SIZE_PRESENT: u32 = 0x000200;
    pub const SAMPLE_FLAGS_PRESENT: u32 = 0x000400;
    pub const SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT: u32 = 0x000800;

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let sample_count = r.u32()?;
        let data_offset = if flags & Self::DATA_OFFSET_PRESENT != 0 {
            r.i32()?
        } else {
            0
        };
        let first_sample_flags = if flags & Self::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            r.u32()?
        } else {
            0
        };

        let row_len = Self::row_len(flags);
        if (sample_count as u64) * row_len > r.remaining() as u64 {
            return Err(Error::malformed(format!(
                "trun declares {sample_count} samples but only {} bytes follow",
                r.remaining()
            )));
        }

        let mut samples = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let mut sample = TrunSample::default();
            if flags & Self::SAMPLE_DURATION_PRESENT != 0 {
                sample.duration = r.u32()?;
            }
            if flags & Self::SAMPLE_SIZE_PRESENT != 0 {
                sample.size = r.u32()?;
            }
            if flags & Self::SAMPLE_FLAGS_PRESENT != 0 {
                sample.flags = r.u32()?;
            }
            if flags & Self::SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT != 0 {
                sample.composition_time_offset = r.i32()?;
            }
            samples.push(sample);
        }

        Ok(Self {
            version,
            flags,
            data_offset,
            first_sample_flags,
            samples,
        })
    }

    /// Whether each row carries its own duration.
    pub fn has_sample_durations(&self) -> bool {
        self.flags & Self::SAMPLE_DURATION_PRESENT != 0
    }

    fn row_len(flags: u32) -> u64 {
        4 * (flags & 0x000F00).count_ones() as u64
    }

    fn encoded_len(&self) -> u64 {
        let mut len = 8;
        if self.flags & Self::DATA_OFFSET_PRESENT != 0 {
            len += 4;
        }
        if self.flags & Self::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            len += 4;
        }
        len + self.samples.len() as u64 * Self::row_len(self.flags)
    }

    fn write(&self, buf: &mut BytesMut) {
        put_fullbox(buf, self.version, self.flags);
        buf.put_u32(self.samples.len() as u32);
        if self.flags & Self::DATA_OFFSET_PRESENT != 0 {
            buf.put_i32(self.data_offset);
        }
        if self.flags & Self::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            buf.put_u32(self.first_sample_flags);
        }
        for sample in &self.samples {
            if self.flags & Self::SAMPLE_DURATION_PRESENT != 0 {
                buf.put_u32(sample.duration);
            }
            if self.flags & Self::SAMPLE_SIZE_PRESENT != 0 {
                buf.put_u32(sample.size);
            }
            if self.flags & Self::SAMPLE_FLAGS_PRESENT != 0 {
                buf.put_u32(sample.flags);
            }
            if self.flags & Self::SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT != 0 {
                buf.put_i32(sample.composition_time_offset);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// senc / PIFF sample encryption
// ---------------------------------------------------------------------------

/// IV length assumed when nothing in the fragment states one.
pub const DEFAULT_IV_SIZE: u8 = 8;

/// Per-track override carried by PIFF boxes with flag `0x1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEncryptionOverride {
    pub algorithm_id: u32,
    pub iv_size: u8,
    pub kid: [u8; 16],
}

/// One clear/protected byte range of a subsample-encrypted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsample {
    pub clear_bytes: u16,
    pub protected_bytes: u32,
}

/// Encryption parameters of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSample {
    pub iv: Vec<u8>,
    pub subsamples: Vec<Subsample>,
}

/// Body shared by the standard `senc` box and its PIFF predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEncryption {
    pub version: u8,
    pub flags: u32,
    pub track_override: Option<TrackEncryptionOverride>,
    /// Length of every IV in `samples`.
    pub iv_size: u8,
    pub samples: Vec<EncryptedSample>,
}

impl SampleEncryption {
    pub const OVERRIDE_TRACK_ENCRYPTION: u32 = 0x1;
    pub const USE_SUBSAMPLE_ENCRYPTION: u32 = 0x2;

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let track_override = if flags & Self::OVERRIDE_TRACK_ENCRYPTION != 0 {
            Some(TrackEncryptionOverride {
                algorithm_id: r.u24()?,
                iv_size: r.u8()?,
                kid: r.array::<16>()?,
            })
        } else {
            None
        };
        let sample_count = r.u32()?;
        let subsamples = flags & Self::USE_SUBSAMPLE_ENCRYPTION != 0;

        // The IV length lives in the track's `tenc` box, which a fragment
        // does not carry. Take the override when present, otherwise the
        // first common length that consumes the payload exactly.
        let candidates: Vec<u8> = match &track_override {
            Some(o) => vec![o.iv_size],
            None if sample_count == 0 => vec![DEFAULT_IV_SIZE],
            None => vec![DEFAULT_IV_SIZE, 16, 0],
        };

        let table = r.bytes(r.remaining())?;
        for iv_size in candidates {
            if let Some(samples) = Self::parse_samples(table, sample_count, iv_size, subsamples) {
                return Ok(Self {
                    version,
                    flags,
                    track_override,
                    iv_size,
                    samples,
                });
            }
        }

        Err(Error::malformed(format!(
            "sample encryption table of {} bytes does not fit {sample_count} samples",
            table.len()
        )))
    }

    fn parse_samples(
        table: &[u8],
        count: u32,
        iv_size: u8,
        subsamples: bool,
    ) -> Option<Vec<EncryptedSample>> {
        let mut r = PayloadReader::new(table, BoxKind::Senc);
        let mut samples = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let iv = r.bytes(iv_size as usize).ok()?.to_vec();
            let mut ranges = Vec::new();
            if subsamples {
                let entries = r.u16().ok()?;
                for _ in 0..entries {
                    ranges.push(Subsample {
                        clear_bytes: r.u16().ok()?,
                        protected_bytes: r.u32().ok()?,
                    });
                }
            }
            samples.push(EncryptedSample {
                iv,
                subsamples: ranges,
            });
        }
        (r.remaining() == 0).then_some(samples)
    }

    /// Whether each sample lists protected byte ranges.
    pub fn uses_subsamples(&self) -> bool {
        self.flags & Self::USE_SUBSAMPLE_ENCRYPTION != 0
    }

    /// Drop the PIFF-only override fields so the body is a valid `senc`.
    pub fn strip_override(&mut self) {
        self.track_override = None;
        self.flags &= !Self::OVERRIDE_TRACK_ENCRYPTION;
    }

    /// Auxiliary information size of each sample, as `saiz` records it.
    pub fn aux_info_sizes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .map(|s| {
                let size = if self.uses_subsamples() {
                    self.iv_size as usize + 6 * s.subsamples.len() + 2
                } else {
                    self.iv_size as usize
                };
                size.min(u8::MAX as usize) as u8
            })
            .collect()
    }

    /// Offset of the per-sample table from the start of the payload: the
    /// full-box header, any override fields, then `sample_count`.
    pub fn table_offset(&self) -> u64 {
        let mut offset = 4;
        if self.track_override.is_some() && self.flags & Self::OVERRIDE_TRACK_ENCRYPTION != 0 {
            offset += 20;
        }
        offset + 4
    }

    fn encoded_len(&self) -> u64 {
        let mut len = 8;
        if self.track_override.is_some() && self.flags & Self::OVERRIDE_TRACK_ENCRYPTION != 0 {
            len += 20;
        }
        for sample in &self.samples {
            len += self.iv_size as u64;
            if self.uses_subsamples() {
                len += 2 + 6 * sample.subsamples.len() as u64;
            }
        }
        len
    }

    fn write(&self, buf: &mut BytesMut) {
        let override_fields = self
            .track_override
            .as_ref()
            .filter(|_| self.flags & Self::OVERRIDE_TRACK_ENCRYPTION != 0);
        let flags = if override_fields.is_some() {
            self.flags
        } else {
            self.flags & !Self::OVERRIDE_TRACK_ENCRYPTION
        };

        put_fullbox(buf, self.version, flags);
        if let Some(o) = override_fields {
            buf.put_uint(o.algorithm_id as u64 & 0x00FF_FFFF, 3);
            buf.put_u8(o.iv_size);
            buf.put_slice(&o.kid);
        }
        buf.put_u32(self.samples.len() as u32);
        for sample in &self.samples {
            // IVs are always written at the declared size.
            let mut iv = sample.iv.clone();
            iv.resize(self.iv_size as usize, 0);
            buf.put_slice(&iv);
            if self.uses_subsamples() {
                buf.put_u16(sample.subsamples.len() as u16);
                for range in &sample.subsamples {
                    buf.put_u16(range.clear_bytes);
                    buf.put_u32(range.protected_bytes);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// saio / saiz
// ---------------------------------------------------------------------------

/// Sample auxiliary information offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saio {
    pub version: u8,
    pub flags: u32,
    pub aux_info_type: u32,
    pub aux_info_type_parameter: u32,
    pub offsets: Vec<u64>,
}

impl Saio {
    pub const AUX_INFO_TYPE_PRESENT: u32 = 0x1;

    /// A version-0 box with a single placeholder offset.
    pub fn single() -> Self {
        Self {
            version: 0,
            flags: 0,
            aux_info_type: 0,
            aux_info_type_parameter: 0,
            offsets: vec![0],
        }
    }

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let (aux_info_type, aux_info_type_parameter) = if flags & Self::AUX_INFO_TYPE_PRESENT != 0
        {
            (r.u32()?, r.u32()?)
        } else {
            (0, 0)
        };
        let entry_count = r.u32()?;
        let width = if version == 0 { 4u64 } else { 8 };
        if entry_count as u64 * width > r.remaining() as u64 {
            return Err(Error::malformed("saio entry table truncated"));
        }
        let mut offsets = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            offsets.push(if version == 0 { r.u32()? as u64 } else { r.u64()? });
        }
        Ok(Self {
            version,
            flags,
            aux_info_type,
            aux_info_type_parameter,
            offsets,
        })
    }

    fn effective_version(&self) -> u8 {
        if self.version == 1 || self.offsets.iter().any(|&o| o > u32::MAX as u64) {
            1
        } else {
            0
        }
    }

    fn encoded_len(&self) -> u64 {
        let mut len = 8;
        if self.flags & Self::AUX_INFO_TYPE_PRESENT != 0 {
            len += 8;
        }
        let width = if self.effective_version() == 0 { 4 } else { 8 };
        len + width * self.offsets.len() as u64
    }

    fn write(&self, buf: &mut BytesMut) {
        let version = self.effective_version();
        put_fullbox(buf, version, self.flags);
        if self.flags & Self::AUX_INFO_TYPE_PRESENT != 0 {
            buf.put_u32(self.aux_info_type);
            buf.put_u32(self.aux_info_type_parameter);
        }
        buf.put_u32(self.offsets.len() as u32);
        for &offset in &self.offsets {
            if version == 0 {
                buf.put_u32(offset as u32);
            } else {
                buf.put_u64(offset);
            }
        }
    }
}

/// Sample auxiliary information sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saiz {
    pub version: u8,
    pub flags: u32,
    pub aux_info_type: u32,
    pub aux_info_type_parameter: u32,
    /// Shared size for every sample; `0` means `sample_info_sizes` applies.
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    pub sample_info_sizes: Vec<u8>,
}

impl Saiz {
    pub const AUX_INFO_TYPE_PRESENT: u32 = 0x1;

    /// Build from per-sample sizes, collapsing to a shared default when
    /// every sample has the same size.
    pub fn from_sizes(sizes: Vec<u8>) -> Self {
        let sample_count = sizes.len() as u32;
        let uniform = sizes
            .first()
            .copied()
            .filter(|first| sizes.iter().all(|s| s == first));
        let (default_sample_info_size, sample_info_sizes) = match uniform {
            Some(size) if size != 0 => (size, Vec::new()),
            _ => (0, sizes),
        };
        Self {
            version: 0,
            flags: 0,
            aux_info_type: 0,
            aux_info_type_parameter: 0,
            default_sample_info_size,
            sample_count,
            sample_info_sizes,
        }
    }

    /// Build with a shared default size.
    pub fn with_default(default_sample_info_size: u8, sample_count: u32) -> Self {
        Self {
            version: 0,
            flags: 0,
            aux_info_type: 0,
            aux_info_type_parameter: 0,
            default_sample_info_size,
            sample_count,
            sample_info_sizes: Vec::new(),
        }
    }

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let (aux_info_type, aux_info_type_parameter) = if flags & Self::AUX_INFO_TYPE_PRESENT != 0
        {
            (r.u32()?, r.u32()?)
        } else {
            (0, 0)
        };
        let default_sample_info_size = r.u8()?;
        let sample_count = r.u32()?;
        let sample_info_sizes = if default_sample_info_size == 0 {
            r.bytes(sample_count as usize)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            version,
            flags,
            aux_info_type,
            aux_info_type_parameter,
            default_sample_info_size,
            sample_count,
            sample_info_sizes,
        })
    }

    /// Sample count as written: the table length when there is a table.
    fn written_count(&self) -> u32 {
        if self.default_sample_info_size == 0 {
            self.sample_info_sizes.len() as u32
        } else {
            self.sample_count
        }
    }

    fn encoded_len(&self) -> u64 {
        let mut len = 4 + 1 + 4;
        if self.flags & Self::AUX_INFO_TYPE_PRESENT != 0 {
            len += 8;
        }
        if self.default_sample_info_size == 0 {
            len += self.sample_info_sizes.len() as u64;
        }
        len
    }

    fn write(&self, buf: &mut BytesMut) {
        put_fullbox(buf, self.version, self.flags);
        if self.flags & Self::AUX_INFO_TYPE_PRESENT != 0 {
            buf.put_u32(self.aux_info_type);
            buf.put_u32(self.aux_info_type_parameter);
        }
        buf.put_u8(self.default_sample_info_size);
        buf.put_u32(self.written_count());
        if self.default_sample_info_size == 0 {
            buf.put_slice(&self.sample_info_sizes);
        }
    }
}

// ---------------------------------------------------------------------------
// tfrf / tfxd
// ---------------------------------------------------------------------------

/// One upcoming fragment announced by a live hint, in manifest ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TfrfEntry {
    pub absolute_time: u64,
    pub duration: u64,
}

/// Live-timeline hint listing the fragments that follow this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tfrf {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<TfrfEntry>,
}

impl Tfrf {
    pub fn new(entries: Vec<TfrfEntry>) -> Self {
        Self {
            version: 1,
            flags: 0,
            entries,
        }
    }

    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let count = r.u8()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = if version == 1 {
                TfrfEntry {
                    absolute_time: r.u64()?,
                    duration: r.u64()?,
                }
            } else {
                TfrfEntry {
                    absolute_time: r.u32()? as u64,
                    duration: r.u32()? as u64,
                }
            };
            entries.push(entry);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    fn encoded_len(&self) -> u64 {
        let width = if self.version == 1 { 16 } else { 8 };
        5 + width * self.entries.len().min(u8::MAX as usize) as u64
    }

    fn write(&self, buf: &mut BytesMut) {
        put_fullbox(buf, self.version, self.flags);
        let entries = &self.entries[..self.entries.len().min(u8::MAX as usize)];
        buf.put_u8(entries.len() as u8);
        for entry in entries {
            if self.version == 1 {
                buf.put_u64(entry.absolute_time);
                buf.put_u64(entry.duration);
            } else {
                buf.put_u32(entry.absolute_time as u32);
                buf.put_u32(entry.duration as u32);
            }
        }
    }
}

/// Absolute timestamp of the fragment carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tfxd {
    pub version: u8,
    pub flags: u32,
    pub absolute_time: u64,
    pub duration: u64,
}

impl Tfxd {
    fn parse(r: &mut PayloadReader<'_>) -> Result<Self> {
        let (version, flags) = r.fullbox()?;
        let (absolute_time, duration) = if version == 1 {
            (r.u64()?, r.u64()?)
        } else {
            (r.u32()? as u64, r.u32()? as u64)
        };
        Ok(Self {
            version,
            flags,
            absolute_time,
            duration,
        })
    }

    fn encoded_len(&self) -> u64 {
        if self.version == 1 {
            20
        } else {
            12
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        put_fullbox(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.absolute_time);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.absolute_time as u32);
            buf.put_u32(self.duration as u32);
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Parsed payload of a recognized leaf box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Tfhd(Tfhd),
    Tfdt(Tfdt),
    Trun(Trun),
    SampleEncryption(SampleEncryption),
    Saio(Saio),
    Saiz(Saiz),
    Tfrf(Tfrf),
    Tfxd(Tfxd),
}

impl Record {
    /// Parse the payload of a box of the given kind. Returns `None` for
    /// kinds that have no typed view.
    pub(crate) fn parse(kind: BoxKind, payload: &[u8]) -> Result<Option<Self>> {
        let mut r = PayloadReader::new(payload, kind);
        let record = match kind {
            BoxKind::Tfhd => Record::Tfhd(Tfhd::parse(&mut r)?),
            BoxKind::Tfdt => Record::Tfdt(Tfdt::parse(&mut r)?),
            BoxKind::Trun => Record::Trun(Trun::parse(&mut r)?),
            BoxKind::Senc | BoxKind::PiffSampleEncryption => {
                Record::SampleEncryption(SampleEncryption::parse(&mut r)?)
            }
            BoxKind::Saio => Record::Saio(Saio::parse(&mut r)?),
            BoxKind::Saiz => Record::Saiz(Saiz::parse(&mut r)?),
            BoxKind::Tfrf => Record::Tfrf(Tfrf::parse(&mut r)?),
            BoxKind::Tfxd => Record::Tfxd(Tfxd::parse(&mut r)?),
            _ => return Ok(None),
        };
        if r.remaining() != 0 {
            tracing::debug!(kind = %kind, trailing = r.remaining(), "ignoring trailing payload bytes");
        }
        Ok(Some(record))
    }

    pub(crate) fn encoded_len(&self) -> u64 {
        match self {
            Record::Tfhd(b) => b.encoded_len(),
            Record::Tfdt(b) => b.encoded_len(),
            Record::Trun(b) => b.encoded_len(),
            Record::SampleEncryption(b) => b.encoded_len(),
            Record::Saio(b) => b.encoded_len(),
            Record::Saiz(b) => b.encoded_len(),
            Record::Tfrf(b) => b.encoded_len(),
            Record::Tfxd(b) => b.encoded_len(),
        }
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        match self {
            Record::Tfhd(b) => b.write(buf),
            Record::Tfdt(b) => b.write(buf),
            Record::Trun(b) => b.write(buf),
            Record::SampleEncryption(b) => b.write(buf),
            Record::Saio(b) => b.write(buf),
            Record::Saiz(b) => b.write(buf),
            Record::Tfrf(b) => b.write(buf),
            Record::Tfxd(b) => b.write(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(record: &Record) -> Vec<u8> {
        let mut buf = BytesMut::new();
        record.write(&mut buf);
        assert_eq!(buf.len() as u64, record.encoded_len());
        buf.to_vec()
    }

    #[test]
    fn tfhd_optional_fields_follow_flags() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(Tfhd::BASE_DATA_OFFSET_PRESENT | Tfhd::DEFAULT_SAMPLE_DURATION_PRESENT).to_be_bytes());
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(&1234u64.to_be_bytes());
        payload.extend_from_slice(&400u32.to_be_bytes());

        let Some(Record::Tfhd(mut tfhd)) = Record::parse(BoxKind::Tfhd, &payload).unwrap() else {
            panic!("expected tfhd");
        };
        assert_eq!(tfhd.track_id, 7);
        assert_eq!(tfhd.base_data_offset, 1234);
        assert_eq!(tfhd.default_duration(), Some(400));

        tfhd.flags &= !Tfhd::BASE_DATA_OFFSET_PRESENT;
        let bytes = encode(&Record::Tfhd(tfhd));
        // fullbox + track_ID + default duration
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn tfdt_widens_large_times() {
        let tfdt = Tfdt {
            version: 0,
            flags: 0,
            base_media_decode_time: u32::MAX as u64 + 1,
        };
        let bytes = encode(&Record::Tfdt(tfdt));
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn trun_rejects_oversized_sample_count() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&Trun::SAMPLE_SIZE_PRESENT.to_be_bytes());
        payload.extend_from_slice(&10u32.to_be_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        let err = Record::parse(BoxKind::Trun, &payload).unwrap_err();
        assert!(matches!(err, Error::MalformedContainer(_)));
    }

    #[test]
    fn trun_parses_rows() {
        let flags = Trun::DATA_OFFSET_PRESENT | Trun::SAMPLE_DURATION_PRESENT | Trun::SAMPLE_SIZE_PRESENT;
        let mut payload = Vec::new();
        payload.extend_from_slice(&flags.to_be_bytes());
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&(-4i32).to_be_bytes());
        for (d, s) in [(100u32, 10u32), (200, 20)] {
            payload.extend_from_slice(&d.to_be_bytes());
            payload.extend_from_slice(&s.to_be_bytes());
        }
        let Some(Record::Trun(trun)) = Record::parse(BoxKind::Trun, &payload).unwrap() else {
            panic!("expected trun");
        };
        assert_eq!(trun.data_offset, -4);
        assert_eq!(trun.samples.len(), 2);
        assert_eq!(trun.samples[1].duration, 200);
        assert_eq!(trun.samples[1].size, 20);
        assert!(trun.has_sample_durations());
    }

    #[test]
    fn piff_override_sets_iv_size() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(SampleEncryption::OVERRIDE_TRACK_ENCRYPTION).to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00, 0x01]); // AES-CTR
        payload.push(16);
        payload.extend_from_slice(&[0xAB; 16]);
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&[0x11; 16]);

        let Some(Record::SampleEncryption(mut senc)) =
            Record::parse(BoxKind::PiffSampleEncryption, &payload).unwrap()
        else {
            panic!("expected sample encryption");
        };
        assert_eq!(senc.iv_size, 16);
        assert_eq!(senc.samples[0].iv, vec![0x11; 16]);

        senc.strip_override();
        let bytes = encode(&Record::SampleEncryption(senc));
        // fullbox + count + one 16-byte IV
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &0u32.to_be_bytes());
    }

    #[test]
    fn senc_infers_iv_size_from_payload() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&SampleEncryption::USE_SUBSAMPLE_ENCRYPTION.to_be_bytes());
        payload.extend_from_slice(&2u32.to_be_bytes());
        for ranges in [1u16, 2] {
            payload.extend_from_slice(&[0x22; 8]);
            payload.extend_from_slice(&ranges.to_be_bytes());
            for _ in 0..ranges {
                payload.extend_from_slice(&5u16.to_be_bytes());
                payload.extend_from_slice(&100u32.to_be_bytes());
            }
        }
        let Some(Record::SampleEncryption(senc)) = Record::parse(BoxKind::Senc, &payload).unwrap()
        else {
            panic!("expected sample encryption");
        };
        assert_eq!(senc.iv_size, 8);
        assert_eq!(senc.aux_info_sizes(), vec![16, 22]);
    }

    #[test]
    fn senc_without_subsamples_uses_iv_size() {
        let senc = SampleEncryption {
            version: 0,
            flags: 0,
            track_override: None,
            iv_size: 8,
            samples: vec![
                EncryptedSample { iv: vec![0; 8], subsamples: vec![] };
                3
            ],
        };
        assert_eq!(senc.aux_info_sizes(), vec![8, 8, 8]);
    }

    #[test]
    fn saiz_collapses_uniform_sizes() {
        let saiz = Saiz::from_sizes(vec![16, 16]);
        assert_eq!(saiz.default_sample_info_size, 16);
        assert!(saiz.sample_info_sizes.is_empty());
        assert_eq!(saiz.sample_count, 2);

        let saiz = Saiz::from_sizes(vec![16, 22]);
        assert_eq!(saiz.default_sample_info_size, 0);
        assert_eq!(saiz.sample_info_sizes, vec![16, 22]);
        let bytes = encode(&Record::Saiz(saiz));
        assert_eq!(bytes.len(), 4 + 1 + 4 + 2);
    }

    #[test]
    fn saio_version_follows_offset_width() {
        let mut saio = Saio::single();
        saio.offsets[0] = 100;
        assert_eq!(encode(&Record::Saio(saio.clone())).len(), 12);
        saio.offsets[0] = u32::MAX as u64 + 10;
        let bytes = encode(&Record::Saio(saio));
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn tfrf_version_zero_entries() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.push(2);
        for (t, d) in [(1000u32, 500u32), (1500, 500)] {
            payload.extend_from_slice(&t.to_be_bytes());
            payload.extend_from_slice(&d.to_be_bytes());
        }
        let Some(Record::Tfrf(tfrf)) = Record::parse(BoxKind::Tfrf, &payload).unwrap() else {
            panic!("expected tfrf");
        };
        assert_eq!(
            tfrf.entries,
            vec![
                TfrfEntry { absolute_time: 1000, duration: 500 },
                TfrfEntry { absolute_time: 1500, duration: 500 },
            ]
        );
    }

    #[test]
    fn unknown_kinds_have_no_record() {
        assert!(Record::parse(BoxKind::Unknown, &[1, 2, 3]).unwrap().is_none());
        assert!(Record::parse(BoxKind::Mdat, &[]).unwrap().is_none());
    }
}
