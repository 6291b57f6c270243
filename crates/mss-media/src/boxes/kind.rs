//! Box type codes and the kind lookup table.
//!
//! Smooth Streaming carries three of its boxes as `uuid` boxes, so a kind is
//! resolved from the four-character code *and* the 16-byte extended type.

use std::borrow::Cow;
use std::fmt;

/// Four-character box type code.
pub type FourCC = [u8; 4];

/// 16-byte extended type of a `uuid` box.
pub type ExtendedType = [u8; 16];

/// PIFF sample encryption (`sepiff`).
pub const PIFF_SAMPLE_ENCRYPTION_UUID: ExtendedType = [
    0xA2, 0x39, 0x4F, 0x52, 0x5A, 0x9B, 0x4F, 0x14, 0xA2, 0x44, 0x6C, 0x42, 0x7C, 0x64, 0x8D, 0xF4,
];

/// Live-timeline hint listing upcoming fragments (`tfrf`).
pub const TFRF_UUID: ExtendedType = [
    0xD4, 0x80, 0x7E, 0xF2, 0xCA, 0x39, 0x46, 0x95, 0x8E, 0x54, 0x26, 0xCB, 0x9E, 0x46, 0xA7, 0x9F,
];

/// Absolute timestamp of the current fragment (`tfxd`).
pub const TFXD_UUID: ExtendedType = [
    0x6D, 0x1D, 0x9B, 0x05, 0x42, 0xD5, 0x44, 0xE6, 0x80, 0xE2, 0x14, 0x1D, 0xAF, 0xF7, 0x57, 0xB2,
];

/// Every box this crate understands. Anything else is [`BoxKind::Unknown`]
/// and passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxKind {
    Moof,
    Mdat,
    Traf,
    Tfhd,
    Tfdt,
    Trun,
    Senc,
    PiffSampleEncryption,
    Saio,
    Saiz,
    Tfrf,
    Tfxd,
    Unknown,
}

/// `(fourcc, extended type, kind)` rows consulted once per parsed box.
static KIND_TABLE: &[(FourCC, Option<ExtendedType>, BoxKind)] = &[
    (*b"moof", None, BoxKind::Moof),
    (*b"mdat", None, BoxKind::Mdat),
    (*b"traf", None, BoxKind::Traf),
    (*b"tfhd", None, BoxKind::Tfhd),
    (*b"tfdt", None, BoxKind::Tfdt),
    (*b"trun", None, BoxKind::Trun),
    (*b"senc", None, BoxKind::Senc),
    (*b"saio", None, BoxKind::Saio),
    (*b"saiz", None, BoxKind::Saiz),
    (*b"uuid", Some(PIFF_SAMPLE_ENCRYPTION_UUID), BoxKind::PiffSampleEncryption),
    (*b"uuid", Some(TFRF_UUID), BoxKind::Tfrf),
    (*b"uuid", Some(TFXD_UUID), BoxKind::Tfxd),
];

impl BoxKind {
    /// Look up the kind for a box header.
    pub fn resolve(fourcc: &FourCC, extended_type: Option<&ExtendedType>) -> Self {
        KIND_TABLE
            .iter()
            .find(|(code, ext, _)| code == fourcc && ext.as_ref() == extended_type)
            .map(|(_, _, kind)| *kind)
            .unwrap_or(BoxKind::Unknown)
    }

    /// Type code and extended type written for a freshly created box.
    pub fn header_codes(&self) -> Option<(FourCC, Option<ExtendedType>)> {
        KIND_TABLE
            .iter()
            .find(|(_, _, kind)| kind == self)
            .map(|(code, ext, _)| (*code, *ext))
    }

    /// Boxes whose payload is a sequence of child boxes.
    pub fn is_container(&self) -> bool {
        matches!(self, BoxKind::Moof | BoxKind::Traf)
    }

    /// Either flavour of per-sample encryption box.
    pub fn is_sample_encryption(&self) -> bool {
        matches!(self, BoxKind::Senc | BoxKind::PiffSampleEncryption)
    }

    /// Short human-readable name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            BoxKind::Moof => "moof",
            BoxKind::Mdat => "mdat",
            BoxKind::Traf => "traf",
            BoxKind::Tfhd => "tfhd",
            BoxKind::Tfdt => "tfdt",
            BoxKind::Trun => "trun",
            BoxKind::Senc => "senc",
            BoxKind::PiffSampleEncryption => "sepiff",
            BoxKind::Saio => "saio",
            BoxKind::Saiz => "saiz",
            BoxKind::Tfrf => "tfrf",
            BoxKind::Tfxd => "tfxd",
            BoxKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BoxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a type code for logs, replacing non-ASCII bytes.
pub fn fourcc_str(code: &FourCC) -> Cow<'_, str> {
    String::from_utf8_lossy(code)
}
