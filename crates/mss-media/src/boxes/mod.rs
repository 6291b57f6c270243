//! In-memory ISO BMFF box tree.
//!
//! A fragment is parsed once into a [`BoxTree`]: recognized containers hold
//! child boxes, recognized leaves hold a typed [`Record`], and everything
//! else keeps its payload as opaque bytes that are re-emitted verbatim.
//! Sizes are never stored; they are recomputed bottom-up whenever a size or
//! offset is asked for, so edits anywhere in the tree stay consistent.

mod kind;
pub mod records;

pub use kind::{
    fourcc_str, BoxKind, ExtendedType, FourCC, PIFF_SAMPLE_ENCRYPTION_UUID, TFRF_UUID, TFXD_UUID,
};
pub use records::{
    EncryptedSample, Record, SampleEncryption, Saio, Saiz, Subsample, Tfdt, Tfhd, Tfrf,
    TfrfEntry, Tfxd, TrackEncryptionOverride, Trun, TrunSample, DEFAULT_IV_SIZE,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mss_core::{Error, Result};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Mp4Box
// ---------------------------------------------------------------------------

/// Payload of a box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxBody {
    Container(Vec<Mp4Box>),
    Record(Record),
    Opaque(Bytes),
}

/// One box: its type codes plus a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    fourcc: FourCC,
    extended_type: Option<ExtendedType>,
    kind: BoxKind,
    /// The box was read with a 64-bit `largesize` header.
    large_size: bool,
    body: BoxBody,
}

macro_rules! record_accessors {
    ($($variant:ident => $get:ident, $get_mut:ident;)*) => {
        $(
            pub fn $get(&self) -> Option<&$variant> {
                match &self.body {
                    BoxBody::Record(Record::$variant(r)) => Some(r),
                    _ => None,
                }
            }

            pub fn $get_mut(&mut self) -> Option<&mut $variant> {
                match &mut self.body {
                    BoxBody::Record(Record::$variant(r)) => Some(r),
                    _ => None,
                }
            }
        )*
    };
}

impl Mp4Box {
    /// A new box of a recognized kind.
    pub fn new(kind: BoxKind, body: BoxBody) -> Self {
        let (fourcc, extended_type) = kind.header_codes().unwrap_or_default();
        Self {
            fourcc,
            extended_type,
            kind,
            large_size: false,
            body,
        }
    }

    /// A leaf box holding `record`.
    pub fn from_record(kind: BoxKind, record: Record) -> Self {
        Self::new(kind, BoxBody::Record(record))
    }

    /// A container of the given kind.
    pub fn container(kind: BoxKind, children: Vec<Mp4Box>) -> Self {
        Self::new(kind, BoxBody::Container(children))
    }

    /// A media data box.
    pub fn mdat(data: impl Into<Bytes>) -> Self {
        Self::new(BoxKind::Mdat, BoxBody::Opaque(data.into()))
    }

    /// An unrecognized box carried as raw bytes.
    pub fn opaque(fourcc: FourCC, data: impl Into<Bytes>) -> Self {
        Self {
            fourcc,
            extended_type: None,
            kind: BoxKind::resolve(&fourcc, None),
            large_size: false,
            body: BoxBody::Opaque(data.into()),
        }
    }

    pub fn kind(&self) -> BoxKind {
        self.kind
    }

    pub fn fourcc(&self) -> &FourCC {
        &self.fourcc
    }

    pub fn extended_type(&self) -> Option<&ExtendedType> {
        self.extended_type.as_ref()
    }

    pub fn body(&self) -> &BoxBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BoxBody {
        &mut self.body
    }

    /// Change the box type in place, keeping the body.
    pub fn retype(&mut self, kind: BoxKind) {
        let (fourcc, extended_type) = kind.header_codes().unwrap_or_default();
        self.fourcc = fourcc;
        self.extended_type = extended_type;
        self.kind = kind;
    }

    /// Raw payload of an opaque box (including `mdat`).
    pub fn data(&self) -> Option<&Bytes> {
        match &self.body {
            BoxBody::Opaque(data) => Some(data),
            _ => None,
        }
    }

    /// The typed record of a leaf box.
    pub fn record(&self) -> Option<&Record> {
        match &self.body {
            BoxBody::Record(r) => Some(r),
            _ => None,
        }
    }

    record_accessors! {
        Tfhd => as_tfhd, as_tfhd_mut;
        Tfdt => as_tfdt, as_tfdt_mut;
        Trun => as_trun, as_trun_mut;
        SampleEncryption => as_sample_encryption, as_sample_encryption_mut;
        Saio => as_saio, as_saio_mut;
        Saiz => as_saiz, as_saiz_mut;
        Tfrf => as_tfrf, as_tfrf_mut;
        Tfxd => as_tfxd, as_tfxd_mut;
    }

    // -- Sizes --------------------------------------------------------------

    fn payload_len(&self) -> u64 {
        match &self.body {
            BoxBody::Container(children) => children.iter().map(Mp4Box::size).sum(),
            BoxBody::Record(record) => record.encoded_len(),
            BoxBody::Opaque(data) => data.len() as u64,
        }
    }

    fn uses_large_size(&self, payload_len: u64) -> bool {
        let ext = if self.extended_type.is_some() { 16 } else { 0 };
        self.large_size || 8 + ext + payload_len > u32::MAX as u64
    }

    fn header_len_for(&self, payload_len: u64) -> u64 {
        let mut len = 8;
        if self.uses_large_size(payload_len) {
            len += 8;
        }
        if self.extended_type.is_some() {
            len += 16;
        }
        len
    }

    /// Header length: size + type, optional `largesize`, optional extended type.
    pub fn header_len(&self) -> u64 {
        self.header_len_for(self.payload_len())
    }

    /// Total serialized size of this box.
    pub fn size(&self) -> u64 {
        let payload = self.payload_len();
        self.header_len_for(payload) + payload
    }

    // -- Children -----------------------------------------------------------

    /// Child boxes; empty for leaves.
    pub fn children(&self) -> &[Mp4Box] {
        match &self.body {
            BoxBody::Container(children) => children,
            _ => &[],
        }
    }

    fn children_vec_mut(&mut self) -> Option<&mut Vec<Mp4Box>> {
        match &mut self.body {
            BoxBody::Container(children) => Some(children),
            _ => None,
        }
    }

    /// First child of the given kind.
    pub fn child(&self, kind: BoxKind) -> Option<&Mp4Box> {
        self.children().iter().find(|b| b.kind == kind)
    }

    pub fn child_mut(&mut self, kind: BoxKind) -> Option<&mut Mp4Box> {
        self.children_vec_mut()?.iter_mut().find(|b| b.kind == kind)
    }

    /// All children of the given kind, in order.
    pub fn children_of(&self, kind: BoxKind) -> impl Iterator<Item = &Mp4Box> {
        self.children().iter().filter(move |b| b.kind == kind)
    }

    /// Remove every child of the given kind; returns how many were removed.
    pub fn remove_children(&mut self, kind: BoxKind) -> usize {
        let Some(children) = self.children_vec_mut() else {
            return 0;
        };
        let before = children.len();
        children.retain(|b| b.kind != kind);
        before - children.len()
    }

    /// Insert `new_box` right after the first child of kind `anchor`, or at
    /// the end when there is no such child. Returns `false` for leaves.
    pub fn insert_child_after(&mut self, anchor: BoxKind, new_box: Mp4Box) -> bool {
        let Some(children) = self.children_vec_mut() else {
            return false;
        };
        match children.iter().position(|b| b.kind == anchor) {
            Some(pos) => children.insert(pos + 1, new_box),
            None => children.push(new_box),
        }
        true
    }

    /// Append a child. Returns `false` for leaves.
    pub fn push_child(&mut self, new_box: Mp4Box) -> bool {
        match self.children_vec_mut() {
            Some(children) => {
                children.push(new_box);
                true
            }
            None => false,
        }
    }

    /// Offset of the first child of `kind` from the start of this box: this
    /// box's header plus every preceding sibling.
    pub fn byte_offset_of(&self, kind: BoxKind) -> Option<u64> {
        offset_in(self.children(), kind).map(|offset| self.header_len() + offset)
    }

    // -- Serialization ------------------------------------------------------

    fn write(&self, buf: &mut BytesMut) {
        let payload = self.payload_len();
        let large = self.uses_large_size(payload);
        let size = self.header_len_for(payload) + payload;

        if large {
            buf.put_u32(1);
            buf.put_slice(&self.fourcc);
            buf.put_u64(size);
        } else {
            buf.put_u32(size as u32);
            buf.put_slice(&self.fourcc);
        }
        if let Some(ext) = &self.extended_type {
            buf.put_slice(ext);
        }

        match &self.body {
            BoxBody::Container(children) => {
                for child in children {
                    child.write(buf);
                }
            }
            BoxBody::Record(record) => record.write(buf),
            BoxBody::Opaque(data) => buf.put_slice(data),
        }
    }
}

fn offset_in(list: &[Mp4Box], kind: BoxKind) -> Option<u64> {
    let mut offset = 0;
    for b in list {
        if b.kind == kind {
            return Some(offset);
        }
        offset += b.size();
    }
    None
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_sequence(data: &Bytes) -> Result<Vec<Mp4Box>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let (parsed, consumed) = parse_box(&data.slice(pos..))
            .map_err(|e| match e {
                Error::MalformedContainer(msg) => Error::malformed(format!("at offset {pos}: {msg}")),
                other => other,
            })?;
        boxes.push(parsed);
        pos += consumed;
    }

    Ok(boxes)
}

fn parse_box(data: &Bytes) -> Result<(Mp4Box, usize)> {
    let mut cursor: &[u8] = data;
    if cursor.remaining() < 8 {
        return Err(Error::malformed(format!(
            "truncated box header ({} bytes left)",
            cursor.remaining()
        )));
    }

    let size32 = cursor.get_u32();
    let mut fourcc = [0u8; 4];
    cursor.copy_to_slice(&mut fourcc);

    let mut header_len = 8usize;
    let mut large_size = false;
    let size = match size32 {
        0 => data.len() as u64,
        1 => {
            if cursor.remaining() < 8 {
                return Err(Error::malformed(format!(
                    "truncated largesize header for '{}'",
                    fourcc_str(&fourcc)
                )));
            }
            header_len += 8;
            large_size = true;
            cursor.get_u64()
        }
        n => n as u64,
    };

    let extended_type = if &fourcc == b"uuid" {
        if cursor.remaining() < 16 {
            return Err(Error::malformed("truncated uuid extended type"));
        }
        let mut ext = [0u8; 16];
        cursor.copy_to_slice(&mut ext);
        header_len += 16;
        Some(ext)
    } else {
        None
    };

    if size < header_len as u64 {
        return Err(Error::malformed(format!(
            "box '{}' declares size {size} smaller than its {header_len}-byte header",
            fourcc_str(&fourcc)
        )));
    }
    if size > data.len() as u64 {
        return Err(Error::malformed(format!(
            "box '{}' declares size {size} but only {} bytes remain",
            fourcc_str(&fourcc),
            data.len()
        )));
    }

    let size = size as usize;
    let payload = data.slice(header_len..size);
    let kind = BoxKind::resolve(&fourcc, extended_type.as_ref());

    let body = if kind.is_container() {
        BoxBody::Container(parse_sequence(&payload)?)
    } else {
        match Record::parse(kind, &payload)? {
            Some(record) => BoxBody::Record(record),
            None => BoxBody::Opaque(payload),
        }
    };

    let parsed = Mp4Box {
        fourcc,
        extended_type,
        kind,
        large_size,
        body,
    };
    Ok((parsed, size))
}

// ---------------------------------------------------------------------------
// BoxTree
// ---------------------------------------------------------------------------

/// One line of [`BoxTree::walk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxSummary {
    pub depth: usize,
    /// Absolute offset of the box in the serialized tree.
    pub offset: u64,
    pub size: u64,
    pub fourcc: String,
    pub kind: String,
}

/// The top-level boxes of one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxTree {
    boxes: Vec<Mp4Box>,
}

impl BoxTree {
    /// Parse `data` into a box tree.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedContainer`] when a header is truncated, a declared
    /// size overruns its enclosing buffer, or a typed payload is short.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes = Bytes::copy_from_slice(data);
        let boxes = parse_sequence(&bytes)?;
        Ok(Self { boxes })
    }

    pub fn from_boxes(boxes: Vec<Mp4Box>) -> Self {
        Self { boxes }
    }

    pub fn boxes(&self) -> &[Mp4Box] {
        &self.boxes
    }

    pub fn child(&self, kind: BoxKind) -> Option<&Mp4Box> {
        self.boxes.iter().find(|b| b.kind == kind)
    }

    pub fn child_mut(&mut self, kind: BoxKind) -> Option<&mut Mp4Box> {
        self.boxes.iter_mut().find(|b| b.kind == kind)
    }

    pub fn children_of(&self, kind: BoxKind) -> impl Iterator<Item = &Mp4Box> {
        self.boxes.iter().filter(move |b| b.kind == kind)
    }

    pub fn remove_children(&mut self, kind: BoxKind) -> usize {
        let before = self.boxes.len();
        self.boxes.retain(|b| b.kind != kind);
        before - self.boxes.len()
    }

    pub fn insert_child_after(&mut self, anchor: BoxKind, new_box: Mp4Box) {
        match self.boxes.iter().position(|b| b.kind == anchor) {
            Some(pos) => self.boxes.insert(pos + 1, new_box),
            None => self.boxes.push(new_box),
        }
    }

    /// Offset of the first top-level box of `kind`.
    pub fn byte_offset_of(&self, kind: BoxKind) -> Option<u64> {
        offset_in(&self.boxes, kind)
    }

    /// Serialized length.
    pub fn len(&self) -> u64 {
        self.boxes.iter().map(Mp4Box::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Serialize, recomputing every declared size.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.len() as usize);
        for b in &self.boxes {
            b.write(&mut buf);
        }
        buf.to_vec()
    }

    /// Depth-first listing of every box with its offset and size.
    pub fn walk(&self) -> Vec<BoxSummary> {
        let mut out = Vec::new();
        walk_into(&self.boxes, 0, 0, &mut out);
        out
    }
}

fn walk_into(list: &[Mp4Box], depth: usize, mut offset: u64, out: &mut Vec<BoxSummary>) {
    for b in list {
        let size = b.size();
        out.push(BoxSummary {
            depth,
            offset,
            size,
            fourcc: fourcc_str(&b.fourcc).into_owned(),
            kind: b.kind.name().to_string(),
        });
        walk_into(b.children(), depth + 1, offset + b.header_len(), out);
        offset += size;
    }
}
