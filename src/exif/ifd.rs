//! TIFF structure decoding and encoding.
//!
//! A decoded [`Tiff`] holds one [`Ifd`] per section plus the thumbnail bytes.
//! Pointer fields (EXIF, GPS and interoperability IFD offsets, thumbnail
//! offset and length) are not kept as entries: the decoder follows them and
//! the encoder regenerates them for the new layout.

use std::collections::{BTreeMap, HashSet};

use super::tags::{
    self, TAG_EXIF_IFD, TAG_GPS_IFD, TAG_INTEROP_IFD, TAG_THUMBNAIL_LENGTH, TAG_THUMBNAIL_OFFSET,
};
use crate::config::{Control, UnknownPolicy};
use crate::error::{Error, Result};
use crate::plan::SectionId;

const HEADER_LEN: u32 = 8;
const ENTRY_LEN: u32 = 12;
const TIFF_MAGIC: u16 = 42;

// TIFF data formats
pub const BYTE: u16 = 1;
pub const ASCII: u16 = 2;
pub const SHORT: u16 = 3;
pub const LONG: u16 = 4;
pub const RATIONAL: u16 = 5;
pub const SBYTE: u16 = 6;
pub const UNDEFINED: u16 = 7;
pub const SSHORT: u16 = 8;
pub const SLONG: u16 = 9;
pub const SRATIONAL: u16 = 10;
pub const FLOAT: u16 = 11;
pub const DOUBLE: u16 = 12;
pub const IFD: u16 = 13;

/// Size in bytes of one value of a TIFF data format.
pub fn unit_size(format: u16) -> Option<u32> {
    match format {
        BYTE | ASCII | SBYTE | UNDEFINED => Some(1),
        SHORT | SSHORT => Some(2),
        LONG | SLONG | FLOAT | IFD => Some(4),
        RATIONAL | SRATIONAL | DOUBLE => Some(8),
        _ => None,
    }
}

pub fn format_name(format: u16) -> &'static str {
    match format {
        BYTE => "BYTE",
        ASCII => "ASCII",
        SHORT => "SHORT",
        LONG => "LONG",
        RATIONAL => "RATIONAL",
        SBYTE => "SBYTE",
        UNDEFINED => "UNDEFINED",
        SSHORT => "SSHORT",
        SLONG => "SLONG",
        SRATIONAL => "SRATIONAL",
        FLOAT => "FLOAT",
        DOUBLE => "DOUBLE",
        IFD => "IFD",
        _ => "?",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        }
    }

    pub fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        }
    }

    pub fn u16_bytes(self, v: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    pub fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn marker(self) -> &'static [u8; 2] {
        match self {
            ByteOrder::Little => b"II",
            ByteOrder::Big => b"MM",
        }
    }
}

/// One field: its tag, TIFF data format, value count and raw value bytes
/// (in the byte order of the block it came from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub tag: u16,
    pub format: u16,
    pub count: u32,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn long(tag: u16, value: u32, order: ByteOrder) -> Self {
        Self {
            tag,
            format: LONG,
            count: 1,
            data: order.u32_bytes(value).to_vec(),
        }
    }

    /// First value of a SHORT or LONG field.
    pub fn first_u32(&self, order: ByteOrder) -> Option<u32> {
        match self.format {
            SHORT if self.data.len() >= 2 => Some(order.u16([self.data[0], self.data[1]]) as u32),
            LONG | IFD if self.data.len() >= 4 => Some(order.u32([
                self.data[0],
                self.data[1],
                self.data[2],
                self.data[3],
            ])),
            _ => None,
        }
    }
}

/// The fields of one section, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<Entry>,
}

impl Ifd {
    pub fn get(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Remove every entry with `tag`. Returns whether anything was removed.
    pub fn remove(&mut self, tag: u16) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.tag != tag);
        self.entries.len() != before
    }

    /// Remove a pointer entry and return its value.
    fn take_pointer(&mut self, tag: u16, order: ByteOrder) -> Option<u32> {
        let pos = self.entries.iter().position(|e| e.tag == tag)?;
        self.entries.remove(pos).first_u32(order)
    }
}

/// A decoded TIFF metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tiff {
    pub order: ByteOrder,
    pub sections: BTreeMap<SectionId, Ifd>,
    /// Bytes referenced by the thumbnail section's interchange format fields.
    pub thumbnail: Option<Vec<u8>>,
}

impl Tiff {
    /// Decode a TIFF block.
    pub fn decode(data: &[u8], control: &Control) -> Result<Self> {
        Decoder::new(data, control)?.decode()
    }

    /// Encode into a fresh, compact TIFF block.
    ///
    /// Layout: header, IFD0, EXIF, interoperability, GPS, IFD1, thumbnail.
    /// Entries are sorted by tag and values longer than four bytes follow
    /// their IFD, word aligned.
    pub fn encode(&self, control: &Control) -> Vec<u8> {
        let order = self.order;
        let mut blocks: Vec<(SectionId, Vec<Entry>)> = Vec::new();

        for section in [
            SectionId::PRIMARY,
            SectionId::EXIF,
            SectionId::INTEROP,
            SectionId::GPS,
            SectionId::THUMBNAIL,
        ] {
            let Some(ifd) = self.sections.get(&section) else {
                continue;
            };
            if section == SectionId::INTEROP && !self.sections.contains_key(&SectionId::EXIF) {
                log::debug!("Dropping interoperability section without an EXIF section");
                continue;
            }

            let mut entries: Vec<Entry> = ifd
                .entries
                .iter()
                .filter(|e| {
                    let keep = control.unknown != UnknownPolicy::Remove
                        || tags::is_known(section, e.tag);
                    if !keep {
                        log::debug!("Dropping unknown field 0x{:04x} from {section} section", e.tag);
                    }
                    keep
                })
                .cloned()
                .collect();

            // placeholders, patched once the layout is known
            for (owner, tag, target) in POINTERS {
                if *owner == section && self.sections.contains_key(target) {
                    entries.push(Entry::long(*tag, 0, order));
                }
            }
            if section == SectionId::THUMBNAIL {
                if let Some(ref thumb) = self.thumbnail {
                    entries.push(Entry::long(TAG_THUMBNAIL_OFFSET, 0, order));
                    entries.push(Entry::long(TAG_THUMBNAIL_LENGTH, thumb.len() as u32, order));
                }
            }

            entries.sort_by_key(|e| e.tag);
            blocks.push((section, entries));
        }

        let mut offsets = BTreeMap::new();
        let mut cursor = HEADER_LEN;
        for (section, entries) in &blocks {
            offsets.insert(*section, cursor);
            cursor += block_len(entries);
        }
        let thumbnail_offset = cursor;

        for (section, entries) in &mut blocks {
            for entry in entries.iter_mut() {
                let target = POINTERS
                    .iter()
                    .find(|(owner, tag, _)| *owner == *section && *tag == entry.tag)
                    .and_then(|(_, _, target)| offsets.get(target).copied())
                    .or_else(|| {
                        (*section == SectionId::THUMBNAIL && entry.tag == TAG_THUMBNAIL_OFFSET)
                            .then_some(thumbnail_offset)
                    });
                if let Some(offset) = target {
                    entry.data = order.u32_bytes(offset).to_vec();
                }
            }
        }

        let mut out = Vec::with_capacity(cursor as usize);
        out.extend_from_slice(order.marker());
        out.extend_from_slice(&order.u16_bytes(TIFF_MAGIC));
        out.extend_from_slice(&order.u32_bytes(HEADER_LEN));

        for (section, entries) in &blocks {
            let start = offsets[section];
            let next = if *section == SectionId::PRIMARY {
                offsets.get(&SectionId::THUMBNAIL).copied().unwrap_or(0)
            } else {
                0
            };
            if control.serialize_debug {
                log::debug!(
                    "Writing {section} IFD at offset {start}: {} entries, next IFD {next}",
                    entries.len()
                );
            }
            write_ifd(&mut out, order, start, entries, next);
        }

        if offsets.contains_key(&SectionId::THUMBNAIL) {
            if let Some(ref thumb) = self.thumbnail {
                if control.serialize_debug {
                    log::debug!("Writing thumbnail at offset {thumbnail_offset}: {} bytes", thumb.len());
                }
                out.extend_from_slice(thumb);
            }
        }

        out
    }
}

/// (section holding the pointer, pointer tag, section pointed to)
const POINTERS: &[(SectionId, u16, SectionId)] = &[
    (SectionId::PRIMARY, TAG_EXIF_IFD, SectionId::EXIF),
    (SectionId::PRIMARY, TAG_GPS_IFD, SectionId::GPS),
    (SectionId::EXIF, TAG_INTEROP_IFD, SectionId::INTEROP),
];

/// The section a field locates, when `tag` in `section` is one the decoder
/// consumes and the encoder regenerates.
pub fn structural_target(section: SectionId, tag: u16) -> Option<SectionId> {
    if section == SectionId::THUMBNAIL
        && (tag == TAG_THUMBNAIL_OFFSET || tag == TAG_THUMBNAIL_LENGTH)
    {
        return Some(SectionId::THUMBNAIL);
    }
    POINTERS
        .iter()
        .find(|(owner, pointer, _)| *owner == section && *pointer == tag)
        .map(|(_, _, target)| *target)
}

fn padded(len: usize) -> u32 {
    (len + (len & 1)) as u32
}

/// Bytes taken by an IFD and its out-of-line values.
fn block_len(entries: &[Entry]) -> u32 {
    let extra: u32 = entries
        .iter()
        .filter(|e| e.data.len() > 4)
        .map(|e| padded(e.data.len()))
        .sum();
    2 + ENTRY_LEN * entries.len() as u32 + 4 + extra
}

fn write_ifd(out: &mut Vec<u8>, order: ByteOrder, start: u32, entries: &[Entry], next: u32) {
    debug_assert_eq!(out.len() as u32, start);
    let mut data_offset = start + 2 + ENTRY_LEN * entries.len() as u32 + 4;
    let mut extra = Vec::new();

    out.extend_from_slice(&order.u16_bytes(entries.len() as u16));
    for entry in entries {
        out.extend_from_slice(&order.u16_bytes(entry.tag));
        out.extend_from_slice(&order.u16_bytes(entry.format));
        out.extend_from_slice(&order.u32_bytes(entry.count));
        if entry.data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&order.u32_bytes(data_offset));
            extra.extend_from_slice(&entry.data);
            if entry.data.len() & 1 == 1 {
                extra.push(0);
            }
            data_offset += padded(entry.data.len());
        }
    }
    out.extend_from_slice(&order.u32_bytes(next));
    out.extend_from_slice(&extra);
}

struct Decoder<'a> {
    data: &'a [u8],
    order: ByteOrder,
    control: &'a Control,
    visited: HashSet<u32>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], control: &'a Control) -> Result<Self> {
        if data.len() < HEADER_LEN as usize {
            return Err(Error::Malformed("TIFF header too short".into()));
        }
        let order = match &data[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(Error::Malformed("invalid TIFF byte order".into())),
        };
        let decoder = Self {
            data,
            order,
            control,
            visited: HashSet::new(),
        };
        if decoder.u16_at(2)? != TIFF_MAGIC {
            return Err(Error::Malformed("invalid TIFF magic number".into()));
        }
        Ok(decoder)
    }

    /// Tolerated anomaly: warning with `-w`, debug otherwise.
    fn anomaly(&self, message: String) {
        if self.control.warn {
            log::warn!("{message}");
        } else {
            log::debug!("{message}");
        }
    }

    fn slice(&self, offset: u32, len: u32) -> Result<&'a [u8]> {
        let start = offset as usize;
        start
            .checked_add(len as usize)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| {
                Error::Malformed(format!("{len} bytes at offset {offset} are out of bounds"))
            })
    }

    fn u16_at(&self, offset: u32) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(self.order.u16([b[0], b[1]]))
    }

    fn u32_at(&self, offset: u32) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(self.order.u32([b[0], b[1], b[2], b[3]]))
    }

    fn decode(mut self) -> Result<Tiff> {
        let order = self.order;
        let mut tiff = Tiff {
            order,
            sections: BTreeMap::new(),
            thumbnail: None,
        };

        let ifd0 = self.u32_at(4)?;
        let (mut primary, next) = self.read_ifd(ifd0, SectionId::PRIMARY)?;
        let exif_offset = primary.take_pointer(TAG_EXIF_IFD, order);
        let gps_offset = primary.take_pointer(TAG_GPS_IFD, order);
        tiff.sections.insert(SectionId::PRIMARY, primary);

        if let Some(offset) = exif_offset {
            let (mut exif, _) = self.read_ifd(offset, SectionId::EXIF)?;
            let interop_offset = exif.take_pointer(TAG_INTEROP_IFD, order);
            tiff.sections.insert(SectionId::EXIF, exif);
            if let Some(offset) = interop_offset {
                let (interop, _) = self.read_ifd(offset, SectionId::INTEROP)?;
                tiff.sections.insert(SectionId::INTEROP, interop);
            }
        }

        if let Some(offset) = gps_offset {
            let (gps, _) = self.read_ifd(offset, SectionId::GPS)?;
            tiff.sections.insert(SectionId::GPS, gps);
        }

        if next != 0 {
            let (mut thumbnail, _) = self.read_ifd(next, SectionId::THUMBNAIL)?;
            let offset = thumbnail.take_pointer(TAG_THUMBNAIL_OFFSET, order);
            let length = thumbnail.take_pointer(TAG_THUMBNAIL_LENGTH, order);
            if let (Some(offset), Some(length)) = (offset, length) {
                match self.slice(offset, length) {
                    Ok(bytes) => tiff.thumbnail = Some(bytes.to_vec()),
                    Err(e) => self.anomaly(format!("Dropping thumbnail data: {e}")),
                }
            }
            tiff.sections.insert(SectionId::THUMBNAIL, thumbnail);
        }

        Ok(tiff)
    }

    /// Read one IFD. Returns it with the offset of the next IFD in the chain.
    fn read_ifd(&mut self, offset: u32, section: SectionId) -> Result<(Ifd, u32)> {
        if !self.visited.insert(offset) {
            return Err(Error::Malformed(format!(
                "{section} IFD at offset {offset} was already read (loop in IFD chain)"
            )));
        }

        let count = self.u16_at(offset)? as u32;
        if self.control.parse_debug {
            log::debug!("Reading {section} IFD at offset {offset}: {count} entries");
        }

        let mut ifd = Ifd::default();
        for i in 0..count {
            let at = offset + 2 + i * ENTRY_LEN;
            let tag = self.u16_at(at)?;
            let format = self.u16_at(at + 2)?;
            let n = self.u32_at(at + 4)?;

            let Some(unit) = unit_size(format) else {
                self.anomaly(format!(
                    "Skipping field 0x{tag:04x} in {section} section: unknown data format {format}"
                ));
                continue;
            };
            let len = unit.checked_mul(n).ok_or_else(|| {
                Error::Malformed(format!("field 0x{tag:04x} in {section} section is too large"))
            })?;
            let data = if len <= 4 {
                self.slice(at + 8, len)?
            } else {
                let value_offset = self.u32_at(at + 8)?;
                self.slice(value_offset, len)?
            };

            if self.control.unknown == UnknownPolicy::Stop && !tags::is_known(section, tag) {
                return Err(Error::UnknownField {
                    section,
                    field: crate::plan::FieldId(tag),
                });
            }
            if self.control.parse_debug {
                log::debug!(
                    "  0x{tag:04x} {} {}[{n}]",
                    tags::tag_name(section, tag).unwrap_or("unknown"),
                    format_name(format)
                );
            }

            ifd.entries.push(Entry {
                tag,
                format,
                count: n,
                data: data.to_vec(),
            });
        }

        let next = self.u32_at(offset + 2 + count * ENTRY_LEN)?;
        Ok((ifd, next))
    }
}
