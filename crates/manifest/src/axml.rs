//! Wire-level AXML structures
//!
//! Little-endian chunked encoding: every chunk opens with a
//! `ChunkHeader`; adding `header.size` to the chunk start skips the chunk
//! and all of its children.

use apkforge_errors::{ManifestError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub(crate) const CHUNK_XML: u16 = 0x0003;
pub(crate) const CHUNK_STRING_POOL: u16 = 0x0001;
pub(crate) const CHUNK_RESOURCE_MAP: u16 = 0x0180;
pub(crate) const CHUNK_START_NAMESPACE: u16 = 0x0100;
pub(crate) const CHUNK_END_NAMESPACE: u16 = 0x0101;
pub(crate) const CHUNK_START_ELEMENT: u16 = 0x0102;
pub(crate) const CHUNK_END_ELEMENT: u16 = 0x0103;

/// Typed-value type tags (the subset the rewriter understands)
pub(crate) mod value_type {
    pub const REFERENCE: u8 = 0x01;
    pub const STRING: u8 = 0x03;
    pub const INT_DEC: u8 = 0x10;
    pub const INT_HEX: u8 = 0x11;
    pub const BOOLEAN: u8 = 0x12;
}

const STRING_POOL_UTF8_FLAG: u32 = 1 << 8;
/// `ResValue` is a fixed 8-byte record: size, reserved, type, data.
const RES_VALUE_SIZE: u16 = 8;
/// Attribute records are 20 bytes: ns, name, raw value, typed value.
const ATTRIBUTE_SIZE: u16 = 0x0014;

pub(crate) fn parse_error(message: impl Into<String>) -> ManifestError {
    ManifestError::Parse {
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub ty: u16,
    pub header_size: u16,
    pub size: u32,
}

impl ChunkHeader {
    pub fn read(r: &mut impl Read) -> Result<Self> {
        let ty = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let header_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let size = r.read_u32::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            ty,
            header_size,
            size,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u16::<LittleEndian>(self.ty)?;
        w.write_u16::<LittleEndian>(self.header_size)?;
        w.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }
}

fn truncated(_: std::io::Error) -> ManifestError {
    parse_error("unexpected end of input")
}

/// Per-node header shared by namespace and element chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeHeader {
    pub line_number: u32,
    pub comment: i32,
}

impl NodeHeader {
    pub fn read(r: &mut impl Read) -> Result<Self> {
        let line_number = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let comment = r.read_i32::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            line_number,
            comment,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.line_number)?;
        w.write_i32::<LittleEndian>(self.comment)?;
        Ok(())
    }
}

impl Default for NodeHeader {
    fn default() -> Self {
        Self {
            line_number: 1,
            comment: -1,
        }
    }
}

/// Raw attribute record as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawAttribute {
    pub namespace: i32,
    pub name: i32,
    pub raw_value: i32,
    pub data_type: u8,
    pub data: u32,
}

impl RawAttribute {
    pub fn read(r: &mut impl Read) -> Result<Self> {
        let namespace = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let name = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let raw_value = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let value_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
        if value_size != RES_VALUE_SIZE {
            return Err(parse_error(format!("bad value size {value_size}")).into());
        }
        let _res0 = r.read_u8().map_err(truncated)?;
        let data_type = r.read_u8().map_err(truncated)?;
        let data = r.read_u32::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            namespace,
            name,
            raw_value,
            data_type,
            data,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.namespace)?;
        w.write_i32::<LittleEndian>(self.name)?;
        w.write_i32::<LittleEndian>(self.raw_value)?;
        w.write_u16::<LittleEndian>(RES_VALUE_SIZE)?;
        w.write_u8(0)?;
        w.write_u8(self.data_type)?;
        w.write_u32::<LittleEndian>(self.data)?;
        Ok(())
    }
}

/// Fixed fields of a start-element chunk body (attributes follow)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawStartElement {
    pub namespace: i32,
    pub name: i32,
    pub attribute_count: u16,
    pub id_index: u16,
    pub class_index: u16,
    pub style_index: u16,
}

impl RawStartElement {
    pub fn read(r: &mut impl Read) -> Result<Self> {
        let namespace = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let name = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let attribute_start = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let attribute_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
        if attribute_start != ATTRIBUTE_SIZE || attribute_size != ATTRIBUTE_SIZE {
            return Err(parse_error("unsupported attribute layout").into());
        }
        let attribute_count = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let id_index = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let class_index = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let style_index = r.read_u16::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            namespace,
            name,
            attribute_count,
            id_index,
            class_index,
            style_index,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.namespace)?;
        w.write_i32::<LittleEndian>(self.name)?;
        w.write_u16::<LittleEndian>(ATTRIBUTE_SIZE)?;
        w.write_u16::<LittleEndian>(ATTRIBUTE_SIZE)?;
        w.write_u16::<LittleEndian>(self.attribute_count)?;
        w.write_u16::<LittleEndian>(self.id_index)?;
        w.write_u16::<LittleEndian>(self.class_index)?;
        w.write_u16::<LittleEndian>(self.style_index)?;
        Ok(())
    }
}

/// Decode a string-pool chunk. The reader sits just past the chunk
/// header; `chunk_start`/`header` locate the pool body.
pub(crate) fn read_string_pool(
    r: &mut Cursor<&[u8]>,
    chunk_start: u64,
    header: ChunkHeader,
) -> Result<Vec<String>> {
    let string_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let style_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let flags = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let strings_start = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let _styles_start = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let utf8 = flags & STRING_POOL_UTF8_FLAG != 0;

    // The offset tables sit immediately after the pool header.
    r.seek(SeekFrom::Start(chunk_start + u64::from(header.header_size)))?;
    let mut offsets = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        offsets.push(r.read_u32::<LittleEndian>().map_err(truncated)?);
    }
    // Style spans are not used by manifests; skip their offset table.
    for _ in 0..style_count {
        let _ = r.read_u32::<LittleEndian>().map_err(truncated)?;
    }

    let base = chunk_start + u64::from(strings_start);
    let mut strings = Vec::with_capacity(string_count as usize);
    for offset in offsets {
        r.seek(SeekFrom::Start(base + u64::from(offset)))?;
        strings.push(if utf8 {
            read_utf8_string(r)?
        } else {
            read_utf16_string(r)?
        });
    }

    r.seek(SeekFrom::Start(chunk_start + u64::from(header.size)))?;
    Ok(strings)
}

fn read_utf8_string(r: &mut impl Read) -> Result<String> {
    // Character count precedes byte count; both use a 1-or-2-byte
    // varlen with the high bit of the first byte as the extension flag.
    let _chars = read_utf8_len(r)?;
    let bytes = read_utf8_len(r)?;
    let mut buf = vec![0u8; bytes];
    r.read_exact(&mut buf).map_err(truncated)?;
    String::from_utf8(buf).map_err(|_| parse_error("invalid UTF-8 in string pool").into())
}

fn read_utf8_len(r: &mut impl Read) -> Result<usize> {
    let first = r.read_u8().map_err(truncated)?;
    if first & 0x80 == 0 {
        return Ok(first as usize);
    }
    let second = r.read_u8().map_err(truncated)?;
    Ok(((first as usize & 0x7f) << 8) | second as usize)
}

fn read_utf16_string(r: &mut impl Read) -> Result<String> {
    let first = u32::from(r.read_u16::<LittleEndian>().map_err(truncated)?);
    let units = if first & 0x8000 == 0 {
        first
    } else {
        let second = u32::from(r.read_u16::<LittleEndian>().map_err(truncated)?);
        ((first & 0x7fff) << 16) | second
    };
    let mut buf = Vec::with_capacity(units as usize);
    for _ in 0..units {
        buf.push(r.read_u16::<LittleEndian>().map_err(truncated)?);
    }
    String::from_utf16(&buf).map_err(|_| parse_error("invalid UTF-16 in string pool").into())
}

/// Encode `strings` as a UTF-8 string pool chunk (no styles).
pub(crate) fn write_string_pool(w: &mut Cursor<Vec<u8>>, strings: &[String]) -> Result<()> {
    let chunk_start = w.position();
    let count = u32::try_from(strings.len())
        .map_err(|_| ManifestError::Encode {
            message: "string pool too large".to_string(),
        })?;
    let header_size: u16 = 8 + 20;
    let strings_start = u32::from(header_size) + 4 * count;

    // Header is rewritten once the total size is known.
    ChunkHeader {
        ty: CHUNK_STRING_POOL,
        header_size,
        size: 0,
    }
    .write(w)?;
    w.write_u32::<LittleEndian>(count)?;
    w.write_u32::<LittleEndian>(0)?; // style count
    w.write_u32::<LittleEndian>(STRING_POOL_UTF8_FLAG)?;
    w.write_u32::<LittleEndian>(strings_start)?;
    w.write_u32::<LittleEndian>(0)?; // styles start

    let offsets_pos = w.position();
    for _ in 0..count {
        w.write_u32::<LittleEndian>(0)?;
    }

    let data_start = w.position();
    let mut offsets = Vec::with_capacity(strings.len());
    for string in strings {
        offsets.push(u32::try_from(w.position() - data_start).map_err(|_| {
            ManifestError::Encode {
                message: "string pool too large".to_string(),
            }
        })?);
        write_utf8_string(w, string)?;
    }
    while (w.position() - chunk_start) % 4 != 0 {
        w.write_u8(0)?;
    }
    let chunk_end = w.position();

    w.seek(SeekFrom::Start(offsets_pos))?;
    for offset in offsets {
        w.write_u32::<LittleEndian>(offset)?;
    }
    patch_chunk_size(w, chunk_start, chunk_end)?;
    Ok(())
}

fn write_utf8_string(w: &mut impl Write, string: &str) -> Result<()> {
    write_utf8_len(w, string.chars().count())?;
    write_utf8_len(w, string.len())?;
    w.write_all(string.as_bytes())?;
    w.write_u8(0)?;
    Ok(())
}

fn write_utf8_len(w: &mut impl Write, len: usize) -> Result<()> {
    if len > 0x7fff {
        return Err(ManifestError::Encode {
            message: format!("string too long for pool: {len}"),
        }
        .into());
    }
    if len > 0x7f {
        #[allow(clippy::cast_possible_truncation)]
        w.write_u8(0x80 | (len >> 8) as u8)?;
    }
    #[allow(clippy::cast_possible_truncation)]
    w.write_u8((len & 0xff) as u8)?;
    Ok(())
}

/// Rewrite the size field of the chunk that starts at `chunk_start`,
/// leaving the cursor at `chunk_end`.
pub(crate) fn patch_chunk_size(
    w: &mut Cursor<Vec<u8>>,
    chunk_start: u64,
    chunk_end: u64,
) -> Result<()> {
    let size = u32::try_from(chunk_end - chunk_start).map_err(|_| ManifestError::Encode {
        message: "chunk too large".to_string(),
    })?;
    w.seek(SeekFrom::Start(chunk_start + 4))?;
    w.write_u32::<LittleEndian>(size)?;
    w.seek(SeekFrom::Start(chunk_end))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_pool_round_trips() {
        let strings: Vec<String> = vec![
            "package".into(),
            "com.example.app".into(),
            String::new(),
            "x".repeat(200), // forces the two-byte length form
        ];
        let mut w = Cursor::new(Vec::new());
        write_string_pool(&mut w, &strings).unwrap();

        let bytes = w.into_inner();
        let mut r = Cursor::new(bytes.as_slice());
        let header = ChunkHeader::read(&mut r).unwrap();
        assert_eq!(header.ty, CHUNK_STRING_POOL);
        let decoded = read_string_pool(&mut r, 0, header).unwrap();
        assert_eq!(decoded, strings);
    }

    #[test]
    fn utf16_strings_decode() {
        // Hand-built UTF-16 pool with a single entry "ab".
        let mut w = Cursor::new(Vec::new());
        ChunkHeader {
            ty: CHUNK_STRING_POOL,
            header_size: 28,
            size: 0,
        }
        .write(&mut w)
        .unwrap();
        w.write_u32::<LittleEndian>(1).unwrap(); // string count
        w.write_u32::<LittleEndian>(0).unwrap(); // style count
        w.write_u32::<LittleEndian>(0).unwrap(); // flags: UTF-16
        w.write_u32::<LittleEndian>(32).unwrap(); // strings start
        w.write_u32::<LittleEndian>(0).unwrap(); // styles start
        w.write_u32::<LittleEndian>(0).unwrap(); // offset[0]
        w.write_u16::<LittleEndian>(2).unwrap(); // length in units
        w.write_u16::<LittleEndian>(u16::from(b'a')).unwrap();
        w.write_u16::<LittleEndian>(u16::from(b'b')).unwrap();
        w.write_u16::<LittleEndian>(0).unwrap();
        let end = w.position();
        patch_chunk_size(&mut w, 0, end).unwrap();

        let bytes = w.into_inner();
        let mut r = Cursor::new(bytes.as_slice());
        let header = ChunkHeader::read(&mut r).unwrap();
        let decoded = read_string_pool(&mut r, 0, header).unwrap();
        assert_eq!(decoded, vec!["ab".to_string()]);
    }
}
