//! RPM header codec: lead, signature header, main header, and the byte
//! store shared between index entries — per spec.md §4.1/§6.
//!
//! Grounded in the teacher crate's `header/{index,lead}.rs` (kept almost
//! verbatim: the tagged-union `RType`, the `Tags<T>` reader, and
//! `align_n_bytes`-style alignment) plus a from-scratch writer and
//! region-tag handling that the teacher never finished wiring up.

mod index;
mod lead;
mod tags;

pub use index::*;
pub use lead::*;
pub use tags::*;

use crate::error::{FormatError, SchemaError};
use crate::utils::align_n_bytes;
use log::debug;
use num_traits::{FromPrimitive, ToPrimitive};
use std::char;
use std::collections::HashMap;
use std::hash::Hash;
use std::io::{self, Read, Seek, Write};
use std::mem::size_of;

/// The 8-byte index-entry magic that opens both the signature and main
/// header blobs (after the 4-byte `HeaderLead` magic+reserved).
pub const HEADER_MAGIC: [u8; 8] = [0x8E, 0xAD, 0xE8, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Tag ids used to bracket the "this part of the header is covered by the
/// digest/signature" region. `Regions` (64) never appears on disk; it is
/// kept in `Tag` only for completeness.
pub const SIGNATURE_REGION_TAG: u32 = 62; // HeaderSignatures
pub const IMMUTABLE_REGION_TAG: u32 = 63; // HeaderImmutable

#[derive(Debug, Default, Clone)]
pub struct Tags<T>(pub HashMap<T, RType>)
where
    T: Eq + Hash;

impl<T> Tags<T>
where
    T: FromPrimitive + ToPrimitive + Default + Eq + Hash + Copy,
{
    pub fn get<O>(&self, name: T) -> O
    where
        O: Default + From<RType>,
    {
        match self.0.get(&name) {
            Some(value) => value.clone().into(),
            _ => O::default(),
        }
    }

    pub fn get_opt(&self, name: T) -> Option<&RType> {
        self.0.get(&name)
    }

    pub fn contains(&self, name: T) -> bool {
        self.0.contains_key(&name)
    }

    pub fn insert(&mut self, name: T, value: RType) {
        self.0.insert(name, value);
    }

    /// Read the index array then the byte store it references, decoding
    /// every tag's `RType` out of the store.
    pub fn read<R>(fh: &mut R, indexes: &[Index<T>], size: usize) -> Result<Self, io::Error>
    where
        R: Read + Seek,
    {
        let mut s_data = vec![0_u8; size];
        fh.read_exact(&mut s_data)?;

        Self::tags_from_raw(indexes, &s_data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Decode every index entry's `RType` out of `data`. Identical
    /// duplicate entries for the same tag collapse silently; a tag
    /// repeated with *conflicting* values fails with `DUPLICATE_TAG`,
    /// except `Dirindexes`/`Basenames`/`DirNames`, which old relocation-
    /// rewriting tools may legitimately emit twice (renamed internally to
    /// `dirindexes2`/`basenames2`/`dirnames2` by real rpm) — this reader
    /// keeps the first occurrence of those three rather than modeling the
    /// renamed shadow tags, since nothing downstream consumes the second
    /// copy.
    pub fn tags_from_raw(indexes: &[Index<T>], data: &[u8]) -> Result<Self, SchemaError>
    where
        T: Into<Tag> + Copy,
    {
        let mut tags: HashMap<T, RType> = HashMap::with_capacity(indexes.len());

        for i in 0..indexes.len() {
            let item = &indexes[i];
            let ps = item.offset;

            if item.tag.into().is_region() {
                // The region sentinel is re-derived by `write_header` on
                // every save; keeping the parsed copy around would make
                // the writer emit it twice, so it's dropped here rather
                // than stored.
                continue;
            }

            let tag_value = match item.itype {
                Type::Null => RType::Null,
                Type::Char => RType::Char(char::from_bytes(data, ps)),
                Type::Int8 => extract(data, ps, item.count, RType::Int8, RType::Int8Array),
                Type::Int16 => extract(data, ps, item.count, RType::Int16, RType::Int16Array),
                Type::Int32 => extract(data, ps, item.count, RType::Int32, RType::Int32Array),
                Type::Int64 => extract(data, ps, item.count, RType::Int64, RType::Int64Array),
                Type::String => {
                    let ps2 = next_offset(indexes, i, data.len());
                    RType::String(parse_string(&data[ps..ps2]))
                }
                Type::Bin => {
                    let ps2 = ps + item.count;
                    RType::Bin(data[ps..ps2].to_vec())
                }
                Type::StringArray => {
                    let ps2 = next_offset(indexes, i, data.len());
                    RType::StringArray(parse_strings(&data[ps..ps2], item.count))
                }
                Type::I18nstring => {
                    let ps2 = next_offset(indexes, i, data.len());
                    RType::I18nstring(parse_string(&data[ps..ps2]))
                }
            };

            if let Some(existing) = tags.get(&item.tag) {
                if existing != &tag_value {
                    let as_tag: Tag = item.tag.into();
                    let renames_on_duplicate =
                        matches!(as_tag, Tag::Dirindexes | Tag::Basenames | Tag::DirNames);
                    if renames_on_duplicate {
                        debug!(
                            "tag {} repeated with a conflicting value (relocation duplicate), keeping first",
                            item.tag.to_u32().unwrap_or_default()
                        );
                    } else {
                        return Err(SchemaError::DuplicateTag(item.tag.to_u32().unwrap_or_default()));
                    }
                } else {
                    debug!("tag {} repeated with an identical value", item.tag.to_u32().unwrap_or_default());
                }
                continue;
            }
            tags.insert(item.tag, tag_value);
        }

        Ok(Tags(tags))
    }

    /// Serialize to an index array and a byte store, padding the store so
    /// every value starts at its type's required alignment. Entries are
    /// emitted in ascending tag-id order.
    pub fn write_header<W: Write>(&self, fh: &mut W, region_tag: Option<T>) -> io::Result<()>
    where
        T: Ord + ToPrimitive,
    {
        let mut entries: Vec<(&T, &RType)> = self.0.iter().collect();
        entries.sort_by_key(|(t, _)| t.to_u32().unwrap_or(u32::MAX));

        let mut store = Vec::new();
        let mut index_entries = Vec::with_capacity(entries.len() + 1);

        for (tag, value) in &entries {
            let itype = value.rtype();
            let align = type_alignment(itype);
            let pad = align_n_bytes(store.len() as u32, align) as usize;
            store.resize(store.len() + pad, 0);
            let offset = store.len();
            let count = write_value(&mut store, value);
            index_entries.push((tag.to_u32().unwrap_or_default(), itype, offset, count));
        }

        let nindex = index_entries.len() + region_tag.map_or(0, |_| 1);
        let hsize = store.len() as u32;

        fh.write_all(&HEADER_MAGIC)?;
        fh.write_all(&(nindex as u32).to_be_bytes())?;
        fh.write_all(&hsize.to_be_bytes())?;

        if let Some(rt) = region_tag {
            // Region entry points at the last 16 bytes of the store, which
            // we haven't written yet; convention: store a trailing
            // self-describing index entry there too. Index entry goes
            // first; the sentinel bytes are appended to the store below.
            fh.write_all(&rt.to_u32().unwrap_or_default().to_be_bytes())?;
            fh.write_all(&(Type::Bin as u32).to_be_bytes())?;
            fh.write_all(&(store.len() as u32).to_be_bytes())?;
            fh.write_all(&16u32.to_be_bytes())?;
        }

        for (tag_id, itype, offset, count) in &index_entries {
            fh.write_all(&tag_id.to_be_bytes())?;
            fh.write_all(&(itype.to_u32().unwrap_or_default()).to_be_bytes())?;
            fh.write_all(&(*offset as u32).to_be_bytes())?;
            fh.write_all(&(*count as u32).to_be_bytes())?;
        }

        if region_tag.is_some() {
            // Trailing 16-byte sentinel copy of the region's own index
            // entry, per the RPM region convention.
            let (tag_id, itype, offset, count) = index_entries.first().copied().unwrap_or((
                region_tag.unwrap().to_u32().unwrap_or_default(),
                Type::Bin,
                0,
                16,
            ));
            store.extend_from_slice(&tag_id.to_be_bytes());
            store.extend_from_slice(&(itype.to_u32().unwrap_or_default()).to_be_bytes());
            store.extend_from_slice(&(offset as i32).to_be_bytes());
            store.extend_from_slice(&(count as u32).to_be_bytes());
        }

        fh.write_all(&store)?;
        Ok(())
    }
}

fn next_offset<T>(indexes: &[Index<T>], i: usize, data_len: usize) -> usize {
    indexes.get(i + 1).map(|idx| idx.offset).unwrap_or(data_len)
}

fn type_alignment(t: Type) -> u32 {
    match t {
        Type::Int16 => 2,
        Type::Int32 => 4,
        Type::Int64 => 8,
        _ => 1,
    }
}

fn write_value(store: &mut Vec<u8>, value: &RType) -> usize {
    match value {
        RType::Null => 0,
        RType::Char(c) => {
            store.extend_from_slice(&(*c as u32).to_be_bytes());
            1
        }
        RType::Int8(n) => {
            store.push(*n);
            1
        }
        RType::Int8Array(a) => {
            store.extend_from_slice(a);
            a.len()
        }
        RType::Int16(n) => {
            store.extend_from_slice(&n.to_be_bytes());
            1
        }
        RType::Int16Array(a) => {
            for n in a {
                store.extend_from_slice(&n.to_be_bytes());
            }
            a.len()
        }
        RType::Int32(n) => {
            store.extend_from_slice(&n.to_be_bytes());
            1
        }
        RType::Int32Array(a) => {
            for n in a {
                store.extend_from_slice(&n.to_be_bytes());
            }
            a.len()
        }
        RType::Int64(n) => {
            store.extend_from_slice(&n.to_be_bytes());
            1
        }
        RType::Int64Array(a) => {
            for n in a {
                store.extend_from_slice(&n.to_be_bytes());
            }
            a.len()
        }
        RType::String(s) => {
            store.extend_from_slice(s.as_bytes());
            store.push(0);
            1
        }
        RType::Bin(b) => {
            store.extend_from_slice(b);
            b.len()
        }
        RType::StringArray(a) => {
            for s in a {
                store.extend_from_slice(s.as_bytes());
                store.push(0);
            }
            a.len()
        }
        RType::I18nstring(s) => {
            store.extend_from_slice(s.as_bytes());
            store.push(0);
            1
        }
    }
}

fn extract<T: FromBytes>(
    data: &[u8],
    position: usize,
    count: usize,
    single: fn(T) -> RType,
    multiple: fn(Vec<T>) -> RType,
) -> RType {
    if count > 1 {
        let values: Vec<T> = (0..count)
            .map(|i| T::from_bytes(data, position + i * size_of::<T>()))
            .collect();
        multiple(values)
    } else {
        single(T::from_bytes(data, position))
    }
}

pub(crate) fn parse_string(bytes: &[u8]) -> String {
    let position = bytes.iter().position(|&x| x == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[0..position]).to_string()
}

pub(crate) fn parse_strings(bytes: &[u8], count: usize) -> Vec<String> {
    bytes
        .split(|x| *x == 0)
        .take(count)
        .map(|b| String::from_utf8_lossy(b).to_string())
        .collect()
}

trait FromBytes {
    fn from_bytes(data: &[u8], position: usize) -> Self;
}

impl FromBytes for u8 {
    fn from_bytes(data: &[u8], position: usize) -> u8 {
        data[position]
    }
}

impl FromBytes for char {
    fn from_bytes(data: &[u8], position: usize) -> char {
        char::from_u32(u32::from_bytes(data, position)).unwrap_or_default()
    }
}

macro_rules! from_bytes (
    ($item:ty, $number:expr) => (
        impl FromBytes for $item {
            fn from_bytes(data: &[u8], position: usize) -> $item {
                let mut bytes: [u8; $number] = Default::default();
                bytes.copy_from_slice(&data[position..position + $number]);
                <$item>::from_be_bytes(bytes)
            }
        }
    );
);

from_bytes!(u16, 2);
from_bytes!(u32, 4);
from_bytes!(u64, 8);

/// A fully-read RPM: lead, signature header tags, main header tags, and
/// the byte offset payload starts at within the source stream.
#[derive(Debug)]
pub struct Header {
    pub lead: HeaderLead,
    pub signature: Tags<Tag>,
    pub main: Tags<Tag>,
    /// Byte offset of the main header's own magic, within the source
    /// stream — the start of the region `Sha1header`/`Sigmd5` digest
    /// (spec.md §7 digest verification).
    pub main_header_start: u64,
    pub payload_offset: u64,
}

impl Header {
    pub fn read<R: Read + Seek>(fh: &mut R) -> Result<Self, FormatError> {
        let lead = HeaderLead::read(fh).map_err(|e| FormatError::MalformedLead(e.to_string()))?;

        let sig_start = fh
            .stream_position()
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))?;
        let signature = read_tags_section(fh).map_err(|e| FormatError::MalformedHeader(format!("signature header: {e}")))?;

        let sig_end = fh
            .stream_position()
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))?;
        let padded = align_n_bytes((sig_end - sig_start) as u32, 8) as i64;
        fh.seek(io::SeekFrom::Current(padded))
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))?;

        let main_header_start = fh
            .stream_position()
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))?;
        let main = read_tags_section(fh).map_err(|e| FormatError::MalformedHeader(format!("main header: {e}")))?;

        let payload_offset = fh
            .stream_position()
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))?;

        Ok(Header {
            lead,
            signature,
            main,
            main_header_start,
            payload_offset,
        })
    }

    /// Pull a required tag out of the main header, mapping absence to a
    /// schema error carrying the tag id.
    pub fn require(&self, tag: Tag) -> Result<&RType, SchemaError> {
        self.main
            .get_opt(tag)
            .ok_or_else(|| SchemaError::UnknownTag(tag.to_u32().unwrap_or_default()))
    }

    /// Reassemble the on-disk layout: lead, signature header padded to an
    /// 8-byte boundary, then the unpadded main header. Round-tripping a
    /// parsed `Header` through `write` and back through `read` must yield
    /// an identical structure (spec.md §8).
    pub fn write<W: Write>(&self, fh: &mut W) -> io::Result<()> {
        self.lead.write(fh)?;

        let mut sig_buf = Vec::new();
        self.signature.write_header(&mut sig_buf, Some(Tag::Signatures))?;
        fh.write_all(&sig_buf)?;
        let pad = align_n_bytes(sig_buf.len() as u32, 8) as usize;
        fh.write_all(&vec![0_u8; pad])?;

        self.main.write_header(fh, Some(Tag::Immutable))
    }
}

fn read_tags_section<R: Read + Seek>(fh: &mut R) -> io::Result<Tags<Tag>> {
    let mut magic = [0u8; 8];
    fh.read_exact(&mut magic)?;
    if magic != HEADER_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad header magic"));
    }

    let mut nindex_b = [0u8; 4];
    fh.read_exact(&mut nindex_b)?;
    let nindex = u32::from_be_bytes(nindex_b) as usize;

    let mut hsize_b = [0u8; 4];
    fh.read_exact(&mut hsize_b)?;
    let hsize = u32::from_be_bytes(hsize_b) as usize;

    let indexes: Vec<Index<Tag>> = IndexArray::read(fh, nindex)?;
    Tags::read(fh, &indexes, hsize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_identical_tags_collapse_to_one() {
        let indexes = vec![
            Index {
                tag: Tag::Name,
                itype: Type::String,
                offset: 0,
                count: 1,
            },
            Index {
                tag: Tag::Name,
                itype: Type::String,
                offset: 0,
                count: 1,
            },
        ];
        let data = b"foo\0".to_vec();
        let tags = Tags::tags_from_raw(&indexes, &data).unwrap();
        assert_eq!(tags.0.len(), 1);
    }

    #[test]
    fn conflicting_duplicate_tag_is_rejected() {
        let indexes = vec![
            Index {
                tag: Tag::Name,
                itype: Type::String,
                offset: 0,
                count: 1,
            },
            Index {
                tag: Tag::Name,
                itype: Type::String,
                offset: 4,
                count: 1,
            },
        ];
        let data = b"foo\0bar\0".to_vec();
        let err = Tags::tags_from_raw(&indexes, &data).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTag(_)));
    }

    #[test]
    fn round_trip_int32_and_string() {
        let mut tags: Tags<Tag> = Tags::default();
        tags.insert(Tag::Epoch, RType::Int32(3));
        tags.insert(Tag::Name, RType::String("pkg".into()));

        let mut buf = Vec::new();
        tags.write_header(&mut buf, None).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let read_back = read_tags_section(&mut cursor).unwrap();
        assert_eq!(read_back.get::<u32>(Tag::Epoch), 3);
        assert_eq!(read_back.get::<String>(Tag::Name), "pkg".to_string());
    }

    /// spec.md §8: `parse(serialize(parse(bytes))) == parse(bytes)`. Every
    /// real RPM carries an immutable region, so the round trip has to
    /// survive a second pass through `write_header`/`tags_from_raw` without
    /// the region tag's sentinel colliding with itself.
    #[test]
    fn round_trip_with_region_tag_is_idempotent() {
        let mut tags: Tags<Tag> = Tags::default();
        tags.insert(Tag::Name, RType::String("pkg".into()));
        tags.insert(Tag::Version, RType::String("1.0".into()));

        let mut buf = Vec::new();
        tags.write_header(&mut buf, Some(Tag::Immutable)).unwrap();

        let mut cursor = io::Cursor::new(buf.clone());
        let once = read_tags_section(&mut cursor).unwrap();
        assert!(!once.contains(Tag::Immutable));

        let mut rewritten = Vec::new();
        once.write_header(&mut rewritten, Some(Tag::Immutable)).unwrap();
        let mut cursor2 = io::Cursor::new(rewritten);
        let twice = read_tags_section(&mut cursor2).unwrap();

        assert_eq!(twice.get::<String>(Tag::Name), "pkg".to_string());
        assert_eq!(twice.get::<String>(Tag::Version), "1.0".to_string());
    }
}
