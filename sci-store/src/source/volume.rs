//! Volume data files: the packed byte containers behind map entries
//!
//! A volume has no index of its own. Each resource sits at a map-given
//! offset behind a small record header whose layout depends on the
//! volume generation; the header names the id again, the packed and
//! unpacked sizes and the compression tag.

use std::io::Cursor;
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use tracing::trace;

use sci_codec::Compression;

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::types::{Location, ResourceId, ResourceKind};
use crate::version::VolumeVersion;

/// One `resource.NNN` (or `resource.msg` style) data file.
#[derive(Debug, Clone)]
pub(crate) struct VolumeSource {
    pub path: PathBuf,
    pub number: u16,
}

/// An audio data file (`resource.aud` / `resource.sfx`). Audio map
/// records carry explicit sizes, so there is no per-record header; a
/// compressed audio volume instead opens with a codec tag and an
/// offset relocation table.
#[derive(Debug, Clone)]
pub(crate) struct AudioVolumeSource {
    pub path: PathBuf,
}

/// The id, sizes and compression tag parsed out of one record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub kind: Option<ResourceKind>,
    pub number: u16,
    pub packed: u32,
    pub unpacked: u32,
    pub tag: u16,
}

/// Parse one record header under the given layout. `header` must be at
/// least `version.header_len()` bytes.
pub(crate) fn parse_record_header(header: &[u8], version: VolumeVersion) -> Result<RecordHeader> {
    let mut rd = Cursor::new(header);
    match version {
        VolumeVersion::Sci0Early | VolumeVersion::Sci0Late => {
            let id = rd.read_u16::<LittleEndian>()?;
            let packed = u32::from(rd.read_u16::<LittleEndian>()?);
            let unpacked = u32::from(rd.read_u16::<LittleEndian>()?);
            let tag = rd.read_u16::<LittleEndian>()?;
            // The early layout counts the unpacked-size and tag words
            // as part of the packed size.
            let packed = if version == VolumeVersion::Sci0Early {
                packed.checked_sub(4).ok_or_else(|| StoreError::DecompressionSanityFailed(
                    "packed size smaller than its own header".into(),
                ))?
            } else {
                packed
            };
            Ok(RecordHeader {
                kind: ResourceKind::from_u8((id >> 11) as u8),
                number: id & 0x07FF,
                packed,
                unpacked,
                tag,
            })
        }
        VolumeVersion::Sci1Late | VolumeVersion::Sci11 => {
            let kind = rd.read_u8()? & 0x7F;
            let number = rd.read_u16::<LittleEndian>()?;
            let packed = u32::from(rd.read_u16::<LittleEndian>()?);
            let unpacked = u32::from(rd.read_u16::<LittleEndian>()?);
            let tag = rd.read_u16::<LittleEndian>()?;
            Ok(RecordHeader {
                kind: ResourceKind::from_u8(kind),
                number,
                packed,
                unpacked,
                tag,
            })
        }
        VolumeVersion::Sci2 | VolumeVersion::Sci3 => {
            let kind = rd.read_u8()? & 0x7F;
            let number = rd.read_u16::<LittleEndian>()?;
            let packed = rd.read_u32::<LittleEndian>()?;
            let unpacked = rd.read_u32::<LittleEndian>()?;
            let tag = rd.read_u16::<LittleEndian>()?;
            Ok(RecordHeader {
                kind: ResourceKind::from_u8(kind),
                number,
                packed,
                unpacked,
                tag,
            })
        }
    }
}

/// Map a record's compression tag to a codec. The tag domain changed
/// with every volume generation, so the same numeric tag means
/// different things under different layouts.
pub(crate) fn compression_for(version: VolumeVersion, tag: u16) -> Result<Compression> {
    let scheme = match (version, tag) {
        (_, 0) => Some(Compression::None),
        (VolumeVersion::Sci0Early | VolumeVersion::Sci0Late, 1) => Some(Compression::Huffman),
        (VolumeVersion::Sci0Early | VolumeVersion::Sci0Late, 2) => Some(Compression::Lzw),
        (VolumeVersion::Sci1Late, 1) => Some(Compression::Huffman),
        (VolumeVersion::Sci1Late, 2) => Some(Compression::Lzw1),
        (VolumeVersion::Sci1Late, 3) => Some(Compression::LzwPic),
        (VolumeVersion::Sci11, 18..=20) => Some(Compression::Dcl),
        (VolumeVersion::Sci2 | VolumeVersion::Sci3, 32) => Some(Compression::Stac),
        _ => None,
    };
    scheme.ok_or(StoreError::UnknownCompression(tag))
}

/// Read and decompress the resource at `location` out of `src`.
pub(crate) fn load(
    src: &VolumeSource,
    files: &mut FileCache,
    id: ResourceId,
    location: Location,
    version: VolumeVersion,
) -> Result<(Bytes, Option<Vec<u8>>)> {
    let header_len = version.header_len();
    let header = files.read_up_to(&src.path, location.offset, header_len)?;
    if header.len() < header_len {
        // A record at or past end of file has no content at all.
        return Err(StoreError::EmptyResource(id));
    }
    let rec = parse_record_header(&header, version)?;

    // The header restates the id; a mismatch means the map entry points
    // into the middle of something else.
    let matches = match version {
        VolumeVersion::Sci0Early | VolumeVersion::Sci0Late => {
            rec.kind == Some(id.kind) && rec.number == id.number
        }
        // Later layouts repeat the number reliably but some interpreters
        // rewrote the type byte; only check the number.
        _ => rec.number == id.number,
    };
    if !matches {
        return Err(StoreError::InvalidMapEntry {
            id,
            reason: format!(
                "record header names {:?}.{}, map entry disagrees",
                rec.kind, rec.number
            ),
        });
    }

    let scheme = compression_for(version, rec.tag)?;
    trace!(%id, ?scheme, packed = rec.packed, unpacked = rec.unpacked, "loading from volume");

    let packed = files.read_range(
        &src.path,
        location.offset + header_len as u64,
        rec.packed as usize,
    )?;
    let data = sci_codec::decompress(scheme, &packed, rec.unpacked as usize)?;
    Ok((Bytes::from(data), None))
}

/// Codec tags a compressed audio volume may open with.
const AUDIO_VOLUME_TAGS: [&[u8; 4]; 3] = [b"MP3 ", b"OGG ", b"FLA "];

/// Read the resource at `location` out of an audio volume. The map
/// record supplied the size; a compressed volume additionally needs the
/// stored offset translated through the relocation table.
pub(crate) fn load_audio(
    src: &AudioVolumeSource,
    files: &mut FileCache,
    id: ResourceId,
    location: Location,
) -> Result<(Bytes, Option<Vec<u8>>)> {
    let size = location.size.ok_or_else(|| StoreError::InvalidMapEntry {
        id,
        reason: "audio map entry without a size".into(),
    })?;

    let magic = files.read_up_to(&src.path, 0, 4)?;
    let offset = if AUDIO_VOLUME_TAGS.iter().any(|t| magic.as_slice() == *t) {
        relocate_offset(files, &src.path, id, location.offset)?
    } else {
        location.offset
    };

    if size == 0 {
        return Err(StoreError::EmptyResource(id));
    }
    let data = files.read_range(&src.path, offset, size as usize)?;
    Ok((Bytes::from(data), None))
}

/// Translate a map-stored offset through the relocation table at the
/// head of a compressed audio volume.
fn relocate_offset(
    files: &mut FileCache,
    path: &std::path::Path,
    id: ResourceId,
    stored: u64,
) -> Result<u64> {
    let count_bytes = files.read_range(path, 4, 4)?;
    let count = Cursor::new(count_bytes).read_u32::<LittleEndian>()?;
    let table = files.read_range(path, 8, count as usize * 8)?;
    let mut rd = Cursor::new(table);
    for _ in 0..count {
        let original = u64::from(rd.read_u32::<LittleEndian>()?);
        let actual = u64::from(rd.read_u32::<LittleEndian>()?);
        if original == stored {
            return Ok(actual);
        }
    }
    Err(StoreError::InvalidMapEntry {
        id,
        reason: format!("offset {stored} missing from the audio relocation table"),
    })
}
