//! Mac releases: resources indexed through the OS resource fork
//!
//! The fork replaces both map and volume. Its own map names typed,
//! numbered entries; each data entry is a length-prefixed blob,
//! LZ-compressed except for a short allow-list of kinds that shipped
//! raw. Tuple-addressed audio and sync entries are recognized by their
//! fork-internal names, which reuse the loose-file base-36 grammar.

use std::io::Cursor;
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::source::{directory, ScanCtx};
use crate::types::{Location, ResourceId, ResourceKind};

#[derive(Debug, Clone)]
pub(crate) struct MacForkSource {
    pub path: PathBuf,
}

/// Fork type tags and the kinds they carry.
const TYPE_TAGS: &[(&[u8; 4], ResourceKind)] = &[
    (b"V56 ", ResourceKind::View),
    (b"P56 ", ResourceKind::Pic),
    (b"SCR ", ResourceKind::Script),
    (b"HEP ", ResourceKind::Heap),
    (b"TEX ", ResourceKind::Text),
    (b"FON ", ResourceKind::Font),
    (b"CURS", ResourceKind::Cursor),
    (b"PAL ", ResourceKind::Palette),
    (b"SND ", ResourceKind::Sound),
    (b"MSG ", ResourceKind::Message),
    (b"AUD ", ResourceKind::Audio),
    (b"SYN ", ResourceKind::Sync),
    (b"VOC ", ResourceKind::Vocab),
    (b"MAP ", ResourceKind::Map),
    (b"PAT ", ResourceKind::Patch),
    (b"PICT", ResourceKind::MacPict),
];

/// Kinds whose fork entries were stored uncompressed.
fn never_compressed(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::Audio
            | ResourceKind::Audio36
            | ResourceKind::Sync
            | ResourceKind::Sync36
            | ResourceKind::MacPict
            | ResourceKind::CdAudio
    )
}

fn kind_for_tag(tag: &[u8]) -> Option<ResourceKind> {
    TYPE_TAGS
        .iter()
        .find(|(t, _)| &t[..] == tag)
        .map(|&(_, k)| k)
}

pub(crate) fn scan(src: &MacForkSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    let len = ctx.files.file_len(&src.path)? as usize;
    let fork = ctx.files.read_up_to(&src.path, 0, len)?;
    let mut rd = Cursor::new(&fork[..]);
    let data_off = rd.read_u32::<BigEndian>()? as usize;
    let map_off = rd.read_u32::<BigEndian>()? as usize;

    let map = fork.get(map_off..).ok_or_else(|| bad_fork(src))?;
    let mut rd = Cursor::new(map);
    rd.set_position(24); // header copy, handle, file ref, attributes
    let type_list_off = usize::from(rd.read_u16::<BigEndian>()?);
    let name_list_off = usize::from(rd.read_u16::<BigEndian>()?);

    let types = map.get(type_list_off..).ok_or_else(|| bad_fork(src))?;
    let mut rd = Cursor::new(types);
    let type_count = usize::from(rd.read_u16::<BigEndian>()?.wrapping_add(1));
    for _ in 0..type_count {
        let mut tag = [0u8; 4];
        std::io::Read::read_exact(&mut rd, &mut tag)?;
        let item_count = usize::from(rd.read_u16::<BigEndian>()?.wrapping_add(1));
        let ref_off = usize::from(rd.read_u16::<BigEndian>()?);

        let Some(kind) = kind_for_tag(&tag) else {
            debug!(tag = %String::from_utf8_lossy(&tag), "skipping unknown fork type");
            continue;
        };

        let refs = types.get(ref_off..).ok_or_else(|| bad_fork(src))?;
        let mut refs = Cursor::new(refs);
        for _ in 0..item_count {
            let number = refs.read_u16::<BigEndian>()?;
            let name_off = refs.read_u16::<BigEndian>()?;
            let _attrs = refs.read_u8()?;
            let entry_off = {
                let hi = refs.read_u8()?;
                let mid = refs.read_u8()?;
                let lo = refs.read_u8()?;
                u32::from(hi) << 16 | u32::from(mid) << 8 | u32::from(lo)
            };
            let _handle = refs.read_u32::<BigEndian>()?;

            let id = match entry_name(map, name_list_off, name_off)
                .and_then(|n| directory::id_from_name(&n.to_ascii_lowercase()))
            {
                // Tuple-addressed audio and sync carry their identity
                // in the entry name.
                Some(named) if named.kind.is_base36() => named,
                _ => ResourceId::new(kind, number),
            };
            let abs = data_off as u64 + u64::from(entry_off);
            if abs >= len as u64 {
                warn!(%id, offset = abs, "fork entry points past end of fork");
                ctx.flag_bad();
                continue;
            }
            ctx.add_entry(id, Location::new(ctx.self_idx, abs));
        }
    }
    Ok(())
}

fn entry_name(map: &[u8], name_list_off: usize, name_off: u16) -> Option<String> {
    if name_off == 0xFFFF {
        return None;
    }
    let at = name_list_off + usize::from(name_off);
    let len = usize::from(*map.get(at)?);
    let bytes = map.get(at + 1..at + 1 + len)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

fn bad_fork(src: &MacForkSource) -> StoreError {
    StoreError::MapNotFound(src.path.display().to_string())
}

pub(crate) fn load(
    src: &MacForkSource,
    files: &mut FileCache,
    id: ResourceId,
    location: Location,
) -> Result<(Bytes, Option<Vec<u8>>)> {
    let len_bytes = files.read_range(&src.path, location.offset, 4)?;
    let entry_len = Cursor::new(len_bytes).read_u32::<BigEndian>()?;
    if entry_len == 0 {
        return Err(StoreError::EmptyResource(id));
    }
    let payload = files.read_range(&src.path, location.offset + 4, entry_len as usize)?;
    let data = if never_compressed(id.kind) {
        payload
    } else {
        unpack(&payload)?
    };
    Ok((Bytes::from(data), None))
}

/// End-of-stream opcode.
const END: u8 = 0xFF;

/// Decompress a fork entry. The last four bytes declare the plain
/// size (big-endian); the stream before them is a byte-oriented LZ:
/// the top two opcode bits select a literal run, a near copy with an
/// 11-bit offset, or a far copy with a 16-bit offset.
pub(crate) fn unpack(payload: &[u8]) -> Result<Vec<u8>> {
    let (stream, trailer) = payload
        .split_at_checked(payload.len().wrapping_sub(4))
        .ok_or_else(|| {
            StoreError::DecompressionSanityFailed("fork entry shorter than its size field".into())
        })?;
    let unpacked = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
    if unpacked > sci_codec::MAX_UNPACKED_SIZE {
        return Err(StoreError::ResourceTooLarge {
            size: unpacked,
            max: sci_codec::MAX_UNPACKED_SIZE,
        });
    }

    let mut out = Vec::with_capacity(unpacked);
    let mut pos = 0usize;
    loop {
        let op = *stream.get(pos).ok_or_else(truncated)?;
        pos += 1;
        let (offset, count) = match op >> 6 {
            0b00 => {
                let count = usize::from(op) + 1;
                let lit = stream.get(pos..pos + count).ok_or_else(truncated)?;
                pos += count;
                out.extend_from_slice(lit);
                check_ceiling(out.len(), unpacked)?;
                continue;
            }
            0b01 => {
                let low = *stream.get(pos).ok_or_else(truncated)?;
                pos += 1;
                let offset = usize::from(op & 0x07) << 8 | usize::from(low);
                (offset + 1, usize::from(op >> 3 & 0x07) + 3)
            }
            0b10 => {
                let pair = stream.get(pos..pos + 2).ok_or_else(truncated)?;
                pos += 2;
                let offset = usize::from(pair[0]) << 8 | usize::from(pair[1]);
                (offset + 1, usize::from(op & 0x3F) + 4)
            }
            _ if op == END => break,
            _ => {
                return Err(StoreError::DecompressionSanityFailed(format!(
                    "bad fork opcode {op:#04x}"
                )))
            }
        };
        if offset > out.len() {
            return Err(StoreError::DecompressionSanityFailed(
                "fork copy reaches before start of output".into(),
            ));
        }
        check_ceiling(out.len() + count, unpacked)?;
        let start = out.len() - offset;
        for i in 0..count {
            let b = out[start + i];
            out.push(b);
        }
    }

    if out.len() != unpacked {
        return Err(StoreError::DecompressionSanityFailed(format!(
            "fork entry unpacked to {} bytes, declared {unpacked}",
            out.len()
        )));
    }
    Ok(out)
}

fn truncated() -> StoreError {
    StoreError::DecompressionSanityFailed("fork stream ended mid-opcode".into())
}

fn check_ceiling(len: usize, unpacked: usize) -> Result<()> {
    if len > unpacked {
        return Err(StoreError::DecompressionSanityFailed(
            "fork entry unpacks past its declared size".into(),
        ));
    }
    Ok(())
}
