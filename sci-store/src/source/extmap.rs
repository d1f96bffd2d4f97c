//! External index files (`resource.map`, `resmap.NNN`, `message.map`)
//!
//! Two grammars across the generations: a flat list of 6-byte records
//! with the volume number packed into the offset word, and a
//! directory-of-offsets layout with a per-kind header table in front of
//! fixed-width record sections.

use std::io::Cursor;
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};
use crate::version::MapVersion;

#[derive(Debug, Clone)]
pub(crate) struct ExtMapSource {
    pub path: PathBuf,
    /// Fixed volume number for per-disc and message maps. Zero means
    /// the entries themselves name the volume.
    pub volume: u16,
}

pub(crate) fn scan(src: &ExtMapSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    let len = ctx.files.file_len(&src.path)? as usize;
    let data = ctx.files.read_up_to(&src.path, 0, len)?;
    match ctx.map_version {
        MapVersion::Sci0Early | MapVersion::Sci0Late | MapVersion::Sci1Middle => {
            scan_flat(src, &data, ctx)
        }
        MapVersion::Sci1Late | MapVersion::Sci11 | MapVersion::Sci2 => {
            scan_directory(src, &data, ctx)
        }
        // Mac games index through the resource fork, never through a
        // map file.
        MapVersion::Sci11Mac => Ok(()),
    }
}

/// One parsed flat-map record.
struct FlatEntry {
    id: ResourceId,
    volume: u16,
    offset: u64,
}

/// Width of the volume field inside the flat record's offset word.
fn flat_volume_bits(version: MapVersion) -> u32 {
    match version {
        MapVersion::Sci1Middle => 4,
        _ => 6,
    }
}

fn parse_flat(data: &[u8], volume_bits: u32) -> Vec<FlatEntry> {
    let shift = 32 - volume_bits;
    let mask = (1u32 << shift) - 1;
    let mut out = Vec::new();
    for rec in data.chunks_exact(6) {
        let id = u16::from_le_bytes([rec[0], rec[1]]);
        if id == 0xFFFF {
            break;
        }
        let word = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
        // Tuple-addressed kinds never appear in flat maps; reading one
        // means the record is garbage.
        let kind = ResourceKind::from_u8((id >> 11) as u8).filter(|k| !k.is_base36());
        let Some(kind) = kind else { continue };
        out.push(FlatEntry {
            id: ResourceId::new(kind, id & 0x07FF),
            volume: (word >> shift) as u16,
            offset: u64::from(word & mask),
        });
    }
    out
}

/// Entries whose volume is unknown or whose offset lies past the end
/// of the named volume file.
fn count_implausible(entries: &[FlatEntry], ctx: &ScanCtx<'_>) -> usize {
    entries
        .iter()
        .filter(|e| match ctx.volumes.get(&e.volume) {
            Some(vol) => e.offset > vol.len,
            None => true,
        })
        .count()
}

fn scan_flat(src: &ExtMapSource, data: &[u8], ctx: &mut ScanCtx<'_>) -> Result<()> {
    let primary_bits = flat_volume_bits(ctx.map_version);
    let mut entries = parse_flat(data, primary_bits);
    let bad = count_implausible(&entries, ctx);

    // Detection can misjudge the offset split on small games; when the
    // primary reading sends entries past the ends of the volumes, try
    // the sibling split and keep whichever explains more of the map.
    // TODO: fold this plausibility count into detect_map_version so the
    // retry disappears.
    if bad > 0 {
        let sibling_bits = if primary_bits == 6 { 4 } else { 6 };
        let alternative = parse_flat(data, sibling_bits);
        let alt_bad = count_implausible(&alternative, ctx);
        if alt_bad < bad {
            warn!(
                path = %src.path.display(),
                bad, alt_bad, "re-reading flat map with the {sibling_bits}-bit volume split"
            );
            entries = alternative;
        }
    }

    if entries.is_empty() {
        return Err(StoreError::MapNotFound(src.path.display().to_string()));
    }

    let mut resolved = 0usize;
    for entry in &entries {
        let Some(vol) = ctx.volumes.get(&entry.volume).copied() else {
            debug!(id = %entry.id, volume = entry.volume, "map entry names a missing volume");
            ctx.flag_bad();
            continue;
        };
        // An offset at exactly end of file is still indexed; the load
        // path reports it as an empty resource.
        if entry.offset > vol.len {
            warn!(id = %entry.id, offset = entry.offset, "map entry points past end of volume");
            ctx.flag_bad();
            continue;
        }
        ctx.add_entry(entry.id, Location::new(vol.idx, entry.offset));
        resolved += 1;
    }
    if resolved == 0 {
        return Err(StoreError::NoDataFilesFound(src.path.display().to_string()));
    }
    Ok(())
}

fn scan_directory(src: &ExtMapSource, data: &[u8], ctx: &mut ScanCtx<'_>) -> Result<()> {
    let mut rd = Cursor::new(data);
    // Header: (type byte, section offset) pairs terminated by 0xFF.
    // The terminator's offset marks the end of the last section.
    let mut sections: Vec<(u8, usize)> = Vec::new();
    let end_of_records = loop {
        let kind = rd.read_u8()?;
        let offset = usize::from(rd.read_u16::<LittleEndian>()?);
        if kind == 0xFF {
            break offset.min(data.len());
        }
        sections.push((kind & 0x7F, offset));
    };

    let record_len = if ctx.map_version == MapVersion::Sci11 { 5 } else { 6 };
    let mut resolved = 0usize;
    for (i, &(kind_byte, start)) in sections.iter().enumerate() {
        let end = sections
            .get(i + 1)
            .map_or(end_of_records, |&(_, next)| next)
            .min(data.len());
        let Some(kind) = ResourceKind::from_u8(kind_byte) else {
            warn!(kind_byte, "skipping directory section of unknown kind");
            ctx.flag_bad();
            continue;
        };
        if kind.is_base36() {
            // Tuple-addressed audio lives behind the per-room audio
            // maps, never directly in the index.
            debug!(?kind, "skipping tuple-kind directory section");
            continue;
        }
        if start > end {
            warn!(?kind, start, end, "directory section offsets out of order");
            ctx.flag_bad();
            continue;
        }
        for rec in data[start..end].chunks_exact(record_len) {
            let number = u16::from_le_bytes([rec[0], rec[1]]);
            let (volume, offset) = if record_len == 5 {
                // Word-aligned 24-bit offset, stored halved.
                let w = u32::from(rec[2]) | u32::from(rec[3]) << 8 | u32::from(rec[4]) << 16;
                (src.volume, u64::from(w) << 1)
            } else {
                let w = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
                if src.volume != 0 {
                    (src.volume, u64::from(w))
                } else {
                    ((w >> 28) as u16, u64::from(w & 0x0FFF_FFFF))
                }
            };
            let id = ResourceId::new(kind, number);
            let Some(vol) = ctx.volumes.get(&volume).copied() else {
                debug!(%id, volume, "map entry names a missing volume");
                ctx.flag_bad();
                continue;
            };
            if offset > vol.len {
                warn!(%id, offset, "map entry points past end of volume");
                ctx.flag_bad();
                continue;
            }
            ctx.add_entry(id, Location::new(vol.idx, offset));
            resolved += 1;
        }
    }

    if resolved == 0 && !sections.is_empty() {
        return Err(StoreError::NoDataFilesFound(src.path.display().to_string()));
    }
    Ok(())
}
