//! Format-generation detection
//!
//! Nothing on disk names its own generation; the map layout and the
//! volume record layout are sniffed from structure. A map is parsed
//! under each grammar and judged by how much of it is plausible; a
//! volume is judged by walking its record chain under each candidate
//! layout until one walk lands exactly on end of file. The two results
//! then reconcile each other, since some layouts can only be told
//! apart by their peer.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::source::volume::{compression_for, parse_record_header};
use crate::source::VolumeRef;
use crate::types::{ResourceId, ResourceKind};
use crate::version::{MapVersion, SciVersion, VolumeVersion};

/// Sniff the index grammar of one map file. `volumes` supplies file
/// lengths for offset plausibility; flat-map generations differ only
/// in where the volume/offset split falls, so plausibility is the only
/// signal.
pub(crate) fn detect_map_version(
    files: &mut FileCache,
    path: &Path,
    volumes: &std::collections::HashMap<u16, VolumeRef>,
) -> Result<MapVersion> {
    let len = files.file_len(path)? as usize;
    let data = files.read_up_to(path, 0, len)?;

    if let Some(version) = try_directory(&data) {
        debug!(path = %path.display(), ?version, "map uses the directory grammar");
        return Ok(version);
    }
    if let Some(version) = try_flat(&data, volumes) {
        debug!(path = %path.display(), ?version, "map uses the flat grammar");
        return Ok(version);
    }
    Err(StoreError::MapNotFound(path.display().to_string()))
}

/// Directory grammar: ascending (type, offset) header terminated by
/// 0xFF, terminator offset at end of file, sections a whole number of
/// records. Five-byte records mean the later layout.
fn try_directory(data: &[u8]) -> Option<MapVersion> {
    let mut sections = Vec::new();
    let mut at = 0usize;
    let end = loop {
        let kind = *data.get(at)?;
        let offset = usize::from(u16::from_le_bytes([*data.get(at + 1)?, *data.get(at + 2)?]));
        at += 3;
        if kind == 0xFF {
            break offset;
        }
        if kind & 0x80 == 0 || ResourceKind::from_u8(kind & 0x7F).is_none() {
            return None;
        }
        sections.push(offset);
    };
    if sections.is_empty() || end != data.len() || sections[0] != at {
        return None;
    }
    let bounds: Vec<usize> = sections.iter().copied().chain([end]).collect();
    let mut lens = bounds.windows(2).map(|w| w[1].checked_sub(w[0]));
    if lens.clone().any(|l| l.is_none()) {
        return None;
    }
    if lens.clone().all(|l| l.is_some_and(|l| l % 6 == 0)) {
        return Some(MapVersion::Sci1Late);
    }
    if lens.all(|l| l.is_some_and(|l| l % 5 == 0)) {
        return Some(MapVersion::Sci11);
    }
    None
}

/// Flat grammar: 6-byte records with an all-ones trailer. The two
/// volume/offset splits are tried against the known volume lengths.
fn try_flat(
    data: &[u8],
    volumes: &std::collections::HashMap<u16, VolumeRef>,
) -> Option<MapVersion> {
    if data.len() < 6 || data.len() % 6 != 0 || data[data.len() - 6..] != [0xFF; 6] {
        return None;
    }
    let implausible = |volume_bits: u32| {
        let shift = 32 - volume_bits;
        data[..data.len() - 6]
            .chunks_exact(6)
            .filter(|rec| {
                let word = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
                let volume = (word >> shift) as u16;
                let offset = u64::from(word & ((1 << shift) - 1));
                volumes.get(&volume).map_or(true, |v| offset > v.len)
            })
            .count()
    };
    if volumes.is_empty() || implausible(6) <= implausible(4) {
        Some(MapVersion::Sci0Late)
    } else {
        Some(MapVersion::Sci1Middle)
    }
}

/// Byte ceiling on how much of a volume the trial walk replays.
const DETECTION_CEILING: u64 = 0x10_0000;

/// Sniff the record layout of the volume files by walking each
/// candidate's record chain. The first layout under which every
/// sampled volume walks cleanly wins.
pub(crate) fn detect_volume_version(
    files: &mut FileCache,
    volume_paths: &[&Path],
) -> Result<VolumeVersion> {
    for candidate in VolumeVersion::DETECTION_ORDER {
        let mut ok = true;
        for path in volume_paths {
            if !walks_cleanly(files, path, candidate)? {
                ok = false;
                break;
            }
        }
        if ok && !volume_paths.is_empty() {
            info!(?candidate, "volume record layout detected");
            return Ok(candidate);
        }
    }
    warn!("no volume record layout fits; assuming the common one");
    Ok(VolumeVersion::Sci0Late)
}

fn walks_cleanly(files: &mut FileCache, path: &Path, version: VolumeVersion) -> Result<bool> {
    let len = files.file_len(path)?;
    let header_len = version.header_len();
    let mut offset = 0u64;
    while offset < len.min(DETECTION_CEILING) {
        let header = files.read_up_to(path, offset, header_len)?;
        if header.len() < header_len {
            return Ok(false);
        }
        let Ok(rec) = parse_record_header(&header, version) else {
            return Ok(false);
        };
        if rec.kind.is_none() || compression_for(version, rec.tag).is_err() {
            return Ok(false);
        }
        // The 13-byte twins differ only in the type-byte marker: the
        // 2.x layouts set the high bit, SCI3 stores the bare kind.
        match version {
            VolumeVersion::Sci2 if header[0] & 0x80 == 0 => return Ok(false),
            VolumeVersion::Sci3 if header[0] & 0x80 != 0 => return Ok(false),
            _ => {}
        }
        // Stored records cannot grow.
        if matches!(
            compression_for(version, rec.tag),
            Ok(sci_codec::Compression::None)
        )
            && u64::from(rec.packed) < u64::from(rec.unpacked)
        {
            return Ok(false);
        }
        offset += header_len as u64 + u64::from(rec.packed);
        if version.word_aligned() {
            offset = (offset + 1) & !1;
        }
        if offset > len {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Some generations only tell themselves apart through their peer:
/// the early flat map is structurally identical to the late one but
/// always pairs with the early volume layout, and the wide-offset map
/// grammar reads like the mid grammar until the volumes turn out to
/// use 32-bit records.
pub(crate) fn reconcile(map: MapVersion, volume: VolumeVersion) -> (MapVersion, VolumeVersion) {
    let map = match (map, volume) {
        (MapVersion::Sci0Late, VolumeVersion::Sci0Early) => MapVersion::Sci0Early,
        (MapVersion::Sci1Late, VolumeVersion::Sci2 | VolumeVersion::Sci3) => MapVersion::Sci2,
        (m, _) => m,
    };
    let volume = match (map, volume) {
        (MapVersion::Sci11, VolumeVersion::Sci1Late) => VolumeVersion::Sci11,
        (MapVersion::Sci2, VolumeVersion::Sci1Late | VolumeVersion::Sci11) => VolumeVersion::Sci2,
        (_, v) => v,
    };
    (map, volume)
}

/// Refine the coarse interpreter tag from the two layout generations
/// and the kinds the scanned index holds.
pub(crate) fn detect_interpreter_version<'a>(
    map: MapVersion,
    volume: VolumeVersion,
    ids: impl Iterator<Item = &'a ResourceId>,
) -> SciVersion {
    let mut has_chunk = false;
    let mut has_heap = false;
    for id in ids {
        match id.kind {
            ResourceKind::Chunk => has_chunk = true,
            ResourceKind::Heap => has_heap = true,
            _ => {}
        }
    }
    match (map, volume) {
        (_, VolumeVersion::Sci3) => SciVersion::V3,
        (MapVersion::Sci2, _) | (_, VolumeVersion::Sci2) => {
            // The later 2.x interpreters introduced chunk archives.
            if has_chunk {
                SciVersion::V21
            } else {
                SciVersion::V2
            }
        }
        (MapVersion::Sci11 | MapVersion::Sci11Mac, _) => SciVersion::V11,
        // Heap resources only exist from 1.1 on; transition titles
        // still ship them behind the older directory map.
        (MapVersion::Sci1Late, _) if has_heap => SciVersion::V11,
        (MapVersion::Sci1Late, _) => SciVersion::V1Late,
        (MapVersion::Sci1Middle, _) => SciVersion::V1Early,
        (MapVersion::Sci0Early, _) | (_, VolumeVersion::Sci0Early) => SciVersion::V0Early,
        (MapVersion::Sci0Late, VolumeVersion::Sci1Late) => SciVersion::V01,
        _ => SciVersion::V0Late,
    }
}
