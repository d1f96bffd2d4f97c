//! Audio maps: map-kind resources that index into the audio volume
//!
//! The map resource is itself loaded through the normal path before
//! this source is created, so the records are parsed from resident
//! bytes, not from a file. Map 65535 lists plain audio by number;
//! every other map lists tuple-addressed audio and sync data for one
//! room.

use bytes::Bytes;
use tracing::warn;

use crate::error::Result;
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};

/// Map number listing plain (non-tuple) audio.
pub(crate) const GLOBAL_AUDIO_MAP: u16 = 65535;

#[derive(Debug, Clone)]
pub(crate) struct IntMapSource {
    pub map_number: u16,
    pub data: Bytes,
}

pub(crate) fn scan(src: &IntMapSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    let Some(audio_idx) = ctx.audio_volume else {
        warn!(map = src.map_number, "audio map present but no audio volume");
        ctx.flag_bad();
        return Ok(());
    };
    if src.map_number == GLOBAL_AUDIO_MAP {
        scan_global(src, ctx, audio_idx)
    } else {
        scan_room(src, ctx, audio_idx)
    }
}

/// Records: number u16, offset u32, size u32; number 0xFFFF ends.
fn scan_global(src: &IntMapSource, ctx: &mut ScanCtx<'_>, audio_idx: usize) -> Result<()> {
    let mut rest = &src.data[..];
    loop {
        if let [0xFF, 0xFF, ..] = rest {
            return Ok(());
        }
        let Some(rec) = rest.get(..10) else {
            if !rest.is_empty() {
                warn!(map = src.map_number, "audio map ends mid-record");
                ctx.flag_bad();
            }
            return Ok(());
        };
        let number = u16::from_le_bytes([rec[0], rec[1]]);
        let offset = u64::from(u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]));
        let size = u32::from_le_bytes([rec[6], rec[7], rec[8], rec[9]]);
        ctx.add_entry(
            ResourceId::new(ResourceKind::Audio, number),
            Location::sized(audio_idx, offset, size),
        );
        rest = &rest[10..];
    }
}

/// Records: noun, verb, cond, seq (u8 each), offset u32, size u32;
/// noun 0xFF ends. The top bit of seq selects sync over audio.
fn scan_room(src: &IntMapSource, ctx: &mut ScanCtx<'_>, audio_idx: usize) -> Result<()> {
    let mut rest = &src.data[..];
    loop {
        if let [0xFF, ..] = rest {
            return Ok(());
        }
        let Some(rec) = rest.get(..12) else {
            if !rest.is_empty() {
                warn!(map = src.map_number, "audio map ends mid-record");
                ctx.flag_bad();
            }
            return Ok(());
        };
        let (noun, verb, cond, seq) = (rec[0], rec[1], rec[2], rec[3]);
        let offset = u64::from(u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]));
        let size = u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]);
        let kind = if seq & 0x80 != 0 {
            ResourceKind::Sync36
        } else {
            ResourceKind::Audio36
        };
        let id = ResourceId::with_tuple(kind, src.map_number, noun, verb, cond, seq & 0x7F);
        ctx.add_entry(id, Location::sized(audio_idx, offset, size));
        rest = &rest[12..];
    }
}
