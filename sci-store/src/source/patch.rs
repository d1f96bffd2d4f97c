//! Loose patch files: single-resource overrides shipped next to the
//! volumes
//!
//! A patch file restates its own kind in the first byte (high bit set)
//! followed by a header-size byte; the header bytes between that and
//! the content are preserved so view, picture and palette patches can
//! be re-exported byte-exact. Audio-class patches are raw content with
//! no header at all.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};

#[derive(Debug, Clone)]
pub(crate) struct PatchSource {
    pub path: PathBuf,
    pub id: ResourceId,
}

/// A loose `NNN.wav` file, indexed as a plain audio resource.
#[derive(Debug, Clone)]
pub(crate) struct WaveSource {
    pub path: PathBuf,
    pub number: u16,
}

/// Kinds whose patch files carry no two-byte header.
fn is_raw(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::Audio | ResourceKind::Audio36 | ResourceKind::Sync36 | ResourceKind::CdAudio
    )
}

/// Kinds whose embedded sub-header must survive for re-export.
fn keeps_header(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::View | ResourceKind::Pic | ResourceKind::Palette
    )
}

/// Validate the patch file and, if sound, register its id. Invalid
/// patches are skipped quietly; a broken loose file must never mask
/// the volume copy of the resource.
pub(crate) fn scan(src: &PatchSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    if let Some(exclude) = ctx.patch_exclude {
        if exclude(src.id) {
            debug!(id = %src.id, path = %src.path.display(), "patch excluded by policy");
            return Ok(());
        }
    }

    let len = ctx.files.file_len(&src.path)?;
    if len == 0 {
        debug!(path = %src.path.display(), "ignoring empty patch file");
        return Ok(());
    }

    if is_raw(src.id.kind) {
        ctx.add_entry(src.id, Location::new(ctx.self_idx, 0));
        return Ok(());
    }

    let head = ctx.files.read_up_to(&src.path, 0, 2)?;
    if head.len() < 2 {
        debug!(path = %src.path.display(), "patch file shorter than its header");
        return Ok(());
    }
    if head[0] & 0x80 == 0 || ResourceKind::from_u8(head[0] & 0x7F) != Some(src.id.kind) {
        debug!(
            path = %src.path.display(),
            type_byte = head[0],
            "patch self-declared kind disagrees with its filename"
        );
        return Ok(());
    }
    let data_offset = 2 + u64::from(head[1]);
    if data_offset >= len {
        debug!(path = %src.path.display(), "patch header swallows the whole file");
        return Ok(());
    }

    ctx.add_entry(src.id, Location::new(ctx.self_idx, data_offset));
    Ok(())
}

pub(crate) fn load(
    src: &PatchSource,
    files: &mut FileCache,
    location: Location,
) -> Result<(Bytes, Option<Vec<u8>>)> {
    let len = files.file_len(&src.path)?;
    if location.offset >= len {
        return Err(StoreError::EmptyResource(src.id));
    }
    let data = files.read_range(&src.path, location.offset, (len - location.offset) as usize)?;
    let header = if keeps_header(src.id.kind) && location.offset > 2 {
        Some(files.read_range(&src.path, 2, (location.offset - 2) as usize)?)
    } else {
        None
    };
    Ok((Bytes::from(data), header))
}

pub(crate) fn scan_wave(src: &WaveSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    if ctx.files.file_len(&src.path)? == 0 {
        debug!(path = %src.path.display(), "ignoring empty wave file");
        return Ok(());
    }
    ctx.add_entry(
        ResourceId::new(ResourceKind::Audio, src.number),
        Location::new(ctx.self_idx, 0),
    );
    Ok(())
}

pub(crate) fn load_wave(src: &WaveSource, files: &mut FileCache) -> Result<(Bytes, Option<Vec<u8>>)> {
    let len = files.file_len(&src.path)?;
    let data = files.read_range(&src.path, 0, len as usize)?;
    Ok((Bytes::from(data), None))
}
