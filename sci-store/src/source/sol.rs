//! CD audio volumes: named-record containers for redbook replacements
//!
//! A simple table of fixed-width records: a 12-byte NUL-padded name,
//! then offset and size. The record named "THE_END" terminates the
//! table; numeric names become CD-audio resources.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::warn;

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};

const RECORD_LEN: usize = 20;
const TERMINATOR: &str = "THE_END";

#[derive(Debug, Clone)]
pub(crate) struct SolSource {
    pub path: PathBuf,
}

pub(crate) fn scan(src: &SolSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    let len = ctx.files.file_len(&src.path)? as usize;
    let mut at = 0u64;
    loop {
        if at as usize + RECORD_LEN > len {
            warn!(path = %src.path.display(), "audio table missing its terminator");
            ctx.flag_bad();
            return Ok(());
        }
        let rec = ctx.files.read_range(&src.path, at, RECORD_LEN)?;
        let name_len = rec[..12].iter().position(|&b| b == 0).unwrap_or(12);
        let name = String::from_utf8_lossy(&rec[..name_len]).into_owned();
        if name == TERMINATOR {
            return Ok(());
        }
        let offset = u64::from(u32::from_le_bytes([rec[12], rec[13], rec[14], rec[15]]));
        let size = u32::from_le_bytes([rec[16], rec[17], rec[18], rec[19]]);
        match name.parse::<u16>() {
            Ok(number) => ctx.add_entry(
                ResourceId::new(ResourceKind::CdAudio, number),
                Location::sized(ctx.self_idx, offset, size),
            ),
            Err(_) => {
                warn!(path = %src.path.display(), %name, "non-numeric audio table entry");
                ctx.flag_bad();
            }
        }
        at += RECORD_LEN as u64;
    }
}

pub(crate) fn load(
    src: &SolSource,
    files: &mut FileCache,
    id: ResourceId,
    location: Location,
) -> Result<(Bytes, Option<Vec<u8>>)> {
    let size = location.size.ok_or_else(|| StoreError::InvalidMapEntry {
        id,
        reason: "audio table entry without a size".into(),
    })?;
    if size == 0 {
        return Err(StoreError::EmptyResource(id));
    }
    let data = files.read_range(&src.path, location.offset, size as usize)?;
    Ok((Bytes::from(data), None))
}
