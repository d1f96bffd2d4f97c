//! Chunk resources: nested archives carried inside another resource
//!
//! A chunk's body is a small typed table of inner resources. The chunk
//! is loaded through the normal path first; this source then serves
//! the inner slices out of the resident bytes, so loads never touch
//! the filesystem.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};

#[derive(Debug, Clone)]
pub(crate) struct ChunkSource {
    pub number: u16,
    entries: HashMap<ResourceId, Bytes>,
}

impl ChunkSource {
    /// Parse the inner table: entry count (u16), then 11-byte records
    /// of kind, number, offset and size. Offsets are relative to the
    /// chunk body.
    pub(crate) fn parse(number: u16, data: Bytes) -> Result<Self> {
        let bad = |reason: &str| StoreError::InvalidMapEntry {
            id: ResourceId::new(ResourceKind::Chunk, number),
            reason: reason.into(),
        };

        let count = data
            .get(..2)
            .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
            .ok_or_else(|| bad("chunk too short for its entry count"))?;
        let mut entries = HashMap::with_capacity(count);
        for i in 0..count {
            let at = 2 + i * 11;
            let rec = data
                .get(at..at + 11)
                .ok_or_else(|| bad("chunk table ends mid-record"))?;
            let kind = ResourceKind::from_u8(rec[0] & 0x7F).filter(|k| !k.is_base36());
            let Some(kind) = kind else {
                warn!(chunk = number, kind = rec[0], "unusable kind in chunk table");
                continue;
            };
            let inner = u16::from_le_bytes([rec[1], rec[2]]);
            let offset = u32::from_le_bytes([rec[3], rec[4], rec[5], rec[6]]) as usize;
            let size = u32::from_le_bytes([rec[7], rec[8], rec[9], rec[10]]) as usize;
            let slice = data
                .get(offset..offset + size)
                .ok_or_else(|| bad("chunk entry extends past the chunk body"))?;
            entries.insert(
                ResourceId::new(kind, inner),
                data.slice_ref(slice),
            );
        }
        Ok(Self { number, entries })
    }
}

pub(crate) fn scan(src: &ChunkSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    for id in src.entries.keys() {
        ctx.add_entry(*id, Location::new(ctx.self_idx, 0));
    }
    Ok(())
}

pub(crate) fn load(src: &ChunkSource, id: ResourceId) -> Result<(Bytes, Option<Vec<u8>>)> {
    let data = src.entries.get(&id).cloned().ok_or_else(|| {
        StoreError::InvalidMapEntry {
            id,
            reason: format!("not in chunk {}", src.number),
        }
    })?;
    if data.is_empty() {
        return Err(StoreError::EmptyResource(id));
    }
    Ok((data, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build_chunk(inner: &[(ResourceKind, u16, &[u8])]) -> Bytes {
        let table_len = 2 + inner.len() * 11;
        let mut body: Vec<u8> = Vec::new();
        let mut table = (inner.len() as u16).to_le_bytes().to_vec();
        for &(kind, number, payload) in inner {
            table.push(kind as u8 | 0x80);
            table.extend_from_slice(&number.to_le_bytes());
            table.extend_from_slice(&((table_len + body.len()) as u32).to_le_bytes());
            table.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            body.extend_from_slice(payload);
        }
        table.extend_from_slice(&body);
        Bytes::from(table)
    }

    #[test]
    fn inner_resources_load_from_resident_bytes() {
        let chunk = build_chunk(&[
            (ResourceKind::View, 3, b"viewbits"),
            (ResourceKind::Palette, 3, b"palbits"),
        ]);
        let src = ChunkSource::parse(0, chunk).unwrap();
        let (data, _) = load(&src, ResourceId::new(ResourceKind::View, 3)).unwrap();
        assert_eq!(&data[..], b"viewbits");
        let missing = load(&src, ResourceId::new(ResourceKind::View, 4)).unwrap_err();
        assert!(matches!(missing, StoreError::InvalidMapEntry { .. }));
    }

    #[test]
    fn truncated_table_is_rejected() {
        let err = ChunkSource::parse(1, Bytes::from_static(&[5, 0, 1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMapEntry { .. }));
    }
}
