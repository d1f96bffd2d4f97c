//! Windows interpreter executables: string tables as text resources
//!
//! Some later titles moved interface strings out of the text volume
//! and into the executable's string table. The walk is minimal: DOS
//! header to PE header to the resource section, then only the
//! RT_STRING branch of the resource directory. Strings are narrowed
//! to bytes and served as text resources, but never override an id a
//! real container already provides.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::source::ScanCtx;
use crate::types::{Location, ResourceId, ResourceKind};

const RT_STRING: u32 = 6;

#[derive(Debug, Clone)]
pub(crate) struct PeSource {
    pub path: PathBuf,
    strings: HashMap<u16, Bytes>,
}

impl PeSource {
    pub(crate) fn parse(path: PathBuf, data: &[u8]) -> Result<Self> {
        let strings = parse_string_tables(data)
            .ok_or_else(|| StoreError::MapNotFound(path.display().to_string()))?;
        Ok(Self { path, strings })
    }

    #[cfg(test)]
    pub(crate) fn string_count(&self) -> usize {
        self.strings.len()
    }
}

pub(crate) fn scan(src: &PeSource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    for &number in src.strings.keys() {
        let id = ResourceId::new(ResourceKind::Text, number);
        // Fallback provider only.
        if !ctx.index.contains_key(&id) {
            ctx.add_entry(id, Location::new(ctx.self_idx, 0));
        }
    }
    Ok(())
}

pub(crate) fn load(src: &PeSource, id: ResourceId) -> Result<(Bytes, Option<Vec<u8>>)> {
    src.strings
        .get(&id.number)
        .cloned()
        .map(|data| (data, None))
        .ok_or_else(|| StoreError::InvalidMapEntry {
            id,
            reason: format!("not a string in {}", src.path.display()),
        })
}

/// Walk the headers down to the resource section and collect every
/// RT_STRING entry. `None` means the file is not a usable PE image.
fn parse_string_tables(data: &[u8]) -> Option<HashMap<u16, Bytes>> {
    if data.get(..2) != Some(&b"MZ"[..]) {
        return None;
    }
    let pe_off = u32::from_le_bytes(data.get(0x3C..0x40)?.try_into().ok()?) as usize;
    if data.get(pe_off..pe_off + 4) != Some(&b"PE\0\0"[..]) {
        return None;
    }

    let coff = data.get(pe_off + 4..pe_off + 24)?;
    let section_count = usize::from(u16::from_le_bytes([coff[2], coff[3]]));
    let opt_len = usize::from(u16::from_le_bytes([coff[16], coff[17]]));
    let sections_off = pe_off + 24 + opt_len;

    let (rsrc_va, rsrc_ptr) = (0..section_count).find_map(|i| {
        let at = sections_off + i * 40;
        let sec = data.get(at..at + 40)?;
        (&sec[..8] == b".rsrc\0\0\0").then(|| {
            (
                u32::from_le_bytes([sec[12], sec[13], sec[14], sec[15]]) as usize,
                u32::from_le_bytes([sec[20], sec[21], sec[22], sec[23]]) as usize,
            )
        })
    })?;
    let rsrc = data.get(rsrc_ptr..)?;

    let mut strings = HashMap::new();
    for (type_id, type_off) in directory_entries(rsrc, 0)? {
        if type_id != RT_STRING {
            continue;
        }
        for (block_id, lang_off) in directory_entries(rsrc, type_off & 0x7FFF_FFFF)? {
            for (_lang, leaf_off) in directory_entries(rsrc, lang_off & 0x7FFF_FFFF)? {
                if leaf_off & 0x8000_0000 != 0 {
                    continue;
                }
                let leaf = rsrc.get(leaf_off as usize..leaf_off as usize + 8)?;
                let rva = u32::from_le_bytes(leaf[..4].try_into().ok()?) as usize;
                let size = u32::from_le_bytes(leaf[4..8].try_into().ok()?) as usize;
                let at = rsrc_ptr + rva.checked_sub(rsrc_va)?;
                let block = data.get(at..at + size)?;
                collect_block(block_id, block, &mut strings)?;
            }
        }
    }
    debug!(count = strings.len(), "collected executable strings");
    Some(strings)
}

/// Entries of one resource directory table as (id, offset) pairs.
fn directory_entries(rsrc: &[u8], off: u32) -> Option<Vec<(u32, u32)>> {
    let table = rsrc.get(off as usize..)?;
    let mut rd = Cursor::new(table);
    rd.set_position(12);
    let named = rd.read_u16::<LittleEndian>().ok()?;
    let ids = rd.read_u16::<LittleEndian>().ok()?;
    let mut out = Vec::new();
    for _ in 0..u32::from(named) + u32::from(ids) {
        let id = rd.read_u32::<LittleEndian>().ok()?;
        let entry = rd.read_u32::<LittleEndian>().ok()?;
        out.push((id, entry));
    }
    Some(out)
}

/// One RT_STRING block holds sixteen length-prefixed UTF-16 strings;
/// the block id fixes which sixteen numbers they are.
fn collect_block(block_id: u32, block: &[u8], out: &mut HashMap<u16, Bytes>) -> Option<()> {
    let base = (block_id.checked_sub(1)?) * 16;
    let mut rd = Cursor::new(block);
    for i in 0..16u32 {
        let units = match rd.read_u16::<LittleEndian>() {
            Ok(n) => usize::from(n),
            Err(_) => break,
        };
        if units == 0 {
            continue;
        }
        let mut bytes = Vec::with_capacity(units);
        for _ in 0..units {
            // Interpreter strings are single-byte text stored widened;
            // narrowing recovers the original encoding.
            bytes.push(rd.read_u16::<LittleEndian>().ok()? as u8);
        }
        let number = u16::try_from(base + i).ok()?;
        out.insert(number, Bytes::from(bytes));
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Minimal image: headers, one `.rsrc` section, one RT_STRING
    /// block.
    fn build_pe(block_id: u32, strings: &[&str]) -> Vec<u8> {
        // String block: 16 slots, the given strings then empties.
        let mut block = Vec::new();
        for i in 0..16 {
            let s = strings.get(i).copied().unwrap_or("");
            block.extend_from_slice(&(s.len() as u16).to_le_bytes());
            for c in s.chars() {
                block.extend_from_slice(&(c as u16).to_le_bytes());
            }
        }

        // Resource directory: type -> block -> language -> leaf.
        fn table(entries: &[(u32, u32)]) -> Vec<u8> {
            let mut t = vec![0u8; 12];
            t.extend_from_slice(&0u16.to_le_bytes());
            t.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for &(id, off) in entries {
                t.extend_from_slice(&id.to_le_bytes());
                t.extend_from_slice(&off.to_le_bytes());
            }
            t
        }
        let rsrc_va = 0x1000u32;
        // Layout inside .rsrc: root(24) lvl2(24) lvl3(24) leaf(16) block
        let root = table(&[(RT_STRING, 24 | 0x8000_0000)]);
        let lvl2 = table(&[(block_id, 48 | 0x8000_0000)]);
        let lvl3 = table(&[(0x409, 72)]);
        let mut leaf = Vec::new();
        leaf.extend_from_slice(&(rsrc_va + 88).to_le_bytes()); // rva of block
        leaf.extend_from_slice(&(block.len() as u32).to_le_bytes());
        leaf.extend_from_slice(&[0; 8]);
        let mut rsrc = [root, lvl2, lvl3, leaf].concat();
        assert_eq!(rsrc.len(), 88);
        rsrc.extend_from_slice(&block);

        // DOS header + PE header + one section.
        let pe_off = 0x40u32;
        let mut img = vec![0u8; 0x40];
        img[0] = b'M';
        img[1] = b'Z';
        img[0x3C..0x40].copy_from_slice(&pe_off.to_le_bytes());
        img.extend_from_slice(b"PE\0\0");
        let mut coff = [0u8; 20];
        coff[2..4].copy_from_slice(&1u16.to_le_bytes()); // one section
        coff[16..18].copy_from_slice(&0u16.to_le_bytes()); // no optional header
        img.extend_from_slice(&coff);
        let rsrc_ptr = (img.len() + 40) as u32;
        let mut sec = [0u8; 40];
        sec[..5].copy_from_slice(b".rsrc");
        sec[12..16].copy_from_slice(&rsrc_va.to_le_bytes());
        sec[16..20].copy_from_slice(&(rsrc.len() as u32).to_le_bytes());
        sec[20..24].copy_from_slice(&rsrc_ptr.to_le_bytes());
        img.extend_from_slice(&sec);
        img.extend_from_slice(&rsrc);
        img
    }

    #[test]
    fn strings_become_text_resources() {
        let img = build_pe(2, &["Restore", "Quit"]);
        let src = PeSource::parse(PathBuf::from("sierra.exe"), &img).unwrap();
        assert_eq!(src.string_count(), 2);
        // block 2 -> numbers 16 and 17
        let (data, _) = load(&src, ResourceId::new(ResourceKind::Text, 16)).unwrap();
        assert_eq!(&data[..], b"Restore");
        let (data, _) = load(&src, ResourceId::new(ResourceKind::Text, 17)).unwrap();
        assert_eq!(&data[..], b"Quit");
        assert!(load(&src, ResourceId::new(ResourceKind::Text, 18)).is_err());
    }

    #[test]
    fn non_pe_files_are_rejected() {
        assert!(PeSource::parse(PathBuf::from("x"), b"not an exe").is_err());
    }
}
