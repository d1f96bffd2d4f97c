//! The game directory itself: discovery of loose patch and wave files
//!
//! Three filename grammars identify a loose resource: the early
//! `{kindname}.{digits}` form, the later `{digits}.{suffix}` form, and
//! the base-36 form for tuple-addressed audio and sync data. Matches
//! are queued as patch sources; content validation happens when those
//! sources scan. Scanned last, so a valid patch always overrides the
//! volume copy.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::source::{patch, ScanCtx, Source};
use crate::types::{parse_base36, ResourceId, ResourceKind};

#[derive(Debug, Clone)]
pub(crate) struct DirectorySource {
    pub path: PathBuf,
}

pub(crate) fn scan(src: &DirectorySource, ctx: &mut ScanCtx<'_>) -> Result<()> {
    let mut names: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&src.path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push((name.to_ascii_lowercase(), entry.path()));
        }
    }
    // Filesystem order is not deterministic; later files win, so pin
    // the order.
    names.sort();

    for (name, path) in names {
        if let Some((number, suffix)) = name.split_once('.').filter(|(n, _)| is_digits(n)) {
            if suffix == "wav" {
                if let Ok(number) = number.parse::<u16>() {
                    debug!(%name, "queueing wave file");
                    ctx.queue_source(Source::Wave(patch::WaveSource { path, number }));
                }
                continue;
            }
        }
        if let Some(id) = id_from_name(&name) {
            debug!(%name, %id, "queueing patch file");
            ctx.queue_source(Source::Patch(patch::PatchSource { path, id }));
        }
    }
    Ok(())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Match a lowercased filename against the patch naming grammars.
pub(crate) fn id_from_name(name: &str) -> Option<ResourceId> {
    if let Some(id) = base36_id(name) {
        return Some(id);
    }
    let (stem, ext) = name.split_once('.')?;
    if is_digits(stem) {
        // `{number}.{suffix}`
        let kind = ResourceKind::from_suffix(ext)?;
        return Some(ResourceId::new(kind, stem.parse().ok()?));
    }
    if is_digits(ext) {
        // `{kindname}.{number}`
        let kind = ResourceKind::from_name(stem)?;
        return Some(ResourceId::new(kind, ext.parse().ok()?));
    }
    None
}

/// `@MMMNNVV.CCS` (audio) / `#MMMNNVV.CCS` (sync): map, noun, verb,
/// cond and sequence as fixed-width base-36 fields.
fn base36_id(name: &str) -> Option<ResourceId> {
    let bytes = name.as_bytes();
    if bytes.len() != 12 || bytes[8] != b'.' {
        return None;
    }
    let kind = match bytes[0] {
        b'@' => ResourceKind::Audio36,
        b'#' => ResourceKind::Sync36,
        _ => return None,
    };
    let map = u16::try_from(parse_base36(&name[1..4])?).ok()?;
    let noun = u8::try_from(parse_base36(&name[4..6])?).ok()?;
    let verb = u8::try_from(parse_base36(&name[6..8])?).ok()?;
    let cond = u8::try_from(parse_base36(&name[9..11])?).ok()?;
    let seq = u8::try_from(parse_base36(&name[11..12])?).ok()?;
    Some(ResourceId::with_tuple(kind, map, noun, verb, cond, seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::resource::Resource;
    use crate::source::VolumeRef;
    use crate::version::{MapVersion, VolumeVersion};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn grammar_matching() {
        assert_eq!(
            id_from_name("view.001"),
            Some(ResourceId::new(ResourceKind::View, 1))
        );
        assert_eq!(
            id_from_name("123.v56"),
            Some(ResourceId::new(ResourceKind::View, 123))
        );
        assert_eq!(
            id_from_name("999.hep"),
            Some(ResourceId::new(ResourceKind::Heap, 999))
        );
        // Container files never match
        assert_eq!(id_from_name("resource.map"), None);
        assert_eq!(id_from_name("resource.000"), None);
        assert_eq!(id_from_name("resmap.001"), None);
        assert_eq!(id_from_name("resource.aud"), None);
        assert_eq!(id_from_name("readme.txt"), None);
    }

    #[test]
    fn base36_grammar() {
        // map 120 = "3C", noun 1, verb 2, cond 3, seq 1
        let id = id_from_name("@03c0102.031").unwrap();
        assert_eq!(id.kind, ResourceKind::Audio36);
        assert_eq!(id.number, 120);
        assert_eq!((id.noun(), id.verb(), id.cond(), id.seq()), (1, 2, 3, 1));

        let sync = id_from_name("#03c0102.031").unwrap();
        assert_eq!(sync.kind, ResourceKind::Sync36);

        assert_eq!(id_from_name("@03c0102.03"), None); // too short
        assert_eq!(id_from_name("%03c0102.031"), None); // bad lead
    }

    #[test]
    fn directory_queues_patches_and_waves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("view.001"), [0x80, 0, 1]).unwrap();
        std::fs::write(dir.path().join("830.wav"), b"RIFF").unwrap();
        std::fs::write(dir.path().join("resource.map"), [0u8; 6]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let mut files = FileCache::new();
        let mut index: BTreeMap<ResourceId, Resource> = BTreeMap::new();
        let volumes: HashMap<u16, VolumeRef> = HashMap::new();
        let mut has_bad = false;
        let mut ctx = ScanCtx {
            files: &mut files,
            index: &mut index,
            volumes: &volumes,
            audio_volume: None,
            map_version: MapVersion::Sci0Late,
            volume_version: VolumeVersion::Sci0Late,
            self_idx: 0,
            next_idx: 1,
            new_sources: Vec::new(),
            has_bad: &mut has_bad,
            patch_exclude: None,
        };
        let src = DirectorySource {
            path: dir.path().to_path_buf(),
        };
        scan(&src, &mut ctx).unwrap();

        assert_eq!(ctx.new_sources.len(), 2);
        assert!(ctx
            .new_sources
            .iter()
            .any(|s| matches!(s, Source::Patch(p) if p.id == ResourceId::new(ResourceKind::View, 1))));
        assert!(ctx
            .new_sources
            .iter()
            .any(|s| matches!(s, Source::Wave(w) if w.number == 830)));
    }
}
