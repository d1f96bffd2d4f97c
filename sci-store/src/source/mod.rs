//! Resource providers, one per on-disk container kind
//!
//! Each variant knows how to enumerate the ids it provides (`scan`)
//! and how to materialize the bytes for one of them (`load`). Scans
//! receive a [`ScanCtx`] capability -- the index insert callback, the
//! shared file-handle cache and a queue for sources discovered along
//! the way -- never the manager itself.

pub(crate) mod chunk;
pub(crate) mod directory;
pub(crate) mod extmap;
pub(crate) mod intmap;
pub(crate) mod macfork;
pub(crate) mod patch;
pub(crate) mod pe;
pub(crate) mod sol;
pub(crate) mod volume;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use tracing::trace;

use crate::cache::FileCache;
use crate::error::{Result, StoreError};
use crate::resource::Resource;
use crate::types::{Location, ResourceId};
use crate::version::{MapVersion, VolumeVersion};

/// A volume data file known to the manager, by volume number.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VolumeRef {
    /// Index of the volume source
    pub idx: usize,
    /// File length, for offset sanity checks during map scans
    pub len: u64,
}

/// Capabilities handed to a source while it scans.
pub(crate) struct ScanCtx<'a> {
    pub(crate) files: &'a mut FileCache,
    pub(crate) index: &'a mut BTreeMap<ResourceId, Resource>,
    /// Volume number -> data file, for map entries
    pub(crate) volumes: &'a HashMap<u16, VolumeRef>,
    /// The audio volume serving base-36 and plain audio map entries
    pub(crate) audio_volume: Option<usize>,
    pub(crate) map_version: MapVersion,
    pub(crate) volume_version: VolumeVersion,
    /// Index of the source currently scanning
    pub(crate) self_idx: usize,
    /// Index the next queued source will receive
    pub(crate) next_idx: usize,
    pub(crate) new_sources: Vec<Source>,
    pub(crate) has_bad: &'a mut bool,
    pub(crate) patch_exclude: Option<fn(ResourceId) -> bool>,
}

impl ScanCtx<'_> {
    /// Register an id. A later source always wins over an earlier one;
    /// entries are never removed. Bytes already loaded during startup
    /// (audio maps, chunk archives) are dropped so the next lookup
    /// goes to the new source.
    pub(crate) fn add_entry(&mut self, id: ResourceId, location: Location) {
        trace!(%id, source = location.source, offset = location.offset, "indexing resource");
        self.index
            .entry(id)
            .and_modify(|r| {
                if r.status() == crate::resource::Status::Allocated {
                    r.discard();
                }
                r.relocate(location);
            })
            .or_insert_with(|| Resource::new(id, location));
    }

    /// Queue a newly discovered source; returns the index it will
    /// occupy in the manager's source list.
    pub(crate) fn queue_source(&mut self, source: Source) -> usize {
        let idx = self.next_idx + self.new_sources.len();
        self.new_sources.push(source);
        idx
    }

    pub(crate) fn flag_bad(&mut self) {
        *self.has_bad = true;
    }
}

/// The closed set of container kinds.
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Directory(directory::DirectorySource),
    ExtMap(extmap::ExtMapSource),
    IntMap(intmap::IntMapSource),
    Volume(volume::VolumeSource),
    AudioVolume(volume::AudioVolumeSource),
    Patch(patch::PatchSource),
    Wave(patch::WaveSource),
    MacResourceFork(macfork::MacForkSource),
    Chunk(chunk::ChunkSource),
    SolVolume(sol::SolSource),
    Pe(pe::PeSource),
}

impl Source {
    /// Volume-type sources have no id list of their own; only a map
    /// assigns meaning to byte ranges within them.
    pub(crate) fn needs_scan(&self) -> bool {
        !matches!(self, Self::Volume(_) | Self::AudioVolume(_))
    }

    pub(crate) fn scan(&self, ctx: &mut ScanCtx<'_>) -> Result<()> {
        match self {
            Self::Directory(src) => directory::scan(src, ctx),
            Self::ExtMap(src) => extmap::scan(src, ctx),
            Self::IntMap(src) => intmap::scan(src, ctx),
            Self::Patch(src) => patch::scan(src, ctx),
            Self::Wave(src) => patch::scan_wave(src, ctx),
            Self::MacResourceFork(src) => macfork::scan(src, ctx),
            Self::Chunk(src) => chunk::scan(src, ctx),
            Self::SolVolume(src) => sol::scan(src, ctx),
            Self::Pe(src) => pe::scan(src, ctx),
            Self::Volume(_) | Self::AudioVolume(_) => Ok(()),
        }
    }

    /// Materialize one resource's bytes (and, for a few patch kinds,
    /// the preserved header blob).
    pub(crate) fn load(
        &self,
        files: &mut FileCache,
        id: ResourceId,
        location: Location,
        volume_version: VolumeVersion,
    ) -> Result<(Bytes, Option<Vec<u8>>)> {
        match self {
            Self::Volume(src) => volume::load(src, files, id, location, volume_version),
            Self::AudioVolume(src) => volume::load_audio(src, files, id, location),
            Self::Patch(src) => patch::load(src, files, location),
            Self::Wave(src) => patch::load_wave(src, files),
            Self::MacResourceFork(src) => macfork::load(src, files, id, location),
            Self::Chunk(src) => chunk::load(src, id),
            Self::SolVolume(src) => sol::load(src, files, id, location),
            Self::Pe(src) => pe::load(src, id),
            Self::Directory(_) | Self::ExtMap(_) | Self::IntMap(_) => Err(
                StoreError::InvalidMapEntry {
                    id,
                    reason: "index source owns no resource data".into(),
                },
            ),
        }
    }

    /// Human-readable location for diagnostics.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Directory(src) => format!("directory {}", src.path.display()),
            Self::ExtMap(src) => format!("map {}", src.path.display()),
            Self::IntMap(src) => format!("audio map {}", src.map_number),
            Self::Volume(src) => format!("volume {}", src.path.display()),
            Self::AudioVolume(src) => format!("audio volume {}", src.path.display()),
            Self::Patch(src) => format!("patch {}", src.path.display()),
            Self::Wave(src) => format!("wave {}", src.path.display()),
            Self::MacResourceFork(src) => format!("resource fork {}", src.path.display()),
            Self::Chunk(src) => format!("chunk {}", src.number),
            Self::SolVolume(src) => format!("sol volume {}", src.path.display()),
            Self::Pe(src) => format!("executable {}", src.path.display()),
        }
    }
}
