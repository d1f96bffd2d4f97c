//! The resource manager: discovery, the index, and the byte-budget
//! cache
//!
//! Startup is staged. Volume files are classified first so map scans
//! can resolve volume numbers; the external maps scan next, each one's
//! audio maps (themselves resources) scanning before the next disc's
//! index runs; loose patches scan last so a valid patch always
//! overrides the archived copy. After startup the manager is a lookup service: `find_resource`
//! materializes bytes on demand, enqueued bytes age out of a bounded
//! LRU, locked bytes never do.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::cache::{FileCache, LruList};
use crate::detection::{
    detect_interpreter_version, detect_map_version, detect_volume_version, reconcile,
};
use crate::error::{Result, StoreError};
use crate::resource::{Resource, Status};
use crate::source::{
    chunk::ChunkSource,
    directory::{self, DirectorySource},
    extmap::ExtMapSource,
    intmap::IntMapSource,
    macfork::MacForkSource,
    patch::{PatchSource, WaveSource},
    pe::PeSource,
    sol::SolSource,
    volume::{AudioVolumeSource, VolumeSource},
    ScanCtx, Source, VolumeRef,
};
use crate::types::{ResourceId, ResourceKind, StoreConfig};
use crate::version::{MapVersion, SciVersion, VolumeVersion};

/// Enqueued-byte budget before the later interpreters' larger assets.
const LRU_BUDGET: usize = 256 * 1024;
/// Budget for the 32-bit generation.
const LRU_BUDGET_SCI32: usize = 4 * 1024 * 1024;

/// Synthetic volume numbers for the message and alternate overlays;
/// real map entries never reach this range.
const MSG_VOLUME: u16 = 65534;
const ALT_VOLUME: u16 = 65533;

#[derive(Debug)]
struct SourceSlot {
    source: Source,
    scanned: bool,
}

#[derive(Debug)]
pub struct ResourceManager {
    config: StoreConfig,
    files: FileCache,
    sources: Vec<SourceSlot>,
    index: BTreeMap<ResourceId, Resource>,
    lru: LruList,
    max_lru_bytes: usize,
    volumes: HashMap<u16, VolumeRef>,
    audio_volume: Option<usize>,
    map_version: MapVersion,
    volume_version: VolumeVersion,
    sci_version: SciVersion,
    has_bad_resources: bool,
}

impl ResourceManager {
    /// Open the game at `config.path`: classify its files, detect the
    /// format generations and build the full resource index. A
    /// directory with no index at all yields an empty store; an index
    /// whose data files are missing or undetectable is fatal.
    /// Individual broken entries are logged and flagged.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let found = discover(&config.path)?;
        let mut files = FileCache::new();

        let mut sources: Vec<SourceSlot> = Vec::new();
        let mut volumes = HashMap::new();
        let push = |sources: &mut Vec<SourceSlot>, source: Source| {
            let idx = sources.len();
            sources.push(SourceSlot {
                source,
                scanned: false,
            });
            idx
        };

        for (number, path) in &found.volumes {
            let len = files.file_len(path)?;
            let idx = push(
                &mut sources,
                Source::Volume(VolumeSource {
                    path: path.clone(),
                    number: *number,
                }),
            );
            volumes.insert(*number, VolumeRef { idx, len });
        }
        for (synthetic, path) in [
            (MSG_VOLUME, &found.msg_volume),
            (ALT_VOLUME, &found.alt_volume),
        ] {
            if let Some(path) = path {
                let len = files.file_len(path)?;
                let idx = push(
                    &mut sources,
                    Source::Volume(VolumeSource {
                        path: path.clone(),
                        number: synthetic,
                    }),
                );
                volumes.insert(synthetic, VolumeRef { idx, len });
            }
        }
        let mut audio_volume = None;
        for path in &found.audio_volumes {
            let idx = push(
                &mut sources,
                Source::AudioVolume(AudioVolumeSource { path: path.clone() }),
            );
            audio_volume.get_or_insert(idx);
        }
        for path in &found.sol_volumes {
            push(&mut sources, Source::SolVolume(SolSource { path: path.clone() }));
        }

        let mac_only = found.main_map.is_none() && found.disc_maps.is_empty();
        let (map_version, volume_version) = if mac_only && !found.mac_forks.is_empty() {
            (MapVersion::Sci11Mac, VolumeVersion::Sci11)
        } else if let Some(map_path) = found
            .main_map
            .clone()
            .or_else(|| found.disc_maps.first().map(|(_, p)| p.clone()))
        {
            if volumes.is_empty() {
                return Err(StoreError::NoDataFilesFound(
                    map_path.display().to_string(),
                ));
            }
            let paths: Vec<&Path> = found.volumes.iter().map(|(_, p)| p.as_path()).collect();
            let volume_version = detect_volume_version(&mut files, &paths)?;
            let map_version = detect_map_version(&mut files, &map_path, &volumes)?;
            reconcile(map_version, volume_version)
        } else {
            // Game identification probes arbitrary directories through
            // this path; a directory with no index at all must come up
            // as an empty store, not an error. Loose files still serve.
            warn!(
                path = %config.path.display(),
                "no resource index of any known generation"
            );
            (MapVersion::Sci0Late, VolumeVersion::Sci0Late)
        };
        info!(?map_version, ?volume_version, "format generations detected");

        let mut manager = Self {
            files,
            sources,
            index: BTreeMap::new(),
            lru: LruList::new(),
            max_lru_bytes: LRU_BUDGET,
            volumes,
            audio_volume,
            map_version,
            volume_version,
            sci_version: SciVersion::V0Late,
            has_bad_resources: false,
            config,
        };

        // Each disc's map may redefine ids an earlier disc also
        // carries, the audio maps included. A map's audio maps must
        // scan before the next disc's index relocates them, or records
        // only the earlier disc carries would never register.
        let mut ext_maps: Vec<ExtMapSource> = Vec::new();
        if let Some(path) = &found.main_map {
            ext_maps.push(ExtMapSource {
                path: path.clone(),
                volume: 0,
            });
        }
        for (number, path) in &found.disc_maps {
            ext_maps.push(ExtMapSource {
                path: path.clone(),
                volume: *number,
            });
        }
        if let (Some(map), true) = (&found.message_map, found.msg_volume.is_some()) {
            ext_maps.push(ExtMapSource {
                path: map.clone(),
                volume: MSG_VOLUME,
            });
        }
        if let (Some(map), true) = (&found.alt_map, found.alt_volume.is_some()) {
            ext_maps.push(ExtMapSource {
                path: map.clone(),
                volume: ALT_VOLUME,
            });
        }
        for src in ext_maps {
            manager.sources.push(SourceSlot {
                source: Source::ExtMap(src),
                scanned: false,
            });
            manager.scan_pending()?;
            manager.add_audio_maps()?;
        }

        for path in &found.mac_forks {
            manager.sources.push(SourceSlot {
                source: Source::MacResourceFork(MacForkSource { path: path.clone() }),
                scanned: false,
            });
        }
        manager.scan_pending()?;
        manager.add_audio_maps()?;

        for path in &found.executables {
            let len = manager.files.file_len(path)? as usize;
            let image = manager.files.read_up_to(path, 0, len)?;
            match PeSource::parse(path.clone(), &image) {
                Ok(src) => manager.sources.push(SourceSlot {
                    source: Source::Pe(src),
                    scanned: false,
                }),
                Err(_) => debug!(path = %path.display(), "not a string-bearing executable"),
            }
        }
        manager.scan_pending()?;
        manager.sci_version = detect_interpreter_version(
            manager.map_version,
            manager.volume_version,
            manager.index.keys(),
        );
        manager.add_chunk_fallback()?;

        let game_dir = manager.config.path.clone();
        manager
            .sources
            .push(SourceSlot {
                source: Source::Directory(DirectorySource { path: game_dir }),
                scanned: false,
            });
        manager.scan_pending()?;

        manager.max_lru_bytes = manager.config.max_lru_bytes.unwrap_or(
            if manager.sci_version.is_sci32() {
                LRU_BUDGET_SCI32
            } else {
                LRU_BUDGET
            },
        );
        info!(
            version = %manager.sci_version,
            resources = manager.index.len(),
            sources = manager.sources.len(),
            "resource store ready"
        );
        Ok(manager)
    }

    /// Open with defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StoreConfig {
            path: path.into(),
            ..StoreConfig::default()
        })
    }

    /// Scan every source that still needs it, including sources the
    /// scans themselves discover. Index sources failing to scan is
    /// fatal; anything else is logged and flagged.
    fn scan_pending(&mut self) -> Result<()> {
        loop {
            let Some(i) = self
                .sources
                .iter()
                .position(|s| !s.scanned && s.source.needs_scan())
            else {
                return Ok(());
            };
            self.sources[i].scanned = true;

            let mut has_bad = self.has_bad_resources;
            let new_sources;
            let result = {
                let slot = &self.sources[i];
                let mut ctx = ScanCtx {
                    files: &mut self.files,
                    index: &mut self.index,
                    volumes: &self.volumes,
                    audio_volume: self.audio_volume,
                    map_version: self.map_version,
                    volume_version: self.volume_version,
                    self_idx: i,
                    next_idx: self.sources.len(),
                    new_sources: Vec::new(),
                    has_bad: &mut has_bad,
                    patch_exclude: self.config.patch_exclude,
                };
                let result = slot.source.scan(&mut ctx);
                new_sources = ctx.new_sources;
                result
            };
            self.has_bad_resources = has_bad;

            if let Err(e) = result {
                let fatal = matches!(
                    self.sources[i].source,
                    Source::ExtMap(_) | Source::MacResourceFork(_)
                );
                if fatal {
                    return Err(e);
                }
                warn!(
                    source = %self.sources[i].source.describe(),
                    error = %e,
                    "source failed to scan"
                );
                self.has_bad_resources = true;
            }
            for source in new_sources {
                self.sources.push(SourceSlot {
                    source,
                    scanned: false,
                });
            }
        }
    }

    /// Every map-kind resource is itself an audio index; load each
    /// not-yet-materialized one and scan it as a source. A later disc
    /// relocating a map resets it to unmaterialized, so re-running
    /// picks the replacement up and its records override the earlier
    /// disc's record by record.
    fn add_audio_maps(&mut self) -> Result<()> {
        let maps: Vec<ResourceId> = self
            .index
            .iter()
            .filter(|(id, r)| {
                id.kind == ResourceKind::Map && r.status() == Status::Unmaterialized
            })
            .map(|(id, _)| *id)
            .collect();
        for id in maps {
            if let Err(e) = self.ensure_materialized(id) {
                warn!(%id, error = %e, "audio map failed to load");
                continue;
            }
            let Some(data) = self.index.get(&id).and_then(|r| r.data().cloned()) else {
                continue;
            };
            debug!(%id, bytes = data.len(), "adding audio map source");
            self.sources.push(SourceSlot {
                source: Source::IntMap(IntMapSource {
                    map_number: id.number,
                    data,
                }),
                scanned: false,
            });
        }
        self.scan_pending()
    }

    /// Some demo packages ship everything inside chunk 0 instead of
    /// top-level scripts; unpack it when no script is indexed.
    fn add_chunk_fallback(&mut self) -> Result<()> {
        let id = ResourceId::new(ResourceKind::Chunk, 0);
        if !self.index.contains_key(&id)
            || self.index.keys().any(|i| i.kind == ResourceKind::Script)
        {
            return Ok(());
        }
        if let Err(e) = self.ensure_materialized(id) {
            warn!(%id, error = %e, "chunk 0 failed to load");
            return Ok(());
        }
        let Some(data) = self.index.get(&id).and_then(|r| r.data().cloned()) else {
            return Ok(());
        };
        match ChunkSource::parse(0, data) {
            Ok(source) => {
                self.sources.push(SourceSlot {
                    source: Source::Chunk(source),
                    scanned: false,
                });
                self.scan_pending()
            }
            Err(e) => {
                warn!(%id, error = %e, "chunk 0 is not an archive");
                self.has_bad_resources = true;
                Ok(())
            }
        }
    }

    /// Whether `id` is indexed, without loading anything.
    pub fn test_resource(&self, id: ResourceId) -> bool {
        self.index.contains_key(&id)
    }

    /// Look up `id`, materializing its bytes if needed. With `lock`
    /// the resource is pinned until a matching `unlock_resource`;
    /// without it the resource joins the eviction queue. Returns
    /// `None` for unknown ids and for entries whose bytes cannot be
    /// loaded (those also set the bad-resource flag).
    pub fn find_resource(&mut self, id: ResourceId, lock: bool) -> Option<&Resource> {
        if !self.index.contains_key(&id) {
            return None;
        }
        if let Err(e) = self.ensure_materialized(id) {
            warn!(%id, error = %e, "resource failed to load");
            return None;
        }

        let status = self.index.get(&id)?.status();
        match (lock, status) {
            (false, Status::Allocated) => {
                let len = self.index.get(&id)?.len();
                self.index.get_mut(&id)?.enqueue();
                self.lru.insert(id, len);
            }
            (false, Status::Enqueued) => {
                // Refresh to most-recently-used.
                let len = self.index.get(&id)?.len();
                self.lru.remove(&id);
                self.lru.insert(id, len);
            }
            (false, Status::Locked(_)) => {}
            (true, Status::Allocated) => self.index.get_mut(&id)?.lock(),
            (true, Status::Enqueued) => {
                self.lru.remove(&id);
                let resource = self.index.get_mut(&id)?;
                resource.dequeue();
                resource.lock();
            }
            (true, Status::Locked(_)) => self.index.get_mut(&id)?.lock(),
            (_, Status::Unmaterialized) => return None,
        }

        self.balance_lru(if lock { None } else { Some(id) });
        self.index.get(&id)
    }

    /// Bytes-returning convenience over [`Self::find_resource`].
    pub fn find(&mut self, id: ResourceId, lock: bool) -> Option<Bytes> {
        self.find_resource(id, lock).and_then(|r| r.data().cloned())
    }

    /// Release one lock on `id`. When the last locker releases, the
    /// bytes stay resident but become eligible for the queue on the
    /// next lookup. Unlocking something that is not locked is a logged
    /// no-op.
    pub fn unlock_resource(&mut self, id: ResourceId) {
        let Some(resource) = self.index.get_mut(&id) else {
            warn!(%id, "unlock of an unknown resource");
            return;
        };
        if resource.lockers() == 0 {
            warn!(%id, "unlock of an unlocked resource");
            return;
        }
        if resource.unlock() {
            debug!(%id, "last lock released");
        }
    }

    /// All indexed ids of `kind`, in id order. For the tuple-addressed
    /// kinds `map_filter` narrows to one audio map.
    pub fn list_resources(&self, kind: ResourceKind, map_filter: Option<u16>) -> Vec<ResourceId> {
        self.index
            .keys()
            .filter(|id| id.kind == kind && map_filter.map_or(true, |m| id.number == m))
            .copied()
            .collect()
    }

    /// Register a loose patch or wave file discovered after startup.
    /// Resident stale bytes are dropped so the next lookup loads the
    /// patch; a locked resource refuses the update.
    pub fn update_resource(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unusable file name"))?;

        let source = if let Some((stem, "wav")) = name.split_once('.') {
            let number: u16 = stem.parse().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "wave file without a number")
            })?;
            self.drop_stale(ResourceId::new(ResourceKind::Audio, number))?;
            Source::Wave(WaveSource {
                path: path.to_path_buf(),
                number,
            })
        } else {
            let id = directory::id_from_name(&name).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "not a patch file name")
            })?;
            self.drop_stale(id)?;
            Source::Patch(PatchSource {
                path: path.to_path_buf(),
                id,
            })
        };
        self.sources.push(SourceSlot {
            source,
            scanned: false,
        });
        self.scan_pending()
    }

    fn drop_stale(&mut self, id: ResourceId) -> Result<()> {
        let Some(resource) = self.index.get_mut(&id) else {
            return Ok(());
        };
        match resource.status() {
            Status::Unmaterialized => {}
            Status::Locked(_) => {
                return Err(StoreError::InvalidMapEntry {
                    id,
                    reason: "cannot patch a locked resource".into(),
                })
            }
            Status::Enqueued => {
                self.lru.remove(&id);
                resource.discard();
            }
            Status::Allocated => resource.discard(),
        }
        Ok(())
    }

    fn ensure_materialized(&mut self, id: ResourceId) -> Result<()> {
        let Some(resource) = self.index.get(&id) else {
            return Ok(());
        };
        if resource.status() != Status::Unmaterialized {
            return Ok(());
        }
        let location = resource.location();
        let slot = &self.sources[location.source];
        let loaded = slot
            .source
            .load(&mut self.files, id, location, self.volume_version);
        match loaded {
            Ok((data, header)) => {
                if let Some(resource) = self.index.get_mut(&id) {
                    resource.materialize(data, header);
                }
                Ok(())
            }
            Err(e) => {
                self.has_bad_resources = true;
                Err(e)
            }
        }
    }

    /// Evict queue tails until the byte budget holds. `keep` marks the
    /// entry just returned to the caller; when it alone exceeds the
    /// budget it leaves the queue but keeps its bytes, so the queue
    /// total never ends a call over budget.
    fn balance_lru(&mut self, keep: Option<ResourceId>) {
        while self.lru.bytes() > self.max_lru_bytes {
            let Some((victim, size)) = self.lru.pop_tail() else {
                break;
            };
            if Some(victim) == keep {
                debug!(%victim, size, "over budget on its own; resident but unqueued");
                if let Some(resource) = self.index.get_mut(&victim) {
                    resource.dequeue();
                }
                continue;
            }
            debug!(%victim, size, "evicting");
            if let Some(resource) = self.index.get_mut(&victim) {
                resource.evict();
            }
        }
    }

    pub fn sci_version(&self) -> SciVersion {
        self.sci_version
    }

    pub fn map_version(&self) -> MapVersion {
        self.map_version
    }

    pub fn volume_version(&self) -> VolumeVersion {
        self.volume_version
    }

    /// Any index entry, scan or load has failed since startup.
    pub fn has_bad_resources(&self) -> bool {
        self.has_bad_resources
    }

    /// Bytes currently held by the eviction queue.
    pub fn lru_bytes(&self) -> usize {
        self.lru.bytes()
    }

    /// Bytes pinned by locked resources.
    pub fn locked_bytes(&self) -> usize {
        self.index
            .values()
            .filter(|r| r.lockers() > 0)
            .map(Resource::len)
            .sum()
    }

    pub fn resource_count(&self) -> usize {
        self.index.len()
    }

    /// Where `id`'s bytes come from, for diagnostics.
    pub fn location_name(&self, id: ResourceId) -> Option<String> {
        let location = self.index.get(&id)?.location();
        Some(self.sources.get(location.source)?.source.describe())
    }
}

/// Classified directory listing.
#[derive(Default)]
struct Discovery {
    main_map: Option<PathBuf>,
    message_map: Option<PathBuf>,
    alt_map: Option<PathBuf>,
    disc_maps: Vec<(u16, PathBuf)>,
    volumes: Vec<(u16, PathBuf)>,
    msg_volume: Option<PathBuf>,
    alt_volume: Option<PathBuf>,
    audio_volumes: Vec<PathBuf>,
    sol_volumes: Vec<PathBuf>,
    executables: Vec<PathBuf>,
    mac_forks: Vec<PathBuf>,
}

fn discover(dir: &Path) -> Result<Discovery> {
    let mut names: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::MapNotFound(dir.display().to_string()),
        _ => StoreError::Io(e),
    })? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push((name.to_ascii_lowercase(), entry.path()));
        }
    }
    names.sort();

    let mut found = Discovery::default();
    for (name, path) in names {
        match name.as_str() {
            "resource.map" => found.main_map = Some(path),
            "message.map" => found.message_map = Some(path),
            "altres.map" => found.alt_map = Some(path),
            "resource.msg" => found.msg_volume = Some(path),
            "resource.alt" => found.alt_volume = Some(path),
            "resource.aud" | "resource.sfx" => found.audio_volumes.push(path),
            _ => {
                let Some((stem, ext)) = name.split_once('.') else {
                    if let Some(digits) = name.strip_prefix("data") {
                        if digits.parse::<u16>().is_ok() {
                            found.mac_forks.push(path);
                        }
                    }
                    continue;
                };
                match (stem, ext.parse::<u16>()) {
                    ("resource" | "ressci", Ok(number)) => found.volumes.push((number, path)),
                    ("resmap", Ok(number)) => found.disc_maps.push((number, path)),
                    _ if ext == "sol" => found.sol_volumes.push(path),
                    _ if ext == "exe" => found.executables.push(path),
                    _ => {}
                }
            }
        }
    }
    Ok(found)
}
