//! End-to-end tests over synthesized game directories

use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use sci_store::{
    MapVersion, ResourceId, ResourceKind, ResourceManager, SciVersion, Status, StoreConfig,
    StoreError, VolumeVersion,
};

/// Bodies in multi-record volumes end with four zero bytes so the
/// record chain only parses under one header layout.
const PAD: &[u8] = &[0, 0, 0, 0];

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn view(n: u16) -> ResourceId {
    ResourceId::new(ResourceKind::View, n)
}

/// Build a flat-map game: every resource stored uncompressed in
/// resource.001.
fn build_sci0_game(dir: &Path, resources: &[(ResourceKind, u16, Vec<u8>)]) {
    let mut volume = Vec::new();
    let mut map = Vec::new();
    for (kind, number, body) in resources {
        let id = (*kind as u16) << 11 | number;
        let word = 1u32 << 26 | volume.len() as u32;
        map.extend_from_slice(&id.to_le_bytes());
        map.extend_from_slice(&word.to_le_bytes());

        volume.extend_from_slice(&id.to_le_bytes());
        volume.extend_from_slice(&(body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&(body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&0u16.to_le_bytes());
        volume.extend_from_slice(body);
    }
    map.extend_from_slice(&[0xFF; 6]);
    std::fs::write(dir.join("resource.map"), map).unwrap();
    std::fs::write(dir.join("resource.001"), volume).unwrap();
}

fn body(payload: &[u8]) -> Vec<u8> {
    [payload, PAD].concat()
}

#[test]
fn open_detects_and_serves_sci0() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::View, 1, body(b"view pixels")),
            (ResourceKind::Text, 2, body(b"hello adventurer")),
        ],
    );
    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert_eq!(store.map_version(), MapVersion::Sci0Late);
    assert_eq!(store.volume_version(), VolumeVersion::Sci0Late);
    assert_eq!(store.sci_version(), SciVersion::V0Late);
    assert!(!store.has_bad_resources());
    assert_eq!(store.resource_count(), 2);
    assert!(store.test_resource(view(1)));
    assert!(!store.test_resource(view(9)));

    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), body(b"view pixels"));
    assert_eq!(resource.status(), Status::Enqueued);
    assert_eq!(store.lru_bytes(), body(b"view pixels").len());
    assert_eq!(store.locked_bytes(), 0);

    let bytes = store.find(view(1), false).unwrap();
    assert_eq!(bytes.as_ref(), body(b"view pixels"));
    assert_eq!(store.find(view(9), false), None);
}

#[test]
fn lock_counting_and_release() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"pinned"))]);
    let mut store = ResourceManager::open(dir.path()).unwrap();
    let len = body(b"pinned").len();

    store.find_resource(view(1), true).unwrap();
    store.find_resource(view(1), true).unwrap();
    assert_eq!(store.locked_bytes(), len);
    assert_eq!(store.lru_bytes(), 0);

    store.unlock_resource(view(1));
    assert_eq!(store.locked_bytes(), len);

    store.unlock_resource(view(1));
    assert_eq!(store.locked_bytes(), 0);
    // Resident but not queued until the next lookup.
    assert_eq!(store.lru_bytes(), 0);

    // Surplus unlock is a logged no-op.
    store.unlock_resource(view(1));
    assert_eq!(store.locked_bytes(), 0);

    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.status(), Status::Enqueued);
    assert_eq!(store.lru_bytes(), len);
}

#[test]
fn lru_budget_evicts_oldest() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::View, 1, body(&[b'a'; 60])),
            (ResourceKind::View, 2, body(&[b'b'; 60])),
            (ResourceKind::View, 3, body(&[b'c'; 60])),
        ],
    );
    let mut store = ResourceManager::new(StoreConfig {
        path: dir.path().to_path_buf(),
        max_lru_bytes: Some(150),
        patch_exclude: None,
    })
    .unwrap();

    store.find_resource(view(1), false).unwrap();
    store.find_resource(view(2), false).unwrap();
    assert_eq!(store.lru_bytes(), 128);
    // Third load pushes view 1 out.
    store.find_resource(view(3), false).unwrap();
    assert_eq!(store.lru_bytes(), 128);

    // The evicted entry reloads transparently.
    let reloaded = store.find_resource(view(1), false).unwrap();
    assert_eq!(reloaded.data().unwrap().as_ref(), [&[b'a'; 60][..], PAD].concat());
}

#[test]
fn just_found_resource_survives_a_tiny_budget() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(&[b'x'; 60]))]);
    let mut store = ResourceManager::new(StoreConfig {
        path: dir.path().to_path_buf(),
        max_lru_bytes: Some(10),
        patch_exclude: None,
    })
    .unwrap();
    // The bytes stay resident for the caller, but an entry that busts
    // the budget on its own leaves the queue empty.
    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.status(), Status::Allocated);
    assert!(resource.data().is_some());
    assert_eq!(store.lru_bytes(), 0);
}

#[test]
fn locked_resources_never_age_out() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::View, 1, body(&[b'a'; 60])),
            (ResourceKind::View, 2, body(&[b'b'; 60])),
            (ResourceKind::View, 3, body(&[b'c'; 60])),
        ],
    );
    let mut store = ResourceManager::new(StoreConfig {
        path: dir.path().to_path_buf(),
        max_lru_bytes: Some(70),
        patch_exclude: None,
    })
    .unwrap();

    store.find_resource(view(1), true).unwrap();
    store.find_resource(view(2), false).unwrap();
    store.find_resource(view(3), false).unwrap();

    // 2 was evicted to make room for 3; 1 stayed locked throughout.
    assert_eq!(store.locked_bytes(), 64);
    assert!(store.lru_bytes() <= 70);
    let locked = store.find_resource(view(1), false).unwrap();
    assert_eq!(locked.data().unwrap().as_ref(), [&[b'a'; 60][..], PAD].concat());
    assert!(matches!(locked.status(), Status::Locked(_)));
    store.unlock_resource(view(1));
}

#[test]
fn map_entry_at_end_of_volume_is_empty() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::View, 1, body(b"first")),
            (ResourceKind::View, 2, body(b"second")),
        ],
    );
    // Append a third map entry pointing exactly at end of volume.
    let volume_len = std::fs::metadata(dir.path().join("resource.001")).unwrap().len() as u32;
    let mut map = std::fs::read(dir.path().join("resource.map")).unwrap();
    map.truncate(map.len() - 6);
    let id = (ResourceKind::View as u16) << 11 | 3;
    map.extend_from_slice(&id.to_le_bytes());
    map.extend_from_slice(&(1u32 << 26 | volume_len).to_le_bytes());
    map.extend_from_slice(&[0xFF; 6]);
    std::fs::write(dir.path().join("resource.map"), map).unwrap();

    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert!(store.test_resource(view(3)));
    assert!(store.find_resource(view(3), false).is_none());
    assert!(store.has_bad_resources());
    // The neighbors are unaffected.
    assert!(store.find_resource(view(1), false).is_some());
    assert!(store.find_resource(view(2), false).is_some());
}

#[test]
fn zero_byte_resource_loads_empty() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::Text, 5, Vec::new()),
            (ResourceKind::View, 1, body(b"something")),
        ],
    );
    let mut store = ResourceManager::open(dir.path()).unwrap();
    let empty = store
        .find_resource(ResourceId::new(ResourceKind::Text, 5), false)
        .unwrap();
    assert_eq!(empty.len(), 0);
    assert!(empty.is_empty());
}

#[test]
fn loose_patch_overrides_the_volume() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"archived"))]);
    std::fs::write(
        dir.path().join("view.001"),
        [&[0x80, 0][..], b"patched!"].concat(),
    )
    .unwrap();

    let mut store = ResourceManager::open(dir.path()).unwrap();
    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), b"patched!");
    assert!(store.location_name(view(1)).unwrap().starts_with("patch"));
}

#[test]
fn invalid_patch_leaves_the_volume_copy() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"archived"))]);
    // Self-declared kind says pic; the file name says view.
    std::fs::write(dir.path().join("view.001"), [0x81, 0, 0]).unwrap();

    let mut store = ResourceManager::open(dir.path()).unwrap();
    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), body(b"archived"));
}

#[test]
fn patch_exclusion_is_honored() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"archived"))]);
    std::fs::write(
        dir.path().join("view.001"),
        [&[0x80, 0][..], b"patched!"].concat(),
    )
    .unwrap();

    let mut store = ResourceManager::new(StoreConfig {
        path: dir.path().to_path_buf(),
        max_lru_bytes: None,
        patch_exclude: Some(|id| id == ResourceId::new(ResourceKind::View, 1)),
    })
    .unwrap();
    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), body(b"archived"));
}

#[test]
fn runtime_patch_update() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"archived"))]);
    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert_eq!(
        store.find_resource(view(1), false).unwrap().data().unwrap().as_ref(),
        body(b"archived")
    );

    let patch = dir.path().join("view.001");
    std::fs::write(&patch, [&[0x80, 0][..], b"patched!"].concat()).unwrap();
    store.update_resource(&patch).unwrap();
    assert_eq!(
        store.find_resource(view(1), false).unwrap().data().unwrap().as_ref(),
        b"patched!"
    );
}

#[test]
fn runtime_patch_refuses_a_locked_resource() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"archived"))]);
    let mut store = ResourceManager::open(dir.path()).unwrap();
    store.find_resource(view(1), true).unwrap();

    let patch = dir.path().join("view.001");
    std::fs::write(&patch, [&[0x80, 0][..], b"patched!"].concat()).unwrap();
    let err = store.update_resource(&patch).unwrap_err();
    assert!(matches!(err, StoreError::InvalidMapEntry { .. }));
    store.unlock_resource(view(1));
}

#[test]
fn list_resources_by_kind() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(
        dir.path(),
        &[
            (ResourceKind::View, 2, body(b"v2")),
            (ResourceKind::View, 1, body(b"v1")),
            (ResourceKind::Pic, 7, body(b"p7")),
        ],
    );
    let store = ResourceManager::open(dir.path()).unwrap();
    assert_eq!(
        store.list_resources(ResourceKind::View, None),
        vec![view(1), view(2)]
    );
    assert_eq!(
        store.list_resources(ResourceKind::Pic, None),
        vec![ResourceId::new(ResourceKind::Pic, 7)]
    );
    assert!(store.list_resources(ResourceKind::Sound, None).is_empty());
}

/// Directory-grammar game with an audio volume: resource.map with
/// 5-byte records, resource.000 with 9-byte record headers, a global
/// audio map and a loose wave file.
fn build_sci11_game(dir: &Path) {
    // Volume: view 1 (7-byte body) at 0, audio map 65535 at 16.
    let view_body = b"7pixels";
    let mut audio_map = Vec::new();
    audio_map.extend_from_slice(&7u16.to_le_bytes());
    audio_map.extend_from_slice(&0u32.to_le_bytes()); // offset in resource.aud
    audio_map.extend_from_slice(&9u32.to_le_bytes()); // size
    audio_map.extend_from_slice(&[0xFF, 0xFF, 0x00]); // terminator + pad

    let mut volume = Vec::new();
    for (kind, number, body) in [
        (ResourceKind::View, 1u16, &view_body[..]),
        (ResourceKind::Map, 65535, &audio_map[..]),
    ] {
        volume.push(kind as u8 | 0x80);
        volume.extend_from_slice(&number.to_le_bytes());
        volume.extend_from_slice(&(body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&(body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&0u16.to_le_bytes());
        volume.extend_from_slice(body);
    }
    std::fs::write(dir.join("resource.000"), volume).unwrap();

    let mut map = Vec::new();
    map.push(0x80); // view section
    map.extend_from_slice(&9u16.to_le_bytes());
    map.push(0x80 | ResourceKind::Map as u8);
    map.extend_from_slice(&14u16.to_le_bytes());
    map.push(0xFF);
    map.extend_from_slice(&19u16.to_le_bytes());
    // view 1 at volume offset 0
    map.extend_from_slice(&1u16.to_le_bytes());
    map.extend_from_slice(&[0, 0, 0]);
    // map 65535 at volume offset 16, stored halved
    map.extend_from_slice(&0xFFFFu16.to_le_bytes());
    map.extend_from_slice(&[8, 0, 0]);
    std::fs::write(dir.join("resource.map"), map).unwrap();

    std::fs::write(dir.join("resource.aud"), b"aud-bytes").unwrap();
}

#[test]
fn sci11_game_with_audio_map() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    build_sci11_game(dir.path());
    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert_eq!(store.map_version(), MapVersion::Sci11);
    assert_eq!(store.volume_version(), VolumeVersion::Sci11);
    assert_eq!(store.sci_version(), SciVersion::V11);
    assert!(!store.has_bad_resources());

    let audio = ResourceId::new(ResourceKind::Audio, 7);
    assert!(store.test_resource(audio));
    let resource = store.find_resource(audio, false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), b"aud-bytes");

    let resource = store.find_resource(view(1), false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), b"7pixels");
}

#[test]
fn wave_file_overrides_audio_volume() {
    let dir = TempDir::new().unwrap();
    build_sci11_game(dir.path());
    std::fs::write(dir.path().join("7.wav"), b"RIFFwave").unwrap();

    let mut store = ResourceManager::open(dir.path()).unwrap();
    let audio = ResourceId::new(ResourceKind::Audio, 7);
    let resource = store.find_resource(audio, false).unwrap();
    assert_eq!(resource.data().unwrap().as_ref(), b"RIFFwave");
}

/// Two-disc game in the directory grammar: each disc's resmap pins its
/// own volume, and each volume carries its own copy of the global
/// audio map.
fn build_two_disc_game(dir: &Path) {
    let discs: [(u16, &[(u16, u32, u32)]); 2] = [
        (1, &[(7, 0, 5), (9, 0, 2)]),
        (2, &[(8, 5, 3), (9, 5, 3)]),
    ];
    for (disc, records) in discs {
        let mut map_body = Vec::new();
        for &(number, offset, size) in records {
            map_body.extend_from_slice(&number.to_le_bytes());
            map_body.extend_from_slice(&offset.to_le_bytes());
            map_body.extend_from_slice(&size.to_le_bytes());
        }
        map_body.extend_from_slice(&[0xFF, 0xFF]);

        let mut volume = Vec::new();
        volume.push(ResourceKind::Map as u8 | 0x80);
        volume.extend_from_slice(&0xFFFFu16.to_le_bytes());
        volume.extend_from_slice(&(map_body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&(map_body.len() as u16).to_le_bytes());
        volume.extend_from_slice(&0u16.to_le_bytes());
        volume.extend_from_slice(&map_body);
        std::fs::write(dir.join(format!("resource.{disc:03}")), volume).unwrap();

        let mut map = Vec::new();
        map.push(ResourceKind::Map as u8 | 0x80);
        map.extend_from_slice(&6u16.to_le_bytes());
        map.push(0xFF);
        map.extend_from_slice(&12u16.to_le_bytes());
        // map 65535 at volume offset 0
        map.extend_from_slice(&0xFFFFu16.to_le_bytes());
        map.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(dir.join(format!("resmap.{disc:03}")), map).unwrap();
    }
    std::fs::write(dir.join("resource.aud"), b"11111222").unwrap();
}

#[test]
fn each_disc_audio_map_is_indexed() {
    let dir = TempDir::new().unwrap();
    build_two_disc_game(dir.path());
    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert!(!store.has_bad_resources());

    let audio = |n| ResourceId::new(ResourceKind::Audio, n);
    // 7 only exists on disc 1; its record survives disc 2's map.
    assert_eq!(store.find(audio(7), false).unwrap().as_ref(), b"11111");
    assert_eq!(store.find(audio(8), false).unwrap().as_ref(), b"222");
    // Both discs list 9; the later disc wins.
    assert_eq!(store.find(audio(9), false).unwrap().as_ref(), b"222");
}

#[test]
fn bad_map_entry_flags_but_does_not_fail_startup() {
    let dir = TempDir::new().unwrap();
    build_sci0_game(dir.path(), &[(ResourceKind::View, 1, body(b"good"))]);
    // Add an entry pointing far past the end of the volume.
    let mut map = std::fs::read(dir.path().join("resource.map")).unwrap();
    map.truncate(map.len() - 6);
    let id = (ResourceKind::Pic as u16) << 11 | 9;
    map.extend_from_slice(&id.to_le_bytes());
    map.extend_from_slice(&(1u32 << 26 | 0x0033_0000).to_le_bytes());
    map.extend_from_slice(&[0xFF; 6]);
    std::fs::write(dir.path().join("resource.map"), map).unwrap();

    let mut store = ResourceManager::open(dir.path()).unwrap();
    assert!(store.has_bad_resources());
    assert!(!store.test_resource(ResourceId::new(ResourceKind::Pic, 9)));
    assert!(store.find_resource(view(1), false).is_some());
}
