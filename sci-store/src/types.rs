//! Common types used throughout the resource store

use std::fmt;
use std::path::PathBuf;

/// Resource kinds, one per on-disk asset class.
///
/// Discriminants match the 5-bit type field of the early flat map
/// format and the type byte of the later record layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    View = 0,
    Pic,
    Script,
    Text,
    Sound,
    Memory,
    Vocab,
    Font,
    Cursor,
    Patch,
    Bitmap,
    Palette,
    CdAudio,
    Audio,
    Sync,
    Message,
    Map,
    Heap,
    Audio36,
    Sync36,
    Translation,
    Rave,
    Robot,
    Vmd,
    Chunk,
    Animation,
    Etc,
    Duck,
    Clut,
    TiledBackground,
    MacPict,
    MacIconBarPictN,
    MacIconBarPictS,
}

const KIND_COUNT: usize = 33;

const KIND_TABLE: [ResourceKind; KIND_COUNT] = [
    ResourceKind::View,
    ResourceKind::Pic,
    ResourceKind::Script,
    ResourceKind::Text,
    ResourceKind::Sound,
    ResourceKind::Memory,
    ResourceKind::Vocab,
    ResourceKind::Font,
    ResourceKind::Cursor,
    ResourceKind::Patch,
    ResourceKind::Bitmap,
    ResourceKind::Palette,
    ResourceKind::CdAudio,
    ResourceKind::Audio,
    ResourceKind::Sync,
    ResourceKind::Message,
    ResourceKind::Map,
    ResourceKind::Heap,
    ResourceKind::Audio36,
    ResourceKind::Sync36,
    ResourceKind::Translation,
    ResourceKind::Rave,
    ResourceKind::Robot,
    ResourceKind::Vmd,
    ResourceKind::Chunk,
    ResourceKind::Animation,
    ResourceKind::Etc,
    ResourceKind::Duck,
    ResourceKind::Clut,
    ResourceKind::TiledBackground,
    ResourceKind::MacPict,
    ResourceKind::MacIconBarPictN,
    ResourceKind::MacIconBarPictS,
];

/// Canonical short names, indexed by discriminant.
const KIND_NAMES: [&str; KIND_COUNT] = [
    "view",
    "pic",
    "script",
    "text",
    "sound",
    "memory",
    "vocab",
    "font",
    "cursor",
    "patch",
    "bitmap",
    "palette",
    "cdaudio",
    "audio",
    "sync",
    "message",
    "map",
    "heap",
    "audio36",
    "sync36",
    "translation",
    "rave",
    "robot",
    "vmd",
    "chunk",
    "animation",
    "etc",
    "duck",
    "clut",
    "tiledback",
    "macpict",
    "maciconbarn",
    "maciconbars",
];

/// Patch-file suffixes for the `{number}.{suffix}` naming grammar;
/// empty where the kind has no loose-file form.
const KIND_SUFFIXES: [&str; KIND_COUNT] = [
    "v56", "p56", "scr", "tex", "snd", "", "voc", "fon", "cur", "pat", "bit", "pal", "cda", "aud",
    "syn", "msg", "map", "hep", "", "", "trn", "", "rbt", "vmd", "chk", "ani", "etc", "duk", "clu",
    "tlb", "pct", "", "",
];

impl ResourceKind {
    /// All kinds, in discriminant order.
    pub fn all() -> impl Iterator<Item = Self> {
        KIND_TABLE.iter().copied()
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        KIND_TABLE.get(usize::from(value)).copied()
    }

    /// The canonical short name, also the stem of the
    /// `{typename}.{number}` patch grammar.
    pub fn name(self) -> &'static str {
        KIND_NAMES[self as usize]
    }

    /// Loose patch-file suffix, if the kind has one.
    pub fn suffix(self) -> Option<&'static str> {
        let s = KIND_SUFFIXES[self as usize];
        (!s.is_empty()).then_some(s)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        KIND_NAMES
            .iter()
            .position(|&n| n.eq_ignore_ascii_case(name))
            .and_then(|i| Self::from_u8(i as u8))
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        KIND_SUFFIXES
            .iter()
            .position(|&s| !s.is_empty() && s.eq_ignore_ascii_case(suffix))
            .and_then(|i| Self::from_u8(i as u8))
    }

    /// The two kinds addressed by a five-field tuple and base-36
    /// filenames rather than a plain number.
    pub fn is_base36(self) -> bool {
        matches!(self, Self::Audio36 | Self::Sync36)
    }
}

/// Identity of one resource: kind, number and (for the base-36 kinds)
/// the packed noun/verb/cond/seq tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub number: u16,
    pub tuple: u32,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, number: u16) -> Self {
        debug_assert!(!kind.is_base36());
        Self { kind, number, tuple: 0 }
    }

    /// Id for a voice-over / sync asset: `number` is the owning audio
    /// map, the remaining fields form the tuple.
    pub fn with_tuple(kind: ResourceKind, map: u16, noun: u8, verb: u8, cond: u8, seq: u8) -> Self {
        debug_assert!(kind.is_base36());
        Self {
            kind,
            number: map,
            tuple: (u32::from(noun) << 24)
                | (u32::from(verb) << 16)
                | (u32::from(cond) << 8)
                | u32::from(seq),
        }
    }

    pub fn noun(self) -> u8 {
        (self.tuple >> 24) as u8
    }

    pub fn verb(self) -> u8 {
        (self.tuple >> 16) as u8
    }

    pub fn cond(self) -> u8 {
        (self.tuple >> 8) as u8
    }

    pub fn seq(self) -> u8 {
        self.tuple as u8
    }

    /// Loose patch filename for a tuple-addressed id, `None` for the
    /// plainly numbered kinds.
    pub fn base36_name(self) -> Option<String> {
        if !self.kind.is_base36() {
            return None;
        }
        let lead = if self.kind == ResourceKind::Audio36 { '@' } else { '#' };
        Some(format!(
            "{lead}{}{}{}.{}{}",
            base36(self.number.into(), 3),
            base36(self.noun().into(), 2),
            base36(self.verb().into(), 2),
            base36(self.cond().into(), 2),
            base36(self.seq().into(), 1),
        ))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_base36() {
            write!(
                f,
                "{}({} {}:{}:{}:{})",
                self.kind.name(),
                self.number,
                self.noun(),
                self.verb(),
                self.cond(),
                self.seq()
            )
        } else {
            write!(f, "{}.{:03}", self.kind.name(), self.number)
        }
    }
}

/// Fixed-width base-36 encoding used by the loose audio/sync patch
/// filename grammar.
pub(crate) fn base36(mut value: u32, width: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = vec![b'0'; width];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8(out).unwrap_or_default()
}

pub(crate) fn parse_base36(text: &str) -> Option<u32> {
    let mut value: u32 = 0;
    for c in text.chars() {
        value = value.checked_mul(36)?;
        value = value.checked_add(c.to_digit(36)?)?;
    }
    Some(value)
}

/// Where a resource's bytes live: the providing source and the byte
/// offset inside that source's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Index into the manager's source list
    pub source: usize,
    /// Byte offset within the source's container file
    pub offset: u64,
    /// Explicit byte count, for sources whose index records carry one;
    /// `None` where a per-record header declares the size instead.
    pub size: Option<u32>,
}

impl Location {
    pub(crate) fn new(source: usize, offset: u64) -> Self {
        Self { source, offset, size: None }
    }

    pub(crate) fn sized(source: usize, offset: u64, size: u32) -> Self {
        Self { source, offset, size: Some(size) }
    }
}

/// Configuration for the resource store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Game directory scanned for maps, volumes and loose patches
    pub path: PathBuf,
    /// Override for the enqueued-resource byte budget; `None` selects
    /// the generation-dependent default.
    pub max_lru_bytes: Option<usize>,
    /// Ids for which loose patch files must be ignored. Some titles
    /// ship broken patches; the policy is the caller's, not ours.
    pub patch_exclude: Option<fn(ResourceId) -> bool>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            max_lru_bytes: None,
            patch_exclude: None,
        }
    }
}
