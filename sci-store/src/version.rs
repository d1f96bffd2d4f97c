//! Format-generation and interpreter-version tags
//!
//! Two independent on-disk generations (map layout, volume record
//! layout) are sniffed from the files themselves; the coarser
//! interpreter tag is refined afterwards from the scanned content.
//! All three are plain values computed once at startup and threaded
//! through the calls that need them.

use std::fmt;

/// Layout generation of the index ("map") file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapVersion {
    /// Flat 6-byte records, earliest trailer pattern
    Sci0Early,
    /// Flat 6-byte records, late trailer pattern
    Sci0Late,
    /// Flat records with the 4-bit-volume offset split
    Sci1Middle,
    /// Directory-of-offsets, 6-byte records
    Sci1Late,
    /// Directory-of-offsets, 5-byte records, word-aligned volumes
    Sci11,
    /// OS resource fork container
    Sci11Mac,
    /// Directory-of-offsets, 6-byte records, per-disc resmap files
    Sci2,
}

/// Record layout generation of the volume data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolumeVersion {
    /// 8-byte header, packed size includes the trailing header half
    Sci0Early,
    /// 8-byte header, packed size counts data only
    Sci0Late,
    /// 9-byte header with a leading type byte
    Sci1Late,
    /// 9-byte header, word-aligned record starts
    Sci11,
    /// 13-byte header with 32-bit sizes, marked type byte
    Sci2,
    /// 13-byte header, bare type byte
    Sci3,
}

impl VolumeVersion {
    /// Trial order for format detection, narrowest layout first.
    pub const DETECTION_ORDER: [Self; 6] = [
        Self::Sci0Early,
        Self::Sci0Late,
        Self::Sci1Late,
        Self::Sci11,
        Self::Sci2,
        Self::Sci3,
    ];

    /// Byte length of one record header under this layout.
    pub fn header_len(self) -> usize {
        match self {
            Self::Sci0Early | Self::Sci0Late => 8,
            Self::Sci1Late | Self::Sci11 => 9,
            Self::Sci2 | Self::Sci3 => 13,
        }
    }

    /// Record starts are aligned to even offsets.
    pub fn word_aligned(self) -> bool {
        self == Self::Sci11
    }
}

/// Interpreter compatibility tag, coarse "major.minor" generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SciVersion {
    V0Early,
    V0Late,
    V01,
    V1Early,
    V1Late,
    V11,
    V2,
    V21,
    V3,
}

impl SciVersion {
    /// The large-asset generation: wider caches, headerless patches.
    pub fn is_sci32(self) -> bool {
        self >= Self::V2
    }
}

impl fmt::Display for SciVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::V0Early => "SCI0 (early)",
            Self::V0Late => "SCI0 (late)",
            Self::V01 => "SCI01",
            Self::V1Early => "SCI1 (early)",
            Self::V1Late => "SCI1 (late)",
            Self::V11 => "SCI1.1",
            Self::V2 => "SCI2",
            Self::V21 => "SCI2.1",
            Self::V3 => "SCI3",
        };
        f.write_str(name)
    }
}
