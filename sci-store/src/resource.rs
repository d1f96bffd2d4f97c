//! The cached content unit and its lifecycle state machine

use std::num::NonZeroU32;

use bytes::Bytes;

use crate::types::{Location, ResourceId};

/// Residency state of one resource.
///
/// `Locked` carries the count of concurrent lockers; the combined
/// "locked and enqueued" state of the original cannot be represented,
/// which is the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Indexed but bytes not loaded (initial state, and after eviction)
    Unmaterialized,
    /// Bytes resident, not in the LRU list, not locked
    Allocated,
    /// Bytes resident and on the LRU list, eligible for eviction
    Enqueued,
    /// Bytes resident and pinned by one or more lockers
    Locked(NonZeroU32),
}

/// One indexed resource. Exactly one `Resource` exists per distinct id
/// for the lifetime of the manager; materialization and eviction only
/// move it through [`Status`].
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    status: Status,
    data: Option<Bytes>,
    /// Secondary header blob kept so patch-sourced views/pics/palettes
    /// can be re-exported byte-exact.
    header: Option<Vec<u8>>,
    location: Location,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, location: Location) -> Self {
        Self {
            id,
            status: Status::Unmaterialized,
            data: None,
            header: None,
            location,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Bytes, if materialized.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Byte length of the materialized content; zero before first load.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    pub(crate) fn lockers(&self) -> u32 {
        match self.status {
            Status::Locked(n) => n.get(),
            _ => 0,
        }
    }

    /// Redirect the index entry to a later-scanned source. Only legal
    /// while unmaterialized; the scan phase finishes before any load.
    pub(crate) fn relocate(&mut self, location: Location) {
        assert_eq!(self.status, Status::Unmaterialized, "relocating a live resource");
        self.location = location;
    }

    /// Unmaterialized -> Allocated.
    pub(crate) fn materialize(&mut self, data: Bytes, header: Option<Vec<u8>>) {
        assert_eq!(self.status, Status::Unmaterialized, "double materialization");
        self.data = Some(data);
        self.header = header;
        self.status = Status::Allocated;
    }

    /// Allocated -> Enqueued.
    pub(crate) fn enqueue(&mut self) {
        assert_eq!(self.status, Status::Allocated, "enqueue from non-Allocated");
        self.status = Status::Enqueued;
    }

    /// Enqueued -> Allocated (removed from the LRU list).
    pub(crate) fn dequeue(&mut self) {
        assert_eq!(self.status, Status::Enqueued, "dequeue from non-Enqueued");
        self.status = Status::Allocated;
    }

    /// Allocated -> Locked(1), or bump the locker count.
    pub(crate) fn lock(&mut self) {
        self.status = match self.status {
            Status::Allocated => Status::Locked(NonZeroU32::MIN),
            Status::Locked(n) => Status::Locked(n.saturating_add(1)),
            other => panic!("lock from {other:?}"),
        };
    }

    /// Drop one locker; at zero the resource returns to Allocated.
    /// Returns true when the last locker released.
    pub(crate) fn unlock(&mut self) -> bool {
        match self.status {
            Status::Locked(n) => match NonZeroU32::new(n.get() - 1) {
                Some(rest) => {
                    self.status = Status::Locked(rest);
                    false
                }
                None => {
                    self.status = Status::Allocated;
                    true
                }
            },
            other => panic!("unlock from {other:?}"),
        }
    }

    /// Drop resident bytes ahead of a relocation, from either resident
    /// unlocked state.
    pub(crate) fn discard(&mut self) {
        assert!(
            matches!(self.status, Status::Allocated | Status::Enqueued),
            "discard from {:?}",
            self.status
        );
        self.data = None;
        self.header = None;
        self.status = Status::Unmaterialized;
    }

    /// Enqueued -> Unmaterialized under memory pressure; the index
    /// entry survives, the bytes do not.
    pub(crate) fn evict(&mut self) {
        assert_eq!(self.status, Status::Enqueued, "evicting a non-Enqueued resource");
        self.data = None;
        self.header = None;
        self.status = Status::Unmaterialized;
    }
}
