//! Segment ids and addressing primitives.

/// Size of one page, both for the aperture table and for page-description chains.
pub const PAGE_SIZE: u64 = 4096;

/// Operand lives in system memory and is described by a page-description chain.
pub const SEGMENT_ID_SYSTEM: u32 = 0;
/// Aperture segment: a logical window backed by externally-owned system pages.
pub const SEGMENT_ID_APERTURE: u32 = 1;
/// Device-local video memory.
pub const SEGMENT_ID_VIDEO_MEMORY: u32 = 2;

/// Opaque identifier of a page-description chain owned by the system-memory collaborator.
///
/// Records carry the handle instead of a pointer; the worker resolves it when the operation
/// executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainHandle(pub u64);

/// A byte offset inside a numbered segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentAddress {
    pub segment_id: u32,
    pub address: u64,
}

impl SegmentAddress {
    pub const fn video_memory(address: u64) -> Self {
        Self {
            segment_id: SEGMENT_ID_VIDEO_MEMORY,
            address,
        }
    }

    pub const fn aperture(address: u64) -> Self {
        Self {
            segment_id: SEGMENT_ID_APERTURE,
            address,
        }
    }
}
