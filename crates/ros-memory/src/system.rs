use ros_protocol::ChainHandle;

use crate::chain::PageChain;
use crate::error::MemoryResult;

/// A system-virtual view of every page in a chain, laid out contiguously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemMapping {
    pub chain: ChainHandle,
    pub base: u64,
    pub len: u64,
    /// The chain was already permanently mapped; the caller must not undo the mapping.
    pub already_mapped: bool,
}

/// System memory as seen by the worker.
///
/// Methods take `&self`: implementations are shared between the external owner of the pages and
/// the adapter's worker thread, so they synchronize internally.
pub trait SystemMemory: Send + Sync {
    /// Returns a snapshot of the chain registered under `handle`.
    fn chain(&self, handle: ChainHandle) -> Option<PageChain>;

    /// Maps every page of the chain into one contiguous system range.
    ///
    /// Returns `None` if the chain is unknown or any page is not resident.
    fn map_locked_pages(&self, handle: ChainHandle) -> Option<SystemMapping>;

    /// Undoes a mapping returned by [`SystemMemory::map_locked_pages`].
    fn unmap_locked_pages(&self, mapping: &SystemMapping);

    fn read(&self, va: u64, dst: &mut [u8]) -> MemoryResult<()>;

    fn write(&self, va: u64, src: &[u8]) -> MemoryResult<()>;
}
