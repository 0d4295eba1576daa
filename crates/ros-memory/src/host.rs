use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use ros_protocol::{ChainHandle, PAGE_SIZE};

use crate::chain::{PageChain, PageRun};
use crate::error::{MemoryError, MemoryResult};
use crate::system::{SystemMapping, SystemMemory};

/// First virtual address handed out by [`HostSystemMemory::allocate_pages`].
const PAGE_POOL_BASE: u64 = 0x0000_0010_0000_0000;
/// System-virtual windows created by mappings live above this address.
const WINDOW_BASE: u64 = 0xFFFF_8000_0000_0000;

#[derive(Debug)]
struct HostChain {
    chain: PageChain,
    /// Base of the permanent window if the chain was mapped with `map_permanently`.
    permanent: Option<u64>,
}

#[derive(Debug, Default)]
struct HostState {
    pages: HashMap<u64, Box<[u8]>>,
    next_page: u64,
    chains: HashMap<ChainHandle, HostChain>,
    next_chain: u64,
    /// Window base -> backing page of every window page.
    windows: BTreeMap<u64, Vec<u64>>,
    next_window: u64,
    temporary_mappings: usize,
}

impl HostState {
    fn resident(&self, chain: &PageChain) -> bool {
        chain.runs().iter().all(PageRun::is_page_aligned)
            && chain.pages().all(|va| self.pages.contains_key(&va))
    }

    fn create_window(&mut self, chain: &PageChain) -> u64 {
        let base = self.next_window;
        let pages: Vec<u64> = chain.pages().collect();
        // One unmapped guard page between windows.
        self.next_window += (pages.len() as u64 + 1) * PAGE_SIZE;
        self.windows.insert(base, pages);
        base
    }

    /// Resolves `va` to (backing page, offset in page).
    fn translate(&self, va: u64) -> MemoryResult<(u64, usize)> {
        let offset = (va % PAGE_SIZE) as usize;
        let page = if va >= WINDOW_BASE {
            let (base, pages) = self
                .windows
                .range(..=va)
                .next_back()
                .ok_or(MemoryError::Unbacked { va })?;
            let index = ((va - base) / PAGE_SIZE) as usize;
            *pages.get(index).ok_or(MemoryError::Unbacked { va })?
        } else {
            va - va % PAGE_SIZE
        };

        if !self.pages.contains_key(&page) {
            return Err(MemoryError::Unbacked { va });
        }
        Ok((page, offset))
    }

    /// Splits `[va, va + len)` into per-page pieces: (backing page, offset in page, piece len).
    fn pieces(&self, va: u64, len: usize) -> MemoryResult<Vec<(u64, usize, usize)>> {
        let mut out = Vec::new();
        let mut done = 0usize;
        while done < len {
            let cur = va
                .checked_add(done as u64)
                .ok_or(MemoryError::Unbacked { va })?;
            let (page, offset) = self.translate(cur)?;
            let chunk = (PAGE_SIZE as usize - offset).min(len - done);
            out.push((page, offset, chunk));
            done += chunk;
        }
        Ok(out)
    }
}

/// In-process system memory: pages are heap allocations addressed by fake virtual addresses.
///
/// Mappings are emulated with address windows that alias the chain's pages, so data written
/// through a mapping is visible through the original page addresses and vice versa.
#[derive(Debug)]
pub struct HostSystemMemory {
    state: Mutex<HostState>,
}

impl Default for HostSystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSystemMemory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                next_page: PAGE_POOL_BASE,
                next_chain: 1,
                next_window: WINDOW_BASE,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocates `count` zeroed, virtually contiguous pages and returns the first address.
    pub fn allocate_pages(&self, count: usize) -> u64 {
        let mut state = self.lock();
        let base = state.next_page;
        for i in 0..count as u64 {
            state
                .pages
                .insert(base + i * PAGE_SIZE, vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        }
        // Leave a hole after every allocation so neighbouring runs are not accidentally contiguous.
        state.next_page = base + (count as u64 + 1) * PAGE_SIZE;
        base
    }

    /// Releases pages previously returned by [`HostSystemMemory::allocate_pages`].
    pub fn free_pages(&self, base_va: u64, count: usize) {
        let mut state = self.lock();
        for i in 0..count as u64 {
            state.pages.remove(&(base_va + i * PAGE_SIZE));
        }
    }

    pub fn create_chain(&self, runs: Vec<PageRun>) -> ChainHandle {
        let mut state = self.lock();
        let handle = ChainHandle(state.next_chain);
        state.next_chain += 1;
        state.chains.insert(
            handle,
            HostChain {
                chain: PageChain::new(runs),
                permanent: None,
            },
        );
        handle
    }

    /// Gives the chain a long-lived system mapping; later `map_locked_pages` calls reuse it.
    pub fn map_permanently(&self, handle: ChainHandle) -> Option<u64> {
        let mut state = self.lock();
        let chain = state.chains.get(&handle)?.chain.clone();
        if let Some(base) = state.chains.get(&handle)?.permanent {
            return Some(base);
        }
        if !state.resident(&chain) {
            return None;
        }
        let base = state.create_window(&chain);
        state.chains.get_mut(&handle)?.permanent = Some(base);
        Some(base)
    }

    pub fn release_chain(&self, handle: ChainHandle) {
        let mut state = self.lock();
        if let Some(HostChain {
            permanent: Some(base),
            ..
        }) = state.chains.remove(&handle)
        {
            state.windows.remove(&base);
        }
    }

    /// Number of temporary mappings that have not been undone yet.
    pub fn active_temporary_mappings(&self) -> usize {
        self.lock().temporary_mappings
    }
}

impl SystemMemory for HostSystemMemory {
    fn chain(&self, handle: ChainHandle) -> Option<PageChain> {
        self.lock().chains.get(&handle).map(|c| c.chain.clone())
    }

    fn map_locked_pages(&self, handle: ChainHandle) -> Option<SystemMapping> {
        let mut state = self.lock();
        let entry = state.chains.get(&handle)?;
        let chain = entry.chain.clone();
        let len = chain.byte_count();

        if let Some(base) = entry.permanent {
            return Some(SystemMapping {
                chain: handle,
                base,
                len,
                already_mapped: true,
            });
        }

        if !state.resident(&chain) {
            return None;
        }

        let base = state.create_window(&chain);
        state.temporary_mappings += 1;
        Some(SystemMapping {
            chain: handle,
            base,
            len,
            already_mapped: false,
        })
    }

    fn unmap_locked_pages(&self, mapping: &SystemMapping) {
        if mapping.already_mapped {
            return;
        }
        let mut state = self.lock();
        if state.windows.remove(&mapping.base).is_some() {
            state.temporary_mappings -= 1;
        }
    }

    fn read(&self, va: u64, dst: &mut [u8]) -> MemoryResult<()> {
        let state = self.lock();
        let mut done = 0usize;
        for (page, offset, chunk) in state.pieces(va, dst.len())? {
            let src = &state.pages[&page][offset..offset + chunk];
            dst[done..done + chunk].copy_from_slice(src);
            done += chunk;
        }
        Ok(())
    }

    fn write(&self, va: u64, src: &[u8]) -> MemoryResult<()> {
        let mut state = self.lock();
        let pieces = state.pieces(va, src.len())?;
        let mut done = 0usize;
        for (page, offset, chunk) in pieces {
            let Some(dst) = state.pages.get_mut(&page) else {
                return Err(MemoryError::Unbacked { va: page });
            };
            dst[offset..offset + chunk].copy_from_slice(&src[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }
}
