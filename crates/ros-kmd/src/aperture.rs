//! Aperture segment page table.
//!
//! The aperture is a fixed window of `len()` pages. Each slot either is empty or names the
//! system page (by virtual address) currently mapped there. Pages are owned by the external
//! system-memory collaborator; the table only records where they are.

use ros_memory::{PageChain, PageRun, PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApertureTable {
    pages: Vec<Option<u64>>,
}

impl ApertureTable {
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: vec![None; page_count],
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn entry(&self, page_index: usize) -> Option<u64> {
        self.pages.get(page_index).copied().flatten()
    }

    pub fn entries(&self) -> &[Option<u64>] {
        &self.pages
    }

    /// Asserts that `[page_index, page_index + page_count)` lies inside the table.
    pub fn check_bounds(&self, page_index: usize, page_count: usize) {
        let in_bounds = page_index
            .checked_add(page_count)
            .is_some_and(|end| end <= self.pages.len());
        assert!(
            in_bounds,
            "aperture range {page_index}+{page_count} exceeds {} pages",
            self.pages.len()
        );
    }

    /// Points `page_count` slots starting at `page_index` at consecutive pages of `chain`,
    /// after skipping the first `chain_page_offset` pages of the chain.
    ///
    /// # Panics
    ///
    /// Panics if the slot range leaves the table, a chain run is not page aligned, or the chain
    /// runs out of pages before `page_count` slots are filled.
    pub fn map_segment(
        &mut self,
        page_index: usize,
        page_count: usize,
        chain: &PageChain,
        chain_page_offset: usize,
    ) {
        self.check_bounds(page_index, page_count);
        assert!(
            chain.runs().iter().all(PageRun::is_page_aligned),
            "aperture chain runs must be page aligned"
        );

        let mut pages = chain.pages().skip(chain_page_offset);
        for slot in &mut self.pages[page_index..page_index + page_count] {
            let Some(page) = pages.next() else {
                panic!(
                    "page chain ran out before {page_count} aperture pages were mapped at {page_index}"
                );
            };
            *slot = Some(page);
        }
    }

    pub fn unmap_segment(&mut self, page_index: usize, page_count: usize) {
        self.check_bounds(page_index, page_count);
        self.pages[page_index..page_index + page_count].fill(None);
    }

    /// Splits the aperture byte range `[address, address + len)` into per-page pieces
    /// `(system va, piece len)`. Returns `None` if the range leaves the table or touches an
    /// empty slot.
    pub fn resolve(&self, address: u64, len: usize) -> Option<Vec<(u64, usize)>> {
        let mut pieces = Vec::new();
        let mut done = 0usize;
        while done < len {
            let cur = address.checked_add(done as u64)?;
            let index = usize::try_from(cur / PAGE_SIZE).ok()?;
            let offset = cur % PAGE_SIZE;
            let page = self.pages.get(index).copied().flatten()?;
            let chunk = (PAGE_SIZE - offset).min((len - done) as u64) as usize;
            pieces.push((page + offset, chunk));
            done += chunk;
        }
        Some(pieces)
    }
}
