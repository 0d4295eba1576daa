use ros_protocol::PAGE_SIZE;

/// One link of a page-description chain: a contiguous run of system pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRun {
    pub base_va: u64,
    pub byte_count: u64,
}

impl PageRun {
    pub const fn new(base_va: u64, byte_count: u64) -> Self {
        Self {
            base_va,
            byte_count,
        }
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.base_va % PAGE_SIZE == 0 && self.byte_count % PAGE_SIZE == 0
    }

    pub const fn page_count(&self) -> u64 {
        self.byte_count / PAGE_SIZE
    }
}

/// Ordered runs describing the system pages behind one buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageChain {
    runs: Vec<PageRun>,
}

impl PageChain {
    pub fn new(runs: Vec<PageRun>) -> Self {
        Self { runs }
    }

    pub fn runs(&self) -> &[PageRun] {
        &self.runs
    }

    pub fn byte_count(&self) -> u64 {
        self.runs.iter().map(|r| r.byte_count).sum()
    }

    pub fn page_count(&self) -> u64 {
        self.runs.iter().map(PageRun::page_count).sum()
    }

    /// Virtual address of every page in chain order.
    pub fn pages(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs
            .iter()
            .flat_map(|run| (0..run.page_count()).map(move |i| run.base_va + i * PAGE_SIZE))
    }
}
