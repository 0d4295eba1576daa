use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use crate::error::{MemoryError, MemoryResult};

/// Device-local video memory.
///
/// Addresses are byte offsets from the start of the region (the video-memory segment starts at
/// GPU address 0). The owner keeps an `Arc` to inspect contents while the adapter's worker
/// executes paging and render commands against it.
#[derive(Debug)]
pub struct LocalMemory {
    data: Mutex<Vec<u8>>,
    size: u64,
    physical_base: u64,
}

fn check_range(size: u64, addr: u64, len: usize) -> MemoryResult<Range<usize>> {
    let out_of_range = MemoryError::OutOfRange { addr, len, size };
    let end = addr.checked_add(len as u64).ok_or(out_of_range.clone())?;
    if end > size {
        return Err(out_of_range);
    }
    // `end <= size` and `size` came from a `usize` length.
    Ok(addr as usize..end as usize)
}

impl LocalMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self::with_physical_base(size_bytes, 0)
    }

    /// `physical_base` is the CPU physical address the region is reported at; it does not
    /// affect GPU addressing.
    pub fn with_physical_base(size_bytes: usize, physical_base: u64) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size_bytes]),
            size: size_bytes as u64,
            physical_base,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn physical_base(&self) -> u64 {
        self.physical_base
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn read(&self, addr: u64, dst: &mut [u8]) -> MemoryResult<()> {
        let range = check_range(self.size, addr, dst.len())?;
        dst.copy_from_slice(&self.lock()[range]);
        Ok(())
    }

    pub fn write(&self, addr: u64, src: &[u8]) -> MemoryResult<()> {
        let range = check_range(self.size, addr, src.len())?;
        self.lock()[range].copy_from_slice(src);
        Ok(())
    }

    /// Repeats the little-endian bytes of `pattern` over `size_bytes` starting at `addr`.
    ///
    /// A trailing partial word receives the low bytes of the pattern.
    pub fn fill_pattern(&self, addr: u64, size_bytes: usize, pattern: u32) -> MemoryResult<()> {
        let range = check_range(self.size, addr, size_bytes)?;
        let word = pattern.to_le_bytes();
        let mut mem = self.lock();
        for (dst, src) in mem[range].iter_mut().zip(word.iter().cycle()) {
            *dst = *src;
        }
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst`; overlapping ranges behave like `memmove`.
    pub fn copy_within(&self, dst: u64, src: u64, len: usize) -> MemoryResult<()> {
        let src_range = check_range(self.size, src, len)?;
        let dst_range = check_range(self.size, dst, len)?;
        self.lock().copy_within(src_range, dst_range.start);
        Ok(())
    }

    pub fn to_vec(&self, addr: u64, len: usize) -> MemoryResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read(addr, &mut out)?;
        Ok(out)
    }
}
