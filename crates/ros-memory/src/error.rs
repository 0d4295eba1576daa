use thiserror::Error;

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: u64 },

    #[error("no page backs system address 0x{va:x}")]
    Unbacked { va: u64 },
}
