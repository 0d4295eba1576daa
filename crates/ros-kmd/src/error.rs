use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KmdError>;

/// Failures reported synchronously to the caller of an adapter entry point.
#[derive(Debug, Error)]
pub enum KmdError {
    #[error("adapter has not been started")]
    NotStarted,

    #[error("adapter is already started")]
    AlreadyStarted,

    #[error("hardware execution mode needs a GPU device at start")]
    HardwareMissing,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("insufficient DMA buffer space: need {required} bytes, {available} available")]
    InsufficientDmaBuffer { required: usize, available: usize },

    #[error("offset {offset} is outside the {size}-byte DMA buffer")]
    OffsetOutOfRange { offset: usize, size: usize },

    #[error("patched address {physical_address:#x} + {allocation_offset:#x} overflows")]
    PatchAddressOverflow {
        physical_address: u64,
        allocation_offset: u32,
    },
}

/// Failure of the scheduler's synchronized-execution primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("synchronized execution failed: {0}")]
    SynchronizeExecution(String),
}

bitflags! {
    /// Sticky categories of failure hit by the worker. Diagnostic only.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ErrorFlags: u32 {
        const PREPARATION_ERROR = 1 << 0;
        const PAGING_FAILURE = 1 << 1;
        const NOTIFY_DMA_BUF_COMPLETION = 1 << 2;
        const UNSUPPORTED_PAGING_OP = 1 << 3;
        const RENDER_FAILURE = 1 << 4;
    }
}

/// Adapter-wide error accumulator. Bits are only ever added.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    bits: AtomicU32,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, flags: ErrorFlags) {
        self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn get(&self) -> ErrorFlags {
        ErrorFlags::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    pub fn contains(&self, flags: ErrorFlags) -> bool {
        self.get().contains(flags)
    }
}
