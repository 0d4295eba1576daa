//! DMA buffers and their per-buffer driver record.
//!
//! A [`DmaBuffer`] is owned by the external scheduler (shared through an `Arc`) and persists
//! across submissions. The record's state bits are atomics so the worker can mark a buffer
//! completed while the caller inspects it from another context.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use bitflags::bitflags;

use crate::error::{KmdError, Result};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferState: u32 {
        /// Paging operation records, not render commands.
        const PAGING = 1 << 0;
        /// Interpreted by the driver instead of being handed to hardware.
        const SOFTWARE_COMMAND_BUFFER = 1 << 1;
        const SUBMITTED_ONCE = 1 << 2;
        const PATCHED = 1 << 3;
        /// Set by the worker once a render submission finished executing.
        const COMPLETED = 1 << 4;
    }
}

/// What a buffer holds; fixes which executor the worker dispatches it to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Paging,
    SoftwareCommands,
    HardwareCommands,
}

impl BufferKind {
    const fn state(self) -> BufferState {
        match self {
            Self::Paging => BufferState::PAGING,
            Self::SoftwareCommands => BufferState::SOFTWARE_COMMAND_BUFFER,
            Self::HardwareCommands => BufferState::empty(),
        }
    }
}

#[derive(Debug)]
pub struct BufferRecord {
    state: AtomicU32,
}

impl BufferRecord {
    fn new(kind: BufferKind) -> Self {
        Self {
            state: AtomicU32::new(kind.state().bits()),
        }
    }

    pub fn state(&self) -> BufferState {
        BufferState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub fn kind(&self) -> BufferKind {
        let state = self.state();
        if state.contains(BufferState::PAGING) {
            BufferKind::Paging
        } else if state.contains(BufferState::SOFTWARE_COMMAND_BUFFER) {
            BufferKind::SoftwareCommands
        } else {
            BufferKind::HardwareCommands
        }
    }

    /// Drops every bit and starts over as a freshly built paging buffer.
    pub(crate) fn reset_for_paging(&self) {
        self.state.store(BufferState::PAGING.bits(), Ordering::Release);
    }

    /// A new submission: `completed` describes the latest submission only.
    pub(crate) fn mark_submitted(&self) {
        // The closure never rejects, so the update cannot fail.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let next = (BufferState::from_bits_retain(cur) | BufferState::SUBMITTED_ONCE)
                    .difference(BufferState::COMPLETED);
                Some(next.bits())
            });
    }

    pub(crate) fn mark_patched(&self) {
        self.state.fetch_or(BufferState::PATCHED.bits(), Ordering::AcqRel);
    }

    pub(crate) fn mark_completed(&self) {
        let state = self.state();
        assert!(
            state.contains(BufferState::SUBMITTED_ONCE),
            "buffer completed before it was ever submitted"
        );
        assert!(
            !state.contains(BufferState::PAGING),
            "paging buffers complete without the completed bit"
        );
        self.state.fetch_or(BufferState::COMPLETED.bits(), Ordering::AcqRel);
    }
}

/// A command buffer together with its driver record.
#[derive(Debug)]
pub struct DmaBuffer {
    bytes: Mutex<Vec<u8>>,
    size: usize,
    record: BufferRecord,
}

impl DmaBuffer {
    pub fn new(kind: BufferKind, size: usize) -> Self {
        Self::with_contents(kind, vec![0u8; size])
    }

    /// Wraps an already encoded command stream (for example a `GpuCommandWriter` output).
    pub fn with_contents(kind: BufferKind, bytes: Vec<u8>) -> Self {
        Self {
            size: bytes.len(),
            bytes: Mutex::new(bytes),
            record: BufferRecord::new(kind),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn record(&self) -> &BufferRecord {
        &self.record
    }

    pub fn kind(&self) -> BufferKind {
        self.record.kind()
    }

    pub fn state(&self) -> BufferState {
        self.record.state()
    }

    pub fn is_completed(&self) -> bool {
        self.state().contains(BufferState::COMPLETED)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.bytes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end {
            return Err(KmdError::OffsetOutOfRange {
                offset: range.start,
                size: self.size,
            });
        }
        if range.end > self.size {
            return Err(KmdError::OffsetOutOfRange {
                offset: range.end,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Copies `range` out so execution does not hold the buffer lock.
    pub(crate) fn read_range(&self, range: Range<usize>) -> Vec<u8> {
        self.lock()[range].to_vec()
    }

    pub(crate) fn write_at(&self, offset: usize, src: &[u8]) {
        self.lock()[offset..offset + src.len()].copy_from_slice(src);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }
}
