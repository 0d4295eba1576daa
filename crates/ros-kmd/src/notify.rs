use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::buffer::BufferKind;
use crate::error::{ErrorAccumulator, ErrorFlags, SchedulerError};
use crate::queue::SubmissionDescriptor;

/// Interrupt payload handed to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptData {
    DmaCompleted {
        submission_fence_id: u64,
        node_ordinal: u32,
        engine_ordinal: u32,
    },
}

/// Callbacks the core needs from the external GPU scheduler.
pub trait SchedulerInterface: Send + Sync {
    /// Runs `callback` serialized against the device interrupt and returns its result.
    fn synchronize_execution(
        &self,
        callback: &mut dyn FnMut() -> bool,
    ) -> Result<bool, SchedulerError>;

    /// Reports an interrupt condition (fence progress). Only valid inside
    /// [`SchedulerInterface::synchronize_execution`].
    fn notify_interrupt(&self, data: &InterruptData);

    /// Asks the scheduler to run its deferred processing and re-check device progress.
    fn queue_dpc(&self) -> bool;

    /// Called from the adapter's DPC routine.
    fn notify_dpc(&self);
}

/// Raises the fence of every finished submission.
pub(crate) struct CompletionNotifier {
    scheduler: Arc<dyn SchedulerInterface>,
    node_ordinal: u32,
    engine_ordinal: u32,
}

impl CompletionNotifier {
    pub(crate) fn new(
        scheduler: Arc<dyn SchedulerInterface>,
        node_ordinal: u32,
        engine_ordinal: u32,
    ) -> Self {
        Self {
            scheduler,
            node_ordinal,
            engine_ordinal,
        }
    }

    pub(crate) fn notify(
        &self,
        descriptor: &SubmissionDescriptor,
        errors: &ErrorAccumulator,
        last_fence: &AtomicU64,
    ) {
        if descriptor.buffer.kind() != BufferKind::Paging {
            descriptor.buffer.record().mark_completed();
        }

        let data = InterruptData::DmaCompleted {
            submission_fence_id: descriptor.fence_id,
            node_ordinal: self.node_ordinal,
            engine_ordinal: self.engine_ordinal,
        };
        let scheduler = &self.scheduler;
        let mut raise = || {
            scheduler.notify_interrupt(&data);
            scheduler.queue_dpc()
        };

        match self.scheduler.synchronize_execution(&mut raise) {
            Ok(_) => trace!(fence_id = descriptor.fence_id, "dma buffer completion notified"),
            Err(err) => {
                warn!(fence_id = descriptor.fence_id, %err, "dma buffer completion notification failed");
                errors.record(ErrorFlags::NOTIFY_DMA_BUF_COMPLETION);
            }
        }
        // Advanced from the driver's side even if delivery failed.
        last_fence.store(descriptor.fence_id, Ordering::Release);
    }
}
