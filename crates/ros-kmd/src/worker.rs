use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use ros_memory::{LocalMemory, SystemMemory};
use tracing::{debug, debug_span, trace};

use crate::adapter::AdapterShared;
use crate::aperture::ApertureTable;
use crate::buffer::BufferKind;
use crate::error::ErrorAccumulator;
use crate::notify::CompletionNotifier;
use crate::paging::PagingExecutor;
use crate::queue::DequeuedSubmission;
use crate::render::{RenderExecutor, RenderSubmission};

/// Everything an executor may touch while running one submission.
pub(crate) struct ExecutionContext<'a> {
    pub local: &'a LocalMemory,
    pub system: &'a dyn SystemMemory,
    pub aperture: &'a Mutex<ApertureTable>,
    pub errors: &'a ErrorAccumulator,
}

impl ExecutionContext<'_> {
    pub(crate) fn aperture(&self) -> MutexGuard<'_, ApertureTable> {
        match self.aperture.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The single consumer of an adapter's submission queue.
pub(crate) struct Worker {
    pub(crate) shared: Arc<AdapterShared>,
    pub(crate) local: Arc<LocalMemory>,
    pub(crate) system: Arc<dyn SystemMemory>,
    pub(crate) notifier: CompletionNotifier,
    pub(crate) render: Box<dyn RenderExecutor>,
}

impl Worker {
    pub(crate) fn run(mut self) {
        let span = debug_span!("ros_kmd_worker");
        let _guard = span.enter();
        debug!("worker started");

        loop {
            self.shared.wake.wait();
            // Everything queued before the exit request is still processed.
            self.drain();
            if self.shared.exit.load(Ordering::Acquire) {
                break;
            }
        }

        debug!("worker exiting");
    }

    fn drain(&mut self) {
        while let Some(item) = self.shared.queue.dequeue() {
            self.process(item);
        }
    }

    fn process(&mut self, item: DequeuedSubmission) {
        let DequeuedSubmission { slot, descriptor } = item;
        let kind = descriptor.buffer.kind();
        trace!(
            slot = slot.index(),
            fence_id = descriptor.fence_id,
            ?kind,
            "processing submission"
        );

        let commands = descriptor.buffer.read_range(descriptor.range.clone());
        let ctx = ExecutionContext {
            local: &self.local,
            system: self.system.as_ref(),
            aperture: &self.shared.aperture,
            errors: &self.shared.errors,
        };

        match kind {
            BufferKind::Paging => PagingExecutor::new(&ctx).execute(&commands),
            BufferKind::SoftwareCommands | BufferKind::HardwareCommands => {
                self.render.execute(
                    &ctx,
                    &RenderSubmission {
                        kind,
                        commands: &commands,
                        fence_id: descriptor.fence_id,
                        dma_buffer_physical_address: descriptor.dma_buffer_physical_address,
                    },
                );
            }
        }

        self.notifier.notify(
            &descriptor,
            &self.shared.errors,
            &self.shared.last_notified_fence,
        );
        self.shared.queue.release(slot);
    }
}
