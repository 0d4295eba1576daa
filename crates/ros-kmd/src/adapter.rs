//! Adapter lifecycle and the entry points called by the GPU scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use ros_memory::{LocalMemory, SystemMemory};
use ros_protocol::{PagingOperation, SEGMENT_ID_APERTURE};
use tracing::{debug, warn};

use crate::aperture::ApertureTable;
use crate::buffer::DmaBuffer;
use crate::config::{AdapterConfig, ExecutionMode, GPU_ENGINE_COUNT, SUBMISSION_POOL_CAPACITY};
use crate::error::{ErrorAccumulator, ErrorFlags, KmdError, Result};
use crate::event::SyncEvent;
use crate::notify::{CompletionNotifier, SchedulerInterface};
use crate::paging::{append_record, PagingRequest};
use crate::patch::{apply_patches, PatchArgs};
use crate::queue::{SubmissionDescriptor, SubmissionQueue};
use crate::render::{GpuHardware, HardwareRenderExecutor, RenderExecutor, SoftwareRenderExecutor};
use crate::worker::Worker;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SchedulingCaps: u32 {
        const MULTI_ENGINE_AWARE = 1 << 0;
        const CANCEL_COMMAND_AWARE = 1 << 1;
        const PREEMPTION_AWARE = 1 << 2;
    }
}

/// What [`Adapter::start`] reports back to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartInfo {
    pub node_count: u32,
    pub engines_per_node: u32,
    pub video_present_sources: u32,
    pub children: u32,
    pub scheduling_caps: SchedulingCaps,
}

/// Collaborators handed to the adapter when it starts.
pub struct StartResources {
    pub scheduler: Arc<dyn SchedulerInterface>,
    pub local_memory: Arc<LocalMemory>,
    pub system_memory: Arc<dyn SystemMemory>,
    /// Required by [`ExecutionMode::Hardware`], ignored otherwise.
    pub hardware: Option<Box<dyn GpuHardware>>,
}

#[derive(Clone, Debug)]
pub struct SubmitCommandArgs {
    pub buffer: Arc<DmaBuffer>,
    pub start_offset: usize,
    pub end_offset: usize,
    pub fence_id: u64,
    pub dma_buffer_physical_address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub responsive: bool,
}

/// State shared between the adapter's entry points and its worker thread.
pub(crate) struct AdapterShared {
    pub(crate) config: AdapterConfig,
    pub(crate) queue: SubmissionQueue,
    pub(crate) wake: SyncEvent,
    pub(crate) hw_completion: Arc<SyncEvent>,
    pub(crate) exit: AtomicBool,
    pub(crate) interrupts_enabled: AtomicBool,
    pub(crate) errors: ErrorAccumulator,
    pub(crate) aperture: Mutex<ApertureTable>,
    pub(crate) last_notified_fence: AtomicU64,
}

impl AdapterShared {
    fn aperture(&self) -> MutexGuard<'_, ApertureTable> {
        match self.aperture.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Raises the adapter's device interrupt. Cloned into [`GpuHardware`] implementations so they
/// can report completion.
#[derive(Clone)]
pub struct InterruptLine {
    shared: Arc<AdapterShared>,
}

impl InterruptLine {
    /// Interrupt service routine. Returns `false` if the adapter does not own the interrupt.
    pub fn raise(&self, message_number: u32) -> bool {
        if !self.shared.interrupts_enabled.load(Ordering::Acquire) {
            return false;
        }
        debug!(message_number, "dma buffer completion interrupt");
        self.shared.hw_completion.set();
        true
    }
}

impl std::fmt::Debug for InterruptLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptLine")
            .field(
                "enabled",
                &self.shared.interrupts_enabled.load(Ordering::Relaxed),
            )
            .finish()
    }
}

struct Running {
    worker: JoinHandle<()>,
    scheduler: Arc<dyn SchedulerInterface>,
}

pub struct Adapter {
    shared: Arc<AdapterShared>,
    running: Option<Running>,
}

impl Adapter {
    pub fn add(config: AdapterConfig) -> Self {
        debug!(?config, "add adapter");
        let aperture = ApertureTable::new(config.aperture_page_count);
        Self {
            shared: Arc::new(AdapterShared {
                config,
                queue: SubmissionQueue::new(SUBMISSION_POOL_CAPACITY),
                wake: SyncEvent::new(),
                hw_completion: Arc::new(SyncEvent::new()),
                exit: AtomicBool::new(false),
                interrupts_enabled: AtomicBool::new(false),
                errors: ErrorAccumulator::new(),
                aperture: Mutex::new(aperture),
                last_notified_fence: AtomicU64::new(0),
            }),
            running: None,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.shared.config
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// Spawns the worker thread and enables interrupt handling in hardware mode.
    pub fn start(&mut self, resources: StartResources) -> Result<StartInfo> {
        debug!(execution = ?self.shared.config.execution, "start adapter");
        if self.running.is_some() {
            return Err(KmdError::AlreadyStarted);
        }

        let render: Box<dyn RenderExecutor> = match self.shared.config.execution {
            ExecutionMode::Software => Box::new(SoftwareRenderExecutor),
            ExecutionMode::Hardware => {
                let hardware = resources.hardware.ok_or(KmdError::HardwareMissing)?;
                Box::new(HardwareRenderExecutor::new(
                    hardware,
                    Arc::clone(&self.shared.hw_completion),
                ))
            }
        };

        self.shared.exit.store(false, Ordering::Release);
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            local: resources.local_memory,
            system: resources.system_memory,
            notifier: CompletionNotifier::new(
                Arc::clone(&resources.scheduler),
                self.shared.config.node_ordinal,
                self.shared.config.engine_ordinal,
            ),
            render,
        };
        let handle = thread::Builder::new()
            .name(self.shared.config.worker_thread_name.clone())
            .spawn(move || worker.run())?;

        self.running = Some(Running {
            worker: handle,
            scheduler: resources.scheduler,
        });
        if self.shared.config.execution == ExecutionMode::Hardware {
            self.shared.interrupts_enabled.store(true, Ordering::Release);
        }

        Ok(StartInfo {
            node_count: GPU_ENGINE_COUNT,
            engines_per_node: 1,
            video_present_sources: 0,
            children: 0,
            scheduling_caps: SchedulingCaps::MULTI_ENGINE_AWARE
                | SchedulingCaps::CANCEL_COMMAND_AWARE
                | SchedulingCaps::PREEMPTION_AWARE,
        })
    }

    fn shutdown(&mut self) -> Option<thread::Result<()>> {
        let running = self.running.take()?;
        self.shared.exit.store(true, Ordering::Release);
        self.shared.wake.set();
        // The worker may still be waiting on a hardware completion interrupt.
        let joined = running.worker.join();
        self.shared.interrupts_enabled.store(false, Ordering::Release);
        Some(joined)
    }

    /// Asks the worker to exit and joins it. Work queued before the call is executed first.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the worker thread (a broken submission contract).
    pub fn stop(&mut self) -> Result<()> {
        debug!("stop adapter");
        match self.shutdown() {
            None => Err(KmdError::NotStarted),
            Some(Ok(())) => Ok(()),
            Some(Err(panic)) => std::panic::resume_unwind(panic),
        }
    }

    /// Queues `args.buffer[start_offset..end_offset]` for execution and wakes the worker.
    ///
    /// # Panics
    ///
    /// Panics if all [`SUBMISSION_POOL_CAPACITY`] descriptors are in use.
    pub fn submit_command(&self, args: SubmitCommandArgs) -> Result<()> {
        debug!(
            fence_id = args.fence_id,
            start = args.start_offset,
            end = args.end_offset,
            "submit_command"
        );
        if self.running.is_none() {
            return Err(KmdError::NotStarted);
        }
        let range = args.start_offset..args.end_offset;
        args.buffer.check_range(&range)?;

        if args.dma_buffer_physical_address == 0 && range.start == 0 && range.end == 0 {
            warn!(fence_id = args.fence_id, "submission was never prepared");
            self.shared.errors.record(ErrorFlags::PREPARATION_ERROR);
        }

        args.buffer.record().mark_submitted();
        self.shared.queue.enqueue(SubmissionDescriptor {
            buffer: args.buffer,
            range,
            fence_id: args.fence_id,
            dma_buffer_physical_address: args.dma_buffer_physical_address,
        });
        self.shared.wake.set();
        Ok(())
    }

    /// Fixes up allocation addresses inside `buffer` before it is submitted.
    pub fn patch(&self, buffer: &DmaBuffer, args: &PatchArgs<'_>) -> Result<()> {
        debug!(locations = args.submission_range.len(), "patch");
        apply_patches(buffer, args).map(|_| ())
    }

    /// Appends the record for `request` at `offset` of `buffer` and returns the offset just
    /// past the bytes written.
    ///
    /// Writing at offset 0 starts a new paging buffer and resets its record. Requests the core
    /// does not implement are flagged and write nothing.
    ///
    /// # Panics
    ///
    /// Panics if an aperture map or unmap names pages outside the aperture segment.
    pub fn build_paging_buffer(
        &self,
        buffer: &DmaBuffer,
        offset: usize,
        request: &PagingRequest,
    ) -> Result<usize> {
        debug!(offset, ?request, "build_paging_buffer");
        if offset > buffer.size() {
            return Err(KmdError::OffsetOutOfRange {
                offset,
                size: buffer.size(),
            });
        }

        let next = match request {
            PagingRequest::Unsupported(kind) => {
                warn!(?kind, "unsupported paging operation");
                self.shared.errors.record(ErrorFlags::UNSUPPORTED_PAGING_OP);
                offset
            }
            PagingRequest::Operation(op) => {
                match *op {
                    PagingOperation::MapApertureSegment {
                        segment_id: SEGMENT_ID_APERTURE,
                        first_page,
                        page_count,
                        ..
                    }
                    | PagingOperation::UnmapApertureSegment {
                        segment_id: SEGMENT_ID_APERTURE,
                        first_page,
                        page_count,
                    } => self
                        .shared
                        .aperture()
                        .check_bounds(first_page as usize, page_count as usize),
                    _ => {}
                }
                append_record(buffer, offset, op)?
            }
        };

        if offset == 0 {
            buffer.record().reset_for_paging();
        }
        Ok(next)
    }

    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn interrupt_routine(&self, message_number: u32) -> bool {
        self.interrupt_line().raise(message_number)
    }

    pub fn dpc_routine(&self) -> Result<()> {
        let running = self.running.as_ref().ok_or(KmdError::NotStarted)?;
        running.scheduler.notify_dpc();
        Ok(())
    }

    /// Fence id of the most recent completion notification, or 0.
    pub fn query_current_fence(&self) -> u64 {
        self.shared.last_notified_fence.load(Ordering::Acquire)
    }

    pub fn query_engine_status(&self, node_ordinal: u32, engine_ordinal: u32) -> EngineStatus {
        debug!(node_ordinal, engine_ordinal, "query_engine_status");
        EngineStatus { responsive: true }
    }

    /// Accepted without action: the worker never leaves a submission half executed.
    pub fn reset_from_timeout(&self) -> Result<()> {
        debug!("reset_from_timeout");
        Ok(())
    }

    pub fn cancel_command(&self, fence_id: u64) -> Result<()> {
        debug!(fence_id, "cancel_command");
        Ok(())
    }

    pub fn errors(&self) -> ErrorFlags {
        self.shared.errors.get()
    }

    pub fn aperture_entries(&self) -> Vec<Option<u64>> {
        self.shared.aperture().entries().to_vec()
    }

    pub fn free_submission_slots(&self) -> usize {
        self.shared.queue.free_count()
    }

    pub fn pending_submissions(&self) -> usize {
        self.shared.queue.pending_count()
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        // A worker panic was already reported on its own thread.
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use ros_protocol::{PagingOperationKind, SegmentAddress, PAGING_RECORD_SIZE};

    use super::*;
    use crate::buffer::{BufferKind, BufferState};

    #[test]
    fn submit_before_start_is_rejected() {
        let adapter = Adapter::add(AdapterConfig::default());
        let err = adapter
            .submit_command(SubmitCommandArgs {
                buffer: Arc::new(DmaBuffer::new(BufferKind::SoftwareCommands, 32)),
                start_offset: 0,
                end_offset: 32,
                fence_id: 1,
                dma_buffer_physical_address: 0x1000,
            })
            .unwrap_err();
        assert!(matches!(err, KmdError::NotStarted));
    }

    #[test]
    fn build_resets_record_only_at_offset_zero() {
        let adapter = Adapter::add(AdapterConfig::default());
        let buffer = DmaBuffer::new(BufferKind::SoftwareCommands, 4 * PAGING_RECORD_SIZE);
        let fill = PagingRequest::Operation(PagingOperation::Fill {
            size_bytes: 4,
            pattern: 1,
            destination: SegmentAddress::video_memory(0),
        });

        let next = adapter.build_paging_buffer(&buffer, 0, &fill).unwrap();
        assert_eq!(next, PAGING_RECORD_SIZE);
        assert_eq!(buffer.state(), BufferState::PAGING);

        buffer.record().mark_patched();
        let next = adapter.build_paging_buffer(&buffer, next, &fill).unwrap();
        assert_eq!(next, 2 * PAGING_RECORD_SIZE);
        assert!(buffer.state().contains(BufferState::PATCHED));
    }

    #[test]
    fn unsupported_request_is_flagged_and_writes_nothing() {
        let adapter = Adapter::add(AdapterConfig::default());
        let buffer = DmaBuffer::new(BufferKind::Paging, PAGING_RECORD_SIZE);
        let next = adapter
            .build_paging_buffer(
                &buffer,
                0,
                &PagingRequest::Unsupported(PagingOperationKind::ReadPhysical),
            )
            .unwrap();
        assert_eq!(next, 0);
        assert_eq!(buffer.to_vec(), vec![0; PAGING_RECORD_SIZE]);
        assert!(adapter.errors().contains(ErrorFlags::UNSUPPORTED_PAGING_OP));
    }

    #[test]
    #[should_panic(expected = "exceeds 8 pages")]
    fn aperture_range_is_checked_at_build_time() {
        let adapter = Adapter::add(AdapterConfig {
            aperture_page_count: 8,
            ..Default::default()
        });
        let buffer = DmaBuffer::new(BufferKind::Paging, PAGING_RECORD_SIZE);
        let _ = adapter.build_paging_buffer(
            &buffer,
            0,
            &PagingRequest::Operation(PagingOperation::UnmapApertureSegment {
                segment_id: SEGMENT_ID_APERTURE,
                first_page: 6,
                page_count: 4,
            }),
        );
    }

    #[test]
    fn hardware_mode_requires_a_device() {
        let mut adapter = Adapter::add(AdapterConfig {
            execution: ExecutionMode::Hardware,
            ..Default::default()
        });
        struct Idle;
        impl SchedulerInterface for Idle {
            fn synchronize_execution(
                &self,
                callback: &mut dyn FnMut() -> bool,
            ) -> std::result::Result<bool, crate::error::SchedulerError> {
                Ok(callback())
            }
            fn notify_interrupt(&self, _data: &crate::notify::InterruptData) {}
            fn queue_dpc(&self) -> bool {
                true
            }
            fn notify_dpc(&self) {}
        }

        let err = adapter
            .start(StartResources {
                scheduler: Arc::new(Idle),
                local_memory: Arc::new(LocalMemory::new(64)),
                system_memory: Arc::new(ros_memory::HostSystemMemory::new()),
                hardware: None,
            })
            .unwrap_err();
        assert!(matches!(err, KmdError::HardwareMissing));
        assert!(!adapter.is_started());
        assert!(!adapter.interrupt_routine(0));
    }
}
