//! Render buffer execution.
//!
//! Software command buffers are always interpreted here. What happens to any other render
//! buffer depends on the executor picked at adapter start: [`SoftwareRenderExecutor`] has no
//! device and completes them as-is, [`HardwareRenderExecutor`] hands them to a [`GpuHardware`]
//! and blocks until the completion interrupt fires.

use std::sync::Arc;

use ros_protocol::{decode_gpu_command_le, GpuCommand, GPU_COMMAND_SIZE};
use tracing::{trace, warn};

use crate::buffer::BufferKind;
use crate::error::ErrorFlags;
use crate::event::SyncEvent;
use crate::worker::ExecutionContext;

/// A device that executes hardware command buffers.
///
/// `submit` must return promptly; completion is reported later by raising the adapter's
/// interrupt (see [`crate::InterruptLine`]). An interrupt raised while no submission is
/// outstanding is discarded.
pub trait GpuHardware: Send {
    fn submit(&mut self, commands: &[u8], dma_buffer_physical_address: u64, fence_id: u64);
}

/// The part of a submission a render executor sees.
#[derive(Debug)]
pub(crate) struct RenderSubmission<'a> {
    pub kind: BufferKind,
    pub commands: &'a [u8],
    pub fence_id: u64,
    pub dma_buffer_physical_address: u64,
}

pub(crate) trait RenderExecutor: Send {
    fn execute(&mut self, ctx: &ExecutionContext<'_>, submission: &RenderSubmission<'_>);
}

/// Interprets a software command stream against local memory.
///
/// # Panics
///
/// Panics if `commands` is not a whole number of command records.
pub(crate) fn interpret_software_commands(ctx: &ExecutionContext<'_>, commands: &[u8]) {
    assert!(
        commands.len() % GPU_COMMAND_SIZE == 0,
        "software command range of {} bytes is not a multiple of {GPU_COMMAND_SIZE}",
        commands.len()
    );

    for record in commands.chunks_exact(GPU_COMMAND_SIZE) {
        // Every chunk is exactly one record long.
        let Ok(cmd) = decode_gpu_command_le(record) else {
            continue;
        };
        trace!(?cmd, "software command");
        match cmd {
            GpuCommand::Header | GpuCommand::Nop | GpuCommand::Unknown { .. } => {}
            GpuCommand::ResourceCopy {
                dst_gpu_address,
                src_gpu_address,
                size_bytes,
            } => {
                let len = size_bytes as usize;
                if let Err(err) = ctx.local.copy_within(dst_gpu_address, src_gpu_address, len) {
                    warn!(%err, "resource copy outside video memory");
                    ctx.errors.record(ErrorFlags::RENDER_FAILURE);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SoftwareRenderExecutor;

impl RenderExecutor for SoftwareRenderExecutor {
    fn execute(&mut self, ctx: &ExecutionContext<'_>, submission: &RenderSubmission<'_>) {
        match submission.kind {
            BufferKind::SoftwareCommands => interpret_software_commands(ctx, submission.commands),
            _ => trace!(
                fence_id = submission.fence_id,
                "no device attached; hardware buffer completes without execution"
            ),
        }
    }
}

pub(crate) struct HardwareRenderExecutor {
    hardware: Box<dyn GpuHardware>,
    completion: Arc<SyncEvent>,
}

impl HardwareRenderExecutor {
    pub(crate) fn new(hardware: Box<dyn GpuHardware>, completion: Arc<SyncEvent>) -> Self {
        Self {
            hardware,
            completion,
        }
    }
}

impl RenderExecutor for HardwareRenderExecutor {
    fn execute(&mut self, ctx: &ExecutionContext<'_>, submission: &RenderSubmission<'_>) {
        if submission.kind == BufferKind::SoftwareCommands {
            interpret_software_commands(ctx, submission.commands);
            return;
        }

        // A stray interrupt raised while the device was idle must not complete this submission.
        self.completion.reset();
        self.hardware.submit(
            submission.commands,
            submission.dma_buffer_physical_address,
            submission.fence_id,
        );
        trace!(fence_id = submission.fence_id, "waiting for hardware completion");
        self.completion.wait();
    }
}
