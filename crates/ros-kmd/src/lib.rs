//! Command submission and execution core of a render-only GPU driver.
//!
//! The external scheduler hands the [`Adapter`] command buffers through
//! [`Adapter::submit_command`]. A dedicated worker thread drains them in FIFO order, runs paging
//! buffers through the paging executor and render buffers through the render executor chosen at
//! start ([`ExecutionMode`]), then raises each submission's fence through the scheduler's
//! synchronized callback ([`SchedulerInterface`]).
//!
//! Failures the caller can act on are returned as [`KmdError`]. Failures hit by the worker are
//! accumulated as [`ErrorFlags`] and never stop it; broken caller contracts panic.

mod adapter;
mod aperture;
mod buffer;
mod config;
mod error;
mod event;
mod notify;
mod paging;
mod patch;
mod queue;
mod render;
mod worker;

pub use adapter::{
    Adapter, EngineStatus, InterruptLine, SchedulingCaps, StartInfo, StartResources,
    SubmitCommandArgs,
};
pub use aperture::ApertureTable;
pub use buffer::{BufferKind, BufferRecord, BufferState, DmaBuffer};
pub use config::{
    AdapterConfig, ExecutionMode, DEFAULT_APERTURE_PAGE_COUNT, GPU_ENGINE_COUNT,
    SUBMISSION_POOL_CAPACITY,
};
pub use error::{ErrorAccumulator, ErrorFlags, KmdError, Result, SchedulerError};
pub use notify::{InterruptData, SchedulerInterface};
pub use paging::PagingRequest;
pub use patch::{AllocationListEntry, PatchArgs, PatchLocation};
pub use queue::{DequeuedSubmission, SlotId, SubmissionDescriptor, SubmissionQueue};
pub use render::GpuHardware;
