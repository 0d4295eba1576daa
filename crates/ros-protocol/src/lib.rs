//! Record layouts shared between the code that *builds* command buffers and the worker that
//! *executes* them.
//!
//! Everything here is plain little-endian bytes so a buffer built on one side of the
//! scheduler boundary can be interpreted on the other:
//! - [`paging`]: fixed-size paging operation records (fill / transfer / discard / aperture map),
//! - [`gpu_cmd`]: fixed-size software GPU command records,
//! - [`cmd_writer`]: a builder for software command buffers used by fixtures and tests,
//! - [`segment`]: segment ids, page size and page-description chain handles.
#![forbid(unsafe_code)]

pub mod cmd_writer;
pub mod gpu_cmd;
pub mod paging;
pub mod segment;

pub use cmd_writer::GpuCommandWriter;
pub use gpu_cmd::{
    decode_gpu_command_le, GpuCommand, GpuCommandDecodeError, GpuCommandId, GpuCommandRecord,
    GPU_COMMAND_SIZE,
};
pub use paging::{
    PagingDecodeError, PagingLocation, PagingOperation, PagingOperationKind, PAGING_RECORD_SIZE,
};
pub use segment::{
    ChainHandle, SegmentAddress, PAGE_SIZE, SEGMENT_ID_APERTURE, SEGMENT_ID_SYSTEM,
    SEGMENT_ID_VIDEO_MEMORY,
};
