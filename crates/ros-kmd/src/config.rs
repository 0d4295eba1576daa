/// Capacity of the submission descriptor pool. The external scheduler bounds in-flight
/// submissions to this number.
pub const SUBMISSION_POOL_CAPACITY: usize = 32;

/// Number of GPU nodes (engines) exposed to the scheduler.
pub const GPU_ENGINE_COUNT: u32 = 1;

/// Default aperture segment size: 16 MiB of 4 KiB pages.
pub const DEFAULT_APERTURE_PAGE_COUNT: usize = 4096;

/// How render buffers that are not software command buffers are executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// No device attached: software command buffers are interpreted, anything else completes
    /// without execution.
    #[default]
    Software,
    /// Hardware command buffers are handed to a [`crate::GpuHardware`] and the worker waits for
    /// its completion interrupt.
    Hardware,
}

#[derive(Clone, Debug)]
pub struct AdapterConfig {
    pub execution: ExecutionMode,
    pub aperture_page_count: usize,
    /// Node ordinal reported with every DMA completion.
    pub node_ordinal: u32,
    /// Engine ordinal reported with every DMA completion.
    pub engine_ordinal: u32,
    pub worker_thread_name: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::Software,
            aperture_page_count: DEFAULT_APERTURE_PAGE_COUNT,
            node_ordinal: 0,
            engine_ordinal: 0,
            worker_thread_name: "ros-kmd-worker".to_string(),
        }
    }
}
