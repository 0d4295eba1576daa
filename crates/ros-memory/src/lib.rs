//! Memory collaborators of the driver core.
//!
//! The core never owns memory itself. It is handed:
//! - [`LocalMemory`]: the device-local (video) memory region, fixed at adapter start, and
//! - a [`SystemMemory`] implementation through which page-description chains are resolved and
//!   temporarily mapped for copying.
//!
//! [`HostSystemMemory`] is an in-process [`SystemMemory`] used by the emulated adapter and tests.
#![forbid(unsafe_code)]

mod chain;
mod error;
mod host;
mod local;
mod system;

pub use chain::{PageChain, PageRun};
pub use error::{MemoryError, MemoryResult};
pub use host::HostSystemMemory;
pub use local::LocalMemory;
pub use ros_protocol::{ChainHandle, PAGE_SIZE};
pub use system::{SystemMapping, SystemMemory};
