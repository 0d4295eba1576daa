//! Software GPU command records.
//!
//! A software command buffer is a contiguous array of [`GPU_COMMAND_SIZE`]-byte records. The
//! command set is open ended: ids this crate does not know decode as [`GpuCommand::Unknown`].

use core::mem::offset_of;

pub const GPU_COMMAND_SIZE: usize = 32;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuCommandId {
    Header = 0,
    Nop = 1,
    ResourceCopy = 2,
}

impl GpuCommandId {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Header),
            1 => Some(Self::Nop),
            2 => Some(Self::ResourceCopy),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GpuCommandRecord {
    pub command_id: u32,
    pub reserved0: u32,
    pub dst_gpu_address: u64,
    pub src_gpu_address: u64,
    pub size_bytes: u32,
    pub reserved1: u32,
}

impl GpuCommandRecord {
    pub const SIZE_BYTES: usize = GPU_COMMAND_SIZE;

    /// Byte offset of the destination address; patch locations target this field.
    pub const DST_GPU_ADDRESS_OFFSET: usize = offset_of!(GpuCommandRecord, dst_gpu_address);
    /// Byte offset of the source address; patch locations target this field.
    pub const SRC_GPU_ADDRESS_OFFSET: usize = offset_of!(GpuCommandRecord, src_gpu_address);
    pub const SIZE_BYTES_OFFSET: usize = offset_of!(GpuCommandRecord, size_bytes);
}

const _: () = assert!(core::mem::size_of::<GpuCommandRecord>() == GPU_COMMAND_SIZE);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuCommand {
    Header,
    Nop,
    ResourceCopy {
        dst_gpu_address: u64,
        src_gpu_address: u64,
        size_bytes: u32,
    },
    Unknown {
        command_id: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuCommandDecodeError {
    BufferTooSmall { found: usize },
}

impl core::fmt::Display for GpuCommandDecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall { found } => write!(
                f,
                "gpu command needs {GPU_COMMAND_SIZE} bytes, buffer has {found}"
            ),
        }
    }
}

impl std::error::Error for GpuCommandDecodeError {}

pub fn decode_gpu_command_le(buf: &[u8]) -> Result<GpuCommand, GpuCommandDecodeError> {
    if buf.len() < GPU_COMMAND_SIZE {
        return Err(GpuCommandDecodeError::BufferTooSmall { found: buf.len() });
    }

    let read_u32 = |offset: usize| u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    let read_u64 = |offset: usize| u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());

    let command_id = read_u32(offset_of!(GpuCommandRecord, command_id));
    let cmd = match GpuCommandId::from_u32(command_id) {
        Some(GpuCommandId::Header) => GpuCommand::Header,
        Some(GpuCommandId::Nop) => GpuCommand::Nop,
        Some(GpuCommandId::ResourceCopy) => GpuCommand::ResourceCopy {
            dst_gpu_address: read_u64(GpuCommandRecord::DST_GPU_ADDRESS_OFFSET),
            src_gpu_address: read_u64(GpuCommandRecord::SRC_GPU_ADDRESS_OFFSET),
            size_bytes: read_u32(GpuCommandRecord::SIZE_BYTES_OFFSET),
        },
        None => GpuCommand::Unknown { command_id },
    };
    Ok(cmd)
}
