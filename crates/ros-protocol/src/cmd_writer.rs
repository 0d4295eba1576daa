//! Builder for software command buffers.
//!
//! Intended for fixtures and host-side tooling that need to emit well-formed command arrays
//! (one [`GPU_COMMAND_SIZE`] record per command, little-endian fields).

use core::mem::offset_of;

use crate::gpu_cmd::{GpuCommandId, GpuCommandRecord, GPU_COMMAND_SIZE};

#[derive(Debug, Default, Clone)]
pub struct GpuCommandWriter {
    buf: Vec<u8>,
}

impl GpuCommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_u64_at(&mut self, offset: usize, v: u64) {
        self.buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Appends a zeroed record tagged `command_id` and returns its byte offset.
    pub fn append_raw(&mut self, command_id: u32) -> usize {
        let offset = self.buf.len();
        self.buf.resize(offset + GPU_COMMAND_SIZE, 0);
        self.write_u32_at(offset + offset_of!(GpuCommandRecord, command_id), command_id);
        offset
    }

    pub fn header(&mut self) -> usize {
        self.append_raw(GpuCommandId::Header as u32)
    }

    pub fn nop(&mut self) -> usize {
        self.append_raw(GpuCommandId::Nop as u32)
    }

    /// Appends a copy of `size_bytes` between two video-memory addresses and returns the record
    /// offset. Add [`GpuCommandRecord::DST_GPU_ADDRESS_OFFSET`] /
    /// [`GpuCommandRecord::SRC_GPU_ADDRESS_OFFSET`] to get patch offsets.
    pub fn resource_copy(&mut self, dst_gpu_address: u64, src_gpu_address: u64, size_bytes: u32) -> usize {
        let base = self.append_raw(GpuCommandId::ResourceCopy as u32);
        self.write_u64_at(base + GpuCommandRecord::DST_GPU_ADDRESS_OFFSET, dst_gpu_address);
        self.write_u64_at(base + GpuCommandRecord::SRC_GPU_ADDRESS_OFFSET, src_gpu_address);
        self.write_u32_at(base + GpuCommandRecord::SIZE_BYTES_OFFSET, size_bytes);
        base
    }
}
