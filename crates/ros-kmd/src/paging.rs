//! Paging buffers: building records into a DMA buffer and executing them on the worker.

use ros_memory::{SystemMapping, PAGE_SIZE};
use ros_protocol::{
    PagingLocation, PagingOperation, PagingOperationKind, SegmentAddress, PAGING_RECORD_SIZE,
    SEGMENT_ID_APERTURE, SEGMENT_ID_VIDEO_MEMORY,
};
use tracing::{trace, warn};

use crate::buffer::DmaBuffer;
use crate::error::{ErrorFlags, KmdError, Result};
use crate::worker::ExecutionContext;

/// One `build_paging_buffer` request from the memory manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingRequest {
    Operation(PagingOperation),
    /// An operation the core does not implement (for example `ReadPhysical`).
    Unsupported(PagingOperationKind),
}

/// Appends the record for `op` at `offset` and returns the offset just past it.
pub(crate) fn append_record(
    buffer: &DmaBuffer,
    offset: usize,
    op: &PagingOperation,
) -> Result<usize> {
    let available = buffer.size().saturating_sub(offset);
    if available < PAGING_RECORD_SIZE {
        return Err(KmdError::InsufficientDmaBuffer {
            required: PAGING_RECORD_SIZE,
            available,
        });
    }
    buffer.write_at(offset, &op.encode());
    Ok(offset + PAGING_RECORD_SIZE)
}

/// A transfer operand after resolution.
enum Operand {
    Local(u64),
    System { mapping: SystemMapping, va: u64 },
    /// Per-page `(system va, len)` pieces of an aperture range.
    Aperture(Vec<(u64, usize)>),
}

pub(crate) struct PagingExecutor<'a> {
    ctx: &'a ExecutionContext<'a>,
}

impl<'a> PagingExecutor<'a> {
    pub(crate) fn new(ctx: &'a ExecutionContext<'a>) -> Self {
        Self { ctx }
    }

    /// Executes every record in `records`.
    ///
    /// # Panics
    ///
    /// Panics if the length is not a whole number of records or a record does not decode.
    pub(crate) fn execute(&self, records: &[u8]) {
        assert!(
            records.len() % PAGING_RECORD_SIZE == 0,
            "paging range of {} bytes is not a multiple of {PAGING_RECORD_SIZE}",
            records.len()
        );

        for record in records.chunks_exact(PAGING_RECORD_SIZE) {
            let op = match PagingOperation::decode_le(record) {
                Ok(op) => op,
                Err(err) => panic!("malformed paging record: {err}"),
            };
            trace!(?op, "paging operation");
            self.execute_one(op);
        }
    }

    fn execute_one(&self, op: PagingOperation) {
        match op {
            PagingOperation::Fill {
                size_bytes,
                pattern,
                destination,
            } => self.fill(size_bytes, pattern, destination),
            PagingOperation::Transfer {
                size_bytes,
                source,
                destination,
                chain_page_offset,
            } => self.transfer(size_bytes, source, destination, chain_page_offset),
            PagingOperation::DiscardContent => {}
            PagingOperation::MapApertureSegment {
                segment_id,
                first_page,
                page_count,
                chain,
                chain_byte_offset,
            } => {
                if segment_id != SEGMENT_ID_APERTURE {
                    return;
                }
                assert!(
                    chain_byte_offset % PAGE_SIZE == 0,
                    "aperture chain offset {chain_byte_offset:#x} is not page aligned"
                );
                let Some(pages) = self.ctx.system.chain(chain) else {
                    self.fail(ErrorFlags::PAGING_FAILURE, "aperture map names an unknown chain");
                    return;
                };
                self.ctx.aperture().map_segment(
                    first_page as usize,
                    page_count as usize,
                    &pages,
                    (chain_byte_offset / PAGE_SIZE) as usize,
                );
            }
            PagingOperation::UnmapApertureSegment {
                segment_id,
                first_page,
                page_count,
            } => {
                if segment_id == SEGMENT_ID_APERTURE {
                    self.ctx
                        .aperture()
                        .unmap_segment(first_page as usize, page_count as usize);
                }
            }
        }
    }

    fn fail(&self, flag: ErrorFlags, what: &str) {
        warn!(?flag, "{what}");
        self.ctx.errors.record(flag);
    }

    fn fill(&self, size_bytes: u64, pattern: u32, destination: SegmentAddress) {
        assert_eq!(
            destination.segment_id, SEGMENT_ID_VIDEO_MEMORY,
            "fill destination must be video memory"
        );
        let Ok(len) = usize::try_from(size_bytes) else {
            self.fail(ErrorFlags::PAGING_FAILURE, "fill size does not fit in memory");
            return;
        };
        if let Err(err) = self
            .ctx
            .local
            .fill_pattern(destination.address, len, pattern)
        {
            self.fail(ErrorFlags::PAGING_FAILURE, &format!("fill failed: {err}"));
        }
    }

    fn resolve(&self, at: PagingLocation, len: usize, chain_page_offset: u32) -> Option<Operand> {
        match at {
            PagingLocation::Segment(SegmentAddress {
                segment_id: SEGMENT_ID_VIDEO_MEMORY,
                address,
            }) => Some(Operand::Local(address)),
            PagingLocation::Segment(SegmentAddress {
                segment_id: SEGMENT_ID_APERTURE,
                address,
            }) => self.ctx.aperture().resolve(address, len).map(Operand::Aperture),
            PagingLocation::Segment(SegmentAddress { segment_id, .. }) => {
                panic!("transfer operand in unknown segment {segment_id}")
            }
            PagingLocation::System(chain) => {
                let mapping = self.ctx.system.map_locked_pages(chain)?;
                let offset = u64::from(chain_page_offset) * PAGE_SIZE;
                let fits = offset
                    .checked_add(len as u64)
                    .is_some_and(|end| end <= mapping.len);
                if !fits {
                    self.release(&mapping);
                    return None;
                }
                Some(Operand::System {
                    va: mapping.base + offset,
                    mapping,
                })
            }
        }
    }

    fn release(&self, mapping: &SystemMapping) {
        if !mapping.already_mapped {
            self.ctx.system.unmap_locked_pages(mapping);
        }
    }

    fn release_operand(&self, operand: Option<&Operand>) {
        if let Some(Operand::System { mapping, .. }) = operand {
            self.release(mapping);
        }
    }

    fn read(&self, from: &Operand, dst: &mut [u8]) -> ros_memory::MemoryResult<()> {
        match from {
            Operand::Local(addr) => self.ctx.local.read(*addr, dst),
            Operand::System { va, .. } => self.ctx.system.read(*va, dst),
            Operand::Aperture(pieces) => {
                let mut done = 0;
                for &(va, len) in pieces {
                    self.ctx.system.read(va, &mut dst[done..done + len])?;
                    done += len;
                }
                Ok(())
            }
        }
    }

    fn write(&self, to: &Operand, src: &[u8]) -> ros_memory::MemoryResult<()> {
        match to {
            Operand::Local(addr) => self.ctx.local.write(*addr, src),
            Operand::System { va, .. } => self.ctx.system.write(*va, src),
            Operand::Aperture(pieces) => {
                let mut done = 0;
                for &(va, len) in pieces {
                    self.ctx.system.write(va, &src[done..done + len])?;
                    done += len;
                }
                Ok(())
            }
        }
    }

    fn transfer(
        &self,
        size_bytes: u64,
        source: PagingLocation,
        destination: PagingLocation,
        chain_page_offset: u32,
    ) {
        let Ok(len) = usize::try_from(size_bytes) else {
            self.fail(ErrorFlags::PAGING_FAILURE, "transfer size does not fit in memory");
            return;
        };

        let src = self.resolve(source, len, chain_page_offset);
        let dst = self.resolve(destination, len, chain_page_offset);

        if let (Some(src), Some(dst)) = (&src, &dst) {
            let mut staging = vec![0u8; len];
            let copied = self
                .read(src, &mut staging)
                .and_then(|()| self.write(dst, &staging));
            if let Err(err) = copied {
                self.fail(ErrorFlags::PAGING_FAILURE, &format!("transfer failed: {err}"));
            }
        } else {
            self.fail(
                ErrorFlags::PAGING_FAILURE,
                "transfer operand could not be resolved",
            );
        }

        self.release_operand(src.as_ref());
        self.release_operand(dst.as_ref());
    }
}
