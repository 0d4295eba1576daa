//! Paging operation records.
//!
//! A paging buffer is a contiguous array of [`PAGING_RECORD_SIZE`]-byte records. Every record
//! starts with a `u32` operation tag (the DXGK operation numbering) followed by a reserved word;
//! the operand layout after that depends on the tag:
//!
//! | tag | offset 8 | offset 16 | offset 20 | offset 24 | offset 32 | offset 40 |
//! |---|---|---|---|---|---|---|
//! | TRANSFER | size (u64) | src segment (u32) | dst segment (u32) | src address (u64) | dst address (u64) | chain page offset (u32) |
//! | FILL | size (u64) | pattern (u32) | dst segment (u32) | dst address (u64) | | |
//! | DISCARD_CONTENT | | | | | | |
//! | MAP_APERTURE_SEGMENT | segment (u32) + page count (u32) | first page (u32) | | chain (u64) | chain byte offset (u64) | |
//! | UNMAP_APERTURE_SEGMENT | segment (u32) + page count (u32) | first page (u32) | | | | |
//!
//! A transfer operand in [`SEGMENT_ID_SYSTEM`] stores a [`ChainHandle`] in its address slot.

use crate::segment::{ChainHandle, SegmentAddress, SEGMENT_ID_SYSTEM};

pub const PAGING_RECORD_SIZE: usize = 48;

const OP_OFFSET: usize = 0;
const ARG0_OFFSET: usize = 8;
const ARG1_OFFSET: usize = 12;
const ARG2_OFFSET: usize = 16;
const ARG3_OFFSET: usize = 20;
const ARG4_OFFSET: usize = 24;
const ARG5_OFFSET: usize = 32;
const ARG6_OFFSET: usize = 40;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingOperationKind {
    Transfer = 1,
    Fill = 2,
    DiscardContent = 3,
    ReadPhysical = 4,
    WritePhysical = 5,
    MapApertureSegment = 6,
    UnmapApertureSegment = 7,
    SpecialLockTransfer = 8,
}

impl PagingOperationKind {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Transfer),
            2 => Some(Self::Fill),
            3 => Some(Self::DiscardContent),
            4 => Some(Self::ReadPhysical),
            5 => Some(Self::WritePhysical),
            6 => Some(Self::MapApertureSegment),
            7 => Some(Self::UnmapApertureSegment),
            8 => Some(Self::SpecialLockTransfer),
            _ => None,
        }
    }
}

/// One side of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingLocation {
    /// Byte offset inside a GPU-visible segment (video memory or aperture).
    Segment(SegmentAddress),
    /// System memory reached through a page-description chain.
    System(ChainHandle),
}

impl PagingLocation {
    fn encode(self) -> (u32, u64) {
        match self {
            Self::Segment(at) => (at.segment_id, at.address),
            Self::System(chain) => (SEGMENT_ID_SYSTEM, chain.0),
        }
    }

    fn decode(segment_id: u32, address: u64) -> Self {
        if segment_id == SEGMENT_ID_SYSTEM {
            Self::System(ChainHandle(address))
        } else {
            Self::Segment(SegmentAddress {
                segment_id,
                address,
            })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingOperation {
    Transfer {
        size_bytes: u64,
        source: PagingLocation,
        destination: PagingLocation,
        /// Page offset applied to whichever side is a page-description chain.
        chain_page_offset: u32,
    },
    Fill {
        size_bytes: u64,
        pattern: u32,
        destination: SegmentAddress,
    },
    DiscardContent,
    MapApertureSegment {
        segment_id: u32,
        first_page: u32,
        page_count: u32,
        chain: ChainHandle,
        /// Byte offset into the chain; must be page aligned.
        chain_byte_offset: u64,
    },
    UnmapApertureSegment {
        segment_id: u32,
        first_page: u32,
        page_count: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingDecodeError {
    BufferTooSmall { found: usize },
    UnknownOperation { found: u32 },
    UnsupportedOperation { found: PagingOperationKind },
}

impl core::fmt::Display for PagingDecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall { found } => write!(
                f,
                "paging record needs {PAGING_RECORD_SIZE} bytes, buffer has {found}"
            ),
            Self::UnknownOperation { found } => write!(f, "unknown paging operation tag {found}"),
            Self::UnsupportedOperation { found } => {
                write!(f, "paging operation {found:?} has no record encoding")
            }
        }
    }
}

impl std::error::Error for PagingDecodeError {}

fn write_u32_at(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64_at(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

fn read_u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_u64_at(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

impl PagingOperation {
    pub const fn kind(&self) -> PagingOperationKind {
        match self {
            Self::Transfer { .. } => PagingOperationKind::Transfer,
            Self::Fill { .. } => PagingOperationKind::Fill,
            Self::DiscardContent => PagingOperationKind::DiscardContent,
            Self::MapApertureSegment { .. } => PagingOperationKind::MapApertureSegment,
            Self::UnmapApertureSegment { .. } => PagingOperationKind::UnmapApertureSegment,
        }
    }

    pub fn encode(&self) -> [u8; PAGING_RECORD_SIZE] {
        let mut out = [0u8; PAGING_RECORD_SIZE];
        write_u32_at(&mut out, OP_OFFSET, self.kind() as u32);

        match *self {
            Self::Transfer {
                size_bytes,
                source,
                destination,
                chain_page_offset,
            } => {
                let (src_segment, src_address) = source.encode();
                let (dst_segment, dst_address) = destination.encode();
                write_u64_at(&mut out, ARG0_OFFSET, size_bytes);
                write_u32_at(&mut out, ARG2_OFFSET, src_segment);
                write_u32_at(&mut out, ARG3_OFFSET, dst_segment);
                write_u64_at(&mut out, ARG4_OFFSET, src_address);
                write_u64_at(&mut out, ARG5_OFFSET, dst_address);
                write_u32_at(&mut out, ARG6_OFFSET, chain_page_offset);
            }
            Self::Fill {
                size_bytes,
                pattern,
                destination,
            } => {
                write_u64_at(&mut out, ARG0_OFFSET, size_bytes);
                write_u32_at(&mut out, ARG2_OFFSET, pattern);
                write_u32_at(&mut out, ARG3_OFFSET, destination.segment_id);
                write_u64_at(&mut out, ARG4_OFFSET, destination.address);
            }
            Self::DiscardContent => {}
            Self::MapApertureSegment {
                segment_id,
                first_page,
                page_count,
                chain,
                chain_byte_offset,
            } => {
                write_u32_at(&mut out, ARG0_OFFSET, segment_id);
                write_u32_at(&mut out, ARG1_OFFSET, page_count);
                write_u32_at(&mut out, ARG2_OFFSET, first_page);
                write_u64_at(&mut out, ARG4_OFFSET, chain.0);
                write_u64_at(&mut out, ARG5_OFFSET, chain_byte_offset);
            }
            Self::UnmapApertureSegment {
                segment_id,
                first_page,
                page_count,
            } => {
                write_u32_at(&mut out, ARG0_OFFSET, segment_id);
                write_u32_at(&mut out, ARG1_OFFSET, page_count);
                write_u32_at(&mut out, ARG2_OFFSET, first_page);
            }
        }

        out
    }

    pub fn decode_le(buf: &[u8]) -> Result<Self, PagingDecodeError> {
        if buf.len() < PAGING_RECORD_SIZE {
            return Err(PagingDecodeError::BufferTooSmall { found: buf.len() });
        }

        let tag = read_u32_at(buf, OP_OFFSET);
        let kind = PagingOperationKind::from_u32(tag)
            .ok_or(PagingDecodeError::UnknownOperation { found: tag })?;

        let op = match kind {
            PagingOperationKind::Transfer => Self::Transfer {
                size_bytes: read_u64_at(buf, ARG0_OFFSET),
                source: PagingLocation::decode(
                    read_u32_at(buf, ARG2_OFFSET),
                    read_u64_at(buf, ARG4_OFFSET),
                ),
                destination: PagingLocation::decode(
                    read_u32_at(buf, ARG3_OFFSET),
                    read_u64_at(buf, ARG5_OFFSET),
                ),
                chain_page_offset: read_u32_at(buf, ARG6_OFFSET),
            },
            PagingOperationKind::Fill => Self::Fill {
                size_bytes: read_u64_at(buf, ARG0_OFFSET),
                pattern: read_u32_at(buf, ARG2_OFFSET),
                destination: SegmentAddress {
                    segment_id: read_u32_at(buf, ARG3_OFFSET),
                    address: read_u64_at(buf, ARG4_OFFSET),
                },
            },
            PagingOperationKind::DiscardContent => Self::DiscardContent,
            PagingOperationKind::MapApertureSegment => Self::MapApertureSegment {
                segment_id: read_u32_at(buf, ARG0_OFFSET),
                page_count: read_u32_at(buf, ARG1_OFFSET),
                first_page: read_u32_at(buf, ARG2_OFFSET),
                chain: ChainHandle(read_u64_at(buf, ARG4_OFFSET)),
                chain_byte_offset: read_u64_at(buf, ARG5_OFFSET),
            },
            PagingOperationKind::UnmapApertureSegment => Self::UnmapApertureSegment {
                segment_id: read_u32_at(buf, ARG0_OFFSET),
                page_count: read_u32_at(buf, ARG1_OFFSET),
                first_page: read_u32_at(buf, ARG2_OFFSET),
            },
            other @ (PagingOperationKind::ReadPhysical
            | PagingOperationKind::WritePhysical
            | PagingOperationKind::SpecialLockTransfer) => {
                return Err(PagingDecodeError::UnsupportedOperation { found: other });
            }
        };

        Ok(op)
    }
}
