use std::ops::Range;

use ros_protocol::SEGMENT_ID_VIDEO_MEMORY;
use tracing::trace;

use crate::buffer::{BufferKind, DmaBuffer};
use crate::error::{KmdError, Result};

/// Where an allocation referenced by a command buffer currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationListEntry {
    /// `0` means the allocation is not resident in any segment and is left unpatched.
    pub segment_id: u32,
    pub physical_address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchLocation {
    pub allocation_index: u32,
    pub allocation_offset: u32,
    /// Byte offset of the 8-byte address slot inside the DMA buffer.
    pub patch_offset: u32,
}

#[derive(Clone, Debug)]
pub struct PatchArgs<'a> {
    pub allocations: &'a [AllocationListEntry],
    pub patch_locations: &'a [PatchLocation],
    /// The slice of `patch_locations` that belongs to this submission.
    pub submission_range: Range<usize>,
}

const ADDRESS_SLOT_SIZE: usize = 8;

/// Resolves one location to the slot offset and the address to store there, or `None` when the
/// location is skipped.
fn resolve_slot(
    buffer: &DmaBuffer,
    allocations: &[AllocationListEntry],
    location: &PatchLocation,
) -> Result<Option<(usize, u64)>> {
    let index = location.allocation_index as usize;
    assert!(
        index < allocations.len(),
        "patch references allocation {index} of {}",
        allocations.len()
    );
    let allocation = &allocations[index];
    if allocation.segment_id == 0 {
        return Ok(None);
    }
    assert_eq!(
        allocation.segment_id, SEGMENT_ID_VIDEO_MEMORY,
        "patched allocations must live in video memory"
    );
    // Hardware command buffers carry their own relocation scheme.
    if buffer.kind() != BufferKind::SoftwareCommands {
        return Ok(None);
    }

    let offset = location.patch_offset as usize;
    buffer.check_range(&(offset..offset + ADDRESS_SLOT_SIZE))?;
    let address = allocation
        .physical_address
        .checked_add(u64::from(location.allocation_offset))
        .ok_or(KmdError::PatchAddressOverflow {
            physical_address: allocation.physical_address,
            allocation_offset: location.allocation_offset,
        })?;
    Ok(Some((offset, address)))
}

/// Writes allocation addresses into `buffer` and marks it patched. Returns the number of slots
/// written.
///
/// Every location is checked before the first write, so a failed call leaves the buffer
/// untouched.
///
/// # Panics
///
/// Panics if the submission range or an allocation index is out of bounds, or a resident
/// allocation is outside video memory.
pub(crate) fn apply_patches(buffer: &DmaBuffer, args: &PatchArgs<'_>) -> Result<usize> {
    let locations = args
        .patch_locations
        .get(args.submission_range.clone())
        .unwrap_or_else(|| {
            panic!(
                "patch submission range {:?} exceeds {} locations",
                args.submission_range,
                args.patch_locations.len()
            )
        });

    for location in locations {
        resolve_slot(buffer, args.allocations, location)?;
    }

    let mut written = 0;
    for location in locations {
        if let Some((offset, address)) = resolve_slot(buffer, args.allocations, location)? {
            trace!(offset, address, "patch address slot");
            buffer.write_at(offset, &address.to_le_bytes());
            written += 1;
        }
    }

    buffer.record().mark_patched();
    Ok(written)
}
