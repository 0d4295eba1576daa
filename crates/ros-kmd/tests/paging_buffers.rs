mod common;

use std::sync::Arc;

use common::Harness;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use ros_kmd::{
    AdapterConfig, ApertureTable, BufferKind, BufferState, DmaBuffer, ErrorFlags, KmdError,
    PagingRequest,
};
use ros_memory::{PageChain, PageRun, SystemMemory, PAGE_SIZE};
use ros_protocol::{
    ChainHandle, PagingLocation, PagingOperation, SegmentAddress, PAGING_RECORD_SIZE,
    SEGMENT_ID_APERTURE,
};

/// Builds `ops` into a fresh paging buffer and returns it with the used length.
fn build(h: &Harness, ops: &[PagingOperation]) -> (Arc<DmaBuffer>, usize) {
    let buffer = Arc::new(DmaBuffer::new(
        BufferKind::Paging,
        ops.len().max(1) * PAGING_RECORD_SIZE,
    ));
    let mut offset = 0;
    for op in ops {
        offset = h
            .adapter
            .build_paging_buffer(&buffer, offset, &PagingRequest::Operation(*op))
            .unwrap();
    }
    (buffer, offset)
}

fn run(h: &Harness, ops: &[PagingOperation], fence_id: u64) {
    let (buffer, len) = build(h, ops);
    h.submit_range(&buffer, 0, len, fence_id);
    h.scheduler.wait_for_fences(fence_id as usize);
}

#[test]
fn fill_writes_pattern_into_video_memory() {
    let mut h = Harness::start(AdapterConfig::default());
    run(
        &h,
        &[PagingOperation::Fill {
            size_bytes: 16,
            pattern: 0xAABB_CCDD,
            destination: SegmentAddress::video_memory(0x400),
        }],
        1,
    );
    h.adapter.stop().unwrap();

    let words: Vec<u32> = h
        .local
        .to_vec(0x400, 16)
        .unwrap()
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes(w.try_into().unwrap()))
        .collect();
    assert_eq!(words, vec![0xAABB_CCDD; 4]);
    assert_eq!(h.local.to_vec(0x410, 4).unwrap(), vec![0; 4]);
}

#[test]
fn transfers_round_trip_between_system_and_video_memory() {
    let mut h = Harness::start(AdapterConfig::default());
    let base = h.system.allocate_pages(3);
    let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
    h.system.write(base + PAGE_SIZE, &payload).unwrap();
    let chain = h
        .system
        .create_chain(vec![PageRun::new(base, 3 * PAGE_SIZE)]);

    run(
        &h,
        &[
            PagingOperation::Transfer {
                size_bytes: payload.len() as u64,
                source: PagingLocation::System(chain),
                destination: PagingLocation::Segment(SegmentAddress::video_memory(0x2000)),
                chain_page_offset: 1,
            },
            PagingOperation::Transfer {
                size_bytes: 64,
                source: PagingLocation::Segment(SegmentAddress::video_memory(0x2000)),
                destination: PagingLocation::System(chain),
                chain_page_offset: 0,
            },
        ],
        1,
    );
    h.adapter.stop().unwrap();

    assert_eq!(h.local.to_vec(0x2000, payload.len()).unwrap(), payload);
    let mut head = [0u8; 64];
    h.system.read(base, &mut head).unwrap();
    assert_eq!(head.to_vec(), payload[..64].to_vec());
    assert_eq!(h.system.active_temporary_mappings(), 0);
    assert!(h.adapter.errors().is_empty());
}

#[test]
fn permanently_mapped_chain_keeps_its_mapping() {
    let mut h = Harness::start(AdapterConfig::default());
    let base = h.system.allocate_pages(1);
    h.system.write(base, b"resident").unwrap();
    let chain = h.system.create_chain(vec![PageRun::new(base, PAGE_SIZE)]);
    let window = h.system.map_permanently(chain).unwrap();

    run(
        &h,
        &[PagingOperation::Transfer {
            size_bytes: 8,
            source: PagingLocation::System(chain),
            destination: PagingLocation::Segment(SegmentAddress::video_memory(0)),
            chain_page_offset: 0,
        }],
        1,
    );
    h.adapter.stop().unwrap();

    assert_eq!(h.local.to_vec(0, 8).unwrap(), b"resident".to_vec());
    let mut still_mapped = [0u8; 8];
    h.system.read(window, &mut still_mapped).unwrap();
    assert_eq!(&still_mapped, b"resident");
}

#[test]
fn unresolvable_source_is_recorded_and_destination_untouched() {
    let mut h = Harness::start(AdapterConfig::default());
    h.local.write(0x100, &[0xEE; 32]).unwrap();
    // Pages that were never allocated cannot be mapped.
    let chain = h
        .system
        .create_chain(vec![PageRun::new(0x7000_0000, PAGE_SIZE)]);

    run(
        &h,
        &[
            PagingOperation::Transfer {
                size_bytes: 32,
                source: PagingLocation::System(chain),
                destination: PagingLocation::Segment(SegmentAddress::video_memory(0x100)),
                chain_page_offset: 0,
            },
            PagingOperation::Transfer {
                size_bytes: 32,
                source: PagingLocation::System(ChainHandle(0xDEAD)),
                destination: PagingLocation::Segment(SegmentAddress::video_memory(0x100)),
                chain_page_offset: 0,
            },
            PagingOperation::Fill {
                size_bytes: 4,
                pattern: 0x0102_0304,
                destination: SegmentAddress::video_memory(0),
            },
        ],
        1,
    );
    h.adapter.stop().unwrap();

    assert_eq!(h.adapter.errors(), ErrorFlags::PAGING_FAILURE);
    assert_eq!(h.local.to_vec(0x100, 32).unwrap(), vec![0xEE; 32]);
    // Later operations in the same buffer still run.
    assert_eq!(h.local.to_vec(0, 4).unwrap(), vec![4, 3, 2, 1]);
    assert_eq!(h.adapter.query_current_fence(), 1);
}

#[test]
fn aperture_map_and_unmap_follow_submission_order() {
    let mut h = Harness::start(AdapterConfig {
        aperture_page_count: 8,
        ..Default::default()
    });
    let a = h.system.allocate_pages(1);
    let b = h.system.allocate_pages(1);
    let chain = h.system.create_chain(vec![
        PageRun::new(a, PAGE_SIZE),
        PageRun::new(b, PAGE_SIZE),
    ]);

    let map = PagingOperation::MapApertureSegment {
        segment_id: SEGMENT_ID_APERTURE,
        first_page: 0,
        page_count: 2,
        chain,
        chain_byte_offset: 0,
    };
    run(&h, &[map], 1);
    let mut expected = vec![None; 8];
    expected[0] = Some(a);
    expected[1] = Some(b);
    assert_eq!(h.adapter.aperture_entries(), expected);

    let unmap = PagingOperation::UnmapApertureSegment {
        segment_id: SEGMENT_ID_APERTURE,
        first_page: 0,
        page_count: 2,
    };
    run(&h, &[unmap], 2);
    h.adapter.stop().unwrap();
    assert_eq!(h.adapter.aperture_entries(), vec![None; 8]);
}

#[test]
fn build_reports_insufficient_space_and_keeps_offset() {
    let h = Harness::start(AdapterConfig::default());
    let buffer = DmaBuffer::new(BufferKind::Paging, PAGING_RECORD_SIZE + 16);
    let fill = PagingRequest::Operation(PagingOperation::Fill {
        size_bytes: 4,
        pattern: 0,
        destination: SegmentAddress::video_memory(0),
    });

    let offset = h.adapter.build_paging_buffer(&buffer, 0, &fill).unwrap();
    let err = h
        .adapter
        .build_paging_buffer(&buffer, offset, &fill)
        .unwrap_err();
    assert!(matches!(
        err,
        KmdError::InsufficientDmaBuffer {
            required: PAGING_RECORD_SIZE,
            available: 16
        }
    ));
    assert_eq!(buffer.state(), BufferState::PAGING);
}

proptest! {
    #[test]
    fn map_fills_exactly_the_requested_slots(
        run_pages in proptest::collection::vec(1u64..4, 1..5),
        first_page in 0usize..8,
        skip in 0usize..3,
    ) {
        let runs: Vec<PageRun> = run_pages
            .iter()
            .enumerate()
            .map(|(i, &pages)| PageRun::new(0x100_0000 * (i as u64 + 1), pages * PAGE_SIZE))
            .collect();
        let chain = PageChain::new(runs);
        let available = chain.pages().count().saturating_sub(skip);
        prop_assume!(available > 0);

        let mut table = ApertureTable::new(16);
        let count = available.min(table.len() - first_page);
        table.map_segment(first_page, count, &chain, skip);

        let expected: Vec<u64> = chain.pages().skip(skip).take(count).collect();
        for (i, slot) in table.entries().iter().enumerate() {
            if (first_page..first_page + count).contains(&i) {
                prop_assert_eq!(*slot, Some(expected[i - first_page]));
            } else {
                prop_assert_eq!(*slot, None);
            }
        }

        table.unmap_segment(first_page, count);
        prop_assert!(table.entries().iter().all(Option::is_none));
    }
}
