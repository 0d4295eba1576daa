use pretty_assertions::assert_eq;
use proptest::prelude::*;
use ros_memory::{HostSystemMemory, MemoryError, PageRun, SystemMemory, PAGE_SIZE};

#[test]
fn temporary_mapping_aliases_chain_pages() {
    let mem = HostSystemMemory::new();
    let a = mem.allocate_pages(1);
    let b = mem.allocate_pages(2);
    let chain = mem.create_chain(vec![PageRun::new(a, PAGE_SIZE), PageRun::new(b, 2 * PAGE_SIZE)]);

    mem.write(b + PAGE_SIZE, &[0xEE; 4]).unwrap();

    let mapping = mem.map_locked_pages(chain).expect("resident chain maps");
    assert!(!mapping.already_mapped);
    assert_eq!(mapping.len, 3 * PAGE_SIZE);
    assert_eq!(mem.active_temporary_mappings(), 1);

    // Third page of the window is the second page of the second run.
    let mut buf = [0u8; 4];
    mem.read(mapping.base + 2 * PAGE_SIZE, &mut buf).unwrap();
    assert_eq!(buf, [0xEE; 4]);

    // Writes that straddle the run boundary land in both runs.
    mem.write(mapping.base + PAGE_SIZE - 2, &[1, 2, 3, 4]).unwrap();
    let mut tail = [0u8; 2];
    mem.read(a + PAGE_SIZE - 2, &mut tail).unwrap();
    assert_eq!(tail, [1, 2]);
    mem.read(b, &mut tail).unwrap();
    assert_eq!(tail, [3, 4]);

    mem.unmap_locked_pages(&mapping);
    assert_eq!(mem.active_temporary_mappings(), 0);
    assert!(matches!(
        mem.read(mapping.base, &mut buf),
        Err(MemoryError::Unbacked { .. })
    ));
}

#[test]
fn permanent_mapping_is_reused_and_never_torn_down() {
    let mem = HostSystemMemory::new();
    let a = mem.allocate_pages(2);
    let chain = mem.create_chain(vec![PageRun::new(a, 2 * PAGE_SIZE)]);

    let base = mem.map_permanently(chain).unwrap();
    let mapping = mem.map_locked_pages(chain).unwrap();
    assert!(mapping.already_mapped);
    assert_eq!(mapping.base, base);
    assert_eq!(mem.active_temporary_mappings(), 0);

    mem.unmap_locked_pages(&mapping);
    mem.write(base, &[9]).unwrap();
    let mut one = [0u8; 1];
    mem.read(a, &mut one).unwrap();
    assert_eq!(one, [9]);
}

#[test]
fn non_resident_chain_does_not_map() {
    let mem = HostSystemMemory::new();
    let a = mem.allocate_pages(1);
    let chain = mem.create_chain(vec![PageRun::new(a, PAGE_SIZE), PageRun::new(0x7000_0000, PAGE_SIZE)]);
    assert_eq!(mem.map_locked_pages(chain), None);

    let freed = mem.allocate_pages(1);
    let chain = mem.create_chain(vec![PageRun::new(freed, PAGE_SIZE)]);
    mem.free_pages(freed, 1);
    assert_eq!(mem.map_locked_pages(chain), None);

    assert_eq!(mem.active_temporary_mappings(), 0);
}

proptest! {
    #[test]
    fn mapped_reads_match_page_reads(offset in 0u64..(3 * PAGE_SIZE - 16), byte in any::<u8>()) {
        let mem = HostSystemMemory::new();
        let a = mem.allocate_pages(1);
        let b = mem.allocate_pages(2);
        let chain = mem.create_chain(vec![PageRun::new(a, PAGE_SIZE), PageRun::new(b, 2 * PAGE_SIZE)]);
        let mapping = mem.map_locked_pages(chain).unwrap();

        mem.write(mapping.base + offset, &[byte; 16]).unwrap();

        let (page_va, page_off) = if offset < PAGE_SIZE {
            (a, offset)
        } else {
            (b, offset - PAGE_SIZE)
        };
        let mut first = [0u8; 1];
        mem.read(page_va + page_off, &mut first).unwrap();
        prop_assert_eq!(first[0], byte);

        mem.unmap_locked_pages(&mapping);
        prop_assert_eq!(mem.active_temporary_mappings(), 0);
    }
}
