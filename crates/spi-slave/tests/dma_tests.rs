use spi_slave::dma::{
    descriptors_for, link, DescriptorStorage, DmaDescriptor,
    DESCRIPTOR_MAX_BYTES,
};
use spi_slave::Exhausted;

fn chain(count: usize) -> Vec<DmaDescriptor> {
    (0..count).map(|_| DmaDescriptor::default()).collect()
}

#[test]
fn descriptor_count_for_sizes() {
    assert_eq!(descriptors_for(0), 1);
    assert_eq!(descriptors_for(1), 1);
    assert_eq!(descriptors_for(DESCRIPTOR_MAX_BYTES), 1);
    assert_eq!(descriptors_for(DESCRIPTOR_MAX_BYTES + 1), 2);
    assert_eq!(descriptors_for(3 * DESCRIPTOR_MAX_BYTES), 3);
}

#[test]
fn long_buffer_is_split_across_linked_descriptors() {
    let mut buffer = vec![0u8; 10_000];
    let mut descs = chain(4);
    let base = buffer.as_mut_ptr();

    let used = link(&mut descs, base, buffer.len(), false).unwrap();
    assert_eq!(used, 3);

    let lengths: Vec<_> = descs[..3].iter().map(|d| d.length()).collect();
    assert_eq!(lengths, vec![4092, 4092, 1816]);
    assert!(descs[..3].iter().all(|d| d.owned_by_dma()));
    assert!(descs[..3].iter().all(|d| d.size() == d.length()));

    assert_eq!(descs[0].buffer(), base as *const u8);
    assert_eq!(descs[1].buffer(), base.wrapping_add(4092) as *const u8);
    assert_eq!(descs[2].buffer(), base.wrapping_add(8184) as *const u8);

    assert!(!descs[0].is_eof());
    assert!(!descs[1].is_eof());
    assert!(descs[2].is_eof());
    assert_eq!(descs[0].next(), &descs[1] as *const DmaDescriptor);
    assert_eq!(descs[1].next(), &descs[2] as *const DmaDescriptor);
    assert!(descs[2].next().is_null());

    // Spare descriptors are left alone.
    assert!(!descs[3].owned_by_dma());
}

#[test]
fn receive_chunks_round_up_to_words() {
    let mut buffer = [0u32; 2];
    let mut descs = chain(1);

    link(&mut descs, buffer.as_mut_ptr().cast(), 6, true).unwrap();
    assert_eq!(descs[0].length(), 6);
    assert_eq!(descs[0].size(), 8);
    assert!(descs[0].is_eof());
}

#[test]
fn empty_buffer_needs_no_descriptor() {
    let mut descs = chain(1);
    assert_eq!(link(&mut descs, core::ptr::null_mut(), 0, false), Ok(0));
    assert!(!descs[0].owned_by_dma());
}

#[test]
fn short_chain_is_rejected() {
    let mut buffer = vec![0u8; 3 * DESCRIPTOR_MAX_BYTES];
    let mut descs = chain(2);

    let err = link(&mut descs, buffer.as_mut_ptr(), buffer.len(), false)
        .unwrap_err();
    assert_eq!(err, Exhausted::Descriptors { needed: 3, available: 2 });
}

#[test]
fn storage_reserves_against_the_shorter_chain() {
    let tx: &'static mut [DmaDescriptor] = Box::leak(chain(3).into());
    let rx: &'static mut [DmaDescriptor] = Box::leak(chain(2).into());
    let storage = DescriptorStorage::new(tx, rx);

    assert_eq!(storage.capacity_bytes(), 2 * DESCRIPTOR_MAX_BYTES);
    assert_eq!(storage.reserve(2 * DESCRIPTOR_MAX_BYTES), Ok(()));
    assert_eq!(
        storage.reserve(2 * DESCRIPTOR_MAX_BYTES + 1),
        Err(Exhausted::Descriptors { needed: 3, available: 2 })
    );
}
