use std::ptr::NonNull;

use kdma::{DmaDirection, DmaMapper, DmaRegion, LinearMapper, SlotPool};
use wlan::{
    BufDesc, Channel, FrameBuf, FrameBufPool, TransportCaps, TransportOps, WlanError,
    mock::MockTransport,
};

struct Tx(FrameBuf);

impl DmaRegion for Tx {
    fn dma_region(&self) -> (NonNull<u8>, usize) {
        (self.0.base_ptr(), self.0.frame().len())
    }
}

fn caps() -> TransportCaps {
    TransportCaps::BUS_ADDRESS | TransportCaps::POSTED_RX
}

#[test]
fn pushed_bytes_are_visible_through_identity_mapping() {
    let frames = FrameBufPool::new(4, 256).unwrap();
    let slots: SlotPool<Tx> = SlotPool::with_mapper("tx", 4, std::sync::Arc::new(LinearMapper::new(0)));
    let mock = MockTransport::new(caps());

    let mut buf = frames.alloc_buf().unwrap();
    buf.fill(0, b"payload").unwrap();
    let w = slots.wrap(Tx(buf), DmaDirection::ToDevice).ok().unwrap();
    let desc = BufDesc {
        token: w.token,
        addr: w.addr,
        len: w.len,
        slot: None,
    };
    mock.push_batch(Channel::DATA, &[desc]).unwrap();

    assert_eq!(mock.pushed_frames(Channel::DATA), vec![b"payload".to_vec()]);
    assert_eq!(mock.pushed_tokens(Channel::DATA), vec![w.token]);
    let back = slots.unwrap(w.token).unwrap();
    assert_eq!(back.0.payload(), b"payload");
}

#[test]
fn injected_failures_reject_whole_batches() {
    let mock = MockTransport::new(caps());
    mock.fail_pushes(2);
    assert_eq!(mock.push_batch(Channel::DATA, &[]), Err(WlanError::Io));
    assert_eq!(mock.push_batch(Channel::COMMAND, &[]), Err(WlanError::Io));
    assert_eq!(mock.push_batch(Channel::DATA, &[]), Ok(()));
    assert_eq!(mock.failed_pushes(), 2);
    assert_eq!(mock.pushes().len(), 1);
}

#[test]
fn rx_ring_limits_descriptor_reservations() {
    let mock = MockTransport::new(caps()).with_rx_ring(4, 512);
    let slots = mock.alloc_buffer_descriptors(Channel::RX, 10).unwrap();
    assert_eq!(slots.len(), 4);
    assert!(slots.iter().all(|s| s.capacity == 512));
    assert_eq!(
        mock.alloc_buffer_descriptors(Channel::DATA, 1),
        Err(WlanError::Unsupported)
    );

    let mapper = LinearMapper::new(0);
    let mut byte = 0u8;
    let addr = mapper.map(NonNull::from(&mut byte), 1, DmaDirection::FromDevice);
    let token = kdma::DmaToken::from_raw(1).unwrap();
    let posted: Vec<BufDesc> = slots
        .iter()
        .map(|s| BufDesc {
            token,
            addr,
            len: s.capacity,
            slot: Some(s.index),
        })
        .collect();
    mock.push_batch(Channel::RX, &posted).unwrap();
    assert_eq!(mock.posted_count(), 4);
    assert!(mock.alloc_buffer_descriptors(Channel::RX, 1).unwrap().is_empty());
    assert_eq!(mock.take_posted().len(), 4);
}
