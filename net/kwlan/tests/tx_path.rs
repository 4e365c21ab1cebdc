mod common;

use std::{collections::HashMap, sync::Arc};

use common::*;
use kdma::{DmaMapper, addr_list};
use kwlan::{
    BackpressureCause, Binding, Collaborators, ColorId, DatapathConfig, DropReason,
    FatalCondition, Mode, PeerCaps, PeerIndex, WlanDatapath, hdr::DATA_HDR_LEN,
};
use wlan::{Channel, MacAddress, TransportCaps, WlanError, mock::MockTransport};

fn station() -> Harness {
    let h = Harness::new();
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h
}

#[test]
fn frames_are_pushed_and_completed() {
    let h = station();
    h.credit(0, 5);
    for i in 0..3u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    assert_eq!(h.dp.queued(Mode::Station), 3);

    h.run_tx();
    let pushed = h.pushed_data();
    assert_eq!(pushed.len(), 3);
    for (i, (repr, payload)) in pushed.iter().enumerate() {
        assert_eq!(repr.mode, Mode::Station);
        assert_eq!(repr.peer, PeerIndex(0));
        assert_eq!(repr.tid, 0);
        assert_eq!(repr.color, Some(ColorId(0)));
        assert_eq!(&payload[..6], &mac(1).0);
        assert_eq!(payload[6], i as u8);
    }
    assert_eq!(h.dp.census().data.to_transport, 3);
    assert_eq!(h.dp.in_flight(), 3);
    assert_eq!(h.dp.credits()[0], (Binding::Bound(Mode::Station), 2));

    h.complete_all();
    assert_eq!(h.dp.in_flight(), 0);
    assert_eq!(h.dp.census().data.free, 64);
    let stats = h.dp.stats(Mode::Station);
    assert_eq!(stats.tx_queued, 3);
    assert_eq!(stats.tx_sent, 3);
    assert_eq!(stats.tx_completed, 3);
    assert_eq!(stats.credits_used, 3);
}

#[test]
fn order_is_kept_per_peer_and_category() {
    let h = station();
    h.add_peer(1, Mode::Station, mac(2), PeerCaps::empty());
    for i in 0..24u8 {
        let dst = if i % 2 == 0 { mac(1) } else { mac(2) };
        let priority = if i % 3 == 0 { 6 } else { 0 };
        h.submit(Mode::Station, dst, &[i], priority);
    }

    let mut sent = Vec::new();
    for _ in 0..20 {
        if sent.len() == 24 {
            break;
        }
        h.credit(0, 5);
        h.run_tx();
        let round = h.drain_data();
        assert!(round.len() <= 5);
        sent.extend(round);
    }
    assert_eq!(sent.len(), 24);

    let mut per_queue: HashMap<(PeerIndex, u8), Vec<u8>> = HashMap::new();
    for (repr, payload) in sent {
        per_queue.entry((repr.peer, repr.tid)).or_default().push(payload[6]);
    }
    for (key, bodies) in per_queue {
        let mut sorted = bodies.clone();
        sorted.sort();
        assert_eq!(bodies, sorted, "reordered within {:?}", key);
    }
}

#[test]
fn credits_bound_each_cycle() {
    let h = station();
    for i in 0..40u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    h.credit(0, 10);
    h.run_tx();
    assert_eq!(h.drain_data().len(), 10);
    assert_eq!(h.dp.queued(Mode::Station), 30);
    assert!(h.dp.credits().iter().all(|(_, c)| *c == 0));

    h.run_tx();
    assert!(h.drain_data().is_empty());

    h.credit(0, 5);
    h.run_tx();
    assert_eq!(h.drain_data().len(), 5);
    assert_eq!(h.dp.queued(Mode::Station), 25);
}

#[test]
fn unbound_credits_go_to_the_first_mode_that_asks() {
    let h = station();
    h.dp.open_mode(Mode::Ap);
    h.add_peer(1, Mode::Ap, mac(2), PeerCaps::empty());
    for i in 0..40u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    h.credit(0, 10);
    h.run_tx();
    let sent = h.drain_data();
    assert_eq!(sent.len(), 10);
    assert!(sent.iter().all(|(r, _)| r.mode == Mode::Station));

    for i in 0..5u8 {
        h.submit(Mode::Ap, mac(2), &[i], 0);
    }
    h.run_tx();
    assert!(h.drain_data().is_empty());
    assert_eq!(h.dp.queued(Mode::Ap), 5);
    assert_eq!(h.dp.credits()[1], (Binding::Bound(Mode::Ap), 0));

    h.credit(1, 5);
    h.run_tx();
    let sent = h.drain_data();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|(r, _)| r.mode == Mode::Ap));
    assert_eq!(h.dp.queued(Mode::Station), 30);
}

#[test]
fn expired_frames_are_dropped_while_scheduling() {
    let h = station();
    for i in 0..3u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    let out = h.dp.tx_cycle();
    assert!(!out.work);
    assert_eq!(out.next_wake, Some(ms(1000)));

    h.clock.advance(ms(1001));
    h.run_tx();
    assert_eq!(h.dp.queued(Mode::Station), 0);
    assert_eq!(h.ns.drops_for(DropReason::Expired), 3);
    assert_eq!(h.dp.stats(Mode::Station).tx_expired, 3);
    assert_eq!(h.dp.census().data.free, 64);
}

#[test]
fn destinations_route_to_peers() {
    let h = station();
    h.dp.open_mode(Mode::Ap);

    h.submit(Mode::Ap, mac(7), b"x", 0);
    assert_eq!(h.dp.queued(Mode::Ap), 0);
    assert_eq!(h.ns.drops_for(DropReason::NoPeer), 1);

    h.submit(Mode::Station, mac(9), b"x", 0);
    assert_eq!(h.dp.queued_for(Mode::Station, PeerIndex(0)), 1);

    h.submit(Mode::Ap, MacAddress::BROADCAST, b"x", 0);
    let group = Mode::Ap.group_peer();
    assert_eq!(h.dp.queued_for(Mode::Ap, group), 1);

    h.credit(0, 1);
    h.credit(1, 1);
    h.run_tx();
    let peers: Vec<PeerIndex> = h.drain_data().iter().map(|(r, _)| r.peer).collect();
    assert!(peers.contains(&group));
    assert!(peers.contains(&PeerIndex(0)));
}

#[test]
fn exhausted_pool_hands_frames_back() {
    let config = DatapathConfig {
        data_msgs: 8,
        low_watermark: 2,
        start_watermark: 4,
        ..small_config()
    };
    let h = Harness::with(config, dma_caps());
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    for i in 0..8u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    assert_eq!(*h.ns.stopped.lock().unwrap(), vec![Mode::Station]);

    let refused = h.dp.submit(h.frame(mac(1), b"late"), Mode::Station, 0).unwrap_err();
    assert_eq!(refused.cause, BackpressureCause::PoolExhausted);
    assert_eq!(&refused.frame.payload()[6..], b"late");
    assert_eq!(h.ns.stopped.lock().unwrap().len(), 1);

    h.credit(0, 8);
    h.run_tx();
    h.complete_all();
    assert_eq!(*h.ns.woken.lock().unwrap(), vec![Mode::Station]);
    h.dp.submit(refused.frame, Mode::Station, 0).unwrap();
}

#[test]
fn closed_modes_and_asserted_links_refuse_frames() {
    let h = station();
    let refused = h.dp.submit(h.frame(mac(1), b"x"), Mode::Ap, 0).unwrap_err();
    assert_eq!(refused.cause, BackpressureCause::ModeClosed);

    h.dp.on_link_assert();
    let refused = h.dp.submit(refused.frame, Mode::Station, 0).unwrap_err();
    assert_eq!(refused.cause, BackpressureCause::LinkDown);
}

#[test]
fn failed_push_is_retried_in_order() {
    let h = station();
    h.credit(0, 3);
    for i in 0..3u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    h.mock.fail_pushes(1);
    assert!(h.dp.tx_cycle().work);
    assert_eq!(h.mock.failed_pushes(), 1);
    assert_eq!(h.dp.staged(), 3);
    assert_eq!(h.dp.in_flight(), 0);
    assert_eq!(h.dp.census().data.queued, 3);

    h.run_tx();
    let bodies: Vec<u8> = h.drain_data().iter().map(|(_, p)| p[6]).collect();
    assert_eq!(bodies, vec![0, 1, 2]);
    assert_eq!(h.dp.global_stats().push_failures, 1);
    assert_eq!(h.dp.global_stats().push_escalations, 0);
}

#[test]
fn repeated_push_failures_flush_everything() {
    let config = DatapathConfig {
        push_failure_limit: 3,
        ..small_config()
    };
    let h = Harness::with(config, dma_caps());
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h.credit(0, 5);
    for i in 0..5u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    h.mock.fail_pushes(10);
    for _ in 0..3 {
        h.dp.tx_cycle();
    }
    assert_eq!(h.dp.staged(), 0);
    assert_eq!(h.ns.drops_for(DropReason::PushFailure), 5);
    assert_eq!(h.dp.global_stats().push_escalations, 1);
    assert_eq!(h.dp.census().data.free, 64);
    // Staged frames give their credit back.
    assert_eq!(h.dp.credits()[0].1, 5);
}

#[test]
fn address_lists_carry_batches() {
    let config = DatapathConfig {
        addr_list_batch: 2,
        ..small_config()
    };
    let h = Harness::with(config, dma_caps() | TransportCaps::ADDR_LIST);
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h.credit(0, 5);
    for i in 0..5u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }
    h.run_tx();

    let pushes = h.mock.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].descs.len(), 3);
    let mut bodies = Vec::new();
    let mut counts = Vec::new();
    for list in &pushes[0].frames {
        let addrs: Vec<_> = addr_list::decode(list).unwrap().collect();
        counts.push(addrs.len());
        for addr in addrs {
            // Identity mapping: the address is the frame.
            let frame = unsafe {
                std::slice::from_raw_parts(addr.as_u64() as *const u8, DATA_HDR_LEN + 7)
            };
            bodies.push(parse_data(frame).1[6]);
        }
    }
    assert_eq!(counts, vec![2, 2, 1]);
    assert_eq!(bodies, vec![0, 1, 2, 3, 4]);
    assert_eq!(h.dp.in_flight(), 8);

    h.complete_all();
    assert_eq!(h.dp.in_flight(), 0);
    assert_eq!(h.dp.census().data.free, 64);
    assert_eq!(h.dp.stats(Mode::Station).tx_completed, 5);
}

#[test]
fn address_lists_fit_into_scarce_slots() {
    let config = DatapathConfig {
        slots: 4,
        addr_list_batch: 2,
        ..small_config()
    };
    let h = Harness::with(config, dma_caps() | TransportCaps::ADDR_LIST);
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h.credit(0, 4);
    for i in 0..4u8 {
        h.submit(Mode::Station, mac(1), &[i], 0);
    }

    let listed = |h: &Harness| -> Vec<u8> {
        let mut bodies = Vec::new();
        for push in h.mock.take_pushes() {
            for list in &push.frames {
                for addr in addr_list::decode(list).unwrap() {
                    let frame = unsafe {
                        std::slice::from_raw_parts(addr.as_u64() as *const u8, DATA_HDR_LEN + 7)
                    };
                    bodies.push(parse_data(frame).1[6]);
                }
            }
            let tokens: Vec<_> = push.descs.iter().map(|d| d.token).collect();
            h.dp.on_tx_complete(push.channel, &tokens);
        }
        bodies
    };

    // Two frames and their list take three of the four slots.
    h.run_tx();
    assert_eq!(h.mock.pushes().len(), 1);
    assert_eq!(h.dp.in_flight(), 3);
    assert_eq!(h.dp.staged(), 2);
    assert_eq!(listed(&h), vec![0, 1]);

    h.run_tx();
    assert_eq!(listed(&h), vec![2, 3]);
    assert_eq!(h.dp.staged(), 0);
    assert_eq!(h.dp.in_flight(), 0);
    assert_eq!(h.dp.stats(Mode::Station).tx_completed, 4);
}

#[test]
fn address_lists_need_two_slots() {
    let config = DatapathConfig {
        slots: 1,
        ..small_config()
    };
    let mapper: Arc<dyn DmaMapper> = Arc::new(kdma::LinearMapper::new(0));
    let result = WlanDatapath::try_new(
        config,
        Collaborators {
            transport: Arc::new(MockTransport::new(dma_caps() | TransportCaps::ADDR_LIST)),
            mapper: Some(mapper),
            netstack: Arc::new(RecordingNetStack::default()),
            firmware: Arc::new(RecordingFirmware::default()),
            clock: Arc::new(ManualClock::default()),
        },
    );
    assert!(matches!(result, Err(WlanError::InvalidInput)));
}

#[test]
fn zero_address_is_fatal_and_nothing_is_sent() {
    let mapper: Arc<dyn DmaMapper> = Arc::new(ZeroMapper);
    let h = Harness::with_mapper(small_config(), dma_caps(), Some(mapper));
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h.credit(0, 1);
    h.submit(Mode::Station, mac(1), b"x", 0);
    h.run_tx();

    assert!(h.mock.pushes().is_empty());
    assert_eq!(*h.fw.fatals.lock().unwrap(), vec![FatalCondition::ZeroAddress]);
    assert_eq!(h.ns.drops_for(DropReason::Fatal), 1);
    assert_eq!(h.dp.global_stats().fatal, 1);
    assert_eq!(h.dp.census().data.free, 64);
    assert_eq!(h.dp.credits()[0].1, 1);
}

#[test]
fn bus_address_transports_need_a_mapper() {
    let result = WlanDatapath::try_new(
        small_config(),
        Collaborators {
            transport: Arc::new(MockTransport::new(dma_caps())),
            mapper: None,
            netstack: Arc::new(RecordingNetStack::default()),
            firmware: Arc::new(RecordingFirmware::default()),
            clock: Arc::new(ManualClock::default()),
        },
    );
    assert!(matches!(result, Err(WlanError::InvalidInput)));
}

#[test]
fn handle_mode_pushes_tokens() {
    let h = Harness::with_mapper(small_config(), TransportCaps::CREDIT_FLOW, None);
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    h.credit(0, 2);
    h.submit(Mode::Station, mac(1), b"a", 0);
    h.submit(Mode::Station, mac(1), b"b", 0);
    h.run_tx();

    let pushes = h.mock.pushes();
    assert_eq!(pushes.len(), 1);
    for d in &pushes[0].descs {
        assert_eq!(d.addr.as_u64(), d.token.as_u64());
    }
    h.complete_all();
    assert_eq!(h.dp.census().data.free, 64);
}

#[test]
fn completing_a_token_twice_is_caught() {
    let h = station();
    h.credit(0, 1);
    h.submit(Mode::Station, mac(1), b"x", 0);
    h.run_tx();
    let tokens = h.mock.pushed_tokens(Channel::DATA);
    h.complete_all();
    h.dp.on_tx_complete(Channel::DATA, &tokens);

    assert_eq!(
        *h.fw.fatals.lock().unwrap(),
        vec![FatalCondition::CorruptHandle(tokens[0])]
    );
    assert_eq!(h.dp.census().data.free, 64);
    assert_eq!(h.dp.stats(Mode::Station).tx_completed, 1);
}

#[test]
fn unlimited_flow_needs_no_credits() {
    let h = Harness::unlimited();
    h.dp.open_mode(Mode::Station);
    h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
    for i in 0..10u8 {
        h.submit(Mode::Station, mac(1), &[i], 3);
    }
    h.run_tx();
    let sent = h.drain_data();
    assert_eq!(sent.len(), 10);
    assert!(sent.iter().all(|(r, _)| r.color.is_none() && r.tid == 3));
}
