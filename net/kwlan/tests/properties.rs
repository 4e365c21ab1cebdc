mod common;

use std::collections::HashMap;

use common::*;
use kdma::{DmaToken, addr_list};
use kwlan::{
    DatapathConfig, Mode, PeerCaps, PeerIndex,
    hdr::{DATA_HDR_LEN, DataRepr, HdrFlags},
};
use proptest::prelude::*;
use wlan::{Channel, TransportCaps, mock::PushRecord};

#[derive(Debug, Clone)]
enum Op {
    Submit { peer: u8, priority: u8 },
    Credit { color: u8, n: u32 },
    Cycle,
    Complete,
    FailPush,
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3u8, 0..8u8).prop_map(|(peer, priority)| Op::Submit { peer, priority }),
        2 => (0..4u8, 0..6u32).prop_map(|(color, n)| Op::Credit { color, n }),
        3 => Just(Op::Cycle),
        2 => Just(Op::Complete),
        1 => Just(Op::FailPush),
        1 => (0..400u64).prop_map(Op::Advance),
    ]
}

/// How the datapath under test talks to its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setup {
    /// Credit flow, one buffer per frame.
    Credit,
    /// Credit flow, frames carried in address lists over a handful of
    /// slots.
    AddrLists,
    /// No credit accounting.
    Unlimited,
}

fn setup() -> impl Strategy<Value = Setup> {
    prop_oneof![Just(Setup::Credit), Just(Setup::AddrLists), Just(Setup::Unlimited)]
}

impl Setup {
    fn harness(self) -> Harness {
        match self {
            Setup::Credit => Harness::new(),
            Setup::AddrLists => {
                let config = DatapathConfig {
                    slots: 5,
                    addr_list_batch: 2,
                    ..small_config()
                };
                Harness::with(config, dma_caps() | TransportCaps::ADDR_LIST)
            }
            Setup::Unlimited => Harness::unlimited(),
        }
    }
}

/// Two station peers, one peer of a second mode.
fn mode_of(peer: u8) -> Mode {
    if peer < 2 { Mode::Station } else { Mode::Ap }
}

/// Data frames carried by `pushes`.
fn carried(setup: Setup, pushes: &[PushRecord]) -> Vec<(DataRepr, Vec<u8>)> {
    let mut out = Vec::new();
    for push in pushes.iter().filter(|p| p.channel == Channel::DATA) {
        for bytes in &push.frames {
            if setup == Setup::AddrLists {
                for addr in addr_list::decode(bytes).unwrap() {
                    // Identity mapping: the address is the frame.
                    let frame = unsafe {
                        std::slice::from_raw_parts(addr.as_u64() as *const u8, DATA_HDR_LEN + 8)
                    };
                    out.push(parse_data(frame));
                }
            } else {
                out.push(parse_data(bytes));
            }
        }
    }
    out
}

/// Test-side ledger of what the datapath was given and what it sent.
#[derive(Default)]
struct Ledger {
    granted: u64,
    accepted: u64,
    completed: u64,
    next_body: u16,
    sent: Vec<(PeerIndex, u8, u16)>,
}

impl Ledger {
    /// Reads then completes everything pushed so far.
    fn take_sent(&mut self, h: &Harness, setup: Setup) {
        let pushes = h.mock.take_pushes();
        for (repr, payload) in carried(setup, &pushes) {
            let body = u16::from_le_bytes([payload[6], payload[7]]);
            self.sent.push((repr.peer, repr.tid, body));
            self.completed += 1;
        }
        for push in pushes {
            let tokens: Vec<DmaToken> = push.descs.iter().map(|d| d.token).collect();
            h.dp.on_tx_complete(push.channel, &tokens);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_traffic_keeps_the_books(
        setup in setup(),
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let h = setup.harness();
        h.dp.open_mode(Mode::Station);
        h.dp.open_mode(Mode::Ap);
        h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
        h.add_peer(1, Mode::Station, mac(2), PeerCaps::empty());
        h.add_peer(2, Mode::Ap, mac(3), PeerCaps::empty());
        let mut ledger = Ledger::default();
        let queued = |h: &Harness| h.dp.queued(Mode::Station) + h.dp.queued(Mode::Ap);

        for op in ops {
            match op {
                Op::Submit { peer, priority } => {
                    let body = ledger.next_body.to_le_bytes();
                    ledger.next_body += 1;
                    if let Some(mut frame) = h.dp.alloc_tx_buf(8) {
                        frame.payload_mut()[..6].copy_from_slice(&mac(peer + 1).0);
                        frame.payload_mut()[6..].copy_from_slice(&body);
                        // Refused frames are simply dropped.
                        if h.dp.submit(frame, mode_of(peer), priority).is_ok() {
                            ledger.accepted += 1;
                        }
                    }
                }
                Op::Credit { color, n } => {
                    h.credit(color, n);
                    ledger.granted += n as u64;
                }
                Op::Cycle => {
                    h.dp.tx_cycle();
                }
                Op::Complete => ledger.take_sent(&h, setup),
                Op::FailPush => h.mock.fail_pushes(1),
                Op::Advance(n) => h.clock.advance(ms(n)),
            }

            let pushed = carried(setup, &h.mock.pushes()).len();
            if setup != Setup::Unlimited {
                // Every granted credit is in a bucket, on a staged frame or
                // spent on a pushed frame.
                let in_buckets: u64 = h.dp.credits().iter().map(|(_, n)| *n as u64).sum();
                prop_assert_eq!(
                    ledger.granted,
                    in_buckets + h.dp.staged() as u64 + pushed as u64 + ledger.completed
                );
            }

            let census = h.dp.census().data;
            prop_assert_eq!(census.total(), 64);
            prop_assert_eq!(census.in_use(), queued(&h) + h.dp.staged() + pushed);
        }

        // With credit to spare, everything accepted is sent or dropped.
        for color in 0..4 {
            h.credit(color, 64);
        }
        for _ in 0..512 {
            if queued(&h) + h.dp.staged() + h.dp.in_flight() == 0 {
                break;
            }
            h.dp.tx_cycle();
            ledger.take_sent(&h, setup);
        }
        prop_assert_eq!(queued(&h) + h.dp.staged() + h.dp.in_flight(), 0);
        let dropped = h.ns.drops.lock().unwrap().len() as u64;
        prop_assert_eq!(ledger.accepted, ledger.sent.len() as u64 + dropped);
        prop_assert_eq!(h.dp.census().data.free, 64);

        let mut last: HashMap<(PeerIndex, u8), u16> = HashMap::new();
        for (peer, tid, body) in ledger.sent {
            if let Some(prev) = last.insert((peer, tid), body) {
                prop_assert!(prev < body, "{:?} tid {} sent {} after {}", peer, tid, body, prev);
            }
        }
    }

    #[test]
    fn any_arrival_order_within_the_window_is_delivered_in_sequence(
        seqs in Just((0..24u16).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let h = Harness::new();
        h.dp.open_mode(Mode::Station);
        h.add_peer(0, Mode::Station, mac(1), PeerCaps::empty());
        // The first frame opens the session at its sequence number.
        h.receive(&rx_data(Mode::Station, 0, 0, 0, 0, HdrFlags::REORDER, &[0, 0]));
        for seq in seqs.iter().map(|s| s + 1) {
            h.receive(&rx_data(Mode::Station, 0, 0, seq, 0, HdrFlags::REORDER, &seq.to_le_bytes()));
        }
        h.run_rx();

        let delivered: Vec<u16> = h
            .ns
            .delivered_payloads()
            .iter()
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        prop_assert_eq!(delivered, (0..=24u16).collect::<Vec<_>>());
        prop_assert_eq!(h.dp.census().rx.free, 64);
    }
}
