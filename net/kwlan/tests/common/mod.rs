#![allow(dead_code)]

use std::{
    ptr::NonNull,
    sync::{Arc, Mutex},
    time::Duration,
};

use kdma::{DmaBusAddress, DmaDirection, DmaMapper, DmaToken, LinearMapper};
use kwlan::{
    Clock, CmdKind, Collaborators, ColorId, CreditReport, DatapathConfig, DropReason, FatalCondition,
    FirmwareIf, FlowMode, Mode, NetStackIf, PeerCaps, PeerDesc, PeerEvent, PeerIndex,
    WlanDatapath,
    hdr::{COMMON_LEN, CommandRepr, DataRepr, HdrFlags, HostRepr, encode_credit_deltas},
};
use wlan::{
    Channel, FrameBuf, FrameBufPool, MacAddress, RxBuffer, TransportCaps, mock::MockTransport,
};

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock(Mutex<Duration>);

impl ManualClock {
    pub fn advance(&self, d: Duration) {
        *self.0.lock().unwrap() += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingNetStack {
    pub stopped: Mutex<Vec<Mode>>,
    pub woken: Mutex<Vec<Mode>>,
    pub delivered: Mutex<Vec<(Mode, PeerIndex, Vec<u8>)>>,
    pub drops: Mutex<Vec<(Mode, DropReason)>>,
}

impl RecordingNetStack {
    pub fn delivered_payloads(&self) -> Vec<Vec<u8>> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, p)| p.clone())
            .collect()
    }

    pub fn drops_for(&self, reason: DropReason) -> usize {
        self.drops
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| *r == reason)
            .count()
    }
}

impl NetStackIf for RecordingNetStack {
    fn stop_queue(&self, mode: Mode) {
        self.stopped.lock().unwrap().push(mode);
    }

    fn wake_queue(&self, mode: Mode) {
        self.woken.lock().unwrap().push(mode);
    }

    fn deliver(&self, mode: Mode, peer: PeerIndex, frame: FrameBuf) {
        self.delivered
            .lock()
            .unwrap()
            .push((mode, peer, frame.payload().to_vec()));
    }

    fn on_tx_drop(&self, mode: Mode, reason: DropReason) {
        self.drops.lock().unwrap().push((mode, reason));
    }
}

pub const ADDBA: u8 = 0xad;
pub const DELBA: u8 = 0xde;

#[derive(Default)]
pub struct RecordingFirmware {
    pub responses: Mutex<Vec<(u16, Vec<u8>)>>,
    pub dropped: Mutex<Vec<(u16, CmdKind)>>,
    pub events: Mutex<Vec<(Mode, Vec<u8>)>>,
    pub fatals: Mutex<Vec<FatalCondition>>,
}

impl FirmwareIf for RecordingFirmware {
    fn encode_addba(&self, peer: PeerIndex, _addr: MacAddress, tid: u8) -> Vec<u8> {
        vec![ADDBA, peer.0, tid]
    }

    fn encode_delba(&self, peer: PeerIndex, _addr: MacAddress, tid: u8) -> Vec<u8> {
        vec![DELBA, peer.0, tid]
    }

    fn on_command_response(&self, seq: u16, payload: &[u8]) {
        self.responses.lock().unwrap().push((seq, payload.to_vec()));
    }

    fn on_command_dropped(&self, seq: u16, kind: CmdKind) {
        self.dropped.lock().unwrap().push((seq, kind));
    }

    fn on_event(&self, mode: Mode, payload: &[u8]) {
        self.events.lock().unwrap().push((mode, payload.to_vec()));
    }

    fn on_fatal(&self, condition: FatalCondition) {
        self.fatals.lock().unwrap().push(condition);
    }
}

/// A mapper whose translations always fail.
pub struct ZeroMapper;

impl DmaMapper for ZeroMapper {
    fn map(&self, _cpu: NonNull<u8>, _len: usize, _dir: DmaDirection) -> DmaBusAddress {
        DmaBusAddress::ZERO
    }
}

pub fn small_config() -> DatapathConfig {
    DatapathConfig {
        data_msgs: 64,
        cmd_msgs: 8,
        rx_msgs: 64,
        slots: 128,
        frame_bufs: 256,
        frame_buf_len: 512,
        low_watermark: 4,
        start_watermark: 8,
        rx_post_target: 8,
        rx_refill_batch: 4,
        ..DatapathConfig::default()
    }
}

pub fn dma_caps() -> TransportCaps {
    TransportCaps::BUS_ADDRESS | TransportCaps::CREDIT_FLOW
}

pub struct Harness {
    pub dp: Arc<WlanDatapath>,
    pub mock: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub ns: Arc<RecordingNetStack>,
    pub fw: Arc<RecordingFirmware>,
    /// Buffers for injecting inline receptions.
    pub rx_bufs: Arc<FrameBufPool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(small_config(), dma_caps())
    }

    pub fn with(config: DatapathConfig, caps: TransportCaps) -> Self {
        let mapper: Arc<dyn DmaMapper> = Arc::new(LinearMapper::new(0));
        Self::with_mapper(config, caps, Some(mapper))
    }

    pub fn unlimited() -> Self {
        let config = DatapathConfig {
            flow_mode: FlowMode::Unlimited,
            ..small_config()
        };
        Self::with(config, TransportCaps::BUS_ADDRESS)
    }

    pub fn with_mapper(
        config: DatapathConfig,
        caps: TransportCaps,
        mapper: Option<Arc<dyn DmaMapper>>,
    ) -> Self {
        let mock = Arc::new(MockTransport::new(caps).with_rx_ring(16, 512));
        let clock = Arc::new(ManualClock::default());
        let ns = Arc::new(RecordingNetStack::default());
        let fw = Arc::new(RecordingFirmware::default());
        let dp = WlanDatapath::try_new(
            config,
            Collaborators {
                transport: mock.clone(),
                mapper,
                netstack: ns.clone(),
                firmware: fw.clone(),
                clock: clock.clone(),
            },
        )
        .unwrap();
        Self {
            dp: Arc::new(dp),
            mock,
            clock,
            ns,
            fw,
            rx_bufs: FrameBufPool::new(64, 512).unwrap(),
        }
    }

    pub fn add_peer(&self, index: u8, mode: Mode, addr: MacAddress, caps: PeerCaps) {
        self.dp
            .on_peer_event(PeerEvent::Add(PeerDesc {
                index: PeerIndex(index),
                mode,
                addr,
                caps,
            }))
            .unwrap();
    }

    /// Grants `n` credits on `color`.
    pub fn credit(&self, color: u8, n: u32) {
        self.dp
            .on_credit_report(CreditReport::Deltas(vec![(ColorId(color), n)]));
    }

    /// A frame for `dst` whose body is `body`.
    pub fn frame(&self, dst: MacAddress, body: &[u8]) -> FrameBuf {
        let mut buf = self.dp.alloc_tx_buf(6 + body.len()).unwrap();
        buf.payload_mut()[..6].copy_from_slice(&dst.0);
        buf.payload_mut()[6..].copy_from_slice(body);
        buf
    }

    pub fn submit(&self, mode: Mode, dst: MacAddress, body: &[u8], priority: u8) {
        let frame = self.frame(dst, body);
        self.dp.submit(frame, mode, priority).unwrap();
    }

    /// Every frame pushed on the data channel so far, parsed.
    pub fn pushed_data(&self) -> Vec<(DataRepr, Vec<u8>)> {
        self.mock
            .pushed_frames(Channel::DATA)
            .iter()
            .map(|f| parse_data(f))
            .collect()
    }

    /// Takes the pushed data frames, completing every push as the device
    /// would.
    pub fn drain_data(&self) -> Vec<(DataRepr, Vec<u8>)> {
        let frames = self.pushed_data();
        self.complete_all();
        frames
    }

    /// Completes every push recorded so far.
    pub fn complete_all(&self) {
        for push in self.mock.take_pushes() {
            let tokens: Vec<DmaToken> = push.descs.iter().map(|d| d.token).collect();
            self.dp.on_tx_complete(push.channel, &tokens);
        }
    }

    /// Runs TX cycles until one does no work.
    pub fn run_tx(&self) {
        for _ in 0..64 {
            if !self.dp.tx_cycle().work {
                return;
            }
        }
        panic!("tx cycle never settled");
    }

    pub fn run_rx(&self) {
        for _ in 0..64 {
            if !self.dp.rx_cycle().work {
                return;
            }
        }
        panic!("rx cycle never settled");
    }

    /// Injects received bytes as an inline buffer.
    pub fn receive(&self, bytes: &[u8]) {
        let mut buf = self.rx_bufs.alloc_buf().unwrap();
        buf.fill(0, bytes).unwrap();
        self.dp.on_rx_batch(Channel::RX, vec![RxBuffer::Inline(buf)]);
    }
}

pub fn mac(last: u8) -> MacAddress {
    MacAddress([0x02, 0, 0, 0, 0, last])
}

pub fn parse_data(frame: &[u8]) -> (DataRepr, Vec<u8>) {
    match HostRepr::parse(frame).unwrap() {
        HostRepr::Data(d) => {
            let start = kwlan::hdr::DATA_HDR_LEN;
            (d, frame[start..start + d.payload_len as usize].to_vec())
        }
        other => panic!("expected a data frame, got {:?}", other),
    }
}

/// Bytes of a received data frame.
pub fn rx_data(mode: Mode, peer: u8, tid: u8, seq: u16, frag: u8, flags: HdrFlags, body: &[u8]) -> Vec<u8> {
    let repr = HostRepr::Data(DataRepr {
        mode,
        flags,
        peer: PeerIndex(peer),
        tid,
        color: None,
        seq,
        frag,
        payload_len: body.len() as u16,
    });
    encode(repr, body)
}

/// Bytes of a command response.
pub fn rx_response(mode: Mode, seq: u16, body: &[u8]) -> Vec<u8> {
    encode(
        HostRepr::Command(CommandRepr {
            mode,
            seq,
            payload_len: body.len() as u16,
        }),
        body,
    )
}

/// Bytes of a credit report.
pub fn rx_credits(deltas: &[u16]) -> Vec<u8> {
    let body = encode_credit_deltas(deltas);
    encode(
        HostRepr::Credit {
            reset: false,
            payload_len: body.len() as u16,
        },
        &body,
    )
}

pub fn encode(repr: HostRepr, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; repr.header_len() + body.len()];
    repr.emit(&mut out).unwrap();
    out[repr.header_len()..].copy_from_slice(body);
    assert!(out.len() >= COMMON_LEN);
    out
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
