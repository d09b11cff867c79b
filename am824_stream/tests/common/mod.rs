#![allow(dead_code)]

use am824_stream::{
    ConnectionError, ConnectionManager, ContextParams, IsoCallback, IsoEvent, IsoPacket, IsoQueue,
    IsoResources, IsoTransport, PcmSamples, PcmSamplesMut, PcmSubstream, Speed, TransportError,
};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A packet as queued by the engine.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub slot: usize,
    pub header_length: usize,
    pub payload: Vec<u8>,
    pub payload_length: usize,
    pub skip: bool,
    pub interrupt: bool,
}

impl SentPacket {
    pub fn quadlet(&self, index: usize) -> u32 {
        let bytes = &self.payload[index * 4..index * 4 + 4];
        u32::from_be_bytes(bytes.try_into().unwrap())
    }

    pub fn dbs(&self) -> u8 {
        (self.quadlet(0) >> 16) as u8
    }

    pub fn dbc(&self) -> u8 {
        self.quadlet(0) as u8
    }

    pub fn source_node_id(&self) -> u8 {
        (self.quadlet(0) >> 24) as u8 & 0x3f
    }

    pub fn fdf(&self) -> u8 {
        (self.quadlet(1) >> 16) as u8
    }

    pub fn syt(&self) -> u16 {
        self.quadlet(1) as u16
    }

    /// Data blocks carried, from the payload length.
    pub fn data_blocks(&self) -> usize {
        match self.dbs() {
            0 => 0,
            dbs => (self.payload.len() - 8) / 4 / dbs as usize,
        }
    }
}

/// State of the mock bus, shared by the transport, its queues and the test.
///
/// The callback and the packet log sit behind separate locks, since the
/// callback queues packets while it runs.
#[derive(Default)]
pub struct MockHub {
    callback: Mutex<Option<IsoCallback>>,
    sent: Mutex<Vec<SentPacket>>,
    pub params: Mutex<Vec<ContextParams>>,
    pub fail_enqueue: AtomicBool,
    pub fail_create: AtomicBool,
    /// Call back once, with no completed packets, from `start`.
    pub fire_on_start: AtomicBool,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub flushes: AtomicUsize,
    cycle: AtomicU32,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        let hub = Self::default();
        hub.fire_on_start.store(true, Ordering::Relaxed);
        Arc::new(hub)
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap().clone()
    }

    /// Packets queued after priming.
    pub fn sent_after_priming(&self, queue_length: usize) -> Vec<SentPacket> {
        self.sent().split_off(queue_length)
    }

    pub fn is_running(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    fn fire(&self, completed: usize, headers: &[u8], payloads: &[&[u8]]) {
        let cycle = self.cycle.fetch_add(completed as u32, Ordering::Relaxed) + completed as u32;

        let event = IsoEvent {
            cycle,
            header_size: 4,
            headers,
            payloads,
        };

        let mut queue = MockQueue { hub: self };

        if let Some(cb) = self.callback.lock().unwrap().as_mut() {
            cb(&event, &mut queue);
        }
    }

    /// Completes `n` transmitted packets.
    pub fn fire_transmit(&self, n: usize) {
        self.fire(n, &vec![0; n * 4], &[]);
    }

    /// Delivers received packets (CIP header included).
    pub fn fire_receive(&self, packets: &[Vec<u8>]) {
        let headers: Vec<u8> = packets
            .iter()
            .flat_map(|p| ((p.len() as u32) << 16).to_be_bytes())
            .collect();

        let payloads: Vec<&[u8]> = packets.iter().map(Vec::as_slice).collect();
        self.fire(packets.len(), &headers, &payloads);
    }
}

struct MockQueue<'a> {
    hub: &'a MockHub,
}

impl IsoQueue for MockQueue<'_> {
    fn enqueue(&mut self, packet: IsoPacket<'_>) -> Result<(), TransportError> {
        enqueue(self.hub, packet)
    }
}

/// A queue handle usable outside the callback.
struct DetachedQueue {
    hub: Arc<MockHub>,
}

impl IsoQueue for DetachedQueue {
    fn enqueue(&mut self, packet: IsoPacket<'_>) -> Result<(), TransportError> {
        enqueue(&self.hub, packet)
    }
}

fn enqueue(hub: &MockHub, packet: IsoPacket<'_>) -> Result<(), TransportError> {
    if hub.fail_enqueue.load(Ordering::Relaxed) {
        return Err(TransportError::QueueFull);
    }

    hub.sent.lock().unwrap().push(SentPacket {
        slot: packet.slot,
        header_length: packet.header_length,
        payload: packet.payload.to_vec(),
        payload_length: packet.payload_length,
        skip: packet.skip,
        interrupt: packet.interrupt,
    });

    Ok(())
}

pub struct MockTransport {
    pub hub: Arc<MockHub>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<MockHub>) {
        let hub = MockHub::new();
        (
            Self {
                hub: Arc::clone(&hub),
            },
            hub,
        )
    }
}

impl IsoTransport for MockTransport {
    type Context = usize;

    fn create(&mut self, params: &ContextParams) -> Result<usize, TransportError> {
        if self.hub.fail_create.load(Ordering::Relaxed) {
            return Err(TransportError::Unavailable("mock".into()));
        }

        let mut all = self.hub.params.lock().unwrap();
        all.push(*params);
        Ok(all.len())
    }

    fn queue_handle(&mut self, _ctx: &usize) -> Box<dyn IsoQueue + Send> {
        Box::new(DetachedQueue {
            hub: Arc::clone(&self.hub),
        })
    }

    fn start(
        &mut self,
        _ctx: &mut usize,
        _cycle: Option<u32>,
        _sync: u32,
        callback: IsoCallback,
    ) -> Result<(), TransportError> {
        *self.hub.callback.lock().unwrap() = Some(callback);
        self.hub.started.fetch_add(1, Ordering::Relaxed);

        if self.hub.fire_on_start.load(Ordering::Relaxed) {
            self.hub.fire(0, &[], &[]);
        }

        Ok(())
    }

    fn flush_completions(&mut self, _ctx: &mut usize) {
        self.hub.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&mut self, _ctx: &mut usize) {
        *self.hub.callback.lock().unwrap() = None;
        self.hub.stopped.fetch_add(1, Ordering::Relaxed);
    }

    fn destroy(&mut self, _ctx: usize) {
        self.hub.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A host PCM buffer. Transmit streams read a ramp, `(frame * channels +
/// channel)` truncated to the sample width, where `frame` is the ring position.
pub struct MockPcm {
    pub buffer_frames: usize,
    pub period_frames: usize,
    pub channels: usize,
    pub periods: AtomicUsize,
    pub aborted: AtomicBool,
    pub reads: Mutex<Vec<(usize, usize)>>,
    pub written: Mutex<Vec<i32>>,
}

impl MockPcm {
    pub fn new(buffer_frames: usize, period_frames: usize, channels: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_frames,
            period_frames,
            channels,
            periods: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            reads: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn ramp(&self, position: usize, index: usize) -> i32 {
        let frame = (position + index / self.channels) % self.buffer_frames;
        (frame * self.channels + index % self.channels) as i32
    }
}

impl PcmSubstream for MockPcm {
    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn read_frames(&self, position: usize, out: PcmSamplesMut<'_>) {
        let frames = out.len() / self.channels;
        self.reads.lock().unwrap().push((position, frames));

        match out {
            PcmSamplesMut::S16(s) => {
                for (i, sample) in s.iter_mut().enumerate() {
                    *sample = self.ramp(position, i) as i16;
                }
            }
            PcmSamplesMut::S32(s) => {
                for (i, sample) in s.iter_mut().enumerate() {
                    *sample = self.ramp(position, i) << 8;
                }
            }
        }
    }

    fn write_frames(&self, _position: usize, samples: PcmSamples<'_>) {
        let mut written = self.written.lock().unwrap();
        match samples {
            PcmSamples::S16(s) => written.extend(s.iter().map(|&x| i32::from(x))),
            PcmSamples::S32(s) => written.extend_from_slice(s),
        }
    }

    fn period_elapsed(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct MockConnection {
    pub resources: Option<IsoResources>,
    pub fail: bool,
    pub established: Vec<usize>,
    pub updates: usize,
    pub breaks: usize,
    pub panic_on_break: bool,
}

impl MockConnection {
    pub fn new(channel: u8) -> Self {
        Self {
            resources: Some(IsoResources {
                channel,
                speed: Speed::S400,
            }),
            ..Default::default()
        }
    }
}

impl ConnectionManager for MockConnection {
    fn establish(&mut self, max_payload: usize) -> Result<IsoResources, ConnectionError> {
        self.established.push(max_payload);
        match self.resources {
            Some(r) if !self.fail => Ok(r),
            _ => Err(ConnectionError::NoChannel),
        }
    }

    fn update(&mut self) -> Result<(), ConnectionError> {
        self.updates += 1;
        if self.fail {
            Err(ConnectionError::NoBandwidth(0))
        } else {
            Ok(())
        }
    }

    fn break_connection(&mut self) {
        self.breaks += 1;
        if self.panic_on_break {
            panic!("device unplugged");
        }
    }
}

/// Builds a received CIP packet.
pub fn cip_packet(dbs: u8, dbc: u8, fdf: u8, syt: u16, quadlets: &[u32]) -> Vec<u8> {
    let q0 = (1u32 << 24) | (u32::from(dbs) << 16) | u32::from(dbc);
    let q1 = 0x9000_0000 | (u32::from(fdf) << 16) | u32::from(syt);

    [q0, q1]
        .iter()
        .chain(quadlets)
        .flat_map(|q| q.to_be_bytes())
        .collect()
}
