//! The packet engine: everything that runs inside the transport callback.
//!
//! A [`PacketEngine`] is built when a stream starts, primes the transport's
//! queue, and is then moved into the transport callback, where it lives until
//! the stream stops. It shares a few fields with the controlling thread
//! through [`StreamShared`], none of which it ever waits on.

use crate::{
    am824::Am824Codec,
    error::TransportError,
    host::{MidiPort, PcmBuffer, PcmSubstream},
    options::{StreamOptions, TransmitMode},
    scheduler::{DataBlockScheduler, blocking_block_count},
    syt::SytGenerator,
    transport::{IsoEvent, IsoPacket, IsoQueue},
};
use am824_proto::{
    Direction, StreamConfig,
    cip::{self, CipHeader, FDF_NO_DATA},
    compat,
    format::MAX_MIDI_PORTS,
};
use am824_utils::{
    Latch,
    handoff::{HandoffCell, TriggerMask},
    queue::PeriodicCounter,
};
use core::{num, sync::atomic};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Size of the per-packet header the transport reports to the engine.
pub(crate) const ISO_HEADER_SIZE: usize = 4;

/// Lifecycle of a stream, as seen from both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    /// Started, waiting for the first callback.
    Starting = 1,
    Running = 2,
    /// A packet could not be queued. Stays so until the stream is stopped.
    Faulted = 3,
    Stopping = 4,
}

impl StreamState {
    #[inline(always)]
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Faulted,
            4 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    #[inline(always)]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Faulted => "faulted",
            Self::Stopping => "stopping",
        }
    }
}

/// Counters of a stream since it was last started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamStats {
    pub packets: u64,
    pub data_blocks: u64,
    pub no_data_packets: u64,
    pub malformed_packets: u64,
    pub discontinuities: u64,
    pub midi_framing_errors: u64,
}

#[derive(Debug, Default)]
struct AtomicStats {
    packets: atomic::AtomicU64,
    data_blocks: atomic::AtomicU64,
    no_data_packets: atomic::AtomicU64,
    malformed_packets: atomic::AtomicU64,
    discontinuities: atomic::AtomicU64,
    midi_framing_errors: atomic::AtomicU64,
}

#[inline(always)]
fn bump(counter: &atomic::AtomicU64, n: u64) {
    counter.fetch_add(n, atomic::Ordering::Relaxed);
}

impl AtomicStats {
    fn snapshot(&self) -> StreamStats {
        let get = |c: &atomic::AtomicU64| c.load(atomic::Ordering::Relaxed);

        StreamStats {
            packets: get(&self.packets),
            data_blocks: get(&self.data_blocks),
            no_data_packets: get(&self.no_data_packets),
            malformed_packets: get(&self.malformed_packets),
            discontinuities: get(&self.discontinuities),
            midi_framing_errors: get(&self.midi_framing_errors),
        }
    }

    fn reset(&self) {
        for c in [
            &self.packets,
            &self.data_blocks,
            &self.no_data_packets,
            &self.malformed_packets,
            &self.discontinuities,
            &self.midi_framing_errors,
        ] {
            c.store(0, atomic::Ordering::Relaxed);
        }
    }
}

/// State shared between a stream's controlling thread and its callback.
///
/// Every field has a single writer. The host side binds handles and flips
/// trigger bits, the callback moves the buffer position and the counters.
pub(crate) struct StreamShared {
    state: atomic::AtomicU8,
    source_node_id: atomic::AtomicU8,
    pub(crate) pcm: HandoffCell<Arc<dyn PcmSubstream>>,
    pcm_rebound: atomic::AtomicBool,
    pub(crate) midi: Box<[HandoffCell<Arc<dyn MidiPort>>]>,
    pub(crate) midi_triggers: TriggerMask,
    buffer_position: atomic::AtomicUsize,
    pub(crate) pointer_flush: atomic::AtomicBool,
    pub(crate) first_callback: Latch,
    stats: AtomicStats,
}

impl StreamShared {
    pub(crate) fn new() -> Self {
        Self {
            state: atomic::AtomicU8::new(StreamState::Idle as u8),
            source_node_id: atomic::AtomicU8::new(0),
            pcm: HandoffCell::empty(),
            pcm_rebound: atomic::AtomicBool::new(false),
            midi: (0..MAX_MIDI_PORTS).map(|_| HandoffCell::empty()).collect(),
            midi_triggers: TriggerMask::new(),
            buffer_position: atomic::AtomicUsize::new(0),
            pointer_flush: atomic::AtomicBool::new(false),
            first_callback: Latch::new(),
            stats: AtomicStats::default(),
        }
    }

    #[inline(always)]
    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(atomic::Ordering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, atomic::Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Called at the top of every callback. Returns whether packets should be
    /// processed.
    #[inline]
    pub(crate) fn on_callback(&self) -> bool {
        let first = self
            .state
            .compare_exchange(
                StreamState::Starting as u8,
                StreamState::Running as u8,
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
            )
            .is_ok();

        if first {
            self.first_callback.raise();
        }

        self.is_running()
    }

    #[inline(always)]
    pub(crate) fn source_node_id(&self) -> u8 {
        self.source_node_id.load(atomic::Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_source_node_id(&self, id: u8) {
        self.source_node_id.store(id, atomic::Ordering::Relaxed);
    }

    pub(crate) fn bind_pcm(&self, handle: Option<Arc<dyn PcmSubstream>>) {
        self.pcm.store(handle.map(Arc::new));
        self.pcm_rebound.store(true, atomic::Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn buffer_position(&self) -> usize {
        self.buffer_position.load(atomic::Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    /// Prepares for a new run.
    pub(crate) fn reset(&self) {
        self.stats.reset();
        self.first_callback.reset();
        self.buffer_position.store(0, atomic::Ordering::Release);
        self.pointer_flush.store(false, atomic::Ordering::Release);
    }

    /// Marks a started stream faulted, and tells the host.
    ///
    /// Returns `false`, doing nothing, if the stream is not starting or
    /// running, so a stream that is being stopped never ends up faulted.
    pub(crate) fn fault(&self) -> bool {
        let faulted = self
            .state
            .fetch_update(atomic::Ordering::AcqRel, atomic::Ordering::Acquire, |s| {
                matches!(
                    StreamState::from_u8(s),
                    StreamState::Starting | StreamState::Running
                )
                .then_some(StreamState::Faulted as u8)
            })
            .is_ok();

        if faulted {
            if let Some(pcm) = self.pcm.load().as_deref() {
                pcm.abort();
            }
        }

        faulted
    }
}

/// A transmit stream timed by another stream's callback.
pub(crate) struct SlaveStream {
    pub(crate) engine: PacketEngine,
    pub(crate) queue: Box<dyn IsoQueue + Send>,
}

impl SlaveStream {
    /// Queues one packet on the slave's context, timed by its master.
    #[inline]
    fn drive(&mut self, syt: Option<u16>) {
        if let Err(e) = self.engine.queue_transmit_packet(syt, &mut *self.queue) {
            log::error!("failed to queue packet of slave stream: {e}");
            self.engine.shared.fault();
        }
    }
}

/// How this engine relates to other streams.
pub(crate) enum Coupling {
    Independent,
    /// Drives the slave parked in the link, while it runs.
    Master(Arc<CouplingLink>),
}

impl Coupling {
    #[inline]
    fn drive_slave(&self, syt: Option<u16>) {
        if let Self::Master(link) = self {
            link.drive(syt);
        }
    }

    fn abort_slave(&self) {
        if let Self::Master(link) = self {
            link.abort_slave();
        }
    }
}

/// Rendezvous between a master stream and its slave, across restarts of
/// either.
///
/// The slave's engine is parked here from the slave's start to its stop,
/// whatever the master does meanwhile. The master's callback only ever
/// try-locks it, controlling threads take the lock to park or reclaim it.
pub(crate) struct CouplingLink {
    slave: parking_lot::Mutex<Option<SlaveStream>>,
    slave_shared: Arc<StreamShared>,
}

impl CouplingLink {
    pub(crate) fn new(slave_shared: Arc<StreamShared>) -> Self {
        Self {
            slave: parking_lot::Mutex::new(None),
            slave_shared,
        }
    }

    /// Called when the slave starts, hands its engine over to the master.
    pub(crate) fn attach_slave(&self, slave: SlaveStream) {
        *self.slave.lock() = Some(slave);
    }

    /// Called when the slave stops. Once this returns, the master's callback
    /// no longer touches the slave's queue, and the engine is freed by the
    /// caller.
    pub(crate) fn detach_slave(&self) -> Option<SlaveStream> {
        self.slave.lock().take()
    }

    /// Queues one slave packet, if the slave runs. Skipped while a
    /// controlling thread holds the link, the slave is then starting or
    /// stopping anyway.
    #[inline]
    fn drive(&self, syt: Option<u16>) {
        let Some(mut slave) = self.slave.try_lock() else {
            return;
        };

        if let Some(slave) = slave.as_mut().filter(|s| s.engine.shared.is_running()) {
            slave.drive(syt);
        }
    }

    fn abort_slave(&self) {
        if self.slave_shared.fault() {
            log::error!("master stream faulted, slave stream aborted");
        }
    }
}

/// Per-stream packet state machine.
pub(crate) struct PacketEngine {
    config: StreamConfig,
    options: StreamOptions,
    shared: Arc<StreamShared>,
    codec: Am824Codec,
    scheduler: DataBlockScheduler,
    syt: SytGenerator,
    /// Transmit: counter of the next packet. Receive: counter the next packet
    /// should carry, `None` before the first one.
    dbc: Option<u8>,
    packet_index: PeriodicCounter,
    interrupts: PeriodicCounter,
    slots: Box<[Box<[u8]>]>,
    pcm_scratch: PcmBuffer,
    host_period: Option<PeriodicCounter>,
    coupling: Coupling,
}

impl PacketEngine {
    pub(crate) fn new(
        config: StreamConfig,
        options: StreamOptions,
        shared: Arc<StreamShared>,
        coupling: Coupling,
    ) -> Self {
        let sfc = config.sfc();

        let dbc = match config.direction() {
            Direction::Transmit => Some(0),
            Direction::Receive => None,
        };

        let max_frames = options.max_data_blocks(&config) as usize;
        let max_payload = options.max_payload_bytes(&config);
        let queue_length = options.queue_length;

        Self {
            codec: Am824Codec::new(&config),
            scheduler: DataBlockScheduler::new(sfc),
            syt: SytGenerator::new(sfc, options.transfer_delay(&config)),
            dbc,
            packet_index: PeriodicCounter::new(queue_length),
            interrupts: PeriodicCounter::new(options.interrupt_interval),
            slots: (0..queue_length.get())
                .map(|_| vec![0; max_payload].into_boxed_slice())
                .collect(),
            pcm_scratch: PcmBuffer::new(config.width(), config.frames_to_samples(max_frames)),
            host_period: None,
            coupling,
            config,
            options,
            shared,
        }
    }

    #[inline(always)]
    pub(crate) fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    #[inline(always)]
    pub(crate) fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline(always)]
    fn next_interrupt(&mut self) -> bool {
        self.interrupts.advance(1) != 0
    }

    /// Fills the queue with `queue_length` packets that carry nothing: skipped
    /// cycles for transmit, empty buffers for receive.
    pub(crate) fn prime(&mut self, queue: &mut dyn IsoQueue) -> Result<(), TransportError> {
        for _ in 0..self.options.queue_length.get() {
            let slot = self.packet_index.next();
            let interrupt = self.next_interrupt();

            let packet = match self.config.direction() {
                Direction::Transmit => IsoPacket {
                    slot,
                    header_length: 0,
                    payload: &[],
                    payload_length: 0,
                    skip: true,
                    interrupt,
                },
                Direction::Receive => IsoPacket {
                    slot,
                    header_length: ISO_HEADER_SIZE,
                    payload: &[],
                    payload_length: self.options.max_payload_bytes(&self.config),
                    skip: false,
                    interrupt,
                },
            };

            queue.enqueue(packet)?;
        }

        Ok(())
    }

    /// Entry point of the transport callback.
    pub(crate) fn process(&mut self, event: &IsoEvent<'_>, queue: &mut dyn IsoQueue) {
        if !self.shared.on_callback() {
            return;
        }

        let res = match self.config.direction() {
            Direction::Transmit => self.process_transmit(event, queue),
            Direction::Receive => self.process_receive(event, queue),
        };

        if let Err(e) = res {
            log::error!("failed to queue packet, stopping stream: {e}");
            self.shared.fault();
            self.coupling.abort_slave();
        }
    }

    fn process_transmit(
        &mut self,
        event: &IsoEvent<'_>,
        queue: &mut dyn IsoQueue,
    ) -> Result<(), TransportError> {
        let completed = event.completed();
        let queue_length = self.options.queue_length.get();

        // cycle of the packet we are about to queue, minus one
        let mut cycle = event
            .cycle
            .wrapping_add(queue_length as u32)
            .wrapping_sub(completed as u32);

        for _ in 0..completed {
            cycle = cycle.wrapping_add(1);
            let syt = self.syt.next_syt(cycle);

            self.queue_transmit_packet(syt, queue)?;

            self.coupling.drive_slave(syt);
        }

        Ok(())
    }

    /// Builds and queues one outgoing packet stamped with `syt`.
    fn queue_transmit_packet(
        &mut self,
        syt: Option<u16>,
        queue: &mut dyn IsoQueue,
    ) -> Result<(), TransportError> {
        self.check_rebound();

        let sfc = self.config.sfc();

        let blocks = match self.options.transmit_mode {
            TransmitMode::NonBlocking => self.scheduler.next_block_count(),
            TransmitMode::Blocking => blocking_block_count(sfc, syt),
        };

        let triggers = self.shared.midi_triggers.snapshot();
        let frames = if self.config.pcm_channels() == 0 && triggers == 0 {
            0
        } else {
            blocks as usize
        };

        let dbc = self.dbc.unwrap_or(0);

        let header = CipHeader {
            source_node_id: self.shared.source_node_id(),
            data_block_quadlets: self.codec.data_block_quadlets() as u8,
            data_block_counter: dbc,
            fdf: if frames == 0 { FDF_NO_DATA } else { sfc.code() },
            syt: cip::syt_to_wire(if frames == 0 { None } else { syt }),
        };

        let slot = self.packet_index.next();
        let interrupt = self.next_interrupt();
        let len = cip::HEADER_SIZE + frames * self.codec.data_block_bytes();

        let pcm_guard = self.shared.pcm.load();
        let pcm = pcm_guard.as_deref().map(|p| &**p);
        let position = self.shared.buffer_position();

        let buf = &mut self.slots[slot];
        header.write_to(buf);

        if frames != 0 {
            let samples = self.config.frames_to_samples(frames);

            let pcm_samples = match pcm {
                Some(pcm) if samples != 0 => {
                    pcm.read_frames(position, self.pcm_scratch.samples_mut(samples));
                    Some(self.pcm_scratch.samples(samples))
                }
                _ => None,
            };

            let midi = &self.shared.midi;
            self.codec
                .encode(&mut buf[cip::HEADER_SIZE..], dbc, frames, pcm_samples, |port| {
                    if triggers & (1 << port) == 0 {
                        return None;
                    }
                    midi.get(port)?.load().as_deref()?.pull()
                });
        }

        queue.enqueue(IsoPacket {
            slot,
            header_length: 0,
            payload: &buf[..len],
            payload_length: len,
            skip: false,
            interrupt,
        })?;

        self.dbc = Some(dbc.wrapping_add(frames as u8));
        self.account(frames);
        self.advance_host_pointers(pcm, frames);

        Ok(())
    }

    fn process_receive(
        &mut self,
        event: &IsoEvent<'_>,
        queue: &mut dyn IsoQueue,
    ) -> Result<(), TransportError> {
        let completed = event.completed();

        for i in 0..completed {
            let payload = event.payloads.get(i).copied().unwrap_or_default();
            let len = event
                .payload_length(i)
                .unwrap_or(payload.len())
                .min(payload.len());

            let syt = self.handle_received_packet(&payload[..len]);

            let slot = self.packet_index.next();
            let interrupt = self.next_interrupt();

            queue.enqueue(IsoPacket {
                slot,
                header_length: ISO_HEADER_SIZE,
                payload: &[],
                payload_length: self.options.max_payload_bytes(&self.config),
                skip: false,
                interrupt,
            })?;

            self.coupling.drive_slave(syt);
        }

        Ok(())
    }

    /// Unpacks one received packet into the host buffers. Returns its SYT.
    fn handle_received_packet(&mut self, packet: &[u8]) -> Option<u16> {
        self.check_rebound();

        let flags = self.options.compat;
        let configured = self.codec.data_block_quadlets() as u8;

        let parsed = CipHeader::parse(packet).and_then(|header| {
            compat::received_data_blocks(flags, &header, packet.len(), configured)
                .map(|blocks| (header, blocks))
        });

        let pcm_guard = self.shared.pcm.load();
        let pcm = pcm_guard.as_deref().map(|p| &**p);
        let position = self.shared.buffer_position();

        let (header, blocks) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("dropping malformed packet: {e}");
                bump(&self.shared.stats.malformed_packets, 1);

                let frames = self.scheduler.next_block_count() as usize;
                let samples = self.config.frames_to_samples(frames);

                if let Some(pcm) = pcm.filter(|_| samples != 0) {
                    self.pcm_scratch.samples_mut(samples).fill_silence();
                    pcm.write_frames(position, self.pcm_scratch.samples(samples));
                }

                self.account(frames);
                self.advance_host_pointers(pcm, frames);
                return None;
            }
        };

        let dbc = compat::effective_data_block_counter(
            flags,
            header.data_block_counter,
            blocks,
            self.dbc,
        );

        if compat::is_discontinuity(flags, dbc, self.dbc, blocks) {
            log::warn!(
                "data block counter discontinuity: expected {:?}, got {dbc:#04x}",
                self.dbc
            );
            bump(&self.shared.stats.discontinuities, 1);
        }

        self.dbc = Some(compat::next_data_block_counter(flags, dbc, blocks));

        let frames = blocks as usize;

        if frames != 0 {
            let samples = self.config.frames_to_samples(frames);
            let pcm = pcm.filter(|_| samples != 0);

            let triggers = self.shared.midi_triggers.snapshot();
            let midi = &self.shared.midi;

            let framing_errors = self.codec.decode(
                &packet[cip::HEADER_SIZE..],
                dbc,
                frames,
                pcm.map(|_| self.pcm_scratch.samples_mut(samples)),
                |port, bytes| {
                    if triggers & (1 << port) == 0 {
                        return;
                    }
                    if let Some(port) = midi.get(port) {
                        if let Some(p) = port.load().as_deref() {
                            p.push(bytes);
                        }
                    }
                },
            );

            if framing_errors != 0 {
                bump(&self.shared.stats.midi_framing_errors, framing_errors.into());
            }

            if let Some(pcm) = pcm {
                pcm.write_frames(position, self.pcm_scratch.samples(samples));
            }
        }

        self.account(frames);
        self.advance_host_pointers(pcm, frames);

        header.syt()
    }

    /// Restarts position and period tracking if the host bound another
    /// buffer. Only the callback writes the position.
    #[inline(always)]
    fn check_rebound(&mut self) {
        if self.shared.pcm_rebound.swap(false, atomic::Ordering::AcqRel) {
            self.shared
                .buffer_position
                .store(0, atomic::Ordering::Release);
            self.host_period = None;
        }
    }

    #[inline]
    fn account(&self, frames: usize) {
        let stats = &self.shared.stats;
        bump(&stats.packets, 1);

        if frames == 0 {
            bump(&stats.no_data_packets, 1);
        } else {
            bump(&stats.data_blocks, frames as u64);
        }
    }

    /// Moves the host buffer position past `frames` frames, reporting elapsed
    /// periods.
    fn advance_host_pointers(&mut self, pcm: Option<&dyn PcmSubstream>, frames: usize) {
        let Some(pcm) = pcm else {
            return;
        };

        let buffer_frames = pcm.buffer_frames();
        let Some(period) = num::NonZeroUsize::new(pcm.period_frames()) else {
            return;
        };

        if frames == 0 || buffer_frames == 0 {
            return;
        }

        let position = self.shared.buffer_position();
        self.shared
            .buffer_position
            .store((position + frames) % buffer_frames, atomic::Ordering::Release);

        if self.host_period.is_none_or(|c| c.period() != period) {
            self.host_period = Some(PeriodicCounter::new(period));
        }

        let Some(counter) = &mut self.host_period else {
            return;
        };

        if counter.advance(frames) != 0 {
            self.shared
                .pointer_flush
                .store(false, atomic::Ordering::Release);
            pcm.period_elapsed();
        }
    }
}
