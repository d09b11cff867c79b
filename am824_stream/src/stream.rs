//! Stream lifecycle: configure, start, stop, and the host-facing accessors.

use crate::{
    engine::{
        CouplingLink, Coupling, ISO_HEADER_SIZE, PacketEngine, SlaveStream, StreamShared,
        StreamState, StreamStats,
    },
    error::{Result, StreamError},
    host::{MidiPort, PcmSubstream},
    options::StreamOptions,
    transport::{ContextParams, IsoCallback, IsoEvent, IsoQueue, IsoTransport, Speed},
};
use am824_proto::{Direction, SampleWidth, StreamConfig, format::MAX_MIDI_PORTS};
use core::{sync::atomic, time::Duration};
use std::sync::Arc;

/// Part a stream plays in a master/slave pair.
enum Role {
    Independent,
    Master(Arc<CouplingLink>),
    Slave(Arc<CouplingLink>),
}

struct Inner<T: IsoTransport> {
    transport: T,
    options: StreamOptions,
    config: Option<StreamConfig>,
    /// Present from a successful start to the matching stop.
    context: Option<T::Context>,
    role: Role,
}

impl<T: IsoTransport> Inner<T> {
    /// Takes a slave's engine back from its master. Must run before the
    /// slave's context is stopped.
    fn detach(&self) {
        if let Role::Slave(link) = &self.role {
            drop(link.detach_slave());
        }
    }
}

/// One isochronous AM824 stream, in one direction.
///
/// Starting and stopping are serialized by an internal lock. Everything the
/// audio host touches while the stream runs (handles, triggers, the buffer
/// position) goes through lock-free cells instead.
pub struct AmdtpStream<T: IsoTransport> {
    direction: Direction,
    shared: Arc<StreamShared>,
    inner: parking_lot::Mutex<Inner<T>>,
}

impl<T: IsoTransport> AmdtpStream<T> {
    pub fn new(transport: T, direction: Direction, options: StreamOptions) -> Self {
        Self {
            direction,
            shared: Arc::new(StreamShared::new()),
            inner: parking_lot::Mutex::new(Inner {
                transport,
                options,
                config: None,
                context: None,
                role: Role::Independent,
            }),
        }
    }

    #[inline(always)]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline(always)]
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// `true` once a packet failed to be queued, until the stream is stopped.
    #[inline(always)]
    pub fn is_faulted(&self) -> bool {
        self.shared.state() == StreamState::Faulted
    }

    #[inline(always)]
    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    pub fn config(&self) -> Option<StreamConfig> {
        self.inner.lock().config
    }

    pub fn options(&self) -> StreamOptions {
        self.inner.lock().options
    }

    /// Largest packet the configured stream sends or accepts.
    pub fn max_payload_bytes(&self) -> Option<usize> {
        let inner = self.inner.lock();
        let config = inner.config?;
        Some(inner.options.max_payload_bytes(&config))
    }

    fn ensure_stopped(inner: &Inner<T>, shared: &StreamShared) -> Result<()> {
        if inner.context.is_some() {
            return Err(StreamError::InvalidState(shared.state().name()));
        }
        Ok(())
    }

    /// Sets the audio format. Only allowed while the stream is stopped.
    pub fn configure(
        &self,
        rate: u32,
        pcm_channels: u32,
        width: SampleWidth,
        midi_ports: u32,
    ) -> Result<StreamConfig> {
        let mut inner = self.inner.lock();
        Self::ensure_stopped(&inner, &self.shared)?;

        let config =
            StreamConfig::with_rate(rate, pcm_channels, midi_ports, width, self.direction)?;

        inner.config = Some(config);
        Ok(config)
    }

    /// Replaces the stream's tunables. Only allowed while the stream is stopped.
    pub fn set_options(&self, options: StreamOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::ensure_stopped(&inner, &self.shared)?;
        options.validate()?;
        inner.options = options;
        Ok(())
    }

    /// Starts streaming on `channel`.
    ///
    /// Returns once the transport called back for the first time, or fails
    /// after [`StreamOptions::first_callback_timeout`], having released
    /// everything it allocated.
    pub fn start(&self, channel: u8, speed: Speed) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        Self::ensure_stopped(inner, &self.shared)?;
        let config = inner.config.ok_or(StreamError::NotConfigured)?;
        let options = inner.options;
        options.validate()?;

        self.shared.reset();
        self.shared.set_state(StreamState::Starting);

        let params = ContextParams {
            direction: self.direction,
            channel,
            speed,
            header_size: ISO_HEADER_SIZE,
            max_payload: options.max_payload_bytes(&config),
            queue_length: options.queue_length.get(),
        };

        let mut ctx = match inner.transport.create(&params) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.shared.set_state(StreamState::Idle);
                return Err(e.into());
            }
        };

        let coupling = match &inner.role {
            Role::Master(link) => Coupling::Master(Arc::clone(link)),
            _ => Coupling::Independent,
        };

        let mut engine = PacketEngine::new(config, options, Arc::clone(&self.shared), coupling);
        let mut queue = inner.transport.queue_handle(&ctx);

        let res = engine.prime(&mut *queue).and_then(|()| {
            let callback: IsoCallback = match &inner.role {
                Role::Slave(link) => {
                    // the master drives our queue, our own callbacks only
                    // report that the context runs
                    link.attach_slave(SlaveStream { engine, queue });
                    let shared = Arc::clone(&self.shared);
                    Box::new(move |_: &IsoEvent<'_>, _: &mut dyn IsoQueue| {
                        shared.on_callback();
                    })
                }
                _ => Box::new(move |event: &IsoEvent<'_>, queue: &mut dyn IsoQueue| {
                    engine.process(event, queue)
                }),
            };

            inner.transport.start(&mut ctx, None, 0, callback)
        });

        if let Err(e) = res {
            log::error!("failed to start {:?} stream: {e}", self.direction);
            inner.detach();
            inner.transport.destroy(ctx);
            self.shared.set_state(StreamState::Idle);
            return Err(e.into());
        }

        let timeout = options.first_callback_timeout;

        if !self.shared.first_callback.wait(timeout) {
            log::error!(
                "{:?} stream on channel {channel}: no callback within {timeout:?}",
                self.direction
            );
            self.shared.set_state(StreamState::Stopping);
            inner.detach();
            inner.transport.stop(&mut ctx);
            inner.transport.destroy(ctx);
            self.shared.set_state(StreamState::Idle);
            return Err(StreamError::StartTimeout(timeout));
        }

        inner.context = Some(ctx);

        log::info!(
            "{:?} stream started on channel {channel} at {speed:?}, {} Hz, {} PCM, {} MIDI",
            self.direction,
            config.sfc().rate(),
            config.pcm_channels(),
            config.midi_ports(),
        );

        Ok(())
    }

    /// Stops streaming and releases the transport context.
    ///
    /// Does nothing on a stream that is not started.
    pub fn stop(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(mut ctx) = inner.context.take() else {
            return;
        };

        self.shared.set_state(StreamState::Stopping);
        inner.detach();
        inner.transport.stop(&mut ctx);
        inner.transport.destroy(ctx);
        self.shared.set_state(StreamState::Idle);

        log::info!("{:?} stream stopped", self.direction);
    }

    /// Waits for the first callback of a starting stream.
    ///
    /// Returns whether the stream is running.
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        match self.shared.state() {
            StreamState::Running => true,
            StreamState::Starting => {
                self.shared.first_callback.wait(timeout);
                self.shared.is_running()
            }
            _ => false,
        }
    }

    /// Binds the host PCM buffer, or unbinds it with `None`. Takes effect
    /// from the next packet, the buffer position restarts at zero.
    pub fn bind_audio_handle(&self, handle: Option<Arc<dyn PcmSubstream>>) {
        self.shared.bind_pcm(handle);
    }

    pub fn bind_midi_port(&self, index: usize, port: Option<Arc<dyn MidiPort>>) -> Result<()> {
        let cell = self
            .shared
            .midi
            .get(index)
            .ok_or(StreamError::InvalidMidiPort(index))?;
        cell.store(port.map(Arc::new));
        Ok(())
    }

    /// Starts or stops MIDI traffic on a port. Out of range ports are ignored.
    #[inline]
    pub fn trigger_midi_port(&self, index: usize, on: bool) {
        if index < MAX_MIDI_PORTS as usize {
            self.shared.midi_triggers.set(index, on);
        }
    }

    /// Position of the stream in the host buffer, in frames.
    ///
    /// Called twice within the same period, this processes pending
    /// completions first, for a fresher value.
    pub fn buffer_position(&self) -> usize {
        let flush = self.shared.pointer_flush.load(atomic::Ordering::Acquire);

        if flush && self.shared.is_running() {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(ctx) = inner.context.as_mut() {
                inner.transport.flush_completions(ctx);
            }
        } else {
            self.shared
                .pointer_flush
                .store(true, atomic::Ordering::Release);
        }

        self.shared.buffer_position()
    }

    /// Sets the source node id written in outgoing headers, after a bus reset.
    #[inline]
    pub fn update_node_id(&self, node_id: u8) {
        self.shared.set_source_node_id(node_id & 0x3f);
    }
}

impl<T: IsoTransport> Drop for AmdtpStream<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Makes `slave` run on `master`'s clock: each packet `master` sends or
/// receives triggers one packet of `slave`, stamped with the same SYT.
///
/// Both streams must be stopped, and `slave` must transmit.
pub fn pair<T: IsoTransport, U: IsoTransport>(
    master: &AmdtpStream<T>,
    slave: &AmdtpStream<U>,
) -> Result<()> {
    if slave.direction != Direction::Transmit || Arc::ptr_eq(&master.shared, &slave.shared) {
        return Err(StreamError::UnsupportedCoupling);
    }

    let mut master_inner = master.inner.lock();
    let mut slave_inner = slave.inner.lock();

    AmdtpStream::<T>::ensure_stopped(&master_inner, &master.shared)?;
    AmdtpStream::<U>::ensure_stopped(&slave_inner, &slave.shared)?;

    let link = Arc::new(CouplingLink::new(Arc::clone(&slave.shared)));
    master_inner.role = Role::Master(Arc::clone(&link));
    slave_inner.role = Role::Slave(link);

    Ok(())
}
