use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use simlink_core::{Frame, FrameCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::session::Core;
use crate::state::lock;

/// Write half of the socket, boxed so tests can substitute mock I/O.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

const READ_CHUNK: usize = 64 * 1024;

// ── Link ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LinkState {
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Connection state shared by the pumps and the caller.
///
/// Each successful connect starts a new generation. Pumps only ever close
/// their own generation, so a pump that outlives a reconnect cannot tear
/// down its successor.
#[derive(Default)]
pub struct Link {
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    state: Mutex<LinkState>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state)
            .cancel
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Install a fresh writer and return the new generation with its
    /// cancellation token.
    pub async fn attach(&self, writer: BoxWriter) -> (u64, CancellationToken) {
        *self.writer.lock().await = Some(writer);
        let mut state = lock(&self.state);
        if let Some(old) = state.cancel.take() {
            old.cancel();
        }
        state.generation += 1;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        (state.generation, token)
    }

    /// Stop the pumps and drop the socket. `None` closes whatever is
    /// current; `Some(gen)` only closes that generation.
    pub async fn close(&self, generation: Option<u64>) {
        let token = {
            let mut state = lock(&self.state);
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            state.cancel.take()
        };
        let Some(token) = token else {
            return;
        };
        // Cancel first so a send pump stuck in a write releases the lock.
        token.cancel();
        self.writer.lock().await.take();
    }
}

// ── Connect ──────────────────────────────────────────────────────

/// Resolve `host:port` and open a tuned TCP stream to the first address
/// that accepts.
pub async fn open(config: &NetworkConfig, host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("{host}:{port} did not resolve"));
    for addr in tokio::net::lookup_host((host, port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_send_buffer_size(config.socket_buffer_size)?;
        socket.set_recv_buffer_size(config.socket_buffer_size)?;

        match tokio::time::timeout(config.connect_timeout(), socket.connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!(%addr, "connect failed: {e}");
                last_err = e;
            }
            Err(_) => {
                debug!(%addr, "connect timed out");
                last_err = io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr} timed out"));
            }
        }
    }
    Err(last_err)
}

/// Hand a connected stream to the pumps.
pub async fn start(core: &Arc<Core>, stream: TcpStream) {
    let (reader, writer) = stream.into_split();
    let (generation, cancel) = core.link.attach(Box::new(writer)).await;
    core.clock.note_inbound(Instant::now());

    core.handle
        .spawn(send_pump(core.clone(), generation, cancel.clone()));
    core.handle
        .spawn(receive_pump(core.clone(), reader, generation, cancel.clone()));
    core.handle.spawn(watchdog(core.clone(), generation, cancel));
}

// ── Send ─────────────────────────────────────────────────────────

/// Write everything in the outbox as one batch. Returns the number of
/// frames written.
///
/// The writer lock is taken before the outbox is swapped, so two flushes
/// never interleave and enqueue order holds on the wire.
pub async fn flush(core: &Core) -> io::Result<usize> {
    let mut writer = core.link.writer.lock().await;
    let Some(out) = writer.as_mut() else {
        return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
    };

    let batch = core.outbox.take_batch();
    if batch.is_empty() {
        return Ok(0);
    }
    core.instrumentation().on_flush(&batch);

    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    let mut written = 0;
    for frame in &batch {
        match Encoder::<&Frame>::encode(&mut codec, frame, &mut buf) {
            Ok(()) => written += 1,
            Err(e) => warn!(frame = frame.name(), "dropping unencodable frame: {e}"),
        }
    }

    out.write_all(&buf).await?;
    out.flush().await?;

    core.clock.mark_sent();
    core.counters.frames_sent.fetch_add(written as u64, Ordering::Relaxed);
    Ok(written)
}

/// Periodically flush the outbox until cancelled or a write fails. Every
/// few batches carry a memory report.
pub async fn send_pump(core: Arc<Core>, generation: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(core.config.transport.pump_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let report_every = core.config.transport.memory_telemetry_every.max(1);
    let mut batches = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if core.outbox.is_empty() {
            continue;
        }
        batches = batches.wrapping_add(1);
        if batches % report_every == 0 {
            core.queue_memory_report();
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = flush(&core) => r,
        };
        if let Err(e) = result {
            error!("send failed: {e}");
            break;
        }
    }

    core.link.close(Some(generation)).await;
    debug!(generation, "send pump stopped");
}

// ── Receive ──────────────────────────────────────────────────────

/// Read, decode and ingest until EOF, a read error, or cancellation.
pub async fn receive_pump<R>(core: Arc<Core>, mut reader: R, generation: u64, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut codec = FrameCodec;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            r = reader.read_buf(&mut buf) => r,
        };
        match read {
            Ok(0) => {
                info!("simulation closed the connection");
                break;
            }
            Ok(_) => {
                core.clock.note_inbound(Instant::now());
                let frames = drain(&mut codec, &mut buf);
                if !frames.is_empty() {
                    core.ingest(frames);
                    core.clock.mark_received();
                }
            }
            Err(e) => {
                warn!("receive failed: {e}");
                break;
            }
        }
    }

    core.link.close(Some(generation)).await;
    debug!(generation, "receive pump stopped");
}

/// Decode every complete frame in `buf`, leaving any partial tail.
fn drain(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match codec.decode(buf) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(e) => {
                debug!("decode error: {e}");
                break;
            }
        }
    }
    frames
}

// ── Watchdog ─────────────────────────────────────────────────────

/// Close the link when the simulation goes quiet, and evict stale
/// entities along the way. Both are suspended while instrumentation holds
/// the process.
pub async fn watchdog(core: Arc<Core>, generation: u64, cancel: CancellationToken) {
    let timeout = core.config.transport.watchdog_timeout();
    let mut interval = tokio::time::interval(core.config.transport.watchdog_period());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if core.holds_process() {
            continue;
        }
        let now = Instant::now();
        core.directory.evict_stale(now);

        let silent = core
            .clock
            .last_inbound()
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        if silent >= timeout {
            warn!(silent_ms = silent.as_millis() as u64, "simulation stopped responding; disconnecting");
            break;
        }
    }

    core.link.close(Some(generation)).await;
}

// ── Tests ────────────────────────────────────────────────────────
