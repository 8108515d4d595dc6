//! The client session.
//!
//! A [`Session`] owns a small tokio runtime for its pumps and exposes a
//! blocking API to the program thread. All shared state lives in [`Core`],
//! which the pumps and every [`Entity`] handle reference.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;
use serde::Serialize;
use simlink_core::{EntityId, Frame, FrameName};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::entity::{Color, Entity, Image, Verbosity};
use crate::error::SessionError;
use crate::events::{EventQueue, PendingEvent, invoke};
use crate::instrument::{Instrumentation, NoInstrumentation};
use crate::network::{self, Link};
use crate::rate_limit::{RateLimiter, Verdict};
use crate::state::{Directory, EntityFactory, Inbox, Outbox, TypeInfo, TypeRegistry, WriteMode, lock, read, write};
use crate::telemetry::MemoryProbe;
use crate::tick::SyncClock;

/// Properties under this prefix belong to the session itself and are
/// never rate limited.
const SESSION_CHANNEL: &str = "SimEnvManager.Current.";
const LOG_CHANNEL: &str = "SimEnvManager.Current.LogDebug";
const LINE_CHANNEL: &str = "SimEnvManager.Current.LogLineNo";
const DEBUG_CMD: &str = "SimEnvManager.Current.DebugCmd";
const DEBUG_DATA: &str = "SimEnvManager.Current.DebugData";
const IMAGE_CHANNEL: &str = "SimEnvManager.Current.LogImg";
const MEMORY_CHANNEL: &str = "SimEnvManager.Current.MemUsg";

/// Edge length of images shown in the simulation's log.
pub const LOG_IMAGE_SIZE: u32 = 256;

// ── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) batches: AtomicU64,
    pub(crate) forced_flushes: AtomicU64,
}

/// Traffic counters since the session was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Non-empty inbound batches.
    pub batches: u64,
    /// Flushes forced by a full append queue.
    pub forced_flushes: u64,
}

// ── Core ─────────────────────────────────────────────────────────

pub(crate) struct Core {
    pub(crate) handle: Handle,
    pub(crate) config: SessionConfig,
    pub(crate) outbox: Outbox,
    pub(crate) inbox: Inbox,
    pub(crate) directory: Directory,
    pub(crate) registry: RwLock<TypeRegistry>,
    pub(crate) events: EventQueue,
    pub(crate) clock: SyncClock,
    pub(crate) link: Link,
    pub(crate) counters: Counters,
    get_limiter: RateLimiter,
    set_limiter: RateLimiter,
    instrumentation: RwLock<Arc<dyn Instrumentation>>,
    memory: Mutex<MemoryProbe>,
}

impl Core {
    pub(crate) fn new(config: SessionConfig, handle: Handle) -> Self {
        Self {
            handle,
            outbox: Outbox::new(),
            inbox: Inbox::new(),
            directory: Directory::new(config.directory.staleness()),
            registry: RwLock::new(TypeRegistry::with_builtins()),
            events: EventQueue::new(),
            clock: SyncClock::new(),
            link: Link::new(),
            counters: Counters::default(),
            get_limiter: RateLimiter::new(&config.rate_limit),
            set_limiter: RateLimiter::new(&config.rate_limit),
            instrumentation: RwLock::new(Arc::new(NoInstrumentation)),
            memory: Mutex::new(MemoryProbe::new()),
            config,
        }
    }

    pub(crate) fn instrumentation(&self) -> Arc<dyn Instrumentation> {
        read(&self.instrumentation).clone()
    }

    pub(crate) fn set_instrumentation(&self, hook: Arc<dyn Instrumentation>) {
        *write(&self.instrumentation) = hook;
    }

    pub(crate) fn holds_process(&self) -> bool {
        self.instrumentation().holds_process()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub(crate) fn is_valid(&self, key: &str) -> bool {
        self.directory.is_valid(key, Instant::now(), self.holds_process())
    }

    /// Current simulation time, or zero before the clock has been seen.
    pub(crate) fn sim_time(&self) -> f64 {
        self.inbox
            .get(&self.config.sync.clock_property)
            .map_or(0.0, |f| f.as_f64())
    }

    fn reset(&self) {
        self.outbox.clear();
        self.inbox.clear();
        self.directory.clear();
        self.events.clear();
        self.clock.reset();
        self.get_limiter.clear();
        self.set_limiter.clear();
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Route one decoded batch: refresh the directory, store values, and
    /// queue events for their listeners.
    pub(crate) fn ingest(&self, frames: Vec<Frame>) {
        self.instrumentation().on_batch(&frames);
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frames_received
            .fetch_add(frames.len() as u64, Ordering::Relaxed);

        let now = Instant::now();
        let registry = read(&self.registry);
        for frame in frames {
            let (id, is_event) = match FrameName::parse(frame.name()) {
                Ok(name) => (name.entity_id(), name.is_event()),
                Err(e) => {
                    debug!("discarding frame: {e}");
                    continue;
                }
            };
            self.directory.observe(&id, &registry, now);

            if !is_event {
                self.inbox.store(frame);
                continue;
            }
            let listeners = self.directory.listeners(&id.key(), frame.name());
            if listeners.is_empty() {
                continue;
            }
            let frame = Arc::new(frame);
            for listener in listeners {
                self.events.push(PendingEvent {
                    entity: id.clone(),
                    frame: frame.clone(),
                    listener,
                });
            }
        }
    }

    /// Run every queued listener on the calling thread.
    pub(crate) fn dispatch_pending(self: &Arc<Self>) -> usize {
        let mut ran = 0;
        for event in self.events.drain() {
            if !self.directory.contains(&event.entity.key()) {
                debug!(entity = %event.entity, event = event.frame.name(), "entity gone; skipping event");
                continue;
            }
            let entity = Entity::new(event.entity, self.clone());
            invoke(&event.listener, &entity, self.sim_time(), &event.frame);
            ran += 1;
        }
        if ran > 0 {
            self.instrumentation().on_dispatch(ran);
        }
        ran
    }

    // ── Blocking waits ───────────────────────────────────────────

    pub(crate) fn await_send(&self, timeout: Duration) -> bool {
        self.handle.block_on(self.clock.wait_sent(timeout))
    }

    pub(crate) fn await_receive(&self, timeout: Duration) -> bool {
        self.handle.block_on(self.clock.wait_received(timeout))
    }

    fn round_trip(self: &Arc<Self>) {
        self.dispatch_pending();
        if self.is_connected() {
            self.await_receive(self.config.sync.await_timeout());
        }
    }

    // ── Property access ──────────────────────────────────────────

    /// Newest value of `name`. Polling it faster than the simulation ticks
    /// blocks for a round trip.
    pub(crate) fn read(self: &Arc<Self>, name: &str) -> Option<Arc<Frame>> {
        self.inbox.get(name)?;
        let verdict = self.get_limiter.hit(name, Instant::now());
        self.throttle(verdict, name);
        self.inbox.get(name)
    }

    /// Queue `frame` for the next flush.
    pub(crate) fn write(self: &Arc<Self>, frame: Frame, mode: WriteMode) {
        let name = frame.name().to_string();
        if let Err(frame) = self.outbox.try_push(frame, mode) {
            self.forced_flush();
            if self.outbox.try_push(frame, mode).is_err() {
                warn!(property = %name, "outbox still full after flush; dropping write");
            }
        }
        if mode == WriteMode::Replace && !name.starts_with(SESSION_CHANNEL) {
            let verdict = self.set_limiter.hit(&name, Instant::now());
            self.throttle(verdict, &name);
        }
    }

    fn throttle(self: &Arc<Self>, verdict: Verdict, name: &str) {
        let Verdict::Throttle { advise } = verdict else {
            return;
        };
        if advise {
            let msg = format!("'{name}' is accessed faster than the simulation ticks; wait a tick between accesses");
            warn!("{msg}");
            self.log_remote(&msg, Color::YELLOW, Verbosity::Important);
        }
        self.round_trip();
    }

    /// Write the outbox now, from the caller's thread. Without a link the
    /// queued frames are discarded.
    fn forced_flush(&self) {
        self.counters.forced_flushes.fetch_add(1, Ordering::Relaxed);
        if !self.is_connected() {
            let dropped = self.outbox.take_batch();
            warn!(frames = dropped.len(), "not connected; discarding queued writes");
            return;
        }
        let timeout = self.config.sync.await_timeout();
        let failure = match self
            .handle
            .block_on(tokio::time::timeout(timeout, network::flush(self)))
        {
            Ok(Ok(frames)) => {
                debug!(frames, "forced flush");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "forced flush timed out"),
        };
        warn!("forced flush failed: {failure}");
        self.handle.block_on(self.link.close(None));
    }

    /// Queue a memory report. Goes straight into the outbox, so it never
    /// forces a flush or trips the rate limiter.
    pub(crate) fn queue_memory_report(&self) {
        if !self.config.transport.memory_telemetry {
            return;
        }
        let mb = lock(&self.memory).sample();
        if self
            .outbox
            .try_push(Frame::scalar(MEMORY_CHANNEL, mb), WriteMode::Replace)
            .is_err()
        {
            debug!("memory report not queued");
        }
    }

    pub(crate) fn log_remote(self: &Arc<Self>, msg: &str, color: Color, level: Verbosity) {
        let record = serde_json::json!({ "msg": msg, "col": color, "level": level as u8 });
        match Frame::json(LOG_CHANNEL, &record) {
            Ok(frame) => self.write(
                frame,
                WriteMode::Append {
                    cap: self.config.sync.log_append_cap,
                },
            ),
            Err(e) => warn!("cannot encode log line: {e}"),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A connection to one simulation.
///
/// Methods block the calling thread and must not be called from inside an
/// async context.
pub struct Session {
    core: Arc<Core>,
    runtime: Runtime,
    main_calls: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.core.is_connected())
            .field("entities", &self.core.directory.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("simlink-io")
            .enable_all()
            .build()?;
        let core = Arc::new(Core::new(config, runtime.handle().clone()));
        Ok(Self {
            core,
            runtime,
            main_calls: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    // ── Connection ───────────────────────────────────────────────

    /// Connect to the simulation. Returns `true` if connected, including
    /// when already connected. A fresh connection starts from empty state.
    pub fn connect(&self, host: &str, port: u16) -> bool {
        if self.core.is_connected() {
            return true;
        }
        self.core.reset();
        // Queued before the pumps start so they lead the first batch.
        self.core.queue_memory_report();
        self.core
            .log_remote("simlink connection established", Color::WHITE, Verbosity::Important);

        let core = self.core.clone();
        let result = self.runtime.block_on(async {
            let stream = network::open(&core.config.network, host, port).await?;
            network::start(&core, stream).await;
            Ok::<_, io::Error>(())
        });
        match result {
            Ok(()) => {
                info!(host, port, "connected to simulation");
                true
            }
            Err(e) => {
                warn!(host, port, "cannot connect: {e}");
                false
            }
        }
    }

    /// Connect to the configured host and port.
    pub fn connect_default(&self) -> bool {
        let network = &self.core.config.network;
        self.connect(&network.host, network.port)
    }

    /// Tell the simulation goodbye, then close the connection.
    pub fn disconnect(&self) {
        if self.core.is_connected() {
            info!("disconnecting");
            self.core
                .log_remote("simlink closed connection", Color::WHITE, Verbosity::Important);
            let timeout = self.core.config.sync.await_timeout();
            let farewell = self
                .runtime
                .block_on(tokio::time::timeout(timeout, network::flush(&self.core)));
            if !matches!(farewell, Ok(Ok(_))) {
                debug!("farewell not delivered");
            }
        }
        self.runtime.block_on(self.core.link.close(None));
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    // ── Types & entities ─────────────────────────────────────────

    /// Register a program-defined entity type. Its factory takes priority
    /// over a built-in of the same name.
    pub fn register_type(&self, info: TypeInfo, factory: EntityFactory) -> Result<(), SessionError> {
        write(&self.core.registry).register_custom(info, factory)
    }

    /// Create an entity before the simulation has reported it.
    pub fn spawn(&self, type_name: &str, instance: &str) -> Result<Entity, SessionError> {
        let id = EntityId::new(type_name, instance);
        if self.core.is_valid(&id.key()) {
            return Err(SessionError::DuplicateEntity(id.key()));
        }
        let record = read(&self.core.registry).construct(&id)?;
        self.core
            .directory
            .insert(record, Instant::now(), self.core.holds_process())?;
        Ok(Entity::new(id, self.core.clone()))
    }

    pub fn find(&self, type_name: &str, instance: &str) -> Option<Entity> {
        let found = self.find_quiet(type_name, instance);
        if found.is_none() {
            warn!(entity = %EntityId::new(type_name, instance), "no such entity");
        }
        found
    }

    /// [`find`](Self::find) without the not-found warning.
    pub fn find_quiet(&self, type_name: &str, instance: &str) -> Option<Entity> {
        let id = EntityId::new(type_name, instance);
        self.core
            .is_valid(&id.key())
            .then(|| Entity::new(id, self.core.clone()))
    }

    /// Every valid entity of `type_name`, sorted by instance name. With
    /// `include_derived`, subtypes match too.
    pub fn find_all(&self, type_name: &str, include_derived: bool) -> Vec<Entity> {
        let found = self.find_all_quiet(type_name, include_derived);
        if found.is_empty() {
            warn!(entity_type = type_name, "no entities of this type");
        }
        found
    }

    /// [`find_all`](Self::find_all) without the empty-result warning.
    pub fn find_all_quiet(&self, type_name: &str, include_derived: bool) -> Vec<Entity> {
        let registry = read(&self.core.registry);
        self.select(|id| {
            id.type_name == type_name || (include_derived && registry.is_kind_of(&id.type_name, type_name))
        })
    }

    /// The first entity of exactly `type_name`, else the first of a
    /// derived type.
    pub fn first(&self, type_name: &str) -> Option<Entity> {
        let found = self.first_quiet(type_name);
        if found.is_none() {
            warn!(entity_type = type_name, "no entities of this type");
        }
        found
    }

    /// [`first`](Self::first) without the not-found warning.
    pub fn first_quiet(&self, type_name: &str) -> Option<Entity> {
        self.exact_or_derived(type_name).into_iter().next()
    }

    /// A random entity of exactly `type_name`, else of a derived type.
    pub fn any_random(&self, type_name: &str) -> Option<Entity> {
        let found = self
            .exact_or_derived(type_name)
            .into_iter()
            .choose(&mut rand::thread_rng());
        if found.is_none() {
            warn!(entity_type = type_name, "no entities of this type");
        }
        found
    }

    fn exact_or_derived(&self, type_name: &str) -> Vec<Entity> {
        let exact = self.find_all_quiet(type_name, false);
        if !exact.is_empty() {
            return exact;
        }
        self.find_all_quiet(type_name, true)
    }

    /// Every valid entity, sorted by instance name.
    pub fn all(&self) -> Vec<Entity> {
        let found = self.select(|_| true);
        if found.is_empty() {
            warn!("no entities known");
        }
        found
    }

    /// `Type.Instance` keys of every valid entity.
    pub fn entity_names(&self) -> Vec<String> {
        self.select(|_| true).iter().map(|e| e.id().key()).collect()
    }

    fn select(&self, filter: impl Fn(&EntityId) -> bool) -> Vec<Entity> {
        self.core
            .directory
            .select(Instant::now(), self.core.holds_process(), filter)
            .into_iter()
            .map(|id| Entity::new(id, self.core.clone()))
            .collect()
    }

    /// Wait until the simulation has reported at least one entity.
    pub fn wait_for_entities(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.select(|_| true).is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || !self.is_connected() {
                return false;
            }
            self.core.await_receive(deadline - now);
        }
    }

    // ── Events & ticks ───────────────────────────────────────────

    /// Run queued event listeners. Returns how many ran.
    pub fn dispatch_pending(&self) -> usize {
        self.core.dispatch_pending()
    }

    pub fn await_send(&self, timeout: Duration) -> bool {
        self.core.await_send(timeout)
    }

    pub fn await_receive(&self, timeout: Duration) -> bool {
        self.core.await_receive(timeout)
    }

    /// One iteration of the program's main loop: wait for the next tick,
    /// then run event listeners. The first call does not wait. Returns
    /// whether the session is still connected.
    pub fn run_main(&self) -> bool {
        let first = self.main_calls.fetch_add(1, Ordering::Relaxed) == 0;
        if !first && self.is_connected() {
            self.core.await_receive(self.core.config.sync.tick_timeout());
        }
        self.dispatch_pending();
        self.is_connected()
    }

    /// Let `ticks` simulation ticks pass.
    pub fn sleep_ticks(&self, ticks: u32) -> bool {
        for _ in 0..ticks {
            if !self.run_main() {
                return false;
            }
        }
        self.is_connected()
    }

    pub fn sim_time(&self) -> f64 {
        self.core.sim_time()
    }

    // ── Debug hooks ──────────────────────────────────────────────

    /// Tell the simulation which source line is executing.
    pub fn tag_line(&self, line: u32) {
        self.core
            .write(Frame::vector(LINE_CHANNEL, line.to_le_bytes().to_vec()), WriteMode::Replace);
    }

    /// The last command the simulation's debugger sent, if any.
    pub fn debug_command(&self) -> Option<serde_json::Value> {
        self.core.inbox.get(DEBUG_CMD).and_then(|f| f.as_json().ok())
    }

    /// Publish program state to the simulation's debugger.
    pub fn publish_debug_data<T: Serialize>(&self, value: &T) -> Result<(), SessionError> {
        let frame = Frame::json(DEBUG_DATA, value)?;
        self.core.write(frame, WriteMode::Replace);
        Ok(())
    }

    /// Show `image` in the simulation's log window, scaled to
    /// [`LOG_IMAGE_SIZE`] square RGBA.
    pub fn log_image(&self, image: &Image) -> Result<(), SessionError> {
        let rgba = image.to_square_rgba(LOG_IMAGE_SIZE)?;
        let frame = Frame::image(IMAGE_CHANNEL, LOG_IMAGE_SIZE, LOG_IMAGE_SIZE, 4, rgba.into_raw())?;
        self.core.write(frame, WriteMode::Replace);
        Ok(())
    }

    /// Show `msg` in the simulation's log window.
    pub fn log_remote(&self, msg: &str, color: Color, level: Verbosity) {
        self.core.log_remote(msg, color, level);
    }

    pub fn set_instrumentation(&self, hook: Arc<dyn Instrumentation>) {
        self.core.set_instrumentation(hook);
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.core.counters;
        SessionStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            forced_flushes: c.forced_flushes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.runtime.block_on(self.core.link.close(None));
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::state::EntityRecord;

    fn session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    #[test]
    fn inbound_frames_create_entities() {
        let s = session();
        s.core().ingest(vec![
            Frame::scalar("SmartDoor.door1.IsOpen", 1.0),
            Frame::scalar("SmartDoor.door2.IsOpen", 0.0),
            Frame::scalar("Teapot.t.Temp", 90.0),
            Frame::scalar("Malformed.Name", 1.0),
        ]);

        assert_eq!(s.entity_names(), vec!["SmartDoor.door1", "SmartDoor.door2"]);
        assert!(s.find("SmartDoor", "door1").unwrap().get_bool("IsOpen"));
        // Unknown types are not entities, but their values are kept.
        assert!(s.find("Teapot", "t").is_none());
        assert!(s.core().inbox.contains("Teapot.t.Temp"));
        assert!(!s.core().inbox.contains("Malformed.Name"));
        assert_eq!(s.stats().frames_received, 4);
    }

    #[test]
    fn spawn_usage_faults() {
        let s = session();
        s.spawn("SmartDoor", "door1").unwrap();
        assert!(matches!(
            s.spawn("SmartDoor", "door1"),
            Err(SessionError::DuplicateEntity(_))
        ));
        assert!(matches!(
            s.spawn("EntityBaseStub", "x"),
            Err(SessionError::AbstractType(_))
        ));
        assert!(matches!(s.spawn("Teapot", "x"), Err(SessionError::UnknownType(_))));
    }

    #[test]
    fn find_all_with_derived_types() {
        let s = session();
        s.core().ingest(vec![
            Frame::scalar("LargeConveyorBelt.b.Speed", 1.0),
            Frame::scalar("ConveyorBelt.c.Speed", 1.0),
            Frame::scalar("ConveyorBelt.a.Speed", 1.0),
            Frame::scalar("SmartDoor.d.IsOpen", 1.0),
        ]);

        let exact: Vec<String> = s
            .find_all("ConveyorBelt", false)
            .iter()
            .map(|e| e.instance().to_string())
            .collect();
        assert_eq!(exact, vec!["a", "c"]);

        let derived: Vec<String> = s
            .find_all("ConveyorBelt", true)
            .iter()
            .map(|e| e.instance().to_string())
            .collect();
        assert_eq!(derived, vec!["a", "b", "c"]);

        assert_eq!(s.first("ConveyorBelt").unwrap().instance(), "a");
        assert!(s.first("Piano").is_none());
        assert_eq!(s.all().len(), 4);
    }

    #[test]
    fn first_prefers_exact_type() {
        let s = session();
        s.core().ingest(vec![
            Frame::scalar("LargeConveyorBelt.a.Speed", 1.0),
            Frame::scalar("ConveyorBelt.b.Speed", 1.0),
        ]);
        let first = s.first("ConveyorBelt").unwrap();
        assert_eq!(first.id().key(), "ConveyorBelt.b");

        s.core().ingest(vec![Frame::scalar("LargeConveyorBelt.c.Speed", 1.0)]);
        assert_eq!(s.first("LargeConveyorBelt").unwrap().instance(), "a");
        assert_eq!(s.any_random("ConveyorBelt").unwrap().id().key(), "ConveyorBelt.b");
    }

    #[test]
    fn any_random_falls_back_to_derived() {
        let s = session();
        s.core().ingest(vec![
            Frame::scalar("LargeConveyorBelt.a.Speed", 1.0),
            Frame::scalar("TurnableConveyorBelt.b.Speed", 1.0),
        ]);
        for _ in 0..10 {
            let picked = s.any_random("ConveyorBelt").unwrap();
            assert!(["a", "b"].contains(&picked.instance()));
        }
        assert!(s.any_random("Piano").is_none());
    }

    #[test]
    fn quiet_lookups_match_loud_ones() {
        let s = session();
        s.core().ingest(vec![Frame::scalar("SmartDoor.d.IsOpen", 1.0)]);
        assert!(s.find_quiet("SmartDoor", "d").is_some());
        assert!(s.find_quiet("SmartDoor", "nope").is_none());
        assert_eq!(s.find_all_quiet("SmartDoor", false).len(), 1);
        assert!(s.find_all_quiet("Piano", true).is_empty());
        assert!(s.first_quiet("Piano").is_none());
    }

    #[test]
    fn log_image_queues_square_rgba() {
        let s = session();
        let image = Image {
            width: 2,
            height: 2,
            channels: 3,
            data: vec![255; 12],
        };
        s.log_image(&image).unwrap();

        let batch = s.core().outbox.take_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name(), IMAGE_CHANNEL);
        assert_eq!(batch[0].shape(), simlink_core::Shape::new(256, 256, 4));
        assert_eq!(batch[0].payload().len(), 256 * 256 * 4);

        let broken = Image {
            data: vec![0; 3],
            ..image
        };
        assert!(matches!(s.log_image(&broken), Err(SessionError::InvalidImage(_))));
    }

    #[test]
    fn memory_report_respects_switch() {
        let s = session();
        s.core().queue_memory_report();
        let batch = s.core().outbox.take_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name(), MEMORY_CHANNEL);
        assert!(batch[0].as_f64() >= 1.0);

        let mut config = SessionConfig::default();
        config.transport.memory_telemetry = false;
        let quiet = Session::new(config).unwrap();
        quiet.core().queue_memory_report();
        assert!(quiet.core().outbox.is_empty());
    }

    #[test]
    fn custom_types_take_priority() {
        let s = session();
        let factory: EntityFactory = Arc::new(|id: &EntityId| {
            Ok(EntityRecord::new(id.clone()).with_listener(id.property("_eventOnPing"), Arc::new(|_: &Entity, _: f64, _: &Frame| {})))
        });
        s.register_type(TypeInfo::new("Gizmo"), factory.clone()).unwrap();
        assert!(matches!(
            s.register_type(TypeInfo::new("Gizmo"), factory),
            Err(SessionError::DuplicateType(_))
        ));

        s.core().ingest(vec![Frame::void("Gizmo.g1._eventOnPing")]);
        assert!(s.find("Gizmo", "g1").is_some());
        assert_eq!(s.dispatch_pending(), 1);
    }

    #[test]
    fn events_fan_out_in_order() {
        let s = session();
        let button = s.spawn("PushButton", "b").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            button.on_event("_eventOnPress", move |entity, time, frame| {
                seen.lock().unwrap().push(format!("{tag}:{}:{time}:{}", entity.instance(), frame.as_f64()));
            });
        }

        s.core().ingest(vec![
            Frame::scalar("SimEnvManager.Current.SimTime", 2.0),
            Frame::scalar("PushButton.b._eventOnPress", 1.0),
            Frame::scalar("PushButton.b._eventOnPress", 2.0),
        ]);
        // Events never reach the inbox and wait for dispatch.
        assert!(!s.core().inbox.contains("PushButton.b._eventOnPress"));
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(s.dispatch_pending(), 4);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:b:2:1", "second:b:2:1", "first:b:2:2", "second:b:2:2"]
        );
    }

    #[test]
    fn singleton_and_clear() {
        let s = session();
        let button = s.spawn("PushButton", "b").unwrap();
        let count = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let count = count.clone();
            button.on_event_singleton("_eventOnPress", move |_, _, _| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        s.core().ingest(vec![Frame::void("PushButton.b._eventOnPress")]);
        s.dispatch_pending();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        button.clear_event("_eventOnPress");
        s.core().ingest(vec![Frame::void("PushButton.b._eventOnPress")]);
        assert_eq!(s.dispatch_pending(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_drain() {
        let s = session();
        let button = s.spawn("PushButton", "b").unwrap();
        let reached = Arc::new(AtomicBool::new(false));
        button.on_event("_eventOnPress", |_, _, _| panic!("listener bug"));
        let flag = reached.clone();
        button.on_event("_eventOnPress", move |_, _, _| flag.store(true, Ordering::SeqCst));

        s.core().ingest(vec![Frame::void("PushButton.b._eventOnPress")]);
        s.dispatch_pending();
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn events_for_vanished_entities_are_skipped() {
        let s = session();
        let button = s.spawn("PushButton", "b").unwrap();
        button.on_event("_eventOnPress", |_, _, _| {});
        s.core().ingest(vec![Frame::void("PushButton.b._eventOnPress")]);

        s.core().directory.evict_stale(Instant::now() + Duration::from_secs(60));
        assert_eq!(s.dispatch_pending(), 0);
    }

    #[test]
    fn log_cap_forces_flush() {
        let s = session();
        let cap = s.config().sync.log_append_cap;
        for i in 0..cap {
            s.log_remote(&format!("line {i}"), Color::WHITE, Verbosity::Info);
        }
        assert_eq!(s.core().outbox.pending(LOG_CHANNEL), cap);
        assert_eq!(s.stats().forced_flushes, 0);

        // Disconnected, so the forced flush discards the full queue.
        s.log_remote("overflow", Color::WHITE, Verbosity::Info);
        assert_eq!(s.stats().forced_flushes, 1);
        assert_eq!(s.core().outbox.pending(LOG_CHANNEL), 1);

        let batch = s.core().outbox.take_batch();
        let record: serde_json::Value = batch[0].as_json().unwrap();
        assert_eq!(record["msg"], "overflow");
        assert_eq!(record["level"], 2);
    }

    #[test]
    fn debug_channels() {
        let s = session();
        s.tag_line(0x0102);
        s.publish_debug_data(&serde_json::json!({ "x": 1 })).unwrap();
        let batch = s.core().outbox.take_batch();
        assert_eq!(batch[0].name(), LINE_CHANNEL);
        assert_eq!(batch[0].as_bytes(), vec![0x02, 0x01, 0, 0]);
        assert_eq!(batch[1].name(), DEBUG_DATA);

        assert!(s.debug_command().is_none());
        s.core()
            .ingest(vec![Frame::vector(DEBUG_CMD, br#"{"res":"c"}"#.to_vec())]);
        assert_eq!(s.debug_command().unwrap()["res"], "c");
    }

    struct Hold(AtomicBool);

    impl Instrumentation for Hold {
        fn holds_process(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn instrumentation_suspends_staleness() {
        let mut config = SessionConfig::default();
        config.directory.staleness_ms = 0;
        let s = Session::new(config).unwrap();
        let hook = Arc::new(Hold(AtomicBool::new(true)));
        s.set_instrumentation(hook.clone());

        s.core().ingest(vec![Frame::scalar("SmartDoor.door1.IsOpen", 1.0)]);
        assert!(s.find("SmartDoor", "door1").is_some());

        hook.0.store(false, Ordering::SeqCst);
        assert!(s.find("SmartDoor", "door1").is_none());
    }

    #[test]
    fn throttled_reads_do_not_block_when_disconnected() {
        let s = session();
        s.core().ingest(vec![Frame::scalar("Thermometer.t.Temp", 21.0)]);
        let t = s.find("Thermometer", "t").unwrap();
        let start = Instant::now();
        for _ in 0..100 {
            assert_eq!(t.get_float("Temp"), 21.0);
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        // The advisory went to the remote log.
        assert_eq!(s.core().outbox.pending(LOG_CHANNEL), 1);
    }

    #[test]
    fn run_main_without_connection() {
        let s = session();
        assert!(!s.is_connected());
        assert!(!s.run_main());
        assert!(!s.sleep_ticks(3));
        assert!(!s.connect("127.0.0.1", 1));
        assert!(!s.wait_for_entities(Duration::from_millis(10)));
    }
}
