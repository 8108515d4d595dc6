//! Entity directory.
//!
//! One record per live `Type.Instance`. Records are created by the receive
//! pump on first sight (through the [`TypeRegistry`]) or explicitly by the
//! caller, refreshed on every inbound frame, and evicted once they have
//! been silent for longer than the staleness window.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use simlink_core::{EntityId, Frame};

use super::registry::TypeRegistry;
use super::{read, write};
use crate::entity::Entity;
use crate::error::SessionError;

/// Event callback: `(entity, sim_time, event_frame)`.
pub type Listener = Arc<dyn Fn(&Entity, f64, &Frame) + Send + Sync>;

// ── EntityRecord ─────────────────────────────────────────────────

pub struct EntityRecord {
    id: EntityId,
    last_sync: Instant,
    listeners: HashMap<String, Vec<Listener>>,
}

impl EntityRecord {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            last_sync: Instant::now(),
            listeners: HashMap::new(),
        }
    }

    /// Pre-bind a listener to the full event frame name. Lets a custom
    /// factory hand out records that already react to events.
    pub fn with_listener(mut self, event_name: impl Into<String>, listener: Listener) -> Self {
        self.listeners.entry(event_name.into()).or_default().push(listener);
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn last_sync(&self) -> Instant {
        self.last_sync
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners.get(event_name).map_or(0, Vec::len)
    }

    fn touch(&mut self, now: Instant) {
        self.last_sync = now;
    }

    fn is_fresh(&self, now: Instant, staleness: Duration) -> bool {
        now.saturating_duration_since(self.last_sync) < staleness
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("last_sync", &self.last_sync)
            .field("events", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Directory {
    records: RwLock<HashMap<String, EntityRecord>>,
    staleness: Duration,
}

impl Directory {
    pub fn new(staleness: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            staleness,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Record that a frame for `id` just arrived: refresh a known entity or
    /// build a new one. Returns `true` if a record was created.
    ///
    /// Construction failures are dropped here; a frame for a type nobody
    /// registered is not the caller's problem.
    pub fn observe(&self, id: &EntityId, registry: &TypeRegistry, now: Instant) -> bool {
        let key = id.key();
        if let Some(rec) = write(&self.records).get_mut(&key) {
            rec.touch(now);
            return false;
        }

        // Factories run outside the directory lock.
        match registry.construct(id) {
            Ok(mut rec) => {
                rec.touch(now);
                let mut records = write(&self.records);
                if records.contains_key(&key) {
                    return false;
                }
                tracing::debug!(entity = %key, "discovered entity");
                records.insert(key, rec);
                true
            }
            Err(e) => {
                tracing::debug!(entity = %key, "cannot construct entity: {e}");
                false
            }
        }
    }

    /// Add a record the caller built. A fresh record under the same key is
    /// a usage fault; a stale one is replaced.
    pub fn insert(&self, record: EntityRecord, now: Instant, held: bool) -> Result<(), SessionError> {
        let key = record.id.key();
        let mut records = write(&self.records);
        let taken = records
            .get(&key)
            .is_some_and(|existing| held || existing.is_fresh(now, self.staleness));
        if taken {
            return Err(SessionError::DuplicateEntity(key));
        }
        records.insert(key, record);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        read(&self.records).contains_key(key)
    }

    /// Whether `key` exists and has synced within the staleness window.
    /// `held` keeps every known entity valid.
    pub fn is_valid(&self, key: &str, now: Instant, held: bool) -> bool {
        read(&self.records)
            .get(key)
            .is_some_and(|rec| held || rec.is_fresh(now, self.staleness))
    }

    /// Valid entities accepted by `filter`, sorted by instance name.
    pub fn select(&self, now: Instant, held: bool, filter: impl Fn(&EntityId) -> bool) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = read(&self.records)
            .values()
            .filter(|rec| held || rec.is_fresh(now, self.staleness))
            .filter(|rec| filter(&rec.id))
            .map(|rec| rec.id.clone())
            .collect();
        ids.sort_by(|a, b| a.instance.cmp(&b.instance).then_with(|| a.type_name.cmp(&b.type_name)));
        ids
    }

    /// Drop every entity silent for at least the staleness window.
    pub fn evict_stale(&self, now: Instant) -> Vec<EntityId> {
        let mut evicted = Vec::new();
        write(&self.records).retain(|_, rec| {
            let keep = rec.is_fresh(now, self.staleness);
            if !keep {
                evicted.push(rec.id.clone());
            }
            keep
        });
        for id in &evicted {
            tracing::debug!(entity = %id, "evicted stale entity");
        }
        evicted
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Listeners bound to `event_name` on entity `key`, cloned out so they
    /// can run without the lock.
    pub fn listeners(&self, key: &str, event_name: &str) -> Vec<Listener> {
        read(&self.records)
            .get(key)
            .and_then(|rec| rec.listeners.get(event_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Bind `listener`. With `replace` any existing listeners for the
    /// event are dropped first. Returns `false` if the entity is unknown.
    pub fn add_listener(&self, key: &str, event_name: &str, listener: Listener, replace: bool) -> bool {
        let mut records = write(&self.records);
        let Some(rec) = records.get_mut(key) else {
            return false;
        };
        let slot = rec.listeners.entry(event_name.to_string()).or_default();
        if replace {
            slot.clear();
        }
        slot.push(listener);
        true
    }

    pub fn clear_listeners(&self, key: &str, event_name: &str) {
        if let Some(rec) = write(&self.records).get_mut(key) {
            rec.listeners.remove(event_name);
        }
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }

    pub fn clear(&self) {
        write(&self.records).clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────
