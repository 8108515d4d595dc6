//! Shared session state: mailboxes, type registry and entity directory.
//!
//! All containers here are written by the receive pump or the caller and
//! read by the other side. Locks are held for single map operations only,
//! never across network I/O.

pub mod directory;
pub mod inbox;
pub mod outbox;
pub mod registry;

pub use directory::{Directory, EntityRecord, Listener};
pub use inbox::Inbox;
pub use outbox::{Outbox, WriteMode};
pub use registry::{EntityFactory, TypeInfo, TypeRegistry};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// A panicking listener must not take the whole session down with it, so
// poisoned locks are recovered rather than propagated.

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
