pub mod rocksdb_store;

pub use rocksdb_store::RocksDbStore;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{booking_key, event_prefix, Booking, BookingStatus, Result};

/// Outcome of the conditional insert. `Exists` carries the record
/// already stored under the key; callers decide whether that is an
/// idempotent replay or a conflict.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Booking),
    Exists(Booking),
}

/// Sole source of truth for booking existence. Uniqueness of
/// `(event_id, booking_id)` is enforced here and nowhere else.
#[derive(Clone)]
pub struct BookingStore {
    backend: Arc<Backend>,
}

enum Backend {
    InMemory(DashMap<String, Booking>),
    RocksDb {
        db: RocksDbStore,
        // get+put must be atomic per key; RocksDB has no native
        // insert-if-absent, so writes serialize through this lock.
        write_lock: Mutex<()>,
    },
}

impl BookingStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::InMemory(DashMap::new())),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            backend: Arc::new(Backend::RocksDb {
                db: RocksDbStore::open(path)?,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Read-only follower for processes that only re-check booking state
    /// (the notification consumer). Writes fail at the storage layer.
    pub fn open_secondary<P: AsRef<Path>, Q: AsRef<Path>>(primary: P, scratch: Q) -> Result<Self> {
        std::fs::create_dir_all(&scratch)?;
        Ok(Self {
            backend: Arc::new(Backend::RocksDb {
                db: RocksDbStore::open_secondary(primary, scratch)?,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Conditional write keyed on `(event_id, booking_id)`: succeeds only
    /// if the key is absent, otherwise returns the existing record
    /// untouched.
    pub fn insert_if_absent(&self, booking: Booking) -> Result<InsertOutcome> {
        match &*self.backend {
            Backend::InMemory(map) => match map.entry(booking.key()) {
                Entry::Occupied(entry) => Ok(InsertOutcome::Exists(entry.get().clone())),
                Entry::Vacant(entry) => {
                    entry.insert(booking.clone());
                    Ok(InsertOutcome::Inserted(booking))
                }
            },
            Backend::RocksDb { db, write_lock } => {
                let _guard = write_lock.lock().expect("store write lock poisoned");
                let key = booking.key();
                match db.get::<Booking>(&key)? {
                    Some(existing) => Ok(InsertOutcome::Exists(existing)),
                    None => {
                        db.put(&key, &booking)?;
                        Ok(InsertOutcome::Inserted(booking))
                    }
                }
            }
        }
    }

    pub fn get(&self, event_id: &str, booking_id: &str) -> Result<Option<Booking>> {
        let key = booking_key(event_id, booking_id);
        match &*self.backend {
            Backend::InMemory(map) => Ok(map.get(&key).map(|entry| entry.value().clone())),
            Backend::RocksDb { db, .. } => db.get(&key),
        }
    }

    /// Query-by-partition-key: every booking of one event, in key order.
    pub fn list_by_event(&self, event_id: &str) -> Result<Vec<Booking>> {
        let prefix = event_prefix(event_id);
        match &*self.backend {
            Backend::InMemory(map) => {
                let mut bookings: Vec<Booking> = map
                    .iter()
                    .filter(|entry| entry.key().starts_with(&prefix))
                    .map(|entry| entry.value().clone())
                    .collect();
                bookings.sort_by(|a, b| a.key().cmp(&b.key()));
                Ok(bookings)
            }
            Backend::RocksDb { db, .. } => db.scan_prefix(&prefix),
        }
    }

    pub fn list_all(&self) -> Result<Vec<Booking>> {
        match &*self.backend {
            Backend::InMemory(map) => {
                let mut bookings: Vec<Booking> =
                    map.iter().map(|entry| entry.value().clone()).collect();
                bookings.sort_by(|a, b| a.key().cmp(&b.key()));
                Ok(bookings)
            }
            Backend::RocksDb { db, .. } => db.scan_all(),
        }
    }

    /// Status transition with the downgrade guard: a CONFIRMED record is
    /// never overwritten with PENDING. Returns the record as stored after
    /// the call, or None if the key is absent.
    pub fn update_status(
        &self,
        event_id: &str,
        booking_id: &str,
        status: BookingStatus,
    ) -> Result<Option<Booking>> {
        match &*self.backend {
            Backend::InMemory(map) => {
                let key = booking_key(event_id, booking_id);
                match map.get_mut(&key) {
                    Some(mut entry) => {
                        if allows_transition(entry.status, status) {
                            entry.status = status;
                        }
                        Ok(Some(entry.clone()))
                    }
                    None => Ok(None),
                }
            }
            Backend::RocksDb { db, write_lock } => {
                let _guard = write_lock.lock().expect("store write lock poisoned");
                let key = booking_key(event_id, booking_id);
                match db.get::<Booking>(&key)? {
                    Some(mut existing) => {
                        if allows_transition(existing.status, status) {
                            existing.status = status;
                            db.put(&key, &existing)?;
                        }
                        Ok(Some(existing))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Explicit compensating action: CONFIRMED (or PENDING) -> FAILED.
    /// Never triggered automatically.
    pub fn compensate(&self, event_id: &str, booking_id: &str) -> Result<Option<Booking>> {
        self.update_status(event_id, booking_id, BookingStatus::Failed)
    }

    pub fn flush(&self) -> Result<()> {
        match &*self.backend {
            Backend::InMemory(_) => Ok(()),
            Backend::RocksDb { db, .. } => db.flush(),
        }
    }
}

fn allows_transition(from: BookingStatus, to: BookingStatus) -> bool {
    !(from == BookingStatus::Confirmed && to == BookingStatus::Pending)
}
