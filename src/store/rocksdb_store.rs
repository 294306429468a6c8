use rocksdb::{IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// RocksDB-backed keyed store with JSON-encoded values. Composite keys
/// (`event_id#booking_id`) make the partition a key prefix, so
/// query-by-partition is a prefix scan.
pub struct RocksDbStore {
    db: DB,
    secondary: bool,
}

impl RocksDbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(1000);
        opts.set_use_fsync(false);
        opts.set_bytes_per_sync(1_048_576);
        opts.optimize_for_point_lookup(1024);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            secondary: false,
        })
    }

    /// Read-only follower of a primary opened by another process. Reads
    /// catch up with the primary's WAL first, so a booking written by the
    /// handler is visible to the consumer's status re-check.
    pub fn open_secondary<P: AsRef<Path>, Q: AsRef<Path>>(primary: P, scratch: Q) -> Result<Self> {
        let mut opts = Options::default();
        opts.set_max_open_files(1000);

        let db = DB::open_as_secondary(&opts, primary.as_ref(), scratch.as_ref())?;
        Ok(Self {
            db,
            secondary: true,
        })
    }

    fn refresh(&self) -> Result<()> {
        if self.secondary {
            self.db.try_catch_up_with_primary()?;
        }
        Ok(())
    }

    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.refresh()?;
        match self.db.get(key)? {
            Some(value) => {
                let deserialized: T = serde_json::from_slice(&value)?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    pub fn put<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let serialized = serde_json::to_vec(value)?;
        self.db.put(key, serialized)?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    /// All values whose key starts with `prefix`, in key order.
    pub fn scan_prefix<T>(&self, prefix: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.refresh()?;
        let mut values = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) = item?;
            // prefix_iterator seeks to the prefix but keeps going past it
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    pub fn scan_all<T>(&self) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.refresh()?;
        let mut values = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (_, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    pub fn flush(&self) -> Result<()> {
        if !self.secondary {
            self.db.flush()?;
        }
        Ok(())
    }
}

impl Drop for RocksDbStore {
    fn drop(&mut self) {
        if !self.secondary {
            let _ = self.db.flush();
        }
    }
}
