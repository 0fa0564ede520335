//! Key-value state persistence.
//!
//! The core defines the stored schema (JSON-encoded user state) and needs
//! only get, put and compare-and-swap from the storage engine.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Error types for persistence calls.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Storage is not reachable
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),

    /// Storage reported a failure
    #[error("Persistence operation failed: {0}")]
    Failed(String),
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new value was written
    Swapped,
    /// The stored value did not match; carries what is stored now
    Conflict { current: Option<Vec<u8>> },
}

/// Core trait for state persistence.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Write a key unconditionally.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError>;

    /// Write `new` only if the stored value equals `expected`
    /// (`None` meaning the key is absent).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<CasOutcome, PersistenceError>;
}

/// In-memory persistence for tests and single-process runs.
pub struct MemoryStateBackend {
    entries: DashMap<String, Vec<u8>>,
    available: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Unavailable("memory backend disabled".to_string()))
        }
    }
}

impl Default for MemoryStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
        self.check()?;
        self.entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<CasOutcome, PersistenceError> {
        self.check()?;

        let outcome = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_slice()) {
                    occupied.insert(new);
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict {
                        current: Some(occupied.get().clone()),
                    }
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new);
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict { current: None }
                }
            }
        };

        if outcome == CasOutcome::Swapped {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }
}
