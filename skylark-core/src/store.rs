//! User state store - per-user engagement state behind per-user locks.
//!
//! Each user has its own `tokio::sync::Mutex`, so concurrent agents never
//! race on one user's state while different users proceed in parallel.
//! With a persistence backend configured every update is written through
//! with compare-and-swap against the last bytes this store persisted.

use dashmap::DashMap;
use skylark_backends::{CasOutcome, StateBackend};
use skylark_types::{UserEngagementState, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::StoreError;

/// Conflicting writes tolerated per update before giving up.
pub const MAX_CAS_RETRIES: u32 = 3;

struct Slot {
    state: UserEngagementState,
    /// Bytes last written to (or read from) persistence
    persisted: Option<Vec<u8>>,
}

/// Per-user engagement state.
pub struct UserStateStore {
    users: DashMap<UserId, Arc<Mutex<Slot>>>,
    backend: Option<Arc<dyn StateBackend>>,
}

impl UserStateStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            backend: None,
        }
    }

    /// Store writing through to a persistence backend.
    pub fn with_backend(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            users: DashMap::new(),
            backend: Some(backend),
        }
    }

    /// Snapshot of a user's state, loading it from persistence if needed.
    pub async fn snapshot(&self, user_id: &UserId) -> Result<Option<UserEngagementState>, StoreError> {
        if let Some(slot) = self.users.get(user_id).map(|s| Arc::clone(s.value())) {
            return Ok(Some(slot.lock().await.state.clone()));
        }
        match self.load(user_id).await? {
            Some(loaded) => {
                let slot = self.insert_slot(user_id, Some(loaded));
                let state = slot.lock().await.state.clone();
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Snapshot of a user's state, creating it if absent.
    pub async fn ensure(&self, user_id: &UserId) -> Result<UserEngagementState, StoreError> {
        let slot = self.slot(user_id).await?;
        let state = slot.lock().await.state.clone();
        Ok(state)
    }

    /// Apply `mutate` under the user's lock and persist the result.
    ///
    /// The closure may run more than once when persistence reports a
    /// conflicting writer: it is re-applied to the freshly loaded state.
    pub async fn update<R, F>(&self, user_id: &UserId, mut mutate: F) -> Result<R, StoreError>
    where
        F: FnMut(&mut UserEngagementState) -> R,
    {
        let slot = self.slot(user_id).await?;
        let mut guard = slot.lock().await;

        let mut next = guard.state.clone();
        let mut result = mutate(&mut next);
        next.version = guard.state.version + 1;

        if let Some(backend) = &self.backend {
            let key = state_key(user_id);
            let mut conflicts = 0;
            loop {
                let bytes = serde_json::to_vec(&next)?;
                match backend
                    .compare_and_swap(&key, guard.persisted.as_deref(), bytes.clone())
                    .await?
                {
                    CasOutcome::Swapped => {
                        guard.persisted = Some(bytes);
                        break;
                    }
                    CasOutcome::Conflict { current } => {
                        conflicts += 1;
                        if conflicts > MAX_CAS_RETRIES {
                            warn!(user_id = %user_id, conflicts, "State write abandoned");
                            return Err(StoreError::ConflictRetriesExhausted {
                                user_id: user_id.clone(),
                                attempts: conflicts,
                            });
                        }
                        debug!(user_id = %user_id, conflicts, "State write conflict, re-applying");
                        let base = match &current {
                            Some(bytes) => serde_json::from_slice(bytes)?,
                            None => UserEngagementState::new(user_id.clone()),
                        };
                        let base_version = base.version;
                        guard.persisted = current;
                        next = base;
                        result = mutate(&mut next);
                        next.version = base_version + 1;
                    }
                }
            }
        }

        guard.state = next;
        Ok(result)
    }

    /// Users currently held in memory.
    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshots of every user held in memory.
    pub async fn snapshots(&self) -> Vec<UserEngagementState> {
        let slots: Vec<Arc<Mutex<Slot>>> = self.users.iter().map(|e| Arc::clone(e.value())).collect();
        let mut states = Vec::with_capacity(slots.len());
        for slot in slots {
            states.push(slot.lock().await.state.clone());
        }
        states
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    async fn slot(&self, user_id: &UserId) -> Result<Arc<Mutex<Slot>>, StoreError> {
        if let Some(slot) = self.users.get(user_id) {
            return Ok(Arc::clone(slot.value()));
        }

        let loaded = self.load(user_id).await?;
        Ok(self.insert_slot(user_id, loaded))
    }

    fn insert_slot(
        &self,
        user_id: &UserId,
        loaded: Option<(UserEngagementState, Vec<u8>)>,
    ) -> Arc<Mutex<Slot>> {
        self.users
            .entry(user_id.clone())
            .or_insert_with(|| {
                let (state, persisted) = match loaded {
                    Some((state, bytes)) => (state, Some(bytes)),
                    None => (UserEngagementState::new(user_id.clone()), None),
                };
                Arc::new(Mutex::new(Slot { state, persisted }))
            })
            .clone()
    }

    async fn load(&self, user_id: &UserId) -> Result<Option<(UserEngagementState, Vec<u8>)>, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        match backend.get(&state_key(user_id)).await? {
            Some(bytes) => {
                let state = serde_json::from_slice(&bytes)?;
                debug!(user_id = %user_id, "Loaded persisted state");
                Ok(Some((state, bytes)))
            }
            None => Ok(None),
        }
    }
}

impl Default for UserStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn state_key(user_id: &UserId) -> String {
    format!("user:{}", user_id)
}
