//! Named, reentrant locks.
//!
//! Every mutation of an entity or sync record happens inside
//! [`LockService::with_lock`]. Locks are owned by the acquiring thread, so a
//! thread that already holds a name can take it again without deadlocking.
//! Release happens in [`LockGuard`]'s `Drop`, which also runs while
//! unwinding from a panic.

use crate::config::{LockConfig, RetryConfig};
use crate::entity::CanonicalEntity;
use crate::error::{CoreError, CoreResult};
use crate::store::EntityStore;
use crate::types::{EntityId, NaturalKey, PartnerId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::debug;

/// What a lock protects.
#[derive(Debug, Clone, Copy)]
pub enum LockScope<'a> {
    /// Creation of a not-yet-existing entity, keyed by natural key.
    Creation {
        /// Kind of entity, e.g. `entry`.
        entity_type: &'a str,
        /// Natural key being created.
        key: &'a NaturalKey,
    },
    /// Mutation of one existing entity.
    Entity(EntityId),
    /// Mutation of one sync record.
    SyncRecord {
        /// Local record key.
        record_key: &'a str,
        /// Remote partner.
        partner: &'a PartnerId,
    },
}

impl LockScope<'_> {
    /// The lock name for this scope.
    pub fn name(&self) -> String {
        match self {
            LockScope::Creation { entity_type, key } => format!("create:{entity_type}:{key}"),
            LockScope::Entity(id) => format!("entity:{id}"),
            LockScope::SyncRecord {
                record_key,
                partner,
            } => format!("sync:{partner}:{record_key}"),
        }
    }
}

#[derive(Debug)]
struct Holder {
    owner: ThreadId,
    depth: usize,
}

/// Process-wide named mutex service.
#[derive(Debug)]
pub struct LockService {
    held: Mutex<HashMap<String, Holder>>,
    released: Condvar,
    config: LockConfig,
}

/// Ownership of a named lock; released on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    service: &'a LockService,
    name: String,
}

impl LockGuard<'_> {
    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.service.release(&self.name);
    }
}

impl LockService {
    /// Creates a lock service.
    pub fn new(config: LockConfig) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            config,
        }
    }

    /// Blocks until `name` is owned by the current thread.
    ///
    /// # Errors
    ///
    /// Returns the retryable [`CoreError::LockTimeout`] when another thread
    /// keeps the lock past the configured acquire timeout.
    pub fn acquire(&self, name: &str) -> CoreResult<LockGuard<'_>> {
        let me = thread::current().id();
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let mut held = self.held.lock();

        loop {
            match held.get_mut(name) {
                Some(holder) if holder.owner == me => {
                    holder.depth += 1;
                    return Ok(self.guard(name));
                }
                Some(_) => {}
                None => {
                    held.insert(name.to_string(), Holder { owner: me, depth: 1 });
                    return Ok(self.guard(name));
                }
            }

            if Instant::now() >= deadline {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                debug!(lock = name, waited_ms, "lock acquire timed out");
                return Err(CoreError::LockTimeout {
                    name: name.to_string(),
                    waited_ms,
                });
            }
            self.released.wait_until(&mut held, deadline);
        }
    }

    /// Runs `body` while holding `name`.
    ///
    /// # Errors
    ///
    /// Returns the acquire error, or whatever `body` returns.
    pub fn with_lock<T, E>(&self, name: &str, body: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<CoreError>,
    {
        let _guard = self.acquire(name)?;
        body()
    }

    /// Runs `body` on freshly loaded state while holding the entity's lock.
    ///
    /// When `body` fails with a write conflict, the lock is released, the
    /// entity reloaded and `body` run again, up to `retry.max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityVanished`] if the entity no longer exists,
    /// the last conflict once attempts are exhausted, or any other error from
    /// `body` unchanged.
    pub fn with_retry_on_conflict<S, T>(
        &self,
        store: &S,
        id: EntityId,
        retry: &RetryConfig,
        mut body: impl FnMut(CanonicalEntity) -> CoreResult<T>,
    ) -> CoreResult<T>
    where
        S: EntityStore + ?Sized,
    {
        let name = LockScope::Entity(id).name();
        let mut attempt = 0;
        loop {
            let outcome = self.with_lock(&name, || {
                let current = store
                    .load(id)?
                    .ok_or_else(|| CoreError::EntityVanished { key: id.to_string() })?;
                body(current)
            });

            match outcome {
                Err(CoreError::WriteConflict { .. }) if attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    debug!(entity = %id, attempt, "write conflict, reloading");
                    thread::sleep(retry.delay_for_attempt(attempt));
                }
                other => return other,
            }
        }
    }

    /// Returns true if any thread holds `name`.
    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains_key(name)
    }

    /// Number of names currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn guard(&self, name: &str) -> LockGuard<'_> {
        LockGuard {
            service: self,
            name: name.to_string(),
        }
    }

    fn release(&self, name: &str) {
        let mut held = self.held.lock();
        if let Some(holder) = held.get_mut(name) {
            holder.depth -= 1;
            if holder.depth == 0 {
                held.remove(name);
                self.released.notify_all();
            }
        }
    }
}

impl Default for LockService {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}
