//! # Distributed Lock Registry
//!
//! Shared/exclusive locks over named resources, with TTL leases, renewal,
//! FIFO blocking waits, and owner verification. Two cooperating entities:
//! the `LockRegistry` (shared state, one per cluster process) and per-node
//! `LockManager` values (thin clients carrying a node id).
//!
//! ## Design Principles
//!
//! 1. **One Monitor**: Every state transition takes the registry mutex; the
//!    mutex is never held across an await point.
//! 2. **FIFO Grants**: Waiters are served in arrival order. A shared head is
//!    granted together with all consecutive shared waiters behind it; an
//!    exclusive head blocks later shared arrivals from jumping ahead, so a
//!    stream of shared acquirers cannot starve a queued exclusive one.
//! 3. **Leases, Not Liveness**: Every acquired lock has a deadline; the
//!    sweeper expires overdue holders and wakes their waiters, so a crashed
//!    owner cannot pin a resource forever.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use mcache_common::{CacheError, CacheResult};

/// Compatibility class of a lock.
///
/// Two locks are compatible iff both are shared; an exclusive lock conflicts
/// with everything, including another exclusive from the same owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Pending,
    Acquired,
    Released,
    Expired,
}

/// A lease on a resource.
#[derive(Debug, Clone)]
pub struct LockEntry {
    /// Owner id plus a nonce, unique per acquisition attempt.
    pub lock_id: String,
    pub resource: String,
    /// Node id of the acquirer.
    pub owner: String,
    pub lock_type: LockType,
    pub state: LockState,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Original lease length; renewals extend by this much.
    pub ttl: Duration,
    pub renewal_count: u32,
    pub max_renewal_count: u32,
}

impl LockEntry {
    fn new(
        resource: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        max_renewal_count: u32,
    ) -> Self {
        let now = Instant::now();
        LockEntry {
            lock_id: format!("{}:{}", owner, Uuid::new_v4()),
            resource: resource.to_string(),
            owner: owner.to_string(),
            lock_type,
            state: LockState::Pending,
            created_at: now,
            expires_at: now + ttl,
            ttl,
            renewal_count: 0,
            max_renewal_count,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Introspection view of a held lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub lock_id: String,
    pub resource: String,
    pub owner: String,
    pub lock_type: LockType,
    pub state: LockState,
    pub renewal_count: u32,
}

impl From<&LockEntry> for LockInfo {
    fn from(entry: &LockEntry) -> Self {
        LockInfo {
            lock_id: entry.lock_id.clone(),
            resource: entry.resource.clone(),
            owner: entry.owner.clone(),
            lock_type: entry.lock_type,
            state: entry.state,
            renewal_count: entry.renewal_count,
        }
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LockStats {
    /// Locks ever granted.
    pub total_locks: u64,
    /// Currently held (acquired, unexpired) locks.
    pub active_locks: u64,
}

/// Registry tunables.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lease length when the caller does not pass one.
    pub default_ttl: Duration,
    /// Default wait bound for blocking acquisition.
    pub lock_timeout: Duration,
    /// Cadence of the background auto-renewer.
    pub renewal_interval: Duration,
    pub max_renewal_count: u32,
    /// Cadence of the expiry sweeper.
    pub sweep_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            default_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
            renewal_interval: Duration::from_secs(10),
            max_renewal_count: 5,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// A parked acquirer, woken by grant or abandoned by deadline.
struct Waiter {
    entry: LockEntry,
    tx: oneshot::Sender<LockEntry>,
}

#[derive(Default)]
struct RegistryState {
    /// resource -> acquired holders.
    holders: HashMap<String, Vec<LockEntry>>,
    /// lock id -> acquired entry, for release/renew by id.
    by_id: HashMap<String, LockEntry>,
    /// resource -> FIFO queue of pending acquirers.
    waiters: HashMap<String, VecDeque<Waiter>>,
}

impl RegistryState {
    /// Drops expired holders of `resource`, marking them EXPIRED.
    fn purge_expired(&mut self, resource: &str, now: Instant) -> usize {
        let expired: Vec<String> = match self.holders.get_mut(resource) {
            Some(holders) => {
                let expired = holders
                    .iter()
                    .filter(|entry| entry.is_expired(now))
                    .map(|entry| entry.lock_id.clone())
                    .collect();
                holders.retain(|entry| !entry.is_expired(now));
                expired
            }
            None => return 0,
        };
        if self
            .holders
            .get(resource)
            .map(|holders| holders.is_empty())
            .unwrap_or(false)
        {
            self.holders.remove(resource);
        }
        for lock_id in &expired {
            if let Some(mut entry) = self.by_id.remove(lock_id) {
                entry.state = LockState::Expired;
                warn!(lock = %lock_id, resource = %entry.resource, "lock lease expired");
            }
        }
        expired.len()
    }

    /// Whether a lock of `lock_type` can be granted right now, ignoring the
    /// waiter queue.
    fn compatible(&self, resource: &str, lock_type: LockType) -> bool {
        match self.holders.get(resource) {
            None => true,
            Some(holders) if holders.is_empty() => true,
            Some(holders) => {
                lock_type == LockType::Shared
                    && holders
                        .iter()
                        .all(|entry| entry.lock_type == LockType::Shared)
            }
        }
    }

    fn has_waiters(&self, resource: &str) -> bool {
        self.waiters
            .get(resource)
            .map(|queue| !queue.is_empty())
            .unwrap_or(false)
    }

    fn install_holder(&mut self, mut entry: LockEntry, now: Instant) -> LockEntry {
        entry.state = LockState::Acquired;
        entry.expires_at = now + entry.ttl;
        self.by_id.insert(entry.lock_id.clone(), entry.clone());
        self.holders
            .entry(entry.resource.clone())
            .or_default()
            .push(entry.clone());
        entry
    }

    fn remove_holder(&mut self, resource: &str, lock_id: &str) {
        if let Some(holders) = self.holders.get_mut(resource) {
            holders.retain(|entry| entry.lock_id != lock_id);
            if holders.is_empty() {
                self.holders.remove(resource);
            }
        }
        self.by_id.remove(lock_id);
    }

    /// Grants as many queue heads as compatibility allows: one exclusive
    /// when the resource is free, or every consecutive shared head while no
    /// exclusive is held.
    fn serve_queue(&mut self, resource: &str, now: Instant, granted_total: &AtomicU64) {
        loop {
            let head_type = match self
                .waiters
                .get(resource)
                .and_then(|queue| queue.front())
            {
                Some(waiter) => waiter.entry.lock_type,
                None => break,
            };
            if !self.compatible(resource, head_type) {
                break;
            }

            let waiter = self
                .waiters
                .get_mut(resource)
                .and_then(|queue| queue.pop_front())
                .expect("head checked above");
            let granted = self.install_holder(waiter.entry, now);
            debug!(lock = %granted.lock_id, resource = %resource, "granted queued lock");

            if waiter.tx.send(granted.clone()).is_err() {
                // The waiter gave up between grant and delivery; undo.
                self.remove_holder(resource, &granted.lock_id);
                continue;
            }
            granted_total.fetch_add(1, Ordering::Relaxed);
        }

        if self
            .waiters
            .get(resource)
            .map(|queue| queue.is_empty())
            .unwrap_or(false)
        {
            self.waiters.remove(resource);
        }
    }
}

/// Process-wide lock state shared by every `LockManager`.
pub struct LockRegistry {
    config: LockConfig,
    state: Mutex<RegistryState>,
    granted_total: AtomicU64,
    shutdown: AtomicBool,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LockRegistry {
    pub fn new(config: LockConfig) -> Self {
        LockRegistry {
            config,
            state: Mutex::new(RegistryState::default()),
            granted_total: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Spawns the background expiry sweeper. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        let interval = self.config.sweep_interval;
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if registry.shutdown.load(Ordering::Acquire) {
                    break;
                }
                registry.sweep(Instant::now());
            }
        }));
    }

    /// Expires overdue holders and wakes waiters. Returns how many leases
    /// were expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let resources: Vec<String> = state.holders.keys().cloned().collect();
        let mut expired = 0;
        for resource in resources {
            expired += state.purge_expired(&resource, now);
            state.serve_queue(&resource, now, &self.granted_total);
        }
        expired
    }

    /// Non-blocking acquisition. Absent on contention, on queued waiters
    /// (FIFO order is preserved even for compatible requests), or after
    /// shutdown.
    pub fn try_acquire(
        &self,
        resource: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
    ) -> Option<LockEntry> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(resource, now);

        if state.has_waiters(resource) || !state.compatible(resource, lock_type) {
            return None;
        }

        let entry = LockEntry::new(
            resource,
            owner,
            lock_type,
            ttl,
            self.config.max_renewal_count,
        );
        let granted = state.install_holder(entry, now);
        self.granted_total.fetch_add(1, Ordering::Relaxed);
        Some(granted)
    }

    /// Blocking acquisition with an explicit wait bound. Returns the entry,
    /// or absent when the wait elapses first.
    pub async fn acquire(
        &self,
        resource: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        wait: Duration,
    ) -> Option<LockEntry> {
        if let Some(entry) = self.try_acquire(resource, owner, lock_type, ttl) {
            return Some(entry);
        }
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let lock_id;
        {
            let mut state = self.state.lock();
            let entry = LockEntry::new(
                resource,
                owner,
                lock_type,
                ttl,
                self.config.max_renewal_count,
            );
            lock_id = entry.lock_id.clone();
            state
                .waiters
                .entry(resource.to_string())
                .or_default()
                .push_back(Waiter { entry, tx });
            // The resource may have been freed between the failed fast path
            // and the enqueue; serve immediately so the waiter cannot strand.
            state.serve_queue(resource, Instant::now(), &self.granted_total);
        }

        match timeout(wait, rx).await {
            Ok(Ok(entry)) => Some(entry),
            // Sender dropped: the registry was cleared or shut down.
            Ok(Err(_)) => None,
            Err(_) => {
                self.abandon_waiter(resource, &lock_id);
                None
            }
        }
    }

    /// Removes a timed-out waiter, or releases its lock if a grant slipped
    /// in ahead of the deadline.
    fn abandon_waiter(&self, resource: &str, lock_id: &str) {
        let mut state = self.state.lock();
        if let Some(queue) = state.waiters.get_mut(resource) {
            let before = queue.len();
            queue.retain(|waiter| waiter.entry.lock_id != lock_id);
            if queue.len() < before {
                if queue.is_empty() {
                    state.waiters.remove(resource);
                }
                return;
            }
        }
        // Granted concurrently with the timeout: hand it straight back.
        if state.by_id.contains_key(lock_id) {
            state.remove_holder(resource, lock_id);
            state.serve_queue(resource, Instant::now(), &self.granted_total);
        }
    }

    /// Releases a lock. True iff the lock is currently held or pending and
    /// `owner` matches; anything else leaves state unchanged.
    pub fn release(&self, lock_id: &str, owner: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(entry) = state.by_id.get(lock_id) {
            if entry.owner != owner {
                return false;
            }
            if entry.is_expired(now) {
                let resource = entry.resource.clone();
                state.purge_expired(&resource, now);
                state.serve_queue(&resource, now, &self.granted_total);
                return false;
            }
            let resource = entry.resource.clone();
            state.remove_holder(&resource, lock_id);
            state.serve_queue(&resource, now, &self.granted_total);
            return true;
        }

        // A pending acquirer can withdraw its own request.
        let found = state.waiters.iter().find_map(|(resource, queue)| {
            queue
                .iter()
                .position(|waiter| waiter.entry.lock_id == lock_id)
                .map(|pos| (resource.clone(), pos))
        });
        if let Some((resource, pos)) = found {
            let queue = state.waiters.get_mut(&resource).expect("resource found");
            if queue[pos].entry.owner != owner {
                return false;
            }
            queue.remove(pos);
            if queue.is_empty() {
                state.waiters.remove(&resource);
            }
            return true;
        }
        false
    }

    /// Extends a lease by its original TTL. Fails when the lock is gone,
    /// expired, owned by someone else, or out of renewals.
    pub fn renew(&self, lock_id: &str, owner: &str) -> Option<LockEntry> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let entry = state.by_id.get(lock_id)?;
        if entry.owner != owner {
            return None;
        }
        if entry.is_expired(now) {
            let resource = entry.resource.clone();
            state.purge_expired(&resource, now);
            state.serve_queue(&resource, now, &self.granted_total);
            return None;
        }
        if entry.renewal_count >= entry.max_renewal_count {
            return None;
        }

        let (resource, ttl) = (entry.resource.clone(), entry.ttl);
        let renewed = {
            let entry = state.by_id.get_mut(lock_id)?;
            entry.expires_at = now + ttl;
            entry.renewal_count += 1;
            entry.clone()
        };
        if let Some(holders) = state.holders.get_mut(&resource) {
            for holder in holders.iter_mut() {
                if holder.lock_id == lock_id {
                    *holder = renewed.clone();
                }
            }
        }
        Some(renewed)
    }

    /// True when the resource has at least one unexpired holder.
    pub fn is_locked(&self, resource: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(resource, now);
        state
            .holders
            .get(resource)
            .map(|holders| !holders.is_empty())
            .unwrap_or(false)
    }

    /// Current holders of a resource.
    pub fn locks(&self, resource: &str) -> Vec<LockInfo> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(resource, now);
        state
            .holders
            .get(resource)
            .map(|holders| holders.iter().map(LockInfo::from).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> LockStats {
        let state = self.state.lock();
        let active = state
            .holders
            .values()
            .map(|holders| holders.len() as u64)
            .sum();
        LockStats {
            total_locks: self.granted_total.load(Ordering::Relaxed),
            active_locks: active,
        }
    }

    /// Empties all state in place; waiters observe an absent result. Test
    /// ergonomics only.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.holders.clear();
        state.by_id.clear();
        state.waiters.clear();
    }

    /// Stops the sweeper and refuses further acquisitions. Pending waiters
    /// are woken with an absent result.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.state.lock().waiters.clear();
    }
}

/// Process-wide default registry, for test ergonomics. Production code
/// passes an explicit `Arc<LockRegistry>` into each `LockManager`.
#[cfg(feature = "global-registry")]
pub fn default_registry() -> Arc<LockRegistry> {
    use once_cell::sync::Lazy;
    static DEFAULT: Lazy<Arc<LockRegistry>> =
        Lazy::new(|| Arc::new(LockRegistry::new(LockConfig::default())));
    Arc::clone(&DEFAULT)
}

/// Handle for a background lease renewer.
pub struct AutoRenewalHandle {
    task: tokio::task::JoinHandle<()>,
}

impl AutoRenewalHandle {
    /// Stops renewing. The lock itself stays held until released or expired.
    pub fn stop(self) {
        self.task.abort();
    }

    /// True once the renewer stopped on its own (release, expiry, or the
    /// renewal cap).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Per-node client of the registry.
#[derive(Clone)]
pub struct LockManager {
    registry: Arc<LockRegistry>,
    node_id: String,
}

impl LockManager {
    pub fn new(registry: Arc<LockRegistry>, node_id: impl Into<String>) -> Self {
        LockManager {
            registry,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Blocks up to the configured lock timeout for an exclusive lease.
    pub async fn acquire_exclusive(&self, resource: &str) -> Option<LockEntry> {
        self.acquire_with_timeout(
            resource,
            LockType::Exclusive,
            self.registry.config.default_ttl,
            self.registry.config.lock_timeout,
        )
        .await
    }

    pub async fn acquire_exclusive_with_ttl(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Option<LockEntry> {
        self.acquire_with_timeout(
            resource,
            LockType::Exclusive,
            ttl,
            self.registry.config.lock_timeout,
        )
        .await
    }

    /// Blocks up to the configured lock timeout for a shared lease.
    pub async fn acquire_shared(&self, resource: &str) -> Option<LockEntry> {
        self.acquire_with_timeout(
            resource,
            LockType::Shared,
            self.registry.config.default_ttl,
            self.registry.config.lock_timeout,
        )
        .await
    }

    pub async fn acquire_shared_with_ttl(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Option<LockEntry> {
        self.acquire_with_timeout(
            resource,
            LockType::Shared,
            ttl,
            self.registry.config.lock_timeout,
        )
        .await
    }

    pub fn try_acquire_exclusive(&self, resource: &str) -> Option<LockEntry> {
        self.registry.try_acquire(
            resource,
            &self.node_id,
            LockType::Exclusive,
            self.registry.config.default_ttl,
        )
    }

    pub fn try_acquire_shared(&self, resource: &str) -> Option<LockEntry> {
        self.registry.try_acquire(
            resource,
            &self.node_id,
            LockType::Shared,
            self.registry.config.default_ttl,
        )
    }

    /// Acquisition with explicit lease and wait bounds.
    pub async fn acquire_with_timeout(
        &self,
        resource: &str,
        lock_type: LockType,
        ttl: Duration,
        wait: Duration,
    ) -> Option<LockEntry> {
        self.registry
            .acquire(resource, &self.node_id, lock_type, ttl, wait)
            .await
    }

    /// Releases a previously returned entry. False on owner mismatch or a
    /// lock that is no longer held.
    pub fn release(&self, entry: &LockEntry) -> bool {
        self.registry.release(&entry.lock_id, &self.node_id)
    }

    pub fn release_by_id(&self, lock_id: &str) -> bool {
        self.registry.release(lock_id, &self.node_id)
    }

    /// Extends the lease by its original TTL. Not idempotent: every call
    /// consumes one renewal.
    pub fn renew(&self, entry: &LockEntry) -> Option<LockEntry> {
        self.registry.renew(&entry.lock_id, &self.node_id)
    }

    /// Spawns a background renewer at the configured interval. It stops on
    /// release, expiry, or the renewal cap.
    pub fn start_auto_renewal(&self, entry: &LockEntry) -> AutoRenewalHandle {
        let registry = Arc::clone(&self.registry);
        let owner = self.node_id.clone();
        let lock_id = entry.lock_id.clone();
        let interval = self.registry.config.renewal_interval;

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if registry.renew(&lock_id, &owner).is_none() {
                    break;
                }
            }
        });
        AutoRenewalHandle { task }
    }

    /// Runs `task` under an exclusive lock, releasing on every exit path.
    pub async fn with_exclusive_lock<T, F, Fut>(
        &self,
        resource: &str,
        task: F,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.with_lock(resource, LockType::Exclusive, task).await
    }

    /// Runs `task` under a shared lock, releasing on every exit path.
    pub async fn with_shared_lock<T, F, Fut>(&self, resource: &str, task: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.with_lock(resource, LockType::Shared, task).await
    }

    async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        lock_type: LockType,
        task: F,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let entry = self
            .acquire_with_timeout(
                resource,
                lock_type,
                self.registry.config.default_ttl,
                self.registry.config.lock_timeout,
            )
            .await
            .ok_or(CacheError::LockConflict)?;

        let result = task().await;
        self.release(&entry);
        result
    }

    pub fn is_locked(&self, resource: &str) -> bool {
        self.registry.is_locked(resource)
    }

    pub fn locks(&self, resource: &str) -> Vec<LockInfo> {
        self.registry.locks(resource)
    }

    pub fn stats(&self) -> LockStats {
        self.registry.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<LockRegistry> {
        Arc::new(LockRegistry::new(LockConfig::default()))
    }

    fn registry_with(config: LockConfig) -> Arc<LockRegistry> {
        Arc::new(LockRegistry::new(config))
    }

    fn manager(registry: &Arc<LockRegistry>, node: &str) -> LockManager {
        LockManager::new(Arc::clone(registry), node)
    }

    #[tokio::test]
    async fn exclusive_blocks_other_owners() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let held = node1.try_acquire_exclusive("R").expect("free resource");
        assert!(node2.try_acquire_exclusive("R").is_none());
        assert!(node2.try_acquire_shared("R").is_none());

        assert!(node1.release(&held));
        assert!(node2.try_acquire_exclusive("R").is_some());
    }

    #[tokio::test]
    async fn exclusive_conflicts_with_same_owner() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");

        let _held = node1.try_acquire_exclusive("R").expect("free resource");
        assert!(node1.try_acquire_exclusive("R").is_none());
    }

    #[tokio::test]
    async fn shared_locks_coexist() {
        let registry = registry();
        let holders: Vec<LockEntry> = (1..=3)
            .map(|idx| {
                manager(&registry, &format!("node-{idx}"))
                    .try_acquire_shared("S")
                    .expect("shared grant")
            })
            .collect();

        let writer = manager(&registry, "writer");
        assert!(writer.try_acquire_exclusive("S").is_none());

        for (idx, entry) in holders.iter().enumerate() {
            let owner = manager(&registry, &format!("node-{}", idx + 1));
            assert!(owner.release(entry));
        }
        assert!(writer.try_acquire_exclusive("S").is_some());
    }

    #[tokio::test]
    async fn holders_are_never_mixed() {
        let registry = registry();
        let reader = manager(&registry, "reader");
        let writer = manager(&registry, "writer");

        let _shared = reader.try_acquire_shared("S").expect("shared");
        assert!(writer.try_acquire_exclusive("S").is_none());

        let locks = registry.locks("S");
        assert!(locks
            .iter()
            .all(|info| info.lock_type == LockType::Shared));
    }

    #[tokio::test]
    async fn release_by_non_owner_is_noop() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let held = node1.try_acquire_exclusive("R").expect("grant");
        assert!(!node2.release(&held));
        assert!(registry.is_locked("R"));
        assert!(node1.release(&held));
        assert!(!registry.is_locked("R"));
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_release() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let held = node1.try_acquire_exclusive("R").expect("grant");

        let waiter = {
            let node2 = node2.clone();
            tokio::spawn(async move {
                node2
                    .acquire_with_timeout(
                        "R",
                        LockType::Exclusive,
                        Duration::from_secs(30),
                        Duration::from_millis(500),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(node1.release(&held));

        let granted = waiter.await.unwrap();
        assert!(granted.is_some());
        assert_eq!(granted.unwrap().owner, "node-2");
    }

    #[tokio::test]
    async fn waiter_times_out_cleanly() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let held = node1.try_acquire_exclusive("R").expect("grant");
        let outcome = node2
            .acquire_with_timeout(
                "R",
                LockType::Exclusive,
                Duration::from_secs(30),
                Duration::from_millis(50),
            )
            .await;
        assert!(outcome.is_none());

        // No phantom waiter: releasing now leaves the resource free.
        assert!(node1.release(&held));
        assert!(!registry.is_locked("R"));
    }

    #[tokio::test]
    async fn fifo_exclusive_head_blocks_shared_arrivals() {
        let registry = registry();
        let reader = manager(&registry, "reader");
        let writer = manager(&registry, "writer");
        let late_reader = manager(&registry, "late-reader");

        let held = reader.try_acquire_shared("R").expect("shared grant");

        // Writer queues behind the shared holder.
        let queued_writer = {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer
                    .acquire_with_timeout(
                        "R",
                        LockType::Exclusive,
                        Duration::from_secs(30),
                        Duration::from_secs(2),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A late shared request may not jump the queued exclusive.
        assert!(late_reader.try_acquire_shared("R").is_none());

        assert!(reader.release(&held));
        let granted = queued_writer.await.unwrap();
        assert_eq!(granted.expect("writer granted").owner, "writer");
    }

    #[tokio::test]
    async fn consecutive_shared_heads_granted_together() {
        let registry = registry();
        let writer = manager(&registry, "writer");

        let held = writer.try_acquire_exclusive("R").expect("grant");

        let mut readers = Vec::new();
        for idx in 0..3 {
            let reader = manager(&registry, &format!("reader-{idx}"));
            readers.push(tokio::spawn(async move {
                reader
                    .acquire_with_timeout(
                        "R",
                        LockType::Shared,
                        Duration::from_secs(30),
                        Duration::from_secs(2),
                    )
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(writer.release(&held));
        for reader in readers {
            assert!(reader.await.unwrap().is_some());
        }
        assert_eq!(registry.locks("R").len(), 3);
    }

    #[tokio::test]
    async fn renewal_extends_and_caps() {
        let mut config = LockConfig::default();
        config.max_renewal_count = 2;
        let registry = registry_with(config);
        let node1 = manager(&registry, "node-1");

        let held = node1.try_acquire_exclusive("R").expect("grant");

        let first = node1.renew(&held).expect("first renewal");
        assert_eq!(first.renewal_count, 1);
        let second = node1.renew(&first).expect("second renewal");
        assert_eq!(second.renewal_count, 2);
        assert!(node1.renew(&second).is_none());
    }

    #[tokio::test]
    async fn renewal_requires_owner() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let held = node1.try_acquire_exclusive("R").expect("grant");
        assert!(node2.renew(&held).is_none());
        assert!(node1.renew(&held).is_some());
    }

    #[tokio::test]
    async fn expired_lease_frees_resource_and_wakes_waiter() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let _held = node1
            .acquire_with_timeout(
                "R",
                LockType::Exclusive,
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .expect("grant");

        let waiter = {
            let node2 = node2.clone();
            tokio::spawn(async move {
                node2
                    .acquire_with_timeout(
                        "R",
                        LockType::Exclusive,
                        Duration::from_secs(30),
                        Duration::from_secs(2),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(80)).await;

        registry.sweep(Instant::now());
        let granted = waiter.await.unwrap();
        assert_eq!(granted.expect("granted after expiry").owner, "node-2");
    }

    #[tokio::test]
    async fn background_sweeper_expires_leases() {
        let mut config = LockConfig::default();
        config.sweep_interval = Duration::from_millis(20);
        let registry = registry_with(config);
        registry.start_sweeper();

        let node1 = manager(&registry, "node-1");
        let _held = node1
            .acquire_with_timeout(
                "R",
                LockType::Exclusive,
                Duration::from_millis(30),
                Duration::from_millis(10),
            )
            .await
            .expect("grant");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!registry.is_locked("R"));
        registry.shutdown();
    }

    #[tokio::test]
    async fn scoped_execution_releases_on_success_and_failure() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");

        let value = node1
            .with_exclusive_lock("R", || async { Ok::<_, CacheError>(41 + 1) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(!registry.is_locked("R"));

        let failure: CacheResult<()> = node1
            .with_exclusive_lock("R", || async {
                Err(CacheError::Engine("task failed".to_string()))
            })
            .await;
        assert!(failure.is_err());
        assert!(!registry.is_locked("R"));
    }

    #[tokio::test]
    async fn scoped_execution_surfaces_conflict() {
        let mut config = LockConfig::default();
        config.lock_timeout = Duration::from_millis(50);
        let registry = registry_with(config);
        let node1 = manager(&registry, "node-1");
        let node2 = manager(&registry, "node-2");

        let _held = node1.try_acquire_exclusive("R").expect("grant");
        let outcome: CacheResult<()> = node2
            .with_exclusive_lock("R", || async { Ok(()) })
            .await;
        assert!(matches!(outcome, Err(CacheError::LockConflict)));
    }

    #[tokio::test]
    async fn stats_track_grants_and_active() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");

        let held = node1.try_acquire_exclusive("A").expect("grant");
        let _shared = node1.try_acquire_shared("B").expect("grant");

        let stats = registry.stats();
        assert_eq!(stats.total_locks, 2);
        assert_eq!(stats.active_locks, 2);

        node1.release(&held);
        let stats = registry.stats();
        assert_eq!(stats.total_locks, 2);
        assert_eq!(stats.active_locks, 1);
    }

    #[tokio::test]
    async fn clear_wakes_waiters_with_absent() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");

        let _held = node1.try_acquire_exclusive("R").expect("grant");

        let registry2 = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            registry2
                .acquire(
                    "R",
                    "node-2",
                    LockType::Exclusive,
                    Duration::from_secs(30),
                    Duration::from_secs(5),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Clearing drops the waiter's sender; it resolves to absent.
        registry.clear();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_renewal_keeps_lease_alive() {
        let mut config = LockConfig::default();
        config.renewal_interval = Duration::from_millis(30);
        config.max_renewal_count = 100;
        let registry = registry_with(config);
        let node1 = manager(&registry, "node-1");

        let held = node1
            .acquire_with_timeout(
                "R",
                LockType::Exclusive,
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .await
            .expect("grant");

        let renewer = node1.start_auto_renewal(&held);
        tokio::time::sleep(Duration::from_millis(300)).await;
        registry.sweep(Instant::now());
        assert!(registry.is_locked("R"));

        renewer.stop();
        assert!(node1.release(&held));
    }

    #[tokio::test]
    async fn auto_renewal_stops_after_release() {
        let mut config = LockConfig::default();
        config.renewal_interval = Duration::from_millis(20);
        let registry = registry_with(config);
        let node1 = manager(&registry, "node-1");

        let held = node1.try_acquire_exclusive("R").expect("grant");
        let renewer = node1.start_auto_renewal(&held);

        assert!(node1.release(&held));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(renewer.is_finished());
    }

    #[tokio::test]
    async fn shutdown_refuses_new_locks() {
        let registry = registry();
        let node1 = manager(&registry, "node-1");

        registry.shutdown();
        assert!(node1.try_acquire_exclusive("R").is_none());
        assert!(node1.acquire_exclusive("R").await.is_none());
    }

    #[cfg(feature = "global-registry")]
    mod global {
        use super::*;
        use serial_test::serial;

        #[tokio::test]
        #[serial]
        async fn default_registry_is_shared() {
            let registry = default_registry();
            registry.clear();

            let node1 = LockManager::new(default_registry(), "node-1");
            let node2 = LockManager::new(default_registry(), "node-2");

            let held = node1.try_acquire_exclusive("G").expect("grant");
            assert!(node2.try_acquire_exclusive("G").is_none());
            assert!(node1.release(&held));
            registry.clear();
        }
    }
}
