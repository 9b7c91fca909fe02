//! # Resource Manager
//!
//! Finite resource pools shared by concurrently running work items.
//!
//! ## Overview
//!
//! Every pool tracks `max_capacity` and `allocated`. A reservation is granted
//! all-or-nothing under a single mutex, so `allocated <= max_capacity` holds at
//! every instant and no partial grant is ever visible. The lock is never held
//! across an `.await`.
//!
//! ## Failure modes
//!
//! `reserve` reports failure as `false` rather than an error when:
//!
//! - the embedded circuit breaker is open after repeated allocation failures
//! - too many callers are already waiting (deadlock prevention)
//! - the request cannot be satisfied within the bounded backoff attempts or
//!   before the caller's timeout
//! - the request names an unknown pool or more than a pool can ever hold
//!
//! A reservation attempt that is cancelled (for example by an enclosing
//! timeout) leaves no allocation behind: commits happen atomically inside a
//! synchronous critical section and the waiting counter is restored on drop.

use super::work_item::{ResourceKind, ResourceRequirement};
use crate::logging::log_resource_operation;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pool capacities and allocation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManagerConfig {
    pub capacities: BTreeMap<ResourceKind, u64>,
    /// Concurrent waiters allowed before new callers are rejected outright
    pub max_waiting: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    /// Consecutive failed reservations that open the allocation breaker
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            capacities: BTreeMap::from([
                (ResourceKind::Cpu, 100),
                (ResourceKind::Memory, 200),
                (ResourceKind::Network, 50),
                (ResourceKind::ExternalApi, 50),
            ]),
            max_waiting: 20,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_secs(1),
            failure_threshold: 10,
            cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub max_capacity: u64,
    pub allocated: u64,
}

impl ResourcePool {
    pub fn available(&self) -> u64 {
        self.max_capacity.saturating_sub(self.allocated)
    }
}

/// Per-pool utilization snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolUtilization {
    pub total: u64,
    pub allocated: u64,
    pub available: u64,
    pub utilization_percent: f64,
    /// Work items currently holding some of this pool
    pub holders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub pools: BTreeMap<ResourceKind, PoolUtilization>,
    pub waiting: usize,
    pub active_reservations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub total_allocations: u64,
    pub failed_allocations: u64,
    pub deadlock_preventions: u64,
    pub active_reservations: usize,
    pub waiting: usize,
    pub circuit_breaker: CircuitBreakerStatus,
}

#[derive(Debug, Default)]
struct AllocatorState {
    pools: BTreeMap<ResourceKind, ResourcePool>,
    reservations: HashMap<String, BTreeMap<ResourceKind, u64>>,
    waiting: HashMap<String, usize>,
    waiting_count: usize,
    total_allocations: u64,
    failed_allocations: u64,
    deadlock_preventions: u64,
}

impl AllocatorState {
    fn fits(&self, requested: &BTreeMap<ResourceKind, u64>) -> bool {
        requested.iter().all(|(kind, amount)| {
            self.pools
                .get(kind)
                .is_some_and(|pool| pool.available() >= *amount)
        })
    }

    fn commit(&mut self, work_item_id: &str, requested: &BTreeMap<ResourceKind, u64>) {
        let record = self.reservations.entry(work_item_id.to_string()).or_default();
        for (kind, amount) in requested {
            if let Some(pool) = self.pools.get_mut(kind) {
                pool.allocated += amount;
            }
            *record.entry(kind.clone()).or_default() += amount;
        }
        self.total_allocations += 1;
    }

    fn leave_waiting(&mut self, work_item_id: &str) {
        self.waiting_count = self.waiting_count.saturating_sub(1);
        if let Some(count) = self.waiting.get_mut(work_item_id) {
            *count -= 1;
            if *count == 0 {
                self.waiting.remove(work_item_id);
            }
        }
    }
}

/// Restores the waiting counter when a reservation attempt ends or is dropped
struct WaitingGuard<'a> {
    manager: &'a ResourceManager,
    work_item_id: &'a str,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.manager.state.lock().leave_waiting(self.work_item_id);
    }
}

#[derive(Debug)]
pub struct ResourceManager {
    config: ResourceManagerConfig,
    state: Mutex<AllocatorState>,
    breaker: CircuitBreaker,
}

impl ResourceManager {
    pub fn new(config: ResourceManagerConfig) -> Self {
        let pools = config
            .capacities
            .iter()
            .map(|(kind, capacity)| {
                (
                    kind.clone(),
                    ResourcePool {
                        max_capacity: *capacity,
                        allocated: 0,
                    },
                )
            })
            .collect();
        let breaker = CircuitBreaker::new(
            "resource_manager",
            CircuitBreakerConfig::new(config.failure_threshold, config.cooldown),
        );

        info!(
            pools = config.capacities.len(),
            max_waiting = config.max_waiting,
            failure_threshold = config.failure_threshold,
            "📦 Resource manager initialized"
        );

        Self {
            config,
            state: Mutex::new(AllocatorState {
                pools,
                ..Default::default()
            }),
            breaker,
        }
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    /// Reserve every requirement for `work_item_id`, or nothing.
    ///
    /// Reserving again for an id that already holds resources adds to its
    /// record, so one [`release`](Self::release) frees everything.
    pub async fn reserve(
        &self,
        work_item_id: &str,
        requirements: &[ResourceRequirement],
        timeout: Duration,
    ) -> bool {
        let requested = match self.normalize(work_item_id, requirements) {
            Some(requested) => requested,
            None => {
                self.state.lock().failed_allocations += 1;
                return false;
            }
        };
        if requested.is_empty() {
            return true;
        }

        if !self.breaker.try_acquire() {
            warn!(
                work_item_id = %work_item_id,
                "⛔ Resource allocation refused, circuit breaker open"
            );
            self.state.lock().failed_allocations += 1;
            return false;
        }

        let Some(_waiting) = self.enter_waiting(work_item_id) else {
            self.breaker.record_failure(Duration::ZERO);
            return false;
        };

        let started = tokio::time::Instant::now();
        let granted = tokio::time::timeout(timeout, self.allocate_with_backoff(work_item_id, &requested))
            .await
            .unwrap_or(false);
        let elapsed = started.elapsed();

        if granted {
            self.breaker.record_success(elapsed);
            log_resource_operation("reserve", work_item_id, "granted", None);
        } else {
            self.breaker.record_failure(elapsed);
            self.state.lock().failed_allocations += 1;
            warn!(
                work_item_id = %work_item_id,
                resources = ?requested,
                elapsed_ms = elapsed.as_millis() as u64,
                "⏳ Resource reservation failed"
            );
        }
        granted
    }

    /// Grant every requirement right now or nothing, without waiting.
    ///
    /// A refusal here only means the pools are busy at this instant, so it
    /// is neither counted as a failed allocation nor reported to the breaker.
    pub fn try_reserve(&self, work_item_id: &str, requirements: &[ResourceRequirement]) -> bool {
        let Some(requested) = self.normalize(work_item_id, requirements) else {
            return false;
        };
        if requested.is_empty() {
            return true;
        }
        if self.breaker.state() == CircuitState::Open {
            return false;
        }
        let mut state = self.state.lock();
        if !state.fits(&requested) {
            return false;
        }
        state.commit(work_item_id, &requested);
        drop(state);
        log_resource_operation("reserve", work_item_id, "granted", None);
        true
    }

    /// Validate requirements and fold them into one amount per kind
    fn normalize(
        &self,
        work_item_id: &str,
        requirements: &[ResourceRequirement],
    ) -> Option<BTreeMap<ResourceKind, u64>> {
        let mut requested: BTreeMap<ResourceKind, u64> = BTreeMap::new();
        for requirement in requirements {
            let Some(capacity) = self.config.capacities.get(&requirement.kind) else {
                error!(
                    work_item_id = %work_item_id,
                    kind = %requirement.kind,
                    "Unknown resource kind requested"
                );
                return None;
            };
            let total = requested.entry(requirement.kind.clone()).or_default();
            *total = total.saturating_add(requirement.amount);
            if *total > *capacity {
                error!(
                    work_item_id = %work_item_id,
                    kind = %requirement.kind,
                    requested = *total,
                    capacity = *capacity,
                    "Requested amount exceeds pool capacity"
                );
                return None;
            }
        }
        requested.retain(|_, amount| *amount > 0);
        Some(requested)
    }

    fn enter_waiting<'a>(&'a self, work_item_id: &'a str) -> Option<WaitingGuard<'a>> {
        let mut state = self.state.lock();
        if state.waiting_count >= self.config.max_waiting {
            state.deadlock_preventions += 1;
            state.failed_allocations += 1;
            warn!(
                work_item_id = %work_item_id,
                waiting = state.waiting_count,
                max_waiting = self.config.max_waiting,
                "🚧 Too many waiting reservations, rejecting to prevent deadlock"
            );
            return None;
        }
        state.waiting_count += 1;
        *state.waiting.entry(work_item_id.to_string()).or_default() += 1;
        Some(WaitingGuard {
            manager: self,
            work_item_id,
        })
    }

    async fn allocate_with_backoff(
        &self,
        work_item_id: &str,
        requested: &BTreeMap<ResourceKind, u64>,
    ) -> bool {
        let mut delay = self.config.initial_backoff;
        for attempt in 0..self.config.max_attempts.max(1) {
            {
                let mut state = self.state.lock();
                if state.fits(requested) {
                    state.commit(work_item_id, requested);
                    return true;
                }
            }
            if attempt + 1 < self.config.max_attempts {
                debug!(
                    work_item_id = %work_item_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Resources busy, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = delay
                    .mul_f64(self.config.backoff_multiplier)
                    .min(self.config.max_backoff);
            }
        }
        false
    }

    /// Release everything held by `work_item_id`. Idempotent.
    pub fn release(&self, work_item_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.reservations.remove(work_item_id) else {
            return false;
        };
        for (kind, amount) in &record {
            if let Some(pool) = state.pools.get_mut(kind) {
                pool.allocated = pool.allocated.saturating_sub(*amount);
            }
        }
        log_resource_operation("release", work_item_id, "released", None);
        true
    }

    /// Emergency reset: zero every pool, drop all reservations and waiters
    pub fn force_cleanup_all(&self) {
        let mut state = self.state.lock();
        let dropped = state.reservations.len();
        for pool in state.pools.values_mut() {
            pool.allocated = 0;
        }
        state.reservations.clear();
        state.waiting.clear();
        state.waiting_count = 0;
        warn!(dropped_reservations = dropped, "🧹 Forced cleanup of all resource allocations");
    }

    pub fn pool(&self, kind: &ResourceKind) -> Option<ResourcePool> {
        self.state.lock().pools.get(kind).copied()
    }

    pub fn allocation_for(&self, work_item_id: &str) -> Option<BTreeMap<ResourceKind, u64>> {
        self.state.lock().reservations.get(work_item_id).cloned()
    }

    pub fn waiting_work_items(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().waiting.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn utilization(&self) -> ResourceUtilization {
        let state = self.state.lock();
        let pools = state
            .pools
            .iter()
            .map(|(kind, pool)| {
                let utilization_percent = if pool.max_capacity == 0 {
                    0.0
                } else {
                    pool.allocated as f64 / pool.max_capacity as f64 * 100.0
                };
                let holders = state
                    .reservations
                    .values()
                    .filter(|held| held.get(kind).is_some_and(|amount| *amount > 0))
                    .count();
                (
                    kind.clone(),
                    PoolUtilization {
                        total: pool.max_capacity,
                        allocated: pool.allocated,
                        available: pool.available(),
                        utilization_percent,
                        holders,
                    },
                )
            })
            .collect();
        ResourceUtilization {
            pools,
            waiting: state.waiting_count,
            active_reservations: state.reservations.len(),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        let circuit_breaker = self.breaker.status();
        let state = self.state.lock();
        AllocatorStats {
            total_allocations: state.total_allocations,
            failed_allocations: state.failed_allocations,
            deadlock_preventions: state.deadlock_preventions,
            active_reservations: state.reservations.len(),
            waiting: state.waiting_count,
            circuit_breaker,
        }
    }

    /// RAII handle releasing the reservation of `work_item_id` on drop
    pub fn reservation_guard(self: &Arc<Self>, work_item_id: impl Into<String>) -> ReservationGuard {
        ReservationGuard {
            manager: Arc::clone(self),
            work_item_id: work_item_id.into(),
        }
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceManagerConfig::default())
    }
}

/// Releases a work item's resources when dropped, including on panic or cancellation
#[derive(Debug)]
pub struct ReservationGuard {
    manager: Arc<ResourceManager>,
    work_item_id: String,
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.manager.release(&self.work_item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ResourceManagerConfig {
        ResourceManagerConfig {
            capacities: BTreeMap::from([(ResourceKind::Cpu, 10), (ResourceKind::Memory, 10)]),
            max_waiting: 2,
            max_attempts: 2,
            initial_backoff: Duration::from_millis(5),
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_millis(10),
            failure_threshold: 3,
            cooldown: Duration::from_millis(30),
        }
    }

    fn cpu(amount: u64) -> Vec<ResourceRequirement> {
        vec![ResourceRequirement::new(ResourceKind::Cpu, amount)]
    }

    #[tokio::test]
    async fn test_reserve_and_release_round_trip() {
        let manager = ResourceManager::new(small_config());
        let request = vec![
            ResourceRequirement::new(ResourceKind::Cpu, 4),
            ResourceRequirement::new(ResourceKind::Memory, 6),
        ];
        assert!(manager.reserve("a", &request, Duration::from_secs(1)).await);
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 4);
        assert_eq!(manager.pool(&ResourceKind::Memory).unwrap().allocated, 6);

        assert!(manager.release("a"));
        assert!(!manager.release("a"));
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 0);
        assert_eq!(manager.pool(&ResourceKind::Memory).unwrap().allocated, 0);
    }

    #[tokio::test]
    async fn test_try_reserve_does_not_wait_or_count_failures() {
        let manager = ResourceManager::new(small_config());
        assert!(manager.try_reserve("a", &cpu(8)));
        for _ in 0..5 {
            assert!(!manager.try_reserve("b", &cpu(5)));
        }
        assert_eq!(manager.stats().failed_allocations, 0);
        assert_eq!(manager.stats().circuit_breaker.state, CircuitState::Closed);

        manager.release("a");
        assert!(manager.try_reserve("b", &cpu(5)));
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 5);
        assert!(!manager.try_reserve("c", &cpu(11)));
    }

    #[tokio::test]
    async fn test_all_or_nothing() {
        let manager = ResourceManager::new(small_config());
        assert!(manager.reserve("a", &cpu(8), Duration::from_secs(1)).await);

        let request = vec![
            ResourceRequirement::new(ResourceKind::Memory, 5),
            ResourceRequirement::new(ResourceKind::Cpu, 5),
        ];
        assert!(!manager.reserve("b", &request, Duration::from_secs(1)).await);
        assert_eq!(manager.pool(&ResourceKind::Memory).unwrap().allocated, 0);
        assert!(manager.allocation_for("b").is_none());
    }

    #[tokio::test]
    async fn test_waiter_succeeds_after_release() {
        let manager = Arc::new(ResourceManager::new(ResourceManagerConfig {
            max_attempts: 10,
            ..small_config()
        }));
        assert!(manager.reserve("a", &cpu(10), Duration::from_secs(1)).await);

        let releaser = Arc::clone(&manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            releaser.release("a");
        });

        assert!(manager.reserve("b", &cpu(5), Duration::from_secs(1)).await);
        assert_eq!(manager.allocation_for("b").unwrap()[&ResourceKind::Cpu], 5);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let manager = ResourceManager::new(small_config());
        let unknown = vec![ResourceRequirement::new("gpu", 1)];
        assert!(!manager.reserve("a", &unknown, Duration::from_secs(1)).await);
        assert!(!manager.reserve("a", &cpu(11), Duration::from_secs(1)).await);
        assert_eq!(manager.stats().failed_allocations, 2);
        assert_eq!(manager.stats().circuit_breaker.failure_count, 0);
    }

    #[tokio::test]
    async fn test_repeated_reserve_accumulates() {
        let manager = ResourceManager::new(small_config());
        assert!(manager.reserve("a", &cpu(3), Duration::from_secs(1)).await);
        assert!(manager.reserve("a", &cpu(2), Duration::from_secs(1)).await);
        assert_eq!(manager.allocation_for("a").unwrap()[&ResourceKind::Cpu], 5);
        manager.release("a");
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 0);
    }

    #[tokio::test]
    async fn test_deadlock_prevention_rejects_extra_waiters() {
        let manager = Arc::new(ResourceManager::new(ResourceManagerConfig {
            max_attempts: 50,
            ..small_config()
        }));
        assert!(manager.reserve("holder", &cpu(10), Duration::from_secs(1)).await);

        let mut waiters = Vec::new();
        for id in ["w1", "w2"] {
            let manager = Arc::clone(&manager);
            waiters.push(tokio::spawn(async move {
                manager.reserve(id, &cpu(1), Duration::from_millis(200)).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.waiting_work_items(), vec!["w1", "w2"]);

        assert!(!manager.reserve("w3", &cpu(1), Duration::from_secs(1)).await);
        assert_eq!(manager.stats().deadlock_preventions, 1);

        manager.force_cleanup_all();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(manager.utilization().waiting, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_partial_state() {
        let manager = ResourceManager::new(ResourceManagerConfig {
            max_attempts: 100,
            ..small_config()
        });
        assert!(manager.reserve("a", &cpu(10), Duration::from_secs(1)).await);
        assert!(!manager.reserve("b", &cpu(1), Duration::from_millis(20)).await);
        assert!(manager.allocation_for("b").is_none());
        assert_eq!(manager.utilization().waiting, 0);
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 10);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failures() {
        let manager = ResourceManager::new(small_config());
        assert!(manager.reserve("hog", &cpu(10), Duration::from_secs(1)).await);
        for id in ["x", "y", "z"] {
            assert!(!manager.reserve(id, &cpu(1), Duration::from_secs(1)).await);
        }
        manager.release("hog");

        // Open: refused even though capacity is free
        assert!(!manager.reserve("late", &cpu(1), Duration::from_secs(1)).await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(manager.reserve("probe", &cpu(1), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_force_cleanup_resets_pools() {
        let manager = ResourceManager::new(small_config());
        assert!(manager.reserve("a", &cpu(7), Duration::from_secs(1)).await);
        assert_eq!(manager.utilization().pools[&ResourceKind::Cpu].holders, 1);
        manager.force_cleanup_all();

        let utilization = manager.utilization();
        assert_eq!(utilization.active_reservations, 0);
        assert_eq!(utilization.pools[&ResourceKind::Cpu].allocated, 0);
        assert_eq!(utilization.pools[&ResourceKind::Cpu].holders, 0);
        assert!(!manager.release("a"));
    }

    #[tokio::test]
    async fn test_reservation_guard_releases_on_drop() {
        let manager = Arc::new(ResourceManager::new(small_config()));
        assert!(manager.reserve("a", &cpu(4), Duration::from_secs(1)).await);
        {
            let _guard = manager.reservation_guard("a");
        }
        assert_eq!(manager.pool(&ResourceKind::Cpu).unwrap().allocated, 0);
    }
}
