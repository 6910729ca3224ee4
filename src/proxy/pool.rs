use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, health, Config};
use crate::error::{AppError, Result};
use crate::proxy::source::{collect_candidates, ProxySource};
use crate::types::{Proxy, ProxyOutcome};

// ---------------------------------------------------------------------------
// ProxyProvider
// ---------------------------------------------------------------------------

/// What a fetch unit needs from a proxy pool.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Wait for a loanable proxy. `None` only once shutdown has been requested.
    async fn acquire(&self) -> Option<Proxy>;

    /// Feed back the result of one request made through `proxy`.
    fn report(&self, proxy: &Proxy, outcome: ProxyOutcome);

    /// Return a borrowed proxy unused, e.g. when it was handed out twice in a row.
    fn release(&self, proxy: Proxy);
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Active proxies required for a warm refill; below it the pool goes cold.
    pub min_pool: usize,
    pub eviction_floor: i64,
    pub reuse_ceiling: i64,
    pub health_cap: i64,
    pub failure_penalty: i64,
    pub queue_capacity: usize,
    pub cold_pause: Duration,
    pub cold_cooldown: Duration,
    pub acquire_retry: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_pool: config::MIN_POOL,
            eviction_floor: health::EVICTION_FLOOR,
            reuse_ceiling: health::REUSE_CEILING,
            health_cap: health::HEALTH_CAP,
            failure_penalty: health::FAILURE_PENALTY,
            queue_capacity: config::READY_QUEUE_CAPACITY,
            cold_pause: Duration::from_millis(config::COLD_REFILL_PAUSE_MS),
            cold_cooldown: Duration::from_secs(config::COLD_REFILL_COOLDOWN_SECS),
            acquire_retry: Duration::from_millis(config::ACQUIRE_RETRY_MS),
        }
    }
}

impl PoolSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self { min_pool: cfg.min_pool, ..Self::default() }
    }
}

// ---------------------------------------------------------------------------
// Ready queue
// ---------------------------------------------------------------------------

/// FIFO of loanable proxies. `members` mirrors `order` so a proxy is queued at most once.
#[derive(Debug, Default)]
struct ReadyQueue {
    order: VecDeque<Proxy>,
    members: HashSet<Proxy>,
}

impl ReadyQueue {
    fn push(&mut self, proxy: Proxy) -> bool {
        if !self.members.insert(proxy.clone()) {
            return false;
        }
        self.order.push_back(proxy);
        true
    }

    fn pop(&mut self) -> Option<Proxy> {
        let proxy = self.order.pop_front()?;
        self.members.remove(&proxy);
        Some(proxy)
    }

    fn remove(&mut self, proxy: &Proxy) {
        if self.members.remove(proxy) {
            self.order.retain(|p| p != proxy);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Bookkeeping that only the refill lock holder touches.
#[derive(Debug, Default)]
struct RefillState {
    /// Cold refills are skipped until this instant after one came back empty.
    cooldown_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub known: usize,
    pub active: usize,
    pub ready: usize,
    pub warm_refills: u64,
    pub cold_refills: u64,
}

// ---------------------------------------------------------------------------
// ProxyPool
// ---------------------------------------------------------------------------

/// Shared proxy pool with a per-proxy health score.
///
/// Lock order is always `ready` before a `health` shard, so every step that
/// touches both is atomic with respect to the others. Only one refill runs at
/// a time; callers that find `refill` held sleep briefly and retry instead of
/// queueing behind the network call.
pub struct ProxyPool {
    /// proxy → health score for every proxy ever discovered
    health: DashMap<Proxy, i64>,
    ready: Mutex<ReadyQueue>,
    refill: tokio::sync::Mutex<RefillState>,
    sources: Vec<Box<dyn ProxySource>>,
    settings: PoolSettings,
    shutdown: CancellationToken,
    warm_refills: AtomicU64,
    cold_refills: AtomicU64,
}

impl ProxyPool {
    pub fn new(
        sources: Vec<Box<dyn ProxySource>>,
        settings: PoolSettings,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            health: DashMap::new(),
            ready: Mutex::new(ReadyQueue::default()),
            refill: tokio::sync::Mutex::new(RefillState::default()),
            sources,
            settings,
            shutdown,
            warm_refills: AtomicU64::new(0),
            cold_refills: AtomicU64::new(0),
        })
    }

    fn ready(&self) -> MutexGuard<'_, ReadyQueue> {
        self.ready.lock()
    }

    /// Cold-start the pool before any work is scheduled.
    /// Zero usable proxies at this point is fatal for the run.
    pub async fn prime(&self) -> Result<usize> {
        let outcome = self.replenish().await;
        let ready = self.ready().len();
        if ready == 0 {
            if let Err(e) = outcome {
                warn!("Initial proxy refill failed: {e}");
            }
            return Err(AppError::NoProxies);
        }
        Ok(ready)
    }

    /// Refill the ready queue, waiting for any refill already in progress.
    /// Returns how many proxies were queued.
    pub async fn replenish(&self) -> Result<usize> {
        let mut state = self.refill.lock().await;
        self.replenish_locked(&mut state).await
    }

    async fn replenish_locked(&self, state: &mut RefillState) -> Result<usize> {
        let active = self.active_count();
        if active > self.settings.min_pool {
            return Ok(self.warm_refill());
        }

        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                debug!(active, "Cold refill cooling down, reshuffling known proxies");
                return Ok(self.warm_refill());
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(0),
            _ = tokio::time::sleep(self.settings.cold_pause) => {}
        }

        self.cold_refills.fetch_add(1, Ordering::Relaxed);
        let fetched = collect_candidates(&self.sources).await;
        let source_err = match fetched {
            Ok(candidates) => {
                let offered = candidates.len();
                let added = self.insert_new(candidates);
                info!(
                    active,
                    offered,
                    added,
                    known = self.health.len(),
                    "Cold refill: {added} new proxies from {offered} candidates",
                );
                None
            }
            Err(e) => Some(e),
        };

        let queued = self.warm_refill();
        if queued == 0 || source_err.is_some() {
            state.cooldown_until = Some(Instant::now() + self.settings.cold_cooldown);
        } else {
            state.cooldown_until = None;
        }

        match source_err {
            Some(e) if queued == 0 => {
                warn!("Cold refill failed, retrying after cooldown: {e}");
                Err(e)
            }
            Some(e) => {
                warn!(queued, "Proxy sources unavailable, continuing with known proxies: {e}");
                Ok(queued)
            }
            None => Ok(queued),
        }
    }

    /// Register unseen proxies at health 0. Returns how many were new.
    fn insert_new(&self, proxies: impl IntoIterator<Item = Proxy>) -> usize {
        let mut added = 0;
        for proxy in proxies {
            self.health.entry(proxy).or_insert_with(|| {
                added += 1;
                0
            });
        }
        added
    }

    /// Queue every known proxy whose score is within
    /// `[eviction_floor, reuse_ceiling]`, rewarding each with +1.
    fn warm_refill(&self) -> usize {
        let mut ready = self.ready();
        let mut queued = 0;
        for mut entry in self.health.iter_mut() {
            if ready.len() >= self.settings.queue_capacity {
                break;
            }
            let score = *entry.value();
            if score < self.settings.eviction_floor || score > self.settings.reuse_ceiling {
                continue;
            }
            if ready.push(entry.key().clone()) {
                *entry.value_mut() = (score + 1).min(self.settings.health_cap);
                queued += 1;
            }
        }
        drop(ready);

        self.warm_refills.fetch_add(1, Ordering::Relaxed);
        debug!(queued, "Warm refill");
        queued
    }

    fn pop_ready(&self) -> Option<Proxy> {
        let mut ready = self.ready();
        while let Some(proxy) = ready.pop() {
            let score = self.health.get(&proxy).map(|s| *s);
            if matches!(score, Some(s) if s >= self.settings.eviction_floor) {
                return Some(proxy);
            }
        }
        None
    }

    fn apply(&self, proxy: &Proxy, outcome: ProxyOutcome) -> i64 {
        let mut ready = self.ready();
        let score = {
            let mut entry = self.health.entry(proxy.clone()).or_insert(0);
            let next = match outcome {
                ProxyOutcome::Success if *entry > 0 => *entry - 1,
                ProxyOutcome::Success => *entry,
                ProxyOutcome::Failure => *entry - self.settings.failure_penalty,
            };
            *entry = next.min(self.settings.health_cap);
            *entry
        };
        if score < self.settings.eviction_floor {
            ready.remove(proxy);
        }
        score
    }

    fn active_count(&self) -> usize {
        self.health
            .iter()
            .filter(|e| *e.value() >= self.settings.eviction_floor)
            .count()
    }

    #[cfg(test)]
    pub fn health_of(&self, proxy: &Proxy) -> Option<i64> {
        self.health.get(proxy).map(|s| *s)
    }

    /// Ready queue contents with their current scores, front first.
    #[cfg(test)]
    pub fn ready_snapshot(&self) -> Vec<(Proxy, i64)> {
        let ready = self.ready();
        ready
            .order
            .iter()
            .map(|p| (p.clone(), self.health.get(p).map(|s| *s).unwrap_or_default()))
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            known: self.health.len(),
            active: self.active_count(),
            ready: self.ready().len(),
            warm_refills: self.warm_refills.load(Ordering::Relaxed),
            cold_refills: self.cold_refills.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ProxyProvider for ProxyPool {
    async fn acquire(&self) -> Option<Proxy> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            if let Some(proxy) = self.pop_ready() {
                return Some(proxy);
            }

            // Whoever gets the lock refills; everyone else backs off and retries.
            if let Ok(mut state) = self.refill.try_lock() {
                let dry = self.ready().len() == 0;
                if dry {
                    if let Err(e) = self.replenish_locked(&mut state).await {
                        debug!("Refill produced no proxies: {e}");
                    }
                }
                drop(state);
                let refilled = self.ready().len() > 0;
                if refilled {
                    continue;
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.acquire_retry) => {}
            }
        }
    }

    fn report(&self, proxy: &Proxy, outcome: ProxyOutcome) {
        let score = self.apply(proxy, outcome);
        if score < self.settings.eviction_floor {
            debug!(proxy = %proxy, score, "Proxy fell below eviction floor");
        }
    }

    /// A handed-back proxy was already admitted, so anything at or above the
    /// floor goes back in the queue. A score pushed past the ceiling by the
    /// refill reward is brought back down to it.
    fn release(&self, proxy: Proxy) {
        let mut ready = self.ready();
        let eligible = match self.health.get_mut(&proxy) {
            Some(mut score) if *score >= self.settings.eviction_floor => {
                *score = (*score).min(self.settings.reuse_ceiling);
                true
            }
            _ => false,
        };
        if eligible && ready.len() < self.settings.queue_capacity {
            ready.push(proxy);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
