//! Ring topology cache.
//!
//! Readers get the cached `Arc<RingTopology>` without ever blocking on
//! I/O. `invalidate` marks a ring stale and queues it for a background
//! worker, which asks the [`RingTopologyProvider`] for a fresh view and
//! installs it only if its cache ids are ahead of what is cached.

use crate::registry::RingMembership;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tideline_core::{RingMember, RingName, RingTopology};
use tracing::{debug, warn};

/// Source of authoritative ring topologies (membership service).
pub trait RingTopologyProvider: Send + Sync {
    /// Fetch the current topology of `ring`.
    fn fetch(&self, ring: &RingName) -> tideline_core::Result<RingTopology>;
}

#[derive(Debug, Clone)]
struct CachedRing {
    topology: Arc<RingTopology>,
    stale: bool,
}

struct RefreshQueue {
    pending: VecDeque<RingName>,
    active: usize,
}

struct CacheInner {
    rings: DashMap<RingName, CachedRing>,
    provider: Arc<dyn RingTopologyProvider>,
    queue: Mutex<RefreshQueue>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    refreshes: AtomicU64,
}

impl CacheInner {
    /// Replace the cached view with a newer one. Returns whether anything
    /// changed.
    ///
    /// Cache ids only move forward: a view with lower `(ring_cache_id,
    /// node_cache_id)` than the cached one is ignored.
    fn install(&self, ring: RingName, topology: RingTopology) -> bool {
        let mut changed = true;
        let incoming = view_id(&topology);
        self.rings
            .entry(ring)
            .and_modify(|cached| {
                let current = view_id(&cached.topology);
                if incoming <= current {
                    changed = false;
                    if incoming < current {
                        debug!(?incoming, ?current, "Ignoring older ring topology");
                    }
                } else {
                    cached.topology = Arc::new(topology.clone());
                }
                cached.stale = false;
            })
            .or_insert_with(|| CachedRing {
                topology: Arc::new(topology.clone()),
                stale: false,
            });
        changed
    }

    fn refresh(&self, ring: &RingName) -> tideline_core::Result<bool> {
        let topology = self.provider.fetch(ring)?;
        let changed = self.install(ring.clone(), topology);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(ring = %ring, changed, "Refreshed ring topology");
        Ok(changed)
    }
}

fn view_id(topology: &RingTopology) -> (u64, u64) {
    (topology.ring_cache_id(), topology.node_cache_id())
}

/// Cache of ring topologies with asynchronous refresh.
pub struct RingTopologyCache {
    inner: Arc<CacheInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RingTopologyCache {
    /// Create a cache backed by `provider` and start its refresh worker.
    ///
    /// The worker thread is named `tideline-ring-refresh`.
    pub fn new(provider: Arc<dyn RingTopologyProvider>) -> io::Result<Self> {
        let inner = Arc::new(CacheInner {
            rings: DashMap::new(),
            provider,
            queue: Mutex::new(RefreshQueue {
                pending: VecDeque::new(),
                active: 0,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            refreshes: AtomicU64::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("tideline-ring-refresh".to_string())
            .spawn(move || refresh_loop(&worker_inner))?;

        Ok(RingTopologyCache {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Cached topology of `ring`, possibly stale. Never blocks on I/O.
    pub fn get(&self, ring: &RingName) -> Option<Arc<RingTopology>> {
        self.inner
            .rings
            .get(ring)
            .map(|cached| Arc::clone(&cached.topology))
    }

    /// Whether `ring` is marked stale and awaiting refresh
    pub fn is_stale(&self, ring: &RingName) -> bool {
        self.inner
            .rings
            .get(ring)
            .map_or(false, |cached| cached.stale)
    }

    /// Install `topology` for `ring`. Returns `false` if the cache already
    /// held the same or a newer view.
    pub fn install(&self, ring: RingName, topology: RingTopology) -> bool {
        self.inner.install(ring, topology)
    }

    /// Mark `ring` stale and schedule a background refresh.
    ///
    /// A ring already waiting in the queue is not queued twice.
    pub fn invalidate(&self, ring: &RingName) {
        if let Some(mut cached) = self.inner.rings.get_mut(ring) {
            cached.stale = true;
        }
        let mut queue = self.inner.queue.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        if !queue.pending.contains(ring) {
            queue.pending.push_back(ring.clone());
            self.inner.work_ready.notify_one();
        }
    }

    /// Fetch and install `ring` on the calling thread.
    pub fn refresh_now(&self, ring: &RingName) -> tideline_core::Result<bool> {
        self.inner.refresh(ring)
    }

    /// Block until every queued refresh has finished.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.pending.is_empty() || queue.active > 0 {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Completed refreshes since creation
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::Relaxed)
    }

    /// Bind the cache to `member` as a ring membership predicate.
    pub fn for_member(&self, member: RingMember) -> MemberRings<'_> {
        MemberRings {
            cache: self,
            member,
        }
    }

    /// Stop the refresh worker. Queued refreshes still run first.
    pub fn shutdown(&self) {
        {
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.work_ready.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Ring refresh worker panicked");
            }
        }
    }
}

impl Drop for RingTopologyCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RingTopologyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingTopologyCache")
            .field("rings", &self.inner.rings.len())
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}

fn refresh_loop(inner: &CacheInner) {
    loop {
        let ring = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(ring) = queue.pending.pop_front() {
                    queue.active += 1;
                    break ring;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        if let Err(e) = inner.refresh(&ring) {
            warn!(ring = %ring, error = %e, "Ring topology refresh failed; keeping stale view");
        }

        let mut queue = inner.queue.lock();
        queue.active -= 1;
        if queue.pending.is_empty() && queue.active == 0 {
            inner.idle.notify_all();
        }
    }
}

/// A ring cache bound to one member, usable as [`RingMembership`].
#[derive(Debug)]
pub struct MemberRings<'a> {
    cache: &'a RingTopologyCache,
    member: RingMember,
}

impl RingMembership for MemberRings<'_> {
    fn is_member(&self, ring: &RingName) -> bool {
        self.cache
            .get(ring)
            .map_or(false, |topology| topology.contains(&self.member))
    }
}
