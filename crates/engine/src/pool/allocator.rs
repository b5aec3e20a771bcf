//! Worker handle allocator
//!
//! Grants exclusive use of a bounded set of worker handles with
//! round-robin reuse, FIFO backpressure and per-slot recycling.
//!
//! All bookkeeping (busy flags, rotation, wait queue) is mutated inside
//! short synchronous critical sections. The lock is never held across a
//! suspension point, so two callers can never observe the same free slot.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::error::{AllocatorError, ConfigError, WorkerError};

/// Index of a slot inside its pool
pub type SlotId = usize;

/// Future resolving when a recycle operation completes
///
/// Every caller recycling the same slot concurrently receives a clone of
/// the same future. Dropping it does not cancel the recycle.
pub type RecycleFuture = Shared<BoxFuture<'static, ()>>;

/// Creates and destroys the resources managed by an [`Allocator`]
#[async_trait]
pub trait HandleFactory: Send + Sync + 'static {
    /// Handle type; clones refer to the same underlying resource
    type Handle: Clone + Send + Sync + 'static;

    /// Create a new resource
    async fn create(&self) -> Result<Self::Handle, WorkerError>;

    /// Destroy a resource
    async fn destroy(&self, handle: Self::Handle) -> Result<(), WorkerError>;

    /// Whether an idle resource can still serve work
    ///
    /// Unhealthy resources are replaced before they are handed out.
    fn is_healthy(&self, _handle: &Self::Handle) -> bool {
        true
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Configured pool size
    pub size: usize,
    /// Slots created so far
    pub created: usize,
    /// Slots leased or recycling
    pub busy: usize,
    /// Slots free for allocation
    pub idle: usize,
    /// Slots with a recycle in flight
    pub recycling: usize,
    /// Allocation requests waiting in the queue
    pub waiting: usize,
}

/// Outcome of [`Allocator::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Resources destroyed successfully
    pub destroyed: usize,
    /// Resources whose destruction failed
    pub failed: usize,
}

struct Slot<H> {
    resource: Option<H>,
    busy: bool,
    generation: u64,
    recycling: Option<RecycleFuture>,
}

impl<H> Slot<H> {
    fn new_busy() -> Self {
        Self {
            resource: None,
            busy: true,
            generation: 0,
            recycling: None,
        }
    }
}

struct PoolState<F: HandleFactory> {
    slots: Vec<Slot<F::Handle>>,
    /// Every created slot, least recently allocated first
    rotation: VecDeque<SlotId>,
    /// Blocked allocation requests, oldest first
    waiters: VecDeque<oneshot::Sender<Claim<F>>>,
    closed: bool,
}

struct Inner<F: HandleFactory> {
    factory: F,
    size: usize,
    state: Mutex<PoolState<F>>,
}

/// Exclusive right to a slot, not yet backed by a resource
///
/// Dropping an armed claim releases the slot.
struct Claim<F: HandleFactory> {
    inner: Option<Arc<Inner<F>>>,
    slot: SlotId,
    generation: u64,
    resource: Option<F::Handle>,
}

impl<F: HandleFactory> Claim<F> {
    fn disarm(mut self) {
        self.inner = None;
    }
}

impl<F: HandleFactory> Drop for Claim<F> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock();
            release_locked(&inner, &mut state, self.slot, self.generation);
        }
    }
}

/// Exclusive use of one worker handle
///
/// Release happens exactly once: explicitly through [`Allocator::release`],
/// by handing the lease to [`Allocator::recycle`], or implicitly on drop.
pub struct Lease<F: HandleFactory> {
    claim: Claim<F>,
    handle: F::Handle,
}

impl<F: HandleFactory> Lease<F> {
    /// The leased handle
    pub fn handle(&self) -> &F::Handle {
        &self.handle
    }

    /// Slot this lease refers to
    pub fn slot(&self) -> SlotId {
        self.claim.slot
    }
}

impl<F: HandleFactory> std::fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.claim.slot)
            .field("generation", &self.claim.generation)
            .finish()
    }
}

/// Bounded pool of worker handles
///
/// # Example
///
/// ```ignore
/// let allocator = Allocator::new(factory, 4)?;
///
/// let lease = allocator.allocate().await?;
/// let result = do_work(lease.handle()).await;
///
/// match result {
///     Err(e) if e.is_crash() => { allocator.recycle(lease); }
///     _ => allocator.release(lease),
/// }
///
/// allocator.shutdown().await;
/// ```
pub struct Allocator<F: HandleFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: HandleFactory> Clone for Allocator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: HandleFactory> Allocator<F> {
    /// Create an empty pool; handles are created lazily on first need
    pub fn new(factory: F, size: usize) -> Result<Self, ConfigError> {
        if size < 1 {
            return Err(ConfigError::InvalidPoolSize(size));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                factory,
                size,
                state: Mutex::new(PoolState {
                    slots: Vec::with_capacity(size),
                    rotation: VecDeque::with_capacity(size),
                    waiters: VecDeque::new(),
                    closed: false,
                }),
            }),
        })
    }

    /// Configured pool size
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Allocate a handle, waiting in FIFO order when the pool is exhausted
    pub async fn allocate(&self) -> Result<Lease<F>, AllocatorError> {
        loop {
            let claim = self.claim_slot().await?;
            if let Some(lease) = self.fill(claim).await? {
                return Ok(lease);
            }
            // A recycle took the slot while its resource was being created
            debug!("Claimed slot was recycled, allocating again");
        }
    }

    async fn claim_slot(&self) -> Result<Claim<F>, AllocatorError> {
        let queued = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(AllocatorError::ShutDown);
            }

            if state.slots.len() < self.inner.size {
                let slot = state.slots.len();
                state.slots.push(Slot::new_busy());
                state.rotation.push_back(slot);
                debug!(slot, "Growing worker pool");
                Ok(self.claim(slot, 0, None))
            } else if let Some(slot) = take_free(&mut state) {
                let entry = &mut state.slots[slot];
                entry.busy = true;
                let (generation, resource) = (entry.generation, entry.resource.clone());
                Ok(self.claim(slot, generation, resource))
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(waiting = state.waiters.len(), "Worker pool exhausted, queueing");
                Err(rx)
            }
        };

        match queued {
            Ok(claim) => Ok(claim),
            Err(rx) => rx.await.map_err(|_| AllocatorError::ShutDown),
        }
    }

    /// Return a handle to the pool
    ///
    /// Synchronous bookkeeping only: the slot goes to the oldest waiter or
    /// is marked free. Its place in the rotation does not change.
    pub fn release(&self, lease: Lease<F>) {
        drop(lease);
    }

    /// Destroy and recreate the handle behind `lease`
    ///
    /// The operation runs on a spawned task; the returned future may be
    /// awaited or dropped.
    pub fn recycle(&self, lease: Lease<F>) -> RecycleFuture {
        let Lease { claim, handle } = lease;
        let slot = claim.slot;
        claim.disarm();
        drop(handle);
        self.recycle_slot(slot)
    }

    /// Destroy and recreate the handle in `slot`
    ///
    /// If a recycle of this slot is already in flight, the in-flight
    /// operation is joined instead of starting another one. Outstanding
    /// leases on the slot are invalidated; their release becomes a no-op.
    pub fn recycle_slot(&self, slot: SlotId) -> RecycleFuture {
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let Some(entry) = state.slots.get_mut(slot) else {
            return futures::future::ready(()).boxed().shared();
        };

        if let Some(in_flight) = &entry.recycling {
            debug!(slot, "Joining in-flight recycle");
            return in_flight.clone();
        }

        entry.busy = true;
        entry.generation += 1;
        let old = entry.resource.take();

        debug!(slot, generation = entry.generation, "Recycling worker handle");

        let task = tokio::spawn(run_recycle(Arc::clone(&self.inner), slot, old));
        let marker = async move {
            if let Err(e) = task.await {
                warn!(slot, error = %e, "Recycle task aborted");
            }
        }
        .boxed()
        .shared();

        entry.recycling = Some(marker.clone());
        marker
    }

    /// Destroy every handle and fail queued requests
    ///
    /// Waits for in-flight recycles first. Destruction is best-effort:
    /// individual failures are logged and counted. Calling this more than
    /// once is harmless.
    #[instrument(skip(self), fields(size = self.inner.size))]
    pub async fn shutdown(&self) -> ShutdownReport {
        let (in_flight, mut doomed) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.waiters.clear();

            let mut in_flight = Vec::new();
            let mut doomed = Vec::new();
            for (slot, entry) in state.slots.iter_mut().enumerate() {
                if let Some(marker) = &entry.recycling {
                    in_flight.push((slot, marker.clone()));
                } else if let Some(resource) = entry.resource.take() {
                    doomed.push((slot, resource));
                }
            }
            (in_flight, doomed)
        };

        for (slot, marker) in in_flight {
            marker.await;
            if let Some(resource) = self.inner.state.lock().slots[slot].resource.take() {
                doomed.push((slot, resource));
            }
        }

        let factory = &self.inner.factory;
        let outcomes = join_all(doomed.into_iter().map(|(slot, resource)| async move {
            match factory.destroy(resource).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(slot, error = %e, "Failed to destroy worker handle");
                    false
                }
            }
        }))
        .await;

        let destroyed = outcomes.iter().filter(|ok| **ok).count();
        let report = ShutdownReport {
            destroyed,
            failed: outcomes.len() - destroyed,
        };

        if report.destroyed + report.failed > 0 {
            info!(
                destroyed = report.destroyed,
                failed = report.failed,
                "Worker pool shut down"
            );
        }
        report
    }

    /// Whether [`Allocator::shutdown`] has been called
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Current occupancy
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let busy = state.slots.iter().filter(|s| s.busy).count();
        let recycling = state
            .slots
            .iter()
            .filter(|s| s.recycling.is_some())
            .count();
        PoolStatus {
            size: self.inner.size,
            created: state.slots.len(),
            busy,
            idle: state.slots.len() - busy,
            recycling,
            waiting: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
        }
    }

    fn claim(&self, slot: SlotId, generation: u64, resource: Option<F::Handle>) -> Claim<F> {
        Claim {
            inner: Some(Arc::clone(&self.inner)),
            slot,
            generation,
            resource,
        }
    }

    /// Back a claim with a resource, creating one if the slot is empty
    ///
    /// Returns `None` when the slot was recycled during creation.
    async fn fill(&self, mut claim: Claim<F>) -> Result<Option<Lease<F>>, AllocatorError> {
        if let Some(handle) = claim.resource.take() {
            if self.inner.factory.is_healthy(&handle) {
                return Ok(Some(Lease { claim, handle }));
            }

            warn!(slot = claim.slot, "Idle worker handle is unhealthy, replacing");
            {
                let mut state = self.inner.state.lock();
                let entry = &mut state.slots[claim.slot];
                if entry.generation == claim.generation {
                    entry.resource = None;
                }
            }
            if let Err(e) = self.inner.factory.destroy(handle).await {
                debug!(slot = claim.slot, error = %e, "Failed to destroy unhealthy handle");
            }
        }

        let handle = match self.inner.factory.create().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(slot = claim.slot, error = %e, "Failed to create worker handle");
                // Dropping the claim frees the slot for the next request
                drop(claim);
                return Err(AllocatorError::Create(e));
            }
        };

        let (stored, closed) = {
            let mut state = self.inner.state.lock();
            let closed = state.closed;
            let entry = &mut state.slots[claim.slot];
            if !closed && entry.generation == claim.generation {
                entry.resource = Some(handle.clone());
                (true, closed)
            } else {
                (false, closed)
            }
        };

        if !stored {
            if let Err(e) = self.inner.factory.destroy(handle).await {
                warn!(slot = claim.slot, error = %e, "Failed to destroy orphaned handle");
            }
            return if closed {
                Err(AllocatorError::ShutDown)
            } else {
                Ok(None)
            };
        }

        debug!(slot = claim.slot, "Created worker handle");
        Ok(Some(Lease { claim, handle }))
    }
}

/// First free slot in rotation order, moved to the back of the rotation
fn take_free<F: HandleFactory>(state: &mut PoolState<F>) -> Option<SlotId> {
    let position = state
        .rotation
        .iter()
        .position(|slot| !state.slots[*slot].busy)?;
    let slot = state.rotation.remove(position)?;
    state.rotation.push_back(slot);
    Some(slot)
}

/// Move a slot handed straight to a waiter to the back of the rotation
fn rotate_to_back(rotation: &mut VecDeque<SlotId>, slot: SlotId) {
    if let Some(position) = rotation.iter().position(|id| *id == slot) {
        rotation.remove(position);
        rotation.push_back(slot);
    }
}

/// Free `slot` if `generation` is current, serving the oldest waiter first
fn release_locked<F: HandleFactory>(
    inner: &Arc<Inner<F>>,
    state: &mut PoolState<F>,
    slot: SlotId,
    generation: u64,
) {
    let PoolState {
        slots,
        rotation,
        waiters,
        closed,
    } = state;

    let Some(entry) = slots.get_mut(slot) else {
        return;
    };
    if !entry.busy || entry.generation != generation {
        return;
    }

    if !*closed {
        while let Some(tx) = waiters.pop_front() {
            let claim = Claim {
                inner: Some(Arc::clone(inner)),
                slot,
                generation,
                resource: entry.resource.clone(),
            };
            match tx.send(claim) {
                Ok(()) => {
                    rotate_to_back(rotation, slot);
                    debug!(slot, "Handed worker handle to queued request");
                    return;
                }
                // Waiter gave up; its claim must not release the slot
                Err(claim) => claim.disarm(),
            }
        }
    }

    entry.busy = false;
}

async fn run_recycle<F: HandleFactory>(inner: Arc<Inner<F>>, slot: SlotId, old: Option<F::Handle>) {
    if let Some(old) = old {
        if let Err(e) = inner.factory.destroy(old).await {
            warn!(slot, error = %e, "Failed to destroy worker handle during recycle");
        }
    }

    let closed = inner.state.lock().closed;
    let fresh = if closed {
        None
    } else {
        match inner.factory.create().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Left empty; the next allocation of this slot recreates it
                warn!(slot, error = %e, "Failed to recreate worker handle during recycle");
                None
            }
        }
    };

    let mut state = inner.state.lock();
    let generation = {
        let entry = &mut state.slots[slot];
        entry.resource = fresh;
        entry.recycling = None;
        entry.generation
    };
    release_locked(&inner, &mut state, slot, generation);
    debug!(slot, "Recycle complete");
}
