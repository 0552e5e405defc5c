//! Concurrency bounds and the thread that keeps them fresh.
//!
//! A [`CapacitySupplier`] reports the allowed concurrency as a raw integer:
//! a positive value is used as is, [`CAPACITY_DERIVE`] (any negative value)
//! asks for derivation from external worker pools. The raw value is clamped
//! into `[1, max_workers]` by [`effective_bound`] before it reaches the
//! scheduler, so a broken supplier can never stall the queue or unbound it.
//!
//! Derivation may call back into the hosting process, so suppliers are only
//! ever evaluated on the queue's dedicated refresher thread.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::SchedulerError;

/// Raw capacity value meaning "derive from the registered worker pools".
pub const CAPACITY_DERIVE: i64 = -1;

/// Source of the allowed concurrency.
pub trait CapacitySupplier: Send + Sync + 'static {
    /// Raw concurrency: positive to use directly, negative to derive.
    fn max_concurrency(&self) -> i64;
}

/// A constant bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCapacity(pub i64);

impl CapacitySupplier for FixedCapacity {
    fn max_concurrency(&self) -> i64 {
        self.0
    }
}

/// One external worker pool as reported by its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkpoolInfo {
    /// Pool name.
    pub name: String,
    /// Concurrent jobs the pool accepts.
    pub maximum: u32,
    /// Jobs currently running on it.
    pub in_use: u32,
}

impl WorkpoolInfo {
    /// Jobs the pool can still take.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.maximum.saturating_sub(self.in_use)
    }
}

/// Lists the external worker pools that conversions run on.
pub trait WorkpoolDirectory: Send + Sync + 'static {
    /// Current pools.
    ///
    /// # Errors
    ///
    /// Any failure reaching the pools; the caller degrades to a bound of 1.
    fn workpools(&self) -> Result<Vec<WorkpoolInfo>, SchedulerError>;
}

/// Shared, live-editable configured concurrency.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit(Arc<AtomicI64>);

impl ConcurrencyLimit {
    /// Start at `value`.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(Arc::new(AtomicI64::new(value)))
    }

    /// Current configured value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Replace the configured value. Takes effect on the next refresh.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }
}

/// Configured value if non-negative, otherwise the sum of remaining capacity
/// across all worker pools. Lookup failure yields 1.
pub struct WorkpoolCapacity {
    limit: ConcurrencyLimit,
    directory: Arc<dyn WorkpoolDirectory>,
}

impl WorkpoolCapacity {
    /// Supplier reading `limit` and falling back to `directory`.
    pub fn new(limit: ConcurrencyLimit, directory: Arc<dyn WorkpoolDirectory>) -> Self {
        Self { limit, directory }
    }

    /// The configured value this supplier reads.
    #[must_use]
    pub const fn limit(&self) -> &ConcurrencyLimit {
        &self.limit
    }
}

impl CapacitySupplier for WorkpoolCapacity {
    fn max_concurrency(&self) -> i64 {
        let configured = self.limit.get();
        if configured >= 0 {
            return configured;
        }
        match self.directory.workpools() {
            Ok(pools) => {
                let total: u64 = pools.iter().map(|p| u64::from(p.remaining())).sum();
                debug!(pools = pools.len(), remaining = total, "Derived capacity from worker pools");
                i64::try_from(total).unwrap_or(i64::MAX)
            }
            Err(e) => {
                warn!(error = %e, "Failed to derive capacity from worker pools, falling back to 1");
                1
            }
        }
    }
}

/// Clamp a raw supplier value into `[1, max_workers]`.
#[must_use]
pub fn effective_bound(raw: i64, max_workers: usize) -> usize {
    let ceiling = max_workers.max(1);
    usize::try_from(raw).map_or(1, |v| v.clamp(1, ceiling))
}

/// Thread that evaluates a supplier periodically and on demand, handing each
/// raw value to `apply`.
pub(crate) struct CapacityRefresher {
    wake: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CapacityRefresher {
    /// Spawn the refresher. `interval` of zero refreshes only on `notify`.
    pub fn spawn(
        queue: &str,
        supplier: Arc<dyn CapacitySupplier>,
        interval: Duration,
        apply: impl Fn(i64) -> bool + Send + 'static,
    ) -> Result<Self, SchedulerError> {
        let (tx, rx) = bounded::<()>(1);
        let name = queue.to_owned();
        let handle = thread::Builder::new()
            .name(format!("{queue}-capacity"))
            .spawn(move || refresh_loop(&name, supplier.as_ref(), interval, &rx, apply))
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn capacity refresher: {e}")))?;
        Ok(Self {
            wake: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ask for a re-evaluation without blocking. Coalesces with a pending request.
    pub fn notify(&self) {
        if let Some(tx) = self.wake.lock().as_ref() {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => debug!("Capacity refresher already stopped"),
            }
        }
    }

    /// Stop the thread. With `join`, wait for it to exit.
    pub fn stop(&self, join: bool) {
        self.wake.lock().take();
        let handle = self.handle.lock().take();
        if join {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("Capacity refresher panicked");
                }
            }
        }
    }
}

fn refresh_loop(
    queue: &str,
    supplier: &dyn CapacitySupplier,
    interval: Duration,
    wake: &Receiver<()>,
    apply: impl Fn(i64) -> bool,
) {
    debug!(queue = %queue, "Capacity refresher started");
    loop {
        let raw = supplier.max_concurrency();
        if !apply(raw) {
            break;
        }
        let woken = if interval.is_zero() {
            wake.recv().is_ok()
        } else {
            match wake.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => false,
            }
        };
        if !woken {
            break;
        }
    }
    info!(queue = %queue, "Capacity refresher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Unreachable;

    impl WorkpoolDirectory for Unreachable {
        fn workpools(&self) -> Result<Vec<WorkpoolInfo>, SchedulerError> {
            Err(SchedulerError::CapacityUnavailable("connection refused".into()))
        }
    }

    struct Pools(Vec<WorkpoolInfo>);

    impl WorkpoolDirectory for Pools {
        fn workpools(&self) -> Result<Vec<WorkpoolInfo>, SchedulerError> {
            Ok(self.0.clone())
        }
    }

    fn pool(maximum: u32, in_use: u32) -> WorkpoolInfo {
        WorkpoolInfo {
            name: format!("pool-{maximum}"),
            maximum,
            in_use,
        }
    }

    #[test]
    fn test_effective_bound_clamps() {
        assert_eq!(effective_bound(0, 100), 1);
        assert_eq!(effective_bound(-7, 100), 1);
        assert_eq!(effective_bound(5, 100), 5);
        assert_eq!(effective_bound(500, 100), 100);
        assert_eq!(effective_bound(3, 0), 1);
    }

    #[test]
    fn test_derive_sums_remaining() {
        let supplier = WorkpoolCapacity::new(
            ConcurrencyLimit::new(CAPACITY_DERIVE),
            Arc::new(Pools(vec![pool(4, 1), pool(2, 5), pool(3, 0)])),
        );
        assert_eq!(supplier.max_concurrency(), 6);

        supplier.limit().set(2);
        assert_eq!(supplier.max_concurrency(), 2);
    }

    #[test]
    fn test_unreachable_directory_yields_one() {
        let supplier =
            WorkpoolCapacity::new(ConcurrencyLimit::new(CAPACITY_DERIVE), Arc::new(Unreachable));
        assert_eq!(supplier.max_concurrency(), 1);
        assert_eq!(effective_bound(supplier.max_concurrency(), 100), 1);
    }

    #[test]
    fn test_refresher_runs_on_notify() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let (done_tx, done_rx) = bounded::<usize>(8);
        let refresher = CapacityRefresher::spawn(
            "test",
            Arc::new(FixedCapacity(3)),
            Duration::ZERO,
            move |raw| {
                assert_eq!(raw, 3);
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = done_tx.send(n);
                true
            },
        )
        .unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        refresher.notify();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        refresher.stop(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
