//! Bounded pool lending inference sessions to request handlers.
//!
//! Sessions are expensive to build and must not be shared concurrently, so a
//! fixed set is created eagerly and handed out through a bounded queue.
//! Requests past capacity wait; the acquire timeout converts pathological
//! queueing into a service-unavailable response at the edge. A background
//! health task rebuilds sessions lost to failed construction.
//!
//! The pool is generic over the pooled resource so its interleaving behavior
//! is testable without a model file on disk.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) const DEFAULT_POOL_SIZE: usize = 4;
pub(crate) const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);
const ERROR_RING_CAPACITY: usize = 10;

/// Builds one pooled session; used eagerly at startup and by the health task.
pub(crate) type SessionFactory<S> = Arc<dyn Fn() -> anyhow::Result<S> + Send + Sync>;

#[derive(Debug, Error)]
pub(crate) enum PoolError {
    #[error("session pool is closed")]
    Closed,
    #[error("timeout waiting for an available session")]
    AcquireTimeout,
    #[error("request cancelled while waiting for a session")]
    Cancelled,
}

#[derive(Default)]
struct Metrics {
    in_use: AtomicI64,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    acquire_failures: AtomicU64,
    wait_nanos: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub(crate) struct PoolMetricsSnapshot {
    pub pool_size: usize,
    pub sessions_in_use: i64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub acquire_failures: u64,
    #[serde(skip)]
    pub wait_time: Duration,
}

/// Cheaply cloneable handle to the shared pool state.
pub(crate) struct SessionPool<S> {
    inner: Arc<PoolInner<S>>,
}

impl<S> Clone for SessionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PoolInner<S> {
    capacity: usize,
    tx: mpsc::Sender<S>,
    rx: AsyncMutex<mpsc::Receiver<S>>,
    factory: SessionFactory<S>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    metrics: Metrics,
    last_errors: Mutex<VecDeque<String>>,
}

impl<S: Send + 'static> SessionPool<S> {
    /// Eagerly build `capacity` sessions (0 selects the default of 4).
    ///
    /// A construction failure destroys the sessions already built and fails
    /// the whole pool. Must be called inside a tokio runtime: the health task
    /// is spawned here.
    pub fn new(factory: SessionFactory<S>, capacity: usize) -> anyhow::Result<Self> {
        let capacity = if capacity == 0 { DEFAULT_POOL_SIZE } else { capacity };
        let (tx, rx) = mpsc::channel(capacity);

        for index in 0..capacity {
            let session =
                factory().with_context(|| format!("failed to initialize session {index}"))?;
            if tx.try_send(session).is_err() {
                bail!("session queue rejected a freshly built session");
            }
        }

        let inner = Arc::new(PoolInner {
            capacity,
            tx,
            rx: AsyncMutex::new(rx),
            factory,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            metrics: Metrics::default(),
            last_errors: Mutex::new(VecDeque::new()),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_PERIOD);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.replenish();
            }
        });

        Ok(Self { inner })
    }

    /// Wait for a session, bounded by the pool timeout and the caller's
    /// cancellation token.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SessionLease<S>, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            session = async { inner.rx.lock().await.recv().await } => {
                session.ok_or(PoolError::Closed)
            }
            _ = tokio::time::sleep(ACQUIRE_TIMEOUT) => {
                inner.metrics.acquire_failures.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::AcquireTimeout)
            }
            _ = inner.shutdown.cancelled() => Err(PoolError::Closed),
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
        };
        inner
            .metrics
            .wait_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        let session = outcome?;
        inner.metrics.in_use.fetch_add(1, Ordering::Relaxed);
        inner.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(SessionLease {
            pool: self.clone(),
            session: Some(session),
        })
    }

    /// Close the pool and destroy every available session. Idempotent.
    ///
    /// Sessions still out on lease are destroyed by their release.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.shutdown.cancel();
        let mut rx = inner.rx.lock().await;
        rx.close();
        while let Ok(session) = rx.try_recv() {
            drop(session);
        }
    }

    /// Immutable snapshot of the pool counters.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let inner = &self.inner;
        PoolMetricsSnapshot {
            pool_size: inner.capacity,
            sessions_in_use: inner.metrics.in_use.load(Ordering::Relaxed),
            total_acquired: inner.metrics.total_acquired.load(Ordering::Relaxed),
            total_released: inner.metrics.total_released.load(Ordering::Relaxed),
            acquire_failures: inner.metrics.acquire_failures.load(Ordering::Relaxed),
            wait_time: Duration::from_nanos(inner.metrics.wait_nanos.load(Ordering::Relaxed)),
        }
    }

    #[cfg(test)]
    fn replenish_now(&self) {
        self.inner.replenish();
    }
}

impl<S: Send + 'static> PoolInner<S> {
    /// Return a leased session. Called by [`SessionLease`] on drop.
    fn release(&self, session: S) {
        if self.closed.load(Ordering::Acquire) {
            drop(session);
            return;
        }
        self.metrics.in_use.fetch_sub(1, Ordering::Relaxed);
        self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
        // A full queue means the health task over-provisioned while this
        // lease was out; the surplus session is simply dropped.
        let _ = self.tx.try_send(session);
    }

    /// Rebuild sessions until the available queue is back at capacity.
    ///
    /// Construction failures are recorded and skipped; they never take the
    /// pool down.
    fn replenish(&self) {
        let available = self.tx.max_capacity() - self.tx.capacity();
        for _ in available..self.capacity {
            match (self.factory)() {
                Ok(session) => {
                    if self.tx.try_send(session).is_err() {
                        break;
                    }
                }
                Err(err) => self.record_error(err),
            }
        }
    }

    fn record_error(&self, err: anyhow::Error) {
        warn!("session replenishment failed: {err:#}");
        if let Ok(mut ring) = self.last_errors.lock() {
            ring.push_back(format!("{err:#}"));
            while ring.len() > ERROR_RING_CAPACITY {
                ring.pop_front();
            }
        }
    }
}

/// Exclusive lease on one pooled session, returned to the pool on drop.
pub(crate) struct SessionLease<S: Send + 'static> {
    pool: SessionPool<S>,
    session: Option<S>,
}

impl<S: Send + 'static> Deref for SessionLease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session.as_ref().expect("session lease already released")
    }
}

impl<S: Send + 'static> DerefMut for SessionLease<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session.as_mut().expect("session lease already released")
    }
}

impl<S: Send + 'static> Drop for SessionLease<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.inner.release(session);
        }
    }
}
