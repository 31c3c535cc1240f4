// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Bounded session pool.
//!
//! Sessions live in a free list guarded by a mutex. `acquire` blocks on a
//! condvar while the list is empty; dropping a [`Lease`] puts the session
//! back and wakes one waiter. Closing the pool wakes everybody, and sessions
//! released after close are dropped instead of returned.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::engine::EngineSession;

use super::StoreError;

struct PoolState<S> {
    idle: Vec<S>,
    leased: usize,
    closed: bool,
}

struct PoolInner<S> {
    state: Mutex<PoolState<S>>,
    available: Condvar,
    capacity: usize,
}

/// Occupancy snapshot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub leased: usize,
}

/// A fixed-size pool of engine sessions.
pub struct SessionPool<S: EngineSession> {
    inner: Arc<PoolInner<S>>,
}

impl<S: EngineSession> SessionPool<S> {
    /// Creates a pool owning `sessions`.
    pub fn new(sessions: Vec<S>) -> Self {
        let capacity = sessions.len();
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: sessions,
                    leased: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Leases a session, blocking until one is idle.
    ///
    /// Fails with [`StoreError::Closed`] once the pool is closed, including
    /// for callers already waiting.
    pub fn acquire(&self) -> Result<Lease<S>, StoreError> {
        self.acquire_until(None)
    }

    /// Leases a session, giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<S>, StoreError> {
        self.acquire_until(Some((Instant::now() + timeout, timeout)))
    }

    fn acquire_until(&self, deadline: Option<(Instant, Duration)>) -> Result<Lease<S>, StoreError> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(StoreError::Closed);
            }

            if let Some(mut session) = state.idle.pop() {
                state.leased += 1;
                drop(state);

                session.reset();
                trace!("leased session");
                return Ok(Lease {
                    session: Some(session),
                    pool: Arc::clone(&self.inner),
                });
            }

            debug!(capacity = self.inner.capacity, "session pool exhausted, waiting");
            match deadline {
                None => self.inner.available.wait(&mut state),
                Some((at, timeout)) => {
                    if Instant::now() >= at {
                        return Err(StoreError::PoolTimeout(timeout));
                    }
                    let _ = self.inner.available.wait_until(&mut state, at);
                }
            }
        }
    }

    /// Closes the pool and drops idle sessions.
    ///
    /// Returns the number of sessions still leased; they are dropped when
    /// their leases end.
    pub fn close(&self) -> usize {
        let (drained, leased) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            (std::mem::take(&mut state.idle), state.leased)
        };
        self.inner.available.notify_all();
        debug!(idle = drained.len(), leased, "closed session pool");
        drop(drained);
        leased
    }

    /// Returns true once [`SessionPool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            capacity: self.inner.capacity,
            idle: state.idle.len(),
            leased: state.leased,
        }
    }
}

/// Exclusive use of one pooled session.
///
/// The session's uncommitted writes are discarded and the session returned to
/// the pool when the lease is dropped.
pub struct Lease<S: EngineSession> {
    /// Always `Some` until the lease is dropped.
    session: Option<S>,
    pool: Arc<PoolInner<S>>,
}

impl<S: EngineSession> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match &self.session {
            Some(session) => session,
            None => unreachable!(),
        }
    }
}

impl<S: EngineSession> DerefMut for Lease<S> {
    fn deref_mut(&mut self) -> &mut S {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!(),
        }
    }
}

impl<S: EngineSession> Drop for Lease<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.reset();

        let mut state = self.pool.state.lock();
        state.leased -= 1;
        if state.closed {
            drop(state);
            trace!("dropped session released after pool close");
            return;
        }
        state.idle.push(session);
        drop(state);

        self.pool.available.notify_one();
        trace!("returned session");
    }
}
