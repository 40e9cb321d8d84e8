//! Write-path mutual exclusion.
//!
//! The coordinator never touches a global: it is handed a [`WriteLock`] and wraps
//! each acquisition in a [`LockGuard`], which releases on drop, unwinding included.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;
use uuid::Uuid;

/// Proof of one acquisition. Releasing requires the token that acquire handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait WriteLock: Send + Sync {
    /// Waits at most `timeout` for the lock. `None` means it stayed busy.
    fn acquire(&self, timeout: Duration) -> Option<LockToken>;

    /// Gives the lock back. Must not panic; a stale token is ignored.
    fn release(&self, token: LockToken);
}

/// Scoped acquisition: the lock is released exactly once, when the guard drops.
pub struct LockGuard<'a> {
    lock: &'a dyn WriteLock,
    token: Option<LockToken>,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a dyn WriteLock, timeout: Duration) -> Option<Self> {
        let token = lock.acquire(timeout)?;
        Some(Self {
            lock,
            token: Some(token),
        })
    }

    pub fn token(&self) -> Option<LockToken> {
        self.token
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.release(token);
        }
    }
}

#[derive(Debug)]
struct Lease {
    token: LockToken,
    granted_at: Instant,
}

/// Process-wide lock whose holder is trusted for at most `lease`.
///
/// A holder that outlives its lease (a handler killed mid-append, a wedged
/// store call) is presumed dead and the next waiter takes the lock over.
/// Its late `release` then carries a stale token and is dropped.
#[derive(Debug)]
pub struct LeaseLock {
    state: Mutex<Option<Lease>>,
    released: Condvar,
    lease: Duration,
}

impl LeaseLock {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Mutex::new(None),
            released: Condvar::new(),
            lease,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn is_held(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map_or(false, |held| held.granted_at.elapsed() < self.lease)
    }
}

impl WriteLock for LeaseLock {
    fn acquire(&self, timeout: Duration) -> Option<LockToken> {
        // None means "never": a timeout or lease too large for `Instant`.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            let lease_end = match state.as_ref() {
                None => break,
                Some(held) => held.granted_at.checked_add(self.lease),
            };

            let now = Instant::now();
            if lease_end.map_or(false, |end| now >= end) {
                if let Some(held) = state.as_ref() {
                    warn!(
                        token = %held.token,
                        lease_ms = self.lease.as_millis() as u64,
                        "reclaiming write lock from expired lease"
                    );
                }
                break;
            }
            if deadline.map_or(false, |d| now >= d) {
                return None;
            }

            match (deadline, lease_end) {
                (Some(d), Some(end)) => {
                    self.released.wait_until(&mut state, d.min(end));
                }
                (Some(at), None) | (None, Some(at)) => {
                    self.released.wait_until(&mut state, at);
                }
                (None, None) => self.released.wait(&mut state),
            }
        }

        let token = LockToken::new();
        *state = Some(Lease {
            token,
            granted_at: Instant::now(),
        });
        Some(token)
    }

    fn release(&self, token: LockToken) {
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(held) if held.token == token => {
                *state = None;
                self.released.notify_one();
            }
            _ => warn!(token = %token, "ignoring release of a lock this token no longer holds"),
        }
    }
}
