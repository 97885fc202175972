//! Shared/exclusive coordination without a reader-writer lock.
//!
//! The exclusive side is the host process's global mutex, owned elsewhere;
//! this type only coordinates cheap worker access around it. While the
//! host thread advertises ownership (`set_owned(true)`), workers spin on
//! the host's try-lock with a 5 µs back-off, re-checking the owned flag
//! between attempts. While it does not, workers take a plain internal
//! mutex.
//!
//! Invariant: while `owned` is true, no worker ever holds the internal
//! mutex concurrently with a thread executing under the host mutex.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The host's global mutex, as seen from here: try-lock and unlock only.
/// The host owns blocking acquisition itself.
pub trait HostLock: Send + Sync {
    fn try_lock(&self) -> bool;
    fn unlock(&self);
}

/// Which of the two locks an acquisition ended up holding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Held {
    Internal,
    Host,
}

/// Worker-side guard. Releases whichever lock was acquired on drop.
pub struct SharedGuard<'a> {
    which: Held,
    _internal: Option<MutexGuard<'a, ()>>,
    host: Option<&'a dyn HostLock>,
}

impl SharedGuard<'_> {
    pub fn held(&self) -> Held {
        self.which
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        if let Some(host) = self.host.take() {
            host.unlock();
        }
    }
}

/// One-writer-many-reader coordinator; see the module docs.
#[derive(Default)]
pub struct SharedExclusiveLock {
    internal: Mutex<()>,
    owned: AtomicBool,
}

const SPIN_BACKOFF: Duration = Duration::from_micros(5);

impl SharedExclusiveLock {
    pub fn new() -> Self {
        SharedExclusiveLock::default()
    }

    /// Called by the exclusive holder's thread to advertise its state.
    pub fn set_owned(&self, value: bool) {
        self.owned.store(value, Ordering::Release);
    }

    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    /// Worker-side acquisition.
    ///
    /// Fast path: the exclusive holder is absent, take the internal mutex.
    /// Slow path: alternate host try-lock attempts with owned-flag checks,
    /// backing off 5 µs per round.
    pub fn acquire<'a>(&'a self, host: &'a dyn HostLock) -> SharedGuard<'a> {
        let guard = self.internal.lock();
        loop {
            if !self.owned.load(Ordering::Acquire) {
                return SharedGuard {
                    which: Held::Internal,
                    _internal: Some(guard),
                    host: None,
                };
            }
            if host.try_lock() {
                // internal guard drops here; the host lock protects us now
                drop(guard);
                return SharedGuard {
                    which: Held::Host,
                    _internal: None,
                    host: Some(host),
                };
            }
            std::thread::sleep(SPIN_BACKOFF);
        }
    }
}
