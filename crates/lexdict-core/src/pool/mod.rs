//! Bounded sharing of opened dictionaries.
//!
//! A [`DictionaryPool`] hands out at most `max_open` instances of one
//! dictionary; callers past the cap wait for a checkin. [`DictionaryCache`]
//! keeps pools (or anything else) per dictionary identity with LRU eviction.

mod cache;

pub use cache::{DictionaryCache, DictionaryKey, DictionaryKind};

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::dict::{DictError, Dictionary};
use crate::settings::settings;

type Opener = Box<dyn Fn() -> Result<Dictionary, DictError> + Send + Sync>;

struct PoolState {
    idle: Vec<Dictionary>,
    /// Instances in existence, checked out or idle, plus opens in flight.
    open: usize,
}

pub struct DictionaryPool {
    opener: Opener,
    max_open: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl DictionaryPool {
    /// A pool that opens instances with `opener` on demand. `max_open` is
    /// raised to at least 1.
    pub fn new(
        max_open: usize,
        opener: impl Fn() -> Result<Dictionary, DictError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            opener: Box::new(opener),
            max_open: max_open.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// A pool capped by the `[pool] max_open` setting.
    pub fn with_default_cap(opener: impl Fn() -> Result<Dictionary, DictError> + Send + Sync + 'static) -> Self {
        Self::new(settings().pool.max_open, opener)
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }

    pub fn open_count(&self) -> usize {
        self.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Poisoning is ignored: no holder leaves the state half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out an instance, waiting while all `max_open` are in use.
    pub fn acquire(&self) -> Result<PooledDictionary<'_>, DictError> {
        let mut state = self.lock();
        loop {
            match self.take_or_reserve(&mut state) {
                Some(Slot::Idle(dict)) => return Ok(self.guard(dict)),
                Some(Slot::Reserved) => {
                    drop(state);
                    return self.open_reserved();
                }
                None => {
                    debug!(max_open = self.max_open, "pool exhausted, waiting");
                    state = self
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Like [`acquire`](DictionaryPool::acquire) but gives up after
    /// `timeout`, returning `Ok(None)`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<PooledDictionary<'_>>, DictError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            match self.take_or_reserve(&mut state) {
                Some(Slot::Idle(dict)) => return Ok(Some(self.guard(dict))),
                Some(Slot::Reserved) => {
                    drop(state);
                    return self.open_reserved().map(Some);
                }
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    state = self
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Check out an instance without waiting.
    pub fn try_acquire(&self) -> Result<Option<PooledDictionary<'_>>, DictError> {
        let mut state = self.lock();
        match self.take_or_reserve(&mut state) {
            Some(Slot::Idle(dict)) => Ok(Some(self.guard(dict))),
            Some(Slot::Reserved) => {
                drop(state);
                self.open_reserved().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Drop every idle instance; checked-out ones are unaffected. Returns the
    /// number closed.
    pub fn close_idle(&self) -> usize {
        let mut state = self.lock();
        let closed = state.idle.len();
        state.idle.clear();
        state.open -= closed;
        drop(state);
        self.available.notify_all();
        closed
    }

    fn take_or_reserve(&self, state: &mut PoolState) -> Option<Slot> {
        if let Some(dict) = state.idle.pop() {
            return Some(Slot::Idle(dict));
        }
        if state.open < self.max_open {
            state.open += 1;
            return Some(Slot::Reserved);
        }
        None
    }

    fn open_reserved(&self) -> Result<PooledDictionary<'_>, DictError> {
        match (self.opener)() {
            Ok(dict) => {
                debug!("pool opened a dictionary");
                Ok(self.guard(dict))
            }
            Err(e) => {
                self.lock().open -= 1;
                self.available.notify_one();
                Err(e)
            }
        }
    }

    fn guard(&self, dict: Dictionary) -> PooledDictionary<'_> {
        PooledDictionary {
            pool: self,
            dict: Some(dict),
        }
    }

    fn release(&self, dict: Dictionary) {
        let mut state = self.lock();
        if thread::panicking() {
            warn!("dictionary dropped during a panic, closing it");
            state.open -= 1;
            drop(dict);
        } else {
            state.idle.push(dict);
        }
        drop(state);
        self.available.notify_one();
    }
}

enum Slot {
    Idle(Dictionary),
    Reserved,
}

/// A checked-out dictionary. Returned to its pool on drop.
pub struct PooledDictionary<'a> {
    pool: &'a DictionaryPool,
    dict: Option<Dictionary>,
}

impl Deref for PooledDictionary<'_> {
    type Target = Dictionary;

    fn deref(&self) -> &Dictionary {
        // Only emptied in drop.
        match &self.dict {
            Some(dict) => dict,
            None => unreachable!("pooled dictionary used after release"),
        }
    }
}

impl DerefMut for PooledDictionary<'_> {
    fn deref_mut(&mut self) -> &mut Dictionary {
        match &mut self.dict {
            Some(dict) => dict,
            None => unreachable!("pooled dictionary used after release"),
        }
    }
}

impl Drop for PooledDictionary<'_> {
    fn drop(&mut self) {
        if let Some(dict) = self.dict.take() {
            self.pool.release(dict);
        }
    }
}
