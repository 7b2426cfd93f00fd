//! Bounded pools of compression engines.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use flate2::{Compress, Decompress};
use parking_lot::Mutex;
use tracing::trace;

/// Default number of idle engines kept per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// An engine that can be reset for reuse.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for Compress {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for Decompress {
    fn recycle(&mut self) {
        self.reset(false);
    }
}

/// Keeps at most `capacity` idle engines.
#[derive(Debug)]
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Recycle> Pool<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    /// Take an idle engine, or build one with `create` on a miss.
    pub fn take(self: &Arc<Self>, create: impl FnOnce() -> T) -> Pooled<T> {
        let item = match self.idle.lock().pop() {
            Some(item) => {
                trace!("engine pool hit");
                item
            }
            None => {
                trace!("engine pool miss");
                create()
            }
        };
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle engines.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn give_back(&self, mut item: T) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            item.recycle();
            idle.push(item);
        }
    }
}

/// An engine on loan; returned to its pool when dropped.
pub struct Pooled<T: Recycle> {
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}
