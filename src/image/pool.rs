//! Bounded frame buffer reuse
//!
//! Grabbers produce frames at a high rate with a stable geometry, so the
//! backing buffers are recycled instead of hitting the allocator on every
//! frame. The pool is process-global and internally serialized; the lock is
//! only held for queue operations, never across I/O.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Number of distinct buffer sizes tracked at once
const SIZE_CLASSES: usize = 2;

const DEFAULT_CAPACITY: usize = 10;

pub struct VideoPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    enabled: bool,
    /// Maximum buffers retained per size class
    capacity: usize,
    buffers: LruCache<usize, Vec<Vec<u8>>>,
}

impl VideoPool {
    fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                enabled: true,
                capacity: DEFAULT_CAPACITY,
                buffers: LruCache::new(NonZeroUsize::new(SIZE_CLASSES).unwrap()),
            }),
        }
    }

    /// Apply the `videoMemoryManager` settings
    pub fn configure(&self, enabled: bool, capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.enabled = enabled;
        inner.capacity = capacity.max(1);

        if !enabled {
            inner.buffers.clear();
        }
    }

    /// Get a zero-initialized buffer of exactly `size` bytes
    pub fn request(&self, size: usize) -> Vec<u8> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.enabled {
                if let Some(stack) = inner.buffers.get_mut(&size) {
                    if let Some(mut buffer) = stack.pop() {
                        buffer.iter_mut().for_each(|b| *b = 0);
                        return buffer;
                    }
                }
            }
        }

        // Pool miss, fall through to the system allocator
        vec![0u8; size]
    }

    /// Return a buffer to the pool
    ///
    /// Over-capacity buffers are simply dropped.
    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.is_empty() {
            return;
        }

        let size = buffer.len();
        let mut inner = self.inner.lock().unwrap();

        if !inner.enabled {
            return;
        }

        let capacity = inner.capacity;
        if let Some(stack) = inner.buffers.get_mut(&size) {
            if stack.len() < capacity {
                stack.push(buffer);
            }
        } else {
            inner.buffers.put(size, vec![buffer]);
        }
    }

    #[cfg(test)]
    fn pooled_count(&self, size: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.buffers.get_mut(&size).map(|v| v.len()).unwrap_or(0)
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_POOL: VideoPool = VideoPool::new();
}

pub fn global_pool() -> &'static VideoPool {
    &GLOBAL_POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_same_size_buffers() {
        let pool = VideoPool::new();
        let buffer = pool.request(64);
        pool.release(buffer);
        assert_eq!(pool.pooled_count(64), 1);

        let buffer = pool.request(64);
        assert_eq!(buffer.len(), 64);
        assert_eq!(pool.pooled_count(64), 0);
    }

    #[test]
    fn bounded_by_capacity() {
        let pool = VideoPool::new();
        pool.configure(true, 2);

        for _ in 0..4 {
            pool.release(vec![0u8; 32]);
        }

        assert_eq!(pool.pooled_count(32), 2);
    }

    #[test]
    fn disabled_pool_drops_buffers() {
        let pool = VideoPool::new();
        pool.configure(false, 4);
        pool.release(vec![0u8; 16]);
        assert_eq!(pool.pooled_count(16), 0);
    }

    #[test]
    fn requested_buffers_are_zeroed() {
        let pool = VideoPool::new();
        pool.release(vec![0xffu8; 8]);
        let buffer = pool.request(8);
        assert!(buffer.iter().all(|b| *b == 0));
    }
}
