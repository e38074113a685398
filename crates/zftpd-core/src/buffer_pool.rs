//! Fixed-capacity pool of large transfer-staging buffers.
//!
//! Unlike a growable `Vec`-backed pool, this one never allocates past
//! startup: `N` buffers are created once and a bitmask tracks which are
//! checked out. `acquire()` returns `None` under contention instead of
//! growing, so callers (RETR/STOR/APPE) must treat exhaustion as an
//! ordinary transfer-abort condition (426), not an error path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Mutex;

/// Default per-buffer capacity (64 KiB), matching the reference's
/// `FTP_BUFFER_SIZE`.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

struct Inner {
    buffers: Vec<Mutex<BytesMut>>,
    /// One bit per buffer; bit set means checked out. Buffer pools are
    /// sized to `max_sessions`, which this server caps at 256, so a single
    /// `AtomicU64` bitmask (or a small vector of them) covers every
    /// supported configuration.
    occupied: Vec<AtomicU64>,
    capacity: usize,
    buffer_size: usize,
}

/// A fixed-capacity buffer pool; cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    /// Build a pool of `capacity` buffers, each `buffer_size` bytes.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let words = capacity.div_ceil(64).max(1);
        let buffers = (0..capacity)
            .map(|_| Mutex::new(BytesMut::zeroed(buffer_size)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                buffers,
                occupied: (0..words).map(|_| AtomicU64::new(0)).collect(),
                capacity,
                buffer_size,
            }),
        }
    }

    /// Total number of buffers in the pool.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Size in bytes of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Atomically claim a free buffer, or `None` if every buffer is
    /// checked out.
    pub async fn acquire(&self) -> Option<PooledBuffer> {
        for index in 0..self.inner.capacity {
            let word = index / 64;
            let bit = 1u64 << (index % 64);
            let prev = self.inner.occupied[word].fetch_or(bit, Ordering::AcqRel);
            if prev & bit == 0 {
                return Some(PooledBuffer { pool: self.clone(), index });
            }
        }
        None
    }

    fn release(&self, index: usize) {
        let word = index / 64;
        let bit = 1u64 << (index % 64);
        self.inner.occupied[word].fetch_and(!bit, Ordering::AcqRel);
    }
}

/// RAII handle to one checked-out buffer. The occupancy bit is released
/// when this value is dropped, on every exit path — including an early
/// return or a panic unwind — so a transfer abort can never leak a slot.
pub struct PooledBuffer {
    pool: BufferPool,
    index: usize,
}

impl PooledBuffer {
    /// Lock and return the underlying buffer for reading/writing.
    pub async fn buffer(&self) -> tokio::sync::MutexGuard<'_, BytesMut> {
        self.pool.inner.buffers[self.index].lock().await
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_hands_out_same_buffer_twice() {
        let pool = BufferPool::new(4, 1024);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        let d = pool.acquire().await.unwrap();
        assert_ne!(a.index, b.index);
        assert_ne!(a.index, c.index);
        assert_ne!(a.index, d.index);
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn release_on_drop_frees_the_slot_for_reacquire() {
        let pool = BufferPool::new(1, 64);
        {
            let _buf = pool.acquire().await.unwrap();
            assert!(pool.acquire().await.is_none());
        }
        assert!(pool.acquire().await.is_some());
    }

    #[tokio::test]
    async fn scales_past_64_buffers() {
        let pool = BufferPool::new(100, 16);
        let mut held = Vec::new();
        for _ in 0..100 {
            held.push(pool.acquire().await.unwrap());
        }
        assert!(pool.acquire().await.is_none());
    }
}
