/*!
Reusable byte buffers for the encoding path.

A [`BufferPool`] hands out [`PooledBuffer`] leases. Each lease owns its
`BytesMut` exclusively until it is released, so a buffer is never visible to
two operations at once. Released buffers are cleared (capacity retained) and
parked on a free list for the next [`BufferPool::acquire`].

The free-list lock is only taken to push or pop a buffer; nothing holds it
while a buffer is being written.
*/

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{PersistError, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Sizing policy for a [`BufferPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of freshly allocated buffers.
    /// Default: 4 KiB
    pub initial_capacity: usize,

    /// Maximum number of idle buffers kept for reuse. Zero disables reuse.
    /// Default: 16
    pub max_retained: usize,

    /// Buffers that grew beyond this capacity are dropped on release
    /// instead of being kept idle.
    /// Default: 8 MiB
    pub max_retained_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 4 * 1024,
            max_retained: 16,
            max_retained_capacity: 8 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    /// A pool that never reuses a buffer. Every acquire allocates.
    pub fn always_fresh() -> Self {
        Self {
            max_retained: 0,
            ..Self::default()
        }
    }

    /// Set the capacity of newly allocated buffers.
    #[must_use]
    pub const fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the idle buffer limit.
    #[must_use]
    pub const fn max_retained(mut self, count: usize) -> Self {
        self.max_retained = count;
        self
    }

    /// Set the largest capacity a released buffer may have and still be kept.
    #[must_use]
    pub const fn max_retained_capacity(mut self, capacity: usize) -> Self {
        self.max_retained_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_retained > 0 && self.max_retained_capacity < self.initial_capacity {
            return Err(PersistError::config(format!(
                "max_retained_capacity ({}) must be at least initial_capacity ({})",
                self.max_retained_capacity, self.initial_capacity
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated because no idle buffer was available.
    pub allocated: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// Leases returned to the pool, explicitly or on drop.
    pub released: u64,
    /// Released buffers dropped because they were oversized or the idle list was full.
    pub discarded: u64,
    /// Leases currently checked out.
    pub outstanding: usize,
    /// Buffers currently parked for reuse.
    pub idle: usize,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    config: PoolConfig,
    idle: Mutex<Vec<BytesMut>>,
    next_lease: AtomicU64,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    outstanding: AtomicUsize,
}

impl Shared {
    fn recycle(&self, mut buf: BytesMut) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        if buf.capacity() > self.config.max_retained_capacity {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_retained {
            idle.push(buf);
        } else {
            drop(idle);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Thread-safe pool of growable byte buffers.
///
/// Cloning is cheap; clones share the same free list.
///
/// # Example
/// ```rust
/// use tagpersist_core::{BufferPool, PoolConfig};
///
/// let pool = BufferPool::new(PoolConfig::default());
/// let mut buf = pool.acquire();
/// buf.extend_from_slice(b"payload");
/// pool.release(buf)?;
///
/// let again = pool.acquire();
/// assert!(again.is_empty());
/// # Ok::<(), tagpersist_core::PersistError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

impl BufferPool {
    /// Create a pool with the given sizing policy
    pub fn new(config: PoolConfig) -> Self {
        let idle = Vec::with_capacity(config.max_retained);
        Self {
            shared: Arc::new(Shared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                config,
                idle: Mutex::new(idle),
                next_lease: AtomicU64::new(1),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a pool that allocates on every acquire
    pub fn always_fresh() -> Self {
        Self::new(PoolConfig::always_fresh())
    }

    /// The sizing policy this pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Check out an empty buffer, reusing idle capacity when available.
    pub fn acquire(&self) -> PooledBuffer {
        let shared = &self.shared;
        let recycled = shared.idle.lock().pop();
        let buf = match recycled {
            Some(buf) => {
                shared.reused.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                crate::observability::PersistMetrics::global().record_buffer_reuse();
                buf
            }
            None => {
                shared.allocated.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(shared.config.initial_capacity)
            }
        };
        shared.outstanding.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            buf: Some(buf),
            lease: shared.next_lease.fetch_add(1, Ordering::Relaxed),
            home: Arc::clone(shared),
        }
    }

    /// Return a lease to this pool.
    ///
    /// The handle is consumed, so a lease cannot be released twice or used
    /// afterwards. Handing a lease to a pool that did not issue it fails with
    /// [`PersistError::ForeignBuffer`]; the lease then goes back to its own pool.
    pub fn release(&self, mut buffer: PooledBuffer) -> Result<()> {
        if !Arc::ptr_eq(&buffer.home, &self.shared) {
            return Err(PersistError::ForeignBuffer {
                lease: buffer.lease,
            });
        }
        if let Some(buf) = buffer.buf.take() {
            self.shared.recycle(buf);
        }
        Ok(())
    }

    /// Snapshot the pool counters
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            allocated: shared.allocated.load(Ordering::Relaxed),
            reused: shared.reused.load(Ordering::Relaxed),
            released: shared.released.load(Ordering::Relaxed),
            discarded: shared.discarded.load(Ordering::Relaxed),
            outstanding: shared.outstanding.load(Ordering::Acquire),
            idle: shared.idle.lock().len(),
        }
    }

    /// Identifier distinguishing this pool from every other pool in the process
    pub fn id(&self) -> u64 {
        self.shared.id
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Implements [`io::Write`] so it can terminate a writer chain. Dropping the
/// lease without calling [`BufferPool::release`] still returns it to the pool
/// that issued it.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    lease: u64,
    home: Arc<Shared>,
}

impl PooledBuffer {
    /// Lease number, unique within the issuing pool
    pub fn lease(&self) -> u64 {
        self.lease
    }

    /// Id of the pool that issued this lease
    pub fn pool_id(&self) -> u64 {
        self.home.id
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Allocated capacity of the underlying buffer
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, BytesMut::capacity)
    }

    /// Reserve room for at least `additional` more bytes
    pub fn reserve(&mut self, additional: usize) {
        if let Some(buf) = self.buf.as_mut() {
            buf.reserve(additional);
        }
    }

    /// Append bytes to the buffer
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(data);
        }
    }

    /// Underlying storage, for encoders that write through `BufMut`
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        self.buf.get_or_insert_with(BytesMut::new)
    }

    /// Current contents
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl io::Write for PooledBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(data);
        Ok(data.len())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.home.recycle(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_acquire_returns_empty_buffer() {
        let pool = BufferPool::default();
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= pool.config().initial_capacity);
    }

    #[test]
    fn test_released_buffer_is_reset_but_keeps_capacity() {
        let pool = BufferPool::new(PoolConfig::default().initial_capacity(16));

        let mut buf = pool.acquire();
        buf.write_all(&[7u8; 1000]).unwrap();
        let grown = buf.capacity();
        pool.release(buf).unwrap();

        let reused = pool.acquire();
        assert_eq!(reused.len(), 0);
        assert_eq!(reused.capacity(), grown);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_repeated_cycles_never_leak_previous_bytes() {
        let pool = BufferPool::new(PoolConfig::default().max_retained(2));

        for round in 0..50u8 {
            let mut buf = pool.acquire();
            assert_eq!(buf.len(), 0, "round {round} saw stale bytes");
            buf.extend_from_slice(&[round; 64]);
            pool.release(buf).unwrap();
        }
    }

    #[test]
    fn test_always_fresh_pool_never_reuses() {
        let pool = BufferPool::always_fresh();

        for _ in 0..5 {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"abc");
            pool.release(buf).unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.allocated, 5);
        assert_eq!(stats.reused, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 5);
    }

    #[test]
    fn test_outstanding_leases_are_distinct() {
        let pool = BufferPool::default();
        let a = pool.acquire();
        let b = pool.acquire();

        assert_ne!(a.lease(), b.lease());
        assert_eq!(pool.stats().outstanding, 2);

        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().idle, 2);
    }

    #[test]
    fn test_release_into_foreign_pool_is_detected() {
        let issuing = BufferPool::default();
        let other = BufferPool::default();

        let buf = issuing.acquire();
        let lease = buf.lease();
        match other.release(buf) {
            Err(PersistError::ForeignBuffer { lease: reported }) => assert_eq!(reported, lease),
            other => panic!("expected ForeignBuffer, got {other:?}"),
        }

        // The rejected lease still went home on drop.
        assert_eq!(issuing.stats().outstanding, 0);
        assert_eq!(issuing.stats().idle, 1);
        assert_eq!(other.stats().released, 0);
    }

    #[test]
    fn test_dropped_lease_returns_to_pool() {
        let pool = BufferPool::default();
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"abandoned");
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.released, 1);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_oversized_buffers_are_discarded() {
        let pool = BufferPool::new(
            PoolConfig::default()
                .initial_capacity(64)
                .max_retained_capacity(128),
        );

        let mut buf = pool.acquire();
        buf.extend_from_slice(&[0u8; 4096]);
        pool.release(buf).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let pool = BufferPool::new(PoolConfig::default().max_retained(1));
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a).unwrap();
        pool.release(b).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = BufferPool::new(PoolConfig::default().max_retained(4));

        std::thread::scope(|scope| {
            for worker in 0..8u8 {
                let pool = pool.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.extend_from_slice(&[worker; 32]);
                        assert!(buf.bytes().iter().all(|b| *b == worker));
                        pool.release(buf).unwrap();
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.allocated + stats.reused, 1600);
        assert_eq!(stats.released, 1600);
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::always_fresh()
            .max_retained_capacity(0)
            .validate()
            .is_ok());
        assert!(PoolConfig::default()
            .initial_capacity(1024)
            .max_retained_capacity(512)
            .validate()
            .is_err());
    }
}
