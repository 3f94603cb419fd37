//! Reusable transfer buffers
//!
//! Large frames are packed and padded over and over with the same sizes.
//! [`BufferPool`] keeps a few buffers per size around so those
//! allocations are reused. One pool is meant to be shared behind an
//! [`Arc`](std::sync::Arc) by everything that talks to the same display.

use core::ops::{Deref, DerefMut};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Buffers kept per size or shape
pub const MAX_POOL_SIZE: usize = 5;

/// Element types typed arrays can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `u8`
    U8,
    /// `u16`
    U16,
}

/// Storage of one pooled typed array
#[derive(Debug)]
pub enum ArrayStorage {
    /// Bytes, as used for grayscale canvases
    U8(Vec<u8>),
    /// Words, as sent on the bus
    U16(Vec<u16>),
}

/// Element of a typed array lease
pub trait PoolElement: Copy + Default + 'static {
    /// Tag used in the pool key
    const ELEMENT: ElementType;

    /// Wraps a vector into the pool's storage type
    fn into_storage(data: Vec<Self>) -> ArrayStorage;

    /// Unwraps storage, `None` if it holds another element type
    fn from_storage(storage: ArrayStorage) -> Option<Vec<Self>>;
}

impl PoolElement for u8 {
    const ELEMENT: ElementType = ElementType::U8;

    fn into_storage(data: Vec<Self>) -> ArrayStorage {
        ArrayStorage::U8(data)
    }

    fn from_storage(storage: ArrayStorage) -> Option<Vec<Self>> {
        match storage {
            ArrayStorage::U8(data) => Some(data),
            ArrayStorage::U16(_) => None,
        }
    }
}

impl PoolElement for u16 {
    const ELEMENT: ElementType = ElementType::U16;

    fn into_storage(data: Vec<Self>) -> ArrayStorage {
        ArrayStorage::U16(data)
    }

    fn from_storage(storage: ArrayStorage) -> Option<Vec<Self>> {
        match storage {
            ArrayStorage::U16(data) => Some(data),
            ArrayStorage::U8(_) => None,
        }
    }
}

type ArrayKey = (Vec<usize>, ElementType);

#[derive(Debug)]
struct Entry<B> {
    generation: u64,
    buffer: B,
}

#[derive(Debug, Default)]
struct PoolState {
    generation: u64,
    bytes: HashMap<usize, Vec<Entry<Vec<u8>>>>,
    arrays: HashMap<ArrayKey, Vec<Entry<ArrayStorage>>>,
}

impl PoolState {
    fn pop_live<B>(generation: u64, entries: Option<&mut Vec<Entry<B>>>) -> Option<B> {
        let entries = entries?;
        while let Some(entry) = entries.pop() {
            if entry.generation == generation {
                return Some(entry.buffer);
            }
        }
        None
    }
}

/// Number of pooled buffers, see [`BufferPool::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Byte buffers waiting for reuse
    pub byte_buffers: usize,
    /// Typed arrays waiting for reuse
    pub array_buffers: usize,
    /// Bumped by every [`BufferPool::clear`]
    pub generation: u64,
}

/// Pool of byte buffers keyed by size and typed arrays keyed by shape.
///
/// All state sits behind one lock. Filling, copying and dropping buffers
/// happens after the lock is released.
#[derive(Debug)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    max_per_key: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(MAX_POOL_SIZE)
    }
}

impl BufferPool {
    /// A pool keeping up to `max_per_key` buffers per size or shape
    pub fn new(max_per_key: usize) -> Self {
        BufferPool {
            state: Mutex::new(PoolState::default()),
            max_per_key,
        }
    }

    // A panic while holding the lock leaves the maps consistent, so a
    // poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A byte buffer of `size` bytes.
    ///
    /// With a `fill` value a fresh buffer is always allocated. Without one a
    /// pooled buffer is handed out as is, its content is whatever the last
    /// user left in it.
    pub fn get_bytes(&self, size: usize, fill: Option<u8>) -> Vec<u8> {
        if let Some(value) = fill {
            return vec![value; size];
        }
        let reused = {
            let mut state = self.lock();
            let generation = state.generation;
            PoolState::pop_live(generation, state.bytes.get_mut(&size))
        };
        reused.unwrap_or_else(|| vec![0; size])
    }

    /// Hands a byte buffer back for reuse
    pub fn return_bytes(&self, buffer: Vec<u8>) {
        let mut state = self.lock();
        let generation = state.generation;
        let max = self.max_per_key;
        let entries = state.bytes.entry(buffer.len()).or_default();
        entries.retain(|e| e.generation == generation);
        if entries.len() < max {
            entries.push(Entry { generation, buffer });
        }
    }

    /// A byte buffer that returns itself to the pool when dropped
    pub fn bytes(&self, size: usize, fill: Option<u8>) -> PooledBytes<'_> {
        PooledBytes {
            pool: self,
            buffer: Some(self.get_bytes(size, fill)),
        }
    }

    /// Leases a typed array of `shape`, filled with `fill` if given
    pub fn array<T: PoolElement>(&self, shape: &[usize], fill: Option<T>) -> ArrayLease<'_, T> {
        let len = shape.iter().product();
        let (generation, reused) = {
            let mut state = self.lock();
            let generation = state.generation;
            let key = (shape.to_vec(), T::ELEMENT);
            (
                generation,
                PoolState::pop_live(generation, state.arrays.get_mut(&key)),
            )
        };
        let data = match reused.and_then(T::from_storage) {
            Some(mut data) => {
                if let Some(value) = fill {
                    data.fill(value);
                }
                data
            }
            None => vec![fill.unwrap_or_default(); len],
        };
        ArrayLease {
            pool: self,
            shape: shape.to_vec(),
            generation,
            data: Some(data),
        }
    }

    fn return_array(
        &self,
        shape: Vec<usize>,
        element: ElementType,
        generation: u64,
        storage: ArrayStorage,
    ) {
        let mut state = self.lock();
        if generation != state.generation {
            return;
        }
        let max = self.max_per_key;
        let entries = state.arrays.entry((shape, element)).or_default();
        if entries.len() < max {
            entries.push(Entry {
                generation,
                buffer: storage,
            });
        }
    }

    /// Drops every pooled buffer. Leases taken out before the clear are not
    /// taken back.
    pub fn clear(&self) {
        let (bytes, arrays) = {
            let mut state = self.lock();
            state.generation += 1;
            (
                core::mem::take(&mut state.bytes),
                core::mem::take(&mut state.arrays),
            )
        };
        drop(bytes);
        drop(arrays);
    }

    /// Current pool content
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let generation = state.generation;
        PoolStats {
            byte_buffers: state
                .bytes
                .values()
                .flatten()
                .filter(|e| e.generation == generation)
                .count(),
            array_buffers: state
                .arrays
                .values()
                .flatten()
                .filter(|e| e.generation == generation)
                .count(),
            generation,
        }
    }
}

/// Byte buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBytes<'a> {
    pool: &'a BufferPool,
    buffer: Option<Vec<u8>>,
}

impl PooledBytes<'_> {
    /// Keeps the buffer instead of returning it
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buffer.take().unwrap_or_default()
    }
}

impl Deref for PooledBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBytes<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBytes<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.return_bytes(buffer);
        }
    }
}

/// Typed array on loan from a [`BufferPool`], row major
#[derive(Debug)]
pub struct ArrayLease<'a, T: PoolElement> {
    pool: &'a BufferPool,
    shape: Vec<usize>,
    generation: u64,
    data: Option<Vec<T>>,
}

impl<T: PoolElement> ArrayLease<'_, T> {
    /// The shape the array was leased with
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl<T: PoolElement> Deref for ArrayLease<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data.as_deref().unwrap_or_default()
    }
}

impl<T: PoolElement> DerefMut for ArrayLease<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.data.as_deref_mut().unwrap_or_default()
    }
}

impl<T: PoolElement> Drop for ArrayLease<'_, T> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.return_array(
                core::mem::take(&mut self.shape),
                T::ELEMENT,
                self.generation,
                T::into_storage(data),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn byte_buffers_are_reused() {
        let pool = BufferPool::default();
        let mut buffer = pool.get_bytes(16, None);
        buffer[0] = 42;
        pool.return_bytes(buffer);
        assert_eq!(pool.stats().byte_buffers, 1);

        let reused = pool.get_bytes(16, None);
        assert_eq!(reused[0], 42);
        assert_eq!(pool.stats().byte_buffers, 0);
    }

    #[test]
    fn fill_always_allocates() {
        let pool = BufferPool::default();
        pool.return_bytes(vec![1; 8]);
        let filled = pool.get_bytes(8, Some(0xFF));
        assert_eq!(filled, vec![0xFF; 8]);
        assert_eq!(pool.stats().byte_buffers, 1);
    }

    #[test]
    fn pool_is_capped_per_size() {
        let pool = BufferPool::new(2);
        for _ in 0..4 {
            pool.return_bytes(vec![0; 4]);
        }
        pool.return_bytes(vec![0; 5]);
        assert_eq!(pool.stats().byte_buffers, 3);
    }

    #[test]
    fn scoped_bytes_return_on_drop() {
        let pool = BufferPool::default();
        {
            let mut guard = pool.bytes(32, Some(7));
            guard[1] = 9;
            assert_eq!(guard.len(), 32);
        }
        assert_eq!(pool.stats().byte_buffers, 1);
        let kept = pool.bytes(32, None).into_inner();
        assert_eq!(kept[1], 9);
        assert_eq!(pool.stats().byte_buffers, 0);
    }

    #[test]
    fn array_leases_keyed_by_shape_and_type() {
        let pool = BufferPool::default();
        {
            let mut canvas = pool.array::<u8>(&[2, 3], Some(0xFF));
            assert_eq!(canvas.shape(), &[2, 3]);
            assert_eq!(&canvas[..], &[0xFF; 6]);
            canvas[0] = 0;
        }
        assert_eq!(pool.stats().array_buffers, 1);

        let words = pool.array::<u16>(&[2, 3], None);
        assert_eq!(words.len(), 6);
        assert_eq!(pool.stats().array_buffers, 1);
        drop(words);
        assert_eq!(pool.stats().array_buffers, 2);

        let refilled = pool.array::<u8>(&[2, 3], Some(0x11));
        assert_eq!(&refilled[..], &[0x11; 6]);
    }

    #[test]
    fn clear_drops_pooled_and_outstanding() {
        let pool = BufferPool::default();
        pool.return_bytes(vec![0; 4]);
        let lease = pool.array::<u8>(&[4], None);
        pool.clear();
        assert_eq!(pool.stats().byte_buffers, 0);
        drop(lease);
        let stats = pool.stats();
        assert_eq!(stats.array_buffers, 0);
        assert_eq!(stats.generation, 1);
    }

    #[test]
    fn shared_between_threads() {
        let pool = Arc::new(BufferPool::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let buffer = pool.get_bytes(64, None);
                        pool.return_bytes(buffer);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.stats().byte_buffers <= MAX_POOL_SIZE);
    }
}
