//! # Object Pool
//!
//! Intrusive singly-linked free-list for nodes that live in chains.
//!
//! Tiles carry their labels and symbols as singly-linked chains. When a tile
//! is cleared the whole chain goes back to the pool in one pass, and loader
//! threads pull nodes back out while building the next payload.
//!
//! ```text
//!   tile.labels ──> [A] ──> [B] ──> [C] ──> None
//!                         release_all
//!   pool.free   ──> [C] ──> [B] ──> [A] ──> (older free nodes)
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// Owning link to the next node of a chain (or the head of a chain).
pub type Link<T> = Option<Box<T>>;

/// A node that can live in a chain and be recycled through an [`ObjectPool`].
pub trait Pooled: Sized {
    /// Factory for a fresh node when the free-list is empty.
    fn create() -> Self;

    /// The node's outgoing link.
    fn next_link(&self) -> &Link<Self>;

    /// Mutable access to the node's outgoing link.
    fn next_link_mut(&mut self) -> &mut Link<Self>;

    /// Cleanup hook run before the node enters the free-list.
    ///
    /// Returning `false` drops the node instead of pooling it.
    fn recycle(&mut self) -> bool {
        true
    }
}

/// Helpers for working with chains of [`Pooled`] nodes.
pub mod chain {
    use super::{Link, Pooled};

    /// Pushes `item` in front of `head` and returns the new head.
    #[must_use = "the returned link is the new chain head"]
    pub fn push<T: Pooled>(head: Link<T>, mut item: Box<T>) -> Link<T> {
        *item.next_link_mut() = head;
        Some(item)
    }

    /// Iterates the chain from its head.
    #[must_use]
    pub fn iter<T: Pooled>(head: &Link<T>) -> Iter<'_, T> {
        Iter {
            cursor: head.as_deref(),
        }
    }

    /// Number of nodes in the chain.
    #[must_use]
    pub fn len<T: Pooled>(head: &Link<T>) -> usize {
        iter(head).count()
    }

    /// Drops a chain node by node, without recursing through `Box` drops.
    pub fn drop_all<T: Pooled>(mut head: Link<T>) {
        while let Some(mut node) = head {
            head = node.next_link_mut().take();
        }
    }

    /// Borrowing iterator over a chain.
    pub struct Iter<'a, T> {
        cursor: Option<&'a T>,
    }

    impl<'a, T: Pooled> Iterator for Iter<'a, T> {
        type Item = &'a T;

        fn next(&mut self) -> Option<&'a T> {
            let current = self.cursor?;
            self.cursor = current.next_link().as_deref();
            Some(current)
        }
    }
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes constructed by the factory.
    pub created: u64,
    /// Nodes handed out from the free-list.
    pub reused: u64,
    /// Nodes accepted back into the free-list.
    pub released: u64,
    /// Nodes dropped because the hook or the limit refused them.
    pub discarded: u64,
}

/// Free-list of recycled chain nodes.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Wrap it in a [`SharedPool`] when loader
/// threads and the cache owner share it.
///
/// # Ownership
///
/// A node is owned by exactly one chain or by the free-list, never both.
/// `release*` consume the chain and hand back `None`, so the call site reads
/// `tile.labels = pool.release_all(tile.labels.take())` and no alias survives.
pub struct ObjectPool<T: Pooled> {
    /// Head of the free-list.
    free: Link<T>,
    /// Number of nodes in the free-list.
    free_count: usize,
    /// Maximum number of pooled nodes, unbounded when `None`.
    limit: Option<usize>,
    /// Counters.
    stats: PoolStats,
}

impl<T: Pooled> ObjectPool<T> {
    /// Creates an empty, unbounded pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free: None,
            free_count: 0,
            limit: None,
            stats: PoolStats {
                created: 0,
                reused: 0,
                released: 0,
                discarded: 0,
            },
        }
    }

    /// Creates an empty pool that keeps at most `limit` free nodes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            free: None,
            free_count: 0,
            limit: Some(limit),
            stats: PoolStats::default(),
        }
    }

    /// Number of nodes waiting in the free-list.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    /// Pool counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Returns a detached node, recycled if one is free.
    pub fn get(&mut self) -> Box<T> {
        match self.free.take() {
            Some(mut item) => {
                self.free = item.next_link_mut().take();
                self.free_count -= 1;
                self.stats.reused += 1;
                item
            }
            None => {
                self.stats.created += 1;
                Box::new(T::create())
            }
        }
    }

    /// Returns a single node to the pool.
    ///
    /// A node that is still linked to a tail releases the tail too.
    #[must_use = "assign the returned `None` over the released reference"]
    pub fn release(&mut self, item: Link<T>) -> Link<T> {
        if let Some(mut item) = item {
            let tail = item.next_link_mut().take();
            self.push_free(item);
            if tail.is_some() {
                return self.release_all(tail);
            }
        }
        None
    }

    /// Returns every node of `chain` to the pool in a single pass.
    #[must_use = "assign the returned `None` over the released chain"]
    pub fn release_all(&mut self, chain: Link<T>) -> Link<T> {
        let mut cursor = chain;
        while let Some(mut item) = cursor {
            cursor = item.next_link_mut().take();
            self.push_free(item);
        }
        None
    }

    /// Unlinks the first node matching `pred` from `chain` and pools it.
    ///
    /// Returns the (possibly new) chain head.
    #[must_use = "the returned link is the new chain head"]
    pub fn release_item<F>(&mut self, chain: Link<T>, mut pred: F) -> Link<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut head = chain?;

        if pred(&*head) {
            let rest = head.next_link_mut().take();
            self.push_free(head);
            return rest;
        }

        let mut cursor: &mut T = &mut head;
        loop {
            let hit = match cursor.next_link().as_deref() {
                Some(next) => pred(next),
                None => break,
            };

            if hit {
                if let Some(mut found) = cursor.next_link_mut().take() {
                    *cursor.next_link_mut() = found.next_link_mut().take();
                    self.push_free(found);
                }
                break;
            }

            match cursor.next_link_mut().as_deref_mut() {
                Some(next) => cursor = next,
                None => break,
            }
        }

        Some(head)
    }

    /// Drops every free node (used when memory is tight).
    pub fn shrink(&mut self) {
        chain::drop_all(self.free.take());
        self.free_count = 0;
    }

    fn push_free(&mut self, mut item: Box<T>) {
        let under_limit = self.limit.map_or(true, |limit| self.free_count < limit);
        if !item.recycle() || !under_limit {
            self.stats.discarded += 1;
            return;
        }

        *item.next_link_mut() = self.free.take();
        self.free = Some(item);
        self.free_count += 1;
        self.stats.released += 1;
    }
}

impl<T: Pooled> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pooled> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        chain::drop_all(self.free.take());
    }
}

/// An [`ObjectPool`] shared between threads.
///
/// Loader workers take nodes while building payloads; the cache owner
/// releases chains when it clears tiles.
pub struct SharedPool<T: Pooled> {
    inner: Arc<Mutex<ObjectPool<T>>>,
}

impl<T: Pooled> SharedPool<T> {
    /// Creates an unbounded shared pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ObjectPool::new())),
        }
    }

    /// Creates a shared pool keeping at most `limit` free nodes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ObjectPool::with_limit(limit))),
        }
    }

    /// Locks the pool for a batch of operations.
    pub fn lock(&self) -> MutexGuard<'_, ObjectPool<T>> {
        self.inner.lock()
    }

    /// Takes one node.
    pub fn get(&self) -> Box<T> {
        self.inner.lock().get()
    }

    /// Releases a whole chain.
    #[must_use = "assign the returned `None` over the released chain"]
    pub fn release_all(&self, chain: Link<T>) -> Link<T> {
        if chain.is_none() {
            return None;
        }
        self.inner.lock().release_all(chain)
    }

    /// Number of free nodes.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_count()
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }
}

impl<T: Pooled> Clone for SharedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Pooled> Default for SharedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        value: u32,
        next: Link<Node>,
    }

    impl Pooled for Node {
        fn create() -> Self {
            Self { value: 0, next: None }
        }

        fn next_link(&self) -> &Link<Self> {
            &self.next
        }

        fn next_link_mut(&mut self) -> &mut Link<Self> {
            &mut self.next
        }

        fn recycle(&mut self) -> bool {
            self.value = 0;
            true
        }
    }

    fn build_chain(pool: &mut ObjectPool<Node>, values: &[u32]) -> Link<Node> {
        let mut head = None;
        for &v in values.iter().rev() {
            let mut node = pool.get();
            node.value = v;
            head = chain::push(head, node);
        }
        head
    }

    fn values(head: &Link<Node>) -> Vec<u32> {
        chain::iter(head).map(|n| n.value).collect()
    }

    #[test]
    fn test_release_then_get_returns_same_item_once() {
        let mut pool: ObjectPool<Node> = ObjectPool::new();

        let item = pool.get();
        let addr: *const Node = &*item;

        let released = pool.release(Some(item));
        assert!(released.is_none());
        assert_eq!(pool.free_count(), 1);

        let again = pool.get();
        assert!(std::ptr::eq(addr, &*again));

        // Pool is empty now, the next node is freshly created
        let other = pool.get();
        assert!(!std::ptr::eq(addr, &*other));
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_release_all_then_get_without_allocation() {
        let mut pool: ObjectPool<Node> = ObjectPool::new();
        let head = build_chain(&mut pool, &[1, 2, 3, 4, 5]);
        assert_eq!(chain::len(&head), 5);
        assert_eq!(pool.stats().created, 5);

        let head = pool.release_all(head);
        assert!(head.is_none());
        assert_eq!(pool.free_count(), 5);

        for _ in 0..5 {
            let node = pool.get();
            assert_eq!(node.value, 0);
            assert!(node.next.is_none());
        }
        assert_eq!(pool.stats().created, 5);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_release_item_from_middle() {
        let mut pool: ObjectPool<Node> = ObjectPool::new();
        let head = build_chain(&mut pool, &[1, 2, 3]);

        let head = pool.release_item(head, |n| n.value == 2);
        assert_eq!(values(&head), vec![1, 3]);
        assert_eq!(pool.free_count(), 1);

        let head = pool.release_item(head, |n| n.value == 1);
        assert_eq!(values(&head), vec![3]);

        let head = pool.release_item(head, |n| n.value == 42);
        assert_eq!(values(&head), vec![3]);

        let head = pool.release_item(head, |n| n.value == 3);
        assert!(head.is_none());
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn test_release_linked_item_releases_tail() {
        let mut pool: ObjectPool<Node> = ObjectPool::new();
        let head = build_chain(&mut pool, &[1, 2]);

        let head = pool.release(head);
        assert!(head.is_none());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_limit_discards_surplus() {
        let mut pool: ObjectPool<Node> = ObjectPool::with_limit(2);
        let head = build_chain(&mut pool, &[1, 2, 3]);

        let _ = pool.release_all(head);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_shrink_empties_free_list() {
        let mut pool: ObjectPool<Node> = ObjectPool::new();
        let head = build_chain(&mut pool, &[1, 2, 3]);
        let _ = pool.release_all(head);

        pool.shrink();
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_shared_pool_across_threads() {
        let pool: SharedPool<Node> = SharedPool::new();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut head = None;
                    for i in 0..100 {
                        let mut node = pool.get();
                        node.value = t * 1000 + i;
                        head = chain::push(head, node);
                    }
                    assert_eq!(chain::len(&head), 100);
                    let _ = pool.release_all(head);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created + stats.reused, 400);
        assert_eq!(stats.released, 400);
        assert_eq!(pool.free_count() as u64, stats.created);
    }
}
