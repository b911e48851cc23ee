//! # Pool Reuse Integration Test
//!
//! Proves a warmed-up pool serves chain churn without new allocations.

use tessera_core::{chain, Link, ObjectPool, Pooled, ScratchBufferPool, SharedPool};

struct Label {
    text: String,
    next: Link<Label>,
}

impl Pooled for Label {
    fn create() -> Self {
        Self {
            text: String::new(),
            next: None,
        }
    }

    fn next_link(&self) -> &Link<Self> {
        &self.next
    }

    fn next_link_mut(&mut self) -> &mut Link<Self> {
        &mut self.next
    }

    fn recycle(&mut self) -> bool {
        self.text.clear();
        true
    }
}

fn fill(pool: &mut ObjectPool<Label>, count: usize) -> Link<Label> {
    let mut head = None;
    for i in 0..count {
        let mut label = pool.get();
        label.text.push_str(&format!("label {i}"));
        head = chain::push(head, label);
    }
    head
}

/// Test: 1000 rounds of build/release only allocate for the first round.
#[test]
fn test_steady_state_without_allocation() {
    let mut pool: ObjectPool<Label> = ObjectPool::new();

    for _ in 0..1000 {
        let head = fill(&mut pool, 32);
        assert_eq!(chain::len(&head), 32);
        let head = pool.release_all(head);
        assert!(head.is_none());
    }

    let stats = pool.stats();
    assert_eq!(stats.created, 32);
    assert_eq!(stats.reused, 32 * 999);
    assert_eq!(pool.free_count(), 32);
}

/// Test: recycled labels come back cleaned by the hook.
#[test]
fn test_recycled_items_are_clean() {
    let mut pool: ObjectPool<Label> = ObjectPool::new();
    let head = fill(&mut pool, 3);
    let _ = pool.release_all(head);

    for _ in 0..3 {
        let label = pool.get();
        assert!(label.text.is_empty());
        assert!(label.next.is_none());
    }
}

/// Test: very long chains are released and dropped without recursion.
#[test]
fn test_long_chain_release() {
    let pool: SharedPool<Label> = SharedPool::new();
    let mut head = None;
    for _ in 0..200_000 {
        head = chain::push(head, pool.get());
    }
    let head = pool.release_all(head);
    assert!(head.is_none());
    assert_eq!(pool.free_count(), 200_000);
    drop(pool);
}

/// Test: scratch buffers survive many frames without growing the pool.
#[test]
fn test_scratch_frames() {
    let mut scratch = ScratchBufferPool::new();

    for frame in 0..100usize {
        {
            let mut a = scratch.get(1024);
            a.f32_mut(256)[0] = 1.0;
            let mut b = scratch.get(64 * 1024 + frame);
            b.i16_mut(16)[15] = -1;
        }
        assert_eq!(scratch.end_frame(), 2);
    }

    let stats = scratch.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.frames, 100);
    assert_eq!(scratch.free_count(), 2);
}
