//! # Cache Benchmark
//!
//! Measures the per-frame cost of locking a visible set with proxies and
//! of a logic-thread update over a warm cache.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_core::MapPosition;
use tessera_tiles::{
    JobQueue, LoadOutcome, ManagerSettings, PayloadBuilder, TileCache, TileManager, TileSet,
};

fn warm_manager() -> TileManager {
    let cache = TileCache::new();
    let jobs = JobQueue::new();
    let mut manager = TileManager::new(
        cache,
        jobs.clone(),
        ManagerSettings {
            view_width: 1920,
            view_height: 1080,
            cache_limit: 512,
            ..ManagerSettings::default()
        },
    );

    // Parent level first so every visible tile has a proxy
    for scale in [512.0, 1024.0] {
        manager.update(&MapPosition::new(0.5, 0.5, scale));
        for ticket in jobs.drain() {
            let mut builder = PayloadBuilder::new(manager.cache().pools().clone());
            builder.add_label("bench", 0.0, 0.0, 0);
            let outcome = manager.cache().complete_load(&ticket, Ok(builder.finish()));
            assert_eq!(outcome, LoadOutcome::Published);
            manager.cache().mark_ready(ticket.key).unwrap();
        }
    }
    manager
}

fn bench_lock_visible(c: &mut Criterion) {
    let manager = warm_manager();
    let cache = manager.cache();
    let mut set = TileSet::new();

    c.bench_function("lock_visible_1080p", |b| {
        b.iter(|| {
            cache.lock_visible(&mut set);
            black_box(set.len());
            cache.release_tiles(&mut set);
        });
    });
}

fn bench_update(c: &mut Criterion) {
    let mut manager = warm_manager();
    let position = MapPosition::new(0.5, 0.5, 1024.0);

    c.bench_function("manager_update_warm", |b| {
        b.iter(|| black_box(manager.update(&position)));
    });
}

criterion_group!(benches, bench_lock_visible, bench_update);
criterion_main!(benches);
