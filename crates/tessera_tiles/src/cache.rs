//! # Tile Cache
//!
//! The arena quad-tree of cached tiles and the proxy-lock protocol.
//!
//! ## Layout
//!
//! ```text
//!   TileCache ── Mutex<TileTable>
//!                  ├── slots: SlotMap<TileKey, TileCacheEntry>   (generational)
//!                  ├── index: HashMap<TileId, TileKey>           (quad-tree lookup)
//!                  └── visible: Vec<TileKey>                     (published by the manager)
//!
//!   TileCacheEntry ── Arc<TileData> ── Mutex<TilePayload>       (shared with the renderer)
//! ```
//!
//! Entry bookkeeping (state, lock and ref counts, proxies) lives under the
//! table lock. The payload lives behind its own lock so the render thread
//! can upload and draw without holding the table.
//!
//! ## Invariant
//!
//! An entry is cleared only when `lock_count == 0 && ref_count == 0`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use slotmap::{new_key_type, SlotMap};

use crate::error::{SourceError, TileError, TileResult};
use crate::payload::{GpuBufferId, PayloadPools, TilePayload};
use crate::proxy::{ProxyLinks, ProxySet};
use crate::tile::{TileId, TileState};

new_key_type! {
    /// Generational arena key of a cache entry. Slot reuse changes the key.
    pub struct TileKey;
}

/// Tile data shared between the cache and the render thread.
pub struct TileData {
    id: TileId,
    payload: Mutex<TilePayload>,
    last_draw: AtomicU64,
}

/// Shared handle to a tile's data.
pub type TileHandle = Arc<TileData>;

impl TileData {
    fn new(id: TileId) -> Self {
        Self {
            id,
            payload: Mutex::new(TilePayload::default()),
            last_draw: AtomicU64::new(0),
        }
    }

    /// Tile identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> TileId {
        self.id
    }

    /// Locks the payload.
    pub fn payload(&self) -> MutexGuard<'_, TilePayload> {
        self.payload.lock()
    }

    /// Stamps the tile as drawn in `frame`.
    ///
    /// Returns `false` if it was already drawn in that frame.
    pub fn mark_drawn(&self, frame: u64) -> bool {
        self.last_draw.swap(frame, Ordering::AcqRel) != frame
    }

    /// Frame the tile was last drawn in.
    #[must_use]
    pub fn last_draw(&self) -> u64 {
        self.last_draw.load(Ordering::Acquire)
    }
}

/// One cached tile.
pub struct TileCacheEntry {
    id: TileId,
    state: TileState,
    lock_count: u8,
    ref_count: u32,
    proxies: ProxyLinks,
    distance: f64,
    visible: bool,
    load_serial: u64,
    pending_clear: bool,
    data: TileHandle,
}

impl TileCacheEntry {
    fn new(id: TileId) -> Self {
        Self {
            id,
            state: TileState::None,
            lock_count: 0,
            ref_count: 0,
            proxies: ProxyLinks::default(),
            distance: 0.0,
            visible: false,
            load_serial: 0,
            pending_clear: false,
            data: Arc::new(TileData::new(id)),
        }
    }

    /// Tile identity.
    #[must_use]
    pub const fn id(&self) -> TileId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TileState {
        self.state
    }

    /// Direct holders.
    #[must_use]
    pub const fn lock_count(&self) -> u8 {
        self.lock_count
    }

    /// Tiles using this one as a proxy.
    #[must_use]
    pub const fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Relatives pinned by this tile's current lock.
    #[must_use]
    pub const fn proxies(&self) -> ProxySet {
        self.proxies.set()
    }

    /// Pinned relatives with their keys.
    #[must_use]
    pub const fn proxy_links(&self) -> &ProxyLinks {
        &self.proxies
    }

    /// Held directly or as a proxy.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock_count > 0 || self.ref_count > 0
    }

    /// Loading, `NewData` or Ready.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Distance from the map center at the last manager update.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.distance
    }

    /// Part of the last published visible set.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Detached, waiting to be removed once unlocked.
    #[must_use]
    pub const fn is_pending_clear(&self) -> bool {
        self.pending_clear
    }

    /// Shared payload handle.
    #[must_use]
    pub fn handle(&self) -> &TileHandle {
        &self.data
    }
}

/// Ticket handed to a loader; ties the result to one load attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    /// Entry key.
    pub key: TileKey,
    /// Tile identity.
    pub id: TileId,
    /// Load attempt; any clear or reload invalidates it.
    pub serial: u64,
}

/// What happened to a loader's result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Payload published, tile is `NewData`.
    Published,
    /// Load failed, tile is `Error`.
    Failed,
    /// The tile was cleared, evicted or reloaded; the result was dropped.
    Stale,
}

/// The cache table. Access through [`TileCache::table`].
pub struct TileTable {
    slots: SlotMap<TileKey, TileCacheEntry>,
    index: HashMap<TileId, TileKey>,
    visible: Vec<TileKey>,
    pools: PayloadPools,
    retired: Sender<GpuBufferId>,
    next_serial: u64,
}

impl TileTable {
    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No cached entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entry for `key`.
    #[must_use]
    pub fn get(&self, key: TileKey) -> Option<&TileCacheEntry> {
        self.slots.get(key)
    }

    /// Key of the entry for `id`.
    #[must_use]
    pub fn find(&self, id: TileId) -> Option<TileKey> {
        self.index.get(&id).copied()
    }

    /// All entries.
    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &TileCacheEntry)> + '_ {
        self.slots.iter()
    }

    /// The visible set published by the last manager update.
    #[must_use]
    pub fn visible(&self) -> &[TileKey] {
        &self.visible
    }

    /// Returns the entry for `id`, creating an empty one if needed.
    pub fn insert(&mut self, id: TileId) -> TileKey {
        if let Some(key) = self.find(id) {
            return key;
        }
        let key = self.slots.insert(TileCacheEntry::new(id));
        self.index.insert(id, key);
        key
    }

    /// Keys of the cached relatives of `id`, in [`ProxySet::SLOTS`] order.
    #[must_use]
    pub fn relatives(&self, id: TileId) -> [Option<TileKey>; 6] {
        id.relatives()
            .map(|relative| relative.and_then(|relative| self.find(relative)))
    }

    /// Takes a direct hold on a tile.
    ///
    /// The first holder pins every cached relative whose state is not
    /// `None` as a proxy.
    ///
    /// # Errors
    ///
    /// [`TileError::LockOverflow`] past 255 holders, [`TileError::UnknownTile`]
    /// for a stale key.
    pub fn lock(&mut self, key: TileKey) -> TileResult<()> {
        let entry = self.slots.get(key).ok_or(TileError::UnknownTile)?;
        let (id, count) = (entry.id, entry.lock_count);
        let next = count.checked_add(1).ok_or(TileError::LockOverflow(id))?;

        if count == 0 {
            let mut links = ProxyLinks::default();
            for (index, relative) in self.relatives(id).into_iter().enumerate() {
                let Some(relative) = relative else { continue };
                if let Some(proxy) = self.slots.get_mut(relative) {
                    if proxy.state != TileState::None {
                        proxy.ref_count += 1;
                        links.pin(index, relative);
                    }
                }
            }
            if let Some(entry) = self.slots.get_mut(key) {
                entry.proxies = links;
            }
        }

        if let Some(entry) = self.slots.get_mut(key) {
            entry.lock_count = next;
        }
        Ok(())
    }

    /// Drops a direct hold. The last holder unpins the recorded proxies.
    ///
    /// # Errors
    ///
    /// [`TileError::NotLocked`] when nobody holds the tile.
    pub fn unlock(&mut self, key: TileKey) -> TileResult<()> {
        let entry = self.slots.get_mut(key).ok_or(TileError::UnknownTile)?;
        if entry.lock_count == 0 {
            return Err(TileError::NotLocked(entry.id));
        }
        entry.lock_count -= 1;
        if entry.lock_count > 0 || entry.proxies.is_empty() {
            return Ok(());
        }

        let links = std::mem::take(&mut entry.proxies);
        for (_, relative) in links.iter() {
            if let Some(proxy) = self.slots.get_mut(relative) {
                debug_assert!(proxy.ref_count > 0);
                proxy.ref_count = proxy.ref_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Held directly or as a proxy. Unknown keys are not locked.
    #[must_use]
    pub fn is_locked(&self, key: TileKey) -> bool {
        self.slots.get(key).map_or(false, TileCacheEntry::is_locked)
    }

    /// Validated state change.
    ///
    /// Clearing goes through [`clear`](Self::clear), which also releases the
    /// payload.
    ///
    /// # Errors
    ///
    /// [`TileError::InvalidTransition`] for edges outside the state machine.
    pub fn set_state(&mut self, key: TileKey, next: TileState) -> TileResult<TileState> {
        let entry = self.slots.get_mut(key).ok_or(TileError::UnknownTile)?;
        let from = entry.state;
        if next == TileState::None || !from.can_transition_to(next) {
            return Err(TileError::InvalidTransition {
                tile: entry.id,
                from,
                to: next,
            });
        }
        entry.state = next;
        tracing::trace!(tile = %entry.id, ?from, to = ?next, "tile state");
        Ok(from)
    }

    /// Moves a tile to `Loading` and issues the ticket for its loader.
    ///
    /// # Errors
    ///
    /// [`TileError::InvalidTransition`] unless the tile is `None` or `Error`.
    pub fn begin_load(&mut self, key: TileKey) -> TileResult<LoadTicket> {
        self.set_state(key, TileState::Loading)?;
        self.next_serial += 1;
        let serial = self.next_serial;
        let entry = self.slots.get_mut(key).ok_or(TileError::UnknownTile)?;
        entry.load_serial = serial;
        Ok(LoadTicket {
            key,
            id: entry.id,
            serial,
        })
    }

    /// Whether `ticket` is still the current load of a `Loading` tile.
    #[must_use]
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.slots.get(ticket.key).map_or(false, |entry| {
            entry.load_serial == ticket.serial && entry.state == TileState::Loading
        })
    }

    /// Returns a tile to `None`: chains back to the pools, GPU buffer retired.
    ///
    /// Clearing a `None` tile is a no-op.
    ///
    /// # Errors
    ///
    /// [`TileError::TileLocked`] while the tile is held; nothing changes.
    pub fn clear(&mut self, key: TileKey) -> TileResult<()> {
        let entry = self.slots.get_mut(key).ok_or(TileError::UnknownTile)?;
        if entry.is_locked() {
            tracing::warn!(
                tile = %entry.id,
                lock_count = entry.lock_count,
                ref_count = entry.ref_count,
                "refusing to clear locked tile"
            );
            return Err(TileError::TileLocked(entry.id));
        }
        entry.pending_clear = false;
        if entry.state == TileState::None {
            return Ok(());
        }

        let from = entry.state;
        entry.state = TileState::None;
        // Any load still in flight is now stale
        entry.load_serial = 0;
        let detached = self.pools.release(&mut entry.data.payload());
        tracing::debug!(tile = %entry.id, ?from, "tile cleared");

        if let Some(buffer) = detached {
            if self.retired.send(buffer).is_err() {
                tracing::warn!(?buffer, "retired buffer channel closed");
            }
        }
        Ok(())
    }

    /// Clears and removes a tile from the arena.
    ///
    /// # Errors
    ///
    /// [`TileError::TileLocked`] while the tile is held.
    pub fn remove(&mut self, key: TileKey) -> TileResult<TileId> {
        self.clear(key)?;
        let entry = self.slots.remove(key).ok_or(TileError::UnknownTile)?;
        // A detached entry no longer owns its index slot
        if self.index.get(&entry.id) == Some(&key) {
            self.index.remove(&entry.id);
        }
        Ok(entry.id)
    }

    /// Detaches a locked tile so it is removed on a later manager update,
    /// and invalidates its in-flight load.
    ///
    /// The tile id is free again at once: the next [`insert`](Self::insert)
    /// creates a fresh entry while the old one waits for its holders.
    pub fn defer_clear(&mut self, key: TileKey) {
        let Some(entry) = self.slots.get_mut(key) else { return };
        entry.pending_clear = true;
        entry.load_serial = 0;
        if self.index.get(&entry.id) == Some(&key) {
            self.index.remove(&entry.id);
        }
    }

    pub(crate) fn keys(&self) -> Vec<TileKey> {
        self.slots.keys().collect()
    }

    pub(crate) fn set_placement(&mut self, key: TileKey, distance: f64, visible: bool) {
        if let Some(entry) = self.slots.get_mut(key) {
            entry.distance = distance;
            entry.visible = visible;
        }
    }

    pub(crate) fn publish_visible(&mut self, visible: &[TileKey]) {
        self.visible.clear();
        self.visible.extend_from_slice(visible);
    }

    /// Publishes a load result. Stale results go back to the pools.
    fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        result: Result<TilePayload, SourceError>,
    ) -> LoadOutcome {
        if !self.is_current(ticket) {
            tracing::warn!(tile = %ticket.id, "dropping stale tile load");
            if let Ok(mut payload) = result {
                let detached = self.pools.release(&mut payload);
                debug_assert!(detached.is_none());
            }
            return LoadOutcome::Stale;
        }

        let Some(entry) = self.slots.get_mut(ticket.key) else {
            return LoadOutcome::Stale;
        };
        match result {
            Ok(payload) => {
                let mut previous = std::mem::replace(&mut *entry.data.payload(), payload);
                entry.state = TileState::NewData;
                tracing::trace!(tile = %entry.id, "tile loaded");
                let detached = self.pools.release(&mut previous);
                debug_assert!(detached.is_none());
                LoadOutcome::Published
            }
            Err(error) => {
                entry.state = TileState::Error;
                tracing::error!(tile = %entry.id, %error, "tile load failed");
                LoadOutcome::Failed
            }
        }
    }
}

/// A tile held by the render thread for one frame.
pub struct LockedTile {
    /// Entry key.
    pub key: TileKey,
    /// State when locked (updated by the renderer after upload).
    pub state: TileState,
    /// Payload handle.
    pub data: TileHandle,
    /// Relatives pinned by the lock that were drawable at lock time.
    pub proxies: Vec<ProxyTile>,
}

/// A pinned relative that can stand in for a tile.
pub struct ProxyTile {
    /// Which relative.
    pub slot: ProxySet,
    /// Entry key.
    pub key: TileKey,
    /// Payload handle.
    pub data: TileHandle,
}

/// The render thread's locked view of the visible set.
#[derive(Default)]
pub struct TileSet {
    tiles: Vec<LockedTile>,
}

impl TileSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Held tiles, nearest first.
    #[must_use]
    pub fn tiles(&self) -> &[LockedTile] {
        &self.tiles
    }

    /// Mutable access for recording uploads.
    pub fn tiles_mut(&mut self) -> &mut [LockedTile] {
        &mut self.tiles
    }

    /// Number of held tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// The tile cache shared by loaders, the logic thread and the render thread.
pub struct TileCache {
    table: Mutex<TileTable>,
    pools: PayloadPools,
    retired: Receiver<GpuBufferId>,
}

impl TileCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let pools = PayloadPools::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            table: Mutex::new(TileTable {
                slots: SlotMap::with_key(),
                index: HashMap::new(),
                visible: Vec::new(),
                pools: pools.clone(),
                retired: tx,
                next_serial: 0,
            }),
            pools,
            retired: rx,
        })
    }

    /// Locks the table.
    pub fn table(&self) -> MutexGuard<'_, TileTable> {
        self.table.lock()
    }

    /// Node pools for payload builders.
    #[must_use]
    pub fn pools(&self) -> &PayloadPools {
        &self.pools
    }

    /// GPU buffers detached by clears, to be deleted on the render thread.
    #[must_use]
    pub fn retired_buffers(&self) -> &Receiver<GpuBufferId> {
        &self.retired
    }

    /// Loader entry point: publishes a finished payload or a failure.
    pub fn complete_load(
        &self,
        ticket: &LoadTicket,
        result: Result<TilePayload, SourceError>,
    ) -> LoadOutcome {
        self.table.lock().complete_load(ticket, result)
    }

    /// Render-thread commit after upload: `NewData -> Ready`.
    ///
    /// # Errors
    ///
    /// [`TileError::InvalidTransition`] if the tile is not `NewData`.
    pub fn mark_ready(&self, key: TileKey) -> TileResult<()> {
        self.table.lock().set_state(key, TileState::Ready).map(|_| ())
    }

    /// Render-thread entry point: swaps `set` from last frame's holds to
    /// holds on the currently published visible set.
    ///
    /// Drawable (`Ready`) proxies are captured per tile.
    pub fn lock_visible(&self, set: &mut TileSet) {
        let mut table = self.table.lock();
        Self::unlock_set(&mut table, set);

        let visible = std::mem::take(&mut table.visible);
        for &key in &visible {
            if let Err(error) = table.lock(key) {
                tracing::warn!(%error, "skipping visible tile");
                continue;
            }
            let Some(entry) = table.get(key) else { continue };

            let proxies = entry
                .proxies
                .iter()
                .filter_map(|(slot, proxy_key)| {
                    let proxy = table.get(proxy_key)?;
                    (proxy.state == TileState::Ready).then(|| ProxyTile {
                        slot,
                        key: proxy_key,
                        data: Arc::clone(&proxy.data),
                    })
                })
                .collect();

            set.tiles.push(LockedTile {
                key,
                state: entry.state,
                data: Arc::clone(&entry.data),
                proxies,
            });
        }
        table.visible = visible;
    }

    /// Releases every hold in `set`.
    pub fn release_tiles(&self, set: &mut TileSet) {
        let mut table = self.table.lock();
        Self::unlock_set(&mut table, set);
    }

    fn unlock_set(table: &mut TileTable, set: &mut TileSet) {
        for tile in set.tiles.drain(..) {
            if let Err(error) = table.unlock(tile.key) {
                tracing::warn!(%error, "unbalanced tile unlock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadBuilder;

    fn loaded(cache: &TileCache, id: TileId, state: TileState) -> TileKey {
        let mut table = cache.table();
        let key = table.insert(id);
        let ticket = table.begin_load(key).unwrap();
        drop(table);

        let mut builder = PayloadBuilder::new(cache.pools().clone());
        builder.add_label("label", 0.0, 0.0, 0);
        cache.complete_load(&ticket, Ok(builder.finish()));

        if state == TileState::Ready {
            cache.mark_ready(key).unwrap();
        }
        key
    }

    #[test]
    fn test_insert_is_idempotent() {
        let cache = TileCache::new();
        let mut table = cache.table();
        let a = table.insert(TileId::new(1, 2, 3));
        let b = table.insert(TileId::new(1, 2, 3));
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(a).unwrap().state(), TileState::None);
    }

    #[test]
    fn test_balanced_locking_restores_counts() {
        let cache = TileCache::new();
        let tile = TileId::new(2, 2, 3);
        let parent = loaded(&cache, tile.parent().unwrap(), TileState::Ready);
        let child = loaded(&cache, tile.child(1).unwrap(), TileState::NewData);

        let mut table = cache.table();
        let empty_child = table.insert(tile.child(2).unwrap());
        let key = table.insert(tile);

        table.lock(key).unwrap();
        table.lock(key).unwrap();
        let entry = table.get(key).unwrap();
        assert_eq!(entry.lock_count(), 2);
        assert_eq!(entry.proxies(), ProxySet::PARENT | ProxySet::CHILD1);
        assert_eq!(table.get(parent).unwrap().ref_count(), 1);
        assert_eq!(table.get(child).unwrap().ref_count(), 1);
        // None relatives are never pinned
        assert_eq!(table.get(empty_child).unwrap().ref_count(), 0);

        table.unlock(key).unwrap();
        assert_eq!(table.get(parent).unwrap().ref_count(), 1);
        table.unlock(key).unwrap();

        assert!(!table.is_locked(key));
        assert!(table.get(key).unwrap().proxies().is_empty());
        assert_eq!(table.get(parent).unwrap().ref_count(), 0);
        assert_eq!(table.get(child).unwrap().ref_count(), 0);
    }

    #[test]
    fn test_unlock_uses_keys_captured_at_lock() {
        let cache = TileCache::new();
        let tile = TileId::new(0, 0, 2);

        let mut table = cache.table();
        let parent = table.insert(tile.parent().unwrap());
        let key = table.insert(tile);
        table.lock(key).unwrap();
        assert!(table.get(key).unwrap().proxies().is_empty());

        // The parent starts loading after the lock was taken
        table.begin_load(parent).unwrap();
        table.lock(key).unwrap();
        table.unlock(key).unwrap();
        table.unlock(key).unwrap();

        assert_eq!(table.get(parent).unwrap().ref_count(), 0);
        assert!(!table.is_locked(key));
    }

    #[test]
    fn test_lock_overflow_is_an_error() {
        let cache = TileCache::new();
        let mut table = cache.table();
        let key = table.insert(TileId::new(0, 0, 0));

        for _ in 0..255 {
            table.lock(key).unwrap();
        }
        assert_eq!(
            table.lock(key),
            Err(TileError::LockOverflow(TileId::new(0, 0, 0)))
        );
        assert_eq!(table.get(key).unwrap().lock_count(), 255);
    }

    #[test]
    fn test_unlock_without_lock_is_an_error() {
        let cache = TileCache::new();
        let mut table = cache.table();
        let key = table.insert(TileId::new(0, 0, 0));
        assert_eq!(
            table.unlock(key),
            Err(TileError::NotLocked(TileId::new(0, 0, 0)))
        );
    }

    #[test]
    fn test_state_machine_enforced() {
        let cache = TileCache::new();
        let mut table = cache.table();
        let key = table.insert(TileId::new(0, 0, 1));

        assert!(matches!(
            table.set_state(key, TileState::Ready),
            Err(TileError::InvalidTransition { .. })
        ));
        table.begin_load(key).unwrap();
        assert!(table.begin_load(key).is_err());
        assert_eq!(table.set_state(key, TileState::Error), Ok(TileState::Loading));
        // Error -> Loading retries
        table.begin_load(key).unwrap();
    }

    #[test]
    fn test_ready_tile_evicted_releases_payload() {
        let cache = TileCache::new();
        let id = TileId::new(2, 3, 5);

        let ticket = {
            let mut table = cache.table();
            let key = table.insert(id);
            table.begin_load(key).unwrap()
        };
        let mut builder = PayloadBuilder::new(cache.pools().clone());
        builder.add_label("one", 0.0, 0.0, 0);
        builder.add_label("two", 0.0, 0.0, 0);
        assert_eq!(
            cache.complete_load(&ticket, Ok(builder.finish())),
            LoadOutcome::Published
        );

        let handle = Arc::clone(cache.table().get(ticket.key).unwrap().handle());
        handle.payload().geometry.buffer = Some(GpuBufferId(9));
        cache.mark_ready(ticket.key).unwrap();

        cache.table().clear(ticket.key).unwrap();

        let table = cache.table();
        assert_eq!(table.get(ticket.key).unwrap().state(), TileState::None);
        assert_eq!(cache.pools().labels.free_count(), 2);
        assert!(handle.payload().labels.is_none());
        assert!(handle.payload().geometry.buffer.is_none());
        assert_eq!(cache.retired_buffers().try_recv(), Ok(GpuBufferId(9)));
    }

    #[test]
    fn test_parent_proxy_blocks_eviction() {
        let cache = TileCache::new();
        let child_id = TileId::new(4, 4, 4);
        let parent = loaded(&cache, child_id.parent().unwrap(), TileState::Ready);

        let mut table = cache.table();
        let child = table.insert(child_id);
        table.begin_load(child).unwrap();

        table.lock(child).unwrap();
        assert_eq!(table.get(parent).unwrap().ref_count(), 1);
        assert_eq!(table.remove(parent), Err(TileError::TileLocked(child_id.parent().unwrap())));
        assert_eq!(table.get(parent).unwrap().state(), TileState::Ready);

        table.unlock(child).unwrap();
        assert_eq!(table.get(parent).unwrap().ref_count(), 0);
        assert!(table.remove(parent).is_ok());
        assert!(table.get(parent).is_none());
    }

    #[test]
    fn test_stale_load_is_dropped() {
        let cache = TileCache::new();
        let ticket = {
            let mut table = cache.table();
            let key = table.insert(TileId::new(1, 1, 1));
            table.begin_load(key).unwrap()
        };

        // Cancelled while loading
        cache.table().clear(ticket.key).unwrap();

        let mut builder = PayloadBuilder::new(cache.pools().clone());
        builder.add_label("late", 0.0, 0.0, 0);
        assert_eq!(
            cache.complete_load(&ticket, Ok(builder.finish())),
            LoadOutcome::Stale
        );
        assert_eq!(cache.pools().labels.free_count(), 1);
        assert_eq!(
            cache.table().get(ticket.key).unwrap().state(),
            TileState::None
        );
    }

    #[test]
    fn test_removed_key_is_not_reused() {
        let cache = TileCache::new();
        let mut table = cache.table();
        let id = TileId::new(0, 0, 0);
        let first = table.insert(id);
        table.remove(first).unwrap();
        let second = table.insert(id);

        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert_eq!(table.lock(first), Err(TileError::UnknownTile));
    }

    #[test]
    fn test_failed_load_marks_error() {
        let cache = TileCache::new();
        let ticket = {
            let mut table = cache.table();
            let key = table.insert(TileId::new(0, 1, 1));
            table.begin_load(key).unwrap()
        };
        let outcome = cache.complete_load(
            &ticket,
            Err(SourceError::NotFound(TileId::new(0, 1, 1))),
        );
        assert_eq!(outcome, LoadOutcome::Failed);
        assert_eq!(
            cache.table().get(ticket.key).unwrap().state(),
            TileState::Error
        );
    }

    #[test]
    fn test_lock_visible_captures_ready_proxies() {
        let cache = TileCache::new();
        let tile = TileId::new(1, 1, 2);
        let parent = loaded(&cache, tile.parent().unwrap(), TileState::Ready);
        let grandparent = loaded(&cache, tile.grandparent().unwrap(), TileState::NewData);

        let key = {
            let mut table = cache.table();
            let key = table.insert(tile);
            table.begin_load(key).unwrap();
            table.publish_visible(&[key]);
            key
        };

        let mut set = TileSet::new();
        cache.lock_visible(&mut set);
        assert_eq!(set.len(), 1);
        let locked = &set.tiles()[0];
        assert_eq!(locked.key, key);
        assert_eq!(locked.state, TileState::Loading);
        assert_eq!(locked.proxies.len(), 1);
        assert_eq!(locked.proxies[0].slot, ProxySet::PARENT);
        assert_eq!(locked.proxies[0].key, parent);
        // Not drawable, but still pinned
        assert_eq!(cache.table().get(grandparent).unwrap().ref_count(), 1);

        // Locking again releases the previous holds first
        cache.lock_visible(&mut set);
        assert_eq!(cache.table().get(key).unwrap().lock_count(), 1);

        cache.release_tiles(&mut set);
        assert!(set.is_empty());
        let table = cache.table();
        assert!(!table.is_locked(key));
        assert_eq!(table.get(parent).unwrap().ref_count(), 0);
        assert_eq!(table.get(grandparent).unwrap().ref_count(), 0);
    }

    #[test]
    fn test_mark_drawn_once_per_frame() {
        let data = TileData::new(TileId::new(0, 0, 0));
        assert!(data.mark_drawn(1));
        assert!(!data.mark_drawn(1));
        assert!(data.mark_drawn(2));
        assert_eq!(data.last_draw(), 2);
    }
}
