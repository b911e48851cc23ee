//! # Tile Manager
//!
//! Logic-thread owner of cache membership.
//!
//! Every [`update`](TileManager::update) works out which tiles cover the
//! view, makes sure they exist and are loading, cancels loads that are no
//! longer needed, evicts beyond the cache limit and publishes the visible
//! set for the render thread.

use std::collections::HashSet;
use std::sync::Arc;

use tessera_core::MapPosition;

use crate::cache::{TileCache, TileKey, TileTable};
use crate::loader::JobQueue;
use crate::tile::{TileId, TileState};

/// View and cache parameters of a [`TileManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// View width in pixels.
    pub view_width: u32,
    /// View height in pixels.
    pub view_height: u32,
    /// Entries kept before eviction starts.
    pub cache_limit: usize,
    /// Lowest zoom level tiles are loaded for.
    pub min_zoom: u8,
    /// Highest zoom level tiles are loaded for.
    pub max_zoom: u8,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            tile_size: 256,
            view_width: 1280,
            view_height: 720,
            cache_limit: 256,
            min_zoom: 0,
            max_zoom: 20,
        }
    }
}

/// What one update did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Tiles in the published visible set.
    pub visible: usize,
    /// Loads queued.
    pub dispatched: usize,
    /// Queued loads cancelled.
    pub cancelled: usize,
    /// Deferred clears carried out.
    pub cleared: usize,
    /// Entries removed from the cache.
    pub evicted: usize,
}

/// Cache membership, load dispatch and eviction.
pub struct TileManager {
    cache: Arc<TileCache>,
    jobs: JobQueue,
    settings: ManagerSettings,
    /// Reused between updates.
    visible: Vec<TileKey>,
    position: Option<MapPosition>,
}

impl TileManager {
    /// Creates a manager feeding `jobs` for `cache`.
    #[must_use]
    pub fn new(cache: Arc<TileCache>, jobs: JobQueue, settings: ManagerSettings) -> Self {
        Self {
            cache,
            jobs,
            settings,
            visible: Vec::new(),
            position: None,
        }
    }

    /// The managed cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Resizes the view; takes effect on the next update.
    pub fn set_view_size(&mut self, width: u32, height: u32) {
        self.settings.view_width = width;
        self.settings.view_height = height;
    }

    /// Position of the last update.
    #[must_use]
    pub fn position(&self) -> Option<MapPosition> {
        self.position
    }

    /// Tiles covering the view at `position`, nearest first.
    #[must_use]
    pub fn tiles_for_view(&self, position: &MapPosition) -> Vec<TileId> {
        let settings = &self.settings;
        let zoom = position
            .zoom_level
            .clamp(settings.min_zoom, settings.max_zoom);
        let n = TileId::tiles_per_side(zoom);

        // Pixels covered by one tile at this scale
        let tile_pixels = f64::from(settings.tile_size) * position.scale / n;
        let mut half_w = f64::from(settings.view_width) / 2.0 / tile_pixels;
        let mut half_h = f64::from(settings.view_height) / 2.0 / tile_pixels;
        if position.bearing.abs() > f32::EPSILON || position.tilt.abs() > f32::EPSILON {
            // Rotated or tilted views see the diagonal in every direction
            let radius = half_w.hypot(half_h);
            half_w = radius;
            half_h = radius;
        }

        let max = n - 1.0;
        let (cx, cy) = (position.x * n, position.y * n);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let to_index = |v: f64| v.floor().clamp(0.0, max) as u32;
        let (x0, x1) = (to_index(cx - half_w), to_index(cx + half_w));
        let (y0, y1) = (to_index(cy - half_h), to_index(cy + half_h));

        let mut tiles: Vec<TileId> = (y0..=y1)
            .flat_map(|y| (x0..=x1).map(move |x| TileId::new(x, y, zoom)))
            .collect();
        tiles.sort_by(|a, b| a.distance_to(position).total_cmp(&b.distance_to(position)));
        tiles
    }

    /// One logic tick at `position`.
    pub fn update(&mut self, position: &MapPosition) -> UpdateStats {
        let tiles = self.tiles_for_view(position);
        let mut stats = UpdateStats::default();
        let mut dispatch = Vec::new();

        let mut table = self.cache.table();

        // Deferred clears whose holders are gone
        for key in table.keys() {
            let pending = table
                .get(key)
                .map_or(false, |entry| entry.is_pending_clear() && !entry.is_locked());
            if pending && table.remove(key).is_ok() {
                stats.cleared += 1;
            }
        }

        // Membership and placement. Failed tiles reload only on re-entering
        // the view.
        let previous: HashSet<TileKey> = self.visible.drain(..).collect();
        for key in table.keys() {
            let distance = table.get(key).map_or(0.0, |entry| entry.id().distance_to(position));
            table.set_placement(key, distance, false);
        }
        for &id in &tiles {
            let key = table.insert(id);
            table.set_placement(key, id.distance_to(position), true);
            self.visible.push(key);

            let needs_load = table.get(key).map_or(false, |entry| match entry.state() {
                TileState::None => true,
                TileState::Error => !previous.contains(&key),
                _ => false,
            });
            if needs_load {
                match table.begin_load(key) {
                    Ok(ticket) => dispatch.push(ticket),
                    Err(error) => tracing::warn!(%error, "cannot dispatch tile"),
                }
            }
        }

        stats.cancelled = self.cancel_jobs(&mut table, false);
        stats.evicted = self.evict(&mut table);
        table.publish_visible(&self.visible);
        stats.visible = self.visible.len();
        drop(table);

        stats.dispatched = dispatch.len();
        for ticket in dispatch {
            self.jobs.push(ticket);
        }
        self.position = Some(*position);

        if stats.dispatched > 0 || stats.evicted > 0 || stats.cancelled > 0 {
            tracing::debug!(
                zoom = position.zoom_level,
                visible = stats.visible,
                dispatched = stats.dispatched,
                cancelled = stats.cancelled,
                evicted = stats.evicted,
                "tile update"
            );
        }
        stats
    }

    /// Cancels every queued load. Returns how many were cancelled.
    pub fn clear_jobs(&self) -> usize {
        let mut table = self.cache.table();
        self.cancel_jobs(&mut table, true)
    }

    /// Drops every tile, used after a source swap.
    ///
    /// Unlocked tiles are removed now. Locked ones are detached and removed
    /// by a later update once released. Returns the number of tiles removed.
    pub fn clear_all(&mut self) -> usize {
        let mut table = self.cache.table();
        let cancelled = self.cancel_jobs(&mut table, true);

        let mut removed = 0;
        for key in table.keys() {
            if table.is_locked(key) {
                table.defer_clear(key);
            } else if table.remove(key).is_ok() {
                removed += 1;
            }
        }
        self.visible.clear();
        table.publish_visible(&[]);
        let deferred = table.len();
        drop(table);

        tracing::debug!(removed, deferred, cancelled, "tile cache cleared");
        removed
    }

    /// Pulls queued tickets and cancels those no longer wanted.
    ///
    /// With `all` set every ticket is cancelled; otherwise tickets for tiles
    /// still visible are queued again.
    fn cancel_jobs(&self, table: &mut TileTable, all: bool) -> usize {
        let mut cancelled = 0;
        for ticket in self.jobs.drain() {
            if !table.is_current(&ticket) {
                continue;
            }
            let wanted = !all && table.get(ticket.key).map_or(false, |e| e.is_visible());
            if wanted {
                self.jobs.push(ticket);
                continue;
            }
            // Loading -> None, or retry once the render thread lets go
            if table.clear(ticket.key).is_err() {
                table.defer_clear(ticket.key);
            }
            cancelled += 1;
        }
        cancelled
    }

    /// Removes entries beyond the cache limit.
    ///
    /// Visible and locked entries are never evicted. Empty and failed tiles
    /// go first, then the farthest.
    fn evict(&self, table: &mut TileTable) -> usize {
        let limit = self.settings.cache_limit;
        if table.len() <= limit {
            return 0;
        }

        let mut candidates: Vec<(bool, f64, TileKey)> = table
            .iter()
            .filter(|(_, entry)| !entry.is_visible() && !entry.is_locked())
            .map(|(key, entry)| {
                let loaded = !matches!(entry.state(), TileState::None | TileState::Error);
                (loaded, entry.distance(), key)
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)));

        let excess = table.len() - limit;
        let mut evicted = 0;
        for (_, _, key) in candidates.into_iter().take(excess) {
            if let Ok(id) = table.remove(key) {
                tracing::trace!(tile = %id, "tile evicted");
                evicted += 1;
            }
        }
        if evicted < excess {
            tracing::warn!(
                entries = table.len(),
                limit,
                "tile cache over limit, remaining tiles are visible or locked"
            );
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LoadOutcome;
    use crate::error::SourceError;

    fn manager(limit: usize) -> TileManager {
        TileManager::new(
            TileCache::new(),
            JobQueue::new(),
            ManagerSettings {
                tile_size: 256,
                view_width: 512,
                view_height: 512,
                cache_limit: limit,
                min_zoom: 0,
                max_zoom: 18,
            },
        )
    }

    #[test]
    fn test_view_covers_expected_tiles() {
        let manager = manager(64);
        // Scale 4 at zoom 2: one tile is 256 px, a 512 px view spans 2x2 tiles
        // plus the partially visible border
        let tiles = manager.tiles_for_view(&MapPosition::new(0.5, 0.5, 4.0));
        assert!(tiles.iter().all(|t| t.zoom == 2));
        assert!(tiles.contains(&TileId::new(1, 1, 2)));
        assert!(tiles.contains(&TileId::new(2, 2, 2)));
        assert!(tiles.len() <= 9);
        // Nearest first
        assert!(tiles[0].distance_to(&MapPosition::new(0.5, 0.5, 4.0)) < 1.0);
    }

    #[test]
    fn test_view_clamped_to_world() {
        let manager = manager(64);
        let tiles = manager.tiles_for_view(&MapPosition::new(0.0, 0.0, 1.0));
        assert_eq!(tiles, vec![TileId::new(0, 0, 0)]);
    }

    #[test]
    fn test_update_dispatches_visible_tiles() {
        let mut manager = manager(64);
        let position = MapPosition::new(0.5, 0.5, 4.0);
        let stats = manager.update(&position);

        assert!(stats.visible > 0);
        assert_eq!(stats.dispatched, stats.visible);
        assert_eq!(manager.jobs.len(), stats.visible);

        let table = manager.cache().table();
        assert_eq!(table.visible().len(), stats.visible);
        for &key in table.visible() {
            let entry = table.get(key).unwrap();
            assert_eq!(entry.state(), TileState::Loading);
            assert!(entry.is_visible());
        }
        drop(table);

        // Nothing new to dispatch on the same view
        let again = manager.update(&position);
        assert_eq!(again.dispatched, 0);
        assert_eq!(again.cancelled, 0);
        assert_eq!(manager.jobs.len(), stats.visible);
    }

    #[test]
    fn test_leaving_view_cancels_queued_loads() {
        let mut manager = manager(64);
        let first = manager.update(&MapPosition::new(0.1, 0.1, 64.0));
        let second = manager.update(&MapPosition::new(0.9, 0.9, 64.0));

        assert_eq!(second.cancelled, first.visible);
        assert_eq!(manager.jobs.len(), second.visible);

        let table = manager.cache().table();
        let loading = table
            .iter()
            .filter(|(_, e)| e.state() == TileState::Loading)
            .count();
        assert_eq!(loading, second.visible);
    }

    #[test]
    fn test_eviction_keeps_visible_tiles() {
        let mut manager = manager(4);
        manager.update(&MapPosition::new(0.1, 0.1, 64.0));
        let stats = manager.update(&MapPosition::new(0.9, 0.9, 64.0));

        let table = manager.cache().table();
        assert!(stats.evicted > 0);
        // The visible set can exceed the limit, everything else is gone
        assert_eq!(table.len(), stats.visible.max(4));
        for &key in table.visible() {
            assert!(table.get(key).is_some());
        }
    }

    #[test]
    fn test_eviction_skips_locked_tiles() {
        let mut manager = manager(0);
        manager.update(&MapPosition::new(0.1, 0.1, 64.0));
        let held = manager.cache().table().visible()[0];
        manager.cache().table().lock(held).unwrap();

        manager.update(&MapPosition::new(0.9, 0.9, 64.0));
        assert!(manager.cache().table().get(held).is_some());

        manager.cache().table().unlock(held).unwrap();
        manager.update(&MapPosition::new(0.9, 0.9, 64.0));
        assert!(manager.cache().table().get(held).is_none());
    }

    #[test]
    fn test_clear_all_defers_locked_tiles() {
        let mut manager = manager(64);
        let position = MapPosition::new(0.5, 0.5, 4.0);
        let stats = manager.update(&position);
        let held = manager.cache().table().visible()[0];
        let held_id = manager.cache().table().get(held).unwrap().id();
        manager.cache().table().lock(held).unwrap();

        let removed = manager.clear_all();
        assert_eq!(removed, stats.visible - 1);
        assert!(manager.jobs.is_empty());
        {
            let table = manager.cache().table();
            assert_eq!(table.len(), 1);
            assert!(table.get(held).unwrap().is_pending_clear());
            assert_eq!(table.find(held_id), None);
            assert!(table.visible().is_empty());
        }

        // Still held: the tile id gets a fresh entry, the old one waits
        let update = manager.update(&position);
        assert_eq!(update.cleared, 0);
        assert_eq!(update.dispatched, stats.visible);
        {
            let table = manager.cache().table();
            let fresh = table.find(held_id).unwrap();
            assert_ne!(fresh, held);
            assert!(!table.visible().contains(&held));
            assert_eq!(table.get(fresh).unwrap().state(), TileState::Loading);
        }

        manager.cache().table().unlock(held).unwrap();
        let update = manager.update(&position);
        assert_eq!(update.cleared, 1);
        assert!(manager.cache().table().get(held).is_none());
        assert!(manager.cache().table().find(held_id).is_some());
    }

    #[test]
    fn test_logic_tick_before_release_rebuilds_tiles() {
        let mut manager = manager(64);
        let position = MapPosition::new(0.5, 0.5, 4.0);
        let stats = manager.update(&position);
        let held: Vec<TileKey> = manager.cache().table().visible().to_vec();
        for &key in &held {
            manager.cache().table().lock(key).unwrap();
        }

        assert_eq!(manager.clear_all(), 0);
        // Several ticks while the render thread still holds the old tiles
        for _ in 0..3 {
            manager.update(&position);
        }
        {
            let table = manager.cache().table();
            assert!(table.visible().iter().all(|key| !held.contains(key)));
            assert_eq!(table.len(), stats.visible * 2);
        }

        for &key in &held {
            manager.cache().table().unlock(key).unwrap();
        }
        assert_eq!(manager.update(&position).cleared, stats.visible);
        assert_eq!(manager.cache().table().len(), stats.visible);
    }

    #[test]
    fn test_failed_tiles_reload_only_on_reentry() {
        let mut manager = manager(64);
        let position = MapPosition::new(0.5, 0.5, 4.0);
        let stats = manager.update(&position);

        let tickets = manager.jobs.drain();
        assert_eq!(tickets.len(), stats.visible);
        for ticket in &tickets {
            let outcome = manager
                .cache()
                .complete_load(ticket, Err(SourceError::NotFound(ticket.id)));
            assert_eq!(outcome, LoadOutcome::Failed);
        }

        // Staying in view never retries
        for _ in 0..3 {
            assert_eq!(manager.update(&position).dispatched, 0);
        }
        assert!(manager.jobs.is_empty());

        // Leaving the view and coming back does
        let away = MapPosition::new(0.1, 0.1, 64.0);
        manager.update(&away);
        let back = manager.update(&position);
        assert_eq!(back.dispatched, stats.visible);
    }
}
