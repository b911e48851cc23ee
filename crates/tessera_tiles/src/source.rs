//! # Data Sources and Themes
//!
//! Contracts for the collaborators loaders work with, plus a synthetic
//! source used by the demo and the tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;
use crate::payload::{PayloadBuilder, TILE_EXTENT as EXTENT};
use crate::tile::TileId;

/// Style of one map feature class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerStyle {
    /// RGBA fill colour.
    pub color: [f32; 4],
    /// Line width in pixels.
    pub width: f32,
}

/// Styling used while building payloads. Swappable at runtime.
pub trait RenderTheme: Send + Sync {
    /// Clear colour behind all tiles.
    fn map_background(&self) -> [f32; 4];

    /// Style for a feature class at `zoom`, `None` hides the class.
    fn style_for(&self, class: &str, zoom: u8) -> Option<LayerStyle>;
}

/// A tile provider (file, network, synthetic).
pub trait TileSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Prepares the source for loading.
    ///
    /// # Errors
    ///
    /// Fails when the underlying data cannot be opened.
    fn open(&self) -> Result<(), SourceError>;

    /// Releases the source.
    fn close(&self);

    /// A per-worker loading handle.
    fn data_source(&self) -> Box<dyn TileDataSource>;
}

/// Per-worker loader for one tile source.
pub trait TileDataSource: Send {
    /// Loads `tile` into `builder`. Blocking; timeouts are the source's job.
    ///
    /// # Errors
    ///
    /// Any error puts the tile into the error state.
    fn load(
        &mut self,
        tile: TileId,
        theme: &dyn RenderTheme,
        builder: &mut PayloadBuilder,
    ) -> Result<(), SourceError>;
}

/// Light default theme.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTheme;

impl RenderTheme for DefaultTheme {
    fn map_background(&self) -> [f32; 4] {
        [0.95, 0.94, 0.91, 1.0]
    }

    fn style_for(&self, class: &str, zoom: u8) -> Option<LayerStyle> {
        match class {
            "water" => Some(LayerStyle {
                color: [0.67, 0.83, 0.87, 1.0],
                width: 0.0,
            }),
            "road" if zoom >= 8 => Some(LayerStyle {
                color: [1.0, 1.0, 1.0, 1.0],
                width: if zoom >= 14 { 4.0 } else { 1.5 },
            }),
            "building" if zoom >= 15 => Some(LayerStyle {
                color: [0.85, 0.82, 0.78, 1.0],
                width: 0.0,
            }),
            _ => None,
        }
    }
}

/// Generates a quad, a label and a symbol for every tile.
///
/// Failures and latency are configurable so the tile life cycle can be
/// exercised without real data.
#[derive(Clone, Debug, Default)]
pub struct SyntheticSource {
    delay: Duration,
    fail_every: Option<u64>,
    loads: Arc<AtomicU64>,
}

impl SyntheticSource {
    /// An instant, always successful source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` in every load.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails every `n`-th load (counted across workers).
    #[must_use]
    pub fn with_failures(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Loads attempted so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl TileSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self) -> Result<(), SourceError> {
        tracing::debug!(delay = ?self.delay, fail_every = ?self.fail_every, "synthetic source opened");
        Ok(())
    }

    fn close(&self) {
        tracing::debug!(loads = self.load_count(), "synthetic source closed");
    }

    fn data_source(&self) -> Box<dyn TileDataSource> {
        Box::new(self.clone())
    }
}

impl TileDataSource for SyntheticSource {
    fn load(
        &mut self,
        tile: TileId,
        theme: &dyn RenderTheme,
        builder: &mut PayloadBuilder,
    ) -> Result<(), SourceError> {
        let attempt = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_every.is_some_and(|n| attempt % n == 0) {
            return Err(SourceError::Decode {
                tile,
                reason: format!("synthetic failure on load {attempt}"),
            });
        }

        builder.add_mesh(&[0, 0, EXTENT, 0, 0, EXTENT, EXTENT, EXTENT], &[0, 1, 2, 2, 1, 3]);
        if theme.style_for("road", tile.zoom).is_some() {
            builder.add_mesh(&[0, 2000, EXTENT, 2000, 0, 2096, EXTENT, 2096], &[0, 1, 2, 2, 1, 3]);
        }
        builder.add_label(&tile.to_string(), 2048.0, 2048.0, i32::from(tile.zoom));
        builder.add_symbol(tile.x ^ tile.y, 1024.0, 1024.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadPools;

    #[test]
    fn test_synthetic_load_fills_builder() {
        let pools = PayloadPools::default();
        let mut source = SyntheticSource::new().data_source();
        let mut builder = PayloadBuilder::new(pools);

        source
            .load(TileId::new(1, 2, 10), &DefaultTheme, &mut builder)
            .unwrap();
        let payload = builder.finish();
        assert_eq!(payload.label_count(), 1);
        assert_eq!(payload.symbol_count(), 1);
        // Background quad plus a road at zoom 10
        assert_eq!(payload.geometry.indices.len(), 12);
    }

    #[test]
    fn test_failures_are_periodic() {
        let source = SyntheticSource::new().with_failures(2);
        let mut data = source.data_source();
        let pools = PayloadPools::default();
        let tile = TileId::new(0, 0, 0);

        let mut results = Vec::new();
        for _ in 0..4 {
            let mut builder = PayloadBuilder::new(pools.clone());
            results.push(data.load(tile, &DefaultTheme, &mut builder).is_ok());
        }
        assert_eq!(results, vec![true, false, true, false]);
        assert_eq!(source.load_count(), 4);
    }

    #[test]
    fn test_default_theme_hides_small_scale_roads() {
        assert!(DefaultTheme.style_for("road", 5).is_none());
        assert!(DefaultTheme.style_for("road", 12).is_some());
        assert!(DefaultTheme.style_for("unknown", 12).is_none());
    }
}
