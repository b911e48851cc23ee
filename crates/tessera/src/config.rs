//! # Map Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so a file
//! only lists what it changes:
//!
//! ```toml
//! loader_threads = 2
//! max_zoom = 18
//! frame_budget_ms = 33
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::SCRATCH_FLOOR_BYTES;
use tessera_tiles::{ManagerSettings, MAX_ZOOM};

use crate::error::{MapError, MapResult};

/// Map tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Loader worker threads.
    pub loader_threads: usize,
    /// Tiles kept before eviction.
    pub cache_limit: usize,
    /// Smallest scratch buffer allocation in bytes.
    pub scratch_floor_bytes: usize,
    /// Frame time above which a frame counts as over budget.
    pub frame_budget_ms: u64,
    /// Lowest zoom level.
    pub min_zoom: u8,
    /// Highest zoom level.
    pub max_zoom: u8,
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// GPU memory the headless context may use, in bytes.
    pub gpu_memory_budget: usize,
    /// Tile uploads per frame.
    pub max_uploads_per_frame: usize,
    /// Initial view width in pixels.
    pub view_width: u32,
    /// Initial view height in pixels.
    pub view_height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            loader_threads: 4,
            cache_limit: 256,
            scratch_floor_bytes: SCRATCH_FLOOR_BYTES,
            frame_budget_ms: 16,
            min_zoom: 0,
            max_zoom: 20,
            tile_size: 256,
            gpu_memory_budget: 256 << 20,
            max_uploads_per_frame: 16,
            view_width: 1280,
            view_height: 720,
        }
    }
}

impl MapConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`MapError::Toml`] for malformed input, [`MapError::Config`] for
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> MapResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`MapError::Io`] when the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> MapResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "map config loaded");
        Ok(config)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// [`MapError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> MapResult<String> {
        toml::to_string_pretty(self).map_err(|e| MapError::Config(e.to_string()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`MapError::Config`] naming the first offending field.
    pub fn validate(&self) -> MapResult<()> {
        let fail = |reason: String| Err(MapError::Config(reason));
        if self.loader_threads == 0 {
            return fail("loader_threads must be at least 1".to_owned());
        }
        if self.cache_limit == 0 {
            return fail("cache_limit must be at least 1".to_owned());
        }
        if self.scratch_floor_bytes == 0 {
            return fail("scratch_floor_bytes must be greater than zero".to_owned());
        }
        if self.frame_budget_ms == 0 {
            return fail("frame_budget_ms must be greater than zero".to_owned());
        }
        if self.max_zoom > MAX_ZOOM {
            return fail(format!("max_zoom {} exceeds {MAX_ZOOM}", self.max_zoom));
        }
        if self.min_zoom > self.max_zoom {
            return fail(format!(
                "min_zoom {} is above max_zoom {}",
                self.min_zoom, self.max_zoom
            ));
        }
        if !self.tile_size.is_power_of_two() {
            return fail(format!("tile_size {} is not a power of two", self.tile_size));
        }
        if self.max_uploads_per_frame == 0 {
            return fail("max_uploads_per_frame must be at least 1".to_owned());
        }
        if self.view_width == 0 || self.view_height == 0 {
            return fail("view size must be non-zero".to_owned());
        }
        Ok(())
    }

    /// Frame budget as a duration.
    #[must_use]
    pub const fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    /// Settings for the tile manager.
    #[must_use]
    pub const fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            tile_size: self.tile_size,
            view_width: self.view_width,
            view_height: self.view_height,
            cache_limit: self.cache_limit,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
        }
    }
}
