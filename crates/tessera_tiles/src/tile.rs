//! # Tile Identity and State
//!
//! A tile is addressed by `(x, y, zoom)` in the quad-tree: zoom `z` splits
//! the world into `2^z × 2^z` tiles, and each tile has four children at
//! `z + 1`.
//!
//! ## State machine
//!
//! ```text
//!            dispatch            publish             upload
//!   None ─────────────> Loading ────────> NewData ────────> Ready
//!    ^  ^                 │ │                │                │
//!    │  └──── dispatch ── Error <── failure ─┘ (Loading only) │
//!    │                    │                  │                │
//!    └────────────── clear (unlocked only) ──┴────────────────┘
//! ```

use std::fmt;

use tessera_core::MapPosition;

/// Deepest zoom level a tile id can have children at.
pub const MAX_ZOOM: u8 = 30;

/// Quad-tree address of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    /// Column at `zoom`.
    pub x: u32,
    /// Row at `zoom`.
    pub y: u32,
    /// Zoom level.
    pub zoom: u8,
}

impl TileId {
    /// Creates a tile id.
    #[inline]
    #[must_use]
    pub const fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Tiles per side of the world at `zoom`.
    #[inline]
    #[must_use]
    pub fn tiles_per_side(zoom: u8) -> f64 {
        2f64.powi(i32::from(zoom))
    }

    /// The tile one level up, `None` at zoom 0.
    #[must_use]
    pub const fn parent(&self) -> Option<Self> {
        if self.zoom == 0 {
            return None;
        }
        Some(Self::new(self.x >> 1, self.y >> 1, self.zoom - 1))
    }

    /// The tile two levels up.
    #[must_use]
    pub fn grandparent(&self) -> Option<Self> {
        self.parent().and_then(|parent| parent.parent())
    }

    /// Child `index` (0..4, row-major: 0 = top-left, 3 = bottom-right).
    #[must_use]
    pub const fn child(&self, index: usize) -> Option<Self> {
        if self.zoom >= MAX_ZOOM || index > 3 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let (dx, dy) = ((index & 1) as u32, (index >> 1) as u32);
        Some(Self::new(self.x * 2 + dx, self.y * 2 + dy, self.zoom + 1))
    }

    /// All four children, `None` past [`MAX_ZOOM`].
    #[must_use]
    pub fn children(&self) -> Option<[Self; 4]> {
        Some([self.child(0)?, self.child(1)?, self.child(2)?, self.child(3)?])
    }

    /// Proxy candidates in [`ProxySet::SLOTS`](crate::proxy::ProxySet::SLOTS)
    /// order: child0..3, parent, grandparent.
    #[must_use]
    pub fn relatives(&self) -> [Option<Self>; 6] {
        [
            self.child(0),
            self.child(1),
            self.child(2),
            self.child(3),
            self.parent(),
            self.grandparent(),
        ]
    }

    /// Normalized world coordinates of the tile center.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        let n = Self::tiles_per_side(self.zoom);
        ((f64::from(self.x) + 0.5) / n, (f64::from(self.y) + 0.5) / n)
    }

    /// Distance from the map center, in tiles of the position's zoom level.
    ///
    /// Tiles of other zoom levels are pushed away by one unit per level so
    /// eviction prefers them.
    #[must_use]
    pub fn distance_to(&self, position: &MapPosition) -> f64 {
        let (cx, cy) = self.center();
        let n = Self::tiles_per_side(position.zoom_level);
        let dx = (cx - position.x) * n;
        let dy = (cy - position.y) * n;
        let levels = f64::from(self.zoom.abs_diff(position.zoom_level));
        dx.hypot(dy) + levels
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Lifecycle state of a cached tile.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileState {
    /// Empty, no payload.
    #[default]
    None = 0,
    /// Dispatched to a loader.
    Loading = 1,
    /// Payload published, not yet on the GPU.
    NewData = 2,
    /// Uploaded and drawable.
    Ready = 3,
    /// The last load failed.
    Error = 4,
}

impl TileState {
    /// Loading, `NewData` or Ready.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::NewData | Self::Ready)
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::None | Self::Error, Self::Loading)
                | (Self::Loading, Self::NewData | Self::Error | Self::None)
                | (Self::NewData, Self::Ready | Self::None)
                | (Self::Ready | Self::Error, Self::None)
        )
    }
}
