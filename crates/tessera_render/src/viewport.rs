//! # Viewport
//!
//! View state shared between the logic thread (which moves the map) and the
//! render thread (which draws it): position, screen size, matrices, and the
//! animator that moves the position over time.
//!
//! Coordinates handed to the GPU are relative to the map center, computed in
//! `f64` first, so deep zoom levels keep full `f32` precision.

use std::time::{Duration, Instant};

use tessera_core::MapPosition;
use tessera_tiles::{TileId, TILE_EXTENT};

/// Row-major 4×4 matrix.
pub type Mat4 = [[f32; 4]; 4];

/// Small matrix helpers for 2D map transforms.
pub mod mat4 {
    use super::Mat4;

    /// Identity.
    #[must_use]
    pub const fn identity() -> Mat4 {
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// `a × b`.
    #[must_use]
    pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
        let mut out = [[0.0; 4]; 4];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, cell) in out_row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| a[row][k] * b[k][col]).sum();
            }
        }
        out
    }

    /// Translation in the map plane.
    #[must_use]
    pub fn translation(x: f32, y: f32) -> Mat4 {
        let mut m = identity();
        m[0][3] = x;
        m[1][3] = y;
        m
    }

    /// Scale in the map plane.
    #[must_use]
    pub fn scaling(x: f32, y: f32) -> Mat4 {
        let mut m = identity();
        m[0][0] = x;
        m[1][1] = y;
        m
    }

    /// Rotation about the view axis.
    #[must_use]
    pub fn rotation_z(radians: f32) -> Mat4 {
        let (sin, cos) = radians.sin_cos();
        let mut m = identity();
        m[0][0] = cos;
        m[0][1] = -sin;
        m[1][0] = sin;
        m[1][1] = cos;
        m
    }

    /// Applies `m` to the point `(x, y, 0, 1)`.
    #[must_use]
    pub fn transform_point(m: &Mat4, x: f32, y: f32) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (row, cell) in out.iter_mut().enumerate() {
            *cell = m[row][0] * x + m[row][1] * y + m[row][3];
        }
        out
    }
}

/// Matrices for one view state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrices {
    /// Map rotation and tilt.
    pub view: Mat4,
    /// Pixels to clip space.
    pub proj: Mat4,
    /// `proj × view`.
    pub view_proj: Mat4,
    /// World size in pixels at the view scale.
    pub world_size: f64,
}

impl Matrices {
    /// Builds the matrices for a `width × height` view.
    #[must_use]
    pub fn new(width: u32, height: u32, tile_size: u32, position: &MapPosition) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let tilt = position.tilt.to_radians().cos();
        let view = mat4::multiply(
            &mat4::scaling(1.0, tilt),
            &mat4::rotation_z(-position.bearing.to_radians()),
        );
        // y grows downwards on the map, upwards in clip space
        let proj = mat4::scaling(2.0 / w, -2.0 / h);
        Self {
            view,
            proj,
            view_proj: mat4::multiply(&proj, &view),
            world_size: f64::from(tile_size) * position.scale,
        }
    }

    /// Model-view-projection of `tile` for vertices in tile-local coordinates.
    #[must_use]
    pub fn tile_mvp(&self, tile: &TileId, position: &MapPosition) -> Mat4 {
        let span = self.world_size / TileId::tiles_per_side(tile.zoom);
        let origin_x = f64::from(tile.x) * span - position.x * self.world_size;
        let origin_y = f64::from(tile.y) * span - position.y * self.world_size;
        let unit = span / f64::from(TILE_EXTENT);

        #[allow(clippy::cast_possible_truncation)]
        let model = mat4::multiply(
            &mat4::translation(origin_x as f32, origin_y as f32),
            &mat4::scaling(unit as f32, unit as f32),
        );
        mat4::multiply(&self.view_proj, &model)
    }
}

/// Screen and position state of the map view.
pub struct Viewport {
    width: u32,
    height: u32,
    tile_size: u32,
    position: MapPosition,
    min_scale: f64,
    max_scale: f64,
    matrices: Matrices,
}

impl Viewport {
    /// Creates a viewport centered on the world at scale 1.
    #[must_use]
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let position = MapPosition::default();
        Self {
            width,
            height,
            tile_size,
            position,
            min_scale: 1.0,
            max_scale: f64::MAX,
            matrices: Matrices::new(width, height, tile_size, &position),
        }
    }

    /// Screen size.
    #[must_use]
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resizes the view.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.update_matrices();
    }

    /// Limits the scale to the configured zoom range.
    pub fn set_zoom_limits(&mut self, min_zoom: u8, max_zoom: u8) {
        self.min_scale = TileId::tiles_per_side(min_zoom);
        // Fractional zoom up to the next level
        self.max_scale = TileId::tiles_per_side(max_zoom.saturating_add(1)).max(self.min_scale);
        let position = self.position;
        self.set_map_position(position);
    }

    /// Moves the view; the scale is clamped to the zoom limits.
    pub fn set_map_position(&mut self, position: MapPosition) {
        let mut position = position;
        position.set_scale(position.scale.clamp(self.min_scale, self.max_scale));
        self.position = position;
        self.update_matrices();
    }

    /// Current position.
    #[must_use]
    pub fn map_position(&self) -> MapPosition {
        self.position
    }

    /// Copies the position into `out`; returns whether it differed.
    ///
    /// Each consumer keeps its own copy, so change detection is per consumer.
    pub fn get_map_position(&self, out: &mut MapPosition) -> bool {
        let changed = *out != self.position;
        *out = self.position;
        changed
    }

    /// Matrices of the current state.
    #[must_use]
    pub const fn matrices(&self) -> &Matrices {
        &self.matrices
    }

    fn update_matrices(&mut self) {
        self.matrices = Matrices::new(self.width, self.height, self.tile_size, &self.position);
    }
}

/// Moves the map position towards a target over time.
#[derive(Default)]
pub struct MapAnimator {
    start: MapPosition,
    target: MapPosition,
    started: Option<Instant>,
    duration: Duration,
}

impl MapAnimator {
    /// Creates an idle animator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an animation from `from` to `to`.
    pub fn animate_to(&mut self, from: MapPosition, to: MapPosition, duration: Duration) {
        self.start = from;
        self.target = to;
        self.duration = duration;
        self.started = Some(Instant::now());
    }

    /// An animation is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.started.is_some()
    }

    /// Stops the animation where it is.
    pub fn cancel(&mut self) {
        self.started = None;
    }

    /// Position at `now`, `None` when idle. The last step lands exactly on
    /// the target and ends the animation.
    pub fn update(&mut self, now: Instant) -> Option<MapPosition> {
        let started = self.started?;
        let elapsed = now.saturating_duration_since(started);
        if elapsed >= self.duration {
            self.started = None;
            return Some(self.target);
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        // Smoothstep easing
        let eased = t * t * (3.0 - 2.0 * t);
        Some(self.start.lerp(&self.target, eased))
    }
}
