//! # Map Position
//!
//! The view position shared by the logic thread (tile selection) and the
//! render thread (matrices). Coordinates are normalized world coordinates:
//! `x` and `y` run from 0.0 to 1.0 across the whole mercator square.

use std::f64::consts::PI;

use crate::error::{CoreError, CoreResult};

/// Latitude limit of the square mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Position, scale and orientation of the map view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapPosition {
    /// Normalized world x (0.0 = 180°W, 1.0 = 180°E).
    pub x: f64,
    /// Normalized world y (0.0 = north edge, 1.0 = south edge).
    pub y: f64,
    /// World scale, `2^zoom_level` at integer zooms.
    pub scale: f64,
    /// Rotation in degrees.
    pub bearing: f32,
    /// Tilt in degrees.
    pub tilt: f32,
    /// Integer zoom level derived from `scale`.
    pub zoom_level: u8,
}

impl MapPosition {
    /// Creates a position at normalized coordinates.
    #[must_use]
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        let mut position = Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            scale: 1.0,
            bearing: 0.0,
            tilt: 0.0,
            zoom_level: 0,
        };
        position.set_scale(scale);
        position
    }

    /// Creates a position from geographic coordinates.
    ///
    /// # Errors
    ///
    /// Fails when the latitude cannot be projected or the scale is invalid.
    pub fn from_lat_lon(latitude: f64, longitude: f64, scale: f64) -> CoreResult<Self> {
        if !latitude.is_finite() || latitude.abs() > MAX_LATITUDE {
            return Err(CoreError::LatitudeOutOfRange(latitude));
        }
        if !scale.is_finite() || scale < 1.0 {
            return Err(CoreError::InvalidScale(scale));
        }
        Ok(Self::new(
            longitude_to_x(longitude),
            latitude_to_y(latitude),
            scale,
        ))
    }

    /// Sets the scale and the derived integer zoom level.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = if scale.is_finite() { scale.max(1.0) } else { 1.0 };
        // floor(log2(scale)) fits in u8 for any representable map scale;
        // the epsilon keeps 2^n computed through exp/ln on zoom level n
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let zoom = (self.scale.log2() + 1e-9).floor().min(f64::from(u8::MAX)) as u8;
        self.zoom_level = zoom;
    }

    /// Latitude of the position in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        y_to_latitude(self.y)
    }

    /// Longitude of the position in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.x * 360.0 - 180.0
    }

    /// Linear interpolation towards `target`, `t` in `[0, 1]`.
    #[must_use]
    pub fn lerp(&self, target: &Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        // Interpolate scale in log space so zooming feels uniform
        let scale = (self.scale.ln() + (target.scale.ln() - self.scale.ln()) * t).exp();
        #[allow(clippy::cast_possible_truncation)]
        let tf = t as f32;
        let mut position = Self::new(
            self.x + (target.x - self.x) * t,
            self.y + (target.y - self.y) * t,
            scale,
        );
        position.bearing = self.bearing + (target.bearing - self.bearing) * tf;
        position.tilt = self.tilt + (target.tilt - self.tilt) * tf;
        position
    }
}

impl Default for MapPosition {
    fn default() -> Self {
        Self::new(0.5, 0.5, 1.0)
    }
}

/// Normalized x for a longitude.
#[must_use]
pub fn longitude_to_x(longitude: f64) -> f64 {
    (longitude + 180.0) / 360.0
}

/// Normalized y for a latitude (square mercator).
#[must_use]
pub fn latitude_to_y(latitude: f64) -> f64 {
    let sin = (latitude * PI / 180.0).sin();
    0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI)
}

/// Latitude for a normalized y.
#[must_use]
pub fn y_to_latitude(y: f64) -> f64 {
    90.0 - 360.0 * (-(0.5 - y) * 2.0 * PI).exp().atan() / PI
}
