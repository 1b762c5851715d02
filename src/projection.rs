//! Real-world to projective coordinate conversion.

/// Maps a point in sensor space (millimetres, y pointing up) to image
/// coordinates (pixels, y pointing down).
pub trait Projection {
    fn to_projective(&self, x: f32, y: f32, z: f32) -> (f32, f32);
}

/// A pinhole camera model.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PinholeProjection {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for PinholeProjection {
    /// Intrinsics of the depth camera at 640x480.
    fn default() -> Self {
        Self {
            fx: 594.21,
            fy: 591.04,
            cx: 339.5,
            cy: 242.7,
        }
    }
}

impl Projection for PinholeProjection {
    fn to_projective(&self, x: f32, y: f32, z: f32) -> (f32, f32) {
        // points without depth land on the principal point
        if z == 0.0 {
            return (self.cx, self.cy);
        }
        (self.fx * x / z + self.cx, self.cy - self.fy * y / z)
    }
}

#[cfg(test)]
mod tests {
    use super::{PinholeProjection, Projection};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn y_axis_is_flipped() {
        let projection = PinholeProjection::default();
        let (u, v) = projection.to_projective(1000.0, 1000.0, 2000.0);
        assert_approx_eq!(u, 594.21 / 2.0 + 339.5, 1e-3);
        assert_approx_eq!(v, 242.7 - 591.04 / 2.0, 1e-3);
    }
}
