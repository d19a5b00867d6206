use crate::config::DetectorConfig;
use serde::{Deserialize, Serialize};

/// Identifier of a single readout pixel.
///
/// The id encodes the (x index, y index, plane) triplet as
/// `x + n_x * (y + n_y * plane)`, where `(n_x, n_y)` is the per-plane pixel
/// count from [`DetectorConfig::n_pixels`].
///
/// # Examples
///
/// ```
/// use pixsim::geometry::PixelId;
///
/// let pixel = PixelId::from_indices(3, 7, 1, (16, 16));
/// assert_eq!(pixel.indices((16, 16)), (3, 7, 1));
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PixelId(pub u64);

impl PixelId {
    /// Builds a pixel id from its (x, y, plane) indices.
    pub fn from_indices(x: u64, y: u64, plane: u64, n_pixels: (u64, u64)) -> Self {
        Self(x + n_pixels.0 * (y + n_pixels.1 * plane))
    }
    /// Decomposes the id into its (x, y, plane) indices.
    pub fn indices(self, n_pixels: (u64, u64)) -> (u64, u64, u64) {
        let x = self.0 % n_pixels.0;
        let y = (self.0 / n_pixels.0) % n_pixels.1;
        let plane = self.0 / (n_pixels.0 * n_pixels.1);
        (x, y, plane)
    }
}

/// Returns the (x, y) coordinates of the center of a pixel pad, or [`None`]
/// if the pixel sits on an unknown plane.
pub fn pixel_center(pixel: PixelId, detector: &DetectorConfig) -> Option<(f64, f64)> {
    let (i_x, i_y, plane) = pixel.indices(detector.n_pixels);
    let borders = detector.tpc_borders.get(plane as usize)?;

    let pitch = detector.pixel_pitch.get();
    let x = i_x as f64 * pitch + borders[0][0] + pitch / 2.0;
    let y = i_y as f64 * pitch + borders[1][0] + pitch / 2.0;

    Some((x, y))
}
