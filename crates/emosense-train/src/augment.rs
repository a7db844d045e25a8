//! Random affine augmentation of grayscale training samples.
//!
//! Each sample gets a rotation, shift, shear and zoom drawn from the
//! configured ranges, composed about the image centre and applied by
//! inverse mapping with nearest-neighbour sampling. Coordinates that fall
//! outside the source repeat the nearest edge pixel.

use image::{imageops, GrayImage, Luma};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct AugmentConfig {
    /// Maximum rotation, degrees.
    pub rotation_deg: f32,
    /// Maximum horizontal shift, fraction of width.
    pub width_shift: f32,
    /// Maximum vertical shift, fraction of height.
    pub height_shift: f32,
    /// Maximum shear angle, degrees.
    pub shear_deg: f32,
    /// Maximum zoom deviation; each axis scales by 1 ± zoom.
    pub zoom: f32,
    pub horizontal_flip: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_deg: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            shear_deg: 0.2,
            zoom: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentConfig {
    /// No augmentation at all.
    pub fn none() -> Self {
        Self {
            rotation_deg: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            shear_deg: 0.0,
            zoom: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_deg == 0.0
            && self.width_shift == 0.0
            && self.height_shift == 0.0
            && self.shear_deg == 0.0
            && self.zoom == 0.0
            && !self.horizontal_flip
    }
}

/// Return a randomly transformed copy of `image`, same dimensions.
pub fn augment<R: Rng + ?Sized>(image: &GrayImage, config: &AugmentConfig, rng: &mut R) -> GrayImage {
    if config.is_identity() {
        return image.clone();
    }

    let (width, height) = image.dimensions();

    let theta = symmetric(rng, config.rotation_deg).to_radians();
    let shear = symmetric(rng, config.shear_deg).to_radians();
    let tx = symmetric(rng, config.width_shift) * width as f32;
    let ty = symmetric(rng, config.height_shift) * height as f32;
    let zx = 1.0 + symmetric(rng, config.zoom);
    let zy = 1.0 + symmetric(rng, config.zoom);

    // Output → source mapping: rotation · shear · zoom.
    let (sin, cos) = theta.sin_cos();
    let (s00, s01, s10, s11) = (1.0, -shear.sin(), 0.0, shear.cos());
    let r = [cos, -sin, sin, cos];
    let m00 = (r[0] * s00 + r[1] * s10) * zx;
    let m01 = (r[0] * s01 + r[1] * s11) * zy;
    let m10 = (r[2] * s00 + r[3] * s10) * zx;
    let m11 = (r[2] * s01 + r[3] * s11) * zy;

    let matrix = [m00, m01, tx, m10, m11, ty];
    let mut out = warp_nearest(image, &matrix);

    if config.horizontal_flip && rng.gen_bool(0.5) {
        imageops::flip_horizontal_in_place(&mut out);
    }
    out
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// Inverse-map every output pixel through `matrix` (row-major 2×3, centred
/// coordinates) and sample the source with edge clamping.
fn warp_nearest(src: &GrayImage, matrix: &[f32; 6]) -> GrayImage {
    let (width, height) = src.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    GrayImage::from_fn(width, height, |ox, oy| {
        let u = ox as f32 - cx;
        let v = oy as f32 - cy;
        let sx = matrix[0] * u + matrix[1] * v + matrix[2] + cx;
        let sy = matrix[3] * u + matrix[4] * v + matrix[5] + cy;

        let x = (sx.round() as i64).clamp(0, max_x) as u32;
        let y = (sy.round() as i64).clamp(0, max_y) as u32;
        Luma([src.get_pixel(x, y).0[0]])
    })
}
