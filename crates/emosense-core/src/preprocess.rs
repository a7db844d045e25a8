//! Face crop → normalized 48×48 tensor.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::{Array4, ArrayView4};

/// Side length of the square classifier input.
pub const FACE_SIZE: usize = 48;

/// Normalized face of shape (1, 48, 48, 1) with values in [0.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTensor(Array4<f32>);

impl FaceTensor {
    /// Build from a 48×48 grayscale image, dividing every sample by 255.
    ///
    /// Returns `None` if the image is not exactly 48×48.
    pub fn from_gray48(gray: &GrayImage) -> Option<Self> {
        if gray.dimensions() != (FACE_SIZE as u32, FACE_SIZE as u32) {
            return None;
        }
        let values = normalize(gray.as_raw());
        Array4::from_shape_vec((1, FACE_SIZE, FACE_SIZE, 1), values)
            .ok()
            .map(Self)
    }

    /// NHWC view: (1, 48, 48, 1).
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Row-major samples. Identical for NHWC and NCHW since there is one channel.
    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice().unwrap_or(&[])
    }
}

/// Map u8 samples to [0.0, 1.0].
pub fn normalize(samples: &[u8]) -> Vec<f32> {
    samples.iter().map(|&p| p as f32 / 255.0).collect()
}

/// Resize any grayscale image to 48×48 with linear interpolation.
pub fn resize_to_face(gray: &GrayImage) -> GrayImage {
    imageops::resize(gray, FACE_SIZE as u32, FACE_SIZE as u32, FilterType::Triangle)
}

/// Crop `bbox` out of `gray`, resize to 48×48 and normalize.
///
/// `bbox` must lie inside the image (guaranteed by [`BoundingBox::clamped`]).
pub fn extract(gray: &GrayImage, bbox: &BoundingBox) -> FaceTensor {
    let crop = imageops::crop_imm(gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    let face = resize_to_face(&crop);
    let values = normalize(face.as_raw());
    // resize_to_face always yields FACE_SIZE² samples.
    let tensor = Array4::from_shape_vec((1, FACE_SIZE, FACE_SIZE, 1), values)
        .unwrap_or_else(|_| Array4::zeros((1, FACE_SIZE, FACE_SIZE, 1)));
    FaceTensor(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_extract_shape_and_range() {
        let gray = gradient(120, 90);
        let boxes = [
            BoundingBox { x: 0, y: 0, width: 120, height: 90 },
            BoundingBox { x: 10, y: 5, width: 7, height: 3 },
            BoundingBox { x: 119, y: 89, width: 1, height: 1 },
        ];
        for bbox in boxes {
            let t = extract(&gray, &bbox);
            assert_eq!(t.shape(), &[1, FACE_SIZE, FACE_SIZE, 1]);
            assert!(t.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_extract_uniform_crop() {
        let mut gray = GrayImage::new(100, 100);
        for y in 30..70 {
            for x in 30..70 {
                gray.put_pixel(x, y, Luma([255]));
            }
        }
        let t = extract(&gray, &BoundingBox { x: 30, y: 30, width: 40, height: 40 });
        assert!(t.as_slice().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_from_gray48() {
        let gray = GrayImage::from_pixel(48, 48, Luma([51]));
        let t = FaceTensor::from_gray48(&gray).unwrap();
        assert_eq!(t.view()[[0, 10, 20, 0]], 0.2);
        assert!(FaceTensor::from_gray48(&GrayImage::new(47, 48)).is_none());
    }

    #[test]
    fn test_normalize_bounds() {
        assert_eq!(normalize(&[0, 255]), vec![0.0, 1.0]);
    }
}
