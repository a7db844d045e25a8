//! Frame type and YUYV to RGB conversion.

use image::{DynamicImage, GrayImage, RgbImage};

/// Pixel layout of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// 3 bytes per pixel.
    Rgb,
    /// 1 byte per pixel.
    Gray,
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub sequence: u32,
}

impl Frame {
    /// Wrap the frame as an `image` buffer. `None` if the data length is inconsistent.
    pub fn into_image(self) -> Option<DynamicImage> {
        match self.format {
            FrameFormat::Rgb => {
                RgbImage::from_raw(self.width, self.height, self.data).map(DynamicImage::ImageRgb8)
            }
            FrameFormat::Gray => {
                GrayImage::from_raw(self.width, self.height, self.data).map(DynamicImage::ImageLuma8)
            }
        }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = check_yuyv_len(yuyv, width, height)?;
    let mut rgb = Vec::with_capacity(expected / 2 * 3);

    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

fn check_yuyv_len(yuyv: &[u8], width: u32, height: u32) -> Result<usize, FrameError> {
    let expected = (width as usize) * (height as usize) * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(expected)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
