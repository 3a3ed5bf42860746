//! Frame and bounding-box primitives.
//!
//! - `Frame`: one captured RGB image. Owned by the frame loop for the duration of a
//!   single `process_frame` call; nothing in the pipeline retains it across frames.
//! - `BoundingBox`: axis-aligned pixel box, used for detections and identity boxes.
//!
//! Pixels are packed RGB24, row-major, no padding.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Axis-aligned box in pixel coordinates.
///
/// Coordinates are signed because detectors and trackers may report boxes that
/// extend past the frame edge. Use `clamp_to` before touching pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Integer center point, `(x + w/2, y + h/2)`.
    pub fn centroid(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Euclidean distance between the centroids of two boxes.
    pub fn centroid_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.centroid();
        let (bx, by) = other.centroid();
        let dx = (ax - bx) as f32;
        let dy = (ay - by) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = i64::from((x2 - x1).max(0)) * i64::from((y2 - y1).max(0));
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }

    /// Intersect with a `width x height` frame. Returns `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let fw = i32::try_from(width).ok()?;
        let fh = i32::try_from(height).ok()?;
        let x1 = self.x.clamp(0, fw);
        let y1 = self.y.clamp(0, fh);
        let x2 = (self.x.saturating_add(self.width)).clamp(0, fw);
        let y2 = (self.y.saturating_add(self.height)).clamp(0, fh);
        let clamped = BoundingBox::new(x1, y1, x2 - x1, y2 - y1);
        (!clamped.is_empty()).then_some(clamped)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured video frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    /// Wrap packed RGB24 pixels. Fails when the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy of the frame as an `RgbImage`.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length is validated in `new`, so the buffer always fits.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Luma of the pixel at `(x, y)` (BT.601 weights).
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        rgb_to_luma(self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Whole-frame grayscale copy.
    pub fn grayscale(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([self.luma_at(x, y)])
        })
    }

    /// Color crop of the box region, clamped to the frame. `None` if the box lies outside.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let clamped = bbox.clamp_to(self.width, self.height)?;
        let (x0, y0) = (clamped.x as u32, clamped.y as u32);
        let stride = self.width as usize * 3;
        Some(RgbImage::from_fn(
            clamped.width as u32,
            clamped.height as u32,
            |x, y| {
                let idx = (y0 + y) as usize * stride + (x0 + x) as usize * 3;
                image::Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
            },
        ))
    }
}

pub(crate) fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    let l = 0.299_f32 * r as f32 + 0.587_f32 * g as f32 + 0.114_f32 * b as f32;
    l.round().clamp(0.0, 255.0) as u8
}

/// Build a synthetic frame: flat background with filled squares.
///
/// Shared by the synthetic source and tests.
pub fn synthetic_frame(
    width: u32,
    height: u32,
    background: u8,
    squares: &[(BoundingBox, [u8; 3])],
    sequence: u64,
) -> Frame {
    let mut canvas = RgbImage::from_pixel(width, height, image::Rgb([background; 3]));
    for (bbox, color) in squares {
        if let Some(clamped) = bbox.clamp_to(width, height) {
            for y in clamped.y..clamped.y + clamped.height {
                for x in clamped.x..clamped.x + clamped.width {
                    canvas.put_pixel(x as u32, y as u32, image::Rgb(*color));
                }
            }
        }
    }
    Frame::from_rgb_image(canvas, sequence)
}
