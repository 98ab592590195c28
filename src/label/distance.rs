//! Spatial helpers: bounding windows, contours and distance maps.

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use serde::{Deserialize, Serialize};

use crate::label::BinaryImage;

/// Axis-aligned pixel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// First column.
    pub left: usize,
    /// First row.
    pub top: usize,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl Window {
    /// Joint bounding box of `masks`, grown by `margin` and clipped to the image.
    ///
    /// Returns `None` if all masks are empty. All masks must share the same
    /// dimensions.
    #[must_use]
    pub fn bounding(masks: &[&BinaryImage], margin: usize) -> Option<Self> {
        let first = masks.first()?;
        let (width, height) = (first.width(), first.height());
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for mask in masks {
            debug_assert_eq!((mask.width(), mask.height()), (width, height));
            for y in 0..height {
                for x in 0..width {
                    if !mask.get(x, y) {
                        continue;
                    }
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }
        let (x0, y0, x1, y1) = bounds?;
        let left = x0.saturating_sub(margin);
        let top = y0.saturating_sub(margin);
        let right = (x1 + margin).min(width - 1);
        let bottom = (y1 + margin).min(height - 1);
        Some(Self {
            left,
            top,
            width: right - left + 1,
            height: bottom - top + 1,
        })
    }
}

impl BinaryImage {
    /// Outer one-pixel boundary of the mask.
    ///
    /// A pixel belongs to the contour if it is background and at least one of
    /// its 4-connected neighbours is foreground.
    #[must_use]
    pub fn contour(&self) -> Self {
        let (width, height) = (self.width(), self.height());
        Self::from_fn(width, height, |x, y| {
            if self.get(x, y) {
                return false;
            }
            (x > 0 && self.get(x - 1, y))
                || (x + 1 < width && self.get(x + 1, y))
                || (y > 0 && self.get(x, y - 1))
                || (y + 1 < height && self.get(x, y + 1))
        })
    }

    /// Squared Euclidean distance of every pixel to the nearest foreground pixel.
    ///
    /// Row-major, one value per pixel; foreground pixels are 0.
    #[must_use]
    pub fn squared_distance_map(&self) -> Vec<f64> {
        let gray = GrayImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            Luma([if self.get(x as usize, y as usize) { 255 } else { 0 }])
        });
        euclidean_squared_distance_transform(&gray).into_raw()
    }

    /// Euclidean distance of every pixel to the nearest foreground pixel.
    #[must_use]
    pub fn distance_map(&self) -> Vec<f64> {
        self.squared_distance_map()
            .into_iter()
            .map(f64::sqrt)
            .collect()
    }
}
