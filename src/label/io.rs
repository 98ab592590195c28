//! Loading label images from files.
//!
//! # Example
//!
//! ```ignore
//! use segmetrics::label::io::load;
//!
//! let expected = load("gt/man_seg000.tif")?;
//! study.set_expected(&expected, true)?;
//! ```

use std::path::Path;

use image::DynamicImage;

use crate::error::{Error, Result};
use crate::label::Image;

/// Load a single-channel image file as raw label data.
///
/// Only 8-bit and 16-bit grayscale images are accepted. Colour and palette
/// images are rejected, since converting them would merge distinct labels.
pub fn load(path: impl AsRef<Path>) -> Result<Image> {
    let path = path.as_ref();
    let decoded = image::open(path).map_err(|e| Error::ImageLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    from_dynamic(&decoded)
}

/// Convert a decoded grayscale image into raw label data.
pub fn from_dynamic(decoded: &DynamicImage) -> Result<Image> {
    let data: Vec<i64> = match decoded {
        DynamicImage::ImageLuma8(gray) => gray.as_raw().iter().map(|&v| i64::from(v)).collect(),
        DynamicImage::ImageLuma16(gray) => gray.as_raw().iter().map(|&v| i64::from(v)).collect(),
        other => {
            return Err(Error::InvalidImage {
                reason: format!(
                    "label images must be single-channel grayscale, got {:?}",
                    other.color()
                ),
            });
        }
    };
    Image::new([decoded.height() as usize, decoded.width() as usize], data)
}
