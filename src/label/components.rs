//! Conversion of raw input into canonical label images.

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use imgref::ImgVec;

use crate::error::{Error, Result};
use crate::label::{Image, LabelImage};

/// Validate `image` and convert it into a [`LabelImage`].
///
/// Singleton axes are trimmed, negative values are rejected. If `unique` is
/// false, objects are re-labeled by 8-connected component analysis, so that
/// disconnected regions sharing a value become separate objects.
pub fn normalize(image: &Image, unique: bool) -> Result<LabelImage> {
    let (width, height) = image.plane_dimensions()?;
    let mut data = Vec::with_capacity(image.data().len());
    for &value in image.data() {
        if value < 0 {
            return Err(Error::NegativeLabel { value });
        }
        let label = u32::try_from(value).map_err(|_| Error::InvalidImage {
            reason: format!("label {value} exceeds the supported range"),
        })?;
        data.push(label);
    }
    let labels = LabelImage::new(width, height, data)?;
    if unique { Ok(labels) } else { relabel(&labels) }
}

/// Label the connected components of `labels`.
///
/// Neighbouring pixels belong to the same component if they carry the same
/// value. Background stays 0; components are numbered from 1.
pub fn relabel(labels: &LabelImage) -> Result<LabelImage> {
    let (width, height) = labels.dimensions();
    let buffer: ImageBuffer<Luma<u32>, Vec<u32>> =
        ImageBuffer::from_raw(width as u32, height as u32, labels.pixels().collect())
            .ok_or_else(|| Error::InvalidImage {
                reason: format!("cannot label a {width}x{height} image"),
            })?;
    let components = connected_components(&buffer, Connectivity::Eight, Luma([0u32]));
    Ok(LabelImage::from_img(ImgVec::new(
        components.into_raw(),
        width,
        height,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unique_keeps_labels() {
        let image = Image::from_fn(4, 2, |x, _| if x == 3 { 7 } else { 0 });
        let labels = normalize(&image, true).unwrap();
        assert_eq!(labels.dimensions(), (4, 2));
        assert_eq!(labels.labels(), vec![7]);
    }

    #[test]
    fn test_normalize_rejects_negative_labels() {
        let image = Image::from_fn(2, 2, |x, y| if (x, y) == (1, 1) { -1 } else { 0 });
        assert!(matches!(
            normalize(&image, true),
            Err(Error::NegativeLabel { value: -1 })
        ));
    }

    #[test]
    fn test_normalize_rejects_overflow() {
        let image = Image::from_fn(2, 1, |_, _| i64::from(u32::MAX) + 1);
        assert!(matches!(
            normalize(&image, true),
            Err(Error::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_normalize_trims_singleton_axes() {
        let image = Image::new([1, 3, 5], vec![1; 15]).unwrap();
        let labels = normalize(&image, true).unwrap();
        assert_eq!(labels.dimensions(), (5, 3));
    }

    #[test]
    fn test_relabel_splits_disconnected_regions() {
        // Two binary blobs separated by a background column.
        let image = Image::from_fn(5, 3, |x, _| i64::from(x != 2));
        let labels = normalize(&image, false).unwrap();
        assert_eq!(labels.object_count(), 2);
        assert_eq!(labels.get(0, 0), labels.get(1, 2));
        assert_ne!(labels.get(0, 0), labels.get(4, 0));
        assert_eq!(labels.get(2, 1), 0);
    }

    #[test]
    fn test_relabel_uses_eight_connectivity() {
        let image = Image::from_fn(2, 2, |x, y| i64::from(x == y));
        let labels = normalize(&image, false).unwrap();
        assert_eq!(labels.object_count(), 1);
    }

    #[test]
    fn test_relabel_separates_touching_values() {
        let image = Image::from_fn(4, 1, |x, _| if x < 2 { 5 } else { 9 });
        let labels = normalize(&image, false).unwrap();
        assert_eq!(labels.object_count(), 2);
    }
}
