//! Label images, binary masks and raw image input.
//!
//! - [`Image`]: raw caller input (any shape, signed values), validated on use
//! - [`LabelImage`]: canonical 2-D label grid, background fixed at 0
//! - [`BinaryImage`]: 2-D foreground mask used inside measures
//! - [`Window`]: padded bounding box used to crop object pairs

pub mod components;
pub mod distance;
pub mod io;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use imgref::ImgVec;

use crate::error::{Error, Result};

pub use components::{normalize, relabel};
pub use distance::Window;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Raw image data as supplied by the caller.
///
/// Shape follows row-major convention (`[height, width]` for a plane). The
/// data is validated and converted by [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    shape: Vec<usize>,
    data: Vec<i64>,
}

impl Image {
    /// Create an image from its shape and row-major data.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<i64>) -> Result<Self> {
        let shape = shape.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidImage {
                reason: format!(
                    "shape {shape:?} requires {expected} values, got {}",
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a 2-D image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> i64) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            shape: vec![height, width],
            data,
        }
    }

    /// Shape of the image.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major pixel values.
    #[must_use]
    pub fn data(&self) -> &[i64] {
        &self.data
    }

    /// Resolve the shape to a single plane, trimming singleton axes.
    ///
    /// Returns `(width, height)`.
    pub fn plane_dimensions(&self) -> Result<(usize, usize)> {
        let mut shape = self.shape.clone();
        while shape.len() > 2 {
            match shape.iter().position(|&n| n == 1) {
                Some(axis) => {
                    shape.remove(axis);
                }
                None => break,
            }
        }
        match shape.as_slice() {
            [0, _] | [_, 0] => Err(Error::InvalidImage {
                reason: format!("image of shape {:?} has no pixels", self.shape),
            }),
            [height, width] => Ok((*width, *height)),
            _ => Err(Error::InvalidImage {
                reason: format!("expected a 2-D image, got shape {:?}", self.shape),
            }),
        }
    }
}

impl From<&LabelImage> for Image {
    fn from(labels: &LabelImage) -> Self {
        Self {
            shape: vec![labels.height(), labels.width()],
            data: labels.pixels().map(i64::from).collect(),
        }
    }
}

impl From<LabelImage> for Image {
    fn from(labels: LabelImage) -> Self {
        Self::from(&labels)
    }
}

impl From<&BinaryImage> for Image {
    fn from(mask: &BinaryImage) -> Self {
        Self {
            shape: vec![mask.height(), mask.width()],
            data: mask.pixels().map(i64::from).collect(),
        }
    }
}

/// Identity of a [`LabelImage`] buffer.
///
/// Clones share the identity of the image they were cloned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(u64);

/// Canonical 2-D label image: 0 is background, positive values are objects.
///
/// Label images are immutable and cheap to clone.
#[derive(Clone)]
pub struct LabelImage {
    pixels: Arc<ImgVec<u32>>,
    id: ImageId,
}

impl LabelImage {
    /// Create a label image from row-major data.
    pub fn new(width: usize, height: usize, data: Vec<u32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage {
                reason: format!("{width}x{height} image has no pixels"),
            });
        }
        if data.len() != width * height {
            return Err(Error::InvalidImage {
                reason: format!(
                    "{width}x{height} image requires {} values, got {}",
                    width * height,
                    data.len()
                ),
            });
        }
        Ok(Self::from_img(ImgVec::new(data, width, height)))
    }

    /// Create a label image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::from_img(ImgVec::new(data, width, height))
    }

    /// An all-background image.
    #[must_use]
    pub fn zeros(width: usize, height: usize) -> Self {
        Self::from_img(ImgVec::new(vec![0; width * height], width, height))
    }

    pub(crate) fn from_img(img: ImgVec<u32>) -> Self {
        Self {
            pixels: Arc::new(img),
            id: ImageId(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Image width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    /// Image height.
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    /// Image dimensions as `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    /// Identity of the underlying buffer.
    #[must_use]
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Label at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.pixels.buf()[y * self.pixels.stride() + x]
    }

    /// Row-major iterator over all labels.
    pub fn pixels(&self) -> impl Iterator<Item = u32> + '_ {
        self.pixels.pixels()
    }

    /// Sorted distinct positive labels.
    #[must_use]
    pub fn labels(&self) -> Vec<u32> {
        self.pixels()
            .filter(|&label| label > 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of distinct objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.labels().len()
    }

    /// Mask of all pixels carrying `label`.
    #[must_use]
    pub fn mask(&self, label: u32) -> BinaryImage {
        self.map_mask(|value| value == label)
    }

    /// Mask of all object pixels.
    #[must_use]
    pub fn foreground(&self) -> BinaryImage {
        self.map_mask(|value| value > 0)
    }

    fn map_mask(&self, f: impl Fn(u32) -> bool) -> BinaryImage {
        let data = self.pixels().map(f).collect();
        BinaryImage::from_img(ImgVec::new(data, self.width(), self.height()))
    }

    /// Copy the pixels inside `window`.
    #[must_use]
    pub fn crop(&self, window: Window) -> Self {
        Self::from_fn(window.width, window.height, |x, y| {
            self.get(window.left + x, window.top + y)
        })
    }

    /// Fail unless `other` has the same dimensions.
    pub fn ensure_same_size(&self, other: &Self) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        Ok(())
    }

    /// Count pixel co-occurrences `(self label, other label)`.
    pub fn contingency(&self, other: &Self) -> Result<HashMap<(u32, u32), u64>> {
        self.ensure_same_size(other)?;
        let mut table: HashMap<(u32, u32), u64> = HashMap::new();
        for pair in self.pixels().zip(other.pixels()) {
            *table.entry(pair).or_default() += 1;
        }
        Ok(table)
    }
}

impl PartialEq for LabelImage {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions() == other.dimensions() && self.pixels().eq(other.pixels())
    }
}

impl fmt::Debug for LabelImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// 2-D foreground/background mask.
#[derive(Clone)]
pub struct BinaryImage {
    pixels: ImgVec<bool>,
}

impl BinaryImage {
    pub(crate) fn from_img(pixels: ImgVec<bool>) -> Self {
        Self { pixels }
    }

    /// Create a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::from_img(ImgVec::new(data, width, height))
    }

    /// Mask width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    /// Mask height.
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    /// Value at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.pixels.buf()[y * self.pixels.stride() + x]
    }

    /// Row-major iterator over all values.
    pub fn pixels(&self) -> impl Iterator<Item = bool> + '_ {
        self.pixels.pixels()
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pixels().filter(|&value| value).count()
    }

    /// Whether any pixel is foreground.
    #[must_use]
    pub fn any(&self) -> bool {
        self.pixels().any(|value| value)
    }

    /// Pixel-wise conjunction.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a && b)
    }

    /// Pixel-wise disjunction.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a || b)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(bool, bool) -> bool) -> Self {
        debug_assert_eq!(
            (self.width(), self.height()),
            (other.width(), other.height())
        );
        let data = self
            .pixels()
            .zip(other.pixels())
            .map(|(a, b)| f(a, b))
            .collect();
        Self::from_img(ImgVec::new(data, self.width(), self.height()))
    }

    /// Copy the pixels inside `window`.
    #[must_use]
    pub fn crop(&self, window: Window) -> Self {
        Self::from_fn(window.width, window.height, |x, y| {
            self.get(window.left + x, window.top + y)
        })
    }

    /// Label image with foreground labeled 1.
    #[must_use]
    pub fn to_labels(&self) -> LabelImage {
        let data = self.pixels().map(u32::from).collect();
        LabelImage::from_img(ImgVec::new(data, self.width(), self.height()))
    }
}

impl PartialEq for BinaryImage {
    fn eq(&self, other: &Self) -> bool {
        (self.width(), self.height()) == (other.width(), other.height())
            && self.pixels().eq(other.pixels())
    }
}

impl Eq for BinaryImage {}

impl fmt::Debug for BinaryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares() -> LabelImage {
        LabelImage::from_fn(6, 4, |x, y| match (x, y) {
            (0..=1, 0..=1) => 1,
            (4..=5, 2..=3) => 3,
            _ => 0,
        })
    }

    #[test]
    fn test_image_shape_mismatch() {
        assert!(Image::new([2, 3], vec![0; 5]).is_err());
        assert!(Image::new([2, 3], vec![0; 6]).is_ok());
    }

    #[test]
    fn test_plane_dimensions_trims_singleton_axes() {
        let img = Image::new([1, 4, 6, 1], vec![0; 24]).unwrap();
        assert_eq!(img.plane_dimensions().unwrap(), (6, 4));

        let img = Image::new([4, 6], vec![0; 24]).unwrap();
        assert_eq!(img.plane_dimensions().unwrap(), (6, 4));
    }

    #[test]
    fn test_plane_dimensions_rejects_empty_axes() {
        for shape in [vec![5, 0], vec![0, 5], vec![1, 0, 5]] {
            let img = Image::new(shape, vec![]).unwrap();
            assert!(matches!(
                img.plane_dimensions(),
                Err(Error::InvalidImage { .. })
            ));
        }
        assert!(LabelImage::new(0, 3, vec![]).is_err());
    }

    #[test]
    fn test_plane_dimensions_rejects_volumes() {
        let img = Image::new([2, 4, 6], vec![0; 48]).unwrap();
        assert!(matches!(
            img.plane_dimensions(),
            Err(Error::InvalidImage { .. })
        ));

        let img = Image::new([24], vec![0; 24]).unwrap();
        assert!(img.plane_dimensions().is_err());
    }

    #[test]
    fn test_labels_and_objects() {
        let img = squares();
        assert_eq!(img.labels(), vec![1, 3]);
        assert_eq!(img.object_count(), 2);
        assert_eq!(img.mask(3).count(), 4);
        assert_eq!(img.foreground().count(), 8);
        assert_eq!(LabelImage::zeros(3, 3).object_count(), 0);
    }

    #[test]
    fn test_clone_keeps_identity() {
        let img = squares();
        let copy = img.clone();
        assert_eq!(img.id(), copy.id());
        assert_ne!(img.id(), squares().id());
        assert_eq!(img, squares());
    }

    #[test]
    fn test_crop() {
        let img = squares();
        let window = Window {
            left: 3,
            top: 1,
            width: 3,
            height: 3,
        };
        let cropped = img.crop(window);
        assert_eq!(cropped.dimensions(), (3, 3));
        assert_eq!(cropped.get(1, 1), 3);
        assert_eq!(cropped.get(0, 0), 0);
        assert_eq!(cropped.mask(3).count(), 4);
    }

    #[test]
    fn test_contingency() {
        let a = squares();
        let b = LabelImage::from_fn(6, 4, |x, _| u32::from(x < 3));
        let table = a.contingency(&b).unwrap();
        assert_eq!(table[&(1, 1)], 4);
        assert_eq!(table[&(3, 0)], 4);
        assert_eq!(table.values().sum::<u64>(), 24);

        let other = LabelImage::zeros(5, 4);
        assert!(matches!(
            a.contingency(&other),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_binary_ops() {
        let a = BinaryImage::from_fn(4, 1, |x, _| x < 2);
        let b = BinaryImage::from_fn(4, 1, |x, _| x > 0);
        assert_eq!(a.and(&b).count(), 1);
        assert_eq!(a.or(&b).count(), 4);
        assert_eq!(a.to_labels().labels(), vec![1]);
    }
}
