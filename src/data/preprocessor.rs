// ============================================================
// Layer 4 — Image / Mask Preprocessor
// ============================================================
// Turns decoded images into the flat buffers the batcher stacks.
//
// Images:
//   1. Resize by `scale` with bicubic (Catmull-Rom) filtering
//   2. Grayscale → 1 channel, RGB → 3, RGBA → 4
//   3. HWC → CHW, bytes / 255 → floats in [0, 1]
//
// Masks:
//   1. Resize by `scale` with nearest-neighbour filtering, so no
//      new "in-between" values are invented at class borders
//   2. Replace every raw pixel value by its legend index
//
// Reference: image crate documentation (imageops::resize)

use image::{imageops::FilterType, DynamicImage};
use std::path::Path;

use crate::data::dataset::DatasetError;
use crate::domain::legend::MaskLegend;

/// Whether a mask stores one value per pixel or an RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    Gray,
    Rgb,
}

impl MaskKind {
    pub fn of(mask: &DynamicImage) -> Self {
        // L and LA decode to one value per pixel, everything else to RGB
        if mask.color().channel_count() <= 2 {
            MaskKind::Gray
        } else {
            MaskKind::Rgb
        }
    }
}

/// An image laid out channel-first, ready for batching.
#[derive(Debug, Clone)]
pub struct ChwImage {
    pub data:     Vec<f32>,
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    scale: f64,
}

impl Preprocessor {
    /// `scale` must be in (0, 1].
    pub fn new(scale: f64) -> Result<Self, DatasetError> {
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(DatasetError::InvalidScale(scale));
        }
        Ok(Self { scale })
    }

    /// Target size after scaling: floor(scale * w) x floor(scale * h).
    pub fn scaled_size(&self, width: u32, height: u32) -> Result<(u32, u32), DatasetError> {
        let new_w = (self.scale * width as f64).floor() as u32;
        let new_h = (self.scale * height as f64).floor() as u32;
        if new_w == 0 || new_h == 0 {
            return Err(DatasetError::ScaleTooSmall { width, height, scale: self.scale });
        }
        Ok((new_w, new_h))
    }

    /// Resize and lay out an image as CHW floats in [0, 1].
    pub fn image_to_chw(&self, img: &DynamicImage) -> Result<ChwImage, DatasetError> {
        let (w, h) = self.scaled_size(img.width(), img.height())?;
        let img = if (w, h) == (img.width(), img.height()) {
            img.clone()
        } else {
            img.resize_exact(w, h, FilterType::CatmullRom)
        };

        // Collapse the decoded colour type onto 1, 3 or 4 interleaved channels
        let (channels, raw): (usize, Vec<u8>) = match img.color().channel_count() {
            1 | 2 => (1, img.to_luma8().into_raw()),
            3     => (3, img.to_rgb8().into_raw()),
            _     => (4, img.to_rgba8().into_raw()),
        };

        let (width, height) = (w as usize, h as usize);
        let plane = width * height;
        let mut data = vec![0.0f32; channels * plane];
        for (i, px) in raw.chunks_exact(channels).enumerate() {
            for (c, &v) in px.iter().enumerate() {
                data[c * plane + i] = v as f32 / 255.0;
            }
        }

        Ok(ChwImage { data, channels, height, width })
    }

    /// Resize a mask and map each pixel to its class index.
    /// Returns (indices in row-major order, height, width).
    pub fn mask_to_indices(
        &self,
        mask:   &DynamicImage,
        legend: &MaskLegend,
        path:   &Path,
    ) -> Result<(Vec<i32>, usize, usize), DatasetError> {
        let (w, h) = self.scaled_size(mask.width(), mask.height())?;
        let mask = if (w, h) == (mask.width(), mask.height()) {
            mask.clone()
        } else {
            mask.resize_exact(w, h, FilterType::Nearest)
        };

        let (stride, raw) = match MaskKind::of(&mask) {
            MaskKind::Gray => (1, mask.to_luma8().into_raw()),
            MaskKind::Rgb  => (3, mask.to_rgb8().into_raw()),
        };

        let mut indices = Vec::with_capacity(raw.len() / stride);
        for px in raw.chunks_exact(stride) {
            let class = legend.index_of(px).ok_or_else(|| DatasetError::UnknownMaskValue {
                path:  path.to_path_buf(),
                value: px.to_vec(),
            })?;
            indices.push(class as i32);
        }

        Ok((indices, h as usize, w as usize))
    }
}

/// Every distinct raw value present in a mask (unscaled).
pub fn mask_values(mask: &DynamicImage) -> (MaskKind, Vec<Vec<u8>>) {
    let kind = MaskKind::of(mask);
    let (stride, raw) = match kind {
        MaskKind::Gray => (1, mask.to_luma8().into_raw()),
        MaskKind::Rgb  => (3, mask.to_rgb8().into_raw()),
    };

    let mut values: Vec<Vec<u8>> = raw.chunks_exact(stride).map(|px| px.to_vec()).collect();
    values.sort();
    values.dedup();
    (kind, values)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_scale_bounds() {
        assert!(Preprocessor::new(0.0).is_err());
        assert!(Preprocessor::new(1.5).is_err());
        assert!(Preprocessor::new(0.5).is_ok());
        assert!(Preprocessor::new(1.0).is_ok());
    }

    #[test]
    fn test_scaled_size_floors() {
        let p = Preprocessor::new(0.5).unwrap();
        assert_eq!(p.scaled_size(5, 3).unwrap(), (2, 1));
        assert!(p.scaled_size(1, 8).is_err());
    }

    #[test]
    fn test_rgb_image_is_channel_first() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 51]));

        let p   = Preprocessor::new(1.0).unwrap();
        let chw = p.image_to_chw(&DynamicImage::ImageRgb8(img)).unwrap();

        assert_eq!((chw.channels, chw.height, chw.width), (3, 1, 2));
        // R plane, then G plane, then B plane
        assert_eq!(chw.data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.2]);
    }

    #[test]
    fn test_gray_image_has_one_channel() {
        let img = GrayImage::from_pixel(3, 2, Luma([255]));
        let chw = Preprocessor::new(1.0)
            .unwrap()
            .image_to_chw(&DynamicImage::ImageLuma8(img))
            .unwrap();
        assert_eq!(chw.channels, 1);
        assert!(chw.data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_mask_maps_to_legend_indices() {
        let mut mask = GrayImage::new(2, 2);
        mask.put_pixel(1, 0, Luma([255]));
        mask.put_pixel(0, 1, Luma([255]));
        let mask = DynamicImage::ImageLuma8(mask);

        let (kind, values) = mask_values(&mask);
        assert_eq!(kind, MaskKind::Gray);
        assert_eq!(values, vec![vec![0], vec![255]]);

        let legend = MaskLegend::from_values(values);
        let (idx, h, w) = Preprocessor::new(1.0)
            .unwrap()
            .mask_to_indices(&mask, &legend, Path::new("m.png"))
            .unwrap();
        assert_eq!((h, w), (2, 2));
        assert_eq!(idx, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_unknown_mask_value_is_an_error() {
        let mask   = DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 1, Luma([9])));
        let legend = MaskLegend::from_values(vec![vec![0]]);
        let err = Preprocessor::new(1.0)
            .unwrap()
            .mask_to_indices(&mask, &legend, Path::new("m.png"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnknownMaskValue { .. }));
    }
}
