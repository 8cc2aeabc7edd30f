// ============================================================
// Layer 4 — Segmentation Dataset
// ============================================================
// Pairs every image in `imgs/` with its mask in `masks/`.
//
// Two naming conventions are supported, as two named variants:
//
//   Carvana (strict)   imgs/abc.jpg  ↔  masks/abc_mask.gif
//   Basic (permissive) imgs/abc.jpg  ↔  masks/abc.png
//
// `SegmentationDataset::open` tries Carvana first. Only a
// classified `DatasetError::Incompatible` (a mask missing or
// ambiguous under that naming) sends it to Basic; every other
// error is returned as-is.
//
// Construction decodes every mask once to build the MaskLegend and
// reads every image header, so a pair that is undecodable, sized
// differently from its mask, or too small for the scale fails here
// rather than halfway through an epoch. Pixels are decoded lazily
// by `load`, called from the batcher.
//
// Loaders iterate `SampleIndices`, a burn Dataset of plain sample
// indices; the batcher turns indices into tensors.

use burn::data::dataset::Dataset;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::data::preprocessor::{mask_values, MaskKind, Preprocessor};
use crate::domain::legend::MaskLegend;

#[derive(Debug, Error)]
pub enum DatasetError {
    /// The folder layout does not follow this variant's naming.
    #[error("incompatible data: {0}")]
    Incompatible(String),

    #[error("no input images found in '{0}'")]
    Empty(PathBuf),

    #[error("scale {0} must be in (0, 1]")]
    InvalidScale(f64),

    #[error("scale {scale} is too small: a {width}x{height} image would have no pixels")]
    ScaleTooSmall { width: u32, height: u32, scale: f64 },

    #[error("cannot read '{path}': {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode '{path}': {source}")]
    Image {
        path:   PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("mask '{path}' contains value {value:?} which is not in the legend")]
    UnknownMaskValue { path: PathBuf, value: Vec<u8> },

    #[error("masks mix grayscale and colour encodings (first mismatch: '{0}')")]
    MixedMaskKinds(PathBuf),

    #[error("image and mask sizes differ for '{0}'")]
    SizeMismatch(String),

    /// Not an image format this build can decode (e.g. .npy, .pt).
    #[error("unsupported file format: '{0}'")]
    UnsupportedFormat(PathBuf),

    #[error("sample {index} requested from a dataset of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl DatasetError {
    pub fn is_incompatible(&self) -> bool {
        matches!(self, DatasetError::Incompatible(_))
    }
}

/// Mask naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetVariant {
    Carvana,
    Basic,
}

impl DatasetVariant {
    pub fn mask_suffix(&self) -> &'static str {
        match self {
            DatasetVariant::Carvana => "_mask",
            DatasetVariant::Basic   => "",
        }
    }
}

/// One preprocessed sample, flat buffers in row-major order.
#[derive(Debug, Clone)]
pub struct SegmentationItem {
    /// [channels, height, width]
    pub image:    Vec<f32>,
    /// [height, width] class indices
    pub mask:     Vec<i32>,
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
}

#[derive(Debug, Clone)]
struct SamplePaths {
    id:    String,
    image: PathBuf,
    mask:  PathBuf,
}

pub struct SegmentationDataset {
    variant:      DatasetVariant,
    samples:      Vec<SamplePaths>,
    legend:       MaskLegend,
    preprocessor: Preprocessor,
}

impl SegmentationDataset {
    /// Open with the strict variant, falling back to the permissive one.
    pub fn open(
        images_dir: impl AsRef<Path>,
        masks_dir:  impl AsRef<Path>,
        scale:      f64,
    ) -> Result<Self, DatasetError> {
        let (images_dir, masks_dir) = (images_dir.as_ref(), masks_dir.as_ref());
        match Self::open_variant(DatasetVariant::Carvana, images_dir, masks_dir, scale) {
            Err(e) if e.is_incompatible() => {
                tracing::info!("Carvana naming does not fit ({e}), using basic naming");
                Self::open_variant(DatasetVariant::Basic, images_dir, masks_dir, scale)
            }
            other => other,
        }
    }

    pub fn open_variant(
        variant:    DatasetVariant,
        images_dir: &Path,
        masks_dir:  &Path,
        scale:      f64,
    ) -> Result<Self, DatasetError> {
        let preprocessor = Preprocessor::new(scale)?;

        let image_files = list_files(images_dir)?;
        if image_files.is_empty() {
            return Err(DatasetError::Empty(images_dir.to_path_buf()));
        }

        // stem → every mask file with that stem (extensions may differ)
        let mut masks_by_stem: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in list_files(masks_dir)? {
            if let Some(stem) = file_stem(&path) {
                masks_by_stem.entry(stem).or_default().push(path);
            }
        }

        let suffix = variant.mask_suffix();
        let mut samples = Vec::with_capacity(image_files.len());
        for image in image_files {
            let Some(id) = file_stem(&image) else { continue };
            let wanted = format!("{id}{suffix}");
            let mask = match masks_by_stem.get(&wanted).map(Vec::as_slice) {
                Some([only]) => only.clone(),
                Some(many) => {
                    return Err(DatasetError::Incompatible(format!(
                        "{} mask files named '{wanted}.*' for id '{id}'",
                        many.len()
                    )))
                }
                None => {
                    return Err(DatasetError::Incompatible(format!(
                        "no mask named '{wanted}.*' for id '{id}'"
                    )))
                }
            };
            samples.push(SamplePaths { id, image, mask });
        }

        tracing::info!("Creating {:?} dataset with {} examples", variant, samples.len());
        let legend = scan_samples(&samples, &preprocessor)?;
        tracing::info!("Unique mask values: {:?}", legend.values());

        Ok(Self { variant, samples, legend, preprocessor })
    }

    pub fn variant(&self) -> DatasetVariant {
        self.variant
    }

    pub fn legend(&self) -> &MaskLegend {
        &self.legend
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Decode and preprocess one sample.
    pub fn load(&self, index: usize) -> Result<SegmentationItem, DatasetError> {
        let paths = self.samples.get(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.samples.len(),
        })?;

        let image = decode(&paths.image)?;
        let mask  = decode(&paths.mask)?;
        if (image.width(), image.height()) != (mask.width(), mask.height()) {
            return Err(DatasetError::SizeMismatch(paths.id.clone()));
        }

        let chw = self.preprocessor.image_to_chw(&image)?;
        let (mask, height, width) =
            self.preprocessor.mask_to_indices(&mask, &self.legend, &paths.mask)?;

        Ok(SegmentationItem {
            image:    chw.data,
            mask,
            channels: chw.channels,
            height,
            width,
        })
    }
}

// ─── SampleIndices ────────────────────────────────────────────────────────────
/// The indices of one partition, as the burn Dataset a loader walks.
#[derive(Debug, Clone)]
pub struct SampleIndices {
    indices: Vec<usize>,
}

impl SampleIndices {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    /// Keep only whole batches, dropping the trailing partial one.
    pub fn drop_last(mut self, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let whole = (self.indices.len() / batch_size) * batch_size;
        self.indices.truncate(whole);
        self
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Dataset<usize> for SampleIndices {
    fn get(&self, index: usize) -> Option<usize> {
        self.indices.get(index).copied()
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let io_err = |source| DatasetError::Io { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if !path.is_file() || hidden {
            continue;
        }
        if image::ImageFormat::from_path(&path).is_err() {
            return Err(DatasetError::UnsupportedFormat(path));
        }
        files.push(path);
    }
    // read_dir order is platform dependent; the split must not be
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

fn decode(path: &Path) -> Result<image::DynamicImage, DatasetError> {
    image::open(path).map_err(|source| DatasetError::Image { path: path.to_path_buf(), source })
}

/// Check every pair up front and collect the legend.
fn scan_samples(samples: &[SamplePaths], preprocessor: &Preprocessor) -> Result<MaskLegend, DatasetError> {
    let mut kind: Option<MaskKind> = None;
    let mut all = Vec::new();
    for s in samples {
        let mask = decode(&s.mask)?;
        let (width, height) = image::image_dimensions(&s.image)
            .map_err(|source| DatasetError::Image { path: s.image.clone(), source })?;
        if (width, height) != (mask.width(), mask.height()) {
            return Err(DatasetError::SizeMismatch(s.id.clone()));
        }
        preprocessor.scaled_size(width, height)?;

        let (k, values) = mask_values(&mask);
        match kind {
            None => kind = Some(k),
            Some(seen) if seen != k => return Err(DatasetError::MixedMaskKinds(s.mask.clone())),
            Some(_) => {}
        }
        all.extend(values);
    }
    Ok(MaskLegend::from_values(all))
}
