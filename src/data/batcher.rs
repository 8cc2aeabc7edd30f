// ============================================================
// Layer 4 — Segmentation Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec of sample indices
// into device tensors.
//
// How batching works here:
//   Input:  N indices into the SegmentationDataset
//   Decode: every sample is loaded and preprocessed, in parallel on
//           the decode pool when there is one; results keep their
//           input order
//   Output: images [N, C, H, W] (float), masks [N, H, W] (int)
//
//   Buffers are concatenated sample after sample, then reshaped.
//
// A sample that fails to load, or whose size differs from the
// first one in the batch, is left out of the tensors and reported
// in `failures`. The training loop treats any failure as fatal.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::{bail, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};
use rayon::{prelude::*, ThreadPool};
use std::sync::Arc;

use crate::data::dataset::{DatasetError, SegmentationDataset, SegmentationItem};

// ─── SegmentationBatch ────────────────────────────────────────────────────────
/// A batch of images and masks ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// Images — shape: [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,

    /// Class index per pixel — shape: [batch_size, height, width]
    pub masks: Tensor<B, 3, Int>,

    /// Samples that could not be put in this batch, with the reason
    pub failures: Vec<String>,
}

impl<B: Backend> SegmentationBatch<B> {
    /// Error out on the first sample that did not make it into the batch.
    pub fn ensure_complete(&self) -> Result<()> {
        if let Some(first) = self.failures.first() {
            bail!(
                "{} sample(s) of a batch could not be loaded; first: {first}",
                self.failures.len()
            );
        }
        Ok(())
    }
}

// ─── SegmentationBatcher ──────────────────────────────────────────────────────
/// Holds the dataset, the optional decode pool and the target device.
#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    dataset: Arc<SegmentationDataset>,
    pool:    Option<Arc<ThreadPool>>,
    device:  B::Device,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(
        dataset: Arc<SegmentationDataset>,
        pool:    Option<Arc<ThreadPool>>,
        device:  B::Device,
    ) -> Self {
        Self { dataset, pool, device }
    }

    fn load_all(&self, indices: &[usize]) -> Vec<Result<SegmentationItem, DatasetError>> {
        let dataset = self.dataset.as_ref();
        let load    = |&i: &usize| dataset.load(i);
        match &self.pool {
            // par_iter over a slice is indexed, so collect keeps the order
            Some(pool) => pool.install(|| indices.par_iter().map(load).collect()),
            None => indices.iter().map(load).collect(),
        }
    }
}

impl<B: Backend> Batcher<usize, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, indices: Vec<usize>) -> SegmentationBatch<B> {
        let mut items    = Vec::with_capacity(indices.len());
        let mut failures = Vec::new();
        for (index, loaded) in indices.iter().zip(self.load_all(&indices)) {
            match loaded {
                Ok(item) => items.push(item),
                Err(e) => failures.push(format!("sample {index}: {e}")),
            }
        }
        stack_items(items, failures, &self.device)
    }
}

/// Stack preprocessed items into one batch.
pub fn stack_items<B: Backend>(
    items:        Vec<SegmentationItem>,
    mut failures: Vec<String>,
    device:       &B::Device,
) -> SegmentationBatch<B> {
    let shape = items
        .first()
        .map(|i| (i.channels, i.height, i.width))
        .unwrap_or((0, 0, 0));
    let (channels, height, width) = shape;

    let mut image_flat: Vec<f32> = Vec::with_capacity(items.len() * channels * height * width);
    let mut mask_flat:  Vec<i32> = Vec::with_capacity(items.len() * height * width);
    let mut batch_size = 0usize;

    for item in &items {
        let item_shape = (item.channels, item.height, item.width);
        if item_shape != shape {
            failures.push(format!(
                "sample of shape {item_shape:?} in a batch of shape {shape:?}"
            ));
            continue;
        }
        image_flat.extend_from_slice(&item.image);
        mask_flat.extend_from_slice(&item.mask);
        batch_size += 1;
    }

    let images = Tensor::<B, 1>::from_floats(image_flat.as_slice(), device)
        .reshape([batch_size, channels, height, width]);

    let masks = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), device)
        .reshape([batch_size, height, width]);

    SegmentationBatch { images, masks, failures }
}
