// ============================================================
// Layer 3 — Mask Legend
// ============================================================
// Segmentation masks on disk store raw pixel values, e.g.
//   grayscale: 0 = background, 255 = car
//   colour:    [0,0,0] = background, [128,0,0] = road, ...
//
// The network predicts class INDICES, so every raw value needs
// a stable position. The legend is the sorted, de-duplicated list
// of all values seen across the dataset; a value's position in
// the list is its class index.
//
// The legend travels with every checkpoint so a deployed model
// can translate predicted indices back to the original values.

use serde::{Deserialize, Serialize};

/// Sorted list of distinct raw mask values.
/// Each entry is one byte (grayscale) or three bytes (RGB).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskLegend {
    values: Vec<Vec<u8>>,
}

impl MaskLegend {
    /// Build a legend from raw values in any order, with duplicates.
    pub fn from_values(values: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut values: Vec<Vec<u8>> = values.into_iter().collect();
        values.sort();
        values.dedup();
        Self { values }
    }

    /// Class index of a raw pixel value, if the value is known.
    pub fn index_of(&self, value: &[u8]) -> Option<usize> {
        self.values
            .binary_search_by(|entry| entry.as_slice().cmp(value))
            .ok()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }
}
