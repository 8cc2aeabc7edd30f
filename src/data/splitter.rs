// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Partitions sample indices into two disjoint sets:
//   - Training set:   used to update model weights
//   - Validation set: scored every few steps to drive the LR schedule
//
// Sizes:
//   validation = floor(N * fraction)
//   train      = N - validation
//
// The partition is a seeded Fisher-Yates shuffle
// (rand::seq::SliceRandom over StdRng), so the same seed gives the
// same membership on every run and on every machine. The split
// seed is independent of the loader shuffle seed.
//
// Reference: rand crate documentation

use anyhow::{bail, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Default seed of the train/validation partition.
pub const DEFAULT_SPLIT_SEED: u64 = 0;

/// Disjoint index sets covering `0..total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train:      Vec<usize>,
    pub validation: Vec<usize>,
}

impl Split {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn validation_len(&self) -> usize {
        self.validation.len()
    }
}

/// Number of validation samples for `total` samples and fraction `f`.
pub fn validation_size(total: usize, val_fraction: f64) -> usize {
    (total as f64 * val_fraction).floor() as usize
}

/// Shuffle `0..total` with `seed` and cut it into (train, validation).
///
/// # Errors
/// * `val_fraction` outside [0, 1)
/// * the training set would be empty
pub fn split_indices(total: usize, val_fraction: f64, seed: u64) -> Result<Split> {
    if !(0.0..1.0).contains(&val_fraction) {
        bail!("validation fraction must be in [0, 1), got {val_fraction}");
    }

    let n_val   = validation_size(total, val_fraction);
    let n_train = total - n_val;
    if n_train == 0 {
        bail!("validation fraction {val_fraction} leaves no training samples out of {total}");
    }

    let mut rng     = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..total).collect();
    indices.shuffle(&mut rng);

    // split_off(n) leaves [0..n) in `indices` and returns [n..total)
    let validation = indices.split_off(n_train);

    tracing::debug!(
        "Dataset split: {} training, {} validation (seed {})",
        indices.len(),
        validation.len(),
        seed,
    );

    Ok(Split { train: indices, validation })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_correct_split_sizes() {
        let split = split_indices(100, 0.1, 0).unwrap();
        assert_eq!(split.train_len(),      90);
        assert_eq!(split.validation_len(), 10);
    }

    #[test]
    fn test_sizes_follow_floor_for_many_fractions() {
        for total in [1usize, 7, 10, 33, 100, 257] {
            for f in [0.0, 0.05, 0.1, 0.25, 0.29, 0.5, 0.9, 0.99] {
                let split = split_indices(total, f, 3).unwrap();
                assert_eq!(split.validation_len(), (total as f64 * f).floor() as usize);
                assert_eq!(split.train_len() + split.validation_len(), total);
            }
        }
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let split = split_indices(50, 0.3, 7).unwrap();
        let train: HashSet<usize> = split.train.iter().copied().collect();
        let val:   HashSet<usize> = split.validation.iter().copied().collect();
        assert!(train.is_disjoint(&val));
        let all: HashSet<usize> = train.union(&val).copied().collect();
        assert_eq!(all, (0..50).collect());
    }

    #[test]
    fn test_same_seed_same_membership() {
        let a = split_indices(200, 0.2, 0).unwrap();
        let b = split_indices(200, 0.2, 0).unwrap();
        assert_eq!(a, b);

        let c = split_indices(200, 0.2, 1).unwrap();
        assert_ne!(a.validation, c.validation);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(split_indices(10, 1.0, 0).is_err());
        assert!(split_indices(10, -0.1, 0).is_err());
    }

    #[test]
    fn test_empty_dataset_has_no_training_set() {
        assert!(split_indices(0, 0.1, 0).is_err());
    }
}
