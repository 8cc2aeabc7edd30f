// ============================================================
// Layer 6 — Experiment Logger
// ============================================================
// Records what happens during a run under outputs/<run>/:
//
//   steps.csv        one row per optimizer step
//                      step,epoch,loss
//   validation.csv   one row per validation round
//                      step,epoch,learning_rate,dice
//   snapshots/       PNGs of the first sample of a batch:
//                      step{N}_image.png  the input image
//                      step{N}_mask.png   its true mask
//                      step{N}_pred.png   the rendered prediction
//
// Example steps.csv:
//   step,epoch,loss
//   1,1,1.412003
//   2,1,1.397541
//
// Headers are written only when a file is new, so a resumed run
// appends to the same log.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgba};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of validation.csv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub step:          usize,
    pub epoch:         usize,
    /// Learning rate after the scheduler has seen this round's score
    pub learning_rate: f64,
    /// Mean hard-prediction Dice on the validation set, in [0, 1]
    pub dice:          f64,
}

/// First sample of a batch, pulled off the device as plain data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub width:     u32,
    pub height:    u32,
    pub channels:  usize,
    /// CHW, values in [0, 1]
    pub image:     Vec<f32>,
    /// Class index per pixel
    pub true_mask: Vec<i64>,
    /// 0/255 per pixel
    pub pred_mask: Vec<u8>,
    pub classes:   usize,
}

pub struct ExperimentLogger {
    steps_csv:      PathBuf,
    validation_csv: PathBuf,
    snapshot_dir:   PathBuf,
}

impl ExperimentLogger {
    /// Create the log files under `dir`, writing CSV headers for new files.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create log directory '{}'", dir.display()))?;

        let logger = Self {
            steps_csv:      dir.join("steps.csv"),
            validation_csv: dir.join("validation.csv"),
            snapshot_dir:   dir.join("snapshots"),
        };
        write_header(&logger.steps_csv, "step,epoch,loss")?;
        write_header(&logger.validation_csv, "step,epoch,learning_rate,dice")?;
        Ok(logger)
    }

    pub fn log_step(&self, step: usize, epoch: usize, loss: f64) -> Result<()> {
        let mut f = append(&self.steps_csv)?;
        writeln!(f, "{},{},{:.6}", step, epoch, loss)?;
        Ok(())
    }

    pub fn log_validation(&self, r: &ValidationRecord) -> Result<()> {
        let mut f = append(&self.validation_csv)?;
        writeln!(f, "{},{},{:e},{:.6}", r.step, r.epoch, r.learning_rate, r.dice)?;

        tracing::debug!(
            "Logged validation at step {}: dice={:.4}, lr={:e}",
            r.step,
            r.dice,
            r.learning_rate,
        );
        Ok(())
    }

    /// Write the three snapshot PNGs for `step`.
    pub fn save_snapshot(&self, step: usize, s: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.snapshot_dir)?;

        let image = chw_to_image(s)?;
        let truth = gray(s.width, s.height, class_shades(&s.true_mask, s.classes))?;
        let pred  = gray(s.width, s.height, s.pred_mask.clone())?;

        for (name, img) in [("image", image), ("mask", DynamicImage::ImageLuma8(truth)), ("pred", DynamicImage::ImageLuma8(pred))] {
            let path = self.snapshot_dir.join(format!("step{step}_{name}.png"));
            img.save(&path)
                .with_context(|| format!("Cannot write snapshot '{}'", path.display()))?;
        }
        Ok(())
    }

    pub fn steps_csv(&self) -> &Path {
        &self.steps_csv
    }

    pub fn validation_csv(&self) -> &Path {
        &self.validation_csv
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }
}

fn write_header(path: &Path, header: &str) -> Result<()> {
    if !path.exists() {
        let mut f = fs::File::create(path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        writeln!(f, "{header}")?;
        tracing::debug!("Created log file '{}'", path.display());
    }
    Ok(())
}

fn append(path: &Path) -> Result<fs::File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot append to '{}'", path.display()))
}

/// Spread class indices over 0..=255 so every class is visible.
fn class_shades(indices: &[i64], classes: usize) -> Vec<u8> {
    let top = classes.max(2) as i64 - 1;
    indices
        .iter()
        .map(|&i| (i.clamp(0, top) * 255 / top) as u8)
        .collect()
}

fn gray(width: u32, height: u32, pixels: Vec<u8>) -> Result<GrayImage> {
    ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("mask buffer does not match {width}x{height}"))
}

fn chw_to_image(s: &Snapshot) -> Result<DynamicImage> {
    let plane = (s.width * s.height) as usize;
    if s.image.len() != plane * s.channels {
        return Err(anyhow!(
            "image buffer has {} values, expected {}x{}x{}",
            s.image.len(),
            s.channels,
            s.height,
            s.width
        ));
    }

    let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    // CHW → HWC
    let interleaved: Vec<u8> = (0..plane)
        .flat_map(|p| (0..s.channels).map(move |c| (c, p)))
        .map(|(c, p)| byte(s.image[c * plane + p]))
        .collect();

    let (w, h) = (s.width, s.height);
    let image = match s.channels {
        1 => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, interleaved).map(DynamicImage::ImageLuma8),
        3 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, interleaved).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, interleaved).map(DynamicImage::ImageRgba8),
        n => return Err(anyhow!("cannot snapshot an image with {n} channels")),
    };
    image.ok_or_else(|| anyhow!("image buffer does not match {w}x{h}"))
}
