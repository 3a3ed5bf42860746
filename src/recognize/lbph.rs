//! Local binary pattern histogram (LBPH) face model.
//!
//! Faces are resized to 64x64 grayscale, converted to radius-1 8-neighbour LBP codes,
//! folded into 59 uniform-pattern bins per cell of an 8x8 grid, and compared by
//! chi-square distance. Prediction is nearest neighbour over all training samples;
//! the returned distance is the confidence (lower is better).

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

const FACE_SIZE: u32 = 64;
const GRID: usize = 8;
const BINS: usize = 59;
const HISTOGRAM_LEN: usize = GRID * GRID * BINS;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Sample {
    label: u32,
    histogram: Vec<f32>,
}

/// Trained LBPH model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LbphModel {
    samples: Vec<Sample>,
}

impl LbphModel {
    /// Train from `(label, grayscale face)` pairs. Fails on an empty training set.
    pub fn train<I>(faces: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, GrayImage)>,
    {
        let samples: Vec<Sample> = faces
            .into_iter()
            .map(|(label, face)| Sample {
                label,
                histogram: spatial_histogram(&face),
            })
            .collect();
        if samples.is_empty() {
            return Err(anyhow!("cannot train LBPH model without samples"));
        }
        Ok(Self { samples })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Nearest training label and its chi-square distance.
    pub fn predict(&self, face: &GrayImage) -> Option<(u32, f32)> {
        let query = spatial_histogram(face);
        self.samples
            .iter()
            .map(|s| (s.label, chi_square(&query, &s.histogram)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow!("failed to write model {}: {}", path.display(), e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read model {}: {}", path.display(), e))?;
        let model: LbphModel = serde_json::from_slice(&raw)
            .map_err(|e| anyhow!("invalid model file {}: {}", path.display(), e))?;
        if model
            .samples
            .iter()
            .any(|s| s.histogram.len() != HISTOGRAM_LEN)
        {
            return Err(anyhow!(
                "model file {} has incompatible histograms",
                path.display()
            ));
        }
        Ok(model)
    }
}

fn uniform_bins() -> &'static [u8; 256] {
    static TABLE: OnceLock<[u8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [(BINS - 1) as u8; 256];
        let mut next = 0u8;
        for code in 0..256u32 {
            // circular bit transitions within the 8-bit code
            let rotated = (code >> 1) | ((code & 1) << 7);
            if (code ^ rotated).count_ones() <= 2 {
                table[code as usize] = next;
                next += 1;
            }
        }
        table
    })
}

fn spatial_histogram(face: &GrayImage) -> Vec<f32> {
    let face = image::imageops::resize(face, FACE_SIZE, FACE_SIZE, FilterType::Triangle);
    let bins = uniform_bins();
    let inner = (FACE_SIZE - 2) as usize;
    let mut histogram = vec![0f32; HISTOGRAM_LEN];
    let mut cell_counts = [0u32; GRID * GRID];

    for y in 1..FACE_SIZE - 1 {
        for x in 1..FACE_SIZE - 1 {
            let center = face.get_pixel(x, y).0[0];
            let neighbours = [
                (x - 1, y - 1),
                (x, y - 1),
                (x + 1, y - 1),
                (x + 1, y),
                (x + 1, y + 1),
                (x, y + 1),
                (x - 1, y + 1),
                (x - 1, y),
            ];
            let mut code = 0u8;
            for (bit, (nx, ny)) in neighbours.iter().enumerate() {
                if face.get_pixel(*nx, *ny).0[0] >= center {
                    code |= 1 << bit;
                }
            }
            let cx = (x as usize - 1) * GRID / inner;
            let cy = (y as usize - 1) * GRID / inner;
            let cell = cy * GRID + cx;
            histogram[cell * BINS + bins[code as usize] as usize] += 1.0;
            cell_counts[cell] += 1;
        }
    }

    for (cell, count) in cell_counts.iter().enumerate() {
        if *count > 0 {
            let norm = *count as f32;
            for v in &mut histogram[cell * BINS..(cell + 1) * BINS] {
                *v /= norm;
            }
        }
    }
    histogram
}

fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let sum = x + y;
            if sum > 0.0 {
                2.0 * (x - y) * (x - y) / sum
            } else {
                0.0
            }
        })
        .sum()
}
