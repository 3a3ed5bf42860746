//! Face recognition boundary.
//!
//! `Recognizer` is an explicitly owned component: it holds the trained LBPH model
//! and the label map, loads both from disk at startup, retrains from the dataset
//! directory, and answers `recognize` calls from the recognition gate. An untrained
//! recognizer reports every face as unrecognized.

mod labels;
mod lbph;

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub use labels::{FaceKind, LabelEntry, LabelMap};
pub use lbph::LbphModel;

use crate::config::RecognizerSettings;

/// Result of classifying one face crop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recognition {
    Unrecognized,
    Recognized { name: String, kind: FaceKind },
}

/// Gate-facing recognizer interface.
pub trait FaceRecognizer {
    /// Classify a color face crop.
    fn recognize(&self, crop: &RgbImage) -> Recognition;

    /// Rebuild the model from the enrollment dataset. Names in `enemies` are typed Enemy.
    fn retrain(&mut self, enemies: &BTreeSet<String>) -> Result<()>;

    /// Change the kind of a known name and persist the label map.
    fn reclassify(&mut self, name: &str, kind: FaceKind) -> Result<bool>;

    /// False while no model is loaded.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Summary of a training pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrainSummary {
    pub labels: usize,
    pub samples: usize,
    pub skipped: usize,
}

pub struct Recognizer {
    settings: RecognizerSettings,
    model: Option<LbphModel>,
    labels: LabelMap,
}

impl Recognizer {
    /// Untrained recognizer with an empty label map.
    pub fn new(settings: RecognizerSettings) -> Self {
        Self {
            settings,
            model: None,
            labels: LabelMap::new(),
        }
    }

    /// Load model and label map from the configured paths. Missing files leave the
    /// recognizer untrained; unreadable files are errors.
    pub fn load(settings: RecognizerSettings) -> Result<Self> {
        let mut recognizer = Self::new(settings);
        if recognizer.settings.model_path.exists() {
            let model = LbphModel::load(&recognizer.settings.model_path)?;
            log::info!(
                "model loaded from {} ({} samples)",
                recognizer.settings.model_path.display(),
                model.sample_count()
            );
            recognizer.model = Some(model);
            recognizer.labels = LabelMap::load(&recognizer.settings.label_map_path)?;
        } else {
            log::warn!(
                "model file {} not found; recognition disabled until trained",
                recognizer.settings.model_path.display()
            );
        }
        Ok(recognizer)
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.settings.dataset_dir
    }

    /// Raw prediction: nearest label and its distance (lower is better).
    pub fn predict(&self, face: &GrayImage) -> Option<(u32, f32)> {
        self.model.as_ref()?.predict(face)
    }

    /// Train from `dataset_dir/<name>/*.{jpg,png}`. Each sub-folder is one label,
    /// numbered in sorted folder order. Writes model and label map on success.
    pub fn train(&mut self, enemies: &BTreeSet<String>) -> Result<TrainSummary> {
        let dataset = &self.settings.dataset_dir;
        let mut folders: Vec<(String, PathBuf)> = std::fs::read_dir(dataset)
            .map_err(|e| anyhow!("failed to read dataset {}: {}", dataset.display(), e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        folders.sort();

        let mut summary = TrainSummary::default();
        let mut labels = LabelMap::new();
        let mut faces = Vec::new();
        for (label, (name, folder)) in folders.iter().enumerate() {
            let label = label as u32;
            let kind = if enemies.contains(name) {
                FaceKind::Enemy
            } else {
                FaceKind::User
            };
            labels.insert(label, name.clone(), kind);
            summary.labels += 1;

            for path in image_files(folder)? {
                match image::open(&path) {
                    Ok(img) => {
                        faces.push((label, img.to_luma8()));
                        summary.samples += 1;
                    }
                    Err(e) => {
                        log::warn!("skipping unreadable sample {}: {}", path.display(), e);
                        summary.skipped += 1;
                    }
                }
            }
        }

        let model = LbphModel::train(faces)?;
        model.save(&self.settings.model_path)?;
        labels.save(&self.settings.label_map_path)?;
        self.model = Some(model);
        self.labels = labels;
        log::info!(
            "model trained: {} labels, {} samples ({} skipped)",
            summary.labels,
            summary.samples,
            summary.skipped
        );
        Ok(summary)
    }
}

impl FaceRecognizer for Recognizer {
    fn recognize(&self, crop: &RgbImage) -> Recognition {
        let gray = image::imageops::grayscale(crop);
        let Some((label, confidence)) = self.predict(&gray) else {
            return Recognition::Unrecognized;
        };
        if confidence >= self.settings.confidence_threshold {
            return Recognition::Unrecognized;
        }
        match self.labels.get(label) {
            Some(entry) => Recognition::Recognized {
                name: entry.name.clone(),
                kind: entry.kind,
            },
            None => Recognition::Unrecognized,
        }
    }

    fn retrain(&mut self, enemies: &BTreeSet<String>) -> Result<()> {
        self.train(enemies).map(|_| ())
    }

    fn reclassify(&mut self, name: &str, kind: FaceKind) -> Result<bool> {
        let changed = self.labels.set_kind(name, kind);
        if changed {
            self.labels.save(&self.settings.label_map_path)?;
        }
        Ok(changed)
    }

    fn is_ready(&self) -> bool {
        self.is_trained()
    }
}

fn image_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)
        .map_err(|e| anyhow!("failed to read {}: {}", folder.display(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_image_file(path))
        .collect();
    files.sort();
    Ok(files)
}

pub(crate) fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> RecognizerSettings {
        RecognizerSettings {
            model_path: dir.join("face_model.json"),
            label_map_path: dir.join("label_map.json"),
            dataset_dir: dir.join("dataset"),
            confidence_threshold: 100.0,
        }
    }

    fn face(seed: u32) -> RgbImage {
        RgbImage::from_fn(48, 48, |x, y| {
            let v = if ((x / (seed + 2)) + (y / 3)) % 2 == 0 { 50 } else { 210 };
            image::Rgb([v, v, v])
        })
    }

    fn write_samples(dir: &Path, name: &str, seed: u32, count: usize) {
        let folder = dir.join("dataset").join(name);
        std::fs::create_dir_all(&folder).unwrap();
        for i in 0..count {
            face(seed).save(folder.join(format!("{}.png", i))).unwrap();
        }
    }

    #[test]
    fn untrained_recognizer_reports_unrecognized() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = Recognizer::load(settings(dir.path())).unwrap();
        assert!(!recognizer.is_trained());
        assert_eq!(recognizer.recognize(&face(1)), Recognition::Unrecognized);
    }

    #[test]
    fn trained_recognizer_returns_name_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path(), "alice", 1, 3);
        write_samples(dir.path(), "mallory", 6, 3);

        let mut recognizer = Recognizer::new(settings(dir.path()));
        let enemies: BTreeSet<String> = ["mallory".to_string()].into_iter().collect();
        let summary = recognizer.train(&enemies).unwrap();
        assert_eq!(summary.labels, 2);
        assert_eq!(summary.samples, 6);

        assert_eq!(
            recognizer.recognize(&face(1)),
            Recognition::Recognized {
                name: "alice".to_string(),
                kind: FaceKind::User
            }
        );
        assert_eq!(
            recognizer.recognize(&face(6)),
            Recognition::Recognized {
                name: "mallory".to_string(),
                kind: FaceKind::Enemy
            }
        );

        let reloaded = Recognizer::load(settings(dir.path())).unwrap();
        assert!(reloaded.is_trained());
        assert_eq!(reloaded.labels().len(), 2);
    }

    #[test]
    fn threshold_rejects_distant_faces() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path(), "alice", 1, 1);
        let mut cfg = settings(dir.path());
        cfg.confidence_threshold = 0.0;
        let mut recognizer = Recognizer::new(cfg);
        recognizer.train(&BTreeSet::new()).unwrap();
        assert_eq!(recognizer.recognize(&face(1)), Recognition::Unrecognized);
    }

    #[test]
    fn reclassify_persists_label_map() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path(), "bob", 2, 1);
        let mut recognizer = Recognizer::new(settings(dir.path()));
        recognizer.train(&BTreeSet::new()).unwrap();

        assert!(recognizer.reclassify("bob", FaceKind::Enemy).unwrap());
        let map = LabelMap::load(&dir.path().join("label_map.json")).unwrap();
        assert_eq!(map.get(0).unwrap().kind, FaceKind::Enemy);
    }
}
