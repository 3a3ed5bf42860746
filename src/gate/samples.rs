use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::PathBuf;

/// Destination for enrollment face samples.
pub trait SampleStore {
    /// Persist sample `index` for `label`.
    fn save(&mut self, label: &str, index: usize, crop: &RgbImage) -> Result<()>;
}

/// Writes samples as `<root>/<label>/<index>.jpg`, the layout the recognizer trains from.
pub struct DatasetSampleStore {
    root: PathBuf,
}

impl DatasetSampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleStore for DatasetSampleStore {
    fn save(&mut self, label: &str, index: usize, crop: &RgbImage) -> Result<()> {
        if label.is_empty() || label.contains(['/', '\\']) || label == "." || label == ".." {
            return Err(anyhow!("invalid enrollment label '{}'", label));
        }
        let folder = self.root.join(label);
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("create sample folder {}", folder.display()))?;
        let path = folder.join(format!("{}.jpg", index));
        crop.save(&path)
            .with_context(|| format!("write sample {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_store_writes_numbered_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetSampleStore::new(dir.path());
        let crop = RgbImage::from_pixel(16, 16, image::Rgb([120, 80, 40]));
        store.save("alice", 0, &crop).unwrap();
        store.save("alice", 1, &crop).unwrap();
        assert!(dir.path().join("alice/0.jpg").exists());
        assert!(dir.path().join("alice/1.jpg").exists());
    }

    #[test]
    fn dataset_store_rejects_path_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetSampleStore::new(dir.path());
        let crop = RgbImage::new(4, 4);
        assert!(store.save("../escape", 0, &crop).is_err());
    }
}
