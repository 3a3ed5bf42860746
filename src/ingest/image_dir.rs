//! Still images from a local directory, replayed in name order and looped.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;
use crate::recognize::is_image_file;

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_error: None,
        }
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| anyhow!("failed to read image dir {}: {}", self.dir.display(), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        if files.is_empty() {
            return Err(anyhow!("no png/jpg images in {}", self.dir.display()));
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} images from {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("image dir source not connected"));
        }
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let decoded = image::open(path).map_err(|e| {
            let msg = format!("failed to decode {}: {}", path.display(), e);
            self.last_error = Some(msg.clone());
            anyhow!(msg)
        })?;
        let frame = Frame::from_rgb_image(decoded.to_rgb8(), self.frame_count);
        self.frame_count += 1;
        self.last_error = None;
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn replays_images_in_name_order_and_loops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::new(8, 6).save(dir.path().join("b.png"))?;
        RgbImage::new(4, 2).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"skip")?;

        let mut source = ImageDirSource::new(dir.path());
        source.connect()?;
        let sizes: Vec<(u32, u32)> = (0..3)
            .map(|_| source.next_frame().map(|f| (f.width, f.height)))
            .collect::<Result<_>>()?;
        assert_eq!(sizes, vec![(4, 2), (8, 6), (4, 2)]);
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageDirSource::new(dir.path());
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
    }
}
