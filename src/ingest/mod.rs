//! Frame ingestion sources.
//!
//! - Synthetic camera (`stub://<name>`)
//! - Directory of still images (any local directory path)
//! - USB/V4L2 devices (`/dev/videoN`, feature: ingest-v4l2)
//!
//! Every source yields packed RGB24 [`Frame`]s with increasing sequence numbers.

pub mod image_dir;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::path::Path;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use crate::config::SourceSettings;
use crate::frame::Frame;

pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;
    fn next_frame(&mut self) -> Result<Frame>;
    fn is_healthy(&self) -> bool;
    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Pick a source implementation from the configured URI.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(
            uri,
            settings.width,
            settings.height,
        )?));
    }
    if uri.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(V4l2Config {
                device: uri.to_string(),
                width: settings.width,
                height: settings.height,
            })));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!("{} requires the ingest-v4l2 feature", uri));
        }
    }
    if uri.contains("://") {
        return Err(anyhow!("unsupported source '{}'", uri));
    }
    if Path::new(uri).is_dir() {
        return Ok(Box::new(ImageDirSource::new(uri)));
    }
    Err(anyhow!("source '{}' is not a directory", uri))
}
