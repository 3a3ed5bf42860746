mod backend;
mod backends;

use anyhow::{anyhow, Result};

pub use backend::FaceDetector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;

use crate::config::DetectorSettings;

/// Construct the detector named in configuration.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn FaceDetector>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubDetector::new())),
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract detector requires detector.model_path"))?;
                Ok(Box::new(TractDetector::new(path)?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!("tract detector requires the backend-tract feature"))
            }
        }
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
