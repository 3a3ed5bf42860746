use anyhow::Result;

use crate::frame::{BoundingBox, Frame};

/// Face detector backend trait.
///
/// A detector is a black box: pixels in, face boxes out. It is called once per frame
/// from the frame loop and must tolerate frames with no faces (returning an empty list).
/// Errors are reported to the caller, which treats a failed call as zero detections.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect faces in a frame. Boxes are in pixel coordinates of `frame`.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
