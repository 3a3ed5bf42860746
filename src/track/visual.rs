//! Single-object visual trackers.
//!
//! One tracker instance is owned by each tracked identity. It is seeded from a box and
//! then asked, once per frame, where that box went. Trackers work on the frame's luma
//! plane, converted once per frame by the caller and shared by every identity. A
//! tracker that cannot find its target reports failure; the owning identity then
//! emits no box for that frame.

use image::GrayImage;

use crate::frame::BoundingBox;

/// Single-object tracker seeded from a bounding box.
pub trait VisualTracker: Send {
    /// Seed (or re-seed) the tracker on `bbox` in the luma plane `gray`.
    fn init(&mut self, gray: &GrayImage, bbox: BoundingBox);

    /// Locate the target in the next frame's luma plane. `None` means the target was lost.
    fn update(&mut self, gray: &GrayImage) -> Option<BoundingBox>;
}

/// Factory used by `IdentityTracker` to create one tracker per identity.
pub type TrackerFactory = Box<dyn Fn() -> Box<dyn VisualTracker> + Send>;

/// Default factory producing `TemplateTracker`s.
pub fn template_tracker_factory() -> TrackerFactory {
    Box::new(|| -> Box<dyn VisualTracker> { Box::new(TemplateTracker::new()) })
}

const MAX_TEMPLATE_SIDE: i32 = 48;
const MAX_SEARCH_PX: i32 = 48;
const COARSE_STRIDE: i32 = 4;
const DEFAULT_MAX_MEAN_DIFF: f32 = 40.0;

/// Grayscale template-matching tracker.
///
/// The target box is sampled on a regular luma grid (every pixel for boxes up to
/// 48 px, sparser above). On update the grid is slid over a search window around
/// the last position, coarse pass then a one-pixel refinement, and the offset
/// with the lowest mean absolute difference wins; ties go to the smaller
/// displacement. The box keeps its size and the template is refreshed after
/// every match.
pub struct TemplateTracker {
    bbox: Option<BoundingBox>,
    template: Vec<u8>,
    step: i32,
    max_mean_diff: f32,
}

impl TemplateTracker {
    pub fn new() -> Self {
        Self {
            bbox: None,
            template: Vec::new(),
            step: 1,
            max_mean_diff: DEFAULT_MAX_MEAN_DIFF,
        }
    }

    /// Override the acceptance threshold (mean absolute luma difference).
    pub fn with_max_mean_diff(mut self, max_mean_diff: f32) -> Self {
        self.max_mean_diff = max_mean_diff;
        self
    }

    fn sample(gray: &GrayImage, bbox: &BoundingBox, step: i32) -> Option<Vec<u8>> {
        let (w, h) = (gray.width() as i32, gray.height() as i32);
        if bbox.x < 0 || bbox.y < 0 || bbox.x + bbox.width > w || bbox.y + bbox.height > h {
            return None;
        }
        let step = step.max(1) as usize;
        let mut out = Vec::new();
        for y in (bbox.y..bbox.y + bbox.height).step_by(step) {
            for x in (bbox.x..bbox.x + bbox.width).step_by(step) {
                out.push(gray.get_pixel(x as u32, y as u32)[0]);
            }
        }
        Some(out)
    }

    fn mean_diff(&self, gray: &GrayImage, candidate: &BoundingBox) -> Option<f32> {
        let patch = Self::sample(gray, candidate, self.step)?;
        let total: u32 = patch
            .iter()
            .zip(&self.template)
            .map(|(a, b)| u32::from(a.abs_diff(*b)))
            .sum();
        Some(total as f32 / patch.len().max(1) as f32)
    }

    fn search(
        &self,
        gray: &GrayImage,
        origin: &BoundingBox,
        radius: i32,
        stride: i32,
    ) -> Option<(f32, BoundingBox)> {
        let reach = radius / stride;
        let mut best: Option<(f32, i32, BoundingBox)> = None;
        for ky in -reach..=reach {
            for kx in -reach..=reach {
                let (dx, dy) = (kx * stride, ky * stride);
                let candidate =
                    BoundingBox::new(origin.x + dx, origin.y + dy, origin.width, origin.height);
                let Some(score) = self.mean_diff(gray, &candidate) else {
                    continue;
                };
                let displacement = dx * dx + dy * dy;
                let better = match best {
                    None => true,
                    Some((b, d, _)) => score < b || (score == b && displacement < d),
                };
                if better {
                    best = Some((score, displacement, candidate));
                }
            }
        }
        best.map(|(score, _, bbox)| (score, bbox))
    }
}

impl Default for TemplateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualTracker for TemplateTracker {
    fn init(&mut self, gray: &GrayImage, bbox: BoundingBox) {
        let Some(clamped) = bbox.clamp_to(gray.width(), gray.height()) else {
            self.bbox = None;
            self.template.clear();
            return;
        };
        self.step = (clamped.width.max(clamped.height) / MAX_TEMPLATE_SIDE).max(1);
        match Self::sample(gray, &clamped, self.step) {
            Some(template) => {
                self.bbox = Some(clamped);
                self.template = template;
            }
            None => {
                self.bbox = None;
                self.template.clear();
            }
        }
    }

    fn update(&mut self, gray: &GrayImage) -> Option<BoundingBox> {
        let last = self.bbox?;
        let radius = (last.width.max(last.height) / 2).clamp(COARSE_STRIDE, MAX_SEARCH_PX);
        let (_, coarse) = self.search(gray, &last, radius, COARSE_STRIDE)?;
        let (score, refined) = self.search(gray, &coarse, COARSE_STRIDE - 1, 1)?;
        if score > self.max_mean_diff {
            log::debug!(
                "template tracker lost target near ({}, {}): mean diff {:.1}",
                last.x,
                last.y,
                score
            );
            return None;
        }
        if let Some(template) = Self::sample(gray, &refined, self.step) {
            self.template = template;
        }
        self.bbox = Some(refined);
        Some(refined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::synthetic_frame;

    fn square_frame(x: i32, y: i32, seq: u64) -> GrayImage {
        synthetic_frame(
            320,
            240,
            30,
            &[
                (BoundingBox::new(x, y, 40, 40), [230, 230, 230]),
                (BoundingBox::new(x + 10, y + 10, 20, 8), [60, 60, 60]),
            ],
            seq,
        )
        .grayscale()
    }

    #[test]
    fn template_tracker_follows_small_motion() {
        let mut tracker = TemplateTracker::new();
        let first = square_frame(100, 100, 1);
        tracker.init(&first, BoundingBox::new(100, 100, 40, 40));

        let moved = square_frame(107, 95, 2);
        let bbox = tracker.update(&moved).expect("target should be found");
        assert_eq!((bbox.x, bbox.y), (107, 95));
        assert_eq!((bbox.width, bbox.height), (40, 40));
    }

    #[test]
    fn template_tracker_reports_loss_when_target_vanishes() {
        let mut tracker = TemplateTracker::new();
        let first = square_frame(100, 100, 1);
        tracker.init(&first, BoundingBox::new(100, 100, 40, 40));

        let empty = synthetic_frame(320, 240, 30, &[], 2).grayscale();
        assert!(tracker.update(&empty).is_none());
    }

    #[test]
    fn seed_box_is_clamped_to_the_plane() {
        let mut tracker = TemplateTracker::new();
        let first = square_frame(280, 200, 1);
        tracker.init(&first, BoundingBox::new(280, 200, 60, 60));

        let bbox = tracker.update(&first).expect("clamped target should be found");
        assert_eq!(bbox, BoundingBox::new(280, 200, 40, 40));
    }

    #[test]
    fn uninitialized_tracker_fails() {
        let mut tracker = TemplateTracker::new();
        let frame = square_frame(100, 100, 1);
        assert!(tracker.update(&frame).is_none());
    }
}
