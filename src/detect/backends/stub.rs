use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::FaceDetector;
use crate::frame::{BoundingBox, Frame};

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_CELL_PX: u32 = 4;
const MIN_FACE_PX: i32 = 8;

/// Stub backend for synthetic feeds and tests.
///
/// Treats every connected bright region as a face. The frame is sampled on a coarse
/// grid (one luma sample per cell), bright cells are grouped by 4-connectivity, and
/// each group's cell extent becomes a box. Groups smaller than 8x8 px are dropped.
pub struct StubDetector {
    luma_threshold: u8,
    cell_px: u32,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            cell_px: DEFAULT_CELL_PX,
        }
    }

    /// Override the luma threshold for "bright" cells.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.luma_threshold = threshold;
        self
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let cell = self.cell_px;
        let gw = (frame.width / cell) as usize;
        let gh = (frame.height / cell) as usize;
        if gw == 0 || gh == 0 {
            return Ok(Vec::new());
        }

        let mut bright = vec![false; gw * gh];
        for gy in 0..gh {
            for gx in 0..gw {
                let px = gx as u32 * cell + cell / 2;
                let py = gy as u32 * cell + cell / 2;
                bright[gy * gw + gx] = frame.luma_at(px, py) >= self.luma_threshold;
            }
        }

        let mut seen = vec![false; gw * gh];
        let mut boxes = Vec::new();
        let mut queue = VecDeque::new();
        for start in 0..gw * gh {
            if !bright[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            queue.push_back(start);
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (gw, gh, 0usize, 0usize);
            while let Some(idx) = queue.pop_front() {
                let (cx, cy) = (idx % gw, idx / gw);
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                let mut neighbours = Vec::with_capacity(4);
                if cx > 0 {
                    neighbours.push(idx - 1);
                }
                if cx + 1 < gw {
                    neighbours.push(idx + 1);
                }
                if cy > 0 {
                    neighbours.push(idx - gw);
                }
                if cy + 1 < gh {
                    neighbours.push(idx + gw);
                }
                for n in neighbours {
                    if bright[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }

            let c = cell as i32;
            let bbox = BoundingBox::new(
                min_x as i32 * c,
                min_y as i32 * c,
                (max_x - min_x + 1) as i32 * c,
                (max_y - min_y + 1) as i32 * c,
            );
            if bbox.width >= MIN_FACE_PX && bbox.height >= MIN_FACE_PX {
                boxes.push(bbox);
            }
        }

        Ok(boxes)
    }
}
