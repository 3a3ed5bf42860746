#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::FaceDetector;
use crate::frame::{BoundingBox, Frame};

const DEFAULT_INPUT_WIDTH: u32 = 320;
const DEFAULT_INPUT_HEIGHT: u32 = 240;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.7;
const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// Tract-based face detector for UltraFace-style ONNX models.
///
/// Expects two outputs: scores `[1, N, 2]` (background, face) and boxes `[1, N, 4]`
/// as normalized `(x1, y1, x2, y2)` corners. Frames are resized to the model input
/// and normalized with `(p - 127) / 128`.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        DEFAULT_INPUT_HEIGHT as usize,
                        DEFAULT_INPUT_WIDTH as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default face score threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            &frame.to_rgb_image(),
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                let p = resized.get_pixel(x as u32, y as u32).0[channel];
                (p as f32 - 127.0) / 128.0
            },
        );
        input.into_tensor()
    }

    fn extract_boxes(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;
        let corners = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;

        let shape = scores.shape();
        if shape.len() != 3 || shape[2] != 2 {
            return Err(anyhow!("unexpected score tensor shape {:?}", shape));
        }
        let anchors = shape[1];
        if corners.shape() != [1, anchors, 4] {
            return Err(anyhow!("unexpected box tensor shape {:?}", corners.shape()));
        }
        let (fw, fh) = (frame.width as f32, frame.height as f32);

        let mut candidates: Vec<(f32, BoundingBox)> = Vec::new();
        for i in 0..anchors {
            let score = scores[[0, i, 1]];
            if score < self.score_threshold {
                continue;
            }
            let x1 = corners[[0, i, 0]].clamp(0.0, 1.0) * fw;
            let y1 = corners[[0, i, 1]].clamp(0.0, 1.0) * fh;
            let x2 = corners[[0, i, 2]].clamp(0.0, 1.0) * fw;
            let y2 = corners[[0, i, 3]].clamp(0.0, 1.0) * fh;
            let bbox = BoundingBox::new(
                x1.round() as i32,
                y1.round() as i32,
                (x2 - x1).round() as i32,
                (y2 - y1).round() as i32,
            );
            if !bbox.is_empty() {
                candidates.push((score, bbox));
            }
        }

        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut kept: Vec<BoundingBox> = Vec::new();
        for (_, bbox) in candidates {
            if kept.iter().all(|k| k.iou(&bbox) < self.iou_threshold) {
                kept.push(bbox);
            }
        }
        Ok(kept)
    }
}

impl FaceDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(outputs, frame)
    }
}
