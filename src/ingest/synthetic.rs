//! Synthetic camera (`stub://<name>`).
//!
//! Renders a dark background with bright square "faces" drifting on slow
//! elliptical paths plus a little random jitter. The stub detector finds them,
//! which makes the whole pipeline runnable without a camera or model.
//!
//! Append `?faces=N` to the URI for more than one face.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::frame::{synthetic_frame, BoundingBox, Frame};

const BACKGROUND: u8 = 24;
const FACE_COLOR: [u8; 3] = [235, 225, 210];
const FACE_PX: i32 = 64;
const MAX_JITTER_PX: i32 = 2;
/// Radians per frame along each face's path.
const ANGULAR_STEP: f32 = 0.02;

pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    faces: usize,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(uri: &str, width: u32, height: u32) -> Result<Self> {
        let faces = parse_face_count(uri)?;
        if (width as i32) < FACE_PX * 2 || (height as i32) < FACE_PX * 2 {
            return Err(anyhow!(
                "synthetic source needs at least {}x{} pixels",
                FACE_PX * 2,
                FACE_PX * 2
            ));
        }
        Ok(Self {
            uri: uri.to_string(),
            width,
            height,
            faces,
            frame_count: 0,
            rng: StdRng::seed_from_u64(0x5E47_0001),
        })
    }

    /// Face boxes for frame `n`, before jitter.
    fn face_boxes(&self, n: u64) -> Vec<BoundingBox> {
        let (w, h) = (self.width as f32, self.height as f32);
        let rx = (w - FACE_PX as f32) / 2.0 - 8.0;
        let ry = (h - FACE_PX as f32) / 2.0 - 8.0;
        (0..self.faces)
            .map(|i| {
                let phase = i as f32 * std::f32::consts::TAU / self.faces as f32;
                let t = n as f32 * ANGULAR_STEP + phase;
                let cx = w / 2.0 + rx * t.cos();
                let cy = h / 2.0 + ry * 0.6 * (t * 0.7).sin();
                BoundingBox::new(
                    cx as i32 - FACE_PX / 2,
                    cy as i32 - FACE_PX / 2,
                    FACE_PX,
                    FACE_PX,
                )
            })
            .collect()
    }
}

fn parse_face_count(uri: &str) -> Result<usize> {
    let Some((_, query)) = uri.split_once('?') else {
        return Ok(1);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("faces=") {
            let faces: usize = value
                .parse()
                .map_err(|_| anyhow!("invalid face count '{}' in {}", value, uri))?;
            if faces == 0 || faces > 8 {
                return Err(anyhow!("face count must be between 1 and 8"));
            }
            return Ok(faces);
        }
    }
    Ok(1)
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({} faces)",
            self.uri,
            self.faces
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let n = self.frame_count;
        self.frame_count += 1;
        let squares: Vec<(BoundingBox, [u8; 3])> = self
            .face_boxes(n)
            .into_iter()
            .map(|b| {
                let dx = self.rng.gen_range(-MAX_JITTER_PX..=MAX_JITTER_PX);
                let dy = self.rng.gen_range(-MAX_JITTER_PX..=MAX_JITTER_PX);
                (BoundingBox::new(b.x + dx, b.y + dy, b.width, b.height), FACE_COLOR)
            })
            .collect();
        Ok(synthetic_frame(
            self.width,
            self.height,
            BACKGROUND,
            &squares,
            n,
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.uri.clone(),
        }
    }
}
