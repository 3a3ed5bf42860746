//! Target arbitration: pick one locked identity per frame as the aim point.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::frame::BoundingBox;
use crate::track::IdentityId;

/// Aim request in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetCommand {
    pub x: f32,
    pub y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// A locked identity that emitted a box this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockedCandidate {
    pub id: IdentityId,
    pub bbox: BoundingBox,
    pub locked_at: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// Earliest lock wins; ties go to the lowest id.
    #[default]
    LongestLocked,
    /// Box centre closest to the frame centre wins; ties go to the lowest id.
    NearestCenter,
}

impl ArbitrationPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "longest_locked" => Ok(Self::LongestLocked),
            "nearest_center" => Ok(Self::NearestCenter),
            other => Err(anyhow!("unknown arbitration policy '{}'", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongestLocked => "longest_locked",
            Self::NearestCenter => "nearest_center",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TargetArbiter {
    policy: ArbitrationPolicy,
}

impl TargetArbiter {
    pub fn new(policy: ArbitrationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ArbitrationPolicy {
        self.policy
    }

    /// Choose the target among locked candidates. `None` means hold the last target.
    pub fn select_target(
        &self,
        candidates: &[LockedCandidate],
        frame_width: u32,
        frame_height: u32,
    ) -> Option<TargetCommand> {
        let chosen = match self.policy {
            ArbitrationPolicy::LongestLocked => candidates
                .iter()
                .min_by(|a, b| a.locked_at.cmp(&b.locked_at).then(a.id.cmp(&b.id))),
            ArbitrationPolicy::NearestCenter => {
                let cx = frame_width as f32 / 2.0;
                let cy = frame_height as f32 / 2.0;
                let dist = |c: &LockedCandidate| {
                    let (x, y) = box_center(&c.bbox);
                    (x - cx).hypot(y - cy)
                };
                candidates
                    .iter()
                    .min_by(|a, b| dist(a).total_cmp(&dist(b)).then(a.id.cmp(&b.id)))
            }
        }?;

        let (x, y) = box_center(&chosen.bbox);
        log::debug!("target identity {} at ({:.1}, {:.1})", chosen.id, x, y);
        Some(TargetCommand {
            x,
            y,
            frame_width,
            frame_height,
        })
    }
}

fn box_center(bbox: &BoundingBox) -> (f32, f32) {
    (
        bbox.x as f32 + bbox.width as f32 / 2.0,
        bbox.y as f32 + bbox.height as f32 / 2.0,
    )
}
