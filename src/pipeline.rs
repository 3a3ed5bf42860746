//! Per-frame driver.
//!
//! detections -> identities -> gate verdicts -> target -> motion controller.
//! Collaborator failures (detector, recognizer retrain, record store) are logged
//! and surfaced as status events; they never abort a frame.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::time::Instant;

use crate::arbiter::{LockedCandidate, TargetArbiter, TargetCommand};
use crate::detect::FaceDetector;
use crate::frame::{BoundingBox, Frame};
use crate::gate::{CompletedEnrollment, EnrollmentRequest, RecognitionGate, SampleStore, Verdict};
use crate::motion::TargetSetter;
use crate::recognize::FaceRecognizer;
use crate::records::{now_s, RecordStore};
use crate::status::{StatusEvent, StatusSink};
use crate::track::{IdentityId, IdentityTracker};

/// Everything the orchestrator drives.
pub struct PipelineParts {
    pub detector: Box<dyn FaceDetector>,
    pub tracker: IdentityTracker,
    pub gate: RecognitionGate,
    pub arbiter: TargetArbiter,
    pub recognizer: Box<dyn FaceRecognizer>,
    pub samples: Box<dyn SampleStore>,
    pub records: Box<dyn RecordStore>,
    pub target: TargetSetter,
    pub status: StatusSink,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IdentityReport {
    pub id: IdentityId,
    pub bbox: BoundingBox,
    pub is_new: bool,
    pub verdict: Verdict,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub sequence: u64,
    pub detections: usize,
    pub identities: Vec<IdentityReport>,
    pub lost: Vec<IdentityId>,
    pub evicted: Vec<IdentityId>,
    pub target: Option<TargetCommand>,
    pub completed_enrollment: Option<CompletedEnrollment>,
}

pub struct FrameOrchestrator {
    detector: Box<dyn FaceDetector>,
    tracker: IdentityTracker,
    gate: RecognitionGate,
    arbiter: TargetArbiter,
    recognizer: Box<dyn FaceRecognizer>,
    samples: Box<dyn SampleStore>,
    records: Box<dyn RecordStore>,
    target: TargetSetter,
    status: StatusSink,
    frames_processed: u64,
    detector_failing: bool,
}

impl FrameOrchestrator {
    pub fn new(parts: PipelineParts) -> Self {
        if !parts.recognizer.is_ready() {
            log::warn!("recognizer not trained; every face is unrecognized");
            parts.status.send(StatusEvent::RecognizerUnavailable);
        }
        Self {
            detector: parts.detector,
            tracker: parts.tracker,
            gate: parts.gate,
            arbiter: parts.arbiter,
            recognizer: parts.recognizer,
            samples: parts.samples,
            records: parts.records,
            target: parts.target,
            status: parts.status,
            frames_processed: 0,
            detector_failing: false,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn identity_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn enrollment_active(&self) -> bool {
        self.gate.enrollment_active()
    }

    pub fn start_enrollment(&mut self, request: EnrollmentRequest) -> Result<()> {
        let label = request.label.clone();
        self.gate.start_enrollment(request)?;
        self.status.send(StatusEvent::EnrollmentStarted { label });
        Ok(())
    }

    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> Result<FrameReport> {
        let detections = self.detect(frame);
        let update = self.tracker.track(frame, &detections, now);
        for id in &update.created {
            self.gate.register(*id, now);
        }
        for id in &update.evicted {
            self.gate.forget(*id);
        }

        let mut report = FrameReport {
            sequence: frame.sequence,
            detections: detections.len(),
            lost: update.lost,
            evicted: update.evicted,
            ..FrameReport::default()
        };
        let mut locked = Vec::new();

        for tracked in update.boxes {
            let Some(crop) = frame.crop(&tracked.bbox) else {
                log::debug!("identity {} box outside frame", tracked.id);
                continue;
            };
            let outcome = self.gate.evaluate(
                tracked.id,
                &crop,
                now,
                self.recognizer.as_ref(),
                self.samples.as_mut(),
            );
            if let Verdict::Locked { label } = &outcome.verdict {
                if outcome.newly_locked {
                    self.status.send(StatusEvent::IdentityLocked {
                        id: tracked.id,
                        label: label.clone(),
                    });
                }
                let locked_at = self
                    .gate
                    .entry(tracked.id)
                    .and_then(|entry| entry.locked_at)
                    .unwrap_or(now);
                locked.push(LockedCandidate {
                    id: tracked.id,
                    bbox: tracked.bbox,
                    locked_at,
                });
            }
            if outcome.completed.is_some() {
                report.completed_enrollment = outcome.completed;
            }
            report.identities.push(IdentityReport {
                id: tracked.id,
                bbox: tracked.bbox,
                is_new: tracked.is_new,
                verdict: outcome.verdict,
            });
        }

        report.target = self
            .arbiter
            .select_target(&locked, frame.width, frame.height);
        if let Some(command) = &report.target {
            self.target.apply(command);
        }

        if let Some(completed) = &report.completed_enrollment {
            self.finish_enrollment(completed);
        }

        self.frames_processed += 1;
        log::debug!(
            "frame {}: {} detections, {} boxes, {} locked",
            frame.sequence,
            report.detections,
            report.identities.len(),
            locked.len()
        );
        Ok(report)
    }

    fn detect(&mut self, frame: &Frame) -> Vec<BoundingBox> {
        match self.detector.detect(frame) {
            Ok(boxes) => {
                if self.detector_failing {
                    log::info!("detector {} recovered", self.detector.name());
                    self.detector_failing = false;
                }
                boxes
            }
            Err(e) => {
                log::warn!("detector {} failed: {:#}", self.detector.name(), e);
                if !self.detector_failing {
                    self.detector_failing = true;
                    self.status.send(StatusEvent::DetectorFailed {
                        reason: format!("{:#}", e),
                    });
                }
                Vec::new()
            }
        }
    }

    /// Record the new user, retrain once, then start tracking from scratch.
    fn finish_enrollment(&mut self, completed: &CompletedEnrollment) {
        match now_s().and_then(|time| {
            self.records
                .register_user(&completed.label, &completed.sex, time)
        }) {
            Ok(true) => log::info!("registered user '{}'", completed.label),
            Ok(false) => log::info!("user '{}' already registered", completed.label),
            Err(e) => {
                log::warn!("failed to register '{}': {:#}", completed.label, e);
                self.status.send(StatusEvent::RecordStoreFailed {
                    reason: format!("{:#}", e),
                });
            }
        }

        let enemies = self.records.enemy_names().unwrap_or_else(|e| {
            log::warn!("failed to read enemy records: {:#}", e);
            Default::default()
        });
        if let Err(e) = self.recognizer.retrain(&enemies) {
            log::warn!("retrain after enrolling '{}' failed: {:#}", completed.label, e);
            self.status.send(StatusEvent::RetrainFailed {
                reason: format!("{:#}", e),
            });
        }

        self.tracker.reset();
        self.gate.reset();
        self.status.send(StatusEvent::EnrollmentCompleted {
            label: completed.label.clone(),
            samples: completed.samples,
        });
    }
}

// ----------------------------------------------------------------------------
// Annotation
// ----------------------------------------------------------------------------

const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const YELLOW: Rgb<u8> = Rgb([230, 200, 0]);
const RED: Rgb<u8> = Rgb([220, 0, 0]);
const RETICLE_RADIUS: i32 = 30;

/// Copy of the frame with verdict-coloured boxes, plus a reticle and crosshair
/// through the current target.
pub fn annotate(frame: &Frame, report: &FrameReport) -> RgbImage {
    let mut canvas = frame.to_rgb_image();
    for identity in &report.identities {
        let color = match identity.verdict {
            Verdict::Identified { .. } => GREEN,
            Verdict::Countdown { .. } => YELLOW,
            Verdict::Locked { .. } | Verdict::Enrolling { .. } => RED,
        };
        draw_rect(&mut canvas, &identity.bbox, color, 2);
    }
    if let Some(target) = &report.target {
        let (cx, cy) = (target.x.round() as i32, target.y.round() as i32);
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        for x in 0..w {
            put(&mut canvas, x, cy, RED);
        }
        for y in 0..h {
            put(&mut canvas, cx, y, RED);
        }
        draw_circle(&mut canvas, cx, cy, RETICLE_RADIUS, RED);
    }
    canvas
}

fn put(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    let (x0, y0) = (bbox.x, bbox.y);
    let (x1, y1) = (bbox.x + bbox.width - 1, bbox.y + bbox.height - 1);
    for t in 0..thickness {
        for x in x0..=x1 {
            put(canvas, x, y0 + t, color);
            put(canvas, x, y1 - t, color);
        }
        for y in y0..=y1 {
            put(canvas, x0 + t, y, color);
            put(canvas, x1 - t, y, color);
        }
    }
}

fn draw_circle(canvas: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    // Midpoint circle.
    let (mut x, mut y, mut err) = (radius, 0, 1 - radius);
    while x >= y {
        for (dx, dy) in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            put(canvas, cx + dx, cy + dy, color);
        }
        y += 1;
        if err < 0 {
            err += 2 * y + 1;
        } else {
            x -= 1;
            err += 2 * (y - x) + 1;
        }
    }
}
