//! Face Sentry
//!
//! Tracks faces in a live video stream, decides per face whether it is a known
//! user or a hostile, and aims a two-axis pan/tilt servo rig at the chosen
//! hostile.
//!
//! # Pipeline
//!
//! frame -> detections -> identities -> recognition gate -> target arbiter ->
//! motion controller -> servo actuator
//!
//! Frame processing runs on the caller's thread. Motion runs on its own thread at
//! a fixed interval and reads the latest target through a mutex.
//!
//! # Module Structure
//!
//! - `frame`: Frame buffers, bounding boxes, crops
//! - `ingest`: Frame sources (synthetic, image directory, V4L2)
//! - `detect`: Face detector backends
//! - `track`: Identity association and per-identity visual trackers
//! - `recognize`: LBPH recognizer and label map
//! - `gate`: Escalation state machine and enrollment capture
//! - `arbiter`: Target selection among locked identities
//! - `motion`: Smoothed servo motion and the Firmata actuator
//! - `records`: User / enemy record store
//! - `pipeline`: Per-frame orchestration and annotation
//! - `status`: Status events raised at collaborator boundaries

pub mod arbiter;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod recognize;
pub mod records;
pub mod status;
pub mod track;

pub use arbiter::{ArbitrationPolicy, LockedCandidate, TargetArbiter, TargetCommand};
pub use config::SentryConfig;
pub use detect::{build_detector, FaceDetector, StubDetector};
pub use frame::{BoundingBox, Frame};
pub use gate::{
    CompletedEnrollment, DatasetSampleStore, EnrollmentRequest, EscalationState, GateSettings,
    RecognitionGate, SampleStore, Verdict,
};
pub use ingest::{open_source, FrameSource};
pub use motion::{
    Axis, FirmataActuator, MotionController, MotionHandle, ServoActuator, TargetSetter,
};
pub use pipeline::{annotate, FrameOrchestrator, FrameReport, PipelineParts};
pub use recognize::{FaceKind, FaceRecognizer, Recognition, Recognizer};
pub use records::{FaceRecord, InMemoryRecordStore, RecordStore, SqliteRecordStore};
pub use status::{status_channel, StatusEvent, StatusSink};
pub use track::{IdentityId, IdentityTracker};
