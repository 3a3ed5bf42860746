//! sentryd - face sentry daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured source
//! 2. Detects faces and assigns persistent identities
//! 3. Runs the recognition gate per identity (user / countdown / locked)
//! 4. Aims the pan/tilt rig at the selected locked identity
//! 5. Optionally enrolls a new user and retrains in place

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use face_sentry::config::SentryConfig;
use face_sentry::gate::DatasetSampleStore;
use face_sentry::track::template_tracker_factory;
use face_sentry::{
    annotate, build_detector, open_source, status_channel, EnrollmentRequest, FirmataActuator,
    FrameOrchestrator, FrameReport, FrameSource, IdentityTracker, MotionController, PipelineParts,
    RecognitionGate, Recognizer, SqliteRecordStore, StatusEvent, TargetArbiter,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "sentryd",
    about = "Track faces, gate recognition and aim the pan/tilt rig"
)]
struct Args {
    /// Enroll a new user under this label
    #[arg(long, value_name = "LABEL")]
    enroll: Option<String>,

    /// Sex recorded for the enrolled user
    #[arg(long, default_value = "", requires = "enroll")]
    sex: String,

    /// Bind the enrollment to this identity id instead of the first face seen
    #[arg(long, value_name = "ID", requires = "enroll")]
    enroll_identity: Option<u64>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Write annotated frames as PNG into this directory
    #[arg(long, value_name = "DIR", env = "SENTRY_ANNOTATE_DIR")]
    annotate_dir: Option<PathBuf>,

    /// Run without the servo rig
    #[arg(long)]
    no_servo: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SentryConfig::load()?;
    run(args, cfg)
}

fn run(args: Args, cfg: SentryConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let (sink, status_rx) = status_channel();

    let mut source = open_source(&cfg.source)?;
    source.connect()?;

    let mut detector = build_detector(&cfg.detector)?;
    detector.warm_up()?;
    log::info!("detector backend: {}", detector.name());

    let recognizer = Recognizer::load(cfg.recognizer.clone())?;
    let records = SqliteRecordStore::open(&cfg.db_path)?;

    if let Some(dir) = &args.annotate_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow!("failed to create {}: {}", dir.display(), e))?;
    }

    let motion = if args.no_servo || !cfg.servo.enabled {
        MotionController::inactive(&cfg.servo, sink.clone())
    } else {
        let actuator = FirmataActuator::new(cfg.servo.pan_pin, cfg.servo.tilt_pin)
            .with_reset_delay(Duration::from_millis(cfg.servo.reset_delay_ms));
        MotionController::connect(Box::new(actuator), &cfg.servo, sink.clone())
    };

    let tracker = IdentityTracker::new(template_tracker_factory())
        .with_match_radius(cfg.tracking.match_radius_px)
        .with_eviction(cfg.tracking.evict_after);

    let mut pipeline = FrameOrchestrator::new(PipelineParts {
        detector,
        tracker,
        gate: RecognitionGate::new(cfg.gate),
        arbiter: TargetArbiter::new(cfg.arbiter_policy),
        recognizer: Box::new(recognizer),
        samples: Box::new(DatasetSampleStore::new(&cfg.recognizer.dataset_dir)),
        records: Box::new(records),
        target: motion.target_setter(),
        status: sink,
    });

    if let Some(label) = &args.enroll {
        pipeline.start_enrollment(EnrollmentRequest {
            label: label.clone(),
            sex: args.sex.clone(),
            identity: args.enroll_identity,
        })?;
    }

    let motion = motion.spawn()?;

    log::info!(
        "sentryd running. source={} db={} policy={}",
        cfg.source.uri,
        cfg.db_path,
        cfg.arbiter_policy.as_str()
    );

    let result = frame_loop(
        &args,
        &cfg,
        source.as_mut(),
        &mut pipeline,
        &status_rx,
        &running,
    );

    log::info!("stopping motion controller...");
    motion.stop()?;
    result
}

#[derive(Default)]
struct Health {
    servo_active: bool,
    locks: u64,
    enrollments: u64,
}

fn frame_loop(
    args: &Args,
    cfg: &SentryConfig,
    source: &mut dyn FrameSource,
    pipeline: &mut FrameOrchestrator,
    status_rx: &Receiver<StatusEvent>,
    running: &AtomicBool,
) -> Result<()> {
    let mut health = Health::default();
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(limit) = args.frames {
            if pipeline.frames_processed() >= limit {
                log::info!("frame limit {} reached", limit);
                break;
            }
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame capture failed: {:#}", e);
                std::thread::sleep(SOURCE_RETRY_DELAY);
                continue;
            }
        };

        let report = pipeline.process_frame(&frame, Instant::now())?;
        if let Some(dir) = &args.annotate_dir {
            write_annotated(dir, &frame, &report);
        }

        for event in status_rx.try_iter() {
            record_status(&mut health, event);
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} source={} identities={} servo={} locks={} enrollments={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.source,
                pipeline.identity_count(),
                if health.servo_active { "active" } else { "inactive" },
                health.locks,
                health.enrollments
            );
            last_health_log = Instant::now();
        }

        std::thread::sleep(cfg.source.frame_delay);
    }
    Ok(())
}

fn record_status(health: &mut Health, event: StatusEvent) {
    match event {
        StatusEvent::ActuatorConnected { .. } => health.servo_active = true,
        StatusEvent::ActuatorInactive { .. } | StatusEvent::ActuatorLost { .. } => {
            health.servo_active = false
        }
        StatusEvent::IdentityLocked { .. } => health.locks += 1,
        StatusEvent::EnrollmentCompleted { .. } => health.enrollments += 1,
        other => log::debug!("status: {:?}", other),
    }
}

fn write_annotated(dir: &Path, frame: &face_sentry::Frame, report: &FrameReport) {
    let path = dir.join(format!("frame_{:06}.png", frame.sequence));
    if let Err(e) = annotate(frame, report).save(&path) {
        log::warn!("failed to write {}: {}", path.display(), e);
    }
}
