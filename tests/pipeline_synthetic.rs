use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;

use face_sentry::config::{RecognizerSettings, ServoSettings};
use face_sentry::ingest::SyntheticSource;
use face_sentry::track::template_tracker_factory;
use face_sentry::{
    status_channel, ArbitrationPolicy, DatasetSampleStore, EnrollmentRequest, FaceKind,
    FrameOrchestrator, FrameSource, GateSettings, IdentityTracker, MotionController,
    PipelineParts, RecognitionGate, Recognizer, RecordStore, SqliteRecordStore, StatusEvent,
    StatusSink, StubDetector, TargetArbiter, Verdict,
};

fn recognizer_settings(dir: &Path) -> RecognizerSettings {
    RecognizerSettings {
        model_path: dir.join("face_model.json"),
        label_map_path: dir.join("label_map.json"),
        dataset_dir: dir.join("dataset"),
        confidence_threshold: 100.0,
    }
}

fn orchestrator(dir: &Path, db_path: &str, status: StatusSink) -> Result<FrameOrchestrator> {
    let settings = recognizer_settings(dir);
    let motion = MotionController::inactive(&ServoSettings::default(), status.clone());
    Ok(FrameOrchestrator::new(PipelineParts {
        detector: Box::new(StubDetector::new()),
        tracker: IdentityTracker::new(template_tracker_factory()),
        gate: RecognitionGate::new(GateSettings {
            lock_after: Duration::from_secs(30),
            enrollment_samples: 5,
        }),
        arbiter: TargetArbiter::new(ArbitrationPolicy::LongestLocked),
        recognizer: Box::new(Recognizer::load(settings.clone())?),
        samples: Box::new(DatasetSampleStore::new(&settings.dataset_dir)),
        records: Box::new(SqliteRecordStore::open(db_path)?),
        target: motion.target_setter(),
        status,
    }))
}

#[test]
fn unknown_face_locks_after_window_and_becomes_target() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("sentry.db");
    let (sink, status_rx) = status_channel();
    let mut pipeline = orchestrator(dir.path(), db.to_str().unwrap_or_default(), sink)?;

    let mut source = SyntheticSource::new("stub://lobby", 640, 480)?;
    source.connect()?;

    let t0 = Instant::now();
    let first = pipeline.process_frame(&source.next_frame()?, t0)?;
    assert_eq!(first.identities.len(), 1);
    let id = first.identities[0].id;
    assert!(first.identities[0].is_new);
    assert!(matches!(first.identities[0].verdict, Verdict::Countdown { .. }));
    assert!(first.target.is_none());

    let waiting = pipeline.process_frame(&source.next_frame()?, t0 + Duration::from_secs(10))?;
    assert_eq!(waiting.identities[0].id, id);
    assert_eq!(
        waiting.identities[0].verdict,
        Verdict::Countdown {
            remaining: Duration::from_secs(20)
        }
    );

    let locked = pipeline.process_frame(&source.next_frame()?, t0 + Duration::from_secs(31))?;
    assert_eq!(locked.identities[0].id, id);
    assert_eq!(
        locked.identities[0].verdict,
        Verdict::Locked {
            label: "ENEMY".to_string()
        }
    );
    let target = locked.target.expect("locked identity is targeted");
    let bbox = locked.identities[0].bbox;
    assert_eq!(target.x, bbox.x as f32 + bbox.width as f32 / 2.0);
    assert_eq!(target.y, bbox.y as f32 + bbox.height as f32 / 2.0);
    assert_eq!((target.frame_width, target.frame_height), (640, 480));

    let events: Vec<StatusEvent> = status_rx.try_iter().collect();
    assert!(events.contains(&StatusEvent::RecognizerUnavailable));
    assert!(events.contains(&StatusEvent::IdentityLocked {
        id,
        label: "ENEMY".to_string()
    }));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StatusEvent::ActuatorInactive { .. }))
            .count(),
        1
    );
    Ok(())
}

#[test]
fn enrollment_captures_samples_retrains_and_registers_user() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("sentry.db");
    let db_path = db.to_str().unwrap_or_default().to_string();
    let (sink, status_rx) = status_channel();
    let mut pipeline = orchestrator(dir.path(), &db_path, sink)?;

    pipeline.start_enrollment(EnrollmentRequest {
        label: "alice".to_string(),
        sex: "F".to_string(),
        identity: None,
    })?;
    assert!(pipeline.enrollment_active());

    let mut source = SyntheticSource::new("stub://desk", 640, 480)?;
    source.connect()?;
    let t0 = Instant::now();

    let mut completed = None;
    let mut enrolled_id = None;
    for i in 0..5u64 {
        let report = pipeline.process_frame(&source.next_frame()?, t0 + Duration::from_secs(i))?;
        assert_eq!(report.identities.len(), 1);
        enrolled_id.get_or_insert(report.identities[0].id);
        if i < 4 {
            assert_eq!(
                report.identities[0].verdict,
                Verdict::Enrolling {
                    captured: i as usize + 1,
                    target: 5
                }
            );
            assert!(report.completed_enrollment.is_none());
        } else {
            completed = report.completed_enrollment;
        }
    }

    let completed = completed.expect("enrollment completes on the fifth sample");
    assert_eq!(completed.label, "alice");
    assert_eq!(completed.samples, 5);
    assert_eq!(completed.failed_writes, 0);
    assert!(!pipeline.enrollment_active());
    assert_eq!(pipeline.identity_count(), 0);

    for i in 0..5 {
        assert!(dir.path().join(format!("dataset/alice/{}.jpg", i)).exists());
    }
    assert!(dir.path().join("face_model.json").exists());
    assert!(dir.path().join("label_map.json").exists());

    let recognizer = Recognizer::load(recognizer_settings(dir.path()))?;
    assert!(recognizer.is_trained());
    let entry = recognizer.labels().get(0).expect("alice label");
    assert_eq!(entry.name, "alice");
    assert_eq!(entry.kind, FaceKind::User);

    let records = SqliteRecordStore::open(&db_path)?;
    let users = records.list(FaceKind::User)?;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "alice");
    assert_eq!(users[0].sex, "F");

    // Tracking restarts with a fresh identity.
    let next = pipeline.process_frame(&source.next_frame()?, t0 + Duration::from_secs(6))?;
    assert_eq!(next.identities.len(), 1);
    assert!(next.identities[0].is_new);
    assert!(Some(next.identities[0].id) > enrolled_id);

    let events: Vec<StatusEvent> = status_rx.try_iter().collect();
    assert!(events.contains(&StatusEvent::EnrollmentStarted {
        label: "alice".to_string()
    }));
    assert!(events.contains(&StatusEvent::EnrollmentCompleted {
        label: "alice".to_string(),
        samples: 5
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StatusEvent::RetrainFailed { .. })));
    Ok(())
}

#[test]
fn two_faces_keep_distinct_identities() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("sentry.db");
    let (sink, _status_rx) = status_channel();
    let mut pipeline = orchestrator(dir.path(), db.to_str().unwrap_or_default(), sink)?;

    let mut source = SyntheticSource::new("stub://hall?faces=2", 640, 480)?;
    source.connect()?;
    let t0 = Instant::now();

    let first = pipeline.process_frame(&source.next_frame()?, t0)?;
    let mut ids: Vec<_> = first.identities.iter().map(|i| i.id).collect();
    ids.sort();
    assert_eq!(ids.len(), 2);

    for n in 1..20u64 {
        let report =
            pipeline.process_frame(&source.next_frame()?, t0 + Duration::from_millis(50 * n))?;
        let mut seen: Vec<_> = report.identities.iter().map(|i| i.id).collect();
        seen.sort();
        assert_eq!(seen, ids);
        assert!(report.identities.iter().all(|i| !i.is_new));
    }
    assert_eq!(pipeline.frames_processed(), 20);
    Ok(())
}
