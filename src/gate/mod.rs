//! Recognition gate: per-identity escalation and enrollment.
//!
//! Every identity starts `Unrecognized` with its recognition clock set at creation.
//! A face recognized as a User refreshes the clock; a face recognized as an Enemy
//! locks immediately; a face that goes unrecognized for longer than the lock window
//! locks as an unknown hostile. `Locked` is terminal for the identity.
//!
//! Enrollment is orthogonal to escalation. While a session is bound to an identity,
//! each frame's crop of that identity is stored as a training sample and recognizer
//! output for it is ignored. The session ends on the final sample and the caller is
//! told to retrain.

mod samples;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub use samples::{DatasetSampleStore, SampleStore};

use crate::recognize::{FaceKind, FaceRecognizer, Recognition};
use crate::track::IdentityId;

/// Label given to faces locked by timeout.
pub const UNKNOWN_HOSTILE_LABEL: &str = "ENEMY";
pub const DEFAULT_LOCK_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_ENROLLMENT_SAMPLES: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationState {
    Unrecognized,
    Locked,
}

/// Per-identity gate state.
#[derive(Clone, Debug)]
pub struct GateEntry {
    pub state: EscalationState,
    /// Last successful User recognition, or creation.
    pub last_recognized_at: Instant,
    pub label: Option<String>,
    pub locked_at: Option<Instant>,
}

/// What the gate concluded about an identity this frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Recognized as a known user.
    Identified { name: String },
    /// Unknown; locks when `remaining` runs out.
    Countdown { remaining: Duration },
    Locked { label: String },
    /// Sample captured for enrollment.
    Enrolling { captured: usize, target: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub label: String,
    pub sex: String,
    /// Identity to enroll. `None`, or an id that is not being tracked, binds to the
    /// first identity evaluated afterwards.
    pub identity: Option<IdentityId>,
}

/// Emitted once when the final sample of a session has been captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedEnrollment {
    pub label: String,
    pub sex: String,
    pub identity: IdentityId,
    pub samples: usize,
    pub failed_writes: usize,
}

#[derive(Clone, Debug)]
struct EnrollmentSession {
    request: EnrollmentRequest,
    bound: Option<IdentityId>,
    captured: usize,
    failed_writes: usize,
}

/// Outcome of evaluating one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: Verdict,
    /// True on the frame an identity transitions to Locked.
    pub newly_locked: bool,
    pub completed: Option<CompletedEnrollment>,
}

#[derive(Clone, Copy, Debug)]
pub struct GateSettings {
    pub lock_after: Duration,
    pub enrollment_samples: usize,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            lock_after: DEFAULT_LOCK_AFTER,
            enrollment_samples: DEFAULT_ENROLLMENT_SAMPLES,
        }
    }
}

pub struct RecognitionGate {
    settings: GateSettings,
    entries: BTreeMap<IdentityId, GateEntry>,
    enrollment: Option<EnrollmentSession>,
}

impl RecognitionGate {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            entries: BTreeMap::new(),
            enrollment: None,
        }
    }

    /// Start the recognition clock for a new identity.
    pub fn register(&mut self, id: IdentityId, now: Instant) {
        self.entries.entry(id).or_insert_with(|| GateEntry {
            state: EscalationState::Unrecognized,
            last_recognized_at: now,
            label: None,
            locked_at: None,
        });
    }

    pub fn entry(&self, id: IdentityId) -> Option<&GateEntry> {
        self.entries.get(&id)
    }

    pub fn forget(&mut self, id: IdentityId) {
        self.entries.remove(&id);
        if let Some(session) = &self.enrollment {
            if session.bound == Some(id) {
                log::warn!(
                    "enrollment for '{}' lost its identity {}; rebinding on next face",
                    session.request.label,
                    id
                );
                self.enrollment = self.enrollment.take().map(|mut s| {
                    s.bound = None;
                    s
                });
            }
        }
    }

    /// Clear all identity state and any enrollment session.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.enrollment = None;
    }

    pub fn enrollment_active(&self) -> bool {
        self.enrollment.is_some()
    }

    pub fn start_enrollment(&mut self, request: EnrollmentRequest) -> Result<()> {
        if let Some(active) = &self.enrollment {
            return Err(anyhow!(
                "enrollment for '{}' already in progress",
                active.request.label
            ));
        }
        if request.label.trim().is_empty() {
            return Err(anyhow!("enrollment label must not be empty"));
        }
        log::info!(
            "enrollment started for '{}' ({} samples)",
            request.label,
            self.settings.enrollment_samples
        );
        self.enrollment = Some(EnrollmentSession {
            bound: request.identity,
            request,
            captured: 0,
            failed_writes: 0,
        });
        Ok(())
    }

    pub fn cancel_enrollment(&mut self) -> bool {
        self.enrollment.take().is_some()
    }

    /// Evaluate one identity for which a box (and crop) is available this frame.
    pub fn evaluate(
        &mut self,
        id: IdentityId,
        crop: &RgbImage,
        now: Instant,
        recognizer: &dyn FaceRecognizer,
        samples: &mut dyn SampleStore,
    ) -> GateOutcome {
        self.register(id, now);

        if let Some((verdict, completed)) = self.capture_if_enrolling(id, crop, samples) {
            return GateOutcome {
                verdict,
                newly_locked: false,
                completed,
            };
        }

        let lock_after = self.settings.lock_after;
        let Some(entry) = self.entries.get_mut(&id) else {
            // register() above guarantees presence
            return GateOutcome {
                verdict: Verdict::Countdown {
                    remaining: lock_after,
                },
                newly_locked: false,
                completed: None,
            };
        };

        if entry.state == EscalationState::Locked {
            return GateOutcome {
                verdict: Verdict::Locked {
                    label: entry
                        .label
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_HOSTILE_LABEL.to_string()),
                },
                newly_locked: false,
                completed: None,
            };
        }

        match recognizer.recognize(crop) {
            Recognition::Recognized {
                name,
                kind: FaceKind::Enemy,
            } => {
                lock(entry, id, &name, now);
                GateOutcome {
                    verdict: Verdict::Locked { label: name },
                    newly_locked: true,
                    completed: None,
                }
            }
            Recognition::Recognized {
                name,
                kind: FaceKind::User,
            } => {
                entry.last_recognized_at = now;
                entry.label = Some(name.clone());
                GateOutcome {
                    verdict: Verdict::Identified { name },
                    newly_locked: false,
                    completed: None,
                }
            }
            Recognition::Unrecognized => {
                let elapsed = now.saturating_duration_since(entry.last_recognized_at);
                if elapsed > lock_after {
                    lock(entry, id, UNKNOWN_HOSTILE_LABEL, now);
                    GateOutcome {
                        verdict: Verdict::Locked {
                            label: UNKNOWN_HOSTILE_LABEL.to_string(),
                        },
                        newly_locked: true,
                        completed: None,
                    }
                } else {
                    GateOutcome {
                        verdict: Verdict::Countdown {
                            remaining: lock_after.saturating_sub(elapsed),
                        },
                        newly_locked: false,
                        completed: None,
                    }
                }
            }
        }
    }

    fn capture_if_enrolling(
        &mut self,
        id: IdentityId,
        crop: &RgbImage,
        samples: &mut dyn SampleStore,
    ) -> Option<(Verdict, Option<CompletedEnrollment>)> {
        let target = self.settings.enrollment_samples;
        let session = self.enrollment.as_mut()?;
        match session.bound {
            Some(bound) if bound != id && self.entries.contains_key(&bound) => return None,
            Some(bound) if bound != id => {
                log::warn!(
                    "enrollment for '{}' requested identity {} which is not tracked; binding to {}",
                    session.request.label,
                    bound,
                    id
                );
                session.bound = Some(id);
            }
            Some(_) => {}
            None => {
                log::info!(
                    "enrollment for '{}' bound to identity {}",
                    session.request.label,
                    id
                );
                session.bound = Some(id);
            }
        }

        if let Err(e) = samples.save(&session.request.label, session.captured, crop) {
            log::warn!(
                "enrollment sample {} for '{}' not saved: {:#}",
                session.captured,
                session.request.label,
                e
            );
            session.failed_writes += 1;
        }
        session.captured += 1;
        let captured = session.captured;

        let completed = if captured >= target {
            let session = self.enrollment.take()?;
            log::info!(
                "enrollment finished for '{}' ({} samples, {} failed writes)",
                session.request.label,
                session.captured,
                session.failed_writes
            );
            Some(CompletedEnrollment {
                label: session.request.label,
                sex: session.request.sex,
                identity: id,
                samples: session.captured,
                failed_writes: session.failed_writes,
            })
        } else {
            None
        };

        Some((Verdict::Enrolling { captured, target }, completed))
    }
}

fn lock(entry: &mut GateEntry, id: IdentityId, label: &str, now: Instant) {
    entry.state = EscalationState::Locked;
    entry.label = Some(label.to_string());
    entry.locked_at = Some(now);
    log::info!("identity {} locked as {}", id, label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct ScriptedRecognizer(Recognition);

    impl FaceRecognizer for ScriptedRecognizer {
        fn recognize(&self, _crop: &RgbImage) -> Recognition {
            self.0.clone()
        }

        fn retrain(&mut self, _enemies: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }

        fn reclassify(&mut self, _name: &str, _kind: FaceKind) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        saved: Vec<(String, usize)>,
        fail: bool,
    }

    impl SampleStore for CountingStore {
        fn save(&mut self, label: &str, index: usize, _crop: &RgbImage) -> Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.saved.push((label.to_string(), index));
            Ok(())
        }
    }

    fn crop() -> RgbImage {
        RgbImage::new(8, 8)
    }

    fn unknown() -> ScriptedRecognizer {
        ScriptedRecognizer(Recognition::Unrecognized)
    }

    #[test]
    fn unknown_face_locks_only_after_window() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.register(7, t0);

        let before = gate.evaluate(7, &crop(), t0 + Duration::from_millis(29_990), &unknown(), &mut store);
        assert_eq!(
            before.verdict,
            Verdict::Countdown {
                remaining: Duration::from_millis(10)
            }
        );
        assert_eq!(gate.entry(7).unwrap().state, EscalationState::Unrecognized);

        let after = gate.evaluate(7, &crop(), t0 + Duration::from_millis(30_010), &unknown(), &mut store);
        assert_eq!(
            after.verdict,
            Verdict::Locked {
                label: UNKNOWN_HOSTILE_LABEL.to_string()
            }
        );
        assert!(after.newly_locked);
    }

    #[test]
    fn user_recognition_resets_clock() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.register(1, t0);

        let alice = ScriptedRecognizer(Recognition::Recognized {
            name: "alice".to_string(),
            kind: FaceKind::User,
        });
        let seen = gate.evaluate(1, &crop(), t0 + Duration::from_secs(20), &alice, &mut store);
        assert_eq!(
            seen.verdict,
            Verdict::Identified {
                name: "alice".to_string()
            }
        );

        let later = gate.evaluate(1, &crop(), t0 + Duration::from_secs(45), &unknown(), &mut store);
        assert_eq!(
            later.verdict,
            Verdict::Countdown {
                remaining: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn enemy_locks_immediately_and_stays_locked() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        let mallory = ScriptedRecognizer(Recognition::Recognized {
            name: "mallory".to_string(),
            kind: FaceKind::Enemy,
        });
        let outcome = gate.evaluate(3, &crop(), t0, &mallory, &mut store);
        assert!(outcome.newly_locked);

        let user = ScriptedRecognizer(Recognition::Recognized {
            name: "mallory".to_string(),
            kind: FaceKind::User,
        });
        let again = gate.evaluate(3, &crop(), t0 + Duration::from_secs(1), &user, &mut store);
        assert_eq!(
            again.verdict,
            Verdict::Locked {
                label: "mallory".to_string()
            }
        );
        assert!(!again.newly_locked);
    }

    #[test]
    fn countdown_floors_at_zero_on_boundary() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.register(2, t0);
        let at = gate.evaluate(2, &crop(), t0 + DEFAULT_LOCK_AFTER, &unknown(), &mut store);
        assert_eq!(
            at.verdict,
            Verdict::Countdown {
                remaining: Duration::ZERO
            }
        );
    }

    #[test]
    fn enrollment_captures_exact_sample_count_then_completes_once() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.start_enrollment(EnrollmentRequest {
            label: "dana".to_string(),
            sex: "F".to_string(),
            identity: None,
        })
        .unwrap();

        let mut completions = Vec::new();
        for frame in 0..101u64 {
            let now = t0 + Duration::from_secs(frame);
            let outcome = gate.evaluate(0, &crop(), now, &unknown(), &mut store);
            if let Some(done) = outcome.completed {
                completions.push((frame, done));
            }
        }

        assert_eq!(store.saved.len(), 100);
        assert_eq!(store.saved.last(), Some(&("dana".to_string(), 99)));
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, 99);
        assert_eq!(completions[0].1.samples, 100);
        assert!(!gate.enrollment_active());
    }

    #[test]
    fn enrollment_ignores_other_identities_and_skips_escalation() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.register(5, t0);
        gate.start_enrollment(EnrollmentRequest {
            label: "erin".to_string(),
            sex: String::new(),
            identity: Some(5),
        })
        .unwrap();

        let late = t0 + Duration::from_secs(120);
        let outcome = gate.evaluate(5, &crop(), late, &unknown(), &mut store);
        assert_eq!(
            outcome.verdict,
            Verdict::Enrolling {
                captured: 1,
                target: 100
            }
        );
        assert_eq!(gate.entry(5).unwrap().state, EscalationState::Unrecognized);

        gate.register(6, t0);
        let other = gate.evaluate(6, &crop(), late, &unknown(), &mut store);
        assert!(other.newly_locked);
        assert_eq!(store.saved.len(), 1);
    }

    #[test]
    fn untracked_requested_identity_rebinds_to_next_face() {
        let mut gate = RecognitionGate::new(GateSettings {
            lock_after: DEFAULT_LOCK_AFTER,
            enrollment_samples: 2,
        });
        let mut store = CountingStore::default();
        let t0 = Instant::now();
        gate.start_enrollment(EnrollmentRequest {
            label: "hana".to_string(),
            sex: String::new(),
            identity: Some(42),
        })
        .unwrap();

        let first = gate.evaluate(3, &crop(), t0, &unknown(), &mut store);
        assert_eq!(
            first.verdict,
            Verdict::Enrolling {
                captured: 1,
                target: 2
            }
        );
        let done = gate
            .evaluate(3, &crop(), t0, &unknown(), &mut store)
            .completed
            .expect("session should complete on the rebound identity");
        assert_eq!(done.identity, 3);
        assert_eq!(store.saved, vec![("hana".to_string(), 0), ("hana".to_string(), 1)]);
    }

    #[test]
    fn failed_sample_writes_still_count_toward_cap() {
        let mut gate = RecognitionGate::new(GateSettings {
            lock_after: DEFAULT_LOCK_AFTER,
            enrollment_samples: 3,
        });
        let mut store = CountingStore {
            fail: true,
            ..CountingStore::default()
        };
        let t0 = Instant::now();
        gate.start_enrollment(EnrollmentRequest {
            label: "frank".to_string(),
            sex: String::new(),
            identity: None,
        })
        .unwrap();
        let mut done = None;
        for _ in 0..3 {
            done = gate.evaluate(0, &crop(), t0, &unknown(), &mut store).completed;
        }
        let done = done.expect("session should complete");
        assert_eq!(done.failed_writes, 3);
        assert!(!gate.enrollment_active());
    }

    #[test]
    fn second_enrollment_is_rejected_while_active() {
        let mut gate = RecognitionGate::new(GateSettings::default());
        let request = EnrollmentRequest {
            label: "gus".to_string(),
            sex: String::new(),
            identity: None,
        };
        gate.start_enrollment(request.clone()).unwrap();
        assert!(gate.start_enrollment(request).is_err());
        assert!(gate.cancel_enrollment());
    }
}
