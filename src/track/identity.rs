//! Identity assignment across frames.
//!
//! Each detection is matched to the nearest unclaimed identity whose last known
//! centroid lies within the match radius; otherwise a new identity is allocated.
//! Ids increase monotonically and are never reused, including after eviction.
//!
//! After association every matched identity's visual tracker is updated on the
//! frame's luma plane. A successful update is authoritative for the frame; a failed
//! update means the identity is lost for this frame and emits no box. Identities
//! created in a frame are reported even when their tracker fails on that frame.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use image::GrayImage;

use super::visual::{TrackerFactory, VisualTracker};
use crate::frame::{BoundingBox, Frame};

/// Stable identity handle.
pub type IdentityId = u64;

/// Default association radius in pixels.
pub const DEFAULT_MATCH_RADIUS_PX: f32 = 50.0;

/// One persistent face identity.
pub struct TrackedIdentity {
    pub id: IdentityId,
    /// Last known box.
    pub bbox: BoundingBox,
    tracker: Option<Box<dyn VisualTracker>>,
    pub created_at: Instant,
    /// Last frame in which this identity emitted a box.
    pub last_seen_at: Instant,
}

/// Box emitted for an identity in the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedBox {
    pub id: IdentityId,
    pub bbox: BoundingBox,
    /// True on the frame the identity was created.
    pub is_new: bool,
}

/// Result of one tracking step.
#[derive(Debug, Default)]
pub struct TrackUpdate {
    /// Identities allocated this frame, whether or not they produced a box.
    pub created: Vec<IdentityId>,
    /// Identities that produced a box this frame, in association order.
    pub boxes: Vec<TrackedBox>,
    /// Identities matched by a detection whose tracker failed.
    pub lost: Vec<IdentityId>,
    /// Identities evicted for being idle too long.
    pub evicted: Vec<IdentityId>,
}

pub struct IdentityTracker {
    identities: BTreeMap<IdentityId, TrackedIdentity>,
    next_id: IdentityId,
    match_radius: f32,
    evict_after: Option<Duration>,
    tracker_factory: TrackerFactory,
}

impl IdentityTracker {
    pub fn new(tracker_factory: TrackerFactory) -> Self {
        Self {
            identities: BTreeMap::new(),
            next_id: 0,
            match_radius: DEFAULT_MATCH_RADIUS_PX,
            evict_after: None,
            tracker_factory,
        }
    }

    pub fn with_match_radius(mut self, radius_px: f32) -> Self {
        self.match_radius = radius_px;
        self
    }

    /// Evict identities that have not emitted a box for `idle`.
    pub fn with_eviction(mut self, idle: Option<Duration>) -> Self {
        self.evict_after = idle;
        self
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, id: IdentityId) -> Option<&TrackedIdentity> {
        self.identities.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = IdentityId> + '_ {
        self.identities.keys().copied()
    }

    /// Match detections to identities. Returns `(id, detection box, is_new)` per detection.
    ///
    /// An identity can be claimed by at most one detection per call; the first
    /// detection in input order wins and later ones look for the next nearest.
    pub fn associate(
        &mut self,
        detections: &[BoundingBox],
        now: Instant,
    ) -> Vec<(IdentityId, BoundingBox, bool)> {
        let mut claimed = BTreeSet::new();
        let mut out = Vec::with_capacity(detections.len());

        for det in detections {
            let nearest = self
                .identities
                .iter()
                .filter(|(id, _)| !claimed.contains(*id))
                .map(|(id, identity)| (*id, identity.bbox.centroid_distance(det)))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((id, distance)) if distance < self.match_radius => {
                    if let Some(identity) = self.identities.get_mut(&id) {
                        identity.bbox = *det;
                    }
                    claimed.insert(id);
                    out.push((id, *det, false));
                }
                _ => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.identities.insert(
                        id,
                        TrackedIdentity {
                            id,
                            bbox: *det,
                            tracker: None,
                            created_at: now,
                            last_seen_at: now,
                        },
                    );
                    claimed.insert(id);
                    log::info!(
                        "identity {} created at ({}, {})",
                        id,
                        det.centroid().0,
                        det.centroid().1
                    );
                    out.push((id, *det, true));
                }
            }
        }

        out
    }

    /// Full tracking step: associate, update visual trackers, evict idle identities.
    pub fn track(
        &mut self,
        frame: &Frame,
        detections: &[BoundingBox],
        now: Instant,
    ) -> TrackUpdate {
        let mut update = TrackUpdate::default();
        let associations = self.associate(detections, now);
        let gray: Option<GrayImage> = (!associations.is_empty()).then(|| frame.grayscale());

        for (id, det, is_new) in associations {
            if is_new {
                update.created.push(id);
            }
            let (Some(identity), Some(gray)) = (self.identities.get_mut(&id), gray.as_ref())
            else {
                continue;
            };

            let tracker = identity.tracker.get_or_insert_with(|| {
                let mut tracker = (self.tracker_factory)();
                tracker.init(gray, det);
                tracker
            });

            match tracker.update(gray) {
                Some(bbox) => {
                    identity.bbox = bbox;
                    identity.last_seen_at = now;
                    update.boxes.push(TrackedBox { id, bbox, is_new });
                }
                None => {
                    // Re-seed from the next matching detection.
                    identity.tracker = None;
                    log::debug!("identity {} lost by visual tracker", id);
                    update.lost.push(id);
                }
            }
        }

        if let Some(idle) = self.evict_after {
            self.identities.retain(|id, identity| {
                let keep = now.saturating_duration_since(identity.last_seen_at) <= idle;
                if !keep {
                    update.evicted.push(*id);
                }
                keep
            });
            for id in &update.evicted {
                log::info!("identity {} evicted after {:?} idle", id, idle);
            }
        }

        update
    }

    /// Drop all identities. Ids keep increasing from where they were.
    pub fn reset(&mut self) {
        self.identities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::synthetic_frame;
    use crate::track::visual::template_tracker_factory;
    use std::sync::{Arc, Mutex};

    /// Tracker that echoes back its seed box, or fails if told to.
    struct EchoTracker {
        bbox: Option<BoundingBox>,
        fail: bool,
    }

    impl VisualTracker for EchoTracker {
        fn init(&mut self, _gray: &GrayImage, bbox: BoundingBox) {
            self.bbox = Some(bbox);
        }

        fn update(&mut self, _gray: &GrayImage) -> Option<BoundingBox> {
            if self.fail {
                None
            } else {
                self.bbox
            }
        }
    }

    fn echo_factory(fail: bool) -> TrackerFactory {
        Box::new(move || -> Box<dyn VisualTracker> { Box::new(EchoTracker { bbox: None, fail }) })
    }

    fn blank() -> Frame {
        synthetic_frame(64, 48, 0, &[], 0)
    }

    #[test]
    fn small_moves_keep_identity() {
        let mut tracker = IdentityTracker::new(echo_factory(false));
        let now = Instant::now();
        let first = tracker.associate(&[BoundingBox::new(100, 100, 40, 40)], now);
        assert_eq!(first, vec![(0, BoundingBox::new(100, 100, 40, 40), true)]);

        let mut x = 100;
        for _ in 0..20 {
            x += 30;
            let out = tracker.associate(&[BoundingBox::new(x, 100, 40, 40)], now);
            assert_eq!(out[0].0, 0);
            assert!(!out[0].2);
        }
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn large_jumps_allocate_new_ids() {
        let mut tracker = IdentityTracker::new(echo_factory(false));
        let now = Instant::now();
        let mut ids = Vec::new();
        for step in 0..5 {
            let out = tracker.associate(&[BoundingBox::new(step * 120, 0, 40, 40)], now);
            ids.push(out[0].0);
        }
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn first_detection_claims_contested_identity() {
        let mut tracker = IdentityTracker::new(echo_factory(false));
        let now = Instant::now();
        tracker.associate(&[BoundingBox::new(100, 100, 40, 40)], now);

        let out = tracker.associate(
            &[
                BoundingBox::new(110, 100, 40, 40),
                BoundingBox::new(90, 100, 40, 40),
            ],
            now,
        );
        assert_eq!(out[0].0, 0);
        assert_eq!(out[1].0, 1);
        assert!(out[1].2);
    }

    #[test]
    fn failed_tracker_emits_no_box_but_keeps_identity() {
        let mut tracker = IdentityTracker::new(echo_factory(true));
        let now = Instant::now();
        let update = tracker.track(&blank(), &[BoundingBox::new(10, 10, 20, 20)], now);
        assert!(update.boxes.is_empty());
        assert_eq!(update.created, vec![0]);
        assert_eq!(update.lost, vec![0]);
        assert_eq!(tracker.len(), 1);

        let again = tracker.track(&blank(), &[BoundingBox::new(12, 10, 20, 20)], now);
        assert!(again.created.is_empty());
        assert_eq!(again.lost, vec![0]);
        assert_eq!(tracker.len(), 1);
    }

    /// Records the size of every plane it is handed.
    struct PlaneRecorder {
        planes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl VisualTracker for PlaneRecorder {
        fn init(&mut self, gray: &GrayImage, _bbox: BoundingBox) {
            self.planes.lock().unwrap().push(gray.dimensions());
        }

        fn update(&mut self, gray: &GrayImage) -> Option<BoundingBox> {
            self.planes.lock().unwrap().push(gray.dimensions());
            None
        }
    }

    #[test]
    fn every_identity_tracks_on_the_frame_luma() {
        let planes = Arc::new(Mutex::new(Vec::new()));
        let recorded = planes.clone();
        let mut tracker = IdentityTracker::new(Box::new(move || -> Box<dyn VisualTracker> {
            Box::new(PlaneRecorder {
                planes: recorded.clone(),
            })
        }));
        let now = Instant::now();
        let update = tracker.track(
            &blank(),
            &[BoundingBox::new(0, 0, 10, 10), BoundingBox::new(40, 30, 10, 10)],
            now,
        );
        assert_eq!(update.created, vec![0, 1]);
        assert_eq!(*planes.lock().unwrap(), vec![(64, 48); 4]);

        let empty = tracker.track(&blank(), &[], now);
        assert!(empty.created.is_empty());
        assert_eq!(planes.lock().unwrap().len(), 4);
    }

    #[test]
    fn idle_identities_are_evicted_and_ids_not_reused() {
        let mut tracker =
            IdentityTracker::new(echo_factory(false)).with_eviction(Some(Duration::from_secs(5)));
        let t0 = Instant::now();
        tracker.track(&blank(), &[BoundingBox::new(10, 10, 20, 20)], t0);

        let later = t0 + Duration::from_secs(6);
        let update = tracker.track(&blank(), &[], later);
        assert_eq!(update.evicted, vec![0]);
        assert!(tracker.is_empty());

        let update = tracker.track(&blank(), &[BoundingBox::new(10, 10, 20, 20)], later);
        assert_eq!(update.boxes[0].id, 1);
    }

    #[test]
    fn template_tracker_output_is_authoritative() {
        let mut tracker = IdentityTracker::new(template_tracker_factory());
        let now = Instant::now();
        let frame = synthetic_frame(
            320,
            240,
            20,
            &[(BoundingBox::new(100, 100, 40, 40), [240, 240, 240])],
            1,
        );
        let update = tracker.track(&frame, &[BoundingBox::new(100, 100, 40, 40)], now);
        assert_eq!(update.boxes.len(), 1);
        assert_eq!(update.boxes[0].bbox, BoundingBox::new(100, 100, 40, 40));
    }
}
