//! Multi-face tracking: identity assignment plus per-identity visual trackers.

mod identity;
mod visual;

pub use identity::{
    IdentityId, IdentityTracker, TrackUpdate, TrackedBox, TrackedIdentity,
    DEFAULT_MATCH_RADIUS_PX,
};
pub use visual::{template_tracker_factory, TemplateTracker, TrackerFactory, VisualTracker};
