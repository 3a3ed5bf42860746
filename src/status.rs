//! Status signals raised at collaborator boundaries.
//!
//! Boundary failures never unwind into the tracking or motion logic. They are
//! logged where they happen and forwarded here for whoever drives the process.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::track::IdentityId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    ActuatorConnected { port: String },
    /// Sent once at startup when the actuator cannot be reached.
    ActuatorInactive { reason: String },
    /// Actuator writes started failing after a successful connect.
    ActuatorLost { reason: String },
    DetectorFailed { reason: String },
    RecognizerUnavailable,
    IdentityLocked { id: IdentityId, label: String },
    EnrollmentStarted { label: String },
    EnrollmentCompleted { label: String, samples: usize },
    RetrainFailed { reason: String },
    RecordStoreFailed { reason: String },
}

/// Sending half handed to components. Sends to a dropped receiver are ignored.
#[derive(Clone, Debug)]
pub struct StatusSink {
    tx: Option<Sender<StatusEvent>>,
}

impl StatusSink {
    /// Sink that drops every event.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

pub fn status_channel() -> (StatusSink, Receiver<StatusEvent>) {
    let (tx, rx) = channel();
    (StatusSink { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, rx) = status_channel();
        sink.send(StatusEvent::RecognizerUnavailable);
        sink.send(StatusEvent::EnrollmentStarted {
            label: "ana".to_string(),
        });
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], StatusEvent::RecognizerUnavailable);
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (sink, rx) = status_channel();
        drop(rx);
        sink.send(StatusEvent::RecognizerUnavailable);
        StatusSink::disconnected().send(StatusEvent::RecognizerUnavailable);
    }
}
