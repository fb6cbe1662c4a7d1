//! Echo and duplicate suppression
//!
//! Applying a remote `videoState` makes the local player fire its own
//! pause/resume/seek events. Those must not be sent back, otherwise two peers
//! bounce the same state between each other forever. The deduplicator keeps
//! the last event we sent and the last event we received and refuses to
//! broadcast a candidate that matches either.

use tracing::debug;

use super::protocol::{PlaybackState, SyncEvent};

/// Last sent / last received events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupState {
    pub last_sent: Option<SyncEvent>,
    pub last_received: Option<SyncEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct EventDeduplicator {
    state: DedupState,
    /// Max position difference (seconds) still treated as "the same state".
    /// Zero means exact equality.
    tolerance: f64,
}

impl EventDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            state: DedupState::default(),
            tolerance: if tolerance.is_finite() {
                tolerance.max(0.0)
            } else {
                0.0
            },
        }
    }

    /// Decide whether a locally observed state goes out.
    ///
    /// Records the candidate as `last_sent` when it does.
    pub fn should_broadcast(&mut self, candidate: &PlaybackState) -> bool {
        if self.matches(self.state.last_received.as_ref(), candidate) {
            debug!(
                "Not sending {:?}: equals last received event (echo)",
                candidate
            );
            return false;
        }
        if self.matches(self.state.last_sent.as_ref(), candidate) {
            debug!("Not sending {:?}: already sent", candidate);
            return false;
        }

        self.state.last_sent = Some(SyncEvent::VideoState(*candidate));
        true
    }

    /// Mark an inbound event as applied. Must run before the event reaches the player.
    pub fn record_received(&mut self, event: SyncEvent) {
        self.state.last_received = Some(event);
    }

    pub fn state(&self) -> &DedupState {
        &self.state
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn matches(&self, previous: Option<&SyncEvent>, candidate: &PlaybackState) -> bool {
        match previous {
            Some(SyncEvent::VideoState(prev)) => {
                if self.tolerance == 0.0 {
                    prev == candidate
                } else {
                    prev.paused == candidate.paused
                        && (prev.position - candidate.position).abs() <= self.tolerance
                }
            }
            _ => false,
        }
    }
}
