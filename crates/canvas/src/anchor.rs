//! Wall-clock anchoring of the evaluator's virtual simulation clock
//! (spec.md §9, "Virtual vs wall time").

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sim_core::TimeAnchor;

/// Records `T0`, the wall-clock instant the owning canvas's first generator
/// started, and converts virtual timestamps relative to it.
///
/// A fresh anchor is created on every [`crate::Canvas::use_system`] call, so
/// switching the active system also resets the simulation-start marker.
#[derive(Default)]
pub struct SimAnchor {
    t0: Mutex<Option<f64>>,
}

impl SimAnchor {
    /// Builds an anchor with no `T0` recorded yet.
    pub fn new() -> Self {
        Self { t0: Mutex::new(None) }
    }

    /// Records `now` as `T0`, if this is the first call. Idempotent.
    pub fn anchor(&self, now: f64) {
        let mut t0 = self.t0.lock().expect("anchor lock poisoned");
        if t0.is_none() {
            *t0 = Some(now);
        }
    }

    /// Whether `T0` has been recorded yet.
    pub fn is_anchored(&self) -> bool {
        self.t0.lock().expect("anchor lock poisoned").is_some()
    }
}

impl TimeAnchor for SimAnchor {
    fn to_real_time(&self, virtual_time: f64) -> f64 {
        match *self.t0.lock().expect("anchor lock poisoned") {
            Some(t0) => t0 + virtual_time,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}
