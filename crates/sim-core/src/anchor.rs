//! Conversion from the evaluator's virtual simulation clock to wall-clock
//! time, anchored at the moment a canvas's first generator starts.

/// Converts a virtual timestamp into a wall-clock-anchored one.
///
/// Canvas is the sole owner of the anchor (it records `T0` at the first
/// generator start); metric-spec workers hold a handle to it only to
/// translate the virtual timestamps on the trace events they observe.
pub trait TimeAnchor: Send + Sync {
    /// Converts virtual time `t_v`, in seconds, to `T0 + t_v`. Before `T0`
    /// has been recorded, implementations fall back to the current
    /// wall-clock time.
    fn to_real_time(&self, virtual_time: f64) -> f64;
}
