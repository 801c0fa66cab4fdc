//! Playback clock reconciliation.
//!
//! The server never ticks a playback timer. Every room stores a reference
//! snapshot `(position, timestamp, is_playing)` and every participant derives
//! the live position from it with [`current_position`], using its own reading
//! of "now".

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time in milliseconds since UNIX epoch.
/// A clock that went backwards past the epoch reads as 0.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Playback position in seconds at `now` for the given reference snapshot.
///
/// While playing, the elapsed time since `reference_ts` is added to the
/// reference position and the result is clamped at zero. While paused the
/// reference position is returned unchanged.
pub fn current_position(reference_position: f64, reference_ts: u64, is_playing: bool, now: u64) -> f64 {
    if !is_playing {
        return reference_position;
    }
    // Signed so that a `now` older than the reference does not wrap.
    let elapsed_ms = now as i128 - reference_ts as i128;
    (reference_position + elapsed_ms as f64 / 1000.0).max(0.0)
}
