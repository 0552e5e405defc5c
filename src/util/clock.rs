//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as recorded in task snapshots.
pub type Timestamp = u128;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than an error.
#[must_use]
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
