//! Cross-frame identity for annotated subjects.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a tracked subject.
///
/// Track ids persist across frames to identify the same subject over time.
/// They are opaque to this crate: no tracking logic lives here, instances
/// merely reference a track by id.
///
/// # Example
///
/// ```
/// use pose_labels::TrackId;
///
/// let id = TrackId::new(42);
/// assert_eq!(id.as_u64(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(u64);

impl TrackId {
    /// Creates a track id from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for TrackId {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<TrackId> for u64 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Track({})", self.0)
    }
}

/// A registry entry associating instances of the same subject across frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    track_id: TrackId,
    name: String,
    spawned_on: u64,
}

impl Track {
    /// Creates a new track with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, spawned_on: u64) -> Self {
        Self {
            track_id: TrackId::next(),
            name: name.into(),
            spawned_on,
        }
    }

    /// Returns the track id.
    #[must_use]
    pub const fn id(&self) -> TrackId {
        self.track_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the display name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns the frame index on which the track first appears.
    #[must_use]
    pub const fn spawned_on(&self) -> u64 {
        self.spawned_on
    }
}
