//! The labels collection: frames plus schema, video, and track registries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PoseLabelsError, Result};
use crate::frame::{FrameId, LabeledFrame, VideoId};
use crate::skeleton::{Skeleton, SkeletonId};
use crate::track::{Track, TrackId};

/// An ordered collection of labeled frames, the schemas they are keyed to,
/// and the track registry. The unit of merge operations.
///
/// Invariant: at most one frame per `(video, frame index)` pair, enforced
/// by [`Labels::add_frame`].
///
/// # Example
///
/// ```
/// use pose_labels::{Instance, LabeledFrame, Labels, Skeleton, VideoId};
///
/// # fn main() -> pose_labels::Result<()> {
/// let skeleton = Skeleton::from_names("fly", ["head"])?;
/// let mut labels = Labels::new(skeleton.clone());
///
/// let frame = LabeledFrame::new(VideoId::new(1), 0, vec![Instance::new(&skeleton)]);
/// labels.add_frame(frame)?;
///
/// assert_eq!(labels.len(), 1);
/// assert!(labels.find_frame(VideoId::new(1), 0).is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    pub(crate) skeletons: Vec<Skeleton>,
    pub(crate) videos: Vec<VideoId>,
    pub(crate) tracks: Vec<Track>,
    pub(crate) labeled_frames: Vec<LabeledFrame>,
}

impl Labels {
    /// Creates an empty collection with a primary schema.
    #[must_use]
    pub fn new(skeleton: Skeleton) -> Self {
        Self {
            skeletons: vec![skeleton],
            videos: Vec::new(),
            tracks: Vec::new(),
            labeled_frames: Vec::new(),
        }
    }

    /// Creates a collection from frames.
    ///
    /// # Errors
    ///
    /// Returns an error if two frames share a `(video, frame index)` pair.
    pub fn from_frames(skeleton: Skeleton, frames: Vec<LabeledFrame>) -> Result<Self> {
        let mut labels = Self::new(skeleton);
        for frame in frames {
            labels.add_frame(frame)?;
        }
        Ok(labels)
    }

    /// Returns the primary schema.
    #[must_use]
    pub fn skeleton(&self) -> &Skeleton {
        &self.skeletons[0]
    }

    /// Returns the primary schema mutably.
    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeletons[0]
    }

    /// Returns all registered schemas.
    #[must_use]
    pub fn skeletons(&self) -> &[Skeleton] {
        &self.skeletons
    }

    /// Registers an additional schema; ignored if its id is already known.
    pub fn add_skeleton(&mut self, skeleton: Skeleton) {
        if !self.skeletons.iter().any(|s| s.id() == skeleton.id()) {
            self.skeletons.push(skeleton);
        }
    }

    /// Gets a registered schema by id.
    #[must_use]
    pub fn skeleton_by_id(&self, id: SkeletonId) -> Option<&Skeleton> {
        self.skeletons.iter().find(|s| s.id() == id)
    }

    /// Returns the number of labeled frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labeled_frames.len()
    }

    /// Returns `true` if the collection has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labeled_frames.is_empty()
    }

    /// Returns the frames in order.
    #[must_use]
    pub fn frames(&self) -> &[LabeledFrame] {
        &self.labeled_frames
    }

    /// Gets a frame by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LabeledFrame> {
        self.labeled_frames.get(index)
    }

    /// Gets a frame mutably by position.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut LabeledFrame> {
        self.labeled_frames.get_mut(index)
    }

    /// Adds a frame, registering its video.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame with the same video and frame index
    /// already exists.
    pub fn add_frame(&mut self, frame: LabeledFrame) -> Result<FrameId> {
        if self.find_frame(frame.video(), frame.frame_idx()).is_some() {
            return Err(PoseLabelsError::duplicate_frame(
                frame.video(),
                frame.frame_idx(),
            ));
        }
        Ok(self.insert_frame_unchecked(frame))
    }

    /// Inserts a frame without the uniqueness check. Callers must have
    /// already established that no frame with this `(video, frame index)`
    /// pair exists.
    pub(crate) fn insert_frame_unchecked(&mut self, frame: LabeledFrame) -> FrameId {
        let id = frame.id();
        if !self.videos.contains(&frame.video()) {
            self.videos.push(frame.video());
        }
        debug!(frame = %id, video = %frame.video(), frame_idx = frame.frame_idx(), "adding labeled frame");
        self.labeled_frames.push(frame);
        id
    }

    /// Finds a frame by video identity and frame index.
    #[must_use]
    pub fn find_frame(&self, video: VideoId, frame_idx: u64) -> Option<&LabeledFrame> {
        self.labeled_frames
            .iter()
            .find(|f| f.video() == video && f.frame_idx() == frame_idx)
    }

    /// Finds a frame mutably by video identity and frame index.
    pub fn find_frame_mut(&mut self, video: VideoId, frame_idx: u64) -> Option<&mut LabeledFrame> {
        self.labeled_frames
            .iter_mut()
            .find(|f| f.video() == video && f.frame_idx() == frame_idx)
    }

    /// Gets a frame by its identity.
    #[must_use]
    pub fn frame_by_id(&self, id: FrameId) -> Option<&LabeledFrame> {
        self.labeled_frames.iter().find(|f| f.id() == id)
    }

    /// Gets a frame mutably by its identity.
    pub fn frame_by_id_mut(&mut self, id: FrameId) -> Option<&mut LabeledFrame> {
        self.labeled_frames.iter_mut().find(|f| f.id() == id)
    }

    /// Returns the registered videos.
    #[must_use]
    pub fn videos(&self) -> &[VideoId] {
        &self.videos
    }

    /// Returns the track registry.
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Registers a new track and returns its id.
    pub fn add_track(&mut self, name: impl Into<String>, spawned_on: u64) -> TrackId {
        let track = Track::new(name, spawned_on);
        let id = track.id();
        self.tracks.push(track);
        id
    }

    /// Gets a track by id.
    #[must_use]
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }
}

impl std::ops::Index<usize> for Labels {
    type Output = LabeledFrame;

    fn index(&self, index: usize) -> &LabeledFrame {
        &self.labeled_frames[index]
    }
}
