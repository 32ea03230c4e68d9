//! Error types for the pose-labels crate.

use thiserror::Error;

use crate::frame::VideoId;

/// Errors that can occur in pose-labels operations.
#[derive(Debug, Error)]
pub enum PoseLabelsError {
    /// A node key did not resolve against the skeleton.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A positional node key was out of range.
    #[error("node index {index} out of range for skeleton with {len} nodes")]
    NodeIndexOutOfRange {
        /// The requested position.
        index: usize,
        /// Number of nodes in the skeleton.
        len: usize,
    },

    /// A node name was already present on the skeleton.
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// Vectorized access with mismatched key/value counts.
    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch {
        /// Expected count.
        expected: usize,
        /// Actual count.
        actual: usize,
    },

    /// A labeled frame already exists for this video and frame index.
    #[error("duplicate labeled frame: {video} frame {frame_idx}")]
    DuplicateFrame {
        /// Video the frame belongs to.
        video: VideoId,
        /// Frame index within the video.
        frame_idx: u64,
    },

    /// A labeled frame could not be located in the collection.
    #[error("labeled frame not found: {video} frame {frame_idx}")]
    FrameNotFound {
        /// Video the frame belongs to.
        video: VideoId,
        /// Frame index within the video.
        frame_idx: u64,
    },
}

impl PoseLabelsError {
    /// Creates an unknown-node error.
    #[must_use]
    pub fn unknown_node(key: impl Into<String>) -> Self {
        Self::UnknownNode(key.into())
    }

    /// Creates a node-index-out-of-range error.
    #[must_use]
    pub const fn node_index_out_of_range(index: usize, len: usize) -> Self {
        Self::NodeIndexOutOfRange { index, len }
    }

    /// Creates a duplicate-node error.
    #[must_use]
    pub fn duplicate_node(name: impl Into<String>) -> Self {
        Self::DuplicateNode(name.into())
    }

    /// Creates a shape-mismatch error.
    #[must_use]
    pub const fn shape_mismatch(expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch { expected, actual }
    }

    /// Creates a duplicate-frame error.
    #[must_use]
    pub const fn duplicate_frame(video: VideoId, frame_idx: u64) -> Self {
        Self::DuplicateFrame { video, frame_idx }
    }

    /// Creates a frame-not-found error.
    #[must_use]
    pub const fn frame_not_found(video: VideoId, frame_idx: u64) -> Self {
        Self::FrameNotFound { video, frame_idx }
    }
}

/// Result type for pose-labels operations.
pub type Result<T> = std::result::Result<T, PoseLabelsError>;
