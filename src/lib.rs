//! In-memory data model for keypoint-based pose annotation.
//!
//! This crate models annotations ("instances") of articulated subjects
//! across video frames, for manual and automated (predicted) labeling:
//!
//! # Schema Types
//!
//! - [`Skeleton`] - Mutable, ordered set of named nodes plus edges/symmetries
//! - [`Node`] / [`NodeId`] - Schema elements with rename-stable identity
//! - [`NodeKey`] - Polymorphic node addressing (identity, name, or position)
//!
//! # Annotation Types
//!
//! - [`Point`] / [`PredictedPoint`] - A keypoint with visibility flags
//!   (predicted variant adds a confidence score)
//! - [`Instance`] / [`PredictedInstance`] - One subject's points for one
//!   frame, keyed by node identity, with array-style bulk access
//! - [`Track`] - Opaque cross-frame subject identity
//!
//! # Containers
//!
//! - [`InstancesList`] - Ordered instance container maintaining the frame
//!   back-reference invariant
//! - [`LabeledFrame`] - A `(video, frame index)` pair plus its instances
//! - [`Labels`] - Frames plus schema/video/track registries
//!
//! # Merging
//!
//! - [`MergeOptions`] - Unify behavior and matching tolerance
//! - [`MergeConflict`] / [`ConflictResolution`] - Ambiguous matches are
//!   deferred to the caller, never guessed
//!
//! # Example
//!
//! ```
//! use pose_labels::{Instance, LabeledFrame, Labels, Point, Skeleton, VideoId};
//!
//! # fn main() -> pose_labels::Result<()> {
//! let mut skeleton = Skeleton::from_names("fly", ["head", "thorax"])?;
//!
//! let mut instance = Instance::new(&skeleton);
//! instance.set_point(&skeleton, "head", Point::new(10.0, 20.0))?;
//!
//! let mut labels = Labels::new(skeleton.clone());
//! labels.add_frame(LabeledFrame::new(VideoId::new(1), 0, vec![instance]))?;
//!
//! // The schema stays mutable after the fact; instances reconcile lazily.
//! skeleton.relabel_node("head", "Head")?;
//! # Ok(())
//! # }
//! ```
//!
//! Video decoding, on-disk formats, and the tracking/inference pipelines
//! are external collaborators: frames reference footage through an opaque
//! [`VideoId`], and tracks are identities attached to instances, not
//! computed here.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod error;
mod frame;
mod instance;
mod labels;
mod merge;
mod point;
mod skeleton;
mod track;

// Re-export schema types
pub use skeleton::{Node, NodeId, NodeKey, Skeleton, SkeletonId};

// Re-export annotation types
pub use instance::{AnyInstance, Instance, InstanceId, PredictedInstance};
pub use point::{Point, PredictedPoint};
pub use track::{Track, TrackId};

// Re-export containers
pub use frame::{FrameId, InstancesList, LabeledFrame, VideoId};
pub use labels::Labels;

// Re-export merge types
pub use merge::{ConflictResolution, FrameMergeResult, MergeConflict, MergeOptions, MergeResult};

// Re-export error types
pub use error::{PoseLabelsError, Result};

// Re-export nalgebra types used in the public API for convenience
pub use nalgebra::{DMatrix, Matrix2x3};
