//! Merging two label collections while preserving provenance.
//!
//! Merging reconciles a base collection (typically human-corrected labels)
//! with a new one (typically fresh predictions). Coincident duplicates of
//! the same kind collapse; a user label coinciding with a prediction keeps
//! both and records provenance; ambiguous matches are never guessed — they
//! come back as [`MergeConflict`] records for the caller to resolve.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PoseLabelsError, Result};
use crate::frame::{FrameId, LabeledFrame, VideoId};
use crate::instance::{AnyInstance, InstanceId};
use crate::labels::Labels;
use crate::skeleton::{NodeId, Skeleton, SkeletonId};

/// Options controlling a collection merge.
///
/// # Example
///
/// ```
/// use pose_labels::MergeOptions;
///
/// // Match schemas by node name, with a half-pixel matching tolerance.
/// let options = MergeOptions::new(true).with_tolerance(0.5);
/// assert!((options.tolerance - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Match skeletons by node names rather than identities, re-keying
    /// incoming points onto the base schema.
    pub unify: bool,
    /// Absolute coordinate tolerance of the instance matching rule.
    /// `0.0` requires exact equality.
    pub tolerance: f64,
}

impl MergeOptions {
    /// Creates options with the given unify behavior and exact matching.
    #[must_use]
    pub const fn new(unify: bool) -> Self {
        Self {
            unify,
            tolerance: 0.0,
        }
    }

    /// Sets the matching tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::new(true)
    }
}

/// The outcome of merging one frame into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMergeResult {
    /// Ids of the incoming instances that were added to the base frame.
    pub merged: Vec<InstanceId>,
    /// Ambiguous matches deferred to the caller.
    pub conflicts: Vec<MergeConflict>,
}

/// An ambiguous instance match deferred to the caller.
///
/// Produced when an incoming instance coincides with more than one existing
/// instance; the incoming instance is carried in the record (detached) and
/// is not added to the frame until resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Video of the affected frame.
    pub video: VideoId,
    /// Frame index of the affected frame.
    pub frame_idx: u64,
    /// Identity of the affected frame.
    pub frame: FrameId,
    /// The existing instances the incoming one coincided with.
    pub candidates: Vec<InstanceId>,
    /// The incoming instance awaiting a decision.
    pub instance: AnyInstance,
}

/// A caller decision for one [`MergeConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Remove the matched candidates and keep the incoming instance.
    #[default]
    ReplaceWithNew,
    /// Keep the frame as it is and drop the incoming instance.
    KeepExisting,
    /// Keep the candidates and add the incoming instance alongside them.
    KeepBoth,
}

/// The outcome of merging one collection into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Frames that did not exist in the base collection and were created.
    pub new_frames: Vec<FrameId>,
    /// Ambiguous matches deferred to the caller, across all frames.
    pub conflicts: Vec<MergeConflict>,
}

impl LabeledFrame {
    /// Merges another frame's instances into this frame.
    ///
    /// Both frames must describe the same video and frame index; instances
    /// are expected to be keyed to the given schema (instances keyed to an
    /// unrelated schema never coincide and are appended as-is).
    ///
    /// Matching is by coincidence of placed-point coordinate sets within
    /// `tolerance`, irrespective of instance kind:
    ///
    /// - no coincident instance: the incoming instance is appended;
    /// - one coincident instance of the same kind: a genuine duplicate —
    ///   the existing instance is kept, the incoming one is dropped;
    /// - one coincident instance of the other kind: both are retained, and
    ///   the user instance's provenance link is set to the prediction;
    /// - several coincident instances: ambiguous — deferred as a
    ///   [`MergeConflict`], leaving the frame untouched.
    pub fn complex_frame_merge(
        &mut self,
        mut other: LabeledFrame,
        skeleton: &Skeleton,
        tolerance: f64,
    ) -> FrameMergeResult {
        debug!(
            base = %self.id(),
            incoming = %other.id(),
            frame_idx = self.frame_idx(),
            "merging labeled frames"
        );

        for instance in self.instances_mut().iter_mut() {
            if instance.skeleton_id() == skeleton.id() {
                instance.sync(skeleton);
            }
        }

        let mut merged = Vec::new();
        let mut conflicts = Vec::new();

        for mut incoming in other.instances_mut().take_all() {
            if incoming.skeleton_id() == skeleton.id() {
                incoming.sync(skeleton);
            }

            let candidates: Vec<usize> = self
                .instances()
                .iter()
                .enumerate()
                .filter(|(_, base)| base.coincides_with(&incoming, tolerance))
                .map(|(index, _)| index)
                .collect();

            match candidates.as_slice() {
                [] => {
                    merged.push(incoming.id());
                    self.push_instance(incoming);
                }
                &[index] => {
                    let base_id = self[index].id();
                    let base_is_user = self[index].is_user();
                    if base_is_user && incoming.is_predicted() {
                        // A correction coinciding with the prediction it
                        // stems from: keep both, record the provenance.
                        if let Some(user) = self.get_mut(index).and_then(AnyInstance::as_user_mut)
                        {
                            user.set_from_predicted(Some(incoming.id()));
                        }
                        merged.push(incoming.id());
                        self.push_instance(incoming);
                    } else if !base_is_user && incoming.is_user() {
                        if let Some(user) = incoming.as_user_mut() {
                            user.set_from_predicted(Some(base_id));
                        }
                        merged.push(incoming.id());
                        self.push_instance(incoming);
                    } else {
                        debug!(base = %base_id, duplicate = %incoming.id(), "collapsing duplicate instance");
                    }
                }
                _ => {
                    let candidates = candidates.iter().map(|&index| self[index].id()).collect();
                    conflicts.push(MergeConflict {
                        video: self.video(),
                        frame_idx: self.frame_idx(),
                        frame: self.id(),
                        candidates,
                        instance: incoming,
                    });
                }
            }
        }

        FrameMergeResult { merged, conflicts }
    }
}

impl Labels {
    /// Merges another collection into this one.
    ///
    /// For every frame of `new_labels`, the matching base frame is located
    /// by video identity and frame index — or created, with created frames
    /// reported in the result — and the frame merge rule is applied.
    ///
    /// With `options.unify`, incoming skeletons are matched to the base
    /// schema by node *names* instead of identities: nodes missing from
    /// the base schema are added to it, and incoming points are re-keyed
    /// onto it. Without unify, incoming skeletons are registered alongside
    /// the base one.
    ///
    /// Track registries are merged, deduplicated by id. Ambiguous instance
    /// matches are returned as conflicts; resolve them with
    /// [`Labels::finish_complex_merge`].
    pub fn complex_merge_between(&mut self, new_labels: Labels, options: &MergeOptions) -> MergeResult {
        let Labels {
            skeletons: new_skeletons,
            videos: _,
            tracks: new_tracks,
            labeled_frames: new_frames,
        } = new_labels;

        for track in new_tracks {
            if self.tracks.iter().all(|t| t.id() != track.id()) {
                self.tracks.push(track);
            }
        }

        // Node-id translation maps, one per incoming schema to unify.
        let mut rekey_maps: HashMap<SkeletonId, HashMap<NodeId, NodeId>> = HashMap::new();
        if options.unify {
            for incoming in &new_skeletons {
                if incoming.id() == self.skeletons[0].id() {
                    continue;
                }
                let mut map = HashMap::new();
                for node in incoming.nodes() {
                    let target = match self.skeletons[0].index_of(node.name()) {
                        Some(pos) => self.skeletons[0].nodes()[pos].id(),
                        None => match self.skeletons[0].add_node(node.name()) {
                            Ok(id) => id,
                            Err(_) => continue,
                        },
                    };
                    map.insert(node.id(), target);
                }
                rekey_maps.insert(incoming.id(), map);
            }
        } else {
            for skeleton in new_skeletons {
                self.add_skeleton(skeleton);
            }
        }

        let primary = self.skeletons[0].clone();

        debug!(
            frames = new_frames.len(),
            unify = options.unify,
            tolerance = options.tolerance,
            "merging label collections"
        );

        let mut new_frame_ids = Vec::new();
        let mut conflicts = Vec::new();

        for mut frame in new_frames {
            for instance in frame.instances_mut().iter_mut() {
                if let Some(map) = rekey_maps.get(&instance.skeleton_id()) {
                    instance.rekey(map, &primary);
                }
            }

            let existing = self
                .labeled_frames
                .iter()
                .position(|f| f.video() == frame.video() && f.frame_idx() == frame.frame_idx());
            match existing {
                Some(pos) => {
                    let outcome = self.labeled_frames[pos].complex_frame_merge(
                        frame,
                        &primary,
                        options.tolerance,
                    );
                    conflicts.extend(outcome.conflicts);
                }
                None => {
                    new_frame_ids.push(self.insert_frame_unchecked(frame));
                }
            }
        }

        MergeResult {
            new_frames: new_frame_ids,
            conflicts,
        }
    }

    /// Applies caller decisions to deferred merge conflicts.
    ///
    /// # Errors
    ///
    /// Returns an error if a conflict's frame no longer exists in the
    /// collection.
    pub fn finish_complex_merge<I>(&mut self, resolutions: I) -> Result<()>
    where
        I: IntoIterator<Item = (MergeConflict, ConflictResolution)>,
    {
        for (conflict, resolution) in resolutions {
            let frame = self
                .frame_by_id_mut(conflict.frame)
                .ok_or(PoseLabelsError::FrameNotFound {
                    video: conflict.video,
                    frame_idx: conflict.frame_idx,
                })?;
            debug!(frame = %conflict.frame, ?resolution, "resolving merge conflict");
            match resolution {
                ConflictResolution::KeepExisting => {}
                ConflictResolution::KeepBoth => {
                    frame.push_instance(conflict.instance);
                }
                ConflictResolution::ReplaceWithNew => {
                    for id in &conflict.candidates {
                        frame.remove_instance(*id);
                    }
                    frame.push_instance(conflict.instance);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::instance::{Instance, PredictedInstance};
    use crate::point::{Point, PredictedPoint};

    fn sample_skeleton() -> Skeleton {
        Skeleton::from_names("fly", ["head", "thorax"]).unwrap()
    }

    fn user_at(skel: &Skeleton, x: f64, y: f64) -> Instance {
        Instance::with_points(skel, [("head", Point::new(x, y))]).unwrap()
    }

    fn predicted_at(skel: &Skeleton, x: f64, y: f64) -> PredictedInstance {
        PredictedInstance::with_points(skel, [("head", PredictedPoint::new(x, y, 1.0))], 1.0)
            .unwrap()
    }

    #[test]
    fn frame_merge_keeps_coincident_user_and_predicted() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let user = user_at(&skel, 1.0, 2.0);
        let user_id = user.id();
        let mut user_frame = LabeledFrame::new(video, 0, vec![user]);

        let pred = predicted_at(&skel, 1.0, 2.0);
        let pred_id = pred.id();
        let pred_frame = LabeledFrame::new(video, 0, vec![pred]);

        let result = user_frame.complex_frame_merge(pred_frame, &skel, 0.0);

        assert!(result.conflicts.is_empty());
        assert_eq!(result.merged, vec![pred_id]);
        assert_eq!(user_frame.len(), 2);
        assert!(user_frame.index_of(user_id).is_some());
        assert!(user_frame.index_of(pred_id).is_some());

        // Both instances now live on the user frame.
        for inst in user_frame.instances() {
            assert_eq!(inst.frame(), Some(user_frame.id()));
        }

        // The user instance records where the coincident prediction came from.
        let user = user_frame.user_instances()[0];
        assert_eq!(user.from_predicted(), Some(pred_id));
    }

    #[test]
    fn frame_merge_collapses_same_kind_duplicates() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let base = user_at(&skel, 1.0, 2.0);
        let base_id = base.id();
        let mut base_frame = LabeledFrame::new(video, 0, vec![base]);

        let duplicate = user_at(&skel, 1.0, 2.0);
        let incoming = LabeledFrame::new(video, 0, vec![duplicate]);

        let result = base_frame.complex_frame_merge(incoming, &skel, 0.0);

        assert!(result.merged.is_empty());
        assert!(result.conflicts.is_empty());
        assert_eq!(base_frame.len(), 1);
        assert_eq!(base_frame[0].id(), base_id);
    }

    #[test]
    fn frame_merge_appends_distinct_instances() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let mut base_frame = LabeledFrame::new(video, 0, vec![user_at(&skel, 1.0, 2.0)]);
        let incoming = LabeledFrame::new(video, 0, vec![user_at(&skel, 50.0, 60.0)]);

        let result = base_frame.complex_frame_merge(incoming, &skel, 0.0);

        assert_eq!(result.merged.len(), 1);
        assert_eq!(base_frame.len(), 2);
    }

    #[test]
    fn frame_merge_tolerance_is_configurable() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        // 0.05 pixels apart: distinct under exact matching.
        let mut exact = LabeledFrame::new(video, 0, vec![user_at(&skel, 1.0, 2.0)]);
        let incoming = LabeledFrame::new(video, 0, vec![user_at(&skel, 1.05, 2.0)]);
        exact.complex_frame_merge(incoming, &skel, 0.0);
        assert_eq!(exact.len(), 2);

        // The same pair collapses within a 0.1 tolerance.
        let mut loose = LabeledFrame::new(video, 0, vec![user_at(&skel, 1.0, 2.0)]);
        let incoming = LabeledFrame::new(video, 0, vec![user_at(&skel, 1.05, 2.0)]);
        loose.complex_frame_merge(incoming, &skel, 0.1);
        assert_eq!(loose.len(), 1);
    }

    #[test]
    fn frame_merge_defers_ambiguous_matches() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        // Two coincident user instances already in the base frame.
        let mut base_frame = LabeledFrame::new(
            video,
            0,
            vec![user_at(&skel, 1.0, 2.0), user_at(&skel, 1.0, 2.0)],
        );
        let pred = predicted_at(&skel, 1.0, 2.0);
        let pred_id = pred.id();
        let incoming = LabeledFrame::new(video, 0, vec![pred]);

        let result = base_frame.complex_frame_merge(incoming, &skel, 0.0);

        // Nothing was guessed: the frame is untouched and the incoming
        // instance rides along in the conflict record, detached.
        assert_eq!(base_frame.len(), 2);
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.frame, base_frame.id());
        assert_eq!(conflict.candidates.len(), 2);
        assert_eq!(conflict.instance.id(), pred_id);
        assert!(conflict.instance.frame().is_none());
    }

    #[test]
    fn finish_merge_replace_with_new() {
        let skel = sample_skeleton();
        let mut labels = Labels::new(skel.clone());
        labels
            .add_frame(LabeledFrame::new(
                VideoId::new(1),
                0,
                vec![user_at(&skel, 1.0, 2.0), user_at(&skel, 1.0, 2.0)],
            ))
            .unwrap();

        let mut pred_labels = Labels::new(skel.clone());
        let pred = predicted_at(&skel, 1.0, 2.0);
        let pred_id = pred.id();
        pred_labels
            .add_frame(LabeledFrame::new(VideoId::new(1), 0, vec![pred]))
            .unwrap();

        let result = labels.complex_merge_between(pred_labels, &MergeOptions::new(false));
        assert_eq!(result.conflicts.len(), 1);

        let resolutions: Vec<_> = result
            .conflicts
            .into_iter()
            .map(|c| (c, ConflictResolution::ReplaceWithNew))
            .collect();
        labels.finish_complex_merge(resolutions).unwrap();

        let frame = labels.find_frame(VideoId::new(1), 0).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].id(), pred_id);
        assert_eq!(frame[0].frame(), Some(frame.id()));
    }

    #[test]
    fn finish_merge_keep_existing_and_keep_both() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let mut base_frame = LabeledFrame::new(
            video,
            0,
            vec![user_at(&skel, 1.0, 2.0), user_at(&skel, 1.0, 2.0)],
        );
        let incoming = LabeledFrame::new(video, 0, vec![predicted_at(&skel, 1.0, 2.0)]);
        let result = base_frame.complex_frame_merge(incoming, &skel, 0.0);

        let mut labels = Labels::new(skel.clone());
        labels.add_frame(base_frame).unwrap();

        let conflict = result.conflicts[0].clone();
        labels
            .finish_complex_merge([(conflict, ConflictResolution::KeepExisting)])
            .unwrap();
        assert_eq!(labels[0].len(), 2);

        let conflict = result.conflicts[0].clone();
        labels
            .finish_complex_merge([(conflict, ConflictResolution::KeepBoth)])
            .unwrap();
        assert_eq!(labels[0].len(), 3);
    }

    #[test]
    fn merge_between_retains_user_and_predicted() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let user = user_at(&skel, 1.0, 2.0);
        let user_id = user.id();
        let mut user_labels =
            Labels::from_frames(skel.clone(), vec![LabeledFrame::new(video, 0, vec![user])])
                .unwrap();

        let pred = predicted_at(&skel, 1.0, 2.0);
        let pred_id = pred.id();
        let pred_labels =
            Labels::from_frames(skel.clone(), vec![LabeledFrame::new(video, 0, vec![pred])])
                .unwrap();

        let result = user_labels.complex_merge_between(pred_labels, &MergeOptions::new(false));
        assert!(result.conflicts.is_empty());
        assert!(result.new_frames.is_empty());
        user_labels.finish_complex_merge(result.conflicts.into_iter().map(|c| (c, ConflictResolution::default()))).unwrap();

        let frame = &user_labels[0];
        assert_eq!(frame.len(), 2);
        assert!(frame.index_of(user_id).is_some());
        assert!(frame.index_of(pred_id).is_some());
    }

    #[test]
    fn merge_between_creates_missing_frames() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let mut base = Labels::from_frames(
            skel.clone(),
            vec![LabeledFrame::new(video, 0, vec![user_at(&skel, 1.0, 2.0)])],
        )
        .unwrap();

        let new = Labels::from_frames(
            skel.clone(),
            vec![LabeledFrame::new(
                video,
                7,
                vec![predicted_at(&skel, 3.0, 4.0)],
            )],
        )
        .unwrap();

        let result = base.complex_merge_between(new, &MergeOptions::new(false));

        assert_eq!(result.new_frames.len(), 1);
        let frame = base.find_frame(video, 7).unwrap();
        assert_eq!(frame.id(), result.new_frames[0]);
        assert_eq!(frame.n_predicted_instances(), 1);
        assert_eq!(frame[0].frame(), Some(frame.id()));
    }

    #[test]
    fn merge_between_unifies_schemas_by_name() {
        let base_skel = sample_skeleton();
        let video = VideoId::new(1);

        let mut base = Labels::from_frames(
            base_skel.clone(),
            vec![LabeledFrame::new(
                video,
                0,
                vec![user_at(&base_skel, 1.0, 2.0)],
            )],
        )
        .unwrap();

        // A separately built schema: same names plus one extra node.
        let other_skel = Skeleton::from_names("fly-predicted", ["head", "thorax", "tail"]).unwrap();
        let pred = PredictedInstance::with_points(
            &other_skel,
            [
                ("head", PredictedPoint::new(1.0, 2.0, 0.9)),
                ("tail", PredictedPoint::new(9.0, 9.0, 0.8)),
            ],
            0.9,
        )
        .unwrap();
        let new = Labels::from_frames(
            other_skel,
            vec![LabeledFrame::new(video, 1, vec![pred])],
        )
        .unwrap();

        let result = base.complex_merge_between(new, &MergeOptions::new(true));
        assert!(result.conflicts.is_empty());
        assert_eq!(result.new_frames.len(), 1);

        // The base schema gained the extra node.
        assert!(base.skeleton().has_node("tail"));

        // The re-keyed points are reachable through the base schema.
        let frame = base.find_frame(video, 1).unwrap();
        let pred = frame.predicted_instances()[0];
        let tail = pred.point(base.skeleton(), "tail").unwrap();
        assert_eq!((tail.x, tail.y), (9.0, 9.0));
    }

    #[test]
    fn merge_between_unify_matches_across_schemas() {
        let base_skel = sample_skeleton();
        let video = VideoId::new(1);

        let user = user_at(&base_skel, 1.0, 2.0);
        let user_id = user.id();
        let mut base = Labels::from_frames(
            base_skel.clone(),
            vec![LabeledFrame::new(video, 0, vec![user])],
        )
        .unwrap();

        // Same node names on an independently built schema, coincident
        // coordinates: unify makes them comparable.
        let other_skel = Skeleton::from_names("fly-predicted", ["head", "thorax"]).unwrap();
        let pred = PredictedInstance::with_points(
            &other_skel,
            [("head", PredictedPoint::new(1.0, 2.0, 0.9))],
            0.9,
        )
        .unwrap();
        let pred_id = pred.id();
        let new =
            Labels::from_frames(other_skel, vec![LabeledFrame::new(video, 0, vec![pred])])
                .unwrap();

        let result = base.complex_merge_between(new, &MergeOptions::new(true));
        assert!(result.conflicts.is_empty());

        let frame = &base[0];
        assert_eq!(frame.len(), 2);
        assert_eq!(
            frame.user_instances()[0].from_predicted(),
            Some(pred_id)
        );
        assert!(frame.index_of(user_id).is_some());
    }

    #[test]
    fn merge_between_merges_track_registries() {
        let skel = sample_skeleton();
        let mut base = Labels::new(skel.clone());
        base.add_track("existing", 0);

        let mut new = Labels::new(skel.clone());
        let new_track = new.add_track("incoming", 3);

        base.complex_merge_between(new, &MergeOptions::default());

        assert_eq!(base.tracks().len(), 2);
        assert!(base.track(new_track).is_some());
    }

    #[test]
    fn finish_merge_unknown_frame_errors() {
        let skel = sample_skeleton();
        let video = VideoId::new(1);

        let mut base_frame = LabeledFrame::new(
            video,
            0,
            vec![user_at(&skel, 1.0, 2.0), user_at(&skel, 1.0, 2.0)],
        );
        let incoming = LabeledFrame::new(video, 0, vec![predicted_at(&skel, 1.0, 2.0)]);
        let result = base_frame.complex_frame_merge(incoming, &skel, 0.0);

        // The conflict's frame was never added to this collection.
        let mut labels = Labels::new(skel);
        let outcome = labels.finish_complex_merge(
            result
                .conflicts
                .into_iter()
                .map(|c| (c, ConflictResolution::ReplaceWithNew)),
        );
        assert!(matches!(outcome, Err(PoseLabelsError::FrameNotFound { .. })));
    }

    #[test]
    fn merge_options_serialization() {
        let options = MergeOptions::new(false).with_tolerance(0.25);
        let json = serde_json::to_string(&options);
        assert!(json.is_ok());

        let parsed: std::result::Result<MergeOptions, _> =
            serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), options);
    }
}
