//! Labeled frames and the instance container that maintains frame links.

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::instance::{AnyInstance, Instance, InstanceId, PredictedInstance};
use crate::skeleton::Skeleton;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque identity for a video.
///
/// The video itself (decoding, frame access) is an external collaborator;
/// this crate only needs an equality usable to decide whether two labeled
/// frames refer to the same footage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoId(u64);

impl VideoId {
    /// Creates a video id from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for VideoId {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Video({})", self.0)
    }
}

/// A unique identity for a labeled frame.
///
/// Instance back-references hold this id; it is what the container
/// invariant is stated in terms of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

/// An ordered instance container that maintains the frame back-reference.
///
/// The single structural invariant, enforced on every mutating operation:
/// each contained instance's frame reference equals the list's
/// `labeled_frame`, and any instance leaving the list has that reference
/// cleared. Only this container writes the back-reference.
///
/// # Example
///
/// ```
/// use pose_labels::{Instance, InstancesList, Skeleton};
///
/// let skeleton = Skeleton::from_names("fly", ["head"]).unwrap();
/// let mut list = InstancesList::new();
/// list.push(Instance::new(&skeleton));
///
/// // Unattached list: contained instances have no frame.
/// assert!(list[0].frame().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancesList {
    items: Vec<AnyInstance>,
    labeled_frame: Option<FrameId>,
}

impl InstancesList {
    /// Creates an empty, unattached list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            labeled_frame: None,
        }
    }

    /// Creates an unattached list from instances.
    ///
    /// The elements are taken as-is but detached: their frame references
    /// are cleared, since the list is not owned by any frame yet.
    #[must_use]
    pub fn from_instances(instances: Vec<AnyInstance>) -> Self {
        let mut list = Self::new();
        list.extend(instances);
        list
    }

    /// Creates a list attached to a frame, linking every instance to it.
    #[must_use]
    pub fn with_frame(instances: Vec<AnyInstance>, frame: FrameId) -> Self {
        let mut list = Self::from_instances(instances);
        list.set_labeled_frame(Some(frame));
        list
    }

    /// Returns the owning frame, if the list is attached.
    #[must_use]
    pub const fn labeled_frame(&self) -> Option<FrameId> {
        self.labeled_frame
    }

    /// Attaches the list to a frame (or detaches it), re-linking every
    /// contained instance's frame reference immediately.
    pub fn set_labeled_frame(&mut self, frame: Option<FrameId>) {
        self.labeled_frame = frame;
        for instance in &mut self.items {
            instance.set_frame(frame);
        }
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Gets an instance by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AnyInstance> {
        self.items.get(index)
    }

    /// Gets an instance mutably by position.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut AnyInstance> {
        self.items.get_mut(index)
    }

    /// Iterates over the instances in order.
    pub fn iter(&self) -> std::slice::Iter<'_, AnyInstance> {
        self.items.iter()
    }

    /// Iterates mutably over the instances in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AnyInstance> {
        self.items.iter_mut()
    }

    /// Returns the position of an instance by id.
    #[must_use]
    pub fn index_of(&self, id: InstanceId) -> Option<usize> {
        self.items.iter().position(|inst| inst.id() == id)
    }

    /// Returns `true` if an instance with this id is contained.
    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.index_of(id).is_some()
    }

    /// Appends an instance, linking its frame reference to this list's
    /// frame.
    pub fn push(&mut self, instance: impl Into<AnyInstance>) {
        let mut instance = instance.into();
        instance.set_frame(self.labeled_frame);
        self.items.push(instance);
    }

    /// Appends several instances, linking each.
    pub fn extend<I>(&mut self, instances: I)
    where
        I: IntoIterator,
        I::Item: Into<AnyInstance>,
    {
        for instance in instances {
            self.push(instance);
        }
    }

    /// Inserts an instance at a position, linking it.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, instance: impl Into<AnyInstance>) {
        let mut instance = instance.into();
        instance.set_frame(self.labeled_frame);
        self.items.insert(index, instance);
    }

    /// Replaces the instance at a position, linking the new one and
    /// returning the old one detached.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn replace(&mut self, index: usize, instance: impl Into<AnyInstance>) -> AnyInstance {
        let mut instance = instance.into();
        instance.set_frame(self.labeled_frame);
        let mut old = std::mem::replace(&mut self.items[index], instance);
        old.set_frame(None);
        old
    }

    /// Removes and returns the instance at a position, detached.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove_at(&mut self, index: usize) -> AnyInstance {
        let mut instance = self.items.remove(index);
        instance.set_frame(None);
        instance
    }

    /// Removes and returns the last instance, detached.
    pub fn pop(&mut self) -> Option<AnyInstance> {
        let mut instance = self.items.pop()?;
        instance.set_frame(None);
        Some(instance)
    }

    /// Removes an instance by id, returning it detached.
    pub fn remove(&mut self, id: InstanceId) -> Option<AnyInstance> {
        let index = self.index_of(id)?;
        Some(self.remove_at(index))
    }

    /// Keeps only instances satisfying the predicate, detaching the rest.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&AnyInstance) -> bool,
    {
        let items = std::mem::take(&mut self.items);
        for mut instance in items {
            if keep(&instance) {
                self.items.push(instance);
            } else {
                instance.set_frame(None);
            }
        }
    }

    /// Removes all instances, detaching each.
    pub fn clear(&mut self) {
        self.take_all();
    }

    /// Removes and returns all instances, detached.
    pub fn take_all(&mut self) -> Vec<AnyInstance> {
        let mut items = std::mem::take(&mut self.items);
        for instance in &mut items {
            instance.set_frame(None);
        }
        items
    }

    /// Returns detached clones of the instances as a plain vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<AnyInstance> {
        self.items
            .iter()
            .map(|instance| {
                let mut copy = instance.clone();
                copy.set_frame(None);
                copy
            })
            .collect()
    }
}

impl std::ops::Index<usize> for InstancesList {
    type Output = AnyInstance;

    fn index(&self, index: usize) -> &AnyInstance {
        &self.items[index]
    }
}

impl From<Vec<AnyInstance>> for InstancesList {
    fn from(instances: Vec<AnyInstance>) -> Self {
        Self::from_instances(instances)
    }
}

impl From<Vec<Instance>> for InstancesList {
    fn from(instances: Vec<Instance>) -> Self {
        Self::from_instances(instances.into_iter().map(AnyInstance::from).collect())
    }
}

impl From<Vec<PredictedInstance>> for InstancesList {
    fn from(instances: Vec<PredictedInstance>) -> Self {
        Self::from_instances(instances.into_iter().map(AnyInstance::from).collect())
    }
}

impl<'a> IntoIterator for &'a InstancesList {
    type Item = &'a AnyInstance;
    type IntoIter = std::slice::Iter<'a, AnyInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// The annotations for one frame of one video.
///
/// A `(video, frame index)` pair plus the instances annotated on it. The
/// contained [`InstancesList`] is owned exclusively by the frame and keeps
/// every instance's back-reference pointing here.
///
/// # Example
///
/// ```
/// use pose_labels::{Instance, LabeledFrame, Skeleton, VideoId};
///
/// let skeleton = Skeleton::from_names("fly", ["head"]).unwrap();
/// let frame = LabeledFrame::new(
///     VideoId::new(1),
///     0,
///     vec![Instance::new(&skeleton), Instance::new(&skeleton)],
/// );
///
/// assert_eq!(frame.len(), 2);
/// assert_eq!(frame[0].frame(), Some(frame.id()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledFrame {
    id: FrameId,
    video: VideoId,
    frame_idx: u64,
    instances: InstancesList,
}

impl LabeledFrame {
    /// Creates a labeled frame owning the given instances.
    #[must_use]
    pub fn new(video: VideoId, frame_idx: u64, instances: impl Into<InstancesList>) -> Self {
        let id = FrameId::next();
        let mut instances = instances.into();
        instances.set_labeled_frame(Some(id));
        Self {
            id,
            video,
            frame_idx,
            instances,
        }
    }

    /// Creates a labeled frame with no instances.
    #[must_use]
    pub fn empty(video: VideoId, frame_idx: u64) -> Self {
        Self::new(video, frame_idx, InstancesList::new())
    }

    /// Returns the frame identity.
    #[must_use]
    pub const fn id(&self) -> FrameId {
        self.id
    }

    /// Returns the video this frame belongs to.
    #[must_use]
    pub const fn video(&self) -> VideoId {
        self.video
    }

    /// Returns the frame index within the video.
    #[must_use]
    pub const fn frame_idx(&self) -> u64 {
        self.frame_idx
    }

    /// Returns the instance container.
    #[must_use]
    pub const fn instances(&self) -> &InstancesList {
        &self.instances
    }

    /// Returns the instance container mutably.
    pub fn instances_mut(&mut self) -> &mut InstancesList {
        &mut self.instances
    }

    /// Replaces the frame's instances, attaching the new ones to it.
    pub fn set_instances(&mut self, instances: impl Into<InstancesList>) {
        self.instances.clear();
        let mut instances = instances.into();
        instances.set_labeled_frame(Some(self.id));
        self.instances = instances;
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if the frame has no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Gets an instance by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AnyInstance> {
        self.instances.get(index)
    }

    /// Gets an instance mutably by position.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut AnyInstance> {
        self.instances.get_mut(index)
    }

    /// Returns the position of an instance by id.
    #[must_use]
    pub fn index_of(&self, id: InstanceId) -> Option<usize> {
        self.instances.index_of(id)
    }

    /// Appends an instance to the frame.
    pub fn push_instance(&mut self, instance: impl Into<AnyInstance>) {
        self.instances.push(instance);
    }

    /// Inserts an instance at a position.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert_instance(&mut self, index: usize, instance: impl Into<AnyInstance>) {
        self.instances.insert(index, instance);
    }

    /// Replaces the instance at a position, returning the old one detached.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn replace_instance(
        &mut self,
        index: usize,
        instance: impl Into<AnyInstance>,
    ) -> AnyInstance {
        self.instances.replace(index, instance)
    }

    /// Removes an instance by id, returning it detached.
    pub fn remove_instance(&mut self, id: InstanceId) -> Option<AnyInstance> {
        self.instances.remove(id)
    }

    /// Removes and returns the instance at a position, detached.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove_at(&mut self, index: usize) -> AnyInstance {
        self.instances.remove_at(index)
    }

    /// Returns the user-labeled instances, recomputed on access.
    #[must_use]
    pub fn user_instances(&self) -> Vec<&Instance> {
        self.instances.iter().filter_map(AnyInstance::as_user).collect()
    }

    /// Returns the number of user-labeled instances.
    #[must_use]
    pub fn n_user_instances(&self) -> usize {
        self.user_instances().len()
    }

    /// Returns `true` if the frame has user-labeled instances.
    #[must_use]
    pub fn has_user_instances(&self) -> bool {
        self.instances.iter().any(AnyInstance::is_user)
    }

    /// Returns the predicted instances, recomputed on access.
    #[must_use]
    pub fn predicted_instances(&self) -> Vec<&PredictedInstance> {
        self.instances
            .iter()
            .filter_map(AnyInstance::as_predicted)
            .collect()
    }

    /// Returns the number of predicted instances.
    #[must_use]
    pub fn n_predicted_instances(&self) -> usize {
        self.predicted_instances().len()
    }

    /// Returns `true` if the frame has predicted instances.
    #[must_use]
    pub fn has_predicted_instances(&self) -> bool {
        self.instances.iter().any(AnyInstance::is_predicted)
    }

    /// Returns the predicted instances that carry a track.
    #[must_use]
    pub fn tracked_instances(&self) -> Vec<&PredictedInstance> {
        self.instances
            .iter()
            .filter_map(AnyInstance::as_predicted)
            .filter(|inst| inst.track().is_some())
            .collect()
    }

    /// Returns the number of tracked predicted instances.
    #[must_use]
    pub fn n_tracked_instances(&self) -> usize {
        self.tracked_instances().len()
    }

    /// Returns `true` if the frame has tracked predicted instances.
    #[must_use]
    pub fn has_tracked_instances(&self) -> bool {
        !self.tracked_instances().is_empty()
    }

    /// Removes every instance whose track is unset, detaching each.
    pub fn remove_untracked(&mut self) {
        self.instances.retain(|inst| inst.track().is_some());
    }

    /// Returns one `[n_nodes, 2]` safety snapshot per instance, in order
    /// (coordinates of invisible points are `NaN`).
    #[must_use]
    pub fn points_arrays(&self, skeleton: &Skeleton) -> Vec<DMatrix<f64>> {
        self.instances
            .iter()
            .map(|inst| inst.points_array(skeleton))
            .collect()
    }
}

impl std::ops::Index<usize> for LabeledFrame {
    type Output = AnyInstance;

    fn index(&self, index: usize) -> &AnyInstance {
        &self.instances[index]
    }
}
