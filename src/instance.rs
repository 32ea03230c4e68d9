//! Annotation instances: one detected subject's points for one frame.

use std::sync::atomic::{AtomicU64, Ordering};

use approx::abs_diff_eq;
use hashbrown::HashMap;
use nalgebra::{DMatrix, Matrix2x3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PoseLabelsError, Result};
use crate::frame::FrameId;
use crate::point::{Point, PointData, PredictedPoint};
use crate::skeleton::{NodeId, NodeKey, Skeleton, SkeletonId};
use crate::track::TrackId;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for an instance.
///
/// Used by provenance links (`from_predicted`) and by merge-conflict
/// records to refer to instances without holding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instance({})", self.0)
    }
}

/// Skeleton-keyed point storage shared by the two instance kinds.
///
/// Storage is a vector in schema node order plus the parallel node ids and
/// the `(SkeletonId, version)` marker it was last synced against. Mutating
/// accessors resync when the marker is stale: entries for removed nodes are
/// dropped and new nodes appear unset. Read accessors reconcile on the fly
/// without touching the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PointStore<P> {
    schema: SkeletonId,
    synced_version: u64,
    node_ids: Vec<NodeId>,
    points: Vec<P>,
}

impl<P: PointData> PointStore<P> {
    fn new(skeleton: &Skeleton) -> Self {
        Self {
            schema: skeleton.id(),
            synced_version: skeleton.version(),
            node_ids: skeleton.nodes().iter().map(|n| n.id()).collect(),
            points: vec![P::unset(); skeleton.len()],
        }
    }

    fn from_rows(skeleton: &Skeleton, rows: &[[f64; 2]]) -> Result<Self> {
        if rows.len() > skeleton.len() {
            return Err(PoseLabelsError::shape_mismatch(skeleton.len(), rows.len()));
        }
        let mut store = Self::new(skeleton);
        for (i, row) in rows.iter().enumerate() {
            if !(row[0].is_nan() || row[1].is_nan()) {
                store.points[i] = P::placed(row[0], row[1]);
            }
        }
        Ok(store)
    }

    pub(crate) fn schema(&self) -> SkeletonId {
        self.schema
    }

    /// Rebuilds storage in the given skeleton's node order, keeping points
    /// whose node identity survives.
    fn resync_to(&mut self, skeleton: &Skeleton) {
        trace!(
            schema = %skeleton.id(),
            version = skeleton.version(),
            "resyncing point storage to schema"
        );
        let mut by_id: HashMap<NodeId, P> = self
            .node_ids
            .iter()
            .copied()
            .zip(self.points.iter().copied())
            .collect();
        self.node_ids = skeleton.nodes().iter().map(|n| n.id()).collect();
        self.points = self
            .node_ids
            .iter()
            .map(|id| by_id.remove(id).unwrap_or_else(P::unset))
            .collect();
        self.schema = skeleton.id();
        self.synced_version = skeleton.version();
    }

    fn sync(&mut self, skeleton: &Skeleton) {
        if self.schema != skeleton.id() || self.synced_version != skeleton.version() {
            self.resync_to(skeleton);
        }
    }

    /// Re-keys storage through a node-id translation map, then rebuilds it
    /// in the target skeleton's order. Used when unifying schemas by name.
    pub(crate) fn rekey(&mut self, map: &HashMap<NodeId, NodeId>, target: &Skeleton) {
        for id in &mut self.node_ids {
            if let Some(mapped) = map.get(id) {
                *id = *mapped;
            }
        }
        self.resync_to(target);
    }

    fn lookup(&self, id: NodeId) -> Option<P> {
        self.node_ids
            .iter()
            .position(|&n| n == id)
            .map(|i| self.points[i])
    }

    fn get(&self, skeleton: &Skeleton, key: &NodeKey) -> Result<P> {
        let pos = skeleton.resolve(key)?;
        let id = skeleton.nodes()[pos].id();
        Ok(self.lookup(id).unwrap_or_else(P::unset))
    }

    fn get_many(&self, skeleton: &Skeleton, keys: &[NodeKey]) -> Result<Vec<P>> {
        keys.iter().map(|key| self.get(skeleton, key)).collect()
    }

    fn set(&mut self, skeleton: &Skeleton, key: &NodeKey, value: P) -> Result<()> {
        self.sync(skeleton);
        let pos = skeleton.resolve(key)?;
        self.points[pos] = value;
        Ok(())
    }

    fn set_many(&mut self, skeleton: &Skeleton, keys: &[NodeKey], values: &[P]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(PoseLabelsError::shape_mismatch(keys.len(), values.len()));
        }
        self.sync(skeleton);
        let positions = keys
            .iter()
            .map(|key| skeleton.resolve(key))
            .collect::<Result<Vec<_>>>()?;
        for (pos, value) in positions.into_iter().zip(values.iter().copied()) {
            self.points[pos] = value;
        }
        Ok(())
    }

    fn as_slice(&mut self, skeleton: &Skeleton) -> &[P] {
        self.sync(skeleton);
        &self.points
    }

    fn as_mut_slice(&mut self, skeleton: &Skeleton) -> &mut [P] {
        self.sync(skeleton);
        &mut self.points
    }

    /// Reconciled copy of the points in skeleton order, without mutating
    /// the cache.
    fn reconciled(&self, skeleton: &Skeleton) -> Vec<P> {
        skeleton
            .nodes()
            .iter()
            .map(|n| self.lookup(n.id()).unwrap_or_else(P::unset))
            .collect()
    }

    fn to_matrix(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        let points = self.reconciled(skeleton);
        DMatrix::from_fn(points.len(), 2, |r, c| {
            let (x, y) = points[r].xy();
            if c == 0 {
                x
            } else {
                y
            }
        })
    }

    fn to_matrix_full(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        let points = self.reconciled(skeleton);
        DMatrix::from_fn(points.len(), 4, |r, c| {
            let point = &points[r];
            let (x, y) = point.xy();
            match c {
                0 => x,
                1 => y,
                2 => {
                    if point.visible() {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => {
                    if point.complete() {
                        1.0
                    } else {
                        0.0
                    }
                }
            }
        })
    }

    fn to_matrix_masked(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        let points = self.reconciled(skeleton);
        DMatrix::from_fn(points.len(), 2, |r, c| {
            let point = &points[r];
            if !point.visible() || !point.is_set() {
                return f64::NAN;
            }
            let (x, y) = point.xy();
            if c == 0 {
                x
            } else {
                y
            }
        })
    }

    fn transform(&mut self, matrix: &Matrix2x3<f64>) {
        for point in &mut self.points {
            let (x, y) = point.xy();
            point.set_xy(
                matrix[(0, 0)] * x + matrix[(0, 1)] * y + matrix[(0, 2)],
                matrix[(1, 0)] * x + matrix[(1, 1)] * y + matrix[(1, 2)],
            );
        }
    }

    fn fill_missing(&mut self, skeleton: &Skeleton, max_x: Option<f64>, max_y: Option<f64>) {
        self.sync(skeleton);
        let observed = |axis: fn(&P) -> f64| {
            self.points
                .iter()
                .filter(|p| p.is_set())
                .map(axis)
                .fold(0.0_f64, f64::max)
        };
        let hi_x = max_x.unwrap_or_else(|| observed(|p| p.xy().0)).max(0.0);
        let hi_y = max_y.unwrap_or_else(|| observed(|p| p.xy().1)).max(0.0);

        let mut rng = rand::thread_rng();
        for point in &mut self.points {
            if !point.is_set() {
                *point = P::placed(rng.gen_range(0.0..=hi_x), rng.gen_range(0.0..=hi_y));
            }
        }
    }

    fn merge_node_data(&mut self, skeleton: &Skeleton, base: &NodeKey, merge: &NodeKey) -> Result<()> {
        self.sync(skeleton);
        let base_pos = skeleton.resolve(base)?;
        let merge_pos = skeleton.resolve(merge)?;
        let base_point = self.points[base_pos];
        let merge_point = self.points[merge_pos];
        if !base_point.is_set() || (!base_point.visible() && merge_point.visible()) {
            self.points[base_pos] = merge_point;
        }
        Ok(())
    }

    /// Set points keyed by node identity, for coincidence comparison.
    fn point_map(&self) -> HashMap<NodeId, (f64, f64)> {
        self.node_ids
            .iter()
            .copied()
            .zip(self.points.iter())
            .filter(|(_, p)| p.is_set())
            .map(|(id, p)| (id, p.xy()))
            .collect()
    }

    fn visible_count(&self, skeleton: &Skeleton) -> usize {
        self.reconciled(skeleton)
            .iter()
            .filter(|p| p.is_set() && p.visible())
            .count()
    }

    fn bounding_box(&self, skeleton: &Skeleton) -> Option<(f64, f64, f64, f64)> {
        let visible: Vec<(f64, f64)> = self
            .reconciled(skeleton)
            .iter()
            .filter(|p| p.is_set() && p.visible())
            .map(PointData::xy)
            .collect();
        if visible.is_empty() {
            return None;
        }
        let min_x = visible.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_x = visible
            .iter()
            .map(|p| p.0)
            .fold(f64::NEG_INFINITY, f64::max);
        let min_y = visible.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = visible
            .iter()
            .map(|p| p.1)
            .fold(f64::NEG_INFINITY, f64::max);
        Some((min_x, min_y, max_x, max_y))
    }
}

/// A user-labeled instance: one subject's full set of points for one frame.
///
/// Owns one [`Point`] per schema node, keyed by stable node identity. All
/// schema-dependent accessors take the [`Skeleton`] explicitly; the instance
/// notices structural schema changes through a version marker and lazily
/// reconciles its storage (mutating accessors) or reconciles on the fly
/// (read accessors).
///
/// # Example
///
/// ```
/// use pose_labels::{Instance, Point, Skeleton};
///
/// # fn main() -> pose_labels::Result<()> {
/// let mut skeleton = Skeleton::from_names("fly", ["head", "thorax"])?;
/// let mut instance = Instance::new(&skeleton);
///
/// instance.set_point(&skeleton, "head", Point::new(10.0, 20.0))?;
/// assert!((instance.point(&skeleton, "head")?.x - 10.0).abs() < 1e-9);
///
/// // The schema can grow after the fact; storage follows on next access.
/// skeleton.add_node("abdomen")?;
/// assert_eq!(instance.points(&skeleton).len(), 3);
/// assert!(!instance.point(&skeleton, "abdomen")?.is_set());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    id: InstanceId,
    store: PointStore<Point>,
    track: Option<TrackId>,
    frame: Option<FrameId>,
    from_predicted: Option<InstanceId>,
}

impl Instance {
    /// Creates an instance with every point unset.
    #[must_use]
    pub fn new(skeleton: &Skeleton) -> Self {
        Self {
            id: InstanceId::next(),
            store: PointStore::new(skeleton),
            track: None,
            frame: None,
            from_predicted: None,
        }
    }

    /// Creates an instance with the given points set.
    ///
    /// # Errors
    ///
    /// Returns an error if a key does not resolve against the skeleton.
    pub fn with_points<K, I>(skeleton: &Skeleton, points: I) -> Result<Self>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = (K, Point)>,
    {
        let mut instance = Self::new(skeleton);
        for (key, point) in points {
            instance.set_point(skeleton, key, point)?;
        }
        Ok(instance)
    }

    /// Creates an instance from coordinate rows in skeleton node order.
    ///
    /// Rows with `NaN` coordinates stay unset; fewer rows than nodes leaves
    /// the remaining nodes unset.
    ///
    /// # Errors
    ///
    /// Returns a shape-mismatch error if there are more rows than nodes.
    pub fn from_pointsarray(skeleton: &Skeleton, rows: &[[f64; 2]]) -> Result<Self> {
        Ok(Self {
            id: InstanceId::next(),
            store: PointStore::from_rows(skeleton, rows)?,
            track: None,
            frame: None,
            from_predicted: None,
        })
    }

    /// Returns this instance's identity.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the id of the schema this instance is keyed to.
    #[must_use]
    pub fn skeleton_id(&self) -> SkeletonId {
        self.store.schema()
    }

    /// Returns the associated track, if any.
    #[must_use]
    pub const fn track(&self) -> Option<TrackId> {
        self.track
    }

    /// Associates or clears the track.
    pub fn set_track(&mut self, track: Option<TrackId>) {
        self.track = track;
    }

    /// Returns the containing frame, if the instance is attached to one.
    ///
    /// This back-reference is maintained by the containing
    /// [`InstancesList`](crate::InstancesList); it cannot be written
    /// directly.
    #[must_use]
    pub const fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        self.frame = frame;
    }

    /// Returns the prediction this instance originated from, if any.
    #[must_use]
    pub const fn from_predicted(&self) -> Option<InstanceId> {
        self.from_predicted
    }

    /// Sets the provenance link to the prediction this instance came from.
    pub fn set_from_predicted(&mut self, from_predicted: Option<InstanceId>) {
        self.from_predicted = from_predicted;
    }

    /// Gets the point for a node key.
    ///
    /// Unset nodes yield an unset point.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn point(&self, skeleton: &Skeleton, key: impl Into<NodeKey>) -> Result<Point> {
        self.store.get(skeleton, &key.into())
    }

    /// Sets the point for a node key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn set_point(
        &mut self,
        skeleton: &Skeleton,
        key: impl Into<NodeKey>,
        point: Point,
    ) -> Result<()> {
        self.store.set(skeleton, &key.into(), point)
    }

    /// Places a fresh visible point at the given coordinates.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn set_xy(
        &mut self,
        skeleton: &Skeleton,
        key: impl Into<NodeKey>,
        x: f64,
        y: f64,
    ) -> Result<()> {
        self.store.set(skeleton, &key.into(), Point::new(x, y))
    }

    /// Gets the points for a sequence of node keys, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if any key does not resolve.
    pub fn points_at<K, I>(&self, skeleton: &Skeleton, keys: I) -> Result<Vec<Point>>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<NodeKey> = keys.into_iter().map(Into::into).collect();
        self.store.get_many(skeleton, &keys)
    }

    /// Sets the points for a sequence of node keys.
    ///
    /// # Errors
    ///
    /// Returns a shape-mismatch error if `keys` and `values` differ in
    /// length, or a not-found error if any key does not resolve; no points
    /// are written on error.
    pub fn set_points_at<K, I>(
        &mut self,
        skeleton: &Skeleton,
        keys: I,
        values: &[Point],
    ) -> Result<()>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<NodeKey> = keys.into_iter().map(Into::into).collect();
        self.store.set_many(skeleton, &keys, values)
    }

    /// Returns the points in skeleton node order, resyncing storage first.
    pub fn points(&mut self, skeleton: &Skeleton) -> &[Point] {
        self.store.as_slice(skeleton)
    }

    /// Returns a mutable view over the live points in skeleton node order.
    ///
    /// Writes through the slice mutate the instance directly. The borrow
    /// ends before any later structural schema change can be observed, so
    /// the view can never go stale.
    pub fn points_mut(&mut self, skeleton: &Skeleton) -> &mut [Point] {
        self.store.as_mut_slice(skeleton)
    }

    /// Returns a detached `[n_nodes, 2]` snapshot of the stored
    /// coordinates, in skeleton node order. Unset points are `NaN`.
    #[must_use]
    pub fn to_points_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix(skeleton)
    }

    /// Returns a detached `[n_nodes, 4]` snapshot: x, y, visible, complete.
    #[must_use]
    pub fn to_points_array_full(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix_full(skeleton)
    }

    /// Returns a detached `[n_nodes, 2]` safety snapshot with the
    /// coordinates of invisible points forced to `NaN`.
    #[must_use]
    pub fn points_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix_masked(skeleton)
    }

    /// Applies a 2×3 affine transform to every point in place:
    /// `[x', y'] = M[:, :2] · [x, y] + M[:, 2]`.
    pub fn transform_points(&mut self, matrix: &Matrix2x3<f64>) {
        self.store.transform(matrix);
    }

    /// Fills every unset point with coordinates drawn uniformly at random
    /// in `[0, max_x] × [0, max_y]`.
    ///
    /// A missing bound defaults to the maximum coordinate observed among
    /// this instance's already-placed points on that axis.
    pub fn fill_missing(&mut self, skeleton: &Skeleton, max_x: Option<f64>, max_y: Option<f64>) {
        self.store.fill_missing(skeleton, max_x, max_y);
    }

    /// Folds the point at `merge` into the point at `base` within this
    /// instance: the base point is kept unless it is unset, or invisible
    /// while the merge point is visible, in which case the merge point's
    /// values are adopted. Removing the redundant node from the schema is
    /// the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns an error if either key does not resolve.
    pub fn merge_node_data(
        &mut self,
        skeleton: &Skeleton,
        base: impl Into<NodeKey>,
        merge: impl Into<NodeKey>,
    ) -> Result<()> {
        self.store
            .merge_node_data(skeleton, &base.into(), &merge.into())
    }

    /// Returns the number of placed, visible points.
    #[must_use]
    pub fn visible_count(&self, skeleton: &Skeleton) -> usize {
        self.store.visible_count(skeleton)
    }

    /// Returns the bounding box `(min_x, min_y, max_x, max_y)` of the
    /// visible points, or `None` if none are visible.
    #[must_use]
    pub fn bounding_box(&self, skeleton: &Skeleton) -> Option<(f64, f64, f64, f64)> {
        self.store.bounding_box(skeleton)
    }

    pub(crate) fn sync(&mut self, skeleton: &Skeleton) {
        self.store.sync(skeleton);
    }

    pub(crate) fn point_map(&self) -> HashMap<NodeId, (f64, f64)> {
        self.store.point_map()
    }

    pub(crate) fn rekey(&mut self, map: &HashMap<NodeId, NodeId>, target: &Skeleton) {
        self.store.rekey(map, target);
    }
}

/// An instance produced by an automated process.
///
/// Same storage model as [`Instance`] with [`PredictedPoint`] values
/// (per-point confidence) and an instance-level confidence score.
///
/// # Example
///
/// ```
/// use pose_labels::{PredictedInstance, Skeleton};
///
/// # fn main() -> pose_labels::Result<()> {
/// let skeleton = Skeleton::from_names("fly", ["head", "thorax"])?;
/// let instance = PredictedInstance::from_pointsarray(
///     &skeleton,
///     &[[1.0, 2.0], [3.0, 4.0]],
///     &[0.9, 0.8],
///     0.85,
/// )?;
///
/// let arr = instance.points_and_scores_array(&skeleton);
/// assert_eq!(arr.shape(), (2, 3));
/// assert!((arr[(0, 2)] - 0.9).abs() < 1e-9);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedInstance {
    id: InstanceId,
    store: PointStore<PredictedPoint>,
    score: f64,
    track: Option<TrackId>,
    frame: Option<FrameId>,
}

impl PredictedInstance {
    /// Creates a predicted instance with every point unset.
    #[must_use]
    pub fn new(skeleton: &Skeleton, score: f64) -> Self {
        Self {
            id: InstanceId::next(),
            store: PointStore::new(skeleton),
            score,
            track: None,
            frame: None,
        }
    }

    /// Creates a predicted instance with the given points set.
    ///
    /// # Errors
    ///
    /// Returns an error if a key does not resolve against the skeleton.
    pub fn with_points<K, I>(skeleton: &Skeleton, points: I, score: f64) -> Result<Self>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = (K, PredictedPoint)>,
    {
        let mut instance = Self::new(skeleton, score);
        for (key, point) in points {
            instance.set_point(skeleton, key, point)?;
        }
        Ok(instance)
    }

    /// Creates a predicted instance from coordinate rows and per-point
    /// scores in skeleton node order.
    ///
    /// Rows with `NaN` coordinates stay unset.
    ///
    /// # Errors
    ///
    /// Returns a shape-mismatch error if there are more rows than nodes or
    /// the score count differs from the row count.
    pub fn from_pointsarray(
        skeleton: &Skeleton,
        rows: &[[f64; 2]],
        scores: &[f64],
        score: f64,
    ) -> Result<Self> {
        if scores.len() != rows.len() {
            return Err(PoseLabelsError::shape_mismatch(rows.len(), scores.len()));
        }
        let mut store: PointStore<PredictedPoint> = PointStore::from_rows(skeleton, rows)?;
        for (i, &s) in scores.iter().enumerate() {
            if store.points[i].is_set() {
                store.points[i].score = s;
            }
        }
        Ok(Self {
            id: InstanceId::next(),
            store,
            score,
            track: None,
            frame: None,
        })
    }

    /// Returns this instance's identity.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the id of the schema this instance is keyed to.
    #[must_use]
    pub fn skeleton_id(&self) -> SkeletonId {
        self.store.schema()
    }

    /// Returns the instance-level confidence score.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Sets the instance-level confidence score.
    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    /// Returns the associated track, if any.
    #[must_use]
    pub const fn track(&self) -> Option<TrackId> {
        self.track
    }

    /// Associates or clears the track.
    pub fn set_track(&mut self, track: Option<TrackId>) {
        self.track = track;
    }

    /// Returns the containing frame, if the instance is attached to one.
    #[must_use]
    pub const fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        self.frame = frame;
    }

    /// Gets the point for a node key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn point(&self, skeleton: &Skeleton, key: impl Into<NodeKey>) -> Result<PredictedPoint> {
        self.store.get(skeleton, &key.into())
    }

    /// Sets the point for a node key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn set_point(
        &mut self,
        skeleton: &Skeleton,
        key: impl Into<NodeKey>,
        point: PredictedPoint,
    ) -> Result<()> {
        self.store.set(skeleton, &key.into(), point)
    }

    /// Gets the points for a sequence of node keys, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if any key does not resolve.
    pub fn points_at<K, I>(&self, skeleton: &Skeleton, keys: I) -> Result<Vec<PredictedPoint>>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<NodeKey> = keys.into_iter().map(Into::into).collect();
        self.store.get_many(skeleton, &keys)
    }

    /// Sets the points for a sequence of node keys.
    ///
    /// # Errors
    ///
    /// Returns a shape-mismatch error if `keys` and `values` differ in
    /// length, or a not-found error if any key does not resolve.
    pub fn set_points_at<K, I>(
        &mut self,
        skeleton: &Skeleton,
        keys: I,
        values: &[PredictedPoint],
    ) -> Result<()>
    where
        K: Into<NodeKey>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<NodeKey> = keys.into_iter().map(Into::into).collect();
        self.store.set_many(skeleton, &keys, values)
    }

    /// Returns the points in skeleton node order, resyncing storage first.
    pub fn points(&mut self, skeleton: &Skeleton) -> &[PredictedPoint] {
        self.store.as_slice(skeleton)
    }

    /// Returns a mutable view over the live points in skeleton node order.
    pub fn points_mut(&mut self, skeleton: &Skeleton) -> &mut [PredictedPoint] {
        self.store.as_mut_slice(skeleton)
    }

    /// Returns a detached `[n_nodes, 2]` snapshot of the stored
    /// coordinates. Unset points are `NaN`.
    #[must_use]
    pub fn to_points_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix(skeleton)
    }

    /// Returns a detached `[n_nodes, 4]` snapshot: x, y, visible, complete.
    #[must_use]
    pub fn to_points_array_full(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix_full(skeleton)
    }

    /// Returns a detached `[n_nodes, 2]` safety snapshot with the
    /// coordinates of invisible points forced to `NaN`.
    #[must_use]
    pub fn points_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        self.store.to_matrix_masked(skeleton)
    }

    /// Returns a detached `[n_nodes, 3]` snapshot of x, y, score.
    ///
    /// Coordinates of invisible or unset points are `NaN`; scores are
    /// retained as recorded.
    #[must_use]
    pub fn points_and_scores_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        let points = self.store.reconciled(skeleton);
        DMatrix::from_fn(points.len(), 3, |r, c| {
            let point = &points[r];
            match c {
                0 | 1 => {
                    if !point.visible || !point.is_set() {
                        f64::NAN
                    } else if c == 0 {
                        point.x
                    } else {
                        point.y
                    }
                }
                _ => point.score,
            }
        })
    }

    /// Applies a 2×3 affine transform to every point in place.
    pub fn transform_points(&mut self, matrix: &Matrix2x3<f64>) {
        self.store.transform(matrix);
    }

    /// Fills every unset point with coordinates drawn uniformly at random
    /// in `[0, max_x] × [0, max_y]`; see [`Instance::fill_missing`].
    pub fn fill_missing(&mut self, skeleton: &Skeleton, max_x: Option<f64>, max_y: Option<f64>) {
        self.store.fill_missing(skeleton, max_x, max_y);
    }

    /// Folds the point at `merge` into the point at `base`, adopting the
    /// merge point's coordinates and score when the base point is unset or
    /// invisible-while-merge-is-visible; see [`Instance::merge_node_data`].
    ///
    /// # Errors
    ///
    /// Returns an error if either key does not resolve.
    pub fn merge_node_data(
        &mut self,
        skeleton: &Skeleton,
        base: impl Into<NodeKey>,
        merge: impl Into<NodeKey>,
    ) -> Result<()> {
        self.store
            .merge_node_data(skeleton, &base.into(), &merge.into())
    }

    /// Returns the number of placed, visible points.
    #[must_use]
    pub fn visible_count(&self, skeleton: &Skeleton) -> usize {
        self.store.visible_count(skeleton)
    }

    /// Returns the bounding box `(min_x, min_y, max_x, max_y)` of the
    /// visible points, or `None` if none are visible.
    #[must_use]
    pub fn bounding_box(&self, skeleton: &Skeleton) -> Option<(f64, f64, f64, f64)> {
        self.store.bounding_box(skeleton)
    }

    pub(crate) fn sync(&mut self, skeleton: &Skeleton) {
        self.store.sync(skeleton);
    }

    pub(crate) fn point_map(&self) -> HashMap<NodeId, (f64, f64)> {
        self.store.point_map()
    }

    pub(crate) fn rekey(&mut self, map: &HashMap<NodeId, NodeId>, target: &Skeleton) {
        self.store.rekey(map, target);
    }
}

/// Either kind of instance, as stored in frame containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnyInstance {
    /// A user-labeled instance.
    User(Instance),
    /// A predicted instance.
    Predicted(PredictedInstance),
}

impl AnyInstance {
    /// Returns the instance identity.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        match self {
            Self::User(inst) => inst.id(),
            Self::Predicted(inst) => inst.id(),
        }
    }

    /// Returns the containing frame, if attached.
    #[must_use]
    pub const fn frame(&self) -> Option<FrameId> {
        match self {
            Self::User(inst) => inst.frame(),
            Self::Predicted(inst) => inst.frame(),
        }
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        match self {
            Self::User(inst) => inst.set_frame(frame),
            Self::Predicted(inst) => inst.set_frame(frame),
        }
    }

    /// Returns the associated track, if any.
    #[must_use]
    pub const fn track(&self) -> Option<TrackId> {
        match self {
            Self::User(inst) => inst.track(),
            Self::Predicted(inst) => inst.track(),
        }
    }

    /// Associates or clears the track.
    pub fn set_track(&mut self, track: Option<TrackId>) {
        match self {
            Self::User(inst) => inst.set_track(track),
            Self::Predicted(inst) => inst.set_track(track),
        }
    }

    /// Returns the id of the schema the instance is keyed to.
    #[must_use]
    pub fn skeleton_id(&self) -> SkeletonId {
        match self {
            Self::User(inst) => inst.skeleton_id(),
            Self::Predicted(inst) => inst.skeleton_id(),
        }
    }

    /// Returns `true` for a user-labeled instance.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Returns `true` for a predicted instance.
    #[must_use]
    pub const fn is_predicted(&self) -> bool {
        matches!(self, Self::Predicted(_))
    }

    /// Returns the user-labeled instance, if this is one.
    #[must_use]
    pub const fn as_user(&self) -> Option<&Instance> {
        match self {
            Self::User(inst) => Some(inst),
            Self::Predicted(_) => None,
        }
    }

    /// Returns the user-labeled instance mutably, if this is one.
    pub fn as_user_mut(&mut self) -> Option<&mut Instance> {
        match self {
            Self::User(inst) => Some(inst),
            Self::Predicted(_) => None,
        }
    }

    /// Returns the predicted instance, if this is one.
    #[must_use]
    pub const fn as_predicted(&self) -> Option<&PredictedInstance> {
        match self {
            Self::User(_) => None,
            Self::Predicted(inst) => Some(inst),
        }
    }

    /// Returns the predicted instance mutably, if this is one.
    pub fn as_predicted_mut(&mut self) -> Option<&mut PredictedInstance> {
        match self {
            Self::User(_) => None,
            Self::Predicted(inst) => Some(inst),
        }
    }

    /// Returns the `[n_nodes, 2]` safety snapshot (invisible points `NaN`).
    #[must_use]
    pub fn points_array(&self, skeleton: &Skeleton) -> DMatrix<f64> {
        match self {
            Self::User(inst) => inst.points_array(skeleton),
            Self::Predicted(inst) => inst.points_array(skeleton),
        }
    }

    /// Returns `true` if the two instances' placed-point coordinate sets
    /// coincide within `tolerance`, irrespective of kind.
    ///
    /// Points are compared by node identity; an unset point only matches an
    /// unset point. A tolerance of `0.0` requires exact equality.
    #[must_use]
    pub fn coincides_with(&self, other: &Self, tolerance: f64) -> bool {
        let a = self.point_map();
        let b = other.point_map();
        if a.len() != b.len() {
            return false;
        }
        a.iter().all(|(id, &(ax, ay))| {
            b.get(id).is_some_and(|&(bx, by)| {
                abs_diff_eq!(ax, bx, epsilon = tolerance)
                    && abs_diff_eq!(ay, by, epsilon = tolerance)
            })
        })
    }

    pub(crate) fn sync(&mut self, skeleton: &Skeleton) {
        match self {
            Self::User(inst) => inst.sync(skeleton),
            Self::Predicted(inst) => inst.sync(skeleton),
        }
    }

    pub(crate) fn point_map(&self) -> HashMap<NodeId, (f64, f64)> {
        match self {
            Self::User(inst) => inst.point_map(),
            Self::Predicted(inst) => inst.point_map(),
        }
    }

    pub(crate) fn rekey(&mut self, map: &HashMap<NodeId, NodeId>, target: &Skeleton) {
        match self {
            Self::User(inst) => inst.rekey(map, target),
            Self::Predicted(inst) => inst.rekey(map, target),
        }
    }
}

impl From<Instance> for AnyInstance {
    fn from(instance: Instance) -> Self {
        Self::User(instance)
    }
}

impl From<PredictedInstance> for AnyInstance {
    fn from(instance: PredictedInstance) -> Self {
        Self::Predicted(instance)
    }
}
