//! Annotation schema: named, identity-stable nodes plus edges and symmetries.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{PoseLabelsError, Result};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SKELETON_ID: AtomicU64 = AtomicU64::new(1);

/// A stable, opaque identity for a schema node.
///
/// Node ids survive renaming: instance point storage is keyed by id, so a
/// relabeled node keeps its data. Ids are unique across all skeletons in
/// the process.
///
/// # Example
///
/// ```
/// use pose_labels::Skeleton;
///
/// let mut skeleton = Skeleton::new("fly");
/// let id = skeleton.add_node("head").unwrap();
/// skeleton.relabel_node("head", "Head").unwrap();
/// assert_eq!(skeleton.node(id).unwrap().name(), "Head");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// An opaque identity for a skeleton.
///
/// Clones of a skeleton share the id: they describe the same schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkeletonId(u64);

impl SkeletonId {
    /// Returns the underlying id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_SKELETON_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SkeletonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Skeleton({})", self.0)
    }
}

/// A schema node: stable identity plus a mutable display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    name: String,
}

impl Node {
    fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
        }
    }

    /// Returns the stable node identity.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the current display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A key identifying a node on a skeleton.
///
/// Keys come in three forms — stable identity, display name, or position in
/// the skeleton's node ordering — and every keyed accessor takes
/// `impl Into<NodeKey>`, so plain `&str`, `usize`, and [`NodeId`] values
/// work directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKey {
    /// Stable node identity.
    Node(NodeId),
    /// Display name, resolved against the current skeleton at call time.
    Name(String),
    /// Position in the skeleton's node ordering.
    Index(usize),
}

impl From<NodeId> for NodeKey {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<&Node> for NodeKey {
    fn from(node: &Node) -> Self {
        Self::Node(node.id())
    }
}

impl From<&str> for NodeKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for NodeKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "'{name}'"),
            Self::Index(index) => write!(f, "index {index}"),
        }
    }
}

/// An annotation schema: an ordered sequence of uniquely named nodes, an
/// edge list, and a symmetry list.
///
/// Skeletons are mutable after instances already reference them. Structural
/// changes (node add/delete) bump an internal version counter; instances use
/// it to lazily reconcile their point storage on next access. Renaming a
/// node is non-structural and does not bump the version — point storage is
/// keyed by [`NodeId`], so data stays reachable under the new name.
///
/// # Example
///
/// ```
/// use pose_labels::Skeleton;
///
/// let mut skeleton = Skeleton::new("fly");
/// skeleton.add_nodes(["head", "thorax", "abdomen"]).unwrap();
/// skeleton.add_edge("head", "thorax").unwrap();
///
/// assert_eq!(skeleton.len(), 3);
/// assert_eq!(skeleton.index_of("thorax"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    id: SkeletonId,
    name: String,
    version: u64,
    nodes: Vec<Node>,
    edges: Vec<(NodeId, NodeId)>,
    symmetries: Vec<(NodeId, NodeId)>,
}

impl Skeleton {
    /// Creates an empty skeleton.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SkeletonId::next(),
            name: name.into(),
            version: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            symmetries: Vec::new(),
        }
    }

    /// Creates a skeleton from node names.
    ///
    /// # Errors
    ///
    /// Returns an error if a name appears more than once.
    pub fn from_names<I, S>(name: impl Into<String>, node_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut skeleton = Self::new(name);
        skeleton.add_nodes(node_names)?;
        Ok(skeleton)
    }

    /// Creates a skeleton from node names and edges given as index pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a name appears more than once or an edge index
    /// is out of range.
    pub fn from_names_and_edges<I, S>(
        name: impl Into<String>,
        node_names: I,
        edges: &[(usize, usize)],
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut skeleton = Self::from_names(name, node_names)?;
        for &(a, b) in edges {
            skeleton.add_edge(a, b)?;
        }
        Ok(skeleton)
    }

    /// Returns the schema identity.
    #[must_use]
    pub const fn id(&self) -> SkeletonId {
        self.id
    }

    /// Returns the skeleton name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the structural version counter.
    ///
    /// Bumped by node add/delete; unchanged by renames and edge edits.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the skeleton has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the ordered nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the node names in order.
    #[must_use]
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(Node::name).collect()
    }

    /// Gets the position of a node by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Returns `true` if a node with this name exists.
    #[must_use]
    pub fn has_node(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Resolves any key form to a position in the node ordering.
    ///
    /// This is the single normalization step behind every keyed accessor.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve against the current
    /// schema.
    pub fn resolve(&self, key: &NodeKey) -> Result<usize> {
        match key {
            NodeKey::Index(index) => {
                if *index < self.nodes.len() {
                    Ok(*index)
                } else {
                    Err(PoseLabelsError::node_index_out_of_range(
                        *index,
                        self.nodes.len(),
                    ))
                }
            }
            NodeKey::Name(name) => self
                .index_of(name)
                .ok_or_else(|| PoseLabelsError::unknown_node(name.clone())),
            NodeKey::Node(id) => self
                .nodes
                .iter()
                .position(|n| n.id == *id)
                .ok_or_else(|| PoseLabelsError::unknown_node(id.to_string())),
        }
    }

    /// Gets a node by any key form.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn node(&self, key: impl Into<NodeKey>) -> Result<&Node> {
        let pos = self.resolve(&key.into())?;
        Ok(&self.nodes[pos])
    }

    /// Adds a node, returning its stable identity.
    ///
    /// Structural change: bumps the version counter.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with this name already exists.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeId> {
        let name = name.into();
        if self.has_node(&name) {
            return Err(PoseLabelsError::duplicate_node(name));
        }
        let node = Node::new(name);
        let id = node.id;
        self.nodes.push(node);
        self.version += 1;
        Ok(id)
    }

    /// Adds several nodes in order.
    ///
    /// # Errors
    ///
    /// Returns an error on the first duplicate name; nodes added before the
    /// duplicate remain.
    pub fn add_nodes<I, S>(&mut self, names: I) -> Result<Vec<NodeId>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(|name| self.add_node(name)).collect()
    }

    /// Deletes a node and its incident edges and symmetries.
    ///
    /// Structural change: bumps the version counter. Instance point storage
    /// drops the node's entry on next access.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve.
    pub fn delete_node(&mut self, key: impl Into<NodeKey>) -> Result<()> {
        let pos = self.resolve(&key.into())?;
        let id = self.nodes[pos].id;
        self.nodes.remove(pos);
        self.edges.retain(|&(a, b)| a != id && b != id);
        self.symmetries.retain(|&(a, b)| a != id && b != id);
        self.version += 1;
        Ok(())
    }

    /// Renames a node.
    ///
    /// Non-structural: existing references by [`NodeId`] keep working, and
    /// instance data stays reachable under the new name. Lookups under the
    /// old name fail afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not resolve or the new name is
    /// already taken by a different node.
    pub fn relabel_node(&mut self, key: impl Into<NodeKey>, new_name: impl Into<String>) -> Result<()> {
        let pos = self.resolve(&key.into())?;
        let new_name = new_name.into();
        if self.index_of(&new_name).is_some_and(|other| other != pos) {
            return Err(PoseLabelsError::duplicate_node(new_name));
        }
        self.nodes[pos].name = new_name;
        Ok(())
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either key does not resolve.
    pub fn add_edge(&mut self, from: impl Into<NodeKey>, to: impl Into<NodeKey>) -> Result<()> {
        let a = self.node(from)?.id;
        let b = self.node(to)?.id;
        if !self.edges.contains(&(a, b)) {
            self.edges.push((a, b));
        }
        Ok(())
    }

    /// Returns the edges as node-id pairs.
    #[must_use]
    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    /// Returns the edges as position pairs in the current node ordering.
    #[must_use]
    pub fn edge_indices(&self) -> Vec<(usize, usize)> {
        let pos = |id: NodeId| self.nodes.iter().position(|n| n.id == id);
        self.edges
            .iter()
            .filter_map(|&(a, b)| Some((pos(a)?, pos(b)?)))
            .collect()
    }

    /// Declares two nodes as left/right symmetric.
    ///
    /// # Errors
    ///
    /// Returns an error if either key does not resolve.
    pub fn add_symmetry(&mut self, a: impl Into<NodeKey>, b: impl Into<NodeKey>) -> Result<()> {
        let a = self.node(a)?.id;
        let b = self.node(b)?.id;
        if !self.symmetries.contains(&(a, b)) && !self.symmetries.contains(&(b, a)) {
            self.symmetries.push((a, b));
        }
        Ok(())
    }

    /// Returns the symmetry pairs.
    #[must_use]
    pub fn symmetries(&self) -> &[(NodeId, NodeId)] {
        &self.symmetries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_skeleton() -> Skeleton {
        Skeleton::from_names("fly", ["head", "thorax", "abdomen"]).unwrap()
    }

    #[test]
    fn skeleton_from_names() {
        let skel = sample_skeleton();
        assert_eq!(skel.len(), 3);
        assert_eq!(skel.node_names(), vec!["head", "thorax", "abdomen"]);
        assert!(!skel.is_empty());
    }

    #[test]
    fn skeleton_duplicate_node_rejected() {
        let mut skel = sample_skeleton();
        assert!(skel.add_node("head").is_err());
        assert_eq!(skel.len(), 3);
    }

    #[test]
    fn skeleton_resolve_forms() {
        let skel = sample_skeleton();
        let id = skel.nodes()[1].id();

        assert_eq!(skel.resolve(&NodeKey::from("thorax")).unwrap(), 1);
        assert_eq!(skel.resolve(&NodeKey::from(1usize)).unwrap(), 1);
        assert_eq!(skel.resolve(&NodeKey::from(id)).unwrap(), 1);
    }

    #[test]
    fn skeleton_resolve_unknown() {
        let skel = sample_skeleton();
        assert!(skel.resolve(&NodeKey::from("wing")).is_err());
        assert!(skel.resolve(&NodeKey::from(3usize)).is_err());
    }

    #[test]
    fn skeleton_version_bumps_on_structural_change() {
        let mut skel = sample_skeleton();
        let v0 = skel.version();

        skel.add_node("wing").unwrap();
        assert!(skel.version() > v0);

        let v1 = skel.version();
        skel.delete_node("wing").unwrap();
        assert!(skel.version() > v1);
    }

    #[test]
    fn skeleton_relabel_keeps_version_and_identity() {
        let mut skel = sample_skeleton();
        let v0 = skel.version();
        let id = skel.node("head").unwrap().id();

        skel.relabel_node("head", "Head").unwrap();

        assert_eq!(skel.version(), v0);
        assert_eq!(skel.node("Head").unwrap().id(), id);
        assert!(skel.node("head").is_err());
    }

    #[test]
    fn skeleton_relabel_duplicate_rejected() {
        let mut skel = sample_skeleton();
        assert!(skel.relabel_node("head", "thorax").is_err());
        // Renaming a node to its own name is a no-op, not a duplicate.
        assert!(skel.relabel_node("head", "head").is_ok());
    }

    #[test]
    fn skeleton_edges() {
        let mut skel = sample_skeleton();
        skel.add_edge("head", "thorax").unwrap();
        skel.add_edge("thorax", "abdomen").unwrap();
        // Duplicate edges collapse.
        skel.add_edge("head", "thorax").unwrap();

        assert_eq!(skel.edges().len(), 2);
        assert_eq!(skel.edge_indices(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn skeleton_delete_node_drops_incident_edges() {
        let mut skel = sample_skeleton();
        skel.add_edge("head", "thorax").unwrap();
        skel.add_edge("thorax", "abdomen").unwrap();
        skel.add_symmetry("head", "abdomen").unwrap();

        skel.delete_node("thorax").unwrap();

        assert!(skel.edges().is_empty());
        assert_eq!(skel.symmetries().len(), 1);
        assert_eq!(skel.len(), 2);
    }

    #[test]
    fn skeleton_from_names_and_edges() {
        let skel =
            Skeleton::from_names_and_edges("pair", ["a", "b", "c"], &[(0, 1), (1, 2)]).unwrap();
        assert_eq!(skel.edge_indices(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn skeleton_clone_shares_identity() {
        let skel = sample_skeleton();
        let copy = skel.clone();
        assert_eq!(skel.id(), copy.id());
        assert_eq!(skel.version(), copy.version());
    }

    #[test]
    fn node_ids_unique_across_skeletons() {
        let a = sample_skeleton();
        let b = sample_skeleton();
        for node in a.nodes() {
            assert!(b.nodes().iter().all(|n| n.id() != node.id()));
        }
    }

    #[test]
    fn skeleton_serialization() {
        let skel = sample_skeleton();
        let json = serde_json::to_string(&skel);
        assert!(json.is_ok());

        let parsed: std::result::Result<Skeleton, _> =
            serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_else(|_| Skeleton::new("x")).len(), 3);
    }
}
