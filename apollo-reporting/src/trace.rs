//! The timing tree recorded for one request.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

use crate::graphql::PathSegment;
use crate::graphql::ResponsePath;

/// One resolved field or list-element position. Non-root nodes carry
/// exactly one of `response_name` and `index`; the root carries
/// neither. Offsets are nanoseconds relative to the trace start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    /// Name of the type the field was resolved on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_type: String,

    /// The field's declared return type.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub field_type: String,

    pub start_time: u64,

    /// End offset. A node whose end handler never ran keeps `0`;
    /// incomplete ends are tolerated, not fatal.
    pub end_time: u64,

    /// Children in first-resolved order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TraceError>,
}

/// An error attached to the node whose response path it matched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub message: String,

    /// The serialized error detail; absent when masking is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
}

/// The complete timing record for one request, finalized and emitted
/// exactly once when the request ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration_ns: u64,
    pub http_method: String,
    pub client_name: String,
    pub client_version: String,
    pub client_reference_id: String,
    pub root: TraceNode,
}

/// Builds the node tree during resolution.
///
/// Nodes live in an arena addressed by index; a side table maps
/// stringified response paths to node ids so locating or creating a
/// field's parent is O(1) amortized. Resolution hooks may arrive out of
/// depth-first order (a list element can resolve before any sibling of
/// its parent), so missing ancestors are created on demand, recursing
/// as deep as the path requires.
pub(crate) struct TraceTreeBuilder {
    nodes: Vec<NodeSlot>,
    by_path: HashMap<String, usize>,
}

struct NodeSlot {
    node: TraceNode,
    children: Vec<usize>,
}

impl TraceTreeBuilder {
    /// Starts with the root node registered at the empty path.
    pub(crate) fn new() -> Self {
        let mut by_path = HashMap::new();
        by_path.insert(String::new(), 0);
        Self {
            nodes: vec![NodeSlot {
                node: TraceNode::default(),
                children: Vec::new(),
            }],
            by_path,
        }
    }

    /// The node at `path`, created (along with any missing ancestors)
    /// if this is the first visit.
    pub(crate) fn node_at(&mut self, path: &ResponsePath) -> usize {
        let key = path.to_string();
        if let Some(&id) = self.by_path.get(&key) {
            return id;
        }

        let parent_id = match path.parent() {
            Some(parent) => self.node_at(&parent),
            // The empty path is pre-registered, so a missing entry
            // always has a parent.
            None => 0,
        };

        let mut node = TraceNode::default();
        match path.last() {
            Some(PathSegment::Index(index)) => node.index = Some(*index),
            Some(PathSegment::Key(name)) => node.response_name = Some(name.clone()),
            None => {}
        }

        let id = self.nodes.len();
        self.nodes.push(NodeSlot {
            node,
            children: Vec::new(),
        });
        self.nodes[parent_id].children.push(id);
        self.by_path.insert(key, id);
        id
    }

    pub(crate) fn node_mut(&mut self, id: usize) -> &mut TraceNode {
        &mut self.nodes[id].node
    }

    /// Attach an error to the node matching `path` exactly, or to the
    /// root when no path was given or nothing matches.
    pub(crate) fn attach_error(&mut self, path: Option<&ResponsePath>, error: TraceError) {
        let id = path
            .and_then(|path| self.by_path.get(&path.to_string()).copied())
            .unwrap_or(0);
        self.nodes[id].node.errors.push(error);
    }

    /// Assemble the owned tree, children in first-resolved order.
    pub(crate) fn into_root(mut self) -> TraceNode {
        self.assemble(0)
    }

    fn assemble(&mut self, id: usize) -> TraceNode {
        let children = std::mem::take(&mut self.nodes[id].children);
        let mut node = std::mem::take(&mut self.nodes[id].node);
        node.children = children
            .into_iter()
            .map(|child| self.assemble(child))
            .collect();
        node
    }
}
