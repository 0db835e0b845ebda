//! Labeled multi-graph holding every method's PDG, and its line-oriented text
//! format.
//!
//! ```text
//! vertex\t{"id":0,"label":"...","extra":"...",...}
//! edge\t{"src":0,"targ":1,"label":"cfg","src_label":"...","targ_label":"..."}
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufRead, Write};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) type NodeId = usize;

#[derive(Debug, Error)]
pub(crate) enum GraphError {
    #[error("node {0} does not exist")]
    NotFound(NodeId),
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structural identity of a node. Two equal identities are the same node.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub(crate) struct NodeIdentity {
    pub(crate) label: String,
    pub(crate) extra: String,
    pub(crate) package_name: String,
    pub(crate) class_name: String,
    pub(crate) source_file: String,
    /// Signature of the enclosing method.
    pub(crate) method_name: String,
    #[serde(rename = "type")]
    pub(crate) node_type: String,
    pub(crate) start_line: i64,
    pub(crate) start_column: i64,
    pub(crate) end_line: i64,
    pub(crate) end_column: i64,
}

#[derive(Debug)]
struct Node {
    identity: NodeIdentity,
    label: usize,
}

#[derive(Debug, Default)]
struct Nodes {
    nodes: Vec<Node>,
    index: HashMap<NodeIdentity, NodeId>,
    labels: Vec<String>,
    label_index: HashMap<String, usize>,
}

impl Nodes {
    fn intern_label(&mut self, label: &str) -> usize {
        if let Some(number) = self.label_index.get(label) {
            return *number;
        }
        let number = self.labels.len();
        self.labels.push(label.to_string());
        self.label_index.insert(label.to_string(), number);
        number
    }

    fn push(&mut self, identity: NodeIdentity) -> NodeId {
        let id = self.nodes.len();
        let label = self.intern_label(&identity.label);
        self.index.entry(identity.clone()).or_insert(id);
        self.nodes.push(Node { identity, label });
        id
    }

    fn label(&self, id: NodeId) -> Result<&str, GraphError> {
        self.nodes
            .get(id)
            .map(|node| self.labels[node.label].as_str())
            .ok_or(GraphError::NotFound(id))
    }
}

type Edges = BTreeMap<String, BTreeMap<NodeId, BTreeSet<NodeId>>>;

/// Nodes deduplicated by identity, with dense ids, and edges stored as
/// tag -> source -> destinations.
///
/// Every operation takes `&self`. Id assignment happens under one mutex, so
/// concurrent producers never receive the same id for different nodes.
#[derive(Debug, Default)]
pub(crate) struct LabeledMultiGraph {
    nodes: Mutex<Nodes>,
    edges: RwLock<Edges>,
}

#[derive(Serialize)]
struct VertexRecord<'a> {
    id: NodeId,
    label: &'a str,
    extra: &'a str,
    package_name: &'a str,
    class_name: &'a str,
    source_file: &'a str,
    method_name: &'a str,
    #[serde(rename = "type")]
    node_type: &'a str,
    start_line: i64,
    start_column: i64,
    end_line: i64,
    end_column: i64,
}

#[derive(Serialize)]
struct EdgeRecord<'a> {
    src: NodeId,
    targ: NodeId,
    label: &'a str,
    src_label: &'a str,
    targ_label: &'a str,
}

#[derive(Deserialize)]
struct ParsedVertex {
    id: NodeId,
    #[serde(flatten)]
    identity: NodeIdentity,
}

#[derive(Deserialize)]
struct ParsedEdge {
    src: NodeId,
    targ: NodeId,
    label: String,
}

impl LabeledMultiGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Id of the node with this identity, created if it does not exist yet.
    pub(crate) fn add_node(&self, identity: NodeIdentity) -> NodeId {
        let mut nodes = self.nodes.lock();
        if let Some(id) = nodes.index.get(&identity) {
            return *id;
        }
        nodes.push(identity)
    }

    pub(crate) fn label(&self, id: NodeId) -> Result<String, GraphError> {
        self.nodes.lock().label(id).map(str::to_string)
    }

    /// Replace the label shown for `id`. The identity used for deduplication
    /// keeps the label the node was created with.
    pub(crate) fn set_label(&self, id: NodeId, label: &str) -> Result<(), GraphError> {
        let mut nodes = self.nodes.lock();
        if id >= nodes.nodes.len() {
            return Err(GraphError::NotFound(id));
        }
        let number = nodes.intern_label(label);
        nodes.nodes[id].label = number;
        Ok(())
    }

    /// The node's identity, carrying its current label.
    pub(crate) fn node(&self, id: NodeId) -> Result<NodeIdentity, GraphError> {
        let nodes = self.nodes.lock();
        let label = nodes.label(id)?.to_string();
        Ok(NodeIdentity {
            label,
            ..nodes.nodes[id].identity.clone()
        })
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.lock().nodes.len()
    }

    pub(crate) fn add_edge(&self, src: NodeId, dst: NodeId, tag: &str) -> Result<(), GraphError> {
        let count = self.node_count();
        for id in [src, dst] {
            if id >= count {
                return Err(GraphError::NotFound(id));
            }
        }
        let mut edges = self.edges.write();
        edges
            .entry(tag.to_string())
            .or_default()
            .entry(src)
            .or_default()
            .insert(dst);
        Ok(())
    }

    pub(crate) fn has_edge(&self, src: NodeId, dst: NodeId, tag: &str) -> bool {
        self.edges
            .read()
            .get(tag)
            .and_then(|by_src| by_src.get(&src))
            .is_some_and(|dsts| dsts.contains(&dst))
    }

    /// All edges as `(src, dst, tag)`, grouped by tag, then source, then
    /// destination.
    pub(crate) fn edges(&self) -> Vec<(NodeId, NodeId, String)> {
        let edges = self.edges.read();
        let mut out = Vec::new();
        for (tag, by_src) in edges.iter() {
            for (src, dsts) in by_src {
                for dst in dsts {
                    out.push((*src, *dst, tag.clone()));
                }
            }
        }
        out
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges
            .read()
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    /// Copy every node and edge of `fragment` into this graph, returning the
    /// id each fragment node received here.
    pub(crate) fn absorb(&self, fragment: LabeledMultiGraph) -> Result<Vec<NodeId>, GraphError> {
        let Nodes { nodes, labels, .. } = fragment.nodes.into_inner();
        let mut remap = Vec::with_capacity(nodes.len());
        for node in nodes {
            let current = labels[node.label].clone();
            let relabeled = node.identity.label != current;
            let id = self.add_node(node.identity);
            if relabeled {
                self.set_label(id, &current)?;
            }
            remap.push(id);
        }
        for (tag, by_src) in fragment.edges.into_inner() {
            for (src, dsts) in by_src {
                for dst in dsts {
                    self.add_edge(remap[src], remap[dst], &tag)?;
                }
            }
        }
        Ok(remap)
    }

    /// Backward slices from every node currently labeled `label`, in id order.
    ///
    /// A slice holds the node, every node it transitively depends on over any
    /// edge tag, and every edge among those nodes. Kept nodes are renumbered
    /// densely, keeping their relative order.
    pub(crate) fn slice(&self, label: &str) -> Result<Vec<LabeledMultiGraph>, GraphError> {
        let starts: Vec<NodeId> = {
            let nodes = self.nodes.lock();
            (0..nodes.nodes.len())
                .filter(|id| nodes.label(*id).is_ok_and(|current| current == label))
                .collect()
        };
        if starts.is_empty() {
            return Ok(Vec::new());
        }

        let edges = self.edges();
        let mut parents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (src, dst, _) in &edges {
            parents.entry(*dst).or_default().push(*src);
        }

        let mut slices = Vec::with_capacity(starts.len());
        for start in starts {
            let mut kept = BTreeSet::from([start]);
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for parent in parents.get(&node).into_iter().flatten() {
                    if kept.insert(*parent) {
                        stack.push(*parent);
                    }
                }
            }

            let slice = LabeledMultiGraph::new();
            let mut remap = HashMap::with_capacity(kept.len());
            for id in kept {
                let identity = self.node(id)?;
                let new_id = slice.nodes.lock().push(identity);
                remap.insert(id, new_id);
            }
            for (src, dst, tag) in &edges {
                if let (Some(src), Some(dst)) = (remap.get(src), remap.get(dst)) {
                    slice.add_edge(*src, *dst, tag)?;
                }
            }
            slices.push(slice);
        }
        Ok(slices)
    }

    /// Write vertex records in id order, then edge records by tag, source and
    /// destination.
    pub(crate) fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), GraphError> {
        let nodes = self.nodes.lock();
        for (id, node) in nodes.nodes.iter().enumerate() {
            let identity = &node.identity;
            let record = VertexRecord {
                id,
                label: &nodes.labels[node.label],
                extra: &identity.extra,
                package_name: &identity.package_name,
                class_name: &identity.class_name,
                source_file: &identity.source_file,
                method_name: &identity.method_name,
                node_type: &identity.node_type,
                start_line: identity.start_line,
                start_column: identity.start_column,
                end_line: identity.end_line,
                end_column: identity.end_column,
            };
            writer.write_all(b"vertex\t")?;
            serde_json::to_writer(&mut *writer, &record)?;
            writer.write_all(b"\n")?;
        }

        let edges = self.edges.read();
        for (tag, by_src) in edges.iter() {
            for (src, dsts) in by_src {
                for dst in dsts {
                    let record = EdgeRecord {
                        src: *src,
                        targ: *dst,
                        label: tag,
                        src_label: nodes.label(*src)?,
                        targ_label: nodes.label(*dst)?,
                    };
                    writer.write_all(b"edge\t")?;
                    serde_json::to_writer(&mut *writer, &record)?;
                    writer.write_all(b"\n")?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn serialize(&self) -> Result<String, GraphError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Parse the text format. Records of both kinds may be interleaved; vertex
    /// ids must be dense from 0.
    pub(crate) fn deserialize<R: BufRead>(reader: R) -> Result<Self, GraphError> {
        let mut vertices = Vec::new();
        let mut edges = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: String| GraphError::Malformed {
                line: number,
                reason,
            };
            let (kind, payload) = line
                .split_once('\t')
                .ok_or_else(|| malformed("missing record kind".to_string()))?;
            match kind {
                "vertex" => {
                    let vertex: ParsedVertex =
                        serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
                    vertices.push((number, vertex));
                }
                "edge" => {
                    let edge: ParsedEdge =
                        serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
                    edges.push((number, edge));
                }
                other => return Err(malformed(format!("unknown record kind `{other}`"))),
            }
        }

        vertices.sort_by_key(|(_, vertex)| vertex.id);
        let graph = LabeledMultiGraph::new();
        {
            let mut nodes = graph.nodes.lock();
            for (expected, (line, vertex)) in vertices.into_iter().enumerate() {
                if vertex.id != expected {
                    return Err(GraphError::Malformed {
                        line,
                        reason: format!("vertex id {} where {expected} was expected", vertex.id),
                    });
                }
                nodes.push(vertex.identity);
            }
        }
        for (line, edge) in edges {
            graph
                .add_edge(edge.src, edge.targ, &edge.label)
                .map_err(|e| GraphError::Malformed {
                    line,
                    reason: e.to_string(),
                })?;
        }
        Ok(graph)
    }
}
