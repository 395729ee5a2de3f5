//! Graph errors, node activation and ordering.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use crate::error::GraphicsError;

/// Errors raised while wiring, building or executing a frame graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The active nodes contain a cycle. Lists the nodes left unsorted.
    CyclicDependency(Vec<String>),
    /// A required pin has no producer.
    MissingConnection { node: String, pin: String },
    /// Pins of different kinds were connected, or data of the wrong type was accessed.
    TypeMismatch {
        pin: String,
        expected: String,
        found: String,
    },
    /// The pin already has a producer (or, for sinks, a consumer).
    AlreadyConnected { pin: String },
    /// `set_input` on an input that is fed by another subgraph.
    InputConnected { input: String },
    /// No node type registered with this UUID.
    UnknownNode(String),
    /// The node or subgraph has no pin with this name.
    UnknownPin { owner: String, pin: String },
    /// The subgraph was removed or never existed.
    UnknownSubgraph,
    /// No template registered with this name.
    UnknownTemplate(String),
    /// A pin was used before being bound, or its resource was never created.
    InvalidPin(String),
    /// A node reported a failure.
    NodeFailed { node: String, message: String },
    /// Failure in the resource layers.
    Graphics(GraphicsError),
}

impl GraphError {
    /// Error for a node to return from `build` or `execute`. The graph fills
    /// in the node name.
    pub fn node_failed(message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: String::new(),
            message: message.into(),
        }
    }

    /// Attach a node name to errors that do not carry one yet.
    pub(crate) fn in_node(self, name: &str) -> Self {
        match self {
            Self::NodeFailed { node, message } if node.is_empty() => Self::NodeFailed {
                node: name.to_owned(),
                message,
            },
            other => other,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicDependency(nodes) => {
                write!(f, "cyclic dependency between nodes: {}", nodes.join(", "))
            }
            Self::MissingConnection { node, pin } => {
                write!(f, "required pin '{pin}' of node '{node}' is not connected")
            }
            Self::TypeMismatch {
                pin,
                expected,
                found,
            } => write!(f, "type mismatch on pin '{pin}': expected {expected}, found {found}"),
            Self::AlreadyConnected { pin } => write!(f, "pin '{pin}' is already connected"),
            Self::InputConnected { input } => {
                write!(f, "input '{input}' is fed by a connection and cannot be set")
            }
            Self::UnknownNode(node) => write!(f, "unknown node type {node}"),
            Self::UnknownPin { owner, pin } => write!(f, "'{owner}' has no pin named '{pin}'"),
            Self::UnknownSubgraph => write!(f, "unknown subgraph"),
            Self::UnknownTemplate(name) => write!(f, "unknown template '{name}'"),
            Self::InvalidPin(msg) => write!(f, "invalid pin: {msg}"),
            Self::NodeFailed { node, message } => write!(f, "node '{node}' failed: {message}"),
            Self::Graphics(err) => write!(f, "graphics error: {err}"),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graphics(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for GraphError {
    fn from(err: GraphicsError) -> Self {
        Self::Graphics(err)
    }
}

/// Kahn's algorithm over `count` nodes.
///
/// `dependencies` are `(before, after)` pairs of node indices. Nodes that are
/// ready at the same time come out in ascending `sequence` order, so nodes
/// with no dependency relationship keep their instantiation order. On a cycle
/// the indices that could not be sorted are returned as the error.
pub(crate) fn topological_order(
    sequence: &[u64],
    dependencies: &[(usize, usize)],
) -> Result<Vec<usize>, Vec<usize>> {
    let count = sequence.len();
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for &(before, after) in dependencies {
        dependents[before].push(after);
        in_degree[after] += 1;
    }

    let mut ready: BinaryHeap<Reverse<(u64, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse((sequence[index], index)))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, index))) = ready.pop() {
        order.push(index);
        for &next in &dependents[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((sequence[next], next)));
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|i| in_degree[*i] > 0).collect())
    }
}

/// Every node reachable backwards from `roots` through `producers`.
///
/// `producers[i]` lists the nodes feeding node `i`.
pub(crate) fn activate(count: usize, roots: &[usize], producers: &[Vec<usize>]) -> Vec<bool> {
    let mut active = vec![false; count];
    let mut stack: Vec<usize> = roots.to_vec();

    while let Some(node) = stack.pop() {
        if std::mem::replace(&mut active[node], true) {
            continue;
        }
        stack.extend(producers[node].iter().copied().filter(|p| !active[*p]));
    }

    active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_are_respected() {
        // 0 -> 2 -> 1
        let order = topological_order(&[0, 1, 2], &[(0, 2), (2, 1)]).unwrap();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn test_ties_keep_instantiation_order() {
        let order = topological_order(&[5, 3, 4], &[]).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let err = topological_order(&[0, 1, 2], &[(0, 1), (1, 2), (2, 1)]).unwrap_err();
        assert_eq!(err, vec![1, 2]);
    }

    #[test]
    fn test_activation_walks_producers() {
        // 0 -> 1 -> 3, 2 unrelated
        let producers = vec![vec![], vec![0], vec![], vec![1]];
        let active = activate(4, &[3], &producers);
        assert_eq!(active, vec![true, true, false, true]);
    }

    #[test]
    fn test_node_failed_gets_name() {
        let err = GraphError::node_failed("boom").in_node("Blur");
        assert_eq!(err.to_string(), "node 'Blur' failed: boom");

        let named = GraphError::NodeFailed {
            node: "A".into(),
            message: "x".into(),
        };
        assert_eq!(named.clone().in_node("B"), named);
    }

    #[test]
    fn test_graphics_error_converts() {
        let err: GraphError = GraphicsError::OutOfMemory.into();
        assert_eq!(err.to_string(), "graphics error: out of GPU memory");
        assert!(std::error::Error::source(&err).is_some());
    }
}
