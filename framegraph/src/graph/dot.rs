//! Graphviz export.

use std::fmt::{self, Write};

use super::FrameGraph;

impl FrameGraph {
    /// Write the graph in Graphviz `dot` syntax: one cluster per subgraph,
    /// one record node per graph node and one edge per pin connection.
    pub fn write_dot(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "digraph frame_graph {{")?;
        writeln!(out, "    rankdir=LR;")?;
        writeln!(out, "    node [shape=record];")?;

        for (id, subgraph) in self.subgraphs.iter() {
            writeln!(out, "    subgraph cluster_{} {{", id.index())?;
            writeln!(out, "        label=\"{}\";", escape(&subgraph.template))?;

            for &node in &subgraph.nodes {
                let Some(entry) = self.nodes.get(node) else {
                    continue;
                };
                let pins = entry
                    .descriptor
                    .pins()
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("<p{i}> {}", escape(p.name())))
                    .collect::<Vec<_>>()
                    .join(" | ");
                writeln!(
                    out,
                    "        n{} [label=\"{{{} | {{{pins}}}}}\"];",
                    node.index(),
                    escape(entry.descriptor.name())
                )?;
            }
            writeln!(out, "    }}")?;
        }

        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.pins.get(edge.from), self.pins.get(edge.to)) else {
                continue;
            };
            writeln!(
                out,
                "    n{}:p{} -> n{}:p{} [label=\"{}\"];",
                from.node.index(),
                from.declaration,
                to.node.index(),
                to.declaration,
                from.kind
            )?;
        }

        writeln!(out, "}}")
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '{' | '}' | '|' | '<' | '>' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
