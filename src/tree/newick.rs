//! Newick and indented-text rendering.

use std::fmt;

use super::{NodeId, Tree};
use crate::taxon::Taxon;

/// Formatting switches for [`Tree::compose_newick`].
pub struct NewickOptions<'a> {
    /// Write `:length` after every node whose edge has a length.
    pub edge_lengths: bool,
    /// Write labels of internal nodes.
    pub include_internal_labels: bool,
    /// Custom edge length rendering; defaults to `f64`'s `Display`.
    pub edge_length_formatter: Option<&'a dyn Fn(f64) -> String>,
    /// Custom taxon label rendering (e.g. a reverse translation table).
    pub taxon_label: Option<&'a dyn Fn(&Taxon) -> String>,
}

impl Default for NewickOptions<'_> {
    fn default() -> Self {
        NewickOptions {
            edge_lengths: true,
            include_internal_labels: false,
            edge_length_formatter: None,
            taxon_label: None,
        }
    }
}

enum Token {
    Open(NodeId),
    Close(NodeId),
    Comma,
}

impl Tree {
    /// Renders the tree in Newick form, without the terminating `;`.
    ///
    /// Children are written in their stored order. An empty tree renders as
    /// an empty string.
    pub fn compose_newick(&self, options: &NewickOptions<'_>) -> String {
        let mut out = String::new();
        let Some(seed) = self.seed_node else {
            return out;
        };
        let mut stack = vec![Token::Open(seed)];
        while let Some(token) = stack.pop() {
            match token {
                Token::Comma => out.push(','),
                Token::Open(id) => {
                    let children = &self[id].children;
                    if children.is_empty() {
                        self.write_node_suffix(&mut out, id, options);
                        continue;
                    }
                    out.push('(');
                    stack.push(Token::Close(id));
                    for (i, &child) in children.iter().enumerate().rev() {
                        stack.push(Token::Open(child));
                        if i > 0 {
                            stack.push(Token::Comma);
                        }
                    }
                }
                Token::Close(id) => {
                    out.push(')');
                    self.write_node_suffix(&mut out, id, options);
                }
            }
        }
        out
    }

    fn write_node_suffix(&self, out: &mut String, id: NodeId, options: &NewickOptions<'_>) {
        let node = &self[id];
        if node.is_leaf() || options.include_internal_labels {
            if let Some(taxon) = node.taxon() {
                match options.taxon_label {
                    Some(render) => out.push_str(&render(taxon)),
                    None => out.push_str(taxon.label()),
                }
            } else if let Some(label) = node.label() {
                out.push_str(label);
            }
        }
        if options.edge_lengths {
            if let Some(len) = self.edge_length(id) {
                out.push(':');
                match options.edge_length_formatter {
                    Some(render) => out.push_str(&render(len)),
                    None => out.push_str(&len.to_string()),
                }
            }
        }
    }

    /// One line per node in pre-order, indented by depth. Leaves show their
    /// taxon label, internal nodes their id. With `splits`, each line is
    /// prefixed with the edge's split bitmask (highest taxon index first).
    pub fn get_indented_form(&self, indentation: &str, splits: bool) -> String {
        let mut out = String::new();
        let Some(seed) = self.seed_node else {
            return out;
        };
        let width = self.namespace.len();
        let mut stack = vec![(seed, 0usize)];
        while let Some((id, level)) = stack.pop() {
            let node = &self[id];
            if splits {
                match &self.edge_of(id).split_bitmask {
                    Some(mask) => out.push_str(&mask.as_split_string(width, '.', '*')),
                    None => out.push_str(&"?".repeat(width)),
                }
                out.push(' ');
            }
            out.push_str(&indentation.repeat(level));
            match (node.is_leaf(), node.taxon()) {
                (true, Some(t)) => out.push_str(t.label()),
                (true, None) => out.push_str("anonymous leaf"),
                (false, _) => {
                    out.push_str("* ");
                    out.push_str(&id.to_string());
                }
            }
            out.push('\n');
            stack.extend(node.children.iter().rev().map(|&c| (c, level + 1)));
        }
        out
    }
}

/// Newick with default options, terminated by `;`.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.compose_newick(&NewickOptions::default()))
    }
}
