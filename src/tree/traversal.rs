//! Explicit-stack traversals over a [`Tree`].
//!
//! None of the iterators recurse, so arbitrarily deep (caterpillar) trees are
//! safe. Every iterator accepts an optional predicate via `with_filter`; the
//! predicate only selects which items are yielded, it never prunes the
//! traversal below a rejected node.

use std::collections::VecDeque;

use super::{Edge, EdgeId, Node, NodeId, Tree};

type NodePredicate<'a> = Box<dyn Fn(&Node) -> bool + 'a>;
type EdgePredicate<'a> = Box<dyn Fn(&Edge) -> bool + 'a>;

fn accepts(filter: &Option<NodePredicate<'_>>, node: &Node) -> bool {
    filter.as_ref().is_none_or(|f| f(node))
}

/// Parents before children, children left to right.
pub struct PreorderIter<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
    filter: Option<NodePredicate<'a>>,
}

impl<'a> PreorderIter<'a> {
    fn new(tree: &'a Tree, start: Option<NodeId>) -> Self {
        PreorderIter {
            tree,
            stack: start.into_iter().collect(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Node) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Iterator for PreorderIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let id = self.stack.pop()?;
            let node = &self.tree[id];
            self.stack.extend(node.children.iter().rev().copied());
            if accepts(&self.filter, node) {
                return Some(id);
            }
        }
    }
}

/// Children (left to right) before their parent.
///
/// Uses the two-phase stack: a node is pushed once to expand its children and
/// once more to be emitted after all of them.
pub struct PostorderIter<'a> {
    tree: &'a Tree,
    stack: Vec<(NodeId, bool)>,
    filter: Option<NodePredicate<'a>>,
}

impl<'a> PostorderIter<'a> {
    fn new(tree: &'a Tree, start: Option<NodeId>) -> Self {
        PostorderIter {
            tree,
            stack: start.map(|s| (s, false)).into_iter().collect(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Node) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Iterator for PostorderIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let (id, expanded) = self.stack.pop()?;
            let node = &self.tree[id];
            if expanded || node.is_leaf() {
                if accepts(&self.filter, node) {
                    return Some(id);
                }
                continue;
            }
            self.stack.push((id, true));
            self.stack
                .extend(node.children.iter().rev().map(|&c| (c, false)));
        }
    }
}

/// Breadth-first, one depth level at a time.
pub struct LevelOrderIter<'a> {
    tree: &'a Tree,
    queue: VecDeque<NodeId>,
    filter: Option<NodePredicate<'a>>,
}

impl<'a> LevelOrderIter<'a> {
    fn new(tree: &'a Tree, start: Option<NodeId>) -> Self {
        LevelOrderIter {
            tree,
            queue: start.into_iter().collect(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Node) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Iterator for LevelOrderIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let id = self.queue.pop_front()?;
            let node = &self.tree[id];
            self.queue.extend(node.children.iter().copied());
            if accepts(&self.filter, node) {
                return Some(id);
            }
        }
    }
}

/// Leaves in post-order.
pub struct LeafIter<'a> {
    inner: PostorderIter<'a>,
    filter: Option<NodePredicate<'a>>,
}

impl<'a> LeafIter<'a> {
    pub fn with_filter(mut self, filter: impl Fn(&Node) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Iterator for LeafIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let tree = self.inner.tree;
        let filter = &self.filter;
        self.inner
            .by_ref()
            .find(|&id| tree[id].is_leaf() && accepts(filter, &tree[id]))
    }
}

/// Maps a node traversal to the edges subtending each visited node.
pub struct EdgeIter<'a, I> {
    tree: &'a Tree,
    nodes: I,
    filter: Option<EdgePredicate<'a>>,
}

impl<'a, I> EdgeIter<'a, I> {
    pub fn with_filter(mut self, filter: impl Fn(&Edge) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<I: Iterator<Item = NodeId>> Iterator for EdgeIter<'_, I> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        loop {
            let node = self.nodes.next()?;
            let edge = self.tree[node].edge;
            if self.filter.as_ref().is_none_or(|f| f(&self.tree[edge])) {
                return Some(edge);
            }
        }
    }
}

/// Walks parent links up to the root.
pub struct AncestorIter<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for AncestorIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree[current].parent;
        Some(current)
    }
}

impl Tree {
    pub fn preorder_node_iter(&self) -> PreorderIter<'_> {
        PreorderIter::new(self, self.seed_node)
    }

    pub fn preorder_iter_from(&self, start: NodeId) -> PreorderIter<'_> {
        PreorderIter::new(self, Some(start))
    }

    pub fn postorder_node_iter(&self) -> PostorderIter<'_> {
        PostorderIter::new(self, self.seed_node)
    }

    pub fn postorder_iter_from(&self, start: NodeId) -> PostorderIter<'_> {
        PostorderIter::new(self, Some(start))
    }

    pub fn level_order_node_iter(&self) -> LevelOrderIter<'_> {
        LevelOrderIter::new(self, self.seed_node)
    }

    pub fn level_order_iter_from(&self, start: NodeId) -> LevelOrderIter<'_> {
        LevelOrderIter::new(self, Some(start))
    }

    pub fn leaf_iter(&self) -> LeafIter<'_> {
        LeafIter {
            inner: self.postorder_node_iter(),
            filter: None,
        }
    }

    pub fn leaf_iter_from(&self, start: NodeId) -> LeafIter<'_> {
        LeafIter {
            inner: self.postorder_iter_from(start),
            filter: None,
        }
    }

    pub fn preorder_edge_iter(&self) -> EdgeIter<'_, PreorderIter<'_>> {
        EdgeIter {
            tree: self,
            nodes: self.preorder_node_iter(),
            filter: None,
        }
    }

    pub fn postorder_edge_iter(&self) -> EdgeIter<'_, PostorderIter<'_>> {
        EdgeIter {
            tree: self,
            nodes: self.postorder_node_iter(),
            filter: None,
        }
    }

    pub fn level_order_edge_iter(&self) -> EdgeIter<'_, LevelOrderIter<'_>> {
        EdgeIter {
            tree: self,
            nodes: self.level_order_node_iter(),
            filter: None,
        }
    }

    /// Walks from `node` up to the root. With `inclusive` the walk starts at
    /// `node` itself, otherwise at its parent.
    pub fn ancestor_iter(&self, node: NodeId, inclusive: bool) -> AncestorIter<'_> {
        let next = if inclusive {
            Some(node)
        } else {
            self[node].parent
        };
        AncestorIter { tree: self, next }
    }

    /// Children of `node`'s parent other than `node`.
    pub fn sibling_nodes(&self, node: NodeId) -> Vec<NodeId> {
        match self[node].parent {
            Some(p) => self[p].children.iter().copied().filter(|&c| c != node).collect(),
            None => Vec::new(),
        }
    }
}
