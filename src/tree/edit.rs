//! Structural editing: attaching and removing children, degree-two
//! suppression with undo, rerooting and edge collapsing.

use tracing::debug;

use super::{absorb_length, EdgeId, NodeId, Tree};
use crate::bitset::Bitset;
use crate::error::{PhyloError, Result};

/// One reversible step recorded by [`Tree::reversible_remove_child`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalStep {
    /// The node that was taken out of the tree.
    pub node: NodeId,
    /// Its parent at the time of removal.
    pub parent: NodeId,
    /// Its position in `parent`'s child list.
    pub position: usize,
    /// Children moved away from `node` by degree-two suppression.
    pub stolen_children: Vec<NodeId>,
    /// Edge that absorbed `node`'s edge length, if any.
    pub absorbing_edge: Option<EdgeId>,
}

/// Token returned by [`Tree::reversible_remove_child`], consumed by
/// [`Tree::reinsert_nodes`].
#[derive(Debug, Clone, PartialEq)]
#[must_use = "dropping the token makes the removal irreversible"]
pub struct RemovalUndo {
    steps: Vec<RemovalStep>,
}

impl RemovalUndo {
    pub fn steps(&self) -> &[RemovalStep] {
        &self.steps
    }
}

impl Tree {
    fn is_ancestor_or_self(&self, candidate: NodeId, node: NodeId) -> bool {
        self.ancestor_iter(node, true).any(|a| a == candidate)
    }

    fn child_position(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self[parent]
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| {
                PhyloError::Structural(format!("node {child} is not a child of node {parent}"))
            })
    }

    /// Attaches `node` under `parent`, first detaching it from any previous
    /// parent. `pos` indexes the child list after that detachment; `None`
    /// appends. `edge_length` overwrites the node's edge length when given.
    ///
    /// # Errors
    /// [`PhyloError::Structural`] if `node` is `parent` or one of its
    /// ancestors.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        node: NodeId,
        edge_length: Option<f64>,
        pos: Option<usize>,
    ) -> Result<NodeId> {
        self.check_node(parent)?;
        self.check_node(node)?;
        if self.is_ancestor_or_self(node, parent) {
            return Err(PhyloError::Structural(format!(
                "adding node {node} under {parent} would create a cycle"
            )));
        }
        self.attach(parent, node, edge_length, pos);
        Ok(node)
    }

    /// Replaces the child list of `parent`. Former children not in
    /// `children` are detached.
    pub fn set_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        self.check_node(parent)?;
        for &child in children {
            self.check_node(child)?;
        }
        if let Some(&bad) = children
            .iter()
            .find(|&&c| self.is_ancestor_or_self(c, parent))
        {
            return Err(PhyloError::Structural(format!(
                "node {bad} cannot be a child of its own descendant {parent}"
            )));
        }
        for old in self[parent].children.clone() {
            self.detach(old);
        }
        for &child in children {
            self.attach(parent, child, None, None);
        }
        Ok(())
    }

    /// Removes `node` from `parent`'s children.
    ///
    /// With `suppress_deg_two`, a parent left with a single child is spliced
    /// out (its edge length added to the child's), and an unrooted basal
    /// node left with two children is resolved by collapsing one internal
    /// child into it.
    ///
    /// # Errors
    /// [`PhyloError::Structural`] if `node` is not a child of `parent`.
    pub fn remove_child(
        &mut self,
        parent: NodeId,
        node: NodeId,
        suppress_deg_two: bool,
    ) -> Result<NodeId> {
        self.check_node(parent)?;
        self.child_position(parent, node)?;
        self.detach(node);
        if suppress_deg_two {
            self.suppress_after_removal(parent, false);
        }
        debug!(parent = %parent, node = %node, suppress_deg_two, "removed child");
        Ok(node)
    }

    /// Like [`Tree::remove_child`] with degree-two suppression, recording every
    /// step so that [`Tree::reinsert_nodes`] can restore the exact prior
    /// topology, child order and edge lengths.
    pub fn reversible_remove_child(
        &mut self,
        parent: NodeId,
        node: NodeId,
        suppress_deg_two: bool,
    ) -> Result<RemovalUndo> {
        self.check_node(parent)?;
        let position = self.child_position(parent, node)?;
        self.detach(node);
        let mut steps = vec![RemovalStep {
            node,
            parent,
            position,
            stolen_children: Vec::new(),
            absorbing_edge: None,
        }];
        if suppress_deg_two {
            steps.extend(self.suppress_after_removal(parent, true));
        }
        Ok(RemovalUndo { steps })
    }

    /// Undoes a [`Tree::reversible_remove_child`], unwinding its steps in
    /// reverse order.
    pub fn reinsert_nodes(&mut self, undo: RemovalUndo) {
        for step in undo.steps.into_iter().rev() {
            for &child in &step.stolen_children {
                self.attach(step.node, child, None, None);
            }
            self.attach(step.parent, step.node, None, Some(step.position));
            if let Some(edge) = step.absorbing_edge {
                let taken = self.edge_length(step.node);
                if let (Some(len), Some(d)) = (self.edges[edge.0].length.as_mut(), taken) {
                    *len -= d;
                }
            }
        }
    }

    /// Degree-two suppression applied to `node` after one of its children
    /// was removed. Returns the steps taken (recorded only when asked).
    fn suppress_after_removal(&mut self, node: NodeId, record: bool) -> Vec<RemovalStep> {
        let mut steps = Vec::new();
        let children = self[node].children.clone();
        match self[node].parent {
            Some(grandparent) if children.len() == 1 => {
                // splice `node` out, its only child takes its place
                let child = children[0];
                let Some(pos) = self[grandparent].children.iter().position(|&c| c == node) else {
                    return steps;
                };
                self.attach(grandparent, child, None, Some(pos));
                self.detach(node);
                let donor = self.edge_length(node);
                let child_edge = self[child].edge;
                let absorbed = absorb_length(&mut self.edges[child_edge.0].length, donor);
                debug!(node = %node, child = %child, "suppressed degree-two node");
                if record {
                    steps.push(RemovalStep {
                        node,
                        parent: grandparent,
                        position: pos,
                        stolen_children: vec![child],
                        absorbing_edge: absorbed.then_some(child_edge),
                    });
                }
            }
            None if children.len() == 2 => {
                // basal bifurcation: fold an internal child into the base
                let Some(&to_remove) = children.iter().find(|&&c| self[c].is_internal()) else {
                    return steps;
                };
                let Some(&other) = children.iter().find(|&&c| c != to_remove) else {
                    return steps;
                };
                let donor = self.edge_length(to_remove);
                let other_edge = self[other].edge;
                let absorbed = absorb_length(&mut self.edges[other_edge.0].length, donor);
                let pos = self
                    .child_position(node, to_remove)
                    .unwrap_or(children.len());
                self.detach(to_remove);
                let grandchildren = self[to_remove].children.clone();
                for (offset, &gc) in grandchildren.iter().enumerate() {
                    self.attach(node, gc, None, Some(pos + offset));
                }
                debug!(node = %node, collapsed = %to_remove, "resolved basal bifurcation");
                if record {
                    steps.push(RemovalStep {
                        node: to_remove,
                        parent: node,
                        position: pos,
                        stolen_children: grandchildren,
                        absorbing_edge: absorbed.then_some(other_edge),
                    });
                }
            }
            _ => {}
        }
        steps
    }

    /// Collapses `edge` by moving its head's children into its tail (at the
    /// head's position) and discarding the head node.
    ///
    /// Terminal edges and the seed edge are left untouched.
    pub fn collapse_edge(&mut self, edge: EdgeId) {
        if edge.0 >= self.edges.len() {
            return;
        }
        let head = self[edge].head_node;
        let Some(tail) = self[edge].tail_node else {
            return;
        };
        if self[head].is_leaf() {
            return;
        }
        let Ok(pos) = self.child_position(tail, head) else {
            return;
        };
        let children = self[head].children.clone();
        for (offset, &child) in children.iter().enumerate() {
            self.attach(tail, child, None, Some(pos + offset));
        }
        self.detach(head);
    }

    /// Collapses every internal edge within `dist` steps of `node`, walking
    /// toward the root one step per unit of distance.
    pub fn collapse_neighborhood(&mut self, node: NodeId, dist: usize) -> Result<()> {
        self.check_node(node)?;
        let mut current = node;
        for _ in 0..dist {
            let internal_children: Vec<EdgeId> = self[current]
                .children
                .iter()
                .filter(|&&c| self[c].is_internal())
                .map(|&c| self[c].edge)
                .collect();
            for edge in internal_children {
                self.collapse_edge(edge);
            }
            if let Some(parent) = self[current].parent {
                let edge = self[current].edge;
                self.collapse_edge(edge);
                current = parent;
            }
        }
        Ok(())
    }

    /// Reroots the tree so that `node` becomes the seed node.
    ///
    /// Walks the path from the current seed down to `node`, swapping the
    /// edges of each parent/child pair so that every branch keeps its length.
    /// With `update_splits`, split bitmasks on the reversed edges are
    /// complemented within the full-taxa mask and the registry is updated.
    /// With `suppress_deg_two`, a bifurcating old root is spliced out instead
    /// of being kept as a degree-two node.
    ///
    /// With `update_splits` but without `suppress_deg_two`, a bifurcating
    /// old root stays as a degree-two node whose two edges carry the same
    /// split. The registry then keeps only one of them, so
    /// [`Tree::debug_check_tree`] with split checking fails until the
    /// bipartitions are re-encoded.
    ///
    /// # Errors
    /// [`PhyloError::Structural`] if `node` is not part of this tree.
    pub fn reroot_at(
        &mut self,
        node: NodeId,
        update_splits: bool,
        suppress_deg_two: bool,
    ) -> Result<()> {
        self.check_node(node)?;
        let seed = self.seed_node()?;
        let path: Vec<NodeId> = self.ancestor_iter(node, true).collect();
        if path.last() != Some(&seed) {
            return Err(PhyloError::Structural(format!(
                "node {node} is not part of this tree"
            )));
        }
        if path.len() == 1 {
            return Ok(());
        }
        let taxa_mask = if update_splits {
            self.edge_of(seed).split_bitmask.clone()
        } else {
            None
        };

        // path = [node, p1, ..., seed]; re-seed one step at a time from the top
        let mut steps = path[..path.len() - 1].iter().rev().copied();
        if let Some(first) = steps.next() {
            let old_root = self.seed_node()?;
            if suppress_deg_two && self[old_root].children.len() == 2 {
                self.suppress_old_root(first, old_root, update_splits);
            } else {
                self.reseed_step(first, old_root, taxa_mask.as_ref());
            }
        }
        for step in steps {
            let old_root = self.seed_node()?;
            self.reseed_step(step, old_root, taxa_mask.as_ref());
        }
        debug!(node = %node, path_len = path.len(), "rerooted tree");
        Ok(())
    }

    /// Makes `child` the seed by removing the bifurcating `old_root`; its
    /// other child is reattached to `child` with the two edges merged.
    fn suppress_old_root(&mut self, child: NodeId, old_root: NodeId, update_splits: bool) {
        let Some(&sister) = self[old_root].children.iter().find(|&&c| c != child) else {
            return;
        };
        let child_len = self.edge_length(child);
        let sister_edge = self[sister].edge;
        absorb_length(&mut self.edges[sister_edge.0].length, child_len);

        let dropped_edge = self[child].edge;
        let root_edge = self[old_root].edge;
        self.detach(child);
        self.detach(sister);
        if update_splits {
            if let Some(mask) = self.edges[dropped_edge.0].split_bitmask.clone() {
                if self.split_edges.get(&mask) == Some(&dropped_edge) {
                    self.split_edges.remove(&mask);
                }
            }
        }
        self.set_node_edge(old_root, dropped_edge);
        self.set_node_edge(child, root_edge);
        self.attach(child, sister, None, None);
        self.seed_node = Some(child);
    }

    /// Swaps the edges of `old_root` and its child `child`, then hangs
    /// `old_root` below `child`.
    fn reseed_step(&mut self, child: NodeId, old_root: NodeId, taxa_mask: Option<&Bitset>) {
        let child_edge = self[child].edge;
        let root_edge = self[old_root].edge;
        self.detach(child);
        self.set_node_edge(child, root_edge);
        self.set_node_edge(old_root, child_edge);

        if let Some(universe) = taxa_mask {
            if let Some(mask) = self.edges[child_edge.0].split_bitmask.take() {
                if self.split_edges.get(&mask) == Some(&child_edge) {
                    self.split_edges.remove(&mask);
                }
                let flipped = mask.complement_within(universe);
                self.split_edges.insert(flipped.clone(), child_edge);
                self.edges[child_edge.0].split_bitmask = Some(flipped);
            }
        }

        self.attach(child, old_root, None, None);
        self.seed_node = Some(child);
    }

    /// Reroots at the parent of `outgroup` and moves `outgroup` to the first
    /// child position.
    pub fn to_outgroup_position(
        &mut self,
        outgroup: NodeId,
        update_splits: bool,
        suppress_deg_two: bool,
    ) -> Result<()> {
        self.check_node(outgroup)?;
        let parent = self[outgroup].parent.ok_or_else(|| {
            PhyloError::Structural(format!("outgroup node {outgroup} has no parent"))
        })?;
        self.reroot_at(parent, update_splits, suppress_deg_two)?;
        let new_parent = self[outgroup].parent.unwrap_or(parent);
        self.attach(new_parent, outgroup, None, Some(0));
        Ok(())
    }

    /// Turns a bifurcating seed into a basal trifurcation by collapsing one
    /// internal child edge, and marks the tree as unrooted.
    pub fn deroot(&mut self) -> Result<()> {
        let seed = self.seed_node()?;
        let children = self[seed].children.clone();
        if children.len() != 2 {
            return Ok(());
        }
        let (keep, delete) = if self[children[1]].children.len() >= 2 {
            (children[0], children[1])
        } else if self[children[0]].children.len() >= 2 {
            (children[1], children[0])
        } else {
            return Ok(());
        };
        let donor = self.edge_length(delete);
        let keep_edge = self[keep].edge;
        absorb_length(&mut self.edges[keep_edge.0].length, donor);
        let edge = self[delete].edge;
        self.collapse_edge(edge);
        self.is_rooted = false;
        Ok(())
    }
}
