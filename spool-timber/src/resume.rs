//! Rebuilding a tree from its frontier.
//!
//! The frontier pins the digest of every completed left node, which covers
//! `[0, leaf_count)` and is exactly what later appends hash against. The
//! rebuilt tree holds those nodes as digest-only leaves at internal depths.
//! When a deeper frontier node falls inside one of them, the covering node is
//! sealed: it keeps its digest and gains just enough children to reach the
//! deeper node.

use spool_common::{Digest, HashDomain};
use tracing::debug;

use crate::arena::{Node, NodeId, NodeKind, ZERO_LEAF};
use crate::error::{Result, TimberError};
use crate::tree::{bit, frontier_len, frontier_position, Timber};

impl<H: HashDomain> Timber<H> {
    /// Resume from a frontier as returned by [`Timber::frontier`], for a
    /// tree holding `leaf_count` leaves. A full tree's frontier is read
    /// root first.
    ///
    /// Appends, roots and frontiers continue exactly as in the original tree.
    /// Paths can only be produced for leaves appended after the resume point.
    pub fn from_frontier(
        hasher: H,
        height: u8,
        frontier: &[Digest],
        leaf_count: u64,
    ) -> Result<Self> {
        let mut tree = Timber::new(hasher, height)?;
        if leaf_count > tree.capacity() {
            return Err(TimberError::InvalidFrontier(format!(
                "leaf count {} exceeds capacity {}",
                leaf_count,
                tree.capacity()
            )));
        }
        let expected = frontier_len(leaf_count);
        if frontier.len() != expected {
            return Err(TimberError::InvalidFrontier(format!(
                "{} leaves need {} frontier entries, got {}",
                leaf_count,
                expected,
                frontier.len()
            )));
        }
        if leaf_count == 0 {
            return Ok(tree);
        }

        let full = leaf_count == tree.capacity();
        // Shallow nodes first, so deeper ones land inside them.
        for level in (0..expected).rev() {
            let position = frontier_position(leaf_count >> level);
            let depth = height as u32 - level as u32;
            let entry = if full { expected - 1 - level } else { level };
            tree.plant(depth, position, frontier[entry]);
        }
        let top = tree.top;
        tree.refresh_subtree(top);
        tree.resumed_at = leaf_count;
        tree.set_root_digest(leaf_count);

        debug!(
            "Resumed tree of height {} at {} leaves, root={}",
            height,
            leaf_count,
            tree.root()
        );
        Ok(tree)
    }

    /// Place a digest-only leaf at `depth` / `position`.
    fn plant(&mut self, depth: u32, position: u64, value: Digest) {
        if depth == 0 {
            self.top = self.arena.alloc(Node::leaf(value));
            return;
        }
        self.top = self.open(self.top);
        let mut current = self.top;
        for d in 0..depth {
            let go_right = bit(position, depth - 1 - d);
            let child = self.arena.child(current, go_right).unwrap_or(ZERO_LEAF);
            if d + 1 == depth {
                if child != ZERO_LEAF {
                    self.arena.release(child);
                }
                let leaf = self.arena.alloc(Node::leaf(value));
                self.arena.set_child(current, go_right, leaf);
            } else {
                let opened = self.open(child);
                self.arena.set_child(current, go_right, opened);
                current = opened;
            }
        }
    }

    /// Make `id` interior: the empty leaf becomes a fresh branch, a
    /// digest-only leaf becomes a sealed node keeping its digest.
    fn open(&mut self, id: NodeId) -> NodeId {
        match self.arena.get(id).kind {
            NodeKind::Branch { .. } | NodeKind::Sealed { .. } => id,
            NodeKind::Leaf(_) if id == ZERO_LEAF => self.arena.alloc(Node::empty_branch()),
            NodeKind::Leaf(_) => {
                self.arena.set_kind(
                    id,
                    NodeKind::Sealed {
                        left: ZERO_LEAF,
                        right: ZERO_LEAF,
                    },
                );
                id
            }
        }
    }

    /// Post-order rehash of plain branches. Sealed digests stay as planted.
    fn refresh_subtree(&mut self, root: NodeId) {
        let mut stack = vec![(root, false)];
        while let Some((id, children_done)) = stack.pop() {
            match self.arena.get(id).kind {
                NodeKind::Branch { left, right } if !children_done => {
                    stack.push((id, true));
                    stack.push((left, false));
                    stack.push((right, false));
                }
                NodeKind::Branch { .. } => self.refresh(id),
                NodeKind::Sealed { .. } | NodeKind::Leaf(_) => {}
            }
        }
    }
}
