//! The append-only accumulator.
//!
//! Leaves are addressed by their index; the binary path of a leaf is the
//! `H`-bit big-endian representation of that index, a `0` bit meaning "go
//! left". Every node caches its digest, so an append or a rollback rehashes
//! only the `H` nodes on the affected path.

use serde::{Deserialize, Serialize};
use spool_common::{Digest, HashAlgorithm, HashDomain};
use tracing::debug;

use crate::arena::{Arena, Node, NodeId, NodeKind, ZERO_LEAF};
use crate::error::{Result, TimberError};
use crate::path::{Direction, MerklePath, PathStep};

/// Default height, matching the on-chain tree.
pub const DEFAULT_TREE_HEIGHT: u8 = 32;

/// Largest supported height; keeps `2^H` within a `u64`.
pub const MAX_TREE_HEIGHT: u8 = 63;

/// Serializable summary of a tree, enough for a verifier to check paths or
/// for [`Timber::from_frontier`] to resume appending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    pub height: u8,
    pub root: Digest,
    pub leaf_count: u64,
    pub frontier: Vec<Digest>,
}

/// Sparse incremental Merkle tree of fixed height.
#[derive(Clone, Debug)]
pub struct Timber<H = HashAlgorithm> {
    hasher: H,
    height: u8,
    pub(crate) arena: Arena,
    pub(crate) top: NodeId,
    root: Digest,
    leaf_count: u64,
    frontier: Vec<Digest>,
    /// Leaves below this index are only known through frontier digests.
    pub(crate) resumed_at: u64,
}

/// Number of frontier entries for a given leaf count.
pub fn frontier_len(leaf_count: u64) -> usize {
    (u64::BITS - leaf_count.leading_zeros()) as usize
}

/// Index of the frontier node at a level holding `completed` nodes: the last
/// one if it is a left child, otherwise its left sibling.
pub(crate) fn frontier_position(completed: u64) -> u64 {
    if completed % 2 == 1 {
        completed - 1
    } else {
        completed - 2
    }
}

impl<H: HashDomain> Timber<H> {
    pub fn new(hasher: H, height: u8) -> Result<Self> {
        if height == 0 || height > MAX_TREE_HEIGHT {
            return Err(TimberError::InvalidHeight(height));
        }
        Ok(Self {
            hasher,
            height,
            arena: Arena::new(),
            top: ZERO_LEAF,
            root: Digest::ZERO,
            leaf_count: 0,
            frontier: Vec::new(),
            resumed_at: 0,
        })
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Frontier in level order: entry `i` is the digest of the most recent
    /// completed left node at level `i`. A full tree lists the same nodes
    /// root first, then down the rightmost edge, matching the on-chain
    /// encoding.
    pub fn frontier(&self) -> &[Digest] {
        &self.frontier
    }

    /// Frontier as a fixed array of `H + 1` slots, padded with `ZERO`.
    pub fn padded_frontier(&self) -> Vec<Digest> {
        let mut slots = self.frontier.clone();
        slots.resize(self.height as usize + 1, Digest::ZERO);
        slots
    }

    /// First leaf index whose path can be produced.
    pub fn resumed_at(&self) -> u64 {
        self.resumed_at
    }

    pub fn state(&self) -> TreeState {
        TreeState {
            height: self.height,
            root: self.root,
            leaf_count: self.leaf_count,
            frontier: self.frontier.clone(),
        }
    }

    /// Arena slots in use; grows with inserted leaves, not with capacity.
    pub fn node_count(&self) -> usize {
        self.arena.live()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mutation
    // ═══════════════════════════════════════════════════════════════════

    /// Append one leaf, returning its index.
    pub fn append(&mut self, value: Digest) -> Result<u64> {
        self.ensure_room(1)?;
        let index = self.insert(value);
        self.frontier = self.calc_frontier();
        debug!("Appended leaf at index {}, root={}", index, self.root);
        Ok(index)
    }

    /// Append many leaves, returning the index of the first. Either all
    /// leaves are inserted or none are.
    pub fn append_all(&mut self, values: &[Digest]) -> Result<u64> {
        let start = self.leaf_count;
        if values.is_empty() {
            return Ok(start);
        }
        self.ensure_room(values.len() as u64)?;
        for value in values {
            self.insert(*value);
        }
        self.frontier = self.calc_frontier();
        debug!(
            "Appended {} leaves starting at index {}, root={}",
            values.len(),
            start,
            self.root
        );
        Ok(start)
    }

    /// Truncate the tree to `new_leaf_count` leaves.
    ///
    /// The result is indistinguishable (root, leaf count, frontier) from a
    /// tree that only ever received those leaves.
    pub fn rollback(&mut self, new_leaf_count: u64) -> Result<()> {
        if new_leaf_count > self.leaf_count {
            return Err(TimberError::InvalidRollback {
                target: new_leaf_count,
                leaf_count: self.leaf_count,
            });
        }
        if new_leaf_count == self.leaf_count {
            return Ok(());
        }
        if new_leaf_count == 0 {
            self.reset();
            debug!("Rolled back to an empty tree");
            return Ok(());
        }
        if new_leaf_count < self.resumed_at {
            return Err(TimberError::InvalidRollback {
                target: new_leaf_count,
                leaf_count: self.leaf_count,
            });
        }

        let last = new_leaf_count - 1;
        let height = self.height as u32;
        let mut trail = Vec::with_capacity(height as usize);
        let mut current = self.top;
        for depth in 0..height {
            if !matches!(self.arena.get(current).kind, NodeKind::Branch { .. }) {
                // Reached a subtree lying wholly below the new leaf count.
                break;
            }
            trail.push(current);
            let go_right = bit(last, height - 1 - depth);
            if !go_right {
                if let Some(right) = self.arena.child(current, true) {
                    if right != ZERO_LEAF {
                        self.arena.release(right);
                        self.arena.set_child(current, true, ZERO_LEAF);
                    }
                }
            }
            current = match self.arena.child(current, go_right) {
                Some(next) => next,
                None => break,
            };
        }
        for &id in trail.iter().rev() {
            self.refresh(id);
        }

        let previous = self.leaf_count;
        self.leaf_count = new_leaf_count;
        self.root = self.arena.digest(self.top);
        self.frontier = self.calc_frontier();
        debug!(
            "Rolled back from {} to {} leaves, root={}",
            previous, new_leaf_count, self.root
        );
        Ok(())
    }

    fn reset(&mut self) {
        self.arena.reset();
        self.top = ZERO_LEAF;
        self.root = Digest::ZERO;
        self.leaf_count = 0;
        self.frontier.clear();
        self.resumed_at = 0;
    }

    fn ensure_room(&self, requested: u64) -> Result<()> {
        let available = self.capacity() - self.leaf_count;
        if requested > available {
            return Err(TimberError::CapacityExceeded {
                capacity: self.capacity(),
                leaf_count: self.leaf_count,
                requested,
            });
        }
        Ok(())
    }

    /// Write `value` at index `leaf_count` and rehash the path. Capacity
    /// must already be checked.
    fn insert(&mut self, value: Digest) -> u64 {
        let index = self.leaf_count;
        let height = self.height as u32;

        if !self.arena.get(self.top).is_interior() {
            self.top = self.arena.alloc(Node::empty_branch());
        }

        let mut trail = Vec::with_capacity(height as usize);
        let mut current = self.top;
        for depth in 0..height {
            trail.push(current);
            let go_right = bit(index, height - 1 - depth);
            let child = self.arena.child(current, go_right).unwrap_or(ZERO_LEAF);

            if depth + 1 == height {
                if child != ZERO_LEAF {
                    self.arena.release(child);
                }
                let leaf = self.arena.alloc(Node::leaf(value));
                self.arena.set_child(current, go_right, leaf);
            } else if self.arena.get(child).is_interior() {
                current = child;
            } else {
                // A leaf met mid-path is expanded into an empty branch.
                if child != ZERO_LEAF {
                    self.arena.release(child);
                }
                let branch = self.arena.alloc(Node::empty_branch());
                self.arena.set_child(current, go_right, branch);
                current = branch;
            }
        }
        for &id in trail.iter().rev() {
            self.refresh(id);
        }

        self.leaf_count += 1;
        self.root = self.arena.digest(self.top);
        index
    }

    /// Recompute a branch digest from its children. Sealed nodes keep theirs.
    pub(crate) fn refresh(&mut self, id: NodeId) {
        if let NodeKind::Branch { left, right } = self.arena.get(id).kind {
            let digest = self
                .hasher
                .combine(&self.arena.digest(left), &self.arena.digest(right));
            self.arena.set_digest(id, digest);
        }
    }

    pub(crate) fn set_root_digest(&mut self, leaf_count: u64) {
        self.leaf_count = leaf_count;
        self.root = self.arena.digest(self.top);
        self.frontier = self.calc_frontier();
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════

    /// Membership path for `value`.
    ///
    /// With `index`, the leaf at that position is checked; without, the
    /// first leaf equal to `value` is used. A leaf holding a different value,
    /// or a value that is nowhere in the tree, yields a non-member.
    pub fn merkle_path(&self, value: &Digest, index: Option<u64>) -> Result<MerklePath> {
        let index = match index {
            Some(index) if index >= self.leaf_count => {
                return Err(TimberError::IndexOutOfRange {
                    index,
                    leaf_count: self.leaf_count,
                })
            }
            Some(index) => index,
            None => match self.index_of(value) {
                Some(index) => index,
                None => return Ok(MerklePath::non_member()),
            },
        };
        if index < self.resumed_at {
            return Err(TimberError::PrunedLeaf {
                index,
                resumed_at: self.resumed_at,
            });
        }

        let height = self.height as u32;
        let mut steps = Vec::with_capacity(height as usize);
        let mut current = self.top;
        for depth in 0..height {
            let (left, right) = match self.arena.get(current).kind {
                NodeKind::Branch { left, right } => (left, right),
                _ => {
                    return Err(TimberError::PrunedLeaf {
                        index,
                        resumed_at: self.resumed_at,
                    })
                }
            };
            if bit(index, height - 1 - depth) {
                steps.push(PathStep {
                    dir: Direction::Left,
                    value: self.arena.digest(left),
                });
                current = right;
            } else {
                steps.push(PathStep {
                    dir: Direction::Right,
                    value: self.arena.digest(right),
                });
                current = left;
            }
        }

        match self.arena.get(current).kind {
            NodeKind::Leaf(stored) if stored == *value => {
                steps.reverse();
                Ok(MerklePath {
                    is_member: true,
                    path: steps,
                })
            }
            _ => Ok(MerklePath::non_member()),
        }
    }

    /// Position of the first leaf equal to `value`, if any.
    pub fn index_of(&self, value: &Digest) -> Option<u64> {
        let mut found = None;
        self.walk_leaves(|index, leaf| {
            if leaf == *value {
                found = Some(index);
                false
            } else {
                true
            }
        });
        found
    }

    /// Leaves from [`Self::resumed_at`] up to the leaf count, in order.
    pub fn leaves(&self) -> Vec<Digest> {
        let mut out = Vec::with_capacity((self.leaf_count - self.resumed_at) as usize);
        self.walk_leaves(|_, leaf| {
            out.push(leaf);
            true
        });
        out
    }

    /// In-order visit of materialized full-depth leaves below the leaf
    /// count. The visitor returns `false` to stop.
    fn walk_leaves<F: FnMut(u64, Digest) -> bool>(&self, mut visit: F) {
        if self.leaf_count == 0 {
            return;
        }
        let height = self.height as u32;
        // (node, depth, index of the subtree's first leaf)
        let mut stack: Vec<(NodeId, u32, u64)> = vec![(self.top, 0, 0)];
        while let Some((id, depth, first)) = stack.pop() {
            let span = 1u64 << (height - depth);
            if first >= self.leaf_count || first + span <= self.resumed_at {
                continue;
            }
            match self.arena.get(id).kind {
                // Frontier leaves planted on resume sit below `resumed_at`.
                NodeKind::Leaf(value) if depth == height && first >= self.resumed_at => {
                    if !visit(first, value) {
                        return;
                    }
                }
                NodeKind::Branch { left, right } => {
                    let half = 1u64 << (height - depth - 1);
                    stack.push((right, depth + 1, first + half));
                    stack.push((left, depth + 1, first));
                }
                // Pruned subtrees hold no enumerable leaves.
                _ => {}
            }
        }
    }

    /// Frontier built from cached digests.
    pub(crate) fn calc_frontier(&self) -> Vec<Digest> {
        let levels = (0..frontier_len(self.leaf_count))
            .map(|level| {
                let completed = self.leaf_count >> level;
                let node = self.node_at(level as u32, frontier_position(completed));
                self.arena.digest(node)
            })
            .collect();
        self.in_wire_order(levels)
    }

    /// Put level-ordered frontier entries in the order [`Self::frontier`]
    /// exposes.
    fn in_wire_order(&self, mut levels: Vec<Digest>) -> Vec<Digest> {
        if self.leaf_count == self.capacity() {
            levels.reverse();
        }
        levels
    }

    /// Node at `level` (0 = leaves) and `position`, or the pruned leaf that
    /// covers it.
    fn node_at(&self, level: u32, position: u64) -> NodeId {
        let depth = self.height as u32 - level;
        let mut current = self.top;
        for d in 0..depth {
            match self.arena.child(current, bit(position, depth - 1 - d)) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    // ═══════════════════════════════════════════════════════════════════
    // Full reduction, bypassing cached digests
    // ═══════════════════════════════════════════════════════════════════

    /// Root recomputed by hashing every materialized node.
    pub fn recompute_root(&self) -> Digest {
        self.reduce(self.top)
    }

    /// Frontier recomputed by full reduction of each frontier subtree.
    pub fn recompute_frontier(&self) -> Vec<Digest> {
        let levels = (0..frontier_len(self.leaf_count))
            .map(|level| {
                let completed = self.leaf_count >> level;
                self.reduce(self.node_at(level as u32, frontier_position(completed)))
            })
            .collect();
        self.in_wire_order(levels)
    }

    fn reduce(&self, id: NodeId) -> Digest {
        let node = self.arena.get(id);
        match node.kind {
            NodeKind::Leaf(value) => value,
            NodeKind::Sealed { .. } => node.digest,
            NodeKind::Branch { left, right } => {
                self.hasher.combine(&self.reduce(left), &self.reduce(right))
            }
        }
    }
}

/// Bit `n` (0 = least significant) of `value`.
pub(crate) fn bit(value: u64, n: u32) -> bool {
    (value >> n) & 1 == 1
}
