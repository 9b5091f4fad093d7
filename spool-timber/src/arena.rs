//! Node storage for the accumulator.
//!
//! Nodes live in a flat `Vec` and refer to each other by index. Slot 0 is the
//! shared empty leaf: every all-zero subtree points at it, so memory grows
//! with inserted leaves rather than with `2^H`. Slots released by a rollback
//! go on a free list and are handed out again by [`Arena::alloc`].

use spool_common::Digest;

pub(crate) type NodeId = usize;

/// The shared `Leaf(ZERO)`. Never mutated, never freed.
pub(crate) const ZERO_LEAF: NodeId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// A leaf value. Sits at full depth for appended leaves; sits higher up
    /// for subtrees only known by their digest (resumed trees).
    Leaf(Digest),
    Branch { left: NodeId, right: NodeId },
    /// Complete subtree whose digest is authoritative. Only some of its
    /// descendants are materialized, so the digest is never recomputed.
    Sealed { left: NodeId, right: NodeId },
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) digest: Digest,
}

impl Node {
    pub(crate) fn leaf(value: Digest) -> Self {
        Self {
            kind: NodeKind::Leaf(value),
            digest: value,
        }
    }

    pub(crate) fn empty_branch() -> Self {
        Self {
            kind: NodeKind::Branch {
                left: ZERO_LEAF,
                right: ZERO_LEAF,
            },
            digest: Digest::ZERO,
        }
    }

    pub(crate) fn is_interior(&self) -> bool {
        !matches!(self.kind, NodeKind::Leaf(_))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Arena {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::leaf(Digest::ZERO)],
            free: Vec::new(),
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn digest(&self, id: NodeId) -> Digest {
        self.nodes[id].digest
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    pub(crate) fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        debug_assert_ne!(id, ZERO_LEAF);
        self.nodes[id].kind = kind;
    }

    pub(crate) fn set_digest(&mut self, id: NodeId, digest: Digest) {
        debug_assert_ne!(id, ZERO_LEAF);
        self.nodes[id].digest = digest;
    }

    /// Child of an interior node, `right == false` selecting the left one.
    pub(crate) fn child(&self, id: NodeId, right: bool) -> Option<NodeId> {
        match self.nodes[id].kind {
            NodeKind::Branch { left, right: r } | NodeKind::Sealed { left, right: r } => {
                Some(if right { r } else { left })
            }
            NodeKind::Leaf(_) => None,
        }
    }

    pub(crate) fn set_child(&mut self, id: NodeId, right: bool, child: NodeId) {
        debug_assert_ne!(id, ZERO_LEAF);
        match &mut self.nodes[id].kind {
            NodeKind::Branch { left, right: r } | NodeKind::Sealed { left, right: r } => {
                if right {
                    *r = child;
                } else {
                    *left = child;
                }
            }
            NodeKind::Leaf(_) => unreachable!("set_child on a leaf"),
        }
    }

    /// Return a subtree's slots to the free list.
    pub(crate) fn release(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id == ZERO_LEAF {
                continue;
            }
            if let NodeKind::Branch { left, right } | NodeKind::Sealed { left, right } =
                self.nodes[id].kind
            {
                stack.push(left);
                stack.push(right);
            }
            self.nodes[id] = Node::leaf(Digest::ZERO);
            self.free.push(id);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.nodes.truncate(1);
        self.free.clear();
    }

    /// Slots currently holding tree nodes, the sentinel included.
    pub(crate) fn live(&self) -> usize {
        self.nodes.len() - self.free.len()
    }
}
