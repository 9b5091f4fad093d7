//! Membership paths and their verification.

use serde::{Deserialize, Serialize};
use spool_common::{Digest, HashDomain};

/// Side on which a sibling sits relative to the running hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// One level of a membership path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub dir: Direction,
    pub value: Digest,
}

/// Sibling path from a leaf up to the root.
///
/// `path` is ordered leaf-to-root. A non-member carries an empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    pub is_member: bool,
    pub path: Vec<PathStep>,
}

impl MerklePath {
    pub fn non_member() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn siblings(&self) -> Vec<Digest> {
        self.path.iter().map(|step| step.value).collect()
    }

    /// Leaf position encoded by the directions: a sibling on the left means
    /// the leaf side is the right child at that level.
    pub fn leaf_index(&self) -> u64 {
        self.path
            .iter()
            .enumerate()
            .filter(|(_, step)| step.dir == Direction::Left)
            .fold(0u64, |acc, (level, _)| acc | (1u64 << level))
    }

    /// Fold `leaf` up the path. `None` for an empty path.
    pub fn compute_root<H: HashDomain>(&self, hasher: &H, leaf: &Digest) -> Option<Digest> {
        if self.path.is_empty() {
            return None;
        }
        let root = self.path.iter().fold(*leaf, |acc, step| match step.dir {
            Direction::Right => hasher.combine(&acc, &step.value),
            Direction::Left => hasher.combine(&step.value, &acc),
        });
        Some(root)
    }
}

/// Check that `value` hashes up `path` to `root`.
///
/// Pure function of its inputs; an empty path never verifies.
pub fn verify_merkle_path<H: HashDomain>(
    hasher: &H,
    value: &Digest,
    root: &Digest,
    path: &MerklePath,
) -> bool {
    path.compute_root(hasher, value)
        .map(|computed| computed == *root)
        .unwrap_or(false)
}
