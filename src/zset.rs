/*!
 * Sorted Set
 *
 * Members are ordered by `(score, name)` in an AVL tree and indexed by
 * name in a hash map that stores tree handles, so both "score of X" and
 * "the n-th member after Y" are cheap.
 */

use crate::avl::{AvlTree, NodeId};
use crate::hashtable::{str_hash, HMap};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct ZNode {
    pub score: f64,
    pub name: Bytes,
}

#[inline]
fn zless(a: &ZNode, b: &ZNode) -> bool {
    key_less(a, b.score, &b.name)
}

/// Whether `n` sorts strictly before `(score, name)`.
#[inline]
fn key_less(n: &ZNode, score: f64, name: &[u8]) -> bool {
    if n.score != score {
        n.score < score
    } else {
        n.name.as_ref() < name
    }
}

#[derive(Default)]
pub struct ZSet {
    tree: AvlTree<ZNode>,
    by_name: HMap<NodeId>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn find(&mut self, name: &[u8]) -> Option<NodeId> {
        let tree = &self.tree;
        self.by_name
            .lookup(str_hash(name), |&id| tree[id].name == name)
            .copied()
    }

    /// Add `name` or move it to `score`. Returns true if it was new.
    pub fn add(&mut self, name: Bytes, score: f64) -> bool {
        if let Some(id) = self.find(&name) {
            if self.tree[id].score != score {
                self.tree.rekey(id, |n| n.score = score, zless);
            }
            return false;
        }
        let hcode = str_hash(&name);
        let id = self.tree.insert(ZNode { score, name }, zless);
        self.by_name.insert(hcode, id);
        true
    }

    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let id = self.find(name)?;
        Some(self.tree[id].score)
    }

    pub fn remove(&mut self, name: &[u8]) -> bool {
        let tree = &self.tree;
        let Some(id) = self.by_name.pop(str_hash(name), |&id| tree[id].name == name) else {
            return false;
        };
        self.tree.remove(id);
        true
    }

    /// Zero-based rank of `name` by ascending `(score, name)`.
    pub fn rank(&mut self, name: &[u8]) -> Option<usize> {
        let id = self.find(name)?;
        Some(self.tree.rank(id))
    }

    /// Up to `limit` members, starting `offset` positions away from the
    /// first member at or after `(score, name)`.
    pub fn query(&self, score: f64, name: &[u8], offset: i64, limit: usize) -> impl Iterator<Item = &ZNode> + '_ {
        let start = self
            .tree
            .seek_ge(|n| key_less(n, score, name))
            .and_then(|id| self.tree.offset(id, offset));
        self.tree.iter_from(start).take(limit).map(|(_, n)| n)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &ZNode> + '_ {
        self.tree.iter()
    }
}
