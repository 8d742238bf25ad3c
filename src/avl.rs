/*!
 * Order-Statistics AVL Tree
 *
 * Nodes live in a slab arena and link to each other by `NodeId`, with a
 * parent back-link so that any node can be rebalanced, removed or ranked
 * without a search from the root. Every node caches the height and the
 * size of its subtree; the sizes are what make `offset` and `rank`
 * logarithmic.
 *
 * Ordering is not stored in the tree. Callers pass a `less` comparator on
 * insert, which keeps the same tree usable for any payload.
 */

use slab::Slab;
use std::ops::Index;

/// Stable handle to a node. Valid until the node is removed.
pub type NodeId = usize;

#[derive(Debug)]
struct AvlNode<T> {
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    height: u32,
    count: u32,
    val: T,
}

impl<T> AvlNode<T> {
    fn new(val: T) -> Self {
        Self {
            left: None,
            right: None,
            parent: None,
            height: 1,
            count: 1,
            val,
        }
    }
}

#[derive(Debug)]
pub struct AvlTree<T> {
    nodes: Slab<AvlNode<T>>,
    root: Option<NodeId>,
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<NodeId> for AvlTree<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        &self.nodes[id].val
    }
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Slab::new(),
            root: None,
        }
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of nodes linked into the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.count(self.root) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    #[inline]
    fn height(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |i| self.nodes[i].height)
    }

    #[inline]
    fn count(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |i| self.nodes[i].count)
    }

    fn update(&mut self, id: NodeId) {
        let (l, r) = (self.nodes[id].left, self.nodes[id].right);
        let height = 1 + self.height(l).max(self.height(r));
        let count = 1 + self.count(l) + self.count(r);
        let n = &mut self.nodes[id];
        n.height = height;
        n.count = count;
    }

    /// Point `parent`'s link at `old` to `new` instead.
    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: Option<NodeId>) {
        let p = &mut self.nodes[parent];
        if p.left == Some(old) {
            p.left = new;
        } else {
            debug_assert_eq!(p.right, Some(old));
            p.right = new;
        }
    }

    fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let Some(new) = self.nodes[id].right else {
            return id;
        };
        let inner = self.nodes[new].left;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(id);
        }
        self.nodes[id].right = inner;
        self.nodes[new].left = Some(id);
        self.nodes[new].parent = self.nodes[id].parent;
        self.nodes[id].parent = Some(new);
        self.update(id);
        self.update(new);
        new
    }

    fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let Some(new) = self.nodes[id].left else {
            return id;
        };
        let inner = self.nodes[new].right;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(id);
        }
        self.nodes[id].left = inner;
        self.nodes[new].right = Some(id);
        self.nodes[new].parent = self.nodes[id].parent;
        self.nodes[id].parent = Some(new);
        self.update(id);
        self.update(new);
        new
    }

    /// Left subtree is two levels taller.
    fn fix_left(&mut self, id: NodeId) -> NodeId {
        if let Some(l) = self.nodes[id].left {
            if self.height(self.nodes[l].left) < self.height(self.nodes[l].right) {
                let l = self.rotate_left(l);
                self.nodes[id].left = Some(l);
            }
        }
        self.rotate_right(id)
    }

    /// Right subtree is two levels taller.
    fn fix_right(&mut self, id: NodeId) -> NodeId {
        if let Some(r) = self.nodes[id].right {
            if self.height(self.nodes[r].right) < self.height(self.nodes[r].left) {
                let r = self.rotate_right(r);
                self.nodes[id].right = Some(r);
            }
        }
        self.rotate_left(id)
    }

    /// Retrace from `id` to the root, refreshing cached sizes and heights
    /// and rotating wherever the heights of two siblings differ by two.
    /// Returns the root of the whole tree.
    pub fn fix(&mut self, mut id: NodeId) -> NodeId {
        loop {
            self.update(id);
            let lh = self.height(self.nodes[id].left);
            let rh = self.height(self.nodes[id].right);
            let parent = self.nodes[id].parent;
            let from_left = parent.map(|p| self.nodes[p].left == Some(id));
            if lh == rh + 2 {
                id = self.fix_left(id);
            } else if rh == lh + 2 {
                id = self.fix_right(id);
            }
            match (parent, from_left) {
                (Some(p), Some(true)) => {
                    self.nodes[p].left = Some(id);
                    id = p;
                }
                (Some(p), _) => {
                    self.nodes[p].right = Some(id);
                    id = p;
                }
                (None, _) => return id,
            }
        }
    }

    /// Unlink `id` from the tree and return the new root, if any.
    ///
    /// The node stays in the arena with cleared links. Payloads never
    /// move: when `id` has two children its in-order successor is detached
    /// first and then takes over `id`'s links.
    pub fn delete(&mut self, id: NodeId) -> Option<NodeId> {
        let (left, right) = (self.nodes[id].left, self.nodes[id].right);
        let Some((_, right)) = left.zip(right) else {
            let parent = self.nodes[id].parent;
            let child = left.or(right);
            if let Some(c) = child {
                self.nodes[c].parent = parent;
            }
            self.clear_links(id);
            return match parent {
                Some(p) => {
                    self.replace_child(p, id, child);
                    Some(self.fix(p))
                }
                None => child,
            };
        };

        let mut succ = right;
        while let Some(l) = self.nodes[succ].left {
            succ = l;
        }
        let root = self.delete(succ);

        // Rebalancing above may have moved `id`, so read its links now.
        let n = &self.nodes[id];
        let (left, right, parent) = (n.left, n.right, n.parent);
        let (height, count) = (n.height, n.count);
        let s = &mut self.nodes[succ];
        s.left = left;
        s.right = right;
        s.parent = parent;
        s.height = height;
        s.count = count;
        for child in [left, right].into_iter().flatten() {
            self.nodes[child].parent = Some(succ);
        }
        self.clear_links(id);
        match parent {
            Some(p) => {
                self.replace_child(p, id, Some(succ));
                root
            }
            None => Some(succ),
        }
    }

    fn clear_links(&mut self, id: NodeId) {
        let n = &mut self.nodes[id];
        n.left = None;
        n.right = None;
        n.parent = None;
        n.height = 1;
        n.count = 1;
    }

    /// Link an unattached arena node into the tree at its sorted position.
    fn attach<F>(&mut self, id: NodeId, mut less: F)
    where
        F: FnMut(&T, &T) -> bool,
    {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            parent = Some(c);
            go_left = less(&self.nodes[id].val, &self.nodes[c].val);
            cur = if go_left {
                self.nodes[c].left
            } else {
                self.nodes[c].right
            };
        }
        self.nodes[id].parent = parent;
        if let Some(p) = parent {
            if go_left {
                self.nodes[p].left = Some(id);
            } else {
                self.nodes[p].right = Some(id);
            }
        }
        self.root = Some(self.fix(id));
    }

    /// Insert `val`; equal elements go after existing ones.
    pub fn insert<F>(&mut self, val: T, less: F) -> NodeId
    where
        F: FnMut(&T, &T) -> bool,
    {
        let id = self.nodes.insert(AvlNode::new(val));
        self.attach(id, less);
        id
    }

    /// Remove `id` from the tree and hand back its payload.
    pub fn remove(&mut self, id: NodeId) -> T {
        self.root = self.delete(id);
        self.nodes.remove(id).val
    }

    /// Change the ordering key of `id` in place, keeping its handle.
    pub fn rekey<M, F>(&mut self, id: NodeId, mutate: M, less: F)
    where
        M: FnOnce(&mut T),
        F: FnMut(&T, &T) -> bool,
    {
        self.root = self.delete(id);
        mutate(&mut self.nodes[id].val);
        self.attach(id, less);
    }

    /// First node for which `below` is false, assuming `below` holds for
    /// a prefix of the in-order sequence.
    pub fn seek_ge<F>(&self, mut below: F) -> Option<NodeId>
    where
        F: FnMut(&T) -> bool,
    {
        let mut found = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            if below(&self.nodes[c].val) {
                cur = self.nodes[c].right;
            } else {
                found = Some(c);
                cur = self.nodes[c].left;
            }
        }
        found
    }

    /// The node `k` positions away from `id` in sorted order.
    pub fn offset(&self, id: NodeId, k: i64) -> Option<NodeId> {
        let mut node = id;
        let mut pos: i64 = 0;
        while pos != k {
            let n = &self.nodes[node];
            let lc = self.count(n.left) as i64;
            let rc = self.count(n.right) as i64;
            if pos < k && pos + rc >= k {
                let r = n.right?;
                pos += self.count(self.nodes[r].left) as i64 + 1;
                node = r;
            } else if pos > k && pos - lc <= k {
                let l = n.left?;
                pos -= self.count(self.nodes[l].right) as i64 + 1;
                node = l;
            } else {
                let p = n.parent?;
                if self.nodes[p].right == Some(node) {
                    pos -= lc + 1;
                } else {
                    pos += rc + 1;
                }
                node = p;
            }
        }
        Some(node)
    }

    /// Zero-based position of `id` in sorted order.
    pub fn rank(&self, id: NodeId) -> usize {
        let mut rank = self.count(self.nodes[id].left) as usize;
        let mut node = id;
        while let Some(p) = self.nodes[node].parent {
            if self.nodes[p].right == Some(node) {
                rank += self.count(self.nodes[p].left) as usize + 1;
            }
            node = p;
        }
        rank
    }

    pub fn first(&self) -> Option<NodeId> {
        let mut cur = self.root?;
        while let Some(l) = self.nodes[cur].left {
            cur = l;
        }
        Some(cur)
    }

    /// In-order successor.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(mut cur) = self.nodes[id].right {
            while let Some(l) = self.nodes[cur].left {
                cur = l;
            }
            return Some(cur);
        }
        let mut node = id;
        loop {
            let p = self.nodes[node].parent?;
            if self.nodes[p].left == Some(node) {
                return Some(p);
            }
            node = p;
        }
    }

    /// Walk the tree in sorted order starting at `from`.
    pub fn iter_from(&self, from: Option<NodeId>) -> impl Iterator<Item = (NodeId, &T)> + '_ {
        std::iter::successors(from, move |&id| self.next(id)).map(move |id| (id, &self.nodes[id].val))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter_from(self.first()).map(|(_, v)| v)
    }

    /// Check every structural invariant, panicking on the first breach.
    #[cfg(test)]
    pub(crate) fn verify(&self, less: impl Fn(&T, &T) -> bool) {
        fn walk<T>(t: &AvlTree<T>, parent: Option<NodeId>, id: Option<NodeId>, less: &dyn Fn(&T, &T) -> bool) {
            let Some(id) = id else { return };
            let n = &t.nodes[id];
            assert_eq!(n.parent, parent, "parent link of {}", id);
            walk(t, Some(id), n.left, less);
            walk(t, Some(id), n.right, less);
            let (lh, rh) = (t.height(n.left), t.height(n.right));
            assert!(lh.abs_diff(rh) <= 1, "unbalanced at {}: {} vs {}", id, lh, rh);
            assert_eq!(n.height, 1 + lh.max(rh));
            assert_eq!(n.count, 1 + t.count(n.left) + t.count(n.right));
            if let Some(l) = n.left {
                assert!(!less(&n.val, &t.nodes[l].val));
            }
            if let Some(r) = n.right {
                assert!(!less(&t.nodes[r].val, &n.val));
            }
        }
        walk(self, None, self.root, &less);
        assert_eq!(self.len(), self.nodes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn lt(a: &u32, b: &u32) -> bool {
        a < b
    }

    fn sorted(t: &AvlTree<u32>) -> Vec<u32> {
        t.iter().copied().collect()
    }

    fn find(t: &AvlTree<u32>, v: u32) -> Option<NodeId> {
        t.seek_ge(|x| *x < v).filter(|&id| t[id] == v)
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let mut t = AvlTree::new();
        for i in 0..1000 {
            t.insert(i, lt);
            t.verify(lt);
        }
        assert_eq!(sorted(&t), (0..1000).collect::<Vec<_>>());
        // A perfectly balanced tree of 1000 nodes has height 10.
        let root = t.root().unwrap();
        assert!(t.nodes[root].height <= 14);
    }

    #[test]
    fn delete_every_shape() {
        for n in 1..=40u32 {
            for victim in 0..n {
                let mut t = AvlTree::new();
                for i in 0..n {
                    t.insert(i, lt);
                }
                let id = find(&t, victim).unwrap();
                assert_eq!(t.remove(id), victim);
                t.verify(lt);
                let expect: Vec<u32> = (0..n).filter(|&x| x != victim).collect();
                assert_eq!(sorted(&t), expect);
            }
        }
    }

    #[test]
    fn random_ops_match_sorted_multiset() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut t = AvlTree::new();
        let mut model: Vec<u32> = Vec::new();
        for _ in 0..4000 {
            let v = rng.gen_range(0..300);
            if rng.gen_bool(0.6) {
                t.insert(v, lt);
                let at = model.partition_point(|x| *x <= v);
                model.insert(at, v);
            } else if let Some(id) = find(&t, v) {
                t.remove(id);
                let at = model.iter().position(|x| *x == v).unwrap();
                model.remove(at);
            } else {
                assert!(!model.contains(&v));
            }
        }
        t.verify(lt);
        assert_eq!(sorted(&t), model);
    }

    #[test]
    fn offset_and_rank_agree() {
        let mut t = AvlTree::new();
        let ids: Vec<NodeId> = (0..200u32).map(|i| t.insert(i * 2, lt)).collect();
        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(t.rank(id), i);
            for k in -(i as i64)..(200 - i as i64) {
                let got = t.offset(id, k).unwrap();
                assert_eq!(t[got], ((i as i64 + k) * 2) as u32);
            }
            assert_eq!(t.offset(id, -(i as i64) - 1), None);
            assert_eq!(t.offset(id, 200 - i as i64), None);
        }
    }

    #[test]
    fn rekey_keeps_handle() {
        let mut t = AvlTree::new();
        let ids: Vec<NodeId> = (0..50u32).map(|i| t.insert(i, lt)).collect();
        t.rekey(ids[10], |v| *v = 1000, lt);
        t.verify(lt);
        assert_eq!(t[ids[10]], 1000);
        assert_eq!(t.rank(ids[10]), 49);
        assert_eq!(t.len(), 50);
    }

    #[test]
    fn seek_ge_finds_lower_bound() {
        let mut t = AvlTree::new();
        for v in [10u32, 20, 20, 30] {
            t.insert(v, lt);
        }
        let at = |x: u32| t.seek_ge(|v| *v < x).map(|id| t[id]);
        assert_eq!(at(0), Some(10));
        assert_eq!(at(15), Some(20));
        assert_eq!(at(20), Some(20));
        assert_eq!(at(31), None);
    }
}
