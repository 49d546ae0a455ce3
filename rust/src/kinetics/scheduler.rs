//! Binary tree over the flakes of a tube.
//!
//! Nodes live in an arena and refer to each other by index. Each node keeps
//! the occupied-cell rate and growth-site count of its subtree separately, so
//! selection weights can use the current per-site on-rate without touching
//! the tree when the monomer pool changes.

pub type FlakeId = usize;

#[derive(Clone, Copy, Debug)]
enum Kind {
    Leaf(FlakeId),
    Branch(usize, usize),
}

#[derive(Clone, Debug)]
struct Node {
    parent: Option<usize>,
    kind: Kind,
    rate: f64,
    empty: u64,
    leaves: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
    /// Arena slot of each flake's leaf.
    leaf_of: Vec<Option<usize>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].leaves)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn contains(&self, id: FlakeId) -> bool {
        matches!(self.leaf_of.get(id), Some(Some(_)))
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Attach a flake. The new leaf splits the leaf at the end of the
    /// lighter (fewer-leaf) path, which keeps the tree balanced.
    pub fn insert(&mut self, id: FlakeId, rate: f64, empty: u32) {
        if self.contains(id) {
            self.update(id, rate, empty);
            return;
        }
        let leaf = self.alloc(Node {
            parent: None,
            kind: Kind::Leaf(id),
            rate,
            empty: empty as u64,
            leaves: 1,
        });
        if self.leaf_of.len() <= id {
            self.leaf_of.resize(id + 1, None);
        }
        self.leaf_of[id] = Some(leaf);

        let Some(mut at) = self.root else {
            self.root = Some(leaf);
            return;
        };
        while let Kind::Branch(l, r) = self.nodes[at].kind {
            at = if self.nodes[l].leaves <= self.nodes[r].leaves { l } else { r };
        }

        // Step: replace `at` with a branch holding `at` and the new leaf
        let parent = self.nodes[at].parent;
        let branch = self.alloc(Node {
            parent,
            kind: Kind::Branch(at, leaf),
            rate: 0.0,
            empty: 0,
            leaves: 0,
        });
        self.replace_child(parent, at, branch);
        self.nodes[at].parent = Some(branch);
        self.nodes[leaf].parent = Some(branch);
        self.refresh_up(Some(branch));
    }

    /// Detach a flake; its sibling subtree takes the parent's place.
    pub fn remove(&mut self, id: FlakeId) {
        let Some(leaf) = self.leaf_of.get_mut(id).and_then(Option::take) else {
            return;
        };
        self.free.push(leaf);
        let Some(parent) = self.nodes[leaf].parent else {
            self.root = None;
            return;
        };
        let Kind::Branch(l, r) = self.nodes[parent].kind else {
            return;
        };
        let sibling = if l == leaf { r } else { l };
        let grand = self.nodes[parent].parent;
        self.nodes[sibling].parent = grand;
        self.replace_child(grand, parent, sibling);
        self.free.push(parent);
        self.refresh_up(grand);
    }

    /// Set a flake's aggregates and refresh its ancestors.
    pub fn update(&mut self, id: FlakeId, rate: f64, empty: u32) {
        let Some(Some(leaf)) = self.leaf_of.get(id).copied() else {
            return;
        };
        self.nodes[leaf].rate = rate;
        self.nodes[leaf].empty = empty as u64;
        let parent = self.nodes[leaf].parent;
        self.refresh_up(parent);
    }

    fn replace_child(&mut self, parent: Option<usize>, old: usize, new: usize) {
        match parent {
            None => self.root = Some(new),
            Some(p) => {
                if let Kind::Branch(l, r) = self.nodes[p].kind {
                    self.nodes[p].kind = if l == old {
                        Kind::Branch(new, r)
                    } else {
                        Kind::Branch(l, new)
                    };
                }
            }
        }
    }

    fn refresh_up(&mut self, mut at: Option<usize>) {
        while let Some(node) = at {
            if let Kind::Branch(l, r) = self.nodes[node].kind {
                let (a, b) = (&self.nodes[l], &self.nodes[r]);
                let (rate, empty, leaves) = (a.rate + b.rate, a.empty + b.empty, a.leaves + b.leaves);
                let n = &mut self.nodes[node];
                n.rate = rate;
                n.empty = empty;
                n.leaves = leaves;
            }
            at = self.nodes[node].parent;
        }
    }

    /// Root aggregates: occupied-cell rate and growth-site count.
    pub fn totals(&self) -> (f64, u64) {
        self.root
            .map_or((0.0, 0), |r| (self.nodes[r].rate, self.nodes[r].empty))
    }

    /// Total rate given the per-site on-rate.
    pub fn total_rate(&self, on_rate: f64) -> f64 {
        let (rate, empty) = self.totals();
        rate + on_rate * empty as f64
    }

    /// Pick a flake with probability proportional to its total rate.
    ///
    /// `u` is uniform in [0, 1).
    pub fn choose(&self, u: f64, on_rate: f64) -> Option<FlakeId> {
        let mut at = self.root?;
        let weight = |n: &Node| n.rate + on_rate * n.empty as f64;
        let mut target = u * weight(&self.nodes[at]);
        loop {
            match self.nodes[at].kind {
                Kind::Leaf(id) => return Some(id),
                Kind::Branch(l, r) => {
                    let wl = weight(&self.nodes[l]);
                    let wr = weight(&self.nodes[r]);
                    if (target < wl && wl > 0.0) || wr <= 0.0 {
                        at = l;
                    } else {
                        target -= wl;
                        at = r;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_update_remove() {
        let mut s = Scheduler::new();
        s.insert(0, 1.0, 2);
        s.insert(1, 2.0, 0);
        s.insert(2, 0.5, 1);
        assert_eq!(s.len(), 3);
        assert_eq!(s.totals(), (3.5, 3));
        assert_eq!(s.total_rate(2.0), 9.5);

        s.update(1, 4.0, 1);
        assert_eq!(s.totals(), (5.5, 4));

        s.remove(0);
        assert_eq!(s.len(), 2);
        assert_eq!(s.totals(), (4.5, 2));
        assert!(!s.contains(0));

        s.remove(1);
        s.remove(2);
        assert!(s.is_empty());
        assert_eq!(s.total_rate(1.0), 0.0);
        assert_eq!(s.choose(0.5, 1.0), None);
    }

    #[test]
    fn test_choose_proportional() {
        let mut s = Scheduler::new();
        s.insert(0, 1.0, 0);
        s.insert(1, 0.0, 3);
        // weights 1 and 3
        assert_eq!(s.choose(0.2, 1.0), Some(0));
        assert_eq!(s.choose(0.3, 1.0), Some(1));
        // with no on-rate only flake 0 can fire
        assert_eq!(s.choose(0.9, 0.0), Some(0));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut s = Scheduler::new();
        for id in 0..8 {
            s.insert(id, 1.0, 0);
        }
        for id in 0..8 {
            s.remove(id);
        }
        for id in 8..16 {
            s.insert(id, 1.0, 1);
        }
        assert_eq!(s.len(), 8);
        assert_eq!(s.totals(), (8.0, 8));
        assert!(s.nodes.len() <= 15);
    }
}
