//! Quad-aggregated sum trees over a flake's cells.
//!
//! Level `p` holds `4^p` nodes laid out row-major on a `2^p` side; the last
//! level holds one leaf per cell. Every internal node is the sum of its four
//! children. Parents are recomputed from their children rather than adjusted
//! by deltas, so repeated updates never accumulate rounding error.
//!
//! Two trees share the shape: `rate` holds occupied-cell propensities and
//! `empty` counts growth sites.

#[derive(Clone, Debug)]
pub struct RateTree {
    size_p: u8,
    rate: Vec<Vec<f64>>,
    empty: Vec<Vec<u32>>,
}

impl RateTree {
    pub fn new(size_p: u8) -> Self {
        let rate = (0..=size_p).map(|p| vec![0.0; 1 << (2 * p)]).collect();
        let empty = (0..=size_p).map(|p| vec![0; 1 << (2 * p)]).collect();
        Self { size_p, rate, empty }
    }

    #[inline]
    fn leaf_index(&self, i: usize, j: usize) -> usize {
        (i << self.size_p) | j
    }

    /// Set one leaf and refresh its ancestors.
    pub fn set_leaf(&mut self, i: usize, j: usize, rate: f64, growth: bool) {
        let p = self.size_p as usize;
        let idx = self.leaf_index(i, j);
        self.rate[p][idx] = rate;
        self.empty[p][idx] = growth as u32;

        let (mut r, mut c) = (i, j);
        for level in (0..p).rev() {
            r >>= 1;
            c >>= 1;
            let child_side = 1usize << (level + 1);
            let base = (2 * r) * child_side + 2 * c;
            let kids = [base, base + 1, base + child_side, base + child_side + 1];
            let parent = (r << level) | c;
            self.rate[level][parent] = kids.iter().map(|&k| self.rate[level + 1][k]).sum();
            self.empty[level][parent] = kids.iter().map(|&k| self.empty[level + 1][k]).sum();
        }
    }

    #[inline]
    pub fn leaf_rate(&self, i: usize, j: usize) -> f64 {
        self.rate[self.size_p as usize][self.leaf_index(i, j)]
    }

    #[inline]
    pub fn is_growth_site(&self, i: usize, j: usize) -> bool {
        self.empty[self.size_p as usize][self.leaf_index(i, j)] != 0
    }

    /// Sum of occupied-cell propensities.
    #[inline]
    pub fn total_rate(&self) -> f64 {
        self.rate[0][0]
    }

    /// Number of growth sites.
    #[inline]
    pub fn empty_count(&self) -> u32 {
        self.empty[0][0]
    }

    /// Zero every node.
    pub fn clear(&mut self) {
        self.rate.iter_mut().for_each(|level| level.fill(0.0));
        self.empty.iter_mut().for_each(|level| level.fill(0));
    }

    /// Draw a cell with probability proportional to its rate.
    ///
    /// `u` is uniform in [0, 1). One draw is consumed by subdivision; on
    /// rounding overflow the last nonzero child is taken. Returns `None`
    /// when the tree is empty.
    pub fn sample_rate(&self, u: f64) -> Option<(usize, usize)> {
        let total = self.total_rate();
        if !(total > 0.0) {
            return None;
        }
        let mut target = u * total;
        let (mut r, mut c) = (0usize, 0usize);
        for level in 1..=self.size_p as usize {
            let side = 1usize << level;
            let base = (2 * r) * side + 2 * c;
            let kids = [(0, 0), (0, 1), (1, 0), (1, 1)];
            let mut chosen = None;
            for &(dr, dc) in &kids {
                let w = self.rate[level][base + dr * side + dc];
                if w <= 0.0 {
                    continue;
                }
                chosen = Some((dr, dc));
                if target < w {
                    break;
                }
                target -= w;
            }
            let (dr, dc) = chosen?;
            r = 2 * r + dr;
            c = 2 * c + dc;
        }
        Some((r, c))
    }

    /// Draw a growth site uniformly. `u` is uniform in [0, 1).
    pub fn sample_empty(&self, u: f64) -> Option<(usize, usize)> {
        let total = self.empty_count();
        if total == 0 {
            return None;
        }
        let mut target = ((u * total as f64) as u32).min(total - 1);
        let (mut r, mut c) = (0usize, 0usize);
        for level in 1..=self.size_p as usize {
            let side = 1usize << level;
            let base = (2 * r) * side + 2 * c;
            let mut chosen = None;
            for &(dr, dc) in &[(0, 0), (0, 1), (1, 0), (1, 1)] {
                let w = self.empty[level][base + dr * side + dc];
                if target < w {
                    chosen = Some((dr, dc));
                    break;
                }
                target -= w;
            }
            let (dr, dc) = chosen?;
            r = 2 * r + dr;
            c = 2 * c + dc;
        }
        Some((r, c))
    }

    /// Sum of all leaves, for checking the aggregates.
    pub fn leaf_sum(&self) -> (f64, u32) {
        let p = self.size_p as usize;
        (self.rate[p].iter().sum(), self.empty[p].iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_leaf_propagates() {
        let mut tree = RateTree::new(3);
        tree.set_leaf(5, 2, 1.5, false);
        tree.set_leaf(0, 7, 0.0, true);
        assert_eq!(tree.total_rate(), 1.5);
        assert_eq!(tree.empty_count(), 1);
        assert_eq!(tree.sample_rate(0.99), Some((5, 2)));
        assert_eq!(tree.sample_empty(0.5), Some((0, 7)));

        tree.set_leaf(5, 2, 0.0, false);
        assert_eq!(tree.total_rate(), 0.0);
        assert_eq!(tree.sample_rate(0.3), None);
    }

    #[test]
    fn test_sampling_is_proportional() {
        let mut tree = RateTree::new(2);
        tree.set_leaf(0, 0, 1.0, false);
        tree.set_leaf(3, 3, 3.0, false);
        assert_eq!(tree.sample_rate(0.0), Some((0, 0)));
        assert_eq!(tree.sample_rate(0.2), Some((0, 0)));
        assert_eq!(tree.sample_rate(0.3), Some((3, 3)));
        // rounding past the end lands on the last nonzero leaf
        assert_eq!(tree.sample_rate(1.0), Some((3, 3)));
    }

    #[test]
    fn test_size_one_board() {
        let mut tree = RateTree::new(0);
        tree.set_leaf(0, 0, 2.0, false);
        assert_eq!(tree.total_rate(), 2.0);
        assert_eq!(tree.sample_rate(0.7), Some((0, 0)));
    }

    proptest! {
        #[test]
        fn prop_root_matches_leaves(
            updates in prop::collection::vec((0usize..16, 0usize..16, 0.0f64..10.0, any::<bool>()), 1..200)
        ) {
            let mut tree = RateTree::new(4);
            for &(i, j, rate, growth) in &updates {
                tree.set_leaf(i, j, rate, growth);
            }
            let (rate, empty) = tree.leaf_sum();
            prop_assert!((tree.total_rate() - rate).abs() <= 1e-9 * rate.max(1.0));
            prop_assert_eq!(tree.empty_count(), empty);
        }
    }
}
