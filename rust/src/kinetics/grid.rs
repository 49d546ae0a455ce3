//! Square lattice of tile ids with a one-cell border.
//!
//! The border lets neighbor reads skip bounds checks. On a periodic board it
//! mirrors the opposite wall (corners included); otherwise it stays empty.

use crate::tileset::{TileId, EAST, NORTH, SOUTH, WEST};

/// Row/column offsets for N, E, S, W.
pub const STEPS: [(isize, isize); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    size_p: u8,
    side: usize,
    stride: usize,
    periodic: bool,
    cells: Vec<TileId>,
}

impl Grid {
    /// Empty board of side `2^size_p`.
    pub fn new(size_p: u8, periodic: bool) -> Self {
        let side = 1usize << size_p;
        let stride = side + 2;
        Self {
            size_p,
            side,
            stride,
            periodic,
            cells: vec![0; stride * stride],
        }
    }

    pub fn size_p(&self) -> u8 {
        self.size_p
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    #[inline]
    fn idx(&self, i: usize, j: usize) -> usize {
        (i + 1) * self.stride + (j + 1)
    }

    /// Occupant of an on-board cell.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> TileId {
        self.cells[self.idx(i, j)]
    }

    pub fn is_occupied(&self, i: usize, j: usize) -> bool {
        self.get(i, j) != 0
    }

    /// Set an on-board cell, keeping the border mirror current.
    pub fn set(&mut self, i: usize, j: usize, n: TileId) {
        let idx = self.idx(i, j);
        self.cells[idx] = n;
        if !self.periodic {
            return;
        }
        let rows = self.mirrors(i);
        let cols = self.mirrors(j);
        for &r in &rows {
            self.set_border(r, j as isize, n);
            for &c in &cols {
                self.set_border(r, c, n);
            }
        }
        for &c in &cols {
            self.set_border(i as isize, c, n);
        }
    }

    /// Border coordinates that mirror row or column `k`.
    fn mirrors(&self, k: usize) -> Vec<isize> {
        let mut out = Vec::with_capacity(2);
        if k == 0 {
            out.push(self.side as isize);
        }
        if k == self.side - 1 {
            out.push(-1);
        }
        out
    }

    fn set_border(&mut self, r: isize, c: isize, n: TileId) {
        let idx = ((r + 1) as usize) * self.stride + (c + 1) as usize;
        self.cells[idx] = n;
    }

    /// Occupants of the N, E, S, W neighbors.
    #[inline]
    pub fn neighbors(&self, i: usize, j: usize) -> [TileId; 4] {
        let idx = self.idx(i, j);
        [
            self.cells[idx - self.stride],
            self.cells[idx + 1],
            self.cells[idx + self.stride],
            self.cells[idx - 1],
        ]
    }

    /// Cell one step away in direction `dir`, or `None` off a bounded board.
    #[inline]
    pub fn step(&self, i: usize, j: usize, dir: usize) -> Option<(usize, usize)> {
        let (di, dj) = STEPS[dir];
        self.offset(i, j, di, dj)
    }

    /// Cell at an arbitrary offset, wrapping on a periodic board.
    pub fn offset(&self, i: usize, j: usize, di: isize, dj: isize) -> Option<(usize, usize)> {
        let side = self.side as isize;
        let (r, c) = (i as isize + di, j as isize + dj);
        if self.periodic {
            Some((r.rem_euclid(side) as usize, c.rem_euclid(side) as usize))
        } else if (0..side).contains(&r) && (0..side).contains(&c) {
            Some((r as usize, c as usize))
        } else {
            None
        }
    }

    /// Occupant at an offset, treating off-board cells as empty.
    pub fn get_offset(&self, i: usize, j: usize, di: isize, dj: isize) -> TileId {
        self.offset(i, j, di, dj)
            .map(|(r, c)| self.get(r, c))
            .unwrap_or(0)
    }

    /// All occupied cells in row-major order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, TileId)> + '_ {
        (0..self.side).flat_map(move |i| {
            (0..self.side).filter_map(move |j| {
                let n = self.get(i, j);
                (n != 0).then_some((i, j, n))
            })
        })
    }

    /// Occupied edges facing an empty cell.
    pub fn perimeter(&self) -> usize {
        self.occupied()
            .map(|(i, j, _)| self.neighbors(i, j).iter().filter(|&&m| m == 0).count())
            .sum()
    }

    /// Board contents as rows.
    pub fn rows(&self) -> Vec<Vec<TileId>> {
        (0..self.side)
            .map(|i| (0..self.side).map(|j| self.get(i, j)).collect())
            .collect()
    }
}

/// Direction from a cell to its orthogonal neighbor, if adjacent.
pub fn direction_between(grid: &Grid, from: (usize, usize), to: (usize, usize)) -> Option<usize> {
    [NORTH, EAST, SOUTH, WEST]
        .into_iter()
        .find(|&dir| grid.step(from.0, from.1, dir) == Some(to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_border_stays_empty() {
        let mut grid = Grid::new(2, false);
        grid.set(0, 0, 3);
        grid.set(3, 3, 4);
        assert_eq!(grid.neighbors(0, 1), [0, 0, 0, 3]);
        assert_eq!(grid.neighbors(0, 0), [0, 0, 0, 0]);
        assert_eq!(grid.step(0, 0, NORTH), None);
        assert_eq!(grid.step(3, 3, EAST), None);
        assert_eq!(grid.get_offset(0, 0, -1, -1), 0);
    }

    #[test]
    fn test_periodic_border_mirrors_opposite_wall() {
        let mut grid = Grid::new(2, true);
        grid.set(0, 0, 5);
        // the corner is visible from all wrapped neighbors
        assert_eq!(grid.neighbors(3, 0)[SOUTH], 5);
        assert_eq!(grid.neighbors(0, 3)[EAST], 5);
        assert_eq!(grid.get_offset(3, 3, 1, 1), 5);
        assert_eq!(grid.step(0, 0, WEST), Some((0, 3)));

        // border cells are consistent with direct reads everywhere
        grid.set(3, 2, 7);
        for i in 0..4 {
            for j in 0..4 {
                let nbrs = grid.neighbors(i, j);
                for dir in 0..4 {
                    let (r, c) = grid.step(i, j, dir).unwrap();
                    assert_eq!(nbrs[dir], grid.get(r, c));
                }
            }
        }
    }

    #[test]
    fn test_perimeter_and_occupied() {
        let mut grid = Grid::new(3, false);
        grid.set(4, 4, 1);
        grid.set(4, 5, 1);
        assert_eq!(grid.occupied().count(), 2);
        assert_eq!(grid.perimeter(), 6);
        assert_eq!(direction_between(&grid, (4, 4), (4, 5)), Some(EAST));
    }
}
