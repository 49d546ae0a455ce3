//! Connectivity oracle: does removing a group of cells split a flake?
//!
//! Two occupied neighbors are connected when their facing edges bond. Every
//! component left after a removal touches one of the group's *anchors* (the
//! bonded occupied cells just outside it), so the flake splits exactly when
//! the anchors stop being mutually reachable.
//!
//! The fast path walks the ring of cells around the group's bounding box. If
//! all anchors lie on one unbroken run of bonded ring cells they are
//! connected without a scan. Otherwise a breadth-first search decides.

use std::collections::VecDeque;

use super::grid::{direction_between, Grid};
use crate::energetics::EnergyModel;
use crate::tileset::{EAST, NORTH, SOUTH, WEST};

pub type Cell = (usize, usize);

/// Occupied cells outside `group` bonded to a cell of `group`.
pub fn anchors(grid: &Grid, model: &EnergyModel, group: &[Cell]) -> Vec<Cell> {
    let mut out = Vec::new();
    for &(i, j) in group {
        let c = grid.get(i, j);
        for dir in [NORTH, EAST, SOUTH, WEST] {
            let Some(nb) = grid.step(i, j, dir) else {
                continue;
            };
            let m = grid.get(nb.0, nb.1);
            if m == 0 || group.contains(&nb) || out.contains(&nb) {
                continue;
            }
            if model.bonded(c, dir, m) {
                out.push(nb);
            }
        }
    }
    out
}

/// Whether the remaining cells would fall into more than one component.
pub fn would_split(grid: &Grid, model: &EnergyModel, group: &[Cell]) -> bool {
    let anchors = anchors(grid, model, group);
    if anchors.len() <= 1 {
        return false;
    }
    if ring_connects(grid, model, group, &anchors) {
        return false;
    }
    search_splits(grid, model, group, &anchors)
}

/// Fast path. `true` proves the anchors stay connected; `false` is
/// inconclusive.
pub fn ring_connects(grid: &Grid, model: &EnergyModel, group: &[Cell], anchors: &[Cell]) -> bool {
    if anchors.len() <= 1 {
        return true;
    }
    let Some(ring) = ring_around(grid, group) else {
        return false;
    };

    // Step: label runs of linked ring cells
    let len = ring.len();
    let linked: Vec<bool> = (0..len)
        .map(|k| {
            let (a, dir) = ring[k];
            let (b, _) = ring[(k + 1) % len];
            match (a, b) {
                (Some(a), Some(b)) => {
                    let (na, nb) = (grid.get(a.0, a.1), grid.get(b.0, b.1));
                    na != 0 && nb != 0 && model.bonded(na, dir, nb)
                }
                _ => false,
            }
        })
        .collect();

    let mut run = vec![0usize; len];
    if let Some(brk) = linked.iter().position(|&l| !l) {
        let mut label = 0;
        for step in 1..=len {
            let k = (brk + step) % len;
            run[k] = label;
            if !linked[k] {
                label += 1;
            }
        }
    }

    // Step: every anchor must sit on the same run
    let mut label = None;
    for anchor in anchors {
        let Some(pos) = ring.iter().position(|&(cell, _)| cell == Some(*anchor)) else {
            return false;
        };
        match label {
            None => label = Some(run[pos]),
            Some(l) if l != run[pos] => return false,
            _ => {}
        }
    }
    true
}

/// Cells on the ring around the group's bounding box, in clockwise order,
/// each paired with the direction to the next ring cell. Off-board cells are
/// `None`. Returns `None` when the ring would overlap itself.
fn ring_around(grid: &Grid, group: &[Cell]) -> Option<Vec<(Option<Cell>, usize)>> {
    let &(r0, c0) = group.first()?;
    let side = grid.side() as isize;
    let half = side / 2;

    // Offsets from the first cell, unwrapped across a periodic seam.
    let rel = |v: usize, base: usize| -> isize {
        let d = v as isize - base as isize;
        if grid.is_periodic() {
            (d + half).rem_euclid(side) - half
        } else {
            d
        }
    };
    let (mut top, mut bottom, mut left, mut right) = (0isize, 0isize, 0isize, 0isize);
    for &(i, j) in group {
        let (di, dj) = (rel(i, r0), rel(j, c0));
        top = top.min(di);
        bottom = bottom.max(di);
        left = left.min(dj);
        right = right.max(dj);
    }
    let (h, w) = (bottom - top + 1, right - left + 1);
    if (h * w) as usize != group.len() {
        return None;
    }
    if grid.is_periodic() && (side < h + 2 || side < w + 2) {
        return None;
    }

    let mut ring = Vec::with_capacity(2 * (h + w + 2) as usize);
    let at = |di: isize, dj: isize| grid.offset(r0, c0, di, dj);
    for dj in left - 1..=right {
        ring.push((at(top - 1, dj), EAST));
    }
    for di in top - 1..=bottom {
        ring.push((at(di, right + 1), SOUTH));
    }
    for dj in (left..=right + 1).rev() {
        ring.push((at(bottom + 1, dj), WEST));
    }
    for di in (top..=bottom + 1).rev() {
        ring.push((at(di, left - 1), NORTH));
    }
    Some(ring)
}

/// Slow path: search from the first anchor avoiding the group.
pub fn search_splits(grid: &Grid, model: &EnergyModel, group: &[Cell], anchors: &[Cell]) -> bool {
    let Some(&start) = anchors.first() else {
        return false;
    };
    let side = grid.side();
    let mut visited = vec![false; side * side];
    visited[start.0 * side + start.1] = true;
    let mut remaining = anchors.len() - 1;
    let mut queue = VecDeque::from([start]);
    while let Some((i, j)) = queue.pop_front() {
        if remaining == 0 {
            return false;
        }
        let c = grid.get(i, j);
        for dir in [NORTH, EAST, SOUTH, WEST] {
            let Some(nb) = grid.step(i, j, dir) else {
                continue;
            };
            if visited[nb.0 * side + nb.1] || group.contains(&nb) {
                continue;
            }
            let m = grid.get(nb.0, nb.1);
            if m != 0 && model.bonded(c, dir, m) {
                visited[nb.0 * side + nb.1] = true;
                if anchors[1..].contains(&nb) {
                    remaining -= 1;
                }
                queue.push_back(nb);
            }
        }
    }
    remaining > 0
}

/// Components of the flake left after removing `group`, one per set of
/// mutually reachable anchors. The first holds `anchors[0]`.
pub fn components(grid: &Grid, model: &EnergyModel, group: &[Cell]) -> Vec<Vec<Cell>> {
    let anchors = anchors(grid, model, group);
    let side = grid.side();
    let mut visited = vec![false; side * side];
    let mut out = Vec::new();
    for &anchor in &anchors {
        if visited[anchor.0 * side + anchor.1] {
            continue;
        }
        visited[anchor.0 * side + anchor.1] = true;
        let mut cells = vec![anchor];
        let mut queue = VecDeque::from([anchor]);
        while let Some((i, j)) = queue.pop_front() {
            let c = grid.get(i, j);
            for dir in [NORTH, EAST, SOUTH, WEST] {
                let Some(nb) = grid.step(i, j, dir) else {
                    continue;
                };
                if visited[nb.0 * side + nb.1] || group.contains(&nb) {
                    continue;
                }
                let m = grid.get(nb.0, nb.1);
                if m != 0 && model.bonded(c, dir, m) {
                    visited[nb.0 * side + nb.1] = true;
                    cells.push(nb);
                    queue.push_back(nb);
                }
            }
        }
        out.push(cells);
    }
    out
}

/// Whether the cells of a group are connected among themselves.
pub fn group_connected(grid: &Grid, model: &EnergyModel, group: &[Cell]) -> bool {
    let Some(&first) = group.first() else {
        return true;
    };
    let mut reached = vec![first];
    let mut k = 0;
    while k < reached.len() {
        let a = reached[k];
        for &b in group {
            if reached.contains(&b) {
                continue;
            }
            let Some(dir) = direction_between(grid, a, b) else {
                continue;
            };
            if model.bonded(grid.get(a.0, a.1), dir, grid.get(b.0, b.1)) {
                reached.push(b);
            }
        }
        k += 1;
    }
    reached.len() == group.len()
}
