//! One crystal: its grid, rate trees and energy bookkeeping.
//!
//! `change_cell` is the only mutation. Association, dissociation and
//! hydrolysis are policy on top of it, applied by the tube.

use super::connectivity::{self, Cell};
use super::grid::Grid;
use super::rate_tree::RateTree;
use crate::config::ChunkMode;
use crate::energetics::{Concentrations, EnergyModel};
use crate::error::{KtamError, Result};
use crate::tileset::TileId;

/// Multi-tile dissociation unit anchored at its top-left cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    EastDimer,
    SouthDimer,
    Square,
}

impl ChunkKind {
    pub fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            ChunkKind::EastDimer => &[(0, 0), (0, 1)],
            ChunkKind::SouthDimer => &[(0, 0), (1, 0)],
            ChunkKind::Square => &[(0, 0), (0, 1), (1, 0), (1, 1)],
        }
    }

    /// Kinds active under a chunk mode.
    pub fn enabled(mode: ChunkMode) -> &'static [ChunkKind] {
        match mode {
            ChunkMode::Off => &[],
            ChunkMode::Dimer => &[ChunkKind::EastDimer, ChunkKind::SouthDimer],
            ChunkMode::Square => &[ChunkKind::EastDimer, ChunkKind::SouthDimer, ChunkKind::Square],
        }
    }
}

/// Event drawn inside a flake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    Associate { cell: Cell, n: TileId },
    Dissociate { cell: Cell },
    Hydrolyze { cell: Cell },
    Chunk { anchor: Cell, kind: ChunkKind },
}

/// Aggregates compared by a full recomputation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Drift {
    pub g: (f64, f64),
    pub g_bonds: (f64, f64),
    pub rate: (f64, f64),
    pub empty: (u32, u32),
}

impl Drift {
    /// Largest relative difference between maintained and recomputed values.
    pub fn relative(&self) -> f64 {
        let rel = |(a, b): (f64, f64)| (a - b).abs() / a.abs().max(b.abs()).max(1.0);
        let empty = if self.empty.0 == self.empty.1 { 0.0 } else { 1.0 };
        rel(self.g).max(rel(self.g_bonds)).max(rel(self.rate)).max(empty)
    }
}

#[derive(Clone, Debug)]
pub struct Flake {
    grid: Grid,
    tree: RateTree,
    seed: Cell,
    seed_n: TileId,
    tiles: usize,
    mismatches: u32,
    /// Free energy: monomer terms of every tile minus bond energies.
    g: f64,
    /// Negated sum of formed bond energies.
    g_bonds: f64,
    flake_conc: f64,
    events: u64,
    counts: Vec<u32>,
}

impl Flake {
    /// Flake holding a single seed tile.
    pub fn new(
        model: &EnergyModel,
        conc: &mut Concentrations,
        size_p: u8,
        seed: Cell,
        seed_n: TileId,
        flake_conc: f64,
    ) -> Result<Self> {
        let side = 1usize << size_p;
        if seed.0 >= side || seed.1 >= side {
            return Err(KtamError::InvalidFlake(format!(
                "seed ({}, {}) outside a {}x{} board",
                seed.0, seed.1, side, side
            )));
        }
        if seed_n == 0 || seed_n as usize > model.num_types() {
            return Err(KtamError::InvalidFlake(format!(
                "seed tile {} is not a tile type",
                seed_n
            )));
        }
        let mut flake = Self::blank(model, size_p, seed, seed_n, flake_conc);
        flake.change_cell(model, conc, seed, seed_n);
        Ok(flake)
    }

    /// Empty flake; the caller fills it and must set a valid seed.
    pub(crate) fn blank(
        model: &EnergyModel,
        size_p: u8,
        seed: Cell,
        seed_n: TileId,
        flake_conc: f64,
    ) -> Self {
        Self {
            grid: Grid::new(size_p, model.params().periodic),
            tree: RateTree::new(size_p),
            seed,
            seed_n,
            tiles: 0,
            mismatches: 0,
            g: 0.0,
            g_bonds: 0.0,
            flake_conc,
            events: 0,
            counts: vec![0; model.num_types() + 1],
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn tiles(&self) -> usize {
        self.tiles
    }

    pub fn seed(&self) -> Cell {
        self.seed
    }

    pub fn seed_tile(&self) -> TileId {
        self.seed_n
    }

    pub fn g(&self) -> f64 {
        self.g
    }

    pub fn g_bonds(&self) -> f64 {
        self.g_bonds
    }

    pub fn mismatches(&self) -> u32 {
        self.mismatches
    }

    pub fn flake_conc(&self) -> f64 {
        self.flake_conc
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub(crate) fn count_event(&mut self) {
        self.events += 1;
    }

    /// Occupied-cell propensity and growth-site count.
    pub fn rate_parts(&self) -> (f64, u32) {
        (self.tree.total_rate(), self.tree.empty_count())
    }

    /// Total event rate given the current monomer pool.
    pub fn total_rate(&self, model: &EnergyModel, conc: &Concentrations) -> f64 {
        self.tree.total_rate() + on_rate(model, conc) * self.tree.empty_count() as f64
    }

    pub fn tree(&self) -> &RateTree {
        &self.tree
    }

    pub fn perimeter(&self) -> usize {
        self.grid.perimeter()
    }

    /// Place tile `n` (0 to empty) at `cell`, updating energy, counters, the
    /// depletion ledger and every affected rate leaf.
    pub fn change_cell(&mut self, model: &EnergyModel, conc: &mut Concentrations, cell: Cell, n: TileId) {
        let (i, j) = cell;
        let old = self.grid.get(i, j);
        if old == n {
            return;
        }
        let nbrs = self.grid.neighbors(i, j);
        let old_b = if old != 0 { model.gse(old, &nbrs) } else { 0.0 };
        let new_b = if n != 0 { model.gse(n, &nbrs) } else { 0.0 };

        self.g_bonds += old_b - new_b;
        self.g += monomer_energy(model, conc, n) - monomer_energy(model, conc, old) + old_b - new_b;
        let delta = model.mismatches(n, &nbrs) as i64 - model.mismatches(old, &nbrs) as i64;
        self.mismatches = (self.mismatches as i64 + delta).max(0) as u32;

        let before = self.tiles;
        if old != 0 {
            self.counts[old as usize] -= 1;
            self.tiles -= 1;
        }
        if n != 0 {
            self.counts[n as usize] += 1;
            self.tiles += 1;
        }
        self.settle_ledger(conc, before, old, n);

        self.grid.set(i, j, n);
        if n == 0 && cell == self.seed && self.tiles > 0 {
            let first = self.grid.occupied().next();
            if let Some((r, c, m)) = first {
                self.seed = (r, c);
                self.seed_n = m;
                self.refresh_around(model, self.seed);
            }
        } else if cell == self.seed {
            self.seed_n = n;
        }

        self.refresh_around(model, cell);
        if (before == 1) != (self.tiles == 1) {
            self.refresh(model, self.seed);
        }
    }

    /// Move the depletion ledger across a tile-count transition.
    fn settle_ledger(&mut self, conc: &mut Concentrations, before: usize, old: TileId, n: TileId) {
        let fc = self.flake_conc;
        if fc <= 0.0 {
            return;
        }
        match (before >= 2, self.tiles >= 2) {
            (true, true) => {
                if old != 0 {
                    conc.restore(old, fc);
                }
                if n != 0 {
                    conc.deplete(n, fc);
                }
            }
            (true, false) => {
                if old != 0 {
                    conc.restore(old, fc);
                }
                self.for_each_type(|t, count| conc.restore(t, fc * count as f64));
            }
            (false, true) => {
                self.for_each_type(|t, count| conc.deplete(t, fc * count as f64));
            }
            (false, false) => {}
        }
    }

    fn for_each_type(&self, mut f: impl FnMut(TileId, u32)) {
        for (t, &count) in self.counts.iter().enumerate() {
            if count > 0 {
                f(t as TileId, count);
            }
        }
    }

    /// Monomers this flake currently holds out of the pool, per type.
    pub fn depletion(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.counts.len()];
        if self.flake_conc > 0.0 && self.tiles >= 2 {
            self.for_each_type(|t, count| out[t as usize] = self.flake_conc * count as f64);
        }
        out
    }

    /// Designate a new seed cell.
    pub fn move_seed(&mut self, model: &EnergyModel, cell: Cell) {
        let old = self.seed;
        self.seed = cell;
        self.seed_n = self.grid.get(cell.0, cell.1);
        self.refresh_around(model, old);
        self.refresh_around(model, cell);
    }

    /// Recompute the leaves that depend on `cell`.
    fn refresh_around(&mut self, model: &EnergyModel, cell: Cell) {
        let (i, j) = cell;
        if model.params().chunk_fission != ChunkMode::Off {
            for di in -2..=1 {
                for dj in -2..=1 {
                    if let Some(c) = self.grid.offset(i, j, di, dj) {
                        self.refresh(model, c);
                    }
                }
            }
        } else {
            self.refresh(model, cell);
            for dir in 0..4 {
                if let Some(c) = self.grid.step(i, j, dir) {
                    self.refresh(model, c);
                }
            }
        }
    }

    fn refresh(&mut self, model: &EnergyModel, cell: Cell) {
        let (rate, growth) = self.leaf(model, cell);
        self.tree.set_leaf(cell.0, cell.1, rate, growth);
    }

    fn leaf(&self, model: &EnergyModel, cell: Cell) -> (f64, bool) {
        let (i, j) = cell;
        let n = self.grid.get(i, j);
        let nbrs = self.grid.neighbors(i, j);
        if n == 0 {
            return (0.0, model.is_growth_site(&nbrs));
        }
        let mut rate = self.off_rate(model, cell) + model.hydrolysis_rate(n, &nbrs);
        for &kind in ChunkKind::enabled(model.params().chunk_fission) {
            rate += self.chunk_rate(model, cell, kind);
        }
        (rate, false)
    }

    /// Single-tile dissociation rate, honoring the seed rules.
    pub fn off_rate(&self, model: &EnergyModel, cell: Cell) -> f64 {
        let (i, j) = cell;
        let n = self.grid.get(i, j);
        if n == 0 {
            return 0.0;
        }
        if self.tiles == 1 {
            if self.flake_conc <= 0.0 {
                return 0.0;
            }
        } else if cell == self.seed && !model.params().wander {
            return 0.0;
        }
        model.off_rate(n, model.gse(n, &self.grid.neighbors(i, j)))
    }

    /// Cells of a chunk, when it lies on the board.
    pub fn chunk_cells(&self, anchor: Cell, kind: ChunkKind) -> Option<Vec<Cell>> {
        let cells: Vec<Cell> = kind
            .offsets()
            .iter()
            .filter_map(|&(di, dj)| self.grid.offset(anchor.0, anchor.1, di, dj))
            .collect();
        (cells.len() == kind.offsets().len()).then_some(cells)
    }

    /// Dissociation rate of a whole chunk: `k exp(-b_ext - sum gcb)`.
    pub fn chunk_rate(&self, model: &EnergyModel, anchor: Cell, kind: ChunkKind) -> f64 {
        let Some(cells) = self.chunk_cells(anchor, kind) else {
            return 0.0;
        };
        if cells
            .iter()
            .any(|&(i, j)| self.grid.get(i, j) == 0 || (i, j) == self.seed)
        {
            return 0.0;
        }
        if !connectivity::group_connected(&self.grid, model, &cells) {
            return 0.0;
        }
        let mut b_ext = 0.0;
        let mut gcb = 0.0;
        for &(i, j) in &cells {
            let c = self.grid.get(i, j);
            gcb += model.gcb(c);
            for dir in 0..4 {
                let Some(nb) = self.grid.step(i, j, dir) else {
                    continue;
                };
                if !cells.contains(&nb) {
                    b_ext += model.bond(c, dir, self.grid.get(nb.0, nb.1));
                }
            }
        }
        model.params().k * (-b_ext - gcb).exp()
    }

    /// Draw an event with two uniforms: `u1` picks the cell, `u2` the tile
    /// type or the sub-event inside the cell.
    pub fn choose_event(&self, model: &EnergyModel, conc: &Concentrations, u1: f64, u2: f64) -> Option<Event> {
        let rate = self.tree.total_rate();
        let on = on_rate(model, conc) * self.tree.empty_count() as f64;
        let total = rate + on;
        if !(total > 0.0) {
            return None;
        }
        let target = u1 * total;
        if target < rate || on <= 0.0 {
            let cell = self.tree.sample_rate((target / rate).min(1.0))?;
            return Some(self.choose_in_cell(model, cell, u2));
        }
        let cell = self.tree.sample_empty((target - rate) / on)?;
        Some(Event::Associate {
            cell,
            n: conc.draw(u2),
        })
    }

    fn choose_in_cell(&self, model: &EnergyModel, cell: Cell, u: f64) -> Event {
        let n = self.grid.get(cell.0, cell.1);
        let nbrs = self.grid.neighbors(cell.0, cell.1);
        let mut options = vec![
            (Event::Dissociate { cell }, self.off_rate(model, cell)),
            (Event::Hydrolyze { cell }, model.hydrolysis_rate(n, &nbrs)),
        ];
        for &kind in ChunkKind::enabled(model.params().chunk_fission) {
            options.push((Event::Chunk { anchor: cell, kind }, self.chunk_rate(model, cell, kind)));
        }
        let total: f64 = options.iter().map(|(_, r)| r).sum();
        let mut target = u * total;
        let mut chosen = options[0].0;
        for (event, r) in options {
            if r <= 0.0 {
                continue;
            }
            chosen = event;
            if target < r {
                break;
            }
            target -= r;
        }
        chosen
    }

    /// Place `n` at an empty growth site if the model allows it.
    pub fn associate(&mut self, model: &EnergyModel, conc: &mut Concentrations, cell: Cell, n: TileId) -> bool {
        if n == 0 || self.grid.is_occupied(cell.0, cell.1) {
            return false;
        }
        let nbrs = self.grid.neighbors(cell.0, cell.1);
        if !model.accepts(n, &nbrs) {
            return false;
        }
        self.change_cell(model, conc, cell, n);
        true
    }

    /// Convert the tile at `cell` to its hydrolyzed partner.
    pub fn hydrolyze(&mut self, model: &EnergyModel, conc: &mut Concentrations, cell: Cell) -> bool {
        let n = self.grid.get(cell.0, cell.1);
        match model.hydrolyzed_pair(n) {
            Some(h) => {
                self.change_cell(model, conc, cell, h);
                true
            }
            None => false,
        }
    }

    /// Occupied neighbors bonded to `cell`.
    pub fn bonded_neighbors(&self, model: &EnergyModel, cell: Cell) -> Vec<Cell> {
        connectivity::anchors(&self.grid, model, &[cell])
    }

    /// Rebuild every counter, energy and leaf from the grid.
    ///
    /// Returns maintained-versus-recomputed aggregates. The depletion ledger
    /// is not touched.
    pub fn recompute(&mut self, model: &EnergyModel, conc: &Concentrations) -> Drift {
        let maintained = (self.g_bonds, self.tree.total_rate(), self.tree.empty_count(), self.g);

        self.counts = vec![0; model.num_types() + 1];
        self.tiles = 0;
        self.mismatches = 0;
        let mut bonds = 0.0;
        let occupied: Vec<(usize, usize, TileId)> = self.grid.occupied().collect();
        for &(i, j, n) in &occupied {
            let nbrs = self.grid.neighbors(i, j);
            self.counts[n as usize] += 1;
            self.tiles += 1;
            // east and south bonds only, so each bond counts once
            if let Some((r, c)) = self.grid.step(i, j, crate::tileset::EAST) {
                bonds += model.ew(n, self.grid.get(r, c));
            }
            if let Some((r, c)) = self.grid.step(i, j, crate::tileset::SOUTH) {
                bonds += model.ns(n, self.grid.get(r, c));
            }
            self.mismatches += model.mismatches(n, &nbrs);
        }
        // each mismatched junction was seen from both sides
        self.mismatches /= 2;
        self.g_bonds = -bonds;
        self.seed_n = self.grid.get(self.seed.0, self.seed.1);
        self.recalc_g(model, conc);

        self.tree.clear();
        let side = self.grid.side();
        for i in 0..side {
            for j in 0..side {
                let (rate, growth) = self.leaf(model, (i, j));
                if rate != 0.0 || growth {
                    self.tree.set_leaf(i, j, rate, growth);
                }
            }
        }

        Drift {
            g: (maintained.3, self.g),
            g_bonds: (maintained.0, self.g_bonds),
            rate: (maintained.1, self.tree.total_rate()),
            empty: (maintained.2, self.tree.empty_count()),
        }
    }

    /// Recompute `G` from tile counts and the current monomer pool.
    pub fn recalc_g(&mut self, model: &EnergyModel, conc: &Concentrations) {
        let mut g = self.g_bonds;
        for (t, &count) in self.counts.iter().enumerate().skip(1) {
            if count > 0 {
                g += count as f64 * monomer_energy(model, conc, t as TileId);
            }
        }
        self.g = g;
    }

    /// Make room for tile types added by a parameter change (hydrolysis
    /// turned on). Ids already on the grid keep their slots.
    pub(crate) fn fit_types(&mut self, num_types: usize) {
        if self.counts.len() < num_types + 1 {
            self.counts.resize(num_types + 1, 0);
        }
    }

    /// Switch board topology and rebuild.
    pub(crate) fn set_periodic(&mut self, periodic: bool) {
        if self.grid.is_periodic() == periodic {
            return;
        }
        let mut grid = Grid::new(self.grid.size_p(), periodic);
        for (i, j, n) in self.grid.occupied() {
            grid.set(i, j, n);
        }
        self.grid = grid;
    }
}

/// On-rate of a single growth site.
#[inline]
pub fn on_rate(model: &EnergyModel, conc: &Concentrations) -> f64 {
    model.params().k * conc.total().max(0.0)
}

/// Per-tile monomer term `gmc(n) - gcb(n)`, zero for the empty tile.
#[inline]
fn monomer_energy(model: &EnergyModel, conc: &Concentrations, n: TileId) -> f64 {
    if n == 0 {
        0.0
    } else {
        conc.gmc(n) - model.gcb(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KineticParams;
    use crate::tileset::TileSet;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn setup(params: KineticParams) -> (EnergyModel, Concentrations) {
        let ts = TileSet::from_parts(vec![[1, 1, 1, 1], [1, 2, 1, 2]], vec![2.0, 1.0]).unwrap();
        let model = EnergyModel::new(&ts, &params).unwrap();
        let conc = model.initial_concentrations();
        (model, conc)
    }

    #[test]
    fn test_single_bond_lowers_energy_by_its_strength() {
        // one tile type, strength 2, Gmc = 0, reversible, 16x16 bounded board
        let ts = TileSet::from_parts(vec![[1, 1, 1, 1]], vec![2.0]).unwrap();
        let params = KineticParams {
            gmc: 0.0,
            gse: 1.0,
            ..KineticParams::default()
        };
        let model = EnergyModel::new(&ts, &params).unwrap();
        let mut conc = model.initial_concentrations();
        let mut flake = Flake::new(&model, &mut conc, 4, (8, 8), 1, 0.0).unwrap();
        assert_eq!(flake.rate_parts().1, 4);
        let g0 = flake.g();

        assert!(flake.associate(&model, &mut conc, (8, 9), 1));
        assert_eq!(flake.tiles(), 2);
        assert!((flake.g() - (g0 - 2.0)).abs() < 1e-12);
        assert_eq!(flake.rate_parts().1, 6);

        // seed pinned, the new tile leaves at k exp(-2)
        let expected = params.k * (-2.0f64).exp();
        assert!((flake.rate_parts().0 - expected).abs() < 1e-9 * expected);
        let on = params.k * conc.total();
        assert!((flake.total_rate(&model, &conc) - (expected + 6.0 * on)).abs() < 1e-6);
    }

    #[test]
    fn test_incremental_matches_recompute() {
        let (model, mut conc) = setup(KineticParams {
            gse: 1.5,
            wander: true,
            ..KineticParams::default()
        });
        let mut flake = Flake::new(&model, &mut conc, 4, (8, 8), 1, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..400 {
            let cell = (rng.gen_range(4..12), rng.gen_range(4..12));
            let n = rng.gen_range(0..3) as TileId;
            if cell == flake.seed() && n == 0 {
                continue;
            }
            flake.change_cell(&model, &mut conc, cell, n);
        }
        let g = flake.g();
        let mismatches = flake.mismatches();
        let drift = flake.recompute(&model, &conc);
        assert!(drift.relative() < 1e-9, "drift {:?}", drift);
        assert_eq!(drift.g.0, g);
        assert!((flake.g() - g).abs() < 1e-9 * g.abs().max(1.0));
        assert_eq!(flake.mismatches(), mismatches);
    }

    #[test]
    fn test_lone_seed_is_pinned_without_flake_conc() {
        let (model, mut conc) = setup(KineticParams::default());
        let flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, 0.0).unwrap();
        assert_eq!(flake.off_rate(&model, (4, 4)), 0.0);
        assert_eq!(flake.rate_parts().0, 0.0);

        let flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, 1e-9).unwrap();
        assert!(flake.off_rate(&model, (4, 4)) > 0.0);
    }

    #[test]
    fn test_removing_seed_moves_designation() {
        let (model, mut conc) = setup(KineticParams::default());
        let mut flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, 0.0).unwrap();
        flake.change_cell(&model, &mut conc, (4, 5), 1);
        flake.change_cell(&model, &mut conc, (3, 5), 2);
        flake.change_cell(&model, &mut conc, (4, 4), 0);
        assert_eq!(flake.seed(), (3, 5));
        assert_eq!(flake.seed_tile(), 2);
        assert_eq!(flake.tiles(), 2);
    }

    #[test]
    fn test_ledger_transitions() {
        let (model, mut conc) = setup(KineticParams {
            gmc: 1.0,
            ..KineticParams::default()
        });
        let pool = conc.clone();
        let fc = 0.01;
        let mut flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, fc).unwrap();
        // a lone seed draws nothing
        assert_eq!(conc, pool);

        flake.change_cell(&model, &mut conc, (4, 5), 2);
        assert!((conc.get(1) - (pool.get(1) - fc)).abs() < 1e-15);
        assert!((conc.get(2) - (pool.get(2) - fc)).abs() < 1e-15);

        // in-place swap moves the depletion
        flake.change_cell(&model, &mut conc, (4, 5), 1);
        assert!((conc.get(1) - (pool.get(1) - 2.0 * fc)).abs() < 1e-15);
        assert!((conc.get(2) - pool.get(2)).abs() < 1e-15);

        // back to one tile restores everything
        flake.change_cell(&model, &mut conc, (4, 5), 0);
        assert!((conc.get(1) - pool.get(1)).abs() < 1e-15);
        assert!((conc.total() - pool.total()).abs() < 1e-15);
        assert!(flake.depletion().iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_chunk_rates_skip_seed_and_gaps() {
        let (model, mut conc) = setup(KineticParams {
            chunk_fission: ChunkMode::Square,
            ..KineticParams::default()
        });
        let mut flake = Flake::new(&model, &mut conc, 3, (2, 2), 1, 0.0).unwrap();
        for cell in [(2, 3), (3, 2), (3, 3), (2, 4), (3, 4)] {
            flake.change_cell(&model, &mut conc, cell, 1);
        }
        // anchored on the seed
        assert_eq!(flake.chunk_rate(&model, (2, 2), ChunkKind::Square), 0.0);
        // dimer (2,3)-(2,4) holds through bonds to (2,2) and (3,3),(3,4)
        let b_ext = model.ew(1, 1) + model.ns(1, 1) * 2.0;
        let expected = model.params().k * (-b_ext).exp();
        let got = flake.chunk_rate(&model, (2, 3), ChunkKind::EastDimer);
        assert!((got - expected).abs() < 1e-12 * expected.max(1e-300));
        // runs off the occupied region
        assert_eq!(flake.chunk_rate(&model, (3, 4), ChunkKind::EastDimer), 0.0);

        let drift = flake.recompute(&model, &conc);
        assert!(drift.relative() < 1e-9, "drift {:?}", drift);
    }

    #[test]
    fn test_choose_event_covers_both_trees() {
        let ts = TileSet::from_parts(vec![[1, 1, 1, 1]], vec![1.0]).unwrap();
        let params = KineticParams {
            gmc: 0.0,
            gse: 1.0,
            ..KineticParams::default()
        };
        let model = EnergyModel::new(&ts, &params).unwrap();
        let mut conc = model.initial_concentrations();
        let mut flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, 0.0).unwrap();
        flake.change_cell(&model, &mut conc, (4, 5), 1);
        // off-rate part is tiny next to six growth sites at k*conc
        match flake.choose_event(&model, &conc, 0.999, 0.5) {
            Some(Event::Associate { n, .. }) => assert_eq!(n, 1),
            other => panic!("expected association, got {:?}", other),
        }
        match flake.choose_event(&model, &conc, 0.0, 0.0) {
            Some(Event::Dissociate { cell }) => assert_eq!(cell, (4, 5)),
            other => panic!("expected dissociation, got {:?}", other),
        }
    }

    #[test]
    fn test_drift_reports_energy() {
        let (model, mut conc) = setup(KineticParams::default());
        let mut flake = Flake::new(&model, &mut conc, 3, (4, 4), 1, 0.0).unwrap();
        flake.change_cell(&model, &mut conc, (4, 5), 2);
        // the maintained G is off while bonds and rates still agree
        flake.g += 0.5;
        let drift = flake.recompute(&model, &conc);
        assert_eq!(drift.g_bonds.0, drift.g_bonds.1);
        assert!((drift.g.0 - drift.g.1 - 0.5).abs() < 1e-12);
        assert!(drift.relative() > 1e-3);
    }

    #[test]
    fn test_seed_removal_relocates_to_first_tile() {
        let (model, mut conc) = setup(KineticParams::default());
        let mut flake = Flake::new(&model, &mut conc, 3, (5, 5), 1, 0.0).unwrap();
        flake.change_cell(&model, &mut conc, (5, 6), 1);
        flake.change_cell(&model, &mut conc, (4, 6), 1);
        flake.change_cell(&model, &mut conc, (5, 5), 0);
        // row-major scan picks the topmost tile
        assert_eq!(flake.seed(), (4, 6));
        assert!(flake.recompute(&model, &conc).relative() < 1e-9);
    }
}
