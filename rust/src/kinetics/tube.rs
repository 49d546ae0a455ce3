//! The tube: shared parameters, the monomer pool and every flake.
//!
//! The tube owns all flakes by handle. The scheduler and the insertion-order
//! list only hold handles. Parameter changes bump `generation`; callers must
//! run [`Tube::recompute_all`] before drawing further events (the driver does
//! this between batches).

use rand::Rng;
use tracing::{debug, info, warn};

use super::connectivity::{self, Cell};
use super::flake::{on_rate, Event, Flake};
use super::scheduler::{FlakeId, Scheduler};
use super::stats::{FlakeReport, TubeStats};
use crate::config::{KineticParams, SimConfig};
use crate::energetics::{Concentrations, EnergyModel};
use crate::error::{KtamError, Result};
use crate::tileset::{TileId, TileSet};

/// Relative difference tolerated between maintained and recomputed values.
pub const DRIFT_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct Tube {
    model: EnergyModel,
    conc: Concentrations,
    flakes: Vec<Option<Flake>>,
    order: Vec<FlakeId>,
    scheduler: Scheduler,
    stats: TubeStats,
    t: f64,
    generation: u64,
    size_p: u8,
}

impl Tube {
    /// Empty tube with boards of side `2^size_p`.
    pub fn new(tiles: &TileSet, params: &KineticParams, size_p: u8) -> Result<Self> {
        let model = EnergyModel::new(tiles, params)?;
        let conc = model.initial_concentrations();
        info!(
            tile_types = model.num_types(),
            side = 1usize << size_p,
            gmc = params.gmc,
            gse = params.gse,
            "tube created"
        );
        Ok(Self {
            model,
            conc,
            flakes: Vec::new(),
            order: Vec::new(),
            scheduler: Scheduler::new(),
            stats: TubeStats::default(),
            t: 0.0,
            generation: 0,
            size_p,
        })
    }

    /// Tube with the flakes a configuration asks for.
    pub fn from_config(tiles: &TileSet, config: &SimConfig) -> Result<Self> {
        let mut tube = Self::new(tiles, &config.params, config.size_p())?;
        for spec in config.flake_specs() {
            for _ in 0..spec.count {
                tube.add_flake(
                    (spec.seed_i, spec.seed_j),
                    spec.seed_n as TileId,
                    spec.flake_conc(),
                )?;
            }
        }
        Ok(tube)
    }

    pub fn model(&self) -> &EnergyModel {
        &self.model
    }

    pub fn params(&self) -> &KineticParams {
        self.model.params()
    }

    pub fn concentrations(&self) -> &Concentrations {
        &self.conc
    }

    pub fn stats(&self) -> &TubeStats {
        &self.stats
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn advance(&mut self, dt: f64) {
        self.t += dt;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn size_p(&self) -> u8 {
        self.size_p
    }

    pub fn side(&self) -> usize {
        1 << self.size_p
    }

    pub fn flake(&self, id: FlakeId) -> Option<&Flake> {
        self.flakes.get(id).and_then(Option::as_ref)
    }

    /// Live flakes in insertion order.
    pub fn flakes(&self) -> impl Iterator<Item = (FlakeId, &Flake)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.flake(id).map(|f| (id, f)))
    }

    pub fn num_flakes(&self) -> usize {
        self.order.len()
    }

    pub fn total_tiles(&self) -> usize {
        self.flakes().map(|(_, f)| f.tiles()).sum()
    }

    /// Scheduler view, for checking aggregates.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Add a flake holding one seed tile.
    pub fn add_flake(&mut self, seed: Cell, seed_n: TileId, flake_conc: f64) -> Result<FlakeId> {
        let flake = Flake::new(&self.model, &mut self.conc, self.size_p, seed, seed_n, flake_conc)?;
        Ok(self.insert(flake))
    }

    /// Build a flake from explicit cells. `seed` must be one of them.
    pub fn place_flake(&mut self, cells: &[(Cell, TileId)], seed: Cell, flake_conc: f64) -> Result<FlakeId> {
        let side = self.side();
        let num_types = self.model.num_types();
        if let Some(&((i, j), n)) = cells
            .iter()
            .find(|&&((i, j), n)| i >= side || j >= side || n as usize > num_types)
        {
            return Err(KtamError::InvalidFlake(format!(
                "cell ({}, {}) with tile {} does not fit the board or tile set",
                i, j, n
            )));
        }
        let Some(&(_, seed_n)) = cells.iter().find(|&&(cell, n)| cell == seed && n != 0) else {
            return Err(KtamError::InvalidFlake(format!(
                "seed ({}, {}) is not an occupied cell",
                seed.0, seed.1
            )));
        };
        let flake = self.build_flake(cells, seed, seed_n, flake_conc);
        Ok(self.insert(flake))
    }

    fn build_flake(&mut self, cells: &[(Cell, TileId)], seed: Cell, seed_n: TileId, flake_conc: f64) -> Flake {
        let mut flake = Flake::blank(&self.model, self.size_p, seed, seed_n, flake_conc);
        flake.change_cell(&self.model, &mut self.conc, seed, seed_n);
        for &(cell, n) in cells {
            if cell != seed && n != 0 {
                flake.change_cell(&self.model, &mut self.conc, cell, n);
            }
        }
        flake.recompute(&self.model, &self.conc);
        flake
    }

    fn insert(&mut self, flake: Flake) -> FlakeId {
        let id = self.flakes.len();
        let (rate, empty) = flake.rate_parts();
        self.flakes.push(Some(flake));
        self.order.push(id);
        self.scheduler.insert(id, rate, empty);
        id
    }

    fn live_mut(&mut self, id: FlakeId) -> Result<&mut Flake> {
        self.flakes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(KtamError::UnknownFlake(id))
    }

    fn sync(&mut self, id: FlakeId) {
        let Some(flake) = self.flake(id) else {
            return;
        };
        if flake.tiles() == 0 {
            self.extinguish(id);
            return;
        }
        let (rate, empty) = flake.rate_parts();
        self.scheduler.update(id, rate, empty);
    }

    fn extinguish(&mut self, id: FlakeId) {
        if let Some(slot) = self.flakes.get_mut(id) {
            *slot = None;
        }
        self.order.retain(|&f| f != id);
        self.scheduler.remove(id);
        debug!(flake = id, "flake extinct");
    }

    /// Set one cell of a flake directly. A flake emptied this way is removed.
    pub fn change_cell(&mut self, id: FlakeId, cell: Cell, n: TileId) -> Result<()> {
        if cell.0 >= self.side() || cell.1 >= self.side() {
            return Err(KtamError::InvalidFlake(format!(
                "cell ({}, {}) outside the board",
                cell.0, cell.1
            )));
        }
        if n as usize > self.model.num_types() {
            return Err(KtamError::InvalidFlake(format!("tile {} is not a tile type", n)));
        }
        let flake = self
            .flakes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(KtamError::UnknownFlake(id))?;
        flake.change_cell(&self.model, &mut self.conc, cell, n);
        self.sync(id);
        Ok(())
    }

    /// Per-site on-rate under the current pool.
    pub fn on_rate(&self) -> f64 {
        on_rate(&self.model, &self.conc)
    }

    /// Total event rate over all flakes.
    pub fn total_rate(&self) -> f64 {
        self.scheduler.total_rate(self.on_rate())
    }

    /// Draw a flake and an event inside it from three uniforms.
    pub fn choose_event(&self, u_flake: f64, u_cell: f64, u_sub: f64) -> Option<(FlakeId, Event)> {
        let id = self.scheduler.choose(u_flake, self.on_rate())?;
        let event = self.flake(id)?.choose_event(&self.model, &self.conc, u_cell, u_sub)?;
        Some((id, event))
    }

    /// Apply a drawn event. Returns whether it was accepted; rejected events
    /// leave every flake unchanged.
    pub fn apply_event<R: Rng>(&mut self, id: FlakeId, event: Event, rng: &mut R) -> bool {
        self.stats.events += 1;
        if let Some(flake) = self.flakes.get_mut(id).and_then(Option::as_mut) {
            flake.count_event();
        }
        let accepted = match event {
            Event::Associate { cell, n } => self.associate(id, cell, n),
            Event::Hydrolyze { cell } => self.hydrolyze(id, cell),
            Event::Dissociate { cell } => self.dissociate(id, vec![cell], rng),
            Event::Chunk { anchor, kind } => {
                let cells = self.flake(id).and_then(|f| f.chunk_cells(anchor, kind));
                match cells {
                    Some(cells) => self.dissociate(id, cells, rng),
                    None => false,
                }
            }
        };
        if !accepted {
            self.stats.rejected += 1;
        }
        accepted
    }

    /// Count a draw that produced no event (the chosen flake had nothing to
    /// offer); it advances time like any rejection.
    pub fn reject_draw(&mut self) {
        self.stats.events += 1;
        self.stats.rejected += 1;
    }

    fn associate(&mut self, id: FlakeId, cell: Cell, n: TileId) -> bool {
        let Some(flake) = self.flakes.get_mut(id).and_then(Option::as_mut) else {
            return false;
        };
        if !flake.associate(&self.model, &mut self.conc, cell, n) {
            return false;
        }
        self.stats.associations += 1;
        self.sync(id);
        true
    }

    fn hydrolyze(&mut self, id: FlakeId, cell: Cell) -> bool {
        let Some(flake) = self.flakes.get_mut(id).and_then(Option::as_mut) else {
            return false;
        };
        if !flake.hydrolyze(&self.model, &mut self.conc, cell) {
            return false;
        }
        self.stats.hydrolyses += 1;
        self.sync(id);
        true
    }

    /// Remove a group of cells, splitting the flake if that is allowed.
    fn dissociate<R: Rng>(&mut self, id: FlakeId, group: Vec<Cell>, rng: &mut R) -> bool {
        if self.model.params().irreversible() {
            return false;
        }
        let wander = self.model.params().wander;
        let fission = self.model.params().fission_allowed();
        let Some(flake) = self.flakes.get_mut(id).and_then(Option::as_mut) else {
            return false;
        };
        if group.iter().any(|&(i, j)| flake.grid().get(i, j) == 0) {
            return false;
        }

        // Step: a lone tile leaves only when its flake is depleting
        if flake.tiles() <= group.len() {
            if flake.tiles() != 1 || flake.flake_conc() <= 0.0 {
                return false;
            }
            flake.change_cell(&self.model, &mut self.conc, group[0], 0);
            self.stats.dissociations += 1;
            self.sync(id);
            return true;
        }

        // Step: the seed only leaves in wander mode, with a bonded heir
        let heirs = if group.contains(&flake.seed()) {
            if !wander || group.len() > 1 {
                return false;
            }
            let candidates = flake.bonded_neighbors(&self.model, flake.seed());
            if candidates.is_empty() {
                return false;
            }
            candidates
        } else {
            Vec::new()
        };

        // Step: connectivity, which does not depend on the seed designation
        let split = connectivity::would_split(flake.grid(), &self.model, &group);
        if split && !fission {
            return false;
        }
        let parts = if split {
            connectivity::components(flake.grid(), &self.model, &group)
        } else {
            Vec::new()
        };

        // Step: accepted; hand the seed over before removing it
        if !heirs.is_empty() {
            let next = heirs[rng.gen_range(0..heirs.len())];
            flake.move_seed(&self.model, next);
        }
        for &cell in &group {
            flake.change_cell(&self.model, &mut self.conc, cell, 0);
        }
        self.stats.dissociations += 1;
        if split {
            self.split_off(id, parts, rng);
            self.stats.fissions += 1;
        }
        self.sync(id);
        true
    }

    /// Move every component except the seed's into a new flake.
    fn split_off<R: Rng>(&mut self, id: FlakeId, parts: Vec<Vec<Cell>>, rng: &mut R) {
        let Some(parent) = self.flakes.get_mut(id).and_then(Option::as_mut) else {
            return;
        };
        let seed = parent.seed();
        let flake_conc = parent.flake_conc();

        let mut fragments = Vec::new();
        for part in parts.into_iter().filter(|p| !p.contains(&seed)) {
            let cells: Vec<(Cell, TileId)> = part
                .iter()
                .map(|&(i, j)| ((i, j), parent.grid().get(i, j)))
                .collect();
            for &(cell, _) in &cells {
                parent.change_cell(&self.model, &mut self.conc, cell, 0);
            }
            fragments.push(cells);
        }
        parent.recompute(&self.model, &self.conc);

        for cells in fragments {
            let (seed, seed_n) = cells[rng.gen_range(0..cells.len())];
            let flake = self.build_flake(&cells, seed, seed_n, flake_conc);
            let tiles = flake.tiles();
            let child = self.insert(flake);
            debug!(parent = id, child, tiles, "flake split");
        }
    }

    /// Replace the kinetic parameters.
    ///
    /// The monomer pool is rescaled by `exp(-(gm_new - gm_old))` so depletion
    /// carries over. Flakes are stale until [`Tube::recompute_all`].
    pub fn set_params(&mut self, params: &KineticParams) -> Result<()> {
        let model = EnergyModel::new(self.model.tiles(), params)?;
        model.rescale_concentrations(&self.model, &mut self.conc);
        let periodic = params.periodic;
        let num_types = model.num_types();
        self.model = model;
        for flake in self.flakes.iter_mut().flatten() {
            flake.set_periodic(periodic);
            flake.fit_types(num_types);
        }
        self.generation += 1;
        debug!(
            generation = self.generation,
            gmc = params.gmc,
            gse = params.gse,
            "parameters changed"
        );
        Ok(())
    }

    /// Change only the monomer and bond energies.
    pub fn reset_energies(&mut self, gmc: f64, gse: f64) -> Result<()> {
        let params = KineticParams {
            gmc,
            gse,
            ..self.model.params().clone()
        };
        self.set_params(&params)
    }

    /// Rebuild every flake from its grid and resynchronize the scheduler.
    ///
    /// Returns the largest relative drift found. Drift is only meaningful
    /// when parameters have not changed since the last rebuild.
    pub fn recompute_all(&mut self) -> f64 {
        let mut worst = 0.0f64;
        let ids: Vec<FlakeId> = self.order.clone();
        for id in ids {
            if let Some(flake) = self.flakes.get_mut(id).and_then(Option::as_mut) {
                let drift = flake.recompute(&self.model, &self.conc);
                worst = worst.max(drift.relative());
            }
            self.sync(id);
        }
        worst
    }

    /// Full recomputation that reports drift of the maintained aggregates.
    pub fn check_consistency(&mut self) -> f64 {
        let drift = self.recompute_all();
        if drift > DRIFT_TOLERANCE {
            warn!(drift, "maintained energies or rates drifted from recomputation");
        }
        drift
    }

    /// Refresh every flake's `G` against the current monomer pool.
    pub fn recalc_energies(&mut self) {
        for flake in self.flakes.iter_mut().flatten() {
            flake.recalc_g(&self.model, &self.conc);
        }
    }

    pub fn any_depleting(&self) -> bool {
        self.flakes().any(|(_, f)| f.flake_conc() > 0.0)
    }

    /// Flake with the most tiles, earliest on ties.
    pub fn largest_flake(&self) -> Option<FlakeId> {
        let mut best: Option<(FlakeId, usize)> = None;
        for (id, flake) in self.flakes() {
            if best.map_or(true, |(_, tiles)| flake.tiles() > tiles) {
                best = Some((id, flake.tiles()));
            }
        }
        best.map(|(id, _)| id)
    }

    pub fn report(&self, id: FlakeId) -> Result<FlakeReport> {
        let flake = self.flake(id).ok_or(KtamError::UnknownFlake(id))?;
        let params = self.model.params();
        Ok(FlakeReport {
            gmc: params.gmc,
            gse: params.gse,
            k: params.k,
            t: self.t,
            tiles: flake.tiles(),
            mismatches: flake.mismatches(),
            events: flake.events(),
            perimeter: flake.perimeter(),
            g: flake.g(),
            g_bonds: flake.g_bonds(),
        })
    }

    /// Mutable access for the post-processing passes.
    pub(crate) fn flake_parts(&mut self, id: FlakeId) -> Result<(&mut Flake, &EnergyModel, &mut Concentrations)> {
        let flake = self
            .flakes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(KtamError::UnknownFlake(id))?;
        Ok((flake, &self.model, &mut self.conc))
    }

    pub(crate) fn resync(&mut self, id: FlakeId) {
        self.sync(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkMode, FissionMode};
    use crate::kinetics::flake::ChunkKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn one_tile_set() -> TileSet {
        TileSet::from_parts(vec![[1, 1, 1, 1]], vec![2.0]).unwrap()
    }

    fn reference_params() -> KineticParams {
        KineticParams {
            gmc: 0.0,
            gse: 1.0,
            ..KineticParams::default()
        }
    }

    #[test]
    fn test_extinct_flake_leaves_scheduler() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 4).unwrap();
        let a = tube.add_flake((3, 3), 1, 0.0).unwrap();
        let b = tube.add_flake((12, 12), 1, 0.0).unwrap();
        tube.change_cell(a, (3, 4), 1).unwrap();
        tube.change_cell(b, (12, 13), 1).unwrap();
        tube.change_cell(b, (11, 12), 1).unwrap();

        tube.change_cell(a, (3, 4), 0).unwrap();
        tube.change_cell(a, (3, 3), 0).unwrap();
        assert!(tube.flake(a).is_none());
        assert_eq!(tube.num_flakes(), 1);
        assert_eq!(tube.scheduler().len(), 1);

        let survivor = tube.flake(b).unwrap().total_rate(tube.model(), tube.concentrations());
        assert_eq!(tube.total_rate(), survivor);
        assert!(matches!(
            tube.change_cell(a, (3, 3), 1),
            Err(KtamError::UnknownFlake(_))
        ));
    }

    #[test]
    fn test_split_rejected_without_fission() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 3).unwrap();
        let id = tube.add_flake((4, 2), 1, 0.0).unwrap();
        tube.change_cell(id, (4, 3), 1).unwrap();
        tube.change_cell(id, (4, 4), 1).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        assert!(!tube.apply_event(id, Event::Dissociate { cell: (4, 3) }, &mut rng));
        assert_eq!(tube.flake(id).unwrap().tiles(), 3);
        assert_eq!(tube.stats().rejected, 1);

        assert!(tube.apply_event(id, Event::Dissociate { cell: (4, 4) }, &mut rng));
        assert_eq!(tube.flake(id).unwrap().tiles(), 2);
        assert_eq!(tube.stats().dissociations, 1);
        assert_eq!(tube.stats().events, 2);
    }

    #[test]
    fn test_fission_creates_fragment() {
        let params = KineticParams {
            fission: FissionMode::On,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 1), 1, 0.0).unwrap();
        for j in 2..6 {
            tube.change_cell(id, (4, j), 1).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(5);
        assert!(tube.apply_event(id, Event::Dissociate { cell: (4, 3) }, &mut rng));
        assert_eq!(tube.stats().fissions, 1);
        assert_eq!(tube.num_flakes(), 2);
        assert_eq!(tube.flake(id).unwrap().tiles(), 2);
        let (child, fragment) = tube.flakes().nth(1).unwrap();
        assert_ne!(child, id);
        assert_eq!(fragment.tiles(), 2);
        assert!([(4, 4), (4, 5)].contains(&fragment.seed()));
        assert!(tube.check_consistency() < DRIFT_TOLERANCE);
    }

    #[test]
    fn test_irreversible_model_rejects_dissociation() {
        let params = KineticParams {
            threshold_t: 1.0,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 4), 1, 0.0).unwrap();
        tube.change_cell(id, (4, 5), 1).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(!tube.apply_event(id, Event::Dissociate { cell: (4, 5) }, &mut rng));
        // a single strength-2 bond reaches T = 1 * Gse = 1
        assert!(tube.apply_event(id, Event::Associate { cell: (3, 4), n: 1 }, &mut rng));
    }

    #[test]
    fn test_wandering_seed_hands_over() {
        let params = KineticParams {
            wander: true,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 4), 1, 0.0).unwrap();
        tube.change_cell(id, (4, 5), 1).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(tube.apply_event(id, Event::Dissociate { cell: (4, 4) }, &mut rng));
        let flake = tube.flake(id).unwrap();
        assert_eq!(flake.seed(), (4, 5));
        assert_eq!(flake.tiles(), 1);
    }

    #[test]
    fn test_ledger_conserved_across_fission() {
        let params = KineticParams {
            fission: FissionMode::On,
            gmc: 2.0,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let initial = tube.concentrations().total();
        let id = tube.add_flake((2, 0), 1, 1e-3).unwrap();
        for j in 1..7 {
            tube.change_cell(id, (2, j), 1).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(9);
        assert!(tube.apply_event(id, Event::Dissociate { cell: (2, 2) }, &mut rng));
        assert_eq!(tube.num_flakes(), 2);

        let held: f64 = tube.flakes().map(|(_, f)| f.depletion().iter().sum::<f64>()).sum();
        assert!((tube.concentrations().total() + held - initial).abs() < 1e-12);
        assert!((held - 6.0 * 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_reset_energies_rescales_pool() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 3).unwrap();
        let id = tube.add_flake((4, 4), 1, 0.0).unwrap();
        tube.change_cell(id, (4, 5), 1).unwrap();
        let before = tube.flake(id).unwrap().rate_parts().0;
        tube.reset_energies(1.0, 2.0).unwrap();
        assert_eq!(tube.generation(), 1);
        assert!((tube.concentrations().total() - (-1.0f64).exp()).abs() < 1e-15);
        tube.recompute_all();
        let after = tube.flake(id).unwrap().rate_parts().0;
        // bond energy doubled: exp(-4) / exp(-2)
        assert!((after / before - (-2.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_largest_flake_and_report() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 4).unwrap();
        let a = tube.add_flake((2, 2), 1, 0.0).unwrap();
        let b = tube.add_flake((10, 10), 1, 0.0).unwrap();
        tube.change_cell(b, (10, 11), 1).unwrap();
        assert_eq!(tube.largest_flake(), Some(b));
        let report = tube.report(b).unwrap();
        assert_eq!(report.tiles, 2);
        assert_eq!(report.perimeter, 6);
        assert!((report.g_bonds + 2.0).abs() < 1e-12);
        assert!(tube.report(a).is_ok());
        assert!(tube.report(99).is_err());
    }

    #[test]
    fn test_rejected_seed_removal_keeps_seed() {
        let params = KineticParams {
            wander: true,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 3), 1, 0.0).unwrap();
        tube.change_cell(id, (4, 2), 1).unwrap();
        tube.change_cell(id, (4, 4), 1).unwrap();
        let rate = tube.flake(id).unwrap().rate_parts();
        let mut rng = StdRng::seed_from_u64(6);

        // removing the middle of the bar would split it
        assert!(!tube.apply_event(id, Event::Dissociate { cell: (4, 3) }, &mut rng));
        let flake = tube.flake(id).unwrap();
        assert_eq!(flake.seed(), (4, 3));
        assert_eq!(flake.tiles(), 3);
        assert_eq!(flake.rate_parts(), rate);
        assert_eq!(tube.stats().rejected, 1);
        assert!(tube.check_consistency() < 1e-12);
    }

    #[test]
    fn test_hydrolysis_swaps_ledger_and_refreshes_neighbors() {
        let params = KineticParams {
            hydro: true,
            gmc: 2.0,
            gmch: 3.0,
            gas: 5.0,
            gah: 2.0,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let fc = 1e-3;
        let id = tube.add_flake((4, 4), 1, fc).unwrap();
        tube.change_cell(id, (4, 5), 1).unwrap();
        tube.change_cell(id, (4, 6), 1).unwrap();
        let pool = tube.concentrations().clone();
        let seed_rate = tube.flake(id).unwrap().tree().leaf_rate(4, 4);
        let mut rng = StdRng::seed_from_u64(4);

        assert!(tube.apply_event(id, Event::Hydrolyze { cell: (4, 5) }, &mut rng));
        assert_eq!(tube.stats().hydrolyses, 1);
        let flake = tube.flake(id).unwrap();
        assert_eq!(flake.grid().get(4, 5), 2);
        assert_eq!(flake.tiles(), 3);

        // one type-1 monomer goes back, one type-2 monomer is held instead
        let conc = tube.concentrations();
        assert!((conc.get(1) - (pool.get(1) + fc)).abs() < 1e-15);
        assert!((conc.get(2) - (pool.get(2) - fc)).abs() < 1e-15);
        assert!((conc.total() - pool.total()).abs() < 1e-15);

        // the pinned seed now sees a hydrolyzed east (input) neighbor
        let model = tube.model();
        let gained = flake.tree().leaf_rate(4, 4) - seed_rate;
        let kah = params.k * (-params.gah).exp();
        assert!((gained - kah).abs() < 1e-9 * kah);
        let nbrs = flake.grid().neighbors(4, 4);
        assert_eq!(flake.tree().leaf_rate(4, 4), model.hydrolysis_rate(1, &nbrs));

        // a hydrolyzed tile does not convert again
        assert!(!tube.apply_event(id, Event::Hydrolyze { cell: (4, 5) }, &mut rng));
        tube.recalc_energies();
        assert!(tube.check_consistency() < DRIFT_TOLERANCE);
    }

    #[test]
    fn test_chunk_counts_as_one_dissociation() {
        let params = KineticParams {
            chunk_fission: ChunkMode::Dimer,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 2), 1, 0.0).unwrap();
        for j in 3..6 {
            tube.change_cell(id, (4, j), 1).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(8);
        let chunk = Event::Chunk {
            anchor: (4, 4),
            kind: ChunkKind::EastDimer,
        };
        assert!(tube.apply_event(id, chunk, &mut rng));
        let stats = *tube.stats();
        assert_eq!((stats.events, stats.dissociations, stats.fissions), (1, 1, 0));
        let flake = tube.flake(id).unwrap();
        assert_eq!(flake.tiles(), 2);
        assert_eq!(flake.grid().get(4, 5), 0);

        // a chunk holding the seed never leaves
        let seeded = Event::Chunk {
            anchor: (4, 2),
            kind: ChunkKind::EastDimer,
        };
        assert!(!tube.apply_event(id, seeded, &mut rng));
        assert!(tube.check_consistency() < DRIFT_TOLERANCE);
    }

    #[test]
    fn test_chunk_removal_can_split() {
        let params = KineticParams {
            chunk_fission: ChunkMode::Dimer,
            fission: FissionMode::On,
            ..reference_params()
        };
        let mut tube = Tube::new(&one_tile_set(), &params, 3).unwrap();
        let id = tube.add_flake((4, 1), 1, 0.0).unwrap();
        for j in 2..7 {
            tube.change_cell(id, (4, j), 1).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(12);
        let chunk = Event::Chunk {
            anchor: (4, 3),
            kind: ChunkKind::EastDimer,
        };
        assert!(tube.apply_event(id, chunk, &mut rng));
        assert_eq!(tube.stats().dissociations, 1);
        assert_eq!(tube.stats().fissions, 1);
        assert_eq!(tube.num_flakes(), 2);
        assert_eq!(tube.flake(id).unwrap().tiles(), 2);
        assert_eq!(tube.total_tiles(), 4);
        assert!(tube.check_consistency() < DRIFT_TOLERANCE);
    }

    #[test]
    fn test_enabling_hydrolysis_between_batches() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 3).unwrap();
        let id = tube.add_flake((4, 4), 1, 0.0).unwrap();
        let params = KineticParams {
            hydro: true,
            ..reference_params()
        };
        tube.set_params(&params).unwrap();
        assert_eq!(tube.model().num_types(), 2);

        // the hydrolyzed type is usable before the rebuild
        tube.change_cell(id, (4, 5), 2).unwrap();
        let other = tube.place_flake(&[((1, 1), 2), ((1, 2), 1)], (1, 1), 0.0).unwrap();
        assert_eq!(tube.flake(other).unwrap().tiles(), 2);
        tube.recompute_all();
        assert_eq!(tube.flake(id).unwrap().tiles(), 2);
        assert!(tube.check_consistency() < DRIFT_TOLERANCE);
    }

    #[test]
    fn test_empty_draw_counts_as_rejected() {
        let mut tube = Tube::new(&one_tile_set(), &reference_params(), 3).unwrap();
        tube.reject_draw();
        let s = *tube.stats();
        assert_eq!((s.events, s.rejected), (1, 1));
        assert_eq!(s.events, s.associations + s.dissociations + s.hydrolyses + s.rejected);
    }
}
