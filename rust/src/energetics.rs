//! Energetics model: bond energies, mismatches and rate constants.
//!
//! `EnergyModel` is rebuilt whenever kinetic parameters change and is
//! otherwise immutable. The mutable monomer pool lives in
//! [`Concentrations`], which flakes deplete and restore as they grow.
//!
//! Energies are in kT. The rate constants satisfy detailed balance:
//! for a tile of type `n` held by bond energy `b`,
//!
//! ```text
//! on / off = k*conc[n] / (k*exp(-b - gcb[n])) = exp(-(gmc(n) - gcb[n] - b))
//! ```
//!
//! which is `exp(-dG)` with `dG` the change in flake energy on attachment.

use crate::config::KineticParams;
use crate::error::{KtamError, Result};
use crate::tileset::{TileId, TileSet, EAST, NORTH, SOUTH, WEST};

/// Tolerance used when comparing a bond energy against the threshold.
pub const THRESHOLD_EPS: f64 = 1e-6;

#[inline]
fn opposite(dir: usize) -> usize {
    (dir + 2) % 4
}

/// Bond and rate tables for one parameter generation.
#[derive(Clone, Debug)]
pub struct EnergyModel {
    tiles: TileSet,
    params: KineticParams,
    /// Number of tile ids including the empty tile.
    width: usize,
    /// Bond energy between a west tile and an east tile, `[w * width + e]`.
    ew: Vec<f64>,
    /// Bond energy between a north tile and a south tile, `[n * width + s]`.
    ns: Vec<f64>,
    ew_bonded: Vec<bool>,
    ns_bonded: Vec<bool>,
    gcb: Vec<f64>,
    /// `can_bind[dir][m]`: some tile type placed here forms a bond with
    /// neighbor `m` lying in direction `dir`.
    can_bind: [Vec<bool>; 4],
    kas: f64,
    kam: f64,
    kae: f64,
    kah: f64,
    kao: f64,
}

impl EnergyModel {
    /// Build the tables for a tile set under the given parameters.
    ///
    /// When hydrolysis is on and the set has no hydrolyzed partners yet, the
    /// set is doubled. Existing tile ids keep their meaning.
    pub fn new(tiles: &TileSet, params: &KineticParams) -> Result<Self> {
        validate_params(params)?;
        let tiles = if params.hydro {
            tiles.with_hydrolysis()
        } else {
            tiles.clone()
        };

        let width = tiles.num_tiles() + 1;
        let half = tiles.hydrolysis_half();
        let hydrolyzed = |n: usize| matches!(half, Some(h) if n > h);

        let scale = |a: usize, b: usize| match (hydrolyzed(a), hydrolyzed(b)) {
            (false, false) => params.gse,
            (true, true) => params.gseh,
            _ => 0.5 * (params.gse + params.gseh),
        };

        let mut ew = vec![0.0; width * width];
        let mut ns = vec![0.0; width * width];
        let mut ew_bonded = vec![false; width * width];
        let mut ns_bonded = vec![false; width * width];
        for a in 1..width {
            for b in 1..width {
                let idx = a * width + b;
                let g_ew = tiles.glue(tiles.edges(a)[EAST], tiles.edges(b)[WEST]);
                let g_ns = tiles.glue(tiles.edges(a)[SOUTH], tiles.edges(b)[NORTH]);
                ew_bonded[idx] = g_ew > 0.0;
                ns_bonded[idx] = g_ns > 0.0;
                ew[idx] = g_ew * scale(a, b);
                ns[idx] = g_ns * scale(a, b);
            }
        }

        let gcb = (0..width)
            .map(|n| if hydrolyzed(n) { params.ghyd } else { 0.0 })
            .collect();

        let mut model = Self {
            tiles,
            params: params.clone(),
            width,
            ew,
            ns,
            ew_bonded,
            ns_bonded,
            gcb,
            can_bind: Default::default(),
            kas: (-params.gas).exp(),
            kam: (-params.gam).exp(),
            kae: (-params.gae).exp(),
            kah: (-params.gah).exp(),
            kao: (-params.gao).exp(),
        };

        // Step: which neighbors can anchor a new tile at all
        for dir in [NORTH, EAST, SOUTH, WEST] {
            let mut table = vec![false; width];
            for (m, slot) in table.iter_mut().enumerate().skip(1) {
                *slot = (1..width)
                    .any(|c| model.tiles.tile(c).stoic > 0.0 && model.bonded(c as TileId, dir, m as TileId));
            }
            model.can_bind[dir] = table;
        }

        Ok(model)
    }

    pub fn tiles(&self) -> &TileSet {
        &self.tiles
    }

    pub fn params(&self) -> &KineticParams {
        &self.params
    }

    /// Number of non-empty tile ids, hydrolyzed partners included.
    pub fn num_types(&self) -> usize {
        self.width - 1
    }

    #[inline]
    pub fn is_hydrolyzed(&self, n: TileId) -> bool {
        matches!(self.tiles.hydrolysis_half(), Some(h) if n as usize > h)
    }

    /// Hydrolyzed partner of an unhydrolyzed tile type.
    pub fn hydrolyzed_pair(&self, n: TileId) -> Option<TileId> {
        match self.tiles.hydrolysis_half() {
            Some(h) if n != 0 && (n as usize) <= h => Some(n + h as TileId),
            _ => None,
        }
    }

    /// Bond energy between a west tile and an east tile.
    #[inline]
    pub fn ew(&self, west: TileId, east: TileId) -> f64 {
        self.ew[west as usize * self.width + east as usize]
    }

    /// Bond energy between a north tile and a south tile.
    #[inline]
    pub fn ns(&self, north: TileId, south: TileId) -> f64 {
        self.ns[north as usize * self.width + south as usize]
    }

    /// Bond energy between tile `c` and neighbor `m` lying in direction `dir`.
    #[inline]
    pub fn bond(&self, c: TileId, dir: usize, m: TileId) -> f64 {
        match dir {
            NORTH => self.ns(m, c),
            EAST => self.ew(c, m),
            SOUTH => self.ns(c, m),
            _ => self.ew(m, c),
        }
    }

    /// Whether `c` and its neighbor `m` in direction `dir` are held together.
    #[inline]
    pub fn bonded(&self, c: TileId, dir: usize, m: TileId) -> bool {
        let (a, b, table) = match dir {
            NORTH => (m, c, &self.ns_bonded),
            EAST => (c, m, &self.ew_bonded),
            SOUTH => (c, m, &self.ns_bonded),
            _ => (m, c, &self.ew_bonded),
        };
        table[a as usize * self.width + b as usize]
    }

    /// Different non-null bond types facing each other.
    #[inline]
    pub fn mismatched(&self, c: TileId, dir: usize, m: TileId) -> bool {
        if c == 0 || m == 0 {
            return false;
        }
        let mine = self.tiles.edges(c as usize)[dir];
        let theirs = self.tiles.edges(m as usize)[opposite(dir)];
        mine != 0 && theirs != 0 && mine != theirs
    }

    /// Total bond energy of tile `c` with neighbors `[N, E, S, W]`.
    pub fn gse(&self, c: TileId, nbrs: &[TileId; 4]) -> f64 {
        (0..4).map(|dir| self.bond(c, dir, nbrs[dir])).sum()
    }

    /// Whether tile `c` would bond to at least one of its neighbors.
    pub fn bonds_any(&self, c: TileId, nbrs: &[TileId; 4]) -> bool {
        (0..4).any(|dir| nbrs[dir] != 0 && self.bonded(c, dir, nbrs[dir]))
    }

    pub fn mismatches(&self, c: TileId, nbrs: &[TileId; 4]) -> u32 {
        (0..4)
            .filter(|&dir| self.mismatched(c, dir, nbrs[dir]))
            .count() as u32
    }

    /// Binding bonus of the hydrolyzed state (0 for unhydrolyzed types).
    #[inline]
    pub fn gcb(&self, n: TileId) -> f64 {
        self.gcb[n as usize]
    }

    /// Off-rate of tile `c` held by bond energy `b`.
    #[inline]
    pub fn off_rate(&self, c: TileId, b: f64) -> f64 {
        self.params.k * (-b - self.gcb(c)).exp()
    }

    /// In-place conversion rate of an unhydrolyzed tile.
    ///
    /// Inputs are the south and east edges, outputs the north and west edges.
    /// Each edge contributes `kam` when mismatched, `kae` when a non-null
    /// edge faces an empty cell and `kah` when the neighbor is hydrolyzed.
    pub fn hydrolysis_rate(&self, c: TileId, nbrs: &[TileId; 4]) -> f64 {
        if !self.params.hydro || c == 0 || self.hydrolyzed_pair(c).is_none() {
            return 0.0;
        }
        let edges = self.tiles.edges(c as usize);
        let side = |dir: usize| {
            let m = nbrs[dir];
            let mut r = 0.0;
            if self.mismatched(c, dir, m) {
                r += self.kam;
            }
            if m == 0 && edges[dir] != 0 {
                r += self.kae;
            }
            if m != 0 && self.is_hydrolyzed(m) {
                r += self.kah;
            }
            r
        };
        let input = side(SOUTH) + side(EAST);
        let output = side(NORTH) + side(WEST);
        self.params.k * (self.kas + input + self.kao * output)
    }

    /// Whether an empty cell with these neighbors accepts some tile type.
    pub fn is_growth_site(&self, nbrs: &[TileId; 4]) -> bool {
        let anchored = (0..4).any(|dir| nbrs[dir] != 0 && self.can_bind[dir][nbrs[dir] as usize]);
        if !anchored || !self.params.irreversible() {
            return anchored;
        }
        let threshold = self.params.threshold() - THRESHOLD_EPS;
        (1..self.width).any(|c| {
            let c = c as TileId;
            self.tiles.tile(c as usize).stoic > 0.0
                && self.bonds_any(c, nbrs)
                && self.gse(c, nbrs) >= threshold
        })
    }

    /// Whether placing `c` here is allowed: it bonds and, in the
    /// irreversible model, reaches the threshold.
    pub fn accepts(&self, c: TileId, nbrs: &[TileId; 4]) -> bool {
        if !self.bonds_any(c, nbrs) {
            return false;
        }
        !self.params.irreversible()
            || self.gse(c, nbrs) >= self.params.threshold() - THRESHOLD_EPS
    }

    /// Strongest-binding tile type for an empty cell, lowest id on ties.
    pub fn best_fill(&self, nbrs: &[TileId; 4]) -> Option<(TileId, f64)> {
        let mut best: Option<(TileId, f64)> = None;
        for c in 1..self.width {
            let c = c as TileId;
            if self.tiles.tile(c as usize).stoic <= 0.0 || !self.bonds_any(c, nbrs) {
                continue;
            }
            let b = self.gse(c, nbrs);
            if best.map_or(true, |(_, current)| b > current) {
                best = Some((c, b));
            }
        }
        best
    }

    /// Fresh monomer pool for this model's tile set.
    pub fn initial_concentrations(&self) -> Concentrations {
        let mut conc = vec![0.0; self.width];
        for (n, slot) in conc.iter_mut().enumerate().skip(1) {
            let gm = if self.is_hydrolyzed(n as TileId) {
                self.params.gmch
            } else {
                self.params.gmc
            };
            *slot = self.tiles.tile(n).stoic * (-gm).exp();
        }
        let mut pool = Concentrations { conc };
        pool.resum();
        pool
    }

    /// Carry an existing pool over to this model.
    ///
    /// Each entry is rescaled by `exp(-(gm_new - gm_old))`, which keeps the
    /// depletion already subtracted proportional. Types new to this model
    /// start from their stoichiometric value.
    pub fn rescale_concentrations(&self, old: &EnergyModel, pool: &mut Concentrations) {
        let fresh = self.initial_concentrations();
        let mut conc = fresh.conc.clone();
        for n in 1..self.width.min(pool.conc.len()) {
            let hydrolyzed = self.is_hydrolyzed(n as TileId);
            let (gm_new, gm_old) = if hydrolyzed {
                (self.params.gmch, old.params.gmch)
            } else {
                (self.params.gmc, old.params.gmc)
            };
            conc[n] = pool.conc[n] * (-(gm_new - gm_old)).exp();
        }
        pool.conc = conc;
        pool.resum();
    }
}

fn validate_params(params: &KineticParams) -> Result<()> {
    if !(params.k > 0.0) || !params.k.is_finite() {
        return Err(KtamError::InvalidParams(format!(
            "rate constant k must be positive, got {}",
            params.k
        )));
    }
    let energies = [
        ("Gmc", params.gmc),
        ("Gse", params.gse),
        ("T", params.threshold_t),
        ("Gmch", params.gmch),
        ("Gseh", params.gseh),
        ("Ghyd", params.ghyd),
        ("Gas", params.gas),
        ("Gam", params.gam),
        ("Gae", params.gae),
        ("Gah", params.gah),
        ("Gao", params.gao),
    ];
    if let Some((name, value)) = energies.iter().find(|(_, v)| !v.is_finite()) {
        return Err(KtamError::InvalidParams(format!("{} is not finite: {}", name, value)));
    }
    Ok(())
}

/// Free monomer concentration per tile type; index 0 holds the total.
#[derive(Clone, Debug, PartialEq)]
pub struct Concentrations {
    conc: Vec<f64>,
}

impl Concentrations {
    #[inline]
    pub fn get(&self, n: TileId) -> f64 {
        self.conc[n as usize]
    }

    /// Total free monomer concentration.
    #[inline]
    pub fn total(&self) -> f64 {
        self.conc[0]
    }

    /// Monomer free energy `-ln conc[n]`.
    pub fn gmc(&self, n: TileId) -> f64 {
        -self.conc[n as usize].max(f64::MIN_POSITIVE).ln()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.conc
    }

    pub fn deplete(&mut self, n: TileId, amount: f64) {
        self.conc[n as usize] -= amount;
        self.conc[0] -= amount;
    }

    pub fn restore(&mut self, n: TileId, amount: f64) {
        self.deplete(n, -amount);
    }

    /// Recompute the total from the per-type entries.
    pub fn resum(&mut self) {
        self.conc[0] = self.conc[1..].iter().sum();
    }

    /// Choose a tile type with probability `conc[n] / conc[0]`.
    ///
    /// `u` is uniform in [0, 1). Returns 0 when the pool is empty.
    pub fn draw(&self, u: f64) -> TileId {
        let mut target = u * self.conc[0];
        let mut last = 0;
        for (n, &c) in self.conc.iter().enumerate().skip(1) {
            if c <= 0.0 {
                continue;
            }
            last = n;
            if target < c {
                return n as TileId;
            }
            target -= c;
        }
        last as TileId
    }
}
