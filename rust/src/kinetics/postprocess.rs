//! Deterministic relaxation passes run after a simulation, for reporting.
//!
//! Neither pass draws random numbers or touches the tube's clock and
//! counters.

use super::connectivity;
use super::scheduler::FlakeId;
use super::tube::Tube;
use crate::error::Result;
use crate::tileset::TileId;

/// Remove weakly held tiles: any non-seed tile whose off/on ratio
/// `exp(-b - gcb) / conc[n]` exceeds `x`, unless removing it would split the
/// flake. Sweeps up to `cycles` times, stopping once a sweep changes
/// nothing. Returns the number of tiles removed.
pub fn clean(tube: &mut Tube, id: FlakeId, x: f64, cycles: usize) -> Result<usize> {
    let mut removed = 0;
    for _ in 0..cycles {
        let (flake, model, conc) = tube.flake_parts(id)?;
        let cells: Vec<(usize, usize, TileId)> = flake.grid().occupied().collect();
        let mut changed = 0;
        for (i, j, _) in cells {
            let n = flake.grid().get(i, j);
            if n == 0 || (i, j) == flake.seed() || flake.tiles() <= 1 {
                continue;
            }
            let nbrs = flake.grid().neighbors(i, j);
            let off = (-model.gse(n, &nbrs) - model.gcb(n)).exp();
            let on = conc.get(n).max(f64::MIN_POSITIVE);
            if off / on <= x {
                continue;
            }
            if connectivity::would_split(flake.grid(), model, &[(i, j)]) {
                continue;
            }
            flake.change_cell(model, conc, (i, j), 0);
            changed += 1;
        }
        tube.resync(id);
        removed += changed;
        if changed == 0 {
            break;
        }
    }
    Ok(removed)
}

/// Fill favorable growth sites: place the strongest-binding tile type
/// wherever its on/off ratio `conc[n] / exp(-b - gcb)` exceeds `x`. Sweeps up
/// to `cycles` times. Returns the number of tiles added.
pub fn fill(tube: &mut Tube, id: FlakeId, x: f64, cycles: usize) -> Result<usize> {
    let mut added = 0;
    for _ in 0..cycles {
        let (flake, model, conc) = tube.flake_parts(id)?;
        let side = flake.grid().side();
        let sites: Vec<(usize, usize)> = (0..side)
            .flat_map(|i| (0..side).map(move |j| (i, j)))
            .filter(|&(i, j)| flake.tree().is_growth_site(i, j))
            .collect();
        let mut changed = 0;
        for (i, j) in sites {
            if flake.grid().is_occupied(i, j) {
                continue;
            }
            let nbrs = flake.grid().neighbors(i, j);
            let Some((c, b)) = model.best_fill(&nbrs) else {
                continue;
            };
            let on = conc.get(c);
            let off = (-b - model.gcb(c)).exp();
            if on / off > x && model.accepts(c, &nbrs) {
                flake.change_cell(model, conc, (i, j), c);
                changed += 1;
            }
        }
        tube.resync(id);
        added += changed;
        if changed == 0 {
            break;
        }
    }
    Ok(added)
}
