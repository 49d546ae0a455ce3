//! Gillespie driver for a tube, with parallel replicate support.
//!
//! Each step:
//! - draws an exponential waiting time from the tube's total rate
//! - draws a flake, a cell and a sub-event
//! - applies the event (rejections still advance time)
//!
//! Runs proceed in batches. Termination predicates and parameter-change
//! rebuilds are only checked between batches.

use std::fs;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use super::postprocess;
use super::stats::RunSummary;
use super::tube::Tube;
use crate::config::{Limits, SimConfig};
use crate::error::Result;
use crate::tileset::TileSet;

/// Result of a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Accepted,
    Rejected,
    /// Total rate is zero; nothing can happen.
    Stalled,
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Time,
    Events,
    MaxSize,
    MinSize,
    Stalled,
    Extinct,
    /// No limit was set; one batch was run.
    BatchComplete,
}

/// Gillespie simulator owning one tube and its random stream.
pub struct Simulator {
    tube: Tube,
    rng: StdRng,
    seed: u64,
    last_generation: u64,
}

impl Simulator {
    pub fn new(tube: Tube, seed: u64) -> Self {
        let last_generation = tube.generation();
        Self {
            tube,
            rng: StdRng::seed_from_u64(seed),
            seed,
            last_generation,
        }
    }

    /// Simulator for a configuration; an unset `rng_seed` draws one.
    pub fn from_config(tiles: &TileSet, config: &SimConfig) -> Result<Self> {
        let tube = Tube::from_config(tiles, config)?;
        let seed = config
            .rng_seed
            .unwrap_or_else(|| StdRng::from_entropy().gen());
        Ok(Self::new(tube, seed))
    }

    pub fn tube(&self) -> &Tube {
        &self.tube
    }

    /// Mutable tube access between batches (parameter changes, imports).
    pub fn tube_mut(&mut self) -> &mut Tube {
        &mut self.tube
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Rebuild every flake if parameters changed since the last batch.
    fn sync_generation(&mut self) {
        if self.tube.generation() != self.last_generation {
            debug!(generation = self.tube.generation(), "recomputing after parameter change");
            self.tube.recompute_all();
            self.last_generation = self.tube.generation();
        }
    }

    /// Execute one event.
    pub fn step(&mut self) -> StepOutcome {
        let total = self.tube.total_rate();
        if !(total > 0.0) {
            return StepOutcome::Stalled;
        }

        // Step 1: waiting time
        let u: f64 = self.rng.gen();
        self.tube.advance(-(1.0 - u).ln() / total);

        // Step 2: event
        let (u_flake, u_cell, u_sub): (f64, f64, f64) = (self.rng.gen(), self.rng.gen(), self.rng.gen());
        let Some((id, event)) = self.tube.choose_event(u_flake, u_cell, u_sub) else {
            self.tube.reject_draw();
            return StepOutcome::Rejected;
        };

        // Step 3: apply
        if self.tube.apply_event(id, event, &mut self.rng) {
            StepOutcome::Accepted
        } else {
            StepOutcome::Rejected
        }
    }

    /// Run up to `n` events. Returns the number executed; fewer than `n`
    /// means the tube stalled.
    pub fn run_batch(&mut self, n: usize) -> usize {
        self.sync_generation();
        let mut done = 0;
        while done < n {
            if self.step() == StepOutcome::Stalled {
                break;
            }
            done += 1;
        }
        if self.tube.any_depleting() {
            self.tube.recalc_energies();
        }
        done
    }

    fn limit_reached(&self, limits: &Limits) -> Option<StopReason> {
        let tube = &self.tube;
        if tube.num_flakes() == 0 {
            return Some(StopReason::Extinct);
        }
        let tiles = tube.total_tiles();
        if limits.tmax > 0.0 && tube.time() >= limits.tmax {
            Some(StopReason::Time)
        } else if limits.emax > 0 && tube.stats().events >= limits.emax {
            Some(StopReason::Events)
        } else if limits.smax > 0 && tiles >= limits.smax {
            Some(StopReason::MaxSize)
        } else if limits.smin > 0 && tiles <= limits.smin {
            Some(StopReason::MinSize)
        } else {
            None
        }
    }

    /// Run batches of `update_rate` events until a limit is reached.
    ///
    /// With no limit set a single batch runs.
    pub fn run(&mut self, limits: &Limits, update_rate: usize) -> StopReason {
        let batch = update_rate.max(1);
        info!(
            seed = self.seed,
            flakes = self.tube.num_flakes(),
            batch,
            "run started"
        );
        let reason = loop {
            if let Some(reason) = self.limit_reached(limits) {
                break reason;
            }
            if self.run_batch(batch) < batch {
                break StopReason::Stalled;
            }
            if limits.is_unbounded() {
                break StopReason::BatchComplete;
            }
        };
        self.tube.check_consistency();
        info!(
            ?reason,
            time = self.tube.time(),
            events = self.tube.stats().events,
            tiles = self.tube.total_tiles(),
            "run finished"
        );
        reason
    }

    /// Summary of the tube as it stands.
    pub fn summary(&self) -> RunSummary {
        let tube = &self.tube;
        RunSummary {
            seed: self.seed,
            time: tube.time(),
            stats: *tube.stats(),
            flakes: tube.num_flakes(),
            total_tiles: tube.total_tiles(),
            largest: tube.largest_flake().and_then(|id| tube.report(id).ok()),
        }
    }

    /// Clean the largest flake, then write the configured data and array
    /// files.
    pub fn finish(&mut self, config: &SimConfig) -> Result<()> {
        let Some(id) = self.tube.largest_flake() else {
            return Ok(());
        };
        postprocess::clean(&mut self.tube, id, config.clean_x, config.clean_cycles)?;
        if let Some(path) = &config.datafile {
            self.tube.report(id)?.append_to(path)?;
        }
        if let Some(path) = &config.arrayfile {
            if let Some(flake) = self.tube.flake(id) {
                let mut text = String::from("\n");
                for row in flake.grid().rows() {
                    for n in row {
                        text.push_str(&format!(" {}", n));
                    }
                    text.push('\n');
                }
                fs::write(path, text)?;
            }
        }
        Ok(())
    }
}

/// Simulate independent replicate tubes in parallel.
///
/// # Arguments
/// * `tiles` - Tile set shared by every replicate
/// * `config` - Run configuration (limits, flakes, parameters)
/// * `n_runs` - Number of replicates
/// * `seed` - Base RNG seed (each replicate gets seed + replicate_index)
///
/// # Returns
/// * One summary per replicate, in replicate order
pub fn simulate_ensemble_parallel(
    tiles: &TileSet,
    config: &SimConfig,
    n_runs: usize,
    seed: u64,
) -> Result<Vec<RunSummary>> {
    (0..n_runs)
        .into_par_iter()
        .map(|i| -> Result<RunSummary> {
            let tube = Tube::from_config(tiles, config)?;
            let mut sim = Simulator::new(tube, seed.wrapping_add(i as u64));
            sim.run(&config.limits, config.update_rate);
            Ok(sim.summary())
        })
        .collect()
}
