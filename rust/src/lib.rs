//! Kinetic Tile Assembly Model (kTAM) simulator core.
//!
//! Square tiles with typed sticky ends attach to and detach from growing
//! flakes on a 2D lattice. Events are drawn with a Gillespie scheme over a
//! per-flake quad-tree of cell rates and a tube-wide binary tree of flakes.
//!
//! Module map:
//! - tileset: Tile and bond tables, tile-file reader
//! - config: Kinetic parameters, limits and option tokens
//! - energetics: Bond energies, rates and the monomer pool
//! - kinetics: Flakes, the tube and the simulation driver
//! - snapshot: Flake export/import
//!
//! Python bindings are built with the `python` feature.

pub mod config;
pub mod energetics;
pub mod error;
pub mod kinetics;
pub mod snapshot;
pub mod tileset;

#[cfg(feature = "python")]
mod python;

pub use config::{FissionMode, KineticParams, Limits, SimConfig};
pub use energetics::{Concentrations, EnergyModel};
pub use error::{KtamError, Result};
pub use kinetics::{simulate_ensemble_parallel, Flake, FlakeId, RunSummary, Simulator, StopReason, Tube};
pub use snapshot::FlakeSnapshot;
pub use tileset::{TileId, TileSet, TileType};
