//! Kinetic simulation of flakes in a well-mixed tube.
//!
//! This module provides:
//! - Grid: Padded square board, optionally periodic
//! - RateTree: Quad-tree of per-cell event rates
//! - Flake: One growing aggregate with its rate tree and energy ledger
//! - Scheduler: Binary tree over the flakes of a tube
//! - Tube: Shared monomer pool, flakes and event application
//! - Simulator: Gillespie driver and parallel replicates
//! - postprocess: Clean and fill passes for reporting

pub mod grid;
pub mod rate_tree;
pub mod connectivity;
pub mod flake;
pub mod scheduler;
pub mod stats;
pub mod tube;
pub mod gillespie;
pub mod postprocess;

pub use connectivity::Cell;
pub use flake::{ChunkKind, Drift, Event, Flake};
pub use gillespie::{simulate_ensemble_parallel, Simulator, StepOutcome, StopReason};
pub use grid::Grid;
pub use rate_tree::RateTree;
pub use scheduler::{FlakeId, Scheduler};
pub use stats::{FlakeReport, RunSummary, TubeStats};
pub use tube::Tube;
