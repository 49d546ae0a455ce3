//! Event counters and report records.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Cumulative event counters of a tube.
///
/// `events` counts every drawn event; the other counters only accepted
/// ones, so `events == associations + dissociations + hydrolyses + rejected`
/// (fissions are dissociations that split a flake).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TubeStats {
    pub events: u64,
    pub associations: u64,
    pub dissociations: u64,
    pub hydrolyses: u64,
    pub fissions: u64,
    pub rejected: u64,
}

/// The scalar report of one flake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlakeReport {
    pub gmc: f64,
    pub gse: f64,
    pub k: f64,
    pub t: f64,
    pub tiles: usize,
    pub mismatches: u32,
    pub events: u64,
    pub perimeter: usize,
    pub g: f64,
    pub g_bonds: f64,
}

impl FlakeReport {
    pub const FIELDS: usize = 10;

    pub fn values(&self) -> [f64; Self::FIELDS] {
        [
            self.gmc,
            self.gse,
            self.k,
            self.t,
            self.tiles as f64,
            self.mismatches as f64,
            self.events as f64,
            self.perimeter as f64,
            self.g,
            self.g_bonds,
        ]
    }

    pub fn from_values(v: &[f64; Self::FIELDS]) -> Self {
        Self {
            gmc: v[0],
            gse: v[1],
            k: v[2],
            t: v[3],
            tiles: v[4] as usize,
            mismatches: v[5] as u32,
            events: v[6] as u64,
            perimeter: v[7] as usize,
            g: v[8],
            g_bonds: v[9],
        }
    }

    /// Append this report as one line.
    pub fn append_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self)?;
        Ok(())
    }
}

impl fmt::Display for FlakeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {} {}",
            self.gmc,
            self.gse,
            self.k,
            self.t,
            self.tiles,
            self.mismatches,
            self.events,
            self.perimeter,
            self.g,
            self.g_bonds
        )
    }
}

/// Outcome of one simulated tube.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub seed: u64,
    pub time: f64,
    pub stats: TubeStats,
    pub flakes: usize,
    pub total_tiles: usize,
    /// Report of the largest flake, if any survived.
    pub largest: Option<FlakeReport>,
}
