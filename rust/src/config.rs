//! Run configuration: kinetic parameters, initial flakes, limits.
//!
//! Settings come from three places that all funnel through the same
//! structures: a TOML file, the `option=value` lines trailing a tile file,
//! and host-supplied option tokens (same grammar as the tile-file lines).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KtamError, Result};
use crate::tileset::TileSet;

/// Whether a dissociation that disconnects a flake is allowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FissionMode {
    /// Splitting dissociations are rejected.
    #[default]
    Off,
    /// Splitting dissociations are accepted; fragments become new flakes.
    On,
}

/// Multi-tile dissociation units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Off,
    /// East and south dimers anchored at each cell.
    Dimer,
    /// Dimers plus the 2x2 block anchored at its top-left cell.
    Square,
}

/// Thermodynamic and kinetic parameters shared by every flake in a tube.
///
/// Energies are in units of kT. `threshold_t` is relative to `gse`, as on
/// the command line; [`KineticParams::threshold`] gives the absolute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KineticParams {
    #[serde(default = "KineticParams::default_k")]
    pub k: f64,
    #[serde(default = "KineticParams::default_gmc")]
    pub gmc: f64,
    #[serde(default = "KineticParams::default_gse")]
    pub gse: f64,
    #[serde(default)]
    pub threshold_t: f64,
    #[serde(default)]
    pub hydro: bool,
    #[serde(default = "KineticParams::default_gmch")]
    pub gmch: f64,
    #[serde(default)]
    pub gseh: f64,
    #[serde(default = "KineticParams::default_ghyd")]
    pub ghyd: f64,
    #[serde(default = "KineticParams::default_gas")]
    pub gas: f64,
    #[serde(default = "KineticParams::default_gam")]
    pub gam: f64,
    #[serde(default = "KineticParams::default_gae")]
    pub gae: f64,
    #[serde(default = "KineticParams::default_gah")]
    pub gah: f64,
    #[serde(default = "KineticParams::default_gao")]
    pub gao: f64,
    #[serde(default)]
    pub periodic: bool,
    #[serde(default)]
    pub wander: bool,
    #[serde(default)]
    pub fission: FissionMode,
    #[serde(default)]
    pub chunk_fission: ChunkMode,
}

impl KineticParams {
    fn default_k() -> f64 {
        1_000_000.0
    }
    fn default_gmc() -> f64 {
        17.0
    }
    fn default_gse() -> f64 {
        8.6
    }
    fn default_gmch() -> f64 {
        30.0
    }
    fn default_ghyd() -> f64 {
        30.0
    }
    fn default_gas() -> f64 {
        30.0
    }
    fn default_gam() -> f64 {
        15.0
    }
    fn default_gae() -> f64 {
        30.0
    }
    fn default_gah() -> f64 {
        30.0
    }
    fn default_gao() -> f64 {
        10.0
    }

    /// Absolute bond-energy threshold of the irreversible model (0 = off).
    pub fn threshold(&self) -> f64 {
        self.threshold_t * self.gse
    }

    /// Whether the irreversible Tile Assembly Model is active.
    pub fn irreversible(&self) -> bool {
        self.threshold_t > 0.0
    }

    pub fn fission_allowed(&self) -> bool {
        self.fission == FissionMode::On
    }
}

impl Default for KineticParams {
    fn default() -> Self {
        Self {
            k: Self::default_k(),
            gmc: Self::default_gmc(),
            gse: Self::default_gse(),
            threshold_t: 0.0,
            hydro: false,
            gmch: Self::default_gmch(),
            gseh: 0.0,
            ghyd: Self::default_ghyd(),
            gas: Self::default_gas(),
            gam: Self::default_gam(),
            gae: Self::default_gae(),
            gah: Self::default_gah(),
            gao: Self::default_gao(),
            periodic: false,
            wander: false,
            fission: FissionMode::Off,
            chunk_fission: ChunkMode::Off,
        }
    }
}

/// One `addflakes=` group: `count` identical flakes seeded with `seed_n`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlakeSpec {
    pub seed_i: usize,
    pub seed_j: usize,
    pub seed_n: usize,
    #[serde(default = "FlakeSpec::default_count")]
    pub count: usize,
    /// Log flake concentration; 0 disables monomer depletion.
    #[serde(default)]
    pub gfc: f64,
}

impl FlakeSpec {
    fn default_count() -> usize {
        1
    }

    /// Flake concentration used by the depletion ledger.
    pub fn flake_conc(&self) -> f64 {
        if self.gfc > 0.0 {
            (-self.gfc).exp()
        } else {
            0.0
        }
    }
}

/// Termination predicates checked between batches. Zero means unset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Limits {
    #[serde(default)]
    pub tmax: f64,
    #[serde(default)]
    pub emax: u64,
    #[serde(default)]
    pub smax: usize,
    #[serde(default)]
    pub smin: usize,
}

impl Limits {
    pub fn is_unbounded(&self) -> bool {
        self.tmax <= 0.0 && self.emax == 0 && self.smax == 0 && self.smin == 0
    }
}

/// Everything needed to set up and drive one tube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "SimConfig::default_size")]
    pub size: usize,
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default)]
    pub params: KineticParams,
    /// Explicit flake groups; when empty, a single flake from `seed`.
    #[serde(default)]
    pub flakes: Vec<FlakeSpec>,
    #[serde(default = "SimConfig::default_seed")]
    pub seed: (usize, usize, usize),
    #[serde(default)]
    pub gfc: f64,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "SimConfig::default_update_rate")]
    pub update_rate: usize,
    #[serde(default)]
    pub datafile: Option<PathBuf>,
    #[serde(default)]
    pub arrayfile: Option<PathBuf>,
    /// Off/on ratio above which the final `clean` pass removes a tile.
    #[serde(default = "SimConfig::default_clean_x")]
    pub clean_x: f64,
    #[serde(default = "SimConfig::default_clean_cycles")]
    pub clean_cycles: usize,
}

impl SimConfig {
    fn default_size() -> usize {
        256
    }
    fn default_seed() -> (usize, usize, usize) {
        (250, 250, 1)
    }
    fn default_update_rate() -> usize {
        10_000
    }
    fn default_clean_x() -> f64 {
        1.0
    }
    fn default_clean_cycles() -> usize {
        1
    }

    /// Defaults, then the tile file's option lines, then host tokens.
    pub fn for_tile_set<S: AsRef<str>>(tiles: &TileSet, host: &[S]) -> Result<Self> {
        let mut config = Self::default();
        config.apply_options(tiles.options())?;
        config.apply_options(host)?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: SimConfig = toml::from_str(text)?;
        config.size = normalize_size(config.size);
        config.update_rate = config.update_rate.clamp(1, 100_000);
        Ok(config)
    }

    /// Board side exponent: `size == 1 << size_p()`.
    pub fn size_p(&self) -> u8 {
        normalize_size(self.size).trailing_zeros() as u8
    }

    /// Flake groups to create, with seed coordinates pulled onto the board.
    ///
    /// Coordinates too large for the board are halved until they fit, which
    /// keeps a default seed near the center of smaller boards.
    pub fn flake_specs(&self) -> Vec<FlakeSpec> {
        let side = normalize_size(self.size);
        let mut specs = if self.flakes.is_empty() {
            vec![FlakeSpec {
                seed_i: self.seed.0,
                seed_j: self.seed.1,
                seed_n: self.seed.2,
                count: 1,
                gfc: self.gfc,
            }]
        } else {
            self.flakes.clone()
        };
        for spec in &mut specs {
            while spec.seed_i >= side {
                spec.seed_i /= 2;
            }
            while spec.seed_j >= side {
                spec.seed_j /= 2;
            }
        }
        specs
    }

    /// Apply several option tokens in order.
    pub fn apply_options<S: AsRef<str>>(&mut self, tokens: &[S]) -> Result<()> {
        for token in tokens {
            self.apply_option(token.as_ref())?;
        }
        Ok(())
    }

    /// Apply one `key=value` or flag token.
    pub fn apply_option(&mut self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }

        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (token, ""),
        };

        match key {
            "periodic" => self.params.periodic = !self.params.periodic,
            "wander" => self.params.wander = !self.params.wander,
            // display-only settings
            "-nw" | "block" => {}
            "stripe" | "-linear" => return Err(KtamError::UnsupportedOption(key.to_string())),
            "size" => self.size = normalize_size(parse_num::<usize>(key, value)?),
            "rand" => self.rng_seed = Some(parse_num(key, value)?),
            "k" => self.params.k = parse_num(key, value)?,
            "Gmc" => self.params.gmc = parse_num(key, value)?,
            "Gse" => self.params.gse = parse_num(key, value)?,
            "T" => self.params.threshold_t = parse_num(key, value)?,
            "Gfc" => self.gfc = parse_num(key, value)?,
            "Gmch" | "Gseh" | "Ghyd" | "Gas" | "Gam" | "Gae" | "Gah" | "Gao" => {
                let v: f64 = parse_num(key, value)?;
                self.params.hydro = true;
                match key {
                    "Gmch" => self.params.gmch = v,
                    "Gseh" => self.params.gseh = v,
                    "Ghyd" => self.params.ghyd = v,
                    "Gas" => self.params.gas = v,
                    "Gam" => self.params.gam = v,
                    "Gae" => self.params.gae = v,
                    "Gah" => self.params.gah = v,
                    _ => self.params.gao = v,
                }
            }
            "seed" => {
                let parts = split_usizes(key, value, ',')?;
                if parts.is_empty() || parts.len() > 3 {
                    return Err(KtamError::invalid_option(key, value));
                }
                self.seed.0 = parts[0];
                if let Some(&j) = parts.get(1) {
                    self.seed.1 = j;
                }
                if let Some(&n) = parts.get(2) {
                    self.seed.2 = n;
                }
            }
            "addflakes" => self.flakes.insert(0, parse_flake_spec(value)?),
            "tmax" => self.limits.tmax = parse_num(key, value)?,
            "emax" => self.limits.emax = parse_num(key, value)?,
            "smax" => self.limits.smax = parse_num(key, value)?,
            "smin" => self.limits.smin = parse_num(key, value)?,
            "update_rate" => {
                self.update_rate = parse_num::<usize>(key, value)?.clamp(1, 100_000)
            }
            "datafile" => self.datafile = Some(PathBuf::from(value)),
            "arrayfile" => self.arrayfile = Some(PathBuf::from(value)),
            "clean_X" => self.clean_x = parse_num(key, value)?,
            "clean_cycles" => self.clean_cycles = parse_num(key, value)?,
            "fission" => {
                self.params.fission = match value {
                    "on" | "1" => FissionMode::On,
                    "off" | "0" => FissionMode::Off,
                    _ => return Err(KtamError::invalid_option(key, value)),
                }
            }
            "chunk_fission" => {
                self.params.chunk_fission = match value {
                    "off" | "0" => ChunkMode::Off,
                    "dimer" => ChunkMode::Dimer,
                    "square" => ChunkMode::Square,
                    _ => return Err(KtamError::invalid_option(key, value)),
                }
            }
            _ => return Err(KtamError::UnknownOption(token.to_string())),
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            rng_seed: None,
            params: KineticParams::default(),
            flakes: Vec::new(),
            seed: Self::default_seed(),
            gfc: 0.0,
            limits: Limits::default(),
            update_rate: Self::default_update_rate(),
            datafile: None,
            arrayfile: None,
            clean_x: Self::default_clean_x(),
            clean_cycles: Self::default_clean_cycles(),
        }
    }
}

/// Round a requested board side up to a power of two within [4, 4096].
pub fn normalize_size(size: usize) -> usize {
    size.clamp(4, 4096).next_power_of_two()
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| KtamError::invalid_option(key, value))
}

fn split_usizes(key: &str, value: &str, sep: char) -> Result<Vec<usize>> {
    value
        .split(sep)
        .map(|part| parse_num::<usize>(key, part.trim()))
        .collect()
}

/// Parse `i,j,n:N@Gfc`, every part after `i` optional.
fn parse_flake_spec(value: &str) -> Result<FlakeSpec> {
    let key = "addflakes";
    let mut spec = FlakeSpec {
        seed_i: 130,
        seed_j: 130,
        seed_n: 1,
        count: 1,
        gfc: 0.0,
    };

    let (position, rest) = match value.split_once(':') {
        Some((p, r)) => (p, Some(r)),
        None => (value, None),
    };
    let coords = split_usizes(key, position, ',')?;
    if coords.is_empty() || coords.len() > 3 {
        return Err(KtamError::invalid_option(key, value));
    }
    spec.seed_i = coords[0];
    if let Some(&j) = coords.get(1) {
        spec.seed_j = j;
    }
    if let Some(&n) = coords.get(2) {
        spec.seed_n = n;
    }

    if let Some(rest) = rest {
        let (count, gfc) = match rest.split_once('@') {
            Some((c, g)) => (c, Some(g)),
            None => (rest, None),
        };
        spec.count = parse_num(key, count.trim())?;
        if let Some(g) = gfc {
            spec.gfc = parse_num(key, g.trim())?;
        }
    }
    Ok(spec)
}
