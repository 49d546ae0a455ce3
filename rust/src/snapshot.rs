//! Flake snapshot export and import.
//!
//! A snapshot holds one block per flake:
//!
//! ```text
//! flake 1 = {
//!  [ Gmc Gse k t tiles mismatches events perimeter G G_bonds ]
//!  [ conc1 conc2 ... concN ]
//!  [
//!   0 0 0 0
//!   0 1 2 0
//!   ...
//!  ]
//! }
//! ```
//!
//! Import re-centers the grid on a fresh board of the tube's size and seeds
//! the flake at a randomly chosen occupied cell.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use tracing::debug;

use crate::error::{KtamError, Result};
use crate::kinetics::{FlakeId, FlakeReport, Tube};
use crate::tileset::TileId;

/// One exported flake.
#[derive(Clone, Debug, PartialEq)]
pub struct FlakeSnapshot {
    pub id: usize,
    pub report: FlakeReport,
    /// Pool concentrations of tile types `1..=N` at export time.
    pub conc: Vec<f64>,
    pub rows: Vec<Vec<TileId>>,
}

impl FlakeSnapshot {
    /// Capture a live flake of `tube`.
    pub fn capture(tube: &Tube, id: FlakeId) -> Result<Self> {
        let flake = tube.flake(id).ok_or(KtamError::UnknownFlake(id))?;
        Ok(Self {
            id,
            report: tube.report(id)?,
            conc: tube.concentrations().as_slice()[1..].to_vec(),
            rows: flake.grid().rows(),
        })
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    fn write_to(&self, out: &mut String, label: usize) {
        out.push_str(&format!("flake {} = {{\n", label));
        out.push_str(&format!(" [ {} ]\n", self.report));
        let conc: Vec<String> = self.conc.iter().map(|c| c.to_string()).collect();
        out.push_str(&format!(" [ {} ]\n", conc.join(" ")));
        out.push_str(" [\n");
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|n| n.to_string()).collect();
            out.push_str(&format!("  {}\n", cells.join(" ")));
        }
        out.push_str(" ]\n}\n");
    }
}

/// Text of every live flake, numbered from 1 in insertion order.
pub fn export(tube: &Tube) -> Result<String> {
    let mut out = String::new();
    let ids: Vec<FlakeId> = tube.flakes().map(|(id, _)| id).collect();
    for (k, id) in ids.into_iter().enumerate() {
        FlakeSnapshot::capture(tube, id)?.write_to(&mut out, k + 1);
    }
    Ok(out)
}

/// Write every live flake to `path`.
pub fn save(tube: &Tube, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path, export(tube)?)?;
    Ok(())
}

/// Parse snapshot text into flake blocks. Rows are checked for equal length;
/// tile ids are only checked against a tile set on import.
pub fn parse(text: &str) -> Result<Vec<FlakeSnapshot>> {
    let mut tokens = Tokens::new(text);
    let mut flakes = Vec::new();
    while tokens.peek().is_some() {
        flakes.push(parse_block(&mut tokens)?);
    }
    Ok(flakes)
}

fn parse_block(tokens: &mut Tokens) -> Result<FlakeSnapshot> {
    tokens.expect("flake")?;
    let id: usize = tokens.number()?;
    tokens.expect("=")?;
    tokens.expect("{")?;

    // Step 1: report line
    tokens.expect("[")?;
    let line = tokens.line();
    let values: Vec<f64> = tokens.numbers_until("]")?;
    let values: [f64; FlakeReport::FIELDS] = values.try_into().map_err(|v: Vec<f64>| {
        KtamError::snapshot_parse(
            line,
            format!("report has {} values, expected {}", v.len(), FlakeReport::FIELDS),
        )
    })?;

    // Step 2: concentrations
    tokens.expect("[")?;
    let conc: Vec<f64> = tokens.numbers_until("]")?;

    // Step 3: grid, one row per line
    tokens.expect("[")?;
    let mut rows: Vec<Vec<TileId>> = Vec::new();
    let mut row_line = 0;
    loop {
        let Some((line, tok)) = tokens.next() else {
            return Err(KtamError::snapshot_parse(tokens.line(), "unterminated grid"));
        };
        if tok == "]" {
            break;
        }
        let n: TileId = tok
            .parse()
            .map_err(|_| KtamError::snapshot_parse(line, format!("bad tile id `{}`", tok)))?;
        if rows.is_empty() || line != row_line {
            rows.push(Vec::new());
            row_line = line;
        }
        if let Some(row) = rows.last_mut() {
            row.push(n);
        }
    }
    if let Some(width) = rows.first().map(Vec::len) {
        if let Some(k) = rows.iter().position(|r| r.len() != width) {
            return Err(KtamError::snapshot_parse(
                tokens.line(),
                format!("grid row {} has {} cells, expected {}", k, rows[k].len(), width),
            ));
        }
    }
    tokens.expect("}")?;

    Ok(FlakeSnapshot {
        id,
        report: FlakeReport::from_values(&values),
        conc,
        rows,
    })
}

/// Place a snapshot on `tube`, centered, with the seed at a random occupied
/// cell.
pub fn import<R: Rng>(tube: &mut Tube, snap: &FlakeSnapshot, flake_conc: f64, rng: &mut R) -> Result<FlakeId> {
    let side = tube.side();
    let (h, w) = (snap.height(), snap.width());
    if h > side || w > side {
        return Err(KtamError::SnapshotTooLarge {
            rows: h,
            cols: w,
            side,
        });
    }
    let num_types = tube.model().num_types();
    let (di, dj) = ((side - h) / 2, (side - w) / 2);
    let mut cells = Vec::new();
    for (i, row) in snap.rows.iter().enumerate() {
        for (j, &n) in row.iter().enumerate() {
            if n as usize > num_types {
                return Err(KtamError::InvalidFlake(format!(
                    "snapshot flake {} uses tile {} but only {} are defined",
                    snap.id, n, num_types
                )));
            }
            if n != 0 {
                cells.push(((i + di, j + dj), n));
            }
        }
    }
    if cells.is_empty() {
        return Err(KtamError::InvalidFlake(format!(
            "snapshot flake {} has no tiles",
            snap.id
        )));
    }
    let (seed, _) = cells[rng.gen_range(0..cells.len())];
    let id = tube.place_flake(&cells, seed, flake_conc)?;
    debug!(flake = id, tiles = cells.len(), ?seed, "flake imported");
    Ok(id)
}

/// Read a snapshot file and import every block.
pub fn load<R: Rng>(tube: &mut Tube, path: impl AsRef<Path>, flake_conc: f64, rng: &mut R) -> Result<Vec<FlakeId>> {
    let text = fs::read_to_string(path)?;
    parse(&text)?
        .iter()
        .map(|snap| import(tube, snap, flake_conc, rng))
        .collect()
}

/// Whitespace-separated tokens with `{ } [ ] =` split out, tagged by line.
struct Tokens {
    items: Vec<(usize, String)>,
    pos: usize,
}

impl Tokens {
    fn new(text: &str) -> Self {
        let mut items = Vec::new();
        for (k, line) in text.lines().enumerate() {
            let mut word = String::new();
            for ch in line.chars() {
                if ch.is_whitespace() || "{}[]=".contains(ch) {
                    if !word.is_empty() {
                        items.push((k + 1, std::mem::take(&mut word)));
                    }
                    if !ch.is_whitespace() {
                        items.push((k + 1, ch.to_string()));
                    }
                } else {
                    word.push(ch);
                }
            }
            if !word.is_empty() {
                items.push((k + 1, word));
            }
        }
        Self { items, pos: 0 }
    }

    fn peek(&self) -> Option<&str> {
        self.items.get(self.pos).map(|(_, t)| t.as_str())
    }

    /// Line of the current token, or of the last one at end of input.
    fn line(&self) -> usize {
        self.items
            .get(self.pos)
            .or_else(|| self.items.last())
            .map_or(0, |(line, _)| *line)
    }

    fn next(&mut self) -> Option<(usize, String)> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, want: &str) -> Result<()> {
        let line = self.line();
        match self.next() {
            Some((_, tok)) if tok == want => Ok(()),
            Some((line, tok)) => Err(KtamError::snapshot_parse(
                line,
                format!("expected `{}`, found `{}`", want, tok),
            )),
            None => Err(KtamError::snapshot_parse(
                line,
                format!("expected `{}`, found end of input", want),
            )),
        }
    }

    fn number<T: FromStr>(&mut self) -> Result<T> {
        let line = self.line();
        let (line, tok) = self
            .next()
            .ok_or_else(|| KtamError::snapshot_parse(line, "expected a number"))?;
        tok.parse()
            .map_err(|_| KtamError::snapshot_parse(line, format!("expected a number, found `{}`", tok)))
    }

    fn numbers_until<T: FromStr>(&mut self, close: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while self.peek() != Some(close) {
            if self.peek().is_none() {
                return Err(KtamError::snapshot_parse(
                    self.line(),
                    format!("expected `{}`, found end of input", close),
                ));
            }
            out.push(self.number()?);
        }
        self.pos += 1;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KineticParams;
    use crate::tileset::TileSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tube(size_p: u8) -> Tube {
        let ts = TileSet::from_parts(vec![[1, 1, 1, 1], [1, 2, 1, 2]], vec![1.0, 0.5]).unwrap();
        Tube::new(&ts, &KineticParams::default(), size_p).unwrap()
    }

    #[test]
    fn test_round_trip_keeps_grid() {
        let mut source = tube(3);
        let id = source.add_flake((4, 4), 1, 0.0).unwrap();
        for (cell, n) in [((4, 5), 2), ((5, 4), 1), ((3, 4), 1), ((3, 3), 2)] {
            source.change_cell(id, cell, n).unwrap();
        }
        let text = export(&source).unwrap();
        let snaps = parse(&text).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].id, 1);
        assert_eq!(snaps[0].report.tiles, 5);
        assert_eq!(snaps[0].conc.len(), 2);

        let mut target = tube(3);
        let mut rng = StdRng::seed_from_u64(11);
        let new_id = import(&mut target, &snaps[0], 0.0, &mut rng).unwrap();
        let flake = target.flake(new_id).unwrap();
        assert_eq!(flake.grid(), source.flake(id).unwrap().grid());
        assert_eq!(flake.tiles(), 5);
        let (si, sj) = flake.seed();
        assert_ne!(flake.grid().get(si, sj), 0);
        assert!(target.check_consistency() < 1e-9);
    }

    #[test]
    fn test_import_recenters_small_grid() {
        let text = "flake 3 = {\n [ 15 8 1000000 0 2 0 0 6 0 0 ]\n [ 1 1 ]\n [\n  1 1\n  0 0\n ]\n}\n";
        let snaps = parse(text).unwrap();
        assert_eq!((snaps[0].height(), snaps[0].width()), (2, 2));

        let mut target = tube(3);
        let mut rng = StdRng::seed_from_u64(0);
        let id = import(&mut target, &snaps[0], 0.0, &mut rng).unwrap();
        let grid = target.flake(id).unwrap().grid();
        // (8 - 2) / 2 = 3
        assert_eq!(grid.get(3, 3), 1);
        assert_eq!(grid.get(3, 4), 1);
        assert_eq!(grid.occupied().count(), 2);
    }

    #[test]
    fn test_several_blocks() {
        let mut source = tube(3);
        source.add_flake((1, 1), 1, 0.0).unwrap();
        source.add_flake((6, 6), 2, 0.0).unwrap();
        let snaps = parse(&export(&source).unwrap()).unwrap();
        let ids: Vec<usize> = snaps.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let text = "flake 1 = {\n [ 0 0 0 0 1 0 0 4 0 0 ]\n [ 1 ]\n [\n  0 1 0\n  0 1\n ]\n}\n";
        assert!(matches!(parse(text), Err(KtamError::SnapshotParse { .. })));
    }

    #[test]
    fn test_short_report_rejected() {
        let text = "flake 1 = {\n [ 0 0 0 ]\n [ 1 ]\n [\n  1\n ]\n}\n";
        match parse(text) {
            Err(KtamError::SnapshotParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut target = tube(2);

        let big = FlakeSnapshot {
            id: 1,
            report: FlakeReport::from_values(&[0.0; FlakeReport::FIELDS]),
            conc: vec![],
            rows: vec![vec![1; 5]; 5],
        };
        assert!(matches!(
            import(&mut target, &big, 0.0, &mut rng),
            Err(KtamError::SnapshotTooLarge { rows: 5, cols: 5, side: 4 })
        ));

        let bad_tile = FlakeSnapshot {
            rows: vec![vec![0, 9]],
            ..big.clone()
        };
        assert!(matches!(
            import(&mut target, &bad_tile, 0.0, &mut rng),
            Err(KtamError::InvalidFlake(_))
        ));

        let empty = FlakeSnapshot {
            rows: vec![vec![0, 0], vec![0, 0]],
            ..big
        };
        assert!(matches!(
            import(&mut target, &empty, 0.0, &mut rng),
            Err(KtamError::InvalidFlake(_))
        ));
        assert_eq!(target.num_flakes(), 0);
    }
}
