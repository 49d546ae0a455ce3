//! Tile types, bond types and the tile-set file reader.
//!
//! A tile set is loaded once and never changes during a run. Tile index 0 is
//! the empty tile; bond type 0 is the null bond with strength 0.
//!
//! File grammar (whitespace-insensitive, `%` starts a comment):
//!
//! ```text
//! tile edges matches {{N E S W}*}
//! num tile types=2
//! num binding types=2
//! tile edges={
//! {1 1 2 2}[1.0](blue)
//! {2 2 1 1}
//! }
//! binding strengths={1 2}
//! g(1,2)=0.5
//! Gmc=15 Gse=8
//! ```
//!
//! Lines after the binding strengths are glue overrides `g(a,b)=s` or option
//! tokens (see [`crate::config::SimConfig::apply_option`]).
//!
//! A file lists unhydrolyzed types only. With hydrolysis on, the energy
//! model appends the hydrolyzed half (see [`TileSet::with_hydrolysis`]).

use std::fs;
use std::path::Path;

use crate::error::{KtamError, Result};

/// Tile type index. 0 is empty.
pub type TileId = u16;

/// Edge positions in `TileType::edges`.
pub const NORTH: usize = 0;
pub const EAST: usize = 1;
pub const SOUTH: usize = 2;
pub const WEST: usize = 3;

/// One species of square tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileType {
    /// Bond type ids on the N, E, S, W edges.
    pub edges: [usize; 4],
    /// Relative concentration weight.
    pub stoic: f64,
    /// Display color annotation, if any.
    pub color: Option<String>,
}

/// Immutable table of tile types and bond types.
#[derive(Clone, Debug)]
pub struct TileSet {
    /// Index 0 is the empty tile.
    tiles: Vec<TileType>,
    /// Index 0 is the null bond.
    strengths: Vec<f64>,
    /// Explicit strengths for pairs of different bond types.
    glue_overrides: Vec<(usize, usize, f64)>,
    /// Option tokens found after the tables.
    options: Vec<String>,
    /// Number of unhydrolyzed types when the set has been doubled.
    hydrolysis_half: Option<usize>,
}

impl TileSet {
    /// Build a tile set from edge lists (tiles `1..=N`) and bond strengths
    /// (bond types `1..=B`).
    pub fn from_parts(edges: Vec<[usize; 4]>, strengths: Vec<f64>) -> Result<Self> {
        let tiles = edges
            .into_iter()
            .map(|edges| TileType {
                edges,
                stoic: 1.0,
                color: None,
            })
            .collect();
        Self::assemble(tiles, strengths, Vec::new(), Vec::new())
    }

    fn assemble(
        tiles: Vec<TileType>,
        strengths: Vec<f64>,
        glue_overrides: Vec<(usize, usize, f64)>,
        options: Vec<String>,
    ) -> Result<Self> {
        if tiles.is_empty() {
            return Err(KtamError::InvalidTileSet("no tile types".to_string()));
        }
        // Display and hydrolysis pairing both index tile types with u16.
        if tiles.len() * 2 >= TileId::MAX as usize {
            return Err(KtamError::InvalidTileSet(format!(
                "too many tile types: {}",
                tiles.len()
            )));
        }
        let num_bonds = strengths.len();
        for (idx, tile) in tiles.iter().enumerate() {
            if let Some(&bad) = tile.edges.iter().find(|&&e| e > num_bonds) {
                return Err(KtamError::InvalidTileSet(format!(
                    "tile {} uses bond type {} but only {} are defined",
                    idx + 1,
                    bad,
                    num_bonds
                )));
            }
            if !(tile.stoic >= 0.0) {
                return Err(KtamError::InvalidTileSet(format!(
                    "tile {} has negative stoichiometry",
                    idx + 1
                )));
            }
        }
        for &(a, b, _) in &glue_overrides {
            if a == 0 || b == 0 || a > num_bonds || b > num_bonds {
                return Err(KtamError::InvalidTileSet(format!(
                    "glue override g({},{}) names an undefined bond type",
                    a, b
                )));
            }
        }

        let mut all_tiles = Vec::with_capacity(tiles.len() + 1);
        all_tiles.push(TileType {
            edges: [0; 4],
            stoic: 0.0,
            color: None,
        });
        all_tiles.extend(tiles);

        let mut all_strengths = Vec::with_capacity(num_bonds + 1);
        all_strengths.push(0.0);
        all_strengths.extend(strengths);

        Ok(Self {
            tiles: all_tiles,
            strengths: all_strengths,
            glue_overrides,
            options,
            hydrolysis_half: None,
        })
    }

    /// Read and parse a tile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse tile-file text.
    pub fn parse(text: &str) -> Result<Self> {
        let cleaned = strip_comments(text);
        let mut cur = Cursor::new(&cleaned);

        cur.skip_ws();
        if cur.peek_phrase("tile edges matches") {
            cur.skip_line();
        }

        cur.expect_phrase("num tile types")?;
        cur.expect('=')?;
        let num_tiles: usize = cur.number()?;
        cur.expect_phrase("num binding types")?;
        cur.expect('=')?;
        let num_bonds: usize = cur.number()?;

        cur.expect_phrase("tile edges")?;
        cur.expect('=')?;
        cur.expect('{')?;
        let mut tiles = Vec::with_capacity(num_tiles);
        for _ in 0..num_tiles {
            cur.expect('{')?;
            let mut edges = [0usize; 4];
            for edge in edges.iter_mut() {
                *edge = cur.number()?;
            }
            cur.expect('}')?;
            let stoic = if cur.eat('[') {
                let s: f64 = cur.number()?;
                cur.expect(']')?;
                s
            } else {
                1.0
            };
            let color = if cur.eat('(') {
                Some(cur.take_until(')')?.trim().to_string())
            } else {
                None
            };
            tiles.push(TileType {
                edges,
                stoic,
                color,
            });
        }
        if !cur.eat('}') {
            return Err(cur.error(format!(
                "expected `}}` closing the tile table after {} tiles",
                num_tiles
            )));
        }

        cur.expect_phrase("binding strengths")?;
        cur.expect('=')?;
        cur.expect('{')?;
        let mut strengths = Vec::with_capacity(num_bonds);
        for _ in 0..num_bonds {
            strengths.push(cur.number::<f64>()?);
        }
        if !cur.eat('}') {
            return Err(cur.error(format!(
                "expected `}}` closing the binding strengths after {} values",
                num_bonds
            )));
        }

        let first_option_line = cur.line();
        let mut glue_overrides = Vec::new();
        let mut options = Vec::new();
        for (offset, line) in cur.rest().lines().enumerate() {
            for token in line.split_whitespace() {
                if token.starts_with("g(") {
                    let glue = parse_glue(token)
                        .ok_or_else(|| {
                            KtamError::tile_parse(
                                first_option_line + offset,
                                format!("malformed glue override `{}`", token),
                            )
                        })?;
                    glue_overrides.push(glue);
                } else {
                    options.push(token.to_string());
                }
            }
        }

        Self::assemble(tiles, strengths, glue_overrides, options)
    }

    /// Copy of this set with hydrolyzed partners appended: type `n + N` is
    /// the hydrolyzed form of `n` with the same edges and stoichiometry.
    pub fn with_hydrolysis(&self) -> Self {
        if self.hydrolysis_half.is_some() {
            return self.clone();
        }
        let half = self.num_tiles();
        let mut tiles = self.tiles.clone();
        tiles.extend(self.tiles[1..].iter().cloned());
        Self {
            tiles,
            strengths: self.strengths.clone(),
            glue_overrides: self.glue_overrides.clone(),
            options: self.options.clone(),
            hydrolysis_half: Some(half),
        }
    }

    /// Number of non-empty tile types.
    pub fn num_tiles(&self) -> usize {
        self.tiles.len() - 1
    }

    /// Number of non-null bond types.
    pub fn num_bonds(&self) -> usize {
        self.strengths.len() - 1
    }

    pub fn tile(&self, n: usize) -> &TileType {
        &self.tiles[n]
    }

    #[inline]
    pub fn edges(&self, n: usize) -> &[usize; 4] {
        &self.tiles[n].edges
    }

    pub fn strength(&self, bond: usize) -> f64 {
        self.strengths[bond]
    }

    /// Option tokens trailing the tables, in file order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Unhydrolyzed type count, when hydrolyzed partners are present.
    pub fn hydrolysis_half(&self) -> Option<usize> {
        self.hydrolysis_half
    }

    /// Strength of the junction between two facing bond types.
    pub fn glue(&self, a: usize, b: usize) -> f64 {
        if a == 0 || b == 0 {
            return 0.0;
        }
        if a == b {
            return self.strengths[a];
        }
        self.glue_overrides
            .iter()
            .rev()
            .find(|&&(x, y, _)| (x == a && y == b) || (x == b && y == a))
            .map(|&(_, _, s)| s)
            .unwrap_or(0.0)
    }
}

/// Remove `%` comments while keeping line structure for error reporting.
fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find('%') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `g(a,b)=s`.
fn parse_glue(token: &str) -> Option<(usize, usize, f64)> {
    let inner = token.strip_prefix("g(")?;
    let (pair, value) = inner.split_once(")=")?;
    let (a, b) = pair.split_once(',')?;
    Some((
        a.trim().parse().ok()?,
        b.trim().parse().ok()?,
        value.trim().parse().ok()?,
    ))
}

/// Byte cursor over tile-file text.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn line(&self) -> usize {
        self.src[..self.pos].matches('\n').count() + 1
    }

    fn error(&self, message: impl Into<String>) -> KtamError {
        KtamError::tile_parse(self.line(), message)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn skip_line(&mut self) {
        match self.rest().find('\n') {
            Some(idx) => self.pos += idx + 1,
            None => self.pos = self.src.len(),
        }
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<()> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", ch)))
        }
    }

    /// Whether the next words match `phrase`, ignoring spacing.
    fn peek_phrase(&self, phrase: &str) -> bool {
        let mut probe = Cursor {
            src: self.src,
            pos: self.pos,
        };
        probe.match_phrase(phrase)
    }

    fn match_phrase(&mut self, phrase: &str) -> bool {
        for word in phrase.split_whitespace() {
            self.skip_ws();
            if !self.rest().starts_with(word) {
                return false;
            }
            self.pos += word.len();
        }
        true
    }

    fn expect_phrase(&mut self, phrase: &str) -> Result<()> {
        let start = self.pos;
        if self.match_phrase(phrase) {
            Ok(())
        } else {
            self.pos = start;
            self.skip_ws();
            Err(self.error(format!("expected `{}`", phrase)))
        }
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T> {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
            .unwrap_or(self.rest().len());
        let text = &self.rest()[..len];
        match text.parse::<T>() {
            Ok(value) if len > 0 => {
                self.pos += len;
                Ok(value)
            }
            _ => Err(self.error(format!("expected a number, found `{}`", preview(self.rest())))),
        }
    }

    fn take_until(&mut self, ch: char) -> Result<&'a str> {
        match self.rest().find(ch) {
            Some(idx) => {
                let text = &self.rest()[..idx];
                self.pos += idx + ch.len_utf8();
                Ok(text)
            }
            None => Err(self.error(format!("missing `{}`", ch))),
        }
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(12)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text[..end].lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIERPINSKI: &str = "\
tile edges matches {{N E S W}*}
num tile types=4
num binding types=2
tile edges={
{1 1 1 1}[2.0](red)   % seed-ish
{1 2 1 2}(green)
{2 1 2 1}[0.5]
{2 2 2 2}
}
binding strengths={1 2}
g(1,2)=0.25
Gmc=15 Gse=8.2
periodic
";

    #[test]
    fn test_parse_tables() {
        let ts = TileSet::parse(SIERPINSKI).unwrap();
        assert_eq!(ts.num_tiles(), 4);
        assert_eq!(ts.num_bonds(), 2);
        assert_eq!(ts.edges(2), &[1, 2, 1, 2]);
        assert_eq!(ts.tile(1).stoic, 2.0);
        assert_eq!(ts.tile(1).color.as_deref(), Some("red"));
        assert_eq!(ts.tile(2).stoic, 1.0);
        assert_eq!(ts.tile(3).stoic, 0.5);
        assert_eq!(ts.edges(0), &[0, 0, 0, 0]);
        assert_eq!(ts.options(), &["Gmc=15", "Gse=8.2", "periodic"]);
    }

    #[test]
    fn test_glue_table() {
        let ts = TileSet::parse(SIERPINSKI).unwrap();
        assert_eq!(ts.glue(1, 1), 1.0);
        assert_eq!(ts.glue(2, 2), 2.0);
        assert_eq!(ts.glue(1, 2), 0.25);
        assert_eq!(ts.glue(2, 1), 0.25);
        assert_eq!(ts.glue(0, 1), 0.0);
        assert_eq!(ts.glue(0, 0), 0.0);
    }

    #[test]
    fn test_strengths_on_next_line() {
        let text = "num tile types=1\nnum binding types=1\ntile edges={\n{1 1 1 1}\n}\nbinding strengths=\n{ 2.5 }\n";
        let ts = TileSet::parse(text).unwrap();
        assert_eq!(ts.strength(1), 2.5);
        assert!(ts.options().is_empty());
    }

    #[test]
    fn test_missing_tile_is_fatal() {
        let text = "num tile types=3\nnum binding types=1\ntile edges={\n{1 1 1 1}\n{1 1 1 1}\n}\nbinding strengths={1}\n";
        match TileSet::parse(text) {
            Err(KtamError::TileParse { line, .. }) => assert_eq!(line, 6),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_bond_out_of_range() {
        let text = "num tile types=1\nnum binding types=1\ntile edges={\n{1 3 1 1}\n}\nbinding strengths={1}\n";
        assert!(matches!(
            TileSet::parse(text),
            Err(KtamError::InvalidTileSet(_))
        ));
    }

    #[test]
    fn test_hydrolysis_doubling() {
        let ts = TileSet::parse(SIERPINSKI).unwrap().with_hydrolysis();
        assert_eq!(ts.num_tiles(), 8);
        assert_eq!(ts.hydrolysis_half(), Some(4));
        assert_eq!(ts.edges(6), ts.edges(2));
        assert_eq!(ts.tile(5).stoic, 2.0);
        // doubling twice is a no-op
        assert_eq!(ts.with_hydrolysis().num_tiles(), 8);
    }
}
