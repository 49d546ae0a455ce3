//! Error type shared by the tile-set loader, configuration layer, snapshot
//! codec and tube operations.
//!
//! Rejected model events (threshold failures, disallowed fission) are valid
//! outcomes of the simulation and never surface here.

use thiserror::Error;

/// Errors raised before or between simulation batches.
#[derive(Debug, Error)]
pub enum KtamError {
    /// Grammar violation in a tile-set file.
    #[error("tile file line {line}: {message}")]
    TileParse { line: usize, message: String },

    /// Tile set parsed but is not usable (bad counts, ids out of range).
    #[error("invalid tile set: {0}")]
    InvalidTileSet(String),

    /// Option token with an unrecognized key.
    #[error("unknown option `{0}`")]
    UnknownOption(String),

    /// Option token whose value could not be interpreted.
    #[error("invalid value for option `{key}`: {value}")]
    InvalidOption { key: String, value: String },

    /// Option recognized but not supported by this core.
    #[error("unsupported option `{0}`")]
    UnsupportedOption(String),

    /// Kinetic parameters inconsistent with the loaded tile set.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Grammar violation in a flake snapshot.
    #[error("snapshot line {line}: {message}")]
    SnapshotParse { line: usize, message: String },

    /// Imported flake does not fit the configured board.
    #[error("snapshot grid {rows}x{cols} does not fit a {side}x{side} board")]
    SnapshotTooLarge { rows: usize, cols: usize, side: usize },

    /// Seed or cell placement outside the board or with a bad tile id.
    #[error("invalid flake: {0}")]
    InvalidFlake(String),

    /// Flake handle that does not refer to a live flake.
    #[error("no live flake with id {0}")]
    UnknownFlake(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Alias for fallible core operations.
pub type Result<T> = std::result::Result<T, KtamError>;

impl KtamError {
    pub(crate) fn tile_parse(line: usize, message: impl Into<String>) -> Self {
        KtamError::TileParse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn snapshot_parse(line: usize, message: impl Into<String>) -> Self {
        KtamError::SnapshotParse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_option(key: &str, value: &str) -> Self {
        KtamError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}
