//! Python bindings.

use ndarray::Array2;
use numpy::PyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;

use crate::config::SimConfig;
use crate::error::KtamError;
use crate::kinetics::{simulate_ensemble_parallel, RunSummary, Simulator};
use crate::tileset::TileSet;

fn to_py_err(e: KtamError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn summary_dict<'py>(py: Python<'py>, summary: &RunSummary) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("seed", summary.seed)?;
    dict.set_item("time", summary.time)?;
    dict.set_item("events", summary.stats.events)?;
    dict.set_item("associations", summary.stats.associations)?;
    dict.set_item("dissociations", summary.stats.dissociations)?;
    dict.set_item("hydrolyses", summary.stats.hydrolyses)?;
    dict.set_item("fissions", summary.stats.fissions)?;
    dict.set_item("rejected", summary.stats.rejected)?;
    dict.set_item("flakes", summary.flakes)?;
    dict.set_item("total_tiles", summary.total_tiles)?;
    match &summary.largest {
        Some(report) => dict.set_item("largest", report.values().to_vec())?,
        None => dict.set_item("largest", py.None())?,
    }
    Ok(dict)
}

/// Run one tube.
///
/// # Arguments
/// * `tile_text` - Tile-set file contents
/// * `options` - Option tokens (`Gmc=15`, `emax=10000`, ...) applied after the tile file's own
/// * `seed` - RNG seed; overrides any `rand=` option
///
/// # Returns
/// * (summary dict, grid of the largest flake after cleaning, or None if extinct)
#[pyfunction]
#[pyo3(signature = (tile_text, options=Vec::new(), seed=None))]
fn simulate<'py>(
    py: Python<'py>,
    tile_text: &str,
    options: Vec<String>,
    seed: Option<u64>,
) -> PyResult<(&'py PyDict, PyObject)> {
    let tiles = TileSet::parse(tile_text).map_err(to_py_err)?;
    let mut config = SimConfig::for_tile_set(&tiles, &options).map_err(to_py_err)?;
    if seed.is_some() {
        config.rng_seed = seed;
    }

    let mut sim = Simulator::from_config(&tiles, &config).map_err(to_py_err)?;
    let reason = py.allow_threads(|| sim.run(&config.limits, config.update_rate));
    sim.finish(&config).map_err(to_py_err)?;

    let dict = summary_dict(py, &sim.summary())?;
    dict.set_item("stop_reason", format!("{:?}", reason))?;

    let tube = sim.tube();
    let grid = match tube.largest_flake().and_then(|id| tube.flake(id)) {
        Some(flake) => {
            let side = flake.grid().side();
            let cells: Vec<u16> = flake.grid().rows().into_iter().flatten().collect();
            let array = Array2::from_shape_vec((side, side), cells)
                .map_err(|e| PyValueError::new_err(e.to_string()))?;
            PyArray2::from_owned_array(py, array).to_object(py)
        }
        None => py.None(),
    };
    Ok((dict, grid))
}

/// Run independent replicate tubes in parallel.
///
/// # Returns
/// * List of summary dicts, one per replicate
#[pyfunction]
#[pyo3(signature = (tile_text, n_runs, options=Vec::new(), seed=0))]
fn simulate_ensemble(
    py: Python,
    tile_text: &str,
    n_runs: usize,
    options: Vec<String>,
    seed: u64,
) -> PyResult<Vec<PyObject>> {
    let tiles = TileSet::parse(tile_text).map_err(to_py_err)?;
    let config = SimConfig::for_tile_set(&tiles, &options).map_err(to_py_err)?;

    let summaries = py
        .allow_threads(|| simulate_ensemble_parallel(&tiles, &config, n_runs, seed))
        .map_err(to_py_err)?;

    summaries
        .iter()
        .map(|s| summary_dict(py, s).map(|d| d.to_object(py)))
        .collect()
}

/// Python module definition
#[pymodule]
fn ktam_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(simulate, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_ensemble, m)?)?;
    Ok(())
}
