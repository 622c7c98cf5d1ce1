//! Memory accounting for dense ensemble matrices.
//!
//! An ensemble holds N dense `[samples x labels]` matrices at once. Running out of
//! memory must surface as [`EnsembleError::ResourceExhausted`] rather than an abort or
//! a silently truncated ensemble, so large buffers are reserved fallibly and the
//! pipeline checks its estimate against the system before loading every model.

use crate::types::EnsembleError;
use ndarray::Array2;
use sysinfo::System;

/// Bytes held per cell by one model: its `f64` probability and its `u8` ballot.
const BYTES_PER_MODEL_CELL: u64 = 8 + 1;
/// Bytes held per cell by the aggregate: the `f64` vote and the `u8` decision.
const BYTES_PER_AGGREGATE_CELL: u64 = 8 + 1;

/// Estimates the resident size of a full run over `num_models` matrices.
pub fn estimate_ensemble_bytes(num_models: usize, rows: usize, cols: usize) -> u64 {
    let cells = rows as u64 * cols as u64;
    cells
        .saturating_mul(num_models as u64)
        .saturating_mul(BYTES_PER_MODEL_CELL)
        .saturating_add(cells.saturating_mul(BYTES_PER_AGGREGATE_CELL))
}

/// Fails with `ResourceExhausted` when `required` bytes exceed the memory the operating
/// system reports as available. Platforms that report no figure are not checked.
pub fn ensure_available(required: u64) -> Result<(), EnsembleError> {
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    check_budget(required, available)
}

fn check_budget(required: u64, available: u64) -> Result<(), EnsembleError> {
    if available > 0 && required > available {
        return Err(EnsembleError::ResourceExhausted {
            required,
            available,
        });
    }
    Ok(())
}

/// Allocates a `[rows x cols]` matrix filled with `T::default()` (zero for numeric
/// types), reporting allocation failure instead of aborting.
pub fn try_zeroed<T: Clone + Default>(rows: usize, cols: usize) -> Result<Array2<T>, EnsembleError> {
    let exhausted = || EnsembleError::ResourceExhausted {
        required: (rows as u64)
            .saturating_mul(cols as u64)
            .saturating_mul(std::mem::size_of::<T>() as u64),
        available: 0,
    };
    let len = rows.checked_mul(cols).ok_or_else(exhausted)?;
    let mut buffer: Vec<T> = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| exhausted())?;
    buffer.resize(len, T::default());
    Array2::from_shape_vec((rows, cols), buffer).map_err(|_| exhausted())
}
