// src/engine/filters.rs
//! Built-in functions the sandbox installs in every engine

use minijinja::{Error, ErrorKind};

/// Largest sequence `range()` will produce
pub const MAX_RANGE: u64 = 1000;

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`, capped at
/// [`MAX_RANGE`] items.
///
/// Nested loops can still multiply well past the cap; the worker's CPU limit
/// catches those.
pub fn bounded_range(lower: u32, upper: Option<u32>, step: Option<u32>) -> Result<Vec<u32>, Error> {
    let (start, stop) = match upper {
        Some(upper) => (lower, upper),
        None => (0, lower),
    };
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "range() step must not be zero",
        ));
    }

    let len = if stop > start {
        (u64::from(stop - start) + u64::from(step) - 1) / u64::from(step)
    } else {
        0
    };
    if len > MAX_RANGE {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("range too big (max {} items, got {})", MAX_RANGE, len),
        ));
    }

    Ok((start..stop).step_by(step as usize).collect())
}
