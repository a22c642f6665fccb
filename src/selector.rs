use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::StageError;
use crate::product::{Product, SelectionWindow};

/// Randomness seam for selection: pick an index in `0..len`. Callers never
/// pass `len == 0`.
pub trait IndexSource {
    fn pick_index(&mut self, len: usize) -> usize;
}

/// Draws from a freshly obtained thread RNG on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl IndexSource for ThreadRngSource {
    fn pick_index(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Reproducible draws for replaying a run.
#[derive(Debug, Clone)]
pub struct SeededSource {
    rng: StdRng,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl IndexSource for SeededSource {
    fn pick_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

pub fn eligible<'a>(candidates: &'a [Product], window: &SelectionWindow) -> Vec<&'a Product> {
    candidates
        .iter()
        .filter(|product| window.contains(product.size_bytes))
        .collect()
}

pub fn select<'a>(
    candidates: &'a [Product],
    window: &SelectionWindow,
    source: &mut dyn IndexSource,
) -> Result<&'a Product, StageError> {
    let narrowed = eligible(candidates, window);
    info!(
        candidates = candidates.len(),
        eligible = narrowed.len(),
        "Narrowed candidate selection"
    );
    if narrowed.is_empty() {
        return Err(StageError::NoEligibleProduct {
            candidates: candidates.len(),
            min_size: window.min_size(),
            max_size: window.max_size(),
        });
    }

    let index = source.pick_index(narrowed.len());
    debug_assert!(
        index < narrowed.len(),
        "index source returned {index} for {} eligible product(s)",
        narrowed.len()
    );
    let chosen = narrowed
        .get(index)
        .copied()
        .ok_or(StageError::IndexOutOfRange {
            index,
            eligible: narrowed.len(),
        })?;
    info!(title = chosen.title.as_str(), size = chosen.size_bytes, "Selected product");
    Ok(chosen)
}
