//! Seeded random sources and the Gumbel noise used by logit-consistent simulation.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::Gumbel;
use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};

/// Explicit random-source handle threaded through every stochastic component.
///
/// Parallel work units never share a generator: each one asks for its own
/// [`stream`](RandomSource::stream), derived deterministically from the root
/// seed and the unit's index, so results do not depend on thread scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomSource {
    seed: u64,
}

impl RandomSource {
    /// Creates a source rooted at `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Accessor for the root seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generator for sequential use of the root seed.
    pub fn rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }

    /// Independent sub-stream for parallel unit `index`.
    pub fn stream(&self, index: u64) -> SmallRng {
        SmallRng::seed_from_u64(splitmix64(
            self.seed ^ splitmix64(index.wrapping_add(0x9E37_79B9_7F4A_7C15)),
        ))
    }

    /// Child source whose streams do not overlap with this one's.
    pub fn derive(&self, index: u64) -> Self {
        Self::new(splitmix64(self.seed.wrapping_add(splitmix64(!index))))
    }
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Standard Gumbel (location 0, scale 1) distribution, the MNL error term.
pub fn standard_gumbel() -> Result<Gumbel<f64>> {
    Gumbel::new(0.0, 1.0).map_err(|_| ConjointError::NumericalError {
        context: "gumbel distribution",
    })
}

/// Index of the largest value, ties resolved toward the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0usize;
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = index;
        }
    }
    best
}
