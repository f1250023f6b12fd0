//! Synthetic respondents: pick a winner per choice set from known part-worths.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use crate::draws::{argmax, standard_gumbel};
use crate::encoding::EncodedDesign;
use crate::error::{ConjointError, Result};
use crate::utilities::PartWorths;

/// Noise added to concept utilities before comparing them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseMode {
    /// Deterministic utility maximization.
    #[default]
    None,
    /// One independent standard Gumbel draw per concept, consistent with MNL.
    Gumbel,
}

/// Deterministic utility `x_c . theta` of every encoded row.
pub fn utilities(encoded: &EncodedDesign, part_worths: &PartWorths) -> Result<DVector<f64>> {
    if part_worths.len() != encoded.width() {
        return Err(ConjointError::dimension_mismatch(
            "part-worth length",
            encoded.width(),
            part_worths.len(),
        ));
    }
    Ok(encoded.matrix() * part_worths.values())
}

/// Simulates one 1-based winner per choice set.
///
/// Ties are resolved toward the lowest concept index.
pub fn simulate_choices<R>(
    encoded: &EncodedDesign,
    part_worths: &PartWorths,
    noise: NoiseMode,
    rng: &mut R,
) -> Result<Vec<usize>>
where
    R: Rng + ?Sized,
{
    let base = utilities(encoded, part_worths)?;
    let gumbel = standard_gumbel()?;

    let mut winners = Vec::with_capacity(encoded.size().choice_set_count());
    let mut scratch = Vec::with_capacity(encoded.size().cards);
    for set in encoded.choice_sets() {
        scratch.clear();
        for row in set.range() {
            let noise_term = match noise {
                NoiseMode::None => 0.0,
                NoiseMode::Gumbel => gumbel.sample(rng),
            };
            scratch.push(base[row] + noise_term);
        }
        winners.push(argmax(&scratch) + 1);
    }
    Ok(winners)
}
