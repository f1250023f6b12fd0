//! Boundary to an external hierarchical Bayes sampler.
//!
//! The sampler itself is opaque: this module only validates what goes in,
//! packages the effects-coded design and observed choices into an
//! [`HbRequest`], and checks that the per-respondent estimates coming back
//! line up with the schema before handing them to market simulation.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::design::{DesignSize, TabDesign};
use crate::encoding::{encode, EncodedDesign};
use crate::error::{ConjointError, Result};
use crate::schema::AttributeSchema;
use crate::utilities::{UtilityLayout, UtilityMatrix};

/// MCMC run configuration forwarded to the sampler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HbConfig {
    /// Total Markov-chain iterations.
    pub iterations: usize,
    /// Trailing fraction of iterations kept as posterior draws.
    pub posterior_fraction: f64,
    /// Keep every `thinning`-th retained iteration.
    pub thinning: usize,
    /// Whether the sampler should return full per-respondent draws.
    pub keep_draws: bool,
}

impl Default for HbConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            posterior_fraction: 0.5,
            thinning: 10,
            keep_draws: false,
        }
    }
}

impl HbConfig {
    /// Number of posterior draws kept per respondent.
    pub fn retained_draws(&self) -> usize {
        let posterior = (self.iterations as f64 * self.posterior_fraction).floor() as usize;
        posterior / self.thinning.max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ConjointError::configuration(
                "MCMC needs at least one iteration",
            ));
        }
        if !(self.posterior_fraction > 0.0 && self.posterior_fraction <= 1.0) {
            return Err(ConjointError::configuration(format!(
                "posterior fraction must lie in (0, 1], found {}",
                self.posterior_fraction
            )));
        }
        if self.thinning == 0 {
            return Err(ConjointError::configuration("thinning must be at least 1"));
        }
        if self.retained_draws() == 0 {
            return Err(ConjointError::configuration(
                "configuration retains no posterior draws",
            ));
        }
        Ok(())
    }
}

/// Validated input handed to the sampler.
#[derive(Clone, Debug)]
pub struct HbRequest<'a> {
    pub encoded: &'a EncodedDesign,
    /// 1-based winners, one per choice set, respondent-major.
    pub choices: &'a [usize],
    pub size: DesignSize,
    pub config: &'a HbConfig,
}

/// Raw sampler output in the effects-coded column layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HbDraws {
    /// Posterior means, respondents by encoded columns.
    pub point_estimates: DMatrix<f64>,
    /// Optional per-respondent draw matrices, retained draws by encoded columns.
    pub draws: Option<Vec<DMatrix<f64>>>,
}

/// External hierarchical sampler.
pub trait HierarchicalSampler {
    fn sample(&self, request: &HbRequest<'_>) -> Result<HbDraws>;
}

/// Per-respondent utilities recovered through the adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HbFit {
    pub utilities: UtilityMatrix,
    pub draws: Option<Vec<DMatrix<f64>>>,
}

/// Shape-checking wrapper around a [`HierarchicalSampler`].
#[derive(Clone, Debug)]
pub struct HbAdapter<S> {
    sampler: S,
}

impl<S: HierarchicalSampler> HbAdapter<S> {
    /// Wraps an external sampler.
    pub fn new(sampler: S) -> Self {
        Self { sampler }
    }

    /// Accessor for the wrapped sampler.
    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Validates inputs, runs the sampler and reshapes its output.
    pub fn fit(
        &self,
        schema: &AttributeSchema,
        design: &TabDesign,
        choices: &[usize],
        size: DesignSize,
        config: &HbConfig,
    ) -> Result<HbFit> {
        size.validate()?;
        if design.size() != size {
            return Err(ConjointError::configuration(format!(
                "design has {} respondents x {} trials x {} cards but {} x {} x {} was requested",
                design.size().respondents,
                design.size().trials,
                design.size().cards,
                size.respondents,
                size.trials,
                size.cards
            )));
        }
        if choices.len() != size.choice_set_count() {
            return Err(ConjointError::dimension_mismatch(
                "observed choices",
                size.choice_set_count(),
                choices.len(),
            ));
        }
        if let Some(bad) = choices.iter().find(|&&c| c == 0 || c > size.cards) {
            return Err(ConjointError::configuration(format!(
                "choice {bad} is outside 1..={}",
                size.cards
            )));
        }
        config.validate()?;

        let encoded = encode(schema, design)?;
        let request = HbRequest {
            encoded: &encoded,
            choices,
            size,
            config,
        };
        let output = self.sampler.sample(&request)?;

        let width = schema.encoded_width();
        let estimates = &output.point_estimates;
        if estimates.nrows() != size.respondents {
            return Err(ConjointError::dimension_mismatch(
                "posterior mean rows",
                size.respondents,
                estimates.nrows(),
            ));
        }
        if estimates.ncols() != width {
            return Err(ConjointError::dimension_mismatch(
                "posterior mean columns",
                width,
                estimates.ncols(),
            ));
        }
        if let Some(draws) = &output.draws {
            if draws.len() != size.respondents {
                return Err(ConjointError::dimension_mismatch(
                    "respondent draw sets",
                    size.respondents,
                    draws.len(),
                ));
            }
            if let Some(bad) = draws.iter().find(|d| d.ncols() != width) {
                return Err(ConjointError::dimension_mismatch(
                    "draw columns",
                    width,
                    bad.ncols(),
                ));
            }
        }

        let utilities = UtilityMatrix::new(schema, UtilityLayout::EffectsCoded, output.point_estimates)?;
        Ok(HbFit {
            utilities,
            draws: output.draws,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Concept;

    /// Returns a fixed utility row per respondent, optionally with fake draws.
    struct FixedSampler {
        row: Vec<f64>,
        with_draws: bool,
    }

    impl HierarchicalSampler for FixedSampler {
        fn sample(&self, request: &HbRequest<'_>) -> Result<HbDraws> {
            let n = request.size.respondents;
            let width = request.encoded.width();
            let point_estimates = DMatrix::from_fn(n, self.row.len(), |_, c| self.row[c]);
            let draws = self.with_draws.then(|| {
                (0..n)
                    .map(|_| DMatrix::zeros(request.config.retained_draws(), width))
                    .collect()
            });
            Ok(HbDraws {
                point_estimates,
                draws,
            })
        }
    }

    fn fixture() -> (AttributeSchema, TabDesign) {
        let schema = AttributeSchema::builder()
            .attribute("a", ["a1", "a2"])
            .attribute("b", ["b1", "b2", "b3"])
            .build()
            .unwrap();
        let size = DesignSize::new(2, 1, 2).unwrap();
        let rows = vec![
            Concept::new(vec![1, 1]),
            Concept::new(vec![2, 3]),
            Concept::new(vec![2, 2]),
            Concept::new(vec![1, 3]),
        ];
        let design = TabDesign::new(&schema, size, rows).unwrap();
        (schema, design)
    }

    #[test]
    fn reshapes_point_estimates_into_utilities() {
        let (schema, design) = fixture();
        let adapter = HbAdapter::new(FixedSampler {
            row: vec![0.4, 0.1, -0.3],
            with_draws: true,
        });
        let config = HbConfig {
            keep_draws: true,
            ..HbConfig::default()
        };
        let fit = adapter
            .fit(&schema, &design, &[1, 2], design.size(), &config)
            .unwrap();
        assert_eq!(fit.utilities.respondent_count(), 2);
        assert_eq!(fit.utilities.layout(), UtilityLayout::EffectsCoded);
        let draws = fit.draws.unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].nrows(), 500);
    }

    #[test]
    fn rejects_bad_inputs_before_sampling() {
        let (schema, design) = fixture();
        let adapter = HbAdapter::new(FixedSampler {
            row: vec![0.0; 3],
            with_draws: false,
        });
        let config = HbConfig::default();
        let size = design.size();

        assert!(adapter.fit(&schema, &design, &[1], size, &config).is_err());
        assert!(adapter.fit(&schema, &design, &[1, 3], size, &config).is_err());
        let other = DesignSize::new(1, 2, 2).unwrap();
        assert!(adapter.fit(&schema, &design, &[1, 2], other, &config).is_err());

        let no_posterior = HbConfig {
            posterior_fraction: 0.0,
            ..HbConfig::default()
        };
        assert!(adapter.fit(&schema, &design, &[1, 2], size, &no_posterior).is_err());
        let too_thin = HbConfig {
            iterations: 10,
            thinning: 20,
            ..HbConfig::default()
        };
        assert!(adapter.fit(&schema, &design, &[1, 2], size, &too_thin).is_err());
    }

    #[test]
    fn rejects_misshaped_sampler_output() {
        let (schema, design) = fixture();
        let adapter = HbAdapter::new(FixedSampler {
            row: vec![0.0; 5],
            with_draws: false,
        });
        let result = adapter.fit(&schema, &design, &[1, 2], design.size(), &HbConfig::default());
        assert!(matches!(
            result,
            Err(ConjointError::DimensionMismatch { expected: 3, found: 5, .. })
        ));
    }
}
