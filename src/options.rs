//! Configuration structures for design generation, MNL estimation and market simulation.

use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};

/// Relative weights of the two balance-score terms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceWeights {
    /// Weight on per-level frequency deviations.
    pub level: f64,
    /// Weight on pairwise level co-occurrence deviations.
    pub pair: f64,
}

impl Default for BalanceWeights {
    fn default() -> Self {
        Self {
            level: 1.0,
            pair: 1.0,
        }
    }
}

/// How levels may repeat among the concepts of one choice set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Every level is drawn independently and uniformly.
    #[default]
    Allowed,
    /// Identical concepts never share a choice set.
    NoDuplicateConcepts,
    /// An attribute's levels repeat within a set only after all of them were used.
    MinimalOverlap,
}

/// Controls the random balanced-design search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Total number of candidate designs drawn across all workers.
    pub iterations: usize,
    /// Number of independent search workers, each with its own random stream.
    pub workers: usize,
    pub overlap: OverlapPolicy,
    pub weights: BalanceWeights,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            workers: 4,
            overlap: OverlapPolicy::Allowed,
            weights: BalanceWeights::default(),
        }
    }
}

impl GenerationOptions {
    /// Sets the total candidate budget.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the number of search workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the within-set overlap policy.
    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Sets the balance-score weights.
    pub fn with_weights(mut self, weights: BalanceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ConjointError::configuration(
                "design search needs at least one iteration",
            ));
        }
        if self.workers == 0 {
            return Err(ConjointError::configuration(
                "design search needs at least one worker",
            ));
        }
        let BalanceWeights { level, pair } = self.weights;
        if !(level.is_finite() && pair.is_finite()) || level < 0.0 || pair < 0.0 {
            return Err(ConjointError::configuration(
                "balance weights must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Controls the Newton–Raphson maximum-likelihood fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimationOptions {
    /// Maximum number of Newton iterations.
    pub max_iterations: usize,
    /// Euclidean norm of the gradient below which the fit is converged.
    pub tolerance: f64,
    /// Smallest-to-largest eigenvalue ratio below which the Hessian counts as singular.
    pub singularity_threshold: f64,
    /// Ridge added to the diagonal, relative to the largest eigenvalue.
    pub ridge: f64,
    /// Number of times the ridge is multiplied by ten before giving up.
    pub ridge_attempts: usize,
    /// Maximum step halvings when a full Newton step lowers the likelihood.
    pub max_step_halvings: usize,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            singularity_threshold: 1e-10,
            ridge: 1e-6,
            ridge_attempts: 8,
            max_step_halvings: 30,
        }
    }
}

impl EstimationOptions {
    /// Sets the Newton iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the gradient-norm convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the initial relative ridge.
    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    /// Sets the eigenvalue ratio below which the information matrix counts as singular.
    pub fn with_singularity_threshold(mut self, threshold: f64) -> Self {
        self.singularity_threshold = threshold;
        self
    }

    /// Sets how many times the ridge may be escalated before giving up.
    pub fn with_ridge_attempts(mut self, attempts: usize) -> Self {
        self.ridge_attempts = attempts;
        self
    }

    /// Sets the step-halving budget per Newton iteration.
    pub fn with_max_step_halvings(mut self, halvings: usize) -> Self {
        self.max_step_halvings = halvings;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConjointError::configuration(
                "gradient tolerance must be positive",
            ));
        }
        if !(self.singularity_threshold.is_finite() && self.singularity_threshold >= 0.0) {
            return Err(ConjointError::configuration(
                "singularity threshold must be finite and non-negative",
            ));
        }
        if !(self.ridge.is_finite() && self.ridge > 0.0) {
            return Err(ConjointError::configuration("ridge must be positive"));
        }
        if self.ridge_attempts == 0 {
            return Err(ConjointError::configuration(
                "at least one ridge attempt is required",
            ));
        }
        Ok(())
    }
}

/// Decision rule turning alternative utilities into predicted shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionRule {
    /// Deterministic one-hot on the highest-utility alternative.
    FirstChoice,
    /// Averages one-hot winners over Gumbel-perturbed utility draws.
    FirstChoiceRandom,
    /// Closed-form logit (softmax) shares.
    ShareOfPreference,
}

/// Controls a market simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketOptions {
    pub rule: DecisionRule,
    /// Reservation utility of the "none" alternative; `None` omits it.
    pub none_utility: Option<f64>,
    /// Monte Carlo draws per respondent for [`DecisionRule::FirstChoiceRandom`].
    pub draws: usize,
}

impl Default for MarketOptions {
    fn default() -> Self {
        Self {
            rule: DecisionRule::ShareOfPreference,
            none_utility: None,
            draws: 1_000,
        }
    }
}

impl MarketOptions {
    /// Default options for the given decision rule.
    pub fn new(rule: DecisionRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Adds a "none" alternative with the default reservation utility of zero.
    pub fn with_none(self) -> Self {
        self.with_none_utility(0.0)
    }

    /// Adds a "none" alternative with the given reservation utility.
    pub fn with_none_utility(mut self, utility: f64) -> Self {
        self.none_utility = Some(utility);
        self
    }

    /// Sets the Monte Carlo draws per respondent.
    pub fn with_draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rule == DecisionRule::FirstChoiceRandom && self.draws == 0 {
            return Err(ConjointError::configuration(
                "randomized first-choice rule needs at least one draw",
            ));
        }
        if let Some(utility) = self.none_utility {
            if !utility.is_finite() {
                return Err(ConjointError::configuration(
                    "none utility must be finite",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GenerationOptions::default().validate().is_ok());
        assert!(EstimationOptions::default().validate().is_ok());
        assert!(MarketOptions::default().validate().is_ok());
    }

    #[test]
    fn randomized_rule_requires_draws() {
        let options = MarketOptions::new(DecisionRule::FirstChoiceRandom).with_draws(0);
        assert!(matches!(
            options.validate(),
            Err(ConjointError::Configuration { .. })
        ));
        let closed_form = MarketOptions::new(DecisionRule::ShareOfPreference).with_draws(0);
        assert!(closed_form.validate().is_ok());
    }

    #[test]
    fn estimation_setters_cover_every_knob() {
        let options = EstimationOptions::default()
            .with_max_iterations(20)
            .with_tolerance(1e-8)
            .with_ridge(1e-4)
            .with_singularity_threshold(1e-12)
            .with_ridge_attempts(3)
            .with_max_step_halvings(5);
        assert_eq!(
            options,
            EstimationOptions {
                max_iterations: 20,
                tolerance: 1e-8,
                singularity_threshold: 1e-12,
                ridge: 1e-4,
                ridge_attempts: 3,
                max_step_halvings: 5,
            }
        );
        assert!(options.validate().is_ok());
        assert!(options.clone().with_ridge_attempts(0).validate().is_err());
        assert!(options.with_singularity_threshold(f64::NAN).validate().is_err());
    }

    #[test]
    fn generation_rejects_empty_budget_and_negative_weights() {
        assert!(GenerationOptions::default()
            .with_iterations(0)
            .validate()
            .is_err());
        assert!(GenerationOptions::default()
            .with_workers(0)
            .validate()
            .is_err());
        let weights = BalanceWeights {
            level: -1.0,
            pair: 1.0,
        };
        assert!(GenerationOptions::default()
            .with_weights(weights)
            .validate()
            .is_err());
    }
}
