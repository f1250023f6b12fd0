//! Aggregate multinomial logit estimation by Newton–Raphson.
//!
//! For choice set `s` the model assigns concept `c` the probability
//! `exp(theta . x_c) / sum_{c'} exp(theta . x_c')`. The estimator maximizes
//! the log-likelihood of the observed winners starting from `theta = 0`,
//! regularizing the information matrix with a ridge whenever it is close to
//! singular. Running out of iterations is reported through
//! [`MnlFit::converged`] rather than as an error.

use log::{debug, info, warn};
use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::encoding::EncodedDesign;
use crate::error::{ConjointError, Result};
use crate::options::EstimationOptions;
use crate::schema::AttributeSchema;
use crate::utilities::PartWorths;

/// Estimated part-worths together with optimizer diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MnlFit {
    pub part_worths: PartWorths,
    /// Newton iterations performed.
    pub iterations: usize,
    /// Log-likelihood at the returned estimate.
    pub log_likelihood: f64,
    /// Log-likelihood of the equal-probability model (`theta = 0`).
    pub null_log_likelihood: f64,
    /// Euclidean norm of the score at the returned estimate.
    pub gradient_norm: f64,
    /// Whether the gradient norm fell below the tolerance.
    pub converged: bool,
    /// Whether the information matrix was near singular, either during the
    /// iterations (a ridge was added) or at the returned estimate.
    pub low_confidence: bool,
    /// Asymptotic standard errors, absent when the final information matrix is singular.
    pub standard_errors: Option<DVector<f64>>,
}

impl MnlFit {
    /// McFadden's pseudo R², `1 - LL / LL0`.
    pub fn pseudo_r_squared(&self) -> f64 {
        if self.null_log_likelihood == 0.0 {
            return 0.0;
        }
        1.0 - self.log_likelihood / self.null_log_likelihood
    }
}

/// Maximum-likelihood MNL problem over an encoded design and observed winners.
#[derive(Clone, Debug)]
pub struct MnlEstimator<'a> {
    schema: &'a AttributeSchema,
    encoded: &'a EncodedDesign,
    /// 0-based winning row offset within each choice set.
    winners: Vec<usize>,
}

struct Evaluation {
    log_likelihood: f64,
    gradient: DVector<f64>,
    information: DMatrix<f64>,
}

impl<'a> MnlEstimator<'a> {
    /// Validates the design width and the 1-based winner indices.
    pub fn new(
        schema: &'a AttributeSchema,
        encoded: &'a EncodedDesign,
        winners: &[usize],
    ) -> Result<Self> {
        if encoded.width() != schema.encoded_width() {
            return Err(ConjointError::dimension_mismatch(
                "encoded columns",
                schema.encoded_width(),
                encoded.width(),
            ));
        }
        let size = encoded.size();
        if winners.len() != size.choice_set_count() {
            return Err(ConjointError::dimension_mismatch(
                "observed winners",
                size.choice_set_count(),
                winners.len(),
            ));
        }
        if let Some((set, winner)) = winners
            .iter()
            .enumerate()
            .find(|&(_, &w)| w == 0 || w > size.cards)
        {
            return Err(ConjointError::configuration(format!(
                "winner {winner} of choice set {} is outside 1..={}",
                set + 1,
                size.cards
            )));
        }
        Ok(Self {
            schema,
            encoded,
            winners: winners.iter().map(|w| w - 1).collect(),
        })
    }

    /// Log-likelihood of the observed winners at `theta`.
    pub fn log_likelihood(&self, theta: &DVector<f64>) -> Result<f64> {
        self.check_theta(theta)?;
        Ok(self.evaluate(theta)?.log_likelihood)
    }

    /// Runs Newton–Raphson from `theta = 0`.
    pub fn fit(&self, options: &EstimationOptions) -> Result<MnlFit> {
        options.validate()?;
        let k = self.encoded.width();
        let mut theta = DVector::zeros(k);
        let mut current = self.evaluate(&theta)?;
        let null_log_likelihood = current.log_likelihood;
        let mut low_confidence = false;
        let mut iterations = 0usize;
        let mut converged = current.gradient.norm() < options.tolerance;

        while !converged && iterations < options.max_iterations {
            let (direction, regularized) = self.newton_direction(&current, options)?;
            low_confidence |= regularized;

            let mut scale = 1.0_f64;
            let mut accepted = None;
            for _ in 0..=options.max_step_halvings {
                let candidate = &theta + &direction * scale;
                let evaluation = self.evaluate(&candidate)?;
                if evaluation.log_likelihood >= current.log_likelihood {
                    accepted = Some((candidate, evaluation));
                    break;
                }
                scale *= 0.5;
            }
            iterations += 1;

            let Some((next_theta, next)) = accepted else {
                warn!("newton step failed to improve the log-likelihood at iteration {iterations}");
                break;
            };
            theta = next_theta;
            current = next;
            converged = current.gradient.norm() < options.tolerance;
            debug!(
                "iteration {iterations}: log-likelihood {:.6}, gradient norm {:.3e}, step {scale}",
                current.log_likelihood,
                current.gradient.norm()
            );
        }

        let gradient_norm = current.gradient.norm();
        if converged {
            info!(
                "MNL converged after {iterations} iterations with log-likelihood {:.6}",
                current.log_likelihood
            );
        } else {
            warn!(
                "MNL stopped after {iterations} iterations without convergence; gradient norm {gradient_norm:.3e}"
            );
        }

        let standard_errors = self.standard_errors(&current.information, options);
        if standard_errors.is_none() {
            warn!("information matrix at the estimate is singular; parameters are not identified");
            low_confidence = true;
        } else if low_confidence {
            warn!("information matrix was regularized; estimates are low-confidence");
        }

        Ok(MnlFit {
            part_worths: PartWorths::from_vector_unchecked(theta),
            iterations,
            log_likelihood: current.log_likelihood,
            null_log_likelihood,
            gradient_norm,
            converged,
            low_confidence,
            standard_errors,
        })
    }

    fn check_theta(&self, theta: &DVector<f64>) -> Result<()> {
        if theta.len() != self.encoded.width() {
            return Err(ConjointError::dimension_mismatch(
                "parameter length",
                self.encoded.width(),
                theta.len(),
            ));
        }
        Ok(())
    }

    fn evaluate(&self, theta: &DVector<f64>) -> Result<Evaluation> {
        let x = self.encoded.matrix();
        let k = x.ncols();
        let utilities = x * theta;

        let mut log_likelihood = 0.0_f64;
        let mut gradient = DVector::zeros(k);
        let mut information = DMatrix::zeros(k, k);

        for set in self.encoded.choice_sets() {
            let range = set.range();
            let (probabilities, log_denominator) = set_probabilities(&utilities, range.clone());
            let winner_row = range.start + self.winners[set.index];
            log_likelihood += utilities[winner_row] - log_denominator;

            let mut mean = DVector::zeros(k);
            for (p, row) in probabilities.iter().zip(range) {
                let xr = x.row(row).transpose();
                mean.axpy(*p, &xr, 1.0);
                information.ger(*p, &xr, &xr, 1.0);
            }
            information.ger(-1.0, &mean, &mean, 1.0);
            gradient += x.row(winner_row).transpose() - mean;
        }

        if !log_likelihood.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(ConjointError::NumericalError {
                context: "log-likelihood evaluation",
            });
        }
        Ok(Evaluation {
            log_likelihood,
            gradient,
            information,
        })
    }

    /// Solves `H d = g`, adding an escalating ridge when `H` is near singular.
    fn newton_direction(
        &self,
        evaluation: &Evaluation,
        options: &EstimationOptions,
    ) -> Result<(DVector<f64>, bool)> {
        let information = &evaluation.information;
        let eigen = SymmetricEigen::new(information.clone());
        let largest = eigen.eigenvalues.max().max(1e-12);
        let smallest = eigen.eigenvalues.min();

        if smallest > options.singularity_threshold * largest {
            if let Some(cholesky) = Cholesky::new(information.clone()) {
                return Ok((cholesky.solve(&evaluation.gradient), false));
            }
        }

        let k = information.nrows();
        let mut ridge = options.ridge * largest;
        for attempt in 0..options.ridge_attempts {
            let regularized = information + DMatrix::identity(k, k) * ridge;
            if let Some(cholesky) = Cholesky::new(regularized) {
                let step = cholesky.solve(&evaluation.gradient);
                if step.iter().all(|v| v.is_finite()) {
                    debug!("information matrix regularized with ridge {ridge:.3e} (attempt {attempt})");
                    return Ok((step, true));
                }
            }
            ridge *= 10.0;
        }

        Err(ConjointError::NumericalSingularity {
            column: self.collinear_column(&eigen),
        })
    }

    /// Label of the column loading most heavily on the smallest-eigenvalue direction.
    fn collinear_column(&self, eigen: &SymmetricEigen<f64, nalgebra::Dyn>) -> String {
        let weakest = eigen.eigenvalues.imin();
        let vector = eigen.eigenvectors.column(weakest);
        let column = vector.iamax();
        self.schema
            .encoded_labels()
            .into_iter()
            .nth(column)
            .unwrap_or_else(|| format!("column {column}"))
    }

    fn standard_errors(
        &self,
        information: &DMatrix<f64>,
        options: &EstimationOptions,
    ) -> Option<DVector<f64>> {
        let eigen = SymmetricEigen::new(information.clone());
        let largest = eigen.eigenvalues.max();
        if largest <= 0.0 || eigen.eigenvalues.min() <= options.singularity_threshold * largest {
            return None;
        }
        let covariance = Cholesky::new(information.clone())?.inverse();
        Some(covariance.diagonal().map(f64::sqrt))
    }
}

/// Logit probabilities of the rows in `range` and the log of their denominator.
fn set_probabilities(utilities: &DVector<f64>, range: std::ops::Range<usize>) -> (Vec<f64>, f64) {
    let max = range
        .clone()
        .map(|row| utilities[row])
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = range.map(|row| (utilities[row] - max).exp()).collect();
    let denominator: f64 = exps.iter().sum();
    let probabilities = exps.iter().map(|e| e / denominator).collect();
    (probabilities, max + denominator.ln())
}

/// Model-implied choice probability of every encoded row at the given part-worths.
pub fn predict_probabilities(
    encoded: &EncodedDesign,
    part_worths: &PartWorths,
) -> Result<DVector<f64>> {
    if part_worths.len() != encoded.width() {
        return Err(ConjointError::dimension_mismatch(
            "part-worth length",
            encoded.width(),
            part_worths.len(),
        ));
    }
    let utilities = encoded.matrix() * part_worths.values();
    let mut predicted = DVector::zeros(encoded.row_count());
    for set in encoded.choice_sets() {
        let range = set.range();
        let (probabilities, _) = set_probabilities(&utilities, range.clone());
        for (p, row) in probabilities.into_iter().zip(range) {
            predicted[row] = p;
        }
    }
    Ok(predicted)
}
