//! Market simulation: predicted shares of a product line-up per respondent.

use nalgebra::{DMatrix, DVector};
use rand_distr::Distribution;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::draws::{argmax, standard_gumbel, RandomSource};
use crate::error::{ConjointError, Result};
use crate::options::{DecisionRule, MarketOptions};
use crate::schema::AttributeSchema;
use crate::utilities::UtilityMatrix;

/// A fully specified product offered in a simulated market.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    name: String,
    levels: Vec<usize>,
}

impl Product {
    /// Creates a product from 1-based level indices in schema order.
    pub fn new<S: Into<String>>(schema: &AttributeSchema, name: S, levels: Vec<usize>) -> Result<Self> {
        schema.validate_levels(&levels)?;
        Ok(Self {
            name: name.into(),
            levels,
        })
    }

    /// Creates a product from `(attribute, level label)` pairs covering every attribute.
    pub fn from_labels<S: Into<String>>(
        schema: &AttributeSchema,
        name: S,
        labels: &[(&str, &str)],
    ) -> Result<Self> {
        let mut levels = vec![0usize; schema.attribute_count()];
        for (attribute_name, label) in labels {
            let index = schema.attribute_index(attribute_name).ok_or_else(|| {
                ConjointError::configuration(format!("unknown attribute `{attribute_name}`"))
            })?;
            levels[index] = schema.attribute(index).level_index(label).ok_or_else(|| {
                ConjointError::configuration(format!(
                    "attribute `{attribute_name}` has no level `{label}`"
                ))
            })?;
        }
        if let Some(missing) = levels.iter().position(|&l| l == 0) {
            return Err(ConjointError::configuration(format!(
                "product leaves attribute `{}` unspecified",
                schema.attribute(missing).name()
            )));
        }
        Self::new(schema, name, levels)
    }

    /// Accessor for the product name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accessor for the product's 1-based levels.
    pub fn levels(&self) -> &[usize] {
        &self.levels
    }
}

/// Predicted shares: one row per respondent, one column per alternative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSimResult {
    labels: Vec<String>,
    shares: DMatrix<f64>,
}

impl MarketSimResult {
    /// Column labels: product names, then `"none"` when that alternative was simulated.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Per-respondent shares, one row per respondent and one column per alternative.
    pub fn shares(&self) -> &DMatrix<f64> {
        &self.shares
    }

    /// Number of simulated respondents.
    pub fn respondent_count(&self) -> usize {
        self.shares.nrows()
    }

    /// Market-level shares: the mean over respondents.
    pub fn aggregate(&self) -> DVector<f64> {
        let n = self.shares.nrows().max(1) as f64;
        self.shares.row_sum().transpose() / n
    }
}

/// Share predictor for a fixed schema and product line-up.
#[derive(Clone, Debug)]
pub struct MarketSimulator<'a> {
    schema: &'a AttributeSchema,
    products: &'a [Product],
}

impl<'a> MarketSimulator<'a> {
    /// Validates the product line-up against the schema.
    pub fn new(schema: &'a AttributeSchema, products: &'a [Product]) -> Result<Self> {
        if products.is_empty() {
            return Err(ConjointError::configuration(
                "market simulation needs at least one product",
            ));
        }
        for product in products {
            schema.validate_levels(product.levels())?;
        }
        Ok(Self { schema, products })
    }

    /// Predicts every respondent's shares under the configured decision rule.
    ///
    /// Respondents are simulated in parallel; respondent `r` draws its noise
    /// from `source.stream(r)`, so output does not depend on scheduling.
    pub fn simulate(
        &self,
        utilities: &UtilityMatrix,
        options: &MarketOptions,
        source: &RandomSource,
    ) -> Result<MarketSimResult> {
        options.validate()?;
        let levels = utilities.to_levels(self.schema)?;
        let alternatives = self.products.len() + usize::from(options.none_utility.is_some());

        let rows = (0..levels.nrows())
            .into_par_iter()
            .map(|respondent| {
                let values = self.alternative_utilities(&levels, respondent, options.none_utility);
                match options.rule {
                    DecisionRule::FirstChoice => Ok(first_choice(&values)),
                    DecisionRule::ShareOfPreference => Ok(softmax(&values)),
                    DecisionRule::FirstChoiceRandom => {
                        randomized_first_choice(&values, options.draws, source, respondent as u64)
                    }
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let shares = DMatrix::from_fn(rows.len(), alternatives, |r, c| rows[r][c]);
        let mut labels: Vec<String> = self.products.iter().map(|p| p.name.clone()).collect();
        if options.none_utility.is_some() {
            labels.push("none".to_string());
        }
        Ok(MarketSimResult { labels, shares })
    }

    fn alternative_utilities(
        &self,
        levels: &DMatrix<f64>,
        respondent: usize,
        none_utility: Option<f64>,
    ) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .products
            .iter()
            .map(|product| {
                product
                    .levels()
                    .iter()
                    .enumerate()
                    .map(|(attribute, &level)| {
                        levels[(respondent, self.schema.level_range(attribute).start + level - 1)]
                    })
                    .sum()
            })
            .collect();
        values.extend(none_utility);
        values
    }
}

fn first_choice(values: &[f64]) -> Vec<f64> {
    let mut row = vec![0.0; values.len()];
    row[argmax(values)] = 1.0;
    row
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn randomized_first_choice(
    values: &[f64],
    draws: usize,
    source: &RandomSource,
    stream: u64,
) -> Result<Vec<f64>> {
    let gumbel = standard_gumbel()?;
    let mut rng = source.stream(stream);
    let mut wins = vec![0usize; values.len()];
    let mut noisy = vec![0.0; values.len()];
    for _ in 0..draws {
        for (slot, value) in noisy.iter_mut().zip(values) {
            *slot = value + gumbel.sample(&mut rng);
        }
        wins[argmax(&noisy)] += 1;
    }
    Ok(wins
        .into_iter()
        .map(|w| w as f64 / draws as f64)
        .collect())
}
