//! Part-worth containers shared by simulation, estimation and market prediction.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};
use crate::schema::AttributeSchema;

/// Effects-coded part-worth vector: one value per non-reference level.
///
/// The reference level of each attribute is implied as minus the sum of the
/// attribute's other values and is only materialized by [`expand`](Self::expand).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartWorths {
    values: DVector<f64>,
}

impl PartWorths {
    /// Wraps an effects-coded vector after checking it against the schema.
    pub fn new(schema: &AttributeSchema, values: DVector<f64>) -> Result<Self> {
        if values.len() != schema.encoded_width() {
            return Err(ConjointError::dimension_mismatch(
                "part-worth length",
                schema.encoded_width(),
                values.len(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConjointError::NumericalError {
                context: "part-worth values",
            });
        }
        Ok(Self { values })
    }

    /// Builds the effects-coded vector from full per-level values, which must sum
    /// to zero per attribute.
    pub fn from_levels(schema: &AttributeSchema, levels: &[f64]) -> Result<Self> {
        if levels.len() != schema.level_width() {
            return Err(ConjointError::dimension_mismatch(
                "level utilities",
                schema.level_width(),
                levels.len(),
            ));
        }
        let mut values = Vec::with_capacity(schema.encoded_width());
        for index in 0..schema.attribute_count() {
            let block = &levels[schema.level_range(index)];
            let sum: f64 = block.iter().sum();
            if sum.abs() > 1e-9 {
                return Err(ConjointError::configuration(format!(
                    "level utilities of `{}` must sum to zero, found {sum}",
                    schema.attribute(index).name()
                )));
            }
            values.extend_from_slice(&block[..block.len() - 1]);
        }
        Self::new(schema, DVector::from_vec(values))
    }

    pub(crate) fn from_vector_unchecked(values: DVector<f64>) -> Self {
        Self { values }
    }

    /// Accessor for the effects-coded coefficients.
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    /// Number of effects-coded coefficients.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no coefficients.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Full per-level utilities, reference levels included; zero-sum per attribute.
    pub fn expand(&self, schema: &AttributeSchema) -> Result<DVector<f64>> {
        if self.values.len() != schema.encoded_width() {
            return Err(ConjointError::dimension_mismatch(
                "part-worth length",
                schema.encoded_width(),
                self.values.len(),
            ));
        }
        Ok(expand_row(schema, self.values.as_slice()))
    }
}

fn expand_row(schema: &AttributeSchema, encoded: &[f64]) -> DVector<f64> {
    let mut levels = DVector::zeros(schema.level_width());
    for index in 0..schema.attribute_count() {
        let coded = &encoded[schema.encoded_range(index)];
        let start = schema.level_range(index).start;
        for (offset, value) in coded.iter().enumerate() {
            levels[start + offset] = *value;
        }
        levels[start + coded.len()] = -coded.iter().sum::<f64>();
    }
    levels
}

/// Column convention of a [`UtilityMatrix`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtilityLayout {
    /// `sum(L - 1)` effects-coded columns; reference levels are implied.
    EffectsCoded,
    /// `sum(L)` columns, one per level.
    Levels,
}

/// Per-respondent utilities: one row per respondent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UtilityMatrix {
    layout: UtilityLayout,
    values: DMatrix<f64>,
}

impl UtilityMatrix {
    /// Wraps a utility matrix after checking its width against the declared layout.
    pub fn new(schema: &AttributeSchema, layout: UtilityLayout, values: DMatrix<f64>) -> Result<Self> {
        let expected = match layout {
            UtilityLayout::EffectsCoded => schema.encoded_width(),
            UtilityLayout::Levels => schema.level_width(),
        };
        if values.ncols() != expected {
            return Err(ConjointError::dimension_mismatch(
                "utility columns",
                expected,
                values.ncols(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConjointError::NumericalError {
                context: "utility matrix",
            });
        }
        Ok(Self { layout, values })
    }

    /// A single aggregate respondent built from an estimated part-worth vector.
    pub fn from_part_worths(schema: &AttributeSchema, part_worths: &PartWorths) -> Result<Self> {
        let row = part_worths.values().transpose();
        Self::new(schema, UtilityLayout::EffectsCoded, DMatrix::from_rows(&[row]))
    }

    /// Accessor for the column layout.
    pub fn layout(&self) -> UtilityLayout {
        self.layout
    }

    /// Accessor for the utility rows, one per respondent.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Number of respondents.
    pub fn respondent_count(&self) -> usize {
        self.values.nrows()
    }

    /// Converts to the per-level layout used for product utilities.
    pub fn to_levels(&self, schema: &AttributeSchema) -> Result<DMatrix<f64>> {
        match self.layout {
            UtilityLayout::Levels => {
                if self.values.ncols() != schema.level_width() {
                    return Err(ConjointError::dimension_mismatch(
                        "utility columns",
                        schema.level_width(),
                        self.values.ncols(),
                    ));
                }
                Ok(self.values.clone())
            }
            UtilityLayout::EffectsCoded => {
                if self.values.ncols() != schema.encoded_width() {
                    return Err(ConjointError::dimension_mismatch(
                        "utility columns",
                        schema.encoded_width(),
                        self.values.ncols(),
                    ));
                }
                let mut levels = DMatrix::zeros(self.values.nrows(), schema.level_width());
                for (index, row) in self.values.row_iter().enumerate() {
                    let encoded: Vec<f64> = row.iter().copied().collect();
                    levels.set_row(index, &expand_row(schema, &encoded).transpose());
                }
                Ok(levels)
            }
        }
    }
}
