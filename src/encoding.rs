//! Effects coding of tab designs and its inverse.
//!
//! An attribute with `L` levels owns `L - 1` columns. Level `l < L` sets
//! column `l` to 1, and the reference level `L` sets every column of the
//! attribute to -1, so estimated coefficients sum to zero per attribute once
//! the reference part-worth is recovered as minus the sum of the others.

use nalgebra::{DMatrix, DVector, RowDVector};
use serde::{Deserialize, Serialize};

use crate::design::{choice_sets, ChoiceSet, Concept, DesignSize, TabDesign};
use crate::error::{ConjointError, Result};
use crate::schema::AttributeSchema;

/// Numeric design matrix ready for estimation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodedDesign {
    size: DesignSize,
    matrix: DMatrix<f64>,
}

impl EncodedDesign {
    /// Wraps an existing effects-coded matrix after checking its row count.
    pub fn new(size: DesignSize, matrix: DMatrix<f64>) -> Result<Self> {
        size.validate()?;
        if matrix.nrows() != size.row_count() {
            return Err(ConjointError::dimension_mismatch(
                "encoded rows",
                size.row_count(),
                matrix.nrows(),
            ));
        }
        Ok(Self { size, matrix })
    }

    /// Accessor for the study shape.
    pub fn size(&self) -> DesignSize {
        self.size
    }

    /// Accessor for the effects-coded matrix, one row per concept.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Number of effects-coded columns.
    pub fn width(&self) -> usize {
        self.matrix.ncols()
    }

    /// Number of encoded concept rows.
    pub fn row_count(&self) -> usize {
        self.matrix.nrows()
    }

    /// Iterates over choice sets in row order.
    pub fn choice_sets(&self) -> impl Iterator<Item = ChoiceSet> {
        choice_sets(self.size)
    }
}

/// Effects-codes every row of `design`.
pub fn encode(schema: &AttributeSchema, design: &TabDesign) -> Result<EncodedDesign> {
    let mut matrix = DMatrix::zeros(design.row_count(), schema.encoded_width());
    for (row_index, row) in design.rows().iter().enumerate() {
        let encoded = encode_concept(schema, row)?;
        matrix.set_row(row_index, &encoded.transpose());
    }
    EncodedDesign::new(design.size(), matrix)
}

/// Effects-codes a single concept.
pub fn encode_concept(schema: &AttributeSchema, concept: &Concept) -> Result<DVector<f64>> {
    schema.validate_levels(concept.levels())?;
    let mut encoded = DVector::zeros(schema.encoded_width());
    for (attribute, &level) in concept.levels().iter().enumerate() {
        let columns = schema.encoded_range(attribute);
        if level == schema.attribute(attribute).level_count() {
            for column in columns {
                encoded[column] = -1.0;
            }
        } else {
            encoded[columns.start + level - 1] = 1.0;
        }
    }
    Ok(encoded)
}

/// Recovers the tab design from its effects-coded form.
pub fn decode(schema: &AttributeSchema, encoded: &EncodedDesign) -> Result<TabDesign> {
    if encoded.width() != schema.encoded_width() {
        return Err(ConjointError::dimension_mismatch(
            "encoded columns",
            schema.encoded_width(),
            encoded.width(),
        ));
    }
    let rows = encoded
        .matrix()
        .row_iter()
        .enumerate()
        .map(|(index, row)| decode_row(schema, index, &row.into_owned()))
        .collect::<Result<Vec<_>>>()?;
    TabDesign::new(schema, encoded.size(), rows)
}

fn decode_row(schema: &AttributeSchema, index: usize, row: &RowDVector<f64>) -> Result<Concept> {
    let mut levels = Vec::with_capacity(schema.attribute_count());
    for (attribute_index, attribute) in schema.attributes().iter().enumerate() {
        let cells: Vec<f64> = schema
            .encoded_range(attribute_index)
            .map(|column| row[column])
            .collect();
        let invalid = || ConjointError::InvalidEncoding {
            row: index,
            attribute: attribute.name().to_string(),
        };

        if cells.iter().all(|&v| v == -1.0) {
            levels.push(attribute.level_count());
            continue;
        }
        let ones: Vec<usize> = cells
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v == 1.0)
            .map(|(i, _)| i)
            .collect();
        let zeros = cells.iter().filter(|&&v| v == 0.0).count();
        if ones.len() != 1 || zeros != cells.len() - 1 {
            return Err(invalid());
        }
        levels.push(ones[0] + 1);
    }
    Ok(Concept::new(levels))
}
