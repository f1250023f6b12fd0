//! Tab designs: concept rows grouped into choice sets and respondent blocks.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};
use crate::schema::AttributeSchema;

/// Shape of a study: respondents see `trials` choice sets of `cards` concepts each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DesignSize {
    pub respondents: usize,
    pub trials: usize,
    pub cards: usize,
}

impl DesignSize {
    /// Creates a size, rejecting zero counts and row counts that overflow `usize`.
    pub fn new(respondents: usize, trials: usize, cards: usize) -> Result<Self> {
        let size = Self {
            respondents,
            trials,
            cards,
        };
        size.validate()?;
        Ok(size)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("respondents", self.respondents),
            ("trials", self.trials),
            ("cards", self.cards),
        ] {
            if value == 0 {
                return Err(ConjointError::configuration(format!(
                    "{name} must be positive"
                )));
            }
        }
        self.respondents
            .checked_mul(self.trials)
            .and_then(|sets| sets.checked_mul(self.cards))
            .ok_or_else(|| {
                ConjointError::configuration(format!(
                    "{} respondents x {} trials x {} cards overflows the row count",
                    self.respondents, self.trials, self.cards
                ))
            })?;
        Ok(())
    }

    /// Total number of choice sets, `respondents * trials`.
    pub fn choice_set_count(&self) -> usize {
        self.respondents * self.trials
    }

    /// Total number of concept rows, `respondents * trials * cards`.
    pub fn row_count(&self) -> usize {
        self.choice_set_count() * self.cards
    }
}

/// One fully specified concept: a 1-based level index per attribute, in schema order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Concept {
    levels: Vec<usize>,
}

impl Concept {
    /// Wraps 1-based level indices; validation happens against a schema.
    pub fn new(levels: Vec<usize>) -> Self {
        Self { levels }
    }

    /// Accessor for the level indices.
    pub fn levels(&self) -> &[usize] {
        &self.levels
    }

    /// Level of attribute `attribute` (0-based attribute position).
    pub fn level(&self, attribute: usize) -> usize {
        self.levels[attribute]
    }
}

/// Compact design matrix: one concept row per card, validated against a schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabDesign {
    size: DesignSize,
    rows: Vec<Concept>,
}

impl TabDesign {
    /// Creates a design after checking the row-count invariant and level ranges.
    pub fn new(schema: &AttributeSchema, size: DesignSize, rows: Vec<Concept>) -> Result<Self> {
        size.validate()?;
        if rows.len() != size.row_count() {
            return Err(ConjointError::dimension_mismatch(
                "design rows",
                size.row_count(),
                rows.len(),
            ));
        }
        for row in &rows {
            schema.validate_levels(row.levels())?;
        }
        Ok(Self { size, rows })
    }

    /// Accessor for the study shape.
    pub fn size(&self) -> DesignSize {
        self.size
    }

    /// Accessor for the concept rows in respondent, trial, concept order.
    pub fn rows(&self) -> &[Concept] {
        &self.rows
    }

    /// Number of concept rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterates over choice sets in row order.
    pub fn choice_sets(&self) -> impl Iterator<Item = ChoiceSet> {
        choice_sets(self.size)
    }

    /// Returns the `(respondent, trial, concept)` identifiers of a row, all 1-based.
    pub fn row_identifiers(&self, row: usize) -> (usize, usize, usize) {
        row_identifiers(self.size, row)
    }
}

/// Contiguous block of `cards` rows shown together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceSet {
    /// 0-based position among all choice sets.
    pub index: usize,
    /// 1-based respondent the set belongs to.
    pub respondent: usize,
    /// 1-based trial within the respondent block.
    pub trial: usize,
    start: usize,
    end: usize,
}

impl ChoiceSet {
    /// Returns the range of row indices that belong to this choice set.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Number of concepts in the set.
    pub fn card_count(&self) -> usize {
        self.end - self.start
    }
}

/// Enumerates the choice sets implied by a design size.
pub(crate) fn choice_sets(size: DesignSize) -> impl Iterator<Item = ChoiceSet> {
    (0..size.choice_set_count()).map(move |index| ChoiceSet {
        index,
        respondent: index / size.trials + 1,
        trial: index % size.trials + 1,
        start: index * size.cards,
        end: (index + 1) * size.cards,
    })
}

pub(crate) fn row_identifiers(size: DesignSize, row: usize) -> (usize, usize, usize) {
    let set = row / size.cards;
    (set / size.trials + 1, set % size.trials + 1, row % size.cards + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> AttributeSchema {
        AttributeSchema::builder()
            .attribute("a", ["a1", "a2"])
            .attribute("b", ["b1", "b2", "b3"])
            .build()
            .unwrap()
    }

    #[test]
    fn size_rejects_zero_counts() {
        assert!(DesignSize::new(0, 1, 2).is_err());
        assert!(DesignSize::new(1, 0, 2).is_err());
        assert!(DesignSize::new(1, 1, 0).is_err());
        let size = DesignSize::new(3, 4, 2).unwrap();
        assert_eq!(size.choice_set_count(), 12);
        assert_eq!(size.row_count(), 24);
    }

    #[test]
    fn size_rejects_overflowing_row_count() {
        assert!(matches!(
            DesignSize::new(usize::MAX, 1, 2),
            Err(ConjointError::Configuration { .. })
        ));
        assert!(DesignSize::new(usize::MAX, 1, 1).is_ok());
    }

    #[test]
    fn design_enforces_row_count_and_levels() {
        let schema = schema();
        let size = DesignSize::new(1, 1, 2).unwrap();
        let rows = vec![Concept::new(vec![1, 3]), Concept::new(vec![2, 1])];
        assert!(TabDesign::new(&schema, size, rows.clone()).is_ok());

        let short = TabDesign::new(&schema, size, rows[..1].to_vec());
        assert!(matches!(short, Err(ConjointError::DimensionMismatch { .. })));

        let bad_level = vec![Concept::new(vec![1, 4]), Concept::new(vec![2, 1])];
        assert!(TabDesign::new(&schema, size, bad_level).is_err());
    }

    #[test]
    fn choice_sets_partition_rows() {
        let size = DesignSize::new(2, 3, 4).unwrap();
        let sets: Vec<_> = choice_sets(size).collect();
        assert_eq!(sets.len(), 6);
        assert_eq!(sets[4].respondent, 2);
        assert_eq!(sets[4].trial, 2);
        assert_eq!(sets[4].range(), 16..20);
        assert_eq!(sets[4].card_count(), 4);
        assert_eq!(row_identifiers(size, 17), (2, 2, 2));
        assert_eq!(row_identifiers(size, 0), (1, 1, 1));
    }
}
