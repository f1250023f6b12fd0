//! Attribute and level descriptions shared by every stage of a conjoint study.
//!
//! The schema fixes column ordering once: attributes keep their insertion
//! order, levels keep their declared order, and both the effects-coded layout
//! (`L - 1` columns per attribute) and the full level layout (`L` columns per
//! attribute) are derived here rather than at each use site.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ConjointError, Result};

/// A single product attribute with its ordered level labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    levels: Vec<String>,
}

impl Attribute {
    /// Creates an attribute, rejecting fewer than two levels or repeated labels.
    pub fn new<S, L, I>(name: S, levels: I) -> Result<Self>
    where
        S: Into<String>,
        L: Into<String>,
        I: IntoIterator<Item = L>,
    {
        let name = name.into();
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        if levels.len() < 2 {
            return Err(ConjointError::configuration(format!(
                "attribute `{name}` needs at least 2 levels, found {}",
                levels.len()
            )));
        }
        let mut seen = HashSet::new();
        for level in &levels {
            if !seen.insert(level.as_str()) {
                return Err(ConjointError::configuration(format!(
                    "attribute `{name}` repeats level `{level}`"
                )));
            }
        }
        Ok(Self { name, levels })
    }

    /// Accessor for the attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Level labels in declaration order; index `i` is level `i + 1`.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Number of levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns the 1-based index of a level label.
    pub fn level_index(&self, label: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == label).map(|i| i + 1)
    }

    /// Returns the label of a 1-based level index.
    pub fn level_label(&self, level: usize) -> Option<&str> {
        level
            .checked_sub(1)
            .and_then(|i| self.levels.get(i))
            .map(String::as_str)
    }
}

/// Ordered set of attributes describing every concept in a study.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    attributes: Vec<Attribute>,
    encoded_offsets: Vec<usize>,
    level_offsets: Vec<usize>,
    encoded_columns: usize,
    level_columns: usize,
}

impl AttributeSchema {
    /// Starts building a schema.
    pub fn builder() -> AttributeSchemaBuilder {
        AttributeSchemaBuilder::default()
    }

    /// Builds a schema from already-constructed attributes.
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        if attributes.is_empty() {
            return Err(ConjointError::configuration(
                "schema must contain at least one attribute",
            ));
        }
        let mut names = HashSet::new();
        for attribute in &attributes {
            if !names.insert(attribute.name()) {
                return Err(ConjointError::configuration(format!(
                    "attribute `{}` is defined twice",
                    attribute.name()
                )));
            }
        }

        let mut encoded_offsets = Vec::with_capacity(attributes.len());
        let mut level_offsets = Vec::with_capacity(attributes.len());
        let mut encoded_columns = 0usize;
        let mut level_columns = 0usize;
        for attribute in &attributes {
            encoded_offsets.push(encoded_columns);
            level_offsets.push(level_columns);
            encoded_columns += attribute.level_count() - 1;
            level_columns += attribute.level_count();
        }

        Ok(Self {
            attributes,
            encoded_offsets,
            level_offsets,
            encoded_columns,
            level_columns,
        })
    }

    /// Accessor for the attributes in schema order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Number of attributes.
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Attribute at a 0-based position.
    pub fn attribute(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    /// Finds the position of an attribute by name.
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name() == name)
    }

    /// Number of effects-coded columns, `sum(L - 1)`.
    pub fn encoded_width(&self) -> usize {
        self.encoded_columns
    }

    /// Number of full level columns, `sum(L)`.
    pub fn level_width(&self) -> usize {
        self.level_columns
    }

    /// Effects-coded columns owned by attribute `index`.
    pub fn encoded_range(&self, index: usize) -> Range<usize> {
        let start = self.encoded_offsets[index];
        start..start + self.attributes[index].level_count() - 1
    }

    /// Level columns owned by attribute `index`.
    pub fn level_range(&self, index: usize) -> Range<usize> {
        let start = self.level_offsets[index];
        start..start + self.attributes[index].level_count()
    }

    /// Labels of the effects-coded columns, `attribute:level` for every non-reference level.
    pub fn encoded_labels(&self) -> Vec<String> {
        self.attributes
            .iter()
            .flat_map(|a| {
                a.levels()[..a.level_count() - 1]
                    .iter()
                    .map(move |level| format!("{}:{}", a.name(), level))
            })
            .collect()
    }

    /// Labels of every level column.
    pub fn level_labels(&self) -> Vec<String> {
        self.attributes
            .iter()
            .flat_map(|a| {
                a.levels()
                    .iter()
                    .map(move |level| format!("{}:{}", a.name(), level))
            })
            .collect()
    }

    /// Number of distinct concepts, saturating on overflow.
    pub fn profile_count(&self) -> usize {
        self.attributes
            .iter()
            .fold(1usize, |acc, a| acc.saturating_mul(a.level_count()))
    }

    /// Checks that `levels` holds one valid 1-based level per attribute.
    pub fn validate_levels(&self, levels: &[usize]) -> Result<()> {
        if levels.len() != self.attribute_count() {
            return Err(ConjointError::dimension_mismatch(
                "concept attributes",
                self.attribute_count(),
                levels.len(),
            ));
        }
        for (attribute, &level) in self.attributes.iter().zip(levels) {
            if level == 0 || level > attribute.level_count() {
                return Err(ConjointError::configuration(format!(
                    "level {level} is out of range for attribute `{}` with {} levels",
                    attribute.name(),
                    attribute.level_count()
                )));
            }
        }
        Ok(())
    }
}

/// Builder collecting attributes in insertion order.
#[derive(Debug, Default)]
pub struct AttributeSchemaBuilder {
    attributes: Vec<(String, Vec<String>)>,
}

impl AttributeSchemaBuilder {
    /// Appends an attribute; validation happens in [`build`](Self::build).
    pub fn attribute<S, L, I>(mut self, name: S, levels: I) -> Self
    where
        S: Into<String>,
        L: Into<String>,
        I: IntoIterator<Item = L>,
    {
        self.attributes
            .push((name.into(), levels.into_iter().map(Into::into).collect()));
        self
    }

    /// Finalizes construction after validating every attribute.
    pub fn build(self) -> Result<AttributeSchema> {
        let attributes = self
            .attributes
            .into_iter()
            .map(|(name, levels)| Attribute::new(name, levels))
            .collect::<Result<Vec<_>>>()?;
        AttributeSchema::new(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laptop_schema() -> AttributeSchema {
        AttributeSchema::builder()
            .attribute("brand", ["acme", "globex", "initech"])
            .attribute("price", ["low", "high"])
            .attribute("screen", ["13", "14", "15", "16"])
            .build()
            .expect("valid schema")
    }

    #[test]
    fn builder_derives_column_layouts() {
        let schema = laptop_schema();
        assert_eq!(schema.attribute_count(), 3);
        assert_eq!(schema.encoded_width(), 2 + 1 + 3);
        assert_eq!(schema.level_width(), 3 + 2 + 4);
        assert_eq!(schema.encoded_range(1), 2..3);
        assert_eq!(schema.level_range(2), 5..9);
        assert_eq!(schema.encoded_labels()[2], "price:low");
        assert_eq!(schema.level_labels()[4], "price:high");
        assert_eq!(schema.profile_count(), 24);
    }

    #[test]
    fn lookups_are_one_based() {
        let schema = laptop_schema();
        let screen = schema.attribute(schema.attribute_index("screen").unwrap());
        assert_eq!(screen.level_index("15"), Some(3));
        assert_eq!(screen.level_label(1), Some("13"));
        assert_eq!(screen.level_label(0), None);
        assert_eq!(screen.level_label(5), None);
    }

    #[test]
    fn rejects_single_level_attribute() {
        let result = AttributeSchema::builder()
            .attribute("brand", ["acme"])
            .build();
        assert!(matches!(result, Err(ConjointError::Configuration { .. })));
    }

    #[test]
    fn rejects_duplicate_names_and_levels() {
        let duplicate_attribute = AttributeSchema::builder()
            .attribute("a", ["x", "y"])
            .attribute("a", ["x", "y"])
            .build();
        assert!(duplicate_attribute.is_err());

        let duplicate_level = AttributeSchema::builder()
            .attribute("a", ["x", "x"])
            .build();
        assert!(duplicate_level.is_err());
    }

    #[test]
    fn validate_levels_checks_ranges() {
        let schema = laptop_schema();
        assert!(schema.validate_levels(&[1, 2, 4]).is_ok());
        assert!(schema.validate_levels(&[0, 2, 4]).is_err());
        assert!(schema.validate_levels(&[1, 3, 4]).is_err());
        assert!(matches!(
            schema.validate_levels(&[1, 2]),
            Err(ConjointError::DimensionMismatch { .. })
        ));
    }
}
