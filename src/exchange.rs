//! Flat-file exchange of designs and collected choices.
//!
//! Files are tab-separated with a hash line on top:
//!
//! ```text
//! # cbc-design sha256=<64 hex digits>
//! respondent	trial	concept	brand	price	choice
//! 1	1	1	2	1	2
//! ```
//!
//! The hash covers the schema, the design size and every concept row, so a
//! choice file can only be scored against the design it was exported from.
//! The `choice` column is present only in choice files and repeats the
//! chosen concept on every row of a trial.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::design::{row_identifiers, Concept, DesignSize, TabDesign};
use crate::error::{ConjointError, Result};
use crate::schema::AttributeSchema;

const HASH_PREFIX: &str = "# cbc-design sha256=";
const IDENTIFIER_COLUMNS: [&str; 3] = ["respondent", "trial", "concept"];
const CHOICE_COLUMN: &str = "choice";

/// SHA-256 content hash of a design, hex encoded.
pub fn design_hash(schema: &AttributeSchema, design: &TabDesign) -> String {
    let mut canonical = String::new();
    for attribute in schema.attributes() {
        canonical.push_str(attribute.name());
        for level in attribute.levels() {
            canonical.push('\t');
            canonical.push_str(level);
        }
        canonical.push('\n');
    }
    let size = design.size();
    let _ = writeln!(
        canonical,
        "size\t{}\t{}\t{}",
        size.respondents, size.trials, size.cards
    );
    for row in design.rows() {
        canonical.push_str(&join(row.levels()));
        canonical.push('\n');
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Renders a design for distribution to the survey front end.
pub fn export_design(schema: &AttributeSchema, design: &TabDesign) -> String {
    render(schema, design, None)
}

/// Renders a design together with one chosen concept per choice set.
pub fn export_choices(
    schema: &AttributeSchema,
    design: &TabDesign,
    choices: &[usize],
) -> Result<String> {
    let size = design.size();
    if choices.len() != size.choice_set_count() {
        return Err(ConjointError::dimension_mismatch(
            "choices",
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
    Ok(render(schema, design, Some(choices)))
}

fn render(schema: &AttributeSchema, design: &TabDesign, choices: Option<&[usize]>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{HASH_PREFIX}{}", design_hash(schema, design));

    let mut header: Vec<&str> = IDENTIFIER_COLUMNS.to_vec();
    header.extend(schema.attributes().iter().map(|a| a.name()));
    if choices.is_some() {
        header.push(CHOICE_COLUMN);
    }
    out.push_str(&header.join("\t"));
    out.push('\n');

    for (index, row) in design.rows().iter().enumerate() {
        let (respondent, trial, concept) = design.row_identifiers(index);
        let _ = write!(out, "{respondent}\t{trial}\t{concept}\t{}", join(row.levels()));
        if let Some(choices) = choices {
            let _ = write!(out, "\t{}", choices[index / design.size().cards]);
        }
        out.push('\n');
    }
    out
}

/// Parses an exported design and verifies its embedded hash.
pub fn import_design(schema: &AttributeSchema, text: &str) -> Result<TabDesign> {
    let parsed = parse(schema, text, false)?;
    let design = TabDesign::new(schema, parsed.size, parsed.rows)?;
    let recomputed = design_hash(schema, &design);
    if recomputed != parsed.claimed_hash {
        return Err(ConjointError::DesignMismatch {
            expected: parsed.claimed_hash,
            found: recomputed,
        });
    }
    Ok(design)
}

/// Parses a choice file collected against `design` and returns one winner per choice set.
///
/// Fails with [`ConjointError::DesignMismatch`] when either the embedded hash
/// or the rows in the file do not describe `design`.
pub fn import_choices(
    schema: &AttributeSchema,
    design: &TabDesign,
    text: &str,
) -> Result<Vec<usize>> {
    let parsed = parse(schema, text, true)?;
    let expected = design_hash(schema, design);
    if parsed.claimed_hash != expected {
        return Err(ConjointError::DesignMismatch {
            expected,
            found: parsed.claimed_hash,
        });
    }
    let imported = TabDesign::new(schema, parsed.size, parsed.rows)?;
    let recomputed = design_hash(schema, &imported);
    if recomputed != expected {
        return Err(ConjointError::DesignMismatch {
            expected,
            found: recomputed,
        });
    }
    Ok(parsed.choices)
}

struct ParsedFile {
    claimed_hash: String,
    size: DesignSize,
    rows: Vec<Concept>,
    choices: Vec<usize>,
}

struct ParsedRow {
    line: usize,
    identifiers: (usize, usize, usize),
    levels: Vec<usize>,
    choice: Option<usize>,
}

fn parse(schema: &AttributeSchema, text: &str, with_choices: bool) -> Result<ParsedFile> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (line, hash_line) = lines
        .next()
        .ok_or_else(|| ConjointError::parse(1, "file is empty"))?;
    let claimed_hash = hash_line
        .strip_prefix(HASH_PREFIX)
        .map(str::trim)
        .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| ConjointError::parse(line, "missing design hash line"))?
        .to_ascii_lowercase();

    let (line, header) = lines
        .next()
        .ok_or_else(|| ConjointError::parse(line + 1, "missing column header"))?;
    let mut expected: Vec<&str> = IDENTIFIER_COLUMNS.to_vec();
    expected.extend(schema.attributes().iter().map(|a| a.name()));
    if with_choices {
        expected.push(CHOICE_COLUMN);
    }
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    if columns != expected {
        return Err(ConjointError::parse(
            line,
            format!("expected columns `{}`", expected.join(", ")),
        ));
    }

    let attributes = schema.attributes();
    let body: Vec<(usize, &str)> = lines.collect();
    let row_limit = body.len();
    let mut rows = Vec::with_capacity(row_limit);
    for (line, content) in body {
        let cells: Vec<&str> = content.split('\t').map(str::trim).collect();
        if cells.len() != expected.len() {
            return Err(ConjointError::parse(
                line,
                format!("expected {} fields, found {}", expected.len(), cells.len()),
            ));
        }
        let numbers = cells
            .iter()
            .zip(&expected)
            .map(|(cell, column)| {
                cell.parse::<usize>().map_err(|_| {
                    ConjointError::parse(line, format!("`{cell}` in column `{column}` is not a positive integer"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (column, &identifier) in IDENTIFIER_COLUMNS.iter().zip(&numbers) {
            if identifier == 0 {
                return Err(ConjointError::parse(
                    line,
                    format!("{column} identifiers must be positive"),
                ));
            }
            if identifier > row_limit {
                return Err(ConjointError::parse(
                    line,
                    format!("{column} {identifier} exceeds the {row_limit} rows in the file"),
                ));
            }
        }

        let levels = numbers[3..3 + attributes.len()].to_vec();
        for (attribute, &level) in attributes.iter().zip(&levels) {
            if level == 0 || level > attribute.level_count() {
                return Err(ConjointError::parse(
                    line,
                    format!(
                        "level {level} is out of range for attribute `{}`",
                        attribute.name()
                    ),
                ));
            }
        }
        rows.push(ParsedRow {
            line,
            identifiers: (numbers[0], numbers[1], numbers[2]),
            levels,
            choice: with_choices.then(|| numbers[numbers.len() - 1]),
        });
    }

    let first_line = line + 1;
    let size = infer_size(&rows, first_line)?;
    if rows.len() != size.row_count() {
        return Err(ConjointError::parse(
            rows.last().map_or(first_line, |r| r.line),
            format!(
                "expected {} rows for {} respondents x {} trials x {} cards, found {}",
                size.row_count(),
                size.respondents,
                size.trials,
                size.cards,
                rows.len()
            ),
        ));
    }

    let mut choices = Vec::with_capacity(if with_choices { size.choice_set_count() } else { 0 });
    for (index, row) in rows.iter().enumerate() {
        if row.identifiers != row_identifiers(size, index) {
            return Err(ConjointError::parse(
                row.line,
                "rows must be ordered by respondent, trial and concept",
            ));
        }
        if let Some(choice) = row.choice {
            if choice == 0 || choice > size.cards {
                return Err(ConjointError::parse(
                    row.line,
                    format!("choice {choice} is outside 1..={}", size.cards),
                ));
            }
            let set = index / size.cards;
            match choices.get(set) {
                None => choices.push(choice),
                Some(&previous) if previous != choice => {
                    return Err(ConjointError::parse(
                        row.line,
                        format!("trial records choice {choice} but an earlier row recorded {previous}"),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(ParsedFile {
        claimed_hash,
        size,
        rows: rows.into_iter().map(|r| Concept::new(r.levels)).collect(),
        choices,
    })
}

/// Study shape implied by the largest identifiers in the file.
fn infer_size(rows: &[ParsedRow], first_line: usize) -> Result<DesignSize> {
    let last = rows
        .last()
        .ok_or_else(|| ConjointError::parse(first_line, "file has no rows"))?;
    let largest = |pick: fn(&ParsedRow) -> usize| rows.iter().map(pick).max().unwrap_or(0);
    DesignSize::new(
        largest(|r| r.identifiers.0),
        largest(|r| r.identifiers.1),
        largest(|r| r.identifiers.2),
    )
    .map_err(|err| ConjointError::parse(last.line, err.to_string()))
}

fn join(levels: &[usize]) -> String {
    levels
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (AttributeSchema, TabDesign) {
        let schema = AttributeSchema::builder()
            .attribute("brand", ["acme", "globex"])
            .attribute("price", ["low", "mid", "high"])
            .build()
            .unwrap();
        let size = DesignSize::new(2, 1, 2).unwrap();
        let rows = vec![
            Concept::new(vec![1, 3]),
            Concept::new(vec![2, 1]),
            Concept::new(vec![2, 2]),
            Concept::new(vec![1, 1]),
        ];
        let design = TabDesign::new(&schema, size, rows).unwrap();
        (schema, design)
    }

    #[test]
    fn export_layout_matches_format() {
        let (schema, design) = fixture();
        let text = export_design(&schema, &design);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("{HASH_PREFIX}{}", design_hash(&schema, &design)));
        assert_eq!(lines[1], "respondent\ttrial\tconcept\tbrand\tprice");
        assert_eq!(lines[4], "2\t1\t1\t2\t2");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn design_round_trips_through_text() {
        let (schema, design) = fixture();
        let imported = import_design(&schema, &export_design(&schema, &design)).unwrap();
        assert_eq!(imported, design);
    }

    #[test]
    fn tampered_design_is_rejected() {
        let (schema, design) = fixture();
        let text = export_design(&schema, &design).replace("2\t1\t1\t2\t2", "2\t1\t1\t2\t3");
        assert!(matches!(
            import_design(&schema, &text),
            Err(ConjointError::DesignMismatch { .. })
        ));
    }

    #[test]
    fn choices_are_collected_per_trial() {
        let (schema, design) = fixture();
        let text = export_choices(&schema, &design, &[2, 1]).unwrap();
        assert_eq!(import_choices(&schema, &design, &text).unwrap(), vec![2, 1]);
    }

    #[test]
    fn choices_for_another_design_are_rejected() {
        let (schema, design) = fixture();
        let other_rows = vec![
            Concept::new(vec![1, 1]),
            Concept::new(vec![2, 1]),
            Concept::new(vec![2, 2]),
            Concept::new(vec![1, 1]),
        ];
        let other = TabDesign::new(&schema, design.size(), other_rows).unwrap();
        let text = export_choices(&schema, &other, &[1, 1]).unwrap();
        let err = import_choices(&schema, &design, &text).unwrap_err();
        assert!(matches!(err, ConjointError::DesignMismatch { .. }));
    }

    #[test]
    fn malformed_files_raise_parse_errors() {
        let (schema, design) = fixture();
        let text = export_choices(&schema, &design, &[2, 1]).unwrap();

        let no_hash = text.lines().skip(1).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            import_choices(&schema, &design, &no_hash),
            Err(ConjointError::Parse { line: 1, .. })
        ));

        let bad_choice = text.replace("1\t1\t2\t2\t1\t2", "1\t1\t2\t2\t1\tx");
        assert!(matches!(
            import_choices(&schema, &design, &bad_choice),
            Err(ConjointError::Parse { line: 4, .. })
        ));

        let inconsistent = text.replace("1\t1\t2\t2\t1\t2", "1\t1\t2\t2\t1\t1");
        assert!(matches!(
            import_choices(&schema, &design, &inconsistent),
            Err(ConjointError::Parse { line: 4, .. })
        ));

        let truncated = text.lines().take(2).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            import_choices(&schema, &design, &truncated),
            Err(ConjointError::Parse { line: 3, .. })
        ));

        let missing_column = export_design(&schema, &design);
        assert!(matches!(
            import_choices(&schema, &design, &missing_column),
            Err(ConjointError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn oversized_identifiers_are_parse_errors() {
        let (schema, design) = fixture();
        let text = export_design(&schema, &design);
        let huge = text.replace(
            "1\t1\t2\t2\t1\n",
            &format!("{}\t1\t2\t2\t1\n", usize::MAX),
        );
        assert!(matches!(
            import_design(&schema, &huge),
            Err(ConjointError::Parse { line: 4, .. })
        ));

        let choices = export_choices(&schema, &design, &[2, 1]).unwrap();
        let huge_trial = choices.replace(
            "2\t1\t2\t1\t1\t1",
            &format!("2\t{}\t2\t1\t1\t1", usize::MAX),
        );
        assert!(matches!(
            import_choices(&schema, &design, &huge_trial),
            Err(ConjointError::Parse { line: 6, .. })
        ));
    }

    #[test]
    fn zero_identifiers_are_reported_on_their_line() {
        let (schema, design) = fixture();
        let text = export_design(&schema, &design).replace("1\t1\t2\t2\t1\n", "0\t1\t2\t2\t1\n");
        match import_design(&schema, &text) {
            Err(ConjointError::Parse { line, reason }) => {
                assert_eq!(line, 4);
                assert!(reason.contains("must be positive"), "{reason}");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
