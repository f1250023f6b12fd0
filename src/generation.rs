//! Random search for level- and pair-balanced choice designs.
//!
//! Candidates are full tab designs drawn at random under an
//! [`OverlapPolicy`]. Each candidate is scored by its [`balance_score`] and
//! kept only when it beats the best design found so far. The iteration budget
//! is split across independent workers, each drawing from its own
//! [`RandomSource::stream`], and the best result is reduced by score with ties
//! going to the lowest worker index.

use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::design::{choice_sets, Concept, DesignSize, TabDesign};
use crate::draws::RandomSource;
use crate::error::{ConjointError, Result};
use crate::options::{BalanceWeights, GenerationOptions, OverlapPolicy};
use crate::schema::AttributeSchema;

/// Diagnostics returned alongside a generated design.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    /// Balance score of the returned design (lower is better, 0 is perfect).
    pub balance_score: f64,
    /// Score of the very first candidate drawn by worker 0.
    pub initial_score: f64,
    /// Candidates drawn across all workers.
    pub iterations: usize,
    /// Whether perfect balance was reached before the budget ran out.
    pub converged: bool,
}

/// A design together with its search diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedDesign {
    pub design: TabDesign,
    pub summary: GenerationSummary,
}

/// Balanced-design search over a fixed schema and study size.
#[derive(Clone, Debug)]
pub struct DesignGenerator<'a> {
    schema: &'a AttributeSchema,
    size: DesignSize,
}

struct WorkerBest {
    score: f64,
    first_score: f64,
    rows: Vec<Concept>,
    iterations: usize,
}

impl<'a> DesignGenerator<'a> {
    /// Binds a schema to a study shape, rejecting invalid sizes.
    pub fn new(schema: &'a AttributeSchema, size: DesignSize) -> Result<Self> {
        size.validate()?;
        Ok(Self { schema, size })
    }

    /// Runs the search and returns the best design found.
    ///
    /// The same schema, size, options and random source always reproduce the
    /// same design. When perfect balance is unreachable the search still
    /// returns its best candidate with `converged == false`.
    pub fn generate(
        &self,
        options: &GenerationOptions,
        source: &RandomSource,
    ) -> Result<GeneratedDesign> {
        options.validate()?;
        if options.overlap == OverlapPolicy::NoDuplicateConcepts
            && self.schema.profile_count() < self.size.cards
        {
            return Err(ConjointError::configuration(format!(
                "only {} distinct concepts exist but each choice set needs {} unique cards",
                self.schema.profile_count(),
                self.size.cards
            )));
        }

        let workers = options.workers.min(options.iterations);
        let base = options.iterations / workers;
        let remainder = options.iterations % workers;

        let results = (0..workers)
            .into_par_iter()
            .map(|worker| {
                let budget = base + usize::from(worker < remainder);
                let mut rng = source.stream(worker as u64);
                self.search(options, budget, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        let initial_score = results[0].first_score;
        let iterations = results.iter().map(|r| r.iterations).sum();
        let mut best_index = 0usize;
        for (index, result) in results.iter().enumerate().skip(1) {
            if result.score < results[best_index].score {
                best_index = index;
            }
        }
        let best = results.into_iter().nth(best_index).ok_or_else(|| {
            ConjointError::configuration("design search produced no candidates")
        })?;

        let converged = best.score <= 0.0;
        if converged {
            info!(
                "perfectly balanced design found by worker {best_index} after {iterations} candidates"
            );
        } else {
            warn!(
                "design search exhausted {iterations} candidates without perfect balance; best score {:.4} (initial {:.4})",
                best.score, initial_score
            );
        }

        let design = TabDesign::new(self.schema, self.size, best.rows)?;
        Ok(GeneratedDesign {
            design,
            summary: GenerationSummary {
                balance_score: best.score,
                initial_score,
                iterations,
                converged,
            },
        })
    }

    fn search(
        &self,
        options: &GenerationOptions,
        budget: usize,
        rng: &mut SmallRng,
    ) -> Result<WorkerBest> {
        let scorer = BalanceScorer::new(self.schema, self.size.row_count(), options.weights);
        let mut best: Option<WorkerBest> = None;

        for iteration in 0..budget {
            let rows = self.draw_candidate(options.overlap, rng);
            let score = scorer.score(&rows);
            match best.as_mut() {
                None => {
                    best = Some(WorkerBest {
                        score,
                        first_score: score,
                        rows,
                        iterations: 1,
                    });
                }
                Some(current) => {
                    current.iterations = iteration + 1;
                    if score < current.score {
                        debug!("iteration {iteration}: balance score improved to {score:.4}");
                        current.score = score;
                        current.rows = rows;
                    }
                }
            }
            if best.as_ref().is_some_and(|b| b.score <= 0.0) {
                break;
            }
        }

        best.ok_or_else(|| ConjointError::configuration("worker received an empty budget"))
    }

    fn draw_candidate(&self, overlap: OverlapPolicy, rng: &mut SmallRng) -> Vec<Concept> {
        let mut rows = Vec::with_capacity(self.size.row_count());
        for _ in choice_sets(self.size) {
            match overlap {
                OverlapPolicy::Allowed => {
                    for _ in 0..self.size.cards {
                        rows.push(self.draw_concept(rng));
                    }
                }
                OverlapPolicy::NoDuplicateConcepts => {
                    let start = rows.len();
                    while rows.len() - start < self.size.cards {
                        let concept = self.draw_concept(rng);
                        if !rows[start..].contains(&concept) {
                            rows.push(concept);
                        }
                    }
                }
                OverlapPolicy::MinimalOverlap => {
                    let columns: Vec<Vec<usize>> = self
                        .schema
                        .attributes()
                        .iter()
                        .map(|a| spread_levels(a.level_count(), self.size.cards, rng))
                        .collect();
                    for card in 0..self.size.cards {
                        rows.push(Concept::new(columns.iter().map(|c| c[card]).collect()));
                    }
                }
            }
        }
        rows
    }

    fn draw_concept(&self, rng: &mut SmallRng) -> Concept {
        Concept::new(
            self.schema
                .attributes()
                .iter()
                .map(|a| rng.gen_range(1..=a.level_count()))
                .collect(),
        )
    }
}

/// Concatenates independent shuffles of `1..=levels` until `cards` entries exist.
fn spread_levels(levels: usize, cards: usize, rng: &mut SmallRng) -> Vec<usize> {
    let mut out = Vec::with_capacity(cards + levels);
    while out.len() < cards {
        let mut block: Vec<usize> = (1..=levels).collect();
        block.shuffle(rng);
        out.extend(block);
    }
    out.truncate(cards);
    out
}

/// Scores how evenly levels and level pairs are spread across a design.
///
/// Each count is compared against the integer interval around its uniform
/// ideal, so a score of zero means the design is as balanced as whole rows
/// allow.
pub fn balance_score(schema: &AttributeSchema, design: &TabDesign, weights: BalanceWeights) -> f64 {
    BalanceScorer::new(schema, design.row_count(), weights).score(design.rows())
}

struct BalanceScorer {
    levels: Vec<usize>,
    level_ideals: Vec<f64>,
    pairs: Vec<(usize, usize, f64)>,
    weights: BalanceWeights,
}

impl BalanceScorer {
    fn new(schema: &AttributeSchema, rows: usize, weights: BalanceWeights) -> Self {
        let levels: Vec<usize> = schema.attributes().iter().map(|a| a.level_count()).collect();
        let n = rows as f64;
        let level_ideals = levels.iter().map(|&l| n / l as f64).collect();
        let mut pairs = Vec::new();
        for a in 0..levels.len() {
            for b in (a + 1)..levels.len() {
                pairs.push((a, b, n / (levels[a] * levels[b]) as f64));
            }
        }
        Self {
            levels,
            level_ideals,
            pairs,
            weights,
        }
    }

    fn score(&self, rows: &[Concept]) -> f64 {
        let mut level_counts: Vec<Vec<usize>> = self.levels.iter().map(|&l| vec![0; l]).collect();
        let mut pair_counts: Vec<Vec<usize>> = self
            .pairs
            .iter()
            .map(|&(a, b, _)| vec![0; self.levels[a] * self.levels[b]])
            .collect();

        for row in rows {
            for (attribute, counts) in level_counts.iter_mut().enumerate() {
                counts[row.level(attribute) - 1] += 1;
            }
            for (slot, &(a, b, _)) in self.pairs.iter().enumerate() {
                let cell = (row.level(a) - 1) * self.levels[b] + (row.level(b) - 1);
                pair_counts[slot][cell] += 1;
            }
        }

        let level_term: f64 = level_counts
            .iter()
            .zip(&self.level_ideals)
            .flat_map(|(counts, &ideal)| counts.iter().map(move |&c| interval_deviation(c, ideal)))
            .sum();
        let pair_term: f64 = pair_counts
            .iter()
            .zip(&self.pairs)
            .flat_map(|(counts, &(_, _, ideal))| {
                counts.iter().map(move |&c| interval_deviation(c, ideal))
            })
            .sum();

        self.weights.level * level_term + self.weights.pair * pair_term
    }
}

fn interval_deviation(count: usize, ideal: f64) -> f64 {
    let count = count as f64;
    let (low, high) = (ideal.floor(), ideal.ceil());
    if count < low {
        (low - count).powi(2)
    } else if count > high {
        (count - high).powi(2)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> AttributeSchema {
        AttributeSchema::builder()
            .attribute("brand", ["a", "b", "c"])
            .attribute("price", ["low", "mid", "high"])
            .attribute("color", ["red", "blue"])
            .build()
            .unwrap()
    }

    #[test]
    fn generated_design_satisfies_row_count() {
        let schema = schema();
        let size = DesignSize::new(4, 6, 3).unwrap();
        let generated = DesignGenerator::new(&schema, size)
            .unwrap()
            .generate(&GenerationOptions::default().with_iterations(50), &RandomSource::new(1))
            .unwrap();
        assert_eq!(generated.design.row_count(), 72);
        assert_eq!(generated.design.size(), size);
        assert!(generated.summary.iterations <= 50);
    }

    #[test]
    fn search_never_returns_worse_than_first_candidate() {
        let schema = schema();
        let size = DesignSize::new(2, 5, 3).unwrap();
        let generator = DesignGenerator::new(&schema, size).unwrap();
        for seed in 0..20 {
            let generated = generator
                .generate(&GenerationOptions::default().with_iterations(40), &RandomSource::new(seed))
                .unwrap();
            let summary = &generated.summary;
            assert!(summary.balance_score <= summary.initial_score);
            let rescored = balance_score(&schema, &generated.design, BalanceWeights::default());
            assert_eq!(rescored, summary.balance_score);
        }
    }

    #[test]
    fn search_is_deterministic_for_equal_seeds() {
        let schema = schema();
        let size = DesignSize::new(3, 4, 2).unwrap();
        let generator = DesignGenerator::new(&schema, size).unwrap();
        let options = GenerationOptions::default().with_iterations(64).with_workers(3);
        let first = generator.generate(&options, &RandomSource::new(99)).unwrap();
        let second = generator.generate(&options, &RandomSource::new(99)).unwrap();
        assert_eq!(first.design, second.design);
        assert_eq!(first.summary, second.summary);
    }

    #[test]
    fn tiny_study_terminates_with_best_effort() {
        let schema = schema();
        let size = DesignSize::new(1, 1, 2).unwrap();
        let generated = DesignGenerator::new(&schema, size)
            .unwrap()
            .generate(&GenerationOptions::default().with_iterations(10), &RandomSource::new(5))
            .unwrap();
        assert_eq!(generated.design.row_count(), 2);
        assert!(generated.summary.balance_score >= 0.0);
    }

    #[test]
    fn perfect_balance_stops_early() {
        let schema = AttributeSchema::builder()
            .attribute("a", ["a1", "a2"])
            .build()
            .unwrap();
        let size = DesignSize::new(1, 1, 2).unwrap();
        let options = GenerationOptions::default()
            .with_iterations(1_000)
            .with_workers(1)
            .with_overlap(OverlapPolicy::MinimalOverlap);
        let generated = DesignGenerator::new(&schema, size)
            .unwrap()
            .generate(&options, &RandomSource::new(3))
            .unwrap();
        assert!(generated.summary.converged);
        assert_eq!(generated.summary.iterations, 1);
    }

    #[test]
    fn overlap_policies_are_respected() {
        let schema = schema();
        let size = DesignSize::new(2, 4, 3).unwrap();
        let generator = DesignGenerator::new(&schema, size).unwrap();

        let minimal = generator
            .generate(
                &GenerationOptions::default()
                    .with_iterations(20)
                    .with_overlap(OverlapPolicy::MinimalOverlap),
                &RandomSource::new(8),
            )
            .unwrap();
        for set in minimal.design.choice_sets() {
            let rows = &minimal.design.rows()[set.range()];
            let mut brands: Vec<usize> = rows.iter().map(|r| r.level(0)).collect();
            brands.sort_unstable();
            assert_eq!(brands, vec![1, 2, 3]);
        }

        let unique = generator
            .generate(
                &GenerationOptions::default()
                    .with_iterations(20)
                    .with_overlap(OverlapPolicy::NoDuplicateConcepts),
                &RandomSource::new(8),
            )
            .unwrap();
        for set in unique.design.choice_sets() {
            let rows = &unique.design.rows()[set.range()];
            for i in 0..rows.len() {
                for j in (i + 1)..rows.len() {
                    assert_ne!(rows[i], rows[j]);
                }
            }
        }
    }

    #[test]
    fn unique_concepts_need_enough_profiles() {
        let schema = AttributeSchema::builder()
            .attribute("a", ["a1", "a2"])
            .build()
            .unwrap();
        let size = DesignSize::new(1, 1, 3).unwrap();
        let result = DesignGenerator::new(&schema, size).unwrap().generate(
            &GenerationOptions::default().with_overlap(OverlapPolicy::NoDuplicateConcepts),
            &RandomSource::new(0),
        );
        assert!(matches!(result, Err(ConjointError::Configuration { .. })));
    }

    #[test]
    fn interval_deviation_tolerates_fractional_ideals() {
        assert_eq!(interval_deviation(3, 3.5), 0.0);
        assert_eq!(interval_deviation(4, 3.5), 0.0);
        assert_eq!(interval_deviation(6, 3.5), 4.0);
        assert_eq!(interval_deviation(1, 3.0), 4.0);
    }
}
