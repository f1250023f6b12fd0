//! Choice-based conjoint (CBC) analysis: balanced designs, multinomial logit
//! estimation and market simulation.
//!
//! The crate covers the numerical core of a CBC study:
//!
//! - describe attributes and levels (`schema` module) and lay concepts out in
//!   choice sets (`design` module),
//! - search for level- and pair-balanced designs (`generation` module),
//! - effects-code designs for estimation and decode them back (`encoding` module),
//! - simulate respondents from known part-worths (`simulation` module),
//! - fit aggregate part-worths by Newton–Raphson maximum likelihood
//!   (`estimation` module), or hand the data to an external hierarchical
//!   Bayes sampler (`hb` module),
//! - predict shares of a product line-up under first-choice, randomized
//!   first-choice and share-of-preference rules (`market` module),
//! - exchange designs and collected choices as hashed tab-separated text
//!   (`exchange` module).
//!
//! Every stochastic step takes an explicit [`RandomSource`], and parallel
//! workers derive their own streams from it, so equal seeds reproduce equal
//! results.
//!
//! # Quick start
//!
//! ```no_run
//! use cbcrs::{
//!     encode, simulate_choices, AttributeSchema, DesignGenerator, DesignSize, EstimationOptions,
//!     GenerationOptions, MnlEstimator, NoiseMode, PartWorths, RandomSource,
//! };
//! use nalgebra::DVector;
//!
//! let schema = AttributeSchema::builder()
//!     .attribute("brand", ["acme", "globex", "initech"])
//!     .attribute("price", ["$10", "$15", "$20"])
//!     .build()
//!     .expect("valid schema");
//! let size = DesignSize::new(200, 8, 3).expect("positive sizes");
//! let source = RandomSource::new(2024);
//!
//! let generated = DesignGenerator::new(&schema, size)
//!     .expect("valid size")
//!     .generate(&GenerationOptions::default(), &source)
//!     .expect("design");
//! let encoded = encode(&schema, &generated.design).expect("encodable design");
//!
//! let truth = PartWorths::new(&schema, DVector::from_vec(vec![0.5, 0.2, 0.8, 0.0]))
//!     .expect("matching width");
//! let choices = simulate_choices(&encoded, &truth, NoiseMode::Gumbel, &mut source.derive(1).rng())
//!     .expect("choices");
//!
//! let fit = MnlEstimator::new(&schema, &encoded, &choices)
//!     .expect("valid choices")
//!     .fit(&EstimationOptions::default())
//!     .expect("fit");
//! println!("part-worths: {:?}", fit.part_worths.expand(&schema));
//! ```

pub mod design;
pub mod draws;
pub mod encoding;
pub mod error;
pub mod estimation;
pub mod exchange;
pub mod generation;
pub mod hb;
pub mod market;
pub mod options;
pub mod schema;
pub mod simulation;
pub mod utilities;

pub use design::{ChoiceSet, Concept, DesignSize, TabDesign};
pub use draws::RandomSource;
pub use encoding::{decode, encode, EncodedDesign};
pub use error::{ConjointError, Result};
pub use estimation::{MnlEstimator, MnlFit};
pub use generation::{balance_score, DesignGenerator, GeneratedDesign, GenerationSummary};
pub use hb::{HbAdapter, HbConfig, HierarchicalSampler};
pub use market::{MarketSimResult, MarketSimulator, Product};
pub use options::{
    BalanceWeights, DecisionRule, EstimationOptions, GenerationOptions, MarketOptions,
    OverlapPolicy,
};
pub use schema::{Attribute, AttributeSchema};
pub use simulation::{simulate_choices, NoiseMode};
pub use utilities::{PartWorths, UtilityLayout, UtilityMatrix};
