//! Phenotype classification: per-document collection into a patient store, then a
//! single finalize pass that evaluates criteria per date, combines them into tiers
//! and folds each patient's dates into output records.

pub mod aggregator;
pub mod collector;
pub mod combinator;
pub mod criteria;
pub mod definition;
pub mod engine;
pub mod episode;
pub mod evidence;
pub mod proximity;
pub mod selector;
pub mod store;
pub mod types;
pub mod window;

#[cfg(test)]
pub(crate) mod fixtures;

pub use definition::{DefinitionError, Phenotype, PhenotypeDefinition};
pub use engine::{run, DefaultPhenotypeEngine, IngestOutcome, IngestStats, PhenotypeEngine, RunSummary};
pub use evidence::{format_evidence, parse_evidence, EvidenceTuple};
pub use types::*;
