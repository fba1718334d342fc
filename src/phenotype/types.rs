use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::ReferenceError;
use crate::models::Mention;
use crate::sink::SinkError;

use super::definition::DefinitionError;
use super::window::WindowError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal run-level errors. Every classification fault names the patient and the
/// rule or criterion that raised it.
#[derive(Error, Debug)]
pub enum PhenotypeError {
    #[error("Phenotype definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Reference dates error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Patient {patient_id} on {date}: rule '{rule}' references undefined criterion '{criterion}'")]
    MissingCriterion {
        patient_id: String,
        date: NaiveDate,
        rule: String,
        criterion: String,
    },

    #[error("Patient {patient_id} on {date}: criterion '{criterion}' has no resolvable window: {source}")]
    UnresolvedWindow {
        patient_id: String,
        date: NaiveDate,
        criterion: String,
        #[source]
        source: WindowError,
    },

    #[error("Patient {0} is missing from the reference date table")]
    MissingReferenceDate(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    #[error("Lock acquisition failed")]
    LockFailed,

    #[error("Finalization worker panicked")]
    WorkerPanicked,
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Position of a tier in its phenotype's priority order; 0 is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TierRank(pub usize);

impl TierRank {
    pub const TOP: TierRank = TierRank(0);

    /// True when `self` outranks `other`.
    pub fn outranks(self, other: TierRank) -> bool {
        self.0 < other.0
    }
}

/// A resolved tier: the priority name used in rules and the label written to output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub rank: TierRank,
    pub name: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// A named criterion and the mentions that satisfy it.
///
/// Evidence is appended earliest-first, so the last element carries the date on which
/// the criterion became satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub name: String,
    pub evidence: Vec<Arc<Mention>>,
}

impl Criterion {
    pub fn new(name: impl Into<String>, evidence: Vec<Arc<Mention>>) -> Self {
        Self {
            name: name.into(),
            evidence,
        }
    }

    pub fn unsatisfied(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn satisfied(&self) -> bool {
        !self.evidence.is_empty()
    }

    /// Date of the last evidence element.
    pub fn qualifying_date(&self) -> Option<NaiveDate> {
        self.evidence.last().map(|m| m.note_date)
    }
}

/// Criteria evaluated for one patient-date, in definition order.
#[derive(Debug, Clone, Default)]
pub struct CriteriaTable {
    entries: Vec<Criterion>,
    index: HashMap<String, usize>,
}

impl CriteriaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name.
    pub fn insert(&mut self, criterion: Criterion) {
        match self.index.get(&criterion.name) {
            Some(&idx) => self.entries[idx] = criterion,
            None => {
                self.index.insert(criterion.name.clone(), self.entries.len());
                self.entries.push(criterion);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn satisfied_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|c| c.satisfied())
            .map(|c| c.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Classification results
// ---------------------------------------------------------------------------

/// Combinator output for one patient-date.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: TierRank,
    pub index_date: Option<NaiveDate>,
    /// Index of the winning rule in the definition's rule list.
    pub rule: Option<usize>,
    /// The winning rule's required criteria, in rule order.
    pub evidence: Vec<Criterion>,
}

impl Classification {
    pub fn bottom(tier: TierRank) -> Self {
        Self {
            tier,
            index_date: None,
            rule: None,
            evidence: Vec::new(),
        }
    }
}

/// The delimited record written per patient (or per patient-date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub patient_id: String,
    pub tier: String,
    pub index_date: Option<NaiveDate>,
    pub evidence_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::fixtures::{date, mention_on};

    #[test]
    fn criterion_satisfied_iff_evidence() {
        let empty = Criterion::unsatisfied("C1");
        assert!(!empty.satisfied());
        assert_eq!(empty.qualifying_date(), None);

        let c = Criterion::new(
            "C1",
            vec![
                Arc::new(mention_on("WHEEZE", date(2004, 1, 1))),
                Arc::new(mention_on("COUGH", date(2004, 3, 1))),
            ],
        );
        assert!(c.satisfied());
        assert_eq!(c.qualifying_date(), Some(date(2004, 3, 1)));
    }

    #[test]
    fn table_insert_replaces_by_name() {
        let mut table = CriteriaTable::new();
        table.insert(Criterion::unsatisfied("PhD"));
        table.insert(Criterion::unsatisfied("C1"));
        table.insert(Criterion::new(
            "PhD",
            vec![Arc::new(mention_on("ASTHMA", date(2004, 1, 1)))],
        ));
        assert_eq!(table.len(), 2);
        assert!(table.get("PhD").unwrap().satisfied());
        assert_eq!(table.satisfied_names(), vec!["PhD"]);
        let names: Vec<_> = table.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["PhD", "C1"]);
    }

    #[test]
    fn lower_rank_outranks() {
        assert!(TierRank::TOP.outranks(TierRank(1)));
        assert!(!TierRank(2).outranks(TierRank(1)));
    }
}
