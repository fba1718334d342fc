//! Evaluation of a definition's criteria table for one patient.
//!
//! Concept and proximity criteria are evaluated once per date bucket into
//! [`LocalTraces`]. A [`CriteriaTable`] for a given date is then assembled from the
//! traces up to that date: per-date criteria take their first qualifying date, and the
//! composite kinds combine the per-date traces.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;

use super::definition::{CriterionKind, Phenotype, Preference};
use super::episode::{has_recurrence, EpisodeInterval};
use super::proximity::ProximityMatcher;
use super::selector::any_match;
use super::store::DateBucket;
use super::types::{CriteriaTable, Criterion, PhenotypeError};
use crate::models::Mention;

type Dated = (NaiveDate, Vec<Arc<Mention>>);

/// Non-empty per-date evidence of each per-date criterion, chronological.
#[derive(Debug, Clone, Default)]
pub struct LocalTraces {
    traces: HashMap<String, Vec<Dated>>,
}

impl LocalTraces {
    fn push(&mut self, name: &str, date: NaiveDate, evidence: Vec<Arc<Mention>>) {
        if evidence.is_empty() {
            return;
        }
        self.traces
            .entry(name.to_string())
            .or_default()
            .push((date, evidence));
    }

    pub fn dated(&self, name: &str) -> &[Dated] {
        self.traces.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries dated on or before `through`.
    pub fn up_to(&self, name: &str, through: NaiveDate) -> &[Dated] {
        let all = self.dated(name);
        let end = all.partition_point(|(d, _)| *d <= through);
        &all[..end]
    }

    pub fn on(&self, name: &str, date: NaiveDate) -> Option<&[Arc<Mention>]> {
        let all = self.dated(name);
        all.binary_search_by_key(&date, |(d, _)| *d)
            .ok()
            .map(|idx| all[idx].1.as_slice())
    }
}

pub struct CriteriaEvaluator<'a> {
    phenotype: &'a Phenotype,
    proximity: ProximityMatcher<'a>,
}

impl<'a> CriteriaEvaluator<'a> {
    pub fn new(phenotype: &'a Phenotype) -> Self {
        Self {
            phenotype,
            proximity: ProximityMatcher::new(&phenotype.windows),
        }
    }

    /// Evaluate the per-date criteria over each bucket (buckets must be chronological).
    pub fn trace(
        &self,
        patient_id: &str,
        buckets: &[DateBucket],
    ) -> Result<LocalTraces, PhenotypeError> {
        let mut traces = LocalTraces::default();
        for bucket in buckets {
            for spec in self.phenotype.criteria() {
                match &spec.kind {
                    CriterionKind::Concept { matcher } => {
                        let evidence = bucket
                            .mentions()
                            .filter(|m| any_match(matcher, m))
                            .cloned()
                            .collect();
                        traces.push(&spec.name, bucket.date, evidence);
                    }
                    CriterionKind::Proximity(proximity) => {
                        let found = self.proximity.evaluate(bucket, proximity).map_err(
                            |source| PhenotypeError::UnresolvedWindow {
                                patient_id: patient_id.to_string(),
                                date: bucket.date,
                                criterion: spec.name.clone(),
                                source,
                            },
                        )?;
                        traces.push(&spec.name, bucket.date, found.confirmed);
                        if let Some(uncertainty) = &proximity.uncertainty {
                            traces.push(&uncertainty.demoted, bucket.date, found.demoted);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(traces)
    }

    /// Assemble the criteria table as of `through`.
    pub fn evaluate(&self, traces: &LocalTraces, through: NaiveDate) -> CriteriaTable {
        let mut table = CriteriaTable::new();
        for spec in self.phenotype.criteria() {
            match &spec.kind {
                CriterionKind::Concept { .. } | CriterionKind::Proximity(_) => {
                    for output in spec.outputs() {
                        let evidence = traces
                            .up_to(output, through)
                            .first()
                            .map(|(_, ev)| ev.clone())
                            .unwrap_or_default();
                        table.insert(Criterion::new(output, evidence));
                    }
                }
                CriterionKind::Recurrence {
                    of,
                    min_interval_days,
                    max_interval_days,
                } => {
                    let interval = EpisodeInterval::new(*min_interval_days, *max_interval_days);
                    let evidence =
                        has_recurrence(traces.up_to(of, through), interval).unwrap_or_default();
                    table.insert(Criterion::new(&spec.name, evidence));
                }
                CriterionKind::AtLeast { of, min } => {
                    let evidence = at_least(traces, of, *min, through);
                    table.insert(Criterion::new(&spec.name, evidence));
                }
                CriterionKind::AnyOf { of, prefer } => {
                    let evidence = any_of(&table, of, *prefer);
                    table.insert(Criterion::new(&spec.name, evidence));
                }
            }
        }
        table
    }
}

/// Walk dates in order, counting each sub-criterion the first time it holds; satisfied
/// on the date the count reaches `min`, with the evidence gathered so far.
fn at_least(
    traces: &LocalTraces,
    of: &[String],
    min: usize,
    through: NaiveDate,
) -> Vec<Arc<Mention>> {
    let dates: BTreeSet<NaiveDate> = of
        .iter()
        .flat_map(|name| traces.up_to(name, through).iter().map(|(d, _)| *d))
        .collect();

    let mut met: HashSet<&str> = HashSet::new();
    let mut evidence = Vec::new();
    for date in dates {
        for name in of {
            if met.contains(name.as_str()) {
                continue;
            }
            if let Some(found) = traces.on(name, date) {
                met.insert(name.as_str());
                evidence.extend(found.iter().cloned());
            }
        }
        if met.len() >= min {
            return evidence;
        }
    }
    Vec::new()
}

fn any_of(table: &CriteriaTable, of: &[String], prefer: Preference) -> Vec<Arc<Mention>> {
    let mut satisfied = of
        .iter()
        .filter_map(|name| table.get(name))
        .filter(|c| c.satisfied());
    let chosen = match prefer {
        Preference::Listed => satisfied.next(),
        Preference::Earliest => satisfied.min_by_key(|c| c.qualifying_date()),
    };
    chosen.map(|c| c.evidence.clone()).unwrap_or_default()
}
