//! Folds a patient's per-date classifications into output records.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::combinator::Combinator;
use super::criteria::CriteriaEvaluator;
use super::definition::{EvaluationScope, Phenotype, ReportGranularity};
use super::evidence::format_evidence;
use super::store::PatientRecord;
use super::types::{Classification, EvidenceRecord, PhenotypeError, TierRank};

/// Classification of one note date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedClassification {
    pub date: NaiveDate,
    pub classification: Classification,
}

pub struct PatientAggregator<'a> {
    phenotype: &'a Phenotype,
    evaluator: CriteriaEvaluator<'a>,
    combinator: Combinator<'a>,
}

impl<'a> PatientAggregator<'a> {
    pub fn new(phenotype: &'a Phenotype) -> Self {
        Self {
            phenotype,
            evaluator: CriteriaEvaluator::new(phenotype),
            combinator: Combinator::new(phenotype),
        }
    }

    /// Classify every date bucket of a frozen record, in date order.
    pub fn classify_dates(
        &self,
        record: &PatientRecord,
    ) -> Result<Vec<DatedClassification>, PhenotypeError> {
        let patient_id = record.patient_id.as_str();
        let mut dated = Vec::with_capacity(record.buckets.len());
        match self.phenotype.scope() {
            EvaluationScope::Date => {
                for bucket in &record.buckets {
                    let traces = self
                        .evaluator
                        .trace(patient_id, std::slice::from_ref(bucket))?;
                    let table = self.evaluator.evaluate(&traces, bucket.date);
                    dated.push(DatedClassification {
                        date: bucket.date,
                        classification: self.combinator.classify(&table, patient_id, bucket.date)?,
                    });
                }
            }
            EvaluationScope::History => {
                let traces = self.evaluator.trace(patient_id, &record.buckets)?;
                for bucket in &record.buckets {
                    let table = self.evaluator.evaluate(&traces, bucket.date);
                    dated.push(DatedClassification {
                        date: bucket.date,
                        classification: self.combinator.classify(&table, patient_id, bucket.date)?,
                    });
                }
            }
        }
        Ok(dated)
    }

    /// Final output records for a patient: one record, or one per date when the
    /// definition reports per date.
    pub fn finalize(&self, record: &PatientRecord) -> Result<Vec<EvidenceRecord>, PhenotypeError> {
        let dated = self.classify_dates(record)?;
        let records = match self.phenotype.report() {
            ReportGranularity::Patient => vec![self.fold(&record.patient_id, &dated)],
            ReportGranularity::Date if dated.is_empty() => vec![self.bottom_record(&record.patient_id)],
            ReportGranularity::Date => dated
                .iter()
                .map(|d| {
                    let mut out = self.record(&record.patient_id, &d.classification);
                    out.index_date = out.index_date.or(Some(d.date));
                    out
                })
                .collect(),
        };

        if let Some(first) = records.first() {
            tracing::debug!(
                patient_id = %record.patient_id,
                dates = dated.len(),
                tier = %first.tier,
                "Patient classified"
            );
        }
        Ok(records)
    }

    /// Keep the earliest index date per tier, then the highest tier present.
    fn fold(&self, patient_id: &str, dated: &[DatedClassification]) -> EvidenceRecord {
        let mut per_tier: BTreeMap<TierRank, &Classification> = BTreeMap::new();
        for entry in dated {
            let classification = &entry.classification;
            let Some(index_date) = classification.index_date else {
                continue;
            };
            per_tier
                .entry(classification.tier)
                .and_modify(|kept| {
                    if kept.index_date.map_or(true, |d| index_date < d) {
                        *kept = classification;
                    }
                })
                .or_insert(classification);
        }

        match per_tier.values().next() {
            Some(best) => self.record(patient_id, best),
            None => self.bottom_record(patient_id),
        }
    }

    fn record(&self, patient_id: &str, classification: &Classification) -> EvidenceRecord {
        EvidenceRecord {
            patient_id: patient_id.to_string(),
            tier: self.phenotype.tier(classification.tier).label.clone(),
            index_date: classification.index_date,
            evidence_text: format_evidence(&classification.evidence),
        }
    }

    fn bottom_record(&self, patient_id: &str) -> EvidenceRecord {
        EvidenceRecord {
            patient_id: patient_id.to_string(),
            tier: self.phenotype.bottom().label.clone(),
            index_date: None,
            evidence_text: String::new(),
        }
    }
}
