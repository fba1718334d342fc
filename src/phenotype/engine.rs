use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use super::aggregator::PatientAggregator;
use super::collector::CollectOutcome;
use super::definition::{MissingPatientPolicy, Phenotype};
use super::store::{FrozenStore, PatientStore};
use super::types::{EvidenceRecord, PhenotypeError};
use crate::ingest::{DocumentRecord, IngestError, NoteDocument, ReferenceDates};
use crate::sink::ResultSink;

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// Two-phase classification run: documents are ingested (possibly from several
/// threads), then `finalize` classifies every patient exactly once.
pub trait PhenotypeEngine {
    fn ingest(&self, record: DocumentRecord) -> Result<IngestOutcome, PhenotypeError>;

    fn finalize(self, sink: &mut dyn ResultSink) -> Result<RunSummary, PhenotypeError>
    where
        Self: Sized;
}

/// What happened to one ingested document.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Collected(CollectOutcome),
    /// Dated on or past the patient's reference cutoff.
    CutOff,
    /// Patient absent from the reference table under the `skip` policy.
    PatientSkipped,
    Faulted(IngestError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub documents: usize,
    pub collected: usize,
    pub faulted: usize,
    pub duplicates: usize,
    pub cut_off: usize,
    pub skipped: usize,
    pub mentions_admitted: usize,
    pub mentions_excluded: usize,
    pub mention_faults: usize,
    pub exclusions: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub phenotype: String,
    pub stats: IngestStats,
    pub patients: usize,
    pub records: usize,
    /// Records per output tier label.
    pub tiers: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Default engine
// ---------------------------------------------------------------------------

pub struct DefaultPhenotypeEngine {
    phenotype: Arc<Phenotype>,
    reference: Option<ReferenceDates>,
    store: PatientStore,
    stats: Mutex<IngestStats>,
    warned_missing: Mutex<HashSet<String>>,
    workers: usize,
    run_id: Uuid,
    started: Instant,
}

impl DefaultPhenotypeEngine {
    pub fn new(phenotype: Arc<Phenotype>) -> Self {
        Self {
            phenotype,
            reference: None,
            store: PatientStore::new(),
            stats: Mutex::new(IngestStats::default()),
            warned_missing: Mutex::new(HashSet::new()),
            workers: 1,
            run_id: Uuid::new_v4(),
            started: Instant::now(),
        }
    }

    pub fn with_reference_dates(mut self, reference: ReferenceDates) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stats(&self) -> Result<IngestStats, PhenotypeError> {
        let stats = self.stats.lock().map_err(|_| PhenotypeError::LockFailed)?;
        Ok(stats.clone())
    }

    fn record_stats(&self, update: impl FnOnce(&mut IngestStats)) -> Result<(), PhenotypeError> {
        let mut stats = self.stats.lock().map_err(|_| PhenotypeError::LockFailed)?;
        stats.documents += 1;
        update(&mut stats);
        Ok(())
    }

    /// Apply the reference-date cutoff. `None` lets the document through.
    fn screen(&self, note: &NoteDocument) -> Result<Option<IngestOutcome>, PhenotypeError> {
        let Some(reference) = &self.reference else {
            return Ok(None);
        };
        let policy = self.phenotype.cutoff();

        match reference.get(&note.patient_id) {
            Some(cutoff) => {
                let dropped = if policy.inclusive {
                    note.note_date >= cutoff
                } else {
                    note.note_date > cutoff
                };
                if !dropped {
                    return Ok(None);
                }
                // Still a cohort member even if every note falls past the cutoff.
                self.store.ensure(&note.patient_id)?;
                tracing::debug!(
                    patient_id = %note.patient_id,
                    document_id = %note.document_id,
                    note_date = %note.note_date,
                    cutoff = %cutoff,
                    "Document past reference cutoff"
                );
                Ok(Some(IngestOutcome::CutOff))
            }
            None => match policy.missing_patient {
                MissingPatientPolicy::Keep => Ok(None),
                MissingPatientPolicy::Skip => {
                    let mut warned = self
                        .warned_missing
                        .lock()
                        .map_err(|_| PhenotypeError::LockFailed)?;
                    if warned.insert(note.patient_id.clone()) {
                        tracing::warn!(
                            patient_id = %note.patient_id,
                            "Patient missing from reference table, documents skipped"
                        );
                    }
                    Ok(Some(IngestOutcome::PatientSkipped))
                }
                MissingPatientPolicy::Reject => {
                    Err(PhenotypeError::MissingReferenceDate(note.patient_id.clone()))
                }
            },
        }
    }
}

impl PhenotypeEngine for DefaultPhenotypeEngine {
    fn ingest(&self, record: DocumentRecord) -> Result<IngestOutcome, PhenotypeError> {
        let (note, faults) = match record.into_note() {
            Ok(converted) => converted,
            Err(fault) => {
                tracing::warn!(error = %fault, "Document skipped");
                self.record_stats(|s| s.faulted += 1)?;
                return Ok(IngestOutcome::Faulted(fault));
            }
        };
        for fault in &faults {
            tracing::warn!(
                patient_id = %note.patient_id,
                document_id = %note.document_id,
                error = %fault,
                "Mention skipped"
            );
        }

        if let Some(outcome) = self.screen(&note)? {
            self.record_stats(|s| {
                s.mention_faults += faults.len();
                if matches!(outcome, IngestOutcome::CutOff) {
                    s.cut_off += 1;
                } else {
                    s.skipped += 1;
                }
            })?;
            return Ok(outcome);
        }

        let outcome = self.phenotype.collector.collect(&self.store, note)?;
        self.record_stats(|s| {
            s.mention_faults += faults.len();
            if outcome.duplicate {
                s.duplicates += 1;
                return;
            }
            s.collected += 1;
            s.mentions_admitted += outcome.admitted;
            s.mentions_excluded += outcome.excluded_total();
            for (reason, count) in &outcome.excluded {
                *s.exclusions.entry(reason.as_str().to_string()).or_insert(0) += count;
            }
        })?;
        Ok(IngestOutcome::Collected(outcome))
    }

    fn finalize(self, sink: &mut dyn ResultSink) -> Result<RunSummary, PhenotypeError> {
        let stats = self.stats()?;
        let DefaultPhenotypeEngine {
            phenotype,
            store,
            workers,
            run_id,
            started,
            ..
        } = self;
        let frozen = store.freeze()?;
        let records = finalize_all(&phenotype, workers, &frozen)?;

        let mut tiers: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            sink.emit(record)?;
            *tiers.entry(record.tier.clone()).or_insert(0) += 1;
        }
        sink.flush()?;

        let summary = RunSummary {
            run_id,
            phenotype: phenotype.name().to_string(),
            stats,
            patients: frozen.len(),
            records: records.len(),
            tiers,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        tracing::info!(
            run_id = %summary.run_id,
            phenotype = %summary.phenotype,
            documents = summary.stats.documents,
            admitted = summary.stats.mentions_admitted,
            excluded = summary.stats.mentions_excluded,
            patients = summary.patients,
            records = summary.records,
            elapsed_ms = summary.elapsed_ms,
            "Phenotype run complete"
        );
        Ok(summary)
    }
}

/// Classify every frozen patient, split into contiguous chunks across `workers` threads.
fn finalize_all(
    phenotype: &Phenotype,
    workers: usize,
    frozen: &FrozenStore,
) -> Result<Vec<EvidenceRecord>, PhenotypeError> {
    let patients = frozen.patients();
    if patients.is_empty() {
        return Ok(Vec::new());
    }
    let aggregator = PatientAggregator::new(phenotype);
    let workers = workers.clamp(1, patients.len());
    let chunk_size = patients.len().div_ceil(workers);

    thread::scope(|scope| {
        let handles: Vec<_> = patients
            .chunks(chunk_size)
            .map(|chunk| {
                let aggregator = &aggregator;
                scope.spawn(move || {
                    let mut records = Vec::with_capacity(chunk.len());
                    for patient in chunk {
                        records.extend(aggregator.finalize(patient)?);
                    }
                    Ok::<_, PhenotypeError>(records)
                })
            })
            .collect();

        // Joined in spawn order, so output stays in patient order.
        let mut records = Vec::with_capacity(patients.len());
        for handle in handles {
            let chunk = handle.join().map_err(|_| PhenotypeError::WorkerPanicked)??;
            records.extend(chunk);
        }
        Ok(records)
    })
}

/// Feed every record of `source` through a fresh engine and finalize into `sink`.
///
/// Malformed lines are skipped with a warning; a read failure aborts the run.
pub fn run<I>(
    engine: DefaultPhenotypeEngine,
    source: I,
    sink: &mut dyn ResultSink,
) -> Result<RunSummary, PhenotypeError>
where
    I: IntoIterator<Item = Result<DocumentRecord, IngestError>>,
{
    for item in source {
        match item {
            Ok(record) => {
                engine.ingest(record)?;
            }
            Err(e) if e.is_fatal() => return Err(PhenotypeError::Input(e.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "Input line skipped");
                engine.record_stats(|s| s.faulted += 1)?;
            }
        }
    }
    engine.finalize(sink)
}
