//! Patient store with a two-phase lifecycle.
//!
//! [`PatientStore`] is open while documents stream in: appends for different patients
//! may run on different threads, and each patient's record has a single writer at a
//! time. [`PatientStore::freeze`] consumes the store and yields a read-only
//! [`FrozenStore`], which is the only thing classification can see.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;

use super::types::PhenotypeError;
use crate::models::{DocumentLayout, Mention};

/// One document's surviving mentions, with the layout needed to build windows.
#[derive(Debug, Clone)]
pub struct BucketDocument {
    pub layout: DocumentLayout,
    pub mentions: Vec<Arc<Mention>>,
}

impl BucketDocument {
    /// Mentions are kept in text order regardless of the order the annotator emitted them.
    pub fn new(layout: DocumentLayout, mut mentions: Vec<Arc<Mention>>) -> Self {
        mentions.sort_by_key(|m| (m.begin_offset, m.end_offset));
        Self { layout, mentions }
    }

    pub fn document_id(&self) -> &str {
        &self.layout.document_id
    }
}

/// All surviving mentions of one patient on one note date, documents ordered by id.
#[derive(Debug, Clone)]
pub struct DateBucket {
    pub date: NaiveDate,
    documents: Vec<BucketDocument>,
}

impl DateBucket {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            documents: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, document: BucketDocument) {
        let pos = self
            .documents
            .partition_point(|d| d.document_id() <= document.document_id());
        self.documents.insert(pos, document);
    }

    pub fn documents(&self) -> &[BucketDocument] {
        &self.documents
    }

    pub fn mentions(&self) -> impl Iterator<Item = &Arc<Mention>> {
        self.documents.iter().flat_map(|d| d.mentions.iter())
    }

    pub fn mention_count(&self) -> usize {
        self.documents.iter().map(|d| d.mentions.len()).sum()
    }
}

#[derive(Debug, Default)]
struct OpenRecord {
    buckets: BTreeMap<NaiveDate, DateBucket>,
    document_ids: HashSet<String>,
}

/// A frozen patient record: date buckets in chronological order.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: String,
    pub buckets: Vec<DateBucket>,
}

impl PatientRecord {
    pub fn new(patient_id: impl Into<String>, mut buckets: Vec<DateBucket>) -> Self {
        buckets.sort_by_key(|b| b.date);
        Self {
            patient_id: patient_id.into(),
            buckets,
        }
    }

    pub fn mention_count(&self) -> usize {
        self.buckets.iter().map(DateBucket::mention_count).sum()
    }
}

/// Open (phase 1) store.
#[derive(Debug, Default)]
pub struct PatientStore {
    patients: RwLock<HashMap<String, Mutex<OpenRecord>>>,
}

impl PatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document to the patient's bucket for `date`.
    /// Returns false when the patient already has a document with the same id.
    pub fn append(
        &self,
        patient_id: &str,
        date: NaiveDate,
        document: BucketDocument,
    ) -> Result<bool, PhenotypeError> {
        self.ensure(patient_id)?;
        let patients = self.patients.read().map_err(|_| PhenotypeError::LockFailed)?;
        let record = patients.get(patient_id).ok_or(PhenotypeError::LockFailed)?;
        let mut record = record.lock().map_err(|_| PhenotypeError::LockFailed)?;

        if !record.document_ids.insert(document.document_id().to_string()) {
            return Ok(false);
        }
        record
            .buckets
            .entry(date)
            .or_insert_with(|| DateBucket::new(date))
            .insert(document);
        Ok(true)
    }

    /// Register a patient without adding documents.
    pub fn ensure(&self, patient_id: &str) -> Result<(), PhenotypeError> {
        {
            let patients = self.patients.read().map_err(|_| PhenotypeError::LockFailed)?;
            if patients.contains_key(patient_id) {
                return Ok(());
            }
        }
        let mut patients = self.patients.write().map_err(|_| PhenotypeError::LockFailed)?;
        patients
            .entry(patient_id.to_string())
            .or_insert_with(|| Mutex::new(OpenRecord::default()));
        Ok(())
    }

    pub fn patient_count(&self) -> Result<usize, PhenotypeError> {
        let patients = self.patients.read().map_err(|_| PhenotypeError::LockFailed)?;
        Ok(patients.len())
    }

    /// Close the collection phase.
    pub fn freeze(self) -> Result<FrozenStore, PhenotypeError> {
        let patients = self
            .patients
            .into_inner()
            .map_err(|_| PhenotypeError::LockFailed)?;

        let mut records = Vec::with_capacity(patients.len());
        for (patient_id, record) in patients {
            let record = record.into_inner().map_err(|_| PhenotypeError::LockFailed)?;
            records.push(PatientRecord {
                patient_id,
                buckets: record.buckets.into_values().collect(),
            });
        }
        records.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(FrozenStore { patients: records })
    }
}

/// Read-only (phase 2) store, patients ordered by id.
#[derive(Debug, Clone, Default)]
pub struct FrozenStore {
    patients: Vec<PatientRecord>,
}

impl FrozenStore {
    pub fn patients(&self) -> &[PatientRecord] {
        &self.patients
    }

    pub fn get(&self, patient_id: &str) -> Option<&PatientRecord> {
        self.patients
            .binary_search_by(|r| r.patient_id.as_str().cmp(patient_id))
            .ok()
            .map(|idx| &self.patients[idx])
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::fixtures::{date, MentionBuilder};

    fn document(id: &str, codes: &[(&str, usize)]) -> BucketDocument {
        let mentions = codes
            .iter()
            .map(|(code, begin)| {
                Arc::new(
                    MentionBuilder::new(*code)
                        .doc(id)
                        .offsets(*begin, *begin + 3)
                        .build(),
                )
            })
            .collect();
        BucketDocument::new(DocumentLayout::new(id), mentions)
    }

    #[test]
    fn buckets_are_date_ordered_and_documents_id_ordered() {
        let store = PatientStore::new();
        let d1 = date(2004, 1, 1);
        let d2 = date(2004, 6, 1);
        store.append("p", d2, document("n3", &[("A", 0)])).unwrap();
        store.append("p", d1, document("n2", &[("B", 0)])).unwrap();
        store.append("p", d1, document("n1", &[("C", 0)])).unwrap();

        let frozen = store.freeze().unwrap();
        let record = frozen.get("p").unwrap();
        assert_eq!(record.buckets.len(), 2);
        assert_eq!(record.buckets[0].date, d1);
        let ids: Vec<_> = record.buckets[0]
            .documents()
            .iter()
            .map(|d| d.document_id().to_string())
            .collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn mentions_sorted_by_offset_within_document() {
        let doc = document("n1", &[("LATE", 50), ("EARLY", 5)]);
        let codes: Vec<_> = doc.mentions.iter().map(|m| m.normalized_code.as_str()).collect();
        assert_eq!(codes, vec!["EARLY", "LATE"]);
    }

    #[test]
    fn duplicate_document_rejected() {
        let store = PatientStore::new();
        let d = date(2004, 1, 1);
        assert!(store.append("p", d, document("n1", &[("A", 0)])).unwrap());
        assert!(!store.append("p", d, document("n1", &[("A", 0)])).unwrap());
        let frozen = store.freeze().unwrap();
        assert_eq!(frozen.get("p").unwrap().mention_count(), 1);
    }

    #[test]
    fn frozen_patients_sorted() {
        let store = PatientStore::new();
        store.ensure("p2").unwrap();
        store.ensure("p1").unwrap();
        store.ensure("p1").unwrap();
        assert_eq!(store.patient_count().unwrap(), 2);
        let frozen = store.freeze().unwrap();
        let ids: Vec<_> = frozen.patients().iter().map(|p| p.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(frozen.get("p3").is_none());
    }

    #[test]
    fn concurrent_appends_for_distinct_patients() {
        let store = PatientStore::new();
        let d = date(2005, 5, 5);
        std::thread::scope(|scope| {
            for p in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..10 {
                        let id = format!("n{n}");
                        store
                            .append(&format!("p{p}"), d, document(&id, &[("X", 0)]))
                            .unwrap();
                    }
                });
            }
        });
        let frozen = store.freeze().unwrap();
        assert_eq!(frozen.len(), 4);
        assert!(frozen.patients().iter().all(|p| p.mention_count() == 10));
    }
}
