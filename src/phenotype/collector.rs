//! Per-document collector: filters a document's mentions and files the survivors under
//! the patient's note date.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use super::definition::{CertaintyPolicy, CollectorConfig, DefinitionError, HistoryPolicy};
use super::store::{BucketDocument, PatientStore};
use super::types::PhenotypeError;
use crate::ingest::NoteDocument;
use crate::models::{AssertionStatus, Certainty, Experiencer, Mention};

/// Why a mention was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Exclusion {
    Section,
    SentencePattern,
    Certainty,
    FamilyHistory,
    History,
    Experiencer,
}

impl Exclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::SentencePattern => "sentence_pattern",
            Self::Certainty => "certainty",
            Self::FamilyHistory => "family_history",
            Self::History => "history",
            Self::Experiencer => "experiencer",
        }
    }
}

#[derive(Debug)]
enum HistoryFilter {
    Exclude,
    AllowCodes(HashSet<String>),
    AllowAll,
}

/// Compiled collector settings.
#[derive(Debug)]
pub struct Collector {
    excluded_sections: HashSet<String>,
    exempt_codes: HashSet<String>,
    certainty: CertaintyPolicy,
    negation_override: Option<Regex>,
    history: HistoryFilter,
    sentence_exclusions: Vec<Regex>,
}

/// Per-document admission counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    pub admitted: usize,
    pub excluded: BTreeMap<Exclusion, usize>,
    /// The patient already had a document with this id; nothing was appended.
    pub duplicate: bool,
}

impl CollectOutcome {
    pub fn excluded_total(&self) -> usize {
        self.excluded.values().sum()
    }
}

impl Collector {
    pub fn from_config(config: &CollectorConfig) -> Result<Self, DefinitionError> {
        let negation_override = config
            .negation_override
            .as_deref()
            .map(compile)
            .transpose()?;
        let sentence_exclusions = config
            .sentence_exclusions
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let history = match &config.history {
            HistoryPolicy::Exclude => HistoryFilter::Exclude,
            HistoryPolicy::AllowCodes { codes } => {
                HistoryFilter::AllowCodes(codes.iter().cloned().collect())
            }
            HistoryPolicy::AllowAll => HistoryFilter::AllowAll,
        };

        Ok(Self {
            excluded_sections: config.excluded_sections.iter().cloned().collect(),
            exempt_codes: config.exempt_codes.iter().cloned().collect(),
            certainty: config.certainty.clone(),
            negation_override,
            history,
            sentence_exclusions,
        })
    }

    /// Decide whether a single mention survives filtering.
    pub fn admit(&self, mention: &Mention) -> Result<(), Exclusion> {
        if self.excluded_sections.contains(&mention.section_id)
            && !self.exempt_codes.contains(&mention.normalized_code)
        {
            return Err(Exclusion::Section);
        }

        if self
            .sentence_exclusions
            .iter()
            .any(|re| re.is_match(&mention.sentence_text))
        {
            return Err(Exclusion::SentencePattern);
        }

        if matches!(self.certainty, CertaintyPolicy::RequirePositive)
            && mention.certainty != Certainty::Positive
        {
            let overridden = self
                .negation_override
                .as_ref()
                .is_some_and(|re| re.is_match(&mention.sentence_text));
            if !overridden {
                return Err(Exclusion::Certainty);
            }
        }

        match mention.status {
            AssertionStatus::FamilyHistoryOf => return Err(Exclusion::FamilyHistory),
            AssertionStatus::HistoryOf => {
                let allowed = match &self.history {
                    HistoryFilter::Exclude => false,
                    HistoryFilter::AllowCodes(codes) => codes.contains(&mention.normalized_code),
                    HistoryFilter::AllowAll => true,
                };
                if !allowed {
                    return Err(Exclusion::History);
                }
            }
            _ => {}
        }

        if mention.experiencer != Experiencer::Patient {
            return Err(Exclusion::Experiencer);
        }

        Ok(())
    }

    /// Filter one whole document and append its survivors to the patient's date bucket.
    ///
    /// The patient is registered even when nothing survives, so they still receive a
    /// bottom-tier record at finalize.
    pub fn collect(
        &self,
        store: &PatientStore,
        document: NoteDocument,
    ) -> Result<CollectOutcome, PhenotypeError> {
        let NoteDocument {
            patient_id,
            document_id,
            note_date,
            layout,
            mentions,
        } = document;

        let mut outcome = CollectOutcome::default();
        let mut survivors = Vec::with_capacity(mentions.len());
        for mention in mentions {
            match self.admit(&mention) {
                Ok(()) => survivors.push(Arc::new(mention)),
                Err(reason) => *outcome.excluded.entry(reason).or_insert(0) += 1,
            }
        }
        outcome.admitted = survivors.len();

        tracing::debug!(
            patient_id = %patient_id,
            document_id = %document_id,
            admitted = outcome.admitted,
            excluded = outcome.excluded_total(),
            "Document collected"
        );

        let appended = store.append(
            &patient_id,
            note_date,
            BucketDocument::new(layout, survivors),
        )?;
        if !appended {
            tracing::warn!(
                patient_id = %patient_id,
                document_id = %document_id,
                "Duplicate document skipped"
            );
            outcome.duplicate = true;
            outcome.admitted = 0;
        }
        Ok(outcome)
    }
}

fn compile(pattern: &str) -> Result<Regex, DefinitionError> {
    Regex::new(pattern).map_err(|e| DefinitionError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
