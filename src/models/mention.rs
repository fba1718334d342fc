use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::{AssertionStatus, Certainty, Experiencer};
use super::layout::{SentenceId, Span};

/// One concept occurrence located and normalized by the upstream annotator.
///
/// Immutable after ingestion. The sentence text and enclosing section span are resolved
/// from the document layout at ingestion time so evidence and windows need no lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub patient_id: String,
    pub document_id: String,
    pub note_date: NaiveDate,
    pub sentence_id: SentenceId,
    pub section_id: String,
    pub begin_offset: usize,
    pub end_offset: usize,
    pub covered_text: String,
    pub normalized_code: String,
    pub certainty: Certainty,
    pub status: AssertionStatus,
    pub experiencer: Experiencer,
    pub sentence_text: String,
    /// Rest of the sentence after the mention plus the next sentence, newline-terminated.
    #[serde(default)]
    pub following_text: String,
    pub section_span: Span,
}

impl Mention {
    pub fn span(&self) -> Span {
        Span::new(self.begin_offset, self.end_offset)
    }

    pub fn same_document(&self, other: &Mention) -> bool {
        self.patient_id == other.patient_id && self.document_id == other.document_id
    }

    pub fn same_sentence(&self, other: &Mention) -> bool {
        self.same_document(other) && self.sentence_id == other.sentence_id
    }

    pub fn same_section(&self, other: &Mention) -> bool {
        self.same_document(other)
            && self.section_id == other.section_id
            && self.section_span == other.section_span
    }
}
