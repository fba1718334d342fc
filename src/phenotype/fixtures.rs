//! Builders shared by the phenotype tests.

use chrono::NaiveDate;

use super::store::{BucketDocument, DateBucket};
use crate::ingest::NoteDocument;
use crate::models::{
    AssertionStatus, Certainty, DocumentLayout, Experiencer, Mention, SentenceId, Span,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

pub struct MentionBuilder {
    mention: Mention,
}

impl MentionBuilder {
    pub fn new(code: &str) -> Self {
        Self {
            mention: Mention {
                patient_id: "00000001".into(),
                document_id: "n1".into(),
                note_date: date(2004, 7, 27),
                sentence_id: SentenceId::new("20113", 0),
                section_id: "20113".into(),
                begin_offset: 0,
                end_offset: 6,
                covered_text: code.to_lowercase(),
                normalized_code: code.into(),
                certainty: Certainty::Positive,
                status: AssertionStatus::Present,
                experiencer: Experiencer::Patient,
                sentence_text: format!("Sentence mentioning {}.", code.to_lowercase()),
                following_text: ".\n".into(),
                section_span: Span::new(0, 1000),
            },
        }
    }

    pub fn patient(mut self, patient_id: &str) -> Self {
        self.mention.patient_id = patient_id.into();
        self
    }

    pub fn doc(mut self, document_id: &str) -> Self {
        self.mention.document_id = document_id.into();
        self
    }

    pub fn date(mut self, note_date: NaiveDate) -> Self {
        self.mention.note_date = note_date;
        self
    }

    /// Sets the sentence id and the section id it implies.
    pub fn sentence(mut self, sentence_id: &str) -> Self {
        let id: SentenceId = sentence_id.parse().unwrap();
        self.mention.section_id = id.section.clone();
        self.mention.sentence_id = id;
        self
    }

    pub fn offsets(mut self, begin: usize, end: usize) -> Self {
        self.mention.begin_offset = begin;
        self.mention.end_offset = end;
        self
    }

    pub fn section_span(mut self, span: Span) -> Self {
        self.mention.section_span = span;
        self
    }

    pub fn text(mut self, covered_text: &str) -> Self {
        self.mention.covered_text = covered_text.into();
        self
    }

    pub fn sentence_text(mut self, text: &str) -> Self {
        self.mention.sentence_text = text.into();
        self
    }

    pub fn following_text(mut self, text: &str) -> Self {
        self.mention.following_text = text.into();
        self
    }

    pub fn certainty(mut self, certainty: Certainty) -> Self {
        self.mention.certainty = certainty;
        self
    }

    pub fn status(mut self, status: AssertionStatus) -> Self {
        self.mention.status = status;
        self
    }

    pub fn experiencer(mut self, experiencer: Experiencer) -> Self {
        self.mention.experiencer = experiencer;
        self
    }

    pub fn build(self) -> Mention {
        self.mention
    }
}

pub fn mention_on(code: &str, note_date: NaiveDate) -> Mention {
    MentionBuilder::new(code)
        .doc(&format!("n-{note_date}"))
        .date(note_date)
        .build()
}

/// `count` consecutive 30-character sentences starting at the section's first offset.
pub fn layout_with_sentences(
    document_id: &str,
    section: &str,
    section_span: Span,
    count: usize,
) -> DocumentLayout {
    let mut layout = DocumentLayout::new(document_id);
    layout.add_section(section, section_span);
    for ordinal in 0..count {
        let begin = section_span.begin + ordinal * 30;
        layout.add_sentence(
            SentenceId::new(section, ordinal),
            Span::new(begin, begin + 30),
            format!("sentence {ordinal}"),
        );
    }
    layout
}

pub fn bucket_of(note_date: NaiveDate, documents: Vec<(DocumentLayout, Vec<Mention>)>) -> DateBucket {
    let mut bucket = DateBucket::new(note_date);
    for (layout, mentions) in documents {
        bucket.insert(BucketDocument::new(
            layout,
            mentions.into_iter().map(std::sync::Arc::new).collect(),
        ));
    }
    bucket
}

pub fn note(patient_id: &str, document_id: &str, note_date: NaiveDate, mentions: Vec<Mention>) -> NoteDocument {
    NoteDocument {
        patient_id: patient_id.into(),
        document_id: document_id.into(),
        note_date,
        layout: layout_with_sentences(document_id, "20113", Span::new(0, 1000), 30),
        mentions,
    }
}
