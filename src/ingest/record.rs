use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::IngestError;
use crate::models::{DocumentLayout, Mention, SentenceId, Span};

/// One document as delivered on the wire (one JSON object per line).
///
/// Every field is optional at the serde level so that a missing field becomes an
/// ingestion fault for that document or mention instead of a parse failure for the line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub patient_id: Option<String>,
    pub document_id: Option<String>,
    pub note_date: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionRecord>,
    #[serde(default)]
    pub sentences: Vec<SentenceRecord>,
    #[serde(default)]
    pub mentions: Vec<MentionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: String,
    pub begin: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub id: String,
    pub begin: usize,
    pub end: usize,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentionRecord {
    pub sentence_id: Option<String>,
    pub section_id: Option<String>,
    pub begin_offset: Option<usize>,
    pub end_offset: Option<usize>,
    pub covered_text: Option<String>,
    pub normalized_code: Option<String>,
    pub certainty: Option<String>,
    pub status: Option<String>,
    pub experiencer: Option<String>,
}

/// A validated document: identity, layout, and the mentions that converted cleanly.
#[derive(Debug, Clone)]
pub struct NoteDocument {
    pub patient_id: String,
    pub document_id: String,
    pub note_date: NaiveDate,
    pub layout: DocumentLayout,
    pub mentions: Vec<Mention>,
}

impl DocumentRecord {
    /// Validate and convert. Document-level faults fail the whole document; mention-level
    /// faults are returned alongside the converted document.
    pub fn into_note(self) -> Result<(NoteDocument, Vec<IngestError>), IngestError> {
        let patient_id = non_empty(self.patient_id).ok_or(IngestError::MissingField("patient_id"))?;
        let document_id =
            non_empty(self.document_id).ok_or(IngestError::MissingField("document_id"))?;
        let raw_date = self.note_date.ok_or(IngestError::MissingField("note_date"))?;
        let note_date = parse_note_date(&raw_date)?;

        let mut faults = Vec::new();
        let mut layout = DocumentLayout::new(document_id.clone());
        for section in self.sections {
            layout.add_section(section.id, Span::new(section.begin, section.end));
        }
        for sentence in self.sentences {
            match sentence.id.parse::<SentenceId>() {
                Ok(id) => layout.add_sentence(id, Span::new(sentence.begin, sentence.end), sentence.text),
                Err(e) => faults.push(e),
            }
        }

        let mut mentions = Vec::with_capacity(self.mentions.len());
        for raw in self.mentions {
            match raw.into_mention(&patient_id, &document_id, note_date, &layout) {
                Ok(mention) => mentions.push(mention),
                Err(e) => faults.push(e),
            }
        }

        Ok((
            NoteDocument {
                patient_id,
                document_id,
                note_date,
                layout,
                mentions,
            },
            faults,
        ))
    }
}

impl MentionRecord {
    fn into_mention(
        self,
        patient_id: &str,
        document_id: &str,
        note_date: NaiveDate,
        layout: &DocumentLayout,
    ) -> Result<Mention, IngestError> {
        let raw_sentence = self
            .sentence_id
            .ok_or(IngestError::MissingField("sentence_id"))?;
        let sentence_id: SentenceId = raw_sentence.parse()?;
        let section_id = self.section_id.ok_or(IngestError::MissingField("section_id"))?;
        let begin_offset = self
            .begin_offset
            .ok_or(IngestError::MissingField("begin_offset"))?;
        let end_offset = self.end_offset.ok_or(IngestError::MissingField("end_offset"))?;
        if end_offset < begin_offset {
            return Err(IngestError::InvalidOffsets {
                begin: begin_offset,
                end: end_offset,
            });
        }
        let covered_text = self
            .covered_text
            .ok_or(IngestError::MissingField("covered_text"))?;
        let normalized_code = self
            .normalized_code
            .ok_or(IngestError::MissingField("normalized_code"))?;
        let certainty = self
            .certainty
            .ok_or(IngestError::MissingField("certainty"))?
            .parse()?;
        let status = self.status.ok_or(IngestError::MissingField("status"))?.parse()?;
        let experiencer = self
            .experiencer
            .ok_or(IngestError::MissingField("experiencer"))?
            .parse()?;

        let sentence = layout
            .sentence(&sentence_id)
            .ok_or_else(|| IngestError::UnknownSentence(raw_sentence.clone()))?;
        let following_text = layout.following_text(&sentence_id, end_offset);
        let span = Span::new(begin_offset, end_offset);
        let section_span = layout
            .section_span(&section_id, span)
            .ok_or_else(|| IngestError::UnknownSection(section_id.clone()))?;

        Ok(Mention {
            patient_id: patient_id.to_string(),
            document_id: document_id.to_string(),
            note_date,
            sentence_id,
            section_id,
            begin_offset,
            end_offset,
            covered_text,
            normalized_code,
            certainty,
            status,
            experiencer,
            sentence_text: sentence.text.clone(),
            following_text,
            section_span,
        })
    }
}

/// Accepts `YYYY-MM-DD` and `YYYYMMDD`.
pub fn parse_note_date(raw: &str) -> Result<NaiveDate, IngestError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| IngestError::InvalidDate(raw.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssertionStatus, Certainty};

    fn record_json() -> &'static str {
        r#"{"patient_id":"06000125","document_id":"n1","note_date":"2003-12-05",
            "sections":[{"id":"20113","begin":0,"end":60}],
            "sentences":[{"id":"20113:0","begin":0,"end":30,"text":"Wheezing and cough."},
                         {"id":"20113:1","begin":30,"end":60,"text":"Asthma."}],
            "mentions":[{"sentence_id":"20113:0","section_id":"20113","begin_offset":0,
                         "end_offset":8,"covered_text":"Wheezing","normalized_code":"WHEEZE",
                         "certainty":"Positive","status":"Present","experiencer":"Patient"}]}"#
    }

    #[test]
    fn converts_complete_document() {
        let record: DocumentRecord = serde_json::from_str(record_json()).unwrap();
        let (doc, faults) = record.into_note().unwrap();
        assert!(faults.is_empty());
        assert_eq!(doc.note_date, NaiveDate::from_ymd_opt(2003, 12, 5).unwrap());
        assert_eq!(doc.mentions.len(), 1);
        let m = &doc.mentions[0];
        assert_eq!(m.sentence_text, "Wheezing and cough.");
        assert_eq!(m.following_text, " and cough.\nAsthma.\n");
        assert_eq!(m.section_span, Span::new(0, 60));
        assert_eq!(m.certainty, Certainty::Positive);
        assert_eq!(m.status, AssertionStatus::Present);
    }

    #[test]
    fn bad_mentions_are_skipped_individually() {
        let mut record: DocumentRecord = serde_json::from_str(record_json()).unwrap();
        let good = record.mentions[0].clone();

        let mut no_code = good.clone();
        no_code.normalized_code = None;
        let mut bad_sentence = good.clone();
        bad_sentence.sentence_id = Some("20113".into());
        let mut unknown_sentence = good.clone();
        unknown_sentence.sentence_id = Some("20113:9".into());
        let mut bad_status = good.clone();
        bad_status.status = Some("Maybe".into());
        record.mentions.extend([no_code, bad_sentence, unknown_sentence, bad_status]);

        let (doc, faults) = record.into_note().unwrap();
        assert_eq!(doc.mentions.len(), 1);
        assert_eq!(faults.len(), 4);
        assert_eq!(faults[0], IngestError::MissingField("normalized_code"));
        assert!(matches!(faults[1], IngestError::MalformedSentenceId(_)));
        assert!(matches!(faults[2], IngestError::UnknownSentence(_)));
        assert!(matches!(faults[3], IngestError::InvalidEnum { .. }));
    }

    #[test]
    fn missing_patient_fails_document() {
        let mut record: DocumentRecord = serde_json::from_str(record_json()).unwrap();
        record.patient_id = Some("  ".into());
        assert_eq!(
            record.into_note().unwrap_err(),
            IngestError::MissingField("patient_id")
        );
    }

    #[test]
    fn accepts_compact_dates() {
        assert_eq!(
            parse_note_date("20040727").unwrap(),
            NaiveDate::from_ymd_opt(2004, 7, 27).unwrap()
        );
        assert!(matches!(
            parse_note_date("27/07/2004"),
            Err(IngestError::InvalidDate(_))
        ));
    }
}
