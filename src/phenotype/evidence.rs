//! Evidence text: `<criterion>doc::section::concept::sentence~~doc::...<criterion2>...`.
//!
//! Fields are normalized on the way out so the separators stay unambiguous, which lets
//! [`parse_evidence`] recover exactly the tuples [`format_evidence`] wrote.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::Criterion;
use crate::models::Mention;

pub const FIELD_SEPARATOR: &str = "::";
pub const TUPLE_SEPARATOR: &str = "~~";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvidenceParseError {
    #[error("Evidence text must start with '<criterion>' at offset {0}")]
    ExpectedCriterion(usize),

    #[error("Unterminated criterion name at offset {0}")]
    UnterminatedName(usize),

    #[error("Evidence tuple '{0}' does not have four fields")]
    BadTuple(String),
}

/// One parsed evidence element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceTuple {
    pub criterion: String,
    pub document_id: String,
    pub section_id: String,
    pub concept_text: String,
    pub sentence_text: String,
}

impl EvidenceTuple {
    pub fn from_mention(criterion: &str, mention: &Mention) -> Self {
        Self {
            criterion: criterion.to_string(),
            document_id: sanitize_field(&mention.document_id),
            section_id: sanitize_field(&mention.section_id),
            concept_text: sanitize_field(&mention.covered_text),
            sentence_text: sanitize_field(&mention.sentence_text),
        }
    }
}

/// Tuples in the order they are written.
pub fn evidence_tuples(criteria: &[Criterion]) -> Vec<EvidenceTuple> {
    criteria
        .iter()
        .flat_map(|c| {
            c.evidence
                .iter()
                .map(move |m| EvidenceTuple::from_mention(&c.name, m))
        })
        .collect()
}

pub fn format_evidence(criteria: &[Criterion]) -> String {
    let mut out = String::new();
    for criterion in criteria.iter().filter(|c| c.satisfied()) {
        out.push('<');
        out.push_str(&criterion.name);
        out.push('>');
        let tuples: Vec<String> = criterion
            .evidence
            .iter()
            .map(|m| {
                let t = EvidenceTuple::from_mention(&criterion.name, m);
                [t.document_id, t.section_id, t.concept_text, t.sentence_text].join(FIELD_SEPARATOR)
            })
            .collect();
        out.push_str(&tuples.join(TUPLE_SEPARATOR));
    }
    out
}

pub fn parse_evidence(text: &str) -> Result<Vec<EvidenceTuple>, EvidenceParseError> {
    let mut tuples = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    while !rest.is_empty() {
        let Some(after_open) = rest.strip_prefix('<') else {
            return Err(EvidenceParseError::ExpectedCriterion(offset));
        };
        let close = after_open
            .find('>')
            .ok_or(EvidenceParseError::UnterminatedName(offset))?;
        let criterion = &after_open[..close];
        let body_and_rest = &after_open[close + 1..];
        let body_len = body_and_rest.find('<').unwrap_or(body_and_rest.len());
        let body = &body_and_rest[..body_len];

        for raw in body.split(TUPLE_SEPARATOR) {
            let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
            let [document_id, section_id, concept_text, sentence_text] = fields.as_slice() else {
                return Err(EvidenceParseError::BadTuple(raw.to_string()));
            };
            tuples.push(EvidenceTuple {
                criterion: criterion.to_string(),
                document_id: document_id.to_string(),
                section_id: section_id.to_string(),
                concept_text: concept_text.to_string(),
                sentence_text: sentence_text.to_string(),
            });
        }

        offset += 1 + close + 1 + body_len;
        rest = &body_and_rest[body_len..];
    }
    Ok(tuples)
}

/// Make a field safe for the record and evidence separators.
///
/// Line breaks, tabs and `|` become spaces; `<` `>` become `(` `)`; a `:` or `~` that
/// touches the field edge or another `:`/`~` is followed by a space, so no separator can
/// form inside or across fields.
pub fn sanitize_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    let mut chars = raw
        .chars()
        .map(|c| match c {
            '\r' | '\n' | '\t' | '|' => ' ',
            '<' => '(',
            '>' => ')',
            other => other,
        })
        .peekable();

    if matches!(chars.peek(), Some(':' | '~')) {
        out.push(' ');
    }
    while let Some(c) = chars.next() {
        out.push(c);
        if matches!(c, ':' | '~') {
            match chars.peek() {
                Some(next) if *next == c => out.push(' '),
                None => out.push(' '),
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::fixtures::{date, MentionBuilder};
    use std::sync::Arc;

    fn criterion(name: &str, mentions: Vec<(&str, &str, &str)>) -> Criterion {
        Criterion::new(
            name,
            mentions
                .into_iter()
                .map(|(doc, text, sentence)| {
                    Arc::new(
                        MentionBuilder::new("X")
                            .doc(doc)
                            .date(date(2004, 1, 1))
                            .sentence("20113:0")
                            .text(text)
                            .sentence_text(sentence)
                            .build(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn format_matches_documented_layout() {
        let criteria = vec![
            criterion("PhD", vec![("n1", "asthma", "Dx: asthma.")]),
            criterion(
                "C1",
                vec![("n2", "wheeze", "Wheeze and cough."), ("n2", "cough", "Wheeze and cough.")],
            ),
        ];
        assert_eq!(
            format_evidence(&criteria),
            "<PhD>n1::20113::asthma::Dx: asthma.\
             <C1>n2::20113::wheeze::Wheeze and cough.~~n2::20113::cough::Wheeze and cough."
        );
    }

    #[test]
    fn parse_recovers_written_tuples() {
        let criteria = vec![
            criterion("PhD", vec![("n1", "asthma", "Impression: asthma")]),
            criterion(
                "C2",
                vec![("n3", "wheezing", "- wheezing\nworse at night"), ("n9", "wheeze", "x | y <z>")],
            ),
        ];
        let text = format_evidence(&criteria);
        let parsed = parse_evidence(&text).unwrap();
        assert_eq!(parsed, evidence_tuples(&criteria));
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].sentence_text, "- wheezing worse at night");
        assert_eq!(parsed[2].sentence_text, "x   y (z)");
    }

    #[test]
    fn separators_inside_fields_cannot_split() {
        let criteria = vec![criterion(
            "T",
            vec![("n1", "Dx:", "a::b~~c ends with ~")],
        )];
        let parsed = parse_evidence(&format_evidence(&criteria)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].concept_text, "Dx: ");
        assert_eq!(parsed[0].sentence_text, "a: :b~ ~c ends with ~ ");
    }

    #[test]
    fn unsatisfied_criteria_are_omitted() {
        let criteria = vec![Criterion::unsatisfied("C3")];
        assert_eq!(format_evidence(&criteria), "");
        assert!(parse_evidence("").unwrap().is_empty());
    }

    #[test]
    fn malformed_text_rejected() {
        assert_eq!(
            parse_evidence("PhD>n1::a::b::c"),
            Err(EvidenceParseError::ExpectedCriterion(0))
        );
        assert!(matches!(
            parse_evidence("<PhD"),
            Err(EvidenceParseError::UnterminatedName(0))
        ));
        assert!(matches!(
            parse_evidence("<PhD>n1::a::b"),
            Err(EvidenceParseError::BadTuple(_))
        ));
    }

    #[test]
    fn sanitize_leading_separator_char() {
        assert_eq!(sanitize_field(":x"), " :x");
        assert_eq!(sanitize_field("~~"), " ~ ~ ");
    }
}
