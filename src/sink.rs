//! Append-only result sinks.

use std::io::Write;

use chrono::NaiveDate;
use thiserror::Error;

use crate::phenotype::EvidenceRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write record: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record line: {0}")]
    Malformed(String),
}

/// Receives final records in patient order.
pub trait ResultSink {
    fn emit(&mut self, record: &EvidenceRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl ResultSink for Vec<EvidenceRecord> {
    fn emit(&mut self, record: &EvidenceRecord) -> Result<(), SinkError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes `patientId|tier|indexDate|evidenceText` lines.
pub struct DelimitedSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> DelimitedSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for DelimitedSink<W> {
    fn emit(&mut self, record: &EvidenceRecord) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", format_record(record))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

const DATE_FORMAT: &str = "%Y%m%d";

pub fn format_record(record: &EvidenceRecord) -> String {
    let date = record
        .index_date
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}",
        clean(&record.patient_id),
        clean(&record.tier),
        date,
        clean(&record.evidence_text)
    )
}

pub fn parse_record(line: &str) -> Result<EvidenceRecord, SinkError> {
    let malformed = || SinkError::Malformed(line.to_string());
    let mut fields = line.trim_end_matches(['\r', '\n']).splitn(4, '|');
    let patient_id = fields.next().ok_or_else(malformed)?;
    let tier = fields.next().ok_or_else(malformed)?;
    let date = fields.next().ok_or_else(malformed)?;
    let evidence_text = fields.next().ok_or_else(malformed)?;
    let index_date = if date.is_empty() {
        None
    } else {
        Some(NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| malformed())?)
    };
    Ok(EvidenceRecord {
        patient_id: patient_id.to_string(),
        tier: tier.to_string(),
        index_date,
        evidence_text: evidence_text.to_string(),
    })
}

fn clean(field: &str) -> String {
    field.replace(['\r', '\n', '|'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: Option<NaiveDate>, evidence: &str) -> EvidenceRecord {
        EvidenceRecord {
            patient_id: "06000125".into(),
            tier: "DEFINITE".into(),
            index_date: date,
            evidence_text: evidence.into(),
        }
    }

    #[test]
    fn writes_one_line_per_record() {
        let mut sink = DelimitedSink::new(Vec::new());
        let d = NaiveDate::from_ymd_opt(2004, 7, 27).unwrap();
        sink.emit(&record(Some(d), "<PhD>n1::20113::asthma::Asthma.")).unwrap();
        sink.emit(&record(None, "")).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "06000125|DEFINITE|20040727|<PhD>n1::20113::asthma::Asthma.\n06000125|DEFINITE||\n"
        );
    }

    #[test]
    fn parse_reads_back_written_line() {
        let d = NaiveDate::from_ymd_opt(2010, 3, 1).unwrap();
        let original = record(Some(d), "<C1>n2::20113::wheeze::Wheeze.");
        let parsed = parse_record(&format_record(&original)).unwrap();
        assert_eq!(parsed, original);
        let empty = parse_record("p|NO||").unwrap();
        assert_eq!(empty.index_date, None);
        assert!(empty.evidence_text.is_empty());
    }

    #[test]
    fn delimiter_in_field_is_cleaned() {
        let mut r = record(None, "a|b\nc");
        r.patient_id = "x|y".into();
        assert_eq!(format_record(&r), "x y|DEFINITE||a b c");
    }

    #[test]
    fn malformed_lines_rejected() {
        assert!(matches!(parse_record("p|NO"), Err(SinkError::Malformed(_))));
        assert!(matches!(
            parse_record("p|NO|2004-07-27|"),
            Err(SinkError::Malformed(_))
        ));
    }

    #[test]
    fn vec_sink_collects() {
        let mut sink: Vec<EvidenceRecord> = Vec::new();
        sink.emit(&record(None, "")).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
