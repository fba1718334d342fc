//! Per-patient reference (cutoff) dates, typically the last follow-up date of a study.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Failed to read reference dates {0}: {1}")]
    Load(String, String),

    #[error("Reference dates line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Tab-separated `patientId<TAB>YYYYMMDD` table. Lines starting with `//` are comments.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDates {
    dates: HashMap<String, NaiveDate>,
    id_width: usize,
}

impl ReferenceDates {
    pub fn parse(text: &str, id_width: usize) -> Result<Self, ReferenceError> {
        let mut dates = HashMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            let mut fields = raw.split('\t');
            let patient = fields.next().map(str::trim).unwrap_or_default();
            let date = fields.next().map(str::trim).ok_or(ReferenceError::Malformed {
                line,
                reason: "expected patient id and date separated by a tab".into(),
            })?;
            if patient.is_empty() {
                return Err(ReferenceError::Malformed {
                    line,
                    reason: "empty patient id".into(),
                });
            }
            let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| {
                ReferenceError::Malformed {
                    line,
                    reason: format!("invalid date '{date}' (expected YYYYMMDD)"),
                }
            })?;
            dates.insert(normalize_patient_id(patient, id_width), date);
        }
        Ok(Self { dates, id_width })
    }

    pub fn load(path: &Path, id_width: usize) -> Result<Self, ReferenceError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReferenceError::Load(path.display().to_string(), e.to_string()))?;
        Self::parse(&text, id_width)
    }

    pub fn get(&self, patient_id: &str) -> Option<NaiveDate> {
        self.dates
            .get(&normalize_patient_id(patient_id, self.id_width))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Left-pads all-digit identifiers with zeros to `width`; other identifiers pass through.
pub fn normalize_patient_id(raw: &str, width: usize) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{trimmed:0>width$}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_table_with_comments_and_padding() {
        let text = "// mcn\tlast follow-up\n6000125\t20051231\textra\n\nA-17\t20040101\n";
        let table = ReferenceDates::parse(text, 8).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("06000125"), Some(date(2005, 12, 31)));
        assert_eq!(table.get("6000125"), Some(date(2005, 12, 31)));
        assert_eq!(table.get("A-17"), Some(date(2004, 1, 1)));
        assert_eq!(table.get("99999999"), None);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = ReferenceDates::parse("// header\n123\t2005-12-31\n", 8).unwrap_err();
        assert!(matches!(err, ReferenceError::Malformed { line: 2, .. }));

        let err = ReferenceDates::parse("123 20051231\n", 8).unwrap_err();
        assert!(matches!(err, ReferenceError::Malformed { line: 1, .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "00000042\t20100315").unwrap();
        let table = ReferenceDates::load(file.path(), 8).unwrap();
        assert_eq!(table.get("42"), Some(date(2010, 3, 15)));
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = ReferenceDates::load(Path::new("/nonexistent/ref.tsv"), 8).unwrap_err();
        assert!(matches!(err, ReferenceError::Load(_, _)));
    }

    #[test]
    fn normalization_leaves_non_numeric_ids() {
        assert_eq!(normalize_patient_id("42", 8), "00000042");
        assert_eq!(normalize_patient_id("123456789", 8), "123456789");
        assert_eq!(normalize_patient_id("mrn-42", 8), "mrn-42");
    }
}
