use std::io::BufRead;

use super::{DocumentRecord, IngestError};

/// Reads one [`DocumentRecord`] per non-blank line.
pub struct JsonLinesSource<R> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<DocumentRecord, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(IngestError::Io(e.to_string()))),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(&text).map_err(|e| IngestError::Json {
                    line: self.line,
                    message: e.to_string(),
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn skips_blank_lines_and_numbers_from_one() {
        let input = "\n{\"patient_id\":\"1\"}\n\nnot json\n";
        let mut source = JsonLinesSource::new(Cursor::new(input));

        let first = source.next().unwrap().unwrap();
        assert_eq!(first.patient_id.as_deref(), Some("1"));
        assert_eq!(source.line(), 2);

        match source.next().unwrap() {
            Err(IngestError::Json { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected json error, got {other:?}"),
        }
        assert!(source.next().is_none());
    }

    #[test]
    fn json_errors_are_not_fatal() {
        let err = IngestError::Json {
            line: 1,
            message: "x".into(),
        };
        assert!(!err.is_fatal());
        assert!(IngestError::Io("disk".into()).is_fatal());
    }
}
