//! Ingestion of annotated documents from the upstream annotator.
//!
//! Malformed input never aborts a run: a bad line or document is skipped whole and a bad
//! mention is skipped alone, each surfaced as an [`IngestError`] the collector logs.

pub mod record;
pub mod reference;
pub mod source;

pub use record::*;
pub use reference::*;
pub use source::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Malformed sentence id '{0}' (expected section:ordinal)")]
    MalformedSentenceId(String),

    #[error("Sentence '{0}' is not in the document's sentence index")]
    UnknownSentence(String),

    #[error("Section '{0}' has no span in the document")]
    UnknownSection(String),

    #[error("Invalid {field} value: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Invalid note date '{0}'")]
    InvalidDate(String),

    #[error("Invalid offsets {begin}..{end}")]
    InvalidOffsets { begin: usize, end: usize },

    #[error("Line {line}: {message}")]
    Json { line: usize, message: String },

    #[error("Failed to read input: {0}")]
    Io(String),
}

impl IngestError {
    /// Read failures end the stream; everything else skips one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
