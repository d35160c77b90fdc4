//! Core data models used throughout datadoc-bot.
//!
//! These types represent the loaded documents and the conversation turns
//! that flow through the selection and answering pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A heading and the body text that follows it, up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

/// A table extracted from a document. The first row becomes `headers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A document loaded at startup. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// File name including extension; unique within the store.
    pub filename: String,
    pub title: String,
    pub raw_text: String,
    pub sections: Vec<Section>,
    pub tables: Vec<Table>,
}

impl Document {
    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.filename.rfind('.') {
            Some(pos) if pos > 0 => &self.filename[..pos],
            _ => &self.filename,
        }
    }
}

/// One question/answer exchange within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub document_used: Option<String>,
    pub asked_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        document_used: Option<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            document_used,
            asked_at: Utc::now(),
        }
    }
}
