//! Read-only document store loaded once at startup.
//!
//! Walks the configured directory, extracts every matching file through
//! [`crate::extract`], and keeps the results in memory keyed by filename.
//! A missing directory or an empty result is fatal; individual files that
//! fail to read or extract are skipped with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extract::{self, Extracted, ParagraphKind};
use crate::models::{Document, Section};

#[derive(Debug, Error)]
pub enum DocumentLoadError {
    #[error("documents directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("failed to read documents directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid include pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("no documents could be loaded from {0}")]
    Empty(PathBuf),
}

/// Immutable collection of loaded documents, ordered by filename.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    docs: BTreeMap<String, Document>,
}

impl DocumentStore {
    /// Loads every file under `dir` whose relative path matches one of
    /// `include_globs`.
    pub fn load_all(dir: &Path, include_globs: &[String]) -> Result<Self, DocumentLoadError> {
        if !dir.exists() {
            return Err(DocumentLoadError::MissingDirectory(dir.to_path_buf()));
        }
        std::fs::read_dir(dir).map_err(|source| DocumentLoadError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let include_set = build_globset(include_globs)?;
        let mut docs = BTreeMap::new();

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let filename = entry.file_name().to_string_lossy().to_string();

            // Office lock files left behind by an open editor.
            if filename.starts_with("~$") {
                continue;
            }
            if !include_set.is_match(relative) {
                continue;
            }

            match load_file(path, &filename) {
                Ok(doc) => {
                    debug!(
                        file = %filename,
                        sections = doc.sections.len(),
                        tables = doc.tables.len(),
                        chars = doc.raw_text.chars().count(),
                        "loaded document"
                    );
                    if docs.contains_key(&filename) {
                        warn!(file = %filename, "duplicate filename; keeping the first one found");
                        continue;
                    }
                    docs.insert(filename, doc);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping document");
                }
            }
        }

        if docs.is_empty() {
            return Err(DocumentLoadError::Empty(dir.to_path_buf()));
        }
        info!(count = docs.len(), dir = %dir.display(), "documents loaded");
        Ok(Self { docs })
    }

    /// Builds a store from already-assembled documents.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let docs = documents
            .into_iter()
            .map(|d| (d.filename.clone(), d))
            .collect();
        Self { docs }
    }

    pub fn get(&self, filename: &str) -> Option<&Document> {
        self.docs.get(filename)
    }

    /// All documents in lexical filename order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn load_file(path: &Path, filename: &str) -> anyhow::Result<Document> {
    let bytes = std::fs::read(path)?;
    let extracted = extract::extract_path(path, &bytes)?;
    Ok(assemble(filename, extracted))
}

/// Turns raw extraction output into a [`Document`].
///
/// Text before the first heading belongs to no section but stays in
/// `raw_text`. Table rows follow the paragraphs in `raw_text`, cells joined
/// with `" | "`.
pub fn assemble(filename: &str, extracted: Extracted) -> Document {
    let Extracted { paragraphs, tables } = extracted;

    let mut title: Option<String> = None;
    let mut sections: Vec<Section> = Vec::new();
    let mut lines: Vec<String> = Vec::new();

    for p in &paragraphs {
        lines.push(p.text.clone());
        match p.kind {
            ParagraphKind::Title => {
                if title.is_none() {
                    title = Some(p.text.clone());
                }
            }
            ParagraphKind::Heading(_) => sections.push(Section {
                heading: p.text.clone(),
                body: String::new(),
            }),
            ParagraphKind::Body => {
                if let Some(section) = sections.last_mut() {
                    if !section.body.is_empty() {
                        section.body.push('\n');
                    }
                    section.body.push_str(&p.text);
                }
            }
        }
    }

    for table in &tables {
        for row in std::iter::once(&table.headers).chain(table.rows.iter()) {
            let cells: Vec<&str> = row
                .iter()
                .map(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .collect();
            if !cells.is_empty() {
                lines.push(cells.join(" | "));
            }
        }
    }

    let mut doc = Document {
        filename: filename.to_string(),
        title: String::new(),
        raw_text: lines.join("\n"),
        sections,
        tables,
    };
    doc.title = title
        .or_else(|| paragraphs.first().map(|p| p.text.clone()))
        .unwrap_or_else(|| doc.stem().to_string());
    doc
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, DocumentLoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| DocumentLoadError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DocumentLoadError::InvalidPattern {
            pattern: patterns.join(","),
            message: e.to_string(),
        })
}
