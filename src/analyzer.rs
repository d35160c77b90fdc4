//! Keyword-driven document selection.
//!
//! A question is normalized (lowercase, Spanish accents folded) and matched
//! against a ruleset of [`KeywordGroup`]s. Terms inside a group are synonyms:
//! "sales" and "ventas" activate the same group and count the same when they
//! appear in a document. Each document is then scored by where the active
//! groups' terms occur:
//!
//! ```text
//! score(doc) = Σ group.weight × ( title_weight   × hits(filename stem + title)
//!                               + heading_weight × hits(section headings)
//!                               + body_weight    × min(hits(raw text), body_hit_cap) )
//! ```
//!
//! The highest score wins. Ties go to the document used in the session's
//! previous turn when it is among the tied ones, otherwise to the first tied
//! filename in lexical order. Nothing is selected unless the best score is
//! strictly above `min_score`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::models::{Document, Turn};

/// Scores within this distance are considered tied.
const TIE_EPSILON: f64 = 1e-9;

/// A set of synonymous terms treated as one signal.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeywordGroup {
    pub name: String,
    pub terms: Vec<String>,
    #[serde(default = "default_group_weight")]
    pub weight: f64,
}

fn default_group_weight() -> f64 {
    1.0
}

fn group(name: &str, weight: f64, terms: &[&str]) -> KeywordGroup {
    KeywordGroup {
        name: name.to_string(),
        terms: terms.iter().map(|t| t.to_string()).collect(),
        weight,
    }
}

/// Built-in ruleset for the sales/supply analytics documentation.
pub fn default_groups() -> Vec<KeywordGroup> {
    vec![
        group(
            "ventas",
            1.0,
            &[
                "ventas",
                "venta",
                "sales",
                "oportunidad",
                "oportunidades",
                "lead",
                "leads",
                "originación",
                "handoff",
                "penetración",
                "performance",
            ],
        ),
        group(
            "compras",
            1.0,
            &[
                "compras",
                "compra",
                "supply",
                "adquisición",
                "adquisiciones",
                "procurement",
                "metrics",
                "input",
            ],
        ),
        group(
            "reservas",
            1.0,
            &["reservas", "reserva", "atribución", "booking", "bookings"],
        ),
        group(
            "kpi",
            0.5,
            &[
                "kpi",
                "kpis",
                "métrica",
                "métricas",
                "metric",
                "indicador",
                "indicadores",
            ],
        ),
        group(
            "funnel",
            0.5,
            &["funnel", "funnels", "embudo", "etapa", "etapas", "stage", "stages"],
        ),
        group(
            "sql",
            0.5,
            &["sql", "query", "queries", "consulta", "consultas", "select"],
        ),
    ]
}

/// Lowercases and folds the accents that appear in Spanish text.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Normalized alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Number of (possibly overlapping) occurrences of `term` as a contiguous
/// token sequence in `tokens`.
fn count_phrase(tokens: &[String], term: &[String]) -> usize {
    if term.is_empty() || term.len() > tokens.len() {
        return 0;
    }
    tokens
        .windows(term.len())
        .filter(|w| w.iter().zip(term).all(|(a, b)| a == b))
        .count()
}

/// True when any of `terms` occurs in `text` as a whole-token phrase.
pub fn mentions(text: &str, terms: &[String]) -> bool {
    let tokens = tokenize(text);
    terms
        .iter()
        .any(|t| count_phrase(&tokens, &tokenize(t)) > 0)
}

#[derive(Debug, Clone)]
struct CompiledGroup {
    name: String,
    weight: f64,
    terms: Vec<Vec<String>>,
}

impl CompiledGroup {
    fn hits(&self, tokens: &[String]) -> usize {
        self.terms.iter().map(|t| count_phrase(tokens, t)).sum()
    }
}

/// Per-document score, used for diagnostics and by [`QueryAnalyzer::select_document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentScore {
    pub filename: String,
    pub score: f64,
}

/// The analyzer's pick for a question.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub document: &'a Document,
    pub score: f64,
    /// Names of the keyword groups detected in the question.
    pub matched_groups: Vec<String>,
    /// Normalized terms of the detected groups, for excerpt ranking.
    pub matched_terms: Vec<String>,
}

struct DocumentTokens {
    title: Vec<String>,
    headings: Vec<Vec<String>>,
    body: Vec<String>,
}

impl DocumentTokens {
    fn of(doc: &Document) -> Self {
        Self {
            title: tokenize(&format!("{} {}", doc.stem(), doc.title)),
            headings: doc.sections.iter().map(|s| tokenize(&s.heading)).collect(),
            body: tokenize(&doc.raw_text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    groups: Vec<CompiledGroup>,
    title_weight: f64,
    heading_weight: f64,
    body_weight: f64,
    body_hit_cap: usize,
    min_score: f64,
}

impl QueryAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let groups = config
            .groups
            .iter()
            .map(|g| CompiledGroup {
                name: g.name.clone(),
                weight: g.weight,
                terms: g
                    .terms
                    .iter()
                    .map(|t| tokenize(t))
                    .filter(|t| !t.is_empty())
                    .collect(),
            })
            .collect();
        Self {
            groups,
            title_weight: config.title_weight,
            heading_weight: config.heading_weight,
            body_weight: config.body_weight,
            body_hit_cap: config.body_hit_cap,
            min_score: config.min_score,
        }
    }

    /// Indices of the groups with at least one term present in `question`.
    fn active_groups(&self, question: &str) -> Vec<usize> {
        let tokens = tokenize(question);
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.hits(&tokens) > 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Names of the keyword groups detected in `question`.
    pub fn detect_groups(&self, question: &str) -> Vec<String> {
        self.active_groups(question)
            .into_iter()
            .map(|i| self.groups[i].name.clone())
            .collect()
    }

    fn score_tokens(&self, tokens: &DocumentTokens, active: &[usize]) -> f64 {
        active
            .iter()
            .map(|&i| {
                let g = &self.groups[i];
                let title = g.hits(&tokens.title) as f64;
                let headings: usize = tokens.headings.iter().map(|h| g.hits(h)).sum();
                let body = g.hits(&tokens.body).min(self.body_hit_cap) as f64;
                g.weight
                    * (self.title_weight * title
                        + self.heading_weight * headings as f64
                        + self.body_weight * body)
            })
            .sum()
    }

    /// Scores every document against `question`, in lexical filename order.
    pub fn score_documents<'a>(
        &self,
        question: &str,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> Vec<DocumentScore> {
        let active = self.active_groups(question);
        let mut scores: Vec<DocumentScore> = documents
            .into_iter()
            .map(|doc| DocumentScore {
                filename: doc.filename.clone(),
                score: if active.is_empty() {
                    0.0
                } else {
                    self.score_tokens(&DocumentTokens::of(doc), &active)
                },
            })
            .collect();
        scores.sort_by(|a, b| a.filename.cmp(&b.filename));
        scores
    }

    /// Picks the single most relevant document for `question`, or `None`
    /// when nothing scores above the threshold.
    pub fn select_document<'a>(
        &self,
        question: &str,
        documents: impl IntoIterator<Item = &'a Document>,
        history: &[Turn],
    ) -> Option<Selection<'a>> {
        let active = self.active_groups(question);
        if active.is_empty() {
            debug!("no keyword groups detected in question");
            return None;
        }

        let mut scored: Vec<(&'a Document, f64)> = documents
            .into_iter()
            .map(|doc| (doc, self.score_tokens(&DocumentTokens::of(doc), &active)))
            .collect();
        scored.sort_by(|a, b| a.0.filename.cmp(&b.0.filename));

        let best = scored
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        if best.is_nan() || best <= self.min_score {
            debug!(best, min_score = self.min_score, "no document above threshold");
            return None;
        }

        let tied: Vec<&(&'a Document, f64)> = scored
            .iter()
            .filter(|(_, s)| (best - s).abs() <= TIE_EPSILON)
            .collect();
        let previous = history.last().and_then(|t| t.document_used.as_deref());
        let (document, score) = previous
            .and_then(|prev| tied.iter().find(|(d, _)| d.filename == prev))
            .or_else(|| tied.first())
            .map(|(d, s)| (*d, *s))?;

        let matched_groups: Vec<String> =
            active.iter().map(|&i| self.groups[i].name.clone()).collect();
        let matched_terms: Vec<String> = active
            .iter()
            .flat_map(|&i| self.groups[i].terms.iter().map(|t| t.join(" ")))
            .collect();

        debug!(
            document = %document.filename,
            score,
            tied = tied.len(),
            groups = ?matched_groups,
            "document selected"
        );

        Some(Selection {
            document,
            score,
            matched_groups,
            matched_terms,
        })
    }
}
