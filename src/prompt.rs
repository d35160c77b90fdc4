//! Builds the chat-completion messages for one question.
//!
//! The message list is always:
//!
//! 1. the system instructions, naming the source document,
//! 2. a system message carrying the document excerpt,
//! 3. the recent history as alternating user/assistant messages,
//! 4. the new question, followed by a description of the most recent SQL
//!    query in the history when there is one.

use serde::{Deserialize, Serialize};

use crate::analyzer::{mentions, Selection};
use crate::models::{Document, Section, Table, Turn};
use crate::sql::{analyze_query, extract_sql_queries, relate_queries, QueryInfo, QueryRelation};

/// Answer given when no document matches the question. No upstream call is
/// made for it.
pub const NO_DOCUMENT_ANSWER: &str = "No encontré documentación relacionada con tu pregunta. \
Puedo ayudarte con métricas, KPIs, funnels y consultas SQL de ventas (sales), compras (supply) \
y reservas. ¿Podrías reformular la pregunta indicando el área o la métrica que te interesa?";

/// Appended to an excerpt that was cut to fit the character budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... documento truncado por longitud ...]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub fn system_prompt(document: &Document) -> String {
    format!(
        "Eres un asistente experto en análisis de datos. Ayudas a los equipos a entender \
la documentación interna sobre métricas, KPIs, funnels, reportes y consultas SQL.

Para esta pregunta estás usando el documento \"{title}\" (archivo {filename}).

Sinónimos:
- \"sales\" y \"ventas\" se refieren al mismo funnel.
- \"supply\" y \"compras\" se refieren al mismo funnel.

Debes:
- Responder únicamente con base en el extracto del documento que se te proporciona. \
Si la información no está en el extracto, dilo claramente.
- Si la pregunta es ambigua (por ejemplo, no queda claro si se refiere a ventas o a compras), \
pide al usuario el detalle que falta.
- Referenciar las secciones o tablas del documento que sustentan tu respuesta.
- Proporcionar consultas SQL cuando se pidan o sean útiles, en bloques ```sql. \
Si se pide modificar una consulta anterior, entrega la consulta modificada y explica los cambios.
- Responder siempre en español, con un tono profesional y claro.
- Terminar tu respuesta indicando la fuente: [Fuente: {filename}]",
        title = document.title,
        filename = document.filename,
    )
}

enum Block<'d> {
    Section(&'d Section),
    Table(usize, &'d Table),
}

impl Block<'_> {
    fn is_table(&self) -> bool {
        matches!(self, Block::Table(..))
    }

    fn render(&self) -> String {
        match self {
            Block::Section(s) if s.body.is_empty() => format!("\n### {}\n", s.heading),
            Block::Section(s) => format!("\n### {}\n{}\n", s.heading, s.body),
            Block::Table(i, t) => {
                let mut out = format!("\n### Tabla {}\n", i + 1);
                if !t.headers.is_empty() {
                    out.push_str(&format!("Encabezados: {}\n", t.headers.join(" | ")));
                }
                out.push_str("Datos:\n");
                for row in &t.rows {
                    out.push_str(&format!("- {}\n", row.join(" | ")));
                }
                out
            }
        }
    }
}

/// Formats a document as prompt text, limited to `max_chars` characters
/// plus the truncation marker.
///
/// When the whole document fits it is rendered in document order. Otherwise
/// sections mentioning any of `matched_terms` come first, then the remaining
/// sections, then tables, until the budget runs out.
pub fn format_document(document: &Document, matched_terms: &[String], max_chars: usize) -> String {
    let header = format!("# {}\nArchivo: {}\n", document.title, document.filename);
    let sections = document.sections.iter().map(Block::Section);
    let tables = document
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| Block::Table(i, t));

    let in_order: Vec<Block> = sections.clone().chain(tables.clone()).collect();
    let (full, _) = render_blocks(&header, &in_order, usize::MAX);
    if full.chars().count() <= max_chars {
        return full;
    }

    let (relevant, rest): (Vec<Block>, Vec<Block>) = sections.partition(|b| match b {
        Block::Section(s) => mentions(&format!("{}\n{}", s.heading, s.body), matched_terms),
        Block::Table(..) => false,
    });
    let ranked: Vec<Block> = relevant.into_iter().chain(rest).chain(tables).collect();
    let (mut excerpt, truncated) = render_blocks(&header, &ranked, max_chars);
    if truncated {
        excerpt.push_str(TRUNCATION_MARKER);
    }
    excerpt
}

/// Renders blocks under group headings until `budget` characters are used.
/// Returns the text and whether anything was left out.
fn render_blocks(header: &str, blocks: &[Block], budget: usize) -> (String, bool) {
    let mut pieces = vec![header.to_string()];
    let mut current_group: Option<bool> = None;
    for block in blocks {
        let mut piece = String::new();
        if current_group != Some(block.is_table()) {
            current_group = Some(block.is_table());
            piece.push_str(if block.is_table() {
                "\n## Tablas del Documento:\n"
            } else {
                "\n## Secciones del Documento:\n"
            });
        }
        piece.push_str(&block.render());
        pieces.push(piece);
    }

    let mut out = String::new();
    let mut used = 0usize;
    for piece in pieces {
        let len = piece.chars().count();
        if used + len > budget {
            let room = budget.saturating_sub(used);
            out.extend(piece.chars().take(room));
            return (out, true);
        }
        out.push_str(&piece);
        used += len;
    }
    (out, false)
}

/// Describes the most recent SQL query found in the history's answers, and
/// how it relates to the query before it when the two overlap.
pub fn sql_context(history: &[Turn]) -> Option<String> {
    let mut queries = history
        .iter()
        .flat_map(|t| extract_sql_queries(&t.answer))
        .rev();
    let latest = analyze_query(&queries.next()?);
    let mut out = describe_query(&latest);

    if let Some(previous) = queries.next().map(|q| analyze_query(&q)) {
        let relation = relate_queries(&previous, &latest);
        if relation.is_related() {
            out.push_str(&describe_relation(&relation));
        }
    }
    out.push_str("Si la pregunta pide modificarla, parte de esta consulta y explica los cambios.");
    Some(out)
}

fn describe_query(info: &QueryInfo) -> String {
    let mut out = format!(
        "Contexto SQL: la consulta más reciente de esta conversación es\n```sql\n{}\n```\n",
        info.raw
    );
    for (label, values) in [
        ("Tablas", &info.tables),
        ("Joins", &info.joins),
        ("Columnas", &info.columns),
        ("Filtros", &info.filters),
        ("Agrupación", &info.group_by),
        ("Orden", &info.order_by),
        ("Agregaciones", &info.aggregations),
    ] {
        if !values.is_empty() {
            out.push_str(&format!("- {}: {}\n", label, values.join(", ")));
        }
    }
    out
}

fn describe_relation(relation: &QueryRelation) -> String {
    let mut out = String::from("Relación con la consulta anterior:\n");
    if !relation.common_tables.is_empty() {
        out.push_str(&format!(
            "- Tablas en común: {}\n",
            relation.common_tables.join(", ")
        ));
    }
    if !relation.common_columns.is_empty() {
        out.push_str(&format!(
            "- Columnas en común: {}\n",
            relation.common_columns.join(", ")
        ));
    }
    if let Some(kind) = relation.kind {
        out.push_str(&format!("- Sugerencia: {}\n", kind.suggestion()));
    }
    out
}

/// Assembles the full message list for `question` answered from `selection`.
pub fn compose(
    selection: &Selection<'_>,
    history: &[Turn],
    question: &str,
    excerpt_max_chars: usize,
) -> Vec<ChatMessage> {
    let document = selection.document;
    let excerpt = format_document(document, &selection.matched_terms, excerpt_max_chars);

    let mut messages = Vec::with_capacity(3 + history.len() * 2);
    messages.push(ChatMessage::system(system_prompt(document)));
    messages.push(ChatMessage::system(format!(
        "Extracto de la documentación:\n\n{}",
        excerpt
    )));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }

    let user = match sql_context(history) {
        Some(ctx) => format!("{}\n\n{}", question, ctx),
        None => question.to_string(),
    };
    messages.push(ChatMessage::user(user));
    messages
}
