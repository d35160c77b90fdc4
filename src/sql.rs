//! SQL found in assistant answers.
//!
//! Answers often carry a query the user wants to refine in the next turn
//! ("now group it by country"). [`extract_sql_queries`] pulls the queries out
//! of an answer and [`analyze_query`] breaks one down into its clauses so the
//! follow-up prompt can describe what the previous query did.
//!
//! The analysis is a best-effort clause split, not a SQL parser: subqueries,
//! CTEs and quoted keywords are not understood.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

static FENCED_SQL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*(.*?)\s*```").expect("fenced sql pattern"));
static FENCED_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```\s*(SELECT\b.*?;)\s*```").expect("fenced select pattern")
});
static INLINE_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)`(SELECT\b[^`]*?;)`").expect("inline select pattern"));
static BARE_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bSELECT\s+.+?\s+FROM\s+.+?;").expect("bare select pattern")
});

static SELECT_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bSELECT\s+(.*?)\s+FROM\b").expect("select list pattern"));
static FROM_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\bFROM\s+(.*?)\s*(?:\b(?:LEFT|RIGHT|INNER|FULL|CROSS|OUTER)\b|\bJOIN\b|\bWHERE\b|\bGROUP\s+BY\b|\bHAVING\b|\bORDER\s+BY\b|\bLIMIT\b|;|$)",
    )
    .expect("from clause pattern")
});
static JOIN_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJOIN\s+([\w.]+)").expect("join pattern"));
static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(.*?)\s*(?:\bGROUP\s+BY\b|\bHAVING\b|\bORDER\s+BY\b|\bLIMIT\b|;|$)")
        .expect("where clause pattern")
});
static GROUP_BY_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bGROUP\s+BY\s+(.*?)\s*(?:\bHAVING\b|\bORDER\s+BY\b|\bLIMIT\b|;|$)")
        .expect("group by pattern")
});
static ORDER_BY_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bORDER\s+BY\s+(.*?)\s*(?:\bLIMIT\b|;|$)").expect("order by pattern")
});
static AND_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+AND\s+").expect("and pattern"));
static ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+AS\s+\w+$").expect("alias pattern"));
static AGGREGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(\s*(?:DISTINCT\s+)?[\w.*]+\s*\)")
        .expect("aggregation pattern")
});

/// The clauses of a single `SELECT` statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryInfo {
    pub raw: String,
    pub tables: Vec<String>,
    pub joins: Vec<String>,
    pub columns: Vec<String>,
    pub filters: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub aggregations: Vec<String>,
}

/// Finds SQL queries in free text, in order of appearance per kind:
/// fenced ```sql blocks, fenced blocks starting with `SELECT`, inline
/// `` `SELECT ...;` `` spans, then bare `SELECT ... FROM ...;` statements.
///
/// Each span is consumed by the first pattern that matches it, so a query
/// is never reported twice.
pub fn extract_sql_queries(text: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut remaining = text.to_string();

    for pattern in [&*FENCED_SQL, &*FENCED_SELECT, &*INLINE_SELECT] {
        for caps in pattern.captures_iter(&remaining) {
            if let Some(m) = caps.get(1) {
                push_query(&mut queries, m.as_str());
            }
        }
        remaining = pattern.replace_all(&remaining, " ").into_owned();
    }
    for m in BARE_SELECT.find_iter(&remaining) {
        push_query(&mut queries, m.as_str());
    }

    queries
}

fn push_query(queries: &mut Vec<String>, query: &str) {
    let query = query.trim();
    if !query.is_empty() && !queries.iter().any(|q| q == query) {
        queries.push(query.to_string());
    }
}

/// Splits a query into its main clauses.
pub fn analyze_query(query: &str) -> QueryInfo {
    let mut info = QueryInfo {
        raw: query.to_string(),
        ..Default::default()
    };

    if let Some(list) = capture(&SELECT_LIST, query) {
        info.columns = split_top_level(list)
            .into_iter()
            .map(|c| ALIAS.replace(&c, "").trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }

    if let Some(from) = capture(&FROM_CLAUSE, query) {
        info.tables = from
            .split(',')
            .filter_map(|t| t.split_whitespace().next())
            .map(|t| t.to_string())
            .collect();
    }
    info.joins = JOIN_TABLE
        .captures_iter(query)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if let Some(filters) = capture(&WHERE_CLAUSE, query) {
        info.filters = AND_SPLIT
            .split(filters)
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
    }
    if let Some(group_by) = capture(&GROUP_BY_CLAUSE, query) {
        info.group_by = split_top_level(group_by);
    }
    if let Some(order_by) = capture(&ORDER_BY_CLAUSE, query) {
        info.order_by = split_top_level(order_by);
    }

    info.aggregations = AGGREGATION
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .collect();

    info
}

/// How two queries from the same conversation overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    SameTablesDifferentColumns,
    SubsetTables,
    RelatedAggregations,
}

impl RelationKind {
    /// A modification hint for the model, in Spanish.
    pub fn suggestion(self) -> &'static str {
        match self {
            RelationKind::SameTablesDifferentColumns => {
                "Se puede modificar la consulta para incluir las columnas de ambas consultas."
            }
            RelationKind::SubsetTables => {
                "Se puede hacer un JOIN entre las tablas para obtener resultados relacionados."
            }
            RelationKind::RelatedAggregations => {
                "Se pueden combinar las agregaciones para obtener un análisis más completo."
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryRelation {
    pub common_tables: Vec<String>,
    pub common_columns: Vec<String>,
    pub kind: Option<RelationKind>,
}

impl QueryRelation {
    pub fn is_related(&self) -> bool {
        !self.common_tables.is_empty() || !self.common_columns.is_empty()
    }
}

/// Compares two analyzed queries. Tables include joined tables; table and
/// column names compare case-insensitively.
pub fn relate_queries(a: &QueryInfo, b: &QueryInfo) -> QueryRelation {
    let touched_a: Vec<String> = a.tables.iter().chain(&a.joins).cloned().collect();
    let tables_a = lowered(&touched_a);
    let tables_b = lowered(&b.tables.iter().chain(&b.joins).cloned().collect::<Vec<_>>());
    let columns_b = lowered(&b.columns);

    let common_tables: Vec<String> = touched_a
        .iter()
        .filter(|t| tables_b.contains(&t.to_lowercase()))
        .cloned()
        .collect();
    let common_columns: Vec<String> = a
        .columns
        .iter()
        .filter(|c| columns_b.contains(&c.to_lowercase()))
        .cloned()
        .collect();

    let subset = |x: &[String], y: &[String]| x.iter().all(|t| y.contains(t));
    let kind = if tables_a == tables_b && lowered(&a.columns) != columns_b {
        Some(RelationKind::SameTablesDifferentColumns)
    } else if !tables_a.is_empty()
        && !tables_b.is_empty()
        && (subset(&tables_a, &tables_b) || subset(&tables_b, &tables_a))
    {
        Some(RelationKind::SubsetTables)
    } else if !common_tables.is_empty()
        && (!a.aggregations.is_empty() || !b.aggregations.is_empty())
    {
        Some(RelationKind::RelatedAggregations)
    } else {
        None
    };

    QueryRelation {
        common_tables,
        common_columns,
        kind,
    }
}

fn lowered(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

fn capture<'q>(pattern: &Regex, query: &'q str) -> Option<&'q str> {
    pattern
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Splits on commas that are not inside parentheses.
fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_sql_block() {
        let text = "Puedes usar:\n```sql\nSELECT lead_id, stage\nFROM funnel_ventas\nWHERE stage = 'won';\n```\n[Fuente: ventas.docx]";
        let queries = extract_sql_queries(text);
        assert_eq!(
            queries,
            vec!["SELECT lead_id, stage\nFROM funnel_ventas\nWHERE stage = 'won';"]
        );
    }

    #[test]
    fn extracts_unlabelled_fence_and_inline_and_bare() {
        let text = "Primero:\n```\nSELECT a FROM t1;\n```\nLuego `SELECT b FROM t2;` y por ultimo SELECT c FROM t3 WHERE x = 1;";
        let queries = extract_sql_queries(text);
        assert_eq!(
            queries,
            vec![
                "SELECT a FROM t1;",
                "SELECT b FROM t2;",
                "SELECT c FROM t3 WHERE x = 1;"
            ]
        );
    }

    #[test]
    fn fenced_query_is_not_reported_twice() {
        let text = "```sql\nSELECT * FROM compras;\n```";
        assert_eq!(extract_sql_queries(text).len(), 1);
    }

    #[test]
    fn text_without_sql_yields_nothing() {
        assert!(extract_sql_queries("Selecciona el KPI de conversion de leads.").is_empty());
    }

    #[test]
    fn analyzes_clauses() {
        let q = "SELECT pais, COUNT(lead_id) AS leads, SUM(monto) FROM ventas.funnel f \
                 JOIN ventas.paises p ON f.pais_id = p.id \
                 WHERE etapa = 'cerrada' AND fecha >= '2024-01-01' \
                 GROUP BY pais ORDER BY leads DESC LIMIT 10;";
        let info = analyze_query(q);
        assert_eq!(info.columns, vec!["pais", "COUNT(lead_id)", "SUM(monto)"]);
        assert_eq!(info.tables, vec!["ventas.funnel"]);
        assert_eq!(info.joins, vec!["ventas.paises"]);
        assert_eq!(
            info.filters,
            vec!["etapa = 'cerrada'", "fecha >= '2024-01-01'"]
        );
        assert_eq!(info.group_by, vec!["pais"]);
        assert_eq!(info.order_by, vec!["leads DESC"]);
        assert_eq!(info.aggregations, vec!["COUNT(lead_id)", "SUM(monto)"]);
        assert_eq!(info.raw, q);
    }

    #[test]
    fn analyzes_star_and_multiple_tables() {
        let info = analyze_query("select * from compras, proveedores");
        assert_eq!(info.columns, vec!["*"]);
        assert_eq!(info.tables, vec!["compras", "proveedores"]);
        assert!(info.filters.is_empty());
        assert!(info.aggregations.is_empty());
    }

    #[test]
    fn relates_queries_over_the_same_table() {
        let a = analyze_query("SELECT lead_id, etapa FROM ventas.funnel;");
        let b = analyze_query("SELECT lead_id, fecha FROM VENTAS.FUNNEL WHERE etapa = 'won';");
        let rel = relate_queries(&a, &b);
        assert!(rel.is_related());
        assert_eq!(rel.common_tables, vec!["ventas.funnel"]);
        assert_eq!(rel.common_columns, vec!["lead_id"]);
        assert_eq!(rel.kind, Some(RelationKind::SameTablesDifferentColumns));
    }

    #[test]
    fn relates_subset_tables_and_aggregations() {
        let a = analyze_query("SELECT id FROM leads;");
        let b = analyze_query("SELECT l.id FROM leads l JOIN ventas v ON v.lead = l.id;");
        assert_eq!(relate_queries(&a, &b).kind, Some(RelationKind::SubsetTables));

        let c = analyze_query("SELECT COUNT(*) FROM leads, autos;");
        let d = analyze_query("SELECT id FROM leads, compras;");
        let rel = relate_queries(&c, &d);
        assert_eq!(rel.common_tables, vec!["leads"]);
        assert_eq!(rel.kind, Some(RelationKind::RelatedAggregations));
    }

    #[test]
    fn unrelated_queries_have_no_relation() {
        let a = analyze_query("SELECT id FROM leads;");
        let b = analyze_query("SELECT sku FROM inventario;");
        let rel = relate_queries(&a, &b);
        assert!(!rel.is_related());
        assert_eq!(rel.kind, None);
    }

    #[test]
    fn split_top_level_respects_parentheses() {
        assert_eq!(
            split_top_level("a, COALESCE(b, 0), c"),
            vec!["a", "COALESCE(b, 0)", "c"]
        );
    }
}
