//! Template rendering.
//!
//! Rendering walks a template's parsed segments with a set of validated
//! parameters and produces PostgreSQL SQL with `$n` placeholders plus the
//! bind values in position order. Dynamic GROUP BY / ORDER BY clauses then
//! replace the template's own clause, or are inserted where the clause
//! belongs when the template has none.
//!
//! Caller values only ever reach [`RenderResult::binds`], never the SQL text.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::clause::{GroupClause, SortClause};
use crate::params::{ParamValue, ValidatedParams};
use crate::template::{Segment, Template, TemplateError};

/// Bind values keyed by parameter name. Position `i` binds to `$i+1`.
pub type Binds = IndexMap<String, ParamValue>;

/// Output of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub sql: String,
    pub binds: Binds,
    pub render_duration: Duration,
}

/// Render a template.
pub fn render(
    template: &Template,
    params: &ValidatedParams,
    group: Option<&GroupClause>,
    sort: Option<&SortClause>,
) -> Result<RenderResult, TemplateError> {
    let started = Instant::now();

    let mut raw = String::with_capacity(template.text().len());
    let mut binds = Binds::new();
    emit(template.segments(), params, &mut raw, &mut binds)?;

    let mut sql = normalize_whitespace(&raw);
    if let Some(group) = group {
        sql = apply_clause(&sql, "GROUP", &group.to_sql(), GROUP_INSERT_BEFORE);
    }
    if let Some(sort) = sort {
        sql = apply_clause(&sql, "ORDER", &sort.to_sql(), ORDER_INSERT_BEFORE);
    }

    Ok(RenderResult {
        sql,
        binds,
        render_duration: started.elapsed(),
    })
}

fn emit(
    segments: &[Segment],
    params: &ValidatedParams,
    out: &mut String,
    binds: &mut Binds,
) -> Result<(), TemplateError> {
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Param(name) => {
                let position = match binds.get_index_of(name) {
                    Some(index) => index + 1,
                    None => {
                        let value = params
                            .get(name)
                            .ok_or_else(|| TemplateError::UnboundPlaceholder(name.clone()))?;
                        binds.insert(name.clone(), value.clone());
                        binds.len()
                    }
                };
                out.push('$');
                out.push_str(&position.to_string());
            }
            Segment::Block {
                guard,
                then,
                otherwise,
            } => {
                let branch = if params.is_truthy(guard) { then } else { otherwise };
                emit(branch, params, out, binds)?;
            }
        }
    }
    Ok(())
}

/// Trim every line, drop blank lines and join the rest with single spaces.
///
/// `--` line comments are removed first so joining lines cannot comment out
/// the rest of the statement.
pub fn normalize_whitespace(sql: &str) -> String {
    sql.lines()
        .map(|line| strip_line_comment(line).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_line_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'-' && bytes.get(i + 1) == Some(&b'-') => return &line[..i],
            None => {}
        }
    }
    line
}

// ============================================================================
// Clause override
// ============================================================================

/// Keywords that end a GROUP BY / ORDER BY clause.
const CLAUSE_END: &[&str] = &[
    "HAVING", "WINDOW", "ORDER BY", "LIMIT", "OFFSET", "FETCH", "FOR", "UNION", "INTERSECT",
    "EXCEPT",
];

/// Where a GROUP BY goes when the template has none.
const GROUP_INSERT_BEFORE: &[&str] = &[
    "HAVING", "WINDOW", "ORDER BY", "LIMIT", "OFFSET", "FETCH", "FOR",
];

/// Where an ORDER BY goes when the template has none.
const ORDER_INSERT_BEFORE: &[&str] = &["LIMIT", "OFFSET", "FETCH", "FOR"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Semicolon,
}

/// A top-level token: outside parentheses and quotes.
#[derive(Debug)]
struct Token {
    start: usize,
    kind: TokenKind,
}

impl Token {
    fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w == word)
    }
}

fn top_level_tokens(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => tokens.push(Token {
                start: i,
                kind: TokenKind::Semicolon,
            }),
            _ if b.is_ascii_alphanumeric() || b == b'_' => {
                let end = i + bytes[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
                    .count();
                // Qualified names (`t.limit`) and numbers are never keywords.
                let qualified = i > 0 && matches!(bytes[i - 1], b'.' | b'$');
                if depth == 0 && !qualified && !b.is_ascii_digit() {
                    tokens.push(Token {
                        start: i,
                        kind: TokenKind::Word(sql[i..end].to_ascii_uppercase()),
                    });
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    tokens
}

fn is_boundary(tokens: &[Token], index: usize, keywords: &[&str]) -> bool {
    let word = match &tokens[index].kind {
        TokenKind::Semicolon => return true,
        TokenKind::Word(word) => word.as_str(),
    };
    keywords.iter().any(|kw| match kw.split_once(' ') {
        Some((first, second)) => {
            word == first && tokens.get(index + 1).is_some_and(|t| t.is_word(second))
        }
        None => word == *kw,
    })
}

/// Replace the top-level `<keyword> BY ...` clause with `clause`, or insert
/// `clause` before the first of `insert_before` when there is none.
fn apply_clause(sql: &str, keyword: &str, clause: &str, insert_before: &[&str]) -> String {
    let tokens = top_level_tokens(sql);
    let first_boundary = |from: usize, keywords: &[&str]| {
        (from..tokens.len())
            .find(|&i| is_boundary(&tokens, i, keywords))
            .map_or(sql.len(), |i| tokens[i].start)
    };

    let existing = tokens
        .windows(2)
        .position(|pair| pair[0].is_word(keyword) && pair[1].is_word("BY"));

    let (start, end) = match existing {
        Some(i) => (tokens[i].start, first_boundary(i + 2, CLAUSE_END)),
        None => {
            let at = first_boundary(0, insert_before);
            (at, at)
        }
    };

    splice(sql, start, end, clause)
}

fn splice(sql: &str, start: usize, end: usize, clause: &str) -> String {
    let before = sql[..start].trim_end();
    let after = sql[end..].trim_start();

    let mut out = String::with_capacity(before.len() + clause.len() + after.len() + 2);
    out.push_str(before);
    if !before.is_empty() {
        out.push(' ');
    }
    out.push_str(clause);
    if !after.is_empty() {
        if !after.starts_with(';') {
            out.push(' ');
        }
        out.push_str(after);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{SortParam, build_group_clause, build_sort_clause};
    use crate::params::{ParamType, validate};
    use crate::registry::TemplateRegistry;
    use crate::template::TemplateDefinition;
    use serde_json::{Value, json};

    fn params(template: &Template, value: Value) -> ValidatedParams {
        validate(template, value.as_object().unwrap()).unwrap()
    }

    fn builtin(biz_type: &str) -> std::sync::Arc<Template> {
        TemplateRegistry::builtin().get(biz_type).unwrap()
    }

    #[test]
    fn renders_customer_analysis_without_optional_block() {
        let template = builtin("customer_analysis");
        let p = params(
            &template,
            json!({ "customer_id": 42, "start_date": "2023-01-01", "end_date": "2023-12-31" }),
        );
        let result = render(&template, &p, None, None).unwrap();

        assert_eq!(
            result.sql,
            "SELECT o.order_id, p.product_name, o.amount, o.purchase_date FROM orders o \
             JOIN products p ON o.product_id = p.product_id \
             WHERE o.customer_id = $1 AND o.purchase_date BETWEEN $2 AND $3 \
             ORDER BY o.purchase_date DESC"
        );
        let names: Vec<_> = result.binds.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["customer_id", "start_date", "end_date"]);
        assert_eq!(result.binds["customer_id"], ParamValue::Integer(42));
    }

    #[test]
    fn placeholders_after_commented_apostrophe_are_bound() {
        let template = Template::new(
            "orders_by_status",
            TemplateDefinition::new(
                "SELECT * FROM orders\n\
                 WHERE customer_id = :customer_id -- the customer's id\n\
                 AND status = :status",
            )
            .with_required(["customer_id", "status"])
            .with_type("customer_id", ParamType::Integer),
        )
        .unwrap();
        let p = params(&template, json!({ "customer_id": 7, "status": "open" }));
        let result = render(&template, &p, None, None).unwrap();

        assert_eq!(
            result.sql,
            "SELECT * FROM orders WHERE customer_id = $1 AND status = $2"
        );
        assert_eq!(result.binds["status"], ParamValue::Text("open".into()));
    }

    #[test]
    fn optional_block_included_when_truthy() {
        let template = builtin("customer_analysis");
        let p = params(
            &template,
            json!({
                "customer_id": 42,
                "start_date": "2023-01-01",
                "end_date": "2023-12-31",
                "product_category": "Electronics'; DROP TABLE orders; --"
            }),
        );
        let result = render(&template, &p, None, None).unwrap();

        assert!(result.sql.contains("AND p.category = $4"));
        assert!(!result.sql.contains("Electronics"));
        assert!(!result.sql.contains("DROP"));
        assert_eq!(result.binds.len(), 4);
    }

    #[test]
    fn empty_optional_value_omits_block() {
        let template = builtin("customer_analysis");
        let p = params(
            &template,
            json!({
                "customer_id": 1,
                "start_date": "2023-01-01",
                "end_date": "2023-12-31",
                "product_category": ""
            }),
        );
        let result = render(&template, &p, None, None).unwrap();
        assert!(!result.sql.contains("p.category"));
        assert_eq!(result.binds.len(), 3);
    }

    #[test]
    fn repeated_placeholder_reuses_position() {
        let template = Template::new(
            "t",
            TemplateDefinition::new("SELECT * FROM t WHERE a = :x OR b = :x OR c = :y")
                .with_required(["x", "y"])
                .with_type("x", ParamType::Integer),
        )
        .unwrap();
        let p = params(&template, json!({ "x": 1, "y": "z" }));
        let result = render(&template, &p, None, None).unwrap();
        assert_eq!(result.sql, "SELECT * FROM t WHERE a = $1 OR b = $1 OR c = $2");
        assert_eq!(result.binds.len(), 2);
    }

    #[test]
    fn else_branch_rendered_when_guard_absent() {
        let template = builtin("inventory_status");
        let p = params(&template, json!({}));
        let result = render(&template, &p, None, None).unwrap();
        assert!(result.sql.contains("WHERE 1=1"));
        assert!(result.sql.ends_with("ORDER BY p.product_name"));

        let p = params(&template, json!({ "low_stock_only": true, "sort_by_stock": "true" }));
        let result = render(&template, &p, None, None).unwrap();
        assert!(result.sql.contains("WHERE i.quantity_in_stock <= i.reorder_level"));
        assert!(result.sql.ends_with("ORDER BY i.quantity_in_stock ASC"));
    }

    #[test]
    fn unbound_placeholder_is_a_template_error() {
        let template = Template::new(
            "t",
            TemplateDefinition::new("SELECT * FROM t WHERE a = :a").with_optional(["a"]),
        )
        .unwrap();
        let err = render(&template, &ValidatedParams::default(), None, None).unwrap_err();
        assert_eq!(err, TemplateError::UnboundPlaceholder("a".into()));
    }

    #[test]
    fn group_override_replaces_template_group_by() {
        let template = builtin("product_performance");
        let p = params(
            &template,
            json!({ "start_date": "2023-01-01", "end_date": "2023-12-31", "limit": 5 }),
        );
        let group = build_group_clause(Some("tenant_id,status")).unwrap().unwrap();
        let result = render(&template, &p, Some(&group), None).unwrap();

        assert!(result.sql.contains(
            "BETWEEN $1 AND $2 GROUP BY tenant_id, status ORDER BY total_revenue DESC LIMIT $3"
        ));
        assert!(!result.sql.contains("p.product_id ORDER"));
        assert_eq!(result.sql.matches("GROUP BY").count(), 1);
    }

    #[test]
    fn group_override_stops_at_having() {
        let template = builtin("customer_segmentation");
        let p = params(
            &template,
            json!({ "start_date": "2023-01-01", "end_date": "2023-12-31", "min_orders": 3 }),
        );
        let group = build_group_clause(Some("c.region")).unwrap().unwrap();
        let result = render(&template, &p, Some(&group), None).unwrap();
        assert!(result.sql.contains(
            "GROUP BY c.region HAVING COUNT(o.order_id) >= $3 ORDER BY total_spent DESC"
        ));
    }

    #[test]
    fn sort_override_replaces_template_order_by() {
        let template = builtin("product_performance");
        let p = params(
            &template,
            json!({ "start_date": "2023-01-01", "end_date": "2023-12-31", "limit": 10 }),
        );
        let sort = build_sort_clause(&[
            SortParam::new("order_count", Some("desc")),
            SortParam::new("p.product_name", None),
        ])
        .unwrap()
        .unwrap();
        let result = render(&template, &p, None, Some(&sort)).unwrap();
        assert!(result.sql.ends_with(
            "GROUP BY p.product_id ORDER BY order_count DESC, p.product_name ASC LIMIT $3"
        ));
    }

    #[test]
    fn clauses_inserted_when_absent() {
        let template = Template::new(
            "t",
            TemplateDefinition::new(
                "SELECT status, COUNT(*) FROM orders\nWHERE tenant = :tenant\nLIMIT 10;",
            )
            .with_required(["tenant"]),
        )
        .unwrap();
        let p = params(&template, json!({ "tenant": "acme" }));
        let group = build_group_clause(Some("status")).unwrap().unwrap();
        let sort = build_sort_clause(&[SortParam::new("count(*)", Some("desc"))])
            .unwrap()
            .unwrap();
        let result = render(&template, &p, Some(&group), Some(&sort)).unwrap();
        assert_eq!(
            result.sql,
            "SELECT status, COUNT(*) FROM orders WHERE tenant = $1 \
             GROUP BY status ORDER BY COUNT(*) DESC LIMIT 10;"
        );
    }

    #[test]
    fn nested_clauses_are_left_alone() {
        let template = Template::new(
            "t",
            TemplateDefinition::new(
                "SELECT a, ROW_NUMBER() OVER (ORDER BY b) AS rn, 'ORDER BY x' AS s \
                 FROM (SELECT a, b FROM t GROUP BY a, b) q",
            ),
        )
        .unwrap();
        let sort = build_sort_clause(&[SortParam::new("a", None)]).unwrap().unwrap();
        let result = render(&template, &ValidatedParams::default(), None, Some(&sort)).unwrap();
        assert!(result.sql.contains("OVER (ORDER BY b)"));
        assert!(result.sql.contains("'ORDER BY x'"));
        assert!(result.sql.contains("GROUP BY a, b) q ORDER BY a ASC"));
    }

    #[test]
    fn qualified_keyword_names_are_not_boundaries() {
        let template = Template::new(
            "t",
            TemplateDefinition::new("SELECT t.limit FROM t ORDER BY t.limit"),
        )
        .unwrap();
        let sort = build_sort_clause(&[SortParam::new("id", Some("desc"))]).unwrap().unwrap();
        let result = render(&template, &ValidatedParams::default(), None, Some(&sort)).unwrap();
        assert_eq!(result.sql, "SELECT t.limit FROM t ORDER BY id DESC");
    }

    #[test]
    fn line_comments_do_not_swallow_following_lines() {
        let normalized = normalize_whitespace("SELECT 1 -- one\n  , '--not a comment'\n\n FROM t");
        assert_eq!(normalized, "SELECT 1 , '--not a comment' FROM t");
    }
}
