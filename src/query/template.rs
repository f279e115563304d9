//! Query templates
//!
//! A query template is the text a cursor or a view is declared with. It is
//! parsed once, at definition time, into a small AST:
//!
//! ```text
//! SELECT <* | col [, col]*> FROM <table>
//!     [JOIN <table> ON <col> = <col>]
//!     [WHERE <cond> [AND <cond>]*]
//! ```
//!
//! Conditions compare two operands, each a column reference (optionally
//! qualified with its table), a literal, or a bind parameter `:name`.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::storage::Value;

/// Bind parameter values keyed by lower-case parameter name
pub type Bindings = HashMap<String, Value>;

/// A possibly qualified column reference
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
    Param(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub op: CompareOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<ColumnRef>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// A column of a row produced by a query, tagged with its source table
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub table: String,
    pub name: String,
}

/// Values of one row together with the columns they belong to
pub struct RowContext<'a> {
    pub columns: &'a [SourceColumn],
    pub values: &'a [Value],
}

impl RowContext<'_> {
    /// Resolve a column reference; unqualified names match the first column
    /// with that name
    pub fn lookup(&self, col: &ColumnRef) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| {
                c.name.eq_ignore_ascii_case(&col.column)
                    && col
                        .table
                        .as_ref()
                        .map_or(true, |t| c.table.eq_ignore_ascii_case(t))
            })
            .and_then(|idx| self.values.get(idx))
    }
}

/// A conjunction of conditions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// Parse the text that follows a WHERE keyword
    pub fn parse(text: &str) -> Result<Self> {
        let (_, conditions) = all_consuming(ws(conditions))(text)
            .map_err(|e| Error::QueryParse(format!("'{}': {}", text, e)))?;
        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Distinct bind parameter names in order of first appearance
    pub fn params(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cond in &self.conditions {
            for operand in [&cond.left, &cond.right] {
                if let Operand::Param(name) = operand {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }
        names
    }

    /// Evaluate against a row. Comparisons involving NULL are not satisfied.
    pub fn matches(&self, row: &RowContext<'_>, binds: &Bindings) -> Result<bool> {
        for cond in &self.conditions {
            let left = resolve(&cond.left, row, binds)?;
            let right = resolve(&cond.right, row, binds)?;
            match left.sql_compare(&right) {
                Some(ordering) if cond.op.holds(ordering) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Column references that do not name any of `columns`
    pub fn unknown_columns(&self, columns: &[SourceColumn]) -> Vec<String> {
        let nulls = vec![Value::Null; columns.len()];
        let shape = RowContext {
            columns,
            values: &nulls,
        };
        self.conditions
            .iter()
            .flat_map(|c| [&c.left, &c.right])
            .filter_map(|operand| match operand {
                Operand::Column(col) if shape.lookup(col).is_none() => Some(col.to_string()),
                _ => None,
            })
            .collect()
    }
}

fn resolve(operand: &Operand, row: &RowContext<'_>, binds: &Bindings) -> Result<Value> {
    match operand {
        Operand::Literal(v) => Ok(v.clone()),
        Operand::Param(name) => binds
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownBindParameter(name.clone())),
        Operand::Column(col) => row
            .lookup(col)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(col.to_string(), "query".to_string())),
    }
}

/// Parsed query template
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    text: String,
    pub projection: Projection,
    pub from: String,
    pub join: Option<Join>,
    pub predicate: Predicate,
}

impl QueryTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let (_, (projection, from, join, conditions)) = all_consuming(ws(select))(text)
            .map_err(|e| Error::QueryParse(format!("'{}': {}", text, e)))?;
        Ok(Self {
            text: text.trim().to_string(),
            projection,
            from,
            join,
            predicate: Predicate {
                conditions: conditions.unwrap_or_default(),
            },
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether each produced row maps to exactly one stored row
    pub fn has_single_target(&self) -> bool {
        self.join.is_none()
    }

    pub fn params(&self) -> Vec<String> {
        self.predicate.params()
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

// ========== Parsers ==========

type ParseResult<'a, O> = IResult<&'a str, O>;

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: FnMut(&'a str) -> ParseResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> ParseResult<'a, &'a str> {
    terminated(tag_no_case(kw), not(peek(take_while1(is_ident_char))))
}

fn identifier(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |s: &str| s.to_string(),
    )(input)
}

fn column_ref(input: &str) -> ParseResult<'_, ColumnRef> {
    map(
        pair(identifier, opt(preceded(char('.'), identifier))),
        |(first, second)| match second {
            Some(column) => ColumnRef {
                table: Some(first),
                column,
            },
            None => ColumnRef {
                table: None,
                column: first,
            },
        },
    )(input)
}

fn number(input: &str) -> ParseResult<'_, Value> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>().map(Value::Float).map_err(|e| e.to_string())
            } else {
                s.parse::<i64>().map(Value::Integer).map_err(|e| e.to_string())
            }
        },
    )(input)
}

fn literal(input: &str) -> ParseResult<'_, Value> {
    alt((
        value(Value::Boolean(true), keyword("TRUE")),
        value(Value::Boolean(false), keyword("FALSE")),
        value(Value::Null, keyword("NULL")),
        number,
        map(
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
            |s: &str| Value::Text(s.to_string()),
        ),
    ))(input)
}

fn operand(input: &str) -> ParseResult<'_, Operand> {
    alt((
        map(literal, Operand::Literal),
        map(preceded(char(':'), identifier), |name: String| {
            Operand::Param(name.to_lowercase())
        }),
        map(column_ref, Operand::Column),
    ))(input)
}

fn compare_op(input: &str) -> ParseResult<'_, CompareOp> {
    alt((
        value(CompareOp::LtEq, tag("<=")),
        value(CompareOp::GtEq, tag(">=")),
        value(CompareOp::NotEq, tag("<>")),
        value(CompareOp::NotEq, tag("!=")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))(input)
}

fn condition(input: &str) -> ParseResult<'_, Condition> {
    map(
        tuple((ws(operand), compare_op, ws(operand))),
        |(left, op, right)| Condition { left, op, right },
    )(input)
}

fn conditions(input: &str) -> ParseResult<'_, Vec<Condition>> {
    separated_list1(keyword("AND"), condition)(input)
}

fn projection(input: &str) -> ParseResult<'_, Projection> {
    alt((
        value(Projection::All, char('*')),
        map(
            separated_list1(ws(char(',')), column_ref),
            Projection::Columns,
        ),
    ))(input)
}

fn join_clause(input: &str) -> ParseResult<'_, Join> {
    map(
        tuple((
            keyword("JOIN"),
            ws(identifier),
            keyword("ON"),
            ws(separated_pair(column_ref, ws(char('=')), column_ref)),
        )),
        |(_, table, _, (left, right))| Join { table, left, right },
    )(input)
}

#[allow(clippy::type_complexity)]
fn select(
    input: &str,
) -> ParseResult<'_, (Projection, String, Option<Join>, Option<Vec<Condition>>)> {
    tuple((
        preceded(pair(keyword("SELECT"), multispace1), ws(projection)),
        preceded(pair(keyword("FROM"), multispace1), ws(identifier)),
        opt(join_clause),
        opt(preceded(keyword("WHERE"), conditions)),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emp_columns() -> Vec<SourceColumn> {
        ["id", "salary", "dept"]
            .iter()
            .map(|n| SourceColumn {
                table: "emp".to_string(),
                name: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_parse_parameterized_select() {
        let q = QueryTemplate::parse("SELECT * FROM emp WHERE salary > :min AND dept = 'R&D'")
            .unwrap();
        assert_eq!(q.projection, Projection::All);
        assert_eq!(q.from, "emp");
        assert!(q.has_single_target());
        assert_eq!(q.params(), vec!["min".to_string()]);
        assert_eq!(q.predicate.conditions().len(), 2);
        assert_eq!(q.predicate.conditions()[0].op, CompareOp::Gt);
    }

    #[test]
    fn test_parse_join_and_columns() {
        let q = QueryTemplate::parse(
            "select e.id, d.name from emp join dept on emp.dept = dept.id where d.id >= 10",
        )
        .unwrap();
        assert!(!q.has_single_target());
        let join = q.join.as_ref().unwrap();
        assert_eq!(join.table, "dept");
        assert_eq!(join.left.table.as_deref(), Some("emp"));
        match &q.projection {
            Projection::Columns(cols) => assert_eq!(cols.len(), 2),
            other => panic!("unexpected projection {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            QueryTemplate::parse("SELECT FROM emp"),
            Err(Error::QueryParse(_))
        ));
        assert!(QueryTemplate::parse("SELECT * FROM emp WHERE").is_err());
        assert!(QueryTemplate::parse("SELECT * FROMemp").is_err());
    }

    #[test]
    fn test_predicate_matching() {
        let pred = Predicate::parse("salary > :min AND dept <> 3").unwrap();
        let columns = emp_columns();
        let mut binds = Bindings::new();
        binds.insert("min".to_string(), Value::Integer(50000));

        let row = [Value::Integer(1), Value::Float(60000.0), Value::Integer(2)];
        let ctx = RowContext {
            columns: &columns,
            values: &row,
        };
        assert!(pred.matches(&ctx, &binds).unwrap());

        let row = [Value::Integer(2), Value::Null, Value::Integer(2)];
        let ctx = RowContext {
            columns: &columns,
            values: &row,
        };
        assert!(!pred.matches(&ctx, &binds).unwrap());

        assert!(matches!(
            pred.matches(&ctx, &Bindings::new()),
            Err(Error::UnknownBindParameter(p)) if p == "min"
        ));
    }

    #[test]
    fn test_unknown_columns() {
        let pred = Predicate::parse("bonus > 1 AND emp.salary < 2").unwrap();
        assert_eq!(pred.unknown_columns(&emp_columns()), vec!["bonus".to_string()]);
    }
}
