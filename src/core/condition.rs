//! Condition tree for WHERE and HAVING predicates
//!
//! Predicates are stored as an ordered list of [`ConditionNode`]s. Each node
//! carries the connector that attaches it to its previous sibling, so the tree
//! is rendered strictly left to right; explicit grouping only comes from
//! [`Condition::Group`].

use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use std::str::FromStr;

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (!=)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// LIKE pattern matching
    Like,
    /// NOT LIKE pattern matching
    NotLike,
    /// Case-insensitive ILIKE pattern matching
    ILike,
    /// Case-insensitive NOT ILIKE pattern matching
    NotILike,
}

impl Operator {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotILike => "NOT ILIKE",
        }
    }
}

impl FromStr for Operator {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "LIKE" => Ok(Operator::Like),
            "NOT LIKE" => Ok(Operator::NotLike),
            "ILIKE" => Ok(Operator::ILike),
            "NOT ILIKE" => Ok(Operator::NotILike),
            _ => Err(DatabaseError::configuration(format!(
                "Unsupported operator '{s}'"
            ))),
        }
    }
}

/// How a node attaches to the previous sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// AND
    And,
    /// OR
    Or,
}

impl Connector {
    fn as_sql(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// One predicate or a parenthesized group of predicates
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field <op> $n`, or `IS [NOT] NULL` when comparing a null with `=`/`!=`
    Simple {
        field: String,
        operator: Operator,
        value: DatabaseValue,
    },
    /// `field IN ($n, ...)`; an empty list never matches
    In {
        field: String,
        values: Vec<DatabaseValue>,
    },
    /// `field NOT IN ($n, ...)`; an empty list always matches
    NotIn {
        field: String,
        values: Vec<DatabaseValue>,
    },
    /// Parenthesized sub-sequence
    Group(Vec<ConditionNode>),
}

impl Condition {
    /// A group without any non-empty child renders to nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Group(children) => children.iter().all(|c| c.condition.is_empty()),
            _ => false,
        }
    }
}

/// A condition together with its connector
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionNode {
    pub connector: Connector,
    pub condition: Condition,
}

/// Accumulates SQL text and the positional parameters bound to it
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<DatabaseValue>,
}

impl SqlWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Bind a value and emit its `$n` placeholder
    pub(crate) fn push_param(&mut self, value: DatabaseValue) {
        self.params.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    pub(crate) fn finish(self) -> (String, Vec<DatabaseValue>) {
        (self.sql, self.params)
    }
}

/// Render a node sequence in pre-order, resolving every field reference
/// through `resolve` (identity for WHERE, alias lookup for HAVING).
pub(crate) fn render_nodes<F>(nodes: &[ConditionNode], out: &mut SqlWriter, resolve: &F) -> Result<()>
where
    F: Fn(&str) -> Result<String>,
{
    let mut first = true;
    for node in nodes {
        if node.condition.is_empty() {
            continue;
        }
        if !first {
            out.push_str(" ");
            out.push_str(node.connector.as_sql());
            out.push_str(" ");
        }
        first = false;
        render_condition(&node.condition, out, resolve)?;
    }
    Ok(())
}

fn render_condition<F>(condition: &Condition, out: &mut SqlWriter, resolve: &F) -> Result<()>
where
    F: Fn(&str) -> Result<String>,
{
    match condition {
        Condition::Simple {
            field,
            operator,
            value,
        } => {
            out.push_str(&resolve(field.as_str())?);
            match (operator, value.is_null()) {
                (Operator::Eq, true) => out.push_str(" IS NULL"),
                (Operator::Ne, true) => out.push_str(" IS NOT NULL"),
                _ => {
                    out.push_str(" ");
                    out.push_str(operator.as_sql());
                    out.push_str(" ");
                    out.push_param(value.clone());
                }
            }
        }
        Condition::In { field, values } => render_in(field, values, false, out, resolve)?,
        Condition::NotIn { field, values } => render_in(field, values, true, out, resolve)?,
        Condition::Group(children) => {
            out.push_str("(");
            render_nodes(children, out, resolve)?;
            out.push_str(")");
        }
    }
    Ok(())
}

fn render_in<F>(
    field: &str,
    values: &[DatabaseValue],
    negated: bool,
    out: &mut SqlWriter,
    resolve: &F,
) -> Result<()>
where
    F: Fn(&str) -> Result<String>,
{
    if values.is_empty() {
        // constant predicate, nothing bound
        out.push_str(if negated { "1 = 1" } else { "1 = 0" });
        return Ok(());
    }

    out.push_str(&resolve(field)?);
    out.push_str(if negated { " NOT IN (" } else { " IN (" });
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_param(value.clone());
    }
    out.push_str(")");
    Ok(())
}

/// Predicate-building operations shared by [`ConditionBuilder`] and
/// [`QueryBuilder`](super::query_builder::QueryBuilder).
///
/// Implementors only provide how a node is appended and how an invalid call
/// is recorded; invalid input never panics and is reported by `build()`.
pub trait WhereClause: Sized {
    /// Append a node to the WHERE sequence
    fn push_condition(self, connector: Connector, condition: Condition) -> Self;

    /// Record a configuration problem to surface at build time
    fn push_error(self, message: String) -> Self;

    /// `field = value`
    #[must_use]
    fn where_eq(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_simple(Connector::And, field, Operator::Eq, value.into())
    }

    /// `field <operator> value` with the operator given as SQL text
    #[must_use]
    fn where_op(self, field: &str, operator: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_parsed(Connector::And, field, operator, value.into())
    }

    /// `OR field = value`
    #[must_use]
    fn or_where_eq(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_simple(Connector::Or, field, Operator::Eq, value.into())
    }

    /// `OR field <operator> value`
    #[must_use]
    fn or_where_op(self, field: &str, operator: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_parsed(Connector::Or, field, operator, value.into())
    }

    /// `field <operator> value` with a typed operator
    #[must_use]
    fn where_cmp(self, field: &str, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.push_simple(Connector::And, field, operator, value.into())
    }

    /// `OR field <operator> value` with a typed operator
    #[must_use]
    fn or_where_cmp(
        self,
        field: &str,
        operator: Operator,
        value: impl Into<DatabaseValue>,
    ) -> Self {
        self.push_simple(Connector::Or, field, operator, value.into())
    }

    /// Add a WHERE column != value condition
    #[must_use]
    fn where_ne(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cmp(field, Operator::Ne, value)
    }

    /// Add a WHERE column > value condition
    #[must_use]
    fn where_gt(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cmp(field, Operator::Gt, value)
    }

    /// Add a WHERE column >= value condition
    #[must_use]
    fn where_ge(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cmp(field, Operator::Ge, value)
    }

    /// Add a WHERE column < value condition
    #[must_use]
    fn where_lt(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cmp(field, Operator::Lt, value)
    }

    /// Add a WHERE column <= value condition
    #[must_use]
    fn where_le(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_cmp(field, Operator::Le, value)
    }

    /// Add a WHERE column LIKE pattern condition
    #[must_use]
    fn where_like(self, field: &str, pattern: &str) -> Self {
        self.where_cmp(field, Operator::Like, pattern)
    }

    /// Add a WHERE column IS NULL condition
    #[must_use]
    fn where_null(self, field: &str) -> Self {
        self.push_simple(Connector::And, field, Operator::Eq, DatabaseValue::Null)
    }

    /// Add a WHERE column IS NOT NULL condition
    #[must_use]
    fn where_not_null(self, field: &str) -> Self {
        self.push_simple(Connector::And, field, Operator::Ne, DatabaseValue::Null)
    }

    /// Add an OR column IS NULL condition
    #[must_use]
    fn or_where_null(self, field: &str) -> Self {
        self.push_simple(Connector::Or, field, Operator::Eq, DatabaseValue::Null)
    }

    /// Add an OR column IS NOT NULL condition
    #[must_use]
    fn or_where_not_null(self, field: &str) -> Self {
        self.push_simple(Connector::Or, field, Operator::Ne, DatabaseValue::Null)
    }

    /// Append several AND-connected `(field, operator, value)` conditions
    #[must_use]
    fn where_all<V>(self, conditions: &[(&str, &str, V)]) -> Self
    where
        V: Clone + Into<DatabaseValue>,
    {
        conditions.iter().fold(self, |acc, (field, op, value)| {
            acc.where_op(field, op, value.clone())
        })
    }

    /// Append several OR-connected `(field, operator, value)` conditions
    #[must_use]
    fn or_where_all<V>(self, conditions: &[(&str, &str, V)]) -> Self
    where
        V: Clone + Into<DatabaseValue>,
    {
        conditions.iter().fold(self, |acc, (field, op, value)| {
            acc.or_where_op(field, op, value.clone())
        })
    }

    /// `field IN (...)`; an empty list compiles to a never-true predicate
    #[must_use]
    fn where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(
            Connector::And,
            Condition::In {
                field: field.to_string(),
                values,
            },
        )
    }

    /// `field NOT IN (...)`; an empty list compiles to an always-true predicate
    #[must_use]
    fn where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(
            Connector::And,
            Condition::NotIn {
                field: field.to_string(),
                values,
            },
        )
    }

    /// `OR field IN (...)`
    #[must_use]
    fn or_where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(
            Connector::Or,
            Condition::In {
                field: field.to_string(),
                values,
            },
        )
    }

    /// `OR field NOT IN (...)`
    #[must_use]
    fn or_where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(
            Connector::Or,
            Condition::NotIn {
                field: field.to_string(),
                values,
            },
        )
    }

    /// `AND (...)` built by `f` on a fresh sub-builder; dropped when empty
    #[must_use]
    fn where_group<F>(self, f: F) -> Self
    where
        F: FnOnce(ConditionBuilder) -> ConditionBuilder,
    {
        self.push_group(Connector::And, f)
    }

    /// `OR (...)` built by `f` on a fresh sub-builder; dropped when empty
    #[must_use]
    fn or_where_group<F>(self, f: F) -> Self
    where
        F: FnOnce(ConditionBuilder) -> ConditionBuilder,
    {
        self.push_group(Connector::Or, f)
    }

    #[doc(hidden)]
    fn push_simple(
        self,
        connector: Connector,
        field: &str,
        operator: Operator,
        value: DatabaseValue,
    ) -> Self {
        self.push_condition(
            connector,
            Condition::Simple {
                field: field.to_string(),
                operator,
                value,
            },
        )
    }

    #[doc(hidden)]
    fn push_parsed(
        self,
        connector: Connector,
        field: &str,
        operator: &str,
        value: DatabaseValue,
    ) -> Self {
        match operator.parse::<Operator>() {
            Ok(op) => self.push_simple(connector, field, op, value),
            Err(e) => self.push_error(format!("{e} for field '{field}'")),
        }
    }

    #[doc(hidden)]
    fn push_group<F>(self, connector: Connector, f: F) -> Self
    where
        F: FnOnce(ConditionBuilder) -> ConditionBuilder,
    {
        let group = f(ConditionBuilder::new());
        let (nodes, error) = group.into_parts();
        let this = match error {
            Some(message) => self.push_error(message),
            None => self,
        };
        let condition = Condition::Group(nodes);
        if condition.is_empty() {
            return this;
        }
        this.push_condition(connector, condition)
    }
}

/// Condition-only builder handed to `where_group` callbacks
#[derive(Debug, Clone, Default)]
pub struct ConditionBuilder {
    nodes: Vec<ConditionNode>,
    error: Option<String>,
}

impl ConditionBuilder {
    /// Create an empty condition sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated nodes
    pub fn nodes(&self) -> &[ConditionNode] {
        &self.nodes
    }

    /// True when no node would render
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| n.condition.is_empty())
    }

    /// First recorded configuration problem, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn into_parts(self) -> (Vec<ConditionNode>, Option<String>) {
        (self.nodes, self.error)
    }

    /// Render the sequence on its own, numbering placeholders from `$1`
    pub fn build(&self) -> Result<(String, Vec<DatabaseValue>)> {
        if let Some(message) = &self.error {
            return Err(DatabaseError::configuration(message.clone()));
        }
        let mut out = SqlWriter::new();
        render_nodes(&self.nodes, &mut out, &|field: &str| Ok(field.to_string()))?;
        Ok(out.finish())
    }
}

impl WhereClause for ConditionBuilder {
    fn push_condition(mut self, connector: Connector, condition: Condition) -> Self {
        self.nodes.push(ConditionNode {
            connector,
            condition,
        });
        self
    }

    fn push_error(mut self, message: String) -> Self {
        self.error.get_or_insert(message);
        self
    }
}
