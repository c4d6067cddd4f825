//! Immutable SQL SELECT builder
//!
//! Provides a fluent API for building parameterized SELECT statements. Values
//! are never interpolated into the SQL text; they are bound to `$n`
//! placeholders in the exact order the placeholders are emitted.
//!
//! Every builder method consumes the receiver and returns a new value, and the
//! builder is `Clone`, so a common base query can be branched freely:
//!
//! ```
//! use rust_query_context::prelude::*;
//!
//! let base = QueryBuilder::new("posts").where_eq("user_id", 7);
//! let published = base.clone().where_eq("status", "published");
//! let drafts = base.where_eq("status", "draft");
//!
//! let (sql, params) = published.build().unwrap();
//! assert_eq!(sql, "SELECT * FROM posts WHERE user_id = $1 AND status = $2");
//! assert_eq!(params.len(), 2);
//! assert_ne!(drafts.build().unwrap().1, params);
//! ```

use super::condition::{
    render_nodes, Condition, ConditionNode, Connector, Operator, SqlWriter, WhereClause,
};
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use std::fmt;
use std::str::FromStr;

/// Sort direction for ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

impl FromStr for OrderDirection {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            _ => Err(DatabaseError::configuration(format!(
                "Unsupported sort direction '{s}'"
            ))),
        }
    }
}

/// One entry of the SELECT list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectField {
    expression: String,
    alias: Option<String>,
}

impl SelectField {
    /// Plain expression without alias
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            alias: None,
        }
    }

    /// Expression rendered as `expression AS alias`
    pub fn aliased(expression: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            alias: Some(alias.into()),
        }
    }

    /// Parse `"expr"` or `"expr AS alias"`; the last top-level `AS` wins
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match split_alias(text) {
            Some((expression, alias)) => Self::aliased(expression, alias),
            None => Self::new(text),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {}", self.expression, alias),
            None => self.expression.clone(),
        }
    }
}

fn split_alias(text: &str) -> Option<(&str, &str)> {
    let upper = text.to_ascii_uppercase();
    let pos = upper.rfind(" AS ")?;
    let expression = text[..pos].trim();
    let alias = text[pos + 4..].trim();
    // an AS inside parentheses belongs to the expression, e.g. CAST(x AS int)
    let depth: i32 = expression
        .chars()
        .map(|c| match c {
            '(' => 1,
            ')' => -1,
            _ => 0,
        })
        .sum();
    if depth != 0 || expression.is_empty() || !is_column_reference(alias) {
        return None;
    }
    Some((expression, alias))
}

impl From<&str> for SelectField {
    fn from(text: &str) -> Self {
        SelectField::parse(text)
    }
}

impl From<String> for SelectField {
    fn from(text: String) -> Self {
        SelectField::parse(&text)
    }
}

impl From<(&str, &str)> for SelectField {
    fn from((expression, alias): (&str, &str)) -> Self {
        SelectField::aliased(expression, alias)
    }
}

/// True for `name` or dotted `schema.table.column` identifiers
fn is_column_reference(field: &str) -> bool {
    !field.is_empty()
        && field.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// True for aggregate-style calls such as `COUNT(*)` or `SUM(o.total)`
fn is_function_call(field: &str) -> bool {
    let Some(open) = field.find('(') else {
        return false;
    };
    if !field.ends_with(')') || !is_column_reference(field[..open].trim_end()) {
        return false;
    }

    let mut depth = 0i32;
    for c in field[open..].chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '*' | ',' | ' ') => {}
            _ => return false,
        }
    }
    depth == 0
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    schema: Option<String>,
    fields: Vec<SelectField>,
    conditions: Vec<ConditionNode>,
    group_by: Vec<String>,
    having: Vec<ConditionNode>,
    allow_having_without_group_by: bool,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    /// First invalid call, reported by `build()`
    error: Option<String>,
}

impl QueryBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use rust_query_context::core::query_builder::QueryBuilder;
    ///
    /// let sql = QueryBuilder::new("users")
    ///     .select(["id", "name", "email"])
    ///     .to_sql()
    ///     .unwrap();
    /// assert_eq!(sql, "SELECT id, name, email FROM users");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            fields: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            allow_having_without_group_by: false,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            error: None,
        }
    }

    /// Qualify the table with a schema
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Replace the SELECT list
    ///
    /// Accepts plain expressions, `"expr AS alias"` strings or
    /// `(expr, alias)` tuples. Aliases become resolvable in `having`.
    #[must_use]
    pub fn select<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<SelectField>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Append one entry to the SELECT list
    #[must_use]
    pub fn add_select(mut self, field: impl Into<SelectField>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Add GROUP BY fields
    #[must_use]
    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add an AND-connected HAVING condition
    ///
    /// `field` may name a select alias, which is emitted as-is.
    #[must_use]
    pub fn having(self, field: &str, operator: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_having(Connector::And, field, operator, value.into())
    }

    /// Add an OR-connected HAVING condition
    #[must_use]
    pub fn or_having(self, field: &str, operator: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_having(Connector::Or, field, operator, value.into())
    }

    /// Permit HAVING without GROUP BY (a warning is still logged)
    #[must_use]
    pub fn allow_having_without_group_by(mut self) -> Self {
        self.allow_having_without_group_by = true;
        self
    }

    fn push_having(
        mut self,
        connector: Connector,
        field: &str,
        operator: &str,
        value: DatabaseValue,
    ) -> Self {
        match operator.parse::<Operator>() {
            Ok(operator) => {
                self.having.push(ConditionNode {
                    connector,
                    condition: Condition::Simple {
                        field: field.trim().to_string(),
                        operator,
                        value,
                    },
                });
                self
            }
            Err(e) => self.push_error(format!("{e} in HAVING for field '{field}'")),
        }
    }

    /// Add ORDER BY ASC
    #[must_use]
    pub fn order_by(self, field: &str) -> Self {
        self.order_by_direction(field, OrderDirection::Asc)
    }

    /// Add ORDER BY ASC
    #[must_use]
    pub fn order_by_asc(self, field: &str) -> Self {
        self.order_by_direction(field, OrderDirection::Asc)
    }

    /// Add ORDER BY DESC
    #[must_use]
    pub fn order_by_desc(self, field: &str) -> Self {
        self.order_by_direction(field, OrderDirection::Desc)
    }

    /// Add ORDER BY with an explicit direction
    #[must_use]
    pub fn order_by_direction(mut self, field: &str, direction: OrderDirection) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    /// Set LIMIT; negative values are reported by `build()`
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        match u64::try_from(limit) {
            Ok(n) => {
                self.limit = Some(n);
                self
            }
            Err(_) => self.push_error(format!("LIMIT must be non-negative, got {limit}")),
        }
    }

    /// Set OFFSET; negative values are reported by `build()`
    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        match u64::try_from(offset) {
            Ok(n) => {
                self.offset = Some(n);
                self
            }
            Err(_) => self.push_error(format!("OFFSET must be non-negative, got {offset}")),
        }
    }

    /// Set LIMIT and OFFSET for a 1-based page
    #[must_use]
    pub fn paginate(mut self, page: i64, per_page: i64) -> Self {
        if page < 1 {
            return self.push_error("Page number must be 1 or greater".to_string());
        }
        if per_page < 1 {
            return self.push_error("Per page count must be 1 or greater".to_string());
        }
        // page and per_page are both >= 1 here
        let per_page = per_page as u64;
        match (page as u64 - 1).checked_mul(per_page) {
            Some(offset) => {
                self.limit = Some(per_page);
                self.offset = Some(offset);
                self
            }
            None => self.push_error(format!("Page {page} is out of range")),
        }
    }

    /// Target table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Current LIMIT, if set
    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Current OFFSET, if set
    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// True when a WHERE clause would be emitted
    pub fn has_conditions(&self) -> bool {
        self.conditions.iter().any(|n| !n.condition.is_empty())
    }

    /// Compile into SQL text and the ordered parameter list
    pub fn build(&self) -> Result<(String, Vec<DatabaseValue>)> {
        if let Some(message) = &self.error {
            return Err(DatabaseError::configuration(message.clone()));
        }

        if !self.having.is_empty() && self.group_by.is_empty() {
            tracing::warn!(table = %self.table, "HAVING used without GROUP BY");
            if !self.allow_having_without_group_by {
                return Err(DatabaseError::configuration(
                    "HAVING requires GROUP BY; call allow_having_without_group_by() if intended",
                ));
            }
        }

        let mut out = SqlWriter::new();

        out.push_str("SELECT ");
        if self.fields.is_empty() {
            out.push_str("*");
        } else {
            let fields: Vec<String> = self.fields.iter().map(SelectField::render).collect();
            out.push_str(&fields.join(", "));
        }

        out.push_str(" FROM ");
        if let Some(schema) = &self.schema {
            out.push_str(schema);
            out.push_str(".");
        }
        out.push_str(&self.table);

        if self.has_conditions() {
            out.push_str(" WHERE ");
            render_nodes(&self.conditions, &mut out, &|field: &str| Ok(field.to_string()))?;
        }

        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            out.push_str(&self.group_by.join(", "));
        }

        if !self.having.is_empty() {
            out.push_str(" HAVING ");
            render_nodes(&self.having, &mut out, &|field: &str| {
                self.resolve_having_field(field)
            })?;
        }

        if !self.order_by.is_empty() {
            let clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(field, dir)| format!("{} {}", field, dir.as_sql()))
                .collect();
            out.push_str(" ORDER BY ");
            out.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = self.offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(out.finish())
    }

    /// SQL text only, with placeholders left unsubstituted
    pub fn to_sql(&self) -> Result<String> {
        self.build().map(|(sql, _)| sql)
    }

    fn resolve_having_field(&self, field: &str) -> Result<String> {
        let known = self
            .fields
            .iter()
            .any(|f| f.alias() == Some(field) || f.expression() == field)
            || self.group_by.iter().any(|g| g == field);

        if known || is_column_reference(field) || is_function_call(field) {
            Ok(field.to_string())
        } else {
            Err(DatabaseError::build(format!(
                "HAVING field '{field}' is neither a select alias nor a column reference"
            )))
        }
    }
}

impl WhereClause for QueryBuilder {
    fn push_condition(mut self, connector: Connector, condition: Condition) -> Self {
        self.conditions.push(ConditionNode {
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

impl fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.build() {
            Ok((sql, params)) => {
                let params: Vec<String> = params.iter().map(ToString::to_string).collect();
                write!(f, "Query: {}\nParams: [{}]", sql, params.join(", "))
            }
            Err(e) => write!(f, "Query: <invalid: {e}>"),
        }
    }
}
