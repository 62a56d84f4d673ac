//! SQL expressions for query building.
//!
//! This module provides the filter expression tree used in WHERE clauses.
//! Expressions never inline values: every literal becomes a positional `?`
//! parameter, and every column name is resolved to a validated, quoted
//! reference at build time.

use miniorm_core::{Error, Result, Value, quote_ident, quote_qualified};

use crate::clause::{OrderBy, OrderDirection};

/// Maps a (possibly table-qualified) column reference to SQL text.
///
/// The select planner supplies one that knows which table of a joined or
/// unioned query holds each column.
pub type ColumnResolver<'a> = dyn Fn(Option<&str>, &str) -> Result<String> + 'a;

/// A SQL expression that can be used in WHERE and ORDER BY.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, bound as a parameter
    Literal(Value),

    /// Binary comparison (e.g., a = b, a > b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// Conjunction; empty is true
    And(Vec<Expr>),

    /// Disjunction; empty is false
    Or(Vec<Expr>),

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / NOT LIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },

    /// Constant predicate such as `1 = 0`
    Constant(&'static str),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Conjunction of every expression, flattening nested ANDs.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut parts = Vec::new();
        for e in exprs {
            match e {
                Expr::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        if parts.len() == 1 {
            parts.pop().unwrap_or(Expr::And(Vec::new()))
        } else {
            Expr::And(parts)
        }
    }

    /// Disjunction of every expression, flattening nested ORs.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut parts = Vec::new();
        for e in exprs {
            match e {
                Expr::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        if parts.len() == 1 {
            parts.pop().unwrap_or(Expr::Or(Vec::new()))
        } else {
            Expr::Or(parts)
        }
    }

    // ==================== Comparison Operators ====================

    fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Equal to (=). Comparing with NULL yields `IS NULL`.
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_null(),
            other => self.binary(BinaryOp::Eq, other),
        }
    }

    /// Not equal to (<>). Comparing with NULL yields `IS NOT NULL`.
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_not_null(),
            other => self.binary(BinaryOp::Ne, other),
        }
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other.into())
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other.into())
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other.into())
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other.into())
    }

    // ==================== Logical Operators ====================

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        Expr::all([self, other.into()])
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        Expr::any([self, other.into()])
    }

    /// Logical NOT
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== Pattern Matching ====================

    /// LIKE pattern match
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: false,
        }
    }

    /// NOT LIKE pattern match
    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
            case_insensitive: false,
        }
    }

    /// Case-insensitive LIKE, rendered as `LOWER(x) LIKE LOWER(?)`.
    pub fn ilike(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: true,
        }
    }

    // ==================== IN Expressions ====================

    /// IN list of values
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::Constant("1 = 0");
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN list of values
    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::Constant("1 = 1");
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    // ==================== BETWEEN ====================

    /// BETWEEN low AND high
    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    /// NOT BETWEEN low AND high
    pub fn not_between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: true,
        }
    }

    // ==================== Ordering ====================

    /// Create an ascending ORDER BY entry.
    pub fn asc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Asc)
    }

    /// Create a descending ORDER BY entry.
    pub fn desc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Desc)
    }

    // ==================== SQL Generation ====================

    /// Build SQL, quoting column names as written.
    pub fn build(&self, params: &mut Vec<Value>) -> Result<String> {
        self.build_with(&default_resolver, params)
    }

    /// Build SQL, mapping column references through `resolve`.
    pub fn build_with(&self, resolve: &ColumnResolver<'_>, params: &mut Vec<Value>) -> Result<String> {
        match self {
            Expr::Column { table, name } => resolve(table.as_deref(), name),

            Expr::Literal(value) => {
                params.push(value.clone());
                Ok("?".to_string())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build_with(resolve, params)?;
                let right_sql = right.build_with(resolve, params)?;
                Ok(format!("{left_sql} {} {right_sql}", op.as_str()))
            }

            Expr::Not(expr) => {
                let expr_sql = expr.build_with(resolve, params)?;
                Ok(format!("NOT ({expr_sql})"))
            }

            Expr::And(parts) => {
                if parts.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                let sqls = parts
                    .iter()
                    .map(|p| p.build_with(resolve, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(sqls.join(" AND "))
            }

            Expr::Or(parts) => {
                if parts.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let sqls = parts
                    .iter()
                    .map(|p| p.build_with(resolve, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", sqls.join(" OR ")))
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build_with(resolve, params)?;
                let value_sqls = values
                    .iter()
                    .map(|v| v.build_with(resolve, params))
                    .collect::<Result<Vec<_>>>()?;
                let not_str = if *negated { "NOT " } else { "" };
                Ok(format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", ")))
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr_sql = expr.build_with(resolve, params)?;
                let low_sql = low.build_with(resolve, params)?;
                let high_sql = high.build_with(resolve, params)?;
                let not_str = if *negated { "NOT " } else { "" };
                Ok(format!("{expr_sql} {not_str}BETWEEN {low_sql} AND {high_sql}"))
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build_with(resolve, params)?;
                let not_str = if *negated { " NOT" } else { "" };
                Ok(format!("{expr_sql} IS{not_str} NULL"))
            }

            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let expr_sql = expr.build_with(resolve, params)?;
                params.push(Value::Text(pattern.clone()));
                let not_str = if *negated { "NOT " } else { "" };
                if *case_insensitive {
                    Ok(format!("LOWER({expr_sql}) {not_str}LIKE LOWER(?)"))
                } else {
                    Ok(format!("{expr_sql} {not_str}LIKE ?"))
                }
            }

            Expr::Constant(sql) => Ok((*sql).to_string()),
        }
    }

    /// Column names referenced anywhere in the expression.
    pub fn columns(&self) -> Vec<(Option<&str>, &str)> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<(Option<&'a str>, &'a str)>) {
        match self {
            Expr::Column { table, name } => out.push((table.as_deref(), name)),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => {
                expr.collect_columns(out);
            }
            Expr::And(parts) | Expr::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            Expr::In { expr, values, .. } => {
                expr.collect_columns(out);
                for v in values {
                    v.collect_columns(out);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::Literal(_) | Expr::Constant(_) => {}
        }
    }
}

fn default_resolver(table: Option<&str>, name: &str) -> Result<String> {
    match table {
        Some(t) => quote_qualified(t, name).map_err(Error::from),
        None => quote_ident(name).map_err(Error::from),
    }
}

// ==================== Conversions ====================

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&Value> for Expr {
    fn from(v: &Value) -> Self {
        Expr::Literal(v.clone())
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}

// ==================== Tests ====================
