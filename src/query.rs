use crate::error::LivedbError;
use crate::row::Row;
use crate::types::Value;
use std::cmp::Ordering;

/// Maximum nesting depth for predicates to prevent stack overflow
const MAX_EXPR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn depth(&self) -> usize {
        match self {
            Expr::Eq(_, _)
            | Expr::Ne(_, _)
            | Expr::Lt(_, _)
            | Expr::Lte(_, _)
            | Expr::Gt(_, _)
            | Expr::Gte(_, _)
            | Expr::In(_, _)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_) => 1,
            Expr::Not(inner) => 1 + inner.depth(),
            Expr::And(left, right) | Expr::Or(left, right) => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn validate_depth(&self) -> Result<(), LivedbError> {
        let depth = self.depth();
        if depth > MAX_EXPR_DEPTH {
            return Err(LivedbError::Validation(format!(
                "expression depth {depth} exceeds maximum allowed depth of {MAX_EXPR_DEPTH}"
            )));
        }
        Ok(())
    }

    pub(crate) fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Eq(column, _)
            | Expr::Ne(column, _)
            | Expr::Lt(column, _)
            | Expr::Lte(column, _)
            | Expr::Gt(column, _)
            | Expr::Gte(column, _)
            | Expr::In(column, _)
            | Expr::IsNull(column)
            | Expr::IsNotNull(column) => out.push(column),
            Expr::Not(inner) => inner.collect_columns(out),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// Evaluates the predicate against a row. Comparisons involving `NULL`
    /// never match; `IS NULL` / `IS NOT NULL` are the only null tests.
    pub(crate) fn eval(&self, row: &Row) -> bool {
        fn compare(row: &Row, column: &str, target: &Value) -> Option<Ordering> {
            let value = row.get(column)?;
            if value.is_null() || target.is_null() {
                return None;
            }
            Some(value.cmp(target))
        }

        match self {
            Expr::Eq(column, target) => compare(row, column, target) == Some(Ordering::Equal),
            Expr::Ne(column, target) => {
                matches!(compare(row, column, target), Some(o) if o != Ordering::Equal)
            }
            Expr::Lt(column, target) => compare(row, column, target) == Some(Ordering::Less),
            Expr::Lte(column, target) => {
                matches!(compare(row, column, target), Some(o) if o != Ordering::Greater)
            }
            Expr::Gt(column, target) => compare(row, column, target) == Some(Ordering::Greater),
            Expr::Gte(column, target) => {
                matches!(compare(row, column, target), Some(o) if o != Ordering::Less)
            }
            Expr::In(column, candidates) => candidates
                .iter()
                .any(|target| compare(row, column, target) == Some(Ordering::Equal)),
            Expr::IsNull(column) => row.get(column).is_some_and(Value::is_null),
            Expr::IsNotNull(column) => row.get(column).is_some_and(|v| !v.is_null()),
            Expr::And(left, right) => left.eval(row) && right.eval(row),
            Expr::Or(left, right) => left.eval(row) || right.eval(row),
            Expr::Not(inner) => !inner.eval(row),
        }
    }
}

/// Builder-side description of a fetch, the SQL-free variant of a query
/// source. Prepares into the same statement a `SELECT` string would.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub select: Vec<String>,
    pub predicate: Option<Expr>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            select: Vec::new(),
            predicate: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds a predicate; successive calls are AND-combined.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Expr, Order, Query};
    use crate::row::Row;
    use crate::types::Value;

    fn row(id: i64, name: &str, score: Option<i64>) -> Row {
        Row::from_pairs([
            ("id", Value::Integer(id)),
            ("name", Value::Text(name.into())),
            ("score", score.map(Value::Integer).unwrap_or(Value::Null)),
        ])
    }

    #[test]
    fn comparisons_match_values() {
        let r = row(3, "carol", Some(40));
        assert!(Expr::Eq("id".into(), Value::Integer(3)).eval(&r));
        assert!(Expr::Ne("name".into(), Value::Text("dave".into())).eval(&r));
        assert!(Expr::Gt("score".into(), Value::Integer(39)).eval(&r));
        assert!(Expr::Lte("score".into(), Value::Integer(40)).eval(&r));
        assert!(!Expr::Lt("id".into(), Value::Integer(3)).eval(&r));
    }

    #[test]
    fn null_never_satisfies_comparisons() {
        let r = row(1, "a", None);
        assert!(!Expr::Eq("score".into(), Value::Integer(1)).eval(&r));
        assert!(!Expr::Ne("score".into(), Value::Integer(1)).eval(&r));
        assert!(Expr::IsNull("score".into()).eval(&r));
        assert!(!Expr::IsNotNull("score".into()).eval(&r));
    }

    #[test]
    fn boolean_combinators() {
        let r = row(2, "bob", Some(10));
        let matching = Expr::Eq("id".into(), Value::Integer(2))
            .and(Expr::Gt("score".into(), Value::Integer(5)));
        assert!(matching.eval(&r));
        let excluded = Expr::Eq("name".into(), Value::Text("zed".into()))
            .or(Expr::Lt("score".into(), Value::Integer(5)));
        assert!(!excluded.eval(&r));
        assert!(excluded.not().eval(&r));
    }

    #[test]
    fn in_matches_any_candidate() {
        let r = row(2, "bob", Some(10));
        let expr = Expr::In(
            "id".into(),
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
        );
        assert!(expr.eval(&r));
    }

    #[test]
    fn depth_validation_rejects_deep_nests() {
        let mut expr = Expr::IsNull("id".into());
        for _ in 0..40 {
            expr = expr.not();
        }
        assert!(expr.validate_depth().is_err());
        assert!(Expr::IsNull("id".into()).validate_depth().is_ok());
    }

    #[test]
    fn filter_combines_with_and() {
        let query = Query::table("players")
            .filter(Expr::Gt("score".into(), Value::Integer(5)))
            .filter(Expr::IsNotNull("name".into()))
            .order_by("score", Order::Desc)
            .limit(10);
        assert!(matches!(query.predicate, Some(Expr::And(_, _))));
        assert_eq!(query.order_by.len(), 1);
        assert_eq!(query.limit, Some(10));
    }
}
