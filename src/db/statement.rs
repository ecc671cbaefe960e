use crate::db::Database;
use crate::error::LivedbError;
use crate::query::{Expr, Order, Query};
use crate::row::Row;
use crate::types::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
enum SqlOperand {
    Literal(Value),
    Placeholder(usize),
}

/// Parse-time predicate: the shape of a WHERE clause before placeholder
/// resolution.
#[derive(Debug, Clone, PartialEq)]
enum SqlExpr {
    Cmp {
        column: String,
        op: CmpOp,
        operand: SqlOperand,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Box<SqlExpr>, Box<SqlExpr>),
    Or(Box<SqlExpr>, Box<SqlExpr>),
    Not(Box<SqlExpr>),
}

impl SqlExpr {
    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            SqlExpr::Cmp { column, .. } | SqlExpr::IsNull { column, .. } => out.push(column),
            SqlExpr::Not(inner) => inner.collect_columns(out),
            SqlExpr::And(left, right) | SqlExpr::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    fn resolve(&self, bindings: &[Value]) -> Expr {
        fn operand(op: &SqlOperand, bindings: &[Value]) -> Value {
            match op {
                SqlOperand::Literal(value) => value.clone(),
                SqlOperand::Placeholder(index) => bindings[*index].clone(),
            }
        }

        match self {
            SqlExpr::Cmp {
                column,
                op,
                operand: o,
            } => {
                let value = operand(o, bindings);
                let column = column.clone();
                match op {
                    CmpOp::Eq => Expr::Eq(column, value),
                    CmpOp::Ne => Expr::Ne(column, value),
                    CmpOp::Lt => Expr::Lt(column, value),
                    CmpOp::Lte => Expr::Lte(column, value),
                    CmpOp::Gt => Expr::Gt(column, value),
                    CmpOp::Gte => Expr::Gte(column, value),
                }
            }
            SqlExpr::IsNull { column, negated } => {
                if *negated {
                    Expr::IsNotNull(column.clone())
                } else {
                    Expr::IsNull(column.clone())
                }
            }
            SqlExpr::And(left, right) => {
                Expr::And(Box::new(left.resolve(bindings)), Box::new(right.resolve(bindings)))
            }
            SqlExpr::Or(left, right) => {
                Expr::Or(Box::new(left.resolve(bindings)), Box::new(right.resolve(bindings)))
            }
            SqlExpr::Not(inner) => Expr::Not(Box::new(inner.resolve(bindings))),
        }
    }
}

#[derive(Debug, Clone)]
enum PredicateRepr {
    Parsed(SqlExpr),
    Built(Expr),
}

/// A prepared `SELECT`. Owns its bindings; released with the fetch that uses
/// it.
#[derive(Debug, Clone)]
pub struct SelectStatement {
    table: String,
    projection: Option<Vec<String>>,
    predicate: Option<PredicateRepr>,
    order_by: Vec<(String, Order)>,
    limit: Option<usize>,
    placeholders: usize,
    bindings: Vec<Value>,
}

impl SelectStatement {
    pub(crate) fn parse(sql: &str) -> Result<Self, LivedbError> {
        let tokens = tokenize(sql)?;
        Parser::new(tokens).parse_select()
    }

    pub(crate) fn from_query(query: &Query, db: &Database) -> Result<Self, LivedbError> {
        if let Some(predicate) = &query.predicate {
            predicate.validate_depth()?;
        }
        let statement = Self {
            table: query.table.clone(),
            projection: if query.select.is_empty() {
                None
            } else {
                Some(query.select.clone())
            },
            predicate: query.predicate.clone().map(PredicateRepr::Built),
            order_by: query.order_by.clone(),
            limit: query.limit,
            placeholders: 0,
            bindings: Vec::new(),
        };
        statement.validate(db)?;
        Ok(statement)
    }

    /// Number of `?` placeholders in the statement.
    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    /// Binds positional arguments, validating the placeholder arity.
    pub fn bind(&mut self, arguments: Vec<Value>) -> Result<(), LivedbError> {
        if arguments.len() != self.placeholders {
            return Err(LivedbError::Configuration(format!(
                "statement expects {} argument(s), got {}",
                self.placeholders,
                arguments.len()
            )));
        }
        self.bindings = arguments;
        Ok(())
    }

    /// The tables this statement reads.
    pub fn source_tables(&self) -> HashSet<String> {
        HashSet::from([self.table.clone()])
    }

    pub(crate) fn validate(&self, db: &Database) -> Result<(), LivedbError> {
        let schema = db.schema(&self.table)?;
        let mut referenced: Vec<&str> = Vec::new();
        if let Some(projection) = &self.projection {
            referenced.extend(projection.iter().map(String::as_str));
        }
        match &self.predicate {
            Some(PredicateRepr::Parsed(expr)) => expr.collect_columns(&mut referenced),
            Some(PredicateRepr::Built(expr)) => expr.collect_columns(&mut referenced),
            None => {}
        }
        referenced.extend(self.order_by.iter().map(|(column, _)| column.as_str()));
        for column in referenced {
            if schema.column(column).is_none() {
                return Err(LivedbError::UnknownColumn {
                    table: self.table.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolved_predicate(&self) -> Result<Option<Expr>, LivedbError> {
        match &self.predicate {
            None => Ok(None),
            Some(PredicateRepr::Built(expr)) => Ok(Some(expr.clone())),
            Some(PredicateRepr::Parsed(expr)) => {
                if self.bindings.len() != self.placeholders {
                    return Err(LivedbError::Configuration(format!(
                        "statement has {} unbound placeholder(s)",
                        self.placeholders - self.bindings.len()
                    )));
                }
                Ok(Some(expr.resolve(&self.bindings)))
            }
        }
    }

    /// Runs the statement, returning owned rows that survive the cursor.
    pub fn fetch(&self, db: &Database) -> Result<Vec<Row>, LivedbError> {
        let store = db.table(&self.table)?;
        let predicate = self.resolved_predicate()?;

        let mut rows: Vec<Row> = store
            .rows
            .values()
            .filter(|row| predicate.as_ref().is_none_or(|p| p.eval(row)))
            .cloned()
            .collect();

        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for (column, order) in &self.order_by {
                    let ordering = a.get(column).cmp(&b.get(column));
                    let ordering = match order {
                        Order::Asc => ordering,
                        Order::Desc => ordering.reverse(),
                    };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        if let Some(projection) = &self.projection {
            let header: Arc<[String]> = projection.clone().into();
            rows = rows
                .into_iter()
                .map(|row| {
                    let values = projection
                        .iter()
                        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                        .collect();
                    Row::from_parts(Arc::clone(&header), values)
                })
                .collect();
        }

        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Comma,
    LParen,
    RParen,
    Star,
    Placeholder,
    Op(CmpOp),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, LivedbError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut number = String::new();
                if c == '-' {
                    number.push(c);
                    chars.next();
                    if !chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                        return Err(LivedbError::Configuration(
                            "expected digits after '-'".into(),
                        ));
                    }
                }
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        number.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    Token::Float(number.parse().map_err(|_| {
                        LivedbError::Configuration(format!("invalid number literal '{number}'"))
                    })?)
                } else {
                    Token::Int(number.parse().map_err(|_| {
                        LivedbError::Configuration(format!("invalid number literal '{number}'"))
                    })?)
                };
                tokens.push(token);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // '' is an escaped quote inside the literal
                            if chars.peek() == Some(&'\'') {
                                text.push('\'');
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        Some(c) => text.push(c),
                        None => {
                            return Err(LivedbError::Configuration(
                                "unterminated string literal".into(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '?' => {
                chars.next();
                tokens.push(Token::Placeholder);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(LivedbError::Configuration("expected '=' after '!'".into()));
                }
                tokens.push(Token::Op(CmpOp::Ne));
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Op(CmpOp::Lte));
                    }
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Op(CmpOp::Ne));
                    }
                    _ => tokens.push(Token::Op(CmpOp::Lt)),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Gte));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            other => {
                return Err(LivedbError::Configuration(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    placeholders: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            placeholders: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), LivedbError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(LivedbError::Configuration(format!(
                "expected {keyword}, got {:?}",
                self.peek()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, LivedbError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(LivedbError::Configuration(format!(
                "expected identifier, got {other:?}"
            ))),
        }
    }

    fn parse_select(mut self) -> Result<SelectStatement, LivedbError> {
        self.expect_keyword("SELECT")?;

        let projection = if matches!(self.peek(), Some(Token::Star)) {
            self.next();
            None
        } else {
            let mut columns = vec![self.expect_ident()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.next();
                columns.push(self.expect_ident()?);
            }
            Some(columns)
        };

        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.parse_or()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let column = self.expect_ident()?;
                let order = if self.eat_keyword("DESC") {
                    Order::Desc
                } else {
                    self.eat_keyword("ASC");
                    Order::Asc
                };
                order_by.push((column, order));
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.next();
                } else {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            match self.next() {
                Some(Token::Int(n)) if n >= 0 => Some(n as usize),
                other => {
                    return Err(LivedbError::Configuration(format!(
                        "expected non-negative LIMIT, got {other:?}"
                    )));
                }
            }
        } else {
            None
        };

        if let Some(trailing) = self.peek() {
            return Err(LivedbError::Configuration(format!(
                "unexpected trailing token {trailing:?}"
            )));
        }

        Ok(SelectStatement {
            table,
            projection,
            predicate: predicate.map(PredicateRepr::Parsed),
            order_by,
            limit,
            placeholders: self.placeholders,
            bindings: Vec::new(),
        })
    }

    fn parse_or(&mut self) -> Result<SqlExpr, LivedbError> {
        let mut expr = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            expr = SqlExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<SqlExpr, LivedbError> {
        let mut expr = self.parse_not()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_not()?;
            expr = SqlExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<SqlExpr, LivedbError> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(SqlExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<SqlExpr, LivedbError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.next();
            let expr = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => return Ok(expr),
                other => {
                    return Err(LivedbError::Configuration(format!(
                        "expected ')', got {other:?}"
                    )));
                }
            }
        }

        let column = self.expect_ident()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(SqlExpr::IsNull { column, negated });
        }

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(LivedbError::Configuration(format!(
                    "expected comparison operator, got {other:?}"
                )));
            }
        };

        let operand = match self.next() {
            Some(Token::Placeholder) => {
                let index = self.placeholders;
                self.placeholders += 1;
                SqlOperand::Placeholder(index)
            }
            Some(Token::Int(n)) => SqlOperand::Literal(Value::Integer(n)),
            Some(Token::Float(x)) => SqlOperand::Literal(Value::Float(x)),
            Some(Token::Str(s)) => SqlOperand::Literal(Value::Text(s.into())),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NULL") => {
                SqlOperand::Literal(Value::Null)
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("TRUE") => {
                SqlOperand::Literal(Value::Boolean(true))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("FALSE") => {
                SqlOperand::Literal(Value::Boolean(false))
            }
            other => {
                return Err(LivedbError::Configuration(format!(
                    "expected literal or placeholder, got {other:?}"
                )));
            }
        };

        Ok(SqlExpr::Cmp {
            column,
            op,
            operand,
        })
    }
}
