//! Recursive-descent parser for predicates.
//!
//! Accepts a WHERE fragment (with or without the leading `WHERE`, optionally
//! followed by GROUP BY / HAVING / ORDER BY so those can be rejected later)
//! or a single `SELECT ... FROM ...` statement. Expressions use a Pratt
//! loop with SQL precedence, lowest to highest:
//!
//! ```text
//!   OR
//!   AND
//!   NOT (prefix)
//!   = <> LIKE IN BETWEEN IS
//!   < <= > >=
//!   + -
//!   * /
//!   ||
//!   - + (unary prefix)
//! ```

use crate::ast::{BinaryOp, Expr, Literal, OrderItem, Query, SelectItem, TableRef};
use crate::error::{PredicateError, PredicateResult};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

mod bp {
    pub const OR: (u8, u8) = (1, 2);
    pub const AND: (u8, u8) = (3, 4);
    pub const NOT_PREFIX: u8 = 5;
    pub const EQUALITY: (u8, u8) = (7, 8);
    pub const COMPARISON: (u8, u8) = (9, 10);
    pub const ADD: (u8, u8) = (15, 16);
    pub const MUL: (u8, u8) = (17, 18);
    pub const CONCAT: (u8, u8) = (19, 20);
    pub const UNARY: u8 = 23;
}

/// Deepest expression tree the parser builds. Counts nested sub-expressions
/// plus chained operators, so later tree walks stay shallow too.
pub const MAX_DEPTH: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(src: &str) -> Self {
        Self {
            tokens: Lexer::tokenize(src),
            pos: 0,
            depth: 0,
        }
    }

    /// Parse a complete predicate or SELECT statement.
    pub fn parse_query(src: &str) -> PredicateResult<Query> {
        let mut parser = Parser::new(src);
        let query = if parser.at(&TokenKind::Select) {
            parser.parse_select()?
        } else {
            parser.parse_fragment()?
        };
        parser.eat(&TokenKind::Semicolon);
        parser.expect_eof()?;
        Ok(query)
    }

    /// Parse a single expression spanning the whole input.
    pub fn parse_expression(src: &str) -> PredicateResult<Expr> {
        let mut parser = Parser::new(src);
        let expr = parser.parse_expr()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    // ── Statements ──────────────────────────────────────────────────

    fn parse_fragment(&mut self) -> PredicateResult<Query> {
        let mut query = Query::default();
        self.eat(&TokenKind::Where);
        if !self.at_clause_end() {
            query.where_clause = Some(self.parse_expr()?);
        }
        self.parse_trailing_clauses(&mut query)?;
        Ok(query)
    }

    fn parse_select(&mut self) -> PredicateResult<Query> {
        self.expect(&TokenKind::Select, "SELECT")?;
        let mut query = Query::default();
        if self.eat(&TokenKind::Distinct) {
            query.distinct = true;
        } else {
            self.eat(&TokenKind::All);
        }

        loop {
            if self.eat(&TokenKind::Star) {
                query.items.push(SelectItem::Wildcard);
            } else {
                let expr = self.parse_expr()?;
                let alias = self.parse_alias()?;
                query.items.push(SelectItem::Expr { expr, alias });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        self.expect(&TokenKind::From, "FROM")?;
        loop {
            let mut name = self.expect_ident()?;
            if self.eat(&TokenKind::Dot) {
                name = self.expect_ident()?;
            }
            let alias = self.parse_alias()?;
            query.from.push(TableRef { name, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        if self.eat(&TokenKind::Where) {
            query.where_clause = Some(self.parse_expr()?);
        }
        self.parse_trailing_clauses(&mut query)?;
        Ok(query)
    }

    fn parse_alias(&mut self) -> PredicateResult<Option<String>> {
        if self.eat(&TokenKind::As) {
            return self.expect_ident().map(Some);
        }
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            self.pos += 1;
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn parse_trailing_clauses(&mut self, query: &mut Query) -> PredicateResult<()> {
        if self.eat(&TokenKind::Group) {
            self.expect(&TokenKind::By, "BY")?;
            query.group_by = self.parse_expr_list()?;
        }
        if self.eat(&TokenKind::Having) {
            query.having = Some(self.parse_expr()?);
        }
        if self.eat(&TokenKind::Order) {
            self.expect(&TokenKind::By, "BY")?;
            loop {
                let expr = self.parse_expr()?;
                let descending = if self.eat(&TokenKind::Desc) {
                    true
                } else {
                    self.eat(&TokenKind::Asc);
                    false
                };
                query.order_by.push(OrderItem { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn parse_expr_list(&mut self) -> PredicateResult<Vec<Expr>> {
        let mut list = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            list.push(self.parse_expr()?);
        }
        Ok(list)
    }

    // ── Pratt core ──────────────────────────────────────────────────

    fn parse_expr(&mut self) -> PredicateResult<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> PredicateResult<Expr> {
        let entry = self.depth;
        let result = self.parse_expr_bp_inner(min_bp);
        self.depth = entry;
        result
    }

    fn parse_expr_bp_inner(&mut self, min_bp: u8) -> PredicateResult<Expr> {
        self.descend()?;
        let mut lhs = self.parse_prefix()?;
        while let Some((l_bp, r_bp)) = self.infix_bp() {
            if l_bp < min_bp {
                break;
            }
            // Each chained operator adds a level to the left-leaning tree.
            self.descend()?;
            lhs = self.parse_infix(lhs, r_bp)?;
        }
        Ok(lhs)
    }

    fn descend(&mut self) -> PredicateResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::Parse {
                message: "predicate nested too deeply".to_string(),
                offset: self.current_offset(),
            });
        }
        Ok(())
    }

    fn infix_bp(&self) -> Option<(u8, u8)> {
        match self.peek_kind() {
            TokenKind::Or => Some(bp::OR),
            TokenKind::And => Some(bp::AND),
            TokenKind::Eq
            | TokenKind::Ne
            | TokenKind::Like
            | TokenKind::In
            | TokenKind::Between
            | TokenKind::Is => Some(bp::EQUALITY),
            TokenKind::Not => match self.peek_nth(1) {
                TokenKind::Like | TokenKind::In | TokenKind::Between => Some(bp::EQUALITY),
                _ => None,
            },
            TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => Some(bp::COMPARISON),
            TokenKind::Plus | TokenKind::Minus => Some(bp::ADD),
            TokenKind::Star | TokenKind::Slash => Some(bp::MUL),
            TokenKind::Concat => Some(bp::CONCAT),
            _ => None,
        }
    }

    fn parse_prefix(&mut self) -> PredicateResult<Expr> {
        let tok = self.advance_token();
        match tok.kind {
            TokenKind::Integer(i) => Ok(Expr::Literal(Literal::Integer(i))),
            TokenKind::Real(r) => Ok(Expr::Literal(Literal::Real(r))),
            TokenKind::String(s) => Ok(Expr::Literal(Literal::String(s))),
            TokenKind::Null => Ok(Expr::Literal(Literal::Null)),
            TokenKind::Minus => {
                let operand = self.parse_expr_bp(bp::UNARY)?;
                Ok(match operand {
                    Expr::Literal(Literal::Integer(i)) => Expr::Literal(Literal::Integer(-i)),
                    Expr::Literal(Literal::Real(r)) => Expr::Literal(Literal::Real(-r)),
                    other => Expr::Negate(Box::new(other)),
                })
            }
            TokenKind::Plus => self.parse_expr_bp(bp::UNARY),
            TokenKind::Not => {
                let operand = self.parse_expr_bp(bp::NOT_PREFIX)?;
                Ok(Expr::Not(Box::new(operand)))
            }
            TokenKind::Exists => {
                self.expect(&TokenKind::LParen, "(")?;
                let query = self.parse_select()?;
                self.expect(&TokenKind::RParen, ")")?;
                Ok(Expr::Exists(Box::new(query)))
            }
            TokenKind::LParen => {
                if self.at(&TokenKind::Select) {
                    let query = self.parse_select()?;
                    self.expect(&TokenKind::RParen, ")")?;
                    Ok(Expr::Subquery(Box::new(query)))
                } else {
                    let inner = self.parse_expr()?;
                    self.expect(&TokenKind::RParen, ")")?;
                    Ok(inner)
                }
            }
            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::Dot) {
                    let column = self.expect_ident()?;
                    Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    })
                } else if self.at(&TokenKind::LParen) {
                    self.parse_function(name)
                } else {
                    Ok(Expr::Column { table: None, name })
                }
            }
            TokenKind::Error(message) => Err(PredicateError::Parse {
                message,
                offset: tok.offset,
            }),
            other => Err(PredicateError::Parse {
                message: format!("unexpected {}", other.describe()),
                offset: tok.offset,
            }),
        }
    }

    fn parse_function(&mut self, name: String) -> PredicateResult<Expr> {
        self.expect(&TokenKind::LParen, "(")?;
        if self.eat(&TokenKind::Star) {
            self.expect(&TokenKind::RParen, ")")?;
            return Ok(Expr::Function {
                name,
                args: Vec::new(),
                star: true,
            });
        }
        let args = if self.at(&TokenKind::RParen) {
            Vec::new()
        } else {
            self.eat(&TokenKind::Distinct);
            self.parse_expr_list()?
        };
        self.expect(&TokenKind::RParen, ")")?;
        Ok(Expr::Function {
            name,
            args,
            star: false,
        })
    }

    fn parse_infix(&mut self, lhs: Expr, r_bp: u8) -> PredicateResult<Expr> {
        let tok = self.advance_token();
        let op = match tok.kind {
            TokenKind::Or => BinaryOp::Or,
            TokenKind::And => BinaryOp::And,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Concat => BinaryOp::Concat,
            TokenKind::Is => {
                let negated = self.eat(&TokenKind::Not);
                self.expect(&TokenKind::Null, "NULL")?;
                return Ok(Expr::IsNull {
                    expr: Box::new(lhs),
                    negated,
                });
            }
            TokenKind::Like => return self.parse_like(lhs, false, r_bp),
            TokenKind::In => return self.parse_in(lhs, false),
            TokenKind::Between => return self.parse_between(lhs, false),
            TokenKind::Not => {
                let next = self.advance_token();
                return match next.kind {
                    TokenKind::Like => self.parse_like(lhs, true, r_bp),
                    TokenKind::In => self.parse_in(lhs, true),
                    TokenKind::Between => self.parse_between(lhs, true),
                    other => Err(PredicateError::Parse {
                        message: format!("expected LIKE, IN or BETWEEN after NOT, found {}", other.describe()),
                        offset: next.offset,
                    }),
                };
            }
            other => {
                return Err(PredicateError::Parse {
                    message: format!("unexpected {}", other.describe()),
                    offset: tok.offset,
                });
            }
        };
        let rhs = self.parse_expr_bp(r_bp)?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn parse_like(&mut self, lhs: Expr, negated: bool, r_bp: u8) -> PredicateResult<Expr> {
        let pattern = self.parse_expr_bp(r_bp)?;
        Ok(Expr::Like {
            expr: Box::new(lhs),
            pattern: Box::new(pattern),
            negated,
        })
    }

    fn parse_in(&mut self, lhs: Expr, negated: bool) -> PredicateResult<Expr> {
        self.expect(&TokenKind::LParen, "(")?;
        if self.at(&TokenKind::Select) {
            let query = self.parse_select()?;
            self.expect(&TokenKind::RParen, ")")?;
            return Ok(Expr::InSelect {
                expr: Box::new(lhs),
                query: Box::new(query),
                negated,
            });
        }
        let list = self.parse_expr_list()?;
        self.expect(&TokenKind::RParen, ")")?;
        Ok(Expr::InList {
            expr: Box::new(lhs),
            list,
            negated,
        })
    }

    fn parse_between(&mut self, lhs: Expr, negated: bool) -> PredicateResult<Expr> {
        // Bounds bind tighter than AND so the separating AND is not consumed.
        let low = self.parse_expr_bp(bp::EQUALITY.1)?;
        self.expect(&TokenKind::And, "AND")?;
        let high = self.parse_expr_bp(bp::EQUALITY.1)?;
        Ok(Expr::Between {
            expr: Box::new(lhs),
            low: Box::new(low),
            high: Box::new(high),
            negated,
        })
    }

    // ── Token helpers ───────────────────────────────────────────────

    fn peek_kind(&self) -> &TokenKind {
        self.tokens.get(self.pos).map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        self.tokens.get(self.pos + n).map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.offset)
    }

    fn advance_token(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            offset: self.current_offset(),
        });
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn at_clause_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::Group | TokenKind::Having | TokenKind::Order
        )
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PredicateResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected {what}, found {}", self.peek_kind().describe())))
        }
    }

    fn expect_ident(&mut self) -> PredicateResult<String> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            self.pos += 1;
            Ok(name)
        } else {
            Err(self.err_here(format!("expected identifier, found {}", self.peek_kind().describe())))
        }
    }

    fn expect_eof(&self) -> PredicateResult<()> {
        match self.peek_kind() {
            TokenKind::Eof => Ok(()),
            TokenKind::Error(message) => Err(self.err_here(message.clone())),
            other => Err(self.err_here(format!("unexpected {} after end of predicate", other.describe()))),
        }
    }

    fn err_here(&self, message: String) -> PredicateError {
        PredicateError::Parse {
            message,
            offset: self.current_offset(),
        }
    }
}
