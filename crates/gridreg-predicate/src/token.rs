//! Token types produced by the predicate lexer.

/// A single token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Real(f64),
    String(String),

    // Identifiers (quoted or bare)
    Ident(String),

    // Keywords
    Select,
    Distinct,
    All,
    From,
    Where,
    Group,
    Having,
    Order,
    By,
    Asc,
    Desc,
    As,
    And,
    Or,
    Not,
    Like,
    In,
    Between,
    Is,
    Null,
    Exists,

    // Operators and punctuation
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Concat,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,

    /// Unrecognised input; the parser reports it.
    Error(String),
    Eof,
}

impl TokenKind {
    /// Map a bare word to its keyword, if it is one.
    pub fn keyword(word: &str) -> Option<Self> {
        let kw = match word.to_ascii_uppercase().as_str() {
            "SELECT" => Self::Select,
            "DISTINCT" => Self::Distinct,
            "ALL" => Self::All,
            "FROM" => Self::From,
            "WHERE" => Self::Where,
            "GROUP" => Self::Group,
            "HAVING" => Self::Having,
            "ORDER" => Self::Order,
            "BY" => Self::By,
            "ASC" => Self::Asc,
            "DESC" => Self::Desc,
            "AS" => Self::As,
            "AND" => Self::And,
            "OR" => Self::Or,
            "NOT" => Self::Not,
            "LIKE" => Self::Like,
            "IN" => Self::In,
            "BETWEEN" => Self::Between,
            "IS" => Self::Is,
            "NULL" => Self::Null,
            "EXISTS" => Self::Exists,
            _ => return None,
        };
        Some(kw)
    }

    /// Short human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::String(s) => format!("'{s}'"),
            Self::Ident(s) => s.clone(),
            Self::Error(s) => s.clone(),
            Self::Eof => "end of input".to_string(),
            other => format!("{other:?}").to_uppercase(),
        }
    }
}
