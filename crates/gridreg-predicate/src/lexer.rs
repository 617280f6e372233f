//! Predicate lexer.
//!
//! Converts predicate text into tokens. Never fails: malformed input becomes
//! a [`TokenKind::Error`] token that the parser turns into an error with the
//! offending offset.

use crate::token::{Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the whole input; the last token is always `Eof`.
    pub fn tokenize(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let done = matches!(tok.kind, TokenKind::Eof | TokenKind::Error(_));
            tokens.push(tok);
            if done {
                break;
            }
        }
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            tokens.push(Token {
                kind: TokenKind::Eof,
                offset: src.len(),
            });
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        let Some(&b) = self.bytes.get(self.pos) else {
            return Token {
                kind: TokenKind::Eof,
                offset: start,
            };
        };

        let kind = match b {
            b'\'' => self.string_literal(),
            b'"' | b'`' => self.quoted_ident(b),
            b'0'..=b'9' => self.number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.word(),
            _ => self.symbol(),
        };
        Token {
            kind,
            offset: start,
        }
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.bytes[self.pos..].starts_with(b"--") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// `'...'` with `''` as an embedded quote.
    fn string_literal(&mut self) -> TokenKind {
        self.pos += 1;
        let mut value = String::new();
        let mut seg_start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                None => return TokenKind::Error("unterminated string literal".to_string()),
                Some(b'\'') => {
                    value.push_str(&self.src[seg_start..self.pos]);
                    if self.peek_at(1) == Some(b'\'') {
                        value.push('\'');
                        self.pos += 2;
                        seg_start = self.pos;
                    } else {
                        self.pos += 1;
                        return TokenKind::String(value);
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn quoted_ident(&mut self, quote: u8) -> TokenKind {
        self.pos += 1;
        let start = self.pos;
        while let Some(&c) = self.bytes.get(self.pos) {
            if c == quote {
                let name = self.src[start..self.pos].to_string();
                self.pos += 1;
                return TokenKind::Ident(name);
            }
            self.pos += 1;
        }
        TokenKind::Error("unterminated quoted identifier".to_string())
    }

    fn number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_real = false;
        while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_at(0) == Some(b'.') {
            is_real = true;
            self.pos += 1;
            while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                self.pos += 1 + sign;
                while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = &self.src[start..self.pos];
        if !is_real {
            if let Ok(i) = text.parse::<i64>() {
                return TokenKind::Integer(i);
            }
        }
        match text.parse::<f64>() {
            Ok(r) => TokenKind::Real(r),
            Err(_) => TokenKind::Error(format!("malformed number '{text}'")),
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$')
        {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }

    fn symbol(&mut self) -> TokenKind {
        let b = self.bytes[self.pos];
        let next = self.peek_at(1);
        let (kind, len) = match (b, next) {
            (b'<', Some(b'>')) => (TokenKind::Ne, 2),
            (b'!', Some(b'=')) => (TokenKind::Ne, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::Eq, 2),
            (b'|', Some(b'|')) => (TokenKind::Concat, 2),
            (b'=', _) => (TokenKind::Eq, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b';', _) => (TokenKind::Semicolon, 1),
            _ => {
                let ch = self.src[self.pos..].chars().next().unwrap_or('?');
                return TokenKind::Error(format!("unexpected character '{ch}'"));
            }
        };
        self.pos += len;
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_comparison() {
        assert_eq!(
            kinds("site = 'RAL' and value >= 10.5"),
            vec![
                TokenKind::Ident("site".into()),
                TokenKind::Eq,
                TokenKind::String("RAL".into()),
                TokenKind::And,
                TokenKind::Ident("value".into()),
                TokenKind::Ge,
                TokenKind::Real(10.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn escaped_quote_in_string() {
        assert_eq!(
            kinds("'O''Neil'"),
            vec![TokenKind::String("O'Neil".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn not_equal_spellings() {
        assert_eq!(kinds("<> !="), vec![TokenKind::Ne, TokenKind::Ne, TokenKind::Eof]);
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 .5 1e3"),
            vec![
                TokenKind::Integer(42),
                TokenKind::Real(0.5),
                TokenKind::Real(1000.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a -- trailing\n= 1"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Integer(1),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let toks = Lexer::tokenize("site = 'RAL");
        assert!(matches!(toks[2].kind, TokenKind::Error(_)));
        assert_eq!(toks[2].offset, 7);
        assert_eq!(toks.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }
}
