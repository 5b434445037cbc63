//! PostgreSQL-flavoured SQL lexer.
//!
//! Produces a flat token stream with byte spans into the input. The lexer
//! understands exactly as much SQL as the read-only policy needs:
//! comments (line and nested block), string literals in all their forms
//! (standard, `E''` escape strings, `$tag$` dollar quoting, `B''`/`X''`/`U&''`
//! prefixes), quoted identifiers, numbers, positional parameters and
//! punctuation. It does not parse grammar.

use std::fmt;

/// Extra words treated as keywords even if the keyword table lacks them.
const EXTRA_KEYWORDS: &[&str] = &["EXEC"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted word found in the SQL keyword table.
    Keyword,
    /// Any other unquoted word.
    Identifier,
    /// `"..."` or `U&"..."`; never a keyword.
    QuotedIdentifier,
    StringLiteral,
    Number,
    /// `$1`, `$2`, ...
    Parameter,
    Punctuation,
    Comment,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Comments and whitespace carry no meaning for the policy.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Comment | TokenKind::Whitespace)
    }

    /// Unquoted keyword or identifier.
    pub fn is_word(&self) -> bool {
        matches!(self.kind, TokenKind::Keyword | TokenKind::Identifier)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == p
    }

    /// Keyword comparison, ASCII case-insensitive.
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(kw)
    }

    /// Identifier text as PostgreSQL resolves it: unquoted words fold to
    /// lower case, quoted identifiers keep their exact spelling.
    pub fn ident_name(&self) -> Option<String> {
        match self.kind {
            TokenKind::Keyword | TokenKind::Identifier => Some(self.text.to_lowercase()),
            TokenKind::QuotedIdentifier => {
                let inner = self.text.trim_start_matches("U&").trim_start_matches("u&");
                let inner = inner.strip_prefix('"')?.strip_suffix('"')?;
                Some(inner.replace("\"\"", "\""))
            }
            _ => None,
        }
    }
}

/// Lexing failure with the byte offset where the offending construct began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: &'static str,
    pub offset: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for LexError {}

/// Whether an upper-cased word is a SQL keyword.
pub fn is_sql_keyword(upper: &str) -> bool {
    sqlparser::keywords::ALL_KEYWORDS.binary_search(&upper).is_ok()
        || EXTRA_KEYWORDS.contains(&upper)
}

/// Split `sql` into tokens. Concatenating every token's text reproduces the
/// input exactly.
pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer { src: sql, pos: 0 }.run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.pos;
            let kind = self.next_kind(c)?;
            tokens.push(Token {
                kind,
                text: &self.src[start..self.pos],
                start,
            });
        }
        Ok(tokens)
    }

    fn next_kind(&mut self, c: char) -> Result<TokenKind, LexError> {
        let start = self.pos;
        match c {
            c if c.is_whitespace() => {
                self.eat_while(char::is_whitespace);
                Ok(TokenKind::Whitespace)
            }
            '-' if self.peek_at(1) == Some('-') => {
                self.eat_while(|c| c != '\n');
                Ok(TokenKind::Comment)
            }
            '/' if self.peek_at(1) == Some('*') => {
                self.block_comment(start)?;
                Ok(TokenKind::Comment)
            }
            '\'' => {
                self.quoted('\'', false, start)?;
                Ok(TokenKind::StringLiteral)
            }
            '"' => {
                self.quoted('"', false, start)?;
                Ok(TokenKind::QuotedIdentifier)
            }
            '$' => self.dollar(start),
            c if c.is_ascii_digit() => {
                self.number();
                Ok(TokenKind::Number)
            }
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.number();
                Ok(TokenKind::Number)
            }
            c if is_ident_start(c) => self.word(start),
            ':' if self.peek_at(1) == Some(':') => {
                self.pos += 2;
                Ok(TokenKind::Punctuation)
            }
            c => {
                self.pos += c.len_utf8();
                Ok(TokenKind::Punctuation)
            }
        }
    }

    fn word(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.eat_while(is_ident_continue);
        let word = &self.src[start..self.pos];

        // Prefixed literals: E'...', B'...', X'...', N'...', U&'...', U&"..."
        match (word.to_ascii_uppercase().as_str(), self.peek()) {
            ("E", Some('\'')) => {
                self.quoted('\'', true, start)?;
                return Ok(TokenKind::StringLiteral);
            }
            ("B" | "X" | "N", Some('\'')) => {
                self.quoted('\'', false, start)?;
                return Ok(TokenKind::StringLiteral);
            }
            ("U", Some('&')) => match self.peek_at(1) {
                Some('\'') => {
                    self.pos += 1;
                    self.quoted('\'', false, start)?;
                    return Ok(TokenKind::StringLiteral);
                }
                Some('"') => {
                    self.pos += 1;
                    self.quoted('"', false, start)?;
                    return Ok(TokenKind::QuotedIdentifier);
                }
                _ => {}
            },
            _ => {}
        }

        if is_sql_keyword(&word.to_ascii_uppercase()) {
            Ok(TokenKind::Keyword)
        } else {
            Ok(TokenKind::Identifier)
        }
    }

    /// Consume a quoted run starting at the current quote character.
    /// A doubled quote is an escaped quote. With `backslash_escapes`,
    /// a backslash escapes the following character.
    fn quoted(&mut self, quote: char, backslash_escapes: bool, start: usize) -> Result<(), LexError> {
        self.pos += quote.len_utf8();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError {
                        message: if quote == '\'' {
                            "unterminated string literal"
                        } else {
                            "unterminated quoted identifier"
                        },
                        offset: start,
                    });
                }
                Some('\\') if backslash_escapes => {
                    self.pos += 1;
                    if let Some(next) = self.peek() {
                        self.pos += next.len_utf8();
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    if self.peek() == Some(quote) {
                        self.pos += 1;
                    } else {
                        return Ok(());
                    }
                }
                Some(c) => self.pos += c.len_utf8(),
            }
        }
    }

    fn block_comment(&mut self, start: usize) -> Result<(), LexError> {
        self.pos += 2;
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_at(1)) {
                (None, _) => {
                    return Err(LexError {
                        message: "unterminated block comment",
                        offset: start,
                    });
                }
                (Some('/'), Some('*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some('*'), Some('/')) => {
                    depth -= 1;
                    self.pos += 2;
                }
                (Some(c), _) => self.pos += c.len_utf8(),
            }
        }
        Ok(())
    }

    /// `$1` parameter, `$tag$...$tag$` / `$$...$$` string, or a lone `$`.
    fn dollar(&mut self, start: usize) -> Result<TokenKind, LexError> {
        if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            self.eat_while(|c| c.is_ascii_digit());
            return Ok(TokenKind::Parameter);
        }

        let rest = &self.src[start + 1..];
        let tag_len = rest
            .char_indices()
            .take_while(|&(i, c)| c == '_' || c.is_alphabetic() || (i > 0 && c.is_ascii_digit()))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);

        if !rest[tag_len..].starts_with('$') {
            self.pos += 1;
            return Ok(TokenKind::Punctuation);
        }

        let delimiter = &self.src[start..start + tag_len + 2];
        let body_start = start + delimiter.len();
        match self.src[body_start..].find(delimiter) {
            Some(idx) => {
                self.pos = body_start + idx + delimiter.len();
                Ok(TokenKind::StringLiteral)
            }
            None => Err(LexError {
                message: "unterminated dollar-quoted string",
                offset: start,
            }),
        }
    }

    /// Numeric literal. Letters end the number unless they form a radix
    /// prefix or an exponent, so `1into` lexes as `1` followed by `into`.
    fn number(&mut self) {
        if let Some(radix) = self.radix_prefix() {
            self.pos += 2;
            self.eat_while(|c| c.is_digit(radix) || c == '_');
            return;
        }
        self.eat_while(|c| c.is_ascii_digit() || c == '_');
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            self.pos += 1;
            self.eat_while(|c| c.is_ascii_digit() || c == '_');
        }
        let exponent = matches!(self.peek(), Some('e' | 'E'))
            && match self.peek_at(1) {
                Some('+' | '-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
        if exponent {
            self.pos += 2;
            self.eat_while(|c| c.is_ascii_digit());
        }
    }

    /// `0x`, `0o` or `0b` followed by a digit of that radix.
    fn radix_prefix(&self) -> Option<u32> {
        if self.peek() != Some('0') {
            return None;
        }
        let radix = match self.peek_at(1)? {
            'x' | 'X' => 16,
            'o' | 'O' => 8,
            'b' | 'B' => 2,
            _ => return None,
        };
        self.peek_at(2).filter(|c| c.is_digit(radix)).map(|_| radix)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_round_trip_text() {
        let sql = "SELECT a, 'x''y' /* c */ FROM \"T\" -- tail\nWHERE b = $1";
        let joined: String = tokenize(sql).unwrap().iter().map(|t| t.text).collect();
        assert_eq!(joined, sql);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let toks = kinds("select deleted_at from users");
        assert_eq!(toks[0], (TokenKind::Keyword, "select"));
        assert_eq!(toks[1], (TokenKind::Identifier, "deleted_at"));
        assert_eq!(toks[2], (TokenKind::Keyword, "from"));
    }

    #[test]
    fn test_quoted_identifier_is_not_keyword() {
        let toks = kinds("SELECT \"delete\" FROM t");
        assert_eq!(toks[1].0, TokenKind::QuotedIdentifier);
    }

    #[test]
    fn test_string_with_doubled_quote() {
        let toks = kinds("SELECT 'it''s; DROP TABLE x'");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].0, TokenKind::StringLiteral);
    }

    #[test]
    fn test_escape_string_backslash() {
        let toks = kinds(r"SELECT E'a\'b; DELETE'");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].0, TokenKind::StringLiteral);
    }

    #[test]
    fn test_dollar_quoted_string() {
        let toks = kinds("SELECT $body$ DROP TABLE x; $body$, $$ ; $$");
        assert_eq!(toks[1], (TokenKind::StringLiteral, "$body$ DROP TABLE x; $body$"));
        assert_eq!(toks[3], (TokenKind::StringLiteral, "$$ ; $$"));
    }

    #[test]
    fn test_positional_parameter() {
        let toks = kinds("WHERE a = $12");
        assert_eq!(toks[3], (TokenKind::Parameter, "$12"));
    }

    #[test]
    fn test_nested_block_comment() {
        let toks = tokenize("SELECT /* a /* b */ c */ 1").unwrap();
        let comment = toks.iter().find(|t| t.kind == TokenKind::Comment).unwrap();
        assert_eq!(comment.text, "/* a /* b */ c */");
    }

    #[test]
    fn test_unterminated_constructs() {
        assert_eq!(tokenize("SELECT 'abc").unwrap_err().offset, 7);
        assert!(tokenize("SELECT \"abc").is_err());
        assert!(tokenize("SELECT /* /* */").is_err());
        assert!(tokenize("SELECT $a$ x").is_err());
    }

    #[test]
    fn test_numbers_and_casts() {
        let toks = kinds("SELECT 1.5e-3::float8, .5");
        assert_eq!(toks[1], (TokenKind::Number, "1.5e-3"));
        assert_eq!(toks[2], (TokenKind::Punctuation, "::"));
        assert_eq!(toks[5], (TokenKind::Number, ".5"));
    }

    #[test]
    fn test_number_stops_at_trailing_word() {
        let toks = kinds("SELECT 1into t, 2union, 0x1Fz");
        assert_eq!(toks[1], (TokenKind::Number, "1"));
        assert_eq!(toks[2], (TokenKind::Keyword, "into"));
        assert_eq!(toks[5], (TokenKind::Number, "2"));
        assert_eq!(toks[6], (TokenKind::Keyword, "union"));
        assert_eq!(toks[8], (TokenKind::Number, "0x1F"));
        assert_eq!(toks[9], (TokenKind::Identifier, "z"));
    }

    #[test]
    fn test_number_exponent_needs_digits() {
        let toks = kinds("SELECT 1e5, 2e, 3E+2");
        assert_eq!(toks[1], (TokenKind::Number, "1e5"));
        assert_eq!(toks[3], (TokenKind::Number, "2"));
        assert_eq!(toks[4], (TokenKind::Identifier, "e"));
        assert_eq!(toks[6], (TokenKind::Number, "3E+2"));
    }

    #[test]
    fn test_ident_name_folding() {
        let toks = tokenize("PG_Catalog \"Mixed\"\"Q\"").unwrap();
        assert_eq!(toks[0].ident_name().as_deref(), Some("pg_catalog"));
        assert_eq!(toks[2].ident_name().as_deref(), Some("Mixed\"Q"));
    }

    #[test]
    fn test_unicode_identifier() {
        let toks = kinds("SELECT größe FROM t");
        assert_eq!(toks[1], (TokenKind::Identifier, "größe"));
    }
}
