//! Read-only SQL enforcement.
//!
//! - `lexer`: token stream with byte spans
//! - `validator`: the read-only policy and its verdicts

pub mod lexer;
pub mod validator;

pub use lexer::{LexError, Token, TokenKind, tokenize};
pub use validator::{SqlValidator, ValidationPolicy, ValidationVerdict, validate_readonly};
