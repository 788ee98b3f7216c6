#![forbid(unsafe_code)]

use covenant_ast::{span_between, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(covenant::lex))]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum RawError {
    #[default]
    UnexpectedChar,
    UnterminatedComment,
    InvalidInt,
    InvalidEscape,
    InvalidChar,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = RawError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("/*", lex_block_comment)]
    BlockComment,

    #[token("fn")]
    KwFn,
    #[token("let")]
    KwLet,
    #[token("mut")]
    KwMut,
    #[token("type")]
    KwType,
    #[token("struct")]
    KwStruct,
    #[token("enum")]
    KwEnum,
    #[token("trait")]
    KwTrait,
    #[token("impl")]
    KwImpl,
    #[token("contract")]
    KwContract,
    #[token("intent")]
    KwIntent,
    #[token("effect")]
    KwEffect,
    #[token("capability")]
    KwCapability,
    #[token("requires")]
    KwRequires,
    #[token("ensures")]
    KwEnsures,
    #[token("invariant")]
    KwInvariant,
    #[token("if")]
    KwIf,
    #[token("else")]
    KwElse,
    #[token("match")]
    KwMatch,
    #[token("for")]
    KwFor,
    #[token("while")]
    KwWhile,
    #[token("return")]
    KwReturn,
    #[token("import")]
    KwImport,
    #[token("export")]
    KwExport,
    #[token("where")]
    KwWhere,
    #[token("pure")]
    KwPure,
    #[token("extern")]
    KwExtern,
    #[token("self")]
    KwSelf,
    #[token("Self")]
    KwSelfType,
    #[token("old")]
    KwOld,
    #[token("forall")]
    KwForall,
    #[token("exists")]
    KwExists,
    #[token("in")]
    KwIn,
    #[token("as")]
    KwAs,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    #[token("**")]
    StarStar,
    #[token("*=")]
    StarEq,
    #[token("*")]
    Star,
    #[token("+=")]
    PlusEq,
    #[token("+")]
    Plus,
    #[token("->")]
    Arrow,
    #[token("-=")]
    MinusEq,
    #[token("-")]
    Minus,
    #[token("/=")]
    SlashEq,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,
    #[token("=>")]
    FatArrow,
    #[token("=")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token("<=")]
    Le,
    #[token("<")]
    Lt,
    #[token(">>")]
    Shr,
    #[token(">=")]
    Ge,
    #[token(">")]
    Gt,

    #[token("&&")]
    AndAnd,
    #[token("&")]
    Amp,
    #[token("||")]
    OrOr,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,

    #[token("..=")]
    DotDotEq,
    #[token("..")]
    DotDot,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("?")]
    Question,
    #[token(",")]
    Comma,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", lex_float)]
    Float(f64),

    #[regex(r"0b[01_]+", |lex| parse_int_prefixed(lex.slice(), 2))]
    #[regex(r"0o[0-7_]+", |lex| parse_int_prefixed(lex.slice(), 8))]
    #[regex(r"0x[0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16))]
    #[regex(r"[0-9][0-9_]*", lex_int_decimal)]
    Int(i64),

    // Strings may span lines; escapes are validated in the callback.
    #[regex(r#""([^"\\]|\\.|\\\n)*""#, lex_string)]
    Str(String),
    // No closing quote before end of input. Shorter match, so the terminated
    // form always wins when one exists.
    #[regex(r#""([^"\\]|\\.|\\\n)*"#, |_| ())]
    UnterminatedStr,

    #[regex(r"'([^'\\\n]|\\[^\n])*'", lex_char)]
    Char(char),
    #[regex(r"'([^'\\\n]|\\[^\n])*", |_| ())]
    UnterminatedChar,

    #[token("_", priority = 3)]
    Underscore,
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

// Block comments nest arbitrarily; an unclosed comment consumes the rest of
// the input and reports one error.
fn lex_block_comment(lex: &mut logos::Lexer<RawToken>) -> logos::FilterResult<(), RawError> {
    let rem = lex.remainder().as_bytes();
    let mut depth = 1usize;
    let mut i = 0usize;
    while i < rem.len() {
        if rem[i] == b'/' && rem.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if rem[i] == b'*' && rem.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                lex.bump(i);
                return logos::FilterResult::Skip;
            }
        } else {
            i += 1;
        }
    }
    lex.bump(rem.len());
    logos::FilterResult::Error(RawError::UnterminatedComment)
}

fn lex_int_decimal(lex: &mut logos::Lexer<RawToken>) -> Result<i64, RawError> {
    let digits = strip_underscores(lex.slice()).ok_or(RawError::InvalidInt)?;
    digits.parse::<i64>().map_err(|_| RawError::InvalidInt)
}

fn parse_int_prefixed(s: &str, radix: u32) -> Result<i64, RawError> {
    let rest = s.get(2..).ok_or(RawError::InvalidInt)?;
    let digits = strip_underscores(rest).ok_or(RawError::InvalidInt)?;
    i64::from_str_radix(&digits, radix).map_err(|_| RawError::InvalidInt)
}

fn lex_float(lex: &mut logos::Lexer<RawToken>) -> Result<f64, RawError> {
    let cleaned: String = lex.slice().chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().map_err(|_| RawError::InvalidInt)
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

fn lex_string(lex: &mut logos::Lexer<RawToken>) -> Result<String, RawError> {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    unescape_into(inner, &mut out)?;
    Ok(out)
}

fn lex_char(lex: &mut logos::Lexer<RawToken>) -> Result<char, RawError> {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(4);
    unescape_into(inner, &mut out)?;
    let mut chars = out.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(RawError::InvalidChar),
    }
}

/// Decode the shared escape set: `\n \t \r \\ \" \' \0`, `\xHH`, `\u{1-6 hex}`.
fn unescape_into(inner: &str, out: &mut String) -> Result<(), RawError> {
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let Some(esc) = chars.next() else {
            return Err(RawError::InvalidEscape);
        };

        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '0' => out.push('\0'),
            'x' => {
                let mut hex = String::with_capacity(2);
                for _ in 0..2 {
                    match chars.next() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(RawError::InvalidEscape),
                    }
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| RawError::InvalidEscape)?;
                out.push(char::from_u32(cp).ok_or(RawError::InvalidEscape)?);
            }
            'u' => {
                if chars.next() != Some('{') {
                    return Err(RawError::InvalidEscape);
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return Err(RawError::InvalidEscape);
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return Err(RawError::InvalidEscape);
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| RawError::InvalidEscape)?;
                out.push(char::from_u32(cp).ok_or(RawError::InvalidEscape)?);
            }
            _ => return Err(RawError::InvalidEscape),
        }
    }

    Ok(())
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    /// Scan the whole input. Never fails: unlexable fragments become
    /// `TokenKind::Invalid` plus a `LexError`, and scanning continues.
    pub fn lex(&self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        let mut lex = RawToken::lexer(self.src);
        while let Some(item) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);
            match item {
                Ok(raw) => match self.classify(raw, span) {
                    Ok(kind) => tokens.push(Token { kind, span }),
                    Err(err) => {
                        errors.push(err);
                        tokens.push(Token {
                            kind: TokenKind::Invalid,
                            span,
                        });
                    }
                },
                Err(e) => {
                    errors.push(LexError {
                        message: raw_error_message(&e, &self.src[range.clone()]),
                        span,
                    });
                    tokens.push(Token {
                        kind: TokenKind::Invalid,
                        span,
                    });
                }
            }
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        (tokens, errors)
    }

    fn classify(&self, raw: RawToken, span: Span) -> Result<TokenKind, LexError> {
        let kind = match raw {
            RawToken::BlockComment => unreachable!("comments are skipped or error"),

            RawToken::KwFn => TokenKind::KwFn,
            RawToken::KwLet => TokenKind::KwLet,
            RawToken::KwMut => TokenKind::KwMut,
            RawToken::KwType => TokenKind::KwType,
            RawToken::KwStruct => TokenKind::KwStruct,
            RawToken::KwEnum => TokenKind::KwEnum,
            RawToken::KwTrait => TokenKind::KwTrait,
            RawToken::KwImpl => TokenKind::KwImpl,
            RawToken::KwContract => TokenKind::KwContract,
            RawToken::KwIntent => TokenKind::KwIntent,
            RawToken::KwEffect => TokenKind::KwEffect,
            RawToken::KwCapability => TokenKind::KwCapability,
            RawToken::KwRequires => TokenKind::KwRequires,
            RawToken::KwEnsures => TokenKind::KwEnsures,
            RawToken::KwInvariant => TokenKind::KwInvariant,
            RawToken::KwIf => TokenKind::KwIf,
            RawToken::KwElse => TokenKind::KwElse,
            RawToken::KwMatch => TokenKind::KwMatch,
            RawToken::KwFor => TokenKind::KwFor,
            RawToken::KwWhile => TokenKind::KwWhile,
            RawToken::KwReturn => TokenKind::KwReturn,
            RawToken::KwImport => TokenKind::KwImport,
            RawToken::KwExport => TokenKind::KwExport,
            RawToken::KwWhere => TokenKind::KwWhere,
            RawToken::KwPure => TokenKind::KwPure,
            RawToken::KwExtern => TokenKind::KwExtern,
            RawToken::KwSelf => TokenKind::KwSelf,
            RawToken::KwSelfType => TokenKind::KwSelfType,
            RawToken::KwOld => TokenKind::KwOld,
            RawToken::KwForall => TokenKind::KwForall,
            RawToken::KwExists => TokenKind::KwExists,
            RawToken::KwIn => TokenKind::KwIn,
            RawToken::KwAs => TokenKind::KwAs,
            RawToken::True => TokenKind::Bool(true),
            RawToken::False => TokenKind::Bool(false),
            RawToken::Nil => TokenKind::Nil,

            RawToken::StarStar => TokenKind::StarStar,
            RawToken::StarEq => TokenKind::StarEq,
            RawToken::Star => TokenKind::Star,
            RawToken::PlusEq => TokenKind::PlusEq,
            RawToken::Plus => TokenKind::Plus,
            RawToken::Arrow => TokenKind::Arrow,
            RawToken::MinusEq => TokenKind::MinusEq,
            RawToken::Minus => TokenKind::Minus,
            RawToken::SlashEq => TokenKind::SlashEq,
            RawToken::Slash => TokenKind::Slash,
            RawToken::Percent => TokenKind::Percent,

            RawToken::EqEq => TokenKind::EqEq,
            RawToken::FatArrow => TokenKind::FatArrow,
            RawToken::Eq => TokenKind::Eq,
            RawToken::NotEq => TokenKind::NotEq,
            RawToken::Bang => TokenKind::Bang,
            RawToken::Shl => TokenKind::Shl,
            RawToken::Le => TokenKind::Le,
            RawToken::Lt => TokenKind::Lt,
            RawToken::Shr => TokenKind::Shr,
            RawToken::Ge => TokenKind::Ge,
            RawToken::Gt => TokenKind::Gt,

            RawToken::AndAnd => TokenKind::AndAnd,
            RawToken::Amp => TokenKind::Amp,
            RawToken::OrOr => TokenKind::OrOr,
            RawToken::Pipe => TokenKind::Pipe,
            RawToken::Caret => TokenKind::Caret,
            RawToken::Tilde => TokenKind::Tilde,

            RawToken::DotDotEq => TokenKind::DotDotEq,
            RawToken::DotDot => TokenKind::DotDot,
            RawToken::Dot => TokenKind::Dot,
            RawToken::At => TokenKind::At,
            RawToken::Question => TokenKind::Question,
            RawToken::Comma => TokenKind::Comma,
            RawToken::ColonColon => TokenKind::ColonColon,
            RawToken::Colon => TokenKind::Colon,
            RawToken::Semi => TokenKind::Semi,

            RawToken::LParen => TokenKind::LParen,
            RawToken::RParen => TokenKind::RParen,
            RawToken::LBrace => TokenKind::LBrace,
            RawToken::RBrace => TokenKind::RBrace,
            RawToken::LBracket => TokenKind::LBracket,
            RawToken::RBracket => TokenKind::RBracket,

            RawToken::Float(v) => TokenKind::Float(v),
            RawToken::Int(v) => TokenKind::Int(v),
            RawToken::Str(s) => TokenKind::Str(s),
            RawToken::Char(c) => TokenKind::Char(c),

            RawToken::UnterminatedStr => {
                return Err(LexError {
                    message: "unterminated string literal".to_string(),
                    span,
                });
            }
            RawToken::UnterminatedChar => {
                return Err(LexError {
                    message: "unterminated character literal".to_string(),
                    span,
                });
            }

            RawToken::Underscore => TokenKind::Underscore,
            RawToken::Ident(s) => TokenKind::Ident(s),
        };
        Ok(kind)
    }
}

fn raw_error_message(err: &RawError, slice: &str) -> String {
    match err {
        RawError::UnexpectedChar => {
            let ch = slice.chars().next().unwrap_or('?');
            format!("unexpected character '{ch}'")
        }
        RawError::UnterminatedComment => "unterminated block comment".to_string(),
        RawError::InvalidInt => "invalid integer literal".to_string(),
        RawError::InvalidEscape => "invalid escape sequence".to_string(),
        RawError::InvalidChar => "invalid character literal".to_string(),
    }
}
