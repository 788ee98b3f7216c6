#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &str) -> Vec<Token> {
        let (tokens, errors) = Lexer::new(src).lex();
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex_ok(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_int_literals_with_bases_and_underscores() {
        let tokens = lex_ok("let a = 1_000; let b = 0b1010_0110; let c = 0o755; let d = 0xDEAD_BEEF;");
        let ints: Vec<i64> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Int(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(ints, vec![1000, 0b1010_0110, 0o755, 0xDEAD_BEEF]);
    }

    #[test]
    fn lex_rejects_bad_int_underscore_placement() {
        let (_, errors) = Lexer::new("let x = 0x_DEAD;").lex();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("invalid integer literal")));
    }

    #[test]
    fn lex_float_forms() {
        let tokens = lex_ok("1.5 2.0e10 3.25e-2 7e3");
        let floats: Vec<f64> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Float(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(floats, vec![1.5, 2.0e10, 3.25e-2, 7e3]);
    }

    #[test]
    fn lex_int_then_range_is_not_a_float() {
        assert_eq!(
            kinds("1..3"),
            vec![
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(3),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("1..=3"),
            vec![
                TokenKind::Int(1),
                TokenKind::DotDotEq,
                TokenKind::Int(3),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_maximal_munch_operators() {
        assert_eq!(
            kinds("< <= << - -> -= * ** *= = => =="),
            vec![
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Shl,
                TokenKind::Minus,
                TokenKind::Arrow,
                TokenKind::MinusEq,
                TokenKind::Star,
                TokenKind::StarStar,
                TokenKind::StarEq,
                TokenKind::Eq,
                TokenKind::FatArrow,
                TokenKind::EqEq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_string_escapes() {
        let tokens = lex_ok(r#"let s = "a\n\t\r\\\"\'\0\x41\u{1F600}";"#);
        let s = tokens
            .iter()
            .find_map(|t| match &t.kind {
                TokenKind::Str(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(s, "a\n\t\r\\\"'\0A\u{1F600}");
    }

    #[test]
    fn lex_char_literal_and_escapes() {
        let tokens = lex_ok(r"let c = '\n'; let d = 'x';");
        let chars: Vec<char> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Char(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(chars, vec!['\n', 'x']);
    }

    #[test]
    fn lex_rejects_unknown_escape() {
        let (_, errors) = Lexer::new(r#"let s = "\q";"#).lex();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("invalid escape sequence")));
    }

    #[test]
    fn lex_unterminated_string_reports_and_recovers() {
        let (tokens, errors) = Lexer::new("let s = \"abc").lex();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unterminated string literal")));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Invalid));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn lex_nested_block_comments() {
        assert_eq!(
            kinds("a /* one /* two */ still */ b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_unterminated_block_comment() {
        let (_, errors) = Lexer::new("a /* never closed").lex();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unterminated block comment")));
    }

    #[test]
    fn lex_keywords_and_literal_keywords() {
        assert_eq!(
            kinds("fn true false nil self Self old"),
            vec![
                TokenKind::KwFn,
                TokenKind::Bool(true),
                TokenKind::Bool(false),
                TokenKind::Nil,
                TokenKind::KwSelf,
                TokenKind::KwSelfType,
                TokenKind::KwOld,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_underscore_is_wildcard_but_prefixed_names_are_idents() {
        assert_eq!(
            kinds("_ _x"),
            vec![
                TokenKind::Underscore,
                TokenKind::Ident("_x".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_unexpected_character_emits_invalid_and_continues() {
        let (tokens, errors) = Lexer::new("let x = 1 $ let y = 2;").lex();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unexpected character '$'"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Invalid));
        // Scanning continued past the bad character.
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Ident("y".to_string())));
    }

    #[test]
    fn token_spans_slice_back_to_source() {
        let src = "let total = 0x2A; // answer";
        let (tokens, errors) = Lexer::new(src).lex();
        assert!(errors.is_empty());
        for t in &tokens {
            let start = t.span.offset();
            let end = start + t.span.len();
            assert!(end <= src.len(), "span out of bounds: {:?}", t.span);
            match &t.kind {
                TokenKind::Ident(name) => assert_eq!(&src[start..end], name),
                TokenKind::Int(42) => assert_eq!(&src[start..end], "0x2A"),
                _ => {}
            }
        }
    }
}
