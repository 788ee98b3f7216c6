use covenant_ast::{AnnotationKind, Decl, ExprKind, ImportItems, Pattern, Stmt};
use covenant_parse::{parse_source, parse_source_with_recovery};

#[test]
fn function_with_contract_annotations_parses() {
    let src = "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }";
    let program = parse_source(src).expect("parse");
    let Decl::Function(f) = &program.decls[0] else {
        panic!("expected a function");
    };
    assert_eq!(f.name.node, "divide");
    assert_eq!(f.params.len(), 2);
    assert!(matches!(
        f.annotations[0].kind,
        AnnotationKind::Requires(_)
    ));
}

#[test]
fn struct_with_invariant_and_defaults_parses() {
    let src = "struct Account { balance: Float64 = 0.0, owner: String, @invariant balance >= 0.0 }";
    let program = parse_source(src).expect("parse");
    let Decl::Struct(s) = &program.decls[0] else {
        panic!("expected a struct");
    };
    assert_eq!(s.fields.len(), 2);
    assert!(s.fields[0].default.is_some());
    assert!(matches!(
        s.annotations[0].kind,
        AnnotationKind::Invariant(_)
    ));
}

#[test]
fn enum_trait_and_impl_parse() {
    let src = "
enum Shape { Circle(Float64), Rect(Float64, Float64), Unit }
trait Printable: Display + Clone { fn print(self) -> Void; }
impl Printable for Shape { fn print(self) -> Void { return; } }
impl Shape { fn area(self) -> Float64 { return 0.0; } }
";
    let program = parse_source(src).expect("parse");
    assert_eq!(program.decls.len(), 4);
    let Decl::Trait(t) = &program.decls[1] else {
        panic!("expected a trait");
    };
    assert_eq!(t.supers.len(), 2);
    let Decl::Impl(i) = &program.decls[2] else {
        panic!("expected an impl");
    };
    assert!(i.trait_name.is_some());
}

#[test]
fn contract_intent_effect_capability_parse() {
    let src = "
contract NonNegative { @requires x >= 0 @ensures result >= 0 }
intent Sorting { @ensures forall i in result: i >= 0 }
effect IO { fn read() -> String; fn write(text: String) -> Void; }
capability Net { host: String, port: Int }
fn fetch(url: String) -> String
@effect[IO]
@capability Net { host: \"example.com\" }
@contract NonNegative
@verify(level: \"runtime\")
{ return IO.read(); }
";
    let program = parse_source(src).expect("parse");
    assert_eq!(program.decls.len(), 5);
    let Decl::Function(f) = &program.decls[4] else {
        panic!("expected a function");
    };
    assert_eq!(f.annotations.len(), 4);
}

#[test]
fn import_forms_parse() {
    let src = "
import std.math;
import std.io.*;
import std.collections.{HashMap as Map, HashSet};
";
    let program = parse_source(src).expect("parse");
    let Decl::Import(a) = &program.decls[0] else {
        panic!()
    };
    assert!(matches!(a.items, ImportItems::Module));
    let Decl::Import(b) = &program.decls[1] else {
        panic!()
    };
    assert!(matches!(b.items, ImportItems::Wildcard));
    let Decl::Import(c) = &program.decls[2] else {
        panic!()
    };
    let ImportItems::List(items) = &c.items else {
        panic!()
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].alias.as_ref().unwrap().node, "Map");
}

#[test]
fn export_wrapper_marks_functions() {
    let src = "export fn visible() -> Int { return 1; }";
    let program = parse_source(src).expect("parse");
    let Decl::Export(e) = &program.decls[0] else {
        panic!("expected export wrapper");
    };
    let Decl::Function(f) = e.decl.as_ref() else {
        panic!("expected wrapped function");
    };
    assert!(f.exported);
}

#[test]
fn expression_precedence_shapes() {
    let e = covenant_parse::parse_expr("1 + 2 * 3 ** 2").unwrap();
    // `**` binds tighter than `*`, which binds tighter than `+`.
    assert_eq!(covenant_parse::format_expr(&e), "1 + 2 * 3 ** 2");

    let e = covenant_parse::parse_expr("2 ** 3 ** 2").unwrap();
    let ExprKind::Binary { right, .. } = &e.kind else {
        panic!()
    };
    // Right-associative exponentiation.
    assert!(matches!(right.kind, ExprKind::Binary { .. }));

    let e = covenant_parse::parse_expr("a = b = 1").unwrap();
    let ExprKind::Assign { value, .. } = &e.kind else {
        panic!()
    };
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn postfix_chain_parses() {
    let e = covenant_parse::parse_expr("parse(s)?.value[0].next").unwrap();
    assert_eq!(
        covenant_parse::format_expr(&e),
        "parse(s)?.value[0].next"
    );
}

#[test]
fn lambda_forms_parse() {
    covenant_parse::parse_expr("|x: Int, y| -> Int x + y").unwrap();
    covenant_parse::parse_expr("|| 42").unwrap();
    covenant_parse::parse_expr("|x| { let y = x + 1; y }").unwrap();
}

#[test]
fn struct_literal_with_spread_parses() {
    let e = covenant_parse::parse_expr("Point { x: 1, ..base }").unwrap();
    let ExprKind::StructLit { fields, spread, .. } = &e.kind else {
        panic!()
    };
    assert_eq!(fields.len(), 1);
    assert!(spread.is_some());
}

#[test]
fn struct_literal_is_not_parsed_in_condition_head() {
    let src = "fn f(x: Int) -> Int { if x > 0 { return 1; } return 0; }";
    parse_source(src).expect("parse");
}

#[test]
fn match_patterns_parse() {
    let src = "
fn classify(s: Shape) -> Int {
    match s {
        Shape::Circle(r) if r > 0.0 => 1,
        Shape::Rect(w, h) => 2,
        Point { x, y: 0, .. } => 3,
        (a, b) => 4,
        1..=9 => 5,
        _ => 0,
    }
}
";
    let program = parse_source(src).expect("parse");
    let Decl::Function(f) = &program.decls[0] else {
        panic!()
    };
    let body = f.body.as_ref().unwrap();
    let Some(tail) = &body.tail else {
        panic!("match should be the block tail");
    };
    let ExprKind::Match { arms, .. } = &tail.kind else {
        panic!("expected match expression");
    };
    assert_eq!(arms.len(), 6);
    assert!(arms[0].guard.is_some());
    assert!(matches!(arms[2].pattern, Pattern::Struct { rest: true, .. }));
    assert!(matches!(
        arms[4].pattern,
        Pattern::Range {
            inclusive: true,
            ..
        }
    ));
}

#[test]
fn while_with_invariant_parses() {
    let src = "
fn count(n: Int) -> Int {
    let mut i = 0;
    while i < n
    @invariant i >= 0
    {
        i += 1;
    }
    return i;
}
";
    let program = parse_source(src).expect("parse");
    let Decl::Function(f) = &program.decls[0] else {
        panic!()
    };
    let Stmt::While(w) = &f.body.as_ref().unwrap().stmts[1] else {
        panic!("expected while");
    };
    assert_eq!(w.invariants.len(), 1);
}

#[test]
fn nested_generic_types_parse() {
    let src = "let x: Result<Option<Int>, [String]> = Ok(nil);";
    parse_source(src).expect("parse");
}

#[test]
fn unknown_annotation_is_reported_but_skipped() {
    let src = "fn f() -> Int @frobnicate { return 1; }";
    let (program, errors) = parse_source_with_recovery(src);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unknown annotation"));
    assert_eq!(program.decls.len(), 1);
}

#[test]
fn parse_recovers_at_declaration_boundaries() {
    let src = "
fn broken( { nope
fn ok() -> Int { return 1; }
let also_ok: Int = 2;
";
    let (program, errors) = parse_source_with_recovery(src);
    assert!(!errors.is_empty());
    // The two declarations after the bad one still parse.
    assert!(program
        .decls
        .iter()
        .any(|d| matches!(d, Decl::Function(f) if f.name.node == "ok")));
    assert!(program
        .decls
        .iter()
        .any(|d| matches!(d, Decl::Variable(v) if v.name.node == "also_ok")));
}

#[test]
fn reformatting_preserves_the_token_stream() {
    // Comments stripped and whitespace normalized, re-tokenizing the
    // canonical emission yields the same kinds and values as the original.
    let src = "fn divide(a: Int, b: Int) -> Int\n@requires b != 0 // nonzero\n{\n    /* body */\n    return a / b;\n}\n";
    let program = parse_source(src).expect("parse");
    let formatted = covenant_parse::format_program(&program);

    let kinds = |text: &str| -> Vec<covenant_lex::TokenKind> {
        let (tokens, errors) = covenant_lex::Lexer::new(text).lex();
        assert!(errors.is_empty());
        tokens.into_iter().map(|t| t.kind).collect()
    };
    assert_eq!(kinds(src), kinds(&formatted));
}

#[test]
fn child_spans_are_contained_in_parents() {
    let src = "fn f(a: Int) -> Int { let x = a * (a + 2); return x; }";
    let program = parse_source(src).expect("parse");
    let Decl::Function(f) = &program.decls[0] else {
        panic!()
    };
    let body = f.body.as_ref().unwrap();
    let parent = f.span;
    let child = body.span;
    assert!(child.offset() >= parent.offset());
    assert!(child.offset() + child.len() <= parent.offset() + parent.len());
    for stmt in &body.stmts {
        let s = stmt.span();
        assert!(s.offset() >= child.offset());
        assert!(s.offset() + s.len() <= child.offset() + child.len());
        assert!(s.offset() + s.len() <= src.len());
    }
}
