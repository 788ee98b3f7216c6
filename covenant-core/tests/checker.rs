use covenant_core::{Checker, Severity};
use covenant_parse::parse_source;

fn check_ok(src: &str) -> Checker {
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker.finish().expect("sema");
    checker
}

fn check_errors(src: &str) -> Vec<String> {
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

fn check_warnings(src: &str) -> Vec<String> {
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .map(|d| d.message.clone())
        .collect()
}

#[test]
fn forward_references_resolve_across_collection() {
    check_ok(
        "
fn open() -> Account { return Account { balance: 1.0 }; }
struct Account { balance: Float64 }
",
    );
}

#[test]
fn variable_inference_adopts_initializer_type() {
    check_ok(
        "
fn f() -> Int {
    let x = 1;
    let y: Int64 = x;
    let z: Float64 = 2.5;
    return x;
}
",
    );
    let errors = check_errors("fn f() -> Void { let x; }");
    assert!(errors.iter().any(|m| m.contains("cannot infer type")));
}

#[test]
fn narrowing_initialization_is_rejected() {
    let errors = check_errors("let x: Int8 = 9 as Int32;");
    assert!(errors.iter().any(|m| m.contains("cannot assign")));
}

#[test]
fn undefined_identifier_reports_once_and_recovers() {
    let errors = check_errors("fn f() -> Int { return missing + 1; }");
    // `missing` errors, but the `+` does not cascade a second error.
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("undefined identifier 'missing'"));
}

#[test]
fn duplicate_definitions_in_one_scope_fail() {
    let errors = check_errors("fn f() -> Void { let x = 1; let x = 2; }");
    assert!(errors.iter().any(|m| m.contains("duplicate definition of 'x'")));
    // Shadowing in an inner scope is fine.
    check_ok("fn f() -> Void { let x = 1; { let x = true; } }");
}

#[test]
fn assignment_requires_mutability() {
    let errors = check_errors("fn f() -> Void { let x = 1; x = 2; }");
    assert!(errors
        .iter()
        .any(|m| m.contains("cannot assign to immutable 'x'")));
    check_ok("fn f() -> Void { let mut x = 1; x = 2; x += 3; }");
}

#[test]
fn condition_must_be_bool() {
    let errors = check_errors("fn f() -> Void { if 1 { } }");
    assert!(errors.iter().any(|m| m.contains("condition must be Bool")));
}

#[test]
fn arithmetic_widens_numeric_operands() {
    let checker = check_ok("fn f(a: Int, b: Float64) -> Float64 { return a + b; }");
    // The whole body was typed: the expression map is populated.
    assert!(checker.expr_type_count() > 0);
}

#[test]
fn generic_struct_field_access_substitutes_arguments() {
    check_ok(
        "
struct Box<T> { value: T }
fn f(b: Box<Int>) -> Int { return b.value; }
",
    );
}

#[test]
fn generic_enum_match_binds_field_types() {
    check_ok(
        "
enum Maybe<T> { Just(T), Nothing }
fn f(m: Maybe<Int>) -> Int {
    match m {
        Maybe::Just(v) => v,
        Maybe::Nothing => 0,
    }
}
",
    );
}

#[test]
fn unknown_variant_and_wrong_arity_are_errors() {
    let errors = check_errors(
        "
enum Shape { Circle(Float64) }
fn f(s: Shape) -> Void {
    match s {
        Shape::Square(x) => x,
        _ => 0,
    };
}
",
    );
    assert!(errors.iter().any(|m| m.contains("unknown variant 'Square'")));
}

#[test]
fn match_arms_of_differing_types_warn() {
    let warnings = check_warnings(
        "
fn f(x: Int) -> Void {
    match x {
        0 => 1,
        _ => \"other\",
    };
}
",
    );
    assert!(warnings
        .iter()
        .any(|m| m.contains("match arms have differing types")));
}

#[test]
fn if_branches_of_differing_types_warn_and_adopt_then_type() {
    let warnings = check_warnings(
        "fn f(c: Bool) -> Int { return if c { 1 } else { \"no\" }; }",
    );
    assert!(warnings
        .iter()
        .any(|m| m.contains("if branches have differing types")));
}

#[test]
fn member_access_through_references_auto_derefs() {
    check_ok(
        "
struct Point { x: Int, y: Int }
fn f(p: &Point) -> Int { return p.x; }
fn g(p: &mut Point) -> Int { return p.y; }
",
    );
}

#[test]
fn tuple_indexing_is_bounds_checked() {
    check_ok("fn f(t: (Int, Bool)) -> Bool { return t.1; }");
    let errors = check_errors("fn f(t: (Int, Bool)) -> Bool { return t[2]; }");
    assert!(errors.iter().any(|m| m.contains("out of bounds")));
}

#[test]
fn impl_methods_bind_self() {
    check_ok(
        "
struct Counter { count: Int }
impl Counter {
    fn get(self) -> Int { return self.count; }
}
fn f(c: Counter) -> Int { return c.get(); }
",
    );
}

#[test]
fn trait_with_unknown_super_is_an_error() {
    let errors = check_errors("trait Fancy: Missing { }");
    assert!(errors.iter().any(|m| m.contains("unknown trait 'Missing'")));
}

#[test]
fn type_alias_resolves_and_cycles_are_reported() {
    check_ok(
        "
type Meters = Float64;
fn f(d: Meters) -> Float64 { return d; }
",
    );
    let errors = check_errors(
        "
type A = B;
type B = A;
let x: A = 0;
",
    );
    assert!(errors.iter().any(|m| m.contains("cyclic type alias")));
}

#[test]
fn imports_introduce_opaque_names() {
    check_ok(
        "
import std.collections.{HashMap as Map};
import std.io.*;
fn f() -> Void { let m = Map; let reader = io; }
",
    );
}

#[test]
fn return_type_checking() {
    let errors = check_errors("fn f() -> Int { return true; }");
    assert!(errors.iter().any(|m| m.contains("return type mismatch")));
    let errors = check_errors("fn f() -> Int { return; }");
    assert!(errors.iter().any(|m| m.contains("missing return value")));
    check_ok("fn f() -> Void { return; }");
}

#[test]
fn for_loop_infers_element_types() {
    check_ok(
        "
fn sum(xs: [Int]) -> Int {
    let mut total = 0;
    for x in xs {
        total += x;
    }
    return total;
}
fn over_range() -> Int {
    let mut n = 0;
    for i in 0..10 {
        n += i;
    }
    return n;
}
",
    );
}

#[test]
fn every_checked_expression_has_a_recorded_type() {
    let src = "
struct Account { balance: Float64 }
fn credit(a: Account, amount: Float64) -> Float64 {
    let next = a.balance + amount;
    return next;
}
";
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker.finish().expect("sema");

    // `a.balance + amount`, `a.balance`, `a`, `amount`, `next` all appear in
    // the position-keyed map with concrete types.
    let probe = |needle: &str, len: usize| {
        let offset = src.find(needle).unwrap();
        checker
            .expr_type(covenant_ast::span_between(offset, offset + len))
            .cloned()
    };
    let sum = probe("a.balance + amount", "a.balance + amount".len()).expect("sum typed");
    assert_eq!(sum, covenant_core::Type::Float64);
    let field = probe("a.balance", "a.balance".len()).expect("field typed");
    assert_eq!(field, covenant_core::Type::Float64);
}
