use covenant_core::{Checker, Severity};
use covenant_parse::parse_source;

fn checked(src: &str) -> Checker {
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker
}

fn errors(src: &str) -> Vec<String> {
    checked(src)
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

#[test]
fn divide_with_precondition_checks_clean() {
    let checker = checked(
        "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }",
    );
    checker.finish().expect("no errors");
}

#[test]
fn contract_clauses_must_be_bool() {
    let errs = errors("fn f(x: Int) -> Int @requires x + 1 { return x; }");
    assert!(errs
        .iter()
        .any(|m| m.contains("requires clause must be Bool")));

    let errs = errors("fn f(x: Int) -> Int @ensures result { return x; }");
    assert!(errs.iter().any(|m| m.contains("ensures clause must be Bool")));
}

#[test]
fn result_resolves_to_the_return_type_in_ensures() {
    let checker = checked(
        "fn abs(x: Int) -> Int @ensures result >= 0 { return if x < 0 { -x } else { x }; }",
    );
    checker.finish().expect("no errors");
}

#[test]
fn result_outside_contract_context_is_an_error() {
    let errs = errors("fn f() -> Int { return result; }");
    assert!(errs
        .iter()
        .any(|m| m.contains("'result' is only legal in contract context")));
}

#[test]
fn old_is_contract_only_and_carries_its_argument_type() {
    let checker = checked(
        "fn inc(x: mut Int) -> Void @ensures x == old(x) + 1 { x += 1; }",
    );
    checker.finish().expect("no errors");

    let errs = errors("fn f(x: Int) -> Int { return old(x); }");
    assert!(errs
        .iter()
        .any(|m| m.contains("'old' is only legal in contract context")));
}

#[test]
fn quantifiers_over_collections_are_legal_anywhere() {
    let checker = checked("fn check(a: [Int]) -> Bool { return forall i in a: i >= 0; }");
    checker.finish().expect("no errors");

    // Unbounded binders stay confined to contract clauses.
    let errs = errors("fn f() -> Bool { return forall i: i >= 0; }");
    assert!(errs
        .iter()
        .any(|m| m.contains("unbounded binders is only legal in contract context")));

    let checker = checked(
        "fn f(x: Int) -> Int @ensures forall i: result >= 0 || i == i { return x; }",
    );
    checker.finish().expect("no errors");
}

#[test]
fn quantifier_bodies_must_be_bool() {
    let errs = errors("fn f(a: [Int]) -> Bool { return exists i in a: i + 1; }");
    assert!(errs
        .iter()
        .any(|m| m.contains("quantifier body must be Bool")));
}

#[test]
fn struct_invariants_see_fields_and_must_be_bool() {
    let checker = checked(
        "struct Account { balance: Float64, @invariant balance >= 0.0 }",
    );
    checker.finish().expect("no errors");
    let def = checker.structs.get("Account").expect("collected");
    assert_eq!(def.invariants, vec!["balance >= 0.0".to_string()]);

    let errs = errors("struct Weird { n: Int, @invariant n + 1 }");
    assert!(errs
        .iter()
        .any(|m| m.contains("invariant clause must be Bool")));
}

#[test]
fn contract_declarations_are_collected_as_serialized_clauses() {
    let checker = checked(
        "
contract NonNegative {
    @requires x >= 0
    @ensures result >= 0
}
fn f(x: Int) -> Int @contract NonNegative { return x; }
",
    );
    checker.finish().expect("no errors");
    let def = checker.contracts.get("NonNegative").expect("collected");
    assert_eq!(def.requires, vec!["x >= 0".to_string()]);
    assert_eq!(def.ensures, vec!["result >= 0".to_string()]);
}

#[test]
fn unknown_contract_and_intent_references_are_errors() {
    let errs = errors("fn f() -> Void @contract Missing { }");
    assert!(errs.iter().any(|m| m.contains("unknown contract 'Missing'")));

    let errs = errors("fn f() -> Void @intent Missing { }");
    assert!(errs.iter().any(|m| m.contains("unknown intent 'Missing'")));
}

#[test]
fn intents_collect_their_ensures() {
    let checker = checked(
        "
intent Doubling { @ensures result == old(x) * 2 }
fn double(x: mut Int) -> Int @intent Doubling { return x * 2; }
",
    );
    checker.finish().expect("no errors");
    let def = checker.intents.get("Doubling").expect("collected");
    assert_eq!(def.ensures.len(), 1);
}

#[test]
fn try_operator_requires_result_on_both_sides() {
    let checker = checked(
        "
fn parse(s: String) -> Result<Int, String> { return Err(\"bad\"); }
fn run(s: String) -> Result<Int, String> {
    return Ok(parse(s)? + 1);
}
",
    );
    checker.finish().expect("no errors");

    let errs = errors(
        "
fn parse(s: String) -> Result<Int, String> { return Err(\"bad\"); }
fn run(s: String) -> Int { return parse(s)?; }
",
    );
    assert!(errs
        .iter()
        .any(|m| m.contains("'?' requires the enclosing function to return Result")));

    let errs = errors("fn f(x: Int) -> Result<Int, String> { return Ok(x?); }");
    assert!(errs.iter().any(|m| m.contains("'?' applied to non-Result")));
}

#[test]
fn loop_invariants_are_checked_in_contract_mode() {
    let checker = checked(
        "
fn count(n: Int) -> Int {
    let mut i = 0;
    while i < n
    @invariant i >= 0
    {
        i += 1;
    }
    return i;
}
",
    );
    checker.finish().expect("no errors");

    let errs = errors(
        "
fn count(n: Int) -> Void {
    let mut i = 0;
    while i < n
    @invariant i + 1
    { i += 1; }
}
",
    );
    assert!(errs
        .iter()
        .any(|m| m.contains("invariant clause must be Bool")));
}
