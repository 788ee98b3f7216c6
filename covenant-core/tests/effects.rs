use covenant_core::{Checker, Severity};
use covenant_parse::parse_source;

fn diagnostics(src: &str) -> Vec<(Severity, String)> {
    let program = parse_source(src).expect("parse");
    let mut checker = Checker::new();
    checker.check_program(&program);
    checker
        .diagnostics()
        .iter()
        .map(|d| (d.severity, d.message.clone()))
        .collect()
}

fn errors(src: &str) -> Vec<String> {
    diagnostics(src)
        .into_iter()
        .filter(|(s, _)| *s == Severity::Error)
        .map(|(_, m)| m)
        .collect()
}

#[test]
fn caller_without_effect_fails_with_missing_effect() {
    let errs = errors(
        "
fn log(text: String) -> Void
@effect[IO]
{ IO.write(text); }

fn run() -> Void { log(\"hello\"); }
",
    );
    assert!(errs.iter().any(|m| m.contains("requires effect IO")));
}

#[test]
fn adding_the_effect_to_the_caller_removes_the_error() {
    let errs = errors(
        "
fn log(text: String) -> Void
@effect[IO]
{ IO.write(text); }

fn run() -> Void
@effect[IO]
{ log(\"hello\"); }
",
    );
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");
}

#[test]
fn effect_discipline_is_transitive_through_the_call_chain() {
    // `middle` declares IO so it may call `log`; `outer` does not, so the
    // call to `middle` is the error site.
    let errs = errors(
        "
fn log(text: String) -> Void
@effect[IO]
{ IO.write(text); }

fn middle() -> Void
@effect[IO]
{ log(\"x\"); }

fn outer() -> Void { middle(); }
",
    );
    assert_eq!(
        errs.iter()
            .filter(|m| m.contains("requires effect IO"))
            .count(),
        1
    );
}

#[test]
fn calling_effect_methods_directly_requires_the_effect() {
    let errs = errors("fn run() -> Void { IO.write(\"boom\"); }");
    assert!(errs.iter().any(|m| m.contains("requires effect IO")));
}

#[test]
fn user_declared_effects_join_the_discipline() {
    let errs = errors(
        "
effect State {
    fn get() -> Int;
    fn set(value: Int) -> Void;
}

fn bump() -> Void
@effect[State]
{ State.set(State.get() + 1); }

fn run() -> Void { bump(); }
",
    );
    assert!(errs.iter().any(|m| m.contains("requires effect State")));
}

#[test]
fn pure_functions_may_not_declare_effects() {
    let errs = errors(
        "
pure fn tainted() -> Int
@effect[IO]
{ return 1; }
",
    );
    assert!(errs
        .iter()
        .any(|m| m.contains("pure function 'tainted' may not declare effects")));
}

#[test]
fn unknown_effect_names_are_errors_and_non_effects_warn() {
    let errs = errors("fn f() -> Void @effect[Nope] { }");
    assert!(errs.iter().any(|m| m.contains("unknown effect 'Nope'")));

    let diags = diagnostics(
        "
struct Widget { id: Int }
fn f() -> Void @effect[Widget] { }
",
    );
    assert!(diags
        .iter()
        .any(|(s, m)| *s == Severity::Warning && m.contains("'Widget' is not an effect")));
}

#[test]
fn capability_annotations_resolve_by_name() {
    let errs = errors(
        "
capability Net { host: String, port: Int }

fn fetch() -> Void
@effect[IO]
@capability Net { host: \"example.com\", port: 443 }
{ }
",
    );
    assert!(errs.is_empty(), "unexpected errors: {errs:?}");

    let errs = errors("fn fetch() -> Void @capability Ghost { } { }");
    assert!(errs.iter().any(|m| m.contains("unknown capability 'Ghost'")));

    let errs = errors(
        "
capability Net { host: String }
fn fetch() -> Void @capability Net { region: \"eu\" } { }
",
    );
    assert!(errs
        .iter()
        .any(|m| m.contains("unknown permission 'region' on capability 'Net'")));
}
