//! End-to-end scenarios driven through the full pipeline.

use covenant_core::{compile, Options, Phase, Severity};

fn default_opts() -> Options {
    Options {
        file_name: "main.cov".to_string(),
        ..Options::default()
    }
}

#[test]
fn scenario_divide_with_precondition() {
    let src = "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }";
    let c = compile(src, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
    let out = c.output.unwrap();
    // Instrumented: a failing precondition raises before the body runs.
    assert!(out.contains("precondition failed"));
    assert!(out.contains("requires((b !== 0)"));
    assert!(out.contains("return Math.trunc(a / b);"));
}

#[test]
fn scenario_bank_account_invariant() {
    let src = "
struct Account {
    balance: Float64,
    @invariant balance >= 0.0
}
fn open(initial: Float64) -> Account {
    return Account { balance: initial };
}
";
    let c = compile(src, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
    let out = c.output.unwrap();
    assert!(out.contains("invariant((__self.balance >= 0.0)"));
    assert!(out.contains("invariant violated"));
    assert!(out.contains("return Account(initial);"));
}

#[test]
fn scenario_sorted_forall_without_instrumentation() {
    let src = "fn check(a: [Int]) -> Bool { return forall i in a: i >= 0; }";
    let c = compile(
        src,
        &Options {
            runtime_contracts: false,
            ..default_opts()
        },
    );
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
    let out = c.output.unwrap();
    assert!(out.contains("return (a).every((i) => ((i >= 0)));"));
}

#[test]
fn scenario_effect_discipline() {
    let bad = "
fn log(text: String) -> Void @effect[IO] { IO.write(text); }
fn run() -> Void { log(\"x\"); }
";
    let c = compile(bad, &default_opts());
    assert!(!c.success());
    assert!(c
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error && d.message.contains("requires effect IO")));

    let good = "
fn log(text: String) -> Void @effect[IO] { IO.write(text); }
fn run() -> Void @effect[IO] { log(\"x\"); }
";
    let c = compile(good, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
}

#[test]
fn scenario_try_propagation() {
    let src = "
fn parse(s: String) -> Result<Int, String> { return Err(\"bad\"); }
fn run(s: String) -> Result<Int, String> { return Ok(parse(s)? + 1); }
";
    let c = compile(src, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
    let out = c.output.unwrap();
    // `?` is exactly `unwrap(…)`; the Result-returning wrapper turns the
    // carried error back into `Err(e)` instead of crashing.
    assert!(out.contains("unwrap(parse(s))"));
    assert!(out.contains("if (__e instanceof __ResultError) { return Err(__e.err); }"));
}

#[test]
fn scenario_quantified_ensures_with_old() {
    let src = "fn inc(x: mut Int) -> Void @ensures x == old(x) + 1 { x += 1; }";
    let c = compile(src, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
    let out = c.output.unwrap();
    let snapshot = out.find("const __old_0 = clone(x);").unwrap();
    let mutation = out.find("(x += 1);").unwrap();
    let check = out.find("ensures((x === (__old_0 + 1))").unwrap();
    assert!(snapshot < mutation && mutation < check);
    assert!(out.contains("postcondition failed"));
}

#[test]
fn diagnostics_arrive_in_pipeline_order_and_nothing_aborts() {
    // One lexical error, one syntax error, one type error: all reported in
    // a single invocation, lexer first.
    let src = "
let bad_char = 1 $ 2;
fn broken( { }
fn typed() -> Int { return true; }
";
    let c = compile(src, &default_opts());
    assert!(!c.success());
    let phases: Vec<Phase> = c
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.phase)
        .collect();
    assert!(phases.contains(&Phase::Lexer));
    assert!(phases.contains(&Phase::Parser));
    assert!(phases.contains(&Phase::Analyzer));
    let first_lexer = phases.iter().position(|p| *p == Phase::Lexer).unwrap();
    let last_parser = phases.iter().rposition(|p| *p == Phase::Parser).unwrap();
    let first_analyzer = phases.iter().position(|p| *p == Phase::Analyzer).unwrap();
    assert!(first_lexer < last_parser || first_lexer < first_analyzer);
    assert!(last_parser < first_analyzer);
}

#[test]
fn stop_on_first_error_short_circuits_between_stages() {
    let src = "fn broken( { }";
    let c = compile(
        src,
        &Options {
            stop_on_first_error: true,
            ..default_opts()
        },
    );
    assert!(!c.success());
    assert!(c.diagnostics.iter().all(|d| d.phase != Phase::Analyzer));
    assert!(c.output.is_none());
}

#[test]
fn rendered_diagnostics_follow_the_phase_file_line_column_format() {
    let src = "fn f() -> Int { return missing; }";
    let c = compile(src, &default_opts());
    let rendered = c.render_diagnostics(src, "main.cov");
    assert!(rendered
        .iter()
        .any(|l| l.starts_with("[analyzer] main.cov:1:24: undefined identifier 'missing'")));
}

#[test]
fn output_is_withheld_only_from_failed_compilations() {
    let ok = compile("fn f() -> Int { return 1; }", &default_opts());
    assert!(ok.success() && ok.output.is_some());

    // Lowering still runs best-effort on error trees, but callers gate on
    // success() before using the artifact.
    let bad = compile("fn f() -> Int { return missing; }", &default_opts());
    assert!(!bad.success());
}

#[test]
fn repl_style_wrapper_compiles_without_special_cases() {
    // What the REPL synthesizes for a bare expression chunk.
    let src = "fn __repl_eval_1() -> Void @effect[IO] { let __it = 1 + 2; }";
    let c = compile(src, &default_opts());
    assert!(c.success(), "diagnostics: {:?}", c.diagnostics);
}
