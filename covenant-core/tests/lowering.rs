use covenant_core::{compile, Dialect, ModuleSystem, Options, VerifyLevel};

fn lower(src: &str) -> String {
    let compilation = compile(src, &Options::default());
    assert!(
        compilation.success(),
        "unexpected diagnostics: {:?}",
        compilation.diagnostics
    );
    compilation.output.expect("output")
}

fn lower_with(src: &str, options: &Options) -> String {
    let compilation = compile(src, options);
    assert!(
        compilation.success(),
        "unexpected diagnostics: {:?}",
        compilation.diagnostics
    );
    compilation.output.expect("output")
}

fn no_contracts() -> Options {
    Options {
        runtime_contracts: false,
        ..Options::default()
    }
}

#[test]
fn prelude_always_carries_result_and_option_helpers() {
    let out = lower_with("fn id(x: Int) -> Int { return x; }", &no_contracts());
    for helper in [
        "function Ok(",
        "function Err(",
        "function isOk(",
        "function isErr(",
        "function unwrap(",
        "function Some(",
        "const None",
        "function isSome(",
        "function isNone(",
    ] {
        assert!(out.contains(helper), "missing {helper} in:\n{out}");
    }
    // Contract guards are gated on instrumentation.
    assert!(!out.contains("function requires("));
    assert!(!out.contains("function clone("));
}

#[test]
fn unwrap_fails_with_the_carried_error() {
    let out = lower("fn id(x: Int) -> Int { return x; }");
    assert!(out.contains("unwrap of Err: "));
    assert!(out.contains("throw new __ResultError(r.error);"));
}

#[test]
fn precondition_guards_are_emitted_with_clause_and_position() {
    let out = lower("fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }");
    assert!(out.contains("function requires("));
    assert!(out.contains("precondition failed"));
    assert!(out.contains("requires((b !== 0), \"b != 0\", \"<input>:1:44\");"));
    // Integer division truncates.
    assert!(out.contains("return Math.trunc(a / b);"));
}

#[test]
fn disabling_contracts_suppresses_guards_but_not_the_body() {
    let out = lower_with(
        "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }",
        &no_contracts(),
    );
    assert!(!out.contains("requires("));
    assert!(out.contains("return Math.trunc(a / b);"));
}

#[test]
fn trusted_verify_level_suppresses_guards() {
    let out = lower_with(
        "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }",
        &Options {
            verify_level: VerifyLevel::Trusted,
            ..Options::default()
        },
    );
    assert!(!out.contains("requires("));
}

#[test]
fn old_expressions_snapshot_before_the_body_runs() {
    let out = lower("fn inc(x: mut Int) -> Void @ensures x == old(x) + 1 { x += 1; }");
    let snapshot = out.find("const __old_0 = clone(x);").expect("snapshot");
    let body = out.find("(x += 1);").expect("body");
    let check = out.find("ensures((x === (__old_0 + 1))").expect("ensures");
    assert!(snapshot < body, "snapshot must precede the body:\n{out}");
    assert!(body < check, "ensures runs on the return path:\n{out}");
}

#[test]
fn ensures_rewrites_result_to_the_return_binding() {
    let out = lower("fn abs(x: Int) -> Int @ensures result >= 0 { return x * x; }");
    assert!(out.contains("const __ret = (x * x);"));
    assert!(out.contains("ensures((__ret >= 0)"));
    assert!(out.contains("return __ret;"));
}

#[test]
fn struct_lowers_to_constructor_with_invariant_checks() {
    let out = lower(
        "struct Account { balance: Float64 = 0.0, @invariant balance >= 0.0 }",
    );
    assert!(out.contains("function Account(balance) {"));
    assert!(out.contains("if (balance === undefined) { balance = 0.0; }"));
    assert!(out.contains("const __self = Object.create(Account.prototype);"));
    assert!(out.contains("__self.balance = balance;"));
    assert!(out.contains("invariant((__self.balance >= 0.0), \"balance >= 0.0\""));
    assert!(out.contains("invariant violated"));
}

#[test]
fn struct_literals_call_the_constructor_in_declaration_order() {
    let out = lower(
        "
struct Point { x: Int, y: Int }
fn make() -> Point { return Point { y: 2, x: 1 }; }
",
    );
    assert!(out.contains("return Point(1, 2);"));
}

#[test]
fn spread_struct_literals_copy_extend_without_the_constructor() {
    let out = lower(
        "
struct Point { x: Int, y: Int }
fn shift(p: Point) -> Point { return Point { x: 9, ..p }; }
",
    );
    assert!(out.contains("return { ...p, x: 9 };"));
}

#[test]
fn enums_lower_to_tagged_record_factories() {
    let out = lower_with(
        "
enum Shape { Circle(Float64), Unit }
fn c() -> Shape { return Shape::Circle(2.0); }
",
        &no_contracts(),
    );
    assert!(out.contains("Circle: function (f0) { return { tag: \"Circle\", fields: [f0] }; },"));
    assert!(out.contains("Unit: { tag: \"Unit\", fields: [] },"));
    assert!(out.contains("return Shape.Circle(2.0);"));
}

#[test]
fn match_lowering_tests_tags_and_raises_when_not_exhaustive() {
    let out = lower_with(
        "
enum Shape { Circle(Float64), Unit }
fn area(s: Shape) -> Float64 {
    match s {
        Shape::Circle(r) => r * r,
    }
}
",
        &no_contracts(),
    );
    assert!(out.contains(".tag === \"Circle\""));
    assert!(out.contains("const r = __m0.fields[0];"));
    assert!(out.contains("match not exhaustive"));
}

#[test]
fn wildcard_arms_suppress_the_exhaustiveness_raise() {
    let out = lower_with(
        "
fn sign(x: Int) -> Int {
    match x {
        0 => 0,
        _ => 1,
    }
}
",
        &no_contracts(),
    );
    assert!(!out.contains("match not exhaustive"));
}

#[test]
fn guards_are_rewritten_to_subject_paths() {
    let out = lower_with(
        "
enum Shape { Circle(Float64), Unit }
fn f(s: Shape) -> Int {
    match s {
        Shape::Circle(r) if r > 1.0 => 1,
        _ => 0,
    }
}
",
        &no_contracts(),
    );
    assert!(out.contains("(__m0.fields[0] > 1.0)"));
}

#[test]
fn try_lowers_to_unwrap_with_result_rewrapping() {
    let out = lower_with(
        "
fn parse(s: String) -> Result<Int, String> { return Err(\"bad\"); }
fn run(s: String) -> Result<Int, String> { return Ok(parse(s)? + 1); }
",
        &no_contracts(),
    );
    assert!(out.contains("(unwrap(parse(s)) + 1)"));
    assert!(out.contains("if (__e instanceof __ResultError) { return Err(__e.err); }"));
}

#[test]
fn quantifiers_lower_to_every_and_some() {
    let out = lower_with(
        "
fn all_pos(a: [Int]) -> Bool { return forall i in a: i >= 0; }
fn any_neg(a: [Int]) -> Bool { return exists i in a: i < 0; }
",
        &no_contracts(),
    );
    assert!(out.contains("(a).every((i) => ((i >= 0)))"));
    assert!(out.contains("(a).some((i) => ((i < 0)))"));
}

#[test]
fn power_lowers_to_math_pow() {
    let out = lower_with("fn sq(x: Int) -> Int { return x ** 2; }", &no_contracts());
    assert!(out.contains("return Math.pow(x, 2);"));
}

#[test]
fn references_and_derefs_are_erased() {
    let out = lower_with(
        "
struct Point { x: Int, y: Int }
fn get(p: &Point) -> Int { return p.x; }
",
        &no_contracts(),
    );
    assert!(out.contains("function get(p) {"));
    assert!(out.contains("return p.x;"));
}

#[test]
fn impl_methods_attach_to_the_prototype() {
    let out = lower_with(
        "
struct Counter { count: Int }
impl Counter {
    fn get(self) -> Int { return self.count; }
}
",
        &no_contracts(),
    );
    assert!(out.contains("Counter.prototype.get = function () {"));
    assert!(out.contains("const self = this;"));
    assert!(out.contains("return self.count;"));
}

#[test]
fn contract_references_inject_the_carried_clauses() {
    let out = lower(
        "
contract Positive { @requires x > 0 }
fn f(x: Int) -> Int @contract Positive { return x; }
",
    );
    assert!(out.contains("requires((x > 0), \"x > 0\""));
}

#[test]
fn module_system_switches_import_and_export_shapes() {
    let src = "
import std.collections.{HashMap as Map};
import std.io.*;
export fn visible() -> Int { return 1; }
";
    let esm = lower_with(src, &no_contracts());
    assert!(esm.contains("import { HashMap as Map } from \"./std/collections.js\";"));
    assert!(esm.contains("import * as io from \"./std/io.js\";"));
    assert!(esm.contains("export function visible() {"));

    let cjs = lower_with(
        src,
        &Options {
            runtime_contracts: false,
            module_system: ModuleSystem::CommonJs,
            ..Options::default()
        },
    );
    assert!(cjs.contains("const { HashMap: Map } = require(\"./std/collections.js\");"));
    assert!(cjs.contains("const io = require(\"./std/io.js\");"));
    assert!(cjs.contains("module.exports.visible = visible;"));
}

#[test]
fn typescript_dialect_emits_trait_interfaces() {
    let src = "trait Printable { fn print(self) -> Void; }";
    let js = lower_with(src, &no_contracts());
    assert!(!js.contains("interface Printable"));

    let ts = lower_with(
        src,
        &Options {
            runtime_contracts: false,
            dialect: Dialect::TypeScript,
            ..Options::default()
        },
    );
    assert!(ts.contains("interface Printable {"));
    assert!(ts.contains("print(...args: any[]): any;"));
}

#[test]
fn io_effect_gets_default_stdio_handlers() {
    let out = lower_with(
        "fn log(text: String) -> Void @effect[IO] { IO.write(text); }",
        &no_contracts(),
    );
    assert!(out.contains("const IO = {"));
    assert!(out.contains("process.stdout.write(String(text));"));
    assert!(out.contains("__fs.readFileSync(0, \"utf8\")"));
}

#[test]
fn user_effects_lower_to_identity_stub_records() {
    let out = lower_with(
        "
effect State {
    fn get() -> Int;
    fn set(value: Int) -> Void;
}
fn bump() -> Void @effect[State] { State.set(State.get() + 1); }
",
        &no_contracts(),
    );
    assert!(out.contains("const State = {"));
    assert!(out.contains("get: function () { return undefined; },"));
    assert!(out.contains("set: function (value) { return value; },"));
}

#[test]
fn instrumentation_is_passthrough_around_the_same_body() {
    let src = "fn divide(a: Int, b: Int) -> Int @requires b != 0 { return a / b; }";
    let on = lower(src);
    let off = lower_with(src, &no_contracts());
    // The computed body is identical; instrumentation only adds guards.
    assert!(on.contains("return Math.trunc(a / b);"));
    assert!(off.contains("return Math.trunc(a / b);"));
    assert!(on.contains("requires("));
    assert!(!off.contains("requires("));
}

#[test]
fn range_expressions_lower_to_array_builders() {
    let out = lower_with(
        "fn sum() -> Int { let mut n = 0; for i in 0..3 { n += i; } return n; }",
        &no_contracts(),
    );
    assert!(out.contains("Array.from("));
    assert!(out.contains("for (const i of"));
}

#[test]
fn loop_invariants_run_at_iteration_start() {
    let out = lower(
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
    let while_pos = out.find("while ((i < n)) {").expect("while");
    let inv_pos = out.find("invariant((i >= 0)").expect("invariant");
    let body_pos = out.find("(i += 1);").expect("body");
    assert!(while_pos < inv_pos && inv_pos < body_pos);
}
