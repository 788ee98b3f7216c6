#![forbid(unsafe_code)]

use std::collections::HashMap;

use covenant_ast::{
    Annotation, AnnotationKind, AssignOp, BinOp, Block, Decl, ElseBranch, Expr, ExprKind, FnDecl,
    IfStmt, ImportDecl, ImportItems, LineMap, Literal, MatchArm, Pattern, Program, Span, Stmt,
    StructDecl, TypeExpr, TypeExprKind, UnaryOp,
};
use covenant_parse::format_expr;

use crate::compile::{Dialect, ModuleSystem, Options, VerifyLevel};
use crate::error::LowerError;
use crate::sema::Checker;
use crate::types::{is_float, is_integer, Type};

const INDENT: &str = "  ";

/// Emit target text for a checked program.
///
/// The tree is assumed to have been through the checker; lowering is
/// best-effort on trees that carry errors, and internal inconsistencies
/// surface as `LowerError` (mapped to a codegen diagnostic by the pipeline).
pub fn lower_program(
    program: &Program,
    checker: &Checker,
    options: &Options,
    file: &str,
    line_map: &LineMap,
) -> Result<String, LowerError> {
    let mut lower = Lowerer {
        checker,
        options,
        file,
        line_map,
        struct_decls: HashMap::new(),
        out: String::new(),
        indent: 0,
        tmp: 0,
        fn_ctx: None,
        rewrites: Vec::new(),
    };

    for decl in all_decls(program) {
        if let Decl::Struct(s) = decl {
            lower.struct_decls.insert(s.name.node.clone(), s);
        }
    }

    let declares_io = all_decls(program)
        .any(|d| matches!(d, Decl::Effect(e) if e.name.node == "IO"));

    lower.emit_prelude(declares_io);
    for decl in &program.decls {
        lower.emit_decl(decl, false)?;
    }

    Ok(lower.out)
}

fn all_decls(program: &Program) -> impl Iterator<Item = &Decl> {
    fn unwrap(decl: &Decl) -> &Decl {
        match decl {
            Decl::Export(e) => unwrap(&e.decl),
            other => other,
        }
    }
    program.decls.iter().map(unwrap)
}

struct FnCtx {
    /// `(condition, clause text, source location)` per postcondition.
    ensures: Vec<(Expr, String, String)>,
    /// Snapshot bindings: canonical source of the `old(·)` argument → name.
    olds: Vec<(String, String)>,
    ret_is_result: bool,
}

struct Lowerer<'a> {
    checker: &'a Checker,
    options: &'a Options,
    file: &'a str,
    line_map: &'a LineMap,
    struct_decls: HashMap<String, &'a StructDecl>,
    out: String,
    indent: usize,
    tmp: u32,
    fn_ctx: Option<FnCtx>,
    /// Identifier rewrite frames: invariant fields to `__self.…`, `result`
    /// to the return binding, guard references to subject paths.
    rewrites: Vec<HashMap<String, String>>,
}

impl<'a> Lowerer<'a> {
    fn instrument(&self) -> bool {
        self.options.runtime_contracts && self.options.verify_level != VerifyLevel::Trusted
    }

    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn loc(&self, span: Span) -> String {
        let (line, col) = self.line_map.line_col_of(span);
        format!("{}:{}:{}", self.file, line, col)
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let n = self.tmp;
        self.tmp += 1;
        format!("__{prefix}{n}")
    }

    // -----------------------------------------------------------------------
    // Runtime prelude
    // -----------------------------------------------------------------------

    fn emit_prelude(&mut self, declares_io: bool) {
        match self.options.module_system {
            ModuleSystem::Esm => self.line("import * as __fs from \"node:fs\";"),
            ModuleSystem::CommonJs => self.line("const __fs = require(\"node:fs\");"),
        }
        self.blank();

        // Result/Option runtime: lowered code references these
        // unconditionally (`e?` becomes `unwrap(e)`), so they are not gated
        // on instrumentation.
        self.line("class __ResultError extends Error {");
        self.line("  constructor(err) {");
        self.line("    super(\"unwrap of Err: \" + String(err));");
        self.line("    this.err = err;");
        self.line("  }");
        self.line("}");
        self.line("function Ok(value) { return { ok: true, value: value }; }");
        self.line("function Err(error) { return { ok: false, error: error }; }");
        self.line("function isOk(r) { return r !== null && r !== undefined && r.ok === true; }");
        self.line("function isErr(r) { return r !== null && r !== undefined && r.ok === false; }");
        self.line("function unwrap(r) {");
        self.line("  if (isOk(r)) { return r.value; }");
        self.line("  if (isErr(r)) { throw new __ResultError(r.error); }");
        self.line("  throw new __ResultError(r);");
        self.line("}");
        self.line("const None = null;");
        self.line("function Some(value) { return value; }");
        self.line("function isSome(v) { return v !== null && v !== undefined; }");
        self.line("function isNone(v) { return v === null || v === undefined; }");
        self.blank();

        if self.instrument() {
            self.line("function assert(cond, clause, loc) {");
            self.line("  if (!cond) { throw new Error(\"assertion failed: \" + clause + \" at \" + loc); }");
            self.line("}");
            self.line("function requires(cond, clause, loc) {");
            self.line("  if (!cond) { throw new Error(\"precondition failed: \" + clause + \" at \" + loc); }");
            self.line("}");
            self.line("function ensures(cond, clause, loc) {");
            self.line("  if (!cond) { throw new Error(\"postcondition failed: \" + clause + \" at \" + loc); }");
            self.line("}");
            self.line("function invariant(cond, clause, loc) {");
            self.line("  if (!cond) { throw new Error(\"invariant violated: \" + clause + \" at \" + loc); }");
            self.line("}");
            self.line("function clone(v) {");
            self.line("  if (Array.isArray(v)) { return v.map(clone); }");
            self.line("  if (v !== null && typeof v === \"object\") {");
            self.line("    const out = Object.create(Object.getPrototypeOf(v));");
            self.line("    for (const k of Object.keys(v)) { out[k] = clone(v[k]); }");
            self.line("    return out;");
            self.line("  }");
            self.line("  return v;");
            self.line("}");
            self.blank();
        }

        if !declares_io {
            self.emit_io_record();
        }
    }

    fn emit_io_record(&mut self) {
        self.line("const IO = {");
        self.line("  read: function () {");
        self.line("    try { return __fs.readFileSync(0, \"utf8\"); } catch (_e) { return \"\"; }");
        self.line("  },");
        self.line("  write: function (text) { process.stdout.write(String(text)); },");
        self.line("};");
        self.blank();
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn emit_decl(&mut self, decl: &Decl, exported: bool) -> Result<(), LowerError> {
        match decl {
            Decl::Export(e) => self.emit_decl(&e.decl, true),
            Decl::Function(f) => self.emit_fn(f, FnKind::Free { exported }),
            Decl::Variable(v) => {
                let init = match &v.init {
                    Some(e) => self.js(e),
                    None => "undefined".to_string(),
                };
                let kw = if v.mutable { "let" } else { "const" };
                let export_prefix = self.esm_export_prefix(exported);
                self.line(&format!("{export_prefix}{kw} {} = {init};", v.name.node));
                self.emit_cjs_export(exported, &v.name.node);
                Ok(())
            }
            Decl::Struct(s) => {
                self.emit_struct(s, exported);
                Ok(())
            }
            Decl::Enum(e) => {
                let export_prefix = self.esm_export_prefix(exported);
                self.line(&format!("{export_prefix}const {} = {{", e.name.node));
                self.indent += 1;
                for v in &e.variants {
                    if v.fields.is_empty() {
                        self.line(&format!(
                            "{}: {{ tag: \"{}\", fields: [] }},",
                            v.name.node, v.name.node
                        ));
                    } else {
                        let params: Vec<String> =
                            (0..v.fields.len()).map(|i| format!("f{i}")).collect();
                        self.line(&format!(
                            "{}: function ({}) {{ return {{ tag: \"{}\", fields: [{}] }}; }},",
                            v.name.node,
                            params.join(", "),
                            v.name.node,
                            params.join(", ")
                        ));
                    }
                }
                self.indent -= 1;
                self.line("};");
                self.emit_cjs_export(exported, &e.name.node);
                self.blank();
                Ok(())
            }
            Decl::Trait(t) => {
                // Static only; TypeScript gets an interface form.
                if self.options.dialect == Dialect::TypeScript {
                    self.line(&format!("interface {} {{", t.name.node));
                    self.indent += 1;
                    for m in &t.methods {
                        self.line(&format!("{}(...args: any[]): any;", m.name.node));
                    }
                    self.indent -= 1;
                    self.line("}");
                    self.blank();
                }
                Ok(())
            }
            Decl::Impl(i) => {
                let type_name = match &i.target.kind {
                    TypeExprKind::Named { name, .. } => name.node.clone(),
                    _ => {
                        return Err(LowerError {
                            message: "impl target must be a nominal type".to_string(),
                            span: i.target.span,
                        });
                    }
                };
                for m in &i.methods {
                    self.emit_fn(m, FnKind::Method { type_name: &type_name })?;
                }
                Ok(())
            }
            Decl::Effect(e) => {
                self.emit_effect_record(e, exported);
                Ok(())
            }
            // Purely static declarations emit nothing.
            Decl::Contract(_) | Decl::Intent(_) | Decl::Capability(_) | Decl::TypeAlias(_) => {
                Ok(())
            }
            Decl::Import(im) => {
                self.emit_import(im);
                Ok(())
            }
        }
    }

    fn esm_export_prefix(&self, exported: bool) -> &'static str {
        if exported && self.options.module_system == ModuleSystem::Esm {
            "export "
        } else {
            ""
        }
    }

    fn emit_cjs_export(&mut self, exported: bool, name: &str) {
        if exported && self.options.module_system == ModuleSystem::CommonJs {
            self.line(&format!("module.exports.{name} = {name};"));
        }
    }

    fn emit_import(&mut self, im: &ImportDecl) {
        let path_of = |segs: &[covenant_ast::Ident]| {
            segs.iter()
                .map(|s| s.node.as_str())
                .collect::<Vec<_>>()
                .join("/")
        };
        match &im.items {
            // Plain and wildcard imports bind the final path segment.
            ImportItems::Module | ImportItems::Wildcard => {
                let Some(last) = im.path.last() else { return };
                let path = path_of(&im.path);
                match self.options.module_system {
                    ModuleSystem::Esm => self.line(&format!(
                        "import * as {} from \"./{path}.js\";",
                        last.node
                    )),
                    ModuleSystem::CommonJs => self.line(&format!(
                        "const {} = require(\"./{path}.js\");",
                        last.node
                    )),
                }
            }
            ImportItems::List(items) => {
                let path = path_of(&im.path);
                match self.options.module_system {
                    ModuleSystem::Esm => {
                        let list = items
                            .iter()
                            .map(|i| match &i.alias {
                                Some(a) => format!("{} as {}", i.name.node, a.node),
                                None => i.name.node.clone(),
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.line(&format!("import {{ {list} }} from \"./{path}.js\";"));
                    }
                    ModuleSystem::CommonJs => {
                        let list = items
                            .iter()
                            .map(|i| match &i.alias {
                                Some(a) => format!("{}: {}", i.name.node, a.node),
                                None => i.name.node.clone(),
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.line(&format!("const {{ {list} }} = require(\"./{path}.js\");"));
                    }
                }
            }
        }
    }

    fn emit_effect_record(&mut self, e: &covenant_ast::EffectDecl, exported: bool) {
        let export_prefix = self.esm_export_prefix(exported);
        self.line(&format!("{export_prefix}const {} = {{", e.name.node));
        self.indent += 1;
        for m in &e.methods {
            let is_io = e.name.node == "IO";
            if is_io && m.name.node == "read" {
                self.line("read: function () {");
                self.line("  try { return __fs.readFileSync(0, \"utf8\"); } catch (_e) { return \"\"; }");
                self.line("},");
            } else if is_io && m.name.node == "write" {
                let param = m
                    .params
                    .first()
                    .map(|p| p.name.node.clone())
                    .unwrap_or_else(|| "text".to_string());
                self.line(&format!(
                    "write: function ({param}) {{ process.stdout.write(String({param})); }},"
                ));
            } else {
                // Identity stubs; hosts can overwrite the handler slots.
                let params: Vec<String> =
                    m.params.iter().map(|p| p.name.node.clone()).collect();
                let body = match params.first() {
                    Some(first) => format!("return {first};"),
                    None => "return undefined;".to_string(),
                };
                self.line(&format!(
                    "{}: function ({}) {{ {body} }},",
                    m.name.node,
                    params.join(", ")
                ));
            }
        }
        self.indent -= 1;
        self.line("};");
        self.emit_cjs_export(exported, &e.name.node);
        self.blank();
    }

    fn emit_struct(&mut self, s: &StructDecl, exported: bool) {
        let name = &s.name.node;
        let params: Vec<String> = s.fields.iter().map(|f| f.name.node.clone()).collect();
        let export_prefix = self.esm_export_prefix(exported);
        self.line(&format!(
            "{export_prefix}function {name}({}) {{",
            params.join(", ")
        ));
        self.indent += 1;

        for f in &s.fields {
            if let Some(default) = &f.default {
                let js = self.js(default);
                self.line(&format!(
                    "if ({0} === undefined) {{ {0} = {js}; }}",
                    f.name.node
                ));
            }
        }

        self.line(&format!("const __self = Object.create({name}.prototype);"));
        for f in &s.fields {
            self.line(&format!("__self.{0} = {0};", f.name.node));
        }

        if self.instrument() {
            let mut frame = HashMap::new();
            for f in &s.fields {
                frame.insert(f.name.node.clone(), format!("__self.{}", f.name.node));
            }
            self.rewrites.push(frame);
            let invariants: Vec<&Expr> = s
                .annotations
                .iter()
                .chain(s.fields.iter().flat_map(|f| f.annotations.iter()))
                .filter_map(|ann| match &ann.kind {
                    AnnotationKind::Invariant(e) => Some(e),
                    _ => None,
                })
                .collect();
            for inv in invariants {
                let cond = self.js(inv);
                let clause = js_string(&format_expr(inv));
                let loc = js_string(&self.loc(inv.span));
                self.line(&format!("invariant({cond}, {clause}, {loc});"));
            }
            self.rewrites.pop();
        }

        self.line("return __self;");
        self.indent -= 1;
        self.line("}");
        self.emit_cjs_export(exported, name);
        self.blank();
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    fn emit_fn(&mut self, f: &FnDecl, kind: FnKind) -> Result<(), LowerError> {
        let Some(body) = &f.body else {
            // Signature-only declarations (extern, trait methods) have no
            // runtime form.
            return Ok(());
        };

        let mut requires: Vec<(Expr, String)> = Vec::new();
        let mut ensures: Vec<(Expr, String)> = Vec::new();
        for ann in &f.annotations {
            match &ann.kind {
                AnnotationKind::Requires(e) => requires.push((e.clone(), self.loc(e.span))),
                AnnotationKind::Ensures(e) => ensures.push((e.clone(), self.loc(e.span))),
                AnnotationKind::Contract { name, .. } => {
                    // Referenced contracts contribute their carried clauses.
                    if let Some(def) = self.checker.contracts.get(&name.node) {
                        let loc = self.loc(name.span);
                        for src in &def.requires {
                            if let Ok(e) = covenant_parse::parse_expr(src) {
                                requires.push((e, loc.clone()));
                            }
                        }
                        for src in &def.ensures {
                            if let Ok(e) = covenant_parse::parse_expr(src) {
                                ensures.push((e, loc.clone()));
                            }
                        }
                    }
                }
                AnnotationKind::Intent { name, .. } => {
                    if let Some(def) = self.checker.intents.get(&name.node) {
                        let loc = self.loc(name.span);
                        for src in &def.ensures {
                            if let Ok(e) = covenant_parse::parse_expr(src) {
                                ensures.push((e, loc.clone()));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let ret_is_result = self.fn_ret_is_result(f, &kind);

        let params: Vec<String> = f
            .params
            .iter()
            .filter(|p| p.name.node != "self")
            .map(|p| p.name.node.clone())
            .collect();

        match &kind {
            FnKind::Free { exported } => {
                let export_prefix = self.esm_export_prefix(*exported);
                self.line(&format!(
                    "{export_prefix}function {}({}) {{",
                    f.name.node,
                    params.join(", ")
                ));
            }
            FnKind::Method { type_name } => {
                self.line(&format!(
                    "{type_name}.prototype.{} = function ({}) {{",
                    f.name.node,
                    params.join(", ")
                ));
            }
        }
        self.indent += 1;
        if matches!(kind, FnKind::Method { .. }) {
            self.line("const self = this;");
        }

        let mut olds = Vec::new();
        if self.instrument() {
            for (cond, loc) in &requires {
                let js = self.js(cond);
                let clause = js_string(&format_expr(cond));
                let loc = js_string(loc);
                self.line(&format!("requires({js}, {clause}, {loc});"));
            }

            // Pre-state snapshots: every `old(·)` argument across all ensures
            // clauses, collected up front, snapshotted once at entry.
            let mut old_exprs = Vec::new();
            for (cond, _) in &ensures {
                collect_old_exprs(cond, &mut old_exprs);
            }
            for expr in &old_exprs {
                let key = format_expr(expr);
                if olds.iter().any(|(k, _)| *k == key) {
                    continue;
                }
                let name = format!("__old_{}", olds.len());
                let js = self.js(expr);
                self.line(&format!("const {name} = clone({js});"));
                olds.push((key, name));
            }
        }

        self.fn_ctx = Some(FnCtx {
            ensures: ensures
                .iter()
                .map(|(e, loc)| (e.clone(), format_expr(e), loc.clone()))
                .collect(),
            olds,
            ret_is_result,
        });

        if ret_is_result {
            self.line("try {");
            self.indent += 1;
        }

        for stmt in &body.stmts {
            self.emit_stmt(stmt);
        }
        match &body.tail {
            Some(tail) => {
                let tail = (**tail).clone();
                self.emit_return(Some(&tail));
            }
            None => {
                // A bare falling-off end still runs the postconditions.
                if self.instrument()
                    && self
                        .fn_ctx
                        .as_ref()
                        .is_some_and(|ctx| !ctx.ensures.is_empty())
                    && !matches!(body.stmts.last(), Some(Stmt::Return(_)))
                {
                    self.emit_return(None);
                }
            }
        }

        if ret_is_result {
            self.indent -= 1;
            self.line("} catch (__e) {");
            self.line("  if (__e instanceof __ResultError) { return Err(__e.err); }");
            self.line("  throw __e;");
            self.line("}");
        }

        self.indent -= 1;
        match &kind {
            FnKind::Free { exported } => {
                self.line("}");
                self.emit_cjs_export(*exported, &f.name.node);
            }
            FnKind::Method { .. } => self.line("};"),
        }
        self.blank();
        self.fn_ctx = None;
        Ok(())
    }

    fn fn_ret_is_result(&self, f: &FnDecl, kind: &FnKind) -> bool {
        let sig_ret = match kind {
            FnKind::Free { .. } => self.checker.function_sig(&f.name.node).map(|s| s.ret),
            FnKind::Method { type_name } => self
                .checker
                .method_sig(type_name, &f.name.node)
                .map(|s| s.ret.clone()),
        };
        match sig_ret {
            Some(Type::Result { .. }) => true,
            Some(_) => false,
            None => matches!(
                &f.ret,
                Some(TypeExpr {
                    kind: TypeExprKind::Named { name, .. },
                    ..
                }) if name.node == "Result"
            ),
        }
    }

    fn emit_return(&mut self, value: Option<&Expr>) {
        let has_ensures = self
            .fn_ctx
            .as_ref()
            .is_some_and(|ctx| !ctx.ensures.is_empty());

        if !(self.instrument() && has_ensures) {
            match value {
                Some(v) => {
                    let js = self.js(v);
                    self.line(&format!("return {js};"));
                }
                None => self.line("return;"),
            }
            return;
        }

        // Bind the value, check each postcondition with `result` rewritten to
        // the binding, then yield it.
        self.line("{");
        self.indent += 1;
        match value {
            Some(v) => {
                let js = self.js(v);
                self.line(&format!("const __ret = {js};"));
            }
            None => self.line("const __ret = undefined;"),
        }

        let ensures = self
            .fn_ctx
            .as_ref()
            .map(|ctx| ctx.ensures.clone())
            .unwrap_or_default();
        let mut frame = HashMap::new();
        frame.insert("result".to_string(), "__ret".to_string());
        self.rewrites.push(frame);
        for (cond, clause, loc) in &ensures {
            let js = self.js(cond);
            let clause = js_string(clause);
            let loc = js_string(loc);
            self.line(&format!("ensures({js}, {clause}, {loc});"));
        }
        self.rewrites.pop();

        self.line("return __ret;");
        self.indent -= 1;
        self.line("}");
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(v) => {
                let init = match &v.init {
                    Some(e) => self.js(e),
                    None => "undefined".to_string(),
                };
                let kw = if v.mutable { "let" } else { "const" };
                self.line(&format!("{kw} {} = {init};", v.name.node));
            }
            Stmt::Expr(e) => {
                let js = self.js(e);
                self.line(&format!("{js};"));
            }
            Stmt::Return(r) => self.emit_return(r.value.as_ref()),
            Stmt::If(s) => self.emit_if(s, "if"),
            Stmt::While(s) => {
                let cond = self.js(&s.cond);
                self.line(&format!("while ({cond}) {{"));
                self.indent += 1;
                self.emit_loop_invariants(&s.invariants);
                self.emit_block_stmts(&s.body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::For(s) => {
                let iter = self.js(&s.iterable);
                self.line(&format!("for (const {} of {iter}) {{", s.binding.node));
                self.indent += 1;
                self.emit_loop_invariants(&s.invariants);
                self.emit_block_stmts(&s.body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Match(m) => self.emit_match_stmt(&m.scrutinee, &m.arms),
            Stmt::Block(b) => {
                self.line("{");
                self.indent += 1;
                self.emit_block_stmts(b);
                self.indent -= 1;
                self.line("}");
            }
        }
    }

    /// Loop invariants are checked at the start of every iteration.
    fn emit_loop_invariants(&mut self, invariants: &[Annotation]) {
        if !self.instrument() {
            return;
        }
        for ann in invariants {
            if let AnnotationKind::Invariant(e) = &ann.kind {
                let cond = self.js(e);
                let clause = js_string(&format_expr(e));
                let loc = js_string(&self.loc(e.span));
                self.line(&format!("invariant({cond}, {clause}, {loc});"));
            }
        }
    }

    fn emit_block_stmts(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.emit_stmt(stmt);
        }
        if let Some(tail) = &block.tail {
            let js = self.js(tail);
            self.line(&format!("{js};"));
        }
    }

    fn emit_if(&mut self, s: &IfStmt, keyword: &str) {
        let cond = self.js(&s.cond);
        self.line(&format!("{keyword} ({cond}) {{"));
        self.indent += 1;
        self.emit_block_stmts(&s.then_block);
        self.indent -= 1;
        match &s.else_branch {
            Some(ElseBranch::If(nested)) => {
                // `} else if (...) {` continues the chain.
                self.line("}");
                self.emit_if(nested, "else if");
            }
            Some(ElseBranch::Block(b)) => {
                self.line("} else {");
                self.indent += 1;
                self.emit_block_stmts(b);
                self.indent -= 1;
                self.line("}");
            }
            None => self.line("}"),
        }
    }

    fn emit_match_stmt(&mut self, scrutinee: &Expr, arms: &[MatchArm]) {
        let subject = self.fresh("m");
        let scrut = self.js(scrutinee);
        self.line("{");
        self.indent += 1;
        self.line(&format!("const {subject} = {scrut};"));

        let has_irrefutable = arms
            .iter()
            .any(|a| a.guard.is_none() && is_irrefutable(&a.pattern));

        for (i, arm) in arms.iter().enumerate() {
            let test = self.arm_test(&subject, arm);
            let keyword = if i == 0 { "if" } else { "else if" };
            self.line(&format!("{keyword} ({test}) {{"));
            self.indent += 1;
            self.emit_arm_bindings(&subject, &arm.pattern);
            match &arm.body.kind {
                ExprKind::Block(b) => self.emit_block_stmts(b),
                _ => {
                    let js = self.js(&arm.body);
                    self.line(&format!("{js};"));
                }
            }
            self.indent -= 1;
            self.line("}");
        }

        if !has_irrefutable {
            let loc = self.loc(scrutinee.span);
            self.line(&format!(
                "else {{ throw new Error(\"match not exhaustive at {loc}\"); }}"
            ));
        }

        self.indent -= 1;
        self.line("}");
    }

    fn arm_test(&mut self, subject: &str, arm: &MatchArm) -> String {
        let test = pattern_test(subject, &arm.pattern);
        match &arm.guard {
            Some(guard) => {
                // The guard sees pattern bindings; rewrite them to subject
                // paths since the test runs before the bindings exist.
                let mut paths = Vec::new();
                pattern_bindings(subject, &arm.pattern, &mut paths);
                let frame: HashMap<String, String> = paths.into_iter().collect();
                self.rewrites.push(frame);
                let guard_js = self.js(guard);
                self.rewrites.pop();
                format!("({test}) && ({guard_js})")
            }
            None => test,
        }
    }

    fn emit_arm_bindings(&mut self, subject: &str, pattern: &Pattern) {
        let mut bindings = Vec::new();
        pattern_bindings(subject, pattern, &mut bindings);
        for (name, path) in bindings {
            self.line(&format!("const {name} = {path};"));
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn js(&mut self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Ident(name) => self.rewrite_ident(name),
            ExprKind::SelfRef => "self".to_string(),
            ExprKind::Literal(lit) => js_literal(lit),
            ExprKind::Binary { op, left, right } => self.js_binary(*op, left, right),
            ExprKind::Unary { op, expr: inner } => {
                let js = self.js(inner);
                match op {
                    UnaryOp::Neg => format!("(-{js})"),
                    UnaryOp::Not => format!("(!{js})"),
                    UnaryOp::BitNot => format!("(~{js})"),
                }
            }
            ExprKind::Assign { op, target, value } => {
                let t = self.js(target);
                let v = self.js(value);
                let op = match op {
                    AssignOp::Assign => "=",
                    AssignOp::Add => "+=",
                    AssignOp::Sub => "-=",
                    AssignOp::Mul => "*=",
                    AssignOp::Div => "/=",
                };
                format!("({t} {op} {v})")
            }
            ExprKind::Call { callee, args } => {
                let c = self.js(callee);
                let args: Vec<String> = args.iter().map(|a| self.js(a)).collect();
                format!("{c}({})", args.join(", "))
            }
            ExprKind::Member { base, member } => {
                let b = self.js(base);
                format!("{b}.{}", member.node)
            }
            ExprKind::Path { base, item } => format!("{}.{}", base.node, item.node),
            ExprKind::Index { base, index } => {
                let b = self.js(base);
                let i = self.js(index);
                format!("{b}[{i}]")
            }
            ExprKind::If {
                cond,
                then_block,
                else_block,
            } => {
                // Expression position: immediately-invoked closure returning
                // the branch value.
                let mut out = String::from("(() => {\n");
                let saved = std::mem::take(&mut self.out);
                let saved_indent = self.indent;
                self.indent = 1;

                let c = self.js(cond);
                self.line(&format!("if ({c}) {{"));
                self.indent += 1;
                self.emit_block_value(then_block);
                self.indent -= 1;
                match else_block {
                    Some(e) => {
                        self.line("} else {");
                        self.indent += 1;
                        self.emit_block_value(e);
                        self.indent -= 1;
                        self.line("}");
                    }
                    None => self.line("}"),
                }
                self.line("return undefined;");

                self.indent = saved_indent;
                out.push_str(&std::mem::replace(&mut self.out, saved));
                out.push_str("})()");
                out
            }
            ExprKind::Match { scrutinee, arms } => self.js_match_expr(scrutinee, arms),
            ExprKind::Block(b) => {
                let mut out = String::from("(() => {\n");
                let saved = std::mem::take(&mut self.out);
                let saved_indent = self.indent;
                self.indent = 1;
                self.emit_block_value(b);
                self.indent = saved_indent;
                out.push_str(&std::mem::replace(&mut self.out, saved));
                out.push_str("})()");
                out
            }
            ExprKind::Lambda { params, body, .. } => {
                let params: Vec<String> = params.iter().map(|p| p.name.node.clone()).collect();
                match &body.kind {
                    ExprKind::Block(b) => {
                        let mut out = format!("({}) => {{\n", params.join(", "));
                        let saved = std::mem::take(&mut self.out);
                        let saved_indent = self.indent;
                        self.indent = 1;
                        self.emit_block_value(b);
                        self.indent = saved_indent;
                        out.push_str(&std::mem::replace(&mut self.out, saved));
                        out.push('}');
                        out
                    }
                    _ => {
                        let b = self.js(body);
                        format!("({}) => ({b})", params.join(", "))
                    }
                }
            }
            ExprKind::Array(items) => {
                let items: Vec<String> = items.iter().map(|e| self.js(e)).collect();
                format!("[{}]", items.join(", "))
            }
            ExprKind::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|e| self.js(e)).collect();
                format!("[{}]", items.join(", "))
            }
            ExprKind::StructLit {
                name,
                fields,
                spread,
            } => self.js_struct_lit(name, fields, spread.as_deref()),
            ExprKind::Range {
                start,
                end,
                inclusive,
            } => {
                let s = self.js(start);
                let e = self.js(end);
                let extra = if *inclusive { " + 1" } else { "" };
                format!(
                    "((__s, __e) => Array.from({{ length: __e - __s{extra} }}, (_, __i) => __s + __i))({s}, {e})"
                )
            }
            ExprKind::Cast { expr: inner, ty: _ } => {
                // Casts are erased, except float-to-integer which truncates.
                let js = self.js(inner);
                let from = self.checker.expr_type(inner.span);
                let to = self.checker.expr_type(expr.span);
                match (from, to) {
                    (Some(f), Some(t)) if is_float(f) && is_integer(t) => {
                        format!("Math.trunc({js})")
                    }
                    _ => js,
                }
            }
            ExprKind::Old(inner) => {
                let key = format_expr(inner);
                if let Some(ctx) = &self.fn_ctx {
                    if let Some((_, name)) = ctx.olds.iter().find(|(k, _)| *k == key) {
                        return name.clone();
                    }
                }
                // Outside an instrumented ensures clause the pre-state value
                // degenerates to the current value.
                self.js(inner)
            }
            ExprKind::Forall { binders, body } => self.js_quantifier(binders, body, true),
            ExprKind::Exists { binders, body } => self.js_quantifier(binders, body, false),
            ExprKind::Try(inner) => {
                let js = self.js(inner);
                format!("unwrap({js})")
            }
            ExprKind::Reference { expr: inner, .. } => self.js(inner),
            ExprKind::Deref(inner) => self.js(inner),
        }
    }

    fn rewrite_ident(&self, name: &str) -> String {
        for frame in self.rewrites.iter().rev() {
            if let Some(replacement) = frame.get(name) {
                return replacement.clone();
            }
        }
        name.to_string()
    }

    fn js_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> String {
        let l = self.js(left);
        let r = self.js(right);
        match op {
            BinOp::Pow => format!("Math.pow({l}, {r})"),
            BinOp::Div => {
                // Integer division truncates; the type map decides.
                let lt = self.checker.expr_type(left.span);
                let rt = self.checker.expr_type(right.span);
                match (lt, rt) {
                    (Some(a), Some(b)) if is_integer(a) && is_integer(b) => {
                        format!("Math.trunc({l} / {r})")
                    }
                    _ => format!("({l} / {r})"),
                }
            }
            other => {
                let op = match other {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Rem => "%",
                    BinOp::Eq => "===",
                    BinOp::Ne => "!==",
                    BinOp::Lt => "<",
                    BinOp::Gt => ">",
                    BinOp::Le => "<=",
                    BinOp::Ge => ">=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                    BinOp::BitAnd => "&",
                    BinOp::BitOr => "|",
                    BinOp::BitXor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    BinOp::Pow | BinOp::Div => unreachable!(),
                };
                format!("({l} {op} {r})")
            }
        }
    }

    fn js_struct_lit(
        &mut self,
        name: &covenant_ast::Ident,
        fields: &[(covenant_ast::Ident, Expr)],
        spread: Option<&Expr>,
    ) -> String {
        if let Some(base) = spread {
            // Spread form copy-extends an existing record; the constructor
            // (and its invariants) is not re-run.
            let base_js = self.js(base);
            let mut parts = vec![format!("...{base_js}")];
            for (fname, value) in fields {
                let v = self.js(value);
                parts.push(format!("{}: {v}", fname.node));
            }
            return format!("{{ {} }}", parts.join(", "));
        }

        // Non-spread form invokes the declared constructor in field
        // declaration order; missing defaulted fields pass through as
        // `undefined` and pick up their defaults inside the constructor.
        let decl = self.struct_decls.get(name.node.as_str()).copied();
        let args = match decl {
            Some(decl) => decl
                .fields
                .iter()
                .map(|f| {
                    match fields.iter().find(|(n, _)| n.node == f.name.node) {
                        Some((_, value)) => self.js(value),
                        None => "undefined".to_string(),
                    }
                })
                .collect::<Vec<_>>(),
            None => fields.iter().map(|(_, v)| self.js(v)).collect(),
        };
        format!("{}({})", name.node, args.join(", "))
    }

    fn js_quantifier(
        &mut self,
        binders: &[covenant_ast::QuantBinder],
        body: &Expr,
        is_forall: bool,
    ) -> String {
        // Quantifiers are runtime-checkable only over explicit collections.
        if binders.iter().any(|b| b.collection.is_none()) {
            return "true".to_string();
        }
        let method = if is_forall { "every" } else { "some" };
        let mut out = self.js(body);
        for b in binders.iter().rev() {
            let coll = self.js(b.collection.as_ref().expect("checked above"));
            out = format!("({coll}).{method}(({}) => ({out}))", b.name.node);
        }
        out
    }

    fn js_match_expr(&mut self, scrutinee: &Expr, arms: &[MatchArm]) -> String {
        let subject = self.fresh("m");
        let scrut = self.js(scrutinee);

        let mut out = String::from("(() => {\n");
        let saved = std::mem::take(&mut self.out);
        let saved_indent = self.indent;
        self.indent = 1;

        self.line(&format!("const {subject} = {scrut};"));
        let has_irrefutable = arms
            .iter()
            .any(|a| a.guard.is_none() && is_irrefutable(&a.pattern));

        for (i, arm) in arms.iter().enumerate() {
            let test = self.arm_test(&subject, arm);
            let keyword = if i == 0 { "if" } else { "else if" };
            self.line(&format!("{keyword} ({test}) {{"));
            self.indent += 1;
            self.emit_arm_bindings(&subject, &arm.pattern);
            let body = self.js(&arm.body);
            self.line(&format!("return {body};"));
            self.indent -= 1;
            self.line("}");
        }
        if !has_irrefutable {
            let loc = self.loc(scrutinee.span);
            self.line(&format!(
                "throw new Error(\"match not exhaustive at {loc}\");"
            ));
        } else {
            self.line("return undefined;");
        }

        self.indent = saved_indent;
        out.push_str(&std::mem::replace(&mut self.out, saved));
        out.push_str("})()");
        out
    }

    /// Emit a block in value position: statements, then `return <tail>`.
    fn emit_block_value(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.emit_stmt(stmt);
        }
        match &block.tail {
            Some(tail) => {
                let js = self.js(tail);
                self.line(&format!("return {js};"));
            }
            None => self.line("return undefined;"),
        }
    }
}

enum FnKind<'a> {
    Free { exported: bool },
    Method { type_name: &'a str },
}

/// Collect every sub-expression wrapped in `old(·)` anywhere in a clause.
/// A full traversal is required: partial walks miss nested occurrences.
fn collect_old_exprs(expr: &Expr, out: &mut Vec<Expr>) {
    if let ExprKind::Old(inner) = &expr.kind {
        out.push((**inner).clone());
        // `old` does not nest meaningfully; stop here.
        return;
    }
    walk_children(expr, &mut |child| collect_old_exprs(child, out));
}

fn walk_children(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    match &expr.kind {
        ExprKind::Ident(_)
        | ExprKind::SelfRef
        | ExprKind::Literal(_)
        | ExprKind::Path { .. } => {}
        ExprKind::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        ExprKind::Unary { expr, .. }
        | ExprKind::Old(expr)
        | ExprKind::Try(expr)
        | ExprKind::Reference { expr, .. }
        | ExprKind::Deref(expr)
        | ExprKind::Cast { expr, .. } => f(expr),
        ExprKind::Assign { target, value, .. } => {
            f(target);
            f(value);
        }
        ExprKind::Call { callee, args } => {
            f(callee);
            for a in args {
                f(a);
            }
        }
        ExprKind::Member { base, .. } => f(base),
        ExprKind::Index { base, index } => {
            f(base);
            f(index);
        }
        ExprKind::If {
            cond,
            then_block,
            else_block,
        } => {
            f(cond);
            walk_block(then_block, f);
            if let Some(e) = else_block {
                walk_block(e, f);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            f(scrutinee);
            for arm in arms {
                if let Some(g) = &arm.guard {
                    f(g);
                }
                f(&arm.body);
            }
        }
        ExprKind::Block(b) => walk_block(b, f),
        ExprKind::Lambda { body, .. } => f(body),
        ExprKind::Array(items) | ExprKind::Tuple(items) => {
            for i in items {
                f(i);
            }
        }
        ExprKind::StructLit { fields, spread, .. } => {
            for (_, v) in fields {
                f(v);
            }
            if let Some(s) = spread {
                f(s);
            }
        }
        ExprKind::Range { start, end, .. } => {
            f(start);
            f(end);
        }
        ExprKind::Forall { binders, body } | ExprKind::Exists { binders, body } => {
            for b in binders {
                if let Some(c) = &b.collection {
                    f(c);
                }
            }
            f(body);
        }
    }
}

fn walk_block(block: &Block, f: &mut impl FnMut(&Expr)) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let(l) => {
                if let Some(init) = &l.init {
                    f(init);
                }
            }
            Stmt::Expr(e) => f(e),
            Stmt::Return(r) => {
                if let Some(v) = &r.value {
                    f(v);
                }
            }
            Stmt::If(s) => {
                f(&s.cond);
                walk_block(&s.then_block, f);
                let mut else_branch = &s.else_branch;
                while let Some(branch) = else_branch {
                    match branch {
                        ElseBranch::If(nested) => {
                            f(&nested.cond);
                            walk_block(&nested.then_block, f);
                            else_branch = &nested.else_branch;
                        }
                        ElseBranch::Block(b) => {
                            walk_block(b, f);
                            break;
                        }
                    }
                }
            }
            Stmt::While(s) => {
                f(&s.cond);
                walk_block(&s.body, f);
            }
            Stmt::For(s) => {
                f(&s.iterable);
                walk_block(&s.body, f);
            }
            Stmt::Match(m) => {
                f(&m.scrutinee);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        f(g);
                    }
                    f(&arm.body);
                }
            }
            Stmt::Block(b) => walk_block(b, f),
        }
    }
    if let Some(tail) = &block.tail {
        f(tail);
    }
}

fn is_irrefutable(pattern: &Pattern) -> bool {
    matches!(pattern, Pattern::Wildcard { .. } | Pattern::Binding { .. })
}

/// The test half of pattern lowering: a conjunction over the subject.
fn pattern_test(subject: &str, pattern: &Pattern) -> String {
    match pattern {
        Pattern::Wildcard { .. } | Pattern::Binding { .. } => "true".to_string(),
        Pattern::Literal { value, .. } => format!("{subject} === {}", js_literal(value)),
        Pattern::Tuple { items, .. } => {
            let mut parts = vec![
                format!("Array.isArray({subject})"),
                format!("{subject}.length === {}", items.len()),
            ];
            for (i, item) in items.iter().enumerate() {
                let sub = format!("{subject}[{i}]");
                let test = pattern_test(&sub, item);
                if test != "true" {
                    parts.push(test);
                }
            }
            parts.join(" && ")
        }
        Pattern::Struct { fields, .. } => {
            let mut parts = vec![format!("{subject} !== null && {subject} !== undefined")];
            for (fname, sub) in fields {
                if let Some(sub) = sub {
                    let path = format!("{subject}.{}", fname.node);
                    let test = pattern_test(&path, sub);
                    if test != "true" {
                        parts.push(test);
                    }
                }
            }
            parts.join(" && ")
        }
        Pattern::Variant {
            variant, fields, ..
        } => {
            // Enum values are tagged records; test the tag, then the fields
            // by index.
            let mut parts = vec![
                format!("{subject} !== null && {subject} !== undefined"),
                format!("{subject}.tag === {}", js_string(&variant.node)),
            ];
            for (i, f) in fields.iter().enumerate() {
                let path = format!("{subject}.fields[{i}]");
                let test = pattern_test(&path, f);
                if test != "true" {
                    parts.push(test);
                }
            }
            parts.join(" && ")
        }
        Pattern::Range {
            start,
            end,
            inclusive,
            ..
        } => {
            let lo = match pattern_literal(start) {
                Some(js) => format!("{subject} >= {js}"),
                None => "true".to_string(),
            };
            let cmp = if *inclusive { "<=" } else { "<" };
            let hi = match pattern_literal(end) {
                Some(js) => format!("{subject} {cmp} {js}"),
                None => "true".to_string(),
            };
            format!("{lo} && {hi}")
        }
    }
}

/// The binding half of pattern lowering: fresh names for each binder,
/// emitted independently of the test.
fn pattern_bindings(subject: &str, pattern: &Pattern, out: &mut Vec<(String, String)>) {
    match pattern {
        Pattern::Wildcard { .. } | Pattern::Literal { .. } | Pattern::Range { .. } => {}
        Pattern::Binding { name, .. } => out.push((name.node.clone(), subject.to_string())),
        Pattern::Tuple { items, .. } => {
            for (i, item) in items.iter().enumerate() {
                pattern_bindings(&format!("{subject}[{i}]"), item, out);
            }
        }
        Pattern::Struct { fields, .. } => {
            for (fname, sub) in fields {
                let path = format!("{subject}.{}", fname.node);
                match sub {
                    Some(sub) => pattern_bindings(&path, sub, out),
                    None => out.push((fname.node.clone(), path)),
                }
            }
        }
        Pattern::Variant { fields, .. } => {
            for (i, f) in fields.iter().enumerate() {
                pattern_bindings(&format!("{subject}.fields[{i}]"), f, out);
            }
        }
    }
}

fn pattern_literal(pattern: &Pattern) -> Option<String> {
    match pattern {
        Pattern::Literal { value, .. } => Some(js_literal(value)),
        _ => None,
    }
}

fn js_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(n) => n.to_string(),
        Literal::Float(v) => {
            let s = v.to_string();
            if s.contains('.') || s.contains('e') || s.contains('E') || s.contains("Infinity") {
                s
            } else {
                format!("{s}.0")
            }
        }
        Literal::Str(s) => js_string(s),
        Literal::Char(c) => js_string(&c.to_string()),
        Literal::Bool(b) => b.to_string(),
        Literal::Nil => "null".to_string(),
    }
}

fn js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other if (other as u32) < 0x20 => {
                out.push_str(&format!("\\u{{{:x}}}", other as u32));
            }
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
