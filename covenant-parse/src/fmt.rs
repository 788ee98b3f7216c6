#![forbid(unsafe_code)]

use covenant_ast::{
    Annotation, AnnotationKind, AssignOp, BinOp, Block, Decl, ElseBranch, Expr, ExprKind,
    FieldDecl, FnDecl, GenericParam, IfStmt, ImportItems, Literal, MatchArm, Pattern, Program,
    Stmt, TypeExpr, TypeExprKind, UnaryOp,
};

const INDENT: &str = "    ";

/// Canonical source emission: comments stripped, whitespace normalized.
pub fn format_program(program: &Program) -> String {
    let mut out = String::new();
    let mut first = true;
    for decl in &program.decls {
        if !first {
            out.push('\n');
        }
        first = false;
        fmt_decl(&mut out, 0, decl);
    }
    out
}

pub fn format_expr(expr: &Expr) -> String {
    let mut out = String::new();
    fmt_expr(&mut out, expr, Prec::Lowest);
    out
}

pub fn format_type(ty: &TypeExpr) -> String {
    let mut out = String::new();
    fmt_type(&mut out, ty);
    out
}

pub fn format_pattern(pattern: &Pattern) -> String {
    let mut out = String::new();
    fmt_pattern(&mut out, pattern);
    out
}

fn fmt_decl(out: &mut String, indent: usize, decl: &Decl) {
    match decl {
        Decl::Export(e) => {
            indent_line(out, indent);
            out.push_str("export ");
            fmt_decl_inner(out, indent, &e.decl, true);
        }
        other => {
            indent_line(out, indent);
            fmt_decl_inner(out, indent, other, false);
        }
    }
}

fn fmt_decl_inner(out: &mut String, indent: usize, decl: &Decl, in_export: bool) {
    match decl {
        Decl::Export(e) => {
            out.push_str("export ");
            fmt_decl_inner(out, indent, &e.decl, true);
        }
        Decl::Function(f) => fmt_fn(out, indent, f, in_export),
        Decl::Variable(v) => {
            out.push_str("let ");
            if v.mutable {
                out.push_str("mut ");
            }
            out.push_str(&v.name.node);
            if let Some(ty) = &v.ty {
                out.push_str(": ");
                fmt_type(out, ty);
            }
            if let Some(init) = &v.init {
                out.push_str(" = ");
                fmt_expr(out, init, Prec::Lowest);
            }
            out.push_str(";\n");
        }
        Decl::TypeAlias(t) => {
            out.push_str("type ");
            out.push_str(&t.name.node);
            fmt_generics(out, &t.generics);
            out.push_str(" = ");
            fmt_type(out, &t.target);
            out.push_str(";\n");
        }
        Decl::Struct(s) => {
            out.push_str("struct ");
            out.push_str(&s.name.node);
            fmt_generics(out, &s.generics);
            out.push_str(" {\n");
            for f in &s.fields {
                fmt_field(out, indent + 1, f);
                out.push_str(",\n");
            }
            for ann in &s.annotations {
                indent_line(out, indent + 1);
                fmt_annotation(out, ann);
                out.push('\n');
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Enum(e) => {
            out.push_str("enum ");
            out.push_str(&e.name.node);
            fmt_generics(out, &e.generics);
            out.push_str(" {\n");
            for v in &e.variants {
                indent_line(out, indent + 1);
                out.push_str(&v.name.node);
                if !v.fields.is_empty() {
                    out.push('(');
                    for (i, f) in v.fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        fmt_type(out, f);
                    }
                    out.push(')');
                }
                out.push_str(",\n");
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Trait(t) => {
            out.push_str("trait ");
            out.push_str(&t.name.node);
            fmt_generics(out, &t.generics);
            if !t.supers.is_empty() {
                out.push_str(": ");
                for (i, s) in t.supers.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" + ");
                    }
                    out.push_str(&s.node);
                }
            }
            out.push_str(" {\n");
            for m in &t.methods {
                indent_line(out, indent + 1);
                fmt_fn(out, indent + 1, m, false);
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Impl(i) => {
            out.push_str("impl ");
            if let Some(tr) = &i.trait_name {
                out.push_str(&tr.node);
                out.push_str(" for ");
            }
            fmt_type(out, &i.target);
            out.push_str(" {\n");
            for m in &i.methods {
                indent_line(out, indent + 1);
                fmt_fn(out, indent + 1, m, false);
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Contract(c) => {
            out.push_str("contract ");
            out.push_str(&c.name.node);
            fmt_generics(out, &c.generics);
            out.push_str(" {\n");
            for ann in &c.clauses {
                indent_line(out, indent + 1);
                fmt_annotation(out, ann);
                out.push('\n');
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Intent(c) => {
            out.push_str("intent ");
            out.push_str(&c.name.node);
            fmt_generics(out, &c.generics);
            out.push_str(" {\n");
            for ann in &c.clauses {
                indent_line(out, indent + 1);
                fmt_annotation(out, ann);
                out.push('\n');
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Effect(e) => {
            out.push_str("effect ");
            out.push_str(&e.name.node);
            fmt_generics(out, &e.generics);
            out.push_str(" {\n");
            for m in &e.methods {
                indent_line(out, indent + 1);
                fmt_fn(out, indent + 1, m, false);
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Capability(c) => {
            out.push_str("capability ");
            out.push_str(&c.name.node);
            out.push_str(" {\n");
            for p in &c.permissions {
                fmt_field(out, indent + 1, p);
                out.push_str(",\n");
            }
            indent_line(out, indent);
            out.push_str("}\n");
        }
        Decl::Import(im) => {
            out.push_str("import ");
            for (i, seg) in im.path.iter().enumerate() {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(&seg.node);
            }
            match &im.items {
                ImportItems::Module => {}
                ImportItems::Wildcard => out.push_str(".*"),
                ImportItems::List(items) => {
                    out.push_str(".{");
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&item.name.node);
                        if let Some(alias) = &item.alias {
                            out.push_str(" as ");
                            out.push_str(&alias.node);
                        }
                    }
                    out.push('}');
                }
            }
            out.push_str(";\n");
        }
    }
}

fn fmt_field(out: &mut String, indent: usize, f: &FieldDecl) {
    indent_line(out, indent);
    for ann in &f.annotations {
        fmt_annotation(out, ann);
        out.push(' ');
    }
    out.push_str(&f.name.node);
    out.push_str(": ");
    fmt_type(out, &f.ty);
    if let Some(d) = &f.default {
        out.push_str(" = ");
        fmt_expr(out, d, Prec::Lowest);
    }
}

fn fmt_fn(out: &mut String, indent: usize, f: &FnDecl, _in_export: bool) {
    if f.is_pure {
        out.push_str("pure ");
    }
    if f.is_extern {
        out.push_str("extern ");
    }
    out.push_str("fn ");
    out.push_str(&f.name.node);
    fmt_generics(out, &f.generics);
    out.push('(');
    for (i, p) in f.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if p.name.node == "self" {
            out.push_str("self");
            continue;
        }
        out.push_str(&p.name.node);
        out.push_str(": ");
        if p.mutable {
            out.push_str("mut ");
        }
        fmt_type(out, &p.ty);
    }
    out.push(')');
    if let Some(ret) = &f.ret {
        out.push_str(" -> ");
        fmt_type(out, ret);
    }
    for ann in &f.annotations {
        out.push('\n');
        indent_line(out, indent);
        fmt_annotation(out, ann);
    }
    match &f.body {
        Some(body) => {
            out.push(' ');
            fmt_block(out, indent, body);
            out.push('\n');
        }
        None => out.push_str(";\n"),
    }
}

fn fmt_generics(out: &mut String, generics: &[GenericParam]) {
    if generics.is_empty() {
        return;
    }
    out.push('<');
    for (i, g) in generics.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&g.name.node);
        if !g.bounds.is_empty() {
            out.push_str(": ");
            for (j, b) in g.bounds.iter().enumerate() {
                if j > 0 {
                    out.push_str(" + ");
                }
                fmt_type(out, b);
            }
        }
        if let Some(d) = &g.default {
            out.push_str(" = ");
            fmt_type(out, d);
        }
    }
    out.push('>');
}

fn fmt_annotation(out: &mut String, ann: &Annotation) {
    match &ann.kind {
        AnnotationKind::Requires(e) => {
            out.push_str("@requires ");
            fmt_expr(out, e, Prec::Lowest);
        }
        AnnotationKind::Ensures(e) => {
            out.push_str("@ensures ");
            fmt_expr(out, e, Prec::Lowest);
        }
        AnnotationKind::Invariant(e) => {
            out.push_str("@invariant ");
            fmt_expr(out, e, Prec::Lowest);
        }
        AnnotationKind::Effects(names) => {
            out.push_str("@effect[");
            for (i, n) in names.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&n.node);
            }
            out.push(']');
        }
        AnnotationKind::Capability { name, fields } => {
            out.push_str("@capability ");
            out.push_str(&name.node);
            if !fields.is_empty() {
                out.push_str(" { ");
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&k.node);
                    out.push_str(": ");
                    fmt_expr(out, v, Prec::Lowest);
                }
                out.push_str(" }");
            }
        }
        AnnotationKind::Contract { name, args } => {
            out.push_str("@contract ");
            out.push_str(&name.node);
            fmt_type_args(out, args);
        }
        AnnotationKind::Intent { name, args } => {
            out.push_str("@intent ");
            out.push_str(&name.node);
            fmt_type_args(out, args);
        }
        AnnotationKind::Verify(level) => {
            out.push_str("@verify(level: ");
            fmt_string_lit(out, &level.node);
            out.push(')');
        }
    }
}

fn fmt_type_args(out: &mut String, args: &[TypeExpr]) {
    if args.is_empty() {
        return;
    }
    out.push('<');
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        fmt_type(out, a);
    }
    out.push('>');
}

fn fmt_stmt(out: &mut String, indent: usize, stmt: &Stmt) {
    match stmt {
        Stmt::Let(v) => {
            indent_line(out, indent);
            out.push_str("let ");
            if v.mutable {
                out.push_str("mut ");
            }
            out.push_str(&v.name.node);
            if let Some(ty) = &v.ty {
                out.push_str(": ");
                fmt_type(out, ty);
            }
            if let Some(init) = &v.init {
                out.push_str(" = ");
                fmt_expr(out, init, Prec::Lowest);
            }
            out.push_str(";\n");
        }
        Stmt::Expr(e) => {
            indent_line(out, indent);
            fmt_expr(out, e, Prec::Lowest);
            out.push_str(";\n");
        }
        Stmt::Return(r) => {
            indent_line(out, indent);
            out.push_str("return");
            if let Some(v) = &r.value {
                out.push(' ');
                fmt_expr(out, v, Prec::Lowest);
            }
            out.push_str(";\n");
        }
        Stmt::If(s) => {
            indent_line(out, indent);
            fmt_if(out, indent, s);
            out.push('\n');
        }
        Stmt::While(s) => {
            indent_line(out, indent);
            out.push_str("while ");
            fmt_expr(out, &s.cond, Prec::Lowest);
            for ann in &s.invariants {
                out.push('\n');
                indent_line(out, indent);
                fmt_annotation(out, ann);
            }
            out.push(' ');
            fmt_block(out, indent, &s.body);
            out.push('\n');
        }
        Stmt::For(s) => {
            indent_line(out, indent);
            out.push_str("for ");
            out.push_str(&s.binding.node);
            out.push_str(" in ");
            fmt_expr(out, &s.iterable, Prec::Lowest);
            for ann in &s.invariants {
                out.push('\n');
                indent_line(out, indent);
                fmt_annotation(out, ann);
            }
            out.push(' ');
            fmt_block(out, indent, &s.body);
            out.push('\n');
        }
        Stmt::Match(s) => {
            indent_line(out, indent);
            fmt_match(out, indent, &s.scrutinee, &s.arms);
            out.push('\n');
        }
        Stmt::Block(b) => {
            indent_line(out, indent);
            fmt_block(out, indent, b);
            out.push('\n');
        }
    }
}

fn fmt_if(out: &mut String, indent: usize, s: &IfStmt) {
    out.push_str("if ");
    fmt_expr(out, &s.cond, Prec::Lowest);
    out.push(' ');
    fmt_block(out, indent, &s.then_block);
    match &s.else_branch {
        Some(ElseBranch::If(nested)) => {
            out.push_str(" else ");
            fmt_if(out, indent, nested);
        }
        Some(ElseBranch::Block(b)) => {
            out.push_str(" else ");
            fmt_block(out, indent, b);
        }
        None => {}
    }
}

fn fmt_match(out: &mut String, indent: usize, scrutinee: &Expr, arms: &[MatchArm]) {
    out.push_str("match ");
    fmt_expr(out, scrutinee, Prec::Lowest);
    out.push_str(" {\n");
    for arm in arms {
        indent_line(out, indent + 1);
        fmt_pattern(out, &arm.pattern);
        if let Some(guard) = &arm.guard {
            out.push_str(" if ");
            fmt_expr(out, guard, Prec::Lowest);
        }
        out.push_str(" => ");
        fmt_expr_at(out, indent + 1, &arm.body, Prec::Lowest);
        out.push_str(",\n");
    }
    indent_line(out, indent);
    out.push('}');
}

fn fmt_block(out: &mut String, indent: usize, block: &Block) {
    out.push_str("{\n");
    for stmt in &block.stmts {
        fmt_stmt(out, indent + 1, stmt);
    }
    if let Some(tail) = &block.tail {
        indent_line(out, indent + 1);
        fmt_expr_at(out, indent + 1, tail, Prec::Lowest);
        out.push('\n');
    }
    indent_line(out, indent);
    out.push('}');
}

fn fmt_pattern(out: &mut String, p: &Pattern) {
    match p {
        Pattern::Wildcard { .. } => out.push('_'),
        Pattern::Literal { value, .. } => fmt_literal(out, value),
        Pattern::Binding { name, mutable, .. } => {
            if *mutable {
                out.push_str("mut ");
            }
            out.push_str(&name.node);
        }
        Pattern::Tuple { items, .. } => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_pattern(out, item);
            }
            out.push(')');
        }
        Pattern::Struct {
            name, fields, rest, ..
        } => {
            out.push_str(&name.node);
            out.push_str(" { ");
            for (i, (fname, sub)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&fname.node);
                if let Some(sub) = sub {
                    out.push_str(": ");
                    fmt_pattern(out, sub);
                }
            }
            if *rest {
                if !fields.is_empty() {
                    out.push_str(", ");
                }
                out.push_str("..");
            }
            out.push_str(" }");
        }
        Pattern::Variant {
            enum_name,
            variant,
            fields,
            ..
        } => {
            out.push_str(&enum_name.node);
            out.push_str("::");
            out.push_str(&variant.node);
            if !fields.is_empty() {
                out.push('(');
                for (i, f) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    fmt_pattern(out, f);
                }
                out.push(')');
            }
        }
        Pattern::Range {
            start,
            end,
            inclusive,
            ..
        } => {
            fmt_pattern(out, start);
            out.push_str(if *inclusive { "..=" } else { ".." });
            fmt_pattern(out, end);
        }
    }
}

fn fmt_type(out: &mut String, ty: &TypeExpr) {
    match &ty.kind {
        TypeExprKind::Named { name, args } => {
            out.push_str(&name.node);
            fmt_type_args(out, args);
        }
        TypeExprKind::Array { elem, size } => {
            out.push('[');
            fmt_type(out, elem);
            if let Some(n) = size {
                out.push_str("; ");
                out.push_str(&n.to_string());
            }
            out.push(']');
        }
        TypeExprKind::Tuple(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_type(out, item);
            }
            out.push(')');
        }
        TypeExprKind::Function {
            params,
            ret,
            effects,
        } => {
            out.push_str("fn(");
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_type(out, p);
            }
            out.push_str(") -> ");
            fmt_type(out, ret);
            if !effects.is_empty() {
                out.push_str(" effect[");
                for (i, e) in effects.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&e.node);
                }
                out.push(']');
            }
        }
        TypeExprKind::Reference { inner, mutable } => {
            out.push('&');
            if *mutable {
                out.push_str("mut ");
            }
            fmt_type(out, inner);
        }
        TypeExprKind::Optional(inner) => {
            fmt_type(out, inner);
            out.push('?');
        }
    }
}

fn fmt_literal(out: &mut String, lit: &Literal) {
    match lit {
        Literal::Int(n) => out.push_str(&n.to_string()),
        Literal::Float(v) => {
            let s = v.to_string();
            out.push_str(&s);
            // Keep float literals lexically floats.
            if !s.contains('.') && !s.contains('e') && !s.contains('E') {
                out.push_str(".0");
            }
        }
        Literal::Str(s) => fmt_string_lit(out, s),
        Literal::Char(c) => {
            out.push('\'');
            match c {
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                '\'' => out.push_str("\\'"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                other => out.push(*other),
            }
            out.push('\'');
        }
        Literal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Nil => out.push_str("nil"),
    }
}

fn fmt_string_lit(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            other if other.is_control() => {
                let cp = other as u32;
                out.push_str(&format!("\\u{{{cp:x}}}"));
            }
            other => out.push(other),
        }
    }
    out.push('"');
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Assign,
    Range,
    Or,
    And,
    Equality,
    Ordering,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Add,
    Mul,
    Pow,
    Unary,
    Postfix,
}

fn bin_prec(op: &BinOp) -> Prec {
    match op {
        BinOp::Or => Prec::Or,
        BinOp::And => Prec::And,
        BinOp::Eq | BinOp::Ne => Prec::Equality,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => Prec::Ordering,
        BinOp::BitOr => Prec::BitOr,
        BinOp::BitXor => Prec::BitXor,
        BinOp::BitAnd => Prec::BitAnd,
        BinOp::Shl | BinOp::Shr => Prec::Shift,
        BinOp::Add | BinOp::Sub => Prec::Add,
        BinOp::Mul | BinOp::Div | BinOp::Rem => Prec::Mul,
        BinOp::Pow => Prec::Pow,
    }
}

fn bin_op_str(op: &BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Pow => "**",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
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
    }
}

fn needs_parens(parent: Prec, child: Prec) -> bool {
    child < parent
}

fn fmt_expr(out: &mut String, expr: &Expr, parent_prec: Prec) {
    fmt_expr_at(out, 0, expr, parent_prec);
}

fn fmt_expr_at(out: &mut String, indent: usize, expr: &Expr, parent_prec: Prec) {
    match &expr.kind {
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::SelfRef => out.push_str("self"),
        ExprKind::Literal(lit) => fmt_literal(out, lit),
        ExprKind::Binary { op, left, right } => {
            let my = bin_prec(op);
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            fmt_expr_at(out, indent, left, my);
            out.push(' ');
            out.push_str(bin_op_str(op));
            out.push(' ');
            fmt_expr_at(out, indent, right, my);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Unary { op, expr: inner } => {
            let my = Prec::Unary;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
            });
            fmt_expr_at(out, indent, inner, my);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Assign { op, target, value } => {
            let my = Prec::Assign;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            fmt_expr_at(out, indent, target, Prec::Range);
            out.push_str(match op {
                AssignOp::Assign => " = ",
                AssignOp::Add => " += ",
                AssignOp::Sub => " -= ",
                AssignOp::Mul => " *= ",
                AssignOp::Div => " /= ",
            });
            fmt_expr_at(out, indent, value, my);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Call { callee, args } => {
            let my = Prec::Postfix;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            fmt_expr_at(out, indent, callee, my);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_expr_at(out, indent, a, Prec::Lowest);
            }
            out.push(')');
            if parens {
                out.push(')');
            }
        }
        ExprKind::Member { base, member } => {
            let my = Prec::Postfix;
            fmt_expr_at(out, indent, base, my);
            out.push('.');
            out.push_str(&member.node);
        }
        ExprKind::Path { base, item } => {
            out.push_str(&base.node);
            out.push_str("::");
            out.push_str(&item.node);
        }
        ExprKind::Index { base, index } => {
            let my = Prec::Postfix;
            fmt_expr_at(out, indent, base, my);
            out.push('[');
            fmt_expr_at(out, indent, index, Prec::Lowest);
            out.push(']');
        }
        ExprKind::If {
            cond,
            then_block,
            else_block,
        } => {
            out.push_str("if ");
            fmt_expr_at(out, indent, cond, Prec::Lowest);
            out.push(' ');
            fmt_block(out, indent, then_block);
            if let Some(e) = else_block {
                out.push_str(" else ");
                fmt_block(out, indent, e);
            }
        }
        ExprKind::Match { scrutinee, arms } => fmt_match(out, indent, scrutinee, arms),
        ExprKind::Block(b) => fmt_block(out, indent, b),
        ExprKind::Lambda { params, ret, body } => {
            if params.is_empty() {
                out.push_str("||");
            } else {
                out.push('|');
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&p.name.node);
                    if let Some(ty) = &p.ty {
                        out.push_str(": ");
                        fmt_type(out, ty);
                    }
                }
                out.push('|');
            }
            if let Some(ty) = ret {
                out.push_str(" -> ");
                fmt_type(out, ty);
            }
            out.push(' ');
            fmt_expr_at(out, indent, body, Prec::Lowest);
        }
        ExprKind::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_expr_at(out, indent, item, Prec::Lowest);
            }
            out.push(']');
        }
        ExprKind::Tuple(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_expr_at(out, indent, item, Prec::Lowest);
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        ExprKind::StructLit {
            name,
            fields,
            spread,
        } => {
            out.push_str(&name.node);
            out.push_str(" { ");
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&k.node);
                out.push_str(": ");
                fmt_expr_at(out, indent, v, Prec::Lowest);
            }
            if let Some(s) = spread {
                if !fields.is_empty() {
                    out.push_str(", ");
                }
                out.push_str("..");
                fmt_expr_at(out, indent, s, Prec::Lowest);
            }
            out.push_str(" }");
        }
        ExprKind::Range {
            start,
            end,
            inclusive,
        } => {
            let my = Prec::Range;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            fmt_expr_at(out, indent, start, Prec::Or);
            out.push_str(if *inclusive { "..=" } else { ".." });
            fmt_expr_at(out, indent, end, Prec::Or);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Cast { expr: inner, ty } => {
            let my = Prec::Postfix;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            fmt_expr_at(out, indent, inner, my);
            out.push_str(" as ");
            fmt_type(out, ty);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Old(inner) => {
            out.push_str("old(");
            fmt_expr_at(out, indent, inner, Prec::Lowest);
            out.push(')');
        }
        ExprKind::Forall { binders, body } => {
            out.push_str("forall ");
            fmt_quant_binders(out, binders);
            out.push_str(": ");
            fmt_expr_at(out, indent, body, Prec::Lowest);
        }
        ExprKind::Exists { binders, body } => {
            out.push_str("exists ");
            fmt_quant_binders(out, binders);
            out.push_str(": ");
            fmt_expr_at(out, indent, body, Prec::Lowest);
        }
        ExprKind::Try(inner) => {
            let my = Prec::Postfix;
            fmt_expr_at(out, indent, inner, my);
            out.push('?');
        }
        ExprKind::Reference { mutable, expr: inner } => {
            let my = Prec::Unary;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            out.push('&');
            if *mutable {
                out.push_str("mut ");
            }
            fmt_expr_at(out, indent, inner, my);
            if parens {
                out.push(')');
            }
        }
        ExprKind::Deref(inner) => {
            let my = Prec::Unary;
            let parens = needs_parens(parent_prec, my);
            if parens {
                out.push('(');
            }
            out.push('*');
            fmt_expr_at(out, indent, inner, my);
            if parens {
                out.push(')');
            }
        }
    }
}

fn fmt_quant_binders(out: &mut String, binders: &[covenant_ast::QuantBinder]) {
    for (i, b) in binders.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&b.name.node);
        if let Some(c) = &b.collection {
            out.push_str(" in ");
            fmt_expr(out, c, Prec::Or);
        }
    }
}

fn indent_line(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str(INDENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_idempotent(src: &str) {
        let program = crate::parse_source(src).unwrap();
        let formatted1 = format_program(&program);
        let program2 = crate::parse_source(&formatted1)
            .unwrap_or_else(|e| panic!("formatted output failed to reparse: {e:?}\n{formatted1}"));
        let formatted2 = format_program(&program2);
        assert_eq!(formatted1, formatted2);
    }

    #[test]
    fn fmt_roundtrip_function_with_contracts() {
        is_idempotent(
            "fn divide(a: Int, b: Int) -> Int\n@requires b != 0\n{\n    return a / b;\n}\n",
        );
    }

    #[test]
    fn fmt_roundtrip_struct_enum_and_match() {
        is_idempotent(
            "struct Account {\n    balance: Float64 = 0.0,\n    @invariant balance >= 0.0\n}\n\nenum Shape {\n    Circle(Float64),\n    Unit,\n}\n\nfn area(s: Shape) -> Float64 {\n    match s {\n        Shape::Circle(r) => r * r,\n        _ => 0.0,\n    }\n}\n",
        );
    }

    #[test]
    fn fmt_roundtrip_quantifiers_and_old() {
        is_idempotent(
            "fn inc(x: mut Int) -> Void\n@ensures x == old(x) + 1\n{\n    x += 1;\n}\n\nfn check(a: [Int]) -> Bool {\n    return forall i in a: i >= 0;\n}\n",
        );
    }

    #[test]
    fn fmt_parens_preserved_only_when_needed() {
        let e = crate::parse_expr("(1 + 2) * 3").unwrap();
        assert_eq!(format_expr(&e), "(1 + 2) * 3");
        let e = crate::parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(format_expr(&e), "1 + 2 * 3");
    }
}
