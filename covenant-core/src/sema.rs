#![forbid(unsafe_code)]

use std::collections::HashMap;

use covenant_ast::{
    Annotation, AnnotationKind, AssignOp, BinOp, Block, Decl, ElseBranch, Expr, ExprKind, FnDecl,
    GenericParam, IfStmt, ImplDecl, ImportItems, LetDecl, Literal, MatchArm, Pattern, Program,
    Span, Stmt, StructDecl, TypeExpr, TypeExprKind, UnaryOp,
};
use covenant_parse::format_expr;

use crate::diagnostics::{Diagnostic, Phase};
use crate::error::SemanticError;
use crate::scope::{ScopeKind, Symbol, SymbolTable};
use crate::types::{
    assignable, is_integer, is_numeric, substitute, wider, CapabilityDef, ContractDef, EffectDef,
    EnumDef, FunctionType, IntentDef, ParamType, StructDef, TraitDef, Type,
};

/// Ambient checking state, passed explicitly through every checking call.
///
/// Entering a contract position (annotation bodies, struct and loop
/// invariants) produces a derived context via [`Ctx::contract`]; `old`,
/// `forall`, `exists` and the free name `result` are legal only there.
#[derive(Clone, Debug, Default)]
pub struct Ctx {
    pub in_contract: bool,
    /// Return type of the enclosing function, if any.
    pub ret: Option<Type>,
    /// Active effect set: effect names the current function may incur.
    pub effects: Vec<String>,
    /// Active capability names.
    pub capabilities: Vec<String>,
}

impl Ctx {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn contract(&self) -> Self {
        let mut ctx = self.clone();
        ctx.in_contract = true;
        ctx
    }
}

struct AliasDef {
    generics: Vec<String>,
    target: TypeExpr,
}

pub struct Checker {
    table: SymbolTable,
    pub structs: HashMap<String, StructDef>,
    pub enums: HashMap<String, EnumDef>,
    pub traits: HashMap<String, TraitDef>,
    pub effects: HashMap<String, EffectDef>,
    pub capabilities: HashMap<String, CapabilityDef>,
    pub contracts: HashMap<String, ContractDef>,
    pub intents: HashMap<String, IntentDef>,
    /// Inherent and trait-impl methods keyed by type name. Stored without
    /// their `self` parameter.
    methods: HashMap<String, Vec<(String, FunctionType)>>,
    /// Names of struct fields that carry declared defaults.
    field_defaults: HashMap<String, Vec<String>>,
    aliases: HashMap<String, AliasDef>,
    alias_stack: Vec<String>,
    /// Position-keyed expression types, consulted by the lowerer.
    expr_types: HashMap<(usize, usize), Type>,
    diags: Vec<Diagnostic>,
    next_var_id: u32,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        let mut checker = Self {
            table: SymbolTable::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            traits: HashMap::new(),
            effects: HashMap::new(),
            capabilities: HashMap::new(),
            contracts: HashMap::new(),
            intents: HashMap::new(),
            methods: HashMap::new(),
            field_defaults: HashMap::new(),
            aliases: HashMap::new(),
            alias_stack: Vec::new(),
            expr_types: HashMap::new(),
            diags: Vec::new(),
            next_var_id: 0,
        };

        // Built-in IO effect; the lowerer installs matching default handlers.
        checker.effects.insert(
            "IO".to_string(),
            EffectDef {
                generics: Vec::new(),
                methods: vec![
                    (
                        "read".to_string(),
                        FunctionType {
                            params: Vec::new(),
                            ret: Type::String,
                            effects: vec!["IO".to_string()],
                            capabilities: Vec::new(),
                            contracts: Vec::new(),
                            is_pure: false,
                        },
                    ),
                    (
                        "write".to_string(),
                        FunctionType {
                            params: vec![ParamType {
                                name: "text".to_string(),
                                ty: Type::String,
                                mutable: false,
                            }],
                            ret: Type::Void,
                            effects: vec!["IO".to_string()],
                            capabilities: Vec::new(),
                            contracts: Vec::new(),
                            is_pure: false,
                        },
                    ),
                ],
            },
        );
        let _ = checker
            .table
            .define_type("IO", Type::Named("IO".to_string()));
        let _ = checker.table.define_symbol(
            "IO",
            Symbol {
                ty: Type::Named("IO".to_string()),
                mutable: false,
            },
        );

        checker
    }

    /// Run both passes. Diagnostics accumulate; nothing aborts early.
    pub fn check_program(&mut self, program: &Program) {
        self.collect(program);

        let ctx = Ctx::top();
        for decl in &program.decls {
            self.check_decl(decl, &ctx);
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags)
    }

    /// First error, if any, in teacher-friendly form for one-shot callers.
    pub fn finish(&self) -> Result<(), SemanticError> {
        match self
            .diags
            .iter()
            .find(|d| d.severity == crate::diagnostics::Severity::Error)
        {
            Some(d) => Err(SemanticError {
                message: d.message.clone(),
                span: d.span,
            }),
            None => Ok(()),
        }
    }

    pub fn expr_type(&self, span: Span) -> Option<&Type> {
        self.expr_types.get(&(span.offset(), span.len()))
    }

    pub fn expr_type_count(&self) -> usize {
        self.expr_types.len()
    }

    pub fn function_sig(&self, name: &str) -> Option<FunctionType> {
        match self.table.lookup_symbol(name).map(|s| &s.ty) {
            Some(Type::Function(f)) => Some((**f).clone()),
            _ => None,
        }
    }

    pub fn method_sig(&self, type_name: &str, method: &str) -> Option<&FunctionType> {
        self.methods
            .get(type_name)?
            .iter()
            .find(|(n, _)| n == method)
            .map(|(_, f)| f)
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::error(Phase::Analyzer, span, message));
    }

    fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::warning(Phase::Analyzer, span, message));
    }

    // -----------------------------------------------------------------------
    // Pass A — collection
    // -----------------------------------------------------------------------

    fn collect(&mut self, program: &Program) {
        // Names first, so signatures may reference types declared later.
        for decl in &program.decls {
            self.collect_names(unwrap_export(decl));
        }
        for decl in &program.decls {
            self.collect_defs(unwrap_export(decl));
        }
    }

    fn collect_names(&mut self, decl: &Decl) {
        match decl {
            Decl::Struct(s) => self.define_type_name(&s.name.node, s.name.span),
            Decl::Enum(e) => self.define_type_name(&e.name.node, e.name.span),
            Decl::Trait(t) => self.define_type_name(&t.name.node, t.name.span),
            Decl::Effect(e) => {
                // The built-in IO effect may be redeclared with explicit
                // handlers; its name is already installed.
                if e.name.node != "IO" {
                    self.define_type_name(&e.name.node, e.name.span);
                }
            }
            Decl::Capability(c) => self.define_type_name(&c.name.node, c.name.span),
            Decl::TypeAlias(a) => {
                if self.aliases.contains_key(&a.name.node) {
                    self.error(
                        a.name.span,
                        format!("duplicate definition of type '{}'", a.name.node),
                    );
                    return;
                }
                self.aliases.insert(
                    a.name.node.clone(),
                    AliasDef {
                        generics: a.generics.iter().map(|g| g.name.node.clone()).collect(),
                        target: a.target.clone(),
                    },
                );
            }
            Decl::Contract(c) => {
                if self.table.declare_contract(&c.name.node).is_err() {
                    self.error(
                        c.name.span,
                        format!("duplicate definition of contract '{}'", c.name.node),
                    );
                }
            }
            Decl::Intent(i) => {
                if self.table.declare_intent(&i.name.node).is_err() {
                    self.error(
                        i.name.span,
                        format!("duplicate definition of intent '{}'", i.name.node),
                    );
                }
            }
            Decl::Import(im) => {
                // Imports introduce opaque names; resolution stops here.
                match &im.items {
                    ImportItems::Module | ImportItems::Wildcard => {
                        if let Some(last) = im.path.last() {
                            self.define_opaque_symbol(&last.node, last.span);
                        }
                    }
                    ImportItems::List(items) => {
                        for item in items {
                            let bound = item.alias.as_ref().unwrap_or(&item.name);
                            self.define_opaque_symbol(&bound.node, bound.span);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn define_type_name(&mut self, name: &str, span: Span) {
        if self
            .table
            .define_type(name, Type::Named(name.to_string()))
            .is_err()
        {
            self.error(span, format!("duplicate definition of type '{name}'"));
        }
    }

    fn define_opaque_symbol(&mut self, name: &str, span: Span) {
        if self
            .table
            .define_symbol(
                name,
                Symbol {
                    ty: Type::Unknown,
                    mutable: false,
                },
            )
            .is_err()
        {
            self.error(span, format!("duplicate definition of '{name}'"));
        }
    }

    fn collect_defs(&mut self, decl: &Decl) {
        match decl {
            Decl::Struct(s) => self.collect_struct(s),
            Decl::Enum(e) => {
                let generics: Vec<String> = e.generics.iter().map(|g| g.name.node.clone()).collect();
                self.with_generics(&e.generics, |chk| {
                    let variants = e
                        .variants
                        .iter()
                        .map(|v| {
                            let fields = v.fields.iter().map(|t| chk.resolve_type(t)).collect();
                            (v.name.node.clone(), fields)
                        })
                        .collect();
                    chk.enums.insert(
                        e.name.node.clone(),
                        EnumDef {
                            generics: generics.clone(),
                            variants,
                        },
                    );
                });
                let _ = self.table.define_symbol(
                    &e.name.node,
                    Symbol {
                        ty: Type::Named(e.name.node.clone()),
                        mutable: false,
                    },
                );
            }
            Decl::Trait(t) => {
                let generics: Vec<String> = t.generics.iter().map(|g| g.name.node.clone()).collect();
                let supers = t.supers.iter().map(|s| s.node.clone()).collect();
                let self_ty = Type::Named(t.name.node.clone());
                let methods = t
                    .methods
                    .iter()
                    .map(|m| (m.name.node.clone(), self.signature_of(m, Some(&self_ty))))
                    .collect();
                self.traits.insert(
                    t.name.node.clone(),
                    TraitDef {
                        generics,
                        supers,
                        methods,
                    },
                );
                let _ = self.table.define_symbol(
                    &t.name.node,
                    Symbol {
                        ty: Type::Named(t.name.node.clone()),
                        mutable: false,
                    },
                );
            }
            Decl::Effect(e) => {
                let generics: Vec<String> = e.generics.iter().map(|g| g.name.node.clone()).collect();
                let methods = e
                    .methods
                    .iter()
                    .map(|m| {
                        let mut sig = self.signature_of(m, None);
                        // Calling an effect method incurs the effect itself.
                        sig.effects = vec![e.name.node.clone()];
                        (m.name.node.clone(), sig)
                    })
                    .collect();
                self.effects.insert(
                    e.name.node.clone(),
                    EffectDef { generics, methods },
                );
                let _ = self.table.define_symbol(
                    &e.name.node,
                    Symbol {
                        ty: Type::Named(e.name.node.clone()),
                        mutable: false,
                    },
                );
            }
            Decl::Capability(c) => {
                let permissions = c
                    .permissions
                    .iter()
                    .map(|p| (p.name.node.clone(), self.resolve_type(&p.ty)))
                    .collect();
                self.capabilities
                    .insert(c.name.node.clone(), CapabilityDef { permissions });
                let _ = self.table.define_symbol(
                    &c.name.node,
                    Symbol {
                        ty: Type::Named(c.name.node.clone()),
                        mutable: false,
                    },
                );
            }
            Decl::Contract(c) => {
                let mut def = ContractDef::default();
                for ann in &c.clauses {
                    match &ann.kind {
                        AnnotationKind::Requires(e) => def.requires.push(format_expr(e)),
                        AnnotationKind::Ensures(e) => def.ensures.push(format_expr(e)),
                        AnnotationKind::Invariant(e) => def.invariants.push(format_expr(e)),
                        _ => self.warning(
                            ann.span,
                            "contract bodies may only contain requires, ensures and invariant \
                             clauses",
                        ),
                    }
                }
                self.contracts.insert(c.name.node.clone(), def);
            }
            Decl::Intent(i) => {
                let mut def = IntentDef::default();
                for ann in &i.clauses {
                    match &ann.kind {
                        AnnotationKind::Ensures(e) => def.ensures.push(format_expr(e)),
                        _ => self.warning(
                            i.span,
                            "intent bodies may only contain ensures clauses",
                        ),
                    }
                }
                self.intents.insert(i.name.node.clone(), def);
            }
            Decl::Function(f) => {
                let sig = self.signature_of(f, None);
                if self
                    .table
                    .define_symbol(
                        &f.name.node,
                        Symbol {
                            ty: Type::Function(Box::new(sig)),
                            mutable: false,
                        },
                    )
                    .is_err()
                {
                    self.error(
                        f.name.span,
                        format!("duplicate definition of '{}'", f.name.node),
                    );
                }
            }
            Decl::Impl(i) => self.collect_impl(i),
            _ => {}
        }
    }

    fn collect_struct(&mut self, s: &StructDecl) {
        let generics: Vec<String> = s.generics.iter().map(|g| g.name.node.clone()).collect();
        let mut invariants = Vec::new();
        for ann in &s.annotations {
            if let AnnotationKind::Invariant(e) = &ann.kind {
                invariants.push(format_expr(e));
            }
        }
        for field in &s.fields {
            for ann in &field.annotations {
                if let AnnotationKind::Invariant(e) = &ann.kind {
                    invariants.push(format_expr(e));
                }
            }
        }

        let fields = self.with_generics(&s.generics, |chk| {
            s.fields
                .iter()
                .map(|f| (f.name.node.clone(), chk.resolve_type(&f.ty)))
                .collect::<Vec<_>>()
        });

        // The struct name doubles as its constructor symbol.
        let ctor = FunctionType {
            params: fields
                .iter()
                .map(|(name, ty)| ParamType {
                    name: name.clone(),
                    ty: ty.clone(),
                    mutable: false,
                })
                .collect(),
            ret: Type::Named(s.name.node.clone()),
            effects: Vec::new(),
            capabilities: Vec::new(),
            contracts: Vec::new(),
            is_pure: true,
        };
        if self
            .table
            .define_symbol(
                &s.name.node,
                Symbol {
                    ty: Type::Function(Box::new(ctor)),
                    mutable: false,
                },
            )
            .is_err()
        {
            self.error(
                s.name.span,
                format!("duplicate definition of '{}'", s.name.node),
            );
        }

        self.field_defaults.insert(
            s.name.node.clone(),
            s.fields
                .iter()
                .filter(|f| f.default.is_some())
                .map(|f| f.name.node.clone())
                .collect(),
        );
        self.structs.insert(
            s.name.node.clone(),
            StructDef {
                generics,
                fields,
                invariants,
            },
        );
    }

    fn collect_impl(&mut self, i: &ImplDecl) {
        let target = self.resolve_type(&i.target);
        let type_name = match nominal_name(&target) {
            Some(n) => n.to_string(),
            None => {
                self.error(i.target.span, "impl target must be a nominal type");
                return;
            }
        };
        for m in &i.methods {
            let mut sig = self.signature_of(m, Some(&target));
            // `self` is implied at call sites.
            if sig.params.first().is_some_and(|p| p.name == "self") {
                sig.params.remove(0);
            }
            let duplicate = self
                .methods
                .get(&type_name)
                .is_some_and(|entry| entry.iter().any(|(n, _)| n == &m.name.node));
            if duplicate {
                self.error(
                    m.name.span,
                    format!("duplicate method '{}' on '{}'", m.name.node, type_name),
                );
                continue;
            }
            self.methods
                .entry(type_name.clone())
                .or_default()
                .push((m.name.node.clone(), sig));
        }
    }

    /// Resolve a function signature. Generic parameters and `Self` are bound
    /// in a throwaway scope.
    fn signature_of(&mut self, f: &FnDecl, self_ty: Option<&Type>) -> FunctionType {
        self.table.push(ScopeKind::Function);
        self.bind_generics(&f.generics);
        if let Some(st) = self_ty {
            let _ = self.table.define_type("Self", st.clone());
        }

        let params = f
            .params
            .iter()
            .map(|p| ParamType {
                name: p.name.node.clone(),
                ty: self.resolve_type(&p.ty),
                mutable: p.mutable,
            })
            .collect();
        let ret = match &f.ret {
            Some(t) => self.resolve_type(t),
            None => Type::Void,
        };
        self.table.pop();

        let mut effects = Vec::new();
        let mut capabilities = Vec::new();
        let mut contracts = Vec::new();
        for ann in &f.annotations {
            match &ann.kind {
                AnnotationKind::Effects(names) => {
                    effects.extend(names.iter().map(|n| n.node.clone()));
                }
                AnnotationKind::Capability { name, .. } => capabilities.push(name.node.clone()),
                AnnotationKind::Contract { name, .. } => contracts.push(name.node.clone()),
                _ => {}
            }
        }

        FunctionType {
            params,
            ret,
            effects,
            capabilities,
            contracts,
            is_pure: f.is_pure,
        }
    }

    fn bind_generics(&mut self, generics: &[GenericParam]) {
        for g in generics {
            let mut bounds = Vec::new();
            for b in &g.bounds {
                match &b.kind {
                    TypeExprKind::Named { name, .. } => bounds.push(name.node.clone()),
                    _ => self.error(b.span, "generic bounds must be trait names"),
                }
            }
            let id = self.next_var_id;
            self.next_var_id += 1;
            if self
                .table
                .define_type(
                    &g.name.node,
                    Type::Var {
                        name: g.name.node.clone(),
                        bounds,
                        id,
                    },
                )
                .is_err()
            {
                self.error(
                    g.name.span,
                    format!("duplicate generic parameter '{}'", g.name.node),
                );
            }
        }
    }

    fn with_generics<T>(&mut self, generics: &[GenericParam], f: impl FnOnce(&mut Self) -> T) -> T {
        self.table.push(ScopeKind::Function);
        self.bind_generics(generics);
        let out = f(self);
        self.table.pop();
        out
    }

    // -----------------------------------------------------------------------
    // Type resolution
    // -----------------------------------------------------------------------

    pub fn resolve_type(&mut self, te: &TypeExpr) -> Type {
        match &te.kind {
            TypeExprKind::Named { name, args } => self.resolve_named(te.span, &name.node, args),
            TypeExprKind::Array { elem, size } => Type::Array {
                elem: Box::new(self.resolve_type(elem)),
                size: *size,
            },
            TypeExprKind::Tuple(items) => {
                Type::Tuple(items.iter().map(|t| self.resolve_type(t)).collect())
            }
            TypeExprKind::Function {
                params,
                ret,
                effects,
            } => Type::Function(Box::new(FunctionType {
                params: params
                    .iter()
                    .enumerate()
                    .map(|(i, t)| ParamType {
                        name: format!("arg{i}"),
                        ty: self.resolve_type(t),
                        mutable: false,
                    })
                    .collect(),
                ret: self.resolve_type(ret),
                effects: effects.iter().map(|e| e.node.clone()).collect(),
                capabilities: Vec::new(),
                contracts: Vec::new(),
                is_pure: false,
            })),
            TypeExprKind::Reference { inner, mutable } => Type::Reference {
                inner: Box::new(self.resolve_type(inner)),
                mutable: *mutable,
            },
            TypeExprKind::Optional(inner) => {
                Type::Optional(Box::new(self.resolve_type(inner)))
            }
        }
    }

    fn resolve_named(&mut self, span: Span, name: &str, args: &[TypeExpr]) -> Type {
        let prim = match name {
            "Int" => Some(Type::Int),
            "Int8" => Some(Type::Int8),
            "Int16" => Some(Type::Int16),
            "Int32" => Some(Type::Int32),
            "Int64" => Some(Type::Int64),
            "UInt" => Some(Type::UInt),
            "Float32" => Some(Type::Float32),
            "Float64" => Some(Type::Float64),
            "Bool" => Some(Type::Bool),
            "Char" => Some(Type::Char),
            "String" => Some(Type::String),
            "Void" => Some(Type::Void),
            "Never" => Some(Type::Never),
            _ => None,
        };
        if let Some(p) = prim {
            if !args.is_empty() {
                self.error(span, format!("type '{name}' takes no type arguments"));
            }
            return p;
        }

        if name == "Result" {
            if args.len() != 2 {
                self.error(span, "Result takes exactly two type arguments");
                return Type::Unknown;
            }
            return Type::Result {
                ok: Box::new(self.resolve_type(&args[0])),
                err: Box::new(self.resolve_type(&args[1])),
            };
        }
        if name == "Option" {
            if args.len() != 1 {
                self.error(span, "Option takes exactly one type argument");
                return Type::Unknown;
            }
            return Type::Optional(Box::new(self.resolve_type(&args[0])));
        }

        if self.aliases.contains_key(name) {
            return self.resolve_alias(span, name, args);
        }

        let Some(found) = self.table.lookup_type(name).cloned() else {
            self.error(span, format!("unknown type '{name}'"));
            return Type::Unknown;
        };

        if args.is_empty() {
            return found;
        }
        let resolved_args: Vec<Type> = args.iter().map(|a| self.resolve_type(a)).collect();
        match found {
            Type::Named(n) => {
                if let Some(expected) = self.generic_arity(&n) {
                    if expected != resolved_args.len() {
                        self.error(
                            span,
                            format!(
                                "wrong number of type arguments for '{n}': expected {expected}, \
                                 got {}",
                                resolved_args.len()
                            ),
                        );
                    }
                }
                Type::Applied {
                    name: n,
                    args: resolved_args,
                }
            }
            other => {
                self.error(
                    span,
                    format!("type '{}' takes no type arguments", other.display()),
                );
                other
            }
        }
    }

    fn resolve_alias(&mut self, span: Span, name: &str, args: &[TypeExpr]) -> Type {
        if self.alias_stack.iter().any(|n| n == name) {
            self.error(span, format!("cyclic type alias '{name}'"));
            return Type::Error(format!("cyclic type alias '{name}'"));
        }
        let Some(def) = self.aliases.get(name) else {
            return Type::Unknown;
        };
        let generics = def.generics.clone();
        let target = def.target.clone();
        if generics.len() != args.len() {
            self.error(
                span,
                format!(
                    "wrong number of type arguments for '{name}': expected {}, got {}",
                    generics.len(),
                    args.len()
                ),
            );
            return Type::Unknown;
        }
        let resolved_args: Vec<Type> = args.iter().map(|a| self.resolve_type(a)).collect();

        self.alias_stack.push(name.to_string());
        let resolved = self.with_generics_named(&generics, |chk| chk.resolve_type(&target));
        self.alias_stack.pop();

        let map: HashMap<String, Type> = generics.into_iter().zip(resolved_args).collect();
        substitute(&resolved, &map)
    }

    fn with_generics_named<T>(
        &mut self,
        names: &[String],
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        self.table.push(ScopeKind::Function);
        for n in names {
            let id = self.next_var_id;
            self.next_var_id += 1;
            let _ = self.table.define_type(
                n,
                Type::Var {
                    name: n.clone(),
                    bounds: Vec::new(),
                    id,
                },
            );
        }
        let out = f(self);
        self.table.pop();
        out
    }

    fn generic_arity(&self, name: &str) -> Option<usize> {
        if let Some(def) = self.structs.get(name) {
            return Some(def.generics.len());
        }
        if let Some(def) = self.enums.get(name) {
            return Some(def.generics.len());
        }
        if let Some(def) = self.traits.get(name) {
            return Some(def.generics.len());
        }
        None
    }

    // -----------------------------------------------------------------------
    // Pass B — checking
    // -----------------------------------------------------------------------

    fn check_decl(&mut self, decl: &Decl, ctx: &Ctx) {
        match decl {
            Decl::Export(e) => self.check_decl(&e.decl, ctx),
            Decl::Function(f) => self.check_fn(f, None),
            Decl::Variable(v) => self.check_let(v, ctx),
            Decl::Struct(s) => self.check_struct(s),
            Decl::Trait(t) => {
                let self_ty = Type::Named(t.name.node.clone());
                for s in &t.supers {
                    if !self.traits.contains_key(&s.node) {
                        self.error(s.span, format!("unknown trait '{}'", s.node));
                    }
                }
                for m in &t.methods {
                    self.check_fn(m, Some(self_ty.clone()));
                }
            }
            Decl::Impl(i) => {
                if let Some(tr) = &i.trait_name {
                    if !self.traits.contains_key(&tr.node) {
                        self.error(tr.span, format!("unknown trait '{}'", tr.node));
                    }
                }
                let target = self.resolve_type(&i.target);
                for m in &i.methods {
                    self.check_fn(m, Some(target.clone()));
                }
            }
            // Collected declaratively; bodies carry no checkable code.
            Decl::Enum(_)
            | Decl::TypeAlias(_)
            | Decl::Contract(_)
            | Decl::Intent(_)
            | Decl::Effect(_)
            | Decl::Capability(_)
            | Decl::Import(_) => {}
        }
    }

    fn check_fn(&mut self, f: &FnDecl, self_ty: Option<Type>) {
        self.table.push(ScopeKind::Function);
        self.bind_generics(&f.generics);
        if let Some(st) = &self_ty {
            let _ = self.table.define_type("Self", st.clone());
        }

        for p in &f.params {
            let ty = self.resolve_type(&p.ty);
            if self
                .table
                .define_symbol(
                    &p.name.node,
                    Symbol {
                        ty,
                        mutable: p.mutable,
                    },
                )
                .is_err()
            {
                self.error(
                    p.name.span,
                    format!("duplicate parameter '{}'", p.name.node),
                );
            }
        }

        let ret = match &f.ret {
            Some(t) => self.resolve_type(t),
            None => Type::Void,
        };

        let mut ctx = Ctx {
            in_contract: false,
            ret: Some(ret),
            effects: Vec::new(),
            capabilities: Vec::new(),
        };
        for ann in &f.annotations {
            match &ann.kind {
                AnnotationKind::Effects(names) => {
                    ctx.effects.extend(names.iter().map(|n| n.node.clone()));
                }
                AnnotationKind::Capability { name, .. } => {
                    ctx.capabilities.push(name.node.clone());
                }
                _ => {}
            }
        }

        if f.is_pure && !ctx.effects.is_empty() {
            self.error(
                f.name.span,
                format!("pure function '{}' may not declare effects", f.name.node),
            );
        }

        for ann in &f.annotations {
            self.check_annotation(ann, &ctx);
        }

        if let Some(body) = &f.body {
            let tail_ty = self.check_block(body, &ctx, ScopeKind::Block);
            if let Some(tail) = &body.tail {
                let ret = ctx.ret.as_ref().expect("function ctx has a return type");
                if !assignable(&tail_ty, ret) {
                    self.error(
                        tail.span,
                        format!(
                            "mismatched return type: expected {}, got {}",
                            ret.display(),
                            tail_ty.display()
                        ),
                    );
                }
            }
        }

        self.table.pop();
    }

    fn check_annotation(&mut self, ann: &Annotation, ctx: &Ctx) {
        match &ann.kind {
            AnnotationKind::Requires(e) => self.check_clause(e, "requires", ctx),
            AnnotationKind::Ensures(e) => self.check_clause(e, "ensures", ctx),
            AnnotationKind::Invariant(e) => self.check_clause(e, "invariant", ctx),
            AnnotationKind::Effects(names) => {
                for n in names {
                    if self.effects.contains_key(&n.node) {
                        continue;
                    }
                    if self.table.lookup_symbol(&n.node).is_some()
                        || self.table.lookup_type(&n.node).is_some()
                    {
                        self.warning(n.span, format!("'{}' is not an effect", n.node));
                    } else {
                        self.error(n.span, format!("unknown effect '{}'", n.node));
                    }
                }
            }
            AnnotationKind::Capability { name, fields } => {
                let Some(def) = self.capabilities.get(&name.node).cloned() else {
                    self.error(name.span, format!("unknown capability '{}'", name.node));
                    for (_, value) in fields {
                        let _ = self.infer_expr(value, ctx);
                    }
                    return;
                };
                for (fname, value) in fields {
                    let value_ty = self.infer_expr(value, ctx);
                    match def.permission(&fname.node) {
                        Some(expected) => {
                            if !assignable(&value_ty, expected) {
                                self.error(
                                    value.span,
                                    format!(
                                        "permission '{}' expects {}, got {}",
                                        fname.node,
                                        expected.display(),
                                        value_ty.display()
                                    ),
                                );
                            }
                        }
                        None => self.error(
                            fname.span,
                            format!(
                                "unknown permission '{}' on capability '{}'",
                                fname.node, name.node
                            ),
                        ),
                    }
                }
            }
            AnnotationKind::Contract { name, .. } => {
                if !self.table.has_contract(&name.node) {
                    self.error(name.span, format!("unknown contract '{}'", name.node));
                }
            }
            AnnotationKind::Intent { name, .. } => {
                if !self.table.has_intent(&name.node) {
                    self.error(name.span, format!("unknown intent '{}'", name.node));
                }
            }
            AnnotationKind::Verify(_) => {}
        }
    }

    fn check_clause(&mut self, e: &Expr, what: &str, ctx: &Ctx) {
        let ty = self.infer_expr(e, &ctx.contract());
        if !matches!(ty, Type::Bool | Type::Unknown) {
            self.error(
                e.span,
                format!("{what} clause must be Bool, got {}", ty.display()),
            );
        }
    }

    fn check_struct(&mut self, s: &StructDecl) {
        let ctx = Ctx::top();
        self.with_generics(&s.generics, |chk| {
            // Field defaults.
            for f in &s.fields {
                if let Some(d) = &f.default {
                    let dt = chk.infer_expr(d, &ctx);
                    let ft = chk.resolve_type(&f.ty);
                    if !assignable(&dt, &ft) {
                        chk.error(
                            d.span,
                            format!(
                                "default for field '{}' must be {}, got {}",
                                f.name.node,
                                ft.display(),
                                dt.display()
                            ),
                        );
                    }
                }
            }

            // Invariants see the fields as free names.
            chk.table.push(ScopeKind::Block);
            for f in &s.fields {
                let ty = chk.resolve_type(&f.ty);
                let _ = chk.table.define_symbol(
                    &f.name.node,
                    Symbol { ty, mutable: false },
                );
            }
            for ann in s.annotations.iter().chain(s.fields.iter().flat_map(|f| f.annotations.iter()))
            {
                match &ann.kind {
                    AnnotationKind::Invariant(e) => chk.check_clause(e, "invariant", &ctx),
                    AnnotationKind::Verify(_) => {}
                    _ => chk.warning(
                        ann.span,
                        "only invariant annotations apply to struct declarations",
                    ),
                }
            }
            chk.table.pop();
        });
    }

    fn check_let(&mut self, v: &LetDecl, ctx: &Ctx) {
        let declared = v.ty.as_ref().map(|t| self.resolve_type(t));
        let init_ty = v.init.as_ref().map(|e| self.infer_expr(e, ctx));

        let ty = match (declared, init_ty) {
            (Some(d), Some(i)) => {
                if !assignable(&i, &d) {
                    self.error(
                        v.span,
                        format!("cannot assign {} to {}", i.display(), d.display()),
                    );
                }
                d
            }
            (Some(d), None) => d,
            (None, Some(i)) => i,
            (None, None) => {
                self.error(
                    v.span,
                    format!(
                        "cannot infer type for '{}': add a type annotation or an initializer",
                        v.name.node
                    ),
                );
                Type::Unknown
            }
        };

        if self
            .table
            .define_symbol(
                &v.name.node,
                Symbol {
                    ty,
                    mutable: v.mutable,
                },
            )
            .is_err()
        {
            self.error(
                v.name.span,
                format!("duplicate definition of '{}'", v.name.node),
            );
        }
    }

    fn check_block(&mut self, block: &Block, ctx: &Ctx, kind: ScopeKind) -> Type {
        self.table.push(kind);
        for stmt in &block.stmts {
            self.check_stmt(stmt, ctx);
        }
        let ty = match &block.tail {
            Some(tail) => self.infer_expr(tail, ctx),
            None => Type::Void,
        };
        self.table.pop();
        ty
    }

    fn check_stmt(&mut self, stmt: &Stmt, ctx: &Ctx) {
        match stmt {
            Stmt::Let(v) => self.check_let(v, ctx),
            Stmt::Expr(e) => {
                let _ = self.infer_expr(e, ctx);
            }
            Stmt::Return(r) => {
                let Some(ret) = ctx.ret.clone() else {
                    self.error(r.span, "return outside of a function");
                    if let Some(v) = &r.value {
                        let _ = self.infer_expr(v, ctx);
                    }
                    return;
                };
                match &r.value {
                    Some(v) => {
                        let vt = self.infer_expr(v, ctx);
                        if !assignable(&vt, &ret) {
                            self.error(
                                v.span,
                                format!(
                                    "return type mismatch: expected {}, got {}",
                                    ret.display(),
                                    vt.display()
                                ),
                            );
                        }
                    }
                    None => {
                        if !matches!(ret, Type::Void | Type::Unknown) {
                            self.error(
                                r.span,
                                format!("missing return value: expected {}", ret.display()),
                            );
                        }
                    }
                }
            }
            Stmt::If(s) => self.check_if(s, ctx),
            Stmt::While(s) => {
                self.check_condition(&s.cond, ctx);
                self.check_loop_invariants(&s.invariants, ctx);
                let _ = self.check_block(&s.body, ctx, ScopeKind::Loop);
            }
            Stmt::For(s) => {
                let iter_ty = self.infer_expr(&s.iterable, ctx);
                let elem = element_type(&iter_ty);
                self.table.push(ScopeKind::Loop);
                let _ = self.table.define_symbol(
                    &s.binding.node,
                    Symbol {
                        ty: elem,
                        mutable: false,
                    },
                );
                self.check_loop_invariants(&s.invariants, ctx);
                for stmt in &s.body.stmts {
                    self.check_stmt(stmt, ctx);
                }
                if let Some(tail) = &s.body.tail {
                    let _ = self.infer_expr(tail, ctx);
                }
                self.table.pop();
            }
            Stmt::Match(m) => {
                let _ = self.check_match(&m.scrutinee, &m.arms, ctx);
            }
            Stmt::Block(b) => {
                let _ = self.check_block(b, ctx, ScopeKind::Block);
            }
        }
    }

    fn check_if(&mut self, s: &IfStmt, ctx: &Ctx) {
        self.check_condition(&s.cond, ctx);
        let _ = self.check_block(&s.then_block, ctx, ScopeKind::Block);
        match &s.else_branch {
            Some(ElseBranch::If(nested)) => self.check_if(nested, ctx),
            Some(ElseBranch::Block(b)) => {
                let _ = self.check_block(b, ctx, ScopeKind::Block);
            }
            None => {}
        }
    }

    fn check_condition(&mut self, cond: &Expr, ctx: &Ctx) {
        let ty = self.infer_expr(cond, ctx);
        if !matches!(ty, Type::Bool | Type::Unknown) {
            self.error(
                cond.span,
                format!("condition must be Bool, got {}", ty.display()),
            );
        }
    }

    fn check_loop_invariants(&mut self, invariants: &[Annotation], ctx: &Ctx) {
        for ann in invariants {
            match &ann.kind {
                AnnotationKind::Invariant(e) => self.check_clause(e, "invariant", ctx),
                _ => self.warning(ann.span, "only invariant annotations apply to loops"),
            }
        }
    }

    fn check_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], ctx: &Ctx) -> Type {
        let subject = self.infer_expr(scrutinee, ctx);
        let mut result: Option<Type> = None;

        for arm in arms {
            self.table.push(ScopeKind::Block);
            self.bind_pattern(&arm.pattern, &subject);
            if let Some(guard) = &arm.guard {
                let gt = self.infer_expr(guard, ctx);
                if !matches!(gt, Type::Bool | Type::Unknown) {
                    self.error(
                        guard.span,
                        format!("match guard must be Bool, got {}", gt.display()),
                    );
                }
            }
            let arm_ty = self.infer_expr(&arm.body, ctx);
            self.table.pop();

            match &result {
                None => result = Some(arm_ty),
                Some(prev) => {
                    if !assignable(&arm_ty, prev) && !assignable(prev, &arm_ty) {
                        self.warning(
                            arm.span,
                            format!(
                                "match arms have differing types: {} vs {}",
                                prev.display(),
                                arm_ty.display()
                            ),
                        );
                    }
                }
            }
        }

        result.unwrap_or(Type::Void)
    }

    fn bind_pattern(&mut self, pattern: &Pattern, subject: &Type) {
        match pattern {
            Pattern::Wildcard { .. } | Pattern::Literal { .. } => {}
            Pattern::Binding { name, mutable, .. } => {
                if self
                    .table
                    .define_symbol(
                        &name.node,
                        Symbol {
                            ty: subject.clone(),
                            mutable: *mutable,
                        },
                    )
                    .is_err()
                {
                    self.error(
                        name.span,
                        format!("duplicate definition of '{}'", name.node),
                    );
                }
            }
            Pattern::Tuple { span, items } => match strip_refs(subject) {
                Type::Tuple(elems) => {
                    if elems.len() != items.len() {
                        self.error(
                            *span,
                            format!(
                                "tuple pattern expects {} elements, got {}",
                                items.len(),
                                elems.len()
                            ),
                        );
                    }
                    for (item, elem) in items.iter().zip(elems.iter()) {
                        self.bind_pattern(item, elem);
                    }
                    for item in items.iter().skip(elems.len()) {
                        self.bind_pattern(item, &Type::Unknown);
                    }
                }
                Type::Unknown => {
                    for item in items {
                        self.bind_pattern(item, &Type::Unknown);
                    }
                }
                other => {
                    self.error(
                        *span,
                        format!("tuple pattern on non-tuple {}", other.display()),
                    );
                    for item in items {
                        self.bind_pattern(item, &Type::Unknown);
                    }
                }
            },
            Pattern::Struct {
                span,
                name,
                fields,
                rest: _,
            } => {
                let Some(def) = self.structs.get(&name.node).cloned() else {
                    self.error(*span, format!("unknown struct '{}'", name.node));
                    for (_, sub) in fields {
                        if let Some(sub) = sub {
                            self.bind_pattern(sub, &Type::Unknown);
                        }
                    }
                    return;
                };
                let subst_map = generic_map(&def.generics, strip_refs(subject));
                for (fname, sub) in fields {
                    match def.field(&fname.node) {
                        Some(ft) => {
                            let ft = match &subst_map {
                                Some(map) => substitute(ft, map),
                                None => ft.clone(),
                            };
                            match sub {
                                Some(sub) => self.bind_pattern(sub, &ft),
                                None => {
                                    if self
                                        .table
                                        .define_symbol(
                                            &fname.node,
                                            Symbol {
                                                ty: ft,
                                                mutable: false,
                                            },
                                        )
                                        .is_err()
                                    {
                                        self.error(
                                            fname.span,
                                            format!(
                                                "duplicate definition of '{}'",
                                                fname.node
                                            ),
                                        );
                                    }
                                }
                            }
                        }
                        None => self.error(
                            fname.span,
                            format!("unknown field '{}' on '{}'", fname.node, name.node),
                        ),
                    }
                }
            }
            Pattern::Variant {
                span,
                enum_name,
                variant,
                fields,
            } => {
                let Some(def) = self.enums.get(&enum_name.node).cloned() else {
                    self.error(*span, format!("unknown enum '{}'", enum_name.node));
                    for f in fields {
                        self.bind_pattern(f, &Type::Unknown);
                    }
                    return;
                };
                let Some(vfields) = def.variant(&variant.node) else {
                    self.error(
                        variant.span,
                        format!(
                            "unknown variant '{}' on enum '{}'",
                            variant.node, enum_name.node
                        ),
                    );
                    for f in fields {
                        self.bind_pattern(f, &Type::Unknown);
                    }
                    return;
                };
                if vfields.len() != fields.len() {
                    self.error(
                        *span,
                        format!(
                            "variant '{}' has {} fields, pattern names {}",
                            variant.node,
                            vfields.len(),
                            fields.len()
                        ),
                    );
                }
                let subst_map = generic_map(&def.generics, strip_refs(subject));
                let vfields = vfields.to_vec();
                for (f, ft) in fields.iter().zip(vfields.iter()) {
                    let ft = match &subst_map {
                        Some(map) => substitute(ft, map),
                        None => ft.clone(),
                    };
                    self.bind_pattern(f, &ft);
                }
                for f in fields.iter().skip(vfields.len()) {
                    self.bind_pattern(f, &Type::Unknown);
                }
            }
            Pattern::Range { start, end, .. } => {
                self.bind_pattern(start, subject);
                self.bind_pattern(end, subject);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub fn infer_expr(&mut self, expr: &Expr, ctx: &Ctx) -> Type {
        let ty = self.infer_expr_inner(expr, ctx);
        self.record(expr.span, ty.clone());
        ty
    }

    fn record(&mut self, span: Span, ty: Type) {
        self.expr_types.insert((span.offset(), span.len()), ty);
    }

    fn infer_expr_inner(&mut self, expr: &Expr, ctx: &Ctx) -> Type {
        match &expr.kind {
            ExprKind::Ident(name) => self.infer_ident(expr.span, name, ctx),
            ExprKind::SelfRef => match self.table.lookup_symbol("self") {
                Some(sym) => sym.ty.clone(),
                None => {
                    self.error(expr.span, "'self' outside of an impl method");
                    Type::Unknown
                }
            },
            ExprKind::Literal(lit) => literal_type(lit),
            ExprKind::Binary { op, left, right } => self.infer_binary(expr, *op, left, right, ctx),
            ExprKind::Unary { op, expr: inner } => {
                let it = self.infer_expr(inner, ctx);
                match op {
                    UnaryOp::Neg => {
                        if !is_numeric(&it) {
                            self.error(
                                inner.span,
                                format!("unary '-' expects a numeric operand, got {}", it.display()),
                            );
                            return Type::Unknown;
                        }
                        it
                    }
                    UnaryOp::Not => {
                        if !matches!(it, Type::Bool | Type::Unknown) {
                            self.error(
                                inner.span,
                                format!("unary '!' expects Bool, got {}", it.display()),
                            );
                        }
                        Type::Bool
                    }
                    UnaryOp::BitNot => {
                        if !is_integer(&it) && !it.is_unknown() {
                            self.error(
                                inner.span,
                                format!(
                                    "unary '~' expects an integer operand, got {}",
                                    it.display()
                                ),
                            );
                            return Type::Unknown;
                        }
                        it
                    }
                }
            }
            ExprKind::Reference {
                mutable,
                expr: inner,
            } => {
                let it = self.infer_expr(inner, ctx);
                Type::Reference {
                    inner: Box::new(it),
                    mutable: *mutable,
                }
            }
            ExprKind::Deref(inner) => {
                let it = self.infer_expr(inner, ctx);
                match it {
                    Type::Reference { inner, .. } => *inner,
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            inner.span,
                            format!("cannot dereference {}", other.display()),
                        );
                        Type::Unknown
                    }
                }
            }
            ExprKind::Assign { op, target, value } => self.infer_assign(*op, target, value, ctx),
            ExprKind::Call { callee, args } => self.infer_call(expr.span, callee, args, ctx),
            ExprKind::Member { base, member } => self.infer_member(base, member, ctx),
            ExprKind::Path { base, item } => self.infer_path(expr.span, base, item),
            ExprKind::Index { base, index } => self.infer_index(base, index, ctx),
            ExprKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.check_condition(cond, ctx);
                let then_ty = self.check_block(then_block, ctx, ScopeKind::Block);
                match else_block {
                    Some(e) => {
                        let else_ty = self.check_block(e, ctx, ScopeKind::Block);
                        if !assignable(&else_ty, &then_ty) && !assignable(&then_ty, &else_ty) {
                            self.warning(
                                expr.span,
                                format!(
                                    "if branches have differing types: {} vs {}",
                                    then_ty.display(),
                                    else_ty.display()
                                ),
                            );
                        }
                        // The whole expression adopts the then-branch type.
                        then_ty
                    }
                    None => Type::Void,
                }
            }
            ExprKind::Match { scrutinee, arms } => self.check_match(scrutinee, arms, ctx),
            ExprKind::Block(b) => self.check_block(b, ctx, ScopeKind::Block),
            ExprKind::Lambda { params, ret, body } => {
                self.table.push(ScopeKind::Function);
                let mut ptypes = Vec::new();
                for p in params {
                    let ty = match &p.ty {
                        Some(t) => self.resolve_type(t),
                        None => Type::Unknown,
                    };
                    ptypes.push(ParamType {
                        name: p.name.node.clone(),
                        ty: ty.clone(),
                        mutable: false,
                    });
                    let _ = self.table.define_symbol(
                        &p.name.node,
                        Symbol { ty, mutable: false },
                    );
                }
                let body_ty = self.infer_expr(body, ctx);
                self.table.pop();
                let ret_ty = match ret {
                    Some(t) => {
                        let declared = self.resolve_type(t);
                        if !assignable(&body_ty, &declared) {
                            self.error(
                                body.span,
                                format!(
                                    "lambda body has type {}, expected {}",
                                    body_ty.display(),
                                    declared.display()
                                ),
                            );
                        }
                        declared
                    }
                    None => body_ty,
                };
                Type::Function(Box::new(FunctionType {
                    params: ptypes,
                    ret: ret_ty,
                    effects: Vec::new(),
                    capabilities: Vec::new(),
                    contracts: Vec::new(),
                    is_pure: false,
                }))
            }
            ExprKind::Array(items) => {
                let mut elem = Type::Unknown;
                for (i, item) in items.iter().enumerate() {
                    let it = self.infer_expr(item, ctx);
                    if i == 0 {
                        elem = it;
                    } else if !assignable(&it, &elem) {
                        if assignable(&elem, &it) {
                            elem = it;
                        } else {
                            self.error(
                                item.span,
                                format!(
                                    "array elements must share a type: {} vs {}",
                                    elem.display(),
                                    it.display()
                                ),
                            );
                        }
                    }
                }
                Type::Array {
                    elem: Box::new(elem),
                    size: None,
                }
            }
            ExprKind::Tuple(items) => {
                Type::Tuple(items.iter().map(|e| self.infer_expr(e, ctx)).collect())
            }
            ExprKind::StructLit {
                name,
                fields,
                spread,
            } => self.infer_struct_lit(expr.span, name, fields, spread.as_deref(), ctx),
            ExprKind::Range { start, end, .. } => {
                let st = self.infer_expr(start, ctx);
                let et = self.infer_expr(end, ctx);
                if (!is_integer(&st) && !st.is_unknown()) || (!is_integer(&et) && !et.is_unknown())
                {
                    self.error(expr.span, "range bounds must be integers");
                    return Type::Array {
                        elem: Box::new(Type::Unknown),
                        size: None,
                    };
                }
                Type::Array {
                    elem: Box::new(wider(&st, &et)),
                    size: None,
                }
            }
            ExprKind::Cast { expr: inner, ty } => {
                let _ = self.infer_expr(inner, ctx);
                self.resolve_type(ty)
            }
            ExprKind::Old(inner) => {
                if !ctx.in_contract {
                    self.error(expr.span, "'old' is only legal in contract context");
                }
                self.infer_expr(inner, ctx)
            }
            ExprKind::Forall { binders, body } | ExprKind::Exists { binders, body } => {
                // A quantifier whose binders all range over explicit
                // collections is runtime-checkable and legal anywhere;
                // unbounded binders only make sense in contract clauses.
                if !ctx.in_contract && binders.iter().any(|b| b.collection.is_none()) {
                    let what = if matches!(expr.kind, ExprKind::Forall { .. }) {
                        "forall"
                    } else {
                        "exists"
                    };
                    self.error(
                        expr.span,
                        format!(
                            "'{what}' with unbounded binders is only legal in contract context"
                        ),
                    );
                }
                self.table.push(ScopeKind::Block);
                for b in binders {
                    let ty = match &b.collection {
                        Some(coll) => {
                            let ct = self.infer_expr(coll, ctx);
                            match element_type(&ct) {
                                Type::Unknown if !ct.is_unknown() => Type::Int,
                                other => other,
                            }
                        }
                        None => Type::Int,
                    };
                    let _ = self.table.define_symbol(
                        &b.name.node,
                        Symbol { ty, mutable: false },
                    );
                }
                let bt = self.infer_expr(body, ctx);
                self.table.pop();
                if !matches!(bt, Type::Bool | Type::Unknown) {
                    self.error(
                        body.span,
                        format!("quantifier body must be Bool, got {}", bt.display()),
                    );
                }
                Type::Bool
            }
            ExprKind::Try(inner) => {
                let it = self.infer_expr(inner, ctx);
                match it {
                    Type::Result { ok, .. } => {
                        match ctx.ret.as_ref() {
                            Some(Type::Result { .. }) | Some(Type::Unknown) => {}
                            _ => self.error(
                                expr.span,
                                "'?' requires the enclosing function to return Result",
                            ),
                        }
                        *ok
                    }
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            inner.span,
                            format!("'?' applied to non-Result value of type {}", other.display()),
                        );
                        Type::Unknown
                    }
                }
            }
        }
    }

    fn infer_ident(&mut self, span: Span, name: &str, ctx: &Ctx) -> Type {
        if let Some(sym) = self.table.lookup_symbol(name) {
            return sym.ty.clone();
        }
        // `result` names the return value inside contract clauses.
        if name == "result" {
            if ctx.in_contract {
                return ctx.ret.clone().unwrap_or(Type::Unknown);
            }
            self.error(span, "'result' is only legal in contract context");
            return Type::Unknown;
        }
        if name == "None" {
            return Type::Optional(Box::new(Type::Unknown));
        }
        self.error(span, format!("undefined identifier '{name}'"));
        Type::Unknown
    }

    fn infer_binary(
        &mut self,
        expr: &Expr,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        ctx: &Ctx,
    ) -> Type {
        let lt = self.infer_expr(left, ctx);
        let rt = self.infer_expr(right, ctx);
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow => {
                if !is_numeric(&lt) {
                    self.error(
                        left.span,
                        format!("non-numeric operand: {}", lt.display()),
                    );
                    return Type::Unknown;
                }
                if !is_numeric(&rt) {
                    self.error(
                        right.span,
                        format!("non-numeric operand: {}", rt.display()),
                    );
                    return Type::Unknown;
                }
                wider(&lt, &rt)
            }
            BinOp::Eq | BinOp::Ne => {
                if !assignable(&lt, &rt) && !assignable(&rt, &lt) {
                    self.error(
                        expr.span,
                        format!("cannot compare {} and {}", lt.display(), rt.display()),
                    );
                }
                Type::Bool
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                if !is_numeric(&lt) || !is_numeric(&rt) {
                    self.error(
                        expr.span,
                        format!(
                            "ordering expects numeric operands, got {} and {}",
                            lt.display(),
                            rt.display()
                        ),
                    );
                }
                Type::Bool
            }
            BinOp::And | BinOp::Or => {
                if !matches!(lt, Type::Bool | Type::Unknown) {
                    self.error(
                        left.span,
                        format!("logical operand must be Bool, got {}", lt.display()),
                    );
                }
                if !matches!(rt, Type::Bool | Type::Unknown) {
                    self.error(
                        right.span,
                        format!("logical operand must be Bool, got {}", rt.display()),
                    );
                }
                Type::Bool
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                if !is_integer(&lt) && !lt.is_unknown() {
                    self.error(
                        left.span,
                        format!("bitwise operand must be an integer, got {}", lt.display()),
                    );
                }
                if !is_integer(&rt) && !rt.is_unknown() {
                    self.error(
                        right.span,
                        format!("bitwise operand must be an integer, got {}", rt.display()),
                    );
                }
                // Bitwise results keep the left operand's type.
                lt
            }
        }
    }

    fn infer_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, ctx: &Ctx) -> Type {
        let tt = match &target.kind {
            ExprKind::Ident(name) => match self.table.lookup_symbol(name) {
                Some(sym) => {
                    if !sym.mutable {
                        let msg = format!("cannot assign to immutable '{name}'");
                        let ty = sym.ty.clone();
                        self.error(target.span, msg);
                        self.record(target.span, ty.clone());
                        ty
                    } else {
                        let ty = sym.ty.clone();
                        self.record(target.span, ty.clone());
                        ty
                    }
                }
                None => {
                    self.error(target.span, format!("undefined identifier '{name}'"));
                    self.record(target.span, Type::Unknown);
                    Type::Unknown
                }
            },
            _ => self.infer_expr(target, ctx),
        };
        let vt = self.infer_expr(value, ctx);

        match op {
            AssignOp::Assign => {
                if !assignable(&vt, &tt) {
                    self.error(
                        value.span,
                        format!("cannot assign {} to {}", vt.display(), tt.display()),
                    );
                }
            }
            _ => {
                if !is_numeric(&tt) || !is_numeric(&vt) {
                    self.error(
                        value.span,
                        "compound assignment expects numeric operands",
                    );
                }
            }
        }
        tt
    }

    fn infer_call(&mut self, span: Span, callee: &Expr, args: &[Expr], ctx: &Ctx) -> Type {
        // Built-in result/option constructors.
        if let ExprKind::Ident(name) = &callee.kind {
            if matches!(name.as_str(), "Ok" | "Err" | "Some" | "None")
                && self.table.lookup_symbol(name).is_none()
            {
                let arg_tys: Vec<Type> = args.iter().map(|a| self.infer_expr(a, ctx)).collect();
                let expected = if name == "None" { 0 } else { 1 };
                if args.len() != expected {
                    self.error(
                        span,
                        format!("{name} takes {expected} argument(s), got {}", args.len()),
                    );
                }
                let arg = arg_tys.first().cloned().unwrap_or(Type::Unknown);
                let ret = match name.as_str() {
                    "Ok" => Type::Result {
                        ok: Box::new(arg),
                        err: Box::new(Type::Unknown),
                    },
                    "Err" => Type::Result {
                        ok: Box::new(Type::Unknown),
                        err: Box::new(arg),
                    },
                    "Some" => Type::Optional(Box::new(arg)),
                    _ => Type::Optional(Box::new(Type::Unknown)),
                };
                // Record a constructor type for the callee position too.
                self.record(
                    callee.span,
                    Type::Function(Box::new(FunctionType {
                        params: arg_tys
                            .iter()
                            .enumerate()
                            .map(|(i, t)| ParamType {
                                name: format!("arg{i}"),
                                ty: t.clone(),
                                mutable: false,
                            })
                            .collect(),
                        ret: ret.clone(),
                        effects: Vec::new(),
                        capabilities: Vec::new(),
                        contracts: Vec::new(),
                        is_pure: true,
                    })),
                );
                return ret;
            }
        }

        let callee_ty = self.infer_expr(callee, ctx);
        match callee_ty {
            Type::Function(ft) => {
                if args.len() != ft.params.len() {
                    self.error(
                        span,
                        format!(
                            "wrong number of arguments: expected {}, got {}",
                            ft.params.len(),
                            args.len()
                        ),
                    );
                }
                for (arg, param) in args.iter().zip(ft.params.iter()) {
                    let at = self.infer_expr(arg, ctx);
                    if !assignable(&at, &param.ty) {
                        self.error(
                            arg.span,
                            format!(
                                "argument '{}' expects {}, got {}",
                                param.name,
                                param.ty.display(),
                                at.display()
                            ),
                        );
                    }
                }
                for arg in args.iter().skip(ft.params.len()) {
                    let _ = self.infer_expr(arg, ctx);
                }

                // Effect discipline: the callee's declared effects must be a
                // subset of the caller's active effect set.
                for eff in &ft.effects {
                    if !ctx.effects.iter().any(|e| e == eff) {
                        self.error(span, format!("requires effect {eff}"));
                    }
                }

                ft.ret.clone()
            }
            Type::Unknown => {
                for arg in args {
                    let _ = self.infer_expr(arg, ctx);
                }
                Type::Unknown
            }
            other => {
                self.error(
                    callee.span,
                    format!("cannot call a value of type {}", other.display()),
                );
                for arg in args {
                    let _ = self.infer_expr(arg, ctx);
                }
                Type::Unknown
            }
        }
    }

    fn infer_member(&mut self, base: &Expr, member: &covenant_ast::Ident, ctx: &Ctx) -> Type {
        let base_ty = self.infer_expr(base, ctx);
        let stripped = strip_refs(&base_ty).clone();
        match &stripped {
            Type::Named(n) | Type::Applied { name: n, .. } => {
                let args = match &stripped {
                    Type::Applied { args, .. } => Some(args.as_slice()),
                    _ => None,
                };
                // Struct field, then inherent/impl method, then effect method.
                if let Some(def) = self.structs.get(n) {
                    if let Some(ft) = def.field(&member.node) {
                        let ft = ft.clone();
                        return match args {
                            Some(a) => {
                                let map: HashMap<String, Type> =
                                    def.generics.iter().cloned().zip(a.iter().cloned()).collect();
                                substitute(&ft, &map)
                            }
                            None => ft,
                        };
                    }
                }
                if let Some(sig) = self.method_sig(n, &member.node) {
                    return Type::Function(Box::new(sig.clone()));
                }
                if let Some(def) = self.effects.get(n) {
                    if let Some(sig) = def.method(&member.node) {
                        return Type::Function(Box::new(sig.clone()));
                    }
                    self.error(
                        member.span,
                        format!("unknown method '{}' on effect '{}'", member.node, n),
                    );
                    return Type::Unknown;
                }
                self.error(
                    member.span,
                    format!("unknown field or method '{}' on '{}'", member.node, n),
                );
                Type::Unknown
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(
                    member.span,
                    format!(
                        "cannot access member '{}' on {}",
                        member.node,
                        other.display()
                    ),
                );
                Type::Unknown
            }
        }
    }

    fn infer_path(
        &mut self,
        span: Span,
        base: &covenant_ast::Ident,
        item: &covenant_ast::Ident,
    ) -> Type {
        let Some(def) = self.enums.get(&base.node).cloned() else {
            self.error(span, format!("unknown enum '{}'", base.node));
            return Type::Unknown;
        };
        let Some(vfields) = def.variant(&item.node) else {
            self.error(
                item.span,
                format!("unknown variant '{}' on enum '{}'", item.node, base.node),
            );
            return Type::Unknown;
        };

        let enum_ty = if def.generics.is_empty() {
            Type::Named(base.node.clone())
        } else {
            Type::Applied {
                name: base.node.clone(),
                args: vec![Type::Unknown; def.generics.len()],
            }
        };

        if vfields.is_empty() {
            // Unit variants are values of the enum type.
            return enum_ty;
        }
        Type::Function(Box::new(FunctionType {
            params: vfields
                .iter()
                .enumerate()
                .map(|(i, t)| ParamType {
                    name: format!("field{i}"),
                    ty: t.clone(),
                    mutable: false,
                })
                .collect(),
            ret: enum_ty,
            effects: Vec::new(),
            capabilities: Vec::new(),
            contracts: Vec::new(),
            is_pure: true,
        }))
    }

    fn infer_index(&mut self, base: &Expr, index: &Expr, ctx: &Ctx) -> Type {
        let base_ty = self.infer_expr(base, ctx);
        let index_ty = self.infer_expr(index, ctx);
        match strip_refs(&base_ty) {
            Type::Array { elem, .. } => {
                if !is_integer(&index_ty) && !index_ty.is_unknown() {
                    self.error(
                        index.span,
                        format!("array index must be an integer, got {}", index_ty.display()),
                    );
                }
                (**elem).clone()
            }
            Type::Tuple(items) => match &index.kind {
                ExprKind::Literal(Literal::Int(n)) => {
                    let i = *n;
                    if i < 0 || (i as usize) >= items.len() {
                        self.error(
                            index.span,
                            format!("tuple index {i} out of bounds for {}", base_ty.display()),
                        );
                        return Type::Unknown;
                    }
                    items[i as usize].clone()
                }
                _ => {
                    self.error(index.span, "tuple index must be an integer literal");
                    Type::Unknown
                }
            },
            Type::Unknown => Type::Unknown,
            other => {
                self.error(
                    base.span,
                    format!("cannot index a value of type {}", other.display()),
                );
                Type::Unknown
            }
        }
    }

    fn infer_struct_lit(
        &mut self,
        span: Span,
        name: &covenant_ast::Ident,
        fields: &[(covenant_ast::Ident, Expr)],
        spread: Option<&Expr>,
        ctx: &Ctx,
    ) -> Type {
        let Some(def) = self.structs.get(&name.node).cloned() else {
            self.error(span, format!("unknown struct '{}'", name.node));
            for (_, value) in fields {
                let _ = self.infer_expr(value, ctx);
            }
            if let Some(s) = spread {
                let _ = self.infer_expr(s, ctx);
            }
            return Type::Unknown;
        };

        // Generic arguments are not inferred from the literal; unknown slots
        // stay assignable into any annotated application.
        let result = if def.generics.is_empty() {
            Type::Named(name.node.clone())
        } else {
            Type::Applied {
                name: name.node.clone(),
                args: vec![Type::Unknown; def.generics.len()],
            }
        };

        for (fname, value) in fields {
            let vt = self.infer_expr(value, ctx);
            match def.field(&fname.node) {
                Some(ft) => {
                    if !assignable(&vt, ft) {
                        self.error(
                            value.span,
                            format!(
                                "field '{}' expects {}, got {}",
                                fname.node,
                                ft.display(),
                                vt.display()
                            ),
                        );
                    }
                }
                None => self.error(
                    fname.span,
                    format!("unknown field '{}' on '{}'", fname.node, name.node),
                ),
            }
        }

        match spread {
            Some(s) => {
                let st = self.infer_expr(s, ctx);
                if !assignable(&st, &result) {
                    self.error(
                        s.span,
                        format!(
                            "spread source must be {}, got {}",
                            result.display(),
                            st.display()
                        ),
                    );
                }
            }
            None => {
                // Without a spread, unnamed fields must carry defaults.
                for (fname, _) in &def.fields {
                    if fields.iter().any(|(n, _)| &n.node == fname) {
                        continue;
                    }
                    // Defaults are stored on the declaration, not the def;
                    // the lowerer substitutes them. Here we only flag fields
                    // that can never be filled.
                    if !self.struct_field_has_default(&name.node, fname) {
                        self.error(span, format!("missing field '{fname}'"));
                    }
                }
            }
        }

        result
    }

    fn struct_field_has_default(&self, struct_name: &str, field: &str) -> bool {
        self.field_defaults
            .get(struct_name)
            .is_some_and(|set| set.iter().any(|f| f == field))
    }
}

fn unwrap_export(decl: &Decl) -> &Decl {
    match decl {
        Decl::Export(e) => unwrap_export(&e.decl),
        other => other,
    }
}

fn literal_type(lit: &Literal) -> Type {
    match lit {
        Literal::Int(_) => Type::Int,
        Literal::Float(_) => Type::Float64,
        Literal::Str(_) => Type::String,
        Literal::Char(_) => Type::Char,
        Literal::Bool(_) => Type::Bool,
        Literal::Nil => Type::Optional(Box::new(Type::Unknown)),
    }
}

fn strip_refs(ty: &Type) -> &Type {
    match ty {
        Type::Reference { inner, .. } => strip_refs(inner),
        other => other,
    }
}

/// Element type for `for v in e` and quantifier binders: the element of an
/// array, the first argument of a generic application, otherwise `Unknown`.
fn element_type(ty: &Type) -> Type {
    match strip_refs(ty) {
        Type::Array { elem, .. } => (**elem).clone(),
        Type::Applied { args, .. } => args.first().cloned().unwrap_or(Type::Unknown),
        _ => Type::Unknown,
    }
}

fn nominal_name(ty: &Type) -> Option<&str> {
    match ty {
        Type::Named(n) => Some(n),
        Type::Applied { name, .. } => Some(name),
        _ => None,
    }
}

/// Maps generic parameter names to the arguments of an applied subject type.
fn generic_map(generics: &[String], subject: &Type) -> Option<HashMap<String, Type>> {
    match subject {
        Type::Applied { args, .. } if !generics.is_empty() => Some(
            generics
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect(),
        ),
        _ => None,
    }
}
