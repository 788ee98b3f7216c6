#![forbid(unsafe_code)]

mod line_map;

pub use line_map::LineMap;

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Smallest span covering both inputs.
pub fn join(a: Span, b: Span) -> Span {
    let a0: usize = a.offset();
    let b0: usize = b.offset();
    let start = a0.min(b0);
    let end = (a0 + a.len()).max(b0 + b.len());
    span_between(start, end)
}

pub type Ident = Spanned<String>;

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub decls: Vec<Decl>,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    Function(FnDecl),
    Variable(LetDecl),
    TypeAlias(TypeAliasDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Trait(TraitDecl),
    Impl(ImplDecl),
    Contract(ContractDecl),
    Intent(IntentDecl),
    Effect(EffectDecl),
    Capability(CapabilityDecl),
    Import(ImportDecl),
    /// `export <decl>` wrapper.
    Export(ExportDecl),
}

impl Decl {
    pub fn span(&self) -> Span {
        match self {
            Decl::Function(d) => d.span,
            Decl::Variable(d) => d.span,
            Decl::TypeAlias(d) => d.span,
            Decl::Struct(d) => d.span,
            Decl::Enum(d) => d.span,
            Decl::Trait(d) => d.span,
            Decl::Impl(d) => d.span,
            Decl::Contract(d) => d.span,
            Decl::Intent(d) => d.span,
            Decl::Effect(d) => d.span,
            Decl::Capability(d) => d.span,
            Decl::Import(d) => d.span,
            Decl::Export(d) => d.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportDecl {
    pub span: Span,
    pub decl: Box<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FnDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub params: Vec<Param>,
    /// `None` means `Void`.
    pub ret: Option<TypeExpr>,
    pub annotations: Vec<Annotation>,
    /// `None` for signature-only declarations (trait/effect methods, `extern fn`).
    pub body: Option<Block>,
    pub is_pure: bool,
    pub is_extern: bool,
    pub exported: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenericParam {
    pub span: Span,
    pub name: Ident,
    pub bounds: Vec<TypeExpr>,
    pub default: Option<TypeExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeExpr,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LetDecl {
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAliasDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub target: TypeExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub fields: Vec<FieldDecl>,
    /// Struct-level annotations; invariants live here.
    pub annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
    pub annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub variants: Vec<VariantDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantDecl {
    pub span: Span,
    pub name: Ident,
    /// Empty for unit variants.
    pub fields: Vec<TypeExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub supers: Vec<Ident>,
    pub methods: Vec<FnDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImplDecl {
    pub span: Span,
    /// `Some` for `impl Trait for Type`, `None` for inherent impls.
    pub trait_name: Option<Ident>,
    pub target: TypeExpr,
    pub methods: Vec<FnDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub clauses: Vec<Annotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntentDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub clauses: Vec<Annotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EffectDecl {
    pub span: Span,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub methods: Vec<FnDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityDecl {
    pub span: Span,
    pub name: Ident,
    pub permissions: Vec<FieldDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportDecl {
    pub span: Span,
    pub path: Vec<Ident>,
    pub items: ImportItems,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImportItems {
    /// `import a.b.c` — binds the final segment.
    Module,
    /// `import a.b.*` — binds the final path segment as a namespace.
    Wildcard,
    /// `import a.b.{x, y as z}`
    List(Vec<ImportItem>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportItem {
    pub span: Span,
    pub name: Ident,
    pub alias: Option<Ident>,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub span: Span,
    pub kind: AnnotationKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationKind {
    Requires(Expr),
    Ensures(Expr),
    Invariant(Expr),
    /// `@effect[IO, State]`
    Effects(Vec<Ident>),
    /// `@capability Name { perm: value, ... }`
    Capability {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
    },
    /// `@contract Name<T, ...>`
    Contract {
        name: Ident,
        args: Vec<TypeExpr>,
    },
    /// `@intent Name<T, ...>`
    Intent {
        name: Ident,
        args: Vec<TypeExpr>,
    },
    /// `@verify(level: "full" | "runtime" | "trusted")`
    Verify(Spanned<String>),
}

// ---------------------------------------------------------------------------
// Statements and blocks
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
    /// Trailing expression without a semicolon; the block's value.
    pub tail: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let(LetDecl),
    Expr(Expr),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Match(MatchStmt),
    Block(Block),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let(s) => s.span,
            Stmt::Expr(e) => e.span,
            Stmt::Return(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Match(s) => s.span,
            Stmt::Block(b) => b.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: Expr,
    pub then_block: Block,
    pub else_branch: Option<ElseBranch>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElseBranch {
    If(Box<IfStmt>),
    Block(Block),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    /// `@invariant` annotations between the condition and the body.
    pub invariants: Vec<Annotation>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub binding: Ident,
    pub iterable: Expr,
    pub invariants: Vec<Annotation>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchStmt {
    pub span: Span,
    pub scrutinee: Expr,
    pub arms: Vec<MatchArm>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub span: Span,
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Wildcard {
        span: Span,
    },
    Literal {
        span: Span,
        value: Literal,
    },
    Binding {
        span: Span,
        name: Ident,
        mutable: bool,
    },
    Tuple {
        span: Span,
        items: Vec<Pattern>,
    },
    Struct {
        span: Span,
        name: Ident,
        /// `field` shorthand binds the field name; `field: pat` destructures.
        fields: Vec<(Ident, Option<Pattern>)>,
        /// `..` rest marker.
        rest: bool,
    },
    Variant {
        span: Span,
        enum_name: Ident,
        variant: Ident,
        fields: Vec<Pattern>,
    },
    Range {
        span: Span,
        start: Box<Pattern>,
        end: Box<Pattern>,
        inclusive: bool,
    },
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Wildcard { span }
            | Pattern::Literal { span, .. }
            | Pattern::Binding { span, .. }
            | Pattern::Tuple { span, .. }
            | Pattern::Struct { span, .. }
            | Pattern::Variant { span, .. }
            | Pattern::Range { span, .. } => *span,
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Nil,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ident(String),
    SelfRef,
    Literal(Literal),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: Ident,
    },
    /// `Enum::Variant`
    Path {
        base: Ident,
        item: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Block(Block),
    Lambda {
        params: Vec<LambdaParam>,
        ret: Option<TypeExpr>,
        body: Box<Expr>,
    },
    Array(Vec<Expr>),
    Tuple(Vec<Expr>),
    StructLit {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
        spread: Option<Box<Expr>>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: TypeExpr,
    },
    Old(Box<Expr>),
    Forall {
        binders: Vec<QuantBinder>,
        body: Box<Expr>,
    },
    Exists {
        binders: Vec<QuantBinder>,
        body: Box<Expr>,
    },
    /// `e?` error propagation.
    Try(Box<Expr>),
    /// `&e` / `&mut e`
    Reference {
        mutable: bool,
        expr: Box<Expr>,
    },
    /// `*r`
    Deref(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LambdaParam {
    pub span: Span,
    pub name: Ident,
    pub ty: Option<TypeExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuantBinder {
    pub span: Span,
    pub name: Ident,
    /// `i in coll`; a bare binder ranges over `Int`.
    pub collection: Option<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,

    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

// ---------------------------------------------------------------------------
// Syntactic types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct TypeExpr {
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExprKind {
    /// Primitive, user, or generic-applied nominal type. `Result`, `Option`,
    /// `Never` and `Self` are resolved by name in the checker.
    Named {
        name: Ident,
        args: Vec<TypeExpr>,
    },
    Array {
        elem: Box<TypeExpr>,
        size: Option<u64>,
    },
    Tuple(Vec<TypeExpr>),
    Function {
        params: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
        effects: Vec<Ident>,
    },
    Reference {
        inner: Box<TypeExpr>,
        mutable: bool,
    },
    Optional(Box<TypeExpr>),
}
